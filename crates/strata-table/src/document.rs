//! Self-describing JSON documents.
//!
//! Every object the store writes (metadata, manifest list, manifest, data
//! file) is a JSON document whose top level carries `format-version` and
//! `kind`, so a reader can identify and parse it without any external lookup.
//! Documents are written once and never overwritten.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use strata_core::StorageBackend;

use crate::error::{Result, TableError};

/// Highest document format version this crate reads and the one it writes.
pub const FORMAT_VERSION: u32 = 1;

/// Document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    /// Table metadata.
    TableMetadata,
    /// Per-snapshot manifest list.
    ManifestList,
    /// List of data file entries.
    Manifest,
    /// Row container.
    DataFile,
}

/// A type stored as a self-describing document.
pub trait Document: Serialize + DeserializeOwned {
    /// Kind written to and expected in the `kind` field.
    const KIND: DocumentKind;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    #[serde(rename = "format-version")]
    format_version: u32,
    kind: DocumentKind,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "format-version")]
    format_version: u32,
    kind: DocumentKind,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(flatten)]
    body: T,
}

/// Encodes a document with its header.
///
/// # Errors
///
/// Returns `TableError::Serialization` if encoding fails.
pub fn encode<T: Document>(doc: &T) -> Result<Bytes> {
    let envelope = EnvelopeRef {
        format_version: FORMAT_VERSION,
        kind: T::KIND,
        body: doc,
    };
    Ok(Bytes::from(serde_json::to_vec(&envelope)?))
}

/// Decodes a document, checking its header first.
///
/// # Errors
///
/// Returns `TableError::Serialization` on malformed JSON, a newer format
/// version, or an unexpected kind.
pub fn decode<T: Document>(bytes: &[u8]) -> Result<T> {
    let header: Header = serde_json::from_slice(bytes)?;
    if header.format_version > FORMAT_VERSION {
        return Err(TableError::serialization(format!(
            "unsupported format-version {}, max supported is {FORMAT_VERSION}",
            header.format_version
        )));
    }
    if header.kind != T::KIND {
        return Err(TableError::serialization(format!(
            "expected {:?} document, found {:?}",
            T::KIND,
            header.kind
        )));
    }
    let envelope: Envelope<T> = serde_json::from_slice(bytes)?;
    Ok(envelope.body)
}

/// Writes raw bytes to a path that must not exist yet.
///
/// # Errors
///
/// Returns `TableError::WriteOnceViolation` if the path is occupied.
pub async fn put_once(storage: &dyn StorageBackend, path: &str, bytes: Bytes) -> Result<()> {
    match storage.put_once(path, bytes).await {
        Ok(_) => Ok(()),
        Err(strata_core::Error::PreconditionFailed { .. }) => Err(TableError::WriteOnceViolation {
            path: path.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Encodes and writes a document to a path that must not exist yet.
///
/// # Errors
///
/// Returns `TableError::WriteOnceViolation` if the path is occupied, or a
/// storage/serialization error.
pub async fn write_document<T: Document>(
    storage: &dyn StorageBackend,
    path: &str,
    doc: &T,
) -> Result<()> {
    put_once(storage, path, encode(doc)?).await
}

/// Reads and decodes a document.
///
/// # Errors
///
/// Returns `TableError::NotFound` if the object is missing.
pub async fn read_document<T: Document>(storage: &dyn StorageBackend, path: &str) -> Result<T> {
    let bytes = storage.get(path).await.map_err(|e| {
        if e.is_not_found() {
            TableError::not_found(format!("object {path}"))
        } else {
            e.into()
        }
    })?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::MemoryBackend;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        count: u64,
    }

    impl Document for Probe {
        const KIND: DocumentKind = DocumentKind::Manifest;
    }

    #[test]
    fn header_is_at_top_level() {
        let bytes = encode(&Probe {
            name: "m".into(),
            count: 3,
        })
        .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["format-version"], 1);
        assert_eq!(json["kind"], "manifest");
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn rejects_wrong_kind_and_future_versions() {
        let wrong_kind = br#"{"format-version":1,"kind":"data-file","name":"m","count":1}"#;
        assert!(decode::<Probe>(wrong_kind).is_err());

        let future = br#"{"format-version":9,"kind":"manifest","name":"m","count":1}"#;
        assert!(decode::<Probe>(future).is_err());
    }

    #[tokio::test]
    async fn second_write_is_a_violation() {
        let storage = MemoryBackend::new();
        let doc = Probe {
            name: "m".into(),
            count: 1,
        };
        write_document(&storage, "t/m.json", &doc).await.unwrap();

        let err = write_document(&storage, "t/m.json", &doc).await.unwrap_err();
        assert!(matches!(err, TableError::WriteOnceViolation { .. }));

        let back: Probe = read_document(&storage, "t/m.json").await.unwrap();
        assert_eq!(back, doc);
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let storage = MemoryBackend::new();
        let err = read_document::<Probe>(&storage, "nope").await.unwrap_err();
        assert!(matches!(err, TableError::NotFound { .. }));
    }
}
