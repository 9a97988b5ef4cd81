//! Object layout.
//!
//! ```text
//! {warehouse}/{namespace}/{table}/metadata/{seq:05}-{uuid}.metadata.json
//! {warehouse}/{namespace}/{table}/metadata/snap-{id}-{uuid}.manifest-list.json
//! {warehouse}/{namespace}/{table}/metadata/{uuid}-m{n}.manifest.json
//! {warehouse}/{namespace}/{table}/data/{partition path}/{ulid}.rows.json
//! {catalog}/tables/{namespace}/{table}.pointer.json
//! ```

use strata_core::FileId;
use uuid::Uuid;

use crate::ident::TableIdent;
use crate::snapshot::SnapshotId;

/// Suffix of catalog pointer objects.
pub const POINTER_SUFFIX: &str = ".pointer.json";

/// Root location of a table.
#[must_use]
pub fn table_location(warehouse: &str, ident: &TableIdent) -> String {
    format!("{warehouse}/{}/{}", ident.namespace(), ident.name())
}

/// Location of a metadata document.
#[must_use]
pub fn metadata_file(location: &str, sequence_number: u64) -> String {
    format!(
        "{location}/metadata/{sequence_number:05}-{}.metadata.json",
        Uuid::new_v4()
    )
}

/// Location of a manifest list.
#[must_use]
pub fn manifest_list(location: &str, snapshot_id: SnapshotId) -> String {
    format!(
        "{location}/metadata/snap-{snapshot_id}-{}.manifest-list.json",
        Uuid::new_v4()
    )
}

/// Location of the `n`th manifest written by one commit.
#[must_use]
pub fn manifest(location: &str, commit: &Uuid, n: usize) -> String {
    format!("{location}/metadata/{commit}-m{n}.manifest.json")
}

/// Location of a data file.
#[must_use]
pub fn data_file(location: &str, partition_dir: &str, file_id: &FileId) -> String {
    if partition_dir.is_empty() {
        format!("{location}/data/{file_id}.rows.json")
    } else {
        format!("{location}/data/{partition_dir}/{file_id}.rows.json")
    }
}

/// Prefix under which a namespace's pointers live.
#[must_use]
pub fn pointer_prefix(catalog_prefix: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{catalog_prefix}/tables/{ns}/"),
        None => format!("{catalog_prefix}/tables/"),
    }
}

/// Location of a table's catalog pointer.
#[must_use]
pub fn pointer(catalog_prefix: &str, ident: &TableIdent) -> String {
    format!(
        "{}{}{POINTER_SUFFIX}",
        pointer_prefix(catalog_prefix, Some(ident.namespace())),
        ident.name()
    )
}

/// Parses a pointer path back into a table identity.
#[must_use]
pub fn parse_pointer(catalog_prefix: &str, path: &str) -> Option<TableIdent> {
    let rest = path.strip_prefix(&pointer_prefix(catalog_prefix, None))?;
    let (namespace, file) = rest.split_once('/')?;
    let name = file.strip_suffix(POINTER_SUFFIX)?;
    TableIdent::new(namespace, name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let ident = TableIdent::new("raw", "trips").unwrap();
        let location = table_location("warehouse", &ident);
        assert_eq!(location, "warehouse/raw/trips");

        let meta = metadata_file(&location, 3);
        assert!(meta.starts_with("warehouse/raw/trips/metadata/00003-"));
        assert!(meta.ends_with(".metadata.json"));

        let list = manifest_list(&location, SnapshotId::new(7));
        assert!(list.starts_with("warehouse/raw/trips/metadata/snap-7-"));

        let id = FileId::generate();
        assert_eq!(
            data_file(&location, "", &id),
            format!("warehouse/raw/trips/data/{id}.rows.json")
        );
        assert_eq!(
            data_file(&location, "month=650", &id),
            format!("warehouse/raw/trips/data/month=650/{id}.rows.json")
        );
    }

    #[test]
    fn pointer_paths_round_trip() {
        let ident = TableIdent::new("silver", "daily_zones").unwrap();
        let path = pointer("_catalog", &ident);
        assert_eq!(path, "_catalog/tables/silver/daily_zones.pointer.json");
        assert_eq!(parse_pointer("_catalog", &path), Some(ident));
        assert_eq!(parse_pointer("_catalog", "_catalog/tables/x.json"), None);
    }
}
