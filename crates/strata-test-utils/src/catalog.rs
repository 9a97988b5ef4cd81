//! Catalog wrapper that simulates lost compare-and-swap races.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use strata_table::error::Result;
use strata_table::{CasOutcome, Catalog, CatalogPointer, TableIdent};

/// Delegates to an inner catalog, but refuses the next N swaps as if a
/// concurrent writer had won them.
///
/// A refused swap reports the pointer as it currently stands, so the caller
/// sees a conflict on an unchanged table and can rebase onto it.
#[derive(Clone)]
pub struct ContendedCatalog {
    inner: Arc<dyn Catalog>,
    refusals: Arc<AtomicU32>,
    swaps: Arc<AtomicU32>,
}

impl std::fmt::Debug for ContendedCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContendedCatalog")
            .field("refusals", &self.refusals.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ContendedCatalog {
    /// Wraps `inner`. No swaps are refused until [`Self::refuse_next`].
    pub fn new(inner: Arc<dyn Catalog>) -> Self {
        Self {
            inner,
            refusals: Arc::new(AtomicU32::new(0)),
            swaps: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Refuses the next `n` swaps.
    pub fn refuse_next(&self, n: u32) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    /// Returns how many swaps were attempted, refused ones included.
    pub fn swap_attempts(&self) -> u32 {
        self.swaps.load(Ordering::SeqCst)
    }

    fn take_refusal(&self) -> bool {
        self.refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Catalog for ContendedCatalog {
    async fn get_pointer(&self, ident: &TableIdent) -> Result<CatalogPointer> {
        self.inner.get_pointer(ident).await
    }

    async fn compare_and_swap(
        &self,
        ident: &TableIdent,
        expected_location: &str,
        new: &CatalogPointer,
    ) -> Result<CasOutcome> {
        self.swaps.fetch_add(1, Ordering::SeqCst);
        if self.take_refusal() {
            let current = self.inner.get_pointer(ident).await?;
            return Ok(CasOutcome::Conflict {
                current: Some(current),
            });
        }
        self.inner.compare_and_swap(ident, expected_location, new).await
    }

    async fn create(&self, ident: &TableIdent, pointer: &CatalogPointer) -> Result<()> {
        self.inner.create(ident, pointer).await
    }

    async fn deregister(&self, ident: &TableIdent) -> Result<()> {
        self.inner.deregister(ident).await
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<TableIdent>> {
        self.inner.list(namespace).await
    }
}
