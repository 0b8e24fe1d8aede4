//! Index lifecycle.
//!
//! Index declarations are idempotent: applying the same set twice leaves the
//! store in the same state. A failure on one collection is reported and never
//! aborts the run; affected query scenarios are simply measured unindexed.

use crate::model::{ORDERS, PRODUCTS};
use crate::query::{SortDirection, SortKey, SortSpec};
use crate::store::Session;
use serde::Serialize;
use tracing::{info, warn};

/// One (possibly compound) index. The name follows the `field_1_other_-1`
/// convention so re-declaring the same keys resolves to the same index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<SortKey>,
}

impl IndexSpec {
    pub fn new(keys: SortSpec) -> Self {
        let keys = keys.0;
        let name = keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.direction.signum()))
            .collect::<Vec<_>>()
            .join("_");
        Self { name, keys }
    }

    pub fn leading_field(&self) -> Option<&str> {
        self.keys.first().map(|k| k.field.as_str())
    }

    pub fn covers(&self, field: &str) -> bool {
        self.leading_field() == Some(field)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionIndexes {
    pub collection: String,
    pub specs: Vec<IndexSpec>,
}

impl CollectionIndexes {
    pub fn new(collection: impl Into<String>, specs: Vec<IndexSpec>) -> Self {
        Self {
            collection: collection.into(),
            specs,
        }
    }
}

/// Indexes the query catalog relies on.
pub fn standard_index_set() -> Vec<CollectionIndexes> {
    vec![
        CollectionIndexes::new(
            PRODUCTS,
            vec![
                IndexSpec::new(SortSpec::new().desc("price")),
                IndexSpec::new(SortSpec::new().asc("category").desc("price")),
                IndexSpec::new(SortSpec::new().asc("manufacturer")),
            ],
        ),
        CollectionIndexes::new(
            ORDERS,
            vec![
                IndexSpec::new(SortSpec::new().desc("orderDate")),
                IndexSpec::new(SortSpec::new().asc("status").asc("totalAmount")),
                IndexSpec::new(SortSpec::new().asc("products.productId")),
                IndexSpec::new(
                    SortSpec::new()
                        .asc("products.productId")
                        .desc("totalAmount"),
                ),
            ],
        ),
    ]
}

/// Whether some declared index on `collection` leads with `field`.
pub fn is_indexed(sets: &[CollectionIndexes], collection: &str, field: &str) -> bool {
    sets.iter()
        .filter(|s| s.collection == collection)
        .any(|s| s.specs.iter().any(|spec| spec.covers(field)))
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub collection: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    /// Successfully applied sets, in declaration order.
    pub applied: Vec<CollectionIndexes>,
    /// Indexes in effect across the applied sets, as counted by the store.
    pub applied_count: u64,
    pub failures: Vec<IndexFailure>,
}

impl IndexReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether `field` on `collection` ended up backed by an applied index.
    pub fn is_indexed(&self, collection: &str, field: &str) -> bool {
        is_indexed(&self.applied, collection, field)
    }
}

/// Declare every set on its collection. Per-collection failures are
/// collected, never propagated.
pub fn ensure_indexes(session: &mut dyn Session, sets: &[CollectionIndexes]) -> IndexReport {
    let mut report = IndexReport::default();
    for set in sets {
        match session.create_indexes(&set.collection, &set.specs) {
            Ok(n) => {
                info!(collection = %set.collection, indexes = n, "indexes in place");
                report.applied_count += n;
                report.applied.push(set.clone());
            }
            Err(e) => {
                warn!(collection = %set.collection, error = %e, "index creation failed");
                report.failures.push(IndexFailure {
                    collection: set.collection.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    report
}

pub fn describe(spec: &IndexSpec) -> String {
    spec.keys
        .iter()
        .map(|k| match k.direction {
            SortDirection::Ascending => format!("{}: 1", k.field),
            SortDirection::Descending => format!("{}: -1", k.field),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::store::StoreConnector;

    #[test]
    fn test_index_names() {
        let spec = IndexSpec::new(SortSpec::new().asc("category").desc("price"));
        assert_eq!(spec.name, "category_1_price_-1");
        assert_eq!(describe(&spec), "category: 1, price: -1");
    }

    #[test]
    fn test_standard_set_covers_query_fields() {
        let sets = standard_index_set();
        assert!(is_indexed(&sets, PRODUCTS, "price"));
        assert!(is_indexed(&sets, PRODUCTS, "category"));
        assert!(is_indexed(&sets, ORDERS, "products.productId"));
        assert!(!is_indexed(&sets, PRODUCTS, "description"));
        assert!(!is_indexed(&sets, ORDERS, "price"));
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let store = MemoryStore::default();
        let mut session = store.connect("memory://idx").unwrap();
        let sets = standard_index_set();
        let first = ensure_indexes(session.as_mut(), &sets);
        let names = store.index_names(ORDERS);
        let second = ensure_indexes(session.as_mut(), &sets);
        assert!(first.is_clean() && second.is_clean());
        assert_eq!(first.applied_count, 3 + 4);
        assert_eq!(second.applied_count, first.applied_count);
        assert_eq!(store.index_names(ORDERS), names);
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_failure_on_one_collection_is_isolated() {
        let store = MemoryStore::default();
        store.reject_indexes_on(ORDERS);
        let mut session = store.connect("memory://idx").unwrap();
        let report = ensure_indexes(session.as_mut(), &standard_index_set());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].collection, ORDERS);
        assert_eq!(report.applied_count, 3);
        assert!(report.is_indexed(PRODUCTS, "price"));
        assert!(!report.is_indexed(ORDERS, "orderDate"));
        assert_eq!(store.index_names(PRODUCTS).len(), 3);
    }
}
