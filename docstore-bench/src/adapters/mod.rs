//! Store adapter modules.

pub mod memory;

use crate::store::StoreConnector;
use crate::{BenchError, BenchResult};
use std::sync::Arc;

pub use memory::{MemoryStore, MemoryStoreConfig};

/// Pick a connector for `endpoint` by its scheme.
pub fn connector_for(endpoint: &str, config: MemoryStoreConfig) -> BenchResult<Arc<dyn StoreConnector>> {
    if endpoint.starts_with(memory::SCHEME) {
        return Ok(Arc::new(MemoryStore::new(config)));
    }
    Err(BenchError::Connection(format!(
        "no adapter for endpoint '{}'",
        endpoint
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_for_scheme() {
        assert!(connector_for("memory://local", MemoryStoreConfig::default()).is_ok());
        assert!(matches!(
            connector_for("mongodb://localhost:27017", MemoryStoreConfig::default()),
            Err(BenchError::Connection(_))
        ));
    }
}
