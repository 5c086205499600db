//! Queue store backends.

use std::sync::Arc;

use crate::config::StoreBackendConfig;
use crate::core::{QueueError, QueueStore};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryQueueStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresQueueStore;

/// Build the configured store. Postgres stores are migrated before they are returned.
///
/// # Errors
/// [`QueueError::Configuration`] when Postgres is requested without the `postgres`
/// feature, or connection/migration failures.
pub async fn connect(cfg: &StoreBackendConfig) -> Result<Arc<dyn QueueStore>, QueueError> {
    match cfg {
        StoreBackendConfig::InMemory => Ok(Arc::new(InMemoryQueueStore::new())),
        #[cfg(feature = "postgres")]
        StoreBackendConfig::Postgres {
            url,
            max_connections,
        } => {
            let store = PostgresQueueStore::connect(url, *max_connections).await?;
            store.migrate().await?;
            tracing::info!(max_connections, "Connected postgres queue store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackendConfig::Postgres { .. } => Err(QueueError::Configuration(
            "postgres store requested but the `postgres` feature is not enabled".into(),
        )),
    }
}
