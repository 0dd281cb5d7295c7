pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresGateway;
pub use self::sqlite::SqliteGateway;

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::persistence::{PersistenceGateway, Result};

/// Connect to the store selected by the environment.
pub async fn connect(store: &StoreConfig) -> Result<Arc<dyn PersistenceGateway>> {
    let url = store.database_url();
    match store {
        StoreConfig::Sqlite { .. } => Ok(Arc::new(SqliteGateway::new(&url).await?)),
        StoreConfig::Postgres { .. } => Ok(Arc::new(PostgresGateway::new(&url).await?)),
    }
}
