// CLI command implementations

pub mod ingest;
pub mod repos;
pub mod stats;
pub mod validate;

use anyhow::{Context, Result};
use std::sync::Arc;

use halgraph::config::Config;
use halgraph::index::db::GraphDatabase;
use halgraph::index::GraphStore;

/// Open the configured graph database
pub fn open_store(config: &Config) -> Result<Arc<GraphDatabase>> {
    let db = GraphDatabase::new(&config.storage.db_path)
        .with_context(|| format!("opening graph database {}", config.storage.db_path.display()))?;
    Ok(Arc::new(db))
}

pub fn as_store(db: &Arc<GraphDatabase>) -> Arc<dyn GraphStore> {
    Arc::clone(db) as Arc<dyn GraphStore>
}
