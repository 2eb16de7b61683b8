//! Wiring: open both databases and assemble the store, index, extractor
//! and Reconciler from one [`Config`].

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::extract::BuiltinExtractor;
use crate::metadata_store::SqliteMetadataStore;
use crate::migrate;
use crate::reconciler::{Reconciler, RunSettings};
use crate::vector_index::SqliteVectorIndex;

pub struct Vault {
    pub store: Arc<SqliteMetadataStore>,
    pub index: Arc<SqliteVectorIndex>,
    pub reconciler: Reconciler,
}

impl Vault {
    /// Connect and migrate both databases.
    pub async fn open(config: &Config) -> Result<Self> {
        let meta_pool = db::connect_metadata(config).await?;
        migrate::migrate_metadata(&meta_pool).await?;
        let index_pool = db::connect_index(config).await?;
        migrate::migrate_index(&index_pool).await?;

        let store = Arc::new(SqliteMetadataStore::new(meta_pool));
        let index = Arc::new(SqliteVectorIndex::new(index_pool, config)?);
        let extractor = Arc::new(BuiltinExtractor::new(&config.extraction));
        let reconciler = Reconciler::new(
            store.clone(),
            index.clone(),
            extractor,
            RunSettings::from_config(config),
        );

        Ok(Self {
            store,
            index,
            reconciler,
        })
    }

    pub async fn close(self) {
        self.store.pool().close().await;
        self.index.pool().close().await;
    }
}
