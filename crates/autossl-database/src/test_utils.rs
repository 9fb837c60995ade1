//! Test utilities for database integration tests
//!
//! Every `TestDatabase` is a private in-memory SQLite database with the
//! full schema applied, so tests never share state.

use crate::DbConnection;
use autossl_migrations::Migrator;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;

pub struct TestDatabase {
    pub db: Arc<DbConnection>,
}

impl TestDatabase {
    /// Creates an in-memory database and runs all migrations
    pub async fn with_migrations() -> anyhow::Result<Self> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        // every pooled connection would otherwise get its own empty database
        opt.max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        Migrator::up(&db, None).await?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn connection(&self) -> &DbConnection {
        &self.db
    }

    pub fn connection_arc(&self) -> Arc<DbConnection> {
        self.db.clone()
    }
}
