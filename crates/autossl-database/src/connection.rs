//! Database connection management

use autossl_core::{ServiceError, ServiceResult};
use autossl_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use tracing::info;

pub type DbConnection = DatabaseConnection;

/// Connects to `database_url` (PostgreSQL or SQLite) and applies pending migrations.
pub async fn establish_connection(database_url: &str) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(database_url);
    if database_url.starts_with("sqlite:") {
        // a single writer keeps SQLite free of lock contention
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(20).min_connections(2);
    }
    opt.sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    info!("Database ready, migrations applied");
    Ok(Arc::new(db))
}
