pub use sea_orm_migration::prelude::*;

mod m20260101_000001_initial_schema;
mod m20260301_000001_add_site_challenge_and_sync_fields;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_initial_schema::Migration),
            Box::new(m20260301_000001_add_site_challenge_and_sync_fields::Migration),
        ]
    }
}
