use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Per-site challenge policy and renewal threshold
        add_column(
            manager,
            ColumnDef::new(Sites::AcmeChallengeType)
                .string_len(16)
                .not_null()
                .default("http-01")
                .to_owned(),
        )
        .await?;
        add_column(
            manager,
            ColumnDef::new(Sites::DnsCredentialId)
                .integer()
                .null()
                .to_owned(),
        )
        .await?;
        add_column(
            manager,
            ColumnDef::new(Sites::RenewDaysBefore)
                .integer()
                .null()
                .to_owned(),
        )
        .await?;

        // State reported by the CDN vendor during provider sync.
        // SQLite only accepts one column per ALTER TABLE.
        for column in [
            Sites::ProviderStatus,
            Sites::ProviderHttps,
            Sites::ProviderCertExpiresAt,
            Sites::ProviderCertName,
            Sites::ProviderCertDeployAt,
        ] {
            add_column(
                manager,
                ColumnDef::new(column).string_len(255).null().to_owned(),
            )
            .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for column in [
            Sites::ProviderCertDeployAt,
            Sites::ProviderCertName,
            Sites::ProviderCertExpiresAt,
            Sites::ProviderHttps,
            Sites::ProviderStatus,
            Sites::RenewDaysBefore,
            Sites::DnsCredentialId,
            Sites::AcmeChallengeType,
        ] {
            manager
                .alter_table(
                    Table::alter()
                        .table(Sites::Table)
                        .drop_column(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }
}

async fn add_column(manager: &SchemaManager<'_>, column: ColumnDef) -> Result<(), DbErr> {
    manager
        .alter_table(
            Table::alter()
                .table(Sites::Table)
                .add_column(column)
                .to_owned(),
        )
        .await
}

#[derive(DeriveIden)]
enum Sites {
    Table,
    AcmeChallengeType,
    DnsCredentialId,
    RenewDaysBefore,
    ProviderStatus,
    ProviderHttps,
    ProviderCertExpiresAt,
    ProviderCertName,
    ProviderCertDeployAt,
}
