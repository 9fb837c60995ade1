use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========================================
        // TENANTS
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(Tenants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tenants::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tenants::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Tenants::Email).string_len(255).null())
                    .col(timestamp(Tenants::CreatedAt))
                    .col(timestamp(Tenants::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // ========================================
        // PROVIDER_CREDENTIALS
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(ProviderCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProviderCredentials::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::TenantId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::ProviderType)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProviderCredentials::EncryptedConfig)
                            .text()
                            .not_null(),
                    )
                    .col(timestamp(ProviderCredentials::CreatedAt))
                    .col(timestamp(ProviderCredentials::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_provider_credentials_tenant")
                            .from(ProviderCredentials::Table, ProviderCredentials::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ========================================
        // SITES
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(Sites::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Sites::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Sites::TenantId).integer().not_null())
                    .col(ColumnDef::new(Sites::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Sites::Domain).string_len(255).not_null())
                    .col(ColumnDef::new(Sites::ProviderCredentialId).integer().null())
                    .col(
                        ColumnDef::new(Sites::CertificateSource)
                            .string_len(32)
                            .not_null()
                            .default("letsencrypt"),
                    )
                    .col(
                        ColumnDef::new(Sites::AutoRenew)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Sites::Status)
                            .string_len(32)
                            .not_null()
                            .default("active"),
                    )
                    .col(timestamp(Sites::CreatedAt))
                    .col(timestamp(Sites::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sites_tenant")
                            .from(Sites::Table, Sites::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sites_provider_credential")
                            .from(Sites::Table, Sites::ProviderCredentialId)
                            .to(ProviderCredentials::Table, ProviderCredentials::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sites_tenant")
                    .table(Sites::Table)
                    .col(Sites::TenantId)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // CERTIFICATES (append-only)
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(Certificates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Certificates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Certificates::SiteId).integer().not_null())
                    .col(
                        ColumnDef::new(Certificates::CommonName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Certificates::Sans).text().not_null())
                    .col(
                        ColumnDef::new(Certificates::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::IssuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::EncryptedCertPem)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::EncryptedKeyPem)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::EncryptedChainPem)
                            .text()
                            .not_null(),
                    )
                    .col(timestamp(Certificates::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_certificates_site")
                            .from(Certificates::Table, Certificates::SiteId)
                            .to(Sites::Table, Sites::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // "latest for site" lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_certificates_site_issued_at")
                    .table(Certificates::Table)
                    .col(Certificates::SiteId)
                    .col(Certificates::IssuedAt)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // JOBS
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Jobs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Jobs::SiteId).integer().not_null())
                    .col(ColumnDef::new(Jobs::JobType).string_len(32).not_null())
                    .col(ColumnDef::new(Jobs::Status).string_len(32).not_null())
                    .col(ColumnDef::new(Jobs::Message).text().null())
                    .col(
                        ColumnDef::new(Jobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Jobs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(timestamp(Jobs::CreatedAt))
                    .col(timestamp(Jobs::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_jobs_site")
                            .from(Jobs::Table, Jobs::SiteId)
                            .to(Sites::Table, Sites::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ========================================
        // DEPLOYMENTS
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(Deployments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Deployments::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Deployments::SiteId).integer().not_null())
                    .col(
                        ColumnDef::new(Deployments::CertificateId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deployments::ProviderCredentialId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deployments::Status)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Deployments::Message).text().null())
                    .col(timestamp(Deployments::CreatedAt))
                    .col(timestamp(Deployments::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deployments_site")
                            .from(Deployments::Table, Deployments::SiteId)
                            .to(Sites::Table, Sites::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deployments_certificate")
                            .from(Deployments::Table, Deployments::CertificateId)
                            .to(Certificates::Table, Certificates::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ========================================
        // TENANT_SETTINGS
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(TenantSettings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TenantSettings::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::TenantId)
                            .integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(TenantSettings::RenewalHour).integer().null())
                    .col(
                        ColumnDef::new(TenantSettings::RenewalMinute)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::RenewalThresholdDays)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(TenantSettings::AutoDeploy).boolean().null())
                    .col(
                        ColumnDef::new(TenantSettings::AcmeAccountEmail)
                            .string_len(255)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::AcmeDirectoryUrl)
                            .string_len(512)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::AcmeSkipLocalVerify)
                            .boolean()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TenantSettings::AcmeDnsWaitSeconds)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(TenantSettings::AcmeDnsTtl).integer().null())
                    .col(timestamp(TenantSettings::CreatedAt))
                    .col(timestamp(TenantSettings::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tenant_settings_tenant")
                            .from(TenantSettings::Table, TenantSettings::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ========================================
        // DOMAIN_SETTINGS
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(DomainSettings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DomainSettings::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DomainSettings::TenantId).integer().not_null())
                    .col(
                        ColumnDef::new(DomainSettings::ApexDomain)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DomainSettings::ChallengeType)
                            .string_len(16)
                            .not_null()
                            .default("http-01"),
                    )
                    .col(
                        ColumnDef::new(DomainSettings::DnsCredentialId)
                            .integer()
                            .null(),
                    )
                    .col(timestamp(DomainSettings::CreatedAt))
                    .col(timestamp(DomainSettings::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_domain_settings_tenant")
                            .from(DomainSettings::Table, DomainSettings::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_domain_settings_dns_credential")
                            .from(DomainSettings::Table, DomainSettings::DnsCredentialId)
                            .to(ProviderCredentials::Table, ProviderCredentials::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_domain_settings_tenant_apex")
                    .table(DomainSettings::Table)
                    .col(DomainSettings::TenantId)
                    .col(DomainSettings::ApexDomain)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ========================================
        // ACME_ACCOUNTS
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(AcmeAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AcmeAccounts::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AcmeAccounts::Email).string_len(255).not_null())
                    .col(
                        ColumnDef::new(AcmeAccounts::DirectoryUrl)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AcmeAccounts::EncryptedCredentials)
                            .text()
                            .not_null(),
                    )
                    .col(timestamp(AcmeAccounts::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_acme_accounts_email_directory")
                    .table(AcmeAccounts::Table)
                    .col(AcmeAccounts::Email)
                    .col(AcmeAccounts::DirectoryUrl)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AcmeAccounts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DomainSettings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TenantSettings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Deployments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Certificates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sites::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProviderCredentials::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tenants::Table).to_owned())
            .await?;
        Ok(())
    }
}

fn timestamp<T: IntoIden>(column: T) -> ColumnDef {
    ColumnDef::new(column)
        .timestamp_with_time_zone()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
    Name,
    Email,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ProviderCredentials {
    Table,
    Id,
    TenantId,
    Name,
    ProviderType,
    EncryptedConfig,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Sites {
    Table,
    Id,
    TenantId,
    Name,
    Domain,
    ProviderCredentialId,
    CertificateSource,
    AutoRenew,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Certificates {
    Table,
    Id,
    SiteId,
    CommonName,
    Sans,
    Status,
    IssuedAt,
    ExpiresAt,
    EncryptedCertPem,
    EncryptedKeyPem,
    EncryptedChainPem,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Jobs {
    Table,
    Id,
    SiteId,
    JobType,
    Status,
    Message,
    StartedAt,
    FinishedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Deployments {
    Table,
    Id,
    SiteId,
    CertificateId,
    ProviderCredentialId,
    Status,
    Message,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TenantSettings {
    Table,
    Id,
    TenantId,
    RenewalHour,
    RenewalMinute,
    RenewalThresholdDays,
    AutoDeploy,
    AcmeAccountEmail,
    AcmeDirectoryUrl,
    AcmeSkipLocalVerify,
    AcmeDnsWaitSeconds,
    AcmeDnsTtl,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DomainSettings {
    Table,
    Id,
    TenantId,
    ApexDomain,
    ChallengeType,
    DnsCredentialId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AcmeAccounts {
    Table,
    Id,
    Email,
    DirectoryUrl,
    EncryptedCredentials,
    CreatedAt,
}
