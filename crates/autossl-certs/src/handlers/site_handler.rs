use super::types::CertsAppState;
use crate::provider_sync::{SyncError, SyncReport};
use crate::sites::{
    CreateCredentialRequest, CreateSiteRequest, CreateTenantRequest, ProviderCredential, Site,
    SiteStatus, Tenant, UpdateCredentialRequest, UpdateSiteRequest,
};
use autossl_core::error_builder::{bad_gateway, bad_request, internal_server_error};
use autossl_core::problemdetails::Problem;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::error;
use utoipa::OpenApi;

impl From<SyncError> for Problem {
    fn from(error: SyncError) -> Self {
        match error {
            e @ SyncError::Unsupported(_) => bad_request()
                .title("Sync Not Supported")
                .detail(e.to_string())
                .build(),
            SyncError::Provider(e) => {
                error!("CDN domain listing failed: {}", e);
                bad_gateway()
                    .title("Provider Sync Failed")
                    .detail(e.to_string())
                    .build()
            }
            SyncError::Service(e) => Problem::from(e),
            SyncError::Database(msg) => internal_server_error()
                .title("Database Error")
                .detail(msg)
                .build(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        create_tenant,
        list_tenants,
        get_tenant,
        create_site,
        list_sites,
        get_site,
        update_site,
        delete_site,
        create_credential,
        list_credentials,
        update_credential,
        delete_credential,
        sync_credential_sites
    ),
    components(schemas(
        Tenant,
        Site,
        SiteStatus,
        ProviderCredential,
        SyncReport,
        CreateTenantRequest,
        CreateSiteRequest,
        UpdateSiteRequest,
        CreateCredentialRequest,
        UpdateCredentialRequest
    )),
    tags((name = "Sites", description = "Tenants, CDN sites and provider credentials"))
)]
pub struct SiteApiDoc;

/// Create a tenant
///
/// The tenant gets a renewal timer immediately when the scheduler is running.
#[utoipa::path(
    post,
    path = "/tenants",
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created", body = Tenant),
        (status = 400, description = "Invalid input")
    ),
    tag = "Sites"
)]
async fn create_tenant(
    State(app_state): State<Arc<CertsAppState>>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<impl IntoResponse, Problem> {
    let tenant = app_state.sites.create_tenant(request).await?;
    app_state.scheduler.refresh(tenant.id).await;
    Ok((StatusCode::CREATED, Json(tenant)))
}

#[utoipa::path(
    get,
    path = "/tenants",
    responses((status = 200, description = "All tenants", body = Vec<Tenant>)),
    tag = "Sites"
)]
async fn list_tenants(
    State(app_state): State<Arc<CertsAppState>>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(app_state.sites.list_tenants().await?))
}

#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}",
    responses(
        (status = 200, description = "Tenant", body = Tenant),
        (status = 404, description = "Tenant not found")
    ),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Sites"
)]
async fn get_tenant(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(app_state.sites.get_tenant(tenant_id).await?))
}

/// Register a CDN site under a tenant
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/sites",
    request_body = CreateSiteRequest,
    responses(
        (status = 201, description = "Site created", body = Site),
        (status = 400, description = "Invalid domain, source or credential"),
        (status = 404, description = "Tenant not found")
    ),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Sites"
)]
async fn create_site(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
    Json(request): Json<CreateSiteRequest>,
) -> Result<impl IntoResponse, Problem> {
    let site = app_state.sites.create_site(tenant_id, request).await?;
    Ok((StatusCode::CREATED, Json(site)))
}

#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/sites",
    responses((status = 200, description = "Sites of the tenant", body = Vec<Site>)),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Sites"
)]
async fn list_sites(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let sites: Vec<Site> = app_state
        .sites
        .list_sites(tenant_id)
        .await?
        .into_iter()
        .map(Site::from)
        .collect();
    Ok(Json(sites))
}

#[utoipa::path(
    get,
    path = "/sites/{site_id}",
    responses(
        (status = 200, description = "Site", body = Site),
        (status = 404, description = "Site not found")
    ),
    params(("site_id" = i32, Path, description = "Site ID")),
    tag = "Sites"
)]
async fn get_site(
    State(app_state): State<Arc<CertsAppState>>,
    Path(site_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let site = app_state.sites.get_site(site_id).await?;
    Ok(Json(Site::from(site)))
}

/// Update a site
///
/// Absent fields keep their value. The merged site is validated as on create.
#[utoipa::path(
    patch,
    path = "/sites/{site_id}",
    request_body = UpdateSiteRequest,
    responses(
        (status = 200, description = "Updated site", body = Site),
        (status = 400, description = "Invalid domain, source, challenge or credential"),
        (status = 404, description = "Site not found")
    ),
    params(("site_id" = i32, Path, description = "Site ID")),
    tag = "Sites"
)]
async fn update_site(
    State(app_state): State<Arc<CertsAppState>>,
    Path(site_id): Path<i32>,
    Json(request): Json<UpdateSiteRequest>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(app_state.sites.update_site(site_id, request).await?))
}

/// Delete a site with its certificates, jobs and deployments
#[utoipa::path(
    delete,
    path = "/sites/{site_id}",
    responses(
        (status = 204, description = "Site deleted"),
        (status = 404, description = "Site not found")
    ),
    params(("site_id" = i32, Path, description = "Site ID")),
    tag = "Sites"
)]
async fn delete_site(
    State(app_state): State<Arc<CertsAppState>>,
    Path(site_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    app_state.sites.delete_site(site_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Store a provider credential
///
/// The config is validated for the provider type and stored encrypted; it is
/// never returned.
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/credentials",
    request_body = CreateCredentialRequest,
    responses(
        (status = 201, description = "Credential stored", body = ProviderCredential),
        (status = 400, description = "Unknown provider type or invalid config"),
        (status = 404, description = "Tenant not found")
    ),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Sites"
)]
async fn create_credential(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
    Json(request): Json<CreateCredentialRequest>,
) -> Result<impl IntoResponse, Problem> {
    let credential = app_state.credentials.create(tenant_id, request).await?;
    Ok((StatusCode::CREATED, Json(credential)))
}

#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/credentials",
    responses((status = 200, description = "Credential summaries", body = Vec<ProviderCredential>)),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Sites"
)]
async fn list_credentials(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(app_state.credentials.list(tenant_id).await?))
}

/// Update a provider credential
///
/// A new config replaces the stored one; without one the stored config is
/// re-validated against the (possibly new) provider type.
#[utoipa::path(
    patch,
    path = "/credentials/{credential_id}",
    request_body = UpdateCredentialRequest,
    responses(
        (status = 200, description = "Updated credential", body = ProviderCredential),
        (status = 400, description = "Unknown provider type or invalid config"),
        (status = 404, description = "Credential not found")
    ),
    params(("credential_id" = i32, Path, description = "Provider credential ID")),
    tag = "Sites"
)]
async fn update_credential(
    State(app_state): State<Arc<CertsAppState>>,
    Path(credential_id): Path<i32>,
    Json(request): Json<UpdateCredentialRequest>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(
        app_state.credentials.update(credential_id, request).await?,
    ))
}

/// Delete a provider credential
///
/// Sites and domain settings that referenced it are detached, not deleted.
#[utoipa::path(
    delete,
    path = "/credentials/{credential_id}",
    responses(
        (status = 204, description = "Credential deleted"),
        (status = 404, description = "Credential not found")
    ),
    params(("credential_id" = i32, Path, description = "Provider credential ID")),
    tag = "Sites"
)]
async fn delete_credential(
    State(app_state): State<Arc<CertsAppState>>,
    Path(credential_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    app_state.credentials.delete(credential_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Import the CDN account's domains as sites
///
/// Existing sites with the same domain are refreshed with the vendor state;
/// the others are created with auto-renew off.
#[utoipa::path(
    post,
    path = "/credentials/{credential_id}/sync",
    responses(
        (status = 200, description = "Sync counts", body = SyncReport),
        (status = 400, description = "Credential cannot list CDN domains"),
        (status = 404, description = "Credential not found"),
        (status = 502, description = "The vendor API failed")
    ),
    params(("credential_id" = i32, Path, description = "Provider credential ID")),
    tag = "Sites"
)]
async fn sync_credential_sites(
    State(app_state): State<Arc<CertsAppState>>,
    Path(credential_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(
        app_state.provider_sync.sync_sites(credential_id).await?,
    ))
}

pub fn configure_routes() -> Router<Arc<CertsAppState>> {
    Router::new()
        .route("/tenants", get(list_tenants).post(create_tenant))
        .route("/tenants/{tenant_id}", get(get_tenant))
        .route(
            "/tenants/{tenant_id}/sites",
            get(list_sites).post(create_site),
        )
        .route(
            "/sites/{site_id}",
            get(get_site).patch(update_site).delete(delete_site),
        )
        .route(
            "/tenants/{tenant_id}/credentials",
            get(list_credentials).post(create_credential),
        )
        .route(
            "/credentials/{credential_id}",
            patch(update_credential).delete(delete_credential),
        )
        .route(
            "/credentials/{credential_id}/sync",
            post(sync_credential_sites),
        )
}
