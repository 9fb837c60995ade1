use super::types::{CertsAppState, ChallengePolicyQuery};
use crate::challenges::ChallengeType;
use crate::scheduler::{SchedulerError, SweepReport};
use crate::settings::{
    AcmeSettings, DomainChallengePolicy, DomainSettings, PolicySource, RenewalSettings,
    SettingsError, UpdateRenewalSettings, UpsertDomainSettings,
};
use autossl_core::error_builder::{bad_request, internal_server_error, not_found};
use autossl_core::problemdetails::Problem;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::debug;
use utoipa::OpenApi;

impl From<SettingsError> for Problem {
    fn from(error: SettingsError) -> Self {
        match error {
            SettingsError::Validation(msg) => bad_request()
                .title("Validation Error")
                .detail(msg)
                .build(),
            SettingsError::NotFound(msg) => not_found().detail(msg).build(),
            SettingsError::Database(msg) => internal_server_error()
                .title("Database Error")
                .detail(msg)
                .build(),
        }
    }
}

impl From<SchedulerError> for Problem {
    fn from(error: SchedulerError) -> Self {
        match error {
            SchedulerError::Settings(e) => Problem::from(e),
            SchedulerError::Service(e) => Problem::from(e),
            SchedulerError::InvalidSchedule(msg) => bad_request()
                .title("Invalid Renewal Schedule")
                .detail(msg)
                .build(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_renewal_settings,
        update_renewal_settings,
        list_domain_settings,
        upsert_domain_settings,
        resolve_challenge_policy,
        run_renewal_sweep
    ),
    components(schemas(
        RenewalSettings,
        AcmeSettings,
        UpdateRenewalSettings,
        DomainSettings,
        UpsertDomainSettings,
        DomainChallengePolicy,
        PolicySource,
        ChallengeType,
        SweepReport
    )),
    tags((name = "Settings", description = "Per-tenant renewal and challenge settings"))
)]
pub struct SettingsApiDoc;

/// Resolved renewal settings of a tenant
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/renewal-settings",
    responses(
        (status = 200, description = "Tenant overrides merged with the defaults", body = RenewalSettings),
        (status = 404, description = "Tenant not found")
    ),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Settings"
)]
async fn get_renewal_settings(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let settings = app_state
        .settings
        .resolve_renewal_settings(tenant_id)
        .await?;
    Ok(Json(settings))
}

/// Replace a tenant's renewal overrides
///
/// Absent fields fall back to the process defaults. The tenant's renewal
/// timer is rescheduled right away.
#[utoipa::path(
    put,
    path = "/tenants/{tenant_id}/renewal-settings",
    request_body = UpdateRenewalSettings,
    responses(
        (status = 200, description = "Resolved settings after the update", body = RenewalSettings),
        (status = 400, description = "Value out of range"),
        (status = 404, description = "Tenant not found")
    ),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Settings"
)]
async fn update_renewal_settings(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
    Json(request): Json<UpdateRenewalSettings>,
) -> Result<impl IntoResponse, Problem> {
    let settings = app_state
        .settings
        .update_renewal_settings(tenant_id, request)
        .await?;

    if !app_state.scheduler.refresh(tenant_id).await {
        debug!(
            "Renewal scheduler not running; tenant {} picks up new settings on start",
            tenant_id
        );
    }
    Ok(Json(settings))
}

/// List domain challenge policies of a tenant
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/domain-settings",
    responses(
        (status = 200, description = "Policies ordered by apex domain", body = Vec<DomainSettings>),
        (status = 404, description = "Tenant not found")
    ),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Settings"
)]
async fn list_domain_settings(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let settings = app_state.settings.list_domain_settings(tenant_id).await?;
    Ok(Json(settings))
}

/// Create or replace the challenge policy of an apex domain
#[utoipa::path(
    put,
    path = "/tenants/{tenant_id}/domain-settings",
    request_body = UpsertDomainSettings,
    responses(
        (status = 200, description = "Stored policy", body = DomainSettings),
        (status = 400, description = "dns-01 without a usable DNS credential"),
        (status = 404, description = "Tenant not found")
    ),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Settings"
)]
async fn upsert_domain_settings(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
    Json(request): Json<UpsertDomainSettings>,
) -> Result<impl IntoResponse, Problem> {
    let settings = app_state
        .settings
        .upsert_domain_settings(tenant_id, request)
        .await?;
    Ok(Json(settings))
}

/// Effective challenge policy for a hostname
#[utoipa::path(
    get,
    path = "/tenants/{tenant_id}/challenge-policy",
    responses(
        (status = 200, description = "Policy and where it came from", body = DomainChallengePolicy),
        (status = 404, description = "Tenant not found")
    ),
    params(
        ("tenant_id" = i32, Path, description = "Tenant ID"),
        ChallengePolicyQuery
    ),
    tag = "Settings"
)]
async fn resolve_challenge_policy(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
    Query(query): Query<ChallengePolicyQuery>,
) -> Result<impl IntoResponse, Problem> {
    app_state.sites.get_tenant(tenant_id).await?;
    let policy = app_state
        .settings
        .resolve_challenge_policy(tenant_id, &query.domain)
        .await?;
    Ok(Json(policy))
}

/// Run a renewal sweep for a tenant now
#[utoipa::path(
    post,
    path = "/tenants/{tenant_id}/renewal-sweep",
    responses(
        (status = 200, description = "Sweep counters", body = SweepReport),
        (status = 404, description = "Tenant not found")
    ),
    params(("tenant_id" = i32, Path, description = "Tenant ID")),
    tag = "Settings"
)]
async fn run_renewal_sweep(
    State(app_state): State<Arc<CertsAppState>>,
    Path(tenant_id): Path<i32>,
) -> Result<impl IntoResponse, Problem> {
    let report = app_state.scheduler.run_sweep(tenant_id).await?;
    Ok(Json(report))
}

pub fn configure_routes() -> Router<Arc<CertsAppState>> {
    Router::new()
        .route(
            "/tenants/{tenant_id}/renewal-settings",
            get(get_renewal_settings).put(update_renewal_settings),
        )
        .route(
            "/tenants/{tenant_id}/domain-settings",
            get(list_domain_settings).put(upsert_domain_settings),
        )
        .route(
            "/tenants/{tenant_id}/challenge-policy",
            get(resolve_challenge_policy),
        )
        .route(
            "/tenants/{tenant_id}/renewal-sweep",
            post(run_renewal_sweep),
        )
}
