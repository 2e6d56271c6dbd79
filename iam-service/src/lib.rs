pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    ip_rate_limit_middleware, request_id_middleware, security_headers_middleware, IpRateLimit,
    REQUEST_ID_HEADER,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::IamConfig;
use crate::middleware::{require_access, AccessRule};
use crate::services::{
    AuditSink, DirectoryService, IamStore, JwtService, PolicyEvaluator, RegistrationService,
    SecondFactorManager, SessionService,
};
use service_core::error::AppError;
use std::sync::Arc;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::registration::register,
        handlers::auth::session::login,
        handlers::auth::second_factor::setup,
        handlers::auth::second_factor::verify,
        handlers::auth::second_factor::disable,
        handlers::auth::second_factor::regenerate_backup_codes,
        handlers::profile::get_profile,
        handlers::iam::create_principal,
        handlers::iam::create_policy,
        handlers::iam::attach_policy,
        handlers::iam::create_group,
        handlers::iam::add_group_member,
        handlers::iam::create_role,
        handlers::iam::assign_role,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::LoginRequest,
            dtos::auth::TokenResponse,
            dtos::auth::ChallengeResponse,
            dtos::second_factor::SetupResponse,
            dtos::second_factor::VerifyRequest,
            dtos::second_factor::DisableRequest,
            dtos::second_factor::BackupCodesResponse,
            dtos::iam::CreatePrincipalRequest,
            dtos::iam::CreatePolicyRequest,
            dtos::iam::StatementRequest,
            dtos::iam::AttachPolicyRequest,
            dtos::iam::AttachmentKind,
            dtos::iam::AttachmentResponse,
            dtos::iam::CreateGroupRequest,
            dtos::iam::CreateRoleRequest,
            dtos::iam::MemberRequest,
            models::PrincipalResponse,
            models::Effect,
            models::Policy,
            models::PolicyDocument,
            models::Statement,
            models::ResourceGrant,
            models::Group,
            models::Role,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration and password login"),
        (name = "Second factor", description = "TOTP enrollment, verification and backup codes"),
        (name = "Profile", description = "Current principal"),
        (name = "IAM", description = "Policies, groups and roles"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IamConfig,
    pub store: Arc<dyn IamStore>,
    pub jwt: JwtService,
    pub sessions: SessionService,
    pub registration: RegistrationService,
    pub directory: DirectoryService,
    pub evaluator: PolicyEvaluator,
    pub login_rate_limit: IpRateLimit,
}

impl AppState {
    /// Wire every service around one store handle.
    pub fn new(
        config: IamConfig,
        store: Arc<dyn IamStore>,
        audit: AuditSink,
    ) -> Result<Self, anyhow::Error> {
        let jwt = JwtService::new(&config.jwt)?;
        let default_tenant = config.tenancy.default_tenant_slug.clone();

        let sessions = SessionService::new(
            store.clone(),
            jwt.clone(),
            SecondFactorManager::new(&config.second_factor),
            audit,
            default_tenant.clone(),
            config.second_factor.challenge_max_attempts,
        );
        let registration = RegistrationService::new(
            store.clone(),
            default_tenant,
            usize::try_from(config.security.password_min_length)?,
        )
        .with_bootstrap_admin(config.tenancy.bootstrap_admin.clone());
        let login_rate_limit = IpRateLimit::new(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
            config.rate_limit.trust_forwarded_for,
        );

        Ok(Self {
            directory: DirectoryService::new(store.clone()),
            evaluator: PolicyEvaluator::new(store.clone()),
            config,
            store,
            jwt,
            sessions,
            registration,
            login_rate_limit,
        })
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let access = |action: &'static str, resource: &'static str| {
        from_fn_with_state(
            AccessRule::new(state.evaluator.clone(), action, resource),
            require_access,
        )
    };

    // Login with rate limiting
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(
            state.login_rate_limit.clone(),
            ip_rate_limit_middleware,
        ));

    // TOTP verification is the one route that accepts challenge tokens
    let verification_routes = Router::new()
        .route("/s/auth/2fa/verify", post(handlers::auth::verify))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::verification_auth_middleware,
        ));

    let protected_routes = Router::new()
        .route("/s/auth/2fa/setup", post(handlers::auth::setup))
        .route("/s/auth/2fa/disable", post(handlers::auth::disable))
        .route(
            "/s/auth/backup-codes/regenerate",
            post(handlers::auth::regenerate_backup_codes),
        )
        .route(
            "/s/auth/profile",
            get(handlers::get_profile)
                .route_layer(access("user:read", "org:{org_id}:user:{user_id}")),
        )
        .route(
            "/s/iam/principals",
            post(handlers::create_principal).route_layer(access("user:create", "org:{org_id}:user")),
        )
        .route(
            "/s/iam/policies",
            post(handlers::create_policy).route_layer(access("policy:create", "org:{org_id}:policy")),
        )
        .route(
            "/s/iam/policies/:policy_id/attachments",
            post(handlers::attach_policy).route_layer(access("policy:attach", "org:{org_id}:policy")),
        )
        .route(
            "/s/iam/groups",
            post(handlers::create_group).route_layer(access("group:create", "org:{org_id}:group")),
        )
        .route(
            "/s/iam/groups/:group_id/members",
            post(handlers::add_group_member)
                .route_layer(access("group:update", "org:{org_id}:group")),
        )
        .route(
            "/s/iam/roles",
            post(handlers::create_role).route_layer(access("role:create", "org:{org_id}:role")),
        )
        .route(
            "/s/iam/roles/:role_id/members",
            post(handlers::assign_role).route_layer(access("role:assign", "org:{org_id}:role")),
        )
        .route_layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(handlers::auth::register));

    if state.config.swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    }

    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Invalid CORS origin, skipping");
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    let app = app
        .merge(login_route)
        .merge(verification_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Store unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<service_core::axum::Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::from(services::ServiceError::from(e))
    })?;

    Ok(service_core::axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up"
        }
    })))
}
