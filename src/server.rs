//! # Server Configuration
//!
//! Router assembly, shared state and the OpenAPI document.

use std::sync::Arc;

use axum::{
    Router,
    http::{Method, header},
    middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{operator_auth_middleware, user_auth_middleware};
use crate::config::AppConfig;
use crate::connections::ConnectionService;
use crate::crypto::TokenCipher;
use crate::file_proxy::FileProxy;
use crate::handlers;
use crate::moodle::MoodleApi;
use crate::repositories::{ConnectionRepository, CourseContentRepository};
use crate::sync_executor::SyncExecutor;
use crate::telemetry::trace_id_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub cipher: Arc<TokenCipher>,
    pub moodle: Arc<dyn MoodleApi>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        cipher: TokenCipher,
        moodle: Arc<dyn MoodleApi>,
    ) -> Self {
        Self {
            config,
            db,
            cipher: Arc::new(cipher),
            moodle,
        }
    }

    fn shared_db(&self) -> Arc<DatabaseConnection> {
        Arc::new(self.db.clone())
    }

    pub fn connection_service(&self) -> ConnectionService {
        ConnectionService::new(
            ConnectionRepository::new(self.shared_db()),
            self.cipher.clone(),
            self.moodle.clone(),
        )
    }

    pub fn sync_executor(&self) -> SyncExecutor {
        SyncExecutor::new(
            self.shared_db(),
            self.cipher.clone(),
            self.moodle.clone(),
            self.config.moodle.content_concurrency,
        )
    }

    pub fn file_proxy(&self) -> FileProxy {
        let db = self.shared_db();
        FileProxy::new(
            CourseContentRepository::new(db.clone()),
            ConnectionRepository::new(db),
            self.cipher.clone(),
            self.moodle.clone(),
        )
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/moodle/connect", post(handlers::connections::connect))
        .route(
            "/moodle/connections",
            get(handlers::connections::list_connections),
        )
        .route(
            "/moodle/connections/primary",
            get(handlers::connections::primary_connection),
        )
        .route(
            "/moodle/connections/{id}/verify",
            post(handlers::connections::verify_connection),
        )
        .route("/moodle/sync", post(handlers::sync::sync))
        .route("/moodle/files/{module_id}", get(handlers::files::fetch_file))
        .route("/moodle/courses", get(handlers::courses::list_courses))
        .route(
            "/moodle/courses/{course_id}/contents",
            get(handlers::courses::list_course_contents),
        )
        .route(
            "/moodle/assignments",
            get(handlers::courses::list_assignments),
        )
        .route(
            "/moodle/assignments/{assignment_id}",
            get(handlers::courses::get_assignment),
        )
        .route(
            "/moodle/contents/{module_id}/read",
            post(handlers::courses::mark_content_read),
        )
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            user_auth_middleware,
        ));

    let operator_routes = Router::new()
        .route(
            "/operator/connections/{id}/sync",
            post(handlers::sync::operator_sync),
        )
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            operator_auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(user_routes)
        .merge(operator_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Starts the server with the given state
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {e}"))?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "operator_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::connections::connect,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::primary_connection,
        crate::handlers::connections::verify_connection,
        crate::handlers::sync::sync,
        crate::handlers::sync::operator_sync,
        crate::handlers::files::fetch_file,
        crate::handlers::courses::list_courses,
        crate::handlers::courses::list_course_contents,
        crate::handlers::courses::list_assignments,
        crate::handlers::courses::get_assignment,
        crate::handlers::courses::mark_content_read,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::connections::ConnectRequest,
            crate::connections::ConnectionSummary,
            crate::connections::SiteIdentity,
            crate::handlers::connections::ConnectionsResponse,
            crate::handlers::sync::SyncRequest,
            crate::sync_executor::SyncReport,
            crate::file_proxy::FileAction,
            crate::handlers::courses::CoursesResponse,
            crate::handlers::courses::CourseView,
            crate::handlers::courses::ContentsResponse,
            crate::handlers::courses::ContentView,
            crate::handlers::courses::FileView,
            crate::handlers::courses::AssignmentsResponse,
            crate::handlers::courses::AssignmentView,
            crate::handlers::courses::AssignmentDetail,
            crate::handlers::courses::ReadReceipt,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "studydesk API",
        description = "Moodle connection, sync and file proxy service",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
