//! # Samples Web
//!
//! The greeting web server sample:
//! - `GET /` renders `templates/index.html` with `name = "hello"`
//! - `GET /health` for monitoring
//! - `GET /api-docs/openapi.json` describing the routes above
//!
//! The binary in the workspace root owns the listener and shutdown; this crate only builds the
//! router so it can be driven in-process by tests.

#![warn(rust_2018_idioms)]

pub mod health;
pub mod template;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, Json},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;

pub use health::{HealthRes, HealthService};
pub use template::{Template, TemplateError};

/// Value rendered into the index template.
pub const DEFAULT_GREETING: &str = "hello";

const INDEX: Template = Template::new(include_str!("../templates/index.html"));

/// Shared state of the greeting routes.
#[derive(Clone, Debug)]
pub struct AppState {
    name: String,
}

impl AppState {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_GREETING)
    }
}

#[derive(OpenApi)]
#[openapi(paths(index, health), components(schemas(HealthRes)))]
struct ApiDoc;

/// Router with the default greeting.
pub fn router() -> Router {
    router_with_state(AppState::default())
}

/// Router serving the greeting with the given state. CORS is permissive.
pub fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Renders the index page for `name`.
///
/// # Errors
///
/// Returns a `TemplateError` if the bundled template references anything other than `name`.
pub fn render_index(name: &str) -> Result<String, TemplateError> {
    INDEX.render(&[("name", name)])
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Greeting page", body = String, content_type = "text/html"),
        (status = 500, description = "Template rendering failed")
    )
)]
async fn index(
    State(state): State<AppState>,
) -> Result<Html<String>, (StatusCode, &'static str)> {
    match render_index(&state.name) {
        Ok(page) => Ok(Html(page)),
        Err(e) => {
            tracing::error!("Render index error: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    async fn get_path(app: Router, path: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn index_says_hello() {
        let (status, content_type, body) = get_path(router(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().starts_with("text/html"));
        assert!(body.contains("hello"));
    }

    #[tokio::test]
    async fn index_ignores_query_string() {
        let (status, _, body) = get_path(router(), "/?name=world").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<p>hello</p>"));
    }

    #[tokio::test]
    async fn index_escapes_configured_name() {
        let app = router_with_state(AppState::new("<script>"));
        let (_, _, body) = get_path(app, "/").await;
        assert!(body.contains("&lt;script&gt;"));
        assert!(!body.contains("<script>"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, _, body) = get_path(router(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let res: HealthRes = serde_json::from_str(&body).unwrap();
        assert!(res.ok);
    }

    #[tokio::test]
    async fn openapi_lists_routes() {
        let (status, _, body) = get_path(router(), "/api-docs/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(doc["paths"].get("/").is_some());
        assert!(doc["paths"].get("/health").is_some());
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (status, _, _) = get_path(router(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn bundled_template_renders() {
        assert!(render_index("hello").unwrap().contains("<p>hello</p>"));
    }
}
