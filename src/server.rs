use crate::api::{funnels, stats};
use crate::config::Config;
use crate::storage::store::EventStore;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers.
#[derive(Debug)]
pub struct AppState {
    pub store: EventStore,
    pub config: Config,
}

impl AppState {
    pub fn new(store: EventStore, config: Config) -> Arc<Self> {
        Arc::new(Self { store, config })
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = build_dashboard_cors(state.config.dashboard_origin.as_deref());
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    let stats_routes = Router::new()
        .route("/stats/overview", get(stats::get_overview))
        .route("/stats/visitors", get(stats::get_visitors))
        .route("/stats/pageviews", get(stats::get_pageviews))
        .route("/stats/sessions", get(stats::get_sessions))
        .route("/stats/active", get(stats::get_active))
        .route("/stats/pages", get(stats::get_pages))
        .route("/stats/pages/top", get(stats::get_top_pages))
        .route("/stats/pages/entry", get(stats::get_entry_pages))
        .route("/stats/pages/exit", get(stats::get_exit_pages))
        .route("/stats/devices/types", get(stats::get_device_types))
        .route("/stats/devices/browsers", get(stats::get_browsers))
        .route("/stats/devices/os", get(stats::get_operating_systems))
        .route("/stats/devices/trend", get(stats::get_device_trend))
        .route(
            "/stats/referrers/distribution",
            get(stats::get_referrer_distribution),
        )
        .route("/stats/referrers/trend", get(stats::get_referrer_trend))
        .route("/stats/referrers/summary", get(stats::get_referrer_summary))
        .route("/stats/referrers/table", get(stats::get_referrer_table))
        .route("/stats/referrers/urls", get(stats::get_top_referrer_urls))
        .route(
            "/stats/referrers/sources",
            get(stats::get_top_referrer_sources),
        )
        .route("/stats/referrers/channels", get(stats::get_top_channels))
        .route("/stats/campaigns", get(stats::get_campaigns))
        .route(
            "/stats/campaigns/breakdown/{dimension}",
            get(stats::get_campaign_breakdown),
        )
        .route(
            "/stats/campaigns/landing-pages",
            get(stats::get_campaign_landing_pages),
        )
        .route("/stats/campaigns/trend", get(stats::get_campaign_trend))
        .route("/stats/countries", get(stats::get_countries))
        .route("/stats/events", get(stats::get_events))
        .route("/stats/events/properties", get(stats::get_event_properties))
        .route("/stats/events/recent", get(stats::get_recent_events))
        .route("/stats/journey", get(stats::get_journey))
        .route("/stats/funnel", post(funnels::post_funnel))
        .layer(cors);

    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .nest("/api", stats_routes)
        .layer(axum::middleware::map_response(add_security_headers))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Build CORS layer for the stats routes based on configured origin.
fn build_dashboard_cors(dashboard_origin: Option<&str>) -> CorsLayer {
    dashboard_origin.map_or_else(
        || {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
        },
        |origin| {
            let allowed_origin = origin.parse::<HeaderValue>().unwrap_or_else(|_| {
                tracing::warn!(origin, "Invalid dashboard origin, allowing any");
                HeaderValue::from_static("*")
            });
            CorsLayer::new()
                .allow_origin(allowed_origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
        },
    )
}

/// GET /health
async fn health_check() -> &'static str {
    "ok"
}

/// GET /health/detailed: Reports whether the event table is readable.
async fn detailed_health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let events = state
        .store
        .run(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get::<_, i64>(0))?))
        .await;

    let (status, stored_events) = match events {
        Ok(count) => ("ok", Some(count)),
        Err(e) => {
            tracing::warn!(error = %e, "Health check query failed");
            ("degraded", None)
        }
    };
    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "stored_events": stored_events,
        "funnel_window_secs": state.config.funnel_window_secs,
        "journey_max_steps": state.config.journey_max_steps,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures::TestEvent;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn make_test_state() -> Arc<AppState> {
        let store = EventStore::open(None).unwrap();
        AppState::new(store, Config::default())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = build_router(make_test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_detailed_health_check() {
        let state = make_test_state();
        TestEvent::pageview("v1", "s1", "2024-01-15 10:00:00", "/")
            .insert(&state.store.connection().unwrap());
        let (status, json) = get_json(build_router(state), "/health/detailed").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["stored_events"], 1);
        assert!(json.get("version").is_some());
    }

    #[tokio::test]
    async fn test_overview() {
        let state = make_test_state();
        let conn = state.store.connection().unwrap();
        TestEvent::pageview("v1", "s1", "2024-01-15 10:00:00", "/").insert(&conn);
        TestEvent::pageview("v1", "s1", "2024-01-15 10:02:00", "/pricing").insert(&conn);
        TestEvent::pageview("v2", "s2", "2024-01-16 09:00:00", "/").insert(&conn);

        let (status, json) = get_json(
            build_router(state),
            "/api/stats/overview?site_id=test.com&start_date=2024-01-15&end_date=2024-01-16",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["granularity"], "day");
        assert_eq!(json["metrics"]["unique_visitors"], 2);
        assert_eq!(json["metrics"]["total_pageviews"], 3);
        assert_eq!(json["visitors"].as_array().unwrap().len(), 2);
        assert_eq!(json["pageviews"][0]["views"], 2);
    }

    #[tokio::test]
    async fn test_unknown_filter_column_is_bad_request() {
        let app = build_router(make_test_state());
        let (status, json) = get_json(
            app,
            "/api/stats/pages?site_id=test.com&filters=%5B%7B%22column%22%3A%22password%22%2C%22operator%22%3A%22%3D%22%2C%22value%22%3A%22x%22%7D%5D",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Unknown filter column: 'password'");
    }

    #[tokio::test]
    async fn test_invalid_site_id() {
        let app = build_router(make_test_state());
        let (status, _) = get_json(app, "/api/stats/visitors?site_id=bad%27site").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_campaign_dimension() {
        let app = build_router(make_test_state());
        let (status, _) =
            get_json(app, "/api/stats/campaigns/breakdown/referrer?site_id=test.com").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let app = build_router(make_test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/stats/funnel")
                    .header("origin", "https://dashboard.example.com")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }

    #[test]
    fn test_restricted_cors_builds() {
        let _ = build_dashboard_cors(Some("https://analytics.example.com"));
        let _ = build_dashboard_cors(Some("not a header\n"));
    }
}
