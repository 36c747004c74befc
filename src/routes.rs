use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header::CACHE_CONTROL},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{
    comments::{NewComment, list_comments, record_comment},
    error::AppError,
    state::AppState,
    visits::{VisitUpdate, recent_activity, visit_summary},
};

/// Header Cloudflare-style edges set from request geo metadata. Country is
/// never taken from the client-controlled body.
pub const GEO_COUNTRY_HEADER: &str = "CF-IPCountry";

const CACHE_ONE_MINUTE: &str = "public, max-age=60";

#[derive(Deserialize, Default)]
struct VisitPing {
    username: Option<String>,
}

/// GET /comments. Always 200: a failed read degrades to an empty list so the
/// page still renders.
pub async fn comments_get_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match list_comments(state.store.as_ref()).await {
        Ok(comments) => Json(comments),
        Err(e) => {
            warn!("comment read failed, serving empty list: {e}");
            Json(Vec::new())
        }
    }
}

/// POST /comments.
pub async fn comments_post_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let new: NewComment = serde_json::from_slice(&body).map_err(|_| AppError::MalformedInput)?;

    record_comment(state.store.as_ref(), new).await?;

    Ok(Json(json!({ "success": true })))
}

/// POST /visit. The aggregates are read and merged inline; the puts are
/// deferred past the response.
pub async fn visit_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let ping: VisitPing = if body.is_empty() {
        VisitPing::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| AppError::MalformedInput)?
    };

    let country = headers
        .get(GEO_COUNTRY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    let update = VisitUpdate::prepare(
        state.store.as_ref(),
        country,
        ping.username.as_deref().map(str::trim).filter(|u| !u.is_empty()),
    )
    .await?;

    let store = state.store.clone();
    state.defer(async move { update.persist_logged(store.as_ref()).await });

    Ok(Json(json!({ "success": true })))
}

/// GET /visits/summary.
pub async fn summary_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let summary = visit_summary(state.store.as_ref()).await?;

    Ok(([(CACHE_CONTROL, CACHE_ONE_MINUTE)], Json(summary)))
}

/// GET /visits/activity.
pub async fn activity_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let timestamps = recent_activity(state.store.as_ref()).await?;

    Ok(([(CACHE_CONTROL, CACHE_ONE_MINUTE)], Json(timestamps)))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::Ordering};

    use axum::{
        Router,
        body::Body,
        http::{Method, Request, StatusCode, header::CONTENT_TYPE},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::{build_router, config::Config, database::memory::MemoryStore, state::AppState};

    fn test_config() -> Config {
        Config {
            port: 0,
            redis_url: String::new(),
            allowed_origin: "*".to_string(),
        }
    }

    fn test_app() -> (Router, Arc<AppState>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let state = Arc::new(AppState::with_store(test_config(), store.clone()));

        (build_router(state.clone()), state, store)
    }

    fn post_json(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_comment_round_trip() {
        let (app, _, _) = test_app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/comments",
                json!({"username": "alice", "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true}));

        let response = app.oneshot(get("/comments")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let comments = body_json(response).await;
        assert_eq!(comments[0]["username"], "alice");
        assert_eq!(comments[0]["message"], "hi");
        assert!(comments[0]["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_comment_post_malformed_json_is_400() {
        let (app, _, _) = test_app();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/comments")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_comment_post_missing_fields_is_400() {
        let (app, _, _) = test_app();

        for body in [json!({"username": "alice"}), json!({"username": "", "message": "hi"})] {
            let response = app
                .clone()
                .oneshot(post_json("/comments", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_comments_get_degrades_on_store_failure() {
        let (app, _, store) = test_app();
        store.fail_reads.store(true, Ordering::Relaxed);

        let response = app.oneshot(get("/comments")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let (app, _, _) = test_app();

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/comments")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_visit_counts_country_from_header() {
        let (app, state, _) = test_app();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/visit")
            .header(super::GEO_COUNTRY_HEADER, "US")
            .body(Body::empty())
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Writes are deferred; they only have to be visible once drained.
        state.drain().await;

        let response = app.oneshot(get("/visits/summary")).await.unwrap();
        let summary = body_json(response).await;
        assert_eq!(summary["total_visits"], 1);
        assert_eq!(summary["countries"]["US"], 1);
    }

    #[tokio::test]
    async fn test_visit_without_geo_still_logs_activity() {
        let (app, state, _) = test_app();

        let response = app
            .clone()
            .oneshot(post_json("/visit", json!({"username": "alice"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.drain().await;

        let response = app.clone().oneshot(get("/visits/activity")).await.unwrap();
        let activity = body_json(response).await;
        assert_eq!(activity.as_array().unwrap().len(), 1);

        let response = app.oneshot(get("/visits/summary")).await.unwrap();
        assert_eq!(body_json(response).await["total_visits"], 0);
    }

    #[tokio::test]
    async fn test_read_endpoints_advertise_cache_lifetime() {
        let (app, _, _) = test_app();

        for path in ["/visits/summary", "/visits/activity"] {
            let response = app.clone().oneshot(get(path)).await.unwrap();
            assert_eq!(
                response.headers()["cache-control"],
                "public, max-age=60",
                "{path}"
            );
        }
    }

    #[tokio::test]
    async fn test_preflight_allows_cross_origin_post() {
        let (app, _, _) = test_app();

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/visit")
            .header("Origin", "https://example.com")
            .header("Access-Control-Request-Method", "POST")
            .header("Access-Control-Request-Headers", "content-type")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert!(response.status().is_success());

        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert!(
            headers["access-control-allow-methods"]
                .to_str()
                .unwrap()
                .contains("POST")
        );
    }
}
