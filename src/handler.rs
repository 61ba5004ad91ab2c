use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::Serialize;

use crate::api::{
    ApiResponse, ClearedResponse, CreateCommentRequest, ErrorResponse, MAX_RADIUS_M, MIN_RADIUS_M, MapView,
    MapViewRequest, SaveWifiRequest, SavedWifiView, WifiParams,
};
use crate::config::Config;
use crate::db::{CommentOutcome, Database, NewComment};
use crate::error::HandlerError;
use crate::map::route::MapboxDirections;
use crate::map::{MapSyncEngine, ReadyMode, SceneFactory};
use crate::model::{ANONYMOUS_AUTHOR, Location, thread_comments};
use crate::wifi::{WifiFreeClient, WifiPointSource, WifiQuery};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

const MAP_CONTAINER: &str = "map";
const MAP_VIEW_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub wifi: Arc<WifiFreeClient>,
    pub directions: Arc<MapboxDirections>,
    pub cfg: Arc<Config>,
}

fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { data })).into_response()
}

fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse { data })).into_response()
}

fn error_body(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match &self {
            HandlerError::ValidationError(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            HandlerError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            HandlerError::Unauthorized => error_body(StatusCode::UNAUTHORIZED, "Missing user identity"),
            HandlerError::WifiSource(_) => {
                tracing::error!("Failed to fetch wifi data: {}", crate::unpack_error(&self));
                error_body(StatusCode::BAD_GATEWAY, "Failed to fetch wifi data")
            }
            HandlerError::Surface(_) => {
                tracing::error!("Failed to create map surface: {}", crate::unpack_error(&self));
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create map")
            }
            HandlerError::Storage(_) => {
                tracing::error!("Storage failure: {}", crate::unpack_error(&self));
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error")
            }
            HandlerError::Timeout => {
                tracing::warn!("map view timed out");
                error_body(StatusCode::GATEWAY_TIMEOUT, "Map view timed out")
            }
        }
    }
}

fn user_id(headers: &HeaderMap) -> Result<String, HandlerError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(HandlerError::Unauthorized)
}

fn author_name(headers: &HeaderMap) -> String {
    headers
        .get(USER_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_AUTHOR)
        .to_string()
}

fn check_radius(radius: u32) -> Result<f64, HandlerError> {
    if !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&radius) {
        return Err(HandlerError::ValidationError(format!(
            "radius must be between {} and {} meters",
            MIN_RADIUS_M, MAX_RADIUS_M
        )));
    }
    Ok(radius as f64)
}

fn check_location(location: &Location) -> Result<(), HandlerError> {
    if !location.is_valid() {
        return Err(HandlerError::ValidationError("invalid coordinates".to_string()));
    }
    Ok(())
}

pub async fn healthcheck() -> impl IntoResponse {
    tracing::info!("got healthcheck request");
    success("ok")
}

pub async fn get_nearby_wifi(State(state): State<AppState>, Query(params): Query<WifiParams>) -> Response {
    let fallback = state.cfg.app.default_location();
    let location = Location::new(
        params.lat.unwrap_or(fallback.latitude),
        params.lng.unwrap_or(fallback.longitude),
    );
    if let Err(e) = check_location(&location) {
        return e.into_response();
    }
    let radius_m = match check_radius(params.radius.unwrap_or(state.cfg.app.default_radius)) {
        Ok(radius_m) => radius_m,
        Err(e) => return e.into_response(),
    };

    let query = WifiQuery {
        latitude: location.latitude,
        longitude: location.longitude,
        radius_m,
    };
    match state.wifi.nearby(query).await {
        Ok(points) => success(points),
        Err(e) => HandlerError::from(e).into_response(),
    }
}

pub async fn list_saved(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match user_id(&headers) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    match state.db.list_saved(&user).await {
        Ok(entries) => success(entries.into_iter().map(SavedWifiView::from).collect::<Vec<_>>()),
        Err(e) => HandlerError::from(e).into_response(),
    }
}

pub async fn save_wifi(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<SaveWifiRequest>,
) -> Response {
    let user = match user_id(&headers) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    if req.wifi.id != id {
        return HandlerError::ValidationError("wifi id does not match path".to_string()).into_response();
    }
    if let Err(e) = check_location(&req.origin) {
        return e.into_response();
    }

    let comment = req.comment.as_deref().map(str::trim).filter(|c| !c.is_empty());
    match state.db.save_wifi(&user, &req.wifi, &req.origin, comment).await {
        Ok(entry) => {
            tracing::info!(user = %user, wifi_id = %id, "saved wifi");
            success(SavedWifiView::from(entry))
        }
        Err(e) => HandlerError::from(e).into_response(),
    }
}

pub async fn remove_saved(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    let user = match user_id(&headers) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    match state.db.remove_saved(&user, &id).await {
        Ok(true) => success(id),
        Ok(false) => HandlerError::NotFound(format!("saved wifi {} not found", id)).into_response(),
        Err(e) => HandlerError::from(e).into_response(),
    }
}

pub async fn clear_saved(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match user_id(&headers) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    match state.db.clear_saved(&user).await {
        Ok(removed) => {
            tracing::info!(user = %user, removed, "cleared saved wifi");
            success(ClearedResponse { removed })
        }
        Err(e) => HandlerError::from(e).into_response(),
    }
}

pub async fn list_comments(State(state): State<AppState>, Path(wifi_id): Path<String>) -> Response {
    match state.db.list_comments(&wifi_id).await {
        Ok(comments) => success(thread_comments(comments)),
        Err(e) => HandlerError::from(e).into_response(),
    }
}

pub async fn create_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wifi_id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> Response {
    let user = match user_id(&headers) {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };
    let content = req.content.trim();
    if content.is_empty() {
        return HandlerError::ValidationError("content is required".to_string()).into_response();
    }

    let author = author_name(&headers);
    let comment = NewComment {
        wifi_id: &wifi_id,
        parent_id: req.parent_id.as_deref(),
        content,
        author_name: &author,
    };

    match state.db.add_comment(&user, comment).await {
        Ok(CommentOutcome::Created(comment)) => created(comment),
        Ok(CommentOutcome::ParentNotFound) => {
            HandlerError::NotFound("parent comment not found".to_string()).into_response()
        }
        Err(e) => HandlerError::from(e).into_response(),
    }
}

pub async fn comment_counts(State(state): State<AppState>) -> Response {
    match state.db.comment_counts().await {
        Ok(counts) => success(counts),
        Err(e) => HandlerError::from(e).into_response(),
    }
}

pub async fn map_view(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<MapViewRequest>) -> Response {
    match render_map_view(&state, &headers, req).await {
        Ok(view) => success(view),
        Err(e) => e.into_response(),
    }
}

/// Drives a throwaway engine over the in-memory scene until the route settles.
async fn render_map_view(state: &AppState, headers: &HeaderMap, req: MapViewRequest) -> Result<MapView, HandlerError> {
    check_location(&req.location)?;

    let points = match req.points {
        Some(points) => points,
        None => {
            let radius_m = check_radius(req.radius.unwrap_or(state.cfg.app.default_radius))?;
            state
                .wifi
                .nearby(WifiQuery {
                    latitude: req.location.latitude,
                    longitude: req.location.longitude,
                    radius_m,
                })
                .await?
        }
    };

    let saved = match user_id(headers) {
        Ok(user) => state.db.list_saved(&user).await?,
        Err(_) => vec![],
    };

    let selection = match req.selected_id {
        Some(id) => Some(
            points
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| HandlerError::NotFound(format!("wifi {} not found", id)))?,
        ),
        None => None,
    };

    let mut engine = MapSyncEngine::new(
        SceneFactory::new(ReadyMode::Immediate),
        state.directions.clone(),
        state.cfg.map.engine_options(),
    );
    engine.initialize(MAP_CONTAINER, req.location)?;
    engine.set_points(points.clone(), saved);
    engine.set_selection(selection);

    tokio::time::timeout(MAP_VIEW_TIMEOUT, engine.settle())
        .await
        .map_err(|_| HandlerError::Timeout)?;

    let view = MapView {
        state: engine.state(),
        scene: engine.surface().map(|surface| surface.scene().clone()),
        points,
        selection: engine.selection().cloned(),
        route: engine.route().cloned(),
        route_pending: engine.route_pending(),
    };
    engine.teardown();

    Ok(view)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(healthcheck))
        .route("/wifi", get(get_nearby_wifi))
        .route("/wifi/:id/comments", get(list_comments))
        .route("/wifi/:id/comments", post(create_comment))
        .route("/saved", get(list_saved))
        .route("/saved", delete(clear_saved))
        .route("/saved/:id", put(save_wifi))
        .route("/saved/:id", delete(remove_saved))
        .route("/comments/counts", get(comment_counts))
        .route("/map/view", post(map_view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_id_header() {
        let mut headers = HeaderMap::new();
        assert!(matches!(user_id(&headers), Err(HandlerError::Unauthorized)));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("   "));
        assert!(matches!(user_id(&headers), Err(HandlerError::Unauthorized)));

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("user-1"));
        assert_eq!(user_id(&headers).unwrap(), "user-1");
    }

    #[test]
    fn test_author_name_defaults_to_anonymous() {
        let mut headers = HeaderMap::new();
        assert_eq!(author_name(&headers), ANONYMOUS_AUTHOR);

        headers.insert(USER_NAME_HEADER, HeaderValue::from_static("Jiwoo"));
        assert_eq!(author_name(&headers), "Jiwoo");
    }

    #[test]
    fn test_radius_bounds() {
        assert!(check_radius(0).is_err());
        assert_eq!(check_radius(1).unwrap(), 1.0);
        assert_eq!(check_radius(5000).unwrap(), 5000.0);
        assert!(check_radius(5001).is_err());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (HandlerError::ValidationError("bad".to_string()), StatusCode::BAD_REQUEST),
            (HandlerError::NotFound("gone".to_string()), StatusCode::NOT_FOUND),
            (HandlerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (HandlerError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (
                HandlerError::WifiSource(crate::wifi::WifiSourceError::MissingApiKey),
                StatusCode::BAD_GATEWAY,
            ),
            (
                HandlerError::Storage(anyhow::anyhow!("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
