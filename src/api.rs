use serde::{Deserialize, Serialize};

use crate::geo::{distance_km, format_distance};
use crate::map::engine::EngineState;
use crate::map::route::ResolvedRoute;
use crate::map::scene::Scene;
use crate::model::{Location, SavedWifiEntry, WifiPoint};

pub const MIN_RADIUS_M: u32 = 1;
pub const MAX_RADIUS_M: u32 = 5000;

#[derive(Debug, Deserialize)]
pub struct WifiParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SaveWifiRequest {
    pub wifi: WifiPoint,
    pub origin: Location,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Input for a server-side map render. When `points` is omitted the nearby
/// points around `location` are fetched from the wifi source.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapViewRequest {
    pub location: Location,
    #[serde(default)]
    pub points: Option<Vec<WifiPoint>>,
    #[serde(default)]
    pub selected_id: Option<String>,
    #[serde(default)]
    pub radius: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedWifiView {
    #[serde(flatten)]
    pub entry: SavedWifiEntry,
    pub distance: String,
}

impl From<SavedWifiEntry> for SavedWifiView {
    fn from(entry: SavedWifiEntry) -> Self {
        let distance = format_distance(distance_km(entry.origin.lng_lat(), entry.wifi.lng_lat()));
        SavedWifiView { entry, distance }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapView {
    pub state: EngineState,
    pub scene: Option<Scene>,
    pub points: Vec<WifiPoint>,
    pub selection: Option<WifiPoint>,
    pub route: Option<ResolvedRoute>,
    pub route_pending: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearedResponse {
    pub removed: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(latitude: f64, longitude: f64) -> SavedWifiEntry {
        SavedWifiEntry {
            id: "a".to_string(),
            wifi: WifiPoint {
                id: "a".to_string(),
                name: "Seoul Plaza".to_string(),
                address: "Jung-gu".to_string(),
                latitude,
                longitude,
                provider: "Seoul".to_string(),
                installation_type: "Public WiFi".to_string(),
                installation_floor: "Unknown".to_string(),
                service_type: "Free public WiFi".to_string(),
                install_date: None,
            },
            origin: Location::default(),
            comment: None,
            saved_at: "2025-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_saved_view_formats_distance() {
        let near = SavedWifiView::from(entry(37.5700, 126.9780));
        assert_eq!(near.distance, "389m");

        let far = SavedWifiView::from(entry(37.5665, 127.0000));
        assert!(far.distance.ends_with("km"));

        let json = serde_json::to_value(&near).unwrap();
        assert_eq!(json["distance"], "389m");
        assert_eq!(json["savedAt"], "2025-01-01T00:00:00.000Z");
        assert_eq!(json["wifi"]["serviceType"], "Free public WiFi");
    }

    #[test]
    fn test_comment_request_camel_case() {
        let req: CreateCommentRequest =
            serde_json::from_value(serde_json::json!({"content": "hi", "parentId": "comment-1-abc"})).unwrap();
        assert_eq!(req.parent_id.as_deref(), Some("comment-1-abc"));
    }
}
