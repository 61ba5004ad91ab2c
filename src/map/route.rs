use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::geo::{LineString, LngLat};

pub const ROUTE_SOURCE_ID: &str = "location-to-wifi-route";
pub const ROUTE_LAYER_ID: &str = "location-to-wifi-route-line";

const DEFAULT_DIRECTIONS_URL: &str = "https://api.mapbox.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelMode {
    Walking,
    Cycling,
    Driving,
}

impl TravelMode {
    pub fn profile(&self) -> &'static str {
        match self {
            TravelMode::Walking => "walking",
            TravelMode::Cycling => "cycling",
            TravelMode::Driving => "driving",
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectionsError {
    #[error("directions request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("directions service responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("no route found")]
    NoRoute,
}

pub trait DirectionsProvider: Send + Sync + 'static {
    fn route(
        &self,
        origin: LngLat,
        destination: LngLat,
        mode: TravelMode,
    ) -> impl Future<Output = Result<LineString, DirectionsError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Directions,
    StraightLine,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRoute {
    pub line: LineString,
    pub source: RouteSource,
}

/// Single attempt at the directions service. Any failure, including an
/// unusable geometry, falls back to the straight origin-destination line.
pub async fn resolve_route<D: DirectionsProvider>(
    provider: &D,
    origin: LngLat,
    destination: LngLat,
    mode: TravelMode,
) -> ResolvedRoute {
    match provider.route(origin, destination, mode).await {
        Ok(line) if line.is_drawable() => ResolvedRoute {
            line,
            source: RouteSource::Directions,
        },
        Ok(_) => {
            tracing::warn!("directions returned a degenerate geometry, drawing straight line");
            straight(origin, destination)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to fetch route, drawing straight line");
            straight(origin, destination)
        }
    }
}

fn straight(origin: LngLat, destination: LngLat) -> ResolvedRoute {
    ResolvedRoute {
        line: LineString::straight(origin, destination),
        source: RouteSource::StraightLine,
    }
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    geometry: Option<LineString>,
}

fn first_geometry(body: DirectionsResponse) -> Result<LineString, DirectionsError> {
    body.routes
        .into_iter()
        .next()
        .and_then(|route| route.geometry)
        .ok_or(DirectionsError::NoRoute)
}

pub fn coordinate_path(origin: LngLat, destination: LngLat) -> String {
    format!(
        "{},{};{},{}",
        origin.lng, origin.lat, destination.lng, destination.lat
    )
}

/// Mapbox Directions API client.
#[derive(Clone)]
pub struct MapboxDirections {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    language: String,
}

impl MapboxDirections {
    pub fn new(base_url: Option<&str>, access_token: &str, language: &str) -> Result<Self, DirectionsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_DIRECTIONS_URL)
                .trim_end_matches('/')
                .to_string(),
            access_token: access_token.to_string(),
            language: language.to_string(),
        })
    }

    fn url(&self, origin: LngLat, destination: LngLat, mode: TravelMode) -> String {
        format!(
            "{}/directions/v5/mapbox/{}/{}",
            self.base_url,
            mode.profile(),
            coordinate_path(origin, destination)
        )
    }
}

impl DirectionsProvider for MapboxDirections {
    fn route(
        &self,
        origin: LngLat,
        destination: LngLat,
        mode: TravelMode,
    ) -> impl Future<Output = Result<LineString, DirectionsError>> + Send {
        let request = self.client.get(self.url(origin, destination, mode)).query(&[
            ("alternatives", "true"),
            ("geometries", "geojson"),
            ("overview", "full"),
            ("steps", "true"),
            ("language", self.language.as_str()),
            ("access_token", self.access_token.as_str()),
        ]);

        async move {
            let response = request.send().await?;
            let status = response.status();

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<DirectionsResponse>(&text)
                    .ok()
                    .and_then(|body| body.message)
                    .unwrap_or(text);
                return Err(DirectionsError::Status {
                    status: status.as_u16(),
                    message,
                });
            }

            let body: DirectionsResponse = response.json().await?;
            first_geometry(body)
        }
    }
}
