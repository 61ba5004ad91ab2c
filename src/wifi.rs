use serde::{Deserialize, Deserializer};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::geo::{LngLat, distance_m};
use crate::model::WifiPoint;

const DEFAULT_WIFI_URL: &str = "https://www.wififree.kr";
const AP_LIST_ENDPOINT: &str = "/getApList.do";
const RESULT_OK: &str = "__OK__";
const PLACEHOLDER_KEY: &str = "your_wifi_api_key_here";

#[derive(Debug, Error)]
pub enum WifiSourceError {
    #[error("wifi api key is not configured")]
    MissingApiKey,
    #[error("wifi request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("wifi api returned {result}: {description}")]
    Api { result: String, description: String },
    #[error("wifi api response has no apList")]
    MalformedResponse,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WifiQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

impl WifiQuery {
    pub fn center(&self) -> LngLat {
        LngLat::new(self.longitude, self.latitude)
    }
}

pub trait WifiPointSource: Send + Sync + 'static {
    fn nearby(&self, query: WifiQuery) -> impl Future<Output = Result<Vec<WifiPoint>, WifiSourceError>> + Send;
}

#[derive(Debug, Deserialize)]
pub struct ApListEnvelope {
    #[serde(rename = "apList")]
    pub ap_list: Option<ApList>,
}

#[derive(Debug, Deserialize)]
pub struct ApList {
    pub result: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub list: Option<Vec<ApItem>>,
}

#[derive(Debug, Deserialize)]
pub struct ApItem {
    #[serde(rename = "RN", default, deserialize_with = "lenient_string")]
    pub rn: String,
    #[serde(rename = "AP_NAME", default, deserialize_with = "lenient_string")]
    pub ap_name: String,
    #[serde(rename = "LAT", default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(rename = "LON", default, deserialize_with = "lenient_f64")]
    pub lon: Option<f64>,
    #[serde(rename = "ADDR_STATE", default, deserialize_with = "lenient_string")]
    pub addr_state: String,
    #[serde(rename = "ADDR_CITY", default, deserialize_with = "lenient_string")]
    pub addr_city: String,
    #[serde(rename = "ADDR_DETAIL", default, deserialize_with = "lenient_string")]
    pub addr_detail: String,
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

fn or_placeholder(value: &str, placeholder: &str) -> String {
    if value.trim().is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}

impl ApItem {
    fn into_point(self, query: &WifiQuery) -> Option<WifiPoint> {
        let (Some(lat), Some(lon)) = (self.lat, self.lon) else {
            tracing::warn!(rn = %self.rn, name = %self.ap_name, "skipping access point with invalid coordinates");
            return None;
        };

        if distance_m(query.center(), LngLat::new(lon, lat)) > query.radius_m {
            return None;
        }

        let address = [self.addr_state.as_str(), self.addr_city.as_str(), self.addr_detail.as_str()]
            .join(" ")
            .trim()
            .to_string();

        Some(WifiPoint {
            id: format!("wifi-{}-{}-{}-{}", self.rn, self.ap_name, lat, lon),
            name: or_placeholder(&self.ap_name, "Unnamed"),
            address: or_placeholder(&address, "No address information"),
            latitude: lat,
            longitude: lon,
            provider: or_placeholder(&self.addr_state, "Unknown"),
            installation_type: "Public WiFi".to_string(),
            installation_floor: "Unknown".to_string(),
            service_type: "Free public WiFi".to_string(),
            install_date: None,
        })
    }
}

/// Turns the upstream envelope into points inside the query radius.
pub fn points_from_envelope(envelope: ApListEnvelope, query: &WifiQuery) -> Result<Vec<WifiPoint>, WifiSourceError> {
    let ap_list = envelope.ap_list.ok_or(WifiSourceError::MalformedResponse)?;

    if ap_list.result != RESULT_OK {
        return Err(WifiSourceError::Api {
            result: ap_list.result,
            description: ap_list.description,
        });
    }

    let Some(items) = ap_list.list else {
        tracing::warn!("no wifi data available for this location");
        return Ok(vec![]);
    };

    Ok(items.into_iter().filter_map(|item| item.into_point(query)).collect())
}

/// Client for the public WiFi listing (`getApList.do`).
#[derive(Clone)]
pub struct WifiFreeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WifiFreeClient {
    pub fn new(base_url: Option<&str>, api_key: &str) -> Result<Self, WifiSourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.unwrap_or(DEFAULT_WIFI_URL).trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && self.api_key != PLACEHOLDER_KEY
    }
}

impl WifiPointSource for WifiFreeClient {
    fn nearby(&self, query: WifiQuery) -> impl Future<Output = Result<Vec<WifiPoint>, WifiSourceError>> + Send {
        let configured = self.is_configured();
        let client = self.client.clone();
        let url = format!("{}{}", self.base_url, AP_LIST_ENDPOINT);
        let api_key = self.api_key.clone();

        async move {
            if !configured {
                tracing::error!("wifi api key is not configured");
                return Err(WifiSourceError::MissingApiKey);
            }

            let form = reqwest::multipart::Form::new()
                .text("apiAuthKey", api_key)
                .text("searchLat", query.latitude.to_string())
                .text("searchLon", query.longitude.to_string())
                .text("searchDistance", (query.radius_m / 1000.0).to_string());

            tracing::info!(
                %url,
                latitude = query.latitude,
                longitude = query.longitude,
                radius_m = query.radius_m,
                "requesting nearby wifi"
            );
            let started = Instant::now();

            let response = client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .inspect_err(|e| tracing::error!(error = %e, timeout = e.is_timeout(), "wifi request failed"))?
                .error_for_status()
                .inspect_err(|e| tracing::error!(status = ?e.status(), "wifi api returned an error status"))?;

            let envelope: ApListEnvelope = response.json().await?;
            let points = points_from_envelope(envelope, &query)?;

            tracing::info!(
                count = points.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "found wifi points within radius"
            );
            Ok(points)
        }
    }
}
