use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::geo::LngLat;

pub const DEFAULT_LATITUDE: f64 = 37.5665;
pub const DEFAULT_LONGITUDE: f64 = 126.9780;
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
        }
    }

    pub fn lng_lat(&self) -> LngLat {
        LngLat::new(self.longitude, self.latitude)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::new(DEFAULT_LATITUDE, DEFAULT_LONGITUDE)
    }
}

impl From<LngLat> for Location {
    fn from(point: LngLat) -> Self {
        Location::new(point.lat, point.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiPoint {
    pub id: String,
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub provider: String,
    pub installation_type: String,
    pub installation_floor: String,
    pub service_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_date: Option<String>,
}

impl WifiPoint {
    pub fn lng_lat(&self) -> LngLat {
        LngLat::new(self.longitude, self.latitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedWifiEntry {
    pub id: String,
    pub wifi: WifiPoint,
    pub origin: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub saved_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiComment {
    pub id: String,
    pub wifi_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub content: String,
    pub created_at: String,
    pub author_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: WifiComment,
    pub replies: Vec<CommentThread>,
}

/// Nests replies under their parents. A comment whose parent is not in the
/// list becomes a root. Siblings are ordered by `created_at`; equal
/// timestamps keep their input order.
pub fn thread_comments(mut comments: Vec<WifiComment>) -> Vec<CommentThread> {
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let known: std::collections::HashSet<String> = comments.iter().map(|c| c.id.clone()).collect();
    let mut children: HashMap<String, Vec<WifiComment>> = HashMap::new();
    let mut roots = Vec::new();

    for comment in comments {
        match comment.parent_id.clone() {
            Some(parent) if known.contains(&parent) && parent != comment.id => {
                children.entry(parent).or_default().push(comment)
            }
            _ => roots.push(comment),
        }
    }

    roots
        .into_iter()
        .map(|root| build_thread(root, &mut children))
        .collect()
}

fn build_thread(comment: WifiComment, children: &mut HashMap<String, Vec<WifiComment>>) -> CommentThread {
    let replies = children
        .remove(&comment.id)
        .unwrap_or_default()
        .into_iter()
        .map(|reply| build_thread(reply, children))
        .collect();

    CommentThread { comment, replies }
}
