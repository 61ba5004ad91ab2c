use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::map::surface::{MapSurface, MarkerId, MarkerSpec};
use crate::model::{SavedWifiEntry, WifiPoint};

pub enum ReconcileResult {
    Created(MarkerId),
    Updated(MarkerId),
    Unchanged(MarkerId),
}

impl ReconcileResult {
    pub fn record(self, stats: &mut ReconcileStats) -> MarkerId {
        match self {
            ReconcileResult::Created(id) => {
                stats.created += 1;
                id
            }
            ReconcileResult::Updated(id) => {
                stats.updated += 1;
                id
            }
            ReconcileResult::Unchanged(id) => {
                stats.unchanged += 1;
                id
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// Result of comparing the keys drawn last time with the keys wanted now.
#[derive(Debug, PartialEq, Eq)]
pub struct KeyDiff<K> {
    pub added: Vec<K>,
    pub removed: Vec<K>,
    pub retained: Vec<K>,
}

/// `added` and `retained` follow the order of `next`, `removed` the order of
/// `previous`. Repeated keys count once.
pub fn diff_keys<K, P, N>(previous: P, next: N) -> KeyDiff<K>
where
    K: Eq + Hash + Clone,
    P: IntoIterator<Item = K>,
    N: IntoIterator<Item = K>,
{
    let previous: Vec<K> = previous.into_iter().collect();
    let before: HashSet<K> = previous.iter().cloned().collect();

    let mut seen = HashSet::new();
    let mut added = Vec::new();
    let mut retained = Vec::new();
    for key in next {
        if !seen.insert(key.clone()) {
            continue;
        }
        if before.contains(&key) {
            retained.push(key);
        } else {
            added.push(key);
        }
    }

    let mut removed = Vec::new();
    let mut gone = HashSet::new();
    for key in previous {
        if !seen.contains(&key) && gone.insert(key.clone()) {
            removed.push(key);
        }
    }

    KeyDiff {
        added,
        removed,
        retained,
    }
}

/// A marker the engine wants on the map, keyed by point id.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerTarget {
    pub point: WifiPoint,
    pub spec: MarkerSpec,
}

impl MarkerTarget {
    pub fn key(&self) -> &str {
        &self.point.id
    }
}

/// Splits points and saved entries into the two marker collections: one
/// marker per point (saved-style when the id is saved) and one overlay marker
/// per saved entry not already among the points. Matching is by id only.
pub fn plan_markers(points: &[WifiPoint], saved: &[SavedWifiEntry]) -> (Vec<MarkerTarget>, Vec<MarkerTarget>) {
    let saved_ids: HashSet<&str> = saved.iter().map(|entry| entry.id.as_str()).collect();
    let point_ids: HashSet<&str> = points.iter().map(|point| point.id.as_str()).collect();

    let plain = points
        .iter()
        .map(|point| MarkerTarget {
            point: point.clone(),
            spec: MarkerSpec::wifi(point.lng_lat(), saved_ids.contains(point.id.as_str())),
        })
        .collect();

    let overlay = saved
        .iter()
        .filter(|entry| !point_ids.contains(entry.id.as_str()))
        .map(|entry| MarkerTarget {
            point: entry.wifi.clone(),
            spec: MarkerSpec::wifi(entry.wifi.lng_lat(), true),
        })
        .collect();

    (plain, overlay)
}

#[derive(Debug)]
struct DrawnMarker {
    marker: MarkerId,
    target: MarkerTarget,
}

/// One keyed collection of markers currently on a surface.
#[derive(Debug, Default)]
pub struct MarkerLayer {
    drawn: HashMap<String, DrawnMarker>,
}

impl MarkerLayer {
    pub fn len(&self) -> usize {
        self.drawn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawn.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.drawn.contains_key(key)
    }

    pub fn marker_for(&self, key: &str) -> Option<MarkerId> {
        self.drawn.get(key).map(|d| d.marker)
    }

    pub fn point_for_marker(&self, marker: MarkerId) -> Option<&WifiPoint> {
        self.drawn
            .values()
            .find(|d| d.marker == marker)
            .map(|d| &d.target.point)
    }

    /// Brings the layer in line with `targets`. Removals run before
    /// additions; a retained key whose spec changed is re-created.
    pub fn reconcile<S: MapSurface>(&mut self, surface: &mut S, targets: Vec<MarkerTarget>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        let diff = diff_keys(
            self.drawn.keys().cloned().collect::<Vec<_>>(),
            targets.iter().map(|t| t.key().to_string()),
        );

        for key in &diff.removed {
            if let Some(drawn) = self.drawn.remove(key) {
                surface.remove_marker(drawn.marker);
                stats.removed += 1;
            }
        }

        let mut by_key: HashMap<String, MarkerTarget> = HashMap::new();
        for target in targets {
            by_key.entry(target.key().to_string()).or_insert(target);
        }

        for key in diff.retained {
            let Some(target) = by_key.remove(&key) else {
                continue;
            };
            let result = self.apply_retained(surface, &key, target);
            result.record(&mut stats);
        }

        for key in diff.added {
            let Some(target) = by_key.remove(&key) else {
                continue;
            };
            let marker = surface.add_marker(target.spec);
            self.drawn.insert(key, DrawnMarker { marker, target });
            ReconcileResult::Created(marker).record(&mut stats);
        }

        stats
    }

    fn apply_retained<S: MapSurface>(&mut self, surface: &mut S, key: &str, target: MarkerTarget) -> ReconcileResult {
        let Some(drawn) = self.drawn.get_mut(key) else {
            let marker = surface.add_marker(target.spec);
            self.drawn.insert(key.to_string(), DrawnMarker { marker, target });
            return ReconcileResult::Created(marker);
        };

        if drawn.target.spec == target.spec {
            drawn.target = target;
            return ReconcileResult::Unchanged(drawn.marker);
        }

        surface.remove_marker(drawn.marker);
        drawn.marker = surface.add_marker(target.spec);
        drawn.target = target;
        ReconcileResult::Updated(drawn.marker)
    }

    pub fn clear<S: MapSurface>(&mut self, surface: &mut S) -> usize {
        let count = self.drawn.len();
        for (_, drawn) in self.drawn.drain() {
            surface.remove_marker(drawn.marker);
        }
        count
    }
}
