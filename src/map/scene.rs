//! Headless mapping surface.
//!
//! Keeps the viewport, markers, sources and layers in memory so the engine
//! can run without a browser. The resulting [`Scene`] serializes to JSON and
//! is what the map view endpoint hands to a thin renderer.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::SurfaceError;
use crate::geo::{Bounds, LineString, LngLat};
use crate::map::surface::{
    LineLayer, MapSurface, MarkerId, MarkerSpec, MarkerStyle, SurfaceEvents, SurfaceFactory, SurfaceOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyMode {
    /// Emit "loaded" as soon as the surface is created.
    Immediate,
    /// Wait for [`SceneSurface::emit_loaded`].
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitRequest {
    pub bounds: Bounds,
    pub padding: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneMarker {
    pub id: MarkerId,
    #[serde(flatten)]
    pub spec: MarkerSpec,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Scene {
    pub container: String,
    pub style: String,
    pub language: String,
    pub center: Option<LngLat>,
    pub zoom: f64,
    pub last_fit: Option<FitRequest>,
    pub markers: BTreeMap<MarkerId, SceneMarker>,
    pub sources: BTreeMap<String, LineString>,
    pub layers: Vec<LineLayer>,
    pub destroyed: bool,
}

impl Scene {
    pub fn markers_with_style(&self, style: MarkerStyle) -> Vec<&SceneMarker> {
        self.markers.values().filter(|m| m.spec.style == style).collect()
    }
}

pub struct SceneSurface {
    scene: Scene,
    events: SurfaceEvents,
    next_marker: u64,
}

impl SceneSurface {
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn emit_loaded(&self) {
        self.events.loaded();
    }

    /// Simulates a user clicking the marker. Unknown ids are ignored.
    pub fn click(&self, marker: MarkerId) {
        if self.scene.markers.contains_key(&marker) {
            self.events.marker_clicked(marker);
        }
    }
}

impl MapSurface for SceneSurface {
    fn add_marker(&mut self, spec: MarkerSpec) -> MarkerId {
        self.next_marker += 1;
        let id = MarkerId(self.next_marker);
        self.scene.markers.insert(id, SceneMarker { id, spec });
        id
    }

    fn set_marker_position(&mut self, marker: MarkerId, position: LngLat) {
        if let Some(m) = self.scene.markers.get_mut(&marker) {
            m.spec.position = position;
        }
    }

    fn remove_marker(&mut self, marker: MarkerId) {
        self.scene.markers.remove(&marker);
    }

    fn add_geojson_source(&mut self, source_id: &str, data: &LineString) {
        self.scene.sources.insert(source_id.to_string(), data.clone());
    }

    fn set_source_data(&mut self, source_id: &str, data: &LineString) -> bool {
        match self.scene.sources.get_mut(source_id) {
            Some(existing) => {
                *existing = data.clone();
                true
            }
            None => false,
        }
    }

    fn has_source(&self, source_id: &str) -> bool {
        self.scene.sources.contains_key(source_id)
    }

    fn remove_source(&mut self, source_id: &str) {
        if self.scene.layers.iter().any(|l| l.source == source_id) {
            tracing::warn!(source_id, "removing source still referenced by a layer");
        }
        self.scene.sources.remove(source_id);
    }

    fn add_line_layer(&mut self, layer: LineLayer) {
        self.scene.layers.retain(|l| l.id != layer.id);
        self.scene.layers.push(layer);
    }

    fn has_layer(&self, layer_id: &str) -> bool {
        self.scene.layers.iter().any(|l| l.id == layer_id)
    }

    fn remove_layer(&mut self, layer_id: &str) {
        self.scene.layers.retain(|l| l.id != layer_id);
    }

    fn fly_to(&mut self, center: LngLat, zoom: f64) {
        self.scene.center = Some(center);
        self.scene.zoom = zoom;
    }

    fn fit_bounds(&mut self, bounds: Bounds, padding: u32, duration_ms: u64) {
        self.scene.center = Some(LngLat::new(
            (bounds.south_west.lng + bounds.north_east.lng) / 2.0,
            (bounds.south_west.lat + bounds.north_east.lat) / 2.0,
        ));
        self.scene.last_fit = Some(FitRequest {
            bounds,
            padding,
            duration_ms,
        });
    }

    fn center(&self) -> LngLat {
        self.scene.center.unwrap_or(LngLat::new(0.0, 0.0))
    }

    fn destroy(&mut self) {
        self.scene.markers.clear();
        self.scene.layers.clear();
        self.scene.sources.clear();
        self.scene.destroyed = true;
    }
}

#[derive(Debug, Clone)]
pub struct SceneFactory {
    ready: ReadyMode,
}

impl SceneFactory {
    pub fn new(ready: ReadyMode) -> Self {
        Self { ready }
    }
}

impl Default for SceneFactory {
    fn default() -> Self {
        SceneFactory::new(ReadyMode::Immediate)
    }
}

impl SurfaceFactory for SceneFactory {
    type Surface = SceneSurface;

    fn create(
        &self,
        container: &str,
        options: &SurfaceOptions,
        events: SurfaceEvents,
    ) -> Result<SceneSurface, SurfaceError> {
        if options.access_token.trim().is_empty() {
            return Err(SurfaceError::MissingAccessToken);
        }
        if container.trim().is_empty() {
            return Err(SurfaceError::ContainerNotFound(container.to_string()));
        }
        if options.style.trim().is_empty() {
            return Err(SurfaceError::StyleLoadFailed("empty style url".to_string()));
        }

        let surface = SceneSurface {
            scene: Scene {
                container: container.to_string(),
                style: options.style.clone(),
                language: options.language.clone(),
                center: Some(options.center),
                zoom: options.zoom,
                ..Scene::default()
            },
            events,
            next_marker: 0,
        };

        if self.ready == ReadyMode::Immediate {
            surface.emit_loaded();
        }

        Ok(surface)
    }
}
