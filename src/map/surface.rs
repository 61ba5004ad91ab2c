//! Capability set a mapping backend has to provide to the engine.
//!
//! The engine never holds backend objects, only the opaque [`MarkerId`]s a
//! surface hands out and the string ids of sources and layers it created.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::SurfaceError;
use crate::geo::{Bounds, LineString, LngLat};
use crate::map::engine::EngineEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MarkerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    Location,
    Wifi,
    SavedWifi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerAnchor {
    Center,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarkerSpec {
    pub position: LngLat,
    pub style: MarkerStyle,
    pub anchor: MarkerAnchor,
}

impl MarkerSpec {
    pub fn location(position: LngLat) -> Self {
        MarkerSpec {
            position,
            style: MarkerStyle::Location,
            anchor: MarkerAnchor::Bottom,
        }
    }

    pub fn wifi(position: LngLat, saved: bool) -> Self {
        MarkerSpec {
            position,
            style: if saved { MarkerStyle::SavedWifi } else { MarkerStyle::Wifi },
            anchor: MarkerAnchor::Center,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinePaint {
    pub color: String,
    pub width: f64,
    pub opacity: f64,
    pub cap: String,
    pub join: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineLayer {
    pub id: String,
    pub source: String,
    pub paint: LinePaint,
}

/// Values the surface is created with. The access token travels here rather
/// than through any process-wide setting.
#[derive(Debug, Clone)]
pub struct SurfaceOptions {
    pub access_token: String,
    pub style: String,
    pub language: String,
    pub center: LngLat,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceEvent {
    Loaded,
    MarkerClicked(MarkerId),
}

/// Sending half handed to a surface on creation. Events are tagged with the
/// surface epoch so the engine can drop those of a torn-down surface.
#[derive(Debug, Clone)]
pub struct SurfaceEvents {
    epoch: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl SurfaceEvents {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { epoch, tx }
    }

    pub fn loaded(&self) {
        self.emit(SurfaceEvent::Loaded);
    }

    pub fn marker_clicked(&self, marker: MarkerId) {
        self.emit(SurfaceEvent::MarkerClicked(marker));
    }

    fn emit(&self, event: SurfaceEvent) {
        if self
            .tx
            .send(EngineEvent::Surface {
                epoch: self.epoch,
                event,
            })
            .is_err()
        {
            tracing::debug!(?event, "engine gone, dropping surface event");
        }
    }
}

pub trait MapSurface {
    fn add_marker(&mut self, spec: MarkerSpec) -> MarkerId;
    fn set_marker_position(&mut self, marker: MarkerId, position: LngLat);
    fn remove_marker(&mut self, marker: MarkerId);

    fn add_geojson_source(&mut self, source_id: &str, data: &LineString);
    /// Replaces the data of an existing source. Returns false if there is none.
    fn set_source_data(&mut self, source_id: &str, data: &LineString) -> bool;
    fn has_source(&self, source_id: &str) -> bool;
    fn remove_source(&mut self, source_id: &str);

    fn add_line_layer(&mut self, layer: LineLayer);
    fn has_layer(&self, layer_id: &str) -> bool;
    fn remove_layer(&mut self, layer_id: &str);

    fn fly_to(&mut self, center: LngLat, zoom: f64);
    fn fit_bounds(&mut self, bounds: Bounds, padding: u32, duration_ms: u64);
    fn center(&self) -> LngLat;

    fn destroy(&mut self);
}

pub trait SurfaceFactory {
    type Surface: MapSurface;

    fn create(
        &self,
        container: &str,
        options: &SurfaceOptions,
        events: SurfaceEvents,
    ) -> Result<Self::Surface, SurfaceError>;
}
