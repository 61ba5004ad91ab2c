//! Map synchronization engine.
//!
//! Projects application state (location, point list, saved entries,
//! selection) onto a [`MapSurface`]. Every mutation of the surface happens
//! inside an engine method on the caller's task; the only asynchronous work is
//! the route fetch, which runs in a spawned task and reports back through the
//! engine's event queue.
//!
//! ```rust,ignore
//! let mut engine = MapSyncEngine::new(SceneFactory::default(), directions, options);
//! engine.initialize("map", location.clone())?;
//! engine.set_points(points, saved);
//! engine.set_selection(Some(point));
//! engine.settle().await;
//! ```

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::SurfaceError;
use crate::geo::Bounds;
use crate::map::reconcile::{MarkerLayer, ReconcileStats, plan_markers};
use crate::map::route::{
    DirectionsProvider, ROUTE_LAYER_ID, ROUTE_SOURCE_ID, ResolvedRoute, TravelMode, resolve_route,
};
use crate::map::surface::{
    LineLayer, LinePaint, MapSurface, MarkerId, MarkerSpec, SurfaceEvent, SurfaceEvents, SurfaceFactory,
    SurfaceOptions,
};
use crate::model::{Location, SavedWifiEntry, WifiPoint};

pub const DEFAULT_STYLE: &str = "mapbox://styles/mapbox/streets-v12";

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Surface { epoch: u64, event: SurfaceEvent },
    RouteResolved { generation: u64, route: ResolvedRoute },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
}

enum Phase<S> {
    Uninitialized,
    Initializing(S),
    Ready(S),
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub access_token: String,
    pub style: String,
    pub language: String,
    pub initial_zoom: f64,
    pub focus_zoom: f64,
    pub fit_padding: u32,
    pub fit_duration_ms: u64,
    pub travel_mode: TravelMode,
    pub route_paint: LinePaint,
}

impl EngineOptions {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            style: DEFAULT_STYLE.to_string(),
            language: "ko".to_string(),
            initial_zoom: 13.0,
            focus_zoom: 14.0,
            fit_padding: 80,
            fit_duration_ms: 800,
            travel_mode: TravelMode::Walking,
            route_paint: LinePaint {
                color: "#2563eb".to_string(),
                width: 4.0,
                opacity: 0.7,
                cap: "round".to_string(),
                join: "round".to_string(),
            },
        }
    }
}

/// Resolves once the surface has loaded. The flag only flips while the
/// engine is processing events, so something has to keep pumping it.
#[derive(Debug, Clone)]
pub struct Readiness(watch::Receiver<bool>);

impl Readiness {
    pub fn is_ready(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn wait(&mut self) -> bool {
        self.0.wait_for(|ready| *ready).await.is_ok()
    }
}

#[derive(Default)]
struct DesiredView {
    location: Location,
    points: Vec<WifiPoint>,
    saved: Vec<SavedWifiEntry>,
    selection: Option<WifiPoint>,
    route: Option<ResolvedRoute>,
}

#[derive(Default)]
struct RouteTracker {
    generation: u64,
    pending: Option<u64>,
    task: Option<JoinHandle<()>>,
}

pub type SelectHandler = Box<dyn FnMut(&WifiPoint) + Send>;

pub struct MapSyncEngine<F: SurfaceFactory, D: DirectionsProvider> {
    factory: F,
    directions: Arc<D>,
    options: EngineOptions,
    phase: Phase<F::Surface>,
    epoch: u64,
    desired: DesiredView,
    location_marker: Option<MarkerId>,
    plain: MarkerLayer,
    overlay: MarkerLayer,
    route: RouteTracker,
    on_select: Option<SelectHandler>,
    ready_tx: watch::Sender<bool>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl<F: SurfaceFactory, D: DirectionsProvider> MapSyncEngine<F, D> {
    pub fn new(factory: F, directions: Arc<D>, options: EngineOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, _) = watch::channel(false);

        Self {
            factory,
            directions,
            options,
            phase: Phase::Uninitialized,
            epoch: 0,
            desired: DesiredView::default(),
            location_marker: None,
            plain: MarkerLayer::default(),
            overlay: MarkerLayer::default(),
            route: RouteTracker::default(),
            on_select: None,
            ready_tx,
            events_tx,
            events_rx,
        }
    }

    /// Registers the callback invoked with a clicked marker's point. Without
    /// one, a click selects the point directly.
    pub fn on_select(&mut self, handler: impl FnMut(&WifiPoint) + Send + 'static) {
        self.on_select = Some(Box::new(handler));
    }

    pub fn state(&self) -> EngineState {
        match self.phase {
            Phase::Uninitialized => EngineState::Uninitialized,
            Phase::Initializing(_) => EngineState::Initializing,
            Phase::Ready(_) => EngineState::Ready,
        }
    }

    pub fn surface(&self) -> Option<&F::Surface> {
        match &self.phase {
            Phase::Uninitialized => None,
            Phase::Initializing(surface) | Phase::Ready(surface) => Some(surface),
        }
    }

    fn surface_mut(&mut self) -> Option<&mut F::Surface> {
        match &mut self.phase {
            Phase::Uninitialized => None,
            Phase::Initializing(surface) | Phase::Ready(surface) => Some(surface),
        }
    }

    pub fn location(&self) -> &Location {
        &self.desired.location
    }

    pub fn selection(&self) -> Option<&WifiPoint> {
        self.desired.selection.as_ref()
    }

    pub fn route(&self) -> Option<&ResolvedRoute> {
        self.desired.route.as_ref()
    }

    pub fn route_generation(&self) -> u64 {
        self.route.generation
    }

    pub fn route_pending(&self) -> bool {
        self.route.pending.is_some()
    }

    pub fn plain_markers(&self) -> &MarkerLayer {
        &self.plain
    }

    pub fn overlay_markers(&self) -> &MarkerLayer {
        &self.overlay
    }

    pub fn location_marker(&self) -> Option<MarkerId> {
        self.location_marker
    }

    pub fn readiness(&self) -> Readiness {
        Readiness(self.ready_tx.subscribe())
    }

    /// Creates the surface. A second call while a surface exists only hands
    /// back the readiness signal.
    pub fn initialize(&mut self, container: &str, initial: Location) -> Result<Readiness, SurfaceError> {
        if !matches!(self.phase, Phase::Uninitialized) {
            return Ok(self.readiness());
        }

        self.epoch += 1;
        let options = SurfaceOptions {
            access_token: self.options.access_token.clone(),
            style: self.options.style.clone(),
            language: self.options.language.clone(),
            center: initial.lng_lat(),
            zoom: self.options.initial_zoom,
        };
        let moved = self.desired.location != initial;
        self.desired.location = initial;
        if moved && self.desired.selection.is_some() {
            self.request_route();
        }

        let events = SurfaceEvents::new(self.epoch, self.events_tx.clone());
        let surface = self
            .factory
            .create(container, &options, events)
            .inspect_err(|e| tracing::error!(error = %e, container, "failed to create map surface"))?;

        self.phase = Phase::Initializing(surface);
        tracing::info!(container, epoch = self.epoch, "map surface created, waiting for load");

        Ok(self.readiness())
    }

    pub fn set_location(&mut self, location: Location) {
        let moved = self.desired.location != location;
        self.desired.location = location;

        let center = self.desired.location.lng_lat();
        let zoom = self.options.focus_zoom;
        if let Some(surface) = self.surface_mut() {
            surface.fly_to(center, zoom);
        }

        self.sync_location_marker();

        if moved && self.desired.selection.is_some() {
            self.request_route();
        }
    }

    pub fn set_points(&mut self, points: Vec<WifiPoint>, saved: Vec<SavedWifiEntry>) {
        self.desired.points = points;
        self.desired.saved = saved;
        self.sync_markers();
    }

    pub fn set_selection(&mut self, selection: Option<WifiPoint>) {
        let previous = self.desired.selection.as_ref().map(|p| p.id.clone());
        let changed = previous.as_deref() != selection.as_ref().map(|p| p.id.as_str());
        self.desired.selection = selection;

        if self.desired.selection.is_none() {
            if self.route.pending.is_some() || self.route.task.is_some() {
                self.cancel_route();
            }
            self.desired.route = None;
            self.sync_route();
            return;
        }

        if !changed && (self.route.pending.is_some() || self.desired.route.is_some()) {
            return;
        }

        self.request_route();
        if changed {
            self.fit_selection();
        }
    }

    pub fn request_viewport_center_as_location(&self) -> Option<Location> {
        self.surface().map(|surface| Location::from(surface.center()))
    }

    /// Releases markers, the route overlay and the surface. Calling it again,
    /// or before `initialize`, does nothing.
    pub fn teardown(&mut self) {
        if self.route.pending.is_some() || self.route.task.is_some() {
            self.cancel_route();
        }

        let mut surface = match std::mem::replace(&mut self.phase, Phase::Uninitialized) {
            Phase::Uninitialized => return,
            Phase::Initializing(surface) | Phase::Ready(surface) => surface,
        };

        if let Some(marker) = self.location_marker.take() {
            surface.remove_marker(marker);
        }
        let removed = self.plain.clear(&mut surface) + self.overlay.clear(&mut surface);
        remove_route(&mut surface);
        surface.destroy();

        self.desired.route = None;
        self.ready_tx.send_replace(false);
        tracing::info!(markers_removed = removed, "map surface torn down");
    }

    pub fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Surface { epoch, event } if epoch != self.epoch => {
                tracing::debug!(epoch, current = self.epoch, ?event, "ignoring event from old surface");
            }
            EngineEvent::Surface {
                event: SurfaceEvent::Loaded,
                ..
            } => self.on_loaded(),
            EngineEvent::Surface {
                event: SurfaceEvent::MarkerClicked(marker),
                ..
            } => self.on_marker_clicked(marker),
            EngineEvent::RouteResolved { generation, route } => self.on_route_resolved(generation, route),
        }
    }

    /// Applies every event already queued. Returns how many were handled.
    pub fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Waits for the next event and applies it.
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Pumps events until the surface is loaded and no route is in flight.
    pub async fn settle(&mut self) {
        loop {
            self.drain();
            let loading = matches!(self.phase, Phase::Initializing(_));
            if !loading && self.route.pending.is_none() {
                return;
            }
            if !self.step().await {
                return;
            }
        }
    }

    fn on_loaded(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Uninitialized) {
            Phase::Initializing(surface) => self.phase = Phase::Ready(surface),
            other => {
                self.phase = other;
                return;
            }
        }

        tracing::info!(epoch = self.epoch, "map surface ready");
        self.ready_tx.send_replace(true);
        self.apply_snapshot();
    }

    /// Draws the latest desired state onto a surface that just became ready.
    fn apply_snapshot(&mut self) {
        self.sync_location_marker();
        self.sync_markers();

        if self.desired.selection.is_some() {
            if self.desired.route.is_none() && self.route.pending.is_none() {
                self.request_route();
            } else {
                self.sync_route();
            }
            self.fit_selection();
        }
    }

    fn on_marker_clicked(&mut self, marker: MarkerId) {
        let point = self
            .plain
            .point_for_marker(marker)
            .or_else(|| self.overlay.point_for_marker(marker))
            .cloned();

        let Some(point) = point else {
            tracing::debug!(?marker, "click on unknown marker");
            return;
        };

        match self.on_select.as_mut() {
            Some(handler) => handler(&point),
            None => self.set_selection(Some(point)),
        }
    }

    fn on_route_resolved(&mut self, generation: u64, route: ResolvedRoute) {
        if self.route.pending != Some(generation)
            || generation != self.route.generation
            || self.desired.selection.is_none()
        {
            tracing::debug!(generation, current = self.route.generation, "discarding stale route");
            return;
        }

        self.route.pending = None;
        self.route.task = None;
        tracing::debug!(generation, source = ?route.source, points = route.line.coordinates.len(), "route resolved");
        self.desired.route = Some(route);
        self.sync_route();
    }

    fn sync_location_marker(&mut self) {
        let position = self.desired.location.lng_lat();
        let Phase::Ready(surface) = &mut self.phase else {
            return;
        };

        match self.location_marker {
            Some(marker) => surface.set_marker_position(marker, position),
            None => self.location_marker = Some(surface.add_marker(MarkerSpec::location(position))),
        }
    }

    fn sync_markers(&mut self) -> Option<(ReconcileStats, ReconcileStats)> {
        let Phase::Ready(surface) = &mut self.phase else {
            return None;
        };

        let (plain, overlay) = plan_markers(&self.desired.points, &self.desired.saved);
        let plain_stats = self.plain.reconcile(surface, plain);
        let overlay_stats = self.overlay.reconcile(surface, overlay);

        tracing::debug!(
            plain = self.plain.len(),
            overlay = self.overlay.len(),
            created = plain_stats.created + overlay_stats.created,
            updated = plain_stats.updated + overlay_stats.updated,
            removed = plain_stats.removed + overlay_stats.removed,
            "markers reconciled"
        );

        Some((plain_stats, overlay_stats))
    }

    fn sync_route(&mut self) {
        let Phase::Ready(surface) = &mut self.phase else {
            return;
        };

        let Some(route) = &self.desired.route else {
            remove_route(surface);
            return;
        };

        if !surface.set_source_data(ROUTE_SOURCE_ID, &route.line) {
            surface.add_geojson_source(ROUTE_SOURCE_ID, &route.line);
        }
        if !surface.has_layer(ROUTE_LAYER_ID) {
            surface.add_line_layer(LineLayer {
                id: ROUTE_LAYER_ID.to_string(),
                source: ROUTE_SOURCE_ID.to_string(),
                paint: self.options.route_paint.clone(),
            });
        }
    }

    fn fit_selection(&mut self) {
        let Some(target) = &self.desired.selection else {
            return;
        };
        let bounds = Bounds::around(self.desired.location.lng_lat()).extend(target.lng_lat());
        let (padding, duration) = (self.options.fit_padding, self.options.fit_duration_ms);

        if let Phase::Ready(surface) = &mut self.phase {
            surface.fit_bounds(bounds, padding, duration);
        }
    }

    fn cancel_route(&mut self) {
        self.route.generation += 1;
        self.route.pending = None;
        if let Some(task) = self.route.task.take() {
            task.abort();
        }
    }

    /// Starts a fetch for the current selection under a fresh generation and
    /// drops whatever overlay was drawn for the previous one.
    fn request_route(&mut self) {
        let Some(target) = &self.desired.selection else {
            return;
        };
        let origin = self.desired.location.lng_lat();
        let destination = target.lng_lat();

        self.cancel_route();
        self.desired.route = None;
        self.sync_route();

        let generation = self.route.generation;
        let directions = Arc::clone(&self.directions);
        let events = self.events_tx.clone();
        let mode = self.options.travel_mode;

        self.route.pending = Some(generation);
        self.route.task = Some(tokio::spawn(async move {
            let route = resolve_route(directions.as_ref(), origin, destination, mode).await;
            if events.send(EngineEvent::RouteResolved { generation, route }).is_err() {
                tracing::debug!(generation, "engine gone before route resolved");
            }
        }));
    }
}

impl<F: SurfaceFactory, D: DirectionsProvider> Drop for MapSyncEngine<F, D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn remove_route<S: MapSurface>(surface: &mut S) {
    if surface.has_layer(ROUTE_LAYER_ID) {
        surface.remove_layer(ROUTE_LAYER_ID);
    }
    if surface.has_source(ROUTE_SOURCE_ID) {
        surface.remove_source(ROUTE_SOURCE_ID);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{LineString, LngLat};
    use crate::map::route::{DirectionsError, RouteSource};
    use crate::map::scene::{ReadyMode, SceneFactory, SceneSurface};
    use crate::map::surface::MarkerStyle;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    struct Step {
        destination: LngLat,
        gate: Option<oneshot::Receiver<()>>,
        result: Result<LineString, DirectionsError>,
    }

    /// Answers route requests by destination. A destination without a
    /// scripted answer gets `NoRoute`.
    #[derive(Default)]
    struct ScriptedDirections {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<(LngLat, LngLat)>>,
    }

    impl ScriptedDirections {
        fn push(&self, destination: LngLat, result: Result<LineString, DirectionsError>) {
            self.steps.lock().unwrap().push_back(Step {
                destination,
                gate: None,
                result,
            });
        }

        fn push_gated(&self, destination: LngLat, result: Result<LineString, DirectionsError>) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            self.steps.lock().unwrap().push_back(Step {
                destination,
                gate: Some(rx),
                result,
            });
            tx
        }

        fn calls(&self) -> Vec<(LngLat, LngLat)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl DirectionsProvider for ScriptedDirections {
        fn route(
            &self,
            origin: LngLat,
            destination: LngLat,
            _mode: TravelMode,
        ) -> impl Future<Output = Result<LineString, DirectionsError>> + Send {
            self.calls.lock().unwrap().push((origin, destination));
            let step = {
                let mut steps = self.steps.lock().unwrap();
                steps
                    .iter()
                    .position(|step| step.destination == destination)
                    .and_then(|index| steps.remove(index))
            };
            async move {
                let Some(step) = step else {
                    return Err(DirectionsError::NoRoute);
                };
                if let Some(gate) = step.gate {
                    let _ = gate.await;
                }
                step.result
            }
        }
    }

    type Engine = MapSyncEngine<SceneFactory, ScriptedDirections>;

    fn seoul() -> Location {
        Location::new(37.5665, 126.9780)
    }

    fn point(id: &str, lat: f64, lng: f64) -> WifiPoint {
        WifiPoint {
            id: id.to_string(),
            name: format!("AP {}", id),
            address: "Jung-gu, Seoul".to_string(),
            latitude: lat,
            longitude: lng,
            provider: "Seoul".to_string(),
            installation_type: "Public WiFi".to_string(),
            installation_floor: "Unknown".to_string(),
            service_type: "Free public WiFi".to_string(),
            install_date: None,
        }
    }

    fn saved(id: &str, lat: f64, lng: f64) -> SavedWifiEntry {
        SavedWifiEntry {
            id: id.to_string(),
            wifi: point(id, lat, lng),
            origin: seoul(),
            comment: None,
            saved_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    fn path_to(destination: LngLat) -> LineString {
        LineString {
            coordinates: vec![
                seoul().lng_lat(),
                LngLat::new(126.9785, 37.5670),
                destination,
            ],
        }
    }

    fn engine(ready: ReadyMode) -> (Engine, Arc<ScriptedDirections>) {
        let directions = Arc::new(ScriptedDirections::default());
        let engine = MapSyncEngine::new(
            SceneFactory::new(ready),
            Arc::clone(&directions),
            EngineOptions::new("pk.test"),
        );
        (engine, directions)
    }

    async fn ready_engine() -> (Engine, Arc<ScriptedDirections>) {
        let (mut engine, directions) = engine(ReadyMode::Immediate);
        engine.initialize("map", seoul()).unwrap();
        engine.settle().await;
        assert_eq!(engine.state(), EngineState::Ready);
        (engine, directions)
    }

    fn scene_surface(engine: &Engine) -> &SceneSurface {
        engine.surface().expect("surface")
    }

    #[tokio::test]
    async fn test_saved_point_in_results_is_drawn_once() {
        let (mut engine, _) = ready_engine().await;

        engine.set_points(vec![point("a", 37.567, 126.979)], vec![saved("a", 37.567, 126.979)]);

        let scene = scene_surface(&engine).scene();
        assert_eq!(engine.plain_markers().len(), 1);
        assert_eq!(engine.overlay_markers().len(), 0);
        assert_eq!(scene.markers_with_style(MarkerStyle::SavedWifi).len(), 1);
        assert_eq!(scene.markers_with_style(MarkerStyle::Wifi).len(), 0);
    }

    #[tokio::test]
    async fn test_saved_point_outside_results_gets_overlay_marker() {
        let (mut engine, _) = ready_engine().await;

        engine.set_points(vec![], vec![saved("b", 37.57, 126.98)]);

        assert_eq!(engine.plain_markers().len(), 0);
        assert_eq!(engine.overlay_markers().len(), 1);
        assert!(engine.overlay_markers().contains("b"));
    }

    #[tokio::test]
    async fn test_marker_totals() {
        let (mut engine, _) = ready_engine().await;
        let points = vec![
            point("a", 37.561, 126.971),
            point("b", 37.562, 126.972),
            point("c", 37.563, 126.973),
        ];
        let saved = vec![saved("a", 37.561, 126.971), saved("x", 37.57, 126.99)];

        engine.set_points(points, saved);

        let scene = scene_surface(&engine).scene();
        assert_eq!(scene.markers_with_style(MarkerStyle::SavedWifi).len(), 2);
        assert_eq!(scene.markers_with_style(MarkerStyle::Wifi).len(), 2);
        assert_eq!(engine.plain_markers().len() + engine.overlay_markers().len(), 4);
        // wifi markers plus the location marker
        assert_eq!(scene.markers.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_point_list_clears_markers() {
        let (mut engine, _) = ready_engine().await;
        engine.set_points(vec![point("a", 37.561, 126.971)], vec![]);
        engine.set_points(vec![], vec![]);

        assert!(engine.plain_markers().is_empty());
        assert_eq!(scene_surface(&engine).scene().markers_with_style(MarkerStyle::Wifi).len(), 0);
    }

    #[tokio::test]
    async fn test_set_location_keeps_single_location_marker() {
        let (mut engine, _) = ready_engine().await;

        engine.set_location(Location::new(37.50, 127.00));
        engine.set_location(Location::new(37.55, 127.05));

        let scene = scene_surface(&engine).scene();
        let markers = scene.markers_with_style(MarkerStyle::Location);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].spec.position, LngLat::new(127.05, 37.55));
        assert_eq!(scene.center, Some(LngLat::new(127.05, 37.55)));
        assert_eq!(scene.zoom, 14.0);
    }

    #[tokio::test]
    async fn test_operations_before_ready_apply_latest_snapshot() {
        let (mut engine, _) = engine(ReadyMode::Manual);
        let mut readiness = engine.initialize("map", seoul()).unwrap();

        engine.set_points(vec![point("a", 37.561, 126.971)], vec![]);
        engine.set_points(vec![point("b", 37.562, 126.972), point("c", 37.563, 126.973)], vec![]);
        engine.set_location(Location::new(37.56, 126.97));

        assert_eq!(engine.state(), EngineState::Initializing);
        assert!(scene_surface(&engine).scene().markers.is_empty());
        assert!(!readiness.is_ready());

        scene_surface(&engine).emit_loaded();
        engine.drain();

        assert_eq!(engine.state(), EngineState::Ready);
        assert!(readiness.wait().await);
        assert!(!engine.plain_markers().contains("a"));
        assert!(engine.plain_markers().contains("b"));
        assert!(engine.plain_markers().contains("c"));

        let scene = scene_surface(&engine).scene();
        let location = scene.markers_with_style(MarkerStyle::Location);
        assert_eq!(location.len(), 1);
        assert_eq!(location[0].spec.position, LngLat::new(126.97, 37.56));
    }

    #[tokio::test]
    async fn test_selection_draws_route_and_fits_bounds() {
        let (mut engine, directions) = ready_engine().await;
        let target = point("a", 37.57, 126.99);
        directions.push(target.lng_lat(), Ok(path_to(target.lng_lat())));

        engine.set_selection(Some(target.clone()));
        engine.settle().await;

        let scene = scene_surface(&engine).scene();
        assert_eq!(scene.layers.len(), 1);
        assert_eq!(scene.layers[0].id, ROUTE_LAYER_ID);
        assert_eq!(scene.sources[ROUTE_SOURCE_ID], path_to(target.lng_lat()));

        let fit = scene.last_fit.expect("fit bounds");
        assert_eq!(fit.padding, 80);
        assert_eq!(fit.duration_ms, 800);
        assert!(fit.bounds.contains(seoul().lng_lat()));
        assert!(fit.bounds.contains(target.lng_lat()));
        assert_eq!(directions.calls(), vec![(seoul().lng_lat(), target.lng_lat())]);
    }

    #[tokio::test]
    async fn test_clearing_selection_removes_layer_and_source() {
        let (mut engine, directions) = ready_engine().await;
        let target = point("a", 37.57, 126.99);
        directions.push(target.lng_lat(), Ok(path_to(target.lng_lat())));

        engine.set_selection(Some(target));
        engine.settle().await;
        engine.set_selection(None);

        let surface = scene_surface(&engine);
        assert!(!surface.has_layer(ROUTE_LAYER_ID));
        assert!(!surface.has_source(ROUTE_SOURCE_ID));
        assert!(engine.route().is_none());
    }

    #[tokio::test]
    async fn test_latest_selection_wins() {
        let (mut engine, directions) = ready_engine().await;
        let first = point("first", 37.58, 126.95);
        let second = point("second", 37.55, 127.01);
        let _gate = directions.push_gated(first.lng_lat(), Ok(path_to(first.lng_lat())));
        directions.push(second.lng_lat(), Ok(path_to(second.lng_lat())));

        engine.set_selection(Some(first));
        let stale_generation = engine.route_generation();
        engine.set_selection(Some(second.clone()));
        engine.settle().await;

        let drawn = scene_surface(&engine).scene().sources[ROUTE_SOURCE_ID].clone();
        assert_eq!(drawn, path_to(second.lng_lat()));

        engine.dispatch(EngineEvent::RouteResolved {
            generation: stale_generation,
            route: ResolvedRoute {
                line: path_to(LngLat::new(126.95, 37.58)),
                source: RouteSource::Directions,
            },
        });

        let scene = scene_surface(&engine).scene();
        assert_eq!(scene.sources[ROUTE_SOURCE_ID], path_to(second.lng_lat()));
        assert_eq!(scene.layers.len(), 1);
    }

    #[tokio::test]
    async fn test_route_resolving_after_clear_is_ignored() {
        let (mut engine, directions) = ready_engine().await;
        let target = point("a", 37.57, 126.99);
        directions.push(target.lng_lat(), Ok(path_to(target.lng_lat())));

        engine.set_selection(Some(target.clone()));
        let generation = engine.route_generation();
        engine.set_selection(None);

        engine.dispatch(EngineEvent::RouteResolved {
            generation,
            route: ResolvedRoute {
                line: path_to(target.lng_lat()),
                source: RouteSource::Directions,
            },
        });

        assert!(!scene_surface(&engine).has_layer(ROUTE_LAYER_ID));
        assert!(engine.route().is_none());
    }

    #[tokio::test]
    async fn test_directions_failure_draws_straight_line() {
        let (mut engine, directions) = ready_engine().await;
        let target = point("a", 37.57, 126.99);
        directions.push(
            target.lng_lat(),
            Err(DirectionsError::Status {
                status: 500,
                message: "upstream down".to_string(),
            }),
        );

        engine.set_selection(Some(target.clone()));
        engine.settle().await;

        let line = &scene_surface(&engine).scene().sources[ROUTE_SOURCE_ID];
        assert_eq!(line.coordinates.len(), 2);
        assert_eq!(line.coordinates, vec![seoul().lng_lat(), target.lng_lat()]);
        assert_eq!(engine.route().map(|r| r.source), Some(RouteSource::StraightLine));
    }

    #[tokio::test]
    async fn test_location_change_refetches_route_from_new_origin() {
        let (mut engine, directions) = ready_engine().await;
        let target = point("a", 37.57, 126.99);
        directions.push(target.lng_lat(), Ok(path_to(target.lng_lat())));

        engine.set_selection(Some(target.clone()));
        engine.settle().await;
        let fit_before = scene_surface(&engine).scene().last_fit;

        let moved = Location::new(37.54, 126.96);
        engine.set_location(moved.clone());
        engine.settle().await;

        let calls = directions.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], (moved.lng_lat(), target.lng_lat()));
        // no scripted answer left, so the straight line is drawn
        let line = &scene_surface(&engine).scene().sources[ROUTE_SOURCE_ID];
        assert_eq!(line.coordinates, vec![moved.lng_lat(), target.lng_lat()]);
        assert_eq!(scene_surface(&engine).scene().last_fit, fit_before);
    }

    #[tokio::test]
    async fn test_marker_click_invokes_callback() {
        let (mut engine, _) = ready_engine().await;
        let clicked = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&clicked);
        engine.on_select(move |point| sink.lock().unwrap().push(point.id.clone()));

        engine.set_points(vec![point("a", 37.561, 126.971)], vec![saved("z", 37.57, 126.99)]);
        let plain = engine.plain_markers().marker_for("a").unwrap();
        let overlay = engine.overlay_markers().marker_for("z").unwrap();

        scene_surface(&engine).click(plain);
        scene_surface(&engine).click(overlay);
        engine.drain();

        assert_eq!(*clicked.lock().unwrap(), vec!["a".to_string(), "z".to_string()]);
        assert!(engine.selection().is_none());
    }

    #[tokio::test]
    async fn test_marker_click_without_callback_selects() {
        let (mut engine, directions) = ready_engine().await;
        let target = point("a", 37.561, 126.971);
        directions.push(target.lng_lat(), Ok(path_to(target.lng_lat())));
        engine.set_points(vec![target.clone()], vec![]);

        let marker = engine.plain_markers().marker_for("a").unwrap();
        scene_surface(&engine).click(marker);
        engine.settle().await;

        assert_eq!(engine.selection(), Some(&target));
        assert!(scene_surface(&engine).has_layer(ROUTE_LAYER_ID));
    }

    #[tokio::test]
    async fn test_selection_before_ready_is_drawn_on_load() {
        let (mut engine, directions) = engine(ReadyMode::Manual);
        let target = point("a", 37.57, 126.99);
        directions.push(target.lng_lat(), Ok(path_to(target.lng_lat())));

        engine.initialize("map", seoul()).unwrap();
        engine.set_selection(Some(target.clone()));
        while engine.route_pending() {
            engine.step().await;
        }
        assert!(!scene_surface(&engine).has_layer(ROUTE_LAYER_ID));

        scene_surface(&engine).emit_loaded();
        engine.settle().await;

        let scene = scene_surface(&engine).scene();
        assert_eq!(scene.sources[ROUTE_SOURCE_ID], path_to(target.lng_lat()));
        assert!(scene.last_fit.is_some());
    }

    #[tokio::test]
    async fn test_selection_before_initialize_routes_from_initial_location() {
        let (mut engine, directions) = engine(ReadyMode::Manual);
        let target = point("a", 35.12, 129.05);
        let busan = Location::new(35.1151, 129.0415);

        engine.set_selection(Some(target.clone()));
        engine.initialize("map", busan.clone()).unwrap();
        scene_surface(&engine).emit_loaded();
        engine.settle().await;

        let route = engine.route().expect("route");
        assert_eq!(route.line.coordinates[0], busan.lng_lat());
        assert_eq!(
            scene_surface(&engine).scene().sources[ROUTE_SOURCE_ID].coordinates[0],
            busan.lng_lat()
        );
        assert_eq!(directions.calls().last(), Some(&(busan.lng_lat(), target.lng_lat())));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (mut engine, _) = ready_engine().await;
        engine.set_points(vec![point("a", 37.561, 126.971)], vec![]);

        let readiness = engine.initialize("other", Location::new(0.0, 0.0)).unwrap();

        assert!(readiness.is_ready());
        assert_eq!(scene_surface(&engine).scene().container, "map");
        assert_eq!(engine.plain_markers().len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_failure_is_returned() {
        let directions = Arc::new(ScriptedDirections::default());
        let mut engine = MapSyncEngine::new(SceneFactory::default(), directions, EngineOptions::new(""));

        let result = engine.initialize("map", seoul());

        assert!(matches!(result, Err(SurfaceError::MissingAccessToken)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[tokio::test]
    async fn test_viewport_center_as_location() {
        let (mut engine, _) = engine(ReadyMode::Manual);
        assert!(engine.request_viewport_center_as_location().is_none());

        engine.initialize("map", seoul()).unwrap();
        let center = engine.request_viewport_center_as_location().unwrap();
        assert_eq!(center, seoul());
    }

    #[tokio::test]
    async fn test_teardown_is_safe_to_repeat() {
        let (mut engine, _) = engine(ReadyMode::Immediate);
        engine.teardown();
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine.initialize("map", seoul()).unwrap();
        engine.settle().await;
        engine.set_points(vec![point("a", 37.561, 126.971)], vec![saved("b", 37.57, 126.99)]);

        engine.teardown();
        let generation = engine.route_generation();
        engine.teardown();

        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(engine.plain_markers().is_empty());
        assert!(engine.overlay_markers().is_empty());
        assert!(engine.location_marker().is_none());
        assert_eq!(engine.route_generation(), generation);
        assert!(!engine.readiness().is_ready());
    }

    #[tokio::test]
    async fn test_events_from_torn_down_surface_are_ignored() {
        let (mut engine, _) = engine(ReadyMode::Manual);
        engine.initialize("map", seoul()).unwrap();
        engine.teardown();
        engine.initialize("map", seoul()).unwrap();

        engine.dispatch(EngineEvent::Surface {
            epoch: 1,
            event: SurfaceEvent::Loaded,
        });
        assert_eq!(engine.state(), EngineState::Initializing);

        scene_surface(&engine).emit_loaded();
        engine.drain();
        assert_eq!(engine.state(), EngineState::Ready);
    }
}
