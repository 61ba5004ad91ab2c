//! Map synchronization.
//!
//! - [`surface`]: the capability set a mapping backend implements
//! - [`scene`]: an in-memory backend, serializable for thin renderers
//! - [`reconcile`]: keyed marker diffing
//! - [`route`]: directions client and straight-line fallback
//! - [`engine`]: the state machine tying them together

pub mod engine;
pub mod reconcile;
pub mod route;
pub mod scene;
pub mod surface;

pub use engine::{EngineEvent, EngineOptions, EngineState, MapSyncEngine, Readiness};
pub use route::{DirectionsProvider, MapboxDirections, TravelMode};
pub use scene::{ReadyMode, Scene, SceneFactory, SceneSurface};
pub use surface::{MapSurface, SurfaceFactory};
