//! Realtime fan-out to connected viewers.

pub mod broadcaster;
pub mod model;
pub mod registry;
pub mod ws;

pub use broadcaster::EventBroadcaster;
pub use model::{AutoResponse, RealtimeEvent, StatusUpdate};
pub use registry::{SessionHandle, SessionRegistry};
pub use ws::realtime_routes;
