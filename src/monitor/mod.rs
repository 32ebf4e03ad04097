//! Session monitoring module
//! Follows engine sessions and relays their output to destinations

pub mod chunker;
pub mod connector;
pub mod decoder;
pub mod error;
pub mod poller;
pub mod registry;
pub mod router;
pub mod service;
pub mod state;

pub use connector::{ConnectorExit, ReconnectPolicy, StreamConnector};
pub use decoder::{EngineEvent, EventStream, FrameDecoder};
pub use error::MonitorError;
pub use poller::{FallbackPoller, PollReport};
pub use registry::SessionRegistry;
pub use router::{EventRouter, RouteAction};
pub use service::{MonitorSettings, SessionMonitor};
pub use state::{MonitorMode, SessionInfo};
