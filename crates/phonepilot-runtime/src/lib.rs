//! Transport adapters between the PhonePilot console and the agent server.
//!
//! - [`transport`]: the `DeviceTransport` contract the console consumes
//! - [`http`]: REST + SSE implementation against the agent server
//! - [`sse`]: incremental Server-Sent Events frame parser
//! - [`live_view`]: WebSocket live video client with fallback signalling

pub mod http;
pub mod live_view;
pub mod sse;
pub mod transport;

pub use http::HttpTransport;
pub use transport::{DeviceTransport, EventReceiver, TransportError, TransportResult};
