//! PhonePilot console core.
//!
//! Keeps an isolated conversation/display state per device, folds agent
//! task streams into it, and arbitrates between the live video and the
//! screenshot-polling fallback.
//!
//! - [`store`]: copy-on-write per-device state store
//! - [`stream`]: task stream multiplexer and its cancellation handle
//! - [`arbiter`]: display-mode arbitration and screenshot polling
//! - [`roster`]: periodic device list refresh and auto-selection
//! - [`console`]: the facade presentation layers drive

pub mod arbiter;
pub mod console;
pub mod roster;
pub mod state;
pub mod store;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use console::{Console, ConsoleError, ConsoleResult};
pub use state::{DeviceState, DeviceStatePatch, TapFeedback};
pub use store::{DeviceStore, StoreSnapshot};
pub use stream::{StreamHandle, StreamMultiplexer};
