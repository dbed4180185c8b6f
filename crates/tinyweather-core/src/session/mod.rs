//! Station Session
//!
//! The [`SessionController`] state machine and the [`TelemetrySink`]s it
//! delivers readings to.
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> AwaitingFrame
//!       ^              |                          |
//!       +--- Faulted <-+--------------------------+
//! ```

mod backoff;
mod controller;
pub mod sink;
mod state;

pub use backoff::Backoff;
pub use controller::{SessionController, SessionHandle, INTER_FRAME_GAP};
pub use sink::{ChannelSink, JsonLinesSink, TelemetrySink};
pub use state::SessionState;
