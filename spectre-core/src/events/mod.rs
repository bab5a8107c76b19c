//! Event types and channel plumbing.
//!
//! # Event Flow
//!
//! 1. Feeders -> `RelayEngine::collect` -> per-pair buffers
//! 2. Relay ticker emits the asset pair on success or a `RelayError` on
//!    failure/skip through the observer channels
//! 3. `EventScanner` emits `ScannedEvent` -> external transport
//!
//! Observer channels are optional; a missing sender discards the output.

pub mod channels;
pub mod types;

pub use channels::{
    relay_error_channel, relay_success_channel, scanned_event_channel, RelayErrorReceiver,
    RelayErrorSender, RelaySuccessReceiver, RelaySuccessSender, ScannedEventReceiver,
    ScannedEventSender, DEFAULT_CHANNEL_BUFFER,
};

pub use types::{ScannedEvent, TeleportGuid};
