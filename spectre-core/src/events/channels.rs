//! Event channel factories and handles.
//!
//! Provides factory functions for creating event channels with appropriate
//! buffer sizes for the relay and scanner outputs.

use super::types::ScannedEvent;
use crate::relayer::RelayError;
use compact_str::CompactString;
use tokio::sync::mpsc;

/// Default buffer size for event channels.
///
/// Absorbs a burst of events from one scanned chunk while the consumer
/// catches up.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for decoded chain events.
pub type ScannedEventSender = mpsc::Sender<ScannedEvent>;
/// Receiver handle for decoded chain events.
pub type ScannedEventReceiver = mpsc::Receiver<ScannedEvent>;

/// Sender handle for asset pairs that were successfully relayed.
pub type RelaySuccessSender = mpsc::Sender<CompactString>;
/// Receiver handle for asset pairs that were successfully relayed.
pub type RelaySuccessReceiver = mpsc::Receiver<CompactString>;

/// Sender handle for relay errors and skips.
pub type RelayErrorSender = mpsc::Sender<RelayError>;
/// Receiver handle for relay errors and skips.
pub type RelayErrorReceiver = mpsc::Receiver<RelayError>;

/// Create a new ScannedEvent channel.
///
/// Both scanner routines share clones of the returned sender.
pub fn scanned_event_channel() -> (ScannedEventSender, ScannedEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new relay success channel.
pub fn relay_success_channel() -> (RelaySuccessSender, RelaySuccessReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a new relay error channel.
pub fn relay_error_channel() -> (RelayErrorSender, RelayErrorReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
