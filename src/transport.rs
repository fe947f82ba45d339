//! # Transport Module
//!
//! Boundary to the device link. A transport connects to one ECG device,
//! exposes the polling-rate characteristic and yields notification events.
//! Discovery, pairing and permissions are the transport's own business.
//!
//! `SimulatedTransport` stands in for a real device and is what the CLI and
//! tests use.

use crate::codec::{decode_polling_rate, encode_polling_rate};
use crate::error::TransportError;
use crate::simulator::Simulator;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::time::Instant;

/// GATT service exposing the ECG characteristics
pub const ECG_SERVICE_UUID: &str = "2a264ccf-a9ca-4097-8efd-c5b6fba390a6";
/// Notify characteristic carrying 20-byte sample frames
pub const ECG_SIGNAL_CHAR_UUID: &str = "2a264cdf-a9ca-4097-8efd-c5b6fba390a6";
/// Read/write/notify characteristic holding the polling rate (u16 LE)
pub const POLLING_RATE_CHAR_UUID: &str = "2a264cef-a9ca-4097-8efd-c5b6fba390a6";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw value of the signal characteristic
    Notification(Vec<u8>),
    /// Raw value of the polling-rate characteristic after it changed
    PollingRate(Vec<u8>),
    /// Device dropped the connection
    Disconnected,
}

#[async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn read_polling_rate(&mut self) -> Result<Vec<u8>, TransportError>;

    async fn write_polling_rate(&mut self, payload: [u8; 2]) -> Result<(), TransportError>;

    /// Waits for the next event. `None` once the connection is gone and no
    /// events remain.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Device stand-in driven by a [`Simulator`]
#[derive(Debug)]
pub struct SimulatedTransport {
    simulator: Simulator,
    available: bool,
    powered_off: bool,
    connected: bool,
    realtime: bool,
    frame_limit: Option<usize>,
    frames_sent: usize,
    pending: VecDeque<TransportEvent>,
    next_frame_at: Option<Instant>,
}

impl SimulatedTransport {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            simulator,
            available: true,
            powered_off: false,
            connected: false,
            realtime: false,
            frame_limit: None,
            frames_sent: 0,
            pending: VecDeque::new(),
            next_frame_at: None,
        }
    }

    /// Pace frames at the simulator's polling rate instead of as fast as
    /// they are requested
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Report a device disconnect after `frames` frames. The device stays
    /// off afterwards and cannot be reconnected.
    pub fn with_frame_limit(mut self, frames: usize) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// A transport whose adapter is missing; `connect` always fails
    pub fn unavailable(simulator: Simulator) -> Self {
        Self {
            available: false,
            ..Self::new(simulator)
        }
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if !self.available {
            return Err(TransportError::NoAdapter);
        }
        if self.powered_off {
            return Err(TransportError::ConnectionFailed(format!(
                "no device advertising service {}",
                ECG_SERVICE_UUID
            )));
        }
        self.connected = true;
        self.next_frame_at = None;
        log::info!(
            "Simulated device connected ({} Hz, {:?})",
            self.simulator.polling_rate(),
            self.simulator.waveform()
        );
        log::debug!("Subscribed to {}", ECG_SIGNAL_CHAR_UUID);
        Ok(())
    }

    async fn read_polling_rate(&mut self) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        Ok(encode_polling_rate(self.simulator.polling_rate()).to_vec())
    }

    async fn write_polling_rate(&mut self, payload: [u8; 2]) -> Result<(), TransportError> {
        self.ensure_connected()?;
        let rate = decode_polling_rate(&payload).map_err(|e| {
            TransportError::Characteristic(format!("{}: {}", POLLING_RATE_CHAR_UUID, e))
        })?;
        if rate == 0 {
            return Err(TransportError::Characteristic(format!(
                "{}: polling rate must be positive",
                POLLING_RATE_CHAR_UUID
            )));
        }
        self.simulator.set_polling_rate(rate);
        // The device notifies the new value like the real firmware does.
        self.pending
            .push_back(TransportEvent::PollingRate(payload.to_vec()));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if !self.connected {
            return None;
        }
        if self.frame_limit.map_or(false, |limit| self.frames_sent >= limit) {
            self.connected = false;
            self.powered_off = true;
            return Some(TransportEvent::Disconnected);
        }

        if self.realtime {
            let due = *self.next_frame_at.get_or_insert_with(Instant::now);
            tokio::time::sleep_until(due).await;
            self.next_frame_at = Some(due + self.simulator.frame_interval());
        }

        let frame = self.simulator.next()?;
        self.frames_sent += 1;
        Some(TransportEvent::Notification(frame.to_vec()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.pending.clear();
        Ok(())
    }
}
