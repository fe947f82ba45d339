//! One connection to an ECG device, from connect to teardown.
//!
//! A session connects the transport, reads the polling rate, builds a
//! pipeline for that rate and then forwards notifications into it until the
//! device goes away or a disconnect is requested. Results reach the caller as
//! `SessionUpdate`s on a std channel.

use crate::codec::{decode_polling_rate, encode_polling_rate};
use crate::config::Config;
use crate::error::{ConnectionError, PipelineError};
use crate::pipeline::{EcgSink, Pipeline};
use crate::recorder::Recorder;
use crate::transport::{Transport, TransportEvent};
use std::sync::mpsc::Sender;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    ConnectionStatus(ConnectionStatus),
    /// Current polling rate of the device in Hz
    PollingRate(u16),
    Sample(f64),
    HeartRate(u32),
    /// Pipeline drained; no samples or heart rates follow
    StreamComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error(String),
}

/// Requests handled by a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    SetPollingRate(u16),
    Disconnect,
}

/// Forwards pipeline output to the update channel
#[derive(Clone)]
pub struct ChannelSink {
    sender: Sender<SessionUpdate>,
}

impl ChannelSink {
    pub fn new(sender: Sender<SessionUpdate>) -> Self {
        Self { sender }
    }

    fn send(&self, update: SessionUpdate) {
        if self.sender.send(update).is_err() {
            log::trace!("Session update dropped: receiver gone");
        }
    }
}

impl EcgSink for ChannelSink {
    fn on_sample(&mut self, millivolts: f64) {
        self.send(SessionUpdate::Sample(millivolts));
    }

    fn on_heart_rate(&mut self, bpm: u32) {
        self.send(SessionUpdate::HeartRate(bpm));
    }

    fn on_complete(&mut self) {
        self.send(SessionUpdate::StreamComplete);
    }
}

enum Step {
    Command(Option<SessionCommand>),
    Event(Option<TransportEvent>),
}

/// Runs a session to completion. Must be spawned on a multi-threaded
/// runtime since frames are pushed into the pipeline's bounded links.
pub async fn run_session(
    mut transport: Box<dyn Transport>,
    config: Config,
    updates: Sender<SessionUpdate>,
    mut commands: UnboundedReceiver<SessionCommand>,
) {
    let sink = ChannelSink::new(updates);
    sink.send(SessionUpdate::ConnectionStatus(ConnectionStatus::Connecting));

    let pipeline = match start(transport.as_mut(), &config, &sink).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("{}", e);
            if let Err(e) = transport.disconnect().await {
                log::warn!("Disconnect after failed start: {}", e);
            }
            sink.send(SessionUpdate::ConnectionStatus(ConnectionStatus::Error(
                e.to_string(),
            )));
            return;
        }
    };

    let pipeline = stream(transport.as_mut(), pipeline, &sink, &mut commands).await;

    // Joining the stage threads blocks.
    let closed = tokio::task::spawn_blocking(move || {
        let mut pipeline = pipeline;
        pipeline.close();
    })
    .await;
    if closed.is_err() {
        log::error!("Pipeline teardown panicked");
    }

    log::info!("Session ended");
    sink.send(SessionUpdate::ConnectionStatus(ConnectionStatus::Disconnected));
}

async fn start(
    transport: &mut dyn Transport,
    config: &Config,
    sink: &ChannelSink,
) -> Result<Pipeline, ConnectionError> {
    transport.connect().await?;
    sink.send(SessionUpdate::ConnectionStatus(ConnectionStatus::Connected));

    let payload = transport.read_polling_rate().await?;
    let polling_rate = decode_polling_rate(&payload)?;
    log::info!("Device polling rate: {} Hz", polling_rate);
    sink.send(SessionUpdate::PollingRate(polling_rate));

    let recorder = config.recording.enabled.then(|| {
        Recorder::new(
            config.recording.directory.clone(),
            config.recording.update_header_on_close,
        )
    });
    let pipeline = Pipeline::new(
        &config.pipeline,
        polling_rate,
        Box::new(sink.clone()),
        recorder,
    )?;
    Ok(pipeline)
}

async fn stream(
    transport: &mut dyn Transport,
    mut pipeline: Pipeline,
    sink: &ChannelSink,
    commands: &mut UnboundedReceiver<SessionCommand>,
) -> Pipeline {
    loop {
        let step = tokio::select! {
            command = commands.recv() => Step::Command(command),
            event = transport.next_event() => Step::Event(event),
        };

        match step {
            Step::Command(Some(SessionCommand::SetPollingRate(rate))) => {
                log::info!("Requesting polling rate {} Hz", rate);
                if let Err(e) = transport.write_polling_rate(encode_polling_rate(rate)).await {
                    log::error!("Failed to set polling rate: {}", e);
                }
            }
            Step::Command(Some(SessionCommand::Disconnect)) | Step::Command(None) => {
                log::info!("Disconnect requested");
                if let Err(e) = transport.disconnect().await {
                    log::warn!("Disconnect failed: {}", e);
                }
                break;
            }
            Step::Event(Some(TransportEvent::Notification(frame))) => {
                match tokio::task::block_in_place(|| pipeline.push_frame(&frame)) {
                    Ok(()) => {}
                    Err(PipelineError::Codec(e)) => log::warn!("Dropping frame: {}", e),
                    Err(e) => {
                        log::error!("Pipeline stopped accepting frames: {}", e);
                        break;
                    }
                }
            }
            Step::Event(Some(TransportEvent::PollingRate(payload))) => {
                let rate = match decode_polling_rate(&payload) {
                    Ok(rate) => rate,
                    Err(e) => {
                        log::warn!("Ignoring polling rate notification: {}", e);
                        continue;
                    }
                };
                match tokio::task::block_in_place(|| pipeline.set_sampling_rate(rate)) {
                    Ok(()) => sink.send(SessionUpdate::PollingRate(rate)),
                    Err(e) => log::warn!("Ignoring polling rate {} Hz: {}", rate, e),
                }
            }
            Step::Event(Some(TransportEvent::Disconnected)) | Step::Event(None) => {
                log::info!("Device disconnected");
                break;
            }
        }
    }
    pipeline
}
