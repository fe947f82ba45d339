//! # Connection Management Module
//!
//! Owns the device connection lifecycle. Runs on a dedicated thread with its
//! own Tokio runtime so callers (CLI or UI) never block on transport I/O.
//!
//! ## Key Components
//! - `ConnectionManager`: command loop that starts and stops sessions
//! - `ConnectionCommand`: requests sent from the caller's thread
//! - `TransportFactory`: builds a fresh transport for every connection
//!
//! At most one session is active. A session is dropped on disconnect, either
//! requested or reported by the device, and a new `Connect` starts from a
//! fresh transport and pipeline.

use crate::config::Config;
use crate::error::ConnectionError;
use crate::session::{run_session, ConnectionStatus, SessionCommand, SessionUpdate};
use crate::transport::Transport;
use std::sync::mpsc;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCommand {
    Connect,
    Disconnect,
    SetPollingRate(u16),
}

pub type TransportFactory = Box<dyn FnMut() -> Box<dyn Transport> + Send>;

struct ActiveSession {
    commands: UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Manages the connection lifecycle of one ECG device.
pub struct ConnectionManager {
    command_receiver: mpsc::Receiver<ConnectionCommand>,
    update_sender: mpsc::Sender<SessionUpdate>,
    transport_factory: TransportFactory,
    config: Config,
}

impl ConnectionManager {
    /// Creates a new ConnectionManager.
    ///
    /// Returns the manager and a sender for issuing commands from the caller's thread.
    pub fn new(
        config: Config,
        transport_factory: TransportFactory,
        update_sender: mpsc::Sender<SessionUpdate>,
    ) -> (Self, mpsc::Sender<ConnectionCommand>) {
        let (command_sender, command_receiver) = mpsc::channel();

        let manager = ConnectionManager {
            command_receiver,
            update_sender,
            transport_factory,
            config,
        };

        (manager, command_sender)
    }

    /// Runs the command loop until the command channel is closed, then
    /// disconnects any active session and waits for its teardown.
    ///
    /// Call this from a spawned thread.
    pub fn run(mut self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = ConnectionError::RuntimeCreation(e.to_string());
                log::error!("{}", error);
                let _ = self.update_sender.send(SessionUpdate::ConnectionStatus(
                    ConnectionStatus::Error(error.to_string()),
                ));
                return;
            }
        };

        let mut session: Option<ActiveSession> = None;

        while let Ok(command) = self.command_receiver.recv() {
            if session.as_ref().map_or(false, |s| !s.is_running()) {
                session = None;
            }

            match command {
                ConnectionCommand::Connect => {
                    if session.is_some() {
                        log::warn!("Connection manager: already connected, ignoring connect");
                        continue;
                    }
                    log::info!("Connection manager: connecting");

                    let (commands, command_rx) = unbounded_channel();
                    let task = rt.spawn(run_session(
                        (self.transport_factory)(),
                        self.config.clone(),
                        self.update_sender.clone(),
                        command_rx,
                    ));
                    session = Some(ActiveSession { commands, task });
                }
                ConnectionCommand::Disconnect => {
                    log::info!("Connection manager: disconnect requested");
                    if let Some(active) = session.take() {
                        Self::shut_down(&rt, active);
                    }
                }
                ConnectionCommand::SetPollingRate(rate) => match &session {
                    Some(active) => {
                        let _ = active.commands.send(SessionCommand::SetPollingRate(rate));
                    }
                    None => log::warn!("Connection manager: no session for polling rate {} Hz", rate),
                },
            }
        }

        log::info!("Connection manager: command channel closed, shutting down");
        if let Some(active) = session.take() {
            Self::shut_down(&rt, active);
        }
    }

    /// Asks the session to disconnect and waits until its pipeline is closed.
    fn shut_down(rt: &Runtime, session: ActiveSession) {
        let _ = session.commands.send(SessionCommand::Disconnect);
        if rt.block_on(session.task).is_err() {
            log::error!("Connection manager: session task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{Simulator, Waveform};
    use crate::transport::SimulatedTransport;
    use std::thread;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(20);

    fn test_config() -> Config {
        let mut config = Config::default();
        config.recording.enabled = false;
        config
    }

    fn spawn_manager(
        config: Config,
        factory: TransportFactory,
    ) -> (
        mpsc::Sender<ConnectionCommand>,
        mpsc::Receiver<SessionUpdate>,
        thread::JoinHandle<()>,
    ) {
        let (update_sender, update_receiver) = mpsc::channel();
        let (manager, command_sender) = ConnectionManager::new(config, factory, update_sender);
        let handle = thread::spawn(move || manager.run());
        (command_sender, update_receiver, handle)
    }

    /// Collects updates until `done` matches one, which is included.
    fn collect_until(
        updates: &mpsc::Receiver<SessionUpdate>,
        done: impl Fn(&SessionUpdate) -> bool,
    ) -> Vec<SessionUpdate> {
        let mut collected = Vec::new();
        loop {
            let update = updates.recv_timeout(TIMEOUT).expect("Timed out waiting for update");
            let finished = done(&update);
            collected.push(update);
            if finished {
                return collected;
            }
        }
    }

    fn is_status(update: &SessionUpdate, status: &ConnectionStatus) -> bool {
        matches!(update, SessionUpdate::ConnectionStatus(s) if s == status)
    }

    #[test]
    fn test_connection_manager_creation() {
        let (update_sender, _update_receiver) = mpsc::channel();
        let factory: TransportFactory = Box::new(|| {
            Box::new(SimulatedTransport::new(Simulator::new(Waveform::Sine, 500)))
        });
        let (_manager, command_sender) = ConnectionManager::new(test_config(), factory, update_sender);

        // Verify we can send commands
        assert!(command_sender.send(ConnectionCommand::Disconnect).is_ok());
    }

    #[test]
    fn test_session_streams_until_device_disconnects() {
        let factory: TransportFactory = Box::new(|| {
            let simulator = Simulator::new(Waveform::Heartbeat { bpm: 60 }, 500);
            Box::new(SimulatedTransport::new(simulator).with_frame_limit(600))
        });
        let (commands, updates, handle) = spawn_manager(test_config(), factory);

        commands.send(ConnectionCommand::Connect).unwrap();
        let collected = collect_until(&updates, |u| is_status(u, &ConnectionStatus::Disconnected));

        assert!(is_status(&collected[0], &ConnectionStatus::Connecting));
        assert!(is_status(&collected[1], &ConnectionStatus::Connected));
        assert_eq!(collected[2], SessionUpdate::PollingRate(500));

        let samples = collected
            .iter()
            .filter(|u| matches!(u, SessionUpdate::Sample(_)))
            .count();
        assert_eq!(samples, 600 * 16);

        let rates: Vec<u32> = collected
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::HeartRate(bpm) => Some(*bpm),
                _ => None,
            })
            .collect();
        assert!(!rates.is_empty());
        assert!(rates.iter().all(|&bpm| bpm == 60), "{:?}", rates);

        let complete = collected
            .iter()
            .position(|u| *u == SessionUpdate::StreamComplete)
            .expect("No completion");
        assert_eq!(complete, collected.len() - 2);

        drop(commands);
        handle.join().unwrap();
    }

    #[test]
    fn test_polling_rate_change_and_disconnect() {
        let factory: TransportFactory = Box::new(|| {
            let simulator = Simulator::new(Waveform::Sine, 500);
            Box::new(SimulatedTransport::new(simulator).realtime(true))
        });
        let (commands, updates, handle) = spawn_manager(test_config(), factory);

        commands.send(ConnectionCommand::Connect).unwrap();
        collect_until(&updates, |u| *u == SessionUpdate::PollingRate(500));

        commands.send(ConnectionCommand::SetPollingRate(250)).unwrap();
        collect_until(&updates, |u| *u == SessionUpdate::PollingRate(250));

        commands.send(ConnectionCommand::Disconnect).unwrap();
        let tail = collect_until(&updates, |u| is_status(u, &ConnectionStatus::Disconnected));
        assert!(tail.contains(&SessionUpdate::StreamComplete));

        drop(commands);
        handle.join().unwrap();
    }

    #[test]
    fn test_connect_failure_reports_error() {
        let factory: TransportFactory = Box::new(|| {
            Box::new(SimulatedTransport::unavailable(Simulator::new(Waveform::Sine, 500)))
        });
        let (commands, updates, handle) = spawn_manager(test_config(), factory);

        commands.send(ConnectionCommand::Connect).unwrap();
        let collected = collect_until(&updates, |u| {
            matches!(u, SessionUpdate::ConnectionStatus(ConnectionStatus::Error(_)))
        });
        assert!(is_status(&collected[0], &ConnectionStatus::Connecting));
        match collected.last() {
            Some(SessionUpdate::ConnectionStatus(ConnectionStatus::Error(message))) => {
                assert!(message.contains("Bluetooth"))
            }
            other => panic!("unexpected update {:?}", other),
        }

        drop(commands);
        handle.join().unwrap();
    }

    #[test]
    fn test_shutdown_tears_down_active_session() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.recording.directory = temp_dir.path().to_path_buf();

        let factory: TransportFactory = Box::new(|| {
            let simulator = Simulator::new(Waveform::Sine, 500);
            Box::new(SimulatedTransport::new(simulator).realtime(true))
        });
        let (commands, updates, handle) = spawn_manager(config, factory);

        commands.send(ConnectionCommand::Connect).unwrap();
        collect_until(&updates, |u| matches!(u, SessionUpdate::Sample(_)));
        drop(commands);
        handle.join().unwrap();

        let tail: Vec<SessionUpdate> = updates.try_iter().collect();
        assert!(tail.contains(&SessionUpdate::StreamComplete));
        let recordings = crate::recorder::list_recordings(temp_dir.path()).unwrap();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].sampling_rate, 500);
    }
}
