use clap::{Parser, Subcommand};
use ecg_stream::config::Config;
use ecg_stream::connection::{ConnectionCommand, ConnectionManager, TransportFactory};
use ecg_stream::recorder::list_recordings;
use ecg_stream::replay::{heart_rates, Replay};
use ecg_stream::session::{ConnectionStatus, SessionUpdate};
use ecg_stream::simulator::{Simulator, Waveform};
use ecg_stream::transport::SimulatedTransport;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "ecg-stream")]
#[command(author, version, about = "ECG streaming, heart rate detection and recording")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream from the simulated device and print heart rates
    Simulate {
        /// How long to stream
        #[arg(short, long, default_value_t = 30)]
        seconds: u64,

        /// Heart rate of the simulated signal (overrides the config waveform)
        #[arg(long)]
        bpm: Option<u32>,

        /// Polling rate requested at connect
        #[arg(short, long)]
        rate: Option<u16>,

        /// Polling rate to switch to halfway through
        #[arg(long, value_name = "HZ")]
        switch_rate: Option<u16>,

        /// Do not write an .ecg recording
        #[arg(long, default_value_t = false)]
        no_record: bool,
    },

    /// Print a summary and the heart rates of a recording
    Replay {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List recordings, newest first
    List {
        /// Directory to search (defaults to the recording directory)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Simulate {
            seconds,
            bpm,
            rate,
            switch_rate,
            no_record,
        } => simulate(config, seconds, bpm, rate, switch_rate, no_record),
        Commands::Replay { file } => replay(&config, file),
        Commands::List { dir } => list(dir.unwrap_or(config.recording.directory)),
    }
}

fn simulate(
    mut config: Config,
    seconds: u64,
    bpm: Option<u32>,
    rate: Option<u16>,
    switch_rate: Option<u16>,
    no_record: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(bpm) = bpm {
        config.simulator.waveform = Waveform::Heartbeat { bpm };
    }
    if let Some(rate) = rate {
        config.simulator.polling_rate = rate;
    }
    if no_record {
        config.recording.enabled = false;
    }

    let simulator_config = config.simulator.clone();
    let factory: TransportFactory = Box::new(move || {
        let simulator = Simulator::new(simulator_config.waveform, simulator_config.polling_rate);
        Box::new(SimulatedTransport::new(simulator).realtime(simulator_config.realtime))
    });

    // Create a channel for updates from the session
    let (sender, receiver) = mpsc::channel::<SessionUpdate>();
    let (manager, commands) = ConnectionManager::new(config, factory, sender);

    // Spawn a thread to handle connection requests
    let manager_thread = std::thread::spawn(move || {
        manager.run();
    });

    commands.send(ConnectionCommand::Connect)?;

    let started = Instant::now();
    let deadline = started + Duration::from_secs(seconds);
    let mut switch_rate = switch_rate;
    let mut samples = 0usize;
    let mut last_bpm = None;

    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        if let Some(rate) = switch_rate {
            if started.elapsed() >= Duration::from_secs(seconds) / 2 {
                commands.send(ConnectionCommand::SetPollingRate(rate))?;
                switch_rate = None;
            }
        }
        match receiver.recv_timeout(remaining.min(Duration::from_millis(250))) {
            Ok(update) => {
                if !report(update, &mut samples, &mut last_bpm) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    commands.send(ConnectionCommand::Disconnect)?;
    drop(commands);
    if manager_thread.join().is_err() {
        log::error!("Connection manager thread panicked");
    }
    for update in receiver.try_iter() {
        report(update, &mut samples, &mut last_bpm);
    }

    println!(
        "Received {} samples, last heart rate: {}",
        samples,
        last_bpm.map_or_else(|| "-".to_string(), |bpm: u32| format!("{} bpm", bpm))
    );
    Ok(())
}

/// Prints one update. Returns false once the session is over.
fn report(update: SessionUpdate, samples: &mut usize, last_bpm: &mut Option<u32>) -> bool {
    match update {
        SessionUpdate::Sample(_) => *samples += 1,
        SessionUpdate::HeartRate(bpm) => {
            println!("Heart rate: {} bpm", bpm);
            *last_bpm = Some(bpm);
        }
        SessionUpdate::PollingRate(rate) => println!("Polling rate: {} Hz", rate),
        SessionUpdate::StreamComplete => log::debug!("Stream complete"),
        SessionUpdate::ConnectionStatus(status) => {
            println!("Connection: {:?}", status);
            return !matches!(
                status,
                ConnectionStatus::Disconnected | ConnectionStatus::Error(_)
            );
        }
    }
    true
}

fn replay(config: &Config, file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let replay = Replay::open(&file, &config.pipeline)?;
    let rate = replay.sampling_rate();
    let header_count = replay.samples_count();

    let (count, min, max) = replay.fold((0usize, f64::INFINITY, f64::NEG_INFINITY), |(n, lo, hi), v| {
        (n + 1, lo.min(v), hi.max(v))
    });

    println!("File:          {}", file.display());
    println!("Sampling rate: {} Hz", rate);
    println!("Samples:       {} (header: {})", count, header_count);
    if rate > 0 {
        println!("Duration:      {:.1} s", count as f64 / f64::from(rate));
    }
    if count > 0 {
        println!("Range:         {:.3} mV to {:.3} mV", min, max);
    }

    let rates = heart_rates(&file, &config.pipeline)?;
    if rates.is_empty() {
        println!("Heart rate:    no beats detected");
    } else {
        let mean = rates.iter().map(|&r| f64::from(r)).sum::<f64>() / rates.len() as f64;
        println!(
            "Heart rate:    {} beats, mean {:.0} bpm, min {} bpm, max {} bpm",
            rates.len() + 1,
            mean,
            rates.iter().min().copied().unwrap_or_default(),
            rates.iter().max().copied().unwrap_or_default()
        );
    }
    Ok(())
}

fn list(dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let recordings = list_recordings(&dir)?;
    if recordings.is_empty() {
        println!("No recordings in {}", dir.display());
        return Ok(());
    }
    for recording in recordings {
        println!(
            "{}  {:>5} Hz  {:>8.1} s  {}",
            recording.modified.format("%Y-%m-%d %H:%M:%S"),
            recording.sampling_rate,
            recording.duration_seconds(),
            recording.path.display()
        );
    }
    Ok(())
}
