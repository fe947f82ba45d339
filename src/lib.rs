//! Streaming ECG acquisition: frame decoding, filtering, QRS detection,
//! heart rate and `.ecg` recording.
//!
//! Data enters as 20-byte notification frames through a [`transport::Transport`]
//! or [`pipeline::Pipeline::push_frame`] and leaves as millivolt samples and
//! heart rates through a [`pipeline::EcgSink`].

pub mod codec;
pub mod config;
pub mod connection;
pub mod downsample;
pub mod ecg_file;
pub mod error;
pub mod filters;
pub mod heart_rate;
pub mod pipeline;
pub mod qrs;
pub mod recorder;
pub mod replay;
pub mod session;
pub mod simulator;
pub mod transport;
