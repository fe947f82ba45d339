//! # Error Types Module
//!
//! Centralized error handling for the ECG streaming pipeline.
//! Provides custom error types for each module with proper context and error chaining.
//!
//! ## Error Types
//! - `CodecError`: Malformed transport frames and polling-rate payloads
//! - `FilterError`: Filter design parameters that cannot be realized
//! - `EcgFileError`: ECG file I/O, invalid files and handle misuse
//! - `PipelineError`: Pipeline construction and frame submission failures
//! - `TransportError`: Failures reported by the transport collaborator
//! - `ConnectionError`: Session lifecycle failures
//! - `ConfigError`: Configuration file I/O and parsing errors
//!
//! ## Usage Examples
//! ```rust,ignore
//! // Codec rejects frames that are not exactly 20 bytes
//! pub fn decode(frame: &[u8]) -> Result<Message, CodecError> { ... }
//!
//! // File store surfaces invalid headers and misuse of a handle
//! pub fn open(path: impl AsRef<Path>) -> Result<EcgFile, EcgFileError> { ... }
//! ```
//!
//! Malformed input and resource-state violations are distinct variants so the
//! caller can reject a single frame or file without tearing the stream down.

use std::fmt;

/// Errors produced while decoding wire payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Frame length does not match the packed message layout
    InvalidFrameSize { expected: usize, actual: usize },
    /// Polling-rate characteristic value is not two bytes long
    InvalidPollingRate { actual: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidFrameSize { expected, actual } => {
                write!(f, "Invalid frame size: expected {} bytes, got {}", expected, actual)
            }
            CodecError::InvalidPollingRate { actual } => {
                write!(f, "Invalid polling rate payload: expected 2 bytes, got {}", actual)
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors that can occur while designing a filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// Cutoff frequency must lie strictly between 0 and the Nyquist frequency
    InvalidCutoff { cutoff_hz: f64, sample_rate: f64 },
    /// Band-pass edges are not ordered low < high
    InvalidBand { low_hz: f64, high_hz: f64 },
    /// A filter needs at least one second-order section
    NoSections,
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::InvalidCutoff { cutoff_hz, sample_rate } => {
                write!(
                    f,
                    "Cutoff {} Hz is not realizable at a sample rate of {} Hz",
                    cutoff_hz, sample_rate
                )
            }
            FilterError::InvalidBand { low_hz, high_hz } => {
                write!(f, "Invalid pass band: {} Hz to {} Hz", low_hz, high_hz)
            }
            FilterError::NoSections => write!(f, "Filter needs at least one section"),
        }
    }
}

impl std::error::Error for FilterError {}

/// Errors that can occur while reading or writing ECG files
#[derive(Debug)]
pub enum EcgFileError {
    /// Underlying file operation failed
    Io(std::io::Error),
    /// File is too short or carries a header we cannot interpret
    InvalidEcgFile(String),
    /// Operation not allowed in the handle's current mode
    NotPermitted(&'static str),
}

impl fmt::Display for EcgFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcgFileError::Io(e) => write!(f, "ECG file I/O failed: {}", e),
            EcgFileError::InvalidEcgFile(reason) => {
                write!(f, "Could not open the ecg file: {}", reason)
            }
            EcgFileError::NotPermitted(operation) => {
                write!(f, "Operation not permitted: {}", operation)
            }
        }
    }
}

impl std::error::Error for EcgFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EcgFileError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EcgFileError {
    fn from(e: std::io::Error) -> Self {
        EcgFileError::Io(e)
    }
}

/// Errors that can occur while building or feeding the pipeline
#[derive(Debug)]
pub enum PipelineError {
    /// Sampling rate of zero cannot drive any stage
    InvalidSamplingRate(u16),
    /// Incoming frame was rejected by the codec
    Codec(CodecError),
    /// Failed to spawn a stage thread
    Spawn { stage: &'static str, source: std::io::Error },
    /// Pipeline was already closed
    Closed,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidSamplingRate(rate) => {
                write!(f, "Invalid sampling rate: {} Hz", rate)
            }
            PipelineError::Codec(e) => write!(f, "Frame rejected: {}", e),
            PipelineError::Spawn { stage, source } => {
                write!(f, "Failed to spawn pipeline stage '{}': {}", stage, source)
            }
            PipelineError::Closed => write!(f, "Pipeline is closed"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Codec(e) => Some(e),
            PipelineError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<CodecError> for PipelineError {
    fn from(e: CodecError) -> Self {
        PipelineError::Codec(e)
    }
}

/// Errors reported by a transport implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No adapter available to reach the device
    NoAdapter,
    /// Device refused or dropped the connection
    ConnectionFailed(String),
    /// Operation requires a connected device
    NotConnected,
    /// Characteristic read or write failed
    Characteristic(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            TransportError::ConnectionFailed(reason) => {
                write!(f, "Connection failed: {}", reason)
            }
            TransportError::NotConnected => write!(f, "No device connected"),
            TransportError::Characteristic(reason) => {
                write!(f, "Characteristic access failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors that can occur during session management
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to create Tokio runtime
    RuntimeCreation(String),
    /// Transport failed while connecting or configuring
    Transport(TransportError),
    /// Device reported a polling rate we cannot decode
    Codec(CodecError),
    /// Pipeline for the session could not be built
    Pipeline(PipelineError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
            ConnectionError::Transport(e) => write!(f, "Transport error: {}", e),
            ConnectionError::Codec(e) => write!(f, "Device sent invalid data: {}", e),
            ConnectionError::Pipeline(e) => write!(f, "Failed to start pipeline: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Transport(e) => Some(e),
            ConnectionError::Codec(e) => Some(e),
            ConnectionError::Pipeline(e) => Some(e),
            ConnectionError::RuntimeCreation(_) => None,
        }
    }
}

impl From<TransportError> for ConnectionError {
    fn from(e: TransportError) -> Self {
        ConnectionError::Transport(e)
    }
}

impl From<CodecError> for ConnectionError {
    fn from(e: CodecError) -> Self {
        ConnectionError::Codec(e)
    }
}

impl From<PipelineError> for ConnectionError {
    fn from(e: PipelineError) -> Self {
        ConnectionError::Pipeline(e)
    }
}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}
