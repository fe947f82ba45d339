//! # ECG File Module
//!
//! Seekable binary container for raw 10-bit samples.
//!
//! ## Layout (all integers little-endian)
//! ```text
//! version 2                          version 1 (read only)
//! offset  size  field                offset  size  field
//! 0       2     version = 2          0       2     version = 0 or 1
//! 2       2     sampling rate (Hz)   2       2     marker 0xFFFF
//! 4       8     samples count (i64)  4       2     sampling rate (Hz)
//! 12      20    reserved, zero       6       ...   samples
//! 32      ...   samples (u16 each)
//! ```
//!
//! Version 1 files carry no count; it is always derived from the file length.
//! Their leading word is 0 or 1 depending on the writer, so the marker is what
//! identifies them.
//! Version 2 is written with a placeholder count that is patched when the
//! handle is closed.
//!
//! A handle is either reading or writing, never both, and every operation
//! after `close` fails with `NotPermitted`.

use crate::error::EcgFileError;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Version written by this crate
pub const VERSION: u16 = 2;
/// Header length of version 2 files
pub const HEADER_LENGTH: u64 = 32;
/// Header length of version 1 files
pub const V1_HEADER_LENGTH: u64 = 6;
/// Marker between version and rate in version 1 headers
pub const V1_MARKER: u16 = 0xFFFF;

const SAMPLE_SIZE: u64 = 2;

/// State of an `EcgFile` handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Reading,
    Writing,
    Closed,
}

#[derive(Debug)]
pub struct EcgFile {
    path: PathBuf,
    file: Option<File>,
    mode: Mode,
    version: u16,
    sampling_rate: u16,
    samples_count: i64,
    update_header_on_close: bool,
}

impl EcgFile {
    /// Creates (or truncates) `path` and writes a version 2 header with a
    /// zero count.
    ///
    /// When `update_header_on_close` is false the stored count stays zero and
    /// readers rely on the file length.
    pub fn create(
        path: impl AsRef<Path>,
        sampling_rate: u16,
        update_header_on_close: bool,
    ) -> Result<Self, EcgFileError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut ecg_file = Self {
            path,
            file: Some(file),
            mode: Mode::Writing,
            version: VERSION,
            sampling_rate,
            samples_count: 0,
            update_header_on_close,
        };
        ecg_file.write_header()?;
        Ok(ecg_file)
    }

    /// Opens an existing file for reading and validates its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EcgFileError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let length = file.metadata()?.len();

        if length < 2 {
            return Err(EcgFileError::InvalidEcgFile(format!(
                "{} is too short to hold a header",
                path.display()
            )));
        }

        let tag = read_u16(&mut file)?;
        let (version, sampling_rate, samples_count) = match tag {
            0 | 1 => {
                if length < V1_HEADER_LENGTH {
                    return Err(EcgFileError::InvalidEcgFile(format!(
                        "version 1 header needs {} bytes, file has {}",
                        V1_HEADER_LENGTH, length
                    )));
                }
                let marker = read_u16(&mut file)?;
                if marker != V1_MARKER {
                    return Err(EcgFileError::InvalidEcgFile(format!(
                        "version 1 marker is {:#06x}, expected {:#06x}",
                        marker, V1_MARKER
                    )));
                }
                let rate = read_u16(&mut file)?;
                let count = (length - V1_HEADER_LENGTH) / SAMPLE_SIZE;
                (1, rate, count as i64)
            }
            2 => {
                if length < HEADER_LENGTH {
                    return Err(EcgFileError::InvalidEcgFile(format!(
                        "version 2 header needs {} bytes, file has {}",
                        HEADER_LENGTH, length
                    )));
                }
                let rate = read_u16(&mut file)?;
                let mut count = [0u8; 8];
                file.read_exact(&mut count)?;
                let count = i64::from_le_bytes(count);
                if count < 0 {
                    return Err(EcgFileError::InvalidEcgFile(format!(
                        "negative samples count {}",
                        count
                    )));
                }
                (VERSION, rate, count)
            }
            other => {
                return Err(EcgFileError::InvalidEcgFile(format!(
                    "unsupported version {}",
                    other
                )));
            }
        };

        Ok(Self {
            path,
            file: Some(file),
            mode: Mode::Reading,
            version,
            sampling_rate,
            samples_count,
            update_header_on_close: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn sampling_rate(&self) -> u16 {
        self.sampling_rate
    }

    /// Stored count for version 2, length-derived count for version 1, or
    /// the number of samples written so far on a write handle.
    pub fn samples_count(&self) -> i64 {
        self.samples_count
    }

    /// Offset of the first sample
    pub fn data_offset(&self) -> u64 {
        if self.version == 1 {
            V1_HEADER_LENGTH
        } else {
            HEADER_LENGTH
        }
    }

    /// Appends samples at the end of the file.
    ///
    /// The count only advances once the whole write has completed.
    pub fn write_samples(&mut self, samples: &[u16]) -> Result<(), EcgFileError> {
        let file = match (self.mode, self.file.as_mut()) {
            (Mode::Writing, Some(file)) => file,
            (Mode::Reading, _) => return Err(EcgFileError::NotPermitted("write on a read handle")),
            _ => return Err(EcgFileError::NotPermitted("write after close")),
        };

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        file.seek(SeekFrom::End(0))?;
        file.write_all(&bytes)?;
        self.samples_count += samples.len() as i64;
        Ok(())
    }

    /// Consumes a read handle into a lazy iterator over its samples.
    ///
    /// The iterator stops at end of file whatever the header count says; a
    /// trailing odd byte is ignored.
    pub fn into_samples(mut self) -> Result<Samples, EcgFileError> {
        if self.mode == Mode::Writing {
            return Err(EcgFileError::NotPermitted("read on a write handle"));
        }
        let offset = self.data_offset();
        let mut file = match (self.mode, self.file.take()) {
            (Mode::Reading, Some(file)) => file,
            _ => return Err(EcgFileError::NotPermitted("read after close")),
        };
        self.mode = Mode::Closed;

        file.seek(SeekFrom::Start(offset))?;
        Ok(Samples {
            reader: BufReader::new(file),
            path: self.path.clone(),
            done: false,
        })
    }

    /// Finalizes the header (write handles only) and releases the file.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), EcgFileError> {
        if self.mode == Mode::Closed {
            return Ok(());
        }
        let result = if self.mode == Mode::Writing && self.update_header_on_close {
            self.write_header()
        } else {
            Ok(())
        };
        let flushed = match self.file.take() {
            Some(mut file) if self.mode == Mode::Writing => file.flush().map_err(EcgFileError::from),
            _ => Ok(()),
        };
        self.mode = Mode::Closed;
        result.and(flushed)
    }

    fn write_header(&mut self) -> Result<(), EcgFileError> {
        let file = self
            .file
            .as_mut()
            .ok_or(EcgFileError::NotPermitted("header write after close"))?;

        let mut header = [0u8; HEADER_LENGTH as usize];
        header[0..2].copy_from_slice(&VERSION.to_le_bytes());
        header[2..4].copy_from_slice(&self.sampling_rate.to_le_bytes());
        header[4..12].copy_from_slice(&self.samples_count.to_le_bytes());

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        Ok(())
    }

    /// Swaps the underlying handle, used to inject I/O failures in tests.
    #[cfg(test)]
    pub(crate) fn replace_handle(&mut self, file: File) -> Option<File> {
        self.file.replace(file)
    }
}

impl Drop for EcgFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to finalize {}: {}", self.path.display(), e);
        }
    }
}

fn read_u16(reader: &mut impl Read) -> std::io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Iterator over the samples of an opened file
#[derive(Debug)]
pub struct Samples {
    reader: BufReader<File>,
    path: PathBuf,
    done: bool,
}

impl Iterator for Samples {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        if self.done {
            return None;
        }
        match read_u16(&mut self.reader) {
            Ok(sample) => Some(sample),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    log::error!("Failed to read samples from {}: {}", self.path.display(), e);
                }
                self.done = true;
                None
            }
        }
    }
}
