//! # Recording Module
//!
//! Writes the raw sample stream of a session to timestamped `.ecg` files and
//! catalogues recordings found on disk.
//!
//! ## File naming
//! ```text
//! <recording dir>/ECG_Recording_YYYY-MM-DD_HH-MM-SS.ecg
//! ```
//! A numeric suffix is appended when a file of that name already exists,
//! which happens when a rate change rolls the recording over within the same
//! second.
//!
//! ## Failure handling
//! I/O errors are not retried. The recorder logs the error, closes the file
//! so its header reflects the samples that were fully written, and stops
//! recording until `start` is called again. The live stream is unaffected.

use crate::ecg_file::EcgFile;
use crate::error::EcgFileError;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "ECG_Recording_";
const FILE_EXTENSION: &str = "ecg";

/// File name for a recording started at `started`
pub fn recording_file_name(started: DateTime<Local>) -> String {
    format!(
        "{}{}.{}",
        FILE_PREFIX,
        started.format("%Y-%m-%d_%H-%M-%S"),
        FILE_EXTENSION
    )
}

/// Owns the file of the recording in progress, if any.
#[derive(Debug)]
pub struct Recorder {
    directory: PathBuf,
    update_header_on_close: bool,
    file: Option<EcgFile>,
}

impl Recorder {
    pub fn new(directory: impl Into<PathBuf>, update_header_on_close: bool) -> Self {
        Self {
            directory: directory.into(),
            update_header_on_close,
            file: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the file being written
    pub fn current_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// Starts a new recording at `sampling_rate`, finishing any recording in
    /// progress first.
    pub fn start(&mut self, sampling_rate: u16) -> Result<PathBuf, EcgFileError> {
        self.finish();

        if !self.directory.exists() {
            std::fs::create_dir_all(&self.directory)?;
        }
        let path = self.unique_path(&recording_file_name(Local::now()));
        let file = EcgFile::create(&path, sampling_rate, self.update_header_on_close)?;

        log::info!(
            "Starting recording to: {} ({} Hz)",
            path.display(),
            sampling_rate
        );
        self.file = Some(file);
        Ok(path)
    }

    /// Closes the current file and continues in a new one at the new rate.
    /// Does nothing when not recording.
    pub fn roll_over(&mut self, sampling_rate: u16) -> Result<Option<PathBuf>, EcgFileError> {
        if !self.is_recording() {
            return Ok(None);
        }
        self.start(sampling_rate).map(Some)
    }

    /// Appends samples to the current recording. On failure the recording is
    /// stopped and the error logged.
    pub fn write(&mut self, samples: &[u16]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(e) = file.write_samples(samples) {
            log::error!(
                "Failed to write to {}: {}. Recording stopped.",
                file.path().display(),
                e
            );
            self.finish();
        }
    }

    /// Finalizes the current file, if any.
    pub fn finish(&mut self) {
        if let Some(mut file) = self.file.take() {
            match file.close() {
                Ok(()) => log::info!(
                    "Stopped recording: {} ({} samples)",
                    file.path().display(),
                    file.samples_count()
                ),
                Err(e) => log::error!("Failed to finalize {}: {}", file.path().display(), e),
            }
        }
    }

    fn unique_path(&self, file_name: &str) -> PathBuf {
        let candidate = self.directory.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        let stem = file_name.trim_end_matches(&format!(".{}", FILE_EXTENSION));
        (1..)
            .map(|n| {
                self.directory
                    .join(format!("{}_{}.{}", stem, n, FILE_EXTENSION))
            })
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Summary of a recording on disk
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingInfo {
    pub path: PathBuf,
    pub file_name: String,
    pub samples_count: i64,
    pub sampling_rate: u16,
    pub modified: DateTime<Local>,
}

impl RecordingInfo {
    pub fn duration_seconds(&self) -> f64 {
        if self.sampling_rate == 0 {
            return 0.0;
        }
        self.samples_count as f64 / f64::from(self.sampling_rate)
    }
}

/// Lists every readable `.ecg` file under `dir`, newest first.
///
/// Files that fail to open, report a zero rate or hold no samples are
/// skipped. A missing directory yields an empty list.
pub fn list_recordings(dir: impl AsRef<Path>) -> std::io::Result<Vec<RecordingInfo>> {
    let dir = dir.as_ref();
    let mut recordings = Vec::new();
    if !dir.exists() {
        return Ok(recordings);
    }

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if current == dir => return Err(e),
            Err(e) => {
                log::warn!("Skipping {}: {}", current.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_recording_file(&path) {
                if let Some(info) = describe(&path) {
                    recordings.push(info);
                }
            }
        }
    }

    recordings.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(recordings)
}

fn is_recording_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(FILE_EXTENSION))
        .unwrap_or(false)
}

fn describe(path: &Path) -> Option<RecordingInfo> {
    let file = match EcgFile::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::debug!("Ignoring {}: {}", path.display(), e);
            return None;
        }
    };
    let metadata = std::fs::metadata(path).ok()?;

    // Files written without header updates still carry their samples.
    let samples_count = match file.samples_count() {
        0 => (metadata.len().saturating_sub(file.data_offset()) / 2) as i64,
        count => count,
    };
    if file.sampling_rate() == 0 || samples_count == 0 {
        return None;
    }

    let modified = metadata
        .modified()
        .map(DateTime::<Local>::from)
        .unwrap_or_else(|_| Local::now());

    Some(RecordingInfo {
        path: path.to_path_buf(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        samples_count,
        sampling_rate: file.sampling_rate(),
        modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_file_name_format() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            recording_file_name(started),
            "ECG_Recording_2024-03-09_07-05-01.ecg"
        );
    }

    #[test]
    fn test_start_write_finish() {
        let temp_dir = tempdir().unwrap();
        let dir = temp_dir.path().join("nested").join("recordings");
        let mut recorder = Recorder::new(&dir, true);

        assert!(!recorder.is_recording());
        recorder.write(&[1, 2, 3]); // ignored while idle
        let path = recorder.start(500).unwrap();
        assert!(recorder.is_recording());
        assert_eq!(recorder.current_path(), Some(path.as_path()));

        recorder.write(&[512; 16]);
        recorder.write(&[600; 16]);
        recorder.finish();
        assert!(!recorder.is_recording());

        let file = EcgFile::open(&path).unwrap();
        assert_eq!(file.sampling_rate(), 500);
        assert_eq!(file.samples_count(), 32);
    }

    #[test]
    fn test_write_failure_stops_recording() {
        let temp_dir = tempdir().unwrap();
        let mut recorder = Recorder::new(temp_dir.path(), true);
        let path = recorder.start(500).unwrap();
        recorder.write(&[512; 16]);

        let read_only = std::fs::File::open(&path).unwrap();
        recorder.file.as_mut().unwrap().replace_handle(read_only);
        recorder.write(&[600; 16]);
        assert!(!recorder.is_recording());
        assert_eq!(recorder.current_path(), None);

        // Stays stopped until started again.
        recorder.write(&[700; 16]);
        assert!(!recorder.is_recording());
        assert_eq!(EcgFile::open(&path).unwrap().into_samples().unwrap().count(), 16);

        let next = recorder.start(500).unwrap();
        assert_ne!(next, path);
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_roll_over_creates_second_file() {
        let temp_dir = tempdir().unwrap();
        let mut recorder = Recorder::new(temp_dir.path(), true);
        assert_eq!(recorder.roll_over(250).unwrap(), None);

        let first = recorder.start(500).unwrap();
        recorder.write(&[1; 16]);
        let second = recorder.roll_over(130).unwrap().unwrap();
        recorder.write(&[2; 32]);
        drop(recorder);

        assert_ne!(first, second);
        assert_eq!(EcgFile::open(&first).unwrap().samples_count(), 16);
        let second = EcgFile::open(&second).unwrap();
        assert_eq!(second.sampling_rate(), 130);
        assert_eq!(second.samples_count(), 32);
    }

    #[test]
    fn test_list_recordings_filters_and_sorts() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();

        for (name, rate, count) in [("a.ecg", 500, 10), ("sub/b.ECG", 130, 4)] {
            let mut file = EcgFile::create(root.join(name), rate, true).unwrap();
            file.write_samples(&vec![512; count]).unwrap();
        }
        EcgFile::create(root.join("empty.ecg"), 500, true).unwrap();
        EcgFile::create(root.join("zero_rate.ecg"), 0, true)
            .and_then(|mut f| f.write_samples(&[1, 2]))
            .unwrap();
        std::fs::write(root.join("garbage.ecg"), [9u8; 3]).unwrap();
        std::fs::write(root.join("notes.txt"), b"hello").unwrap();

        // Make the ordering deterministic.
        let older = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(root.join("a.ecg"))
            .unwrap()
            .set_modified(older)
            .unwrap();

        let recordings = list_recordings(root).unwrap();
        let names: Vec<&str> = recordings.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["b.ECG", "a.ecg"]);
        assert_eq!(recordings[1].samples_count, 10);
        assert_eq!(recordings[0].sampling_rate, 130);
        assert!((recordings[1].duration_seconds() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_list_counts_samples_without_header_update() {
        let temp_dir = tempdir().unwrap();
        let mut file = EcgFile::create(temp_dir.path().join("raw.ecg"), 500, false).unwrap();
        file.write_samples(&[1; 48]).unwrap();
        drop(file);

        let recordings = list_recordings(temp_dir.path()).unwrap();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].samples_count, 48);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let temp_dir = tempdir().unwrap();
        assert!(list_recordings(temp_dir.path().join("nope")).unwrap().is_empty());
    }
}
