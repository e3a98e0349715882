//! Reset-surviving backup register.
//!
//! One 32-bit word that survives a processor reset.  Boot reads it to learn
//! how the previous run ended, then re-arms it with [`RUNNING`] so that a
//! reset which bypasses both the fatal path and the orderly shutdown is still
//! recognisable on the next boot.
//!
//! | Marker | Meaning on the next boot |
//! |---|---|
//! | [`CLEAN_SHUTDOWN`] (`"ORBS"`) | orderly shutdown |
//! | [`FATAL_RESET`] | reset through the fatal path |
//! | [`RUNNING`] (`"RUN!"`) | reset while running, without the fatal path |
//! | anything else | cold start |

use std::fs;
use std::path::{Path, PathBuf};

use orbos_types::OrbError;

pub const CLEAN_SHUTDOWN: u32 = 0x4F52_4253;
pub const FATAL_RESET: u32 = 0x0BAD_C0DE;
pub const RUNNING: u32 = 0x5255_4E21;

/// A single reset-surviving word.
pub trait BackupRegister: Send + Sync {
    /// # Errors
    ///
    /// Returns [`OrbError::HardwareFault`] if the register cannot be read.
    fn read(&self) -> Result<u32, OrbError>;

    /// # Errors
    ///
    /// Returns [`OrbError::HardwareFault`] if the register cannot be written.
    fn write(&self, value: u32) -> Result<(), OrbError>;
}

/// How the previous run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorShutdown {
    Clean,
    Fatal,
    Unexpected,
    ColdStart,
}

impl PriorShutdown {
    pub fn from_marker(marker: u32) -> Self {
        match marker {
            CLEAN_SHUTDOWN => PriorShutdown::Clean,
            FATAL_RESET => PriorShutdown::Fatal,
            RUNNING => PriorShutdown::Unexpected,
            _ => PriorShutdown::ColdStart,
        }
    }

    /// `true` when the previous run did not end in an orderly shutdown.
    pub fn is_abnormal(self) -> bool {
        matches!(self, PriorShutdown::Fatal | PriorShutdown::Unexpected)
    }
}

/// Classify the stored marker and re-arm the register with [`RUNNING`].
///
/// # Errors
///
/// Propagates register I/O failures.
pub fn read_and_arm(register: &dyn BackupRegister) -> Result<PriorShutdown, OrbError> {
    let prior = PriorShutdown::from_marker(register.read()?);
    register.write(RUNNING)?;
    Ok(prior)
}

/// Backup register persisted in a small file, for hosted runs.
///
/// A missing file reads as zero (cold start).
#[derive(Debug, Clone)]
pub struct FileBackupRegister {
    path: PathBuf,
}

impl FileBackupRegister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fault(&self, err: impl std::fmt::Display) -> OrbError {
        OrbError::HardwareFault {
            component: "backup register".to_string(),
            details: format!("{}: {err}", self.path.display()),
        }
    }
}

impl BackupRegister for FileBackupRegister {
    fn read(&self) -> Result<u32, OrbError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let word: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| self.fault(format!("expected 4 bytes, found {}", bytes.len())))?;
                Ok(u32::from_le_bytes(word))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(self.fault(e)),
        }
    }

    fn write(&self, value: u32) -> Result<(), OrbError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.fault(e))?;
        }
        fs::write(&self.path, value.to_le_bytes()).map_err(|e| self.fault(e))
    }
}
