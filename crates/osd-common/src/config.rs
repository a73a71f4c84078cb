//! Configuration model for the osd agent.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{OsdError, Result};

/// Root configuration for the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsdConfig {
    /// Unix socket the agent listens on.
    pub socket_path: PathBuf,
    /// Root of the runtime's exported state index.
    pub runtime_root: PathBuf,
    /// Size in bytes of each streamed log chunk.
    pub log_chunk_size: usize,
    /// Number of chunks queued between reader and socket writer.
    pub stream_buffer: usize,
    /// Settings for the one-shot reset workload.
    pub reset: ResetConfig,
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(constants::DEFAULT_SOCKET_PATH),
            runtime_root: PathBuf::from(constants::DEFAULT_RUNTIME_ROOT),
            log_chunk_size: constants::DEFAULT_LOG_CHUNK_SIZE,
            stream_buffer: constants::DEFAULT_STREAM_BUFFER,
            reset: ResetConfig::default(),
        }
    }
}

/// Settings for launching the reset workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Root filesystem of the image the reset command runs in.
    pub rootfs: PathBuf,
    /// OCI runtime binary, resolved through `PATH` when relative.
    pub runtime_binary: PathBuf,
    /// Directory under which per-run bundles are created.
    pub bundle_dir: PathBuf,
    /// Hard memory limit for the workload.
    pub memory_limit_bytes: u64,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            rootfs: PathBuf::from(constants::DEFAULT_RESET_ROOTFS),
            runtime_binary: PathBuf::from(constants::DEFAULT_OCI_RUNTIME),
            bundle_dir: PathBuf::from(constants::DEFAULT_BUNDLE_DIR),
            memory_limit_bytes: constants::RESET_MEMORY_LIMIT_BYTES,
        }
    }
}

impl OsdConfig {
    /// Loads configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| OsdError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`OsdError::Config`] for a zero chunk size or stream buffer.
    pub fn validate(&self) -> Result<()> {
        if self.log_chunk_size == 0 {
            return Err(OsdError::Config {
                message: "log_chunk_size must be greater than zero".into(),
            });
        }
        if self.stream_buffer == 0 {
            return Err(OsdError::Config {
                message: "stream_buffer must be greater than zero".into(),
            });
        }
        if self.reset.memory_limit_bytes == 0 {
            return Err(OsdError::Config {
                message: "reset.memory_limit_bytes must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        OsdConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("osd.json");
        std::fs::write(&path, r#"{"log_chunk_size": 4096}"#).expect("write");

        let cfg = OsdConfig::load(&path).expect("load");
        assert_eq!(cfg.log_chunk_size, 4096);
        assert_eq!(cfg.stream_buffer, constants::DEFAULT_STREAM_BUFFER);
        assert_eq!(
            cfg.reset.memory_limit_bytes,
            constants::RESET_MEMORY_LIMIT_BYTES
        );
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let cfg = OsdConfig {
            log_chunk_size: 0,
            ..OsdConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(OsdError::Config { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = OsdConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, OsdError::Io { .. }));
    }
}
