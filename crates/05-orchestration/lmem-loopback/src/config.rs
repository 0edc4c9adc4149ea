//! Run configuration, loadable from TOML.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use transport::{ChannelOptions, ENVELOPE_LEN, MAX_FRAME_BYTES};

use crate::{LoopbackError, LoopbackResult};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9090;
pub const DEFAULT_SIZE: usize = 384;
pub const DEFAULT_CONFIGURATION: &str = "LMemLoopback";
pub const DEFAULT_ENGINE: &str = "*";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 30_000;

/// Room left in a frame for the request header around a `sendData` payload.
const FRAME_HEADROOM: usize = 4096;

/// Largest `size` whose `sendData` request fits one wire frame.
pub const MAX_SIZE: usize = (MAX_FRAME_BYTES - ENVELOPE_LEN - FRAME_HEADROOM) / 4;

/// Everything a loopback run needs to know.
///
/// Missing TOML keys fall back to the defaults; unknown keys are rejected.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopbackConfig {
    pub host: String,
    pub port: u16,
    /// Number of elements per input array.
    pub size: usize,
    /// Configuration ("maxfile") name to initialise.
    pub configuration: String,
    /// Engine selector; `"*"` picks any engine.
    pub engine: String,
    pub connect_timeout_ms: u64,
    /// Per-call read/write timeout; `0` waits indefinitely.
    pub io_timeout_ms: u64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            size: DEFAULT_SIZE,
            configuration: DEFAULT_CONFIGURATION.to_string(),
            engine: DEFAULT_ENGINE.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }
}

impl LoopbackConfig {
    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(source: &str) -> LoopbackResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|err| LoopbackError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: &Path) -> LoopbackResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|err| {
            LoopbackError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> LoopbackResult<()> {
        if self.size == 0 {
            return Err(LoopbackError::Config("size must be at least 1".into()));
        }
        if self.size > MAX_SIZE || i32::try_from(self.size).is_err() {
            return Err(LoopbackError::Config(format!(
                "size {} exceeds the largest transferable size {MAX_SIZE}",
                self.size
            )));
        }
        if self.host.is_empty() {
            return Err(LoopbackError::Config("host must not be empty".into()));
        }
        if self.configuration.is_empty() {
            return Err(LoopbackError::Config(
                "configuration name must not be empty".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(LoopbackError::Config(
                "connect_timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            io_timeout: (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        let config = LoopbackConfig::from_toml_str("").expect("parse");
        assert_eq!(config, LoopbackConfig::default());
        assert_eq!(config.channel_options(), ChannelOptions::default());
    }

    #[test]
    fn partial_document_overrides_named_keys() {
        let config = LoopbackConfig::from_toml_str(
            r#"
            host = "dfe-07"
            size = 1024
            io_timeout_ms = 0
            "#,
        )
        .expect("parse");
        assert_eq!(config.host, "dfe-07");
        assert_eq!(config.size, 1024);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.channel_options().io_timeout, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = LoopbackConfig::from_toml_str("sise = 12").unwrap_err();
        assert!(matches!(err, LoopbackError::Config(_)));
        assert!(err.to_string().contains("sise"), "{err}");
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = LoopbackConfig::from_toml_str("size = 0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: size must be at least 1"
        );
    }

    #[test]
    fn size_must_fit_one_frame() {
        let at_limit = LoopbackConfig {
            size: MAX_SIZE,
            ..LoopbackConfig::default()
        };
        at_limit.validate().expect("largest size");

        let over = LoopbackConfig {
            size: MAX_SIZE + 1,
            ..LoopbackConfig::default()
        };
        let err = over.validate().unwrap_err();
        assert!(matches!(err, LoopbackError::Config(_)), "{err:?}");
        assert!(err.to_string().contains("largest transferable size"), "{err}");
    }
}
