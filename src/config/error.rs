//! Errors raised while building a `Config` from files and `SERIAL_HUB_*`
//! variables.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file (`--config` or `load_from`) is
    /// missing. The default search locations never produce this.
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),

    #[error("cannot read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema, e.g.
    /// `buffer_size = "big"`.
    #[error("malformed config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A value parsed but would make every open fail, such as a zero baud
    /// rate or a zero retry delay. `key` is the dotted TOML path.
    #[error("{key} {message}")]
    ValidationError { key: String, message: String },

    /// A `SERIAL_HUB_<SECTION>_<KEY>` override could not be parsed.
    #[error("{var}={value:?} is not a valid {expected}")]
    EnvParseError {
        var: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    pub fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn env_parse(
        var: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::EnvParseError {
            var: var.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
