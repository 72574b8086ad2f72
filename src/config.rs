//! # Configuration Management
//!
//! Settings are read from `config/{env}.local.yaml` or `config/{env}.yaml`,
//! rendered through `tera` first so values can come from the environment:
//!
//! ```yaml
//! logger:
//!   enable: true
//!   level: debug
//!   format: compact
//! storage:
//!   backend:
//!     kind: local
//!     root: {{ get_env(name="UPLOAD_ROOT", default="uploads") }}
//!   unpipe:
//!     unlink: path
//! upload:
//!   field: files
//!   dest: tmp/uploads
//!   limits:
//!     file_size: 10mb
//! ```

use std::path::{Path, PathBuf};

use fs_err as fs;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tera::{Context, Tera};
use tracing::info;

use crate::{logger, storage::UnpipeOptions, Error, Result};

pub const DEFAULT_FOLDER: &str = "config";
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const FILESTREAM_ENV: &str = "FILESTREAM_ENV";

/// The environment name taken from `FILESTREAM_ENV`, `development` when unset.
#[must_use]
pub fn resolve_from_env() -> String {
    std::env::var(FILESTREAM_ENV).unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logger: Logger,
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Logger configuration
///
/// Example (development):
/// ```yaml
/// # config/development.yaml
/// logger:
///   enable: true
///   level: debug
///   format: compact
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Logger {
    /// Enable log write to stdout
    pub enable: bool,

    /// Set the logger level.
    ///
    /// * options: `trace` | `debug` | `info` | `warn` | `error`
    #[serde(default)]
    pub level: logger::LogLevel,

    /// Set the logger format.
    ///
    /// * options: `compact` | `pretty` | `json`
    #[serde(default)]
    pub format: logger::Format,

    /// Override the module whitelist filter.
    ///
    /// See more [here](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives)
    pub override_filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: Backend,
    /// What the lifecycle guard removes after each `create`.
    #[serde(default)]
    pub unpipe: UnpipeOptions,
}

/// Which storage substrate to use.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Files under `root` on the local filesystem.
    Local { root: PathBuf },
    /// In-memory object storage, mostly for tests.
    Mem { bucket: String },
    /// AWS S3 or any S3 compatible store.
    #[cfg(feature = "storage_aws_s3")]
    S3(S3),
}

#[cfg(feature = "storage_aws_s3")]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3 {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint, e.g. a minio server.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Key prefix inside the bucket.
    pub root: Option<String>,
}

/// Multipart upload handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Form field carrying the files.
    #[serde(default = "default_field")]
    pub field: String,
    /// Whether the field is expected to hold several files.
    #[serde(default = "default_is_array")]
    pub is_array: bool,
    /// Where uploaded parts are written before being stored.
    #[serde(default = "default_dest")]
    pub dest: PathBuf,
    #[serde(default)]
    pub limits: UploadLimits,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            field: default_field(),
            is_array: default_is_array(),
            dest: default_dest(),
            limits: UploadLimits::default(),
        }
    }
}

fn default_field() -> String {
    "files".to_string()
}

const fn default_is_array() -> bool {
    true
}

fn default_dest() -> PathBuf {
    std::env::temp_dir().join("filestream")
}

/// Limits enforced while materializing an upload. Unset means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadLimits {
    /// Max size of one file, human readable (`10mb`, `512KiB`).
    #[serde(default, deserialize_with = "deserialize_byte_size")]
    pub file_size: Option<u64>,
    /// Max number of file parts.
    pub files: Option<usize>,
    /// Max number of non-file fields.
    pub fields: Option<usize>,
    /// Max number of parts, files and fields together.
    pub parts: Option<usize>,
    /// Max length of a field name, in bytes.
    pub field_name_size: Option<usize>,
    /// Max size of a non-file field value, human readable.
    #[serde(default, deserialize_with = "deserialize_byte_size")]
    pub field_size: Option<u64>,
}

fn deserialize_byte_size<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(u64),
        Human(String),
    }

    match Option::<Size>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Size::Bytes(bytes)) => Ok(Some(bytes)),
        Some(Size::Human(value)) => {
            let bytes = byte_unit::Byte::from_str(value)
                .map_err(|err| serde::de::Error::custom(err.to_string()))?
                .get_bytes();
            Ok(Some(u64::try_from(bytes).unwrap_or(u64::MAX)))
        }
    }
}

impl Config {
    /// Loads the configuration of `env` from the `config` folder.
    ///
    /// # Errors
    ///
    /// Returns error when could not convert the give path to
    /// [`Config`] struct.
    pub fn new(env: &str) -> Result<Self> {
        Self::from_folder(env, Path::new(DEFAULT_FOLDER))
    }

    /// Loads configuration settings from a folder for the specified
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns error when no file exists for `env`, or when it cannot be
    /// rendered or parsed.
    pub fn from_folder(env: &str, path: &Path) -> Result<Self> {
        // by order of precedence
        let files = [
            path.join(format!("{env}.local.yaml")),
            path.join(format!("{env}.yaml")),
        ];

        let selected_path = files
            .iter()
            .find(|p| p.exists())
            .ok_or_else(|| Error::Message("no configuration file found".to_string()))?;

        info!(selected_path =? selected_path, "loading environment from");

        let content = fs::read_to_string(selected_path)?;
        let rendered = render_string(&content, &json!({}))?;

        serde_yaml::from_str(&rendered)
            .map_err(|err| Error::YAMLFile(err, selected_path.to_string_lossy().to_string()))
    }
}

fn render_string(template: &str, locals: &serde_json::Value) -> Result<String> {
    Ok(Tera::one_off(
        template,
        &Context::from_serialize(locals)?,
        false,
    )?)
}
