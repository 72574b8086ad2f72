use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

pub mod local;
pub mod object;

use super::{range::RangePlan, stream::BytesStream, Params, StreamItem};
use crate::{config, Result};

/// Result of a `create` or `remove` for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResult {
    pub id: String,
}

impl CreateResult {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// An object ready to be sent back over HTTP.
///
/// The stream is only opened over the planned byte window. Whoever receives
/// the result owns the stream and must drain or drop it.
#[derive(Debug)]
pub struct GetResult {
    pub header: HeaderMap,
    pub status: StatusCode,
    pub stream: BytesStream,
}

impl GetResult {
    /// Headers shared by both backends for a planned read of `size` bytes.
    pub(crate) fn headers(content_type: &str, plan: &RangePlan, size: u64) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(content_type)
                .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
        );
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plan.length));
        if let Some(content_range) = plan.content_range(size) {
            if let Ok(value) = HeaderValue::from_str(&content_range) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }
        headers
    }
}

pub(crate) const OCTET_STREAM: &str = "application/octet-stream";

/// Content type guessed from the id's extension.
pub(crate) fn content_type_for(id: &str) -> String {
    mime_guess::from_path(id)
        .first_raw()
        .unwrap_or(OCTET_STREAM)
        .to_string()
}

#[async_trait]
pub trait StoreDriver: Sync + Send {
    /// Opens `id` for reading, honouring the `Range` in `params`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when nothing is stored at `id`, before any
    /// stream gets opened.
    async fn get(&self, id: &str, params: &Params) -> Result<GetResult>;

    /// Persists one item, creating its container when needed.
    ///
    /// # Errors
    ///
    /// Returns a generic storage error when the payload cannot be written,
    /// including failures of the source stream mid transfer.
    async fn create(&self, item: &StreamItem, params: &Params) -> Result<CreateResult>;

    /// Deletes `id`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when `id` does not exist, otherwise a
    /// generic error carrying the deletion failure.
    async fn remove(&self, id: &str, params: &Params) -> Result<CreateResult>;

    /// Succeeds silently when `id` exists.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when it does not.
    async fn check_existence(&self, id: &str, params: &Params) -> Result<()>;

    /// Moves `old_id` to `new_id`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when `old_id` does not exist, otherwise a
    /// generic error when the relocation fails.
    async fn rename(&self, old_id: &str, new_id: &str) -> Result<CreateResult>;
}

/// The two storage substrates, dispatched statically.
pub enum Backend {
    Local(local::LocalFilesystemBackend),
    Object(object::ObjectStorageBackend),
}

impl Backend {
    /// Build the backend described by the configuration.
    ///
    /// # Errors
    ///
    /// When the object store client cannot be initialized.
    pub fn from_config(config: &config::Backend) -> Result<Self> {
        Ok(match config {
            config::Backend::Local { root } => Self::Local(local::LocalFilesystemBackend::new(root)),
            config::Backend::Mem { bucket } => Self::Object(object::mem(bucket)),
            #[cfg(feature = "storage_aws_s3")]
            config::Backend::S3(s3) => Self::Object(object::aws(s3)?),
        })
    }

    fn driver(&self) -> &dyn StoreDriver {
        match self {
            Self::Local(driver) => driver,
            Self::Object(driver) => driver,
        }
    }
}

impl From<local::LocalFilesystemBackend> for Backend {
    fn from(driver: local::LocalFilesystemBackend) -> Self {
        Self::Local(driver)
    }
}

impl From<object::ObjectStorageBackend> for Backend {
    fn from(driver: object::ObjectStorageBackend) -> Self {
        Self::Object(driver)
    }
}

#[async_trait]
impl StoreDriver for Backend {
    async fn get(&self, id: &str, params: &Params) -> Result<GetResult> {
        self.driver().get(id, params).await
    }

    async fn create(&self, item: &StreamItem, params: &Params) -> Result<CreateResult> {
        self.driver().create(item, params).await
    }

    async fn remove(&self, id: &str, params: &Params) -> Result<CreateResult> {
        self.driver().remove(id, params).await
    }

    async fn check_existence(&self, id: &str, params: &Params) -> Result<()> {
        self.driver().check_existence(id, params).await
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> Result<CreateResult> {
        self.driver().rename(old_id, new_id).await
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::storage::range;

    #[rstest]
    #[case("notes.txt", "text/plain")]
    #[case("nested/dir/photo.png", "image/png")]
    #[case("archive.unknownext", "application/octet-stream")]
    #[case("no-extension", "application/octet-stream")]
    fn guesses_content_type(#[case] id: &str, #[case] expected: &str) {
        assert_eq!(content_type_for(id), expected);
    }

    #[test]
    fn full_read_headers() {
        let plan = range::plan(None, 24);
        let headers = GetResult::headers("text/plain", &plan, 24);
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CONTENT_DISPOSITION], "inline");
        assert_eq!(headers[header::CONTENT_LENGTH], "24");
        assert!(headers.get(header::CONTENT_RANGE).is_none());
    }

    #[test]
    fn partial_read_headers() {
        let plan = range::plan(Some("bytes=0-4"), 24);
        let headers = GetResult::headers("text/plain", &plan, 24);
        assert_eq!(headers[header::CONTENT_LENGTH], "5");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-4/24");
    }
}
