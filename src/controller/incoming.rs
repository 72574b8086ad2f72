//! Turns materialized uploads into storage items.
use std::sync::Arc;

use axum::http::Method;

use super::upload::{UploadedFile, Uploads};
use crate::{
    config::UploadConfig,
    storage::{stream::BytesStream, OneOrMany, StreamItem},
    Error, Result,
};

type Transform = Arc<dyn Fn(StreamItem) -> StreamItem + Send + Sync>;

/// Opens a stream per uploaded file of one form field.
#[derive(Clone)]
pub struct IncomingStreams {
    field: String,
    is_array: bool,
    transform: Option<Transform>,
}

impl IncomingStreams {
    #[must_use]
    pub fn new(field: impl Into<String>, is_array: bool) -> Self {
        Self {
            field: field.into(),
            is_array,
            transform: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.field.clone(), config.is_array)
    }

    /// Run `transform` on every item once its stream is open, e.g. to assign
    /// the id it gets stored under.
    #[must_use]
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(StreamItem) -> StreamItem + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Whether a request can be adapted: a write verb, the field is there, and
    /// holds an array when one is expected.
    #[must_use]
    pub fn is_eligible(&self, method: &Method, uploads: &Uploads) -> bool {
        if ![Method::POST, Method::PUT, Method::PATCH].contains(method) {
            return false;
        }
        uploads
            .files
            .get(&self.field)
            .is_some_and(|files| !self.is_array || files.is_array())
    }

    /// The items to store, shaped like the field, or `None` when the request
    /// is not eligible.
    ///
    /// # Errors
    ///
    /// When an uploaded file cannot be opened.
    pub async fn adapt(
        &self,
        method: &Method,
        uploads: &Uploads,
    ) -> Result<Option<OneOrMany<StreamItem>>> {
        if !self.is_eligible(method, uploads) {
            tracing::debug!(field = %self.field, %method, "request not eligible for streaming");
            return Ok(None);
        }
        let Some(files) = uploads.files.get(&self.field) else {
            return Ok(None);
        };

        Ok(Some(match files {
            OneOrMany::One(file) => OneOrMany::One(self.open(file).await?),
            OneOrMany::Many(files) => {
                let mut items = Vec::with_capacity(files.len());
                for file in files {
                    items.push(self.open(file).await?);
                }
                OneOrMany::Many(items)
            }
        }))
    }

    async fn open(&self, file: &UploadedFile) -> Result<StreamItem> {
        let reader = tokio::fs::File::open(&file.path).await.map_err(|err| {
            Error::storage(format!("could not open upload {}", file.originalname), err)
        })?;

        let mut item = StreamItem::new(file.filename.clone(), BytesStream::from_async_read(reader))
            .with_mime_type(file.mimetype.clone())
            .with_field("path", file.path.display().to_string())
            .with_field("filename", file.filename.clone())
            .with_field("originalname", file.originalname.clone())
            .with_field("mimetype", file.mimetype.clone())
            .with_field("fieldname", file.fieldname.clone());
        item.size = Some(file.size);

        Ok(match &self.transform {
            Some(transform) => transform(item),
            None => item,
        })
    }
}
