//! # Object Storage Driver
//!
//! Objects are keyed by id inside a bucket. Every call may target another
//! bucket through [`Params::bucket`]; one `OpenDAL` operator is built and cached
//! per bucket.
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use axum::http::{header, HeaderValue};
use futures_util::{SinkExt, StreamExt};
use opendal::{layers::RetryLayer, Metadata, Operator};

use super::{content_type_for, CreateResult, GetResult, StoreDriver};
use crate::{
    storage::{range, stream::BytesStream, Params, StreamItem},
    Error, Result,
};

type OperatorFactory = Box<dyn Fn(&str) -> opendal::Result<Operator> + Send + Sync>;

pub struct ObjectStorageBackend {
    default_bucket: String,
    factory: OperatorFactory,
    operators: Mutex<HashMap<String, Operator>>,
}

/// Create new in-memory object storage. Each bucket is its own namespace.
///
/// # Examples
///```
/// use filestream::storage::drivers::object;
/// let mem_driver = object::mem("uploads");
/// ```
#[must_use]
pub fn mem(bucket: impl Into<String>) -> ObjectStorageBackend {
    ObjectStorageBackend::new(bucket, |_bucket| {
        Ok(Operator::new(opendal::services::Memory::default())?.finish())
    })
}

/// Create new AWS s3 storage from its configuration.
///
/// # Errors
///
/// When could not initialize the client instance
#[cfg(feature = "storage_aws_s3")]
pub fn aws(config: &crate::config::S3) -> Result<ObjectStorageBackend> {
    let s3 = config.clone();
    let backend = ObjectStorageBackend::new(config.bucket.clone(), move |bucket| {
        let mut builder = opendal::services::S3::default()
            .bucket(bucket)
            .region(&s3.region);
        if let Some(endpoint) = &s3.endpoint {
            builder = builder.endpoint(endpoint);
        }
        if let Some(key_id) = &s3.access_key_id {
            builder = builder.access_key_id(key_id);
        }
        if let Some(secret) = &s3.secret_access_key {
            builder = builder.secret_access_key(secret);
        }
        if let Some(root) = &s3.root {
            builder = builder.root(root);
        }
        Ok(Operator::new(builder)?.finish())
    });
    // fail at startup rather than on the first request
    backend.operator(&Params::default())?;
    Ok(backend)
}

impl ObjectStorageBackend {
    /// Build a backend whose operators come from `factory`, called once per
    /// bucket.
    pub fn new<F>(default_bucket: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> opendal::Result<Operator> + Send + Sync + 'static,
    {
        Self {
            default_bucket: default_bucket.into(),
            factory: Box::new(factory),
            operators: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    fn operator(&self, params: &Params) -> Result<Operator> {
        let bucket = params.bucket.as_deref().unwrap_or(&self.default_bucket);
        let mut operators = self.operators.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(op) = operators.get(bucket) {
            return Ok(op.clone());
        }
        let op = (self.factory)(bucket)
            .map_err(|err| Error::storage(format!("could not open bucket {bucket}"), err))?
            .layer(RetryLayer::default().with_jitter());
        tracing::debug!(bucket, "object storage operator created");
        operators.insert(bucket.to_string(), op.clone());
        Ok(op)
    }

    async fn stat(op: &Operator, id: &str) -> Result<Metadata> {
        match op.stat(id).await {
            Ok(meta) if meta.is_file() => Ok(meta),
            Ok(_) => Err(Error::not_found(id)),
            Err(err) => {
                tracing::debug!(id, error = %err, "stat failed");
                Err(Error::not_found(id))
            }
        }
    }

    async fn write(op: &Operator, item: &StreamItem) -> opendal::Result<()> {
        let content_type = item
            .mime_type
            .clone()
            .unwrap_or_else(|| content_type_for(&item.id));
        let mut writer = if op.info().full_capability().write_with_content_type {
            op.writer_with(&item.id).content_type(&content_type).await?
        } else {
            op.writer(&item.id).await?
        };

        let mut stream = Box::pin(item.payload.clone().into_stream());
        while let Some(chunk) = stream.next().await {
            let written = match chunk {
                Ok(chunk) => writer.write(chunk).await,
                Err(err) => Err(opendal::Error::new(
                    opendal::ErrorKind::Unexpected,
                    "source stream failed",
                )
                .set_source(err)),
            };
            if let Err(err) = written {
                if let Err(abort) = writer.abort().await {
                    tracing::debug!(id = %item.id, error = %abort, "could not abort upload");
                }
                return Err(err);
            }
        }
        writer.close().await?;
        Ok(())
    }

    /// Copies the object, falling back to reading the source into the
    /// destination when the service has no native copy.
    async fn copy(op: &Operator, from: &str, to: &str) -> opendal::Result<()> {
        if op.info().full_capability().copy {
            return op.copy(from, to).await;
        }
        let mut reader = op.reader(from).await?.into_bytes_stream(..).await?;
        let mut writer = op.writer(to).await?.into_bytes_sink();
        writer.send_all(&mut reader).await.map_err(|err| {
            opendal::Error::new(opendal::ErrorKind::Unexpected, "copy failed").set_source(err)
        })?;
        writer.close().await.map_err(|err| {
            opendal::Error::new(opendal::ErrorKind::Unexpected, "copy failed").set_source(err)
        })
    }
}

#[async_trait]
impl StoreDriver for ObjectStorageBackend {
    async fn get(&self, id: &str, params: &Params) -> Result<GetResult> {
        let op = self.operator(params)?;
        let meta = Self::stat(&op, id).await?;
        let size = meta.content_length();
        let plan = range::plan(params.range.as_deref(), size);

        let stream = if plan.length == 0 {
            BytesStream::from_stream(futures_util::stream::empty())
        } else {
            let reader = op
                .reader(id)
                .await
                .map_err(|err| Error::storage(format!("could not open object {id}"), err))?;
            BytesStream::from_reader(reader, plan.start..plan.end + 1)
                .await
                .map_err(|err| Error::storage(format!("could not read object {id}"), err))?
        };

        let content_type = meta
            .content_type()
            .map_or_else(|| content_type_for(id), ToString::to_string);
        let mut headers = GetResult::headers(&content_type, &plan, size);
        if let Some(etag) = meta.etag() {
            if let Ok(value) = etag.parse::<HeaderValue>() {
                headers.insert(header::ETAG, value);
            }
        }

        Ok(GetResult {
            header: headers,
            status: plan.status(),
            stream,
        })
    }

    async fn create(&self, item: &StreamItem, params: &Params) -> Result<CreateResult> {
        let op = self.operator(params)?;
        Self::write(&op, item)
            .await
            .map_err(|err| Error::storage(format!("could not write object {}", item.id), err))?;
        Ok(CreateResult::new(item.id.clone()))
    }

    async fn remove(&self, id: &str, params: &Params) -> Result<CreateResult> {
        let op = self.operator(params)?;
        Self::stat(&op, id).await?;
        op.delete(id)
            .await
            .map_err(|err| Error::storage(format!("Could not remove file {id}"), err))?;
        Ok(CreateResult::new(id))
    }

    async fn check_existence(&self, id: &str, params: &Params) -> Result<()> {
        let op = self.operator(params)?;
        Self::stat(&op, id).await.map(|_| ())
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> Result<CreateResult> {
        let op = self.operator(&Params::default())?;
        Self::stat(&op, old_id).await?;

        Self::copy(&op, old_id, new_id).await.map_err(|err| {
            Error::storage(format!("Could not move file {old_id} to {new_id}"), err)
        })?;
        op.delete(old_id).await.map_err(|err| Error::PartialMove {
            from: old_id.to_string(),
            to: new_id.to_string(),
            source: Box::new(err),
        })?;
        Ok(CreateResult::new(new_id))
    }
}
