//! # Storage
//!
//! A small set of operations (`get`, `create`, `remove`, `move`) that behave
//! the same whether objects live on the local filesystem or in an object store.
//!
//! [`Storage`] is the entry point. It owns a [`Backend`], runs the
//! [`BeforeCreate`] hooks and guarantees that the lifecycle guard releases
//! every uploaded stream once a `create` is over, whatever its outcome.
//!
//! ```rust
//! use bytes::Bytes;
//! use filestream::storage::{drivers::object, OneOrMany, Params, Storage, StreamItem};
//!
//! # async fn run() -> filestream::Result<()> {
//! let storage = Storage::new(object::mem("uploads"));
//! let item = StreamItem::new("notes.txt", Bytes::from("some data"));
//! storage.create(OneOrMany::One(item), &Params::default()).await?;
//! let file = storage.get("notes.txt", &Params::default()).await?;
//! assert_eq!(file.stream.collect().await?, Bytes::from("some data"));
//! # Ok(())
//! # }
//! ```

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;

pub mod batch;
pub mod drivers;
pub mod hooks;
pub mod lifecycle;
pub mod range;
pub mod stream;

pub use batch::{Batch, OneOrMany};
pub use drivers::{Backend, CreateResult, GetResult, StoreDriver};
pub use hooks::{AssignRandomId, BeforeCreate};
pub use lifecycle::UnpipeOptions;
pub use stream::{BytesStream, ItemStream, Payload};

use crate::{config, Result};

/// Per call parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    /// Raw `Range` header value.
    pub range: Option<String>,
    /// Bucket overriding the configured one. Ignored by the filesystem backend.
    pub bucket: Option<String>,
}

impl Params {
    #[must_use]
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }
}

/// One object to persist.
#[derive(Debug, Clone)]
pub struct StreamItem {
    pub id: String,
    pub payload: Payload,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    /// Side channel attributes, such as the `path` of a temporary upload file.
    pub fields: BTreeMap<String, String>,
}

impl StreamItem {
    pub fn new(id: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            mime_type: None,
            size: None,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_buffer(id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(id, Payload::Buffer(data.into()))
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// The stream handle of the payload, if it is one.
    #[must_use]
    pub const fn stream(&self) -> Option<&ItemStream> {
        match &self.payload {
            Payload::Stream(stream) => Some(stream),
            Payload::Buffer(_) => None,
        }
    }
}

/// The storage service.
pub struct Storage {
    backend: Backend,
    unpipe: UnpipeOptions,
    hooks: Vec<Arc<dyn BeforeCreate>>,
}

impl Storage {
    #[must_use]
    pub fn new(backend: impl Into<Backend>) -> Self {
        Self {
            backend: backend.into(),
            unpipe: UnpipeOptions::default(),
            hooks: Vec::new(),
        }
    }

    /// Build the service described by the `storage` configuration section.
    ///
    /// # Errors
    ///
    /// When the backend cannot be initialized.
    pub fn from_config(config: &config::StorageConfig) -> Result<Self> {
        Ok(Self::new(Backend::from_config(&config.backend)?).with_unpipe(config.unpipe.clone()))
    }

    /// Configure what the lifecycle guard cleans up after each `create`.
    #[must_use]
    pub fn with_unpipe(mut self, unpipe: UnpipeOptions) -> Self {
        self.unpipe = unpipe;
        self
    }

    /// Register a hook that runs on the items before they are persisted.
    #[must_use]
    pub fn with_hook(mut self, hook: impl BeforeCreate + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub const fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when `id` does not exist.
    pub async fn get(&self, id: &str, params: &Params) -> Result<GetResult> {
        tracing::debug!(id, range = ?params.range, "get");
        self.backend.get(id, params).await
    }

    /// Persists one item or an array of items concurrently, answering in the
    /// same shape and order.
    ///
    /// The lifecycle guard runs after the hooks and the backend, on success as
    /// well as on failure, before the outcome is returned.
    ///
    /// # Errors
    ///
    /// The first failure among the hooks or the items. Other items still run
    /// to completion.
    pub async fn create(
        &self,
        data: OneOrMany<StreamItem>,
        params: &Params,
    ) -> Result<OneOrMany<CreateResult>> {
        let mut batch = Batch::from(data);
        let outcome = self.persist(&mut batch, params).await;
        lifecycle::unpipe(&batch.items, &self.unpipe).await;
        outcome
    }

    async fn persist(
        &self,
        batch: &mut Batch<StreamItem>,
        params: &Params,
    ) -> Result<OneOrMany<CreateResult>> {
        for hook in &self.hooks {
            hook.before_create(batch).await?;
        }
        let results = batch::for_each_concurrent(&batch.items, |item| {
            tracing::debug!(id = %item.id, "create");
            self.backend.create(item, params)
        })
        .await?;
        Ok(batch.with_items(results).into_shape())
    }

    /// Deletes one id or an array of ids.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when an id does not exist.
    pub async fn remove(
        &self,
        ids: OneOrMany<String>,
        params: &Params,
    ) -> Result<OneOrMany<CreateResult>> {
        let batch = Batch::from(ids);
        let results = batch::for_each_concurrent(&batch.items, |id| {
            tracing::debug!(id = %id, "remove");
            self.backend.remove(id, params)
        })
        .await?;
        Ok(batch.with_items(results).into_shape())
    }

    /// Succeeds silently when `id` exists.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when it does not.
    pub async fn check_existence(&self, id: &str, params: &Params) -> Result<()> {
        self.backend.check_existence(id, params).await
    }

    /// Moves `old_id` to `new_id`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotFound`] when `old_id` does not exist, a generic error
    /// when the move fails.
    pub async fn rename(&self, old_id: &str, new_id: &str) -> Result<CreateResult> {
        tracing::debug!(old_id, new_id, "move");
        self.backend.rename(old_id, new_id).await
    }
}
