//! Hooks that run on the items of a `create` before they reach the backend.

use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Batch, StreamItem};
use crate::Result;

#[async_trait]
pub trait BeforeCreate: Send + Sync {
    /// Inspect or rewrite the items. Returning an error aborts the `create`;
    /// the lifecycle guard still runs.
    ///
    /// # Errors
    ///
    /// Whatever the hook decides to reject the batch with.
    async fn before_create(&self, items: &mut Batch<StreamItem>) -> Result<()>;
}

/// Gives every item a random hex id, keeping the extension of its
/// `filename` field (or of its current id).
#[derive(Debug, Clone, Default)]
pub struct AssignRandomId {
    prefix: Option<String>,
}

impl AssignRandomId {
    /// Ids are placed under `prefix`, e.g. `avatars/2024` gives
    /// `avatars/2024/<hex>.png`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn generate(&self, item: &StreamItem) -> String {
        let hash = Uuid::new_v4().simple().to_string();

        let source = item.fields.get("filename").unwrap_or(&item.id);
        let ext = Path::new(source)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        match &self.prefix {
            Some(prefix) => format!("{}/{hash}{ext}", prefix.trim_end_matches('/')),
            None => format!("{hash}{ext}"),
        }
    }
}

#[async_trait]
impl BeforeCreate for AssignRandomId {
    async fn before_create(&self, items: &mut Batch<StreamItem>) -> Result<()> {
        for item in &mut items.items {
            item.id = self.generate(item);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OneOrMany;

    #[tokio::test]
    async fn keeps_extension_of_filename() {
        let mut batch = Batch::from(OneOrMany::Many(vec![
            StreamItem::from_buffer("upload-1", "a").with_field("filename", "photo.png"),
            StreamItem::from_buffer("notes.txt", "b"),
            StreamItem::from_buffer("plain", "c"),
        ]));

        AssignRandomId::default()
            .before_create(&mut batch)
            .await
            .unwrap();

        let ids: Vec<&str> = batch.items.iter().map(|i| i.id.as_str()).collect();
        assert!(ids[0].ends_with(".png"));
        assert_eq!(ids[0].len(), 32 + 4);
        assert!(ids[1].ends_with(".txt"));
        assert_eq!(ids[2].len(), 32);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn nests_under_prefix() {
        let mut batch = Batch::from(OneOrMany::One(StreamItem::from_buffer("a.txt", "a")));

        AssignRandomId::with_prefix("test/test/")
            .before_create(&mut batch)
            .await
            .unwrap();

        let id = &batch.items[0].id;
        assert!(id.starts_with("test/test/"));
        assert!(id.ends_with(".txt"));
        assert!(!batch.was_array);
    }
}
