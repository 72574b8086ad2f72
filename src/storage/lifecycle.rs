//! # Lifecycle Guard
//!
//! Releases what an inbound `create` acquired: the payload streams and,
//! optionally, the temporary files they were read from. Cleanup is best
//! effort. Failures are logged and never change the outcome of the operation
//! that triggered them.

use std::io;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use super::StreamItem;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UnpipeOptions {
    /// Name of the item field holding a file path to unlink.
    #[serde(default)]
    pub unlink: Option<String>,
}

impl UnpipeOptions {
    #[must_use]
    pub fn unlink(field: impl Into<String>) -> Self {
        Self {
            unlink: Some(field.into()),
        }
    }
}

/// Destroy every item stream and unlink the configured side channel paths.
///
/// Items are processed concurrently. Running it again over the same items is
/// harmless: streams are only released once.
pub async fn unpipe(items: &[StreamItem], options: &UnpipeOptions) {
    join_all(items.iter().map(|item| release(item, options))).await;
}

async fn release(item: &StreamItem, options: &UnpipeOptions) {
    if let Some(stream) = item.stream() {
        if stream.destroy() {
            tracing::trace!(id = %item.id, "stream released");
        }
    }

    let Some(path) = options
        .unlink
        .as_ref()
        .and_then(|field| item.fields.get(field))
    else {
        return;
    };

    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(id = %item.id, path = %path, "unlinked upload file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(id = %item.id, path = %path, "upload file already gone");
        }
        Err(err) => {
            tracing::warn!(id = %item.id, path = %path, error = %err, "could not unlink upload file");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::storage::stream::tests::counted_stream;

    #[tokio::test]
    async fn destroys_streams_and_unlinks_paths() {
        let tree_fs = tree_fs::TreeBuilder::default()
            .drop(true)
            .create()
            .expect("create temp dir");

        let drops = Arc::new(AtomicUsize::new(0));
        let items: Vec<StreamItem> = (0..3)
            .map(|i| {
                let path = tree_fs.root.join(format!("upload-{i}"));
                std::fs::write(&path, "data").unwrap();
                StreamItem::new(format!("{i}.txt"), counted_stream(vec!["data"], drops.clone()))
                    .with_field("path", path.display().to_string())
            })
            .collect();

        let options = UnpipeOptions::unlink("path");
        unpipe(&items, &options).await;
        unpipe(&items, &options).await;

        assert_eq!(drops.load(Ordering::SeqCst), 3);
        for item in &items {
            assert!(item.stream().unwrap().is_destroyed());
            assert!(!std::path::Path::new(&item.fields["path"]).exists());
        }
    }

    #[tokio::test]
    async fn unlink_failures_are_swallowed() {
        let tree_fs = tree_fs::TreeBuilder::default()
            .drop(true)
            .create()
            .expect("create temp dir");

        // a directory cannot be removed with remove_file
        let dir = tree_fs.root.join("not-a-file");
        std::fs::create_dir(&dir).unwrap();

        let drops = Arc::new(AtomicUsize::new(0));
        let items = vec![
            StreamItem::new("a.txt", counted_stream(vec!["a"], drops.clone()))
                .with_field("path", dir.display().to_string()),
            StreamItem::new("b.txt", counted_stream(vec!["b"], drops.clone()))
                .with_field("path", tree_fs.root.join("missing").display().to_string()),
        ];

        unpipe(&items, &UnpipeOptions::unlink("path")).await;

        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn without_unlink_only_streams_are_released() {
        let tree_fs = tree_fs::TreeBuilder::default()
            .drop(true)
            .create()
            .expect("create temp dir");
        let path = tree_fs.root.join("keep");
        std::fs::write(&path, "data").unwrap();

        let drops = Arc::new(AtomicUsize::new(0));
        let items = vec![
            StreamItem::new("a.txt", counted_stream(vec!["a"], drops.clone()))
                .with_field("path", path.display().to_string()),
            StreamItem::from_buffer("b.txt", "b"),
        ];

        unpipe(&items, &UnpipeOptions::default()).await;

        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(path.exists());
    }
}
