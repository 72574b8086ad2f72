//! # Local Filesystem Driver
//!
//! Ids are joined as relative paths under a root directory, so `a/b/c.txt`
//! lands in `<root>/a/b/c.txt`. Ids are not sanitized: an id containing `..`
//! resolves outside of the root.
use std::{
    io::{self, SeekFrom},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter},
};

use super::{content_type_for, CreateResult, GetResult, StoreDriver};
use crate::{
    storage::{range, stream::BytesStream, Params, Payload, StreamItem},
    Error, Result,
};

#[derive(Debug, Clone)]
pub struct LocalFilesystemBackend {
    root: PathBuf,
}

/// Create new filesystem storage rooted at `root`.
///
/// # Examples
///```
/// use filestream::storage::drivers::local;
/// let file_system_driver = local::new("uploads");
/// ```
#[must_use]
pub fn new(root: impl Into<PathBuf>) -> LocalFilesystemBackend {
    LocalFilesystemBackend::new(root)
}

impl LocalFilesystemBackend {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    async fn stat(&self, id: &str) -> Result<std::fs::Metadata> {
        match fs::metadata(self.path_of(id)).await {
            Ok(meta) if meta.is_file() => Ok(meta),
            Ok(_) => Err(Error::not_found(id)),
            Err(err) => {
                tracing::debug!(id, error = %err, "stat failed");
                Err(Error::not_found(id))
            }
        }
    }

    /// Create the parent directory of `path` when missing.
    async fn ensure_parent(path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(dir) => fs::create_dir_all(dir).await,
            None => Ok(()),
        }
    }

    async fn write_stream(path: &Path, stream: BytesStream) -> io::Result<()> {
        let mut file = BufWriter::new(fs::File::create(path).await?);
        let mut stream = Box::pin(stream);
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.into_inner().sync_all().await
    }
}

#[async_trait]
impl StoreDriver for LocalFilesystemBackend {
    async fn get(&self, id: &str, params: &Params) -> Result<GetResult> {
        let meta = self.stat(id).await?;
        let size = meta.len();
        let plan = range::plan(params.range.as_deref(), size);

        let mut file = fs::File::open(self.path_of(id))
            .await
            .map_err(|err| Error::storage(format!("could not open file {id}"), err))?;
        if plan.start > 0 {
            file.seek(SeekFrom::Start(plan.start))
                .await
                .map_err(|err| Error::storage(format!("could not read file {id}"), err))?;
        }
        let stream = BytesStream::from_async_read(file.take(plan.length));

        Ok(GetResult {
            header: GetResult::headers(&content_type_for(id), &plan, size),
            status: plan.status(),
            stream,
        })
    }

    async fn create(&self, item: &StreamItem, _params: &Params) -> Result<CreateResult> {
        let path = self.path_of(&item.id);
        Self::ensure_parent(&path).await.map_err(|err| {
            Error::storage(format!("could not create directory for {}", item.id), err)
        })?;

        let written = match &item.payload {
            Payload::Buffer(data) => fs::write(&path, data).await,
            Payload::Stream(_) => Self::write_stream(&path, item.payload.clone().into_stream()).await,
        };

        if let Err(err) = written {
            if matches!(item.payload, Payload::Stream(_)) {
                if let Err(cleanup) = fs::remove_file(&path).await {
                    tracing::debug!(id = %item.id, error = %cleanup, "could not remove partial file");
                }
            }
            return Err(Error::storage(format!("could not write file {}", item.id), err));
        }

        Ok(CreateResult::new(item.id.clone()))
    }

    async fn remove(&self, id: &str, params: &Params) -> Result<CreateResult> {
        self.check_existence(id, params).await?;

        fs::remove_file(self.path_of(id))
            .await
            .map_err(|err| Error::storage(format!("Could not remove file {id}"), err))?;
        Ok(CreateResult::new(id))
    }

    async fn check_existence(&self, id: &str, _params: &Params) -> Result<()> {
        self.stat(id).await.map(|_| ())
    }

    async fn rename(&self, old_id: &str, new_id: &str) -> Result<CreateResult> {
        self.check_existence(old_id, &Params::default()).await?;

        let to = self.path_of(new_id);
        let moved = match Self::ensure_parent(&to).await {
            Ok(()) => fs::rename(self.path_of(old_id), &to).await,
            Err(err) => Err(err),
        };
        moved.map_err(|err| {
            Error::storage(format!("Could not move file {old_id} to {new_id}"), err)
        })?;
        Ok(CreateResult::new(new_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use axum::http::{header, StatusCode};
    use bytes::Bytes;
    use futures_util::stream;

    use super::*;
    use crate::{
        errors::ErrorKind,
        storage::{stream::tests::counted_stream, OneOrMany, Storage},
    };

    const CONTENT: &str = "some data download file!";

    fn temp_root() -> tree_fs::Tree {
        tree_fs::TreeBuilder::default()
            .drop(true)
            .create()
            .expect("create temp dir")
    }

    async fn read_all(result: GetResult) -> Bytes {
        result.stream.collect().await.expect("stream bytes")
    }

    #[tokio::test]
    async fn round_trip_from_stream() {
        let tree_fs = temp_root();
        let driver = new(&tree_fs.root);
        let drops = Arc::new(AtomicUsize::new(0));
        let item = StreamItem::new("a.txt", counted_stream(vec!["some ", "data"], drops));

        let res = driver.create(&item, &Params::default()).await.unwrap();
        assert_eq!(res, CreateResult::new("a.txt"));

        let file = driver.get("a.txt", &Params::default()).await.unwrap();
        assert_eq!(file.status, StatusCode::OK);
        assert_eq!(file.header[header::CONTENT_LENGTH], "9");
        assert_eq!(file.header[header::CONTENT_TYPE], "text/plain");
        assert_eq!(file.header[header::CONTENT_DISPOSITION], "inline");
        assert_eq!(file.header[header::ACCEPT_RANGES], "bytes");
        assert_eq!(read_all(file).await, Bytes::from("some data"));
    }

    #[tokio::test]
    async fn round_trip_from_buffer() {
        let tree_fs = temp_root();
        let driver = new(&tree_fs.root);
        let item = StreamItem::from_buffer("test.txt", "some data");

        driver.create(&item, &Params::default()).await.unwrap();

        assert_eq!(
            std::fs::read(tree_fs.root.join("test.txt")).unwrap(),
            b"some data"
        );
    }

    #[tokio::test]
    async fn reads_requested_range_only() {
        let tree_fs = temp_root();
        std::fs::write(tree_fs.root.join("range.txt"), CONTENT).unwrap();
        let driver = new(&tree_fs.root);

        let file = driver
            .get("range.txt", &Params::default().with_range("bytes=0-4"))
            .await
            .unwrap();
        assert_eq!(file.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(file.header[header::CONTENT_RANGE], "bytes 0-4/24");
        assert_eq!(file.header[header::CONTENT_LENGTH], "5");
        assert_eq!(read_all(file).await, Bytes::from("some "));

        let file = driver
            .get("range.txt", &Params::default().with_range("bytes=20-"))
            .await
            .unwrap();
        assert_eq!(file.header[header::CONTENT_RANGE], "bytes 20-23/24");
        assert_eq!(read_all(file).await, Bytes::from("ile!"));
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let tree_fs = temp_root();
        let driver = new(&tree_fs.root);

        let err = driver
            .get("does-not-exist", &Params::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = driver
            .remove("does-not-exist", &Params::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = driver.rename("does-not-exist", "b.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!tree_fs.root.join("b.txt").exists());
    }

    #[tokio::test]
    async fn directories_are_not_objects() {
        let tree_fs = temp_root();
        std::fs::create_dir(tree_fs.root.join("folder")).unwrap();
        let driver = new(&tree_fs.root);

        let err = driver.get("folder", &Params::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn removes_file() {
        let tree_fs = temp_root();
        std::fs::write(tree_fs.root.join("remove.txt"), CONTENT).unwrap();
        let driver = new(&tree_fs.root);

        let res = driver.remove("remove.txt", &Params::default()).await.unwrap();
        assert_eq!(res, CreateResult::new("remove.txt"));
        assert!(!tree_fs.root.join("remove.txt").exists());
    }

    #[tokio::test]
    async fn moves_file_into_new_directory() {
        let tree_fs = temp_root();
        std::fs::write(tree_fs.root.join("move.txt"), CONTENT).unwrap();
        let driver = new(&tree_fs.root);

        let res = driver.rename("move.txt", "moved/deep/move-2.txt").await.unwrap();
        assert_eq!(res, CreateResult::new("moved/deep/move-2.txt"));

        assert!(!tree_fs.root.join("move.txt").exists());
        let err = driver.get("move.txt", &Params::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let file = driver
            .get("moved/deep/move-2.txt", &Params::default())
            .await
            .unwrap();
        assert_eq!(read_all(file).await, Bytes::from(CONTENT));
    }

    #[tokio::test]
    async fn creates_nested_ids() {
        let tree_fs = temp_root();
        let driver = new(&tree_fs.root);
        let item = StreamItem::from_buffer("test/test/nested.txt", "nested");

        driver.create(&item, &Params::default()).await.unwrap();
        driver.create(&item, &Params::default()).await.unwrap();

        assert_eq!(
            std::fs::read(tree_fs.root.join("test").join("test").join("nested.txt")).unwrap(),
            b"nested"
        );
    }

    #[tokio::test]
    async fn failing_item_does_not_stop_siblings() {
        let tree_fs = temp_root();
        let storage = Storage::new(new(&tree_fs.root));

        let broken = stream::iter(vec![
            Ok(Bytes::from("partial")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "client went away")),
        ]);
        let drops = Arc::new(AtomicUsize::new(0));
        let items = vec![
            StreamItem::new("broken.txt", BytesStream::from_stream(broken)),
            StreamItem::new("ok.txt", counted_stream(vec!["fine"], drops.clone())),
        ];

        let err = storage
            .create(OneOrMany::Many(items), &Params::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generic);

        assert_eq!(std::fs::read(tree_fs.root.join("ok.txt")).unwrap(), b"fine");
        assert!(!tree_fs.root.join("broken.txt").exists());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_uploads_are_isolated() {
        let tree_fs = temp_root();
        let storage = Storage::new(new(&tree_fs.root));
        let params = Params::default();

        let first = storage.create(
            OneOrMany::One(StreamItem::from_buffer("one.txt", "one")),
            &params,
        );
        let second = storage.create(
            OneOrMany::One(StreamItem::from_buffer("two.txt", "two")),
            &params,
        );
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap(), OneOrMany::One(CreateResult::new("one.txt")));
        assert_eq!(second.unwrap(), OneOrMany::One(CreateResult::new("two.txt")));
    }
}
