//! # Upload Materialization
//!
//! Drains a `multipart/form-data` body to disk before anything gets stored:
//! every file part of the configured field lands in `dest` under a random
//! name, text parts are kept in memory. Limits are checked while reading and
//! the first violation aborts the whole upload, removing what was written.
use std::{
    collections::{btree_map::Entry, BTreeMap},
    path::{Path, PathBuf},
};

use axum::extract::{multipart::Field, Multipart};
use serde::Serialize;
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
};
use uuid::Uuid;

use crate::{
    config::UploadConfig,
    errors::{UploadErrorCode, UploadFailure},
    storage::{drivers::content_type_for, OneOrMany},
};

type UploadResult<T> = std::result::Result<T, UploadFailure>;

/// A file part written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    /// Form field the part was sent in.
    pub fieldname: String,
    /// File name given by the client.
    pub originalname: String,
    /// Random name of the file inside `dest`, keeping the client's extension.
    pub filename: String,
    pub path: PathBuf,
    pub mimetype: String,
    pub size: u64,
}

/// Everything a multipart body carried.
#[derive(Debug, Default)]
pub struct Uploads {
    /// Files by field, an array when the field is declared as one.
    pub files: BTreeMap<String, OneOrMany<UploadedFile>>,
    /// Text parts by field.
    pub fields: BTreeMap<String, String>,
}

impl Uploads {
    fn push(&mut self, file: UploadedFile, is_array: bool) {
        match self.files.entry(file.fieldname.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(if is_array {
                    OneOrMany::Many(vec![file])
                } else {
                    OneOrMany::One(file)
                });
            }
            Entry::Occupied(mut entry) => {
                let items = match std::mem::replace(entry.get_mut(), OneOrMany::Many(Vec::new())) {
                    OneOrMany::One(first) => vec![first, file],
                    OneOrMany::Many(mut items) => {
                        items.push(file);
                        items
                    }
                };
                entry.insert(OneOrMany::Many(items));
            }
        }
    }

    /// All files, in field order.
    pub fn iter_files(&self) -> impl Iterator<Item = &UploadedFile> {
        self.files.values().flat_map(|files| match files {
            OneOrMany::One(file) => std::slice::from_ref(file).iter(),
            OneOrMany::Many(files) => files.iter(),
        })
    }

    /// Remove every materialized file. Failures are logged.
    pub async fn discard(&self) {
        for file in self.iter_files() {
            remove_quietly(&file.path).await;
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %err, "could not remove upload file");
    }
}

fn other(err: impl std::error::Error + Send + Sync + 'static) -> UploadFailure {
    UploadFailure::Other(Box::new(err))
}

fn coded(code: UploadErrorCode, field: &str) -> UploadFailure {
    UploadFailure::Coded {
        code,
        field: Some(field.to_string()),
    }
}

fn over<T: PartialOrd>(limit: Option<T>, value: T) -> bool {
    limit.is_some_and(|limit| value > limit)
}

/// Write every part of `multipart` according to `config`.
///
/// # Errors
///
/// The first limit violation, a part without a name, or a failure reading
/// the body or writing to `dest`. Nothing is left in `dest` in that case.
pub async fn materialize(
    mut multipart: Multipart,
    config: &UploadConfig,
) -> UploadResult<Uploads> {
    let mut uploads = Uploads::default();
    match collect(&mut multipart, config, &mut uploads).await {
        Ok(()) => {
            tracing::debug!(
                files = uploads.iter_files().count(),
                fields = uploads.fields.len(),
                "upload materialized"
            );
            Ok(uploads)
        }
        Err(failure) => {
            uploads.discard().await;
            Err(failure)
        }
    }
}

async fn collect(
    multipart: &mut Multipart,
    config: &UploadConfig,
    uploads: &mut Uploads,
) -> UploadResult<()> {
    let limits = &config.limits;
    let (mut parts, mut files, mut fields) = (0_usize, 0_usize, 0_usize);

    fs::create_dir_all(&config.dest).await.map_err(other)?;

    while let Some(mut field) = multipart.next_field().await.map_err(other)? {
        parts += 1;
        if over(limits.parts, parts) {
            return Err(UploadErrorCode::LimitPartCount.into());
        }
        let Some(name) = field.name().map(ToString::to_string) else {
            return Err(UploadErrorCode::MissingFieldName.into());
        };
        if over(limits.field_name_size, name.len()) {
            return Err(coded(UploadErrorCode::LimitFieldKey, &name));
        }

        if let Some(originalname) = field.file_name().map(ToString::to_string) {
            files += 1;
            if over(limits.files, files) {
                return Err(coded(UploadErrorCode::LimitFileCount, &name));
            }
            if name != config.field || (!config.is_array && uploads.files.contains_key(&name)) {
                return Err(coded(UploadErrorCode::LimitUnexpectedFile, &name));
            }
            let file = store_file(&mut field, name, originalname, config).await?;
            uploads.push(file, config.is_array);
        } else {
            fields += 1;
            if over(limits.fields, fields) {
                return Err(coded(UploadErrorCode::LimitFieldCount, &name));
            }
            let value = read_value(&mut field, &name, limits.field_size).await?;
            uploads.fields.insert(name, value);
        }
    }
    Ok(())
}

async fn store_file(
    field: &mut Field<'_>,
    fieldname: String,
    originalname: String,
    config: &UploadConfig,
) -> UploadResult<UploadedFile> {
    let ext = Path::new(&originalname)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let filename = format!("{}{ext}", Uuid::new_v4().simple());
    let path = config.dest.join(&filename);
    let mimetype = field
        .content_type()
        .map_or_else(|| content_type_for(&originalname), ToString::to_string);

    match write_part(field, &fieldname, &path, config.limits.file_size).await {
        Ok(size) => Ok(UploadedFile {
            fieldname,
            originalname,
            filename,
            path,
            mimetype,
            size,
        }),
        Err(failure) => {
            remove_quietly(&path).await;
            Err(failure)
        }
    }
}

async fn write_part(
    field: &mut Field<'_>,
    fieldname: &str,
    path: &Path,
    max: Option<u64>,
) -> UploadResult<u64> {
    let mut file = BufWriter::new(fs::File::create(path).await.map_err(other)?);
    let mut size = 0_u64;
    while let Some(chunk) = field.chunk().await.map_err(other)? {
        size += chunk.len() as u64;
        if over(max, size) {
            return Err(coded(UploadErrorCode::LimitFileSize, fieldname));
        }
        file.write_all(&chunk).await.map_err(other)?;
    }
    file.flush().await.map_err(other)?;
    Ok(size)
}

async fn read_value(field: &mut Field<'_>, name: &str, max: Option<u64>) -> UploadResult<String> {
    let mut value = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(other)? {
        value.extend_from_slice(&chunk);
        if over(max, value.len() as u64) {
            return Err(coded(UploadErrorCode::LimitFieldValue, name));
        }
    }
    Ok(String::from_utf8_lossy(&value).into_owned())
}
