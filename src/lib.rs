#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
//! ## filestream
//!
//! Fetch, store, remove and move objects by id, the same way on a local
//! filesystem or an object store, with HTTP range reads and guaranteed
//! release of upload streams.
//!
//! ## Available Features
//!
//! | Feature          | Default | Description                   |
//! |------------------|---------|-------------------------------|
//! | `storage_aws_s3` | false   | S3 backed object storage.     |
pub use self::errors::Error;

pub mod config;
pub mod controller;
pub mod errors;
pub mod logger;
pub mod storage;

/// Application results options list
pub type Result<T> = std::result::Result<T, Error>;
