//! # Error Handling
//!
//! Every failure that leaves a storage backend is one of three kinds:
//! [`ErrorKind::NotFound`], [`ErrorKind::Validation`] or [`ErrorKind::Generic`].
//! Drivers never let `std::io::Error` or `opendal::Error` escape; they wrap them
//! in [`Error::Storage`] and keep the original cause as the error source.

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("File not found: {id}")]
    NotFound { id: String },

    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    Storage {
        message: String,
        #[source]
        source: BoxError,
    },

    #[error("moved `{from}` to `{to}` but could not remove the source object")]
    PartialMove {
        from: String,
        to: String,
        #[source]
        source: BoxError,
    },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Tera(#[from] tera::Error),

    #[error("cannot parse `{1}`: {0}")]
    YAMLFile(#[source] serde_yaml::Error, String),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// The uniform failure taxonomy surfaced by every storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Generic,
}

impl Error {
    /// Build a [`Error::NotFound`] for the given id.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Wrap a backend-native failure, keeping it as the source.
    #[must_use]
    pub fn storage(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Generic,
        }
    }
}

/// Failure codes reported by the upload-materialization layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorCode {
    LimitPartCount,
    LimitFileSize,
    LimitFileCount,
    LimitFieldKey,
    LimitFieldValue,
    LimitFieldCount,
    LimitUnexpectedFile,
    MissingFieldName,
}

impl UploadErrorCode {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::LimitPartCount => "LIMIT_PART_COUNT",
            Self::LimitFileSize => "LIMIT_FILE_SIZE",
            Self::LimitFileCount => "LIMIT_FILE_COUNT",
            Self::LimitFieldKey => "LIMIT_FIELD_KEY",
            Self::LimitFieldValue => "LIMIT_FIELD_VALUE",
            Self::LimitFieldCount => "LIMIT_FIELD_COUNT",
            Self::LimitUnexpectedFile => "LIMIT_UNEXPECTED_FILE",
            Self::MissingFieldName => "MISSING_FIELD_NAME",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::LimitPartCount => "Too many parts",
            Self::LimitFileSize => "File too large",
            Self::LimitFileCount => "Too many files",
            Self::LimitFieldKey => "Field name too long",
            Self::LimitFieldValue => "Field value too long",
            Self::LimitFieldCount => "Too many fields",
            Self::LimitUnexpectedFile => "Unexpected field",
            Self::MissingFieldName => "Field name missing",
        }
    }
}

impl std::fmt::Display for UploadErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for UploadErrorCode {}

/// A failure raised while an inbound upload is being materialized.
#[derive(Debug)]
pub enum UploadFailure {
    /// Already part of the taxonomy, passed through as is.
    Known(Error),
    /// A limit or shape violation detected by the upload layer.
    Coded {
        code: UploadErrorCode,
        field: Option<String>,
    },
    /// Anything else the upload layer could not classify.
    Other(BoxError),
}

impl From<Error> for UploadFailure {
    fn from(err: Error) -> Self {
        Self::Known(err)
    }
}

impl From<UploadErrorCode> for UploadFailure {
    fn from(code: UploadErrorCode) -> Self {
        Self::Coded { code, field: None }
    }
}

/// Map an upload-layer failure into the storage error taxonomy.
///
/// Limit violations become [`Error::Validation`] with a human readable message,
/// errors that already carry a taxonomy kind are returned unchanged and all the
/// rest become a generic error that keeps the cause.
#[must_use]
pub fn translate(failure: UploadFailure) -> Error {
    match failure {
        UploadFailure::Known(err) => err,
        UploadFailure::Coded { code, field } => match code {
            UploadErrorCode::LimitPartCount
            | UploadErrorCode::LimitFileSize
            | UploadErrorCode::LimitFileCount
            | UploadErrorCode::LimitFieldKey
            | UploadErrorCode::LimitFieldValue
            | UploadErrorCode::LimitFieldCount
            | UploadErrorCode::LimitUnexpectedFile => {
                tracing::debug!(code = code.code(), field = ?field, "upload rejected");
                Error::Validation(code.message().to_string())
            }
            UploadErrorCode::MissingFieldName => Error::storage("General Error", code),
        },
        UploadFailure::Other(err) => Error::storage("General Error", err),
    }
}
