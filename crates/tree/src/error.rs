use crate::value::TypeTag;

/// Errors raised by tree primitives.
///
/// These carry path context but are never logged here: callers decide
/// whether a failed lookup is exceptional.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path '{path}' not found")]
    PathNotFound { path: String },

    #[error("no attribute '{key}' at path '{path}'")]
    AttributeNotFound { path: String, key: String },

    #[error("type mismatch at '{path}': requested {requested}, stored {stored}")]
    TypeMismatch {
        path: String,
        requested: TypeTag,
        stored: TypeTag,
    },

    #[error("cannot cast {from} to {to}: {detail}")]
    CastFailed {
        from: TypeTag,
        to: TypeTag,
        detail: String,
    },

    #[error("{0}")]
    Logic(String),

    #[error("malformed wire data: {0}")]
    Codec(String),
}

impl Error {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Error::PathNotFound { path: path.into() }
    }

    pub(crate) fn mismatch(path: impl Into<String>, requested: TypeTag, stored: TypeTag) -> Self {
        Error::TypeMismatch {
            path: path.into(),
            requested,
            stored,
        }
    }

    pub(crate) fn cast(from: TypeTag, to: TypeTag, detail: impl Into<String>) -> Self {
        Error::CastFailed {
            from,
            to,
            detail: detail.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
