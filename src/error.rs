// src/error.rs

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between an upload (or report request) and
/// its JSON answer.
#[derive(Debug, Error)]
pub enum Error {
    /// A segmentation anchor is missing from the document text.
    #[error("anchor {anchor:?} not found in document text")]
    AnchorNotFound { anchor: &'static str },

    /// The token stream does not divide evenly into rows.
    #[error("malformed table: {tokens} tokens is not a multiple of {width} ({trailing} trailing)")]
    MalformedTable {
        tokens: usize,
        width: usize,
        trailing: usize,
    },

    #[error("module {0} not found")]
    UnknownModule(String),

    #[error("report {0} not found")]
    UnknownReport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad upload: {0}")]
    BadUpload(String),

    /// The PDF parsed but yielded no usable text (scanned or corrupt).
    #[error("could not read PDF text: {0}")]
    UnreadablePdf(String),

    /// The model answer could not be unwrapped into the expected JSON.
    #[error("generation failed: {0}")]
    UpstreamGeneration(String),

    #[error("invalid value {value:?} in column {column}")]
    InvalidField { column: &'static str, value: String },

    #[error("invoice {digest} was already imported")]
    AlreadyImported { digest: String },

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Protocol-level class of an error, for whatever surface sits on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotFound,
    BadRequest,
    Internal,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::NotFound => 404,
            Status::BadRequest => 400,
            Status::Internal => 500,
        }
    }
}

/// Error body handed back to the caller.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub detail: String,
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::UnknownModule(_) | Error::UnknownReport(_) => Status::NotFound,
            Error::AnchorNotFound { .. }
            | Error::MalformedTable { .. }
            | Error::Io(_)
            | Error::BadUpload(_)
            | Error::UnreadablePdf(_)
            | Error::UpstreamGeneration(_)
            | Error::InvalidField { .. }
            | Error::AlreadyImported { .. } => Status::BadRequest,
            Error::Store(_) | Error::Http(_) | Error::Json(_) | Error::Config(_) => {
                Status::Internal
            }
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            status: self.status().code(),
            detail: self.to_string(),
        }
    }
}
