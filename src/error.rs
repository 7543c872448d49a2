// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for medscan

use thiserror::Error;

/// Result type alias for medscan operations
pub type Result<T> = std::result::Result<T, MedscanError>;

/// medscan error types
///
/// Every variant renders as a single message suitable for showing to the user.
#[derive(Error, Debug)]
pub enum MedscanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Api(#[from] reqwest::Error),

    /// Non-2xx reply; the message is whatever the backend said.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// Rejected on the client before any request went out.
    #[error("{0}")]
    Validation(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF error: {0}")]
    Pdf(String),

    #[error("{0}")]
    Extraction(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
}

impl MedscanError {
    /// HTTP status of a backend rejection, if this is one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            Self::Api(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
