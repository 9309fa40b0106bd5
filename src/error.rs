use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to load PDF: {0}")]
    PdfLoad(#[from] lopdf::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid page selection: {0}")]
    InvalidPageSelection(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("page {page} is unavailable: {reason}")]
    PageUnavailable { page: u32, reason: String },

    #[error("no pages available after applying selection")]
    NoPagesSelected,

    #[error("AI fallback response rejected: {0}")]
    AiResponse(String),

    #[error("input text too large ({len} chars, limit {limit}); split it per page")]
    InputTooLarge { len: usize, limit: usize },
}
