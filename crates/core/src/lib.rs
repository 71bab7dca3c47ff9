//! Core domain types and shared logic for the fishlore catalog.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Catalog identifiers and validated drafts for fish, captures and
//!   tribal classifications
//! - Search parameter normalization and keyset pagination
//! - Media kinds and the pending/permanent object key layout
//! - Token scopes and authorization
//! - Configuration shared by the server and tools

pub mod catalog;
pub mod config;
pub mod error;
pub mod media;
pub mod search;
pub mod token;

pub use catalog::{
    CaptureDraft, CaptureId, ClassificationDraft, ClassificationId, FishDraft, FishId, MediaId,
};
pub use error::{Error, Result};
pub use media::{MediaKey, MediaKind};
pub use search::{FishSearchPage, FishSearchParams, FishSearchRequest, PageInfo, SearchLimits};
pub use token::{Token, TokenId, TokenScope};
