//! Facet lookups for browse filters.

use crate::error::MetadataResult;
use async_trait::async_trait;
use serde::Serialize;

/// Distinct filter values in use across live fish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facets {
    /// Tribes from captures and classifications combined.
    pub tribes: Vec<String>,
    pub locations: Vec<String>,
    pub methods: Vec<String>,
    pub categories: Vec<String>,
}

#[async_trait]
pub trait FacetRepo: Send + Sync {
    /// Collect sorted distinct facet values.
    async fn get_facets(&self) -> MetadataResult<Facets>;
}
