//! Generation collaborator.

use async_trait::async_trait;

use crate::domain::{ContentBrief, ContentPackage, Reference, Result, UsageContext};

/// Everything the generator may use. Usage contexts are the rights-approved
/// text for each reference; the generator must not reach past them.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub unit_id: String,
    pub brief: ContentBrief,
    pub references: Vec<Reference>,
    pub usage_contexts: Vec<UsageContext>,
    /// Notes from the quality gate's last REWRITE, empty on the first pass
    pub revision_notes: Vec<String>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<ContentPackage>;
}
