//! In-process collaborators for tests and dry runs.
//!
//! `ScriptedPublisher` replays queued results; `StaticGenerator` builds a
//! package from the brief without calling any model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Asset, AssetKind, CaptionVariant, ContentPackage, GateError, Result};
use crate::generation::{GenerationRequest, Generator};
use crate::publisher::{Capability, PublishError, Publisher, RemoteStatus};

// ---------------------------------------------------------------------------
// ScriptedPublisher
// ---------------------------------------------------------------------------

/// Publisher that returns queued results in order, then succeeds.
#[derive(Debug)]
pub struct ScriptedPublisher {
    destination: String,
    capabilities: Vec<Capability>,
    script: Mutex<VecDeque<std::result::Result<String, PublishError>>>,
    calls: AtomicUsize,
    published: Mutex<Vec<ContentPackage>>,
}

impl ScriptedPublisher {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            capabilities: vec![Capability::Publish],
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Queue a failure.
    pub fn then_err(self, err: PublishError) -> Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(Err(err));
        self
    }

    pub fn then_ok(self, external_id: impl Into<String>) -> Self {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(Ok(external_id.into()));
        self
    }

    pub fn push(&self, result: std::result::Result<String, PublishError>) {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).push_back(result);
    }

    /// Number of `publish` calls that reached this publisher.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Packages accepted so far.
    pub fn published(&self) -> Vec<ContentPackage> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn publish(&self, package: &ContentPackage) -> std::result::Result<String, PublishError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let next = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let result = next.unwrap_or_else(|| Ok(format!("{}-post-{n}", self.destination)));
        if result.is_ok() {
            self.published.lock().unwrap_or_else(PoisonError::into_inner).push(package.clone());
        }
        result
    }

    async fn fetch_status(&self, _external_id: &str) -> std::result::Result<RemoteStatus, PublishError> {
        Ok(RemoteStatus::Live)
    }
}

// ---------------------------------------------------------------------------
// StaticGenerator
// ---------------------------------------------------------------------------

/// Generator that derives a package from the brief and the first usage
/// context.
///
/// Captions are written without a disclosure so the quality gate's repair
/// path runs. Hooks can be queued per call; once the queue is empty the
/// default hook is used.
#[derive(Debug)]
pub struct StaticGenerator {
    default_hook: String,
    hooks: Mutex<VecDeque<String>>,
    caption: Option<String>,
    delay: Option<Duration>,
    failure: Option<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Default for StaticGenerator {
    fn default() -> Self {
        Self {
            default_hook: "3 desk upgrades under $20".to_string(),
            hooks: Mutex::new(VecDeque::new()),
            caption: None,
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl StaticGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.default_hook = hook.into();
        self
    }

    /// Use this hook for the next call only.
    pub fn then_hook(self, hook: impl Into<String>) -> Self {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).push_back(hook.into());
        self
    }

    /// Fixed caption text instead of one built from the brief.
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Generator for StaticGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<ContentPackage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(GateError::StageFailed {
                stage: "generate".to_string(),
                message: message.clone(),
            });
        }

        let hook = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.default_hook.clone());
        let brief = &request.brief;
        let caption = self.caption.clone().unwrap_or_else(|| {
            // rights-approved text only, never the raw brief
            let base = request
                .usage_contexts
                .first()
                .map(|c| c.text.clone())
                .unwrap_or_default();
            if brief.product.is_empty() {
                base
            } else {
                format!("{base} featuring the {}", brief.product)
            }
        });

        Ok(ContentPackage {
            package_id: uuid::Uuid::new_v4().to_string(),
            unit_id: request.unit_id.clone(),
            destination: brief.destination.clone(),
            hook,
            captions: vec![CaptionVariant::new(brief.destination.clone(), caption)],
            assets: vec![Asset {
                kind: AssetKind::Video,
                uri: "memory://assets/video.mp4".to_string(),
            }],
            reference_ids: request.references.iter().map(|r| r.id.clone()).collect(),
        })
    }
}
