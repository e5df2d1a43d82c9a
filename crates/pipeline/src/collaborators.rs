//! Interfaces to the external collaborators of the engine, with minimal
//! defaults.
//!
//! Script generation, ad-domain classification, and page insights live
//! outside this system. The defaults here are enough to run end to end;
//! real deployments inject their own implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagebench_core::cache::TtlCache;
use pagebench_core::options::StageKind;

/// How long a domain classification stays cached.
pub const CLASSIFICATION_TTL: Duration = Duration::from_secs(3600);

/// How long per-URL insights stay cached.
pub const INSIGHTS_TTL: Duration = Duration::from_secs(900);

/// Entry bound for both caches.
pub const CACHE_CAPACITY: usize = 4096;

#[derive(Debug, thiserror::Error)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: &'static str,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self {
            collaborator,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

/// Produces the benchmark script for one stage of a run.
pub trait ScriptGenerator: Send + Sync {
    fn generate(&self, url: &str, variant: bool, stage: StageKind) -> String;
}

/// Request header the acceleration layer keys on.
pub const ACCELERATION_HEADER: &str = "X-Pagebench-Accelerate";

/// Tab-separated WebPageTest script: baseline runs navigate plainly,
/// variant runs set the acceleration header first. The config probe only
/// navigates (its result is not measured).
#[derive(Debug, Default, Clone)]
pub struct DefaultScriptGenerator;

impl ScriptGenerator for DefaultScriptGenerator {
    fn generate(&self, url: &str, variant: bool, stage: StageKind) -> String {
        let mut lines = Vec::with_capacity(4);
        if variant {
            lines.push(format!("setHeader\t{ACCELERATION_HEADER}: on"));
        }
        match stage {
            StageKind::Warmup => {
                lines.push("logData\t0".to_string());
                lines.push(format!("navigate\t{url}"));
            }
            StageKind::ConfigProbe => {
                lines.push("logData\t0".to_string());
                lines.push(format!("navigate\t{url}"));
                lines.push("logData\t1".to_string());
            }
            StageKind::Performance => lines.push(format!("navigate\t{url}")),
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Domain classification
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DomainClassifier: Send + Sync {
    async fn is_ad_domain(&self, host: &str) -> Result<bool, CollaboratorError>;
}

/// Classifies by suffix match against a fixed list of ad-serving domains.
#[derive(Debug, Clone)]
pub struct SuffixDomainClassifier {
    suffixes: Vec<String>,
}

impl SuffixDomainClassifier {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for SuffixDomainClassifier {
    fn default() -> Self {
        Self::new([
            "doubleclick.net",
            "googlesyndication.com",
            "googleadservices.com",
            "adnxs.com",
            "adsrvr.org",
            "criteo.com",
            "taboola.com",
            "outbrain.com",
            "amazon-adsystem.com",
        ])
    }
}

#[async_trait]
impl DomainClassifier for SuffixDomainClassifier {
    async fn is_ad_domain(&self, host: &str) -> Result<bool, CollaboratorError> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        Ok(self.suffixes.iter().any(|suffix| {
            host == *suffix
                || host
                    .strip_suffix(suffix.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        }))
    }
}

/// Wraps a classifier with a TTL cache keyed by host.
pub struct CachedDomainClassifier {
    inner: Arc<dyn DomainClassifier>,
    cache: TtlCache<String, bool>,
}

impl CachedDomainClassifier {
    pub fn new(inner: Arc<dyn DomainClassifier>, cache: TtlCache<String, bool>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl DomainClassifier for CachedDomainClassifier {
    async fn is_ad_domain(&self, host: &str) -> Result<bool, CollaboratorError> {
        let key = host.to_ascii_lowercase();
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let verdict = self.inner.is_ad_domain(host).await?;
        self.cache.insert(key, verdict);
        Ok(verdict)
    }
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

/// Third-party page insights (e.g. a lab audit) for a URL.
#[async_trait]
pub trait InsightProvider: Send + Sync {
    /// `Ok(None)` when the provider has nothing for this URL.
    async fn fetch(
        &self,
        url: &str,
        mobile: bool,
    ) -> Result<Option<serde_json::Value>, CollaboratorError>;
}

/// Provider used when no insight source is configured.
#[derive(Debug, Default, Clone)]
pub struct NoInsights;

#[async_trait]
impl InsightProvider for NoInsights {
    async fn fetch(
        &self,
        _url: &str,
        _mobile: bool,
    ) -> Result<Option<serde_json::Value>, CollaboratorError> {
        Ok(None)
    }
}

/// The collaborator set injected into the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub scripts: Arc<dyn ScriptGenerator>,
    pub classifier: Arc<dyn DomainClassifier>,
    pub insights: Arc<dyn InsightProvider>,
    /// Per-URL insight results, keyed by `(url, mobile)`.
    pub insight_cache: Arc<TtlCache<(String, bool), serde_json::Value>>,
}

impl Collaborators {
    /// Defaults with the classifier wrapped in its cache.
    pub fn with(
        scripts: Arc<dyn ScriptGenerator>,
        classifier: Arc<dyn DomainClassifier>,
        insights: Arc<dyn InsightProvider>,
    ) -> Self {
        Self {
            scripts,
            classifier: Arc::new(CachedDomainClassifier::new(
                classifier,
                TtlCache::new(CLASSIFICATION_TTL, CACHE_CAPACITY),
            )),
            insights,
            insight_cache: Arc::new(TtlCache::new(INSIGHTS_TTL, CACHE_CAPACITY)),
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::with(
            Arc::new(DefaultScriptGenerator),
            Arc::new(SuffixDomainClassifier::default()),
            Arc::new(NoInsights),
        )
    }
}
