//! Comparison: a baseline run and an accelerated run of the same URL.

use pagebench_core::factors::FactorSet;
use pagebench_core::options::TestOptions;
use pagebench_core::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

use super::run::Run;
use crate::repo::Entity;

/// Name of the array field holding the two run ids (reverse lookups).
pub const RUNS_FIELD: &str = "runs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub id: EntityId,
    pub url: String,
    pub options: TestOptions,
    /// `[baseline, variant]`.
    pub runs: [EntityId; 2],
    pub finished: bool,
    /// `None` until finished.
    pub factors: Option<FactorSet>,
    /// The one-shot insight side task has been claimed.
    pub insights_requested: bool,
    pub insights: Option<serde_json::Value>,
    pub finished_at: Option<Timestamp>,
}

impl Comparison {
    /// Build a comparison whose run ids derive from its own id, so the runs
    /// can be (re)materialized idempotently.
    pub fn new(id: EntityId, url: impl Into<String>, options: TestOptions) -> Self {
        let runs = [format!("{id}-base"), format!("{id}-accel")];
        Self {
            id,
            url: url.into(),
            options,
            runs,
            finished: false,
            factors: None,
            insights_requested: false,
            insights: None,
            finished_at: None,
        }
    }

    pub fn baseline_run(&self) -> &str {
        &self.runs[0]
    }

    pub fn variant_run(&self) -> &str {
        &self.runs[1]
    }

    /// Fresh baseline and variant run records for this comparison.
    pub fn new_runs(&self) -> [Run; 2] {
        [
            Run::new(self.runs[0].clone(), self.url.clone(), false, self.options.clone()),
            Run::new(self.runs[1].clone(), self.url.clone(), true, self.options.clone()),
        ]
    }
}

impl Entity for Comparison {
    const KIND: &'static str = "comparison";

    fn id(&self) -> &str {
        &self.id
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_derive_from_comparison_id() {
        let cmp = Comparison::new("abc".into(), "https://example.com", TestOptions::default());
        assert_eq!(cmp.baseline_run(), "abc-base");
        assert_eq!(cmp.variant_run(), "abc-accel");

        let [baseline, variant] = cmp.new_runs();
        assert!(!baseline.variant);
        assert!(variant.variant);
        assert_eq!(variant.url, "https://example.com");
    }

    #[test]
    fn runs_serialize_as_array() {
        let cmp = Comparison::new("abc".into(), "https://example.com", TestOptions::default());
        let json = serde_json::to_value(&cmp).unwrap();
        assert_eq!(json[RUNS_FIELD], serde_json::json!(["abc-base", "abc-accel"]));
    }
}
