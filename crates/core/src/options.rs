//! Test options and the per-run stage plan.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default test agent location when none is requested.
pub const DEFAULT_LOCATION: &str = "Dulles:Chrome";

/// Default connectivity profile.
pub const DEFAULT_CONNECTIVITY: &str = "Cable";

/// Upper bound on repetitions for a single series.
pub const MAX_REPETITIONS: u32 = 50;

/// Options forwarded to the remote benchmark service with every submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOptions {
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_connectivity")]
    pub connectivity: String,
    /// Emulate a mobile device.
    #[serde(default)]
    pub mobile: bool,
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

fn default_connectivity() -> String {
    DEFAULT_CONNECTIVITY.to_string()
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            location: default_location(),
            connectivity: default_connectivity(),
            mobile: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// A sub-step of a run, each backed by its own remote submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Primes the acceleration layer's caches for the target URL.
    Warmup,
    /// Verifies the acceleration layer is actually serving the page.
    ConfigProbe,
    /// The measured load whose metrics are kept.
    Performance,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::ConfigProbe => "config_probe",
            Self::Performance => "performance",
        }
    }

    /// `true` for the stages that run before performance on variant runs.
    pub fn is_staging(self) -> bool {
        !matches!(self, Self::Performance)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const BASELINE_PLAN: &[StageKind] = &[StageKind::Performance];

const VARIANT_PLAN: &[StageKind] = &[
    StageKind::Warmup,
    StageKind::ConfigProbe,
    StageKind::Performance,
];

/// Ordered stages a run executes. Baseline runs skip staging.
pub fn stage_plan(variant: bool) -> &'static [StageKind] {
    if variant {
        VARIANT_PLAN
    } else {
        BASELINE_PLAN
    }
}

/// Validate a requested repetition count.
pub fn validate_repetitions(repetitions: u32) -> Result<(), CoreError> {
    if repetitions == 0 || repetitions > MAX_REPETITIONS {
        return Err(CoreError::Validation(format!(
            "repetitions must be between 1 and {MAX_REPETITIONS}, got {repetitions}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_plan_is_performance_only() {
        assert_eq!(stage_plan(false), &[StageKind::Performance]);
    }

    #[test]
    fn variant_plan_stages_before_performance() {
        let plan = stage_plan(true);
        assert_eq!(plan.last(), Some(&StageKind::Performance));
        assert!(plan[..plan.len() - 1].iter().all(|s| s.is_staging()));
    }

    #[test]
    fn options_fill_defaults_from_partial_json() {
        let opts: TestOptions = serde_json::from_value(serde_json::json!({"mobile": true})).unwrap();
        assert_eq!(opts.location, DEFAULT_LOCATION);
        assert_eq!(opts.connectivity, DEFAULT_CONNECTIVITY);
        assert!(opts.mobile);
    }

    #[test]
    fn repetitions_bounds() {
        assert!(validate_repetitions(1).is_ok());
        assert!(validate_repetitions(MAX_REPETITIONS).is_ok());
        assert!(validate_repetitions(0).is_err());
        assert!(validate_repetitions(MAX_REPETITIONS + 1).is_err());
    }
}
