//! Differential factors between baseline and accelerated runs, and their
//! aggregation across a repeated series.
//!
//! A factor's `ratio` is `baseline / variant`: values above 1.0 mean the
//! accelerated page was faster (or lighter). `delta` is
//! `baseline - variant` in the metric's own unit. Missing data never
//! raises an error; the affected factor is simply absent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::{Metric, Metrics};

/// Ratio and delta for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub ratio: f64,
    pub delta: f64,
}

impl Factor {
    /// Compute the factor for one metric pair. Absent when the variant value
    /// is zero (ratio undefined) or either value is non-finite.
    pub fn between(baseline: f64, variant: f64) -> Option<Self> {
        if !baseline.is_finite() || !variant.is_finite() || variant == 0.0 {
            return None;
        }
        Some(Self {
            ratio: baseline / variant,
            delta: baseline - variant,
        })
    }
}

/// One optional factor per tracked metric. Every metric in
/// [`Metric::ALL`] has an entry; `None` serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactorSet(BTreeMap<Metric, Option<Factor>>);

impl FactorSet {
    /// A set where every metric is absent.
    pub fn absent() -> Self {
        Self(Metric::ALL.iter().map(|m| (*m, None)).collect())
    }

    pub fn get(&self, metric: Metric) -> Option<Factor> {
        self.0.get(&metric).copied().flatten()
    }

    pub fn set(&mut self, metric: Metric, factor: Option<Factor>) {
        self.0.insert(metric, factor);
    }

    /// `true` when no metric has a factor.
    pub fn is_absent(&self) -> bool {
        self.0.values().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, Option<Factor>)> + '_ {
        self.0.iter().map(|(m, f)| (*m, *f))
    }
}

impl Default for FactorSet {
    fn default() -> Self {
        Self::absent()
    }
}

/// Compute factors for a baseline/variant pair.
///
/// Pass `None` for a side whose run finished with missing data; the whole
/// set is then absent.
pub fn compute_factors(baseline: Option<&Metrics>, variant: Option<&Metrics>) -> FactorSet {
    let mut set = FactorSet::absent();
    let (Some(baseline), Some(variant)) = (baseline, variant) else {
        return set;
    };
    for metric in Metric::ALL {
        let factor = match (baseline.get(metric), variant.get(metric)) {
            (Some(b), Some(v)) => Factor::between(b, v),
            _ => None,
        };
        set.set(metric, factor);
    }
    set
}

// ---------------------------------------------------------------------------
// Series aggregation
// ---------------------------------------------------------------------------

/// Mean, best, and worst factors across the comparisons of a series.
///
/// "Best" is the factor with the highest ratio (largest speed-up),
/// "worst" the lowest. Comparisons with an absent factor for a metric are
/// skipped for that metric only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub mean: FactorSet,
    pub best: FactorSet,
    pub worst: FactorSet,
    /// Number of comparisons that contributed at least one factor.
    pub samples: usize,
}

/// Aggregate the factor sets of finished comparisons.
pub fn summarize<'a, I>(sets: I) -> SeriesSummary
where
    I: IntoIterator<Item = &'a FactorSet>,
{
    let sets: Vec<&FactorSet> = sets.into_iter().collect();
    let mut summary = SeriesSummary {
        samples: sets.iter().filter(|s| !s.is_absent()).count(),
        ..SeriesSummary::default()
    };

    for metric in Metric::ALL {
        let present: Vec<Factor> = sets.iter().filter_map(|s| s.get(metric)).collect();
        if present.is_empty() {
            continue;
        }
        let n = present.len() as f64;
        let mean = Factor {
            ratio: present.iter().map(|f| f.ratio).sum::<f64>() / n,
            delta: present.iter().map(|f| f.delta).sum::<f64>() / n,
        };
        let best = present
            .iter()
            .copied()
            .max_by(|a, b| a.ratio.total_cmp(&b.ratio));
        let worst = present
            .iter()
            .copied()
            .min_by(|a, b| a.ratio.total_cmp(&b.ratio));

        summary.mean.set(metric, Some(mean));
        summary.best.set(metric, best);
        summary.worst.set(metric, worst);
    }

    summary
}
