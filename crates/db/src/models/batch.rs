//! Batch: an ordered queue of series requests, one per URL.

use std::collections::HashMap;

use pagebench_core::options::TestOptions;
use pagebench_core::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

use super::series::Series;
use crate::repo::Entity;

/// Name of the array field holding realized series ids (reverse lookups).
pub const SERIES_FIELD: &str = "series";

/// One requested series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub url: String,
    pub repetitions: u32,
    #[serde(default)]
    pub options: TestOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: EntityId,
    /// Requested series, in processing order.
    pub requested: Vec<SeriesSpec>,
    /// Realized series ids, append-only.
    pub series: Vec<EntityId>,
    pub finished: bool,
    pub finished_at: Option<Timestamp>,
}

impl Batch {
    pub fn new(id: EntityId, requested: Vec<SeriesSpec>) -> Self {
        Self {
            id,
            requested,
            series: Vec::new(),
            finished: false,
            finished_at: None,
        }
    }

    /// Deterministic id of the series at `index`.
    pub fn series_id(&self, index: usize) -> EntityId {
        format!("{}-s{index}", self.id)
    }

    /// The series record for slot `index`, built from `spec`.
    pub fn series_at(&self, index: usize, spec: &SeriesSpec) -> Series {
        Series::new(
            self.series_id(index),
            spec.url.clone(),
            spec.repetitions,
            spec.options.clone(),
        )
    }

    pub fn last_series(&self) -> Option<&str> {
        self.series.last().map(String::as_str)
    }
}

/// First requested spec not yet represented among realized series URLs.
///
/// A URL requested twice needs two realized series before both requests
/// count as represented.
pub fn next_pending_spec<'a>(
    requested: &'a [SeriesSpec],
    realized_urls: &[String],
) -> Option<&'a SeriesSpec> {
    let mut realized: HashMap<&str, usize> = HashMap::new();
    for url in realized_urls {
        *realized.entry(url.as_str()).or_default() += 1;
    }
    requested.iter().find(|spec| match realized.get_mut(spec.url.as_str()) {
        Some(count) if *count > 0 => {
            *count -= 1;
            false
        }
        _ => true,
    })
}

impl Entity for Batch {
    const KIND: &'static str = "batch";

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

    fn spec(url: &str) -> SeriesSpec {
        SeriesSpec {
            url: url.to_string(),
            repetitions: 1,
            options: TestOptions::default(),
        }
    }

    #[test]
    fn picks_first_unrepresented_url() {
        let requested = vec![spec("https://a.test"), spec("https://b.test")];
        let next = next_pending_spec(&requested, &["https://a.test".to_string()]);
        assert_eq!(next.unwrap().url, "https://b.test");
    }

    #[test]
    fn none_when_all_represented() {
        let requested = vec![spec("https://a.test"), spec("https://b.test")];
        let realized = vec!["https://b.test".to_string(), "https://a.test".to_string()];
        assert!(next_pending_spec(&requested, &realized).is_none());
    }

    #[test]
    fn duplicate_urls_are_counted() {
        let requested = vec![spec("https://a.test"), spec("https://a.test")];
        let next = next_pending_spec(&requested, &["https://a.test".to_string()]);
        assert!(next.is_some());

        let realized = vec!["https://a.test".to_string(), "https://a.test".to_string()];
        assert!(next_pending_spec(&requested, &realized).is_none());
    }

    #[test]
    fn series_slots_are_deterministic() {
        let batch = Batch::new("b1".into(), vec![spec("https://a.test")]);
        let series = batch.series_at(0, &batch.requested[0]);
        assert_eq!(series.id, "b1-s0");
        assert_eq!(series.url, "https://a.test");
    }
}
