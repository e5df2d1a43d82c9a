//! Series: repeated comparisons of one URL.

use pagebench_core::factors::SeriesSummary;
use pagebench_core::options::TestOptions;
use pagebench_core::types::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};

use super::comparison::Comparison;
use crate::repo::Entity;

/// Name of the array field holding comparison ids (reverse lookups).
pub const COMPARISONS_FIELD: &str = "comparisons";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: EntityId,
    pub url: String,
    pub options: TestOptions,
    /// Target number of comparisons.
    pub repetitions: u32,
    /// Append-only, in creation order.
    pub comparisons: Vec<EntityId>,
    pub finished: bool,
    pub summary: Option<SeriesSummary>,
    pub finished_at: Option<Timestamp>,
}

impl Series {
    pub fn new(id: EntityId, url: impl Into<String>, repetitions: u32, options: TestOptions) -> Self {
        Self {
            id,
            url: url.into(),
            options,
            repetitions,
            comparisons: Vec::new(),
            finished: false,
            summary: None,
            finished_at: None,
        }
    }

    /// Deterministic id of the comparison at `index`.
    pub fn comparison_id(&self, index: usize) -> EntityId {
        format!("{}-c{index}", self.id)
    }

    /// The comparison record for slot `index`.
    pub fn comparison_at(&self, index: usize) -> Comparison {
        Comparison::new(self.comparison_id(index), self.url.clone(), self.options.clone())
    }

    pub fn last_comparison(&self) -> Option<&str> {
        self.comparisons.last().map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.comparisons.len() >= self.repetitions as usize
    }
}

impl Entity for Series {
    const KIND: &'static str = "series";

    fn id(&self) -> &str {
        &self.id
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}
