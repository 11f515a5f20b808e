//! Pareto frontier of prompt candidates

use super::MetricScores;
use serde::{Deserialize, Serialize};

/// A candidate system prompt and the scores from its last batch evaluation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCandidate {
    pub id: String,
    pub prompt: String,
    pub metrics: MetricScores,
    /// The judge's own aggregate, trusted as emitted
    pub overall_score: f64,
    /// Optional metadata; not maintained by the optimizer
    #[serde(default)]
    pub best_for_examples: Vec<usize>,
}

impl PromptCandidate {
    pub fn new(
        id: impl Into<String>,
        prompt: impl Into<String>,
        metrics: MetricScores,
        overall_score: f64,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            metrics,
            overall_score,
            best_for_examples: Vec::new(),
        }
    }
}

/// `a` dominates `b` when it is >= on every selected metric and > on at least one.
/// Missing metrics count as 0.
pub fn dominates(a: &MetricScores, b: &MetricScores, metrics: &[String]) -> bool {
    let mut strictly_better = false;
    for metric in metrics {
        let a_value = a.value_or_zero(metric);
        let b_value = b.value_or_zero(metric);
        if a_value < b_value {
            return false;
        }
        if a_value > b_value {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Fold `candidate` into `collection` without mutating it.
///
/// Members dominated by the candidate are dropped; the candidate joins only
/// if no member dominates it.
pub fn update_frontier(
    collection: &[PromptCandidate],
    candidate: PromptCandidate,
    metrics: &[String],
) -> Vec<PromptCandidate> {
    let mut candidate_dominated = false;
    let mut kept = Vec::with_capacity(collection.len() + 1);

    for existing in collection {
        if dominates(&existing.metrics, &candidate.metrics, metrics) {
            candidate_dominated = true;
        }
        if !dominates(&candidate.metrics, &existing.metrics, metrics) {
            kept.push(existing.clone());
        }
    }

    if !candidate_dominated {
        kept.push(candidate);
    }
    kept
}

/// The collection of mutually non-dominated candidates.
///
/// Never empty: it starts from a seed, and folding in a candidate either keeps
/// the candidate or keeps a member that dominates it.
#[derive(Clone, Debug, PartialEq)]
pub struct ParetoFrontier {
    candidates: Vec<PromptCandidate>,
    metrics: Vec<String>,
}

impl ParetoFrontier {
    pub fn seeded(seed: PromptCandidate, metrics: Vec<String>) -> Self {
        Self {
            candidates: vec![seed],
            metrics,
        }
    }

    pub fn update(&self, candidate: PromptCandidate) -> Self {
        Self {
            candidates: update_frontier(&self.candidates, candidate, &self.metrics),
            metrics: self.metrics.clone(),
        }
    }

    /// Highest overall score; the earliest member wins ties
    pub fn select(&self) -> &PromptCandidate {
        let mut best = &self.candidates[0];
        for candidate in &self.candidates[1..] {
            if candidate.overall_score > best.overall_score {
                best = candidate;
            }
        }
        best
    }

    pub fn candidates(&self) -> &[PromptCandidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn into_candidates(self) -> Vec<PromptCandidate> {
        self.candidates
    }
}
