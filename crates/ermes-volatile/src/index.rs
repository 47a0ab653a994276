//! Score-ordered index over session ids.
//!
//! Entries are kept in a `BTreeSet` ordered by `(score, id)`, with a side
//! map from id to current score so updates and removals stay O(log n).

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

/// Totally ordered wrapper around an `f64` score.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Ranked set of session ids. Ties are broken by id.
#[derive(Debug, Default, Clone)]
pub struct OrderedIndex {
    ordered: BTreeSet<(Score, String)>,
    scores: HashMap<String, f64>,
}

impl OrderedIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` with `score`, replacing any previous score.
    pub fn insert_or_update(&mut self, id: &str, score: f64) {
        debug_assert!(!score.is_nan(), "index scores must not be NaN");
        if let Some(previous) = self.scores.insert(id.to_string(), score) {
            self.ordered.remove(&(Score(previous), id.to_string()));
        }
        self.ordered.insert((Score(score), id.to_string()));
    }

    /// Remove `id`, returning its score if it was present.
    pub fn remove(&mut self, id: &str) -> Option<f64> {
        let score = self.scores.remove(id)?;
        self.ordered.remove(&(Score(score), id.to_string()));
        Some(score)
    }

    /// Current score of `id`.
    pub fn score(&self, id: &str) -> Option<f64> {
        self.scores.get(id).copied()
    }

    /// Check if `id` is in the index.
    pub fn contains(&self, id: &str) -> bool {
        self.scores.contains_key(id)
    }

    /// Ids whose score lies in `[low, high]`, in ascending score order.
    pub fn range_by_score(&self, low: f64, high: f64) -> Vec<String> {
        if low > high {
            return Vec::new();
        }
        // The empty id sorts before every other id with the same score.
        let start = Bound::Included((Score(low), String::new()));
        self.ordered
            .range((start, Bound::Unbounded))
            .take_while(|(score, _)| score.0 <= high)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Lowest-ranked entry.
    pub fn minimum(&self) -> Option<(&str, f64)> {
        self.ordered
            .first()
            .map(|(score, id)| (id.as_str(), score.0))
    }

    /// Highest-ranked entry.
    pub fn maximum(&self) -> Option<(&str, f64)> {
        self.ordered
            .last()
            .map(|(score, id)| (id.as_str(), score.0))
    }

    /// Entries in ascending score order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.ordered.iter().map(|(score, id)| (id.as_str(), score.0))
    }

    /// Number of indexed ids.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
