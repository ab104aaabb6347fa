//! Priority score normalisation
//!
//! Holds the per-round soft scores produced while building the EC
//! preference lists, tracks per-EC min/max for each axis, and normalises
//! raw scores into `[0, omega]` lazily and exactly once per
//! (task-EC, machine, axis). All maps are round-scoped caches owned by the
//! cost model and cleared when the round's stats are prepared; a stale
//! `final_score` would otherwise suppress recomputation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{EquivClass, ResourceId};

/// Raw and normalised score of one (task-EC, machine) pair on one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityScore {
    /// Whether the machine satisfied the axis' soft constraints
    pub satisfy: bool,
    /// Raw weighted score
    pub raw_score: i64,
    /// Normalised score, set on first access
    pub final_score: Option<i64>,
}

impl PriorityScore {
    /// Create an unnormalised score record
    #[inline]
    #[must_use]
    pub const fn new(raw_score: i64, satisfy: bool) -> Self {
        Self {
            satisfy,
            raw_score,
            final_score: None,
        }
    }
}

/// Monotone min/max tracker for one task-EC axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinMaxScores {
    /// Lowest raw score observed this round
    pub min: Option<i64>,
    /// Highest raw score observed this round
    pub max: Option<i64>,
}

impl MinMaxScores {
    /// Fold a raw score into the tracker
    pub fn observe(&mut self, raw: i64) {
        self.min = Some(self.min.map_or(raw, |m| m.min(raw)));
        self.max = Some(self.max.map_or(raw, |m| m.max(raw)));
    }
}

/// Round-scoped store of soft priority scores
#[derive(Debug, Default)]
pub struct PriorityScorer {
    node_scores: HashMap<EquivClass, HashMap<ResourceId, PriorityScore>>,
    pod_scores: HashMap<EquivClass, HashMap<ResourceId, PriorityScore>>,
    node_minmax: HashMap<EquivClass, MinMaxScores>,
    pod_minmax: HashMap<EquivClass, MinMaxScores>,
}

impl PriorityScorer {
    /// Create an empty scorer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw node affinity score and fold it into the EC's min/max
    pub fn record_node_score(
        &mut self,
        ec: EquivClass,
        machine: ResourceId,
        raw: i64,
        satisfy: bool,
    ) {
        self.node_scores
            .entry(ec)
            .or_default()
            .insert(machine, PriorityScore::new(raw, satisfy));
        self.node_minmax.entry(ec).or_default().observe(raw);
    }

    /// Record a raw pod affinity score and fold it into the EC's min/max
    pub fn record_pod_score(
        &mut self,
        ec: EquivClass,
        machine: ResourceId,
        raw: i64,
        satisfy: bool,
    ) {
        self.pod_scores
            .entry(ec)
            .or_default()
            .insert(machine, PriorityScore::new(raw, satisfy));
        self.pod_minmax.entry(ec).or_default().observe(raw);
    }

    /// Raw node score record, if the machine was scored this round
    #[must_use]
    pub fn node_score(&self, ec: EquivClass, machine: ResourceId) -> Option<&PriorityScore> {
        self.node_scores.get(&ec)?.get(&machine)
    }

    /// Raw pod score record, if the machine was scored this round
    #[must_use]
    pub fn pod_score(&self, ec: EquivClass, machine: ResourceId) -> Option<&PriorityScore> {
        self.pod_scores.get(&ec)?.get(&machine)
    }

    /// Min/max tracker of the node axis
    #[must_use]
    pub fn node_minmax(&self, ec: EquivClass) -> Option<&MinMaxScores> {
        self.node_minmax.get(&ec)
    }

    /// Min/max tracker of the pod axis
    #[must_use]
    pub fn pod_minmax(&self, ec: EquivClass) -> Option<&MinMaxScores> {
        self.pod_minmax.get(&ec)
    }

    /// Normalised node affinity score, computed once and cached
    ///
    /// `final = trunc(raw / max * omega)`. Returns `None` when the machine
    /// was never scored or its soft constraints went unsatisfied; the
    /// caller charges the full `omega` penalty in that case.
    pub fn normalized_node_score(
        &mut self,
        ec: EquivClass,
        machine: ResourceId,
        omega: i64,
    ) -> Option<i64> {
        let max = self.node_minmax.get(&ec).and_then(|mm| mm.max);
        let score = self.node_scores.get_mut(&ec)?.get_mut(&machine)?;
        if !score.satisfy {
            return None;
        }
        if let Some(final_score) = score.final_score {
            return Some(final_score);
        }
        let final_score = match max {
            Some(max) if max > 0 => {
                ((score.raw_score as f64 / max as f64) * omega as f64) as i64
            }
            _ => 0,
        };
        score.final_score = Some(final_score);
        Some(final_score)
    }

    /// Normalised pod affinity score, computed once and cached
    ///
    /// `final = trunc((raw - min) / (max - min) * omega)` when `max > min`,
    /// zero otherwise. Returns `None` when the machine was never scored.
    pub fn normalized_pod_score(
        &mut self,
        ec: EquivClass,
        machine: ResourceId,
        omega: i64,
    ) -> Option<i64> {
        let minmax = self.pod_minmax.get(&ec).copied().unwrap_or_default();
        let score = self.pod_scores.get_mut(&ec)?.get_mut(&machine)?;
        if !score.satisfy {
            return None;
        }
        if let Some(final_score) = score.final_score {
            return Some(final_score);
        }
        let final_score = match (minmax.min, minmax.max) {
            (Some(min), Some(max)) if max > min => {
                (((score.raw_score - min) as f64 / (max - min) as f64) * omega as f64) as i64
            }
            _ => 0,
        };
        score.final_score = Some(final_score);
        Some(final_score)
    }

    /// Drop every node priority score and tracker, for all task ECs
    ///
    /// Invoked on entry to the round's EC preference computation; the wide
    /// clear mirrors the round protocol, which rescores all surviving
    /// machines before any pricing query.
    pub fn clear_node_scores(&mut self) {
        self.node_scores.clear();
        self.node_minmax.clear();
    }

    /// Drop one EC's pod scores and tracker
    pub fn clear_pod_scores_for(&mut self, ec: EquivClass) {
        self.pod_scores.remove(&ec);
        self.pod_minmax.remove(&ec);
    }

    /// Drop all round state
    pub fn clear(&mut self) {
        self.node_scores.clear();
        self.pod_scores.clear();
        self.node_minmax.clear();
        self.pod_minmax.clear();
    }
}
