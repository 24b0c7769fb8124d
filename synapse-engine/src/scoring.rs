//! Intelligent verb scoring.
//!
//! When a relationship arrives without an explicit weight, the scorer
//! derives one from endpoint-vector similarity, observed frequency of the
//! (source-type, verb, target-type) triple, and temporal decay, adjusted by
//! per-triple priors learned from feedback. Off by default.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use synapse_core::config::VerbScoringConfig;
use synapse_core::{NounType, VerbType};
use tracing::debug;

/// A (source-type, verb, target-type) triple.
pub type Triple = (NounType, VerbType, NounType);

/// Derived weight and confidence for an edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerbScore {
    pub weight: f32,
    pub confidence: f32,
}

/// Frequency half-saturation: a triple seen this many times scores 0.5 on
/// the frequency axis.
const FREQUENCY_KNEE: f64 = 10.0;
/// Temporal decay constant in days.
const DECAY_DAYS: f64 = 30.0;

/// Online scorer with per-triple observation counts and learned priors.
#[derive(Debug)]
pub struct VerbScorer {
    config: VerbScoringConfig,
    observations: DashMap<Triple, u64>,
    last_seen: DashMap<Triple, DateTime<Utc>>,
    priors: DashMap<Triple, f64>,
}

impl VerbScorer {
    pub fn new(config: VerbScoringConfig) -> Self {
        Self {
            config,
            observations: DashMap::new(),
            last_seen: DashMap::new(),
            priors: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record an observation and derive a score.
    ///
    /// `similarity` is the cosine similarity of the endpoint vectors in
    /// [-1, 1]; it is mapped onto [0, 1] before weighting.
    pub fn score(&self, triple: Triple, similarity: f32, now: DateTime<Utc>) -> VerbScore {
        let count = {
            let mut entry = self.observations.entry(triple).or_insert(0);
            *entry += 1;
            *entry
        };

        let semantic = f64::from((similarity + 1.0) / 2.0).clamp(0.0, 1.0);
        let frequency = count as f64 / (count as f64 + FREQUENCY_KNEE);
        let temporal = self
            .last_seen
            .get(&triple)
            .map(|seen| {
                let age_days = (now - *seen).num_seconds().max(0) as f64 / 86_400.0;
                (-age_days / DECAY_DAYS).exp()
            })
            .unwrap_or(1.0);
        self.last_seen.insert(triple, now);

        let total_weight = self.config.semantic + self.config.frequency + self.config.temporal;
        let mut weight = if total_weight > 0.0 {
            (semantic * self.config.semantic
                + frequency * self.config.frequency
                + temporal * self.config.temporal)
                / total_weight
        } else {
            semantic
        };

        if let Some(prior) = self.priors.get(&triple) {
            // Learned prior nudges the blended score
            weight = weight * 0.7 + *prior * 0.3;
        }

        let confidence =
            self.config.base_confidence + (1.0 - self.config.base_confidence) * frequency;

        let score = VerbScore {
            weight: weight.clamp(0.0, 1.0) as f32,
            confidence: confidence.clamp(0.0, 1.0) as f32,
        };
        debug!(?triple, count, ?score, "scored verb");
        score
    }

    /// Feedback on a scored triple in [0, 1]; moves the prior by the
    /// configured learning rate.
    pub fn feedback(&self, triple: Triple, outcome: f64) {
        let outcome = outcome.clamp(0.0, 1.0);
        let mut prior = self.priors.entry(triple).or_insert(self.config.base_confidence);
        *prior += self.config.learning_rate * (outcome - *prior);
    }

    /// Observation count for a triple; statistics hook.
    pub fn observations(&self, triple: Triple) -> u64 {
        self.observations.get(&triple).map(|c| *c).unwrap_or(0)
    }
}
