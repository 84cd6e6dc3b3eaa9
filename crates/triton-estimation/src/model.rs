//! The hypothesis pool.
//!
//! [`Model`] owns every live [`Hypothesis`] in an insertion-ordered arena and
//! keeps three invariants across every public call: weights sum to one, the
//! pool is never empty, and every mean/variance vector has `STATE_LEN`
//! entries.
//!
//! [`Model::add_evidence`] is the fusion step:
//!
//! 1. **Project** every candidate assignment of the observation.  A
//!    projection failure returns the error and leaves the pool untouched.
//! 2. **Absorb** (one assignment) – every hypothesis is rescaled by its
//!    likelihood and fuses the evidence in place.
//!    **Branch** (several assignments) – every hypothesis is replaced by one
//!    child per assignment; children split the parent's weight in proportion
//!    to their likelihoods.
//! 3. **Renormalise**, **prune** below `prune_floor` (never to empty),
//!    **merge** near-identical pairs, enforce `max_hypotheses`, renormalise.
//!
//! Likelihoods are combined in log space and shifted by the pool-wide
//! maximum before exponentiation, so a wildly disagreeing observation cannot
//! underflow every weight to zero.
//!
//! # Example
//!
//! ```rust
//! use triton_estimation::model::{Model, PoolConfig};
//! use triton_estimation::observation::{Assignment, Observation, ProjectionConfig, Readings};
//! use triton_types::{StateIndex, STATE_LEN};
//!
//! let mut model = Model::from_prior(&[0.0; STATE_LEN], &[1.0; STATE_LEN], PoolConfig::default()).unwrap();
//! let obs = Observation::unambiguous(
//!     Assignment::Scalar { index: StateIndex::GateX },
//!     Readings::new(10.0, 1.0, 0.0),
//! );
//! model.add_evidence(&obs, &ProjectionConfig::default()).unwrap();
//! assert!((model.best_estimate().as_slice()[StateIndex::GateX.index()] - 5.0).abs() < 1e-5);
//! ```

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;
use triton_types::TritonError;

use crate::hypothesis::Hypothesis;
use crate::matrix::Matrix;
use crate::observation::{Evidence, Observation, ProjectionConfig, project};

/// Upper bound on the hypothesis count accepted when decoding a snapshot.
const MAX_SNAPSHOT_HYPOTHESES: u64 = 1 << 16;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for pool growth and shrinkage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hypotheses whose normalised weight falls below this are dropped.
    pub prune_floor: f32,
    /// Two hypotheses whose means are within this Euclidean distance merge.
    pub merge_distance: f32,
    /// Both weights must reach this before a pair is considered for merging.
    pub merge_min_weight: f32,
    /// Hard cap on the pool size after merging.
    pub max_hypotheses: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prune_floor: 1e-3,
            merge_distance: 0.5,
            merge_min_weight: 1e-3,
            max_hypotheses: 64,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handles and outcomes
// ────────────────────────────────────────────────────────────────────────────

/// Arena handle of a hypothesis.  Valid until the next mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HypothesisId(usize);

impl HypothesisId {
    pub fn slot(self) -> usize {
        self.0
    }
}

/// What a single [`Model::add_evidence`] call did to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvidenceOutcome {
    /// Children created by branching (0 for unambiguous evidence).
    pub branched: usize,
    /// Hypotheses dropped by the weight floor or the size cap.
    pub pruned: usize,
    /// Pairs combined by merging.
    pub merged: usize,
    /// Pool size after the call.
    pub size: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Model
// ────────────────────────────────────────────────────────────────────────────

/// The weighted population of competing world-state estimates.
#[derive(Debug, Clone)]
pub struct Model {
    hypotheses: Vec<Hypothesis>,
    config: PoolConfig,
}

impl Model {
    /// Build a pool from one or more seed hypotheses.  Seed weights are
    /// renormalised; all-zero seeds are given equal weight.
    pub fn new(seeds: Vec<Hypothesis>, config: PoolConfig) -> Result<Self, TritonError> {
        if seeds.is_empty() {
            return Err(TritonError::Config(
                "hypothesis pool needs at least one seed".to_string(),
            ));
        }
        let mut model = Self {
            hypotheses: seeds,
            config,
        };
        if model.total_weight() <= 0.0 {
            let n = model.hypotheses.len() as f32;
            model.hypotheses.iter_mut().for_each(|h| h.set_weight(1.0 / n));
        }
        model.normalize();
        Ok(model)
    }

    /// A pool seeded with a single hypothesis from a prior mean and variance.
    pub fn from_prior(mean: &[f32], variance: &[f32], config: PoolConfig) -> Result<Self, TritonError> {
        let seed = Hypothesis::new(Matrix::column(mean), Matrix::column(variance), 1.0)?;
        Self::new(vec![seed], config)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of live hypotheses.
    pub fn size(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn get(&self, id: HypothesisId) -> Option<&Hypothesis> {
        self.hypotheses.get(id.0)
    }

    /// Live hypotheses in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (HypothesisId, &Hypothesis)> {
        self.hypotheses
            .iter()
            .enumerate()
            .map(|(i, h)| (HypothesisId(i), h))
    }

    pub fn weights(&self) -> Vec<f32> {
        self.hypotheses.iter().map(Hypothesis::weight).collect()
    }

    pub fn total_weight(&self) -> f64 {
        self.hypotheses.iter().map(|h| f64::from(h.weight())).sum()
    }

    /// Handle of the maximum-weight hypothesis (first on ties).
    pub fn best_id(&self) -> HypothesisId {
        let mut best = 0;
        for (i, h) in self.hypotheses.iter().enumerate() {
            if h.weight() > self.hypotheses[best].weight() {
                best = i;
            }
        }
        HypothesisId(best)
    }

    pub fn best(&self) -> &Hypothesis {
        &self.hypotheses[self.best_id().0]
    }

    /// Mean vector of the maximum-weight hypothesis: the fused world state.
    pub fn best_estimate(&self) -> Matrix {
        self.best().mode().clone()
    }

    /// Fuse one observation into the pool.
    pub fn add_evidence(
        &mut self,
        observation: &Observation,
        projection: &ProjectionConfig,
    ) -> Result<EvidenceOutcome, TritonError> {
        let (assignments, readings) = match observation {
            Observation::NotSeen => {
                return Ok(EvidenceOutcome {
                    size: self.size(),
                    ..EvidenceOutcome::default()
                });
            }
            Observation::Seen {
                assignments,
                readings,
            } => (assignments, readings),
        };

        let evidence = assignments
            .iter()
            .map(|a| project(a, readings, projection))
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcome = EvidenceOutcome::default();
        match evidence.as_slice() {
            [] => {}
            [single] => self.absorb(single),
            alternatives => outcome.branched = self.branch(alternatives),
        }

        self.normalize();
        outcome.pruned = self.prune();
        self.normalize();
        outcome.merged = self.merge()?;
        outcome.pruned += self.enforce_cap();
        self.normalize();
        outcome.size = self.size();

        debug!(
            branched = outcome.branched,
            pruned = outcome.pruned,
            merged = outcome.merged,
            size = outcome.size,
            "evidence incorporated"
        );
        Ok(outcome)
    }

    // ── Fusion steps ────────────────────────────────────────────────────────

    fn absorb(&mut self, evidence: &Evidence) {
        let scores: Vec<f64> = self
            .hypotheses
            .iter()
            .map(|h| h.log_likelihood(evidence))
            .collect();
        let factors = relative_likelihoods(&scores);

        for (h, factor) in self.hypotheses.iter_mut().zip(factors) {
            h.set_weight(h.weight() * factor as f32);
            h.incorporate(evidence);
        }
    }

    /// Replace every hypothesis by one child per alternative.  Returns the
    /// number of children created.
    fn branch(&mut self, alternatives: &[Evidence]) -> usize {
        let mut children = Vec::with_capacity(self.hypotheses.len() * alternatives.len());
        for parent in &self.hypotheses {
            let scores: Vec<f64> = alternatives
                .iter()
                .map(|e| parent.log_likelihood(e))
                .collect();
            let shares = relative_likelihoods(&scores);
            let total: f64 = shares.iter().sum();

            for (evidence, share) in alternatives.iter().zip(shares) {
                let mut child = parent.clone();
                child.set_weight((f64::from(parent.weight()) * share / total) as f32);
                child.incorporate(evidence);
                children.push(child);
            }
        }
        let created = children.len();
        self.hypotheses = children;
        created
    }

    /// Rescale weights to sum to one.  A pool whose weights collapsed keeps
    /// only its best survivor.
    fn normalize(&mut self) {
        let total = self.total_weight();
        if total > 0.0 && total.is_finite() {
            for h in &mut self.hypotheses {
                h.set_weight((f64::from(h.weight()) / total) as f32);
            }
            return;
        }
        let best = self.best_id().0;
        let mut survivor = self.hypotheses.swap_remove(best);
        survivor.set_weight(1.0);
        self.hypotheses = vec![survivor];
    }

    fn prune(&mut self) -> usize {
        let floor = self.config.prune_floor;
        let before = self.hypotheses.len();
        if self.hypotheses.iter().all(|h| h.weight() < floor) {
            let best = self.best_id().0;
            let survivor = self.hypotheses.swap_remove(best);
            self.hypotheses = vec![survivor];
        } else {
            self.hypotheses.retain(|h| h.weight() >= floor);
        }
        before - self.hypotheses.len()
    }

    /// Greedily combine pairs closer than `merge_distance`.  The earlier
    /// hypothesis absorbs the later one and keeps its slot.
    fn merge(&mut self) -> Result<usize, TritonError> {
        let PoolConfig {
            merge_distance,
            merge_min_weight,
            ..
        } = self.config;
        let mut merged = 0;
        let mut i = 0;
        while i < self.hypotheses.len() {
            let mut j = i + 1;
            while j < self.hypotheses.len() {
                let (a, b) = (&self.hypotheses[i], &self.hypotheses[j]);
                let eligible = a.weight() >= merge_min_weight && b.weight() >= merge_min_weight;
                if eligible && a.distance_to(b)? <= merge_distance {
                    let absorbed = self.hypotheses.remove(j);
                    self.hypotheses[i].absorb(&absorbed);
                    merged += 1;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        Ok(merged)
    }

    /// Drop the lightest hypotheses beyond `max_hypotheses`, preserving the
    /// insertion order of the rest.
    fn enforce_cap(&mut self) -> usize {
        let cap = self.config.max_hypotheses.max(1);
        let excess = self.hypotheses.len().saturating_sub(cap);
        if excess == 0 {
            return 0;
        }
        let mut order: Vec<usize> = (0..self.hypotheses.len()).collect();
        order.sort_by(|&a, &b| {
            self.hypotheses[b]
                .weight()
                .total_cmp(&self.hypotheses[a].weight())
        });
        let mut keep = vec![false; self.hypotheses.len()];
        for &i in order.iter().take(cap) {
            keep[i] = true;
        }
        let mut slot = 0;
        self.hypotheses.retain(|_| {
            let k = keep[slot];
            slot += 1;
            k
        });
        excess
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    /// Write a snapshot: `u64` LE count followed by hypothesis records.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), TritonError> {
        out.write_all(&(self.hypotheses.len() as u64).to_le_bytes())?;
        for h in &self.hypotheses {
            h.write_to(out)?;
        }
        Ok(())
    }

    /// Restore a pool from a snapshot written by [`Model::write_to`].
    pub fn read_from<R: Read>(input: &mut R, config: PoolConfig) -> Result<Self, TritonError> {
        let mut buf = [0u8; 8];
        input
            .read_exact(&mut buf)
            .map_err(|e| TritonError::CorruptData(format!("missing hypothesis count: {e}")))?;
        let count = u64::from_le_bytes(buf);
        if count == 0 || count > MAX_SNAPSHOT_HYPOTHESES {
            return Err(TritonError::CorruptData(format!(
                "implausible hypothesis count {count}"
            )));
        }
        let hypotheses = (0..count)
            .map(|_| Hypothesis::read_from(input))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(hypotheses, config)
    }
}

/// `exp(score - max)` for every score; the best score maps to `1.0`.
fn relative_likelihoods(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - max).exp()).collect()
}
