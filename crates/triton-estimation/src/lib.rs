//! `triton-estimation` – multi-hypothesis world-state fusion.
//!
//! Turns asynchronous, noisy and sometimes ambiguous sensor reports into a
//! single best estimate of the fixed-size world state while keeping competing
//! interpretations alive until evidence resolves them.
//!
//! # Modules
//!
//! - [`matrix`] – [`Matrix`][matrix::Matrix]: dense `f32` matrix with
//!   shape-checked algebra and a deterministic binary layout.
//! - [`observation`] – [`Observation`][observation::Observation] and
//!   [`project`][observation::project]: geometry-tagged sensor readings and
//!   their projection into state-space [`Evidence`][observation::Evidence].
//! - [`hypothesis`] – [`Hypothesis`][hypothesis::Hypothesis]: one weighted
//!   mean/variance estimate with inverse-variance fusion.
//! - [`model`] – [`Model`][model::Model]: the hypothesis pool that absorbs,
//!   branches, prunes and merges.

pub mod hypothesis;
pub mod matrix;
pub mod model;
pub mod observation;

pub use hypothesis::Hypothesis;
pub use matrix::Matrix;
pub use model::{EvidenceOutcome, HypothesisId, Model, PoolConfig};
pub use observation::{
    AngleUnit, Assignment, Evidence, EvidenceEntry, Observation, ProjectionConfig, Readings,
    project,
};
