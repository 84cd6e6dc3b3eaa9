//! A single weighted candidate world state.
//!
//! A [`Hypothesis`] holds a mean and a per-dimension variance over the whole
//! state vector (diagonal covariance, dimensions independent) plus a
//! plausibility weight.  Evidence is fused with inverse-variance weighting:
//!
//! ```text
//! mean' = (m₁/v₁ + m₂/v₂) / (1/v₁ + 1/v₂)
//! var'  = 1 / (1/v₁ + 1/v₂)
//! ```
//!
//! # Binary layout
//!
//! `weight` as `f32` little-endian, then the mean and the variance as
//! [`Matrix`] records.

use std::io::{Read, Write};

use triton_types::{STATE_LEN, StateIndex, TritonError};

use crate::matrix::Matrix;
use crate::observation::Evidence;

const LN_TAU: f64 = 1.837_877_066_409_345_5;

/// One weighted candidate estimate of the full world state.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    weight: f32,
    mean: Matrix,
    variance: Matrix,
}

impl Hypothesis {
    /// Build a hypothesis from `STATE_LEN × 1` mean and variance vectors.
    ///
    /// Fails with [`TritonError::ShapeMismatch`] on a wrong shape,
    /// [`TritonError::InvalidWeight`] on a negative or non-finite weight and
    /// [`TritonError::CorruptData`] when a variance is not positive and
    /// finite or a mean is not finite.
    pub fn new(mean: Matrix, variance: Matrix, weight: f32) -> Result<Self, TritonError> {
        for m in [&mean, &variance] {
            if m.shape() != (STATE_LEN, 1) {
                return Err(TritonError::ShapeMismatch {
                    left: (STATE_LEN, 1),
                    right: m.shape(),
                });
            }
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(TritonError::InvalidWeight(weight));
        }
        if let Some(bad) = mean.as_slice().iter().position(|v| !v.is_finite()) {
            return Err(TritonError::CorruptData(format!(
                "non-finite mean at {}",
                StateIndex::ALL[bad]
            )));
        }
        if let Some(bad) = variance
            .as_slice()
            .iter()
            .position(|v| !v.is_finite() || *v <= 0.0)
        {
            return Err(TritonError::CorruptData(format!(
                "variance at {} must be positive",
                StateIndex::ALL[bad]
            )));
        }
        Ok(Self {
            weight,
            mean,
            variance,
        })
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// The point estimate: the mean vector.
    pub fn mode(&self) -> &Matrix {
        &self.mean
    }

    pub fn variance(&self) -> &Matrix {
        &self.variance
    }

    pub fn mean_at(&self, index: StateIndex) -> f32 {
        self.mean.as_slice()[index.index()]
    }

    pub fn variance_at(&self, index: StateIndex) -> f32 {
        self.variance.as_slice()[index.index()]
    }

    /// Fuse `evidence` into the estimate.  Untouched indices keep their
    /// mean and variance.
    pub fn incorporate(&mut self, evidence: &Evidence) {
        let means = self.mean.as_mut_slice();
        let variances = self.variance.as_mut_slice();
        for e in evidence.iter() {
            let i = e.index.index();
            let (m1, v1) = (f64::from(means[i]), f64::from(variances[i]));
            let (m2, v2) = (f64::from(e.value), f64::from(e.variance));

            let precision = 1.0 / v1 + 1.0 / v2;
            means[i] = ((m1 / v1 + m2 / v2) / precision) as f32;
            variances[i] = (1.0 / precision) as f32;
        }
    }

    /// Log of the Gaussian density of the evidence residuals under this
    /// hypothesis, using the combined variance per index.  Empty evidence
    /// scores `0.0`.
    pub fn log_likelihood(&self, evidence: &Evidence) -> f64 {
        evidence
            .iter()
            .map(|e| {
                let i = e.index.index();
                let s = f64::from(self.variance.as_slice()[i]) + f64::from(e.variance);
                let r = f64::from(e.value) - f64::from(self.mean.as_slice()[i]);
                -0.5 * (LN_TAU + s.ln() + r * r / s)
            })
            .sum()
    }

    /// How well `evidence` agrees with the current estimate.
    pub fn likelihood(&self, evidence: &Evidence) -> f64 {
        self.log_likelihood(evidence).exp()
    }

    /// Multiply the weight by `factor` (must be ≥ 0).
    pub fn scale(&mut self, factor: f32) -> Result<(), TritonError> {
        if factor.is_nan() || factor < 0.0 {
            return Err(TritonError::InvalidWeight(factor));
        }
        self.weight *= factor;
        Ok(())
    }

    pub(crate) fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    /// Euclidean distance between the two mean vectors.
    pub fn distance_to(&self, other: &Hypothesis) -> Result<f32, TritonError> {
        Ok(self.mean.sub(&other.mean)?.magnitude())
    }

    /// Absorb `other` into `self`: weighted average of means and variances,
    /// summed weight.
    pub(crate) fn absorb(&mut self, other: &Hypothesis) {
        let (wa, wb) = (f64::from(self.weight), f64::from(other.weight));
        let total = wa + wb;
        let (ka, kb) = if total > 0.0 {
            (wa / total, wb / total)
        } else {
            (0.5, 0.5)
        };
        let blend = |a: &mut [f32], b: &[f32]| {
            for (x, &y) in a.iter_mut().zip(b) {
                *x = (ka * f64::from(*x) + kb * f64::from(y)) as f32;
            }
        };
        blend(self.mean.as_mut_slice(), other.mean.as_slice());
        blend(self.variance.as_mut_slice(), other.variance.as_slice());
        self.weight = total as f32;
    }

    // ── Serialization ───────────────────────────────────────────────────────

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<(), TritonError> {
        out.write_all(&self.weight.to_le_bytes())?;
        self.mean.write_to(out)?;
        self.variance.write_to(out)
    }

    pub fn read_from<R: Read>(input: &mut R) -> Result<Self, TritonError> {
        let mut buf = [0u8; 4];
        input
            .read_exact(&mut buf)
            .map_err(|e| TritonError::CorruptData(format!("missing hypothesis weight: {e}")))?;
        let weight = f32::from_le_bytes(buf);
        let mean = Matrix::read_from(input)?;
        let variance = Matrix::read_from(input)?;
        Hypothesis::new(mean, variance, weight).map_err(|e| match e {
            TritonError::CorruptData(_) => e,
            other => TritonError::CorruptData(format!("invalid hypothesis record: {other}")),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TritonError> {
        let mut cursor = bytes;
        let h = Hypothesis::read_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(TritonError::CorruptData(format!(
                "{} trailing bytes after hypothesis record",
                cursor.len()
            )));
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn seed(mean: f32, variance: f32) -> Hypothesis {
        Hypothesis::new(
            Matrix::column(&[mean; STATE_LEN]),
            Matrix::column(&[variance; STATE_LEN]),
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn new_validates_shape_weight_and_variance() {
        let ok = Matrix::column(&[1.0; STATE_LEN]);
        assert!(matches!(
            Hypothesis::new(Matrix::column(&[0.0; 3]), ok.clone(), 1.0),
            Err(TritonError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            Hypothesis::new(ok.clone(), ok.clone(), -0.5),
            Err(TritonError::InvalidWeight(_))
        ));
        assert!(matches!(
            Hypothesis::new(ok.clone(), Matrix::column(&[0.0; STATE_LEN]), 1.0),
            Err(TritonError::CorruptData(_))
        ));
    }

    #[test]
    fn incorporate_is_inverse_variance_weighted() {
        let mut h = seed(0.0, 1.0);
        h.incorporate(&Evidence::single(StateIndex::GateX, 10.0, 1.0).unwrap());
        assert_relative_eq!(h.mean_at(StateIndex::GateX), 5.0);
        assert_relative_eq!(h.variance_at(StateIndex::GateX), 0.5);

        // Unequal variances pull towards the more certain estimate.
        let mut h = seed(0.0, 4.0);
        h.incorporate(&Evidence::single(StateIndex::GateY, 10.0, 1.0).unwrap());
        assert_relative_eq!(h.mean_at(StateIndex::GateY), 8.0);
        assert_relative_eq!(h.variance_at(StateIndex::GateY), 0.8);
    }

    #[test]
    fn fused_variance_shrinks_and_mean_lies_between() {
        for (m1, v1, m2, v2) in [(0.0, 1.0, 3.0, 2.0), (5.0, 0.1, -5.0, 9.0), (2.0, 3.0, 2.5, 3.0)] {
            let mut h = seed(m1, v1);
            h.incorporate(&Evidence::single(StateIndex::PingerX, m2, v2).unwrap());
            let m = h.mean_at(StateIndex::PingerX);
            let v = h.variance_at(StateIndex::PingerX);
            assert!(v <= v1.min(v2));
            assert!(m > m1.min(m2) && m < m1.max(m2), "{m} not between {m1} and {m2}");
        }
    }

    #[test]
    fn untouched_indices_are_unchanged() {
        let mut h = seed(3.0, 2.0);
        let before = h.clone();
        h.incorporate(&Evidence::single(StateIndex::PvcX, 1.0, 1.0).unwrap());
        for idx in StateIndex::ALL.into_iter().filter(|&i| i != StateIndex::PvcX) {
            assert_eq!(h.mean_at(idx), before.mean_at(idx));
            assert_eq!(h.variance_at(idx), before.variance_at(idx));
        }
    }

    #[test]
    fn empty_evidence_is_a_no_op() {
        let mut h = seed(1.0, 1.0);
        let before = h.clone();
        h.incorporate(&Evidence::empty());
        assert_eq!(h, before);
        assert_eq!(h.log_likelihood(&Evidence::empty()), 0.0);
    }

    #[test]
    fn likelihood_prefers_agreeing_evidence() {
        let h = seed(0.0, 1.0);
        let near = Evidence::single(StateIndex::GateX, 0.1, 1.0).unwrap();
        let far = Evidence::single(StateIndex::GateX, 6.0, 1.0).unwrap();
        assert!(h.likelihood(&near) > h.likelihood(&far));

        // Standard normal with combined variance 2 at residual 0.
        let exact = Evidence::single(StateIndex::GateX, 0.0, 1.0).unwrap();
        let expected = 1.0 / (2.0 * std::f64::consts::PI * 2.0).sqrt();
        assert_relative_eq!(h.likelihood(&exact), expected, epsilon = 1e-12);
    }

    #[test]
    fn scale_rejects_negative_factor() {
        let mut h = seed(0.0, 1.0);
        h.scale(0.25).unwrap();
        assert_relative_eq!(h.weight(), 0.25);
        assert!(matches!(h.scale(-1.0), Err(TritonError::InvalidWeight(_))));
        assert!(h.scale(f32::NAN).is_err());
        assert_relative_eq!(h.weight(), 0.25);
        h.scale(0.0).unwrap();
        assert_eq!(h.weight(), 0.0);
    }

    #[test]
    fn absorb_blends_by_weight() {
        let mut a = seed(0.0, 1.0);
        a.set_weight(0.75);
        let mut b = seed(4.0, 3.0);
        b.set_weight(0.25);
        a.absorb(&b);
        assert_relative_eq!(a.weight(), 1.0);
        assert_relative_eq!(a.mean_at(StateIndex::GateX), 1.0);
        assert_relative_eq!(a.variance_at(StateIndex::GateX), 1.5);
    }

    #[test]
    fn binary_round_trip_is_bit_exact() {
        let mut h = seed(0.3, 0.7);
        h.incorporate(&Evidence::single(StateIndex::TorpedoY, -2.25, 0.125).unwrap());
        h.set_weight(0.123_456);
        let back = Hypothesis::from_bytes(&h.to_bytes()).unwrap();
        assert_eq!(back.weight().to_bits(), h.weight().to_bits());
        for (a, b) in h.mode().as_slice().iter().zip(back.mode().as_slice()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(back, h);
    }

    #[test]
    fn truncated_or_misshapen_record_is_corrupt() {
        let bytes = seed(0.0, 1.0).to_bytes();
        assert!(matches!(
            Hypothesis::from_bytes(&bytes[..bytes.len() - 4]),
            Err(TritonError::CorruptData(_))
        ));

        let mut bad = Vec::new();
        bad.extend_from_slice(&1.0f32.to_le_bytes());
        Matrix::column(&[0.0; 2]).write_to(&mut bad).unwrap();
        Matrix::column(&[1.0; 2]).write_to(&mut bad).unwrap();
        assert!(matches!(
            Hypothesis::from_bytes(&bad),
            Err(TritonError::CorruptData(_))
        ));
    }
}
