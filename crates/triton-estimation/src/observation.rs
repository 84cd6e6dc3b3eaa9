//! Observation model.
//!
//! A vision or sonar producer reports what it saw as raw polar-style readings
//! (bearing, optional elevation, range) or as direct values, tagged with the
//! state indices they describe.  [`project`] turns one [`Assignment`] of those
//! readings into [`Evidence`]: a sparse set of `(index, value, variance)`
//! triples in state-vector coordinates.
//!
//! # Geometry codes
//!
//! | code | variant | readings | updates |
//! |---|---|---|---|
//! | `-1` | [`Assignment::Direct`] | `x y _` | x, y |
//! | `-2` | [`Assignment::BearingRange`] | `bearing _ range` | x, y |
//! | `-3` | [`Assignment::Scalar`] | `value variance _` | x |
//! | index ≥ 0 | [`Assignment::BearingElevationRange`] | `bearing elevation range` | x, y, d |
//!
//! Bearing is measured from the vehicle's forward (+y) axis towards +x;
//! elevation is positive towards +d.  Variances of the projected values are
//! obtained by first-order propagation of the configured reading variances
//! through the trigonometric projection.
//!
//! # Example
//!
//! ```rust
//! use triton_estimation::observation::{project, Assignment, ProjectionConfig, Readings};
//! use triton_types::StateIndex;
//!
//! let cfg = ProjectionConfig::default();
//! // A PVC marker dead ahead at 4 m.
//! let a = Assignment::BearingRange { x: StateIndex::PvcX, y: StateIndex::PvcY };
//! let ev = project(&a, &Readings::new(0.0, 0.0, 4.0), &cfg).unwrap();
//! assert!((ev.value_of(StateIndex::PvcY).unwrap() - 4.0).abs() < 1e-5);
//! assert!(ev.value_of(StateIndex::PvcX).unwrap().abs() < 1e-5);
//! ```

use serde::{Deserialize, Serialize};
use triton_types::{StateIndex, TritonError};

/// Unit the producers use for bearing and elevation readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    /// Fractions of a full revolution (the vision pipeline's native unit).
    #[default]
    Turns,
    Radians,
}

impl AngleUnit {
    fn radians_per_unit(self) -> f64 {
        match self {
            AngleUnit::Turns => std::f64::consts::TAU,
            AngleUnit::Radians => 1.0,
        }
    }
}

/// Noise model applied when projecting raw readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    pub angle_unit: AngleUnit,
    /// Bearing noise, in squared `angle_unit`s.
    pub bearing_variance: f32,
    /// Elevation noise, in squared `angle_unit`s.
    pub elevation_variance: f32,
    /// Range noise (m²).
    pub range_variance: f32,
    /// Variance used for direct observations that do not carry their own.
    pub direct_variance: f32,
    /// Lower bound on every projected variance.
    pub variance_floor: f32,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            angle_unit: AngleUnit::Turns,
            bearing_variance: 1e-4,
            elevation_variance: 1e-4,
            range_variance: 0.25,
            direct_variance: 1.0,
            variance_floor: 1e-3,
        }
    }
}

/// The three numeric fields of an observation record's reading line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    pub first: f32,
    pub second: f32,
    pub third: f32,
}

impl Readings {
    pub fn new(first: f32, second: f32, third: f32) -> Self {
        Self {
            first,
            second,
            third,
        }
    }

    fn all_finite(&self) -> bool {
        self.first.is_finite() && self.second.is_finite() && self.third.is_finite()
    }
}

/// One interpretation of a record: which state indices the readings describe
/// and which geometry projects them there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Direct { x: StateIndex, y: StateIndex },
    BearingRange { x: StateIndex, y: StateIndex },
    Scalar { index: StateIndex },
    BearingElevationRange { x: StateIndex, y: StateIndex, d: StateIndex },
}

impl Assignment {
    pub const DIRECT_CODE: i64 = -1;
    pub const BEARING_RANGE_CODE: i64 = -2;
    pub const SCALAR_CODE: i64 = -3;

    /// Decode one `a b c` triple from the first line of a record.
    ///
    /// A negative `c` selects a geometry code over `a` and `b`; a
    /// non-negative `c` is the third index of a bearing/elevation/range fix.
    pub fn from_triple(a: i64, b: i64, c: i64) -> Result<Self, TritonError> {
        let x = state_index(a)?;
        let y = state_index(b)?;
        let assignment = match c {
            Self::DIRECT_CODE => Assignment::Direct { x, y },
            Self::BEARING_RANGE_CODE => Assignment::BearingRange { x, y },
            Self::SCALAR_CODE => Assignment::Scalar { index: x },
            d if d >= 0 => Assignment::BearingElevationRange {
                x,
                y,
                d: state_index(d)?,
            },
            code => return Err(TritonError::UnsupportedObservationType(code)),
        };
        assignment.validate()?;
        Ok(assignment)
    }

    /// Inverse of [`Assignment::from_triple`].
    pub fn to_triple(&self) -> (i64, i64, i64) {
        let i = |s: StateIndex| s.index() as i64;
        match *self {
            Assignment::Direct { x, y } => (i(x), i(y), Self::DIRECT_CODE),
            Assignment::BearingRange { x, y } => (i(x), i(y), Self::BEARING_RANGE_CODE),
            Assignment::Scalar { index } => (i(index), i(index), Self::SCALAR_CODE),
            Assignment::BearingElevationRange { x, y, d } => (i(x), i(y), i(d)),
        }
    }

    /// State indices this assignment updates, without repeats.
    pub fn targets(&self) -> Vec<StateIndex> {
        match *self {
            Assignment::Direct { x, y } if x == y => vec![x],
            Assignment::Direct { x, y } | Assignment::BearingRange { x, y } => vec![x, y],
            Assignment::Scalar { index } => vec![index],
            Assignment::BearingElevationRange { x, y, d } => vec![x, y, d],
        }
    }

    fn validate(&self) -> Result<(), TritonError> {
        let distinct = match *self {
            Assignment::BearingRange { x, y } => x != y,
            Assignment::BearingElevationRange { x, y, d } => x != y && y != d && x != d,
            _ => true,
        };
        if distinct {
            Ok(())
        } else {
            Err(TritonError::CorruptData(format!(
                "polar fix repeats a target index: {:?}",
                self.to_triple()
            )))
        }
    }
}

fn state_index(raw: i64) -> Result<StateIndex, TritonError> {
    let idx = usize::try_from(raw).map_err(|_| {
        TritonError::CorruptData(format!("negative state index {raw}"))
    })?;
    StateIndex::try_from(idx)
}

/// One unit of sensor evidence.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// The producer looked and did not see its target.
    NotSeen,
    /// One or more alternative interpretations of the same readings.
    Seen {
        assignments: Vec<Assignment>,
        readings: Readings,
    },
}

impl Observation {
    /// A sighting with a single interpretation.
    pub fn unambiguous(assignment: Assignment, readings: Readings) -> Self {
        Observation::Seen {
            assignments: vec![assignment],
            readings,
        }
    }

    /// A sighting with several candidate interpretations.
    ///
    /// Fails with [`TritonError::CorruptData`] when `assignments` is empty.
    pub fn ambiguous(assignments: Vec<Assignment>, readings: Readings) -> Result<Self, TritonError> {
        if assignments.is_empty() {
            return Err(TritonError::CorruptData(
                "sighting without any target assignment".to_string(),
            ));
        }
        Ok(Observation::Seen {
            assignments,
            readings,
        })
    }

    pub fn is_seen(&self) -> bool {
        matches!(self, Observation::Seen { .. })
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Observation::Seen { assignments, .. } if assignments.len() > 1)
    }
}

/// A single projected value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvidenceEntry {
    pub index: StateIndex,
    pub value: f32,
    pub variance: f32,
}

/// Sparse delta over the state vector produced by [`project`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Evidence {
    entries: Vec<EvidenceEntry>,
}

impl Evidence {
    /// Evidence that touches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Evidence about one index.
    pub fn single(index: StateIndex, value: f32, variance: f32) -> Result<Self, TritonError> {
        let mut ev = Self::empty();
        ev.push(index, value, variance)?;
        Ok(ev)
    }

    /// Add a value; the variance must be positive and both must be finite.
    pub fn push(&mut self, index: StateIndex, value: f32, variance: f32) -> Result<(), TritonError> {
        if !value.is_finite() || !variance.is_finite() || variance <= 0.0 {
            return Err(TritonError::CorruptData(format!(
                "unusable evidence for {index}: value {value}, variance {variance}"
            )));
        }
        self.entries.push(EvidenceEntry {
            index,
            value,
            variance,
        });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn value_of(&self, index: StateIndex) -> Option<f32> {
        self.entries.iter().find(|e| e.index == index).map(|e| e.value)
    }

    pub fn variance_of(&self, index: StateIndex) -> Option<f32> {
        self.entries
            .iter()
            .find(|e| e.index == index)
            .map(|e| e.variance)
    }
}

/// Project `readings` through `assignment` into state-vector evidence.
///
/// Fails with [`TritonError::CorruptData`] for non-finite readings or a
/// negative range.
pub fn project(
    assignment: &Assignment,
    readings: &Readings,
    cfg: &ProjectionConfig,
) -> Result<Evidence, TritonError> {
    if !readings.all_finite() {
        return Err(TritonError::CorruptData(format!(
            "non-finite readings {readings:?}"
        )));
    }

    let floor = f64::from(cfg.variance_floor.max(f32::MIN_POSITIVE));
    let mut ev = Evidence::empty();
    let mut push = |index: StateIndex, value: f64, variance: f64| {
        ev.push(index, value as f32, variance.max(floor) as f32)
    };

    match *assignment {
        Assignment::Direct { x, y } => {
            let var = f64::from(cfg.direct_variance);
            push(x, f64::from(readings.first), var)?;
            if y != x {
                push(y, f64::from(readings.second), var)?;
            }
        }
        Assignment::Scalar { index } => {
            let var = if readings.second > 0.0 {
                readings.second
            } else {
                cfg.direct_variance
            };
            push(index, f64::from(readings.first), f64::from(var))?;
        }
        Assignment::BearingRange { x, y } => {
            let polar = Polar::new(readings.first, 0.0, readings.third, cfg)?;
            let (sb, cb) = polar.bearing.sin_cos();
            let r = polar.range;

            let var_x = sb * sb * polar.var_range + (r * cb).powi(2) * polar.var_bearing;
            let var_y = cb * cb * polar.var_range + (r * sb).powi(2) * polar.var_bearing;
            push(x, r * sb, var_x)?;
            push(y, r * cb, var_y)?;
        }
        Assignment::BearingElevationRange { x, y, d } => {
            let polar = Polar::new(readings.first, readings.second, readings.third, cfg)?;
            let (sb, cb) = polar.bearing.sin_cos();
            let (se, ce) = polar.elevation.sin_cos();
            let r = polar.range;

            // Jacobian rows w.r.t. (range, elevation, bearing).
            let jx = [ce * sb, -r * se * sb, r * ce * cb];
            let jy = [ce * cb, -r * se * cb, -r * ce * sb];
            let jd = [se, r * ce, 0.0];
            let noise = [polar.var_range, polar.var_elevation, polar.var_bearing];
            let propagate = |j: [f64; 3]| -> f64 { j.iter().zip(noise).map(|(g, s)| g * g * s).sum() };

            push(x, r * ce * sb, propagate(jx))?;
            push(y, r * ce * cb, propagate(jy))?;
            push(d, r * se, propagate(jd))?;
        }
    }
    Ok(ev)
}

/// Polar readings converted to radians, with their variances.
struct Polar {
    bearing: f64,
    elevation: f64,
    range: f64,
    var_bearing: f64,
    var_elevation: f64,
    var_range: f64,
}

impl Polar {
    fn new(bearing: f32, elevation: f32, range: f32, cfg: &ProjectionConfig) -> Result<Self, TritonError> {
        if range < 0.0 {
            return Err(TritonError::CorruptData(format!("negative range {range}")));
        }
        let k = cfg.angle_unit.radians_per_unit();
        Ok(Self {
            bearing: f64::from(bearing) * k,
            elevation: f64::from(elevation) * k,
            range: f64::from(range),
            var_bearing: f64::from(cfg.bearing_variance) * k * k,
            var_elevation: f64::from(cfg.elevation_variance) * k * k,
            var_range: f64::from(cfg.range_variance),
        })
    }
}
