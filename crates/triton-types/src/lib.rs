//! `triton-types` – shared vocabulary of the Triton estimation stack.
//!
//! Every process in the topology agrees on three things defined here: the
//! closed [`StateIndex`] enumeration that names each slot of the world-state
//! vector, the [`Role`] a process plays in the topology, and the
//! [`TritonError`] type that crosses crate boundaries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of scalar quantities in the world-state vector.
pub const STATE_LEN: usize = StateIndex::ALL.len();

/// Prior mean used when no configuration overrides it: the surveyed course
/// layout, in [`StateIndex`] order.
pub const DEFAULT_PRIOR_MEAN: [f32; STATE_LEN] = [
    0.0, 12.0, 6.0, 20.0, 10.0, 10.0, 22.0, 8.0, 11.0, 21.0, 9.0, 10.5, 29.0, 15.0, 22.0, 26.0,
    23.0, 26.0, 26.0, 26.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 42.0, 25.0,
];

/// Prior variance used when no configuration overrides it.
pub const DEFAULT_PRIOR_VARIANCE: [f32; STATE_LEN] = [1.0; STATE_LEN];

/// One named slot of the world-state vector.
///
/// The discriminant is the position in the vector, so index `i` refers to
/// the same physical quantity in every hypothesis.  Positions are in pool
/// coordinates (metres), `*D` slots hold depth or diameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum StateIndex {
    /// Fixed reference slot; never targeted by producers.
    Zero = 0,
    GateX,
    GateY,
    RedBuoyX,
    RedBuoyY,
    RedBuoyD,
    GreenBuoyX,
    GreenBuoyY,
    GreenBuoyD,
    YellowBuoyX,
    YellowBuoyY,
    YellowBuoyD,
    PvcX,
    PvcY,
    OpenBinX,
    OpenBinY,
    CoveredBinX,
    CoveredBinY,
    TorpedoX,
    TorpedoY,
    Hole1X,
    Hole1Y,
    Hole2X,
    Hole2Y,
    Hole3X,
    Hole3Y,
    Hole4X,
    Hole4Y,
    PingerX,
    PingerY,
}

impl StateIndex {
    /// Every index, in vector order.
    pub const ALL: [StateIndex; 30] = [
        StateIndex::Zero,
        StateIndex::GateX,
        StateIndex::GateY,
        StateIndex::RedBuoyX,
        StateIndex::RedBuoyY,
        StateIndex::RedBuoyD,
        StateIndex::GreenBuoyX,
        StateIndex::GreenBuoyY,
        StateIndex::GreenBuoyD,
        StateIndex::YellowBuoyX,
        StateIndex::YellowBuoyY,
        StateIndex::YellowBuoyD,
        StateIndex::PvcX,
        StateIndex::PvcY,
        StateIndex::OpenBinX,
        StateIndex::OpenBinY,
        StateIndex::CoveredBinX,
        StateIndex::CoveredBinY,
        StateIndex::TorpedoX,
        StateIndex::TorpedoY,
        StateIndex::Hole1X,
        StateIndex::Hole1Y,
        StateIndex::Hole2X,
        StateIndex::Hole2Y,
        StateIndex::Hole3X,
        StateIndex::Hole3Y,
        StateIndex::Hole4X,
        StateIndex::Hole4Y,
        StateIndex::PingerX,
        StateIndex::PingerY,
    ];

    /// Position of this quantity inside the state vector.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable snake_case name, as used in configuration files and logs.
    pub fn name(self) -> &'static str {
        match self {
            StateIndex::Zero => "zero",
            StateIndex::GateX => "gate_x",
            StateIndex::GateY => "gate_y",
            StateIndex::RedBuoyX => "red_buoy_x",
            StateIndex::RedBuoyY => "red_buoy_y",
            StateIndex::RedBuoyD => "red_buoy_d",
            StateIndex::GreenBuoyX => "green_buoy_x",
            StateIndex::GreenBuoyY => "green_buoy_y",
            StateIndex::GreenBuoyD => "green_buoy_d",
            StateIndex::YellowBuoyX => "yellow_buoy_x",
            StateIndex::YellowBuoyY => "yellow_buoy_y",
            StateIndex::YellowBuoyD => "yellow_buoy_d",
            StateIndex::PvcX => "pvc_x",
            StateIndex::PvcY => "pvc_y",
            StateIndex::OpenBinX => "open_bin_x",
            StateIndex::OpenBinY => "open_bin_y",
            StateIndex::CoveredBinX => "covered_bin_x",
            StateIndex::CoveredBinY => "covered_bin_y",
            StateIndex::TorpedoX => "torpedo_x",
            StateIndex::TorpedoY => "torpedo_y",
            StateIndex::Hole1X => "hole1_x",
            StateIndex::Hole1Y => "hole1_y",
            StateIndex::Hole2X => "hole2_x",
            StateIndex::Hole2Y => "hole2_y",
            StateIndex::Hole3X => "hole3_x",
            StateIndex::Hole3Y => "hole3_y",
            StateIndex::Hole4X => "hole4_x",
            StateIndex::Hole4Y => "hole4_y",
            StateIndex::PingerX => "pinger_x",
            StateIndex::PingerY => "pinger_y",
        }
    }
}

impl TryFrom<usize> for StateIndex {
    type Error = TritonError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        StateIndex::ALL
            .get(value)
            .copied()
            .ok_or(TritonError::IndexOutOfRange {
                index: value,
                bound: STATE_LEN,
            })
    }
}

impl fmt::Display for StateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The part a long-lived process plays in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Executes commands issued by mission.
    Control,
    /// Turns the fused world state into commands.
    Mission,
    /// Owns the hypothesis pool and publishes the fused world state.
    Modeling,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Control => write!(f, "control"),
            Role::Mission => write!(f, "mission"),
            Role::Modeling => write!(f, "modeling"),
        }
    }
}

impl FromStr for Role {
    type Err = TritonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "control" => Ok(Role::Control),
            "mission" => Ok(Role::Mission),
            "modeling" => Ok(Role::Modeling),
            other => Err(TritonError::Config(format!("unknown role `{other}`"))),
        }
    }
}

/// Error type shared by the estimation engine, the wire codec and the role
/// processes.
#[derive(Error, Debug)]
pub enum TritonError {
    #[error("Shape Mismatch: {left:?} is incompatible with {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("Index Out Of Range: {index} (bound {bound})")]
    IndexOutOfRange { index: usize, bound: usize },

    #[error("Corrupt Data: {0}")]
    CorruptData(String),

    #[error("Unsupported Observation Type: geometry code {0}")]
    UnsupportedObservationType(i64),

    #[error("Invalid Weight: {0}")]
    InvalidWeight(f32),

    #[error("Channel Closed: {0}")]
    ChannelClosed(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl TritonError {
    /// Whether the message loop may log this error and continue with the next
    /// record instead of shutting the process down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TritonError::CorruptData(_)
                | TritonError::UnsupportedObservationType(_)
                | TritonError::IndexOutOfRange { .. }
        )
    }
}
