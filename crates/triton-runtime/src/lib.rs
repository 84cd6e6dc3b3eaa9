//! `triton-runtime` – the long-lived role processes.
//!
//! Each role owns its state outright and handles one message at a time:
//! read, update, optionally publish, flush.
//!
//! # Modules
//!
//! - [`modeling`] – [`ModelingRole`][modeling::ModelingRole]: owns the
//!   hypothesis pool, fuses observation messages and publishes the best
//!   estimate.  Optional pool snapshots on exit.
//! - [`mission`] – [`MissionRole`][mission::MissionRole] driving a pluggable
//!   [`MissionPlanner`][mission::MissionPlanner].
//! - [`control`] – [`ControlRole`][control::ControlRole] driving a pluggable
//!   [`CommandSink`][control::CommandSink].
//! - [`replay`] – offline replay of a recorded observation stream.
//! - [`stall`] – [`StallMonitor`][stall::StallMonitor]: opt-in input
//!   watchdog that logs silent channels.
//! - [`shutdown`] – the shutdown trigger/signal pair shared by every loop.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: `tracing`
//!   subscriber with optional OTLP export.

pub mod control;
pub mod mission;
pub mod modeling;
pub mod replay;
pub mod shutdown;
pub mod stall;
pub mod telemetry;

pub use control::{CommandSink, ControlRole, LoggingSink};
pub use mission::{LoggingPlanner, MissionPlanner, MissionRole, MissionStats};
pub use modeling::{Ingest, ModelingRole, ModelingSettings, ModelingStats};
pub use replay::{ReplayReport, replay_file};
pub use shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_pair};
pub use stall::StallMonitor;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
