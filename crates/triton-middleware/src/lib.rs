//! `triton-middleware` – the plumbing between processes.
//!
//! Moves text messages between the modeling, mission and control roles
//! without caring what the numbers mean.
//!
//! # Modules
//!
//! - [`wire`] – line codec for observation, fused-state and command
//!   messages.
//! - [`channel`] – framed async readers/writers over pipes, files or stdio.
//! - [`topology`] – the role → endpoint connection table.

pub mod channel;
pub mod topology;
pub mod wire;

pub use channel::{
    ChannelReader, ChannelWriter, DynReader, DynWriter, ObservationFrame, STDIO_PATH, open_reader,
    open_writer,
};
pub use topology::{Connection, ConnectionTable};
pub use wire::Command;
