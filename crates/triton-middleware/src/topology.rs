//! Process topology: which role reads and writes which pipe.
//!
//! ```text
//! producers ──observations──▶ modeling ──fused state──▶ mission ──commands──▶ control
//! ```
//!
//! Each role owns exactly one input and one output endpoint.  The default
//! table puts every endpoint under `pipe/`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use triton_types::{Role, TritonError};

/// One row of the connection table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub role: Role,
    /// Path the role reads from (`-` for stdin).
    pub input: String,
    /// Path the role writes to (`-` for stdout).
    pub output: String,
}

impl Connection {
    pub fn new(role: Role, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role,
            input: input.into(),
            output: output.into(),
        }
    }
}

/// The full set of role → endpoint bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionTable {
    connections: Vec<Connection>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self {
            connections: vec![
                Connection::new(Role::Control, "pipe/control_out", "pipe/control_in"),
                Connection::new(Role::Mission, "pipe/mission_out", "pipe/mission_in"),
                Connection::new(Role::Modeling, "pipe/modeling_out", "pipe/modeling_in"),
            ],
        }
    }
}

impl ConnectionTable {
    /// Build and validate a table.
    pub fn new(connections: Vec<Connection>) -> Result<Self, TritonError> {
        let table = Self { connections };
        table.validate()?;
        Ok(table)
    }

    /// Reject duplicate roles and endpoints claimed by two rows.
    ///
    /// The stdio placeholder may appear more than once.
    pub fn validate(&self) -> Result<(), TritonError> {
        let mut roles = HashSet::new();
        let mut inputs = HashSet::new();
        let mut outputs = HashSet::new();

        for c in &self.connections {
            if c.input.trim().is_empty() || c.output.trim().is_empty() {
                return Err(TritonError::Config(format!(
                    "role `{}` has an empty endpoint path",
                    c.role
                )));
            }
            if !roles.insert(c.role) {
                return Err(TritonError::Config(format!(
                    "role `{}` is listed more than once",
                    c.role
                )));
            }
            if c.input != crate::channel::STDIO_PATH && !inputs.insert(c.input.as_str()) {
                return Err(TritonError::Config(format!(
                    "input `{}` is shared by more than one role",
                    c.input
                )));
            }
            if c.output != crate::channel::STDIO_PATH && !outputs.insert(c.output.as_str()) {
                return Err(TritonError::Config(format!(
                    "output `{}` is shared by more than one role",
                    c.output
                )));
            }
        }
        Ok(())
    }

    /// Binding for `role`, if present.
    pub fn lookup(&self, role: Role) -> Option<&Connection> {
        self.connections.iter().find(|c| c.role == role)
    }

    /// Binding for `role`, or a [`TritonError::Config`] naming it.
    pub fn require(&self, role: Role) -> Result<&Connection, TritonError> {
        self.lookup(role)
            .ok_or_else(|| TritonError::Config(format!("no connection for role `{role}`")))
    }

    /// Replace (or add) the binding for `connection.role`.
    pub fn set(&mut self, connection: Connection) {
        match self.connections.iter_mut().find(|c| c.role == connection.role) {
            Some(existing) => *existing = connection,
            None => self.connections.push(connection),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
