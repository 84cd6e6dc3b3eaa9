//! The mission role: fused state in, commands out.
//!
//! Decision logic is pluggable through [`MissionPlanner`].  The built-in
//! [`LoggingPlanner`] records what it sees and never issues a command.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{Instrument, debug, info, info_span, warn};
use triton_estimation::Matrix;
use triton_middleware::{ChannelReader, ChannelWriter, Command};
use triton_types::{StateIndex, TritonError};

use crate::shutdown::ShutdownSignal;

/// Turns each fused-state update into zero or one command.
#[async_trait]
pub trait MissionPlanner: Send {
    async fn plan(&mut self, state: &Matrix) -> Result<Option<Command>, TritonError>;
}

/// Logs a few headline positions from every update; issues nothing.
#[derive(Debug, Default)]
pub struct LoggingPlanner {
    updates: u64,
}

impl LoggingPlanner {
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

#[async_trait]
impl MissionPlanner for LoggingPlanner {
    async fn plan(&mut self, state: &Matrix) -> Result<Option<Command>, TritonError> {
        self.updates += 1;
        let at = |i: StateIndex| state.get_flat(i.index());
        let (gate_x, gate_y) = (at(StateIndex::GateX)?, at(StateIndex::GateY)?);
        let (pinger_x, pinger_y) = (at(StateIndex::PingerX)?, at(StateIndex::PingerY)?);
        info!(
            update = self.updates,
            gate_x,
            gate_y,
            pinger_x,
            pinger_y,
            "fused state received"
        );
        Ok(None)
    }
}

/// Counters reported when the mission loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MissionStats {
    pub updates: u64,
    pub skipped: u64,
    pub commands: u64,
}

/// Drives a [`MissionPlanner`] from the fused-state channel.
pub struct MissionRole<P> {
    planner: P,
    stats: MissionStats,
}

impl<P: MissionPlanner> MissionRole<P> {
    pub fn new(planner: P) -> Self {
        Self {
            planner,
            stats: MissionStats::default(),
        }
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    /// Run until end-of-stream or shutdown.  Malformed state lines are
    /// logged and skipped.
    pub async fn run<R, W>(
        &mut self,
        reader: &mut ChannelReader<R>,
        writer: &mut ChannelWriter<W>,
        mut shutdown: ShutdownSignal,
    ) -> Result<MissionStats, TritonError>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let span = info_span!("mission", input = %reader.name(), output = %writer.name());
        async {
            info!("mission loop started");
            let result = loop {
                let state = tokio::select! {
                    biased;
                    _ = shutdown.wait() => break Ok(()),
                    state = reader.read_fused_state() => state,
                };
                let state = match state {
                    Ok(state) => state,
                    Err(TritonError::ChannelClosed(_)) => break Ok(()),
                    Err(e) if e.is_recoverable() => {
                        warn!(error = %e, "skipping malformed fused state");
                        self.stats.skipped += 1;
                        continue;
                    }
                    Err(e) => break Err(e),
                };
                self.stats.updates += 1;

                match self.planner.plan(&state).await {
                    Ok(Some(command)) => {
                        if let Err(e) = writer.send_command(&command).await {
                            break Err(e);
                        }
                        self.stats.commands += 1;
                        debug!(command = command.as_str(), "command issued");
                    }
                    Ok(None) => {}
                    Err(e) => break Err(e),
                }
            };

            if let Err(e) = writer.shutdown().await {
                warn!(error = %e, "closing output failed");
            }
            info!(
                updates = self.stats.updates,
                commands = self.stats.commands,
                skipped = self.stats.skipped,
                "mission loop finished"
            );
            result.map(|()| self.stats)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader, duplex};
    use triton_middleware::wire;
    use triton_types::STATE_LEN;

    /// Issues `goto <gate_x>` whenever the gate estimate moves.
    struct GatePlanner {
        last: Option<f32>,
    }

    #[async_trait]
    impl MissionPlanner for GatePlanner {
        async fn plan(&mut self, state: &Matrix) -> Result<Option<Command>, TritonError> {
            let x = state.get_flat(StateIndex::GateX.index())?;
            if self.last == Some(x) {
                return Ok(None);
            }
            self.last = Some(x);
            Command::new(format!("goto {x}")).map(Some)
        }
    }

    #[tokio::test]
    async fn planner_commands_reach_control() {
        let (mut modeling, input) = duplex(8192);
        let (output, control) = duplex(8192);
        let mut reader = ChannelReader::new("mission-in", BufReader::new(input));
        let mut writer = ChannelWriter::new("mission-out", output);
        let mut control = ChannelReader::new("control-in", BufReader::new(control));

        let mut state = Matrix::column(&[0.0; STATE_LEN]);
        for x in [1.0, 1.0, 2.0] {
            state.set_flat(StateIndex::GateX.index(), x).unwrap();
            let line = wire::encode_fused_state(&state).unwrap();
            modeling.write_all(line.as_bytes()).await.unwrap();
        }
        modeling.write_all(b"1 2 3\n").await.unwrap();
        drop(modeling);

        let mut role = MissionRole::new(GatePlanner { last: None });
        let stats = role
            .run(&mut reader, &mut writer, ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(
            stats,
            MissionStats {
                updates: 3,
                skipped: 1,
                commands: 2
            }
        );
        assert_eq!(control.read_command().await.unwrap().as_str(), "goto 1");
        assert_eq!(control.read_command().await.unwrap().as_str(), "goto 2");
    }

    #[tokio::test]
    async fn logging_planner_never_commands() {
        let mut planner = LoggingPlanner::default();
        let state = Matrix::column(&triton_types::DEFAULT_PRIOR_MEAN);
        assert!(planner.plan(&state).await.unwrap().is_none());
        assert_eq!(planner.updates(), 1);
    }

    #[tokio::test]
    async fn logging_planner_rejects_short_vectors() {
        let mut planner = LoggingPlanner::default();
        let state = Matrix::column(&[0.0; 3]);
        assert!(matches!(
            planner.plan(&state).await,
            Err(TritonError::IndexOutOfRange { .. })
        ));
    }
}
