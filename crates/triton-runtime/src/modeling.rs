//! The modeling role: observations in, fused state out.
//!
//! Each iteration of [`ModelingRole::run`]:
//!
//! 1. **Read** one complete observation message from the input channel.
//! 2. **Fuse** every decoded record into the hypothesis pool, one at a time.
//!    A record that fails to decode or project is logged and skipped.
//! 3. **Publish** the best estimate as one fused-state line and flush.
//!
//! The loop ends on end-of-stream, on shutdown, or on a non-recoverable
//! error.  On the way out the pool is optionally persisted as a snapshot so
//! the next run can resume from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{Instrument, debug, error, info, info_span, warn};
use triton_estimation::{Model, Observation, PoolConfig, ProjectionConfig};
use triton_middleware::{ChannelReader, ChannelWriter, ObservationFrame};
use triton_types::{DEFAULT_PRIOR_MEAN, DEFAULT_PRIOR_VARIANCE, TritonError};

use crate::shutdown::ShutdownSignal;
use crate::stall::StallMonitor;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the modeling role needs besides its channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelingSettings {
    pub prior_mean: Vec<f32>,
    pub prior_variance: Vec<f32>,
    pub pool: PoolConfig,
    pub projection: ProjectionConfig,
    /// Log a stall after this long without input.  `None` disables the
    /// monitor.
    pub read_timeout: Option<Duration>,
    /// Persist the pool here on exit and seed from it on start.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ModelingSettings {
    fn default() -> Self {
        Self {
            prior_mean: DEFAULT_PRIOR_MEAN.to_vec(),
            prior_variance: DEFAULT_PRIOR_VARIANCE.to_vec(),
            pool: PoolConfig::default(),
            projection: ProjectionConfig::default(),
            read_timeout: None,
            snapshot_path: None,
        }
    }
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelingStats {
    /// Observation messages read (including malformed count lines).
    pub messages: u64,
    /// Records fused into the pool, "not seen" included.
    pub fused: u64,
    /// Records or messages logged and skipped.
    pub skipped: u64,
    /// Fused-state lines published.
    pub published: u64,
}

/// What [`ModelingRole::ingest`] did with one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// A message was read and its records applied; publish next.
    Fused,
    /// A malformed count line was logged and skipped.
    Skipped,
    /// The input reached end-of-stream.
    Closed,
}

// ─────────────────────────────────────────────────────────────────────────────
// ModelingRole
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the hypothesis pool for the lifetime of the modeling process.
pub struct ModelingRole {
    model: Model,
    projection: ProjectionConfig,
    read_timeout: Option<Duration>,
    snapshot_path: Option<PathBuf>,
    stats: ModelingStats,
}

impl ModelingRole {
    /// Seed the pool from the snapshot at `settings.snapshot_path` when one
    /// exists, otherwise from the configured prior.
    pub async fn from_settings(settings: &ModelingSettings) -> Result<Self, TritonError> {
        let model = match &settings.snapshot_path {
            Some(path) if tokio::fs::try_exists(path).await? => {
                let model = load_snapshot(path, settings.pool).await?;
                info!(path = %path.display(), size = model.size(), "seeded pool from snapshot");
                model
            }
            _ => Model::from_prior(&settings.prior_mean, &settings.prior_variance, settings.pool)?,
        };
        let mut role = Self::new(model, settings.projection);
        role.read_timeout = settings.read_timeout;
        role.snapshot_path = settings.snapshot_path.clone();
        Ok(role)
    }

    pub fn new(model: Model, projection: ProjectionConfig) -> Self {
        Self {
            model,
            projection,
            read_timeout: None,
            snapshot_path: None,
            stats: ModelingStats::default(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn into_model(self) -> Model {
        self.model
    }

    pub fn stats(&self) -> ModelingStats {
        self.stats
    }

    /// Fuse every decodable record of `frame`, in order.
    ///
    /// Recoverable record errors are logged and counted; anything else is
    /// returned and stops the loop.
    pub fn apply_frame(&mut self, frame: ObservationFrame) -> Result<(), TritonError> {
        for (n, record) in frame.into_records().into_iter().enumerate() {
            let result = record.and_then(|obs| self.fuse(&obs));
            match result {
                Ok(()) => self.stats.fused += 1,
                Err(e) if e.is_recoverable() => {
                    warn!(record = n, error = %e, "skipping observation record");
                    self.stats.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Account for one read attempt from the observation channel.
    pub fn ingest(
        &mut self,
        frame: Result<ObservationFrame, TritonError>,
    ) -> Result<Ingest, TritonError> {
        match frame {
            Ok(frame) => {
                self.stats.messages += 1;
                self.apply_frame(frame)?;
                Ok(Ingest::Fused)
            }
            Err(TritonError::ChannelClosed(name)) => {
                info!(channel = %name, "input closed");
                Ok(Ingest::Closed)
            }
            Err(e) if e.is_recoverable() => {
                self.stats.messages += 1;
                self.stats.skipped += 1;
                warn!(error = %e, "skipping malformed observation message");
                Ok(Ingest::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    fn fuse(&mut self, observation: &Observation) -> Result<(), TritonError> {
        let outcome = self.model.add_evidence(observation, &self.projection)?;
        if outcome.branched > 0 {
            debug!(children = outcome.branched, size = outcome.size, "pool branched");
        }
        Ok(())
    }

    /// Publish the current best estimate.
    pub async fn publish<W>(&mut self, writer: &mut ChannelWriter<W>) -> Result<(), TritonError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.publish_fused_state(&self.model.best_estimate()).await?;
        self.stats.published += 1;
        debug!(
            seq = self.stats.published,
            at = %Utc::now().to_rfc3339(),
            hypotheses = self.model.size(),
            best_weight = self.model.best().weight(),
            "published fused state"
        );
        Ok(())
    }

    /// Run until end-of-stream or shutdown.
    ///
    /// End-of-stream on the input and a shutdown request are orderly exits;
    /// the stats are returned after the optional snapshot is written and the
    /// output is closed.
    pub async fn run<R, W>(
        &mut self,
        reader: &mut ChannelReader<R>,
        writer: &mut ChannelWriter<W>,
        mut shutdown: ShutdownSignal,
    ) -> Result<ModelingStats, TritonError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let span = info_span!("modeling", input = %reader.name(), output = %writer.name());
        async {
            info!(hypotheses = self.model.size(), "modeling loop started");
            let monitor = self
                .read_timeout
                .map(|timeout| StallMonitor::spawn(reader.name(), timeout));

            let result = loop {
                let frame = tokio::select! {
                    biased;
                    _ = shutdown.wait() => {
                        info!("shutdown requested");
                        break Ok(());
                    }
                    frame = reader.read_observations() => frame,
                };
                if let Some(m) = &monitor {
                    m.heartbeat();
                }

                match self.ingest(frame) {
                    Ok(Ingest::Fused) => {
                        if let Err(e) = self.publish(writer).await {
                            break Err(e);
                        }
                    }
                    Ok(Ingest::Skipped) => {}
                    Ok(Ingest::Closed) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };

            let snapshot = match &self.snapshot_path {
                Some(path) => match save_snapshot(path, &self.model).await {
                    Ok(()) => {
                        info!(path = %path.display(), size = self.model.size(), "pool snapshot written");
                        Ok(())
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "writing pool snapshot failed");
                        Err(e)
                    }
                },
                None => Ok(()),
            };
            if let Err(e) = writer.shutdown().await {
                warn!(error = %e, "closing output failed");
            }

            let stats = self.stats;
            info!(
                messages = stats.messages,
                fused = stats.fused,
                skipped = stats.skipped,
                published = stats.published,
                "modeling loop finished"
            );
            // A loop error outranks a snapshot error.
            result.and(snapshot).map(|()| stats)
        }
        .instrument(span)
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Write the pool to `path`, replacing any previous snapshot.
pub async fn save_snapshot(path: &Path, model: &Model) -> Result<(), TritonError> {
    let mut bytes = Vec::new();
    model.write_to(&mut bytes)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Read a pool snapshot from `path`.
pub async fn load_snapshot(path: &Path, config: PoolConfig) -> Result<Model, TritonError> {
    let bytes = tokio::fs::read(path).await?;
    Model::read_from(&mut bytes.as_slice(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, duplex};
    use triton_estimation::{Assignment, Readings};
    use triton_types::{STATE_LEN, StateIndex};

    fn zero_prior() -> ModelingSettings {
        ModelingSettings {
            prior_mean: vec![0.0; STATE_LEN],
            prior_variance: vec![1.0; STATE_LEN],
            ..ModelingSettings::default()
        }
    }

    fn channels() -> (
        DuplexStream,
        ChannelReader<BufReader<DuplexStream>>,
        ChannelWriter<DuplexStream>,
        ChannelReader<BufReader<DuplexStream>>,
    ) {
        let (producer, input) = duplex(8192);
        let (output, consumer) = duplex(8192);
        (
            producer,
            ChannelReader::new("modeling-in", BufReader::new(input)),
            ChannelWriter::new("modeling-out", output),
            ChannelReader::new("mission-in", BufReader::new(consumer)),
        )
    }

    #[tokio::test]
    async fn fuses_and_publishes_until_eof() {
        let mut role = ModelingRole::from_settings(&zero_prior()).await.unwrap();
        let (mut producer, mut input, mut output, mut mission) = channels();

        producer
            .write_all(b"1\n1 1 -3\n10 1 0\n0\n")
            .await
            .unwrap();
        drop(producer);

        let stats = role
            .run(&mut input, &mut output, ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.fused, 2);
        assert_eq!(stats.published, 2);

        let first = mission.read_fused_state().await.unwrap();
        assert!((first.as_slice()[StateIndex::GateX.index()] - 5.0).abs() < 1e-5);
        let second = mission.read_fused_state().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn malformed_input_is_skipped_not_fatal() {
        let mut role = ModelingRole::from_settings(&zero_prior()).await.unwrap();
        let (mut producer, mut input, mut output, _mission) = channels();

        producer
            .write_all(b"garbage\n2\n1 2 -7\n0 0 0\n1 1 -3\n4 1 0\n")
            .await
            .unwrap();
        drop(producer);

        let stats = role
            .run(&mut input, &mut output, ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.fused, 1);
        assert_eq!(stats.published, 1);
        let gate_x = role.model().best().mean_at(StateIndex::GateX);
        assert!((gate_x - 2.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn undecodable_bytes_do_not_stop_the_loop() {
        let mut role = ModelingRole::from_settings(&zero_prior()).await.unwrap();
        let (mut producer, mut input, mut output, mut mission) = channels();

        producer
            .write_all(b"1\n1 1 -3\n\xff\xfe 1 0\n1\n1 1 -3\n10 1 0\n")
            .await
            .unwrap();
        drop(producer);

        let stats = role
            .run(&mut input, &mut output, ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.fused, 1);
        assert_eq!(stats.published, 2);

        mission.read_fused_state().await.unwrap();
        let latest = mission.read_fused_state().await.unwrap();
        assert!((latest.as_slice()[StateIndex::GateX.index()] - 5.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shutdown_stops_a_blocked_loop() {
        let mut role = ModelingRole::from_settings(&zero_prior()).await.unwrap();
        let (_producer, mut input, mut output, _mission) = channels();
        let (trigger, signal) = crate::shutdown::shutdown_pair();

        let handle = tokio::spawn(async move {
            let stats = role.run(&mut input, &mut output, signal).await;
            (role, stats)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.trigger();

        let (_role, stats) = handle.await.unwrap();
        assert_eq!(stats.unwrap(), ModelingStats::default());
    }

    #[tokio::test]
    async fn snapshot_persists_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ModelingSettings {
            snapshot_path: Some(dir.path().join("pool.bin")),
            ..zero_prior()
        };

        let mut role = ModelingRole::from_settings(&settings).await.unwrap();
        let (mut producer, mut input, mut output, _mission) = channels();
        producer.write_all(b"1\n5 5 -3\n3 1 0\n").await.unwrap();
        drop(producer);
        role.run(&mut input, &mut output, ShutdownSignal::never())
            .await
            .unwrap();

        let resumed = ModelingRole::from_settings(&settings).await.unwrap();
        let d = resumed.model().best().mean_at(StateIndex::RedBuoyD);
        assert!((d - 1.5).abs() < 1e-5);
        assert!((resumed.model().best().variance_at(StateIndex::RedBuoyD) - 0.5).abs() < 1e-5);
    }

    #[tokio::test]
    async fn failed_snapshot_still_closes_output() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ModelingSettings {
            snapshot_path: Some(dir.path().join("missing").join("pool.bin")),
            ..zero_prior()
        };

        let mut role = ModelingRole::from_settings(&settings).await.unwrap();
        let (mut producer, mut input, mut output, mut mission) = channels();
        producer.write_all(b"0\n").await.unwrap();
        drop(producer);

        let result = role
            .run(&mut input, &mut output, ShutdownSignal::never())
            .await;
        assert!(matches!(result, Err(TritonError::Io(_))));
        assert_eq!(role.stats().published, 1);

        mission.read_fused_state().await.unwrap();
        assert!(matches!(
            mission.read_fused_state().await,
            Err(TritonError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_snapshot_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.bin");
        tokio::fs::write(&path, [1u8, 2, 3]).await.unwrap();
        let settings = ModelingSettings {
            snapshot_path: Some(path),
            ..zero_prior()
        };
        assert!(matches!(
            ModelingRole::from_settings(&settings).await,
            Err(TritonError::CorruptData(_))
        ));
    }

    #[test]
    fn apply_frame_counts_records() {
        let model = Model::from_prior(&[0.0; STATE_LEN], &[1.0; STATE_LEN], PoolConfig::default())
            .unwrap();
        let mut role = ModelingRole::new(model, ProjectionConfig::default());
        let obs = Observation::unambiguous(
            Assignment::Scalar {
                index: StateIndex::PingerX,
            },
            Readings::new(8.0, 1.0, 0.0),
        );
        let frame = roundtrip_frame(&[obs]);
        role.apply_frame(frame).unwrap();
        assert_eq!(role.stats().fused, 1);
        assert!((role.model().best().mean_at(StateIndex::PingerX) - 4.0).abs() < 1e-5);
    }

    fn roundtrip_frame(observations: &[Observation]) -> ObservationFrame {
        let text = triton_middleware::wire::encode_observations(observations);
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut reader = ChannelReader::new("frame", BufReader::new(text.as_bytes()));
            reader.read_observations().await.unwrap()
        })
    }
}
