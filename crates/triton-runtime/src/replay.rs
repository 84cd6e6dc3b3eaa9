//! Offline replay of recorded observation streams.
//!
//! Feeds a file of observation messages (the exact bytes a producer would
//! write to the modeling pipe) through a fresh pool, with no topology
//! involved.  Used to reproduce field runs and to tune [`PoolConfig`]
//! against recorded data.
//!
//! [`PoolConfig`]: triton_estimation::PoolConfig

use std::path::Path;

use tracing::{Instrument, info, info_span};
use triton_estimation::Model;
use triton_middleware::open_reader;
use triton_types::TritonError;

use crate::modeling::{Ingest, ModelingRole, ModelingSettings, ModelingStats};

/// Result of one replay.
#[derive(Debug)]
pub struct ReplayReport {
    pub stats: ModelingStats,
    pub model: Model,
}

/// Replay every message in `path` through a pool seeded from
/// `settings`' prior.  `settings.snapshot_path` is ignored; persist the
/// returned model explicitly if needed.
pub async fn replay_file(
    path: &Path,
    settings: &ModelingSettings,
) -> Result<ReplayReport, TritonError> {
    let span = info_span!("replay", path = %path.display());
    async {
        let model =
            Model::from_prior(&settings.prior_mean, &settings.prior_variance, settings.pool)?;
        let mut role = ModelingRole::new(model, settings.projection);

        let mut reader = open_reader(&path.to_string_lossy()).await?;
        loop {
            let frame = reader.read_observations().await;
            match role.ingest(frame)? {
                Ingest::Fused | Ingest::Skipped => {}
                Ingest::Closed => break,
            }
        }

        let stats = role.stats();
        info!(
            messages = stats.messages,
            fused = stats.fused,
            skipped = stats.skipped,
            hypotheses = role.model().size(),
            "replay finished"
        );
        Ok::<_, TritonError>(ReplayReport {
            stats,
            model: role.into_model(),
        })
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use triton_types::{STATE_LEN, StateIndex};

    fn flat_prior() -> ModelingSettings {
        ModelingSettings {
            prior_mean: vec![0.0; STATE_LEN],
            prior_variance: vec![1.0; STATE_LEN],
            ..ModelingSettings::default()
        }
    }

    #[tokio::test]
    async fn replays_a_recorded_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.obs");
        tokio::fs::write(&path, "1\n1 1 -3\n10 1 0\n0\n1\n2 2 -3\n6 1 0\n")
            .await
            .unwrap();

        let report = replay_file(&path, &flat_prior()).await.unwrap();
        assert_eq!(report.stats.messages, 3);
        assert_eq!(report.stats.fused, 3);
        assert_eq!(report.stats.published, 0);
        let best = report.model.best();
        assert!((best.mean_at(StateIndex::GateX) - 5.0).abs() < 1e-5);
        assert!((best.mean_at(StateIndex::GateY) - 3.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = replay_file(&dir.path().join("absent.obs"), &flat_prior())
            .await
            .unwrap_err();
        assert!(matches!(err, TritonError::Io(_)));
    }

    #[tokio::test]
    async fn empty_file_leaves_prior() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.obs");
        tokio::fs::write(&path, "").await.unwrap();

        let report = replay_file(&path, &ModelingSettings::default()).await.unwrap();
        assert_eq!(report.stats, ModelingStats::default());
        assert_eq!(
            report.model.best_estimate().as_slice(),
            &triton_types::DEFAULT_PRIOR_MEAN[..]
        );
    }
}
