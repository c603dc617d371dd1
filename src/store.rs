use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::warn;

use crate::types::AggregatorState;

/// Durable JSON snapshot of the aggregator state. Written after every
/// successful or fully-degraded refresh and from a periodic timer, read once
/// at startup.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A missing file is a normal cold start. An unreadable or unparsable
    /// file is logged and treated the same, so the first refresh goes live
    /// instead of trusting a broken cache.
    pub async fn load(&self) -> Option<AggregatorState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state read failed, starting cold");
                return None;
            }
        };
        match serde_json::from_slice::<AggregatorState>(&bytes) {
            Ok(mut state) => {
                state.ensure_tracked();
                Some(state)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state parse failed, starting cold");
                None
            }
        }
    }

    /// Writes to a sibling temp file and renames over the target, so a crash
    /// mid-write cannot leave a truncated snapshot behind.
    pub async fn save(&self, state: &AggregatorState) -> Result<()> {
        let json = serde_json::to_vec(state).context("serialize state failed")?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("write {} failed", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("rename into {} failed", self.path.display()))?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}
