//! Per-job scratch artifacts
//!
//! Input and output staging files for one job. Names combine the request
//! identity with a random component so concurrent jobs from different chats
//! can never collide on the shared scratch directory.

use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

pub struct ScratchPair {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl ScratchPair {
    pub fn new(scratch_dir: &Path, request_id: i64) -> Self {
        let tag = Uuid::new_v4().simple().to_string();
        Self {
            input: scratch_dir.join(format!("in_{}_{}.mp4", request_id, tag)),
            output: scratch_dir.join(format!("out_{}_{}.mp4", request_id, tag)),
        }
    }

    /// Remove both artifacts. A missing file is fine (the stage that would
    /// have produced it may never have run); any other failure is logged,
    /// never surfaced.
    pub async fn cleanup(&self) {
        for path in [&self.input, &self.output] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove scratch artifact");
                }
            }
        }
    }
}

impl Drop for ScratchPair {
    // Backstop for paths that unwound before the async cleanup ran.
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.input);
        let _ = std::fs::remove_file(&self.output);
    }
}
