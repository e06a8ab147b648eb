//! External transcoder invocation
//!
//! Builds the fixed ffmpeg filter graph for round notes — square center
//! crop of the shorter side, scaled to the note diameter — and runs it as a
//! child process bounded by a timeout, so a wedged encoder can never occupy
//! scratch space indefinitely. Success is exit code zero plus an output
//! artifact on disk.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Transcoder {
    note_length: u32,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(note_length: u32, timeout: Duration) -> Self {
        Self {
            note_length,
            timeout,
        }
    }

    /// ffmpeg argv for one conversion. Split out so the filter graph is
    /// testable without spawning anything.
    fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let size = self.note_length;
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.display().to_string(),
            "-vf".to_string(),
            format!("crop='min(iw,ih):min(iw,ih)',scale={}:{}", size, size),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-crf".to_string(),
            "26".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "64k".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.display().to_string(),
        ]
    }

    /// Run one conversion to completion.
    pub async fn run(&self, input: &Path, output: &Path) -> Result<()> {
        let args = self.build_args(input, output);
        debug!(input = %input.display(), "spawning ffmpeg");

        let mut child = tokio::process::Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn ffmpeg")?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => bail!("ffmpeg exited with status: {}", status),
            Ok(Err(e)) => return Err(e).context("ffmpeg wait error"),
            Err(_) => {
                kill_gracefully(&mut child).await;
                bail!("ffmpeg timed out after {}s", self.timeout.as_secs());
            }
        }

        if tokio::fs::metadata(output).await.is_err() {
            bail!("ffmpeg exited cleanly but produced no output artifact");
        }

        Ok(())
    }
}

/// Send SIGTERM and wait up to 5 s for a clean exit; escalate to SIGKILL.
///
/// On non-Unix platforms SIGTERM is not available, so go straight to kill.
async fn kill_gracefully(child: &mut tokio::process::Child) {
    warn!("ffmpeg timed out, sending SIGTERM");

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill as nix_kill, Signal};
        use nix::unistd::Pid;
        let _ = nix_kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(_) => return,
            Err(_) => warn!("SIGTERM ignored, escalating to SIGKILL"),
        }
    }

    let _ = child.start_kill();
    match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!(error = %e, "error waiting for killed ffmpeg"),
        Err(_) => warn!("ffmpeg still alive 5 s after SIGKILL"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args_for(size: u32) -> Vec<String> {
        let t = Transcoder::new(size, Duration::from_secs(120));
        t.build_args(&PathBuf::from("in.mp4"), &PathBuf::from("out.mp4"))
    }

    #[test]
    fn filter_graph_center_crops_then_scales() {
        let args = args_for(400);
        let vf = args
            .iter()
            .position(|a| a == "-vf")
            .map(|i| args[i + 1].clone())
            .expect("-vf present");
        assert_eq!(vf, "crop='min(iw,ih):min(iw,ih)',scale=400:400");
    }

    #[test]
    fn scale_follows_note_length() {
        let args = args_for(240);
        assert!(args.iter().any(|a| a.ends_with("scale=240:240")));
    }

    #[test]
    fn output_path_is_the_final_argument() {
        let args = args_for(400);
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn overwrite_flag_precedes_input() {
        let args = args_for(400);
        let y = args.iter().position(|a| a == "-y").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(y < i);
        assert_eq!(args[i + 1], "in.mp4");
    }

    #[test]
    fn codecs_and_bitrate_ceiling_are_fixed() {
        let args = args_for(400);
        let pair = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .map(|i| args[i + 1].clone())
        };
        assert_eq!(pair("-c:v").as_deref(), Some("libx264"));
        assert_eq!(pair("-c:a").as_deref(), Some("aac"));
        assert_eq!(pair("-b:a").as_deref(), Some("64k"));
        assert_eq!(pair("-movflags").as_deref(), Some("+faststart"));
    }
}
