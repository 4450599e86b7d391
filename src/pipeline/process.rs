//! Two-process capture pipeline
//!
//! Wires the camera capture process into the transcode process over a byte
//! pipe (capture stdout -> transcode stdin) and instruments both with stderr
//! reader threads feeding bounded log rings. The transcode process fans the
//! stream out to three outputs: an HLS playlist for live viewing, strftime-
//! named MP4 recording segments, and periodic JPEG snapshots.

use super::logring::{LogRing, DEFAULT_LOG_CAPACITY};
use crate::config::PipelineConfig;
use std::fs;
use std::io::{BufRead, BufReader};
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// strftime pattern the transcode process uses for MP4 segments.
///
/// The recording index parses start times back out of these names, so the
/// write and parse sides must agree (see `library::index`).
pub const RECORDING_FILE_PATTERN: &str = "%Y-%m-%d_%H-%M-%S.mp4";

/// strftime pattern for snapshot files (minute precision).
pub const SNAPSHOT_FILE_PATTERN: &str = "%Y-%m-%d_%H%M.jpg";

/// Pipeline-related errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Spawn failed: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One OS child process of the pipeline.
pub struct ProcessHandle {
    label: &'static str,
    child: Child,
}

impl ProcessHandle {
    fn new(label: &'static str, child: Child) -> Self {
        Self { label, child }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Live query against the OS; never cached.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process to terminate gracefully.
    fn request_stop(&mut self) {
        if !self.is_alive() {
            return;
        }
        let rc = unsafe { libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!("[{}] SIGTERM delivery failed", self.label);
        }
    }

    /// Force-kill if still running, then reap the exit status.
    fn force_kill(&mut self) {
        if self.is_alive() {
            tracing::warn!("[{}] did not exit within grace period, killing", self.label);
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// The linked capture + transcode processes forming one video-processing unit.
///
/// Both legs are live for as long as this value exists; `shutdown` consumes
/// it, so a stopped pipeline cannot be observed half-terminated.
pub struct Pipeline {
    capture: ProcessHandle,
    transcode: ProcessHandle,
    /// Writer end of the transcode stdin pipe. Dropped first on shutdown so
    /// the transcode process sees end-of-stream before any signal arrives.
    feed: OwnedFd,
    capture_log: Arc<LogRing>,
    transcode_log: Arc<LogRing>,
}

impl Pipeline {
    /// Spawn the two processes and wire capture stdout into transcode stdin.
    ///
    /// The transcode process is spawned first so its stdin pipe exists when
    /// the capture process starts. Each child runs in its own process group,
    /// keeping supervisor-level signals away from the children and vice
    /// versa. If the second spawn fails the first child is torn down before
    /// the error is returned.
    pub fn spawn(
        mut transcode_cmd: Command,
        mut capture_cmd: Command,
    ) -> Result<Pipeline, PipelineError> {
        transcode_cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut transcode = transcode_cmd.spawn().map_err(|e| {
            PipelineError::Spawn(format!(
                "failed to start transcode process {}: {}",
                transcode_cmd.get_program().to_string_lossy(),
                e
            ))
        })?;

        let transcode_log = Arc::new(LogRing::new("transcode", DEFAULT_LOG_CAPACITY));
        if let Some(stderr) = transcode.stderr.take() {
            spawn_stderr_reader(stderr, Arc::clone(&transcode_log));
        }

        let Some(stdin) = transcode.stdin.take() else {
            abort_child(&mut transcode);
            return Err(PipelineError::Spawn(
                "transcode stdin pipe was not captured".to_string(),
            ));
        };
        let feed: OwnedFd = stdin.into();
        let inherited = match feed.try_clone() {
            Ok(fd) => fd,
            Err(err) => {
                abort_child(&mut transcode);
                return Err(PipelineError::Io(err));
            }
        };

        capture_cmd
            .stdout(Stdio::from(inherited))
            .stderr(Stdio::piped())
            .process_group(0);
        let mut capture = match capture_cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                abort_child(&mut transcode);
                return Err(PipelineError::Spawn(format!(
                    "failed to start capture process {}: {}",
                    capture_cmd.get_program().to_string_lossy(),
                    err
                )));
            }
        };

        let capture_log = Arc::new(LogRing::new("capture", DEFAULT_LOG_CAPACITY));
        if let Some(stderr) = capture.stderr.take() {
            spawn_stderr_reader(stderr, Arc::clone(&capture_log));
        }

        Ok(Pipeline {
            capture: ProcessHandle::new("capture", capture),
            transcode: ProcessHandle::new("transcode", transcode),
            feed,
            capture_log,
            transcode_log,
        })
    }

    /// True iff both legs are still running. A single dead leg counts as
    /// pipeline-dead even if the other is technically alive.
    pub fn is_alive(&mut self) -> bool {
        self.capture.is_alive() && self.transcode.is_alive()
    }

    /// (capture pid, transcode pid)
    pub fn pids(&self) -> (u32, u32) {
        (self.capture.pid(), self.transcode.pid())
    }

    pub fn capture_log(&self) -> &Arc<LogRing> {
        &self.capture_log
    }

    pub fn transcode_log(&self) -> &Arc<LogRing> {
        &self.transcode_log
    }

    /// Terminate both legs: close the transcode stdin pipe (end-of-stream),
    /// request graceful termination, wait up to `grace`, then force-kill and
    /// reap whatever is left.
    pub fn shutdown(mut self, grace: Duration) {
        drop(self.feed);

        self.capture.request_stop();
        self.transcode.request_stop();

        let deadline = Instant::now() + grace;
        while self.capture.is_alive() || self.transcode.is_alive() {
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }

        self.capture.force_kill();
        self.transcode.force_kill();
    }
}

/// Strategy for bringing up a pipeline. The supervisor is written against
/// this seam so tests can substitute harmless stand-in processes.
pub trait PipelineLauncher: Send + Sync + 'static {
    fn launch(&self, config: &PipelineConfig) -> Result<Pipeline, PipelineError>;
}

/// Production launcher: camera capture piped into the transcoder.
pub struct CameraPipelineLauncher;

impl PipelineLauncher for CameraPipelineLauncher {
    fn launch(&self, config: &PipelineConfig) -> Result<Pipeline, PipelineError> {
        clear_dir_best_effort(&config.hls_dir);

        let mut transcode_cmd = Command::new(&config.transcode_bin);
        transcode_cmd.args(transcode_args(config));
        let mut capture_cmd = Command::new(&config.capture_bin);
        capture_cmd.args(capture_args(config));

        tracing::info!(
            "Launching pipeline: {} -> {}",
            config.capture_bin.display(),
            config.transcode_bin.display()
        );
        Pipeline::spawn(transcode_cmd, capture_cmd)
    }
}

/// Command line for the camera capture process: H.264 over stdout in an
/// mpegts container, with keyframes aligned to the HLS segment length.
pub fn capture_args(config: &PipelineConfig) -> Vec<String> {
    let intra = config.framerate * config.hls_segment_seconds;
    vec![
        "--nopreview".to_string(),
        "--width".to_string(),
        config.width.to_string(),
        "--height".to_string(),
        config.height.to_string(),
        "--framerate".to_string(),
        config.framerate.to_string(),
        "--bitrate".to_string(),
        config.bitrate.to_string(),
        "--codec".to_string(),
        "h264".to_string(),
        "--inline".to_string(),
        "--intra".to_string(),
        intra.to_string(),
        "-t".to_string(),
        "0".to_string(),
        "-o".to_string(),
        "-".to_string(),
        "--libav-format".to_string(),
        "mpegts".to_string(),
    ]
}

/// Command line for the transcode process: mpegts on stdin, fanned out to
/// HLS (copy), MP4 segments (copy), and periodic JPEG snapshots.
pub fn transcode_args(config: &PipelineConfig) -> Vec<String> {
    let playlist = config.hls_dir.join("live.m3u8");
    let segments = config.video_root.join(RECORDING_FILE_PATTERN);
    let snapshots = config.snapshot_dir.join(SNAPSHOT_FILE_PATTERN);
    let snapshot_filter = format!(
        "fps=1/{},scale={}:{}",
        config.snapshot_interval_seconds, config.width, config.height
    );
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        // Input options, all of which must come before -i
        "-f".to_string(),
        "mpegts".to_string(),
        "-thread_queue_size".to_string(),
        "1024".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        // HLS (copy)
        "-map".to_string(),
        "0:v:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        config.hls_segment_seconds.to_string(),
        "-hls_list_size".to_string(),
        config.hls_playlist_size.to_string(),
        "-hls_flags".to_string(),
        "delete_segments+append_list+independent_segments".to_string(),
        playlist.to_string_lossy().to_string(),
        // MP4 segments (copy)
        "-map".to_string(),
        "0:v:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        "segment".to_string(),
        "-segment_time".to_string(),
        config.segment_seconds.to_string(),
        "-reset_timestamps".to_string(),
        "1".to_string(),
        "-strftime".to_string(),
        "1".to_string(),
        segments.to_string_lossy().to_string(),
        // Snapshots
        "-map".to_string(),
        "0:v:0".to_string(),
        "-vf".to_string(),
        snapshot_filter,
        "-q:v".to_string(),
        "3".to_string(),
        "-strftime".to_string(),
        "1".to_string(),
        snapshots.to_string_lossy().to_string(),
    ]
}

/// Remove stale files and directories from `dir`.
///
/// Errors are intentionally ignored: this is advisory cleanup of ephemeral
/// live-output artifacts, and a failed removal must never block a pipeline
/// start.
pub fn clear_dir_best_effort(dir: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(err) = removed {
            tracing::debug!("Leftover {} not removed: {}", path.display(), err);
        }
    }
}

fn abort_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_stderr_reader(stderr: ChildStderr, ring: Arc<LogRing>) {
    let name = format!("{}-stderr", ring.label());
    let spawned = thread::Builder::new().name(name).spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            match line {
                Ok(line) => ring.push(line),
                Err(err) => {
                    tracing::warn!("[{}] stderr reader failed: {}", ring.label(), err);
                    break;
                }
            }
        }
    });
    if let Err(err) = spawned {
        tracing::warn!("Failed to spawn stderr reader thread: {}", err);
    }
}
