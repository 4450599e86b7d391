//! Pipeline supervisor
//!
//! Owns the pipeline lifecycle: explicit start/stop, a background monitor
//! thread that restarts a dead pipeline with capped exponential backoff, and
//! point-in-time status snapshots including live-output freshness.

use super::process::{CameraPipelineLauncher, Pipeline, PipelineError, PipelineLauncher};
use crate::config::PipelineConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// How often the monitor checks pipeline liveness.
const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Granularity at which sleeps re-check the shutdown flag, so stopping the
/// supervisor never waits out a full backoff delay.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Longest delay between automatic restart attempts, in seconds.
const MAX_BACKOFF_SECS: u64 = 60;

/// Delay before restart attempt `attempt` (0-indexed): `min(60, 2^min(n, 10))`.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(MAX_BACKOFF_SECS.min(1 << attempt.min(10)))
}

/// Supervisor over the capture/transcode pipeline.
///
/// Cheap to clone; all clones share the same state. Constructed once at
/// startup and handed to the HTTP layer by the composition root.
#[derive(Clone)]
pub struct StreamSupervisor {
    core: Arc<SupervisorCore>,
}

struct SupervisorCore {
    config: PipelineConfig,
    launcher: Box<dyn PipelineLauncher>,
    state: Mutex<SupervisorState>,
    /// Tells the monitor to stop restarting; set by `stop`, cleared by `start`.
    shutdown: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct SupervisorState {
    pipeline: Option<Pipeline>,
    restart_attempts: u32,
    last_start: Option<DateTime<Utc>>,
    last_stop: Option<DateTime<Utc>>,
}

impl StreamSupervisor {
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_launcher(config, CameraPipelineLauncher)
    }

    pub fn with_launcher(config: PipelineConfig, launcher: impl PipelineLauncher) -> Self {
        Self {
            core: Arc::new(SupervisorCore {
                config,
                launcher: Box::new(launcher),
                state: Mutex::new(SupervisorState::default()),
                shutdown: AtomicBool::new(false),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Launch the pipeline and make sure the monitor thread is running.
    ///
    /// Idempotent while the pipeline is alive. Returns once both child
    /// processes have been spawned; reaching a healthy streaming state is the
    /// monitor's concern, not a start-time guarantee. Spawn failures
    /// propagate to the caller.
    pub fn start(&self) -> Result<(), PipelineError> {
        self.core.shutdown.store(false, Ordering::SeqCst);
        self.core.launch_pipeline(true)?;
        self.ensure_monitor()
    }

    /// Stop the pipeline and pause automatic restarts.
    ///
    /// Idempotent; a second call finds no pipeline and no monitor and does
    /// nothing. Completion guarantees no live child processes remain.
    pub fn stop(&self) {
        self.core.shutdown.store(true, Ordering::SeqCst);
        {
            let mut state = self.core.state.lock();
            if let Some(pipeline) = state.pipeline.take() {
                tracing::info!("Stopping pipeline");
                pipeline.shutdown(self.core.config.stop_grace);
            }
            state.last_stop = Some(Utc::now());
        }
        // The monitor observes the flag within one sub-second poll; joining
        // here keeps start/stop cycles from racing a dying monitor thread.
        if let Some(handle) = self.core.monitor.lock().take() {
            let _ = handle.join();
        }
    }

    /// True iff a live two-process pipeline exists right now.
    pub fn is_running(&self) -> bool {
        let mut state = self.core.state.lock();
        state
            .pipeline
            .as_mut()
            .map(|p| p.is_alive())
            .unwrap_or(false)
    }

    /// Point-in-time status snapshot.
    ///
    /// Pipeline fields are captured in one critical section so a concurrent
    /// `stop` cannot be observed halfway; the live-output scan runs outside
    /// the lock.
    pub fn status(&self) -> SupervisorStatus {
        let (running, pids, stderr_tail, started, stopped, restarts) = {
            let mut state = self.core.state.lock();
            let running = state
                .pipeline
                .as_mut()
                .map(|p| p.is_alive())
                .unwrap_or(false);
            let pids = state
                .pipeline
                .as_ref()
                .map(|p| {
                    let (capture, transcode) = p.pids();
                    PipelinePids {
                        capture: Some(capture),
                        transcode: Some(transcode),
                    }
                })
                .unwrap_or_default();
            let stderr_tail = state
                .pipeline
                .as_ref()
                .map(|p| StderrTail {
                    capture: p.capture_log().tail(),
                    transcode: p.transcode_log().tail(),
                })
                .unwrap_or_default();
            (
                running,
                pids,
                stderr_tail,
                state.last_start,
                state.last_stop,
                state.restart_attempts,
            )
        };

        SupervisorStatus {
            ok: true,
            running,
            pids,
            started_at_utc: started,
            stopped_at_utc: stopped,
            restarts,
            hls: live_status(&self.core.config),
            stderr_tail,
        }
    }

    /// Spawn the monitor thread unless one is already alive.
    fn ensure_monitor(&self) -> Result<(), PipelineError> {
        let mut guard = self.core.monitor.lock();
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return Ok(());
        }
        if let Some(handle) = guard.take() {
            let _ = handle.join();
        }
        let core = Arc::clone(&self.core);
        let handle = thread::Builder::new()
            .name("pipeline-monitor".to_string())
            .spawn(move || core.monitor_loop())?;
        *guard = Some(handle);
        Ok(())
    }
}

impl SupervisorCore {
    /// Launch a new pipeline under the state lock.
    ///
    /// No-op while the current pipeline is alive. A dead-but-unnoticed
    /// pipeline is reaped before its replacement starts. Only an explicit
    /// operator start resets the restart counter.
    fn launch_pipeline(&self, reset_attempts: bool) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        if let Some(mut old) = state.pipeline.take() {
            if old.is_alive() {
                state.pipeline = Some(old);
                return Ok(());
            }
            old.shutdown(self.config.stop_grace);
        }

        let pipeline = self.launcher.launch(&self.config)?;
        state.pipeline = Some(pipeline);
        state.last_start = Some(Utc::now());
        if reset_attempts {
            state.restart_attempts = 0;
        }
        Ok(())
    }

    /// Liveness poll loop. Exits only when the shutdown flag is set.
    fn monitor_loop(&self) {
        tracing::debug!("Pipeline monitor started");
        loop {
            if !self.sleep_interruptible(MONITOR_POLL_INTERVAL) {
                break;
            }

            let healthy = {
                let mut state = self.state.lock();
                state
                    .pipeline
                    .as_mut()
                    .map(|p| p.is_alive())
                    .unwrap_or(false)
            };
            if healthy {
                continue;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            // Either leg dying takes the whole pipeline down; a missing
            // pipeline here means the previous restart attempt failed.
            let (delay, attempt) = {
                let mut state = self.state.lock();
                if let Some(pipeline) = state.pipeline.take() {
                    pipeline.shutdown(self.config.stop_grace);
                    state.last_stop = Some(Utc::now());
                }
                let delay = backoff_delay(state.restart_attempts);
                state.restart_attempts += 1;
                (delay, state.restart_attempts)
            };
            tracing::warn!(
                "Pipeline down, restarting in {}s (attempt {})",
                delay.as_secs(),
                attempt
            );

            if !self.sleep_interruptible(delay) {
                break;
            }
            match self.launch_pipeline(false) {
                Ok(()) => tracing::info!("Pipeline restarted"),
                Err(err) => tracing::warn!("Pipeline restart failed: {}", err),
            }
        }
        tracing::debug!("Pipeline monitor exiting");
    }

    /// Sleep for `total`, waking early if the shutdown flag is set.
    /// Returns false if shutdown was observed.
    fn sleep_interruptible(&self, total: Duration) -> bool {
        let mut slept = Duration::ZERO;
        while slept < total {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let step = SHUTDOWN_POLL_INTERVAL.min(total - slept);
            thread::sleep(step);
            slept += step;
        }
        !self.shutdown.load(Ordering::SeqCst)
    }
}

/// Full status payload for the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub ok: bool,
    pub running: bool,
    pub pids: PipelinePids,
    pub started_at_utc: Option<DateTime<Utc>>,
    pub stopped_at_utc: Option<DateTime<Utc>>,
    pub restarts: u32,
    pub hls: LiveStatus,
    pub stderr_tail: StderrTail,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelinePids {
    pub capture: Option<u32>,
    pub transcode: Option<u32>,
}

/// Freshness of the live HLS output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub playlist: String,
    pub playlist_exists: bool,
    pub latest_segment: Option<String>,
    pub age_sec: Option<f64>,
    pub fresh: bool,
    pub freshness_threshold_sec: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StderrTail {
    pub capture: Vec<String>,
    pub transcode: Vec<String>,
}

/// Inspect the HLS directory: newest segment age against the freshness
/// threshold of three segment durations.
fn live_status(config: &PipelineConfig) -> LiveStatus {
    let playlist_exists = config.hls_dir.join("live.m3u8").is_file();

    let mut latest: Option<(String, SystemTime)> = None;
    if let Ok(entries) = fs::read_dir(&config.hls_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let is_segment = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("ts"))
                .unwrap_or(false);
            if !is_segment {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(mtime) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if latest.as_ref().map(|(_, t)| mtime > *t).unwrap_or(true) {
                latest = Some((name.to_string(), mtime));
            }
        }
    }

    let age_sec = latest.as_ref().map(|(_, mtime)| {
        SystemTime::now()
            .duration_since(*mtime)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    });
    let threshold = config.freshness_threshold_seconds();
    let fresh = age_sec.map(|age| age <= threshold as f64).unwrap_or(false);

    LiveStatus {
        playlist: "/live/live.m3u8".to_string(),
        playlist_exists,
        latest_segment: latest.map(|(name, _)| name),
        age_sec,
        fresh,
        freshness_threshold_sec: threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn backoff_doubles_then_caps_at_sixty_seconds() {
        let delays: Vec<u64> = (0..7).map(|n| backoff_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60]);
        assert_eq!(backoff_delay(10).as_secs(), 60);
        assert_eq!(backoff_delay(40).as_secs(), 60);
    }

    /// Launcher that stands in harmless processes for the camera pipeline:
    /// `sleep` produces nothing and `cat` consumes the pipe until EOF.
    struct StubLauncher;

    impl PipelineLauncher for StubLauncher {
        fn launch(&self, _config: &PipelineConfig) -> Result<Pipeline, PipelineError> {
            let transcode_cmd = Command::new("/bin/cat");
            let mut capture_cmd = Command::new("/bin/sleep");
            capture_cmd.arg("600");
            Pipeline::spawn(transcode_cmd, capture_cmd)
        }
    }

    /// Launcher that always fails, for exercising start-error propagation.
    struct FailingLauncher;

    impl PipelineLauncher for FailingLauncher {
        fn launch(&self, _config: &PipelineConfig) -> Result<Pipeline, PipelineError> {
            Err(PipelineError::Spawn("no camera here".to_string()))
        }
    }

    fn test_config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            video_root: dir.join("videos"),
            snapshot_dir: dir.join("snapshots"),
            hls_dir: dir.join("hls"),
            stop_grace: Duration::from_secs(1),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn start_is_idempotent_and_stop_twice_is_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = StreamSupervisor::with_launcher(test_config(dir.path()), StubLauncher);

        supervisor.start().expect("start");
        assert!(supervisor.is_running());
        let first_pids = supervisor.status().pids;

        supervisor.start().expect("second start is a no-op");
        assert_eq!(supervisor.status().pids.capture, first_pids.capture);

        supervisor.stop();
        assert!(!supervisor.is_running());
        let status = supervisor.status();
        assert!(status.stopped_at_utc.is_some());
        assert_eq!(status.pids.capture, None);

        // Second stop finds nothing to terminate.
        supervisor.stop();
        assert!(!supervisor.is_running());
    }

    #[test]
    fn explicit_start_failure_propagates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = StreamSupervisor::with_launcher(test_config(dir.path()), FailingLauncher);
        assert!(supervisor.start().is_err());
        assert!(!supervisor.is_running());
    }

    #[test]
    fn monitor_restarts_a_killed_pipeline_and_counts_the_attempt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = StreamSupervisor::with_launcher(test_config(dir.path()), StubLauncher);

        supervisor.start().expect("start");
        let capture_pid = supervisor.status().pids.capture.expect("capture pid");
        unsafe {
            libc::kill(capture_pid as libc::pid_t, libc::SIGKILL);
        }

        // Detection within one poll plus a 1 s first backoff; allow slack.
        let mut restarted = false;
        for _ in 0..40 {
            std::thread::sleep(Duration::from_millis(250));
            let status = supervisor.status();
            if status.restarts >= 1 && status.running {
                restarted = true;
                break;
            }
        }
        assert!(restarted, "monitor never restarted the pipeline");
        assert_ne!(supervisor.status().pids.capture, Some(capture_pid));

        // An explicit start resets the organic-failure counter.
        supervisor.stop();
        supervisor.start().expect("restart");
        assert_eq!(supervisor.status().restarts, 0);
        supervisor.stop();
    }

    #[test]
    fn live_status_reports_missing_output_as_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.hls_dir).unwrap();

        let status = live_status(&config);
        assert!(!status.playlist_exists);
        assert!(status.latest_segment.is_none());
        assert!(status.age_sec.is_none());
        assert!(!status.fresh);
    }

    #[test]
    fn live_status_finds_the_newest_segment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.hls_dir).unwrap();
        std::fs::write(config.hls_dir.join("live.m3u8"), b"#EXTM3U").unwrap();
        std::fs::write(config.hls_dir.join("live0.ts"), b"a").unwrap();
        std::fs::write(config.hls_dir.join("live1.ts"), b"b").unwrap();

        let status = live_status(&config);
        assert!(status.playlist_exists);
        assert!(status.latest_segment.is_some());
        // Just written, well inside the 6 s threshold.
        assert!(status.fresh);
        assert_eq!(status.freshness_threshold_sec, 6);
    }
}
