//! Server and pipeline configuration
//!
//! All parameters are resolved once at startup and never mutated afterwards.
//! Paths, binaries, and the bind address can be overridden through `PICAM_*`
//! environment variables; everything else uses the production defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable parameters for the capture/transcode pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Capture frame rate
    pub framerate: u32,

    /// Target bitrate in bits per second
    pub bitrate: u32,

    /// Length of each MP4 recording segment in seconds
    pub segment_seconds: u32,

    /// Interval between JPEG snapshots in seconds
    pub snapshot_interval_seconds: u32,

    /// Length of each HLS segment in seconds
    pub hls_segment_seconds: u32,

    /// Number of segments kept in the HLS playlist window
    pub hls_playlist_size: u32,

    /// Directory where MP4 recording segments are written
    pub video_root: PathBuf,

    /// Directory where periodic JPEG snapshots are written
    pub snapshot_dir: PathBuf,

    /// Directory for the ephemeral HLS playlist and segments
    pub hls_dir: PathBuf,

    /// Camera capture binary
    pub capture_bin: PathBuf,

    /// Transcode/multiplex binary
    pub transcode_bin: PathBuf,

    /// Grace period before a child process is force-killed on stop
    pub stop_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let video_root = PathBuf::from("/media/parcel/5853-D58C/videos");
        let snapshot_dir = video_root.join("snapshots");
        Self {
            width: 1280,
            height: 720,
            framerate: 15,
            bitrate: 2_000_000,
            segment_seconds: 600,
            snapshot_interval_seconds: 60,
            hls_segment_seconds: 2,
            hls_playlist_size: 5,
            video_root,
            snapshot_dir,
            hls_dir: PathBuf::from("/tmp/hls"),
            capture_bin: PathBuf::from("/usr/bin/rpicam-vid"),
            transcode_bin: PathBuf::from("/usr/bin/ffmpeg"),
            stop_grace: Duration::from_secs(3),
        }
    }
}

impl PipelineConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// `PICAM_SNAPSHOT_DIR` defaults to `<video root>/snapshots` so that
    /// overriding only `PICAM_VIDEO_ROOT` keeps the two together.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(root) = env_path("PICAM_VIDEO_ROOT") {
            config.snapshot_dir = root.join("snapshots");
            config.video_root = root;
        }
        if let Some(dir) = env_path("PICAM_SNAPSHOT_DIR") {
            config.snapshot_dir = dir;
        }
        if let Some(dir) = env_path("PICAM_HLS_DIR") {
            config.hls_dir = dir;
        }
        if let Some(bin) = env_path("PICAM_CAPTURE_BIN") {
            config.capture_bin = bin;
        }
        if let Some(bin) = env_path("PICAM_TRANSCODE_BIN") {
            config.transcode_bin = bin;
        }
        config
    }

    /// Create the recording, snapshot, and HLS directories if missing.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [&self.video_root, &self.snapshot_dir, &self.hls_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Age threshold after which the live output is considered stale.
    pub fn freshness_threshold_seconds(&self) -> u32 {
        3 * self.hls_segment_seconds
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

impl ServerConfig {
    /// Build a config from the environment (`PICAM_BIND`), falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var("PICAM_BIND") {
            match value.parse() {
                Ok(addr) => config.bind = addr,
                Err(err) => tracing::warn!("Ignoring invalid PICAM_BIND {:?}: {}", value, err),
            }
        }
        config
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_production_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.framerate, 15);
        assert_eq!(config.segment_seconds, 600);
        assert_eq!(config.hls_segment_seconds, 2);
        assert_eq!(config.snapshot_dir, config.video_root.join("snapshots"));
    }

    #[test]
    fn freshness_threshold_is_three_segments() {
        let config = PipelineConfig::default();
        assert_eq!(config.freshness_threshold_seconds(), 6);
    }
}
