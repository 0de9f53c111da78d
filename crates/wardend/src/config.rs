use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Enrollment root: one subdirectory of reference images per identity.
    pub faces_dir: PathBuf,
    /// HTTP listen address for the stream/status/enrollment surface.
    pub listen_addr: String,
    /// Euclidean distance at or below which an embedding matches an identity.
    pub match_tolerance: f32,
    /// Target delay between published frames.
    pub frame_interval: Duration,
    /// Analyze one frame out of every N published.
    pub sample_every: u64,
    /// Downscale factor applied before detection.
    pub downscale_factor: f32,
    /// JPEG quality for the shared stream encoding.
    pub jpeg_quality: u8,
    /// Camera open attempts before a session is declared failed.
    pub open_retry_attempts: u32,
    /// Delay between camera open attempts.
    pub retry_delay: Duration,
    /// Pause before re-attempting a whole open cycle in unattended mode.
    pub recovery_pause: Duration,
    /// Unattended mode keeps retrying the camera forever instead of exiting.
    pub unattended: bool,
    /// How long the door stays open after a recognized face.
    pub hold_duration: Duration,
    /// Quiet period after a close before the next cycle may start.
    pub cooldown: Duration,
    /// Actuator position written on open.
    pub open_position: i64,
    /// Actuator position written on close.
    pub close_position: i64,
    /// Base URL of the door actuator service; unset means log-only.
    pub actuator_url: Option<String>,
    /// Document path appended to the actuator base URL.
    pub actuator_document: String,
    /// Optional auth token appended as a query parameter.
    pub actuator_auth: Option<String>,
    /// Request timeout for actuator and audit calls.
    pub http_timeout: Duration,
    /// Endpoint receiving access records; unset disables auditing.
    pub audit_url: Option<String>,
}

impl Config {
    /// Load configuration from `WARDEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("WARDEN_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| warden_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("warden");

        let faces_dir = std::env::var("WARDEN_FACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces"));

        Self {
            camera_device: std::env::var("WARDEN_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            faces_dir,
            listen_addr: std::env::var("WARDEN_LISTEN")
                .unwrap_or_else(|_| "0.0.0.0:8082".to_string()),
            match_tolerance: env_f32("WARDEN_MATCH_TOLERANCE", 0.6),
            frame_interval: Duration::from_millis(env_u64("WARDEN_FRAME_INTERVAL_MS", 33)),
            sample_every: env_u64("WARDEN_SAMPLE_EVERY", 2).max(1),
            downscale_factor: env_f32("WARDEN_DOWNSCALE_FACTOR", 0.25),
            jpeg_quality: env_u64("WARDEN_JPEG_QUALITY", 80).clamp(1, 100) as u8,
            open_retry_attempts: env_u64("WARDEN_OPEN_RETRIES", 3).max(1) as u32,
            retry_delay: Duration::from_millis(env_u64("WARDEN_RETRY_DELAY_MS", 500)),
            recovery_pause: Duration::from_millis(env_u64("WARDEN_RECOVERY_PAUSE_MS", 1000)),
            unattended: std::env::var("WARDEN_UNATTENDED")
                .map(|v| v != "0")
                .unwrap_or(true),
            hold_duration: Duration::from_secs(env_u64("WARDEN_HOLD_SECS", 5)),
            cooldown: Duration::from_secs(env_u64("WARDEN_COOLDOWN_SECS", 5)),
            open_position: env_i64("WARDEN_OPEN_POSITION", 180),
            close_position: env_i64("WARDEN_CLOSE_POSITION", 0),
            actuator_url: std::env::var("WARDEN_ACTUATOR_URL").ok(),
            actuator_document: std::env::var("WARDEN_ACTUATOR_DOCUMENT")
                .unwrap_or_else(|_| "doors/main_door/position".to_string()),
            actuator_auth: std::env::var("WARDEN_ACTUATOR_AUTH").ok(),
            http_timeout: Duration::from_millis(env_u64("WARDEN_HTTP_TIMEOUT_MS", 5000)),
            audit_url: std::env::var("WARDEN_AUDIT_URL").ok(),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
