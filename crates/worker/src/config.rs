use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use framechain_core::segment::{FrameLimits, MAX_TOTAL_FRAMES};
use framechain_core::stitch::DEFAULT_OUTPUT_FPS;
use framechain_pipeline::OrchestratorConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub comfyui_url: String,
    /// The render server's input directory; source images go here.
    pub comfyui_input_dir: PathBuf,
    pub comfyui_output_dir: PathBuf,
    pub generation_timeout: Duration,
    pub poll_interval: Duration,
    pub workflow_file: PathBuf,
    pub scratch_dir: PathBuf,
    pub output_fps: f64,
    pub max_total_frames: u32,
    pub client_id: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                  |
    /// |----------------------|--------------------------|
    /// | `COMFYUI_URL`        | `http://127.0.0.1:8188`  |
    /// | `COMFYUI_INPUT_DIR`  | `/storage/comfyui/input` |
    /// | `COMFYUI_OUTPUT_DIR` | `/storage/comfyui/output`|
    /// | `GENERATION_TIMEOUT` | `3600` (seconds)         |
    /// | `POLL_INTERVAL_SECS` | `3`                      |
    /// | `WORKFLOW_FILE`      | `wan2.2_img_to_vid.json` |
    /// | `SCRATCH_DIR`        | `temp`                   |
    /// | `OUTPUT_FPS`         | `20`                     |
    /// | `MAX_TOTAL_FRAMES`   | `10000`                  |
    /// | `CLIENT_ID`          | `framechain`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let generation_timeout_secs: u64 =
            parse(&lookup, "GENERATION_TIMEOUT", 3600, "a whole number of seconds")?;
        let poll_interval_secs: u64 =
            parse(&lookup, "POLL_INTERVAL_SECS", 3, "a whole number of seconds")?;
        let output_fps: f64 = parse(&lookup, "OUTPUT_FPS", DEFAULT_OUTPUT_FPS, "a positive number")?;
        let max_total_frames: u32 =
            parse(&lookup, "MAX_TOTAL_FRAMES", MAX_TOTAL_FRAMES, "a whole number")?;

        if !(output_fps.is_finite() && output_fps > 0.0) {
            return Err(ConfigError::Invalid {
                name: "OUTPUT_FPS",
                value: output_fps.to_string(),
                expected: "a positive number",
            });
        }
        if poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "POLL_INTERVAL_SECS",
                value: "0".to_string(),
                expected: "at least 1",
            });
        }

        Ok(Self {
            comfyui_url: text("COMFYUI_URL", "http://127.0.0.1:8188"),
            comfyui_input_dir: text("COMFYUI_INPUT_DIR", "/storage/comfyui/input").into(),
            comfyui_output_dir: text("COMFYUI_OUTPUT_DIR", "/storage/comfyui/output").into(),
            generation_timeout: Duration::from_secs(generation_timeout_secs),
            poll_interval: Duration::from_secs(poll_interval_secs),
            workflow_file: text("WORKFLOW_FILE", "wan2.2_img_to_vid.json").into(),
            scratch_dir: text("SCRATCH_DIR", "temp").into(),
            output_fps,
            max_total_frames,
            client_id: text("CLIENT_ID", "framechain"),
        })
    }

    /// The orchestrator's share of the configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new(&self.scratch_dir, &self.comfyui_output_dir);
        config.render_timeout = self.generation_timeout;
        config.output_fps = self.output_fps;
        config.limits = FrameLimits {
            max_total_frames: self.max_total_frames,
            ..FrameLimits::default()
        };
        config
    }
}

fn parse<T, F>(lookup: &F, name: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            expected,
        }),
    }
}
