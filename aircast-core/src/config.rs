use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AircastConfig {
    pub encoder: EncoderSection,
    pub supervisor: SupervisorSection,
    pub scheduler: SchedulerSection,
    pub batch: BatchSection,
}

impl AircastConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity checks that toml deserialization alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.encoder.audio_sample_rate == 0 {
            return Err(invalid("encoder.audio_sample_rate", "must be greater than zero"));
        }
        if self.supervisor.poll_interval_seconds == 0 {
            return Err(invalid(
                "supervisor.poll_interval_seconds",
                "must be greater than zero",
            ));
        }
        if self.supervisor.planned_exit_tolerance_s < 0 {
            return Err(invalid(
                "supervisor.planned_exit_tolerance_s",
                "must not be negative",
            ));
        }
        if self.scheduler.sweep_interval_seconds == 0 {
            return Err(invalid(
                "scheduler.sweep_interval_seconds",
                "must be greater than zero",
            ));
        }
        if self.batch.media_extensions.is_empty() {
            return Err(invalid("batch.media_extensions", "must list at least one extension"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderSection {
    pub ffmpeg_binary: String,
    pub log_level: String,
    pub audio_sample_rate: u32,
    pub audio_bitrate: String,
}

impl Default for EncoderSection {
    fn default() -> Self {
        Self {
            ffmpeg_binary: "ffmpeg".to_string(),
            log_level: "error".to_string(),
            audio_sample_rate: 44_100,
            audio_bitrate: "128k".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    pub poll_interval_seconds: u64,
    /// A clean exit this close to the expected end still counts as planned.
    pub planned_exit_tolerance_s: i64,
    pub premature_exit: PrematureExitPolicy,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            planned_exit_tolerance_s: 30,
            premature_exit: PrematureExitPolicy::Restart,
        }
    }
}

/// What to do when the encoder exits cleanly well before the expected end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrematureExitPolicy {
    /// Relaunch with the remaining duration.
    Restart,
    /// Accept the early end and mark the stream offline.
    Stop,
}

impl PrematureExitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrematureExitPolicy::Restart => "restart",
            PrematureExitPolicy::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    pub sweep_interval_seconds: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSection {
    pub media_extensions: Vec<String>,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            media_extensions: ["mp4", "mov", "mkv", "mp3", "m4a", "wav"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AircastConfig> {
    AircastConfig::from_path(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/aircast.toml");
        let config = AircastConfig::from_path(path).expect("fixture should parse");
        assert_eq!(config.encoder.ffmpeg_binary, "ffmpeg");
        assert_eq!(config.supervisor.premature_exit, PrematureExitPolicy::Restart);
        assert_eq!(config.scheduler.sweep_interval_seconds, 60);
        assert!(config.batch.media_extensions.contains(&"mp4".to_string()));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("aircast.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
[encoder]
ffmpeg_binary = "ffmpeg"
log_level = "error"
audio_sample_rate = 44100
audio_bitrate = "128k"

[supervisor]
poll_interval_seconds = 0
planned_exit_tolerance_s = 30
premature_exit = "restart"

[scheduler]
sweep_interval_seconds = 60

[batch]
media_extensions = ["mp4"]
"#
        )
        .unwrap();
        let err = AircastConfig::from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn reports_parse_failures_with_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "not valid toml [").unwrap();
        let err = AircastConfig::from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }
}
