use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/dlx/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DlxConfig {
    /// Address the HTTP surface binds to.
    pub bind_addr: String,
    /// Directory final artifacts are written into.
    pub out_dir: PathBuf,
    /// Capacity of the scheduler's bounded job queue.
    pub queue_capacity: usize,
    /// Number of scheduler worker tasks.
    pub worker_count: usize,
    /// Interval between intake polls of pending rows.
    pub intake_poll_interval_secs: u64,
    /// Max rows claimed per intake poll.
    pub intake_batch_size: usize,
    /// Deadline for a single metadata fetch.
    pub metadata_fetch_timeout_secs: u64,
    /// Deadline for a single background store update.
    pub store_update_timeout_secs: u64,
    /// Path or name of the external extractor binary.
    pub extractor_binary: String,
    /// Maximum length of the title embedded in output filenames.
    pub max_title_len: usize,
}

impl Default for DlxConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            out_dir: PathBuf::from("./downloads"),
            queue_capacity: 64,
            worker_count: 4,
            intake_poll_interval_secs: 2,
            intake_batch_size: 10,
            metadata_fetch_timeout_secs: 30,
            store_update_timeout_secs: 5,
            extractor_binary: "yt-dlp".to_string(),
            max_title_len: 120,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlx")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<DlxConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = DlxConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: DlxConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = DlxConfig::default();
        assert_eq!(cfg.queue_capacity, 64);
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.intake_poll_interval_secs, 2);
        assert_eq!(cfg.metadata_fetch_timeout_secs, 30);
        assert_eq!(cfg.store_update_timeout_secs, 5);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = DlxConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DlxConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.bind_addr, cfg.bind_addr);
        assert_eq!(parsed.queue_capacity, cfg.queue_capacity);
        assert_eq!(parsed.extractor_binary, cfg.extractor_binary);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            bind_addr = "0.0.0.0:9000"
            queue_capacity = 8
            worker_count = 2
            intake_poll_interval_secs = 5
        "#;
        let cfg: DlxConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert_eq!(cfg.queue_capacity, 8);
        assert_eq!(cfg.worker_count, 2);
        assert_eq!(cfg.intake_poll_interval_secs, 5);
        // Fields absent from the snippet fall back to defaults.
        assert_eq!(cfg.max_title_len, 120);
    }
}
