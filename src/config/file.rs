//! TOML configuration file loading
//!
//! Supports `~/.config/vocal/config.toml` as a persistent config source.
//! All fields are optional, the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VocalConfigFile {
    /// Remote synthesis backend
    #[serde(default)]
    pub remote: RemoteFileConfig,

    /// Segmentation, caching, playback and fallback tuning
    #[serde(default)]
    pub speech: SpeechFileConfig,
}

/// Remote backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct RemoteFileConfig {
    /// API key (prefer the environment)
    pub api_key: Option<String>,

    /// Base URL (e.g. "https://generativelanguage.googleapis.com")
    pub base_url: Option<String>,

    /// Speech model identifier
    pub model: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Instruction text prefixed to every request
    pub preamble: Option<String>,
}

/// Speech pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Default remote voice (e.g. "Kore")
    pub voice: Option<String>,

    /// Remote chunk bound in characters
    pub max_chunk_len: Option<usize>,

    /// On-device chunk bound in characters
    pub fallback_chunk_len: Option<usize>,

    /// Cached chunk count (0 = unbounded)
    pub cache_capacity: Option<usize>,

    /// Delay before the first buffer starts, in milliseconds
    pub playback_lead_ms: Option<u64>,

    /// Keep-alive pump interval in seconds (0 = disabled)
    pub keep_alive_secs: Option<u64>,

    /// Extra marker regexes stripped before speaking
    pub marker_patterns: Option<Vec<String>>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VocalConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VocalConfigFile {
    config_file_path().map_or_else(VocalConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`
///
/// Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_config_from(path: &Path) -> VocalConfigFile {
    if !path.exists() {
        return VocalConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VocalConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VocalConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/vocal/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vocal").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let fc: VocalConfigFile = toml::from_str(
            r#"
            [remote]
            model = "custom-tts"

            [speech]
            voice = "Kore"
            cache_capacity = 0
            marker_patterns = ["<<[^>]*>>"]
            "#,
        )
        .unwrap();

        assert_eq!(fc.remote.model.as_deref(), Some("custom-tts"));
        assert!(fc.remote.api_key.is_none());
        assert_eq!(fc.speech.voice.as_deref(), Some("Kore"));
        assert_eq!(fc.speech.cache_capacity, Some(0));
        assert_eq!(fc.speech.marker_patterns.unwrap().len(), 1);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_from(&dir.path().join("absent.toml"));
        assert!(fc.remote.base_url.is_none());
        assert!(fc.speech.max_chunk_len.is_none());
    }

    #[test]
    fn unparseable_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[speech\nvoice = ").unwrap();

        let fc = load_config_from(&path);
        assert!(fc.speech.voice.is_none());
    }

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[speech]\nplayback_lead_ms = 100\n").unwrap();

        let fc = load_config_from(&path);
        assert_eq!(fc.speech.playback_lead_ms, Some(100));
    }
}
