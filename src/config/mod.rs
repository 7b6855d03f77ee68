//! Configuration management for the vocal orchestrator

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::Result;
use crate::voice::cache::DEFAULT_CACHE_CAPACITY;
use crate::voice::fallback::{DEFAULT_FALLBACK_CHUNK_LEN, DEFAULT_KEEP_ALIVE};
use crate::voice::remote::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::voice::segment::{DEFAULT_MAX_CHUNK_LEN, MarkerStripper};
use crate::voice::settings::{DEFAULT_VOICE, resolve_voice};

use self::file::VocalConfigFile;

/// Default per-request timeout for the remote backend
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default delay between `play` and the first buffer
pub const DEFAULT_PLAYBACK_LEAD: Duration = Duration::from_millis(150);

/// Vocal orchestrator configuration
#[derive(Debug, Default)]
pub struct Config {
    /// Remote synthesis backend
    pub remote: RemoteConfig,

    /// Speech pipeline tuning
    pub speech: SpeechConfig,
}

/// Remote synthesis backend configuration
#[derive(Debug)]
pub struct RemoteConfig {
    /// API key; remote synthesis is unavailable without one
    pub api_key: Option<SecretString>,

    /// Backend base URL
    pub base_url: String,

    /// Speech model identifier
    pub model: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Instruction text prefixed to every request
    pub preamble: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            preamble: None,
        }
    }
}

/// Segmentation, caching, playback and fallback configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Default remote voice, already resolved against the catalog
    pub voice: String,

    /// Remote chunk bound in characters
    pub max_chunk_len: usize,

    /// On-device chunk bound in characters
    pub fallback_chunk_len: usize,

    /// Cached chunk count (0 = unbounded)
    pub cache_capacity: usize,

    /// Delay between `play` and the first buffer
    pub playback_lead: Duration,

    /// Keep-alive pump interval; `None` disables pumping
    pub keep_alive: Option<Duration>,

    /// Extra marker regexes stripped on top of the built-in ones
    pub marker_patterns: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            max_chunk_len: DEFAULT_MAX_CHUNK_LEN,
            fallback_chunk_len: DEFAULT_FALLBACK_CHUNK_LEN,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            playback_lead: DEFAULT_PLAYBACK_LEAD,
            keep_alive: Some(DEFAULT_KEEP_ALIVE),
            marker_patterns: Vec::new(),
        }
    }
}

impl SpeechConfig {
    /// Build the marker stripper for this configuration
    ///
    /// # Errors
    ///
    /// Returns error if an extra marker pattern is not a valid regex
    pub fn stripper(&self) -> Result<MarkerStripper> {
        MarkerStripper::with_extra(self.marker_patterns.as_slice())
    }
}

impl Config {
    /// Load configuration from environment and config file
    ///
    /// Priority: env vars > config file > defaults
    ///
    /// # Errors
    ///
    /// Returns error if a configured marker pattern is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured marker pattern is invalid
    pub fn resolve(
        fc: VocalConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env_parse = |key: &str| env(key).and_then(|v| v.trim().parse::<u64>().ok());

        let api_key = env("GEMINI_API_KEY")
            .or_else(|| env("API_KEY"))
            .or(fc.remote.api_key)
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from);

        let remote = RemoteConfig {
            api_key,
            base_url: env("VOCAL_TTS_BASE_URL")
                .or(fc.remote.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env("VOCAL_TTS_MODEL")
                .or(fc.remote.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_secs: env_parse("VOCAL_TTS_TIMEOUT_SECS")
                .or(fc.remote.timeout_secs)
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            preamble: env("VOCAL_TTS_PREAMBLE")
                .or(fc.remote.preamble)
                .filter(|p| !p.is_empty()),
        };

        let voice = env("VOCAL_VOICE")
            .or(fc.speech.voice)
            .map_or(DEFAULT_VOICE, |v| resolve_voice(&v));

        let cache_capacity = env_parse("VOCAL_CACHE_CAPACITY")
            .and_then(|v| usize::try_from(v).ok())
            .or(fc.speech.cache_capacity)
            .unwrap_or(DEFAULT_CACHE_CAPACITY);

        let keep_alive_secs = env_parse("VOCAL_KEEP_ALIVE_SECS")
            .or(fc.speech.keep_alive_secs)
            .unwrap_or(DEFAULT_KEEP_ALIVE.as_secs());

        let speech = SpeechConfig {
            voice: voice.to_string(),
            max_chunk_len: fc
                .speech
                .max_chunk_len
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_CHUNK_LEN),
            fallback_chunk_len: fc
                .speech
                .fallback_chunk_len
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_FALLBACK_CHUNK_LEN),
            cache_capacity,
            playback_lead: fc
                .speech
                .playback_lead_ms
                .map_or(DEFAULT_PLAYBACK_LEAD, Duration::from_millis),
            keep_alive: (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs)),
            marker_patterns: fc.speech.marker_patterns.unwrap_or_default(),
        };

        // Fail early on bad patterns rather than at first use
        speech.stripper()?;

        tracing::debug!(
            model = %remote.model,
            voice = %speech.voice,
            has_api_key = remote.api_key.is_some(),
            cache_capacity = speech.cache_capacity,
            "configuration resolved"
        );

        Ok(Self { remote, speech })
    }
}
