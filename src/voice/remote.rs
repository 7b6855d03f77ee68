//! Remote text-to-speech client
//!
//! One backend call per chunk, no retries. Failures are classified so the
//! orchestrator can tell quota exhaustion from ordinary network trouble, even
//! though both end the remote path for the utterance.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::AudioBuffer;
use super::decode::decode_payload;
use super::settings::resolve_voice;
use crate::config::RemoteConfig;
use crate::{Error, Result, SynthesisError};

/// Default backend base URL
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default speech model
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Turns one chunk of text into decoded audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice`
    ///
    /// # Errors
    ///
    /// Returns a classified [`SynthesisError`] if the backend refuses, the
    /// network fails, or the payload cannot be decoded
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<AudioBuffer, SynthesisError>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Cloud speech synthesis over the `generateContent` audio modality
pub struct RemoteSpeechClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    preamble: Option<String>,
}

impl RemoteSpeechClient {
    /// Create a client from remote configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .map(ExposeSecret::expose_secret)
            .filter(|key| !key.is_empty())
            .map(|key| SecretString::from(key.to_string()))
            .ok_or_else(|| Error::Config("API key required for remote TTS".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            preamble: config.preamble.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request<'a>(&self, text: &str, voice: &'a str) -> GenerateRequest<'a> {
        let text = match &self.preamble {
            Some(preamble) => format!("{preamble}{text}"),
            None => text.to_string(),
        };

        GenerateRequest {
            contents: vec![Content {
                parts: vec![TextPart { text }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
                    },
                },
            },
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for RemoteSpeechClient {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<AudioBuffer, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::Fatal("nothing to synthesize".to_string()));
        }

        let voice = resolve_voice(voice);
        let request = self.build_request(text, voice);

        tracing::debug!(
            model = %self.model,
            voice,
            chars = text.chars().count(),
            "requesting remote synthesis"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::classify(
                Some(status.as_u16()),
                &format!("remote TTS error {status}: {body}"),
            ));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::DecodeFailure(format!("malformed response: {e}")))?;

        let inline = extract_audio(body)?;
        decode_payload(&inline.data, inline.mime_type.as_deref())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Stand-in used when no API key is configured
///
/// Every call fails, so each response goes straight to the device engine.
#[derive(Debug, Default)]
pub struct OfflineSynthesizer;

#[async_trait]
impl SpeechSynthesizer for OfflineSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        _voice: &str,
    ) -> std::result::Result<AudioBuffer, SynthesisError> {
        Err(SynthesisError::Fatal("remote synthesis not configured".to_string()))
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}

/// Pull the first inline audio part out of a response
fn extract_audio(body: GenerateResponse) -> std::result::Result<InlineData, SynthesisError> {
    if let Some(error) = body.error {
        return Err(SynthesisError::classify(
            error.code,
            &format!(
                "{} {}",
                error.status.unwrap_or_default(),
                error.message.unwrap_or_default()
            ),
        ));
    }

    body.candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data)
        .ok_or_else(|| SynthesisError::DecodeFailure("no audio payload received".to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}
