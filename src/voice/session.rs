//! The audio context for one conversation
//!
//! Owns the orchestrator, the playback scheduler and the fallback driver, and
//! wires them together: a response either plays its buffers or is narrated
//! on the device, and `stop` silences both. Everything shares one output
//! device and one speech engine for the lifetime of the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::AudioBuffer;
use super::cache::SynthesisCache;
use super::fallback::{FallbackSpeechDriver, SpeechEngine, SystemSpeechEngine};
use super::orchestrator::{OrchestratorState, SynthesisNode, VocalOrchestrator, VocalResult};
use super::playback::{AudioOutput, CpalOutput, PlaybackScheduler};
use super::remote::{OfflineSynthesizer, RemoteSpeechClient, SpeechSynthesizer};
use super::segment::Segmenter;
use super::settings::AudioSettings;
use crate::config::{Config, SpeechConfig};
use crate::{Error, Result};

/// How often [`VoiceSession::wait_until_silent`] rechecks narration
const SILENCE_POLL: Duration = Duration::from_millis(50);

/// One conversation's speech pipeline
pub struct VoiceSession {
    orchestrator: VocalOrchestrator,
    scheduler: PlaybackScheduler,
    fallback: Arc<FallbackSpeechDriver>,
    /// Bumped by every `respond` and `stop`, so superseded results are discarded
    generation: AtomicU64,
}

impl VoiceSession {
    /// Open a session on the real devices: remote backend, system speech
    /// engine, and the default audio output
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client or the audio output cannot be created.
    /// A missing API key is not an error: remote synthesis is disabled and
    /// every response is narrated on the device.
    pub fn open(config: &Config) -> Result<Self> {
        let remote = RemoteSpeechClient::new(&config.remote);
        let synthesizer: Arc<dyn SpeechSynthesizer> = match remote {
            Ok(client) => Arc::new(client),
            Err(Error::Config(reason)) => {
                tracing::warn!(%reason, "remote synthesis disabled, using local engine only");
                Arc::new(OfflineSynthesizer)
            }
            Err(e) => return Err(e),
        };
        let engine = Arc::new(SystemSpeechEngine::detect());
        let output = Arc::new(CpalOutput::open()?);
        Self::from_parts(&config.speech, synthesizer, engine, output)
    }

    /// Assemble a session from explicit adapters
    ///
    /// # Errors
    ///
    /// Returns error if a configured marker pattern is invalid
    pub fn from_parts(
        speech: &SpeechConfig,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        engine: Arc<dyn SpeechEngine>,
        output: Arc<dyn AudioOutput>,
    ) -> Result<Self> {
        let stripper = speech.stripper()?;

        let fallback = Arc::new(
            FallbackSpeechDriver::new(Arc::clone(&engine))
                .with_max_chunk_len(speech.fallback_chunk_len)
                .with_keep_alive(speech.keep_alive)
                .with_stripper(stripper.clone()),
        );

        let orchestrator = VocalOrchestrator::new(
            synthesizer,
            engine,
            Arc::new(SynthesisCache::new(speech.cache_capacity)),
            Segmenter::new(stripper, speech.max_chunk_len),
        );

        let scheduler = PlaybackScheduler::new(output)
            .with_lead(speech.playback_lead)
            .with_fallback(Arc::clone(&fallback));

        Ok(Self {
            orchestrator,
            scheduler,
            fallback,
            generation: AtomicU64::new(0),
        })
    }

    /// The orchestrator's current state
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.orchestrator.state()
    }

    /// The session cache
    #[must_use]
    pub fn cache(&self) -> &Arc<SynthesisCache> {
        self.orchestrator.cache()
    }

    /// Speak a response
    ///
    /// Synthesizes `text`, then plays the buffers or hands the text to the
    /// device engine. If [`stop`](Self::stop) or a newer `respond` runs while
    /// synthesis is in flight, the result is still returned but nothing is
    /// played.
    ///
    /// # Errors
    ///
    /// Returns error if the output rejects the buffers or narration cannot
    /// start
    pub async fn respond<P, N>(
        &self,
        text: &str,
        settings: &AudioSettings,
        on_progress: P,
        on_node: N,
    ) -> Result<VocalResult>
    where
        P: FnMut(u8),
        N: FnMut(SynthesisNode),
    {
        // A newer respond or a stop supersedes this one
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let result = self
            .orchestrator
            .synthesize(text, settings, on_progress, on_node)
            .await;

        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!("response superseded during synthesis, discarding result");
            return Ok(result);
        }

        match &result {
            VocalResult::Synthesized { buffers } => {
                self.scheduler.play(buffers)?;
            }
            VocalResult::LocalFallback => {
                self.scheduler.stop();
                self.fallback.speak(text, settings, || {
                    tracing::debug!("local narration ended");
                })?;
            }
            VocalResult::Failed => {
                self.scheduler.stop();
            }
        }

        Ok(result)
    }

    /// Play buffers kept from an earlier response without re-synthesis
    ///
    /// # Errors
    ///
    /// Returns error if the output rejects a buffer
    pub fn replay(&self, buffers: &[AudioBuffer]) -> Result<()> {
        self.scheduler.play(buffers).map(|_| ())
    }

    /// Silence everything: scheduled buffers and device narration
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.scheduler.stop();
    }

    /// Whether buffers are playing or the device is narrating
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.scheduler.is_speaking() || self.fallback.is_speaking()
    }

    /// Wait until neither playback nor narration is active
    pub async fn wait_until_silent(&self) {
        self.scheduler.wait_idle().await;
        while self.fallback.is_speaking() {
            tokio::time::sleep(SILENCE_POLL).await;
        }
    }
}
