//! Synthesis orchestration
//!
//! Turns a response into either an ordered list of decoded buffers or a
//! signal to narrate it on the device instead. Chunks are processed strictly
//! in order, each one checked against the session cache before the remote
//! backend is asked. The first remote failure abandons the remote path for
//! the whole response: buffers already synthesized are discarded so one
//! response is never heard in two voices.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;

use super::AudioBuffer;
use super::cache::{SynthesisCache, cache_key};
use super::fallback::SpeechEngine;
use super::remote::SpeechSynthesizer;
use super::segment::Segmenter;
use super::settings::{AudioSettings, resolve_voice};
use crate::SynthesisError;

/// Which backend is producing speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisNode {
    /// Remote neural synthesis
    Remote,
    /// On-device engine
    Local,
}

impl SynthesisNode {
    /// Human-readable label for status displays
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Remote => "neural node (remote)",
            Self::Local => "local engine (device)",
        }
    }
}

impl fmt::Display for SynthesisNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of one orchestration call
#[derive(Debug, Clone, PartialEq)]
pub enum VocalResult {
    /// Every chunk was synthesized; buffers are in chunk order
    Synthesized {
        /// Decoded audio, owned by the caller
        buffers: Vec<AudioBuffer>,
    },
    /// The remote path was abandoned; narrate on the device
    LocalFallback,
    /// No audio path is available
    Failed,
}

impl VocalResult {
    /// Whether the caller should narrate on the device
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::LocalFallback)
    }
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Segmenting,
    /// Working on the chunk at this index
    SynthesizingChunk(usize),
    FallbackTriggered,
    Completed,
    Failed,
}

/// Sequences segmentation, caching and remote synthesis for one response
pub struct VocalOrchestrator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    fallback_engine: Arc<dyn SpeechEngine>,
    cache: Arc<SynthesisCache>,
    segmenter: Segmenter,
    state: Mutex<OrchestratorState>,
}

impl VocalOrchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        fallback_engine: Arc<dyn SpeechEngine>,
        cache: Arc<SynthesisCache>,
        segmenter: Segmenter,
    ) -> Self {
        Self {
            synthesizer,
            fallback_engine,
            cache,
            segmenter,
            state: Mutex::new(OrchestratorState::Idle),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The session cache
    #[must_use]
    pub fn cache(&self) -> &Arc<SynthesisCache> {
        &self.cache
    }

    fn transition(&self, next: OrchestratorState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        tracing::trace!(from = ?*state, to = ?next, "orchestrator transition");
        *state = next;
    }

    /// Synthesize `text` with `settings`
    ///
    /// `on_progress` receives a percentage after each chunk resolves through
    /// the remote path; it reaches 100 only when every chunk succeeded.
    /// `on_node` is told which backend is active, once at the start and once
    /// more if the response switches to the device engine. Neither callback
    /// affects control flow.
    pub async fn synthesize<P, N>(
        &self,
        text: &str,
        settings: &AudioSettings,
        mut on_progress: P,
        mut on_node: N,
    ) -> VocalResult
    where
        P: FnMut(u8),
        N: FnMut(SynthesisNode),
    {
        self.transition(OrchestratorState::Segmenting);
        let chunks = self.segmenter.segment(text);
        let total = chunks.len();
        let voice = resolve_voice(&settings.voice_name);

        tracing::debug!(chunks = total, voice, "starting synthesis");
        on_node(SynthesisNode::Remote);

        let mut buffers = Vec::with_capacity(total);

        for chunk in &chunks {
            self.transition(OrchestratorState::SynthesizingChunk(chunk.index));

            if !chunk.is_blank() {
                let key = cache_key(voice, &chunk.text);
                if let Some(buffer) = self.cache.get(&key) {
                    tracing::debug!(chunk = chunk.index, "synthesis cache hit");
                    buffers.push(buffer);
                } else {
                    match self.synthesize_remote(&chunk.text, voice).await {
                        Ok(buffer) => {
                            self.cache.put(key, buffer.clone());
                            buffers.push(buffer);
                        }
                        Err(e) => {
                            tracing::warn!(
                                chunk = chunk.index,
                                of = total,
                                quota = e.is_quota(),
                                error = %e,
                                "remote synthesis failed, switching to local engine"
                            );
                            return self.fall_back(&mut on_node);
                        }
                    }
                }
            }

            on_progress(progress(chunk.index + 1, total));
        }

        self.transition(OrchestratorState::Completed);
        tracing::debug!(buffers = buffers.len(), "synthesis complete");
        VocalResult::Synthesized { buffers }
    }

    /// One remote call, with a panic counted as a failure
    async fn synthesize_remote(
        &self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<AudioBuffer, SynthesisError> {
        AssertUnwindSafe(self.synthesizer.synthesize(text, voice))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                Err(SynthesisError::Fatal(format!(
                    "{} synthesizer panicked",
                    self.synthesizer.name()
                )))
            })
    }

    fn fall_back<N: FnMut(SynthesisNode)>(&self, on_node: &mut N) -> VocalResult {
        self.transition(OrchestratorState::FallbackTriggered);
        on_node(SynthesisNode::Local);

        if !self.fallback_engine.is_available() {
            tracing::error!("no local speech engine available, response stays text-only");
            self.transition(OrchestratorState::Failed);
            return VocalResult::Failed;
        }

        self.transition(OrchestratorState::Completed);
        VocalResult::LocalFallback
    }
}

/// `round(100 * done / total)` in integer arithmetic
fn progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from((200 * done + total) / (2 * total)).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_rounds_to_nearest() {
        assert_eq!(progress(1, 3), 33);
        assert_eq!(progress(2, 3), 67);
        assert_eq!(progress(3, 3), 100);
        assert_eq!(progress(1, 8), 13);
        assert_eq!(progress(1, 1), 100);
    }

    #[test]
    fn node_labels() {
        assert_eq!(SynthesisNode::Remote.to_string(), "neural node (remote)");
        assert_eq!(SynthesisNode::Local.to_string(), "local engine (device)");
    }

    #[test]
    fn only_local_fallback_is_local() {
        assert!(VocalResult::LocalFallback.is_local());
        assert!(!VocalResult::Failed.is_local());
        assert!(
            !VocalResult::Synthesized {
                buffers: Vec::new()
            }
            .is_local()
        );
    }
}
