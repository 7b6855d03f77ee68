//! Speech synthesis and playback
//!
//! Segmentation, caching and remote synthesis are sequenced by the
//! orchestrator; playback and on-device narration sit behind the session.

pub mod cache;
pub mod decode;
pub mod fallback;
pub mod orchestrator;
pub mod playback;
pub mod remote;
pub mod segment;
pub mod session;
pub mod settings;

pub use cache::{SynthesisCache, cache_key};
pub use decode::{AudioBuffer, OUTPUT_SAMPLE_RATE, decode_payload};
pub use fallback::{FallbackSpeechDriver, SpeechEngine, SystemSpeechEngine, Utterance};
pub use orchestrator::{OrchestratorState, SynthesisNode, VocalOrchestrator, VocalResult};
pub use playback::{AudioOutput, CpalOutput, PlaybackScheduler, ScheduledSource, SourceId};
pub use remote::{OfflineSynthesizer, RemoteSpeechClient, SpeechSynthesizer};
pub use segment::{MarkerStripper, Segmenter, TextChunk, segment};
pub use session::VoiceSession;
pub use settings::{AudioSettings, DEFAULT_VOICE, PREBUILT_VOICES, resolve_voice};
