//! Vocal Orchestrator - speech output for streamed assistant responses
//!
//! This library turns a (possibly long, markup-annotated) text response into
//! audible speech:
//! - Segmentation into bounded, sentence-aligned chunks
//! - Remote neural synthesis per chunk, memoized in a session cache
//! - Whole-response fallback to the on-device speech engine
//! - Gapless scheduling of decoded buffers on the output clock
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   VoiceSession                       │
//! │   respond  │  replay  │  stop  │  is_speaking        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 VocalOrchestrator                    │
//! │   Segmenter  │  SynthesisCache  │  RemoteSpeechClient│
//! └──────────┬──────────────────────────────┬───────────┘
//!            │ buffers                      │ fallback
//! ┌──────────▼──────────┐        ┌──────────▼───────────┐
//! │  PlaybackScheduler  │        │ FallbackSpeechDriver │
//! │   AudioOutput       │        │   SpeechEngine       │
//! └─────────────────────┘        └──────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result, SynthesisError};
pub use voice::{AudioBuffer, AudioSettings, VocalResult, VoiceSession};
