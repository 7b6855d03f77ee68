//! Gapless playback of decoded buffers
//!
//! The scheduler never plays a buffer "when the previous one ends"; it asks the
//! output for its clock once, picks an anchor slightly in the future, and
//! schedules every buffer at an absolute start time so consecutive buffers
//! abut exactly. The output reports each source's natural end through a
//! oneshot channel, which is how "is speaking" is derived.

use std::collections::HashSet;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{oneshot, watch};

use super::AudioBuffer;
use super::decode::OUTPUT_SAMPLE_RATE;
use super::fallback::FallbackSpeechDriver;
use crate::config::DEFAULT_PLAYBACK_LEAD;
use crate::{Error, Result};

/// Frequency of the warm-keeping tone
const KEEP_WARM_HZ: f32 = 20.0;

/// Amplitude of the warm-keeping tone
const KEEP_WARM_GAIN: f32 = 1e-4;

/// Identifies one scheduled source on an output
pub type SourceId = u64;

/// Handle to a buffer scheduled on an output
#[derive(Debug)]
pub struct ScheduledSource {
    /// Source identifier, unique per output
    pub id: SourceId,
    /// Resolves when the source plays to its end; dropped if it is halted
    pub ended: oneshot::Receiver<()>,
}

/// Audio output device with a monotonic clock
pub trait AudioOutput: Send + Sync {
    /// Current device clock in seconds
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `start_at` on the device clock
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot accept the buffer
    fn schedule(&self, buffer: &AudioBuffer, start_at: f64) -> Result<ScheduledSource>;

    /// Stop a source immediately; unknown or finished ids are ignored
    fn halt(&self, id: SourceId);

    /// Start the inaudible warm-keeping tone; repeated calls are no-ops
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot render the tone
    fn keep_warm(&self) -> Result<()>;
}

struct Shared {
    active: Mutex<HashSet<SourceId>>,
    speaking: watch::Sender<bool>,
}

impl Shared {
    fn finish(&self, id: SourceId) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.remove(&id) && active.is_empty() {
            self.speaking.send_replace(false);
            tracing::debug!("playback finished");
        }
    }
}

/// Schedules buffer sequences on an [`AudioOutput`]
///
/// Holds at most one playback session. Starting a new one, or calling
/// [`stop`](Self::stop), halts every source of the previous session and any
/// on-device narration before anything new is scheduled.
pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    fallback: Option<Arc<FallbackSpeechDriver>>,
    lead: Duration,
    shared: Arc<Shared>,
}

impl PlaybackScheduler {
    /// Create a scheduler with the default lead time
    #[must_use]
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let (speaking, _) = watch::channel(false);
        Self {
            output,
            fallback: None,
            lead: DEFAULT_PLAYBACK_LEAD,
            shared: Arc::new(Shared {
                active: Mutex::new(HashSet::new()),
                speaking,
            }),
        }
    }

    /// Set the delay between `play` and the first buffer
    #[must_use]
    pub const fn with_lead(mut self, lead: Duration) -> Self {
        self.lead = lead;
        self
    }

    /// Cancel this driver's narration whenever playback is stopped
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<FallbackSpeechDriver>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// The output this scheduler plays on
    #[must_use]
    pub fn output(&self) -> &Arc<dyn AudioOutput> {
        &self.output
    }

    /// Whether any scheduled source is still playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        !self
            .shared
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Watch the speaking flag
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.speaking.subscribe()
    }

    /// Play `buffers` back to back, replacing any current session
    ///
    /// Returns the scheduled start time of each buffer on the output clock.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the output rejects a buffer; anything already
    /// scheduled for this call is halted first
    pub fn play(&self, buffers: &[AudioBuffer]) -> Result<Vec<f64>> {
        self.stop();

        if buffers.is_empty() {
            return Ok(Vec::new());
        }

        if let Err(e) = self.output.keep_warm() {
            tracing::warn!(error = %e, "failed to start warm-keeping tone");
        }

        let anchor = self.output.current_time() + self.lead.as_secs_f64();
        let mut next_start = anchor;
        let mut starts = Vec::with_capacity(buffers.len());
        let mut sources = Vec::with_capacity(buffers.len());

        for buffer in buffers {
            let source = match self.output.schedule(buffer, next_start) {
                Ok(source) => source,
                Err(e) => {
                    self.stop();
                    return Err(e);
                }
            };

            self.shared
                .active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(source.id);
            self.shared.speaking.send_replace(true);
            sources.push(source);

            starts.push(next_start);
            next_start += buffer.duration_secs();
        }

        // Every id is active before any watcher can retire one
        for ScheduledSource { id, ended } in sources {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if ended.await.is_ok() {
                    shared.finish(id);
                }
            });
        }

        tracing::debug!(
            buffers = buffers.len(),
            anchor,
            total_secs = next_start - anchor,
            "playback scheduled"
        );

        Ok(starts)
    }

    /// Halt every source and any on-device narration
    ///
    /// Idempotent; leaves `is_speaking` false.
    pub fn stop(&self) {
        let halted: Vec<SourceId> = self
            .shared
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();

        for id in &halted {
            self.output.halt(*id);
        }
        if !halted.is_empty() {
            tracing::debug!(sources = halted.len(), "playback stopped");
        }
        self.shared.speaking.send_replace(false);

        if let Some(fallback) = &self.fallback {
            fallback.stop();
        }
    }

    /// Wait until no scheduled source is playing
    pub async fn wait_idle(&self) {
        let mut speaking = self.subscribe();
        // Closed only when the scheduler is dropped
        let _ = speaking.wait_for(|s| !s).await;
    }
}

/// A short sine tone for speaker checks
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn test_tone(frequency: f32, duration: Duration) -> AudioBuffer {
    let mut buffer = AudioBuffer::silence(duration).samples().to_vec();
    let rate = OUTPUT_SAMPLE_RATE as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        *sample = 0.3 * (TAU * frequency * i as f32 / rate).sin();
    }
    AudioBuffer::new(buffer, OUTPUT_SAMPLE_RATE)
}

struct MixVoice {
    id: SourceId,
    samples: Arc<[f32]>,
    start_frame: u64,
    ended: Option<oneshot::Sender<()>>,
}

impl MixVoice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Default)]
struct Mixer {
    voices: Vec<MixVoice>,
    warm: bool,
}

impl Mixer {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn render(&self, frame: u64, sample_rate: u32) -> f32 {
        let mut sample = 0.0;
        for voice in &self.voices {
            if frame >= voice.start_frame && frame < voice.end_frame() {
                sample += voice.samples[(frame - voice.start_frame) as usize];
            }
        }
        if self.warm {
            let phase = (frame % u64::from(sample_rate)) as f32 / sample_rate as f32;
            sample += KEEP_WARM_GAIN * (TAU * KEEP_WARM_HZ * phase).sin();
        }
        sample.clamp(-1.0, 1.0)
    }

    /// Drop voices that have played out, signalling their end
    fn retire(&mut self, clock: u64) {
        self.voices.retain_mut(|voice| {
            if voice.end_frame() > clock {
                return true;
            }
            if let Some(ended) = voice.ended.take() {
                let _ = ended.send(());
            }
            false
        });
    }
}

/// Default output device driven through cpal
///
/// The cpal stream lives on a dedicated thread for the lifetime of this value.
/// Its callback mixes every scheduled buffer into the device stream and
/// advances a frame counter that serves as the output clock.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
    next_id: AtomicU64,
    _shutdown: mpsc::Sender<()>,
}

impl CpalOutput {
    /// Open the default output device at [`OUTPUT_SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if no device or suitable stream configuration is available
    pub fn open() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let clock = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread_mixer = Arc::clone(&mixer);
        let thread_clock = Arc::clone(&clock);

        std::thread::Builder::new()
            .name("vocal-output".to_string())
            .spawn(move || {
                let stream = match build_stream(thread_mixer, thread_clock) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Returns once the owning CpalOutput drops its sender
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("audio output closed");
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("audio output thread exited".to_string()))??;

        Ok(Self {
            mixer,
            clock,
            sample_rate: OUTPUT_SAMPLE_RATE,
            next_id: AtomicU64::new(1),
            _shutdown: shutdown_tx,
        })
    }

    fn lock_mixer(&self) -> std::sync::MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AudioOutput for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / f64::from(self.sample_rate)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn schedule(&self, buffer: &AudioBuffer, start_at: f64) -> Result<ScheduledSource> {
        if buffer.sample_rate() != self.sample_rate {
            return Err(Error::Audio(format!(
                "buffer sample rate {} Hz does not match output rate {} Hz",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (ended_tx, ended_rx) = oneshot::channel();
        let start_frame = (start_at.max(0.0) * f64::from(self.sample_rate)).round() as u64;

        self.lock_mixer().voices.push(MixVoice {
            id,
            samples: buffer.shared_samples(),
            start_frame,
            ended: Some(ended_tx),
        });

        Ok(ScheduledSource {
            id,
            ended: ended_rx,
        })
    }

    fn halt(&self, id: SourceId) {
        self.lock_mixer().voices.retain(|voice| voice.id != id);
    }

    fn keep_warm(&self) -> Result<()> {
        let mut mixer = self.lock_mixer();
        if !mixer.warm {
            mixer.warm = true;
            tracing::debug!(hz = KEEP_WARM_HZ, "warm-keeping tone started");
        }
        Ok(())
    }
}

/// Open the default device and start a mixing stream
fn build_stream(mixer: Arc<Mutex<Mixer>>, clock: Arc<AtomicU64>) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE))
        .config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = OUTPUT_SAMPLE_RATE,
        channels,
        "audio output initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut mixer = mixer.lock().unwrap_or_else(|e| e.into_inner());
                let start = clock.load(Ordering::Acquire);
                let mut frames = 0_u64;

                for frame in data.chunks_mut(channels) {
                    let sample = mixer.render(start + frames, OUTPUT_SAMPLE_RATE);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                    frames += 1;
                }

                clock.store(start + frames, Ordering::Release);
                mixer.retire(start + frames);
            },
            |err| {
                tracing::error!(error = %err, "audio output error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(id: SourceId, start_frame: u64, len: usize) -> (MixVoice, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            MixVoice {
                id,
                samples: vec![0.25; len].into(),
                start_frame,
                ended: Some(tx),
            },
            rx,
        )
    }

    #[test]
    fn mixer_plays_voices_only_inside_their_window() {
        let mut mixer = Mixer::default();
        let (v, _rx) = voice(1, 10, 5);
        mixer.voices.push(v);

        assert!(mixer.render(9, OUTPUT_SAMPLE_RATE).abs() < f32::EPSILON);
        assert!((mixer.render(10, OUTPUT_SAMPLE_RATE) - 0.25).abs() < f32::EPSILON);
        assert!((mixer.render(14, OUTPUT_SAMPLE_RATE) - 0.25).abs() < f32::EPSILON);
        assert!(mixer.render(15, OUTPUT_SAMPLE_RATE).abs() < f32::EPSILON);
    }

    #[test]
    fn adjacent_voices_do_not_overlap() {
        let mut mixer = Mixer::default();
        let (a, _ra) = voice(1, 0, 4);
        let (b, _rb) = voice(2, 4, 4);
        mixer.voices.push(a);
        mixer.voices.push(b);

        for frame in 0..8 {
            assert!((mixer.render(frame, OUTPUT_SAMPLE_RATE) - 0.25).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn retire_signals_finished_voices() {
        let mut mixer = Mixer::default();
        let (a, mut ra) = voice(1, 0, 4);
        let (b, mut rb) = voice(2, 4, 4);
        mixer.voices.push(a);
        mixer.voices.push(b);

        mixer.retire(4);
        assert_eq!(mixer.voices.len(), 1);
        assert!(ra.try_recv().is_ok());
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn warm_tone_is_inaudible() {
        let mixer = Mixer {
            voices: Vec::new(),
            warm: true,
        };
        let peak = (0..OUTPUT_SAMPLE_RATE)
            .map(|f| mixer.render(u64::from(f), OUTPUT_SAMPLE_RATE).abs())
            .fold(0.0_f32, f32::max);
        assert!(peak > 0.0);
        assert!(peak <= KEEP_WARM_GAIN);
    }

    #[test]
    fn test_tone_has_requested_length() {
        let tone = test_tone(440.0, Duration::from_millis(250));
        assert_eq!(tone.frames(), 6000);
        assert!(tone.samples().iter().any(|s| s.abs() > 0.1));
    }
}
