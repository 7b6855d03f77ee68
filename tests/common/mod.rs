//! Shared test utilities
//!
//! In-memory stand-ins for the remote backend, the device speech engine and
//! the audio output.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use vocal_orchestrator::voice::{
    AudioBuffer, AudioOutput, OUTPUT_SAMPLE_RATE, ScheduledSource, SourceId, SpeechEngine,
    SpeechSynthesizer, Utterance,
};
use vocal_orchestrator::{Error, Result, SynthesisError};

/// Buffer of `frames` samples at the output rate
#[must_use]
pub fn buffer(frames: usize) -> AudioBuffer {
    AudioBuffer::new(vec![0.1; frames], OUTPUT_SAMPLE_RATE)
}

// ---- remote backend ----

/// What the fake backend does on a given call
#[derive(Clone)]
pub enum Reply {
    Audio(usize),
    /// Audio of this many frames, after a delay
    Slow(Duration, usize),
    Fail(SynthesisError),
    Panic,
}

/// Scripted remote backend; unscripted calls succeed with 2400 frames
#[derive(Default)]
pub struct FakeSynthesizer {
    calls: Mutex<Vec<(String, String)>>,
    script: Mutex<HashMap<usize, Reply>>,
}

impl FakeSynthesizer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the reply for the call with this zero-based index
    pub fn on_call(&self, index: usize, reply: Reply) {
        self.script.lock().unwrap().insert(index, reply);
    }

    /// Every (text, voice) pair requested so far
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<AudioBuffer, SynthesisError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((text.to_string(), voice.to_string()));
            calls.len() - 1
        };

        tokio::task::yield_now().await;

        let reply = self.script.lock().unwrap().get(&index).cloned();
        match reply.unwrap_or(Reply::Audio(2400)) {
            Reply::Audio(frames) => Ok(buffer(frames)),
            Reply::Slow(delay, frames) => {
                tokio::time::sleep(delay).await;
                Ok(buffer(frames))
            }
            Reply::Fail(e) => Err(e),
            Reply::Panic => panic!("backend blew up"),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ---- device speech engine ----

/// Device engine whose utterances each take `utterance_len` of (paused) time
pub struct FakeEngine {
    available: bool,
    utterance_len: Duration,
    failing: Mutex<HashSet<String>>,
    spoken: Mutex<Vec<Utterance>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeEngine {
    #[must_use]
    pub fn new(utterance_len: Duration) -> Arc<Self> {
        Arc::new(Self {
            available: true,
            utterance_len,
            failing: Mutex::new(HashSet::new()),
            spoken: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn unavailable() -> Arc<Self> {
        let mut engine = Self::new(Duration::ZERO);
        Arc::get_mut(&mut engine).unwrap().available = false;
        engine
    }

    /// Make utterances with exactly this text fail
    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    /// Texts of utterances that finished or failed, in order
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }

    #[must_use]
    pub fn utterances(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count even if the utterance future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechEngine for FakeEngine {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.utterance_len).await;
        self.spoken.lock().unwrap().push(utterance.clone());

        if self.failing.lock().unwrap().contains(&utterance.text) {
            return Err(Error::Tts(format!("cannot say {:?}", utterance.text)));
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "fake-engine"
    }
}

// ---- audio output ----

/// One `schedule` call as seen by the fake output
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

/// Device-level event, in the order the output saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Scheduled(SourceId),
    Halted(SourceId),
}

#[derive(Default)]
struct OutputState {
    events: Vec<OutputEvent>,
    now: f64,
    next_id: SourceId,
    scheduled: Vec<Scheduled>,
    live: HashMap<SourceId, oneshot::Sender<()>>,
    halted: Vec<SourceId>,
    warm_calls: usize,
    reject: bool,
}

/// Output with a manually advanced clock; sources end only when told to
#[derive(Default)]
pub struct FakeOutput {
    state: Mutex<OutputState>,
}

impl FakeOutput {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_time(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    /// Reject every further `schedule` call
    pub fn reject_schedules(&self) {
        self.state.lock().unwrap().reject = true;
    }

    #[must_use]
    pub fn scheduled(&self) -> Vec<Scheduled> {
        self.state.lock().unwrap().scheduled.clone()
    }

    /// Ids scheduled and neither finished nor halted
    #[must_use]
    pub fn live(&self) -> HashSet<SourceId> {
        self.state.lock().unwrap().live.keys().copied().collect()
    }

    #[must_use]
    pub fn events(&self) -> Vec<OutputEvent> {
        self.state.lock().unwrap().events.clone()
    }

    #[must_use]
    pub fn halted(&self) -> Vec<SourceId> {
        self.state.lock().unwrap().halted.clone()
    }

    #[must_use]
    pub fn warm_calls(&self) -> usize {
        self.state.lock().unwrap().warm_calls
    }

    /// Let one source play to its natural end
    pub fn finish(&self, id: SourceId) {
        if let Some(ended) = self.state.lock().unwrap().live.remove(&id) {
            let _ = ended.send(());
        }
    }

    /// Let every live source play to its end
    pub fn finish_all(&self) {
        let live: Vec<_> = self.state.lock().unwrap().live.drain().collect();
        for (_, ended) in live {
            let _ = ended.send(());
        }
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&self, buffer: &AudioBuffer, start_at: f64) -> Result<ScheduledSource> {
        let mut state = self.state.lock().unwrap();
        if state.reject {
            return Err(Error::Audio("device lost".to_string()));
        }

        state.next_id += 1;
        let id = state.next_id;
        let (tx, rx) = oneshot::channel();
        state.live.insert(id, tx);
        state.events.push(OutputEvent::Scheduled(id));
        state.scheduled.push(Scheduled {
            id,
            start_at,
            duration: buffer.duration_secs(),
        });

        Ok(ScheduledSource { id, ended: rx })
    }

    fn halt(&self, id: SourceId) {
        let mut state = self.state.lock().unwrap();
        if state.live.remove(&id).is_some() {
            state.halted.push(id);
            state.events.push(OutputEvent::Halted(id));
        }
    }

    fn keep_warm(&self) -> Result<()> {
        self.state.lock().unwrap().warm_calls += 1;
        Ok(())
    }
}

/// Let spawned watcher tasks run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
