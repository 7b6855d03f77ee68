//! On-device fallback speech
//!
//! Used when the remote path is abandoned. Text is re-chunked more finely
//! than for the remote backend, and chunks are spoken strictly one after
//! another: the next utterance starts only once the engine reports the
//! previous one finished. A failed chunk is skipped, never fatal.
//!
//! Some engines silently cut off long utterances after a fixed interval; the
//! driver can pump `pause`/`resume` on a timer while an utterance is active
//! to defeat that. Engines without the problem leave both as no-ops.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::segment::{MarkerStripper, split_cleaned};
use super::settings::AudioSettings;
use crate::{Error, Result};

/// Default chunk bound for on-device utterances
pub const DEFAULT_FALLBACK_CHUNK_LEN: usize = 80;

/// Default keep-alive pump interval
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);

/// One request to the on-device engine
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Text to speak
    pub text: String,
    /// Engine-specific voice identifier
    pub voice: Option<String>,
    /// Pitch multiplier
    pub pitch: f32,
    /// Rate multiplier
    pub rate: f32,
}

/// Device speech engine adapter
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Whether the engine can speak at all on this machine
    fn is_available(&self) -> bool;

    /// Speak one utterance, resolving when it ends
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails to speak the utterance
    async fn speak(&self, utterance: &Utterance) -> Result<()>;

    /// Abort whatever the engine is currently saying
    fn cancel(&self);

    /// Pause the current utterance
    fn pause(&self) {}

    /// Resume a paused utterance
    fn resume(&self) {}

    /// Engine name for logging
    fn name(&self) -> &'static str;
}

/// Command-line speech programs the system engine can drive
#[derive(Debug, Clone)]
enum EngineProgram {
    EspeakNg(PathBuf),
    SpdSay(PathBuf),
}

/// Speech via `espeak-ng` or speech-dispatcher's `spd-say`
pub struct SystemSpeechEngine {
    program: Option<EngineProgram>,
    cancel: Notify,
}

impl SystemSpeechEngine {
    /// Probe the PATH for a usable speech program
    #[must_use]
    pub fn detect() -> Self {
        let program = which::which("espeak-ng")
            .map(EngineProgram::EspeakNg)
            .or_else(|_| which::which("spd-say").map(EngineProgram::SpdSay))
            .ok();

        match &program {
            Some(p) => tracing::debug!(program = ?p, "system speech engine detected"),
            None => tracing::warn!("no system speech engine found (tried espeak-ng, spd-say)"),
        }

        Self {
            program,
            cancel: Notify::new(),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn command(program: &EngineProgram, utterance: &Utterance) -> Command {
        match program {
            EngineProgram::EspeakNg(path) => {
                let mut cmd = Command::new(path);
                let wpm = (175.0 * utterance.rate).round().clamp(80.0, 450.0) as i32;
                let pitch = (50.0 * utterance.pitch).round().clamp(0.0, 99.0) as i32;
                cmd.arg("-s").arg(wpm.to_string());
                cmd.arg("-p").arg(pitch.to_string());
                if let Some(voice) = &utterance.voice {
                    cmd.arg("-v").arg(voice);
                }
                cmd.arg("--").arg(&utterance.text);
                cmd
            }
            EngineProgram::SpdSay(path) => {
                let mut cmd = Command::new(path);
                let rate = ((utterance.rate - 1.0) * 50.0).round().clamp(-100.0, 100.0) as i32;
                let pitch = ((utterance.pitch - 1.0) * 100.0).round().clamp(-100.0, 100.0) as i32;
                cmd.arg("-w");
                cmd.arg("-r").arg(rate.to_string());
                cmd.arg("-p").arg(pitch.to_string());
                if let Some(voice) = &utterance.voice {
                    cmd.arg("-y").arg(voice);
                }
                cmd.arg("--").arg(&utterance.text);
                cmd
            }
        }
    }
}

#[async_trait]
impl SpeechEngine for SystemSpeechEngine {
    fn is_available(&self) -> bool {
        self.program.is_some()
    }

    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        let Some(program) = &self.program else {
            return Err(Error::FallbackEngineUnavailable);
        };

        let mut child = Self::command(program, utterance)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            () = self.cancel.notified() => None,
        };

        match finished {
            Some(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(Error::Tts(format!("{} exited with {status}", self.name())))
                }
            }
            None => {
                child.start_kill().ok();
                child.wait().await.ok();
                Ok(())
            }
        }
    }

    /// Runs synchronously: the speaking task may be aborted before it ever
    /// observes the cancellation
    fn cancel(&self) {
        self.cancel.notify_waiters();

        if let Some(EngineProgram::SpdSay(path)) = &self.program {
            // Killing the client leaves speech-dispatcher talking
            let cleared = std::process::Command::new(path)
                .arg("-C")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = cleared {
                tracing::warn!(error = %e, "failed to clear speech-dispatcher queue");
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.program {
            Some(EngineProgram::EspeakNg(_)) => "espeak-ng",
            Some(EngineProgram::SpdSay(_)) => "spd-say",
            None => "none",
        }
    }
}

/// Completion callback, taken exactly once by whichever side finishes first
type EndSignal = Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>;

fn fire(on_end: &EndSignal) {
    let callback = on_end.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(callback) = callback {
        callback();
    }
}

struct ActiveNarration {
    task: JoinHandle<()>,
    on_end: EndSignal,
}

/// Drives the device engine through a whole response, chunk by chunk
pub struct FallbackSpeechDriver {
    engine: Arc<dyn SpeechEngine>,
    stripper: MarkerStripper,
    max_chunk_len: usize,
    keep_alive: Option<Duration>,
    active: Mutex<Option<ActiveNarration>>,
}

impl FallbackSpeechDriver {
    /// Create a driver with the default chunk bound and keep-alive interval
    #[must_use]
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            stripper: MarkerStripper::default(),
            max_chunk_len: DEFAULT_FALLBACK_CHUNK_LEN,
            keep_alive: Some(DEFAULT_KEEP_ALIVE),
            active: Mutex::new(None),
        }
    }

    /// Override the chunk bound (0 keeps the default)
    #[must_use]
    pub fn with_max_chunk_len(mut self, max_chunk_len: usize) -> Self {
        if max_chunk_len > 0 {
            self.max_chunk_len = max_chunk_len;
        }
        self
    }

    /// Set or disable the keep-alive pump
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Use a custom marker stripper
    #[must_use]
    pub fn with_stripper(mut self, stripper: MarkerStripper) -> Self {
        self.stripper = stripper;
        self
    }

    /// The engine this driver speaks through
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn SpeechEngine> {
        &self.engine
    }

    /// Whether the engine can speak at all
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }

    /// Whether a narration is still running
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|a| !a.task.is_finished())
    }

    /// Start narrating `text`, replacing any narration in progress
    ///
    /// Returns immediately; `on_end` runs once, when the last chunk finishes
    /// or when [`stop`](Self::stop) cuts the narration short. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FallbackEngineUnavailable`] if the device has no
    /// speech engine; `on_end` is not called in that case
    pub fn speak(
        &self,
        text: &str,
        settings: &AudioSettings,
        on_end: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.stop();

        if !self.engine.is_available() {
            return Err(Error::FallbackEngineUnavailable);
        }

        let settings = settings.clamped();
        let utterances: Vec<Utterance> =
            split_cleaned(&self.stripper.strip(text), self.max_chunk_len)
                .into_iter()
                .filter(|chunk| !chunk.is_blank())
                .map(|chunk| Utterance {
                    text: chunk.text.trim().to_string(),
                    voice: settings.local_voice.clone(),
                    pitch: settings.pitch,
                    rate: settings.rate,
                })
                .collect();

        tracing::debug!(
            engine = self.engine.name(),
            chunks = utterances.len(),
            "starting local narration"
        );

        let on_end: EndSignal = Arc::new(Mutex::new(Some(Box::new(on_end))));
        let engine = Arc::clone(&self.engine);
        let keep_alive = self.keep_alive;
        let task_end = Arc::clone(&on_end);

        let task = tokio::spawn(async move {
            for (index, utterance) in utterances.iter().enumerate() {
                if let Err(e) = speak_with_keep_alive(engine.as_ref(), utterance, keep_alive).await
                {
                    tracing::warn!(chunk = index, error = %e, "local chunk failed, skipping");
                }
            }
            tracing::debug!("local narration finished");
            fire(&task_end);
        });

        *self.active.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(ActiveNarration { task, on_end });

        Ok(())
    }

    /// Cancel the narration, dropping every pending chunk
    ///
    /// Invokes the narration's `on_end` if it has not run yet. A no-op when
    /// nothing is being narrated.
    pub fn stop(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(active) = active else {
            return;
        };

        if !active.task.is_finished() {
            active.task.abort();
            self.engine.cancel();
            tracing::debug!("local narration cancelled");
        }
        fire(&active.on_end);
    }
}

impl Drop for FallbackSpeechDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Speak one utterance, pumping pause/resume every `keep_alive` while it runs
async fn speak_with_keep_alive(
    engine: &dyn SpeechEngine,
    utterance: &Utterance,
    keep_alive: Option<Duration>,
) -> Result<()> {
    let Some(period) = keep_alive.filter(|p| !p.is_zero()) else {
        return engine.speak(utterance).await;
    };

    let mut pump = tokio::time::interval_at(Instant::now() + period, period);
    let speech = engine.speak(utterance);
    tokio::pin!(speech);

    loop {
        tokio::select! {
            biased;
            result = &mut speech => return result,
            _ = pump.tick() => {
                engine.pause();
                engine.resume();
                tracing::trace!("keep-alive pump");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(text: &str, rate: f32, pitch: f32) -> Utterance {
        Utterance {
            text: text.to_string(),
            voice: Some("zh".to_string()),
            pitch,
            rate,
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn espeak_arguments_map_settings() {
        let program = EngineProgram::EspeakNg(PathBuf::from("espeak-ng"));
        let cmd = SystemSpeechEngine::command(&program, &utterance("你好", 2.0, 1.0));
        assert_eq!(
            args(&cmd),
            vec!["-s", "350", "-p", "50", "-v", "zh", "--", "你好"]
        );
    }

    #[test]
    fn espeak_arguments_are_clamped() {
        let program = EngineProgram::EspeakNg(PathBuf::from("espeak-ng"));
        let cmd = SystemSpeechEngine::command(&program, &utterance("hi", 10.0, 2.0));
        let args = args(&cmd);
        assert_eq!(args[1], "450");
        assert_eq!(args[3], "99");
    }

    #[test]
    fn spd_say_waits_for_completion() {
        let program = EngineProgram::SpdSay(PathBuf::from("spd-say"));
        let cmd = SystemSpeechEngine::command(&program, &utterance("hi", 1.0, 1.5));
        assert_eq!(
            args(&cmd),
            vec!["-w", "-r", "0", "-p", "50", "-y", "zh", "--", "hi"]
        );
    }

    /// Fake `spd-say` that logs its arguments and "speaks" for a while
    #[cfg(unix)]
    fn fake_spd_say(dir: &std::path::Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = dir.join("spd-say");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$*\" >> '{}'\n[ \"$1\" = \"-C\" ] && exit 0\nsleep 5\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_clears_speech_dispatcher_even_when_task_is_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let (script, log) = fake_spd_say(dir.path());
        let engine = Arc::new(SystemSpeechEngine {
            program: Some(EngineProgram::SpdSay(script)),
            cancel: Notify::new(),
        });
        let driver = FallbackSpeechDriver::new(engine);

        driver
            .speak("A long sentence.", &AudioSettings::default(), || {})
            .unwrap();

        // Wait until the utterance is actually running
        for _ in 0..200 {
            if std::fs::read_to_string(&log).is_ok_and(|l| l.contains("-w")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        driver.stop();

        let calls = std::fs::read_to_string(&log).unwrap();
        assert!(calls.lines().any(|l| l.starts_with("-C")), "{calls}");
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let engine = SystemSpeechEngine {
            program: None,
            cancel: Notify::new(),
        };
        assert!(!engine.is_available());
        assert!(matches!(
            engine.speak(&utterance("hi", 1.0, 1.0)).await,
            Err(Error::FallbackEngineUnavailable)
        ));
    }
}
