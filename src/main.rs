use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vocal_orchestrator::voice::playback::test_tone;
use vocal_orchestrator::voice::{
    AudioOutput, CpalOutput, DEFAULT_VOICE, PREBUILT_VOICES, PlaybackScheduler, Segmenter,
};
use vocal_orchestrator::{AudioSettings, Config, VocalResult, VoiceSession};

/// Vocal - speak assistant responses through remote or on-device synthesis
#[derive(Parser)]
#[command(name = "vocal", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak text through the full pipeline
    Speak {
        /// Text to speak (markers like `[label]` are stripped)
        text: String,
        /// Remote voice name
        #[arg(long, env = "VOCAL_VOICE")]
        voice: Option<String>,
        /// Pitch multiplier (0.1 to 2.0)
        #[arg(long, default_value = "1.0")]
        pitch: f32,
        /// Rate multiplier (0.1 to 10.0)
        #[arg(long, default_value = "1.0")]
        rate: f32,
        /// On-device voice identifier
        #[arg(long)]
        local_voice: Option<String>,
    },
    /// List the remote voice catalog
    Voices,
    /// Show how text would be chunked
    Segment {
        /// Text to segment
        text: String,
        /// Chunk bound in characters (defaults to the configured bound)
        #[arg(short, long)]
        max_len: Option<usize>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,vocal_orchestrator=info",
        1 => "info,vocal_orchestrator=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Speak {
            text,
            voice,
            pitch,
            rate,
            local_voice,
        } => {
            let config = Config::load()?;
            let settings = AudioSettings {
                voice_name: voice.unwrap_or_else(|| config.speech.voice.clone()),
                pitch,
                rate,
                local_voice,
            }
            .clamped();
            speak(&config, &text, &settings).await
        }
        Command::Voices => {
            list_voices();
            Ok(())
        }
        Command::Segment { text, max_len } => {
            let config = Config::load()?;
            let segmenter = Segmenter::new(
                config.speech.stripper()?,
                max_len.unwrap_or(config.speech.max_chunk_len),
            );
            for chunk in segmenter.segment(&text) {
                println!("[{}] ({} chars) {:?}", chunk.index, chunk.char_count(), chunk.text);
            }
            Ok(())
        }
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run one response through the session and wait for it to finish
async fn speak(config: &Config, text: &str, settings: &AudioSettings) -> anyhow::Result<()> {
    let session = VoiceSession::open(config)?;

    let result = session
        .respond(
            text,
            settings,
            |percent| {
                eprint!("\rsynthesizing... {percent:3}%");
                let _ = std::io::stderr().flush();
            },
            |node| tracing::info!(%node, "synthesis node active"),
        )
        .await?;
    eprintln!();

    match &result {
        VocalResult::Synthesized { buffers } => {
            let secs: f64 = buffers.iter().map(|b| b.duration_secs()).sum();
            println!("Playing {} buffer(s), {secs:.1}s", buffers.len());
        }
        VocalResult::LocalFallback => println!("Speaking with the local engine"),
        VocalResult::Failed => {
            anyhow::bail!("no speech path available (remote failed, no local engine)");
        }
    }

    tokio::select! {
        () = session.wait_until_silent() => {}
        _ = tokio::signal::ctrl_c() => {
            session.stop();
            println!("\nStopped");
        }
    }

    Ok(())
}

fn list_voices() {
    for voice in PREBUILT_VOICES {
        if voice == DEFAULT_VOICE {
            println!("{voice} (default)");
        } else {
            println!("{voice}");
        }
    }
}

/// Play a tone through the scheduler
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let output: std::sync::Arc<dyn AudioOutput> = std::sync::Arc::new(CpalOutput::open()?);
    let scheduler = PlaybackScheduler::new(output);

    let tone = test_tone(440.0, Duration::from_secs(2));
    let starts = scheduler.play(&[tone])?;
    println!("Scheduled at t={:.3}s on the output clock", starts[0]);

    scheduler.wait_idle().await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
