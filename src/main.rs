use std::process::ExitCode;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use beacon_voice::agent::HttpAgent;
use beacon_voice::assistant::{Assistant, ChannelEventSink};
use beacon_voice::voice::{
    AudioCapture, AudioChunk, AudioPlayback, AudioSink, Backends, Detectors, EnergyVad,
    EventSink, LogEventSink, MarkdownSanitizer, OpenAiSynthesizer, TranscriptWakeWord, Transcriber,
    VoicePipeline, WaitingChime, WhisperTranscriber, calculate_energy, load_earcon,
};
use beacon_voice::Config;

/// Samples handed to the pipeline per call (100ms at 16kHz)
const FRAME_SAMPLES: usize = 1600;

/// Beacon Voice - wake word voice client for a remote assistant
#[derive(Parser)]
#[command(name = "beacon-voice", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Wake word phrase (overrides config)
    #[arg(long)]
    wake_word: Option<String>,

    /// Listen continuously without a wake word
    #[arg(long)]
    no_wake_word: bool,

    /// Agent endpoint URL (overrides config)
    #[arg(long)]
    agent_url: Option<String>,

    /// 16-bit WAV file to use as the waiting earcon
    #[arg(long)]
    earcon: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice assistant (default)
    Run,
    /// Speak text through the TTS queue
    Speak {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Play the waiting chime
    TestChime {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,beacon_voice=info",
        1 => "info,beacon_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(wake_word) = cli.wake_word {
        config.pipeline.wake_word = wake_word;
    }
    if cli.no_wake_word {
        config.pipeline.wake_word_enabled = false;
    }
    if let Some(url) = cli.agent_url {
        config.agent.url = Some(url);
    }
    config.validate()?;
    tracing::debug!(?config.pipeline, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_assistant(&config, cli.earcon.as_deref()),
        Command::Speak { text } => speak(&config, &text),
        Command::TestMic { duration } => test_mic(duration),
        Command::TestSpeaker => test_speaker(),
        Command::TestChime { duration } => test_chime(&config, cli.earcon.as_deref(), duration),
    }
}

/// Build the pipeline with network backends and the default speakers
fn build_pipeline(
    config: &Config,
    sink: Arc<dyn AudioSink>,
    events: Arc<dyn EventSink>,
) -> anyhow::Result<VoicePipeline> {
    let transcriber: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::new(&config.providers));
    let backends = Arc::new(Backends::new(
        Arc::clone(&transcriber),
        Arc::new(OpenAiSynthesizer::new(&config.providers)),
        Arc::new(MarkdownSanitizer),
    ));

    let detectors = Detectors::new(
        Box::new(TranscriptWakeWord::new(
            vec![config.pipeline.wake_word.clone()],
            transcriber,
            config.pipeline.sample_rate,
            config.pipeline.vad_threshold,
        )),
        Box::new(EnergyVad::new(config.pipeline.vad_threshold)),
    );

    let pipeline = VoicePipeline::new(config.pipeline.clone(), backends, detectors, sink, events);
    pipeline.initialize()?;
    Ok(pipeline)
}

fn build_chime(
    config: &Config,
    earcon: Option<&std::path::Path>,
    sink: Arc<dyn AudioSink>,
) -> anyhow::Result<WaitingChime> {
    Ok(match earcon {
        Some(path) => WaitingChime::with_earcon(config.chime.clone(), sink, load_earcon(path)?),
        None => WaitingChime::new(config.chime.clone(), sink),
    })
}

/// Run the full assistant until Ctrl-C
fn run_assistant(config: &Config, earcon: Option<&std::path::Path>) -> anyhow::Result<()> {
    let sink: Arc<dyn AudioSink> = Arc::new(AudioPlayback::new()?);
    let agent = Arc::new(HttpAgent::new(&config.agent)?);
    let (events, rx) = ChannelEventSink::channel();

    let pipeline = Arc::new(build_pipeline(config, Arc::clone(&sink), Arc::new(events))?);
    let chime = Arc::new(build_chime(config, earcon, sink)?);

    let shutdown = CancellationToken::new();
    pipeline.start();
    let feeder = spawn_feeder(Arc::clone(&pipeline), shutdown.clone())?;

    if config.pipeline.wake_word_enabled {
        tracing::info!("beacon voice ready - say \"{}\"", config.pipeline.wake_word);
    } else {
        tracing::info!("beacon voice ready (always listening)");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let assistant = Assistant::new(Arc::clone(&pipeline), agent, Some(Arc::clone(&chime)));

    runtime.block_on(async {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
        assistant.run(rx, shutdown.clone()).await;
    });
    shutdown.cancel();
    runtime.shutdown_timeout(Duration::from_secs(2));

    let feeder_result = feeder
        .join()
        .map_err(|_| anyhow::anyhow!("audio feeder panicked"))?;
    chime.stop();
    pipeline.stop();
    feeder_result?;

    tracing::info!("beacon voice stopped");
    Ok(())
}

/// Capture audio on a dedicated thread (cpal streams are not `Send`)
fn spawn_feeder(
    pipeline: Arc<VoicePipeline>,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    let handle = std::thread::Builder::new()
        .name("audio-feeder".to_string())
        .spawn(move || {
            let result = feed_audio(&pipeline, &shutdown);
            if result.is_err() {
                shutdown.cancel();
            }
            result
        })?;
    Ok(handle)
}

fn feed_audio(pipeline: &VoicePipeline, shutdown: &CancellationToken) -> anyhow::Result<()> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;
    tracing::info!(sample_rate = capture.sample_rate(), "listening");

    while !shutdown.is_cancelled() {
        std::thread::sleep(Duration::from_millis(20));
        for frame in capture.take_frames(FRAME_SAMPLES) {
            pipeline.process_audio(&frame);
        }
    }

    capture.stop();
    Ok(())
}

/// Speak text through the pipeline and wait for playback
fn speak(config: &Config, text: &str) -> anyhow::Result<()> {
    let sink: Arc<dyn AudioSink> = Arc::new(AudioPlayback::new()?);
    let pipeline = build_pipeline(config, sink, Arc::new(LogEventSink))?;

    println!("Speaking: \"{text}\"");
    pipeline.speak_text(text)?;
    Ok(())
}

/// Test microphone input
fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        std::thread::sleep(Duration::from_secs(1));

        let samples = capture.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:5} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let sample_rate = 24_000_u32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3 * 32767.0) as i16
        })
        .collect();

    println!(
        "Playing {} samples at {} Hz on {}...",
        samples.len(),
        sample_rate,
        playback.device_name()
    );
    playback.play_chunk(&AudioChunk::new(samples, sample_rate))?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Loop the waiting chime for a while
fn test_chime(config: &Config, earcon: Option<&std::path::Path>, duration: u64) -> anyhow::Result<()> {
    let sink: Arc<dyn AudioSink> = Arc::new(AudioPlayback::new()?);
    let chime = build_chime(config, earcon, sink)?;

    println!("Playing waiting chime for {duration} seconds...");
    chime.start()?;
    std::thread::sleep(Duration::from_secs(duration));
    chime.stop();
    println!("Chime stopped");

    Ok(())
}
