use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use parley::api::ApiServerBuilder;
use parley::providers::{
    ConversationClient, GatewayClient, SpeechSynthesizer, TranscriptionClient,
};
use parley::voice::{AudioCapture, AudioPlayback, Microphone, PLAYBACK_SAMPLE_RATE, Speaker};
use parley::{Config, Error, SessionEvent, SessionState, Toggle, VoiceSession, VoiceSessionBuilder};

/// Parley - push-to-talk voice conversations with an AI language teacher
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway in front of the speech and chat providers
    Serve {
        /// Port to listen on
        #[arg(long, env = "PARLEY_PORT")]
        port: Option<u16>,
    },
    /// Talk to the assistant: Enter starts and stops recording, q quits
    Talk {
        /// Call the provider APIs directly instead of a gateway
        #[arg(long)]
        direct: bool,

        /// Gateway to use when not in direct mode
        #[arg(long, env = "PARLEY_GATEWAY_URL")]
        gateway_url: Option<String>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hallo! Wie geht es dir? This is a test of the speech output.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Serve { port } => serve(config, port).await,
        Command::Talk {
            direct,
            gateway_url,
        } => talk(config, direct, gateway_url).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

/// Run the gateway until interrupted
async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.server.port);

    let server = ApiServerBuilder::new(
        Arc::new(config.speech_to_text()?),
        Arc::new(config.chat_completion()?),
        Arc::new(config.text_to_speech()?),
    )
    .port(port)
    .build();

    tracing::info!(port, persona = %config.persona.name, "starting parley gateway");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

type Collaborators = (
    Arc<dyn TranscriptionClient>,
    Arc<dyn ConversationClient>,
    Arc<dyn SpeechSynthesizer>,
);

fn collaborators(
    config: &Config,
    direct: bool,
    gateway_url: Option<String>,
) -> anyhow::Result<Collaborators> {
    if direct {
        tracing::info!("calling provider APIs directly");
        let transcriber: Arc<dyn TranscriptionClient> = Arc::new(config.speech_to_text()?);
        let conversation: Arc<dyn ConversationClient> = Arc::new(config.chat_completion()?);
        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(config.text_to_speech()?);
        return Ok((transcriber, conversation, synthesizer));
    }

    let url = gateway_url.unwrap_or_else(|| config.server.gateway_url.clone());
    tracing::info!(%url, "using gateway");
    let gateway = Arc::new(GatewayClient::new(url)?);

    let transcriber: Arc<dyn TranscriptionClient> = gateway.clone();
    let conversation: Arc<dyn ConversationClient> = gateway.clone();
    let synthesizer: Arc<dyn SpeechSynthesizer> = gateway;
    Ok((transcriber, conversation, synthesizer))
}

/// Interactive voice session on the default microphone and speaker
#[allow(clippy::future_not_send)]
async fn talk(config: Config, direct: bool, gateway_url: Option<String>) -> anyhow::Result<()> {
    let (transcriber, conversation, synthesizer) = collaborators(&config, direct, gateway_url)?;
    let speaker = Speaker::new(synthesizer, AudioPlayback::new()?);

    let session = VoiceSessionBuilder::new(
        Box::new(Microphone::new()?),
        transcriber,
        conversation,
        Arc::new(speaker),
    )
    .timeouts(config.timeouts)
    .build();

    tokio::spawn(print_events(session.subscribe()));

    println!("Press Enter to start recording, Enter again to stop. Type q to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim() != "q" => {
                    if !toggle(&session, &mut lines).await? {
                        break;
                    }
                }
                _ => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown();
    println!("Bye!");
    Ok(())
}

/// Run one toggle, still reacting to input while a reply is in flight
///
/// Returns `false` when the user asked to quit.
#[allow(clippy::future_not_send)]
async fn toggle(
    session: &VoiceSession,
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
) -> anyhow::Result<bool> {
    let pending = session.toggle();
    tokio::pin!(pending);

    loop {
        tokio::select! {
            result = &mut pending => {
                report(result);
                return Ok(true);
            }
            line = lines.next_line() => match line? {
                Some(line) if line.trim() != "q" => report(session.toggle().await),
                _ => {
                    session.shutdown();
                    return Ok(false);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                session.shutdown();
                return Ok(false);
            }
        }
    }
}

fn report(result: parley::Result<Toggle>) {
    match result {
        Ok(Toggle::Recording) => {}
        Ok(Toggle::Replied(exchange)) => {
            println!("you:       {}", exchange.user.content);
            println!("assistant: {}\n", exchange.assistant.content);
        }
        Err(Error::Busy { state }) => println!("(busy: {state}, wait for the reply)"),
        Err(Error::Cancelled) => {}
        Err(e) => println!("error: {e}\n"),
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged { to, .. }) => match to {
                SessionState::Capturing => println!("● recording... (Enter to stop)"),
                SessionState::Transcribing => println!("… transcribing"),
                SessionState::Generating => println!("… thinking"),
                SessionState::Speaking => println!("♪ speaking"),
                SessionState::Idle => {}
            },
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut microphone = Microphone::new()?;
    microphone.start_recording()?;

    println!("Sample rate: {} Hz", microphone.sample_rate());
    println!("---");

    let mut total = 0usize;
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = microphone.peek_samples();
        total += samples.len();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);

        microphone.clear_samples();
    }

    microphone.release();

    println!("\n---");
    println!("Captured {total} samples.");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    playback.play(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output with the configured provider
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = config.text_to_speech()?;
    let playback = AudioPlayback::new()?;

    println!("Synthesizing speech...");
    let audio = tts.synthesize(text).await?;
    println!("Received {} bytes of {}", audio.len(), audio.encoding());

    println!("Playing...");
    playback.play_blob(audio).await?;

    println!("\n---");
    println!("TTS test complete!");

    Ok(())
}
