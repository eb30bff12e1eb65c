use voice_staff::config::Config;
use voice_staff::device::WavSource;
use voice_staff::editor::Editor;
use voice_staff::error::EditorError;
use voice_staff::session;
use voice_staff::simulator::VoiceSimulator;
use voice_staff::tone::{LogSink, WavRenderer};
use voice_staff::types::*;
#[cfg(feature = "audio")]
use voice_staff::audio_input::LiveInput;
#[cfg(feature = "audio")]
use voice_staff::tone::{SpeakerSink, ToneSink};

use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use std::path::PathBuf;

/// Sample rate for the voice simulator and rendered WAV files.
const SAMPLE_RATE: u32 = 48000;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PlayMode {
    /// Proportional to x position over the whole staff
    Timeline,
    /// One note after another at a fixed delay
    Section,
}

#[derive(Parser)]
#[command(name = "voice-staff")]
#[command(about = "Note staff editor with voice-driven pitch correction")]
struct Cli {
    /// JSON config file (recorder and playback knobs)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session file to load (JSONL). Without one, a short demo phrase is used.
    #[arg(long)]
    session: Option<PathBuf>,

    /// Write the session here when done
    #[arg(long)]
    save: Option<PathBuf>,

    /// Analyse a recorded voice take from a WAV file (takes precedence over
    /// the other capture sources)
    #[arg(long)]
    audio_file: Option<PathBuf>,

    /// Analyse a synthetic voice singing a script, e.g. "C5:400,E5:400,-:200"
    #[arg(long)]
    simulate: Option<String>,

    /// Record from the default microphone for this many seconds
    #[cfg(feature = "audio")]
    #[arg(long)]
    live_secs: Option<f32>,

    /// Override the recorder sensitivity (0.0–2.0)
    #[arg(long)]
    sensitivity: Option<f32>,

    /// Apply the proposed corrections to the notes
    #[arg(long)]
    apply: bool,

    /// Play the active section after analysis
    #[arg(long, value_enum)]
    play: Option<PlayMode>,

    /// Render playback to a WAV file instead of logging tones
    #[arg(long)]
    render: Option<PathBuf>,

    /// Sound playback on the default output device
    #[cfg(feature = "audio")]
    #[arg(long)]
    speaker: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    info!("═══════════════════════════════════════════════");
    info!("  VOICE STAFF v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════════════");

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), EditorError> {
    let mut config = cli
        .config
        .as_deref()
        .and_then(Config::load)
        .unwrap_or_default();
    if let Some(s) = cli.sensitivity {
        config.recorder.sensitivity = s;
        config = config.validated();
    }

    let mut editor = match &cli.session {
        Some(path) => session::load(path, config)?,
        None => demo_editor(config)?,
    };
    for note in editor.active_section().sorted_notes() {
        info!("  {}", note);
    }

    let recorded = record(&cli, &mut editor)?;
    if recorded {
        info!("Take: {} pitch samples", editor.contour().len());
        let proposals = editor.analyze()?;
        if proposals.is_empty() {
            warn!("No corrections proposed (silent take or empty section)");
        }
        for p in proposals {
            info!("  {}", p);
        }
        if cli.apply {
            let report = editor.apply_corrections()?;
            info!(
                "Applied {} corrections ({} stale)",
                report.applied.len(),
                report.stale.len()
            );
            for note in editor.active_section().sorted_notes() {
                info!("  {}", note);
            }
        }
    }

    if let Some(mode) = cli.play {
        play(&cli, &mut editor, mode)?;
    }

    if let Some(path) = &cli.save {
        session::save(&editor, path)?;
    }
    Ok(())
}

/// The phrase a fresh editor opens with.
fn demo_editor(config: Config) -> Result<Editor, EditorError> {
    let mut editor = Editor::new(config);
    for (x, y) in [(120.0, 120.0), (200.0, 100.0), (280.0, 140.0), (400.0, 120.0)] {
        editor.add_note(x, y, NoteKind::Quarter)?;
    }
    Ok(editor)
}

/// Run whichever capture source was requested. Returns whether a take was
/// recorded.
fn record(cli: &Cli, editor: &mut Editor) -> Result<bool, EditorError> {
    if let Some(path) = &cli.audio_file {
        let source = WavSource::open(path)?;
        let duration = source.duration_ms();
        editor.record_offline(Box::new(source), duration)?;
        return Ok(true);
    }
    if let Some(script) = &cli.simulate {
        let sim = VoiceSimulator::from_script(script, SAMPLE_RATE)?;
        let duration = sim.total_ms();
        editor.record_offline(Box::new(sim), duration)?;
        return Ok(true);
    }
    #[cfg(feature = "audio")]
    if let Some(secs) = cli.live_secs {
        record_live(editor, secs)?;
        return Ok(true);
    }
    Ok(false)
}

#[cfg(feature = "audio")]
fn record_live(editor: &mut Editor, secs: f32) -> Result<(), EditorError> {
    use std::thread;
    use std::time::Duration;

    let clock = SessionClock::new();
    let interval = Duration::from_millis(editor.config().recorder.frame_interval_ms);
    let stop_at = (secs.max(0.0) * 1000.0) as u64;

    editor.start_recording(Box::new(LiveInput::new()), clock.now_ms())?;
    info!("Sing now ({:.1}s)...", secs);
    while editor.recording_step(clock.now_ms()) {
        if clock.now_ms() >= stop_at {
            editor.stop_recording();
            break;
        }
        thread::sleep(interval);
    }
    Ok(())
}

fn play(cli: &Cli, editor: &mut Editor, mode: PlayMode) -> Result<(), EditorError> {
    #[cfg(feature = "audio")]
    if cli.speaker {
        let mut speaker = SpeakerSink::open()?;
        return play_realtime(editor, mode, &mut speaker);
    }

    start(editor, mode, 0);
    match &cli.render {
        Some(path) => {
            let mut renderer = WavRenderer::new(SAMPLE_RATE);
            while let Some(t) = editor.next_playback_deadline() {
                renderer.seek_ms(t);
                editor.playback_poll(t, &mut renderer);
            }
            // The last deadline is the end of the run
            renderer.extend_to_ms(renderer.cursor_ms());
            renderer.write(path)?;
        }
        None => {
            let mut sink = LogSink::new();
            while let Some(t) = editor.next_playback_deadline() {
                editor.playback_poll(t, &mut sink);
            }
            info!("{} tones played", sink.count());
        }
    }
    Ok(())
}

fn start(editor: &mut Editor, mode: PlayMode, now_ms: u64) {
    match mode {
        PlayMode::Timeline => editor.play_timeline(now_ms),
        PlayMode::Section => editor.play_section(now_ms),
    };
}

#[cfg(feature = "audio")]
fn play_realtime(
    editor: &mut Editor,
    mode: PlayMode,
    sink: &mut dyn ToneSink,
) -> Result<(), EditorError> {
    use std::thread;
    use std::time::Duration;

    let clock = SessionClock::new();
    start(editor, mode, clock.now_ms());
    while editor.is_playing() {
        editor.playback_poll(clock.now_ms(), sink);
        thread::sleep(Duration::from_millis(5));
    }
    // Let the last tones ring out before the stream is dropped
    thread::sleep(Duration::from_millis(1500));
    Ok(())
}
