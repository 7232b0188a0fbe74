//! sfsession - play SoundFont notes or MIDI files from the command line.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --soundfont piano.sf2                      # Play an arpeggio
//! cargo run -- --soundfont gm.sf2 --midi song.mid --loop  # Loop a file
//! ```
//!
//! Set `RUST_LOG=sfsession=debug` to follow session lifecycle events.

use anyhow::{Context, Result};
use sfsession::{LoopMode, SessionConfig, SessionHandle, SessionManager};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Command-line options for the demo.
struct CliOptions {
    /// SoundFont to load.
    soundfont: PathBuf,
    /// MIDI file to play instead of the arpeggio.
    midi: Option<PathBuf>,
    /// Loop the MIDI file until interrupted.
    looping: bool,
    bank: u16,
    program: u8,
    /// JSON file with synthesis settings.
    config: Option<PathBuf>,
}

fn usage(program: &str) {
    eprintln!("sfsession - SoundFont session player");
    eprintln!();
    eprintln!("Usage: {} --soundfont PATH [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -sf, --soundfont PATH  SoundFont file to load (.sf2)");
    eprintln!("  -m, --midi PATH        Play a MIDI file instead of an arpeggio");
    eprintln!("  -l, --loop             Repeat the MIDI file until interrupted");
    eprintln!("  -b, --bank N           Initial bank (default 0)");
    eprintln!("  -p, --program N        Initial program (default 0)");
    eprintln!("  -c, --config PATH      JSON file with synthesis settings");
    eprintln!("  -h, --help             Print this help message");
}

/// Returns the argument following a flag.
fn arg_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .with_context(|| format!("{} requires an argument", flag))
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// A bare argument ending in `.sf2` or `.mid` is taken as the
    /// SoundFont or MIDI file.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let program_name = args.first().map(String::as_str).unwrap_or("sfsession");
        let mut soundfont: Option<PathBuf> = None;
        let mut midi: Option<PathBuf> = None;
        let mut looping = false;
        let mut bank = 0u16;
        let mut program = 0u8;
        let mut config: Option<PathBuf> = None;
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--soundfont" | "-sf" => {
                    i += 1;
                    soundfont = Some(PathBuf::from(arg_value(&args, i, "--soundfont")?));
                }
                "--midi" | "-m" => {
                    i += 1;
                    midi = Some(PathBuf::from(arg_value(&args, i, "--midi")?));
                }
                "--loop" | "-l" => looping = true,
                "--bank" | "-b" => {
                    i += 1;
                    bank = arg_value(&args, i, "--bank")?
                        .parse()
                        .context("--bank expects a number")?;
                }
                "--program" | "-p" => {
                    i += 1;
                    program = arg_value(&args, i, "--program")?
                        .parse()
                        .context("--program expects a number")?;
                }
                "--config" | "-c" => {
                    i += 1;
                    config = Some(PathBuf::from(arg_value(&args, i, "--config")?));
                }
                "--help" | "-h" => {
                    usage(program_name);
                    std::process::exit(0);
                }
                other if other.ends_with(".sf2") => soundfont = Some(PathBuf::from(other)),
                other if other.ends_with(".mid") || other.ends_with(".midi") => {
                    midi = Some(PathBuf::from(other))
                }
                other => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        let Some(soundfont) = soundfont else {
            usage(program_name);
            std::process::exit(1);
        };

        Ok(Self {
            soundfont,
            midi,
            looping,
            bank,
            program,
            config,
        })
    }
}

/// Plays a C major arpeggio, one note at a time.
fn play_arpeggio(manager: &SessionManager, handle: SessionHandle) -> Result<()> {
    for key in [60, 64, 67, 72] {
        manager.play_note(handle, 0, key, 100)?;
        thread::sleep(Duration::from_millis(300));
        manager.stop_note(handle, 0, key)?;
    }
    thread::sleep(Duration::from_millis(500));
    manager.stop_all_notes(handle)?;
    Ok(())
}

/// Plays a MIDI file and waits for it to end.
fn play_file(
    manager: &SessionManager,
    handle: SessionHandle,
    midi: &Path,
    loop_mode: LoopMode,
) -> Result<()> {
    manager
        .play_midi_file_with_loop(handle, midi, loop_mode)
        .with_context(|| format!("Failed to play {}", midi.display()))?;
    manager.join_midi_file(handle)?;
    Ok(())
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    tracing::info!(
        latency_ms = config.latency_ms(),
        sample_rate = config.sample_rate,
        "using output configuration"
    );

    let manager = SessionManager::new();
    let handle = manager
        .load_with_config(&cli.soundfont, cli.bank, cli.program, config)
        .with_context(|| format!("Failed to load SoundFont {}", cli.soundfont.display()))?;

    let result = match &cli.midi {
        Some(midi) => play_file(&manager, handle, midi, LoopMode::from(cli.looping)),
        None => play_arpeggio(&manager, handle),
    };

    manager.dispose();
    result
}
