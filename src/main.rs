use clap::error::ErrorKind;
use clap::Parser;
use std::io;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

mod audio;
mod cli;
mod emit;
mod error;
mod gain;
mod ramp;

use audio::{AudioFile, FrameSource};
use cli::Cli;
use error::Result;
use gain::GainAnalysis;
use ramp::{RampExtractor, CHUNK_SECONDS};

static VERBOSE: AtomicBool = AtomicBool::new(false);

// stdout carries only the tags, so verbose output goes to stderr
macro_rules! veprintln {
    ($($arg:tt)*) => {
        if $crate::VERBOSE.load(::std::sync::atomic::Ordering::Relaxed) {
            eprintln!($($arg)*);
        }
    };
}

// Re-export the macro for use in submodules
pub(crate) use veprintln;

// ─── main ────────────────────────────────────────────────────────────────────

fn main() {
    // Handle Ctrl+C
    ctrlc_handler();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // clap exits with 2 on misuse; this tool uses 1
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            process::exit(code);
        }
    };

    if cli.verbose {
        VERBOSE.store(true, Ordering::Relaxed);
    }

    if let Err(e) = run(&cli) {
        eprintln!("{}: {}", env!("CARGO_PKG_NAME"), e);
        process::exit(e.exit_code());
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut file = AudioFile::open(&cli.path)?;
    let extractor = RampExtractor::new(&file)?;
    let mut engine = GainAnalysis::new(file.sample_rate())?;

    veprintln!("分块大小: {} 帧 ({} 秒)", extractor.chunk_frames(), CHUNK_SECONDS);

    let ramps = extractor.run(&mut file, &mut engine)?;

    veprintln!("已分析 {} 个分块", ramps.chunks);
    if ramps.start.is_empty() {
        veprintln!("没有分块达到 {} dB", ramp::LADDER[0]);
    }
    if let Some(gain) = engine.album_gain() {
        veprintln!("整轨 ReplayGain: {:.2} dB", gain);
    }

    let stdout = io::stdout();
    emit::write_tags(&mut stdout.lock(), &ramps)?;
    Ok(())
}

fn ctrlc_handler() {
    let _ = ctrlc::set_handler(|| {
        eprintln!("\n检测到中断，正在退出...");
        process::exit(1);
    });
}
