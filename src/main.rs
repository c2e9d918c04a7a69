use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::exit;
use tracing::info;

use r_n64::core::config::{Config, ExecutionMode};
use r_n64::core::emu::{EMU_BUILD_DATE_TIME, EMU_NAME, EMU_VERSION};
use r_n64::core::rsp::NopRspBackend;
use r_n64::harness::Harness;
use r_n64::log;

#[derive(Parser)]
#[command(name = EMU_NAME, version, about = "Cycle-budgeted N64 CPU/RSP core and its golden-master harness")]
struct Args {
    /// Test name; `<test_name>.bin` is loaded into SP IMEM
    test_name: String,
    /// Bytes of `<test_name>.<subtest>.input` copied into DMEM
    input_size: usize,
    /// Bytes of DMEM compared against `<test_name>.<subtest>.golden`
    output_size: usize,
    /// Subtests to run
    subtests: Vec<String>,
    /// ROM image mapped at the cartridge base
    #[arg(long)]
    rom: Option<PathBuf>,
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured execution mode
    #[arg(long, value_enum)]
    mode: Option<ExecutionMode>,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{}", err);
                exit(2);
            }
        },
        None => Config::default(),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    let _logger = log::Logger::new(&config.log_level);
    info!(
        "Welcome to {} v{} compiled on {}",
        EMU_NAME, EMU_VERSION, EMU_BUILD_DATE_TIME
    );

    let rom = match &args.rom {
        Some(path) => match fs::read(path) {
            Ok(rom) => Some(rom),
            Err(err) => {
                eprintln!("cannot read ROM {:?}: {}", path, err);
                exit(2);
            }
        },
        None => None,
    };

    let harness = Harness {
        test_name: args.test_name.clone(),
        input_size: args.input_size,
        output_size: args.output_size,
        rom,
        config,
    };
    exit(harness.run(&args.subtests, || Box::new(NopRspBackend::new())));
}
