use std::path::PathBuf;

use clap::Parser;
use tracing::debug;

use minidbg::debugger::Debugger;
use minidbg::errors::DebuggerError;
use minidbg::ui::cli::CliUi;

/// Source-level debugger for x86-64 Linux executables
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to debug
    program: PathBuf,
}

fn main() -> Result<(), DebuggerError> {
    setup_logger();
    debug!("set up the logger");

    let args = Args::parse();

    let ui = CliUi::build()?;
    let mut debugger = Debugger::build(ui)?;
    debugger.launch(&args.program, &[])?;
    debugger.run_debugger()?;
    debugger.cleanup()?;

    Ok(())
}

fn setup_logger() {
    // formatted traces to stdout, no timestamps
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
