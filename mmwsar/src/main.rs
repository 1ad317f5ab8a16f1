mod cli;
mod commands;

use clap::Parser;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::process::ExitCode;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::cli::{Cli, Commands};
use crate::commands::{run_image, run_inspect, run_repack};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = TermLogger::init(
        cli.loglevel,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("Couldn't set up logging: {e}");
    }

    // Set up the `running` flag for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);

    // Set up CTRL+C handler; assembly stops at the next scan row
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("Error setting Ctrl-C handler: {}", e);
    }

    let result = match cli.command {
        Commands::Repack(args) => run_repack(args, &running),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Image(args) => run_image(args, &running),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
