mod cli;
mod config;
mod error;
mod logging;
mod pipeline;
mod service;

use std::process::ExitCode;

use clap::Parser;

use cli::{Cli, Command};
use logging::{init_logger, run_with_accounting};
use pipeline::{batch, training};

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = init_logger(args.log_file.as_deref()) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let result = match &args.command {
        Command::Classify(classify) => run_with_accounting("classify", || batch::run(classify)),
        Command::Train(train) => run_with_accounting("train", || {
            let config = train.resolve()?;
            log::info!("training configuration: {config:?}");
            training::run_training(&config)?;
            Ok(())
        }),
        Command::Compare(train) => run_with_accounting("compare", || {
            let config = train.resolve()?;
            training::run_comparison(&config)?;
            Ok(())
        }),
        Command::Serve(serve) => run_with_accounting("serve", || service::run(serve)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
