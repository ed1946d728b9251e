use std::{
    fs::File,
    io::{self, BufReader, Write},
    process,
};

use serde::Serialize;
use staticfile_cache::{
    application::{error::AppError, replay::Replay},
    cache::{CacheConfig, Clock, SystemClock},
    config,
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) =
        config::load_with_cli().map_err(|err| AppError::from(InfraError::from(err)))?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Replay(args) => {
            let cache_config = CacheConfig::from(&settings.cache);
            let start = args.start_time.unwrap_or_else(|| SystemClock.now());
            let replay = Replay::new(&cache_config, start);

            let file = File::open(&args.file).map_err(InfraError::from)?;
            info!(file = %args.file.display(), start, "Replaying scenario");
            let reports = replay.run(BufReader::new(file)).await?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            for report in &reports {
                write_json_line(&mut out, report)?;
            }
            write_json_line(&mut out, &replay.summary())?;
        }
    }

    Ok(())
}

fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), AppError> {
    let line = serde_json::to_string(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    writeln!(out, "{line}").map_err(InfraError::from)?;
    Ok(())
}
