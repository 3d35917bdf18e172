use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use memtrace::cli::{Cli, OutputFormat};
use memtrace::config::Config;
use memtrace::error::TraceError;
use memtrace::profile::ProfileAggregate;
use memtrace::server::StatsServer;
use memtrace::session::{TargetOutput, TraceSession};
use memtrace::summary::print_summary;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Run the target and decide which profile, if any, goes on
fn trace(args: &Cli, config: &Config) -> Result<(ProfileAggregate, ExitCode)> {
    let target_stdout = match args.format {
        OutputFormat::Json => TargetOutput::Stderr,
        OutputFormat::Text => TargetOutput::Inherit,
    };
    let trace_config = config.trace_config(target_stdout)?;
    let session = TraceSession::new(args.command.clone(), trace_config);

    match session.run() {
        Ok(profile) => Ok((profile, ExitCode::SUCCESS)),
        Err(TraceError::TargetFailed { status, partial }) if args.serve_partial => {
            eprintln!(
                "[memtrace: target failed ({}), keeping {} recorded events]",
                status,
                partial.total_events()
            );
            let code = u8::try_from(status.exit_code()).unwrap_or(1);
            Ok((*partial, ExitCode::from(code)))
        }
        Err(e) => Err(e).context(format!("Failed to trace {}", args.command.join(" "))),
    }
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let mut config =
        Config::discover(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_cli(&args);

    let (profile, exit_code) = trace(&args, &config)?;

    if args.format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&profile).context("Failed to serialize profile")?;
        println!("{}", json);
        return Ok(exit_code);
    }

    print_summary(&profile);
    if args.no_serve {
        return Ok(exit_code);
    }

    let mut server = StatsServer::start(&config.server_config(), profile)
        .context("Failed to start stats endpoint")?;
    eprintln!("[memtrace: serving profile at {}]", server.url());
    if args.once {
        eprintln!("[memtrace: will stop after the first request]");
    } else {
        eprintln!("[memtrace: press Ctrl-C to stop]");
    }
    server.wait(args.once)?;

    Ok(exit_code)
}
