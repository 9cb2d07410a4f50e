pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "rulegate",
    about = "Rulegate operator CLI",
    long_about = "Operate Rulegate migrations, retention sweeps, and readiness checks.",
    after_help = "Examples:\n  rulegate migrate\n  rulegate sweep\n  rulegate doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Delete expired nonces and purge audit events past the retention window"
    )]
    Sweep,
    #[command(about = "Validate config, signing-secret readiness, DB connectivity, and the engine endpoint")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

fn init_logging(config: &rulegate_core::config::AppConfig) {
    use rulegate_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Commands re-load and report config problems themselves; a failed
    // load here only means logging stays at its defaults.
    if let Ok(config) =
        rulegate_core::config::AppConfig::load(rulegate_core::config::LoadOptions::default())
    {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Sweep => commands::sweep::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
