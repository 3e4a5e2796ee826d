mod commands;

use buildout_core::install_signal_handler;
use clap::{ArgAction, Parser, Subcommand};
use commands::{GlobalOptions, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "buildout",
    version,
    about = "Assemble software from a declarative, part-based configuration"
)]
struct Cli {
    /// Configuration file to use.
    #[arg(
        id = "config_file",
        short = 'c',
        long = "config-file",
        default_value = "buildout.cfg",
        global = true
    )]
    config: PathBuf,

    /// Set an option, as `section:option=value`. `+=` and `-=` edit the
    /// inherited value. May be repeated.
    #[arg(short = 's', long = "set", value_name = "SECTION:OPTION=VALUE", global = true)]
    set: Vec<String>,

    /// Increase logging output (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Enable trace-level logging.
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Only use distributions already available locally.
    #[arg(short = 'o', long, default_value_t = false, global = true)]
    offline: bool,

    /// Keep present distributions instead of looking for newer ones.
    #[arg(short = 'N', long, default_value_t = false, global = true)]
    no_newest: bool,

    /// Ignore the user defaults file.
    #[arg(long, default_value_t = false, global = true)]
    no_user_defaults: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install, update and uninstall parts to match the configuration.
    Apply {
        /// Only process these parts (and the parts they depend on).
        parts: Vec<String>,
    },
    /// Create the standard buildout directories.
    Bootstrap,
    /// Write a minimal configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Show the resolved configuration or the installed state.
    Inspect {
        /// Print every resolved option with where its value came from.
        #[arg(long, default_value_t = false)]
        config: bool,
        /// Print installed parts, their signatures and recorded paths.
        #[arg(long, default_value_t = false)]
        state: bool,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BUILDOUT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let mut assignments = cli.set;
    if cli.offline {
        assignments.push("buildout:offline=true".to_owned());
    }
    if cli.no_newest {
        assignments.push("buildout:newest=false".to_owned());
    }
    let options = match GlobalOptions::new(cli.config, &assignments, !cli.no_user_defaults, cli.json)
    {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let result = match cli.command {
        Commands::Apply { parts } => commands::apply::run(&options, &parts),
        Commands::Bootstrap => commands::bootstrap::run(&options),
        Commands::Init { force } => commands::init::run(&options, force),
        Commands::Inspect { config, state } => commands::inspect::run(&options, config, state),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
