//! Rostrum CLI.
//!
//! Usage:
//!   rostrum init [name]
//!   rostrum run [prompt] [-f blueprint.yaml] [--debug] [--log path] [--tui]
//!   rostrum version

use clap::{Parser, Subcommand};
use rostrum_blueprint::{starter_template, Blueprint};
use rostrum_floor::{ConsoleFrontend, Coordinator};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rostrum", about = "Compose and run multi-agent floors")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new blueprint
    Init {
        /// Floor name written into the blueprint
        name: Option<String>,
    },

    /// Run a floor
    Run {
        /// One-shot prompt; omits the interactive loop
        prompt: Option<String>,

        /// Blueprint file
        #[arg(short = 'f', long = "file", default_value = "blueprint.yaml")]
        file: String,

        /// Enable debug output
        #[arg(long)]
        debug: bool,

        /// Log the session to a plain-text file
        #[arg(long)]
        log: Option<String>,

        /// Use the terminal UI frontend (falls back to the console when
        /// the TUI is not bundled)
        #[arg(long)]
        tui: bool,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let debug = matches!(&cli.command, Command::Run { debug: true, .. });
    let default_filter = if debug {
        "warn,rostrum_floor=debug,rostrum_acp=debug,rostrum_llm=debug,\
         rostrum_furniture=debug,rostrum_api=debug,rostrum_sandbox=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Init { name } => init(name.as_deref()),
        Command::Run {
            prompt,
            file,
            debug,
            log,
            tui,
        } => run(prompt, &file, debug, log.as_deref(), tui).await,
        Command::Version => {
            println!("rostrum {}", env!("CARGO_PKG_VERSION"));
        }
    }
}

fn init(name: Option<&str>) {
    let name = name.unwrap_or("my-floor");
    let filename = "blueprint.yaml";

    if Path::new(filename).exists() {
        eprintln!("Error: {filename} already exists");
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(filename, starter_template(name)) {
        eprintln!("Error creating blueprint: {e}");
        std::process::exit(1);
    }

    println!("Created {filename}");
    println!("Run with: rostrum run");
}

async fn run(prompt: Option<String>, file: &str, debug: bool, log: Option<&str>, tui: bool) {
    let blueprint = match Blueprint::load(file) {
        Ok(bp) => Arc::new(bp),
        Err(e) => {
            eprintln!("Error loading blueprint: {e}");
            eprintln!("Create one with: rostrum init");
            std::process::exit(1);
        }
    };

    if tui {
        tracing::warn!("TUI frontend not bundled in this build; using the console");
    }

    let frontend = ConsoleFrontend::new(log, debug);
    let mut coordinator = Coordinator::new(
        blueprint,
        Box::new(frontend.clone()),
        Arc::new(frontend),
    );

    if let Err(e) = coordinator.run(prompt).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
