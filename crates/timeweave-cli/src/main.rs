use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "timeweave", version, about = "Timeweave calendar scheduling CLI")]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan versions: branch, optimize, activate, revert
    Plan {
        #[command(subcommand)]
        action: commands::plan::PlanAction,
    },
    /// Tasks of the active plan
    Task {
        #[command(subcommand)]
        action: commands::task::TaskAction,
    },
    /// Scheduled events
    Event {
        #[command(subcommand)]
        action: commands::event::EventAction,
    },
    /// Weekly availability and blocked dates
    Availability {
        #[command(subcommand)]
        action: commands::availability::AvailabilityAction,
    },
    /// Reschedule queue
    Queue {
        #[command(subcommand)]
        action: commands::queue::QueueAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TIMEWEAVE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    let result = match cli.command {
        Commands::Plan { action } => commands::plan::run(action, json),
        Commands::Task { action } => commands::task::run(action, json),
        Commands::Event { action } => commands::event::run(action, json),
        Commands::Availability { action } => commands::availability::run(action, json),
        Commands::Queue { action } => commands::queue::run(action, json),
        Commands::Config { action } => commands::config::run(action, json),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "timeweave", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
