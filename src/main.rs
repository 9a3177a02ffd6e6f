//! # Control Mapper CLI (`cmap`)
//!
//! ## Usage
//!
//! ```bash
//! cmap --config ./config/cmap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cmap index` | Scan the repository and build the evidence index |
//! | `cmap search "<query>"` | Show the evidence a query retrieves |
//! | `cmap generate <controls.json>` | Generate control mapping records |
//! | `cmap check [file]` | Check an output file for structural problems |
//! | `cmap completions <shell>` | Print shell completions |
//!
//! `generate` and `check` exit with status 1 when the batch contains a
//! duplicate identifier or a control that could not be generated.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Generator, Shell};
use std::path::PathBuf;

use control_mapper::commands;
use control_mapper::config;
use control_mapper::logging;
use control_mapper::progress::ProgressMode;

/// Control Mapper: map repository evidence to compliance controls.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cmap.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cmap",
    about = "Map repository evidence to compliance control implementations",
    version,
    long_about = "Control Mapper segments a repository into evidence units, embeds them into a \
    vector index, and drafts a validated implementation record for each compliance control \
    from the evidence its requirement retrieves."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cmap.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the repository and build the evidence index.
    ///
    /// Replaces any previous index in `[index] output_dir`.
    Index,

    /// Show the evidence retrieved for a query.
    Search {
        /// Query text, e.g. a control requirement.
        query: String,

        /// Results per index (defaults to `[retrieval] top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Also include units the hint table tags with this control id.
        #[arg(long)]
        control: Option<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate control mapping records for every control in a file.
    ///
    /// The file is a JSON array of `{id, title, statement, parameters}`.
    Generate {
        /// Path to the controls file.
        controls: PathBuf,
    },

    /// Check an output file for missing fields and duplicate ids.
    Check {
        /// Defaults to `<output_dir>/implemented_requirements.json`.
        file: Option<PathBuf>,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn print_completion<G: Generator>(generator: G) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    generate(generator, &mut command, name, &mut std::io::stdout());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        print_completion(shell);
        return Ok(());
    }

    logging::init_tracing(cli.log_json);
    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    let cfg = config::load_config(&cli.config)?;

    let ok = match cli.command {
        Commands::Index => {
            commands::run_index(&cfg, progress.as_ref()).await?;
            true
        }
        Commands::Search {
            query,
            k,
            control,
            json,
        } => {
            commands::run_search(&cfg, &query, k, control.as_deref(), json).await?;
            true
        }
        Commands::Generate { controls } => {
            let command_line = std::env::args().collect::<Vec<_>>().join(" ");
            commands::run_generate(&cfg, &controls, command_line, progress.as_ref()).await?
        }
        Commands::Check { file } => commands::run_check(&cfg, file.as_deref())?,
        Commands::Completions { .. } => true,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
