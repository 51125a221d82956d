mod config;

use crate::config::StencilConfig;
use anyhow::{Context, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::io::{self, IsTerminal, Read};
use stencil_core::dispatcher::ExtensionDispatcher;
use stencil_core::file_storage::FileStorage;
use stencil_core::pattern::PatternEntity;

#[derive(Parser, Debug)]
#[command(version,
display_name = "stencil",
bin_name = "stencil",
about="Resolve prompt patterns with variables and extensions",
long_about="Resolve prompt patterns with variables, input and extension calls", )]
struct Args {
    /// Overrides the configured default patterns directory
    #[arg(short = 'p', long)]
    patterns_dir: Option<String>,

    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Resolve a pattern by name or file path
    Resolve {
        pattern: String,
        #[arg(short = 'v', long = "var", value_parser = parse_variable)]
        vars: Vec<(String, String)>,
        /// Input text; read from stdin when omitted
        #[arg(short = 'i', long)]
        input: Option<String>,
        /// Only substitute {{input}}
        #[arg(short = 'r', long)]
        raw: bool,
        #[arg(short = 'c', long)]
        copy: bool,
    },
    /// List all pattern names
    List,
    /// Show the most recently added patterns
    Latest {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Save a pattern into the default patterns directory
    Save {
        name: String,
        #[arg(short = 'c', long, conflicts_with = "file")]
        content: Option<String>,
        #[arg(short = 'f', long)]
        file: Option<String>,
    },
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn parse_variable(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn read_input(input: Option<String>) -> anyhow::Result<String> {
    match input {
        Some(input) => Ok(input),
        None if !io::stdin().is_terminal() => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer).context("Failed to read input from stdin")?;
            Ok(buffer)
        },
        None => Ok(String::new()),
    }
}

fn copy_to_clipboard(text: &str) -> anyhow::Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("Clipboard unavailable")?;
    clipboard.set_text(text).context("Failed to copy to clipboard")?;
    Ok(())
}

fn build_entity(config: &StencilConfig, patterns_dir: Option<String>) -> anyhow::Result<PatternEntity<FileStorage, ExtensionDispatcher>> {
    let registry = config
        .registry()
        .with_context(|| format!("Failed to load extensions from {}", config.extensions_file))?;
    let dispatcher = ExtensionDispatcher::new(registry).context("Failed to start extension runtime")?;
    debug!("loaded {} extension(s)", dispatcher.registry().names().len());

    Ok(PatternEntity::new(config.storage(patterns_dir), dispatcher))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if let Commands::Completions { shell } = &args.cmd {
        clap_complete::generate(*shell, &mut Args::command(), "stencil", &mut io::stdout());
        return Ok(());
    }

    let config = match StencilConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: Problem loading config: {}. Exiting...", err);
            std::process::exit(exitcode::CONFIG);
        }
    };
    let entity = build_entity(&config, args.patterns_dir.clone())?;

    match args.cmd {
        Commands::Resolve { pattern, vars, input, raw, copy } => {
            let input = read_input(input)?;
            let resolved = if raw {
                entity.resolve_input_only(&pattern, &input)?
            } else {
                let variables: HashMap<String, String> = vars.into_iter().collect();
                entity.resolve(&pattern, &variables, &input)?
            };

            println!("{}", resolved.text);
            if copy {
                copy_to_clipboard(&resolved.text)?;
            }
        },
        Commands::List => {
            let names = entity.list_names()?;
            if names.is_empty() {
                eprintln!("No patterns");
            }
            for name in names {
                println!("{}", name);
            }
        },
        Commands::Latest { count } => {
            for name in entity.latest_names(count)? {
                println!("{}", name);
            }
        },
        Commands::Save { name, content, file } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(file)) => fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file))?,
                (None, None) => bail!("either --content or --file is required"),
            };
            entity.save(&name, &content)?;
        },
        Commands::Completions { .. } => {},
    }

    Ok(())
}
