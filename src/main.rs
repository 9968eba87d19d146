// file: src/main.rs
// description: commandline application entry point with command handling
// reference: application bootstrap and orchestration

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use framestack::utils::logging::{format_info, format_success, format_warning};
use framestack::{Config, DataStore, Pipeline, RawCubeWriter, Recipe};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "framestack")]
#[command(version = "0.1.0")]
#[command(about = "Modular data-reduction pipeline for large image stacks", long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config/default.toml"
    )]
    config: PathBuf,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    color: bool,

    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace directory and a default configuration file
    Init,

    /// List the datasets in storage with their shapes and attributes
    Info,

    /// Run a recipe file against the workspace
    Run {
        #[arg(short, long, value_name = "FILE")]
        recipe: PathBuf,
    },

    /// Delete a dataset and its attributes from storage
    Delete {
        /// Tag of the dataset to remove
        tag: String,

        #[arg(long)]
        confirm: bool,
    },

    /// Export a dataset to a raw cube file with a JSON attribute sidecar
    Export {
        /// Tag of the dataset to export
        tag: String,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    framestack::utils::logging::init_logger(cli.color, cli.verbose);

    if matches!(cli.command, Commands::Init) {
        return cmd_init(&cli.config);
    }

    let config = if cli.config.exists() {
        Config::load(Some(cli.config.as_path())).context("Failed to load configuration")?
    } else {
        warn!(
            "Config file {} not found, using default configuration",
            cli.config.display()
        );
        Config::load(None).unwrap_or_else(|e| {
            warn!("Falling back to built-in defaults: {}", e);
            Config::default_config()
        })
    };

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Info => cmd_info(&config)?,
        Commands::Run { recipe } => cmd_run(&config, &recipe)?,
        Commands::Delete { tag, confirm } => cmd_delete(&config, &tag, confirm)?,
        Commands::Export { tag, output } => cmd_export(&config, &tag, output)?,
    }

    Ok(())
}

fn cmd_init(config_path: &PathBuf) -> Result<()> {
    if config_path.exists() {
        println!(
            "{}",
            format_warning(&format!(
                "Config file {} already exists, leaving it untouched",
                config_path.display()
            ))
        );
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = Config::default_config();
    let default_toml = format!(
        "[workspace]\n\
         path = \"{}\"\n\
         \n\
         [processing]\n\
         chunk_size = {}\n\
         memory_budget_mb = {}\n\
         default_dtype = \"{}\"\n",
        config.workspace.path.display(),
        config.processing.chunk_size,
        config.processing.memory_budget_mb,
        config.processing.default_dtype.name(),
    );
    std::fs::write(config_path, default_toml)?;

    // Materialize the workspace so later commands find it in place
    let mut store = DataStore::new(&config.workspace.path);
    store.tags()?;
    store.close()?;

    println!(
        "{}",
        format_success(&format!(
            "Initialized workspace {} and wrote {}",
            config.workspace.path.display(),
            config_path.display()
        ))
    );

    Ok(())
}

fn cmd_info(config: &Config) -> Result<()> {
    let mut store = DataStore::new(&config.workspace.path);
    let tags = store.tags()?;

    if tags.is_empty() {
        println!(
            "{}",
            format_info(&format!(
                "Workspace {} holds no datasets",
                config.workspace.path.display()
            ))
        );
        store.close()?;
        return Ok(());
    }

    println!(
        "{}",
        format_info(&format!(
            "Workspace {} holds {} dataset(s)",
            config.workspace.path.display(),
            tags.len()
        ))
    );

    for tag in tags {
        let shape = store.shape(&tag)?;
        let dtype = store.dtype(&tag)?;
        let attrs = store.attributes(&tag)?;

        println!("  {} {:?} [{}]", tag, shape, dtype.name());
        for (key, attr) in &attrs.static_attrs {
            let marker = if attr.protected { " (protected)" } else { "" };
            println!("    {} = {}{}", key, attr.value, marker);
        }
        for (key, values) in &attrs.non_static {
            println!("    {} = <{} per-frame values>", key, values.len());
        }
    }

    store.close()?;
    Ok(())
}

fn cmd_run(config: &Config, recipe_path: &PathBuf) -> Result<()> {
    info!("Loading recipe from {}", recipe_path.display());

    let recipe = Recipe::load(recipe_path).context("Failed to load recipe")?;
    let mut pipeline = recipe
        .build(config.clone())
        .context("Failed to build pipeline from recipe")?;

    let stats = pipeline.run_all().context("Pipeline execution failed")?;
    pipeline.close()?;

    println!(
        "{}",
        format_success(&format!(
            "Ran {} module(s) in {}s, {} dataset(s) in storage",
            stats.modules_run, stats.duration_secs, stats.datasets_in_storage
        ))
    );

    Ok(())
}

fn cmd_delete(config: &Config, tag: &str, confirm: bool) -> Result<()> {
    if !confirm {
        println!(
            "{}",
            format_warning(&format!(
                "This permanently removes dataset '{}'. Re-run with --confirm to proceed",
                tag
            ))
        );
        return Ok(());
    }

    let mut store = DataStore::new(&config.workspace.path);
    store.delete_dataset(tag)?;
    store.close()?;

    println!("{}", format_success(&format!("Deleted dataset '{}'", tag)));
    Ok(())
}

fn cmd_export(config: &Config, tag: &str, output: PathBuf) -> Result<()> {
    let mut pipeline = Pipeline::new(config.clone());
    pipeline.add_module(Box::new(RawCubeWriter::new("export", tag, &output)))?;
    pipeline.run_all().context("Export failed")?;
    pipeline.close()?;

    println!(
        "{}",
        format_success(&format!(
            "Exported dataset '{}' to {}",
            tag,
            output.display()
        ))
    );

    Ok(())
}
