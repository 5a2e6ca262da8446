/// Service stack synthesizer
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use svcspec::config;
use svcspec::config::runtime::Environment;
use svcspec::naming;
use svcspec::stack::Stack;
use svcspec::Error;

/// Synthesize the deployment, secret and routing resources of a service.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding svcspec.toml.
    #[arg(default_value = ".")]
    source_directory: String,

    /// Path to the configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Workspace to synthesize for: dev, qa, stage or prod.
    #[arg(long, env = "TF_WORKSPACE", global = true)]
    workspace: Option<String>,

    #[arg(long, env = "AWS_ACCOUNT_ID", global = true)]
    account: Option<String>,

    /// Falls back to AWS_DEFAULT_REGION.
    #[arg(long, env = "AWS_REGION", global = true)]
    region: Option<String>,

    /// Container image, including tag.
    #[arg(long, env = "IMAGE", global = true)]
    image: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the stack and print it to standard output.
    Synth {
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// Build the stack and report whether it is valid.
    Validate,
    /// Print the resource name derived from an identifier.
    Name { identifier: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

/// Read configuration file from disk and merge it with the
/// `default.toml` built-in config.
///
/// If a configuration file name is not set explicitly, this function will
/// detect whether a config file with the default file name exists on disk.
/// If it does, it is used implicitly.
fn read_config(args: &Cli) -> Result<config::file::File, Error> {
    const DEFAULT_CONFIG_FILE: &str = "svcspec.toml";

    let config_path = format!("{}/{}", args.source_directory, DEFAULT_CONFIG_FILE);

    let config_file = match &args.config {
        None => std::fs::metadata(&config_path)
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
            .then_some(config_path),
        Some(c) => Some(c.clone()),
    };

    Ok(match config_file {
        Some(config_file) => {
            info!("Using configuration file {config_file}");
            config::file::File::default_with_user_config_file(&config_file)?
        }
        None => config::file::File::default(),
    })
}

fn build_stack(args: &Cli) -> Result<Stack, Error> {
    let cfg_file = read_config(args)?;
    let environment = Environment {
        workspace: args.workspace.clone(),
        account: args.account.clone(),
        region: args
            .region
            .clone()
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok()),
        image: args.image.clone(),
    };
    let stack_config = config::runtime::stack_config(&cfg_file, &environment)?;
    info!(
        "Synthesizing {} for workspace {}",
        stack_config.app_name, stack_config.workspace
    );
    Stack::build(stack_config)
}

fn main() {
    match run() {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err);
            std::process::exit(1)
        }
    }
}

fn run() -> Result<(), Error> {
    env_logger::init();

    let args = Cli::parse();

    match &args.command {
        Commands::Synth { format } => {
            let stack = build_stack(&args)?;
            let rendered = match format {
                Format::Json => stack.to_json()?,
                Format::Yaml => stack.to_yaml()?,
            };
            println!("{rendered}");
            Ok(())
        }
        Commands::Validate => {
            let stack = build_stack(&args)?;
            info!(
                "{} is valid: {} external secrets, routed by {}",
                stack.outputs.derived_name,
                stack.external_secrets.len(),
                stack
                    .service_mapping
                    .listener_rule
                    .condition
                    .iter()
                    .flat_map(|condition| condition.host_header.values.iter().cloned())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Ok(())
        }
        Commands::Name { identifier } => {
            println!("{}", naming::normalize(identifier));
            Ok(())
        }
    }
}
