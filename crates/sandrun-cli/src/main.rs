//! Sandrun CLI
//!
//! A command-line tool for running untrusted code in sandboxed workspaces.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandrun::{
    Config, EXAMPLE_CONFIG, Engine, ExecutionRequest, ExecutionResult, LanguageRegistry,
    ResourceLimits, validate,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandrun")]
#[command(about = "A tool for sandboxed multi-language code execution")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: sandrun.toml)
        #[arg(short, long, default_value = "sandrun.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language name or alias (e.g., python, cpp, js)
        #[arg(short, long)]
        language: String,

        /// File whose contents are fed to the program's stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Wall clock timeout in seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Memory limit in MB
        #[arg(short, long)]
        memory_limit: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Screen a source file without running it
    Validate {
        /// Source file to screen
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language name or alias
        #[arg(short, long)]
        language: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available languages
    Languages,

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    if let Some(path) = &cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using built-in configuration");
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Run {
            source,
            language,
            input,
            timeout,
            memory_limit,
            json,
        } => {
            let code = run_execute(
                config,
                &source,
                &language,
                input.as_deref(),
                timeout,
                memory_limit,
                json,
            )
            .await?;
            std::process::exit(code);
        }
        Commands::Validate {
            source,
            language,
            json,
        } => {
            let valid = run_validate(&config, &source, &language, json).await?;
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_execute(
    config: Config,
    source: &Path,
    language: &str,
    input: Option<&Path>,
    timeout: Option<f64>,
    memory_limit: Option<u64>,
    json: bool,
) -> Result<i32> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let mut request = ExecutionRequest::new(code, language);
    if let Some(input_path) = input {
        let data = tokio::fs::read_to_string(input_path)
            .await
            .context("failed to read input file")?;
        request = request.with_stdin(data);
    }

    // Only explicitly-specified values, so per-language defaults survive
    if timeout.is_some() || memory_limit.is_some() {
        request = request.with_limits(ResourceLimits {
            timeout,
            memory_limit,
            ..ResourceLimits::unset()
        });
    }

    let engine = Engine::new(config)
        .await
        .context("failed to start execution engine")?;

    info!(language, backend = engine.backend_name(), "running program");
    let result = engine.execute(request).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize result")?
        );
    } else {
        print_result(&result);
    }

    Ok(exit_code(&result))
}

fn print_result(result: &ExecutionResult) {
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
    }
    for violation in &result.violations {
        eprintln!("{violation}");
    }
    if !result.stderr.is_empty() {
        eprintln!("{}", result.stderr.trim_end());
    }

    // Execution info goes to stderr, keeping stdout clean for piping
    eprintln!(
        "[{}] {:.3}s{}{}",
        result.status,
        result.execution_time,
        result
            .exit_code
            .map(|code| format!(", exit code {code}"))
            .unwrap_or_default(),
        if result.limit_exceeded.is_exceeded() {
            format!(", limit exceeded: {:?}", result.limit_exceeded)
        } else {
            String::new()
        }
    );
}

fn exit_code(result: &ExecutionResult) -> i32 {
    if result.is_success() {
        0
    } else {
        match result.exit_code {
            Some(code) if code != 0 => code,
            _ => 1,
        }
    }
}

async fn run_validate(config: &Config, source: &Path, language: &str, json: bool) -> Result<bool> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let registry = LanguageRegistry::from_config(config);
    let spec = registry.resolve(language).context("unknown language")?;
    let result = validate(&code, &spec);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize result")?
        );
    } else if result.valid {
        println!("No violations found");
    } else {
        for violation in &result.violations {
            println!("{violation}");
        }
    }

    Ok(result.valid)
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let registry = LanguageRegistry::from_config(config);
    for lang in registry.iter() {
        let aliases = if lang.aliases.is_empty() {
            String::new()
        } else {
            format!(" [{}]", lang.aliases.join(", "))
        };
        println!("  {:<15} {} ({}){}", lang.id, lang.name, lang.kind(), aliases);
    }
}

fn show_config(config: &Config) {
    let limits = &config.default_limits;
    println!("Default resource limits:");
    println!("  Timeout: {:?} s", limits.timeout);
    println!("  CPU time: {:?} s", limits.cpu_time);
    println!("  Memory limit: {:?} MB", limits.memory_limit);
    println!("  Max processes: {:?}", limits.max_processes);
    println!("  Max output: {:?} KB", limits.max_output);
    println!("  Max file size: {:?} MB", limits.max_file_size);
    println!("  Max open files: {:?}", limits.max_open_files);
    println!();
    println!("Backend: {}", config.backend);
    println!("Max concurrent executions: {}", config.concurrency());
    if let Some(root) = &config.workspace_root {
        println!("Workspace root: {}", root.display());
    }
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
