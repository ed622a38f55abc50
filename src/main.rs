use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail, ensure};
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};

use claudelink::config::Config;
use claudelink::descriptor::CommandDescriptor;
use claudelink::exec::OutputChunk;
use claudelink::logging;
use claudelink::policy::{CommandPolicy, DenyListPolicy};
use claudelink::processor::{Approver, FileProcessor, ProcessingOutcome};
use claudelink::watch::{DirectoryWatcher, platform_source};

#[derive(Parser)]
#[command(name = "claudelink", version)]
#[command(about = "Run shell commands dropped into a directory as descriptor files")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config overlay (default: ~/.config/claudelink/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory to watch, overriding the configured one
    #[arg(long, global = true)]
    watch_dir: Option<PathBuf>,

    /// Ask before running each command
    #[arg(long, global = true)]
    confirm: bool,

    /// Only warnings and errors; no command output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Debug diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the directory and process descriptor files (default)
    Watch,
    /// Process a single descriptor file
    Exec {
        file: PathBuf,
    },
    /// Check whether a command would be allowed
    Validate {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the merged configuration
    Config,
}

/// Prompts on the controlling terminal. One prompt at a time.
struct StdinApprover {
    lock: Mutex<()>,
}

impl Approver for StdinApprover {
    fn approve(&self, descriptor: &CommandDescriptor) -> bool {
        let _turn = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "\n{}", descriptor.description);
        let _ = writeln!(stderr, "  $ {}", descriptor.command);
        let _ = write!(stderr, "Run this command? [y/N] ");
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn print_chunk(chunk: &OutputChunk) {
    match chunk {
        OutputChunk::Stdout(text) => {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
        OutputChunk::Stderr(text) => {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(text.as_bytes());
            let _ = err.flush();
        }
    }
}

fn level(cli: &Cli) -> LevelFilter {
    if cli.quiet {
        LevelFilter::Warn
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn build_processor(cli: &Cli, config: &Config) -> Result<FileProcessor> {
    let policy: Arc<dyn CommandPolicy> = Arc::new(DenyListPolicy::from_config(&config.policy));
    let mut processor = FileProcessor::new(config.processor_settings(), policy)
        .context("failed to set up processor")?;
    if cli.confirm {
        processor = processor.with_approver(Box::new(StdinApprover {
            lock: Mutex::new(()),
        }));
    }
    if !cli.quiet {
        processor = processor.with_output(Box::new(print_chunk));
    }
    Ok(processor)
}

fn watch(cli: &Cli, config: &Config) -> Result<ExitCode> {
    let settings = config.watcher_settings();
    ensure!(
        settings.watch_dir.is_dir(),
        "watch directory {} does not exist",
        settings.watch_dir.display()
    );

    let processor = Arc::new(build_processor(cli, config)?);
    info!(
        "results go to {}, archive in {}",
        processor.settings().log_file.display(),
        processor.settings().archive_dir.display()
    );
    let watcher = DirectoryWatcher::new(settings, processor);

    ctrlc::set_handler(|| {
        info!("shutting down");
        std::process::exit(0);
    })
    .context("failed to install signal handler")?;

    let mut source = platform_source(
        &watcher.settings().watch_dir,
        watcher.settings().poll_interval,
    )?;
    watcher.run(source.as_mut())?;
    Ok(ExitCode::SUCCESS)
}

fn exec(cli: &Cli, config: &Config, file: &Path) -> Result<ExitCode> {
    let path = std::path::absolute(file)
        .with_context(|| format!("invalid path {}", file.display()))?;
    if !path.is_file() {
        bail!("file not found: {}", path.display());
    }

    let processor = build_processor(cli, config)?;
    let outcome = processor.process(&path)?;
    let success = match outcome {
        ProcessingOutcome::Skipped => {
            bail!("not a command file: {}", path.display());
        }
        ProcessingOutcome::ParseError(message) => {
            log::error!("{message}");
            false
        }
        ProcessingOutcome::NoCommand => {
            log::error!("no command in {}", path.display());
            false
        }
        ProcessingOutcome::Declined => false,
        ProcessingOutcome::Completed { result, archived_to } => {
            match &result.error {
                Some(e) => log::error!("{e}"),
                None if !result.success => log::error!(
                    "exit {}",
                    result
                        .exit_code
                        .map_or_else(|| "?".to_string(), |c| c.to_string())
                ),
                None => {}
            }
            info!("archived to {}", archived_to.display());
            result.success
        }
    };
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate(config: &Config, words: &[String]) -> ExitCode {
    let policy = DenyListPolicy::from_config(&config.policy);
    let result = policy.evaluate(&words.join(" "));
    match result.reason {
        None => {
            println!("Command is allowed");
            ExitCode::SUCCESS
        }
        Some(reason) => {
            println!("Command blocked: {reason}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_diagnostics(level(&cli));

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.watch_dir {
        config.set_watch_dir(dir);
    }

    match &cli.command {
        None | Some(Commands::Watch) => watch(&cli, &config),
        Some(Commands::Exec { file }) => exec(&cli, &config, file),
        Some(Commands::Validate { command }) => Ok(validate(&config, command)),
        Some(Commands::Config) => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
