use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use macro_pulse::config::{parse_duration, resolve_config_path};
use macro_pulse::hotkey::parse_hotkey;
use macro_pulse::version::{check_for_update, UpdateStatus, VersionInfo};
use macro_pulse::{App, AppOptions, Config, DryRunSender, InputSink, KeySender, MacroItem};

#[derive(Parser)]
#[command(name = "mpulse", version, about = "Timed key presses with jitter and a toggle hotkey")]
struct Cli {
    /// Config file (defaults to macro-pulse.cfg next to the executable)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for the hotkey and fire macro items while running (default)
    Run(RunArgs),
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show configured items
    List,
    /// Add a macro item
    Add {
        name: String,
        key: String,
        #[arg(long, default_value = "1000ms", value_parser = parse_duration)]
        interval: Duration,
        #[arg(long, default_value = "0ms", value_parser = parse_duration)]
        jitter_min: Duration,
        #[arg(long, default_value = "0ms", value_parser = parse_duration)]
        jitter_max: Duration,
        /// Add the item switched off
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a macro item
    Remove { name: String },
    /// Switch a macro item on
    Enable { name: String },
    /// Switch a macro item off
    Disable { name: String },
    /// Change the toggle hotkey, e.g. "Ctrl+Shift+F8"
    SetHotkey { hotkey: String },
    /// Configure the left-click loop
    ToolUse {
        state: Switch,
        #[arg(long, value_parser = parse_duration)]
        interval: Option<Duration>,
    },
    /// Validate the config file
    Check,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Hotkey for this session only
    #[arg(long)]
    hotkey: Option<String>,
    /// Start firing immediately instead of waiting for the hotkey
    #[arg(long)]
    start: bool,
    /// Log actions instead of injecting input
    #[arg(long)]
    dry_run: bool,
    /// Timer loop granularity
    #[arg(long, default_value = "50ms", value_parser = parse_duration)]
    tick: Duration,
    /// Stop and exit after this long
    #[arg(long, value_parser = parse_duration)]
    run_for: Option<Duration>,
    /// Disable the countdown display
    #[arg(long)]
    no_hud: bool,
    /// Skip the startup version check
    #[arg(long)]
    no_update_check: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(resolve_config_path);

    match cli.command {
        None => {
            let args = RunArgs {
                tick: macro_pulse::scheduler::DEFAULT_TICK,
                ..RunArgs::default()
            };
            run(config_path, args).await
        }
        Some(Command::Run(args)) => run(config_path, args).await,
        Some(Command::Init { force }) => init(config_path, force),
        Some(Command::List) => list(config_path),
        Some(Command::Add {
            name,
            key,
            interval,
            jitter_min,
            jitter_max,
            disabled,
        }) => edit(config_path, |config| {
            let mut item = MacroItem::new(name, key, whole_ms(interval))
                .with_jitter(whole_ms(jitter_min), whole_ms(jitter_max));
            item.enabled = !disabled;
            config.add_item(item)?;
            Ok(())
        }),
        Some(Command::Remove { name }) => edit(config_path, |config| {
            config.remove_item(&name)?;
            Ok(())
        }),
        Some(Command::Enable { name }) => {
            edit(config_path, |config| Ok(config.set_item_enabled(&name, true)?))
        }
        Some(Command::Disable { name }) => {
            edit(config_path, |config| Ok(config.set_item_enabled(&name, false)?))
        }
        Some(Command::SetHotkey { hotkey }) => edit(config_path, |config| {
            parse_hotkey(&hotkey)?;
            config.hotkey = hotkey.trim().to_string();
            Ok(())
        }),
        Some(Command::ToolUse { state, interval }) => edit(config_path, |config| {
            config.tool_use.enabled = matches!(state, Switch::On);
            if let Some(interval) = interval {
                config.tool_use.interval_ms = whole_ms(interval);
            }
            Ok(())
        }),
        Some(Command::Check) => check(config_path),
    }
}

async fn run(config_path: PathBuf, args: RunArgs) -> Result<()> {
    if !args.no_update_check {
        let info = VersionInfo::read_local();
        let status = tokio::task::spawn_blocking(move || check_for_update(&info))
            .await
            .context("update check task failed")?;
        if let UpdateStatus::Outdated {
            local,
            remote,
            update_url,
        } = status
        {
            warn!(%local, %remote, "a newer version is available at {update_url}");
        }
    }

    let mut config = Config::load_or_default(&config_path);
    info!(path = %config_path.display(), items = config.items.len(), "configuration loaded");

    if let Some(hotkey) = args.hotkey {
        config.hotkey = hotkey;
    }
    if let Err(e) = config.validate() {
        warn!(error = %e, "configuration has problems");
    }

    let sink: Arc<dyn InputSink> = if args.dry_run {
        Arc::new(DryRunSender)
    } else {
        match KeySender::new() {
            Ok(sender) => Arc::new(sender),
            Err(e) => {
                warn!(error = %e, "input injection unavailable, falling back to dry run");
                Arc::new(DryRunSender)
            }
        }
    };

    let options = AppOptions {
        tick: args.tick,
        start_immediately: args.start,
        run_for: args.run_for,
        show_hud: !args.no_hud,
    };

    App::new(config, sink, options).run().await?;
    Ok(())
}

fn whole_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn init(config_path: PathBuf, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    Config::default().save_to_file(&config_path)?;
    println!("{} {}", "Wrote".green(), config_path.display());
    Ok(())
}

fn list(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;

    println!("{} {}", "Config:".bold(), config_path.display());
    println!("{} {}", "Hotkey:".bold(), config.hotkey);
    let tool = if config.tool_use.enabled {
        format!("on, every {}ms", config.tool_use.interval_ms).green()
    } else {
        "off".dimmed()
    };
    println!("{} {}", "Tool use:".bold(), tool);
    println!();

    for item in &config.items {
        let jitter = if item.jitter_max_ms > 0 {
            format!(" +{}..{}ms", item.jitter_min_ms, item.jitter_max_ms)
        } else {
            String::new()
        };
        let line = format!(
            "{:<16} [{}] every {}ms{}",
            item.name, item.key, item.interval_ms, jitter
        );
        if item.enabled {
            println!("  {line}");
        } else {
            println!("  {} {}", line.dimmed(), "(disabled)".dimmed());
        }
    }
    Ok(())
}

fn edit<F>(config_path: PathBuf, change: F) -> Result<()>
where
    F: FnOnce(&mut Config) -> Result<()>,
{
    let mut config = Config::load(&config_path)
        .with_context(|| format!("cannot edit {}", config_path.display()))?;
    change(&mut config)?;
    config.save_to_file(&config_path)?;
    println!("{} {}", "Saved".green(), config_path.display());
    Ok(())
}

fn check(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)?;
    config.validate()?;
    if !config.has_work() {
        println!("{}", "Valid, but nothing is enabled".yellow());
    } else {
        println!("{} {}", "Valid:".green(), config_path.display());
    }
    Ok(())
}
