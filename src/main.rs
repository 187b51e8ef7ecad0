//! frameart - monthly wall art generator for a picture-frame display

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{ArgGroup, CommandFactory, Parser};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frameart::config::{self, AppConfig};
use frameart::diagnostics;
use frameart::generator::BingClient;
use frameart::theme::Month;
use frameart::uploader::SmartThingsClient;
use frameart::{ConfigError, Pipeline, RunOptions};

/// Generate seasonal artwork and push it to the frame display
#[derive(Parser, Debug)]
#[command(name = "frameart", version, about = "Monthly AI wall art for a frame display")]
#[command(group(ArgGroup::new("mode").args(["run", "test", "setup"])))]
struct Args {
    /// Generate, process and upload this month's artwork
    #[arg(long)]
    run: bool,

    /// Check every component without generating artwork
    #[arg(long)]
    test: bool,

    /// Write configuration templates and print setup instructions
    #[arg(long)]
    setup: bool,

    /// Image service session cookie (`_U`)
    #[arg(long, env = "FRAMEART_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// Number of images to generate
    #[arg(long, default_value_t = 5)]
    num_images: usize,

    /// Generate and process only; skip upload and archive
    #[arg(long)]
    test_mode: bool,

    /// Directory holding the configuration files
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Month to use instead of the current one
    #[arg(long)]
    month: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "FRAMEART_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if args.setup {
        init_tracing(args.log_json, None);
        setup(&args.config_dir)?;
        return Ok(ExitCode::SUCCESS);
    }
    if !args.run && !args.test {
        Args::command().print_help()?;
        return Ok(ExitCode::SUCCESS);
    }

    let month = match &args.month {
        Some(name) => {
            Month::parse(name).ok_or_else(|| ConfigError::UnknownMonth(name.clone()))?
        }
        None => Month::current(),
    };
    let config = AppConfig::load(&args.config_dir)
        .with_context(|| format!("loading configuration from {}", args.config_dir.display()))?;

    let layout = config.layout();
    let today = Local::now().date_naive();
    let log_file = layout
        .open_daily_log(today)
        .with_context(|| format!("opening {}", layout.daily_log(today).display()))?;
    init_tracing(args.log_json, Some(log_file));

    if args.test {
        let report = diagnostics::run(&config, args.cookie.as_deref(), month).await;
        println!("\nComponent checks");
        for check in &report.checks {
            println!("  {}", check);
        }
        if report.passed() {
            println!("\nAll components ready");
            return Ok(ExitCode::SUCCESS);
        }
        println!("\nSome checks failed; run `frameart --setup` for configuration help");
        return Ok(ExitCode::FAILURE);
    }

    run(&config, &args, month).await
}

/// Console output plus, when given, a plain-text copy appended to the
/// daily log file
fn init_tracing(json: bool, log_file: Option<File>) {
    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });
    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frameart=info".into()),
        )
        .with(file_layer);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(config: &AppConfig, args: &Args, month: Month) -> Result<ExitCode> {
    let cookie = args
        .cookie
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or(ConfigError::MissingCredential("session cookie (--cookie or FRAMEART_COOKIE)"))?;
    let generator = BingClient::new(cookie, config.settings.generator.clone())?;

    let uploader = if args.test_mode {
        None
    } else {
        let device = config
            .device
            .as_ref()
            .ok_or(ConfigError::MissingCredential("device_config.json"))?;
        device.validate_credentials()?;
        Some(SmartThingsClient::new(device, config.settings.uploader.clone())?)
    };

    let options = RunOptions {
        num_images: args.num_images,
        month,
        test_mode: args.test_mode,
    };
    let mut pipeline = Pipeline::new(config, generator, uploader)?;
    let result = pipeline.run(&options).await?;

    let mode = if result.test_mode { " (test mode)" } else { "" };
    println!("\nArtwork for {}{}", month, mode);
    println!("  {}", result.summary());
    for success in &result.successes {
        println!("  #{:<2} {}", success.index, success.processed_path.display());
    }
    for failure in &result.failures {
        println!("  #{:<2} failed at {}: {}", failure.index, failure.stage, failure.message);
    }
    info!(run_id = %result.run_id, exit_code = result.exit_code(), "run complete");

    Ok(if result.exit_code() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn setup(config_dir: &Path) -> Result<()> {
    let written = config::write_templates(config_dir)?;
    for path in &written {
        println!("wrote {}", path.display());
    }
    if written.is_empty() {
        println!("configuration already present in {}", config_dir.display());
    }

    println!(
        r#"
frameart setup
==============

1. Image service session
   - Sign in at https://www.bing.com/create
   - Open the browser developer tools, Storage -> Cookies -> bing.com
   - Copy the value of the `_U` cookie
   - Pass it with --cookie or set FRAMEART_COOKIE

2. Display device
   - Create a personal access token at https://account.smartthings.com/tokens
     with scopes r:devices:*, w:devices:*, x:devices:*
   - Look up the frame's device id in the SmartThings app
   - Edit {dir}/{device}: replace YOUR_ACCESS_TOKEN_HERE and YOUR_DEVICE_ID_HERE
   - Set "resolution" if the display is not 3840x2160

3. Optional
   - {dir}/{base}: the art style appended to every prompt
   - {dir}/{themes}: motifs per month
   - {dir}/{settings}: retries, timeouts, image tuning, retention

4. Check everything:   frameart --test --cookie "..."
5. Generate:           frameart --run --cookie "..."   (add --test-mode to skip upload)

Per-run summaries and daily log files are written to logs/."#,
        dir = config_dir.display(),
        device = config::DEVICE_FILE,
        base = config::BASE_PROMPT_FILE,
        themes = config::THEMES_FILE,
        settings = config::SETTINGS_FILE,
    );
    Ok(())
}
