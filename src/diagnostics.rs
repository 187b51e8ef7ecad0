//! Component self-check for `--test`
//!
//! Exercises each component once without generating artwork: a sample
//! prompt, a session check against the generation service, a synthetic
//! image through the processor, and a device lookup.

use std::fmt;
use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use tracing::{info, warn};

use crate::config::{AppConfig, DEVICE_FILE};
use crate::generator::BingClient;
use crate::processor::{dimensions, ImageProcessor};
use crate::theme::{Month, PromptBuilder};
use crate::uploader::{DisplayUploader, SmartThingsClient};

/// Outcome of one component check
#[derive(Debug, Clone)]
pub struct Check {
    pub component: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn pass(component: &'static str, detail: impl Into<String>) -> Self {
        Self {
            component,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(component: &'static str, detail: impl fmt::Display) -> Self {
        Self {
            component,
            passed: false,
            detail: detail.to_string(),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "ok" } else { "FAILED" };
        write!(f, "{:<10} {:<6} {}", self.component, mark, self.detail)
    }
}

/// All checks from one diagnostics pass
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub checks: Vec<Check>,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn get(&self, component: &str) -> Option<&Check> {
        self.checks.iter().find(|c| c.component == component)
    }
}

/// Run every component check for `month`
pub async fn run(config: &AppConfig, cookie: Option<&str>, month: Month) -> Report {
    let checks = vec![
        check_prompts(config, month),
        check_generator(config, cookie).await,
        check_processor(config),
        check_uploader(config).await,
    ];

    for check in &checks {
        if check.passed {
            info!(component = check.component, "{}", check.detail);
        } else {
            warn!(component = check.component, "{}", check.detail);
        }
    }
    Report { checks }
}

fn check_prompts(config: &AppConfig, month: Month) -> Check {
    let built = PromptBuilder::new(
        config.themes.clone(),
        &config.base_prompt,
        config.settings.selection,
    )
    .and_then(|mut builder| builder.build_for(month));

    match built {
        Ok(prompt) => Check::pass("prompts", format!("{}: {}", month, prompt)),
        Err(e) => Check::fail("prompts", e),
    }
}

async fn check_generator(config: &AppConfig, cookie: Option<&str>) -> Check {
    let Some(cookie) = cookie.filter(|c| !c.trim().is_empty()) else {
        return Check::fail("generator", "no session cookie (--cookie or FRAMEART_COOKIE)");
    };

    let client = match BingClient::new(cookie, config.settings.generator.clone()) {
        Ok(client) => client,
        Err(e) => return Check::fail("generator", e),
    };
    match client.verify_session().await {
        Ok(()) => Check::pass("generator", "session cookie accepted"),
        Err(e) => Check::fail("generator", e),
    }
}

/// Gradient test card, small enough to build instantly
fn test_card() -> Result<Vec<u8>, image::ImageError> {
    let card = RgbImage::from_fn(320, 200, |x, y| {
        Rgb([(x * 255 / 319) as u8, (y * 255 / 199) as u8, 128])
    });
    let mut bytes = Vec::new();
    card.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

fn check_processor(config: &AppConfig) -> Check {
    let processor = ImageProcessor::new(config.processor_settings());
    let target = (processor.settings().width, processor.settings().height);

    let card = match test_card() {
        Ok(card) => card,
        Err(e) => return Check::fail("processor", e),
    };
    let processed = match processor.process(&card) {
        Ok(processed) => processed,
        Err(e) => return Check::fail("processor", e),
    };

    match dimensions(&processed.bytes) {
        Ok(dims) if dims == target => Check::pass(
            "processor",
            format!(
                "{}x{} {:?}, {} KiB",
                dims.0,
                dims.1,
                processor.settings().fit,
                processed.bytes.len() / 1024
            ),
        ),
        Ok(dims) => Check::fail(
            "processor",
            format!("expected {}x{}, got {}x{}", target.0, target.1, dims.0, dims.1),
        ),
        Err(e) => Check::fail("processor", e),
    }
}

async fn check_uploader(config: &AppConfig) -> Check {
    let Some(device) = &config.device else {
        return Check::fail("uploader", format!("{} not found", DEVICE_FILE));
    };

    let client = match SmartThingsClient::new(device, config.settings.uploader.clone()) {
        Ok(client) => client,
        Err(e) => return Check::fail("uploader", e),
    };
    match client.check_device().await {
        Ok(info) => Check::pass(
            "uploader",
            format!(
                "device {} ({})",
                info.device_id,
                info.label.as_deref().unwrap_or("unnamed")
            ),
        ),
        Err(e) => Check::fail("uploader", e),
    }
}
