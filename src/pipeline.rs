//! Artwork pipeline
//!
//! One run, N images, strictly in sequence. Each image moves through
//! `BuildingPrompts -> Generating -> Processing -> Uploading -> Archiving`;
//! a failure at any stage is recorded against that image and the run moves
//! on to the next one. Only configuration problems abort a run, and they
//! are caught before the first image.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::archive::ArtworkArchive;
use crate::config::{AppConfig, Layout};
use crate::error::{ConfigError, StageError};
use crate::generator::{GeneratedImage, ImageGenerator};
use crate::processor::{ImageProcessor, ProcessedImage};
use crate::theme::{Month, PromptBuilder};
use crate::uploader::DisplayUploader;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    BuildingPrompts,
    Generating,
    Processing,
    Uploading,
    Archiving,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::BuildingPrompts => "building_prompts",
            Stage::Generating => "generating",
            Stage::Processing => "processing",
            Stage::Uploading => "uploading",
            Stage::Archiving => "archiving",
            Stage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Options for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub num_images: usize,
    pub month: Month,
    /// Generate and process, but skip upload and archive
    pub test_mode: bool,
}

/// A recorded per-image failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFailure {
    /// 1-based image index
    pub index: usize,
    pub stage: Stage,
    pub prompt: Option<String>,
    pub message: String,
}

/// A completed image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSuccess {
    /// 1-based image index
    pub index: usize,
    pub prompt: String,
    pub generated_path: PathBuf,
    pub processed_path: PathBuf,
    pub content_id: Option<String>,
    pub archived_previous: Option<PathBuf>,
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub month: Month,
    pub test_mode: bool,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub successes: Vec<ImageSuccess>,
    pub failures: Vec<ImageFailure>,
    /// Stale images moved by the end-of-run sweep
    pub swept: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunResult {
    fn new(options: &RunOptions) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            month: options.month,
            test_mode: options.test_mode,
            requested: options.num_images,
            succeeded: 0,
            failed: 0,
            successes: Vec::new(),
            failures: Vec::new(),
            swept: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn record(&mut self, outcome: Result<ImageSuccess, ImageFailure>) {
        match outcome {
            Ok(success) => {
                self.succeeded += 1;
                self.successes.push(success);
            }
            Err(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
        }
    }

    /// 0 when at least one image made it through
    pub fn exit_code(&self) -> i32 {
        if self.succeeded > 0 {
            0
        } else {
            1
        }
    }

    /// "requested/succeeded/failed" line for logs and the console
    pub fn summary(&self) -> String {
        format!(
            "requested {} / succeeded {} / failed {}",
            self.requested, self.succeeded, self.failed
        )
    }
}

/// Content hash prefix used in file names
fn short_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())[..12].to_string()
}

fn extension_for(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Png) => "png",
        Ok(image::ImageFormat::WebP) => "webp",
        _ => "jpg",
    }
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)
}

/// Attach a stage to a component error
fn at<E: Into<StageError>>(stage: Stage) -> impl FnOnce(E) -> (Stage, StageError) {
    move |e| (stage, e.into())
}

/// The orchestrator
pub struct Pipeline<G, U> {
    prompts: PromptBuilder,
    generator: G,
    processor: ImageProcessor,
    uploader: Option<U>,
    archive: ArtworkArchive,
    layout: Layout,
    inter_image_delay: Duration,
    sweep_stale: bool,
}

impl<G: ImageGenerator, U: DisplayUploader> Pipeline<G, U> {
    /// Assemble a pipeline from loaded configuration. `uploader` may be
    /// `None` for test-mode runs.
    pub fn new(config: &AppConfig, generator: G, uploader: Option<U>) -> Result<Self, ConfigError> {
        let prompts = PromptBuilder::new(
            config.themes.clone(),
            &config.base_prompt,
            config.settings.selection,
        )?;
        let layout = config.layout();
        let archive = ArtworkArchive::new(&layout.archive, config.settings.archive.clone());

        Ok(Self {
            prompts,
            generator,
            processor: ImageProcessor::new(config.processor_settings()),
            uploader,
            archive,
            layout,
            inter_image_delay: Duration::from_millis(config.settings.inter_image_delay_ms),
            sweep_stale: config.settings.archive.sweep_stale,
        })
    }

    pub fn archive(&self) -> &ArtworkArchive {
        &self.archive
    }

    /// Everything that must hold before the first image is attempted
    fn preflight(&self, options: &RunOptions) -> Result<(), ConfigError> {
        if options.num_images == 0 {
            return Err(ConfigError::Invalid {
                field: "num_images",
                message: "must be at least 1".to_string(),
            });
        }
        if !options.test_mode && self.uploader.is_none() {
            return Err(ConfigError::MissingCredential("device access token / device id"));
        }
        self.prompts.check(options.month)?;
        Ok(())
    }

    /// Run the pipeline for `options.num_images` images
    pub async fn run(&mut self, options: &RunOptions) -> Result<RunResult, ConfigError> {
        self.preflight(options)?;
        self.layout.create().map_err(|source| ConfigError::Write {
            path: self.layout.generated.display().to_string(),
            source,
        })?;

        let mut result = RunResult::new(options);
        info!(
            run_id = %result.run_id,
            month = %options.month,
            images = options.num_images,
            test_mode = options.test_mode,
            "starting run"
        );

        for index in 1..=options.num_images {
            if index > 1 && !self.inter_image_delay.is_zero() {
                tokio::time::sleep(self.inter_image_delay).await;
            }

            let mut prompt = None;
            let outcome = self
                .run_image(index, options, &mut prompt)
                .await
                .map_err(|(stage, e)| {
                    error!(
                        image = index,
                        stage = %stage,
                        prompt = prompt.as_deref().unwrap_or(""),
                        "image failed: {}",
                        e
                    );
                    ImageFailure {
                        index,
                        stage,
                        prompt: prompt.clone(),
                        message: e.to_string(),
                    }
                });
            result.record(outcome);
        }

        if self.sweep_stale {
            match self.archive.sweep_stale(&self.layout, Utc::now()) {
                Ok(n) => result.swept = n,
                Err(e) => warn!("stale image sweep failed: {}", e),
            }
        }

        result.finished_at = Some(Utc::now());
        self.write_summary(&result);
        info!(run_id = %result.run_id, stage = %Stage::Done, "{}", result.summary());
        Ok(result)
    }

    async fn run_image(
        &mut self,
        index: usize,
        options: &RunOptions,
        prompt_out: &mut Option<String>,
    ) -> Result<ImageSuccess, (Stage, StageError)> {
        let month = options.month;

        info!(image = index, stage = %Stage::BuildingPrompts, "building prompt");
        let prompt = self
            .prompts
            .build_for(month)
            .map_err(at(Stage::BuildingPrompts))?;
        *prompt_out = Some(prompt.clone());
        info!(image = index, prompt = %prompt, "prompt ready");

        info!(image = index, stage = %Stage::Generating, "generating");
        let generated = self
            .generator
            .generate(&prompt)
            .await
            .map_err(at(Stage::Generating))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                (
                    Stage::Generating,
                    StageError::Generate(crate::error::GenerateError::Generation(
                        "service returned no images".to_string(),
                    )),
                )
            })?;
        let generated_path = self
            .save_generated(month, &generated)
            .map_err(at(Stage::Generating))?;

        info!(image = index, stage = %Stage::Processing, "processing");
        let processed = self
            .processor
            .process(&generated.bytes)
            .map_err(at(Stage::Processing))?;
        let processed_path = self
            .save_processed(month, &generated_path, &processed)
            .map_err(at(Stage::Processing))?;

        let mut success = ImageSuccess {
            index,
            prompt,
            generated_path,
            processed_path,
            content_id: None,
            archived_previous: None,
        };

        if options.test_mode {
            info!(image = index, "test mode, skipping upload");
            return Ok(success);
        }

        let Some(uploader) = self.uploader.as_ref() else {
            return Err((
                Stage::Uploading,
                ConfigError::MissingCredential("device access token / device id").into(),
            ));
        };

        info!(image = index, stage = %Stage::Uploading, "uploading");
        let name = format!("Monthly_{}_{:02}", month, index);
        let receipt = uploader
            .upload(&processed.bytes, &name)
            .await
            .map_err(at(Stage::Uploading))?;
        success.content_id = Some(receipt.content_id.clone());

        info!(image = index, stage = %Stage::Archiving, "archiving previous artwork");
        match self.archive.rotate(
            &success.processed_path,
            receipt.uploaded_at,
            Some(receipt.content_id),
        ) {
            Ok(archived) => success.archived_previous = archived,
            Err(e) => warn!(image = index, "archiving previous artwork failed: {}", e),
        }

        Ok(success)
    }

    fn save_generated(&self, month: Month, image: &GeneratedImage) -> std::io::Result<PathBuf> {
        let name = format!(
            "{}_{}.{}",
            image.generated_at.format("%Y%m%d_%H%M%S"),
            short_hash(&image.bytes),
            extension_for(&image.bytes)
        );
        let path = self.layout.generated.join(month.name()).join(name);
        write_file(&path, &image.bytes)?;
        Ok(path)
    }

    fn save_processed(
        &self,
        month: Month,
        generated_path: &Path,
        image: &ProcessedImage,
    ) -> std::io::Result<PathBuf> {
        let stem = generated_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| short_hash(&image.bytes));
        let path = self
            .layout
            .processed
            .join(month.name())
            .join(format!("processed_{}.jpg", stem));
        write_file(&path, &image.bytes)?;
        Ok(path)
    }

    /// Write the run summary as JSON under `logs/`. Failure is only logged.
    fn write_summary(&self, result: &RunResult) {
        let path = self.layout.logs.join(format!(
            "run_{}.json",
            result.started_at.format("%Y%m%d_%H%M%S")
        ));
        let written = serde_json::to_string_pretty(result)
            .map_err(std::io::Error::other)
            .and_then(|json| write_file(&path, json.as_bytes()));
        match written {
            Ok(()) => info!(path = %path.display(), "run summary written"),
            Err(e) => warn!(path = %path.display(), "failed to write run summary: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(n: usize) -> RunOptions {
        RunOptions {
            num_images: n,
            month: Month::April,
            test_mode: true,
        }
    }

    fn failure(index: usize) -> ImageFailure {
        ImageFailure {
            index,
            stage: Stage::Generating,
            prompt: None,
            message: "boom".to_string(),
        }
    }

    fn success(index: usize) -> ImageSuccess {
        ImageSuccess {
            index,
            prompt: "p".to_string(),
            generated_path: PathBuf::from("g.png"),
            processed_path: PathBuf::from("p.jpg"),
            content_id: None,
            archived_previous: None,
        }
    }

    #[test]
    fn test_exit_code_needs_one_success() {
        let mut result = RunResult::new(&options(2));
        result.record(Err(failure(1)));
        assert_eq!(result.exit_code(), 1);

        result.record(Ok(success(2)));
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.summary(), "requested 2 / succeeded 1 / failed 1");
    }

    #[test]
    fn test_short_hash_is_stable() {
        let a = short_hash(b"artwork");
        assert_eq!(a.len(), 12);
        assert_eq!(a, short_hash(b"artwork"));
        assert_ne!(a, short_hash(b"artwork2"));
    }

    #[test]
    fn test_extension_from_content() {
        assert_eq!(extension_for(b"\x89PNG\r\n\x1a\n0000"), "png");
        assert_eq!(extension_for(b"\xff\xd8\xff\xe0"), "jpg");
        assert_eq!(extension_for(b"unknown"), "jpg");
    }

    #[test]
    fn test_stage_names_match_serde() {
        for stage in [Stage::BuildingPrompts, Stage::Uploading, Stage::Done] {
            let json = serde_json::to_value(stage).unwrap();
            assert_eq!(json, stage.to_string());
        }
    }
}
