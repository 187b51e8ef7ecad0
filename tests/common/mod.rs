//! Common test utilities - FrameTest harness with scripted service fakes

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use frameart::config::{self, AppConfig, DeviceConfig, Resolution};
use frameart::error::{GenerateError, UploadError};
use frameart::generator::{GeneratedImage, ImageGenerator};
use frameart::uploader::{DeviceInfo, DisplayUploader, UploadReceipt};
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 180;

/// Noisy PNG, distinct per seed
pub fn sample_png(seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    let img = RgbImage::from_fn(400, 300, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgb([r, g, b])
    });
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode sample");
    bytes
}

/// Generator that fails on chosen (1-based) calls
#[derive(Clone, Default)]
pub struct FakeGenerator {
    pub calls: Arc<AtomicUsize>,
    fail_on: HashSet<usize>,
}

impl FakeGenerator {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            calls: Arc::default(),
            fail_on: calls.iter().copied().collect(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<GeneratedImage>, GenerateError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(GenerateError::Generation(format!(
                "giving up after 3 attempts: call {} scripted to fail",
                call
            )));
        }
        Ok(vec![GeneratedImage {
            bytes: sample_png(call as u32),
            prompt: prompt.to_string(),
            generated_at: Utc::now(),
            source_url: format!("https://images.test/{}.png", call),
        }])
    }
}

/// How the fake display answers uploads
#[derive(Clone, Copy, Debug)]
pub enum UploadBehavior {
    Accept,
    TimeOut,
}

#[derive(Clone)]
pub struct FakeUploader {
    behavior: UploadBehavior,
    pub uploads: Arc<Mutex<Vec<String>>>,
}

impl FakeUploader {
    pub fn new(behavior: UploadBehavior) -> Self {
        Self {
            behavior,
            uploads: Arc::default(),
        }
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

impl DisplayUploader for FakeUploader {
    async fn check_device(&self) -> Result<DeviceInfo, UploadError> {
        Ok(DeviceInfo {
            device_id: "frame-1".to_string(),
            label: Some("Test Frame".to_string()),
            online: Some(true),
        })
    }

    async fn upload(&self, _bytes: &[u8], name: &str) -> Result<UploadReceipt, UploadError> {
        match self.behavior {
            UploadBehavior::Accept => {
                let mut uploads = self.uploads.lock().unwrap();
                uploads.push(name.to_string());
                Ok(UploadReceipt {
                    content_id: format!("content-{}", uploads.len()),
                    uploaded_at: Utc::now(),
                })
            }
            UploadBehavior::TimeOut => {
                Err(UploadError::Upload("content upload: timed out".to_string()))
            }
        }
    }
}

/// A throwaway working directory with templated configuration
pub struct FrameTest {
    pub dir: TempDir,
    pub config: AppConfig,
}

impl FrameTest {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config_dir = dir.path().join("config");
        config::write_templates(&config_dir).expect("templates");

        let mut config = AppConfig::load(&config_dir).expect("load config");
        config.settings.working_dir = dir.path().to_path_buf();
        config.settings.inter_image_delay_ms = 0;
        config.device = Some(DeviceConfig {
            access_token: "token".to_string(),
            device_id: "frame-1".to_string(),
            resolution: Resolution {
                width: WIDTH,
                height: HEIGHT,
            },
            ..Default::default()
        });

        Self { dir, config }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.dir.path().join("config")
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Image files directly or nested under `dir`
    pub fn images_under(dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(Self::images_under(&path));
            } else if path.extension().is_some_and(|e| e == "jpg" || e == "png") {
                found.push(path);
            }
        }
        found
    }
}
