//! End-to-end pipeline runs against scripted generator and display fakes

mod common;

use chrono::Utc;
use common::{FakeGenerator, FakeUploader, FrameTest, UploadBehavior, HEIGHT, WIDTH};
use frameart::archive::ArtworkArchive;
use frameart::config::{AppConfig, THEMES_FILE};
use frameart::processor::dimensions;
use frameart::theme::Month;
use frameart::{ConfigError, Pipeline, RunOptions, Stage};

fn options(num_images: usize, test_mode: bool) -> RunOptions {
    RunOptions {
        num_images,
        month: Month::October,
        test_mode,
    }
}

#[tokio::test]
async fn test_generation_failure_is_isolated() {
    let frame = FrameTest::new();
    let generator = FakeGenerator::failing_on(&[3]);
    let uploader = FakeUploader::new(UploadBehavior::Accept);

    let mut pipeline =
        Pipeline::new(&frame.config, generator.clone(), Some(uploader.clone())).unwrap();
    let result = pipeline.run(&options(5, false)).await.unwrap();

    assert_eq!(result.requested, 5);
    assert_eq!(result.succeeded, 4);
    assert_eq!(result.failed, 1);
    assert_eq!(result.exit_code(), 0);
    assert_eq!(generator.call_count(), 5);

    let failure = &result.failures[0];
    assert_eq!(failure.index, 3);
    assert_eq!(failure.stage, Stage::Generating);
    assert!(failure
        .prompt
        .as_deref()
        .unwrap()
        .contains(&frame.config.base_prompt));

    let indices: Vec<usize> = result.successes.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 4, 5]);
    assert_eq!(
        uploader.uploaded(),
        vec![
            "Monthly_october_01",
            "Monthly_october_02",
            "Monthly_october_04",
            "Monthly_october_05"
        ]
    );
}

#[tokio::test]
async fn test_successful_uploads_rotate_the_archive() {
    let frame = FrameTest::new();
    let uploader = FakeUploader::new(UploadBehavior::Accept);

    let mut pipeline =
        Pipeline::new(&frame.config, FakeGenerator::default(), Some(uploader)).unwrap();
    let result = pipeline.run(&options(3, false)).await.unwrap();
    assert_eq!(result.succeeded, 3);

    let last = result.successes.last().unwrap();
    let active = pipeline.archive().active().unwrap();
    assert_eq!(active.path, last.processed_path);
    assert_eq!(active.content_id.as_deref(), Some("content-3"));

    // Each upload after the first archives its predecessor
    assert!(result.successes[0].archived_previous.is_none());
    for success in &result.successes[1..] {
        assert!(success.archived_previous.as_ref().unwrap().exists());
    }
    let layout = frame.config.layout();
    assert_eq!(FrameTest::images_under(&layout.archive).len(), 2);
}

#[tokio::test]
async fn test_processed_output_matches_display() {
    let frame = FrameTest::new();
    let mut pipeline = Pipeline::new(
        &frame.config,
        FakeGenerator::default(),
        Some(FakeUploader::new(UploadBehavior::Accept)),
    )
    .unwrap();
    let result = pipeline.run(&options(2, false)).await.unwrap();

    for success in &result.successes {
        assert!(success.generated_path.starts_with(frame.path()));
        assert!(success
            .generated_path
            .parent()
            .unwrap()
            .ends_with("images/generated/october"));
        let bytes = std::fs::read(&success.processed_path).unwrap();
        assert_eq!(dimensions(&bytes).unwrap(), (WIDTH, HEIGHT));
    }
}

#[tokio::test]
async fn test_upload_timeout_leaves_prior_artwork_in_place() {
    let frame = FrameTest::new();
    let layout = frame.config.layout();
    layout.create().unwrap();

    // Something already on the display
    let prior = layout.processed.join("previous.jpg");
    std::fs::write(&prior, common::sample_png(99)).unwrap();
    let archive = ArtworkArchive::new(&layout.archive, frame.config.settings.archive.clone());
    archive.rotate(&prior, Utc::now(), Some("old".into())).unwrap();

    let mut pipeline = Pipeline::new(
        &frame.config,
        FakeGenerator::default(),
        Some(FakeUploader::new(UploadBehavior::TimeOut)),
    )
    .unwrap();
    let result = pipeline.run(&options(1, false)).await.unwrap();

    assert_eq!(result.succeeded, 0);
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.failures[0].stage, Stage::Uploading);
    assert!(result.failures[0].message.contains("timed out"));

    let active = archive.active().unwrap();
    assert_eq!(active.path, prior);
    assert_eq!(active.content_id.as_deref(), Some("old"));
    assert!(prior.exists());
    assert!(FrameTest::images_under(&layout.archive).is_empty());
}

#[tokio::test]
async fn test_test_mode_skips_upload() {
    let frame = FrameTest::new();
    let generator = FakeGenerator::default();

    let mut pipeline =
        Pipeline::new(&frame.config, generator.clone(), None::<FakeUploader>).unwrap();
    let result = pipeline.run(&options(2, true)).await.unwrap();

    assert!(result.test_mode);
    assert_eq!(result.succeeded, 2);
    assert!(result.successes.iter().all(|s| s.content_id.is_none()));
    assert!(result.successes.iter().all(|s| s.processed_path.exists()));
    assert!(pipeline.archive().active().is_none());
}

#[tokio::test]
async fn test_missing_uploader_fails_before_generation() {
    let frame = FrameTest::new();
    let generator = FakeGenerator::default();

    let mut pipeline =
        Pipeline::new(&frame.config, generator.clone(), None::<FakeUploader>).unwrap();
    let err = pipeline.run(&options(2, false)).await.unwrap_err();

    assert!(matches!(err, ConfigError::MissingCredential(_)));
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_zero_images_rejected() {
    let frame = FrameTest::new();
    let generator = FakeGenerator::default();
    let mut pipeline =
        Pipeline::new(&frame.config, generator.clone(), None::<FakeUploader>).unwrap();

    let err = pipeline.run(&options(0, true)).await.unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "num_images", .. }));
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_missing_month_is_a_config_error() {
    let frame = FrameTest::new();
    let themes_path = frame.config_dir().join(THEMES_FILE);
    let mut themes: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&themes_path).unwrap()).unwrap();
    themes.as_object_mut().unwrap().remove("march");
    std::fs::write(&themes_path, themes.to_string()).unwrap();

    let err = AppConfig::load(&frame.config_dir()).unwrap_err();
    assert!(matches!(err, ConfigError::MissingMonth(ref m) if m == "march"));
}

#[tokio::test]
async fn test_run_summary_written() {
    let frame = FrameTest::new();
    let mut pipeline = Pipeline::new(
        &frame.config,
        FakeGenerator::failing_on(&[1]),
        None::<FakeUploader>,
    )
    .unwrap();
    let result = pipeline.run(&options(2, true)).await.unwrap();

    let logs = frame.config.layout().logs;
    let summaries: Vec<_> = std::fs::read_dir(&logs)
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    assert_eq!(summaries.len(), 1);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summaries[0]).unwrap()).unwrap();
    assert_eq!(json["run_id"], result.run_id.to_string());
    assert_eq!(json["succeeded"], 1);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["failures"][0]["stage"], "generating");
}
