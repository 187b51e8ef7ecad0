//! Artwork archive
//!
//! Tracks which processed image is currently on the display (`active.json`)
//! and moves superseded or stale images under `images/archive/<YYYY-MM>/`.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Layout;
use crate::theme::Month;

const ACTIVE_FILE: &str = "active.json";
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Archive configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Generated images older than this are swept
    pub generated_retention_days: i64,
    /// Processed images older than this are swept
    pub processed_retention_days: i64,
    /// Run the stale sweep at the end of each run
    pub sweep_stale: bool,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            generated_retention_days: 2,
            processed_retention_days: 7,
            sweep_stale: true,
        }
    }
}

/// The image currently on the display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveArtwork {
    pub path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub content_id: Option<String>,
}

/// Archive rooted at `images/archive`
#[derive(Debug, Clone)]
pub struct ArtworkArchive {
    root: PathBuf,
    settings: ArchiveSettings,
}

impl ArtworkArchive {
    pub fn new(root: impl Into<PathBuf>, settings: ArchiveSettings) -> Self {
        Self {
            root: root.into(),
            settings,
        }
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(ACTIVE_FILE)
    }

    /// Currently recorded active artwork, if any
    pub fn active(&self) -> Option<ActiveArtwork> {
        let path = self.state_path();
        let json = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&json) {
            Ok(active) => Some(active),
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable active record: {}", e);
                None
            }
        }
    }

    /// Record `new_active` as the displayed image and archive the one it
    /// replaced. Call only after the upload is confirmed.
    ///
    /// Returns where the previous image was moved, if it was.
    pub fn rotate(
        &self,
        new_active: &Path,
        uploaded_at: DateTime<Utc>,
        content_id: Option<String>,
    ) -> std::io::Result<Option<PathBuf>> {
        std::fs::create_dir_all(&self.root)?;

        let mut archived = None;
        if let Some(prior) = self.active() {
            if prior.path != new_active && prior.path.exists() {
                let file_name = prior
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "artwork.jpg".to_string());
                let dest = self
                    .month_dir(uploaded_at)
                    .join(format!("{}_{}", uploaded_at.format("%Y%m%dT%H%M%S"), file_name));
                move_file(&prior.path, &dest)?;
                info!(
                    from = %prior.path.display(),
                    to = %dest.display(),
                    "archived previous artwork"
                );
                archived = Some(dest);
            }
        }

        let record = ActiveArtwork {
            path: new_active.to_path_buf(),
            uploaded_at,
            content_id,
        };
        let json = serde_json::to_string_pretty(&record).map_err(std::io::Error::other)?;
        std::fs::write(self.state_path(), json)?;
        Ok(archived)
    }

    fn month_dir(&self, at: DateTime<Utc>) -> PathBuf {
        self.root.join(at.format("%Y-%m").to_string())
    }

    /// Move generated and processed images past their retention into the
    /// archive. The active artwork is never moved. Returns the count moved.
    pub fn sweep_stale(&self, layout: &Layout, now: DateTime<Utc>) -> std::io::Result<usize> {
        let active = self.active().map(|a| a.path);
        let dest_root = self.month_dir(now);
        let mut moved = 0;

        for (dir, label, days) in [
            (&layout.generated, "generated", self.settings.generated_retention_days),
            (&layout.processed, "processed", self.settings.processed_retention_days),
        ] {
            if !dir.exists() {
                continue;
            }
            let cutoff = now - Duration::days(days);

            // Loose files at the top level
            moved += sweep_dir(dir, &dest_root, &format!("{}_", label), cutoff, active.as_deref())?;

            // Per-month subfolders
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type()?.is_dir() && Month::parse(&name).is_some() {
                    let dest = dest_root.join(format!("{}_{}", label, name));
                    moved += sweep_dir(&entry.path(), &dest, "", cutoff, active.as_deref())?;
                }
            }
        }

        if moved > 0 {
            info!(moved, archive = %dest_root.display(), "archived stale images");
        }
        Ok(moved)
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn modified_at(path: &Path) -> std::io::Result<DateTime<Utc>> {
    let modified: SystemTime = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

fn sweep_dir(
    dir: &Path,
    dest: &Path,
    prefix: &str,
    cutoff: DateTime<Utc>,
    active: Option<&Path>,
) -> std::io::Result<usize> {
    let mut moved = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_image(&path) || Some(path.as_path()) == active {
            continue;
        }
        if modified_at(&path)? >= cutoff {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = dest.join(format!("{}{}", prefix, name));
        move_file(&path, &target)?;
        debug!(from = %path.display(), to = %target.display(), "swept");
        moved += 1;
    }
    Ok(moved)
}

/// Rename, falling back to copy + remove across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_err() {
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Layout, ArtworkArchive) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        layout.create().unwrap();
        let archive = ArtworkArchive::new(&layout.archive, ArchiveSettings::default());
        (dir, layout, archive)
    }

    #[test]
    fn test_first_rotation_archives_nothing() {
        let (_dir, layout, archive) = setup();
        let first = layout.processed.join("one.jpg");
        std::fs::write(&first, b"one").unwrap();

        let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        assert_eq!(archive.rotate(&first, at, None).unwrap(), None);
        assert_eq!(archive.active().unwrap().path, first);
        assert!(first.exists());
    }

    #[test]
    fn test_rotation_moves_prior_keyed_by_timestamp() {
        let (_dir, layout, archive) = setup();
        let first = layout.processed.join("one.jpg");
        let second = layout.processed.join("two.jpg");
        std::fs::write(&first, b"one").unwrap();
        std::fs::write(&second, b"two").unwrap();

        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 4, 2, 9, 30, 15).unwrap();
        archive.rotate(&first, t1, Some("c1".into())).unwrap();
        let moved = archive.rotate(&second, t2, Some("c2".into())).unwrap().unwrap();

        assert_eq!(
            moved,
            layout.archive.join("2026-04").join("20260402T093015_one.jpg")
        );
        assert!(moved.exists());
        assert!(!first.exists());
        let active = archive.active().unwrap();
        assert_eq!(active.path, second);
        assert_eq!(active.content_id.as_deref(), Some("c2"));
    }

    #[test]
    fn test_sweep_moves_only_stale_files() {
        let (_dir, layout, archive) = setup();
        let june = layout.generated.join("june");
        std::fs::create_dir_all(&june).unwrap();
        std::fs::write(june.join("a.jpg"), b"a").unwrap();
        std::fs::write(layout.generated.join("loose.png"), b"b").unwrap();
        std::fs::write(layout.processed.join("p.jpg"), b"c").unwrap();
        std::fs::write(layout.generated.join("notes.txt"), b"d").unwrap();

        // Three days on: generated (2 day retention) is stale, processed (7) is not
        let now = Utc::now() + Duration::days(3);
        let moved = archive.sweep_stale(&layout, now).unwrap();
        assert_eq!(moved, 2);

        let month = archive.month_dir(now);
        assert!(month.join("generated_june").join("a.jpg").exists());
        assert!(month.join("generated_loose.png").exists());
        assert!(layout.processed.join("p.jpg").exists());
        assert!(layout.generated.join("notes.txt").exists());
    }

    #[test]
    fn test_sweep_keeps_active_artwork() {
        let (_dir, layout, archive) = setup();
        let active = layout.processed.join("current.jpg");
        std::fs::write(&active, b"x").unwrap();
        archive.rotate(&active, Utc::now(), None).unwrap();

        let moved = archive
            .sweep_stale(&layout, Utc::now() + Duration::days(30))
            .unwrap();
        assert_eq!(moved, 0);
        assert!(active.exists());
    }
}
