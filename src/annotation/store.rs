use std::fs;
use std::path::{Path, PathBuf};

use super::encoder;
use super::{sample_stem, Frame, NormalizedLabel, PersistedSample};
use crate::error::{Error, Result};

pub const IMAGES_DIR: &str = "images";
pub const LABELS_DIR: &str = "labels";

/// Writes annotated samples under `{root}/images` and `{root}/labels`.
#[derive(Debug, Clone)]
pub struct SampleStore {
    images_dir: PathBuf,
    labels_dir: PathBuf,
}

impl SampleStore {
    pub fn create(root: &Path) -> Result<Self> {
        let images_dir = root.join(IMAGES_DIR);
        let labels_dir = root.join(LABELS_DIR);
        for dir in [&images_dir, &labels_dir] {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }

        Ok(Self {
            images_dir,
            labels_dir,
        })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn labels_dir(&self) -> &Path {
        &self.labels_dir
    }

    /// Write the undrawn frame as JPEG and its labels as text.
    ///
    /// Returns `None` without touching the disk when `labels` is empty.
    pub fn save(
        &self,
        video_title: &str,
        frame: &Frame,
        labels: &[NormalizedLabel],
    ) -> Result<Option<PersistedSample>> {
        if labels.is_empty() {
            return Ok(None);
        }

        let stem = sample_stem(video_title, frame.index);
        let image_path = self.images_dir.join(format!("{stem}.jpg"));
        let label_path = self.labels_dir.join(format!("{stem}.txt"));

        // An image is only ever on disk together with its label.
        fs::write(&label_path, encoder::serialize(labels))
            .map_err(|e| Error::io(&label_path, e))?;
        if let Err(e) = frame.image.save(&image_path) {
            if let Err(cleanup) = fs::remove_file(&label_path) {
                tracing::warn!(
                    path = %label_path.display(),
                    error = %cleanup,
                    "failed to remove label"
                );
            }
            return Err(Error::Image {
                path: image_path,
                source: e,
            });
        }

        Ok(Some(PersistedSample {
            stem,
            image_path,
            label_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::BoxAnnotation;
    use image::RgbImage;
    use tempfile::TempDir;

    #[test]
    fn test_save_writes_image_and_label_pair() {
        let tmp = TempDir::new().unwrap();
        let store = SampleStore::create(tmp.path()).unwrap();
        let frame = Frame::new(7, RgbImage::new(64, 48));
        let labels = vec![encoder::encode(&BoxAnnotation::new(0, (0, 0), (32, 24)), 64, 48)];

        let sample = store.save("Baseline", &frame, &labels).unwrap().unwrap();
        assert_eq!(sample.stem, "Baseline_frame_000007");
        assert_eq!(sample.image_path, tmp.path().join("images/Baseline_frame_000007.jpg"));
        assert!(sample.image_path.is_file());
        assert_eq!(
            fs::read_to_string(&sample.label_path).unwrap(),
            "0 0.250000 0.250000 0.500000 0.500000"
        );

        let saved = image::open(&sample.image_path).unwrap();
        assert_eq!((saved.width(), saved.height()), (64, 48));
    }

    #[test]
    fn test_empty_set_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = SampleStore::create(tmp.path()).unwrap();
        let frame = Frame::new(5, RgbImage::new(8, 8));

        assert_eq!(store.save("Baseline", &frame, &[]).unwrap(), None);
        assert_eq!(fs::read_dir(store.images_dir()).unwrap().count(), 0);
        assert_eq!(fs::read_dir(store.labels_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_unwritable_label_leaves_no_image() {
        let tmp = TempDir::new().unwrap();
        let store = SampleStore::create(tmp.path()).unwrap();
        fs::create_dir(store.labels_dir().join("clip_frame_000000.txt")).unwrap();
        let frame = Frame::new(0, RgbImage::new(16, 16));
        let labels = vec![encoder::encode(&BoxAnnotation::new(0, (0, 0), (8, 8)), 16, 16)];

        assert!(matches!(store.save("clip", &frame, &labels), Err(Error::Io { .. })));
        assert_eq!(fs::read_dir(store.images_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_unwritable_image_removes_label() {
        let tmp = TempDir::new().unwrap();
        let store = SampleStore::create(tmp.path()).unwrap();
        fs::create_dir(store.images_dir().join("clip_frame_000000.jpg")).unwrap();
        let frame = Frame::new(0, RgbImage::new(16, 16));
        let labels = vec![encoder::encode(&BoxAnnotation::new(0, (0, 0), (8, 8)), 16, 16)];

        assert!(matches!(store.save("clip", &frame, &labels), Err(Error::Image { .. })));
        assert_eq!(fs::read_dir(store.labels_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_create_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        SampleStore::create(tmp.path()).unwrap();
        SampleStore::create(tmp.path()).unwrap();
        assert!(tmp.path().join(LABELS_DIR).is_dir());
    }
}
