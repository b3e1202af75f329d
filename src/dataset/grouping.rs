use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{Sample, VideoGroup};
use crate::annotation::FRAME_MARKER;
use crate::error::{Error, Result};

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Video title of a sample stem: everything before the first `_frame_`,
/// or the whole stem when the marker is absent.
pub fn video_title(stem: &str) -> &str {
    stem.split_once(FRAME_MARKER)
        .map(|(title, _)| title)
        .unwrap_or(stem)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// Group the images of `images_dir` by source video.
///
/// Groups come back sorted by title, samples sorted by filename, so the
/// result does not depend on directory listing order.
pub fn group_samples(images_dir: &Path) -> Result<Vec<VideoGroup>> {
    let entries = fs::read_dir(images_dir).map_err(|e| Error::io(images_dir, e))?;

    let mut groups: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(images_dir, e))?;
        let path = entry.path();
        if !path.is_file() || !is_image_file(&path) {
            continue;
        }

        let (Some(image_file), Some(stem)) = (
            path.file_name().and_then(|s| s.to_str()),
            path.file_stem().and_then(|s| s.to_str()),
        ) else {
            tracing::warn!(path = %path.display(), "skipping non UTF-8 filename");
            continue;
        };

        groups
            .entry(video_title(stem).to_string())
            .or_default()
            .push(Sample {
                stem: stem.to_string(),
                image_file: image_file.to_string(),
            });
    }

    let groups: Vec<VideoGroup> = groups
        .into_iter()
        .map(|(video_title, mut samples)| {
            samples.sort();
            VideoGroup {
                video_title,
                samples,
            }
        })
        .collect();

    tracing::info!(
        groups = groups.len(),
        samples = groups.iter().map(|g| g.samples.len()).sum::<usize>(),
        "grouped corpus by source video"
    );

    Ok(groups)
}
