//! Leakage-free train/valid/test split: every video's frames land in one
//! pass over that video's group, and a sample is assigned to exactly one subset.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::grouping::group_samples;
use super::{Sample, Subset, VideoGroup};
use crate::annotation::store::{IMAGES_DIR, LABELS_DIR};
use crate::error::{Error, Result};

pub const RATIO_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_SEED: u64 = 42;
pub const MANIFEST_FILE: &str = "split_manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.80,
            val: 0.15,
            test: 0.05,
        }
    }
}

impl SplitRatios {
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self> {
        let ratios = Self { train, val, test };
        ratios.validate()?;
        Ok(ratios)
    }

    pub fn validate(&self) -> Result<()> {
        let sum = self.train + self.val + self.test;
        let in_range = [self.train, self.val, self.test]
            .iter()
            .all(|r| (0.0..=1.0).contains(r));
        if !in_range || (sum - 1.0).abs() > RATIO_TOLERANCE {
            return Err(Error::InvalidRatio { sum });
        }
        Ok(())
    }
}

/// How the shuffle RNG is seeded across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SeedMode {
    /// One stream seeded once, consumed group after group in title order.
    #[default]
    Shared,
    /// A fresh stream per group, seeded with `seed ^ fnv1a64(video_title)`.
    PerGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubsetCounts {
    pub train: usize,
    pub valid: usize,
    pub test: usize,
}

impl SubsetCounts {
    fn add(&mut self, subset: Subset) {
        match subset {
            Subset::Train => self.train += 1,
            Subset::Valid => self.valid += 1,
            Subset::Test => self.test += 1,
        }
    }

    pub fn get(&self, subset: Subset) -> usize {
        match subset {
            Subset::Train => self.train,
            Subset::Valid => self.valid,
            Subset::Test => self.test,
        }
    }

    pub fn total(&self) -> usize {
        self.train + self.valid + self.test
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedSample {
    pub video_title: String,
    pub sample: Sample,
    pub subset: Subset,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAssignment {
    entries: Vec<AssignedSample>,
}

impl SplitAssignment {
    pub fn entries(&self) -> &[AssignedSample] {
        &self.entries
    }

    pub fn subset_of(&self, stem: &str) -> Option<Subset> {
        self.entries
            .iter()
            .find(|e| e.sample.stem == stem)
            .map(|e| e.subset)
    }

    pub fn counts(&self) -> SubsetCounts {
        let mut counts = SubsetCounts::default();
        for entry in &self.entries {
            counts.add(entry.subset);
        }
        counts
    }

    pub fn group_counts(&self) -> BTreeMap<&str, SubsetCounts> {
        let mut groups: BTreeMap<&str, SubsetCounts> = BTreeMap::new();
        for entry in &self.entries {
            groups
                .entry(entry.video_title.as_str())
                .or_default()
                .add(entry.subset);
        }
        groups
    }
}

#[derive(Debug, Clone)]
pub struct DeterministicSplitter {
    ratios: SplitRatios,
    seed: u64,
    mode: SeedMode,
}

impl DeterministicSplitter {
    pub fn new(ratios: SplitRatios, seed: u64) -> Result<Self> {
        ratios.validate()?;
        Ok(Self {
            ratios,
            seed,
            mode: SeedMode::default(),
        })
    }

    pub fn with_seed_mode(mut self, mode: SeedMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn ratios(&self) -> SplitRatios {
        self.ratios
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn seed_mode(&self) -> SeedMode {
        self.mode
    }

    /// Shuffle each group and cut it into train / valid / test by
    /// `floor(n * ratio)`, the remainder going to test.
    pub fn assign(&self, groups: &[VideoGroup]) -> SplitAssignment {
        let mut ordered: Vec<&VideoGroup> = groups.iter().collect();
        ordered.sort_by(|a, b| a.video_title.cmp(&b.video_title));

        let mut shared_rng = StdRng::seed_from_u64(self.seed);
        let mut entries = Vec::with_capacity(groups.iter().map(|g| g.samples.len()).sum());

        for group in ordered {
            let mut samples = group.samples.clone();
            samples.sort();

            match self.mode {
                SeedMode::Shared => samples.shuffle(&mut shared_rng),
                SeedMode::PerGroup => {
                    let seed = self.seed ^ fnv1a64(group.video_title.as_bytes());
                    samples.shuffle(&mut StdRng::seed_from_u64(seed));
                }
            }

            let n = samples.len();
            let train_end = take_count(n, self.ratios.train);
            let val_end = (train_end + take_count(n, self.ratios.val)).min(n);

            for (position, sample) in samples.into_iter().enumerate() {
                let subset = if position < train_end {
                    Subset::Train
                } else if position < val_end {
                    Subset::Valid
                } else {
                    Subset::Test
                };
                entries.push(AssignedSample {
                    video_title: group.video_title.clone(),
                    sample,
                    subset,
                });
            }
        }

        SplitAssignment { entries }
    }
}

/// `floor(n * ratio)`, nudged so products like 20 * 0.15 do not fall one short.
fn take_count(n: usize, ratio: f64) -> usize {
    ((n as f64 * ratio) + 1e-9).floor().min(n as f64) as usize
}

/// 64-bit FNV-1a, stable across platforms and releases.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    pub counts: SubsetCounts,
    pub images_copied: usize,
    pub labels_copied: usize,
    /// Stems whose label file was absent at copy time.
    pub missing_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub video_title: String,
    #[serde(flatten)]
    pub counts: SubsetCounts,
}

/// Record of a split, written next to the copied subsets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitManifest {
    pub seed: u64,
    pub seed_mode: SeedMode,
    pub ratios: SplitRatios,
    pub totals: SubsetCounts,
    pub groups: Vec<GroupSummary>,
    pub assignments: BTreeMap<String, Subset>,
    pub missing_labels: Vec<String>,
}

impl SplitManifest {
    pub fn new(
        splitter: &DeterministicSplitter,
        assignment: &SplitAssignment,
        report: &SplitReport,
    ) -> Self {
        Self {
            seed: splitter.seed(),
            seed_mode: splitter.seed_mode(),
            ratios: splitter.ratios(),
            totals: assignment.counts(),
            groups: assignment
                .group_counts()
                .into_iter()
                .map(|(title, counts)| GroupSummary {
                    video_title: title.to_string(),
                    counts,
                })
                .collect(),
            assignments: assignment
                .entries()
                .iter()
                .map(|e| (e.sample.stem.clone(), e.subset))
                .collect(),
            missing_labels: report.missing_labels.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| Error::Manifest {
            path: path.to_path_buf(),
            source: e,
        })?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|e| Error::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_slice(&raw).map_err(|e| Error::Manifest {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Create `{output}/{train,valid,test}/{images,labels}`.
pub fn prepare_layout(output: &Path) -> Result<()> {
    for subset in Subset::ALL {
        for kind in [IMAGES_DIR, LABELS_DIR] {
            let dir = output.join(subset.dir_name()).join(kind);
            fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
    }
    Ok(())
}

/// Copy every assigned image and, when present, its label into the subset layout.
pub fn copy_assignment(
    assignment: &SplitAssignment,
    images_dir: &Path,
    labels_dir: &Path,
    output: &Path,
) -> Result<SplitReport> {
    prepare_layout(output)?;

    let mut report = SplitReport {
        counts: assignment.counts(),
        ..SplitReport::default()
    };

    for entry in assignment.entries() {
        let subset_dir = output.join(entry.subset.dir_name());

        let src_image = images_dir.join(&entry.sample.image_file);
        let dst_image = subset_dir.join(IMAGES_DIR).join(&entry.sample.image_file);
        copy_file(&src_image, &dst_image)?;
        report.images_copied += 1;

        let label_file = entry.sample.label_file();
        let src_label = labels_dir.join(&label_file);
        if src_label.is_file() {
            copy_file(&src_label, &subset_dir.join(LABELS_DIR).join(&label_file))?;
            report.labels_copied += 1;
        } else {
            tracing::debug!(stem = %entry.sample.stem, "no label file, copied image only");
            report.missing_labels.push(entry.sample.stem.clone());
        }
    }

    if !report.missing_labels.is_empty() {
        tracing::warn!(
            count = report.missing_labels.len(),
            "images without label files (no annotations, or label deleted)"
        );
    }

    Ok(report)
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map_err(|e| Error::io(src, e))?;
    Ok(())
}

/// Group, assign and copy an annotation corpus (`{annotations}/images`,
/// `{annotations}/labels`) into `output`. With `dry_run` nothing is written.
pub fn split_corpus(
    annotations_dir: &Path,
    output: &Path,
    splitter: &DeterministicSplitter,
    dry_run: bool,
) -> Result<(SplitAssignment, SplitReport)> {
    let images_dir = annotations_dir.join(IMAGES_DIR);
    let labels_dir = annotations_dir.join(LABELS_DIR);

    let groups = group_samples(&images_dir)?;
    let assignment = splitter.assign(&groups);

    let report = if dry_run {
        SplitReport {
            counts: assignment.counts(),
            ..SplitReport::default()
        }
    } else {
        let report = copy_assignment(&assignment, &images_dir, &labels_dir, output)?;
        let manifest_path: PathBuf = output.join(MANIFEST_FILE);
        SplitManifest::new(splitter, &assignment, &report).save(&manifest_path)?;
        report
    };

    let counts = report.counts;
    tracing::info!("Total images: {}", counts.total());
    tracing::info!("Train: {} images", counts.train);
    tracing::info!("Val:   {} images", counts.valid);
    tracing::info!("Test:  {} images", counts.test);

    Ok((assignment, report))
}
