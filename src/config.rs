use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::dataset::split::{SeedMode, SplitRatios, DEFAULT_SEED};

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotateConfig {
    pub output_dir: PathBuf,
    pub min_box_size: u32,
    pub preview_path: Option<PathBuf>,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("annotations"),
            min_box_size: 0,
            preview_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    pub annotations_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ratios: SplitRatios,
    pub seed: u64,
    pub seed_mode: SeedMode,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            annotations_dir: PathBuf::from("annotations"),
            output_dir: PathBuf::from("new_dataset"),
            ratios: SplitRatios::default(),
            seed: DEFAULT_SEED,
            seed_mode: SeedMode::default(),
        }
    }
}

/// Tool settings: built-in defaults, overlaid by an optional TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    /// Ordered class list; a label's class id indexes into it.
    pub classes: Vec<String>,
    pub annotate: AnnotateConfig,
    pub split: SplitConfig,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            classes: vec!["rat".to_string()],
            annotate: AnnotateConfig::default(),
            split: SplitConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ToolConfigFile {
    classes: Option<Vec<String>>,
    #[serde(default)]
    annotate: AnnotateSection,
    #[serde(default)]
    split: SplitSection,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotateSection {
    output_dir: Option<PathBuf>,
    min_box_size: Option<u32>,
    preview_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SplitSection {
    annotations_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    train_ratio: Option<f64>,
    val_ratio: Option<f64>,
    test_ratio: Option<f64>,
    seed: Option<u64>,
    seed_mode: Option<SeedMode>,
}

impl ToolConfig {
    /// Defaults, or defaults overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: ToolConfigFile = toml::from_str(raw).context("Failed to parse TOML")?;
        let mut cfg = Self::default();

        if let Some(classes) = file.classes {
            cfg.classes = classes;
        }

        let annotate = file.annotate;
        if let Some(v) = annotate.output_dir {
            cfg.annotate.output_dir = v;
        }
        if let Some(v) = annotate.min_box_size {
            cfg.annotate.min_box_size = v;
        }
        if annotate.preview_path.is_some() {
            cfg.annotate.preview_path = annotate.preview_path;
        }

        let split = file.split;
        if let Some(v) = split.annotations_dir {
            cfg.split.annotations_dir = v;
        }
        if let Some(v) = split.output_dir {
            cfg.split.output_dir = v;
        }
        if let Some(v) = split.train_ratio {
            cfg.split.ratios.train = v;
        }
        if let Some(v) = split.val_ratio {
            cfg.split.ratios.val = v;
        }
        if let Some(v) = split.test_ratio {
            cfg.split.ratios.test = v;
        }
        if let Some(v) = split.seed {
            cfg.split.seed = v;
        }
        if let Some(v) = split.seed_mode {
            cfg.split.seed_mode = v;
        }

        Ok(cfg)
    }
}
