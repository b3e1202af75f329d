pub mod grouping;
pub mod split;

use std::fmt;

use serde::{Deserialize, Serialize};

/// An annotated image found in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sample {
    /// Filename without extension, `{video_title}_frame_{index:06}`.
    pub stem: String,
    /// Image filename inside the images directory.
    pub image_file: String,
}

impl Sample {
    pub fn label_file(&self) -> String {
        format!("{}.txt", self.stem)
    }
}

/// All samples cut from one source video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoGroup {
    pub video_title: String,
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subset {
    Train,
    Valid,
    Test,
}

impl Subset {
    pub const ALL: [Subset; 3] = [Subset::Train, Subset::Valid, Subset::Test];

    pub fn dir_name(self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Valid => "valid",
            Subset::Test => "test",
        }
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
