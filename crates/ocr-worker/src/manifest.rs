//! Batch manifests: the classified blocks of one uploaded image
//!
//! ```json
//! {
//!   "blocks": [
//!     { "id": "q1-stem", "kind": "problem", "image_path": "q1/stem.png", "quality": "B" },
//!     { "id": "q1-eq", "kind": "formula", "image_path": "q1/eq.png" }
//!   ]
//! }
//! ```
//!
//! Relative image paths are resolved against the manifest's directory.

use ocr_cascade::{Modality, QualityTier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Classified region type, as produced by the block classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Problem,
    Options,
    Formula,
    Figure,
    Solution,
}

impl BlockKind {
    /// Recognition path for this kind; figures are not recognized.
    pub fn modality(self) -> Option<Modality> {
        match self {
            Self::Problem | Self::Options | Self::Solution => Some(Modality::Text),
            Self::Formula => Some(Modality::Formula),
            Self::Figure => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
    pub image_path: PathBuf,
    #[serde(default)]
    pub quality: QualityTier,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("block id must not be empty (block #{0})")]
    EmptyId(usize),

    #[error("duplicate block id {0:?}")]
    DuplicateId(String),
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest: Manifest =
            serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        manifest.validate()?;

        if let Some(base) = path.parent() {
            manifest.resolve_paths(base);
        }
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut seen = HashSet::new();
        for (index, block) in self.blocks.iter().enumerate() {
            if block.id.trim().is_empty() {
                return Err(ManifestError::EmptyId(index));
            }
            if !seen.insert(block.id.as_str()) {
                return Err(ManifestError::DuplicateId(block.id.clone()));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for block in &mut self.blocks {
            if block.image_path.is_relative() {
                block.image_path = base.join(&block.image_path);
            }
        }
    }
}
