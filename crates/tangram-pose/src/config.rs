//! JSON configuration for [`TangramPipeline`](crate::TangramPipeline).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tangram_pose_refine::{MaskDecodeParams, RefinerParams};
use tangram_pose_track::TrackingParams;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn default_mask_refine_iterations() -> usize {
    2
}

/// Every tunable of the pipeline. Missing fields fall back to their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub tracking: TrackingParams,
    #[serde(default)]
    pub refiner: RefinerParams,
    #[serde(default)]
    pub mask_decode: MaskDecodeParams,
    /// Boundary-band passes applied to each upsampled mask.
    #[serde(default = "default_mask_refine_iterations")]
    pub mask_refine_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tracking: TrackingParams::default(),
            refiner: RefinerParams::default(),
            mask_decode: MaskDecodeParams::default(),
            mask_refine_iterations: default_mask_refine_iterations(),
        }
    }
}

impl PipelineConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn with_locking(mut self, enabled: bool) -> Self {
        self.tracking.locking_enabled = enabled;
        self
    }
}
