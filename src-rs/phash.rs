//! Average-brightness perceptual hash used to decide whether an activation
//! changed the screen.

use crate::error::Result;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use std::path::Path;

pub const HASH_SIDE: u32 = 8;

/// 64-bit average hash, bit `i` set when pixel `i` (row-major) is brighter
/// than the mean of the downscaled grayscale image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AverageHash(u64);

impl AverageHash {
    pub fn of(img: &DynamicImage) -> Self {
        let gray = img.to_luma8();
        let small = imageops::resize(&gray, HASH_SIDE, HASH_SIDE, FilterType::Lanczos3);
        let pixels: Vec<f64> = small.pixels().map(|p| f64::from(p.0[0])).collect();
        let mean = pixels.iter().sum::<f64>() / pixels.len().max(1) as f64;

        let mut bits = 0u64;
        for (idx, value) in pixels.iter().enumerate() {
            if *value > mean {
                bits |= 1 << idx;
            }
        }
        Self(bits)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let img = image::open(path)?;
        Ok(Self::of(&img))
    }

    pub fn distance(&self, other: &AverageHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for AverageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionEffect {
    Ineffective,
    Effective,
}

impl ActionEffect {
    /// Distances strictly below `cutoff` count as "nothing happened".
    pub fn from_distance(distance: u32, cutoff: u32) -> Self {
        if distance < cutoff {
            ActionEffect::Ineffective
        } else {
            ActionEffect::Effective
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VisualDiff {
    pub before: String,
    pub after: String,
    pub distance: u32,
    pub cutoff: u32,
    pub effect: ActionEffect,
}

pub fn compare_screenshots(before: &Path, after: &Path, cutoff: u32) -> Result<VisualDiff> {
    let before_hash = AverageHash::open(before)?;
    let after_hash = AverageHash::open(after)?;
    let distance = before_hash.distance(&after_hash);
    Ok(VisualDiff {
        before: before_hash.to_string(),
        after: after_hash.to_string(),
        distance,
        cutoff,
        effect: ActionEffect::from_distance(distance, cutoff),
    })
}
