//! Encoded image -> fixed-length feature vector.
//!
//! Steps: decode, ITU-R 601-2 luma, Catmull-Rom (bicubic) resize to the canonical
//! resolution, row-major flatten. Every step is integer or deterministic float
//! math, so the same payload always yields the same vector.

use image::error::{LimitError, LimitErrorKind};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageError, Luma, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::common::config::AppCfg;
use crate::common::error::{MlaasError, MlaasResult};

/// Side length of the canonical square resolution.
pub const CANONICAL_SIDE: u32 = 128;

/// Row-major pixel intensities in `[0, 255]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FeatureExtractor {
    width: u32,
    height: u32,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(CANONICAL_SIDE, CANONICAL_SIDE)
    }
}

impl FeatureExtractor {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn from_config(cfg: &AppCfg) -> Self {
        Self::new(cfg.feature_width, cfg.feature_height)
    }

    /// Length of every vector this extractor produces.
    pub fn feature_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn extract(&self, payload: &[u8]) -> MlaasResult<FeatureVector> {
        let decoded = image::load_from_memory(payload).map_err(MlaasError::Decode)?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(MlaasError::Decode(ImageError::Limits(LimitError::from_kind(
                LimitErrorKind::DimensionError,
            ))));
        }

        let gray = to_luma_601(&decoded.to_rgb8());
        let resized = imageops::resize(&gray, self.width, self.height, FilterType::CatmullRom);
        Ok(FeatureVector(
            resized.into_raw().into_iter().map(f64::from).collect(),
        ))
    }

    /// Extract many payloads in parallel; output order matches input order.
    pub fn extract_all<P>(&self, payloads: &[P]) -> MlaasResult<Vec<FeatureVector>>
    where
        P: AsRef<[u8]> + Sync,
    {
        payloads
            .par_iter()
            .map(|p| self.extract(p.as_ref()))
            .collect()
    }
}

/// `L = R*299/1000 + G*587/1000 + B*114/1000`, in 16.16 fixed point with rounding.
fn to_luma_601(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (u32::from(r) * 19_595 + u32::from(g) * 38_470 + u32::from(b) * 7_471 + 0x8000)
            >> 16;
        Luma([l as u8])
    })
}
