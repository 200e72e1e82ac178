// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Frame input contract. Video-container decoding stays external: a source
// hands the pipeline an ordered, fixed-length sequence of raw frames plus
// one metadata record for the whole clip.

pub mod frames_dir;

pub use frames_dir::FramesDirSource;

use anyhow::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Source-clip metadata, one record per analysis session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Ordered frame producer. The frame count is fixed once the source is
/// opened; `next_frame` returns `None` after the last frame.
pub trait FrameSource {
    fn meta(&self) -> VideoMeta;

    fn frame_count(&self) -> usize;

    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
}
