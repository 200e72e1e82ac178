// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};

use super::{FrameSource, VideoMeta};

const META_FILE: &str = "meta.json";
const DEFAULT_FPS: f64 = 30.0;

/// Reads a frame sequence extracted to a directory by an external converter:
/// one image file per frame, ordered by file name, with an optional
/// `meta.json` sidecar carrying `{width, height, fps}`. Without the sidecar,
/// dimensions are probed from the first frame and fps falls back to 30.
pub struct FramesDirSource {
    meta: VideoMeta,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl FramesDirSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("png" | "jpg" | "jpeg" | "bmp")
                )
            })
            .collect();
        files.sort();
        ensure!(!files.is_empty(), "no frame images in {}", dir.display());

        let meta_path = dir.join(META_FILE);
        let meta = if meta_path.is_file() {
            let raw = fs::read_to_string(&meta_path)?;
            serde_json::from_str(&raw)
                .with_context(|| format!("malformed {}", meta_path.display()))?
        } else {
            let (width, height) = image::image_dimensions(&files[0])
                .with_context(|| format!("failed to probe {}", files[0].display()))?;
            log::warn!(
                "{} missing, probed {}x{} and assuming {} fps",
                META_FILE,
                width,
                height,
                DEFAULT_FPS
            );
            VideoMeta {
                width,
                height,
                fps: DEFAULT_FPS,
            }
        };

        Ok(Self {
            meta,
            files,
            cursor: 0,
        })
    }
}

impl FrameSource for FramesDirSource {
    fn meta(&self) -> VideoMeta {
        self.meta
    }

    fn frame_count(&self) -> usize {
        self.files.len()
    }

    fn next_frame(&mut self) -> Result<Option<image::DynamicImage>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        let img = image::open(path)
            .with_context(|| format!("failed to decode frame {}", path.display()))?;
        self.cursor += 1;
        Ok(Some(img))
    }
}
