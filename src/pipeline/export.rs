// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Export loop: renders every stored frame once, in increasing order, into a
// frame sink. Video encoding stays external; the provided sink writes a PNG
// sequence an external recorder can assemble.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use image::RgbaImage;

use crate::compositor::TrailCompositor;
use crate::gen_time_string;
use crate::renderer::FrameRenderer;
use crate::store::TrackStore;

/// Consumer of rendered frames. Implementations must tolerate being called
/// exactly once per index, in increasing order.
pub trait FrameSink {
    fn write_frame(&mut self, index: usize, frame: &RgbaImage) -> Result<()>;
}

/// Writes `frame_00000.png`-style files into a timestamped directory.
pub struct PngSequenceSink {
    dir: PathBuf,
}

impl PngSequenceSink {
    pub fn create(parent: &Path) -> Result<Self> {
        let dir = parent.join(format!("export_{}", gen_time_string("-")));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create export directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FrameSink for PngSequenceSink {
    fn write_frame(&mut self, index: usize, frame: &RgbaImage) -> Result<()> {
        let path = self.dir.join(format!("frame_{index:05}.png"));
        frame
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

pub struct Exporter;

impl Exporter {
    /// Render and sink every frame. The cancel flag is checked between
    /// frames only — no partial writes happen mid-frame, so aborting is
    /// always safe at the loop boundary. Returns the number of frames
    /// written.
    pub fn export(
        store: &TrackStore,
        compositor: &mut TrailCompositor,
        renderer: &mut FrameRenderer,
        sink: &mut dyn FrameSink,
        cancel: &AtomicBool,
    ) -> Result<usize> {
        let total = store.frame_count();
        let mut written = 0;
        for index in 0..total {
            if cancel.load(Ordering::Relaxed) {
                log::info!("export aborted at frame {}/{}", index, total);
                break;
            }
            let Some(image) = store.image_at(index) else {
                break;
            };
            let overlay = compositor.compose(store, index);
            let surface = renderer.render(image, overlay);
            sink.write_frame(index, surface)?;
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use ndarray::Array2;

    use crate::input::VideoMeta;
    use crate::{Bbox, Detection};

    struct CountingSink {
        frames: Vec<usize>,
    }

    impl FrameSink for CountingSink {
        fn write_frame(&mut self, index: usize, frame: &RgbaImage) -> Result<()> {
            assert!(frame.width() > 0);
            self.frames.push(index);
            Ok(())
        }
    }

    fn small_store(frames: usize) -> TrackStore {
        let mut store = TrackStore::new(VideoMeta {
            width: 32,
            height: 32,
            fps: 30.0,
        });
        for _ in 0..frames {
            store.append(
                DynamicImage::new_rgba8(32, 32),
                vec![Detection::new(
                    Bbox::new(4., 4., 8., 8., 0.9),
                    Array2::from_elem((8, 8), 1.0),
                )],
            );
        }
        store
    }

    #[test]
    fn exports_every_frame_in_order() {
        let store = small_store(4);
        let mut compositor = TrailCompositor::new(3, 0.5);
        let mut renderer = FrameRenderer::new(64, 64);
        let mut sink = CountingSink { frames: Vec::new() };
        let cancel = AtomicBool::new(false);

        let written =
            Exporter::export(&store, &mut compositor, &mut renderer, &mut sink, &cancel)
                .unwrap();
        assert_eq!(written, 4);
        assert_eq!(sink.frames, vec![0, 1, 2, 3]);
    }

    #[test]
    fn cancellation_stops_between_frames() {
        let store = small_store(4);
        let mut compositor = TrailCompositor::new(3, 0.5);
        let mut renderer = FrameRenderer::new(64, 64);
        let mut sink = CountingSink { frames: Vec::new() };
        let cancel = AtomicBool::new(true);

        let written =
            Exporter::export(&store, &mut compositor, &mut renderer, &mut sink, &cancel)
                .unwrap();
        assert_eq!(written, 0);
        assert!(sink.frames.is_empty());
    }
}
