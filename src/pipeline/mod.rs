// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Capture pipeline: frame source -> inference engine -> decoder -> store.
// Strictly sequential; one inference completes before the next frame is
// pulled, so store order always matches frame order.

pub mod export;

pub use export::{Exporter, FrameSink, PngSequenceSink};

use std::time::Instant;

use anyhow::Result;

use crate::decoder::CandidateDecoder;
use crate::input::FrameSource;
use crate::ort_backend::Engine;
use crate::store::TrackStore;

/// Coarse progress states surfaced to the host while a clip is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Processing { index: usize, total: usize },
    Done,
}

pub trait ProgressSink {
    fn on_state(&mut self, state: ProcessState);
}

/// Progress reporting through the log facade.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_state(&mut self, state: ProcessState) {
        match state {
            ProcessState::Ready => log::info!("processing ready"),
            ProcessState::Processing { index, total } => {
                log::info!("frame {}/{}", index + 1, total)
            }
            ProcessState::Done => log::info!("processing done"),
        }
    }
}

pub struct Processor;

impl Processor {
    /// Run the whole clip through the engine and decoder, producing a fully
    /// populated store. Engine or decode failures abort the run; empty
    /// candidate lists do not.
    pub fn run(
        source: &mut dyn FrameSource,
        engine: &mut dyn Engine,
        decoder: &CandidateDecoder,
        progress: &mut dyn ProgressSink,
    ) -> Result<TrackStore> {
        let meta = source.meta();
        let total = source.frame_count();
        let mut store = TrackStore::new(meta);

        progress.on_state(ProcessState::Ready);
        let t_all = Instant::now();

        let mut index = 0;
        while let Some(image) = source.next_frame()? {
            let raw = engine.process(&image)?;
            let candidates = decoder.decode(
                raw.preds.view(),
                raw.protos.view(),
                meta.width,
                meta.height,
            )?;
            store.append(image, candidates);
            progress.on_state(ProcessState::Processing { index, total });
            index += 1;
        }

        progress.on_state(ProcessState::Done);
        log::debug!("processed {} frames in {:?}", index, t_all.elapsed());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;
    use ndarray::{Array2, Array3};

    use crate::decoder::{DecoderConfig, ProtoLayout};
    use crate::input::VideoMeta;
    use crate::ort_backend::RawPrediction;

    struct SyntheticSource {
        meta: VideoMeta,
        remaining: usize,
    }

    impl FrameSource for SyntheticSource {
        fn meta(&self) -> VideoMeta {
            self.meta
        }

        fn frame_count(&self) -> usize {
            self.remaining
        }

        fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(DynamicImage::new_rgba8(
                self.meta.width,
                self.meta.height,
            )))
        }
    }

    /// Emits one fixed centered detection per frame.
    struct SyntheticEngine;

    impl Engine for SyntheticEngine {
        fn input_size(&self) -> u32 {
            640
        }

        fn process(&mut self, _image: &DynamicImage) -> Result<RawPrediction> {
            let mut preds = Array2::<f32>::zeros((1, 8));
            preds
                .row_mut(0)
                .assign(&ndarray::arr1(&[320., 320., 64., 64., 0.9, 0., 3., 3.]));
            let protos = Array3::<f32>::from_elem((2, 8, 8), 1.0);
            Ok(RawPrediction {
                preds: preds.into_dyn(),
                protos: protos.into_dyn(),
            })
        }
    }

    struct RecordingProgress(Vec<ProcessState>);

    impl ProgressSink for RecordingProgress {
        fn on_state(&mut self, state: ProcessState) {
            self.0.push(state);
        }
    }

    #[test]
    fn capture_loop_appends_in_frame_order_with_progress() {
        let mut source = SyntheticSource {
            meta: VideoMeta {
                width: 640,
                height: 640,
                fps: 30.0,
            },
            remaining: 3,
        };
        let decoder = CandidateDecoder::new(DecoderConfig {
            input_size: 640,
            class_id: 0,
            nc: 2,
            nm: 2,
            conf: 0.25,
            iou: 0.45,
            topk: 5,
            proto_layout: ProtoLayout::ChannelFirst,
        });
        let mut progress = RecordingProgress(Vec::new());

        let store = Processor::run(
            &mut source,
            &mut SyntheticEngine,
            &decoder,
            &mut progress,
        )
        .unwrap();

        assert_eq!(store.frame_count(), 3);
        for i in 0..3 {
            assert_eq!(store.candidates_at(i).len(), 1);
            assert_eq!(store.selection_at(i), Some(0));
        }
        assert_eq!(progress.0.first(), Some(&ProcessState::Ready));
        assert_eq!(progress.0.last(), Some(&ProcessState::Done));
        assert_eq!(
            progress
                .0
                .iter()
                .filter(|s| matches!(s, ProcessState::Processing { .. }))
                .count(),
            3
        );
    }
}
