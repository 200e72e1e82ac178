// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Per-frame record of decoded candidates plus the analyst's selection.
// Append-only in frame order; only the selection is ever mutated.

use image::DynamicImage;

use crate::input::VideoMeta;
use crate::Detection;

/// One decoded frame: raw image, candidate list, current selection.
#[derive(Debug)]
pub struct FrameRecord {
    image: DynamicImage,
    candidates: Vec<Detection>,
    selected: Option<usize>,
}

/// Ordered store of frame records for one analysis session. Replaced
/// wholesale when a new video is loaded.
///
/// The selection API is UI-facing and deliberately relaxed: out-of-range
/// indices clear the selection or no-op instead of panicking, because they
/// originate from transient UI states that must not interrupt rendering.
#[derive(Debug)]
pub struct TrackStore {
    meta: VideoMeta,
    frames: Vec<FrameRecord>,
}

impl TrackStore {
    pub fn new(meta: VideoMeta) -> Self {
        Self {
            meta,
            frames: Vec::new(),
        }
    }

    pub fn meta(&self) -> &VideoMeta {
        &self.meta
    }

    /// Push one decoded frame. The best candidate (index 0) is selected by
    /// default when any exist.
    pub fn append(&mut self, image: DynamicImage, candidates: Vec<Detection>) {
        let selected = if candidates.is_empty() { None } else { Some(0) };
        self.frames.push(FrameRecord {
            image,
            candidates,
            selected,
        });
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn image_at(&self, index: usize) -> Option<&DynamicImage> {
        self.frames.get(index).map(|f| &f.image)
    }

    /// Candidates of frame `index`, empty when out of range.
    pub fn candidates_at(&self, index: usize) -> &[Detection] {
        self.frames
            .get(index)
            .map(|f| f.candidates.as_slice())
            .unwrap_or(&[])
    }

    /// Currently selected candidate index of frame `index`, if any.
    pub fn selection_at(&self, index: usize) -> Option<usize> {
        let record = self.frames.get(index)?;
        let selected = record.selected?;
        // a stale stored index counts as no selection
        if selected < record.candidates.len() {
            Some(selected)
        } else {
            None
        }
    }

    /// The selected detection of frame `index`, if any.
    pub fn selected_at(&self, index: usize) -> Option<&Detection> {
        let selected = self.selection_at(index)?;
        self.frames[index].candidates.get(selected)
    }

    /// Set or clear the selection of frame `index`. `-1` always clears; any
    /// other value is accepted only when it indexes into the candidate list,
    /// otherwise the selection is cleared. Unknown frames are a no-op.
    pub fn set_selected(&mut self, index: usize, candidate_index: i32) {
        let Some(record) = self.frames.get_mut(index) else {
            return;
        };
        if candidate_index >= 0 && (candidate_index as usize) < record.candidates.len() {
            record.selected = Some(candidate_index as usize);
        } else {
            record.selected = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    use crate::Bbox;

    fn meta() -> VideoMeta {
        VideoMeta {
            width: 64,
            height: 64,
            fps: 30.0,
        }
    }

    fn frame_image() -> DynamicImage {
        DynamicImage::new_rgba8(64, 64)
    }

    fn candidate(conf: f32) -> Detection {
        Detection::new(
            Bbox::new(1., 1., 4., 4., conf),
            Array2::from_elem((8, 8), 1.0),
        )
    }

    #[test]
    fn append_selects_best_candidate_by_default() {
        let mut store = TrackStore::new(meta());
        store.append(frame_image(), vec![candidate(0.9), candidate(0.4)]);
        store.append(frame_image(), vec![]);
        assert_eq!(store.frame_count(), 2);
        assert_eq!(store.selection_at(0), Some(0));
        assert_eq!(store.selection_at(1), None);
        assert!(store.selected_at(1).is_none());
    }

    #[test]
    fn out_of_range_selection_is_coerced_to_none() {
        let mut store = TrackStore::new(meta());
        store.append(frame_image(), vec![candidate(0.9), candidate(0.4)]);
        store.set_selected(0, 99);
        assert_eq!(store.selection_at(0), None);
        assert!(store.selected_at(0).is_none());
    }

    #[test]
    fn negative_one_always_clears() {
        let mut store = TrackStore::new(meta());
        store.append(frame_image(), vec![candidate(0.9)]);
        store.set_selected(0, -1);
        assert!(store.selected_at(0).is_none());
        // reselect works afterwards
        store.set_selected(0, 0);
        assert_eq!(store.selection_at(0), Some(0));
    }

    #[test]
    fn unknown_frame_mutation_is_a_no_op() {
        let mut store = TrackStore::new(meta());
        store.append(frame_image(), vec![candidate(0.9)]);
        store.set_selected(7, 0);
        assert_eq!(store.frame_count(), 1);
        assert_eq!(store.selection_at(0), Some(0));
    }

    #[test]
    fn selection_invariant_holds_under_arbitrary_writes() {
        let mut store = TrackStore::new(meta());
        store.append(frame_image(), vec![candidate(0.9), candidate(0.5)]);
        store.append(frame_image(), vec![candidate(0.8)]);
        for (frame, value) in [(0usize, 1i32), (0, -1), (0, 2), (1, 0), (1, 5), (0, 0)] {
            store.set_selected(frame, value);
            for i in 0..store.frame_count() {
                if let Some(sel) = store.selection_at(i) {
                    assert!(sel < store.candidates_at(i).len());
                }
            }
        }
    }

    #[test]
    fn selected_at_is_idempotent() {
        let mut store = TrackStore::new(meta());
        store.append(frame_image(), vec![candidate(0.9), candidate(0.5)]);
        store.set_selected(0, 1);
        let first = store.selected_at(0).cloned();
        let second = store.selected_at(0).cloned();
        assert_eq!(first, second);
        assert!((first.unwrap().confidence() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn candidates_at_out_of_range_is_empty() {
        let store = TrackStore::new(meta());
        assert!(store.candidates_at(3).is_empty());
        assert!(store.selected_at(3).is_none());
    }
}
