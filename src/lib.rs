// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod compositor; // trail overlay synthesis
pub mod config; // CLI arguments
pub mod decoder; // raw tensors -> candidate detections
pub mod input; // frame source contract
pub mod ort_backend;
pub mod pipeline; // capture loop + export
pub mod renderer; // letterbox compositing onto a surface
pub mod store; // per-frame candidate records

pub use crate::compositor::{OctagonVertices, SilhouetteVertices, TrailCompositor};
pub use crate::config::{Args, TargetKind};
pub use crate::decoder::{CandidateDecoder, DecoderConfig, ProtoLayout};
pub use crate::ort_backend::{Engine, OrtEP, OrtEngine, RawPrediction};
pub use crate::renderer::FrameRenderer;
pub use crate::store::TrackStore;

use ndarray::Array2;

/// Greedy NMS over scored boxes. `xs` is sorted by confidence descending and
/// truncated in place to the surviving set; any payload rides along in `.1`.
pub fn non_max_suppression<T>(xs: &mut Vec<(Bbox, T)>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.0.confidence().partial_cmp(&b1.0.confidence()).unwrap());

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].0.iou(&xs[index].0);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Point2 {
    // a point2d with x, y
    x: f32,
    y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    // a bounding box around an object
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn tl(&self) -> Point2 {
        Point2::new(self.xmin, self.ymin)
    }

    pub fn br(&self) -> Point2 {
        Point2::new(self.xmax(), self.ymax())
    }

    pub fn cxcy(&self) -> Point2 {
        Point2::new(self.xmin + self.width / 2., self.ymin + self.height / 2.)
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// One candidate detection of the tracked object in a single frame.
///
/// The mask is a low-resolution confidence grid aligned to the original
/// image's aspect ratio (letterbox padding already stripped); it is NOT at
/// display resolution. Rows index y, columns index x.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    bbox: Bbox,
    mask: Array2<f32>,
}

impl Detection {
    pub fn new(bbox: Bbox, mask: Array2<f32>) -> Self {
        Self { bbox, mask }
    }

    pub fn bbox(&self) -> &Bbox {
        &self.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.bbox.confidence
    }

    pub fn mask(&self) -> &Array2<f32> {
        &self.mask
    }

    /// (height, width) of the confidence grid.
    pub fn mask_dim(&self) -> (usize, usize) {
        self.mask.dim()
    }
}
