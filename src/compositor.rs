// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Trail compositor: folds the trailing window of selected masks into one
// low-resolution RGBA overlay. Consecutive masks are bridged with a filled
// polygon so fast motion reads as a continuous streak.

use image::{Rgba, RgbaImage};
use ndarray::Array2;

use crate::store::TrackStore;
use crate::Point2;

/// Oldest-to-newest alpha ramp of the trail tint.
const TRAIL_ALPHA_MIN: f32 = 75.0;
const TRAIL_ALPHA_MAX: f32 = 125.0;

const TRAIL_TINT: [u8; 3] = [0, 255, 0];
const CURRENT_TINT: [u8; 4] = [255, 128, 0, 180];

/// Reduce a mask to the outline vertices used for the bridging polygon.
/// Pluggable so the fill quality can be revisited without touching the
/// compositor's control flow.
pub trait SilhouetteVertices {
    fn extract(&self, mask: &Array2<f32>, threshold: f32) -> Vec<Point2>;
}

/// Extremal-point extractor: leftmost and rightmost qualifying pixel of the
/// first and the last qualifying row, up to four vertices per mask (eight
/// per bridged pair).
#[derive(Debug, Default)]
pub struct OctagonVertices;

impl SilhouetteVertices for OctagonVertices {
    fn extract(&self, mask: &Array2<f32>, threshold: f32) -> Vec<Point2> {
        let (rows, cols) = mask.dim();
        let row_span = |y: usize| {
            let mut left = None;
            let mut right = None;
            for x in 0..cols {
                if mask[[y, x]] >= threshold {
                    if left.is_none() {
                        left = Some(x);
                    }
                    right = Some(x);
                }
            }
            left.zip(right)
        };

        let top = (0..rows).find_map(|y| row_span(y).map(|(l, r)| (y, l, r)));
        let bottom = (0..rows).rev().find_map(|y| row_span(y).map(|(l, r)| (y, l, r)));
        let (Some((ty, tl, tr)), Some((by, bl, br))) = (top, bottom) else {
            return Vec::new();
        };

        let raw = [
            Point2::new(tl as f32, ty as f32),
            Point2::new(tr as f32, ty as f32),
            Point2::new(bl as f32, by as f32),
            Point2::new(br as f32, by as f32),
        ];
        let mut pts: Vec<Point2> = Vec::with_capacity(4);
        for p in raw {
            if !pts.contains(&p) {
                pts.push(p);
            }
        }
        pts
    }
}

pub struct TrailCompositor {
    trail: usize,
    conf: f32,
    vertices: Box<dyn SilhouetteVertices>,
    buffer: Option<RgbaImage>,
}

impl TrailCompositor {
    pub fn new(trail: usize, conf: f32) -> Self {
        Self {
            trail: trail.max(1),
            conf,
            vertices: Box::new(OctagonVertices),
            buffer: None,
        }
    }

    pub fn with_vertex_strategy(mut self, vertices: Box<dyn SilhouetteVertices>) -> Self {
        self.vertices = vertices;
        self
    }

    pub fn set_trail(&mut self, trail: usize) {
        self.trail = trail.max(1);
    }

    pub fn set_conf(&mut self, conf: f32) {
        self.conf = conf;
    }

    /// Composite the overlay for `index`. Returns `None` when no selected
    /// mask exists in `[0, index]` or the index is out of range — a normal
    /// "nothing to draw" outcome.
    ///
    /// The buffer is reused across calls while the mask resolution is stable;
    /// output is deterministic for identical store contents.
    pub fn compose(&mut self, store: &TrackStore, index: usize) -> Option<&RgbaImage> {
        if index >= store.frame_count() {
            return None;
        }

        // anchor: nearest frame at or before `index` with a selected mask;
        // it defines the grid resolution and receives the current tint
        let anchor = (0..=index).rev().find(|&j| {
            store.selected_at(j).is_some_and(|d| {
                let (h, w) = d.mask_dim();
                h > 0 && w > 0
            })
        })?;
        let (mh, mw) = store.selected_at(anchor)?.mask_dim();

        let needs_alloc = self
            .buffer
            .as_ref()
            .map_or(true, |b| b.width() != mw as u32 || b.height() != mh as u32);
        if needs_alloc {
            self.buffer = Some(RgbaImage::new(mw as u32, mh as u32));
        }
        let mut buffer = self.buffer.take()?;
        for px in buffer.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }

        let start = (index as i64 - self.trail as i64 + 1).max(1) as usize;
        for j in start..=index {
            let color = Rgba([
                TRAIL_TINT[0],
                TRAIL_TINT[1],
                TRAIL_TINT[2],
                self.trail_alpha(j, index),
            ]);
            // masks at a foreign resolution are treated as not present
            let prev = store
                .selected_at(j - 1)
                .map(|d| d.mask())
                .filter(|m| m.dim() == (mh, mw));
            let curr = store
                .selected_at(j)
                .map(|d| d.mask())
                .filter(|m| m.dim() == (mh, mw));

            if let Some(m) = prev {
                stamp_mask(&mut buffer, m, self.conf, color);
            }
            if let Some(m) = curr {
                stamp_mask(&mut buffer, m, self.conf, color);
            }
            if let (Some(a), Some(b)) = (prev, curr) {
                let mut pts = self.vertices.extract(a, self.conf);
                let pts_b = self.vertices.extract(b, self.conf);
                if !pts.is_empty() && !pts_b.is_empty() {
                    pts.extend(pts_b);
                    fill_polygon(&mut buffer, &pts, color);
                }
            }
        }

        // the most recent known position always reads on top of the trail
        if let Some(d) = store.selected_at(anchor) {
            stamp_mask(&mut buffer, d.mask(), self.conf, Rgba(CURRENT_TINT));
        }

        self.buffer = Some(buffer);
        self.buffer.as_ref()
    }

    fn trail_alpha(&self, j: usize, index: usize) -> u8 {
        let span = self.trail.saturating_sub(1).max(1) as f32;
        let oldest = index as i64 - self.trail as i64 + 1;
        let t = ((j as i64 - oldest) as f32 / span).clamp(0.0, 1.0);
        (TRAIL_ALPHA_MIN + (TRAIL_ALPHA_MAX - TRAIL_ALPHA_MIN) * t).round() as u8
    }
}

fn stamp_mask(buffer: &mut RgbaImage, mask: &Array2<f32>, threshold: f32, color: Rgba<u8>) {
    for ((y, x), &v) in mask.indexed_iter() {
        if v >= threshold {
            buffer.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// Scan-fill an angularly ordered polygon. Duplicate vertices are dropped;
/// fewer than three distinct vertices fill nothing.
fn fill_polygon(buffer: &mut RgbaImage, points: &[Point2], color: Rgba<u8>) {
    let mut pts: Vec<Point2> = Vec::with_capacity(points.len());
    for &p in points {
        if !pts.contains(&p) {
            pts.push(p);
        }
    }
    if pts.len() < 3 {
        return;
    }

    // angular sort around the centroid keeps the outline untangled
    let n = pts.len() as f32;
    let cx = pts.iter().map(Point2::x).sum::<f32>() / n;
    let cy = pts.iter().map(Point2::y).sum::<f32>() / n;
    pts.sort_by(|a, b| {
        let aa = (a.y() - cy).atan2(a.x() - cx);
        let ab = (b.y() - cy).atan2(b.x() - cx);
        aa.total_cmp(&ab)
    });

    let (w, h) = buffer.dimensions();
    let min_x = pts.iter().map(Point2::x).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = pts.iter().map(Point2::y).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (pts.iter().map(Point2::x).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .min(w as i64 - 1);
    let max_y = (pts.iter().map(Point2::y).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .min(h as i64 - 1);
    if max_x < min_x as i64 || max_y < min_y as i64 {
        return;
    }

    for y in min_y..=max_y as u32 {
        for x in min_x..=max_x as u32 {
            if point_in_polygon(&pts, x as f32, y as f32) {
                buffer.put_pixel(x, y, color);
            }
        }
    }
}

/// Crossing-number test; handles the non-convex outlines the angular sort
/// can still produce.
fn point_in_polygon(poly: &[Point2], x: f32, y: f32) -> bool {
    let mut inside = false;
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let (xi, yi) = (poly[i].x(), poly[i].y());
        let (xj, yj) = (poly[j].x(), poly[j].y());
        let intersect =
            ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi);
        if intersect {
            inside = !inside;
        }
        j = i;
    }
    inside
}
