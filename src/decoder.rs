// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Candidate decoder: raw detection grid + prototype tensor -> ranked,
// de-duplicated per-frame candidates with letterbox-corrected boxes and
// low-resolution confidence masks.

use anyhow::{ensure, Context, Result};
use clap::ValueEnum;
use ndarray::{s, Array, Array2, ArrayViewD, Axis, Ix2, Ix3};

use crate::{non_max_suppression, Bbox, Detection};

/// Prototype tensor orientation. Resolved once from configuration, never
/// re-inferred per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProtoLayout {
    /// `[K, Hp, Wp]`
    ChannelFirst,
    /// `[Hp, Wp, K]`
    ChannelLast,
}

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Square network input resolution the grid coordinates refer to.
    pub input_size: u32,
    /// Score channel of the tracked class.
    pub class_id: u32,
    /// Number of class channels in a grid row.
    pub nc: usize,
    /// Number of mask coefficients in a grid row.
    pub nm: usize,
    /// Minimum class confidence.
    pub conf: f32,
    /// NMS overlap threshold.
    pub iou: f32,
    /// Survivors kept per frame.
    pub topk: usize,
    pub proto_layout: ProtoLayout,
}

impl DecoderConfig {
    pub fn from_args(args: &crate::Args, class_id: u32, nc: usize, nm: usize) -> Self {
        Self {
            input_size: args.input_size,
            class_id,
            nc,
            nm,
            conf: args.conf,
            iou: args.iou,
            topk: args.topk,
            proto_layout: args.proto_layout,
        }
    }
}

pub struct CandidateDecoder {
    cfg: DecoderConfig,
}

impl CandidateDecoder {
    pub fn new(cfg: DecoderConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.cfg
    }

    /// Decode one frame's raw output into candidates, best first.
    ///
    /// `preds` is `[N, 4 + C + K]`, `protos` is the prototype tensor in the
    /// configured layout. An empty result is a normal outcome; a shape
    /// mismatch is a contract violation and fails loudly.
    pub fn decode(
        &self,
        preds: ArrayViewD<f32>,
        protos: ArrayViewD<f32>,
        orig_w: u32,
        orig_h: u32,
    ) -> Result<Vec<Detection>> {
        let preds = preds
            .into_dimensionality::<Ix2>()
            .context("detection grid must be rank 2")?;
        let protos = protos
            .into_dimensionality::<Ix3>()
            .context("prototype tensor must be rank 3")?;

        let row_len = 4 + self.cfg.nc + self.cfg.nm;
        ensure!(
            preds.ncols() == row_len,
            "detection row length {} does not match 4 + {} classes + {} coefficients",
            preds.ncols(),
            self.cfg.nc,
            self.cfg.nm
        );
        ensure!(
            (self.cfg.class_id as usize) < self.cfg.nc,
            "class id {} out of range for {} classes",
            self.cfg.class_id,
            self.cfg.nc
        );

        let protos = match self.cfg.proto_layout {
            ProtoLayout::ChannelFirst => protos.to_owned(),
            ProtoLayout::ChannelLast => {
                protos.permuted_axes([2, 0, 1]).as_standard_layout().to_owned()
            }
        };
        let (nm_p, ph, pw) = protos.dim();
        ensure!(
            nm_p == self.cfg.nm,
            "prototype channel count {} does not match {} coefficients",
            nm_p,
            self.cfg.nm
        );
        let proto_flat = protos.to_shape((nm_p, ph * pw))?.to_owned();

        // corner form, normalized to the square network input
        let s_inv = 1.0 / self.cfg.input_size as f32;
        let mut data: Vec<(Bbox, Vec<f32>)> = Vec::new();
        for row in preds.axis_iter(Axis(0)) {
            let confidence = row[4 + self.cfg.class_id as usize];
            if confidence < self.cfg.conf {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let x1 = (cx - w / 2.) * s_inv;
            let y1 = (cy - h / 2.) * s_inv;
            let bbox = Bbox::new(x1, y1, w * s_inv, h * s_inv, confidence);
            let coefs = row.slice(s![4 + self.cfg.nc..]).to_vec();
            data.push((bbox, coefs));
        }

        non_max_suppression(&mut data, self.cfg.iou);
        data.truncate(self.cfg.topk);

        // letterbox geometry shared by every survivor
        let size = orig_w.max(orig_h) as f32;
        let x_off = (size - orig_w as f32) / 2.0;
        let y_off = (size - orig_h as f32) / 2.0;
        let mx_scale = pw as f32 / size;
        let my_scale = ph as f32 / size;
        let x_start = (x_off * mx_scale).round() as usize;
        let y_start = (y_off * my_scale).round() as usize;
        let m_w = (orig_w as f32 * mx_scale).round() as usize;
        let m_h = (orig_h as f32 * my_scale).round() as usize;

        let mut ys = Vec::with_capacity(data.len());
        for (bbox, coefs) in data {
            let coefs = Array::from_shape_vec((1, self.cfg.nm), coefs)?;
            let mask = coefs.dot(&proto_flat);
            let mask = mask.to_shape((ph, pw))?;
            let mask = mask.mapv(|v| 1.0 / (1.0 + (-v).exp()));

            // detection box in letterboxed mask-grid units
            let mx1 = bbox.xmin() * pw as f32;
            let my1 = bbox.ymin() * ph as f32;
            let mx2 = bbox.xmax() * pw as f32;
            let my2 = bbox.ymax() * ph as f32;

            // strip the padding band and zero pixels outside the box so one
            // candidate's mask cannot bleed into a neighbour's region
            let mut cropped = Array2::<f32>::zeros((m_h, m_w));
            for j in 0..m_h {
                let y = y_start + j;
                if y >= ph {
                    continue;
                }
                for i in 0..m_w {
                    let x = x_start + i;
                    if x >= pw {
                        continue;
                    }
                    let (xf, yf) = (x as f32, y as f32);
                    if xf >= mx1 && xf <= mx2 && yf >= my1 && yf <= my2 {
                        cropped[[j, i]] = mask[[y, x]];
                    }
                }
            }

            // box back to original pixels, clamped inside the frame
            let mut x = bbox.xmin() * size - x_off;
            let mut y = bbox.ymin() * size - y_off;
            x = x.clamp(0.0, orig_w as f32);
            y = y.clamp(0.0, orig_h as f32);
            let w = (bbox.width() * size).min(orig_w as f32 - x).max(0.0);
            let h = (bbox.height() * size).min(orig_h as f32 - y).max(0.0);

            ys.push(Detection::new(
                Bbox::new(x, y, w, h, bbox.confidence()),
                cropped,
            ));
        }

        Ok(ys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn decoder(nc: usize, nm: usize) -> CandidateDecoder {
        CandidateDecoder::new(DecoderConfig {
            input_size: 640,
            class_id: 0,
            nc,
            nm,
            conf: 0.25,
            iou: 0.45,
            topk: 5,
            proto_layout: ProtoLayout::ChannelFirst,
        })
    }

    fn grid_row(cx: f32, cy: f32, w: f32, h: f32, score: f32, nc: usize, nm: usize) -> Vec<f32> {
        let mut row = vec![cx, cy, w, h];
        row.push(score);
        row.extend(std::iter::repeat(0.0).take(nc - 1));
        row.extend(std::iter::repeat(3.0).take(nm));
        row
    }

    fn preds_from_rows(rows: Vec<Vec<f32>>) -> Array2<f32> {
        let cols = rows[0].len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((flat.len() / cols, cols), flat).unwrap()
    }

    fn unit_protos(nm: usize, hp: usize, wp: usize) -> Array3<f32> {
        Array3::from_elem((nm, hp, wp), 1.0)
    }

    #[test]
    fn centered_box_decodes_to_image_center() {
        let dec = decoder(2, 2);
        let preds = preds_from_rows(vec![grid_row(320., 320., 100., 60., 0.9, 2, 2)]);
        let protos = unit_protos(2, 8, 8);
        let ys = dec
            .decode(preds.into_dyn().view(), protos.into_dyn().view(), 640, 640)
            .unwrap();
        assert_eq!(ys.len(), 1);
        let c = ys[0].bbox().cxcy();
        assert!((c.x() - 320.).abs() < 1e-3);
        assert!((c.y() - 320.).abs() < 1e-3);
        assert_eq!(ys[0].mask_dim(), (8, 8));
    }

    #[test]
    fn letterbox_inversion_restores_original_coordinates() {
        // landscape 640x320 frame: the pad band is 160px top and bottom
        let dec = decoder(2, 2);
        let preds = preds_from_rows(vec![grid_row(320., 320., 64., 64., 0.8, 2, 2)]);
        let protos = unit_protos(2, 8, 8);
        let ys = dec
            .decode(preds.into_dyn().view(), protos.into_dyn().view(), 640, 320)
            .unwrap();
        assert_eq!(ys.len(), 1);
        let c = ys[0].bbox().cxcy();
        assert!((c.x() - 320.).abs() < 1e-3);
        assert!((c.y() - 160.).abs() < 1e-3);
        // mask grid covers only the unpadded region
        assert_eq!(ys[0].mask_dim(), (4, 8));
    }

    #[test]
    fn below_threshold_rows_yield_empty_output() {
        let dec = decoder(2, 2);
        let preds = preds_from_rows(vec![grid_row(320., 320., 50., 50., 0.1, 2, 2)]);
        let protos = unit_protos(2, 8, 8);
        let ys = dec
            .decode(preds.into_dyn().view(), protos.into_dyn().view(), 640, 640)
            .unwrap();
        assert!(ys.is_empty());
    }

    #[test]
    fn survivors_are_capped_and_ranked() {
        let dec = decoder(2, 2);
        let rows: Vec<Vec<f32>> = (0..7)
            .map(|i| grid_row(50. + 80. * i as f32, 50., 40., 40., 0.3 + 0.05 * i as f32, 2, 2))
            .collect();
        let preds = preds_from_rows(rows);
        let protos = unit_protos(2, 8, 8);
        let ys = dec
            .decode(preds.into_dyn().view(), protos.into_dyn().view(), 640, 640)
            .unwrap();
        assert_eq!(ys.len(), 5);
        for pair in ys.windows(2) {
            assert!(pair[0].confidence() >= pair[1].confidence());
        }
        for d in &ys {
            assert!(d.confidence() > 0.0 && d.confidence() <= 1.0);
        }
    }

    #[test]
    fn overlapping_duplicates_are_suppressed() {
        let dec = decoder(2, 2);
        let preds = preds_from_rows(vec![
            grid_row(300., 300., 100., 100., 0.9, 2, 2),
            grid_row(305., 302., 100., 100., 0.7, 2, 2),
        ]);
        let protos = unit_protos(2, 8, 8);
        let ys = dec
            .decode(preds.into_dyn().view(), protos.into_dyn().view(), 640, 640)
            .unwrap();
        assert_eq!(ys.len(), 1);
        assert!((ys[0].confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn decoded_boxes_stay_inside_the_frame() {
        let dec = decoder(2, 2);
        // deliberately overshoots the left and bottom edges
        let preds = preds_from_rows(vec![grid_row(10., 630., 200., 200., 0.9, 2, 2)]);
        let protos = unit_protos(2, 8, 8);
        let ys = dec
            .decode(preds.into_dyn().view(), protos.into_dyn().view(), 640, 640)
            .unwrap();
        let b = ys[0].bbox();
        assert!(b.xmin() >= 0.0 && b.ymin() >= 0.0);
        assert!(b.xmax() <= 640.0 && b.ymax() <= 640.0);
        assert!(b.width() >= 0.0 && b.height() >= 0.0);
    }

    #[test]
    fn mask_is_zeroed_outside_the_detection_box() {
        let dec = decoder(2, 2);
        // a box covering roughly the top-left quarter of the frame
        let preds = preds_from_rows(vec![grid_row(160., 160., 320., 320., 0.9, 2, 2)]);
        let protos = unit_protos(2, 16, 16);
        let ys = dec
            .decode(preds.into_dyn().view(), protos.into_dyn().view(), 640, 640)
            .unwrap();
        let mask = ys[0].mask();
        // inside: sigmoid(6) with unit prototypes
        assert!(mask[[4, 4]] > 0.99);
        // far corner lies outside the detection box
        assert_eq!(mask[[15, 15]], 0.0);
    }

    #[test]
    fn malformed_tensor_shapes_fail_loudly() {
        let dec = decoder(2, 2);
        let bad_preds = Array2::<f32>::zeros((4, 9));
        let protos = unit_protos(2, 8, 8);
        assert!(dec
            .decode(
                bad_preds.into_dyn().view(),
                protos.clone().into_dyn().view(),
                640,
                640
            )
            .is_err());

        let preds = preds_from_rows(vec![grid_row(320., 320., 50., 50., 0.9, 2, 2)]);
        let bad_protos = Array2::<f32>::zeros((8, 8));
        assert!(dec
            .decode(
                preds.into_dyn().view(),
                bad_protos.into_dyn().view(),
                640,
                640
            )
            .is_err());
    }
}
