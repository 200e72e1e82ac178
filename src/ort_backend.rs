// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime inference engine adapter.
// Owns the session, letterbox preprocessing and raw-output normalization;
// decoding the outputs into detections lives in `decoder`.

use std::time::Instant;

use anyhow::{bail, ensure, Context, Result};
use half::f16;
use image::{imageops, DynamicImage, GenericImageView, Rgba, RgbaImage};
use ndarray::{Array, ArrayD, Axis, IxDyn};
use ort::{
    CUDAExecutionProvider, ExecutionProvider, GraphOptimizationLevel, Session,
    TensorElementType, TensorRTExecutionProvider, ValueType,
};
use regex::Regex;

use crate::config::{Args, TargetKind};

/// Execution provider selection.
#[derive(Debug, Clone, Copy)]
pub enum OrtEP {
    CPU,
    CUDA(u32),
    Trt(u32),
}

/// One frame's raw network output, normalized to a fixed orientation.
pub struct RawPrediction {
    /// Detection grid, `[N, 4 + C + K]` row-major.
    pub preds: ArrayD<f32>,
    /// Prototype mask tensor, `[K, Hp, Wp]` or `[Hp, Wp, K]` per the
    /// configured layout; the decoder resolves it.
    pub protos: ArrayD<f32>,
}

/// Inference engine contract. Construction is initialization: a decoder is
/// only ever handed tensors from a successfully constructed engine.
pub trait Engine {
    /// Square network input resolution.
    fn input_size(&self) -> u32;

    fn process(&mut self, image: &DynamicImage) -> Result<RawPrediction>;
}

pub struct OrtEngine {
    session: Session,
    ep: OrtEP,
    input_size: u32,
    input_f16: bool,
    output_f16: bool,
    output_names: Vec<String>,
    nm: Option<u32>,
    nc: Option<u32>,
    profile: bool,
}

impl OrtEngine {
    pub fn new(config: &Args) -> Result<Self> {
        // execution provider
        let ep = if config.trt {
            OrtEP::Trt(config.device_id)
        } else if config.cuda {
            OrtEP::CUDA(config.device_id)
        } else {
            OrtEP::CPU
        };

        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;
        let builder = match ep {
            OrtEP::Trt(id) => {
                let trt = TensorRTExecutionProvider::default()
                    .with_device_id(id as i32)
                    .with_fp16(config.fp16);
                if !trt.is_available()? {
                    bail!("TensorRT execution provider is not available");
                }
                builder.with_execution_providers([trt.build()])?
            }
            OrtEP::CUDA(id) => {
                let cuda = CUDAExecutionProvider::default().with_device_id(id as i32);
                if !cuda.is_available()? {
                    bail!("CUDA execution provider is not available");
                }
                builder.with_execution_providers([cuda.build()])?
            }
            OrtEP::CPU => builder,
        };

        let session = builder
            .commit_from_file(&config.model)
            .with_context(|| format!("failed to load model: {}", config.model))?;

        ensure!(!session.inputs.is_empty(), "model exposes no inputs");

        // input resolution, from the model when static
        let (input_f16, input_size) = match &session.inputs[0].input_type {
            ValueType::Tensor { ty, dimensions, .. } => {
                ensure!(
                    dimensions.len() == 4,
                    "expected NCHW model input, got {} dims",
                    dimensions.len()
                );
                let size = if dimensions[2] > 0 {
                    dimensions[2] as u32
                } else {
                    config.input_size
                };
                (matches!(ty, TensorElementType::Float16), size)
            }
            _ => bail!("model input is not a tensor"),
        };

        ensure!(
            session.outputs.len() >= 2,
            "segmentation model must expose a detection head and a prototype tensor, got {} outputs",
            session.outputs.len()
        );
        let output_names: Vec<String> =
            session.outputs.iter().map(|o| o.name.clone()).collect();

        // nc / nm from static output dims: head [1, 4+C+K, N], protos [1, K, Hp, Wp]
        let mut output_f16 = false;
        let mut head_rows = None;
        let mut nm = None;
        if let ValueType::Tensor { ty, dimensions, .. } = &session.outputs[0].output_type {
            output_f16 = matches!(ty, TensorElementType::Float16);
            if dimensions.len() == 3 && dimensions[1] > 0 {
                head_rows = Some(dimensions[1] as u32);
            }
        }
        if let ValueType::Tensor { dimensions, .. } = &session.outputs[1].output_type {
            if dimensions.len() == 4 && dimensions[1] > 0 {
                nm = Some(dimensions[1] as u32);
            }
        }
        let nm = nm.or(config.nm);
        let nc = match (head_rows, nm) {
            (Some(rows), Some(nm)) => rows.checked_sub(4 + nm).or(config.nc),
            _ => config.nc,
        };

        Ok(Self {
            session,
            ep,
            input_size,
            input_f16,
            output_f16,
            output_names,
            nm,
            nc,
            profile: config.profile,
        })
    }

    /// Number of classes, when derivable from the model or configuration.
    pub fn nc(&self) -> Option<u32> {
        self.nc
    }

    /// Number of mask coefficients, when derivable.
    pub fn nm(&self) -> Option<u32> {
        self.nm
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }

    /// Class names table parsed from the ONNX `names` metadata entry.
    pub fn names(&self) -> Option<Vec<String>> {
        let meta = self.session.metadata().ok()?;
        let raw = meta.custom("names").ok()??;
        let re = Regex::new(r"'([^']+)'").ok()?;
        let names: Vec<String> = re
            .captures_iter(&raw)
            .map(|cap| cap[1].to_string())
            .collect();
        if names.is_empty() {
            None
        } else {
            Some(names)
        }
    }

    /// Resolve the tracked target to a class index via the names table,
    /// falling back to the COCO-80 index.
    pub fn class_id_for(&self, target: TargetKind) -> u32 {
        if let Some(names) = self.names() {
            if let Some(idx) = names.iter().position(|n| n == target.label()) {
                return idx as u32;
            }
        }
        target.coco_id()
    }

    pub fn summary(&self) {
        log::info!(
            "engine ready: ep={:?} input={}x{} nc={:?} nm={:?} outputs={:?}",
            self.ep,
            self.input_size,
            self.input_size,
            self.nc,
            self.nm,
            self.output_names,
        );
    }

    /// Center the frame on a black square of `max(w, h)` and resize to the
    /// network input; the decoder's letterbox inversion assumes exactly this.
    fn preprocess(&self, x: &DynamicImage) -> Result<Array<f32, IxDyn>> {
        let (w0, h0) = x.dimensions();
        ensure!(w0 > 0 && h0 > 0, "empty frame");
        let size = w0.max(h0);
        let mut padded = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 255]));
        imageops::overlay(
            &mut padded,
            &x.to_rgba8(),
            ((size - w0) / 2) as i64,
            ((size - h0) / 2) as i64,
        );
        let s = self.input_size;
        let resized = imageops::resize(&padded, s, s, imageops::FilterType::CatmullRom);

        let mut ys = Array::zeros((1, 3, s as usize, s as usize)).into_dyn();
        for (x, y, rgba) in resized.enumerate_pixels() {
            let [r, g, b, _] = rgba.0;
            ys[[0, 0, y as usize, x as usize]] = r as f32 / 255.0;
            ys[[0, 1, y as usize, x as usize]] = g as f32 / 255.0;
            ys[[0, 2, y as usize, x as usize]] = b as f32 / 255.0;
        }
        Ok(ys)
    }

    fn run(&mut self, xs: Array<f32, IxDyn>) -> Result<Vec<ArrayD<f32>>> {
        let outputs = if self.input_f16 {
            let xs = xs.mapv(f16::from_f32);
            self.session.run(ort::inputs![xs.view()]?)?
        } else {
            self.session.run(ort::inputs![xs.view()]?)?
        };

        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let y = &outputs[name.as_str()];
            let y = if self.output_f16 {
                y.try_extract_tensor::<f16>()?.mapv(f32::from)
            } else {
                y.try_extract_tensor::<f32>()?.into_owned()
            };
            ys.push(y);
        }
        Ok(ys)
    }
}

impl Engine for OrtEngine {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn process(&mut self, image: &DynamicImage) -> Result<RawPrediction> {
        let t_pre = Instant::now();
        let xs = self.preprocess(image)?;
        if self.profile {
            log::debug!("preprocess: {:?}", t_pre.elapsed());
        }

        let t_run = Instant::now();
        let ys = self.run(xs)?;
        if self.profile {
            log::debug!("inference: {:?}", t_run.elapsed());
        }

        ensure!(
            ys.len() >= 2,
            "segmentation model must produce two outputs, got {}",
            ys.len()
        );
        let head = &ys[0];
        ensure!(
            head.ndim() == 3,
            "detection head must be rank 3, got rank {}",
            head.ndim()
        );
        // [1, 4+C+K, N] -> [N, 4+C+K]
        let preds = head.index_axis(Axis(0), 0).t().into_owned().into_dyn();

        let protos = &ys[1];
        ensure!(
            protos.ndim() == 4,
            "prototype tensor must be rank 4, got rank {}",
            protos.ndim()
        );
        let protos = protos.index_axis(Axis(0), 0).into_owned().into_dyn();

        Ok(RawPrediction { preds, protos })
    }
}
