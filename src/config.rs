// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
use clap::{Parser, ValueEnum};

use crate::decoder::ProtoLayout;

/// Which object the analysis session tracks. Maps to a COCO class unless
/// `--class-id` overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetKind {
    Bat,
    Ball,
}

impl TargetKind {
    /// Class label as it appears in the model's `names` metadata.
    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::Bat => "baseball bat",
            TargetKind::Ball => "sports ball",
        }
    }

    /// COCO-80 class index fallback when the model carries no names table.
    pub fn coco_id(&self) -> u32 {
        match self {
            TargetKind::Bat => 34,
            TargetKind::Ball => 32,
        }
    }
}

#[derive(Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// ONNX segmentation model path
    #[arg(long, required = true)]
    pub model: String,

    /// Directory holding the extracted frame sequence (+ optional meta.json)
    #[arg(long, required = true)]
    pub source: String,

    /// Tracked object kind
    #[arg(long, value_enum, default_value_t = TargetKind::Bat)]
    pub target: TargetKind,

    /// Explicit class index, overriding --target resolution
    #[arg(long)]
    pub class_id: Option<u32>,

    /// Device id for CUDA / TensorRT
    #[arg(long, default_value_t = 0)]
    pub device_id: u32,

    /// Use TensorRT execution provider
    #[arg(long)]
    pub trt: bool,

    /// Use CUDA execution provider
    #[arg(long)]
    pub cuda: bool,

    /// Enable TensorRT fp16
    #[arg(long)]
    pub fp16: bool,

    /// Model input resolution (square), used when the model is dynamic
    #[arg(long, default_value_t = 640)]
    pub input_size: u32,

    /// Number of classes, used when the model metadata is dynamic
    #[arg(long)]
    pub nc: Option<u32>,

    /// Number of mask coefficients, used when the model metadata is dynamic
    #[arg(long)]
    pub nm: Option<u32>,

    /// Prototype tensor layout
    #[arg(long, value_enum, default_value_t = ProtoLayout::ChannelFirst)]
    pub proto_layout: ProtoLayout,

    /// Candidate confidence threshold
    #[arg(long, default_value_t = 0.25)]
    pub conf: f32,

    /// NMS overlap threshold
    #[arg(long, default_value_t = 0.45)]
    pub iou: f32,

    /// Candidates kept per frame after NMS
    #[arg(long, default_value_t = 5)]
    pub topk: usize,

    /// Mask display threshold for the trail overlay
    #[arg(long, default_value_t = 0.5)]
    pub mask_conf: f32,

    /// Trailing window length in frames
    #[arg(long, default_value_t = 15)]
    pub trail: usize,

    /// Output surface width
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Output surface height
    #[arg(long, default_value_t = 640)]
    pub height: u32,

    /// JSON selections file: {"frame": candidate_index | -1, ...}
    #[arg(long)]
    pub selections: Option<String>,

    /// Parent directory for the exported frame sequence
    #[arg(long, default_value = "runs")]
    pub export_dir: String,

    /// Also write per-frame candidate review stills
    #[arg(long)]
    pub annotate: bool,

    /// TTF/OTF font for annotation labels (boxes are drawn without it)
    #[arg(long)]
    pub font: Option<String>,

    /// Enable per-stage timing output
    #[arg(long)]
    pub profile: bool,
}
