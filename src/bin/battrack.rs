// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// Batch analysis CLI: decode every frame of an extracted clip, apply the
// analyst's selections, export the trail composite as a PNG sequence.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ab_glyph::FontArc;
use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;

use battrack_rs::input::FramesDirSource;
use battrack_rs::pipeline::{Exporter, LogProgress, PngSequenceSink, Processor};
use battrack_rs::renderer::annotate_candidates;
use battrack_rs::{
    Args, CandidateDecoder, DecoderConfig, Engine, FrameRenderer, OrtEngine, TrackStore,
    TrailCompositor,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut engine = OrtEngine::new(&args)?;
    engine.summary();

    let class_id = args
        .class_id
        .unwrap_or_else(|| engine.class_id_for(args.target));
    let nc = engine
        .nc()
        .or(args.nc)
        .context("failed to get num_classes, make it explicit with `--nc`")? as usize;
    let nm = engine
        .nm()
        .or(args.nm)
        .context("failed to get num_masks, make it explicit with `--nm`")? as usize;
    // the model's static input size wins over the CLI default
    let mut decoder_cfg = DecoderConfig::from_args(&args, class_id, nc, nm);
    decoder_cfg.input_size = engine.input_size();
    let decoder = CandidateDecoder::new(decoder_cfg);
    log::info!("tracking {:?} (class {})", args.target, class_id);

    let mut source = FramesDirSource::open(Path::new(&args.source))?;
    let mut store = Processor::run(&mut source, &mut engine, &decoder, &mut LogProgress)?;

    if let Some(path) = &args.selections {
        apply_selections(&mut store, Path::new(path))?;
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))?;
    }

    let mut compositor = TrailCompositor::new(args.trail, args.mask_conf);
    let mut renderer = FrameRenderer::new(args.width, args.height);
    let mut sink = PngSequenceSink::create(Path::new(&args.export_dir))?;
    let export_dir = sink.dir().to_path_buf();

    let written = Exporter::export(&store, &mut compositor, &mut renderer, &mut sink, &cancel)?;
    log::info!("wrote {} frames to {}", written, export_dir.display());

    if args.annotate {
        write_review_stills(&store, &args, &export_dir, &cancel)?;
    }

    Ok(())
}

/// Bulk selection input: a JSON object mapping frame index to candidate
/// index, `-1` clearing the selection. Indices are forwarded verbatim to the
/// store's relaxed setter.
fn apply_selections(store: &mut TrackStore, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read selections {}", path.display()))?;
    let selections: BTreeMap<usize, i32> = serde_json::from_str(&raw)
        .with_context(|| format!("malformed selections {}", path.display()))?;
    for (frame, candidate) in selections {
        store.set_selected(frame, candidate);
    }
    Ok(())
}

fn write_review_stills(
    store: &TrackStore,
    args: &Args,
    export_dir: &Path,
    cancel: &AtomicBool,
) -> Result<()> {
    let font = match &args.font {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read font {}", path))?;
            Some(FontArc::try_from_vec(bytes).context("failed to parse font")?)
        }
        None => None,
    };

    let dir = export_dir.join("review");
    fs::create_dir_all(&dir)?;
    for index in 0..store.frame_count() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let Some(image) = store.image_at(index) else {
            break;
        };
        let canvas = annotate_candidates(
            image,
            store.candidates_at(index),
            store.selection_at(index),
            font.as_ref(),
        );
        canvas.save(dir.join(format!("review_{index:05}.png")))?;
    }
    Ok(())
}
