// ============================================================================
// paintundo CLI - headless history replay
// ============================================================================
//
// Usage examples:
//   paintundo --input photo.png --edits 40 --undo 10 --output undone.png
//   paintundo --width 512 --height 512 --depth 8 --seed 7
//   paintundo -i photo.png --depth -1 --mode insert
//
// Random rectangle fills (and an occasional crop) are painted onto the image
// and recorded, then a number of them are undone and redone again. After
// every step the cached committed state must match the live layer.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::document::Document;
use crate::geometry::{PixelRect, Rect};
use crate::history::{DiffEngine, InsertMode, LayerId, ManipulatorSettings, ManipulatorType, Queue};
use crate::host::LayerHost;
use crate::settings::HistorySettings;

/// paintundo headless history replay.
#[derive(Parser, Debug)]
#[command(
    name = "paintundo",
    about = "Replay random edits through the undo engine and check every step",
    long_about = "Paint random edits onto an image (or a blank canvas), record them in\n\
                  the undo history, then undo and redo them while checking that the\n\
                  history's committed copy of the layer always matches the layer.\n\n\
                  Example:\n  \
                  paintundo --input photo.png --edits 40 --undo 10 --output undone.png"
)]
pub struct CliArgs {
    /// PNG image used as the background layer. A blank canvas is used when omitted.
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Blank canvas width
    #[arg(long, default_value_t = 256)]
    pub width: u32,

    /// Blank canvas height
    #[arg(long, default_value_t = 256)]
    pub height: u32,

    /// Number of edits to record.
    #[arg(short, long, default_value_t = 20)]
    pub edits: usize,

    /// Steps to undo after recording.
    #[arg(short, long, default_value_t = 5)]
    pub undo: usize,

    /// History depth: -1 unlimited, 0 disabled. Defaults to the saved setting.
    #[arg(short, long, allow_hyphen_values = true)]
    pub depth: Option<isize>,

    /// Where new edits go after undo: "insert" or "truncate".
    #[arg(long, value_name = "MODE")]
    pub mode: Option<String>,

    /// Seed for the edits and the diff sampler.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the final layer here (PNG).
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CropSettings {
    inset: u32,
}

/// Run the replay. Returns a process exit code.
pub fn run(args: CliArgs) -> ExitCode {
    match replay(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_err!("replay failed: {}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn replay(args: &CliArgs) -> Result<(), String> {
    let mut settings = HistorySettings::load();
    if let Some(depth) = args.depth {
        settings.undo_queue_depth = depth;
    }
    match args.mode.as_deref() {
        Some("insert") => settings.insert_mode = InsertMode::Insert,
        Some("truncate") => settings.insert_mode = InsertMode::TruncateRedo,
        Some(other) => return Err(format!("unknown mode '{}'", other)),
        None => {}
    }

    let background = match &args.input {
        Some(path) => {
            let img = image::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
            PixelBuffer::from_rgba_image(&img.into_rgba8())
        }
        None => PixelBuffer::new_filled(args.width.max(1), args.height.max(1), 0xffff_ffff),
    };

    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let history = Queue::new(settings.depth_limit()).with_diff_engine(DiffEngine::with_seed(seed));
    let mut doc = Document::with_queue("replay".to_string(), background, history, settings.insert_mode)
        .map_err(|e| e.to_string())?;
    let layer = doc.layers.order().first().copied().ok_or("document has no layers")?;
    let low_memory = doc.history.subscribe_low_memory();

    log_info!("replay: seed {} depth {:?}", seed, settings.depth_limit());
    let started = Instant::now();

    for i in 0..args.edits {
        if i % 7 == 6 {
            crop_edge(&mut doc, layer)?;
        } else {
            fill_random_rect(&mut doc, layer, &mut rng, i)?;
        }
        check_in_sync(&doc, layer)?;
    }
    let recorded = started.elapsed();

    let mut undone = 0;
    for _ in 0..args.undo {
        match doc.undo().map_err(|e| e.to_string())? {
            Some(step) => {
                println!("undo  {:<24} {} change(s)", step.name, step.changes.len());
                undone += 1;
            }
            None => break,
        }
        check_in_sync(&doc, layer)?;
    }
    let snapshot = doc.layers.layer_bitmap(layer).cloned();

    for _ in 0..undone {
        doc.redo().map_err(|e| e.to_string())?;
        check_in_sync(&doc, layer)?;
    }
    for _ in 0..undone {
        doc.undo().map_err(|e| e.to_string())?;
    }
    if doc.layers.layer_bitmap(layer).cloned() != snapshot {
        return Err("undo after redo did not reproduce the same pixels".to_string());
    }

    println!("seed:            {}", seed);
    println!("events kept:     {} (limit {})", doc.history.depth(), settings.undo_queue_depth);
    println!("history memory:  {:.2} MB", doc.history.memory_usage() as f64 / (1024.0 * 1024.0));
    println!("spare memory:    {:.2} MB", doc.history.spare_memory_bytes() as f64 / (1024.0 * 1024.0));
    println!("recording time:  {:.1?}", recorded);
    if low_memory.try_iter().count() > 0 {
        println!("history was shortened to free memory");
    }

    if let Some(path) = &args.output
        && let Some(bitmap) = doc.layers.layer_bitmap(layer)
    {
        bitmap
            .to_rgba_image()
            .save(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn fill_random_rect(doc: &mut Document, layer: LayerId, rng: &mut StdRng, i: usize) -> Result<(), String> {
    let bounds = doc
        .layers
        .active_bitmap_bounds(layer)
        .ok_or("layer disappeared")?;
    let w = rng.gen_range(1..=bounds.width.clamp(1, 64));
    let h = rng.gen_range(1..=bounds.height.clamp(1, 64));
    let x = rng.gen_range(0..=bounds.width - w);
    let y = rng.gen_range(0..=bounds.height - h);
    let color: u32 = rng.r#gen();
    let rect = PixelRect::new(x, y, w, h);

    doc.edit_layer(&format!("Fill #{}", i + 1), layer, Rect::from_pixel_rect(rect), |b| {
        b.fill_rect(rect, color)
    })
    .map_err(|e| e.to_string())?;
    Ok(())
}

fn crop_edge(doc: &mut Document, layer: LayerId) -> Result<(), String> {
    let crop = CropSettings { inset: 1 };
    let settings = ManipulatorSettings::encode(&crop).map_err(|e| e.to_string())?;
    doc.manipulate_layer("Crop", layer, ManipulatorType::Crop, settings, |old| {
        let w = old.width().saturating_sub(crop.inset).max(1);
        let h = old.height().saturating_sub(crop.inset).max(1);
        let mut out = PixelBuffer::new_filled(w, h, 0);
        for y in 0..h {
            out.span_mut(y, 0, w).copy_from_slice(old.span(y, 0, w));
        }
        out
    })
    .map_err(|e| e.to_string())?;
    Ok(())
}

fn check_in_sync(doc: &Document, layer: LayerId) -> Result<(), String> {
    match doc.history.max_depth() {
        crate::history::DepthLimit::Disabled => Ok(()),
        _ if doc.history.spare_bitmap(layer) == doc.layers.layer_bitmap(layer) => Ok(()),
        _ => Err(format!("layer {} diverged from its committed copy", layer)),
    }
}
