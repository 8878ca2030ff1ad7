//! Drives one map rotation's render: leaf tiles first, then quadtree
//! composites upward, across N worker threads.
//!
//! A composite only becomes ready once its pending-children counter hits
//! zero, so composite-after-children is a hard happens-before edge. The
//! ready queue is seeded quadrant by quadrant so workers start on
//! disjoint subtrees and only steal across them once their own runs dry.

use super::tile_renderer::TileRenderer;
use super::tile_set::{TilePath, TilePos, TileSet};
use crate::block_state::BlockStateRegistry;
use crate::image::codec::{self, ImageFormatKind};
use crate::image::{RGBAImage, RGBAPixel};
use crate::world::{World, WorldCache};
use log::{error, info};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Called as work completes; at most every 100 ms or every percent.
pub trait ProgressHandler: Send {
    fn set_max(&mut self, max: usize);
    fn set_value(&mut self, value: usize);
}

/// A progress handler that ignores everything.
pub struct NoProgress;

impl ProgressHandler for NoProgress {
    fn set_max(&mut self, _max: usize) {}
    fn set_value(&mut self, _value: usize) {}
}

/// Everything a worker needs to render tiles of one map rotation.
pub struct RenderContext {
    pub output_dir: PathBuf,
    pub format: ImageFormatKind,
    pub jpeg_quality: u8,
    pub background: RGBAPixel,
    pub world: World,
    pub registry: Arc<BlockStateRegistry>,
    pub tile_set: Arc<TileSet>,
    pub renderer: Arc<TileRenderer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkUnit {
    Render(TilePos),
    Composite(TilePath),
}

struct QueueState {
    ready: VecDeque<WorkUnit>,
    /// required composite path -> required children not yet completed
    pending_children: HashMap<TilePath, usize>,
    remaining: usize,
}

struct Shared {
    queue: Mutex<QueueState>,
    cond: Condvar,
    stop: Arc<AtomicBool>,
    completed: AtomicUsize,
    failed: AtomicUsize,
    total: usize,
}

/// Outcome of a dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub completed: usize,
    pub failed: usize,
}

impl DispatchResult {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Renders all required tiles of `context` with `threads` workers.
/// Single-threaded mode (threads <= 1, or a single required tile) runs
/// the same loop inline on the calling thread.
pub fn dispatch(
    context: &RenderContext,
    threads: usize,
    progress: &mut dyn ProgressHandler,
    stop: Arc<AtomicBool>,
) -> DispatchResult {
    let tile_set = &context.tile_set;
    let depth = tile_set.depth();

    // seed leaves grouped by root quadrant for disjoint worker subtrees
    let mut leaves: Vec<(TilePath, TilePos)> = tile_set
        .required_render_tiles()
        .map(|tile| (TilePath::from_tile(*tile, depth), *tile))
        .collect();
    leaves.sort_by(|a, b| a.0.cmp(&b.0));

    let mut pending_children: HashMap<TilePath, usize> = HashMap::new();
    for (path, _) in &leaves {
        if let Some(parent) = path.parent() {
            *pending_children.entry(parent).or_insert(0) += 1;
        }
    }
    for path in tile_set.required_composite_tiles() {
        if let Some(parent) = path.parent() {
            *pending_children.entry(parent).or_insert(0) += 1;
        }
    }

    let total = leaves.len() + tile_set.required_composite_tiles().count();
    let shared = Shared {
        queue: Mutex::new(QueueState {
            ready: leaves
                .into_iter()
                .map(|(_, tile)| WorkUnit::Render(tile))
                .collect(),
            pending_children,
            remaining: total,
        }),
        cond: Condvar::new(),
        stop,
        completed: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
        total,
    };

    progress.set_max(total);
    if total == 0 {
        return DispatchResult {
            completed: 0,
            failed: 0,
        };
    }

    let progress = Mutex::new(ProgressState {
        handler: progress,
        last_update: Instant::now(),
        last_value: 0,
    });

    let workers = threads.max(1).min(total);
    if workers == 1 {
        worker_loop(context, &shared, &progress);
    } else {
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| worker_loop(context, &shared, &progress));
            }
        });
    }

    let result = DispatchResult {
        completed: shared.completed.load(Ordering::SeqCst),
        failed: shared.failed.load(Ordering::SeqCst),
    };
    progress
        .lock()
        .unwrap()
        .handler
        .set_value(result.completed);
    result
}

struct ProgressState<'a> {
    handler: &'a mut dyn ProgressHandler,
    last_update: Instant,
    last_value: usize,
}

fn worker_loop(context: &RenderContext, shared: &Shared, progress: &Mutex<ProgressState>) {
    let mut cache = WorldCache::new(context.world.clone(), context.registry.clone());

    loop {
        if shared.stop.load(Ordering::SeqCst) {
            shared.cond.notify_all();
            return;
        }

        let unit = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if queue.remaining == 0 || shared.stop.load(Ordering::SeqCst) {
                    shared.cond.notify_all();
                    return;
                }
                if let Some(unit) = queue.ready.pop_front() {
                    break unit;
                }
                // timed wait so an external stop is noticed even when no
                // completion wakes us
                let (guard, _) = shared
                    .cond
                    .wait_timeout(queue, Duration::from_millis(100))
                    .unwrap();
                queue = guard;
            }
        };

        let ok = match &unit {
            WorkUnit::Render(tile) => render_one(context, &mut cache, tile),
            WorkUnit::Composite(path) => composite_one(context, path),
        };
        if !ok {
            shared.failed.fetch_add(1, Ordering::SeqCst);
        }
        let completed = shared.completed.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut queue = shared.queue.lock().unwrap();
            queue.remaining -= 1;
            let parent = match &unit {
                WorkUnit::Render(tile) => {
                    TilePath::from_tile(*tile, context.tile_set.depth()).parent()
                }
                WorkUnit::Composite(path) => path.parent(),
            };
            if let Some(parent) = parent {
                if let Some(count) = queue.pending_children.get_mut(&parent) {
                    *count -= 1;
                    if *count == 0 {
                        queue.pending_children.remove(&parent);
                        queue.ready.push_back(WorkUnit::Composite(parent));
                    }
                }
            }
            shared.cond.notify_all();
        }

        report_progress(progress, completed, shared.total);
    }
}

fn report_progress(progress: &Mutex<ProgressState>, completed: usize, total: usize) {
    let mut state = progress.lock().unwrap();
    let percent_step = (total / 100).max(1);
    if state.last_update.elapsed() >= Duration::from_millis(100)
        || completed - state.last_value >= percent_step
        || completed == total
    {
        state.last_update = Instant::now();
        state.last_value = completed;
        state.handler.set_value(completed);
    }
}

fn render_one(context: &RenderContext, cache: &mut WorldCache, tile: &TilePos) -> bool {
    let image = context
        .renderer
        .render_tile(*tile, &context.tile_set, cache);
    let path = TilePath::from_tile(*tile, context.tile_set.depth())
        .file_path(&context.output_dir, context.format.suffix());
    match write_tile_atomic(&image, &path, context) {
        Ok(()) => true,
        Err(e) => {
            error!("unable to write tile {} to {}: {}", tile, path.display(), e);
            false
        }
    }
}

fn composite_one(context: &RenderContext, path: &TilePath) -> bool {
    let (width, height) = context.renderer.tile_size();
    let mut image = RGBAImage::new(width, height);

    for quadrant in 1..=4u8 {
        let child_path = path
            .child(quadrant)
            .file_path(&context.output_dir, context.format.suffix());
        let child = match codec::read_image(&child_path) {
            Ok(child) => child,
            // a missing child is an empty quadrant, not an error
            Err(_) => continue,
        };
        let half = child.resize_half();
        let (qx, qy) = match quadrant {
            1 => (0, 0),
            2 => (width / 2, 0),
            3 => (0, height / 2),
            _ => (width / 2, height / 2),
        };
        image.simple_blit(&half, qx, qy);
    }

    let out = path.file_path(&context.output_dir, context.format.suffix());
    match write_tile_atomic(&image, &out, context) {
        Ok(()) => true,
        Err(e) => {
            error!(
                "unable to write composite {} to {}: {}",
                path,
                out.display(),
                e
            );
            false
        }
    }
}

/// Writes `<name>.tmp`, fsyncs, then renames onto the final name so a
/// crash never leaves a half-written tile.
fn write_tile_atomic(
    image: &RGBAImage,
    path: &Path,
    context: &RenderContext,
) -> Result<(), codec::CodecError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    codec::write_image(
        image,
        &tmp,
        context.format,
        context.jpeg_quality,
        context.background,
    )?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Convenience wrapper used by the manager: picks single- or
/// multi-threaded mode the way the original renderer did.
pub fn dispatch_auto(
    context: &RenderContext,
    threads: usize,
    progress: &mut dyn ProgressHandler,
    stop: Arc<AtomicBool>,
) -> DispatchResult {
    let single = threads <= 1 || context.tile_set.required_render_tile_count() <= 1;
    if single {
        info!("rendering {} tiles single-threaded", context.tile_set.required_render_tile_count());
        dispatch(context, 1, progress, stop)
    } else {
        info!(
            "rendering {} tiles with {} threads",
            context.tile_set.required_render_tile_count(),
            threads
        );
        dispatch(context, threads, progress, stop)
    }
}
