//! Orchestrates a full render: scan worlds, plan required tiles per
//! behavior, dispatch workers, keep the persisted metadata in step.

use super::block_images::{TextureError, TextureResources};
use super::dispatcher::{dispatch_auto, NoProgress, ProgressHandler, RenderContext};
use super::tile_set::{TilePos, TileSet};
use super::RenderViewType;
use crate::block_state::BlockStateRegistry;
use crate::image::codec::{self, CodecError, ImageFormatKind};
use crate::image::{rgba, RGBAImage, RGBAPixel};
use crate::metadata::{MetadataError, MetadataStore};
use crate::world::{Dimension, World, WorldCrop, WorldError};
use log::{error, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// External rotation labels: tl = 0, tr = 1, br = 2, bl = 3.
pub const ROTATION_NAMES_SHORT: [&str; 4] = ["tl", "tr", "br", "bl"];
pub const ROTATION_NAMES: [&str; 4] = ["top-left", "top-right", "bottom-right", "bottom-left"];

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("world error: {0}")]
    World(#[from] WorldError),
    #[error("texture error: {0}")]
    Texture(#[from] TextureError),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("image error: {0}")]
    Codec(#[from] CodecError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("map references unknown world '{0}'")]
    UnknownWorld(String),
    #[error("map '{0}' was not scanned; call scan_worlds first")]
    NotScanned(String),
    #[error("{0} tiles failed to render")]
    TilesFailed(usize),
    #[error("{0} maps failed to render")]
    MapsFailed(usize),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// What to do with a map (or one rotation of it) this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderBehavior {
    /// Leave existing tiles alone.
    Skip,
    /// Re-render only tiles whose chunks changed.
    #[default]
    Auto,
    /// Re-render everything.
    Force,
}

/// Per-map, per-rotation behaviors with a default for everything not
/// explicitly set.
#[derive(Debug, Clone, Default)]
pub struct RenderBehaviors {
    default_behavior: RenderBehavior,
    behaviors: HashMap<String, [RenderBehavior; 4]>,
}

impl RenderBehaviors {
    pub fn new(default_behavior: RenderBehavior) -> Self {
        RenderBehaviors {
            default_behavior,
            behaviors: HashMap::new(),
        }
    }

    pub fn get(&self, map: &str, rotation: u8) -> RenderBehavior {
        self.behaviors
            .get(map)
            .map(|b| b[rotation as usize % 4])
            .unwrap_or(self.default_behavior)
    }

    /// Sets all four rotations of a map.
    pub fn set_map(&mut self, map: &str, behavior: RenderBehavior) {
        self.behaviors.insert(map.to_string(), [behavior; 4]);
    }

    /// Sets a single rotation. The first per-rotation set fills the rest
    /// of the map with the default behavior.
    pub fn set(&mut self, map: &str, rotation: u8, behavior: RenderBehavior) {
        let entry = self
            .behaviors
            .entry(map.to_string())
            .or_insert([self.default_behavior; 4]);
        entry[rotation as usize % 4] = behavior;
    }

    pub fn is_complete_skip(&self, map: &str) -> bool {
        match self.behaviors.get(map) {
            Some(behaviors) => behaviors.iter().all(|b| *b == RenderBehavior::Skip),
            None => self.default_behavior == RenderBehavior::Skip,
        }
    }
}

/// One world section of the configuration.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    pub input_dir: PathBuf,
    pub dimension: Dimension,
    pub crop: WorldCrop,
}

impl WorldConfig {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        WorldConfig {
            input_dir: input_dir.into(),
            dimension: Dimension::Overworld,
            crop: WorldCrop::default(),
        }
    }

    /// Cropped worlds are centered, but only circular crops and crops
    /// bounded on both x and z.
    pub fn needs_centering(&self) -> bool {
        self.crop.has_complete_xz_bounds()
    }
}

/// One map section of the configuration.
#[derive(Debug, Clone)]
pub struct MapConfig {
    pub name: String,
    pub world: String,
    pub view: RenderViewType,
    /// tile edge length in chunks
    pub tile_width: i32,
    pub rotations: BTreeSet<u8>,
    pub texture_dir: PathBuf,
    pub texture_size: i32,
    pub texture_blur: f64,
    pub water_opacity: f64,
    pub format: ImageFormatKind,
    pub jpeg_quality: u8,
    pub background: RGBAPixel,
    pub render_biomes: bool,
    pub use_preblit_water: bool,
    /// incremental detection via output-file mtimes instead of the
    /// last-render timestamp
    pub use_image_mtimes: bool,
}

impl MapConfig {
    pub fn new(name: &str, world: &str, texture_dir: impl Into<PathBuf>) -> Self {
        MapConfig {
            name: name.to_string(),
            world: world.to_string(),
            view: RenderViewType::Isometric,
            tile_width: 1,
            rotations: BTreeSet::from([0]),
            texture_dir: texture_dir.into(),
            texture_size: 16,
            texture_blur: 0.0,
            water_opacity: 1.0,
            format: ImageFormatKind::Png,
            jpeg_quality: 85,
            background: rgba(0x33, 0x33, 0x33, 255),
            render_biomes: true,
            use_preblit_water: false,
            use_image_mtimes: false,
        }
    }
}

/// The whole render plan.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub output_dir: PathBuf,
    pub worlds: HashMap<String, WorldConfig>,
    pub maps: Vec<MapConfig>,
}

impl RenderConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        RenderConfig {
            output_dir: output_dir.into(),
            worlds: HashMap::new(),
            maps: Vec::new(),
        }
    }

    pub fn map(&self, name: &str) -> Option<&MapConfig> {
        self.maps.iter().find(|m| m.name == name)
    }
}

type TileSetKey = (String, RenderViewType, i32, u8);
type TileSetGroupKey = (String, RenderViewType, i32);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Drives one full render over all configured maps.
pub struct RenderManager {
    config: RenderConfig,
    behaviors: RenderBehaviors,
    metadata: MetadataStore,
    registry: Arc<BlockStateRegistry>,
    worlds: HashMap<(String, u8), World>,
    tile_sets: HashMap<TileSetKey, TileSet>,
    required_maps: Vec<(String, BTreeSet<u8>)>,
    failed_worlds: HashSet<String>,
    map_initialized: HashSet<String>,
    time_started_scanning: u64,
    stop: Arc<AtomicBool>,
}

impl RenderManager {
    pub fn new(config: RenderConfig) -> Self {
        let metadata = MetadataStore::open(&config.output_dir);
        RenderManager {
            config,
            behaviors: RenderBehaviors::default(),
            metadata,
            registry: Arc::new(BlockStateRegistry::new()),
            worlds: HashMap::new(),
            tile_sets: HashMap::new(),
            required_maps: Vec::new(),
            failed_worlds: HashSet::new(),
            map_initialized: HashSet::new(),
            time_started_scanning: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_render_behaviors(&mut self, behaviors: RenderBehaviors) {
        self.behaviors = behaviors;
    }

    /// Set from another thread to make workers finish their current unit
    /// and exit.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn required_maps(&self) -> &[(String, BTreeSet<u8>)] {
        &self.required_maps
    }

    /// Ensures the output directory exists and loads the persisted
    /// metadata.
    pub fn initialize(&mut self) -> RenderResult<()> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        self.metadata.read()?;
        Ok(())
    }

    /// Loads every needed (world, view, tile-width, rotation) tile set
    /// and scans it. All rotations of a map share the maximum depth so
    /// the viewer's zoom stays consistent across rotations.
    pub fn scan_worlds(&mut self) -> RenderResult<()> {
        self.time_started_scanning = now_secs();
        self.required_maps.clear();
        self.failed_worlds.clear();

        // every tile set of a map that is not completely skipped is
        // needed, even for skipped rotations: they share the zoom level
        let mut needed: BTreeSet<TileSetKey> = BTreeSet::new();
        let mut map_rotations: Vec<(String, BTreeSet<u8>)> = Vec::new();
        for map in &self.config.maps {
            if self.behaviors.is_complete_skip(&map.name) {
                continue;
            }
            let mut required_rotations = BTreeSet::new();
            for &rotation in &map.rotations {
                needed.insert((map.world.clone(), map.view, map.tile_width, rotation));
                if self.behaviors.get(&map.name, rotation) != RenderBehavior::Skip {
                    required_rotations.insert(rotation);
                }
            }
            map_rotations.push((map.name.clone(), required_rotations));
        }

        let mut group_depth: HashMap<TileSetGroupKey, usize> = HashMap::new();
        let mut offsets: HashMap<TileSetKey, TilePos> = HashMap::new();

        for key in &needed {
            let (world_name, view, tile_width, rotation) = key;
            if self.failed_worlds.contains(world_name) {
                continue;
            }
            let Some(world_config) = self.config.worlds.get(world_name) else {
                return Err(RenderError::UnknownWorld(world_name.clone()));
            };

            let mut world = World::open(&world_config.input_dir, world_config.dimension);
            world.set_rotation(*rotation);
            world.set_world_crop(world_config.crop.clone());
            if let Err(e) = world.load() {
                error!("unable to load world {}: {}", world_name, e);
                self.failed_worlds.insert(world_name.clone());
                continue;
            }

            let mut tile_set = view.create_tile_set(*tile_width, world_config.dimension);
            let offset = match tile_set.scan(&world, world_config.needs_centering()) {
                Ok(offset) => offset,
                Err(e) => {
                    error!("unable to scan world {}: {}", world_name, e);
                    self.failed_worlds.insert(world_name.clone());
                    continue;
                }
            };
            if world_config.needs_centering() {
                offsets.insert(key.clone(), offset);
            }

            let group = (world_name.clone(), *view, *tile_width);
            let depth = group_depth.entry(group).or_insert(0);
            *depth = (*depth).max(tile_set.depth());

            self.worlds.insert((world_name.clone(), *rotation), world);
            self.tile_sets.insert(key.clone(), tile_set);
        }

        for key in &needed {
            let group = (key.0.clone(), key.1, key.2);
            if let (Some(tile_set), Some(depth)) =
                (self.tile_sets.get_mut(key), group_depth.get(&group))
            {
                tile_set.set_depth(*depth);
            }
        }

        // drop maps whose world failed to load, keep the rest
        self.required_maps = map_rotations
            .into_iter()
            .filter(|(name, _)| {
                let world = &self.config.map(name).map(|m| m.world.clone()).unwrap_or_default();
                !self.failed_worlds.contains(world)
            })
            .collect();

        // persist each scanned map's image format and the tile offsets of
        // every rotation using a centered set
        for map in &self.config.maps {
            if self.behaviors.is_complete_skip(&map.name) {
                continue;
            }
            self.metadata.set_format(&map.name, map.format);
            for &rotation in &map.rotations {
                let key = (map.world.clone(), map.view, map.tile_width, rotation);
                if let Some(offset) = offsets.get(&key) {
                    self.metadata.set_tile_offset(&map.name, rotation, *offset);
                }
            }
        }
        self.metadata.write()?;
        Ok(())
    }

    fn tile_set_key(map: &MapConfig, rotation: u8) -> TileSetKey {
        (map.world.clone(), map.view, map.tile_width, rotation)
    }

    /// Renders one rotation of one map. Texture failures bubble up so the
    /// caller can skip the map's remaining rotations.
    pub fn render_map(
        &mut self,
        map_name: &str,
        rotation: u8,
        threads: usize,
        progress: &mut dyn ProgressHandler,
    ) -> RenderResult<()> {
        let Some(map) = self.config.map(map_name).cloned() else {
            return Ok(());
        };
        if !map.rotations.contains(&rotation)
            || self.behaviors.get(map_name, rotation) == RenderBehavior::Skip
            || self.failed_worlds.contains(&map.world)
        {
            return Ok(());
        }

        if !self.map_initialized.contains(map_name) {
            self.initialize_map(&map)?;
            self.map_initialized.insert(map_name.to_string());
        }

        let last_rendered = self.metadata.last_rendered(map_name, rotation);
        if last_rendered != 0 {
            info!("Last rendering was at timestamp {}.", last_rendered);
        }

        let output_dir = self
            .config
            .output_dir
            .join(map_name)
            .join(ROTATION_NAMES_SHORT[rotation as usize % 4]);

        let key = Self::tile_set_key(&map, rotation);
        {
            let tile_set = self
                .tile_sets
                .get_mut(&key)
                .ok_or_else(|| RenderError::NotScanned(map_name.to_string()))?;
            match self.behaviors.get(map_name, rotation) {
                RenderBehavior::Auto => {
                    info!("Scanning required tiles...");
                    if map.use_image_mtimes {
                        tile_set.scan_required_by_filetimes(&output_dir, map.format.suffix());
                    } else {
                        tile_set.scan_required_by_timestamp(last_rendered as u32);
                    }
                }
                _ => tile_set.reset_required(),
            }
            if tile_set.required_render_tile_count() == 0 {
                info!("No tiles need to get rendered.");
                return Ok(());
            }
        }

        // broken textures break every rotation of the map the same way
        let resources = TextureResources::load(
            &map.texture_dir,
            map.texture_size,
            map.texture_blur,
            map.water_opacity,
        )?;

        let mut block_images = map.view.create_block_images(rotation);
        block_images.generate_blocks(&resources);
        let images = Arc::new(block_images);

        let tile_set = Arc::new(self.tile_sets.get(&key).cloned().unwrap_or_else(|| {
            unreachable!("tile set checked above");
        }));
        let mut renderer = map.view.create_tile_renderer(images, &tile_set);
        map.view.configure_tile_renderer(&mut renderer, &map);

        self.metadata.set_max_zoom(map_name, tile_set.depth());
        self.metadata.set_tile_size(map_name, renderer.tile_size());
        self.metadata.set_format(map_name, map.format);
        self.metadata.write()?;

        let world = self
            .worlds
            .get(&(map.world.clone(), rotation))
            .cloned()
            .ok_or_else(|| RenderError::NotScanned(map_name.to_string()))?;

        let context = RenderContext {
            output_dir,
            format: map.format,
            jpeg_quality: map.jpeg_quality,
            background: map.background,
            world,
            registry: self.registry.clone(),
            tile_set,
            renderer: Arc::new(renderer),
        };
        let result = dispatch_auto(&context, threads, progress, self.stop.clone());

        self.metadata
            .set_last_rendered(map_name, rotation, self.time_started_scanning);
        self.metadata.write()?;

        if result.is_success() {
            Ok(())
        } else {
            Err(RenderError::TilesFailed(result.failed))
        }
    }

    /// Runs the whole plan. Per-map failures are logged and counted;
    /// other maps keep rendering.
    pub fn run(&mut self, threads: usize) -> RenderResult<()> {
        self.initialize()?;
        info!("Scanning worlds...");
        self.scan_worlds()?;

        let required = self.required_maps.clone();
        let mut failed = self.failed_worlds.len();
        let start_all = now_secs();

        for (map_index, (map_name, rotations)) in required.iter().enumerate() {
            info!(
                "[{}/{}] Rendering map {}:",
                map_index + 1,
                required.len(),
                map_name
            );

            let mut textures_broken = false;
            for (rotation_index, rotation) in rotations.iter().enumerate() {
                if textures_broken {
                    break;
                }
                info!(
                    "[{}.{}/{}.{}] Rendering rotation {}...",
                    map_index + 1,
                    rotation_index + 1,
                    map_index + 1,
                    rotations.len(),
                    ROTATION_NAMES[*rotation as usize % 4]
                );

                let start = now_secs();
                match self.render_map(map_name, *rotation, threads, &mut NoProgress) {
                    Ok(()) => {
                        info!(
                            "[{}.{}/{}.{}] Rendering rotation {} took {} seconds.",
                            map_index + 1,
                            rotation_index + 1,
                            map_index + 1,
                            rotations.len(),
                            ROTATION_NAMES[*rotation as usize % 4],
                            now_secs() - start
                        );
                    }
                    Err(RenderError::Texture(e)) => {
                        error!("unable to load textures for map {}: {}", map_name, e);
                        error!("Skipping remaining rotations.");
                        textures_broken = true;
                        failed += 1;
                    }
                    Err(e) => {
                        error!("rendering map {} rotation {} failed: {}", map_name, rotation, e);
                        failed += 1;
                    }
                }
            }
        }

        info!("Rendering all worlds took {} seconds.", now_secs() - start_all);
        if failed > 0 {
            return Err(RenderError::MapsFailed(failed));
        }
        Ok(())
    }

    /// First touch of a map this run: if the world grew and the new depth
    /// exceeds the stored one, push the old tile tree one level down.
    fn initialize_map(&mut self, map: &MapConfig) -> RenderResult<()> {
        let new_max = map
            .rotations
            .iter()
            .filter_map(|r| self.tile_sets.get(&Self::tile_set_key(map, *r)))
            .map(|ts| ts.depth())
            .max()
            .unwrap_or(0);
        let old_max = self.metadata.max_zoom(&map.name);
        // a stored zoom of 0 is ambiguous: depth 0 is a legitimate render
        let previously_rendered = map
            .rotations
            .iter()
            .any(|r| self.metadata.last_rendered(&map.name, *r) != 0);

        if previously_rendered && old_max < new_max {
            info!(
                "The max zoom level was increased from {} to {}.",
                old_max, new_max
            );
            info!("I will move some files around...");
            for &rotation in &map.rotations {
                let dir = self
                    .config
                    .output_dir
                    .join(&map.name)
                    .join(ROTATION_NAMES_SHORT[rotation as usize % 4]);
                for _ in old_max..new_max {
                    increase_max_zoom(&dir, map)?;
                }
            }
        }

        self.metadata.set_max_zoom(&map.name, new_max);
        self.metadata.write()?;
        Ok(())
    }
}

/// Opposite quadrant: where a moved subtree root lands inside its old
/// quadrant directory (1 <-> 4, 2 <-> 3).
fn opposite_quadrant(q: u8) -> u8 {
    5 - q
}

/// Grows a rendered tile tree by one zoom level: each root quadrant
/// subtree moves into `q/opposite(q)`, then the new depth-1 composites
/// are synthesized by downscaling the moved subtree roots and `base` is
/// rebuilt from them.
pub(crate) fn increase_max_zoom(dir: &Path, map: &MapConfig) -> RenderResult<()> {
    let ext = map.format.suffix();

    // depth-0 layout: base itself is the single leaf, tile (0, 0), which
    // becomes quadrant 4 at depth 1
    let base_path = dir.join(format!("base.{}", ext));
    let has_quadrants = (1..=4u8).any(|q| {
        dir.join(q.to_string()).is_dir() || dir.join(format!("{}.{}", q, ext)).is_file()
    });
    if !has_quadrants {
        if base_path.is_file() {
            let leaf = dir.join(format!("4.{}", ext));
            std::fs::rename(&base_path, &leaf)?;
            let child = codec::read_image(&leaf)?;
            let (w, h) = (child.width(), child.height());
            let mut base = RGBAImage::new(w, h);
            base.simple_blit(&child.resize_half(), w / 2, h / 2);
            codec::write_image(&base, &base_path, map.format, map.jpeg_quality, map.background)?;
        } else {
            warn!("nothing to move in {}", dir.display());
        }
        return Ok(());
    }

    for q in 1..=4u8 {
        let opp = opposite_quadrant(q);
        let subdir = dir.join(q.to_string());
        if subdir.is_dir() {
            let staging = dir.join(format!("{}_", q));
            std::fs::rename(&subdir, &staging)?;
            std::fs::create_dir_all(&subdir)?;
            std::fs::rename(&staging, subdir.join(opp.to_string()))?;
        }
        let image = dir.join(format!("{}.{}", q, ext));
        if image.is_file() {
            std::fs::create_dir_all(&subdir)?;
            std::fs::rename(&image, subdir.join(format!("{}.{}", opp, ext)))?;
        }
    }

    // synthesize the new depth-1 composites from the moved roots
    let mut dims: Option<(i32, i32)> = None;
    for q in 1..=4u8 {
        let opp = opposite_quadrant(q);
        let moved = dir
            .join(q.to_string())
            .join(format!("{}.{}", opp, ext));
        let Ok(child) = codec::read_image(&moved) else {
            continue;
        };
        let (w, h) = (child.width(), child.height());
        dims = Some((w, h));
        let mut composite = RGBAImage::new(w, h);
        let half = child.resize_half();
        // the moved root is the opposite-corner child of the new composite
        let (x, y) = match opp {
            1 => (0, 0),
            2 => (w / 2, 0),
            3 => (0, h / 2),
            _ => (w / 2, h / 2),
        };
        composite.simple_blit(&half, x, y);
        codec::write_image(
            &composite,
            &dir.join(format!("{}.{}", q, ext)),
            map.format,
            map.jpeg_quality,
            map.background,
        )?;
    }

    // and base from the four new composites
    if let Some((w, h)) = dims {
        let mut base = RGBAImage::new(w, h);
        for q in 1..=4u8 {
            let Ok(child) = codec::read_image(&dir.join(format!("{}.{}", q, ext))) else {
                continue;
            };
            let half = child.resize_half();
            let (x, y) = match q {
                1 => (0, 0),
                2 => (w / 2, 0),
                3 => (0, h / 2),
                _ => (w / 2, h / 2),
            };
            base.simple_blit(&half, x, y);
        }
        codec::write_image(
            &base,
            &dir.join(format!("base.{}", ext)),
            map.format,
            map.jpeg_quality,
            map.background,
        )?;
    } else {
        warn!(
            "no moved tiles found in {}, nothing to synthesize",
            dir.display()
        );
    }

    Ok(())
}
