//! World access: region discovery on disk, rotation and crop
//! re-projection, and a small per-worker chunk cache.

pub mod chunk;
pub mod crop;
pub mod entities;
pub mod pos;
pub mod region;

pub use chunk::Chunk;
pub use crop::WorldCrop;
pub use pos::{floor_div, floor_mod, BlockPos, ChunkPos, RegionPos};
pub use region::{ChunkLoadError, CompressionType, RegionFile};

use crate::block_state::BlockStateRegistry;
use log::warn;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("region directory {0} does not exist")]
    NoRegionDir(PathBuf),
    #[error("corrupt region header in {0} (file shorter than 8192 bytes)")]
    CorruptHeader(PathBuf),
    #[error("unknown chunk compression scheme {0}")]
    UnknownCompression(u8),
    #[error("region {0} is not part of this world")]
    NoSuchRegion(RegionPos),
}

pub type WorldResult<T> = Result<T, WorldError>;

/// Which dimension of a save to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dimension {
    #[default]
    Overworld,
    Nether,
    End,
}

impl Dimension {
    fn region_dir(&self, world_dir: &Path) -> PathBuf {
        match self {
            Dimension::Overworld => world_dir.join("region"),
            Dimension::Nether => world_dir.join("DIM-1").join("region"),
            Dimension::End => world_dir.join("DIM1").join("region"),
        }
    }

    /// Build limits as [min_y, max_y).
    pub fn y_range(&self) -> (i32, i32) {
        match self {
            Dimension::Overworld => (-64, 320),
            Dimension::Nether | Dimension::End => (0, 256),
        }
    }
}

/// A world: an ordered set of regions on disk plus the rotation and crop
/// applied to every position query. The on-disk files are always
/// addressed by their original coordinates.
#[derive(Clone)]
pub struct World {
    region_dir: PathBuf,
    dimension: Dimension,
    rotation: u8,
    crop: WorldCrop,
    // original (unrotated) coordinates
    regions: BTreeSet<RegionPos>,
}

impl World {
    /// Points at a world directory; call [`World::load`] to discover the
    /// region files.
    pub fn open(world_dir: impl AsRef<Path>, dimension: Dimension) -> Self {
        World {
            region_dir: dimension.region_dir(world_dir.as_ref()),
            dimension,
            rotation: 0,
            crop: WorldCrop::default(),
            regions: BTreeSet::new(),
        }
    }

    pub fn set_rotation(&mut self, rotation: u8) {
        self.rotation = rotation % 4;
    }

    pub fn rotation(&self) -> u8 {
        self.rotation
    }

    pub fn set_world_crop(&mut self, crop: WorldCrop) {
        self.crop = crop;
    }

    pub fn crop(&self) -> &WorldCrop {
        &self.crop
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    pub fn region_dir(&self) -> &Path {
        &self.region_dir
    }

    /// Scans the region directory and records every region whose filename
    /// parses and which the crop does not exclude.
    pub fn load(&mut self) -> WorldResult<()> {
        if !self.region_dir.is_dir() {
            return Err(WorldError::NoRegionDir(self.region_dir.clone()));
        }
        self.regions.clear();
        for entry in std::fs::read_dir(&self.region_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(pos) = RegionPos::from_filename(name) else {
                continue;
            };
            if !self.crop.is_region_contained(&pos) {
                continue;
            }
            self.regions.insert(pos);
        }
        Ok(())
    }

    /// Available regions in rotated coordinates, sorted.
    pub fn available_regions(&self) -> Vec<RegionPos> {
        let mut regions: Vec<RegionPos> = self
            .regions
            .iter()
            .map(|r| r.rotated(self.rotation))
            .collect();
        regions.sort();
        regions
    }

    pub fn has_region(&self, pos: &RegionPos) -> bool {
        self.regions.contains(&pos.unrotated(self.rotation))
    }

    /// On-disk path of a region given its rotated position.
    pub fn region_path(&self, pos: &RegionPos) -> WorldResult<PathBuf> {
        let original = pos.unrotated(self.rotation);
        if !self.regions.contains(&original) {
            return Err(WorldError::NoSuchRegion(*pos));
        }
        Ok(self.region_dir.join(original.filename()))
    }

    /// Opens a region (rotated position) configured with this world's
    /// rotation and crop. Headers are not read yet.
    pub fn region(&self, pos: &RegionPos) -> WorldResult<RegionFile> {
        let path = self.region_path(pos)?;
        let mut region = RegionFile::new(path, pos.unrotated(self.rotation));
        region.set_rotation(self.rotation);
        region.set_world_crop(self.crop.clone());
        Ok(region)
    }

    /// Modification time of a region file in Unix seconds.
    pub fn region_mtime(&self, pos: &RegionPos) -> WorldResult<u64> {
        let path = self.region_path(pos)?;
        let mtime = std::fs::metadata(path)?
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(mtime.as_secs())
    }
}

/// How many decoded chunks one worker keeps around.
const CHUNK_CACHE_SIZE: usize = 64;

/// Per-worker chunk cache with LRU eviction. Failed chunks are cached as
/// empty so a broken chunk is decoded (and warned about) once, not per
/// block lookup.
pub struct WorldCache {
    world: World,
    registry: Arc<BlockStateRegistry>,
    chunks: HashMap<ChunkPos, (u64, Arc<Chunk>)>,
    tick: u64,
}

impl WorldCache {
    pub fn new(world: World, registry: Arc<BlockStateRegistry>) -> Self {
        WorldCache {
            world,
            registry,
            chunks: HashMap::new(),
            tick: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn registry(&self) -> &BlockStateRegistry {
        &self.registry
    }

    /// Fetches a chunk (rotated position), decoding it on a miss. Returns
    /// `None` only when the chunk's region is not part of the world.
    pub fn get_chunk(&mut self, pos: ChunkPos) -> Option<Arc<Chunk>> {
        self.tick += 1;
        if let Some((used, chunk)) = self.chunks.get_mut(&pos) {
            *used = self.tick;
            return Some(chunk.clone());
        }

        let region_pos = pos.region();
        if !self.world.has_region(&region_pos) {
            return None;
        }
        let chunk = self.decode_chunk(pos, &region_pos);
        self.insert(pos, chunk.clone());
        Some(chunk)
    }

    fn decode_chunk(&self, pos: ChunkPos, region_pos: &RegionPos) -> Arc<Chunk> {
        let rotation = self.world.rotation();
        let mut region = match self.world.region(region_pos) {
            Ok(region) => region,
            Err(e) => {
                warn!("unable to open region {}: {}", region_pos, e);
                return Arc::new(Chunk::empty(pos, rotation));
            }
        };
        if let Err(e) = region.read_headers() {
            warn!("unable to read region {}: {}", region_pos, e);
            return Arc::new(Chunk::empty(pos, rotation));
        }
        match region.load_chunk(pos, &self.registry) {
            Ok(chunk) => Arc::new(chunk),
            Err(ChunkLoadError::DoesNotExist) => Arc::new(Chunk::empty(pos, rotation)),
            Err(e) => {
                warn!("chunk {} failed to decode, treating as air: {}", pos, e);
                Arc::new(Chunk::empty(pos, rotation))
            }
        }
    }

    fn insert(&mut self, pos: ChunkPos, chunk: Arc<Chunk>) {
        if self.chunks.len() >= CHUNK_CACHE_SIZE {
            if let Some(oldest) = self
                .chunks
                .iter()
                .min_by_key(|(_, (used, _))| *used)
                .map(|(pos, _)| *pos)
            {
                self.chunks.remove(&oldest);
            }
        }
        self.chunks.insert(pos, (self.tick, chunk));
    }

    /// The block id at a rotated world position; `None` is air.
    pub fn get_block(&mut self, pos: &BlockPos) -> Option<u16> {
        let chunk = self.get_chunk(pos.chunk())?;
        chunk.get_block(pos)
    }
}
