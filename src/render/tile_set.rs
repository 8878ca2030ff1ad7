//! The spatial index of one (world, view, tile-width) triple: which
//! render tiles exist, which chunks feed each tile, how deep the
//! quadtree is, and which tiles need re-rendering this run.
//!
//! Tiles are addressed two ways: leaf tiles by [`TilePos`] on the tile
//! grid, quadtree nodes by [`TilePath`], a sequence of quadrant digits
//! 1..4 (tl, tr, bl, br). Parent/child navigation is path truncation and
//! extension; there are no back-pointers.

use super::RenderViewType;
use crate::world::pos::floor_div;
use crate::world::{ChunkPos, World, WorldResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A position on the tile grid of the rendered map plane.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> Self {
        TilePos { x, y }
    }
}

impl fmt::Display for TilePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A quadtree address: digits 1..4 from the root. The empty path is the
/// root ("base"); a path of length k addresses a tile at depth k.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TilePath {
    path: Vec<u8>,
}

impl TilePath {
    pub fn root() -> Self {
        TilePath::default()
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn digits(&self) -> &[u8] {
        &self.path
    }

    pub fn parent(&self) -> Option<TilePath> {
        if self.path.is_empty() {
            return None;
        }
        Some(TilePath {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, quadrant: u8) -> TilePath {
        debug_assert!((1..=4).contains(&quadrant));
        let mut path = self.path.clone();
        path.push(quadrant);
        TilePath { path }
    }

    /// The address of `tile` in a quadtree of the given depth. The root
    /// covers tile coordinates [-2^(depth-1), 2^(depth-1)).
    pub fn from_tile(tile: TilePos, depth: usize) -> TilePath {
        let mut path = Vec::with_capacity(depth);
        let half = 1i32 << depth.max(1).saturating_sub(1);
        let (mut min_x, mut max_x) = (-half, half);
        let (mut min_y, mut max_y) = (-half, half);
        for _ in 0..depth {
            let mid_x = (min_x + max_x) / 2;
            let mid_y = (min_y + max_y) / 2;
            let right = tile.x >= mid_x;
            let bottom = tile.y >= mid_y;
            path.push(match (bottom, right) {
                (false, false) => 1,
                (false, true) => 2,
                (true, false) => 3,
                (true, true) => 4,
            });
            if right {
                min_x = mid_x;
            } else {
                max_x = mid_x;
            }
            if bottom {
                min_y = mid_y;
            } else {
                max_y = mid_y;
            }
        }
        TilePath { path }
    }

    /// Inverse of [`TilePath::from_tile`] for full-depth paths.
    pub fn to_tile(&self) -> TilePos {
        let depth = self.path.len();
        let half = 1i32 << depth.max(1).saturating_sub(1);
        let (mut min_x, mut max_x) = (-half, half);
        let (mut min_y, mut max_y) = (-half, half);
        for &digit in &self.path {
            let mid_x = (min_x + max_x) / 2;
            let mid_y = (min_y + max_y) / 2;
            let (bottom, right) = match digit {
                1 => (false, false),
                2 => (false, true),
                3 => (true, false),
                _ => (true, true),
            };
            if right {
                min_x = mid_x;
            } else {
                max_x = mid_x;
            }
            if bottom {
                min_y = mid_y;
            } else {
                max_y = mid_y;
            }
        }
        TilePos::new(min_x, min_y)
    }

    /// File path of this tile under `dir`, e.g. `3/2/1.png`, or
    /// `base.png` for the root.
    pub fn file_path(&self, dir: &Path, extension: &str) -> PathBuf {
        if self.path.is_empty() {
            return dir.join(format!("base.{}", extension));
        }
        let mut path = dir.to_path_buf();
        for &digit in &self.path[..self.path.len() - 1] {
            path = path.join(digit.to_string());
        }
        path.join(format!("{}.{}", self.path[self.path.len() - 1], extension))
    }
}

impl fmt::Display for TilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            return write!(f, "base");
        }
        for (i, digit) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", digit)?;
        }
        Ok(())
    }
}

/// Screen-space extents of the three views, in block units so the tile
/// grid is independent of the texture size. Isometric: one horizontal
/// unit (= S px) per x+z step, one vertical unit (= S/2 px) per
/// (x-z)-y step; sprites cover 2x3 units.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ViewGeometry {
    pub view: RenderViewType,
    /// tile edge length in chunks
    pub tile_width: i32,
    /// world build limits [min_y, max_y)
    pub min_y: i32,
    pub max_y: i32,
}

impl ViewGeometry {
    /// Horizontal tile extent in block units.
    pub fn tile_units_x(&self) -> i32 {
        match self.view {
            RenderViewType::Isometric => 32 * self.tile_width,
            RenderViewType::TopDown | RenderViewType::Side => 16 * self.tile_width,
        }
    }

    /// Vertical tile extent in block units.
    pub fn tile_units_y(&self) -> i32 {
        match self.view {
            RenderViewType::Isometric => 48 * self.tile_width,
            RenderViewType::TopDown | RenderViewType::Side => 16 * self.tile_width,
        }
    }

    /// Anchor of a block in screen units (the top-left of its sprite).
    pub fn block_units(&self, x: i32, y: i32, z: i32) -> (i32, i32) {
        match self.view {
            RenderViewType::Isometric => (x + z, (x - z) - y),
            RenderViewType::TopDown => (x, z),
            RenderViewType::Side => (x, self.max_y - 1 - y),
        }
    }

    /// All tiles whose pixel rect a chunk's sprites can touch.
    pub fn chunk_tiles(&self, chunk: &ChunkPos) -> Vec<TilePos> {
        let (bx, bz) = chunk.block_origin();
        let (u_min, u_max, v_min, v_max) = match self.view {
            RenderViewType::Isometric => {
                // u = x+z over the chunk, plus the 2-unit sprite width;
                // v = (x-z)-y over the full build height, plus 3 units
                let u0 = bx + bz;
                let d0 = bx - (bz + 15);
                let d1 = (bx + 15) - bz;
                (
                    u0,
                    u0 + 30 + 1,
                    d0 - (self.max_y - 1),
                    d1 - self.min_y + 2,
                )
            }
            RenderViewType::TopDown => (bx, bx + 15, bz, bz + 15),
            RenderViewType::Side => (bx, bx + 15, 0, self.max_y - self.min_y - 1),
        };

        let tx0 = floor_div(u_min, self.tile_units_x());
        let tx1 = floor_div(u_max, self.tile_units_x());
        let ty0 = floor_div(v_min, self.tile_units_y());
        let ty1 = floor_div(v_max, self.tile_units_y());

        let mut tiles = Vec::with_capacity(((tx1 - tx0 + 1) * (ty1 - ty0 + 1)) as usize);
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                tiles.push(TilePos::new(tx, ty));
            }
        }
        tiles
    }
}

/// The tile index of one world under one view.
#[derive(Clone)]
pub struct TileSet {
    geometry: ViewGeometry,
    /// render tile -> feeding chunks with their modification timestamps
    tiles: BTreeMap<TilePos, BTreeMap<ChunkPos, u32>>,
    tile_offset: TilePos,
    depth: usize,
    required_render_tiles: BTreeSet<TilePos>,
    required_composite_tiles: BTreeSet<TilePath>,
}

impl TileSet {
    pub(crate) fn new(view: RenderViewType, tile_width: i32, min_y: i32, max_y: i32) -> Self {
        TileSet {
            geometry: ViewGeometry {
                view,
                tile_width,
                min_y,
                max_y,
            },
            tiles: BTreeMap::new(),
            tile_offset: TilePos::default(),
            depth: 0,
            required_render_tiles: BTreeSet::new(),
            required_composite_tiles: BTreeSet::new(),
        }
    }

    pub fn view(&self) -> RenderViewType {
        self.geometry.view
    }

    pub fn tile_width(&self) -> i32 {
        self.geometry.tile_width
    }

    pub(crate) fn geometry(&self) -> ViewGeometry {
        self.geometry
    }

    /// Scans the world's region headers and builds the tile index. With
    /// `center` set, the tile grid is translated so the bounding box of
    /// all render tiles is symmetric about the origin; the returned
    /// offset is that translation.
    pub fn scan(&mut self, world: &World, center: bool) -> WorldResult<TilePos> {
        self.tiles.clear();
        self.required_render_tiles.clear();
        self.required_composite_tiles.clear();

        for region_pos in world.available_regions() {
            let mut region = world.region(&region_pos)?;
            region.read_headers()?;
            for chunk in region.containing_chunks() {
                let timestamp = region.get_chunk_timestamp(&chunk);
                for tile in self.geometry.chunk_tiles(&chunk) {
                    self.tiles
                        .entry(tile)
                        .or_default()
                        .insert(chunk, timestamp);
                }
            }
        }

        self.tile_offset = if center {
            self.center_tiles()
        } else {
            TilePos::default()
        };
        self.depth = self.compute_depth();
        Ok(self.tile_offset)
    }

    fn center_tiles(&mut self) -> TilePos {
        if self.tiles.is_empty() {
            return TilePos::default();
        }
        let min_x = self.tiles.keys().map(|t| t.x).min().unwrap_or(0);
        let max_x = self.tiles.keys().map(|t| t.x).max().unwrap_or(0);
        let min_y = self.tiles.keys().map(|t| t.y).min().unwrap_or(0);
        let max_y = self.tiles.keys().map(|t| t.y).max().unwrap_or(0);
        let offset = TilePos::new((min_x + max_x + 1) / 2, (min_y + max_y + 1) / 2);
        if offset != TilePos::default() {
            self.tiles = std::mem::take(&mut self.tiles)
                .into_iter()
                .map(|(tile, chunks)| {
                    (TilePos::new(tile.x - offset.x, tile.y - offset.y), chunks)
                })
                .collect();
        }
        offset
    }

    fn compute_depth(&self) -> usize {
        let mut depth = 0;
        for tile in self.tiles.keys() {
            while !Self::fits(tile, depth) {
                depth += 1;
            }
        }
        depth
    }

    fn fits(tile: &TilePos, depth: usize) -> bool {
        if depth == 0 {
            return *tile == TilePos::default();
        }
        let half = 1i32 << (depth - 1);
        tile.x >= -half && tile.x < half && tile.y >= -half && tile.y < half
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Forces a larger depth (all rotations of a map must share one zoom
    /// level). Shrinking below what the tiles need is ignored.
    pub fn set_depth(&mut self, depth: usize) {
        if depth >= self.compute_depth() {
            self.depth = depth;
        }
    }

    pub fn tile_offset(&self) -> TilePos {
        self.tile_offset
    }

    pub fn render_tiles(&self) -> impl Iterator<Item = &TilePos> {
        self.tiles.keys()
    }

    pub fn render_tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn contains_tile(&self, tile: &TilePos) -> bool {
        self.tiles.contains_key(tile)
    }

    /// Chunks whose blocks can paint into this tile. The set already
    /// includes the view-dependent overdraw neighbors.
    pub fn tile_chunks(&self, tile: &TilePos) -> impl Iterator<Item = &ChunkPos> {
        self.tiles.get(tile).into_iter().flat_map(|m| m.keys())
    }

    fn tile_max_timestamp(&self, tile: &TilePos) -> u32 {
        self.tiles
            .get(tile)
            .map(|chunks| chunks.values().copied().max().unwrap_or(0))
            .unwrap_or(0)
    }

    /// A render tile is required iff one of its chunks (which include the
    /// overdraw neighbors) was modified at or after `timestamp`.
    pub fn scan_required_by_timestamp(&mut self, timestamp: u32) {
        self.required_render_tiles = self
            .tiles
            .iter()
            .filter(|(_, chunks)| chunks.values().any(|ts| *ts >= timestamp))
            .map(|(tile, _)| *tile)
            .collect();
        self.update_required_composites();
    }

    /// A render tile is required iff its output file is missing or older
    /// than the newest chunk feeding it.
    pub fn scan_required_by_filetimes(&mut self, dir: &Path, extension: &str) {
        self.required_render_tiles = self
            .tiles
            .keys()
            .filter(|tile| {
                let path = TilePath::from_tile(**tile, self.depth).file_path(dir, extension);
                match std::fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(mtime) => {
                        let mtime = mtime
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_secs())
                            .unwrap_or(0);
                        mtime < self.tile_max_timestamp(tile) as u64
                    }
                    Err(_) => true,
                }
            })
            .copied()
            .collect();
        self.update_required_composites();
    }

    /// Marks every render tile required (force render).
    pub fn reset_required(&mut self) {
        self.required_render_tiles = self.tiles.keys().copied().collect();
        self.update_required_composites();
    }

    /// Every ancestor of a required render tile is required for
    /// composition.
    fn update_required_composites(&mut self) {
        self.required_composite_tiles.clear();
        for tile in &self.required_render_tiles {
            let mut path = TilePath::from_tile(*tile, self.depth);
            while let Some(parent) = path.parent() {
                if !self.required_composite_tiles.insert(parent.clone()) {
                    break;
                }
                path = parent;
            }
        }
    }

    pub fn required_render_tiles(&self) -> impl Iterator<Item = &TilePos> {
        self.required_render_tiles.iter()
    }

    pub fn required_render_tile_count(&self) -> usize {
        self.required_render_tiles.len()
    }

    pub fn is_tile_required(&self, tile: &TilePos) -> bool {
        self.required_render_tiles.contains(tile)
    }

    pub fn required_composite_tiles(&self) -> impl Iterator<Item = &TilePath> {
        self.required_composite_tiles.iter()
    }

    pub fn is_composite_required(&self, path: &TilePath) -> bool {
        self.required_composite_tiles.contains(path)
    }
}
