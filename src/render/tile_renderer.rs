//! Rasterizes one render tile from world blocks and catalog sprites.
//!
//! The isometric path collects every visible block of the tile's chunks
//! into a depth-sorted list and blits back to front; the flat views walk
//! block columns directly.

use super::block_images::{
    biome_tint_color, BiomeTint, BlockImages, FACE_ALL, FACE_LEFT, FACE_RIGHT, FACE_TOP,
};
use super::tile_set::{TilePos, TileSet, ViewGeometry};
use super::RenderViewType;
use crate::block_state::BlockState;
use crate::image::RGBAImage;
use crate::world::{BlockPos, WorldCache};
use log::warn;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_BIOME: &str = "minecraft:plains";
/// How deep the top-down view keeps blending through transparent blocks.
const TRANSPARENT_DEPTH_CAP: i32 = 64;

/// A block queued for drawing into the current tile.
struct RenderBlock {
    x: i32,
    y: i32,
    pos: BlockPos,
    id: u16,
    transparent: bool,
    face_mask: u8,
}

impl RenderBlock {
    /// Back-to-front: ascending x+z, then descending block y; at the same
    /// draw position opaque before transparent, ties by block id.
    fn sort_key(&self) -> (i32, i32, bool, u16) {
        (self.pos.x + self.pos.z, -self.pos.y, self.transparent, self.id)
    }
}

impl PartialEq for RenderBlock {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for RenderBlock {}

impl PartialOrd for RenderBlock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RenderBlock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

struct BlockInfo {
    state: BlockState,
    known: bool,
    transparent: bool,
    tint: Option<BiomeTint>,
}

/// Renders tiles of one map rotation. Shared read-only between workers;
/// all mutable state lives in the per-worker [`WorldCache`].
pub struct TileRenderer {
    images: Arc<BlockImages>,
    geometry: ViewGeometry,
    tile_offset: TilePos,
    render_biomes: bool,
    use_preblit_water: bool,
}

impl TileRenderer {
    pub fn new(images: Arc<BlockImages>, tile_set: &TileSet) -> Self {
        TileRenderer {
            images,
            geometry: tile_set.geometry(),
            tile_offset: tile_set.tile_offset(),
            render_biomes: true,
            use_preblit_water: false,
        }
    }

    pub fn set_render_biomes(&mut self, render_biomes: bool) {
        self.render_biomes = render_biomes;
    }

    pub fn set_use_preblit_water(&mut self, use_preblit_water: bool) {
        self.use_preblit_water = use_preblit_water;
    }

    /// Tile image dimensions in pixels.
    pub fn tile_size(&self) -> (i32, i32) {
        let s = self.images.texture_size();
        match self.geometry.view {
            RenderViewType::Isometric => (
                self.geometry.tile_units_x() * s,
                self.geometry.tile_units_y() * s / 2,
            ),
            RenderViewType::TopDown | RenderViewType::Side => (
                self.geometry.tile_units_x() * s,
                self.geometry.tile_units_y() * s,
            ),
        }
    }

    /// Screen position of a block's sprite relative to the tile's origin.
    fn draw_pos(&self, tile: &TilePos, pos: &BlockPos) -> (i32, i32) {
        let s = self.images.texture_size();
        let (u, v) = self.geometry.block_units(pos.x, pos.y, pos.z);
        let u0 = (tile.x + self.tile_offset.x) * self.geometry.tile_units_x();
        let v0 = (tile.y + self.tile_offset.y) * self.geometry.tile_units_y();
        match self.geometry.view {
            RenderViewType::Isometric => ((u - u0) * s, (v - v0) * s / 2),
            RenderViewType::TopDown | RenderViewType::Side => ((u - u0) * s, (v - v0) * s),
        }
    }

    /// Renders one render tile into a fresh image. Never fails: missing
    /// sprites become magenta markers and broken chunks render as air.
    pub fn render_tile(
        &self,
        tile: TilePos,
        tile_set: &TileSet,
        cache: &mut WorldCache,
    ) -> RGBAImage {
        let (width, height) = self.tile_size();
        let mut image = RGBAImage::new(width, height);
        match self.geometry.view {
            RenderViewType::Isometric => self.render_isometric(tile, tile_set, cache, &mut image),
            RenderViewType::TopDown => self.render_topdown(tile, tile_set, cache, &mut image),
            RenderViewType::Side => self.render_side(tile, tile_set, cache, &mut image),
        }
        image
    }

    fn block_info<'a>(
        &self,
        infos: &'a mut HashMap<u16, BlockInfo>,
        cache: &WorldCache,
        id: u16,
    ) -> &'a BlockInfo {
        infos.entry(id).or_insert_with(|| {
            let state = cache.registry().get_block_state(id);
            let known = self.images.sprite(&state, FACE_ALL).is_some();
            BlockInfo {
                known,
                transparent: self.images.is_transparent(&state),
                tint: self.images.tint_of(&state),
                state,
            }
        })
    }

    fn is_opaque(
        &self,
        infos: &mut HashMap<u16, BlockInfo>,
        cache: &mut WorldCache,
        pos: &BlockPos,
    ) -> bool {
        match cache.get_block(pos) {
            Some(id) => {
                let info = self.block_info(infos, cache, id);
                info.known && !info.transparent
            }
            None => false,
        }
    }

    /// The sprite for one queued block, biome-colorized when applicable.
    /// `None` falls back to the magenta marker at the call site.
    fn colorized_sprite(
        &self,
        info: &BlockInfo,
        chunk_biome: Option<&str>,
        face_mask: u8,
    ) -> Option<RGBAImage> {
        let sprite = self.images.sprite(&info.state, face_mask)?;
        match info.tint {
            Some(tint) => {
                let biome = if self.render_biomes {
                    chunk_biome.unwrap_or(DEFAULT_BIOME)
                } else {
                    DEFAULT_BIOME
                };
                let (r, g, b) = biome_tint_color(tint, biome);
                Some(sprite.colorize(r, g, b, 1.0))
            }
            None => Some(sprite.clone()),
        }
    }

    fn render_isometric(
        &self,
        tile: TilePos,
        tile_set: &TileSet,
        cache: &mut WorldCache,
        image: &mut RGBAImage,
    ) {
        let s = self.images.texture_size();
        let (width, height) = self.tile_size();
        let (sprite_w, sprite_h) = (2 * s, s + s / 2);

        let mut infos: HashMap<u16, BlockInfo> = HashMap::new();
        let mut blocks: Vec<RenderBlock> = Vec::new();

        let chunks: Vec<_> = tile_set.tile_chunks(&tile).copied().collect();
        for chunk_pos in chunks {
            let Some(chunk) = cache.get_chunk(chunk_pos) else {
                continue;
            };
            let mut chunk_blocks: Vec<(BlockPos, u16)> = Vec::new();
            chunk.for_each_block(|pos, id| chunk_blocks.push((pos, id)));

            for (pos, id) in chunk_blocks {
                let (x, y) = self.draw_pos(&tile, &pos);
                if x + sprite_w <= 0 || x >= width || y + sprite_h <= 0 || y >= height {
                    continue;
                }

                let transparent = {
                    let info = self.block_info(&mut infos, cache, id);
                    info.transparent
                };

                // only the top block of a connected water run is drawn
                if self.use_preblit_water && is_water(&infos[&id].state) {
                    if let Some(above) = cache.get_block(&BlockPos::new(pos.x, pos.y + 1, pos.z)) {
                        if is_water(&self.block_info(&mut infos, cache, above).state) {
                            continue;
                        }
                    }
                }

                let mut face_mask = 0u8;
                if !self.is_opaque(&mut infos, cache, &BlockPos::new(pos.x, pos.y + 1, pos.z)) {
                    face_mask |= FACE_TOP;
                }
                if !self.is_opaque(&mut infos, cache, &BlockPos::new(pos.x, pos.y, pos.z + 1)) {
                    face_mask |= FACE_LEFT;
                }
                if !self.is_opaque(&mut infos, cache, &BlockPos::new(pos.x + 1, pos.y, pos.z)) {
                    face_mask |= FACE_RIGHT;
                }
                if face_mask == 0 {
                    continue;
                }

                blocks.push(RenderBlock {
                    x,
                    y,
                    pos,
                    id,
                    transparent,
                    face_mask,
                });
            }
        }

        blocks.sort();

        for block in &blocks {
            let info = &infos[&block.id];
            let biome = self.biome_for(cache, &block.pos);
            match self.colorized_sprite(info, biome.as_deref(), block.face_mask) {
                Some(sprite) => image.alpha_blit(&sprite, block.x, block.y),
                None => {
                    warn!(
                        "no sprite for block {} at {}, drawing marker",
                        info.state, block.pos
                    );
                    image.alpha_blit(self.images.marker(), block.x, block.y);
                }
            }
        }
    }

    fn biome_for(&self, cache: &mut WorldCache, pos: &BlockPos) -> Option<String> {
        if !self.render_biomes {
            return None;
        }
        let chunk = cache.get_chunk(pos.chunk())?;
        chunk.biome_at(pos).map(|b| b.to_string())
    }

    fn render_topdown(
        &self,
        tile: TilePos,
        tile_set: &TileSet,
        cache: &mut WorldCache,
        image: &mut RGBAImage,
    ) {
        let (min_y, max_y) = (self.geometry.min_y, self.geometry.max_y);
        let mut infos: HashMap<u16, BlockInfo> = HashMap::new();

        let chunks: Vec<_> = tile_set.tile_chunks(&tile).copied().collect();
        for chunk_pos in chunks {
            let Some(chunk) = cache.get_chunk(chunk_pos) else {
                continue;
            };
            let (bx, bz) = chunk_pos.block_origin();
            for lz in 0..16 {
                for lx in 0..16 {
                    let (x, z) = (bx + lx, bz + lz);
                    let Some((top_y, _)) = chunk.top_block(x, z, max_y - 1) else {
                        continue;
                    };

                    // walk down through transparent blocks, then draw the
                    // stack bottom-up so blending is correct
                    let mut stack: Vec<(BlockPos, u16)> = Vec::new();
                    let mut y = top_y;
                    while y >= min_y && (top_y - y) < TRANSPARENT_DEPTH_CAP {
                        let pos = BlockPos::new(x, y, z);
                        let Some(id) = chunk.get_block(&pos) else {
                            y -= 1;
                            continue;
                        };
                        let transparent = self.block_info(&mut infos, cache, id).transparent;
                        stack.push((pos, id));
                        if !transparent {
                            break;
                        }
                        y -= 1;
                    }

                    for (pos, id) in stack.iter().rev() {
                        let (px, py) = self.draw_pos(&tile, pos);
                        let info = &infos[id];
                        let biome = self.biome_for(cache, pos);
                        match self.colorized_sprite(info, biome.as_deref(), FACE_ALL) {
                            Some(sprite) => image.alpha_blit(&sprite, px, py),
                            None => {
                                warn!(
                                    "no sprite for block {} at {}, drawing marker",
                                    info.state, pos
                                );
                                image.alpha_blit(self.images.marker(), px, py);
                            }
                        }
                    }
                }
            }
        }
    }

    fn render_side(
        &self,
        tile: TilePos,
        tile_set: &TileSet,
        cache: &mut WorldCache,
        image: &mut RGBAImage,
    ) {
        let (min_y, max_y) = (self.geometry.min_y, self.geometry.max_y);
        let mut infos: HashMap<u16, BlockInfo> = HashMap::new();

        // front elevation along +z: nearer chunks (smaller z) win, so
        // draw in descending z and overwrite
        let mut chunks: Vec<_> = tile_set.tile_chunks(&tile).copied().collect();
        chunks.sort_by_key(|c| std::cmp::Reverse(c.z));

        for chunk_pos in chunks {
            let Some(chunk) = cache.get_chunk(chunk_pos) else {
                continue;
            };
            let (bx, bz) = chunk_pos.block_origin();
            for lz in (0..16).rev() {
                for lx in 0..16 {
                    let (x, z) = (bx + lx, bz + lz);
                    for y in min_y..max_y {
                        let pos = BlockPos::new(x, y, z);
                        let Some(id) = chunk.get_block(&pos) else {
                            continue;
                        };
                        let (px, py) = self.draw_pos(&tile, &pos);
                        let info = self.block_info(&mut infos, cache, id);
                        let state = info.state.clone();
                        let biome = self.biome_for(cache, &pos);
                        let info = &infos[&id];
                        match self.colorized_sprite(info, biome.as_deref(), FACE_ALL) {
                            Some(sprite) => image.simple_blit(&sprite, px, py),
                            None => {
                                warn!(
                                    "no sprite for block {} at {}, drawing marker",
                                    state, pos
                                );
                                image.simple_blit(self.images.marker(), px, py);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn is_water(state: &BlockState) -> bool {
    state.get_name() == "minecraft:water" || state.get_name() == "minecraft:bubble_column"
}
