//! Decoded chunks: 16x16 block columns split into 16-block-tall sections,
//! each with its own block-state palette and packed indices.

use super::crop::WorldCrop;
use super::pos::{floor_div, floor_mod, BlockPos, ChunkPos};
use crate::block_state::{BlockState, BlockStateRegistry};
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use smol_str::SmolStr;

/// First DataVersion with the 1.18 `sections`/`block_states` layout.
pub const MIN_DATA_VERSION: i32 = 2844;

struct Section {
    y: i32,
    /// 4096 interned block ids in YZX order; empty when `uniform` is set.
    blocks: Vec<u16>,
    uniform: Option<u16>,
    biome_palette: Vec<SmolStr>,
    /// 64 palette indices (4x4x4 cells); empty means palette[0] everywhere.
    biome_data: Vec<u16>,
}

impl Section {
    fn block_at(&self, lx: i32, ly: i32, lz: i32) -> u16 {
        if let Some(id) = self.uniform {
            return id;
        }
        self.blocks[((ly * 16 + lz) * 16 + lx) as usize]
    }

    fn biome_at(&self, lx: i32, ly: i32, lz: i32) -> Option<&SmolStr> {
        if self.biome_palette.is_empty() {
            return None;
        }
        if self.biome_data.is_empty() {
            return self.biome_palette.first();
        }
        let index = self.biome_data[(((ly / 4) * 4 + lz / 4) * 4 + lx / 4) as usize];
        self.biome_palette.get(index as usize)
    }
}

/// A decoded chunk. Positions handed in and out are in rotated world
/// coordinates; blocks outside the crop read as air.
pub struct Chunk {
    pos: ChunkPos,
    pos_original: ChunkPos,
    rotation: u8,
    crop: Option<WorldCrop>,
    sections: Vec<Section>,
    air_ids: Vec<u16>,
}

fn is_air_name(name: &str) -> bool {
    matches!(
        name,
        "minecraft:air" | "minecraft:cave_air" | "minecraft:void_air"
    )
}

/// Unpacks palette indices from the chunk format. Entries do not span
/// long boundaries; the minimum index width is 4 bits.
pub fn unpack_packed_indices(packed: &[i64], palette_size: usize, count: usize, min_bits: u32) -> Vec<u16> {
    let bits = (usize::BITS - (palette_size.max(2) - 1).leading_zeros()).max(min_bits);
    let entries_per_long = 64 / bits;
    let mask = (1u64 << bits) - 1;

    let mut result = Vec::with_capacity(count);
    'outer: for &long_val in packed {
        let long_unsigned = long_val as u64;
        for j in 0..entries_per_long {
            if result.len() >= count {
                break 'outer;
            }
            result.push(((long_unsigned >> (j * bits)) & mask) as u16);
        }
    }
    result.resize(count, 0);
    result
}

impl Chunk {
    /// Decodes a chunk NBT tree. `pos` is the rotated chunk position the
    /// caller asked for; the tree's own xPos/zPos must match its
    /// unrotated form.
    pub fn from_nbt(
        nbt: &NbtCompound,
        pos: ChunkPos,
        registry: &BlockStateRegistry,
        rotation: u8,
        crop: Option<&WorldCrop>,
    ) -> Result<Chunk, String> {
        let pos_original = pos.unrotated(rotation);
        let x_pos = nbt.get::<_, i32>("xPos").map_err(|e| e.to_string())?;
        let z_pos = nbt.get::<_, i32>("zPos").map_err(|e| e.to_string())?;
        if x_pos != pos_original.x || z_pos != pos_original.z {
            return Err(format!(
                "chunk claims position ({}, {}), expected ({}, {})",
                x_pos, z_pos, pos_original.x, pos_original.z
            ));
        }

        let mut sections = Vec::new();
        let mut air_ids = Vec::new();
        if let Ok(section_list) = nbt.get::<_, &NbtList>("sections") {
            for section_tag in section_list.iter() {
                if let NbtTag::Compound(section_nbt) = section_tag {
                    if let Some(section) = parse_section(section_nbt, registry, &mut air_ids)? {
                        sections.push(section);
                    }
                }
            }
        }
        sections.sort_by_key(|s| s.y);

        Ok(Chunk {
            pos,
            pos_original,
            rotation,
            crop: crop.cloned(),
            sections,
            air_ids,
        })
    }

    /// An empty chunk; every lookup is air. Used when a chunk fails to
    /// decode and the render must go on.
    pub fn empty(pos: ChunkPos, rotation: u8) -> Chunk {
        Chunk {
            pos,
            pos_original: pos.unrotated(rotation),
            rotation,
            crop: None,
            sections: Vec::new(),
            air_ids: Vec::new(),
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    pub fn is_air_id(&self, id: u16) -> bool {
        self.air_ids.contains(&id)
    }

    fn section(&self, section_y: i32) -> Option<&Section> {
        self.sections
            .binary_search_by_key(&section_y, |s| s.y)
            .ok()
            .map(|i| &self.sections[i])
    }

    /// The populated vertical extent, or `None` for an all-air chunk.
    pub fn y_bounds(&self) -> Option<(i32, i32)> {
        let first = self.sections.first()?;
        let last = self.sections.last()?;
        Some((first.y * 16, last.y * 16 + 15))
    }

    /// The block id at a rotated world position; `None` is air (also for
    /// cropped and out-of-chunk positions).
    pub fn get_block(&self, pos: &BlockPos) -> Option<u16> {
        let original = pos.rotated((4 - self.rotation % 4) % 4);
        if original.chunk() != self.pos_original {
            return None;
        }
        if let Some(crop) = &self.crop {
            if !crop.is_block_contained(&original) {
                return None;
            }
        }
        let section = self.section(floor_div(original.y, 16))?;
        let id = section.block_at(
            floor_mod(original.x, 16),
            floor_mod(original.y, 16),
            floor_mod(original.z, 16),
        );
        if self.is_air_id(id) {
            None
        } else {
            Some(id)
        }
    }

    /// Highest non-air block in the column of `pos` (x/z in rotated
    /// coordinates) at or below `max_y`.
    pub fn top_block(&self, x: i32, z: i32, max_y: i32) -> Option<(i32, u16)> {
        for section in self.sections.iter().rev() {
            let base = section.y * 16;
            if base > max_y {
                continue;
            }
            let top = (base + 15).min(max_y);
            for y in (base..=top).rev() {
                let pos = BlockPos::new(x, y, z);
                if let Some(id) = self.get_block(&pos) {
                    return Some((y, id));
                }
            }
        }
        None
    }

    /// Visits every non-air, non-cropped block as (rotated position, id).
    pub fn for_each_block(&self, mut f: impl FnMut(BlockPos, u16)) {
        let (ox, oz) = self.pos_original.block_origin();
        for section in &self.sections {
            for ly in 0..16 {
                for lz in 0..16 {
                    for lx in 0..16 {
                        let id = section.block_at(lx, ly, lz);
                        if self.is_air_id(id) {
                            continue;
                        }
                        let original =
                            BlockPos::new(ox + lx, section.y * 16 + ly, oz + lz);
                        if let Some(crop) = &self.crop {
                            if !crop.is_block_contained(&original) {
                                continue;
                            }
                        }
                        f(original.rotated(self.rotation), id);
                    }
                }
            }
        }
    }

    /// The biome name at a rotated world position, if the chunk carries
    /// biome data there.
    pub fn biome_at(&self, pos: &BlockPos) -> Option<&str> {
        let original = pos.rotated((4 - self.rotation % 4) % 4);
        let section = self.section(floor_div(original.y, 16))?;
        section
            .biome_at(
                floor_mod(original.x, 16),
                floor_mod(original.y, 16),
                floor_mod(original.z, 16),
            )
            .map(|s| s.as_str())
    }
}

fn parse_section(
    section_nbt: &NbtCompound,
    registry: &BlockStateRegistry,
    air_ids: &mut Vec<u16>,
) -> Result<Option<Section>, String> {
    let y = match section_nbt.get::<_, i8>("Y") {
        Ok(y) => y as i32,
        Err(_) => section_nbt.get::<_, i32>("Y").map_err(|e| e.to_string())?,
    };

    let block_states = match section_nbt.get::<_, &NbtCompound>("block_states") {
        Ok(bs) => bs,
        // no block_states: an all-air section, not worth storing
        Err(_) => return Ok(None),
    };

    let mut palette = Vec::new();
    if let Ok(palette_list) = block_states.get::<_, &NbtList>("palette") {
        for tag in palette_list.iter() {
            if let NbtTag::Compound(compound) = tag {
                palette.push(parse_palette_entry(compound)?);
            }
        }
    }
    if palette.is_empty() {
        return Ok(None);
    }

    let ids: Vec<u16> = palette
        .iter()
        .map(|state| {
            let id = registry.get_block_id(state);
            if is_air_name(state.get_name()) && !air_ids.contains(&id) {
                air_ids.push(id);
            }
            id
        })
        .collect();

    if ids.len() == 1 {
        // uniform section; skip it entirely when it is just air
        if is_air_name(palette[0].get_name()) {
            return Ok(None);
        }
        return Ok(Some(Section {
            y,
            blocks: Vec::new(),
            uniform: Some(ids[0]),
            biome_palette: parse_biome_palette(section_nbt),
            biome_data: parse_biome_data(section_nbt),
        }));
    }

    let packed = block_states.get::<_, &[i64]>("data").unwrap_or(&[]);
    let indices = unpack_packed_indices(packed, ids.len(), 4096, 4);
    let blocks = indices
        .into_iter()
        .map(|i| ids.get(i as usize).copied().unwrap_or(ids[0]))
        .collect();

    Ok(Some(Section {
        y,
        blocks,
        uniform: None,
        biome_palette: parse_biome_palette(section_nbt),
        biome_data: parse_biome_data(section_nbt),
    }))
}

fn parse_palette_entry(compound: &NbtCompound) -> Result<BlockState, String> {
    let name = compound
        .get::<_, &String>("Name")
        .map_err(|e| format!("palette entry without Name: {}", e))?;
    let mut state = BlockState::new(name.as_str());
    if let Ok(props) = compound.get::<_, &NbtCompound>("Properties") {
        for (key, value) in props.inner() {
            if let NbtTag::String(value_str) = value {
                state.set_property(key.as_str(), value_str.as_str());
            }
        }
    }
    Ok(state)
}

fn parse_biome_palette(section_nbt: &NbtCompound) -> Vec<SmolStr> {
    let mut palette = Vec::new();
    if let Ok(biomes) = section_nbt.get::<_, &NbtCompound>("biomes") {
        if let Ok(list) = biomes.get::<_, &NbtList>("palette") {
            for tag in list.iter() {
                if let NbtTag::String(name) = tag {
                    palette.push(SmolStr::new(name));
                }
            }
        }
    }
    palette
}

fn parse_biome_data(section_nbt: &NbtCompound) -> Vec<u16> {
    if let Ok(biomes) = section_nbt.get::<_, &NbtCompound>("biomes") {
        if let Ok(list) = biomes.get::<_, &NbtList>("palette") {
            if list.len() > 1 {
                if let Ok(packed) = biomes.get::<_, &[i64]>("data") {
                    return unpack_packed_indices(packed, list.len(), 64, 1);
                }
            }
        }
    }
    Vec::new()
}
