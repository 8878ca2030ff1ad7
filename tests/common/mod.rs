//! Builds small on-disk worlds and texture directories for the
//! integration tests.

#![allow(dead_code)]

use flate2::write::ZlibEncoder;
use flate2::Compression;
use quartz_nbt::io::Flavor;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use tilecraft::image::{rgba, RGBAImage};
use tilecraft::world::{ChunkPos, RegionFile, RegionPos};

/// One chunk's content: block name per local (x, y, z).
#[derive(Default, Clone)]
pub struct ChunkFixture {
    pub blocks: Vec<(i32, i32, i32, &'static str)>,
    pub timestamp: u32,
}

impl ChunkFixture {
    pub fn new(timestamp: u32) -> Self {
        ChunkFixture {
            blocks: Vec::new(),
            timestamp,
        }
    }

    pub fn fill_layer(mut self, y: i32, name: &'static str) -> Self {
        for z in 0..16 {
            for x in 0..16 {
                self.blocks.push((x, y, z, name));
            }
        }
        self
    }

    pub fn fill_box(
        mut self,
        (x0, y0, z0): (i32, i32, i32),
        (x1, y1, z1): (i32, i32, i32),
        name: &'static str,
    ) -> Self {
        for y in y0..=y1 {
            for z in z0..=z1 {
                for x in x0..=x1 {
                    self.blocks.push((x, y, z, name));
                }
            }
        }
        self
    }

    pub fn set(mut self, x: i32, y: i32, z: i32, name: &'static str) -> Self {
        self.blocks.push((x, y, z, name));
        self
    }
}

fn pack_indices(indices: &[u16], palette_len: usize) -> Vec<i64> {
    let bits = (usize::BITS - (palette_len.max(2) - 1).leading_zeros()).max(4);
    let entries_per_long = 64 / bits;
    let mut packed = Vec::new();
    for chunk in indices.chunks(entries_per_long as usize) {
        let mut long = 0u64;
        for (j, &index) in chunk.iter().enumerate() {
            long |= (index as u64) << (j as u32 * bits);
        }
        packed.push(long as i64);
    }
    packed
}

/// Builds the NBT tree of one chunk in the 1.18+ layout.
pub fn chunk_nbt(pos: ChunkPos, fixture: &ChunkFixture) -> NbtCompound {
    // group blocks into 16-tall sections
    let mut sections: BTreeMap<i32, Vec<(i32, i32, i32, &'static str)>> = BTreeMap::new();
    for &(x, y, z, name) in &fixture.blocks {
        sections
            .entry(y.div_euclid(16))
            .or_default()
            .push((x, y.rem_euclid(16), z, name));
    }

    let mut section_list = Vec::new();
    for (section_y, blocks) in sections {
        let mut palette_names = vec!["minecraft:air"];
        let mut palette_index: HashMap<&str, u16> = HashMap::from([("minecraft:air", 0)]);
        let mut indices = vec![0u16; 4096];
        for (x, ly, z, name) in blocks {
            let index = *palette_index.entry(name).or_insert_with(|| {
                palette_names.push(name);
                (palette_names.len() - 1) as u16
            });
            indices[((ly * 16 + z) * 16 + x) as usize] = index;
        }

        let mut palette = Vec::new();
        for name in &palette_names {
            let mut entry = NbtCompound::new();
            entry.insert("Name", name.to_string());
            palette.push(NbtTag::Compound(entry));
        }

        let mut block_states = NbtCompound::new();
        block_states.insert("palette", NbtTag::List(NbtList::from(palette)));
        block_states.insert(
            "data",
            NbtTag::LongArray(pack_indices(&indices, palette_names.len())),
        );

        let mut biomes = NbtCompound::new();
        biomes.insert(
            "palette",
            NbtTag::List(NbtList::from(vec![NbtTag::String(
                "minecraft:plains".to_string(),
            )])),
        );

        let mut section = NbtCompound::new();
        section.insert("Y", section_y as i8);
        section.insert("block_states", block_states);
        section.insert("biomes", biomes);
        section_list.push(NbtTag::Compound(section));
    }

    let mut nbt = NbtCompound::new();
    nbt.insert("DataVersion", 3700i32);
    nbt.insert("xPos", pos.x);
    nbt.insert("zPos", pos.z);
    nbt.insert("yPos", -4i32);
    nbt.insert("Status", "minecraft:full".to_string());
    nbt.insert("sections", NbtTag::List(NbtList::from(section_list)));
    nbt
}

pub fn compress_nbt(nbt: &NbtCompound) -> Vec<u8> {
    let mut raw = Vec::new();
    quartz_nbt::io::write_nbt(&mut raw, None, nbt, Flavor::Uncompressed).unwrap();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).unwrap();
    encoder.finish().unwrap()
}

/// Writes a world directory with the given chunks grouped into region
/// files. Returns the region directory.
pub fn write_world(world_dir: &Path, chunks: &[(ChunkPos, ChunkFixture)]) {
    let region_dir = world_dir.join("region");
    std::fs::create_dir_all(&region_dir).unwrap();

    let mut regions: BTreeMap<RegionPos, Vec<&(ChunkPos, ChunkFixture)>> = BTreeMap::new();
    for entry in chunks {
        regions.entry(entry.0.region()).or_default().push(entry);
    }

    for (region_pos, entries) in regions {
        let path = region_dir.join(region_pos.filename());
        let mut region = RegionFile::new(&path, region_pos);
        for (chunk_pos, fixture) in entries {
            let payload = compress_nbt(&chunk_nbt(*chunk_pos, fixture));
            region.set_chunk_data(chunk_pos, payload, 2);
            region.set_chunk_timestamp(chunk_pos, fixture.timestamp);
        }
        region.write(None).unwrap();
    }
}

/// Writes a texture directory with uniform-colored 16x16 block textures.
pub fn write_textures(dir: &Path, textures: &[(&str, (u8, u8, u8))]) {
    std::fs::create_dir_all(dir).unwrap();
    for (name, (r, g, b)) in textures {
        let mut image = RGBAImage::new(16, 16);
        image.fill(rgba(*r, *g, *b, 255), 0, 0, 16, 16);
        tilecraft::image::codec::write_png(&image, &dir.join(format!("{}.png", name))).unwrap();
    }
}
