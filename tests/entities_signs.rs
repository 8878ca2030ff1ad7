//! Sign extraction and the entities sidecar cache.

mod common;

use common::{compress_nbt, ChunkFixture};
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use tilecraft::world::entities::WorldEntitiesCache;
use tilecraft::world::{ChunkPos, Dimension, RegionFile, RegionPos, World};

/// A chunk NBT with one sign block entity attached.
fn chunk_with_sign(pos: ChunkPos, sign_pos: (i32, i32, i32), lines: [&str; 4]) -> NbtCompound {
    let mut nbt = common::chunk_nbt(
        pos,
        &ChunkFixture::new(5000).set(0, 64, 0, "minecraft:stone"),
    );

    let mut sign = NbtCompound::new();
    sign.insert("id", "minecraft:sign".to_string());
    sign.insert("x", sign_pos.0);
    sign.insert("y", sign_pos.1);
    sign.insert("z", sign_pos.2);
    for (i, line) in lines.iter().enumerate() {
        sign.insert(format!("Text{}", i + 1), line.to_string());
    }
    nbt.insert(
        "block_entities",
        NbtTag::List(NbtList::from(vec![NbtTag::Compound(sign)])),
    );
    nbt
}

fn write_sign_world(world_dir: &std::path::Path) {
    let region_dir = world_dir.join("region");
    std::fs::create_dir_all(&region_dir).unwrap();
    let chunk_pos = ChunkPos::new(0, 0);
    let nbt = chunk_with_sign(
        chunk_pos,
        (3, 64, 7),
        [
            r#"{"text":"Welcome ","extra":[{"text":"home"}]}"#,
            r#""second""#,
            "null",
            "null",
        ],
    );
    let path = region_dir.join("r.0.0.mca");
    let mut region = RegionFile::new(&path, RegionPos::new(0, 0));
    region.set_chunk_data(&chunk_pos, compress_nbt(&nbt), 2);
    region.set_chunk_timestamp(&chunk_pos, 5000);
    region.write(None).unwrap();
}

#[test]
fn signs_are_extracted_and_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let world_dir = tmp.path().join("world");
    write_sign_world(&world_dir);

    let mut world = World::open(&world_dir, Dimension::Overworld);
    world.load().unwrap();

    let mut cache = WorldEntitiesCache::new(world.clone());
    cache.update().unwrap();

    let signs = cache.signs();
    assert_eq!(signs.len(), 1);
    assert_eq!(signs[0].pos().x, 3);
    assert_eq!(signs[0].text(), "Welcome home second");

    // the sidecar exists and a fresh cache reads it without re-scanning
    assert!(world_dir.join("region").join("entities.cache.gz").is_file());
    let mut reloaded = WorldEntitiesCache::new(world);
    reloaded.update().unwrap();
    assert_eq!(reloaded.signs().len(), 1);
}

#[test]
fn legacy_lines_pass_through_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let world_dir = tmp.path().join("world");
    let region_dir = world_dir.join("region");
    std::fs::create_dir_all(&region_dir).unwrap();

    let chunk_pos = ChunkPos::new(0, 0);
    let nbt = chunk_with_sign(chunk_pos, (1, 70, 1), ["plain", "old", "sign", ""]);
    let path = region_dir.join("r.0.0.mca");
    let mut region = RegionFile::new(&path, RegionPos::new(0, 0));
    region.set_chunk_data(&chunk_pos, compress_nbt(&nbt), 2);
    region.set_chunk_timestamp(&chunk_pos, 5000);
    region.write(None).unwrap();

    let mut world = World::open(&world_dir, Dimension::Overworld);
    world.load().unwrap();
    let mut cache = WorldEntitiesCache::new(world);
    cache.update().unwrap();

    let signs = cache.signs();
    assert_eq!(signs.len(), 1);
    assert_eq!(signs[0].text(), "plain old sign");
}
