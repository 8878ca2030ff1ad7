//! End-to-end renders over small synthetic worlds.

mod common;

use common::{write_textures, write_world, ChunkFixture};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tilecraft::image::codec::read_image;
use tilecraft::image::{rgba, rgba_alpha, RGBAImage};
use tilecraft::render::{
    MapConfig, RenderConfig, RenderManager, RenderViewType, WorldConfig,
};
use tilecraft::world::ChunkPos;

const STONE_GRAY: (u8, u8, u8) = (128, 128, 128);
const DIRT_BROWN: (u8, u8, u8) = (134, 96, 67);

struct Fixture {
    _tmp: tempfile::TempDir,
    world_dir: PathBuf,
    texture_dir: PathBuf,
    output_dir: PathBuf,
}

impl Fixture {
    fn new(chunks: &[(ChunkPos, ChunkFixture)]) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let world_dir = tmp.path().join("world");
        let texture_dir = tmp.path().join("textures");
        let output_dir = tmp.path().join("output");
        std::fs::create_dir_all(world_dir.join("region")).unwrap();
        write_world(&world_dir, chunks);
        write_textures(
            &texture_dir,
            &[
                ("stone", STONE_GRAY),
                ("dirt", DIRT_BROWN),
                ("bedrock", (40, 40, 40)),
            ],
        );
        Fixture {
            _tmp: tmp,
            world_dir,
            texture_dir,
            output_dir,
        }
    }

    fn config(&self, view: RenderViewType, rotations: &[u8]) -> RenderConfig {
        let mut config = RenderConfig::new(&self.output_dir);
        config
            .worlds
            .insert("world".to_string(), WorldConfig::new(&self.world_dir));
        let mut map = MapConfig::new("map", "world", &self.texture_dir);
        map.view = view;
        map.rotations = BTreeSet::from_iter(rotations.iter().copied());
        config.maps.push(map);
        config
    }

    fn rewrite_world(&self, chunks: &[(ChunkPos, ChunkFixture)]) {
        write_world(&self.world_dir, chunks);
    }

    fn tile(&self, rotation: &str, name: &str) -> PathBuf {
        self.output_dir.join("map").join(rotation).join(name)
    }
}

fn run(config: RenderConfig, threads: usize) {
    let mut manager = RenderManager::new(config);
    manager.run(threads).expect("render should succeed");
}

fn count_pngs(dir: &Path) -> usize {
    if !dir.is_dir() {
        return 0;
    }
    let mut count = 0;
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            count += count_pngs(&path);
        } else if path.extension().and_then(|e| e.to_str()) == Some("png") {
            count += 1;
        }
    }
    count
}

fn mtime(path: &Path) -> std::time::SystemTime {
    std::fs::metadata(path).unwrap().modified().unwrap()
}

// E1: a world without regions renders nothing and succeeds.
#[test]
fn empty_world_renders_nothing() {
    let fixture = Fixture::new(&[]);
    run(fixture.config(RenderViewType::TopDown, &[0]), 1);
    assert_eq!(count_pngs(&fixture.output_dir), 0);
    // the metadata file still exists
    assert!(fixture.output_dir.join("config.js").is_file());
}

// E2: one stone chunk at the origin becomes a single gray base tile at
// depth 0.
#[test]
fn single_chunk_renders_base_tile() {
    let fixture = Fixture::new(&[(
        ChunkPos::new(0, 0),
        ChunkFixture::new(1000).fill_box((0, 0, 0), (15, 63, 15), "minecraft:stone"),
    )]);
    run(fixture.config(RenderViewType::TopDown, &[0]), 1);

    let base = read_image(&fixture.tile("tl", "base.png")).unwrap();
    assert_eq!((base.width(), base.height()), (256, 256));
    let gray = rgba(STONE_GRAY.0, STONE_GRAY.1, STONE_GRAY.2, 255);
    assert!(base.pixels().iter().all(|&p| p == gray));
    // depth 0: the base is the only tile
    assert_eq!(count_pngs(&fixture.output_dir), 1);
}

// E3 and the quadtree composition property: the base equals the
// half-resolution composition of its children.
#[test]
fn two_chunks_compose_upward() {
    let fixture = Fixture::new(&[
        (
            ChunkPos::new(0, 0),
            ChunkFixture::new(1000).fill_layer(64, "minecraft:stone"),
        ),
        (
            ChunkPos::new(2, 0),
            ChunkFixture::new(1000).fill_layer(64, "minecraft:dirt"),
        ),
    ]);
    run(fixture.config(RenderViewType::TopDown, &[0]), 1);

    let base = read_image(&fixture.tile("tl", "base.png")).unwrap();
    assert_eq!((base.width(), base.height()), (256, 256));

    // recompute the base from the depth-1 children
    let mut expected = RGBAImage::new(256, 256);
    for (q, (x, y)) in [(1, (0, 0)), (2, (128, 0)), (3, (0, 128)), (4, (128, 128))] {
        let path = fixture.tile("tl", &format!("{}.png", q));
        if let Ok(child) = read_image(&path) {
            expected.simple_blit(&child.resize_half(), x, y);
        }
    }
    assert_eq!(base, expected);

    // both leaves exist at full depth
    let leaves = [fixture.tile("tl", "4/1/1.png"), fixture.tile("tl", "4/2/1.png")];
    for leaf in &leaves {
        assert!(leaf.is_file(), "missing {}", leaf.display());
    }
}

// E4 + the incremental property: an unchanged world re-renders nothing;
// a touched chunk re-renders exactly its tiles and their ancestors.
#[test]
fn auto_rerenders_only_changed_tiles() {
    let chunks = |far_ts: u32| {
        vec![
            (
                ChunkPos::new(0, 0),
                ChunkFixture::new(1000).fill_layer(64, "minecraft:stone"),
            ),
            (
                ChunkPos::new(2, 0),
                ChunkFixture::new(far_ts).fill_layer(64, "minecraft:dirt"),
            ),
        ]
    };
    let fixture = Fixture::new(&chunks(1000));
    let config = fixture.config(RenderViewType::TopDown, &[0]);
    run(config.clone(), 1);

    let near_leaf = fixture.tile("tl", "4/1/1.png");
    let far_leaf = fixture.tile("tl", "4/2/1.png");
    let base = fixture.tile("tl", "base.png");
    let near_before = mtime(&near_leaf);
    let far_before = mtime(&far_leaf);
    let base_before = mtime(&base);

    std::thread::sleep(std::time::Duration::from_millis(1100));

    // unchanged world: nothing is re-rendered
    run(config.clone(), 1);
    assert_eq!(mtime(&near_leaf), near_before);
    assert_eq!(mtime(&far_leaf), far_before);
    assert_eq!(mtime(&base), base_before);

    // touch the far chunk (timestamp in the future of the last render)
    fixture.rewrite_world(&chunks(u32::MAX / 2));
    run(config, 1);
    assert_eq!(mtime(&near_leaf), near_before, "untouched leaf re-rendered");
    assert!(mtime(&far_leaf) > far_before, "touched leaf not re-rendered");
    assert!(mtime(&base) > base_before, "ancestors not recomposed");
}

// E5: rotation 1 output is the rotation 0 output turned by one 90-degree
// step (top-down view).
#[test]
fn rotated_world_renders_rotated_tiles() {
    let fixture = Fixture::new(&[(
        ChunkPos::new(0, 0),
        ChunkFixture::new(1000)
            .fill_layer(64, "minecraft:stone")
            .set(2, 65, 0, "minecraft:dirt")
            .set(5, 65, 11, "minecraft:dirt"),
    )]);
    run(fixture.config(RenderViewType::TopDown, &[0, 1]), 1);

    // both rotations share depth 1: rotation 0 fills quadrant 4,
    // rotation 1 quadrant 3
    let tl = read_image(&fixture.tile("tl", "4.png")).unwrap();
    let tr = read_image(&fixture.tile("tr", "3.png")).unwrap();
    assert_eq!(tr, tl.rotate(1));
}

// E6: a depth increase moves the old tree one level down and keeps the
// old base image as a deeper leaf.
#[test]
fn depth_increase_preserves_old_tiles() {
    let near = (
        ChunkPos::new(0, 0),
        ChunkFixture::new(1000).fill_layer(64, "minecraft:stone"),
    );
    let fixture = Fixture::new(&[near.clone()]);
    let config = fixture.config(RenderViewType::TopDown, &[0]);
    run(config.clone(), 1);

    let old_base = std::fs::read(fixture.tile("tl", "base.png")).unwrap();

    // a distant chunk forces a deeper quadtree
    fixture.rewrite_world(&[
        near,
        (
            ChunkPos::new(2, 0),
            ChunkFixture::new(u32::MAX / 2).fill_layer(64, "minecraft:dirt"),
        ),
    ]);
    run(config, 1);

    // the old base is now the leaf of tile (0, 0) at the new depth
    let moved = std::fs::read(fixture.tile("tl", "4/1/1.png")).unwrap();
    assert_eq!(moved, old_base);
    assert!(fixture.tile("tl", "4/2/1.png").is_file());
    assert!(fixture.tile("tl", "base.png").is_file());
}

// Concurrency property: single- and multi-threaded renders are
// byte-identical.
#[test]
fn parallel_render_matches_single_threaded() {
    let chunks: Vec<(ChunkPos, ChunkFixture)> = (0..4)
        .flat_map(|cx| {
            (0..3).map(move |cz| {
                (
                    ChunkPos::new(cx, cz),
                    ChunkFixture::new(1000)
                        .fill_layer(60 + cx, "minecraft:stone")
                        .set(
                            (cx * 3) % 16,
                            61 + cx,
                            (cz * 5) % 16,
                            "minecraft:dirt",
                        ),
                )
            })
        })
        .collect();

    let single = Fixture::new(&chunks);
    run(single.config(RenderViewType::TopDown, &[0]), 1);
    let parallel = Fixture::new(&chunks);
    run(parallel.config(RenderViewType::TopDown, &[0]), 8);

    fn collect_pngs(dir: &Path, base: &Path, out: &mut Vec<PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                collect_pngs(&path, base, out);
            } else if path.extension().and_then(|e| e.to_str()) == Some("png") {
                out.push(path.strip_prefix(base).unwrap().to_path_buf());
            }
        }
    }

    let mut first = Vec::new();
    collect_pngs(&single.output_dir, &single.output_dir, &mut first);
    let mut second = Vec::new();
    collect_pngs(&parallel.output_dir, &parallel.output_dir, &mut second);
    first.sort();
    second.sort();
    assert_eq!(first, second);
    assert!(!first.is_empty());

    for rel in &first {
        let a = std::fs::read(single.output_dir.join(rel)).unwrap();
        let b = std::fs::read(parallel.output_dir.join(rel)).unwrap();
        assert_eq!(a, b, "tile {} differs", rel.display());
    }
}

// The isometric pipeline produces a populated pyramid.
#[test]
fn isometric_render_produces_tiles() {
    let fixture = Fixture::new(&[(
        ChunkPos::new(0, 0),
        ChunkFixture::new(1000)
            .fill_layer(64, "minecraft:stone")
            .fill_box((4, 65, 4), (11, 66, 11), "minecraft:dirt"),
    )]);
    run(fixture.config(RenderViewType::Isometric, &[0]), 2);

    let base = read_image(&fixture.tile("tl", "base.png")).unwrap();
    assert!(base.pixels().iter().any(|&p| rgba_alpha(p) != 0));
    assert!(count_pngs(&fixture.output_dir) > 1);
}
