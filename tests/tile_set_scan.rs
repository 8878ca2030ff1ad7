//! Tile-set scanning: determinism, depth, centering, required policies.

mod common;

use common::{write_world, ChunkFixture};
use std::collections::BTreeMap;
use tilecraft::render::{RenderViewType, TilePos, TileSet};
use tilecraft::world::{ChunkPos, Dimension, World, WorldCrop};

fn scan_world(dir: &std::path::Path, view: RenderViewType, center: bool) -> (TileSet, TilePos) {
    let mut world = World::open(dir, Dimension::Overworld);
    world.load().unwrap();
    let mut tile_set = view.create_tile_set(1, Dimension::Overworld);
    let offset = tile_set.scan(&world, center).unwrap();
    (tile_set, offset)
}

fn snapshot(tile_set: &TileSet) -> BTreeMap<TilePos, Vec<ChunkPos>> {
    tile_set
        .render_tiles()
        .map(|tile| (*tile, tile_set.tile_chunks(tile).copied().collect()))
        .collect()
}

#[test]
fn scan_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_world(
        dir.path(),
        &[
            (
                ChunkPos::new(0, 0),
                ChunkFixture::new(10).fill_layer(64, "minecraft:stone"),
            ),
            (
                ChunkPos::new(3, -2),
                ChunkFixture::new(20).fill_layer(64, "minecraft:stone"),
            ),
            (
                ChunkPos::new(-7, 5),
                ChunkFixture::new(30).fill_layer(64, "minecraft:stone"),
            ),
        ],
    );

    for view in [
        RenderViewType::TopDown,
        RenderViewType::Isometric,
        RenderViewType::Side,
    ] {
        let (first, _) = scan_world(dir.path(), view, false);
        let (second, _) = scan_world(dir.path(), view, false);
        assert_eq!(first.depth(), second.depth(), "view {}", view);
        assert_eq!(snapshot(&first), snapshot(&second), "view {}", view);
    }
}

#[test]
fn topdown_depth_grows_with_extent() {
    let dir = tempfile::tempdir().unwrap();
    write_world(
        dir.path(),
        &[(
            ChunkPos::new(0, 0),
            ChunkFixture::new(1).fill_layer(64, "minecraft:stone"),
        )],
    );
    let (tile_set, _) = scan_world(dir.path(), RenderViewType::TopDown, false);
    assert_eq!(tile_set.depth(), 0);
    assert_eq!(tile_set.render_tile_count(), 1);

    let dir = tempfile::tempdir().unwrap();
    write_world(
        dir.path(),
        &[
            (
                ChunkPos::new(0, 0),
                ChunkFixture::new(1).fill_layer(64, "minecraft:stone"),
            ),
            (
                ChunkPos::new(2, 0),
                ChunkFixture::new(1).fill_layer(64, "minecraft:stone"),
            ),
        ],
    );
    let (tile_set, _) = scan_world(dir.path(), RenderViewType::TopDown, false);
    assert!(tile_set.depth() >= 1);
    assert_eq!(tile_set.render_tile_count(), 2);
    assert!(tile_set.contains_tile(&TilePos::new(0, 0)));
    assert!(tile_set.contains_tile(&TilePos::new(2, 0)));
}

#[test]
fn forced_depth_is_kept_but_never_shrinks() {
    let dir = tempfile::tempdir().unwrap();
    write_world(
        dir.path(),
        &[(
            ChunkPos::new(0, 0),
            ChunkFixture::new(1).fill_layer(64, "minecraft:stone"),
        )],
    );
    let (mut tile_set, _) = scan_world(dir.path(), RenderViewType::TopDown, false);
    tile_set.set_depth(3);
    assert_eq!(tile_set.depth(), 3);
    tile_set.set_depth(0);
    assert_eq!(tile_set.depth(), 3);
}

#[test]
fn centering_symmetrizes_cropped_world() {
    let dir = tempfile::tempdir().unwrap();
    // chunks clustered far from the origin
    write_world(
        dir.path(),
        &[
            (
                ChunkPos::new(10, 10),
                ChunkFixture::new(1).fill_layer(64, "minecraft:stone"),
            ),
            (
                ChunkPos::new(12, 11),
                ChunkFixture::new(1).fill_layer(64, "minecraft:stone"),
            ),
        ],
    );

    let mut world = World::open(dir.path(), Dimension::Overworld);
    world.set_world_crop(WorldCrop::circular(176, 176, 200));
    world.load().unwrap();
    let mut tile_set = RenderViewType::TopDown.create_tile_set(1, Dimension::Overworld);
    let offset = tile_set.scan(&world, true).unwrap();

    assert_ne!(offset, TilePos::new(0, 0));
    let min_x = tile_set.render_tiles().map(|t| t.x).min().unwrap();
    let max_x = tile_set.render_tiles().map(|t| t.x).max().unwrap();
    assert!(min_x <= 0 && max_x >= 0);
    // uncentered scan would put everything at x >= 10
    assert!(max_x < 10);
}

#[test]
fn required_by_timestamp_includes_ancestors() {
    let dir = tempfile::tempdir().unwrap();
    write_world(
        dir.path(),
        &[
            (
                ChunkPos::new(0, 0),
                ChunkFixture::new(100).fill_layer(64, "minecraft:stone"),
            ),
            (
                ChunkPos::new(2, 0),
                ChunkFixture::new(500).fill_layer(64, "minecraft:stone"),
            ),
        ],
    );
    let (mut tile_set, _) = scan_world(dir.path(), RenderViewType::TopDown, false);

    tile_set.scan_required_by_timestamp(300);
    assert_eq!(tile_set.required_render_tile_count(), 1);
    assert!(tile_set.is_tile_required(&TilePos::new(2, 0)));
    assert!(!tile_set.is_tile_required(&TilePos::new(0, 0)));
    // every ancestor of the required leaf is a required composite
    assert!(tile_set.required_composite_tiles().count() >= tile_set.depth());

    tile_set.scan_required_by_timestamp(0);
    assert_eq!(tile_set.required_render_tile_count(), 2);

    tile_set.reset_required();
    assert_eq!(tile_set.required_render_tile_count(), 2);
}

#[test]
fn required_by_filetimes_wants_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    write_world(
        dir.path(),
        &[(
            ChunkPos::new(0, 0),
            ChunkFixture::new(100).fill_layer(64, "minecraft:stone"),
        )],
    );
    let (mut tile_set, _) = scan_world(dir.path(), RenderViewType::TopDown, false);

    let out = tempfile::tempdir().unwrap();
    tile_set.scan_required_by_filetimes(out.path(), "png");
    assert_eq!(tile_set.required_render_tile_count(), 1);
}
