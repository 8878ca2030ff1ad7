//! tilecraft renders Minecraft worlds into a quadtree pyramid of map
//! tiles for a web viewer.
//!
//! The pipeline: the [`world`] module decodes region files into chunks
//! and block states, [`render::TileSet`] maps chunks onto the tile grid
//! and plans which tiles need re-rendering, [`render::TileRenderer`]
//! rasterizes one tile at a time from catalog sprites
//! ([`render::BlockImages`]), and the dispatcher composes rendered
//! leaves upward into the pyramid across worker threads.
//! [`render::RenderManager`] ties it all together for a configured set
//! of maps.
//!
//! ```no_run
//! use tilecraft::render::{MapConfig, RenderConfig, RenderManager, WorldConfig};
//!
//! let mut config = RenderConfig::new("/srv/map");
//! config.worlds.insert(
//!     "survival".to_string(),
//!     WorldConfig::new("/home/mc/saves/survival"),
//! );
//! config.maps.push(MapConfig::new("survival_iso", "survival", "/srv/textures"));
//!
//! let mut manager = RenderManager::new(config);
//! manager.run(8)?;
//! # Ok::<(), tilecraft::render::manager::RenderError>(())
//! ```

pub mod block_state;
pub mod image;
pub mod metadata;
pub mod render;
pub mod world;

pub use block_state::{BlockState, BlockStateRegistry};
pub use image::RGBAImage;
pub use metadata::MetadataStore;
pub use render::{
    BlockImages, RenderManager, RenderViewType, TilePath, TilePos, TileRenderer, TileSet,
};
pub use world::{BlockPos, ChunkPos, Dimension, RegionPos, World, WorldCache, WorldCrop};
