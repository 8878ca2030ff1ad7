//! The rendering pipeline: block-image catalog, tile index, rasterizer,
//! dispatcher, and the manager that drives a whole render.

pub mod block_images;
pub mod dispatcher;
pub mod manager;
pub mod tile_renderer;
pub mod tile_set;

pub use block_images::{BlockImages, TextureError, TextureResources};
pub use dispatcher::{
    dispatch, dispatch_auto, DispatchResult, NoProgress, ProgressHandler, RenderContext,
};
pub use manager::{MapConfig, RenderBehavior, RenderBehaviors, RenderConfig, RenderManager, WorldConfig};
pub use tile_renderer::TileRenderer;
pub use tile_set::{TilePath, TilePos, TileSet};

use crate::world::Dimension;
use std::fmt;
use std::sync::Arc;

/// How the map is projected. Carries the per-view capability set: it
/// creates the tile set, the block-image catalog and the tile renderer
/// for that projection, and applies per-map renderer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderViewType {
    Isometric,
    TopDown,
    Side,
}

impl fmt::Display for RenderViewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderViewType::Isometric => write!(f, "isometric"),
            RenderViewType::TopDown => write!(f, "topdown"),
            RenderViewType::Side => write!(f, "side"),
        }
    }
}

impl RenderViewType {
    pub fn parse(name: &str) -> Option<RenderViewType> {
        match name {
            "isometric" => Some(RenderViewType::Isometric),
            "topdown" => Some(RenderViewType::TopDown),
            "side" => Some(RenderViewType::Side),
            _ => None,
        }
    }

    /// A tile set for this view over the dimension's build height.
    pub fn create_tile_set(&self, tile_width: i32, dimension: Dimension) -> TileSet {
        let (min_y, max_y) = dimension.y_range();
        TileSet::new(*self, tile_width, min_y, max_y)
    }

    /// An empty catalog for this view and rotation; call
    /// [`BlockImages::generate_blocks`] before rendering.
    pub fn create_block_images(&self, rotation: u8) -> BlockImages {
        BlockImages::new(*self, rotation)
    }

    pub fn create_tile_renderer(
        &self,
        images: Arc<BlockImages>,
        tile_set: &TileSet,
    ) -> TileRenderer {
        TileRenderer::new(images, tile_set)
    }

    /// Applies the per-map renderer settings.
    pub fn configure_tile_renderer(&self, renderer: &mut TileRenderer, map: &MapConfig) {
        renderer.set_render_biomes(map.render_biomes);
        renderer.set_use_preblit_water(map.use_preblit_water);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for view in [
            RenderViewType::Isometric,
            RenderViewType::TopDown,
            RenderViewType::Side,
        ] {
            assert_eq!(RenderViewType::parse(&view.to_string()), Some(view));
        }
        assert_eq!(RenderViewType::parse("cinematic"), None);
    }
}
