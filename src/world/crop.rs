use super::pos::{BlockPos, ChunkPos, RegionPos};

/// Optional spatial filter on world coordinates: either an axis-aligned
/// box (any subset of the x/z bounds may be set) or a circle around a
/// center column. Y bounds apply to both shapes.
#[derive(Debug, Clone, Default)]
pub struct WorldCrop {
    pub min_x: Option<i32>,
    pub max_x: Option<i32>,
    pub min_z: Option<i32>,
    pub max_z: Option<i32>,
    pub min_y: Option<i32>,
    pub max_y: Option<i32>,
    pub(crate) circle: Option<Circle>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Circle {
    center_x: i32,
    center_z: i32,
    radius: i32,
}

impl WorldCrop {
    pub fn rectangular() -> Self {
        WorldCrop::default()
    }

    pub fn circular(center_x: i32, center_z: i32, radius: i32) -> Self {
        WorldCrop {
            circle: Some(Circle {
                center_x,
                center_z,
                radius,
            }),
            ..WorldCrop::default()
        }
    }

    pub fn is_circular(&self) -> bool {
        self.circle.is_some()
    }

    /// True when both x bounds and both z bounds are set (or the crop is
    /// circular, which bounds both axes by construction).
    pub fn has_complete_xz_bounds(&self) -> bool {
        self.is_circular()
            || (self.min_x.is_some()
                && self.max_x.is_some()
                && self.min_z.is_some()
                && self.max_z.is_some())
    }

    pub fn is_block_contained_y(&self, pos: &BlockPos) -> bool {
        self.min_y.map_or(true, |min| pos.y >= min) && self.max_y.map_or(true, |max| pos.y <= max)
    }

    pub fn is_block_contained_xz(&self, pos: &BlockPos) -> bool {
        if let Some(circle) = self.circle {
            let dx = (pos.x - circle.center_x) as i64;
            let dz = (pos.z - circle.center_z) as i64;
            return dx * dx + dz * dz <= (circle.radius as i64) * (circle.radius as i64);
        }
        self.min_x.map_or(true, |min| pos.x >= min)
            && self.max_x.map_or(true, |max| pos.x <= max)
            && self.min_z.map_or(true, |min| pos.z >= min)
            && self.max_z.map_or(true, |max| pos.z <= max)
    }

    pub fn is_block_contained(&self, pos: &BlockPos) -> bool {
        self.is_block_contained_xz(pos) && self.is_block_contained_y(pos)
    }

    /// Conservative: true when the chunk's footprint can intersect the
    /// crop. Never false for a chunk holding a contained block.
    pub fn is_chunk_contained(&self, chunk: &ChunkPos) -> bool {
        let (x0, z0) = chunk.block_origin();
        self.is_area_contained(x0, z0, x0 + 15, z0 + 15)
    }

    /// Conservative, like [`WorldCrop::is_chunk_contained`].
    pub fn is_region_contained(&self, region: &RegionPos) -> bool {
        let x0 = region.x * 512;
        let z0 = region.z * 512;
        self.is_area_contained(x0, z0, x0 + 511, z0 + 511)
    }

    fn is_area_contained(&self, min_x: i32, min_z: i32, max_x: i32, max_z: i32) -> bool {
        if let Some(circle) = self.circle {
            // distance from the center to the box, zero when inside
            let dx = (circle.center_x - max_x).max(min_x - circle.center_x).max(0) as i64;
            let dz = (circle.center_z - max_z).max(min_z - circle.center_z).max(0) as i64;
            return dx * dx + dz * dz <= (circle.radius as i64) * (circle.radius as i64);
        }
        self.min_x.map_or(true, |min| max_x >= min)
            && self.max_x.map_or(true, |max| min_x <= max)
            && self.min_z.map_or(true, |min| max_z >= min)
            && self.max_z.map_or(true, |max| min_z <= max)
    }
}
