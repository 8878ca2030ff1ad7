use serde::{Deserialize, Serialize};
use std::fmt;

/// Floor division (rounds toward negative infinity).
pub fn floor_div(a: i32, b: i32) -> i32 {
    let d = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        d - 1
    } else {
        d
    }
}

/// Floor modulo; result has the sign of `b`.
pub fn floor_mod(a: i32, b: i32) -> i32 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

/// Rotates horizontal coordinates by `rotation` 90-degree steps. One step
/// maps (x, z) to (-z-1, x), which keeps block/chunk/region containment
/// intact (a chunk's 16 blocks land exactly in the rotated chunk).
pub fn rotate_xz(x: i32, z: i32, rotation: u8) -> (i32, i32) {
    let (mut x, mut z) = (x, z);
    for _ in 0..rotation % 4 {
        let nx = -z - 1;
        let nz = x;
        x = nx;
        z = nz;
    }
    (x, z)
}

/// Undoes [`rotate_xz`].
pub fn unrotate_xz(x: i32, z: i32, rotation: u8) -> (i32, i32) {
    rotate_xz(x, z, (4 - rotation % 4) % 4)
}

/// A block position in world coordinates; y is vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        BlockPos { x, y, z }
    }

    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::new(floor_div(self.x, 16), floor_div(self.z, 16))
    }

    pub fn rotated(&self, rotation: u8) -> BlockPos {
        let (x, z) = rotate_xz(self.x, self.z, rotation);
        BlockPos::new(x, self.y, z)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// A chunk position: 16x16 block columns.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        ChunkPos { x, z }
    }

    pub fn region(&self) -> RegionPos {
        RegionPos::new(floor_div(self.x, 32), floor_div(self.z, 32))
    }

    /// Local position inside the region, in [0, 32).
    pub fn local(&self) -> (i32, i32) {
        (floor_mod(self.x, 32), floor_mod(self.z, 32))
    }

    /// World coordinate of the chunk's lowest block corner.
    pub fn block_origin(&self) -> (i32, i32) {
        (self.x * 16, self.z * 16)
    }

    pub fn rotated(&self, rotation: u8) -> ChunkPos {
        let (x, z) = rotate_xz(self.x, self.z, rotation);
        ChunkPos::new(x, z)
    }

    pub fn unrotated(&self, rotation: u8) -> ChunkPos {
        let (x, z) = unrotate_xz(self.x, self.z, rotation);
        ChunkPos::new(x, z)
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// A region position: 32x32 chunks, one `r.x.z.mca` file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        RegionPos { x, z }
    }

    /// Parses a region filename of the form `r.<x>.<z>.mca`.
    pub fn from_filename(filename: &str) -> Option<RegionPos> {
        let mut parts = filename.split('.');
        if parts.next() != Some("r") {
            return None;
        }
        let x = parts.next()?.parse().ok()?;
        let z = parts.next()?.parse().ok()?;
        if parts.next() != Some("mca") || parts.next().is_some() {
            return None;
        }
        Some(RegionPos::new(x, z))
    }

    pub fn filename(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    pub fn rotated(&self, rotation: u8) -> RegionPos {
        let (x, z) = rotate_xz(self.x, self.z, rotation);
        RegionPos::new(x, z)
    }

    pub fn unrotated(&self, rotation: u8) -> RegionPos {
        let (x, z) = unrotate_xz(self.x, self.z, rotation);
        RegionPos::new(x, z)
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_div_mod() {
        assert_eq!(floor_div(-1, 16), -1);
        assert_eq!(floor_div(-16, 16), -1);
        assert_eq!(floor_div(15, 16), 0);
        assert_eq!(floor_mod(-1, 16), 15);
        assert_eq!(floor_mod(-16, 16), 0);
        assert_eq!(floor_mod(17, 16), 1);
    }

    #[test]
    fn test_rotation_round_trip() {
        for rotation in 0..4u8 {
            for &(x, z) in &[(0, 0), (5, -3), (-17, 40), (-1, -1)] {
                let (rx, rz) = rotate_xz(x, z, rotation);
                assert_eq!(unrotate_xz(rx, rz, rotation), (x, z));
            }
        }
    }

    #[test]
    fn test_four_rotations_are_identity() {
        assert_eq!(rotate_xz(7, -9, 4), (7, -9));
    }

    #[test]
    fn test_rotation_preserves_containment() {
        // every block of a chunk rotates into the rotated chunk
        let chunk = ChunkPos::new(2, -3);
        for rotation in 0..4u8 {
            let rotated_chunk = chunk.rotated(rotation);
            let (ox, oz) = chunk.block_origin();
            for dx in [0, 15] {
                for dz in [0, 15] {
                    let block = BlockPos::new(ox + dx, 64, oz + dz).rotated(rotation);
                    assert_eq!(block.chunk(), rotated_chunk);
                }
            }
        }
    }

    #[test]
    fn test_region_filename_round_trip() {
        let pos = RegionPos::new(-3, 12);
        assert_eq!(pos.filename(), "r.-3.12.mca");
        assert_eq!(RegionPos::from_filename("r.-3.12.mca"), Some(pos));
        assert_eq!(RegionPos::from_filename("r.a.b.mca"), None);
        assert_eq!(RegionPos::from_filename("level.dat"), None);
    }

    #[test]
    fn test_chunk_region_math() {
        assert_eq!(ChunkPos::new(-1, 31).region(), RegionPos::new(-1, 0));
        assert_eq!(ChunkPos::new(-1, 31).local(), (31, 31));
        assert_eq!(BlockPos::new(-1, 0, 16).chunk(), ChunkPos::new(-1, 1));
    }
}
