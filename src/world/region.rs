//! Region files: the 8 KiB header (chunk locations + timestamps) and up
//! to 1024 independently compressed chunk payloads.
//!
//! Chunk indexing always uses the *original* on-disk coordinates
//! (`z*32 + x` of the unrotated local position); rotation only affects
//! the positions handed in and out.

use super::chunk::{Chunk, MIN_DATA_VERSION};
use super::crop::WorldCrop;
use super::pos::{ChunkPos, RegionPos};
use super::{WorldError, WorldResult};
use crate::block_state::BlockStateRegistry;
use flate2::read::{GzDecoder, ZlibDecoder};
use quartz_nbt::io::Flavor;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const SECTOR_SIZE: usize = 4096;
pub const CHUNKS_PER_REGION: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Gzip = 1,
    Zlib = 2,
    Uncompressed = 3,
}

impl CompressionType {
    pub fn from_byte(b: u8) -> WorldResult<Self> {
        match b {
            1 => Ok(CompressionType::Gzip),
            2 => Ok(CompressionType::Zlib),
            3 => Ok(CompressionType::Uncompressed),
            other => Err(WorldError::UnknownCompression(other)),
        }
    }
}

pub fn decompress_chunk(data: &[u8], compression: CompressionType) -> std::io::Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    match compression {
        CompressionType::Zlib => {
            ZlibDecoder::new(data).read_to_end(&mut decompressed)?;
        }
        CompressionType::Gzip => {
            GzDecoder::new(data).read_to_end(&mut decompressed)?;
        }
        CompressionType::Uncompressed => {
            decompressed = data.to_vec();
        }
    }
    Ok(decompressed)
}

/// Why a chunk could not be loaded. Not fatal for the region: the caller
/// decides per-chunk policy (log and render as air).
#[derive(Debug, thiserror::Error)]
pub enum ChunkLoadError {
    #[error("chunk does not exist")]
    DoesNotExist,
    #[error("chunk data is invalid: {0}")]
    DataInvalid(String),
    #[error("chunk NBT error: {0}")]
    Nbt(String),
}

/// One `r.x.z.mca` file. Headers and chunk payloads are read lazily;
/// [`RegionFile::write`] re-emits the container byte-compatibly (modulo
/// sector padding and chunk ordering, which follows the index).
pub struct RegionFile {
    path: PathBuf,
    pos: RegionPos,
    pos_original: RegionPos,
    rotation: u8,
    crop: Option<WorldCrop>,

    // indexed by z*32 + x of the original local chunk coordinates
    chunk_exists: Vec<bool>,
    chunk_offsets: Vec<u32>,
    chunk_timestamps: Vec<u32>,
    chunk_compression: Vec<u8>,
    chunk_data: Vec<Vec<u8>>,

    headers_read: bool,
}

impl RegionFile {
    pub fn new(path: impl Into<PathBuf>, pos: RegionPos) -> Self {
        RegionFile {
            path: path.into(),
            pos,
            pos_original: pos,
            rotation: 0,
            crop: None,
            chunk_exists: vec![false; CHUNKS_PER_REGION],
            chunk_offsets: vec![0; CHUNKS_PER_REGION],
            chunk_timestamps: vec![0; CHUNKS_PER_REGION],
            chunk_compression: vec![0; CHUNKS_PER_REGION],
            chunk_data: vec![Vec::new(); CHUNKS_PER_REGION],
            headers_read: false,
        }
    }

    /// Must be called before reading; all position queries afterwards use
    /// rotated coordinates while the file stays addressed by the original
    /// ones.
    pub fn set_rotation(&mut self, rotation: u8) {
        self.rotation = rotation;
        self.pos = self.pos_original.rotated(rotation);
    }

    pub fn set_world_crop(&mut self, crop: WorldCrop) {
        self.crop = Some(crop);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    /// Chunk index in the header tables for a (rotated) chunk position.
    fn chunk_index(&self, chunk: &ChunkPos) -> usize {
        let original = chunk.unrotated(self.rotation);
        let (x, z) = original.local();
        (z * 32 + x) as usize
    }

    /// Reads the two 4 KiB header tables. Fails with
    /// [`WorldError::CorruptHeader`] if the file is shorter than 8192
    /// bytes.
    pub fn read_headers(&mut self) -> WorldResult<()> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < (2 * SECTOR_SIZE) as u64 {
            return Err(WorldError::CorruptHeader(self.path.clone()));
        }

        let mut header = vec![0u8; 2 * SECTOR_SIZE];
        file.read_exact(&mut header)?;

        for i in 0..CHUNKS_PER_REGION {
            let off = i * 4;
            let offset = ((header[off] as u32) << 16)
                | ((header[off + 1] as u32) << 8)
                | header[off + 2] as u32;
            let ts_off = SECTOR_SIZE + i * 4;
            let timestamp = u32::from_be_bytes([
                header[ts_off],
                header[ts_off + 1],
                header[ts_off + 2],
                header[ts_off + 3],
            ]);
            self.chunk_offsets[i] = offset;
            self.chunk_exists[i] = offset != 0;
            self.chunk_timestamps[i] = timestamp;
        }
        self.headers_read = true;
        Ok(())
    }

    /// Reads headers plus every present chunk's raw payload and
    /// compression scheme.
    pub fn read(&mut self) -> WorldResult<()> {
        self.read_headers()?;
        let mut file = File::open(&self.path)?;
        for i in 0..CHUNKS_PER_REGION {
            if self.chunk_exists[i] {
                self.read_chunk_payload(&mut file, i)?;
            }
        }
        Ok(())
    }

    fn read_chunk_payload(&mut self, file: &mut File, index: usize) -> WorldResult<()> {
        let offset = self.chunk_offsets[index] as u64 * SECTOR_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        let mut prefix = [0u8; 5];
        file.read_exact(&mut prefix)?;
        let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if length == 0 {
            self.chunk_exists[index] = false;
            return Ok(());
        }
        self.chunk_compression[index] = prefix[4];
        let mut payload = vec![0u8; length - 1];
        file.read_exact(&mut payload)?;
        self.chunk_data[index] = payload;
        Ok(())
    }

    /// The set of contained chunks, in rotated coordinates, filtered by
    /// the crop.
    pub fn containing_chunks(&self) -> BTreeSet<ChunkPos> {
        let mut chunks = BTreeSet::new();
        for z in 0..32 {
            for x in 0..32 {
                let index = (z * 32 + x) as usize;
                if !self.chunk_exists[index] {
                    continue;
                }
                let original = ChunkPos::new(self.pos_original.x * 32 + x, self.pos_original.z * 32 + z);
                if let Some(crop) = &self.crop {
                    if !crop.is_chunk_contained(&original) {
                        continue;
                    }
                }
                chunks.insert(original.rotated(self.rotation));
            }
        }
        chunks
    }

    pub fn has_chunk(&self, chunk: &ChunkPos) -> bool {
        self.chunk_exists[self.chunk_index(chunk)]
    }

    pub fn get_chunk_timestamp(&self, chunk: &ChunkPos) -> u32 {
        self.chunk_timestamps[self.chunk_index(chunk)]
    }

    pub fn set_chunk_timestamp(&mut self, chunk: &ChunkPos, timestamp: u32) {
        let index = self.chunk_index(chunk);
        self.chunk_timestamps[index] = timestamp;
    }

    /// Raw compressed payload; empty if the chunk does not exist or has
    /// not been read.
    pub fn get_chunk_data(&self, chunk: &ChunkPos) -> &[u8] {
        &self.chunk_data[self.chunk_index(chunk)]
    }

    pub fn get_chunk_compression(&self, chunk: &ChunkPos) -> u8 {
        self.chunk_compression[self.chunk_index(chunk)]
    }

    /// Replaces a chunk's payload (empty data removes the chunk).
    pub fn set_chunk_data(&mut self, chunk: &ChunkPos, data: Vec<u8>, compression: u8) {
        let index = self.chunk_index(chunk);
        self.chunk_exists[index] = !data.is_empty();
        self.chunk_data[index] = data;
        self.chunk_compression[index] = compression;
    }

    /// Decompresses, decodes and validates one chunk. The returned chunk
    /// yields positions in rotated coordinates and skips cropped blocks.
    pub fn load_chunk(
        &mut self,
        pos: ChunkPos,
        registry: &BlockStateRegistry,
    ) -> Result<Chunk, ChunkLoadError> {
        let index = self.chunk_index(&pos);
        if !self.chunk_exists[index] {
            return Err(ChunkLoadError::DoesNotExist);
        }
        if self.chunk_data[index].is_empty() {
            let mut file = File::open(&self.path)
                .map_err(|e| ChunkLoadError::DataInvalid(e.to_string()))?;
            self.read_chunk_payload(&mut file, index)
                .map_err(|e| ChunkLoadError::DataInvalid(e.to_string()))?;
            if !self.chunk_exists[index] {
                return Err(ChunkLoadError::DoesNotExist);
            }
        }

        let compression = CompressionType::from_byte(self.chunk_compression[index])
            .map_err(|e| ChunkLoadError::DataInvalid(e.to_string()))?;
        let raw = decompress_chunk(&self.chunk_data[index], compression)
            .map_err(|e| ChunkLoadError::DataInvalid(e.to_string()))?;

        let (nbt, _) = quartz_nbt::io::read_nbt(&mut Cursor::new(&raw), Flavor::Uncompressed)
            .map_err(|e| ChunkLoadError::Nbt(e.to_string()))?;

        let data_version = nbt.get::<_, i32>("DataVersion").unwrap_or(0);
        if data_version < MIN_DATA_VERSION {
            return Err(ChunkLoadError::DataInvalid(format!(
                "unsupported DataVersion {}",
                data_version
            )));
        }

        Chunk::from_nbt(&nbt, pos, registry, self.rotation, self.crop.as_ref())
            .map_err(ChunkLoadError::Nbt)
    }

    /// Writes the region container. Chunks are laid out in index order
    /// from sector 2, each padded to the 4 KiB sector boundary.
    pub fn write(&self, path: Option<&Path>) -> WorldResult<()> {
        let path = path.unwrap_or(&self.path);
        let mut locations = vec![0u8; SECTOR_SIZE];
        let mut timestamps = vec![0u8; SECTOR_SIZE];
        let mut body: Vec<u8> = Vec::new();

        let mut sector = 2u32;
        for i in 0..CHUNKS_PER_REGION {
            let ts = self.chunk_timestamps[i].to_be_bytes();
            timestamps[i * 4..i * 4 + 4].copy_from_slice(&ts);

            if !self.chunk_exists[i] || self.chunk_data[i].is_empty() {
                continue;
            }
            let payload_len = self.chunk_data[i].len() + 5;
            let sectors = payload_len.div_ceil(SECTOR_SIZE) as u32;

            locations[i * 4] = ((sector >> 16) & 0xff) as u8;
            locations[i * 4 + 1] = ((sector >> 8) & 0xff) as u8;
            locations[i * 4 + 2] = (sector & 0xff) as u8;
            locations[i * 4 + 3] = sectors as u8;

            body.extend_from_slice(&((self.chunk_data[i].len() + 1) as u32).to_be_bytes());
            body.push(self.chunk_compression[i]);
            body.extend_from_slice(&self.chunk_data[i]);
            let padded = (sectors as usize) * SECTOR_SIZE;
            body.resize(body.len() + padded - payload_len, 0);

            sector += sectors;
        }

        let mut file = File::create(path)?;
        file.write_all(&locations)?;
        file.write_all(&timestamps)?;
        file.write_all(&body)?;
        file.sync_all()?;
        Ok(())
    }
}
