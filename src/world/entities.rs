//! Sign extraction and the per-world entities cache.
//!
//! Sign lines come in two shapes: legacy raw strings and the JSON text
//! component form (`"..."`, `{...}` or `null`). Malformed JSON is logged
//! and replaced by an empty line, never an error. Extracted signs are
//! kept in a gzipped JSON sidecar next to the region files so an
//! unchanged region is never re-scanned.

use super::pos::{BlockPos, ChunkPos, RegionPos};
use super::{World, WorldResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use quartz_nbt::io::Flavor;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

const CACHE_FILE_NAME: &str = "entities.cache.gz";

/// True when a sign line uses the JSON text component format
/// (Minecraft 1.8+).
fn is_json_line(line: &str) -> bool {
    if line.is_empty() {
        return false;
    }
    line == "null"
        || (line.starts_with('"') && line.ends_with('"'))
        || (line.starts_with('{') && line.ends_with('}'))
}

/// Concatenates the `text` of a JSON component and, recursively, its
/// `extra` children.
fn extract_text_from_json(value: &serde_json::Value) -> Result<String, String> {
    match value {
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Object(object) => {
            let text = object
                .get("text")
                .and_then(|t| t.as_str())
                .ok_or_else(|| "no string 'text' found".to_string())?;
            let mut result = text.to_string();
            if let Some(extra) = object.get("extra") {
                let array = extra
                    .as_array()
                    .ok_or_else(|| "'extra' must be an array".to_string())?;
                for item in array {
                    result.push_str(&extract_text_from_json(item)?);
                }
            }
            Ok(result)
        }
        _ => Err("unknown component type".to_string()),
    }
}

fn parse_json_line(line: &str) -> String {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            warn!("unable to parse sign line json '{}': {}", line, e);
            return String::new();
        }
    };
    match extract_text_from_json(&value) {
        Ok(text) => text,
        Err(e) => {
            warn!("invalid json sign line ({}): {}", e, line);
            String::new()
        }
    }
}

/// A sign with its four lines resolved to plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignEntity {
    pos: BlockPos,
    lines: [String; 4],
    text: String,
}

impl SignEntity {
    pub fn new(pos: BlockPos, mut lines: [String; 4]) -> Self {
        if lines.iter().all(|l| is_json_line(l)) {
            for line in &mut lines {
                *line = parse_json_line(line);
            }
        }
        let text = lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        SignEntity { pos, lines, text }
    }

    pub fn pos(&self) -> BlockPos {
        self.pos
    }

    pub fn lines(&self) -> &[String; 4] {
        &self.lines
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignRecord {
    x: i32,
    y: i32,
    z: i32,
    lines: [String; 4],
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheContents {
    // region -> chunk -> raw sign records, all in original coordinates
    #[serde(
        serialize_with = "serialize_regions",
        deserialize_with = "deserialize_regions"
    )]
    regions: BTreeMap<RegionPos, BTreeMap<ChunkPos, Vec<SignRecord>>>,
}

#[derive(Serialize, Deserialize)]
struct CachedRegion {
    x: i32,
    z: i32,
    chunks: Vec<CachedChunk>,
}

#[derive(Serialize, Deserialize)]
struct CachedChunk {
    x: i32,
    z: i32,
    signs: Vec<SignRecord>,
}

fn serialize_regions<S: serde::Serializer>(
    regions: &BTreeMap<RegionPos, BTreeMap<ChunkPos, Vec<SignRecord>>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let flat: Vec<CachedRegion> = regions
        .iter()
        .map(|(region, chunks)| CachedRegion {
            x: region.x,
            z: region.z,
            chunks: chunks
                .iter()
                .map(|(chunk, signs)| CachedChunk {
                    x: chunk.x,
                    z: chunk.z,
                    signs: signs.clone(),
                })
                .collect(),
        })
        .collect();
    flat.serialize(serializer)
}

fn deserialize_regions<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<RegionPos, BTreeMap<ChunkPos, Vec<SignRecord>>>, D::Error> {
    let flat: Vec<CachedRegion> = Vec::deserialize(deserializer)?;
    Ok(flat
        .into_iter()
        .map(|region| {
            (
                RegionPos::new(region.x, region.z),
                region
                    .chunks
                    .into_iter()
                    .map(|chunk| (ChunkPos::new(chunk.x, chunk.z), chunk.signs))
                    .collect(),
            )
        })
        .collect())
}

/// Extracted sign entities of one world, persisted between runs.
pub struct WorldEntitiesCache {
    world: World,
    cache_file: PathBuf,
    contents: CacheContents,
}

impl WorldEntitiesCache {
    pub fn new(world: World) -> Self {
        let cache_file = world.region_dir().join(CACHE_FILE_NAME);
        WorldEntitiesCache {
            world,
            cache_file,
            contents: CacheContents::default(),
        }
    }

    /// Loads the sidecar; returns its mtime in Unix seconds, 0 when it
    /// does not exist or cannot be read.
    fn read_cache_file(&mut self) -> u64 {
        let Ok(file) = File::open(&self.cache_file) else {
            debug!("entities cache {} does not exist", self.cache_file.display());
            return 0;
        };
        let mut json = String::new();
        if GzDecoder::new(&file).read_to_string(&mut json).is_err() {
            warn!("entities cache {} is unreadable", self.cache_file.display());
            return 0;
        }
        match serde_json::from_str(&json) {
            Ok(contents) => {
                self.contents = contents;
                file.metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0)
            }
            Err(e) => {
                warn!("entities cache {}: {}", self.cache_file.display(), e);
                0
            }
        }
    }

    fn write_cache_file(&self) -> WorldResult<()> {
        let json = serde_json::to_string(&self.contents).unwrap_or_default();
        let file = File::create(&self.cache_file)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(json.as_bytes())?;
        encoder.finish()?;
        Ok(())
    }

    /// Re-scans regions whose files changed since the cache was written;
    /// inside a changed region, only chunks with a newer timestamp are
    /// re-read.
    pub fn update(&mut self) -> WorldResult<()> {
        let cache_mtime = self.read_cache_file();

        for region_pos in self.world.available_regions() {
            let original = region_pos.unrotated(self.world.rotation());
            if self.world.region_mtime(&region_pos)? < cache_mtime {
                debug!("entities of region {} are cached", original);
                continue;
            }

            let mut region = self.world.region(&region_pos)?;
            region.read()?;

            for chunk_pos in region.containing_chunks() {
                if (region.get_chunk_timestamp(&chunk_pos) as u64) < cache_mtime {
                    continue;
                }
                let chunk_original = chunk_pos.unrotated(self.world.rotation());
                let signs = scan_chunk_signs(
                    region.get_chunk_data(&chunk_pos),
                    region.get_chunk_compression(&chunk_pos),
                );
                self.contents
                    .regions
                    .entry(original)
                    .or_default()
                    .insert(chunk_original, signs);
            }
        }

        self.write_cache_file()
    }

    /// All cached signs, crop-filtered, in original coordinates.
    pub fn signs(&self) -> Vec<SignEntity> {
        let crop = self.world.crop();
        let mut signs = Vec::new();
        for (region_pos, chunks) in &self.contents.regions {
            if !crop.is_region_contained(region_pos) {
                continue;
            }
            for (chunk_pos, records) in chunks {
                if !crop.is_chunk_contained(chunk_pos) {
                    continue;
                }
                for record in records {
                    let pos = BlockPos::new(record.x, record.y, record.z);
                    if !crop.is_block_contained(&pos) {
                        continue;
                    }
                    signs.push(SignEntity::new(pos, record.lines.clone()));
                }
            }
        }
        signs
    }
}

fn is_sign_id(id: &str) -> bool {
    id == "Sign" || id == "minecraft:sign" || id == "minecraft:hanging_sign"
}

/// Pulls sign records out of one chunk's raw payload. Decode failures are
/// warnings; a broken chunk just contributes no signs.
fn scan_chunk_signs(data: &[u8], compression: u8) -> Vec<SignRecord> {
    let Ok(compression) = super::region::CompressionType::from_byte(compression) else {
        return Vec::new();
    };
    let Ok(raw) = super::region::decompress_chunk(data, compression) else {
        return Vec::new();
    };
    let Ok((nbt, _)) = quartz_nbt::io::read_nbt(&mut Cursor::new(&raw), Flavor::Uncompressed)
    else {
        return Vec::new();
    };

    let entities = match nbt.get::<_, &NbtList>("block_entities") {
        Ok(list) => list,
        Err(_) => match nbt
            .get::<_, &NbtCompound>("Level")
            .and_then(|level| level.get::<_, &NbtList>("TileEntities"))
        {
            Ok(list) => list,
            Err(_) => return Vec::new(),
        },
    };

    let mut signs = Vec::new();
    for tag in entities.iter() {
        let NbtTag::Compound(entity) = tag else { continue };
        let Ok(id) = entity.get::<_, &str>("id") else { continue };
        if !is_sign_id(id) {
            continue;
        }
        let (Ok(x), Ok(y), Ok(z)) = (
            entity.get::<_, i32>("x"),
            entity.get::<_, i32>("y"),
            entity.get::<_, i32>("z"),
        ) else {
            continue;
        };
        signs.push(SignRecord {
            x,
            y,
            z,
            lines: sign_lines(entity),
        });
    }
    signs
}

/// Sign text lives in `front_text.messages` since 1.20, in Text1..Text4
/// before.
fn sign_lines(entity: &NbtCompound) -> [String; 4] {
    let mut lines: [String; 4] = Default::default();
    if let Ok(front) = entity.get::<_, &NbtCompound>("front_text") {
        if let Ok(messages) = front.get::<_, &NbtList>("messages") {
            for (i, tag) in messages.iter().take(4).enumerate() {
                if let NbtTag::String(s) = tag {
                    lines[i] = s.clone();
                }
            }
            return lines;
        }
    }
    for (i, key) in ["Text1", "Text2", "Text3", "Text4"].iter().enumerate() {
        if let Ok(text) = entity.get::<_, &str>(*key) {
            lines[i] = text.to_string();
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_line_detection() {
        assert!(is_json_line("null"));
        assert!(is_json_line("\"hello\""));
        assert!(is_json_line("{\"text\":\"hi\"}"));
        assert!(!is_json_line("plain text"));
        assert!(!is_json_line(""));
    }

    #[test]
    fn test_extract_text_recurses_extra() {
        let value: serde_json::Value = serde_json::from_str(
            r#"{"text":"Hello ","extra":[{"text":"big "},{"text":"world"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text_from_json(&value).unwrap(), "Hello big world");
    }

    #[test]
    fn test_sign_entity_joins_lines() {
        let sign = SignEntity::new(
            BlockPos::new(1, 64, 2),
            [
                "\"first\"".to_string(),
                "null".to_string(),
                "\"second\"".to_string(),
                "null".to_string(),
            ],
        );
        assert_eq!(sign.text(), "first second");
    }

    #[test]
    fn test_malformed_json_line_becomes_empty() {
        let sign = SignEntity::new(
            BlockPos::new(0, 0, 0),
            [
                "{\"no_text\":1}".to_string(),
                "{broken".to_string(),
                "null".to_string(),
                "null".to_string(),
            ],
        );
        // second line is not valid JSON, so the lines are legacy raw text
        assert_eq!(sign.lines()[1], "{broken");

        let json_sign = SignEntity::new(
            BlockPos::new(0, 0, 0),
            [
                "{\"no_text\":1}".to_string(),
                "null".to_string(),
                "null".to_string(),
                "null".to_string(),
            ],
        );
        assert_eq!(json_sign.lines()[0], "");
        assert_eq!(json_sign.text(), "");
    }
}
