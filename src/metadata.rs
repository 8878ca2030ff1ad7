//! The persisted map parameters: `config.js`, JSON wrapped in a `var`
//! statement so the web viewer can include it as a script.

use crate::image::codec::ImageFormatKind;
use crate::render::tile_set::TilePos;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const CONFIG_PREFIX: &str = "var CONFIG = ";
const CONFIG_SUFFIX: &str = ";";

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config.js is malformed: {0}")]
    Malformed(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Persisted parameters of one map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapMetadata {
    #[serde(default)]
    pub max_zoom: usize,
    /// tile pixel dimensions (width, height)
    #[serde(default)]
    pub tile_size: (i32, i32),
    /// tile image format, stored as its file suffix
    #[serde(
        default,
        serialize_with = "serialize_format",
        deserialize_with = "deserialize_format"
    )]
    pub format: ImageFormatKind,
    /// last-render Unix timestamp per rotation (tl, tr, br, bl)
    #[serde(default)]
    pub last_rendered: [u64; 4],
    /// tile offset per rotation, for centered (cropped) worlds
    #[serde(default)]
    pub tile_offsets: [TilePos; 4],
}

fn serialize_format<S: serde::Serializer>(
    format: &ImageFormatKind,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(format.suffix())
}

fn deserialize_format<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<ImageFormatKind, D::Error> {
    let suffix = String::deserialize(deserializer)?;
    ImageFormatKind::from_suffix(&suffix).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WebConfig {
    #[serde(default)]
    maps: BTreeMap<String, MapMetadata>,
}

/// Reads and writes `config.js` in the output directory. Writes are
/// atomic (tmp + rename).
pub struct MetadataStore {
    path: PathBuf,
    config: WebConfig,
}

impl MetadataStore {
    pub fn open(output_dir: &Path) -> Self {
        MetadataStore {
            path: output_dir.join("config.js"),
            config: WebConfig::default(),
        }
    }

    /// Loads the file; a missing file is a fresh render, not an error.
    pub fn read(&mut self) -> MetadataResult<()> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.config = WebConfig::default();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let trimmed = text.trim();
        let json = trimmed
            .strip_prefix(CONFIG_PREFIX)
            .and_then(|rest| rest.strip_suffix(CONFIG_SUFFIX))
            .ok_or_else(|| {
                MetadataError::Malformed("missing 'var CONFIG = ...;' wrapper".to_string())
            })?;
        self.config = serde_json::from_str(json)?;
        Ok(())
    }

    pub fn write(&self) -> MetadataResult<()> {
        let json = serde_json::to_string_pretty(&self.config)?;
        let tmp = self.path.with_extension("js.tmp");
        std::fs::write(&tmp, format!("{}{}{}\n", CONFIG_PREFIX, json, CONFIG_SUFFIX))?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn map(&self, name: &str) -> Option<&MapMetadata> {
        self.config.maps.get(name)
    }

    fn map_mut(&mut self, name: &str) -> &mut MapMetadata {
        self.config.maps.entry(name.to_string()).or_default()
    }

    pub fn max_zoom(&self, map: &str) -> usize {
        self.map(map).map(|m| m.max_zoom).unwrap_or(0)
    }

    pub fn set_max_zoom(&mut self, map: &str, max_zoom: usize) {
        self.map_mut(map).max_zoom = max_zoom;
    }

    pub fn tile_size(&self, map: &str) -> (i32, i32) {
        self.map(map).map(|m| m.tile_size).unwrap_or((0, 0))
    }

    pub fn set_tile_size(&mut self, map: &str, tile_size: (i32, i32)) {
        self.map_mut(map).tile_size = tile_size;
    }

    pub fn format(&self, map: &str) -> ImageFormatKind {
        self.map(map).map(|m| m.format).unwrap_or_default()
    }

    pub fn set_format(&mut self, map: &str, format: ImageFormatKind) {
        self.map_mut(map).format = format;
    }

    pub fn last_rendered(&self, map: &str, rotation: u8) -> u64 {
        self.map(map)
            .map(|m| m.last_rendered[rotation as usize % 4])
            .unwrap_or(0)
    }

    pub fn set_last_rendered(&mut self, map: &str, rotation: u8, timestamp: u64) {
        self.map_mut(map).last_rendered[rotation as usize % 4] = timestamp;
    }

    pub fn tile_offset(&self, map: &str, rotation: u8) -> TilePos {
        self.map(map)
            .map(|m| m.tile_offsets[rotation as usize % 4])
            .unwrap_or_default()
    }

    pub fn set_tile_offset(&mut self, map: &str, rotation: u8, offset: TilePos) {
        self.map_mut(map).tile_offsets[rotation as usize % 4] = offset;
    }
}
