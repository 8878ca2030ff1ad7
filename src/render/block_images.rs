//! Pre-rendered block sprites for one view and rotation.
//!
//! The catalog is built once per map from a directory of block textures
//! and is immutable afterwards; workers share it read-only. Isometric
//! sprites keep their three faces separately so the renderer can ask for
//! any culled combination.

use super::RenderViewType;
use crate::image::codec::{self, CodecError};
use crate::image::{rgba, rgba_alpha, rgba_multiply, RGBAImage};
use crate::block_state::BlockState;
use rayon::prelude::*;
use smol_str::SmolStr;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Face bits for isometric sprite variants.
pub const FACE_TOP: u8 = 1;
pub const FACE_LEFT: u8 = 2;
pub const FACE_RIGHT: u8 = 4;
pub const FACE_ALL: u8 = FACE_TOP | FACE_LEFT | FACE_RIGHT;

const SHADE_TOP: f64 = 1.0;
const SHADE_LEFT: f64 = 0.75;
const SHADE_RIGHT: f64 = 0.85;

const WATER_TINT: (u8, u8, u8) = (49, 103, 189);

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("texture codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("texture size {0} is not an even number")]
    OddTextureSize(i32),
    #[error("no usable textures in {0}")]
    NoTextures(PathBuf),
}

pub type TextureResult<T> = Result<T, TextureError>;

/// Block textures loaded from a directory of PNG files, all resized to
/// one edge size S and optionally blurred.
pub struct TextureResources {
    textures: HashMap<SmolStr, RGBAImage>,
    texture_size: i32,
    water_opacity: f64,
}

impl TextureResources {
    /// Loads every `<name>.png` under `dir` at edge size `texture_size`.
    /// `blur` > 0 applies a Gaussian blur whose radius scales with the
    /// texture size.
    pub fn load(
        dir: &Path,
        texture_size: i32,
        blur: f64,
        water_opacity: f64,
    ) -> TextureResult<Self> {
        if texture_size % 2 != 0 {
            return Err(TextureError::OddTextureSize(texture_size));
        }

        let mut textures = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let image = codec::read_image(&path)?;
            let mut image = image.resize_auto(texture_size, texture_size);
            if blur > 0.0 {
                image = gaussian_blur(&image, blur * texture_size as f64 / 16.0);
            }
            textures.insert(SmolStr::new(stem), image);
        }

        if textures.is_empty() {
            return Err(TextureError::NoTextures(dir.to_path_buf()));
        }
        Ok(TextureResources {
            textures,
            texture_size,
            water_opacity,
        })
    }

    /// A resource set without any files, for tests and for worlds whose
    /// maps only need the built-in water/marker sprites.
    pub fn empty(texture_size: i32) -> TextureResult<Self> {
        if texture_size % 2 != 0 {
            return Err(TextureError::OddTextureSize(texture_size));
        }
        Ok(TextureResources {
            textures: HashMap::new(),
            texture_size,
            water_opacity: 1.0,
        })
    }

    /// Registers a texture directly; tests use this instead of files.
    pub fn insert(&mut self, name: &str, image: RGBAImage) {
        let image = image.resize_auto(self.texture_size, self.texture_size);
        self.textures.insert(SmolStr::new(name), image);
    }

    pub fn get(&self, name: &str) -> Option<&RGBAImage> {
        self.textures.get(name)
    }

    pub fn texture_size(&self) -> i32 {
        self.texture_size
    }

    pub fn water_opacity(&self) -> f64 {
        self.water_opacity
    }
}

/// Separable Gaussian blur; sigma in pixels.
fn gaussian_blur(image: &RGBAImage, sigma: f64) -> RGBAImage {
    let radius = (sigma * 2.0).ceil().max(1.0) as i32;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut sum = 0.0;
    for i in -radius..=radius {
        let w = (-((i * i) as f64) / (2.0 * sigma * sigma)).exp();
        kernel.push(w);
        sum += w;
    }
    for w in &mut kernel {
        *w /= sum;
    }

    let pass = |src: &RGBAImage, horizontal: bool| -> RGBAImage {
        let mut out = RGBAImage::new(src.width(), src.height());
        for y in 0..src.height() {
            for x in 0..src.width() {
                let (mut r, mut g, mut b, mut a) = (0.0, 0.0, 0.0, 0.0);
                for (k, w) in kernel.iter().enumerate() {
                    let o = k as i32 - radius;
                    let p = if horizontal {
                        src.get_pixel((x + o).clamp(0, src.width() - 1), y)
                    } else {
                        src.get_pixel(x, (y + o).clamp(0, src.height() - 1))
                    };
                    r += crate::image::rgba_red(p) as f64 * w;
                    g += crate::image::rgba_green(p) as f64 * w;
                    b += crate::image::rgba_blue(p) as f64 * w;
                    a += rgba_alpha(p) as f64 * w;
                }
                out.set_pixel(x, y, rgba(r as u8, g as u8, b as u8, a as u8));
            }
        }
        out
    };
    pass(&pass(image, true), false)
}

/// What biome colorizing applies to a block, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiomeTint {
    Grass,
    Foliage,
    Water,
}

/// Per-biome color multipliers (0..=255 per channel).
fn biome_colors(biome: &str) -> ((u8, u8, u8), (u8, u8, u8), (u8, u8, u8)) {
    // (grass, foliage, water)
    match biome.strip_prefix("minecraft:").unwrap_or(biome) {
        "desert" | "savanna" | "badlands" => ((191, 183, 85), (174, 164, 42), (63, 118, 228)),
        "jungle" | "jungle_hills" => ((89, 201, 60), (48, 187, 11), (63, 118, 228)),
        "swamp" | "mangrove_swamp" => ((106, 112, 57), (106, 112, 57), (97, 123, 100)),
        "taiga" | "snowy_taiga" => ((134, 183, 131), (104, 164, 100), (63, 118, 228)),
        "snowy_plains" | "ice_spikes" | "frozen_river" => {
            ((128, 180, 151), (96, 161, 123), (57, 56, 201))
        }
        "forest" | "flower_forest" => ((121, 192, 90), (89, 174, 48), (63, 118, 228)),
        "dark_forest" => ((80, 122, 50), (64, 110, 40), (63, 118, 228)),
        "ocean" | "deep_ocean" | "river" => ((142, 185, 113), (113, 167, 77), (63, 118, 228)),
        "warm_ocean" => ((142, 185, 113), (113, 167, 77), (67, 213, 238)),
        "cold_ocean" | "frozen_ocean" => ((142, 185, 113), (113, 167, 77), (61, 87, 214)),
        // plains and everything unknown
        _ => ((145, 189, 89), (119, 171, 47), (63, 118, 228)),
    }
}

/// Which blocks get biome colorizing. Their catalog sprites stay
/// uncolorized; the renderer multiplies at draw time.
pub fn biome_tint_of(name: &str) -> Option<BiomeTint> {
    let short = name.strip_prefix("minecraft:").unwrap_or(name);
    match short {
        "grass_block" | "short_grass" | "tall_grass" | "fern" | "large_fern" | "vine"
        | "sugar_cane" => Some(BiomeTint::Grass),
        "water" | "bubble_column" => Some(BiomeTint::Water),
        _ if short.ends_with("_leaves") => Some(BiomeTint::Foliage),
        _ => None,
    }
}

/// The biome multiplier for a tinted block, as 0..1 factors.
pub fn biome_tint_color(tint: BiomeTint, biome: &str) -> (f64, f64, f64) {
    let (grass, foliage, water) = biome_colors(biome);
    let (r, g, b) = match tint {
        BiomeTint::Grass => grass,
        BiomeTint::Foliage => foliage,
        BiomeTint::Water => water,
    };
    (r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0)
}

fn is_transparent_name(name: &str) -> bool {
    let short = name.strip_prefix("minecraft:").unwrap_or(name);
    short == "water"
        || short == "ice"
        || short == "frosted_ice"
        || short == "slime_block"
        || short == "honey_block"
        || short == "bubble_column"
        || short.contains("glass")
        || short.ends_with("_leaves")
}

/// Which textures make up a block's faces.
fn face_textures(name: &str) -> (SmolStr, SmolStr) {
    // (top, side)
    match name {
        "grass_block" => ("grass_block_top".into(), "grass_block_side".into()),
        "sandstone" => ("sandstone_top".into(), "sandstone".into()),
        "bookshelf" | "crafting_table" | "jukebox" => {
            (SmolStr::new(format!("{}_top", name)), SmolStr::new(name))
        }
        "tnt" => ("tnt_top".into(), "tnt_side".into()),
        _ if name.ends_with("_log") || name.ends_with("_stem") => {
            (SmolStr::new(format!("{}_top", name)), SmolStr::new(name))
        }
        _ => (SmolStr::new(name), SmolStr::new(name)),
    }
}

struct BlockSprite {
    /// For the isometric view: 8 composed variants indexed by face mask.
    /// For the flat views only `variants[0]` is set.
    variants: Vec<RGBAImage>,
    transparent: bool,
    tint: Option<BiomeTint>,
}

/// The catalog: block name -> sprite for the configured view+rotation.
pub struct BlockImages {
    view: RenderViewType,
    rotation: u8,
    texture_size: i32,
    sprites: HashMap<SmolStr, BlockSprite>,
    marker: RGBAImage,
}

impl BlockImages {
    pub fn new(view: RenderViewType, rotation: u8) -> Self {
        BlockImages {
            view,
            rotation,
            texture_size: 0,
            sprites: HashMap::new(),
            marker: RGBAImage::default(),
        }
    }

    pub fn view(&self) -> RenderViewType {
        self.view
    }

    pub fn rotation(&self) -> u8 {
        self.rotation
    }

    pub fn texture_size(&self) -> i32 {
        self.texture_size
    }

    /// Sprite dimensions for this view.
    pub fn sprite_size(&self) -> (i32, i32) {
        let s = self.texture_size;
        match self.view {
            RenderViewType::Isometric => (2 * s, s + s / 2),
            RenderViewType::TopDown | RenderViewType::Side => (s, s),
        }
    }

    /// Builds all sprites from the texture set. Call once; the catalog is
    /// read-only afterwards.
    pub fn generate_blocks(&mut self, resources: &TextureResources) {
        self.texture_size = resources.texture_size();
        self.marker = self.build_marker();

        let mut names: Vec<&SmolStr> = resources.textures.keys().collect();
        names.sort();
        let blocks: Vec<SmolStr> = names
            .iter()
            .filter(|n| {
                !(n.ends_with("_top") || n.ends_with("_side") || n.ends_with("_bottom"))
            })
            .map(|n| SmolStr::new(format!("minecraft:{}", n)))
            .chain(std::iter::once(SmolStr::new("minecraft:water")))
            .collect();

        let built: Vec<(SmolStr, BlockSprite)> = blocks
            .par_iter()
            .map(|name| (name.clone(), self.build_block(name, resources)))
            .collect();
        self.sprites = built.into_iter().collect();
    }

    fn build_block(&self, name: &str, resources: &TextureResources) -> BlockSprite {
        let s = self.texture_size;
        let short = name.strip_prefix("minecraft:").unwrap_or(name);

        let (top, side) = if short == "water" {
            let mut tex = RGBAImage::new(s, s);
            let (r, g, b) = WATER_TINT;
            let alpha = (255.0 * resources.water_opacity()) as u8;
            tex.fill(rgba(r, g, b, alpha), 0, 0, s, s);
            (tex.clone(), tex)
        } else {
            let (top_name, side_name) = face_textures(short);
            let top = resources
                .get(&top_name)
                .cloned()
                .unwrap_or_else(|| self.magenta_texture());
            let side = resources
                .get(&side_name)
                .cloned()
                .unwrap_or_else(|| self.magenta_texture());
            (top, side)
        };

        // view rotation turns the top face with it
        let top = top.rotate(self.rotation as u32);

        let transparent = is_transparent_name(name)
            || top.pixels().iter().any(|p| rgba_alpha(*p) != 255);

        let variants = match self.view {
            RenderViewType::Isometric => {
                let top_face = project_top_face(&top, s);
                let left_face = project_left_face(&side, s);
                let right_face = project_right_face(&side, s);
                (0..8u8)
                    .map(|mask| {
                        let mut sprite = RGBAImage::new(2 * s, s + s / 2);
                        if mask & FACE_LEFT != 0 {
                            sprite.alpha_blit(&left_face, 0, 0);
                        }
                        if mask & FACE_RIGHT != 0 {
                            sprite.alpha_blit(&right_face, 0, 0);
                        }
                        if mask & FACE_TOP != 0 {
                            sprite.alpha_blit(&top_face, 0, 0);
                        }
                        sprite
                    })
                    .collect()
            }
            RenderViewType::TopDown => vec![top],
            RenderViewType::Side => vec![side],
        };

        BlockSprite {
            variants,
            transparent,
            tint: biome_tint_of(name),
        }
    }

    fn magenta_texture(&self) -> RGBAImage {
        let s = self.texture_size;
        let mut tex = RGBAImage::new(s, s);
        tex.fill(rgba(255, 0, 255, 255), 0, 0, s, s);
        tex
    }

    fn build_marker(&self) -> RGBAImage {
        let (w, h) = match self.view {
            RenderViewType::Isometric => (2 * self.texture_size, self.texture_size * 3 / 2),
            _ => (self.texture_size, self.texture_size),
        };
        let mut marker = RGBAImage::new(w, h);
        marker.fill(rgba(255, 0, 255, 255), 0, 0, w, h);
        marker
    }

    /// The sprite for a block state with the given visible-face mask
    /// (ignored outside the isometric view). `None` means the catalog has
    /// no sprite for this block.
    pub fn sprite(&self, state: &BlockState, face_mask: u8) -> Option<&RGBAImage> {
        let sprite = self.sprites.get(&state.name)?;
        match self.view {
            RenderViewType::Isometric => sprite.variants.get((face_mask & FACE_ALL) as usize),
            _ => sprite.variants.first(),
        }
    }

    /// The magenta substitute drawn for blocks without a sprite.
    pub fn marker(&self) -> &RGBAImage {
        &self.marker
    }

    pub fn is_transparent(&self, state: &BlockState) -> bool {
        self.sprites
            .get(&state.name)
            .map(|s| s.transparent)
            // unknown blocks render as the opaque marker
            .unwrap_or(false)
    }

    pub fn tint_of(&self, state: &BlockState) -> Option<BiomeTint> {
        self.sprites.get(&state.name).and_then(|s| s.tint)
    }
}

/// Maps an SxS texture onto the 2SxS top diamond (shade 1.0).
fn project_top_face(texture: &RGBAImage, s: i32) -> RGBAImage {
    let mut face = RGBAImage::new(2 * s, s + s / 2);
    for tz in 0..s {
        for tx in 0..s {
            let pixel = rgba_multiply(texture.get_pixel(tx, tz), SHADE_TOP, SHADE_TOP, SHADE_TOP, 1.0);
            let px = tx + tz;
            let py = (s - 1 + tx - tz) / 2;
            face.set_pixel(px, py, pixel);
            face.set_pixel(px + 1, py, pixel);
        }
    }
    face
}

/// The left face: columns 0..S below the diamond's lower-left edge
/// (shade 0.75).
fn project_left_face(texture: &RGBAImage, s: i32) -> RGBAImage {
    let mut face = RGBAImage::new(2 * s, s + s / 2);
    for ty in 0..s {
        for tx in 0..s {
            let pixel = rgba_multiply(
                texture.get_pixel(tx, ty),
                SHADE_LEFT,
                SHADE_LEFT,
                SHADE_LEFT,
                1.0,
            );
            let px = tx;
            let py = (s + tx + ty) / 2;
            face.set_pixel(px, py, pixel);
        }
    }
    face
}

/// The right face: columns S..2S below the diamond's lower-right edge
/// (shade 0.85).
fn project_right_face(texture: &RGBAImage, s: i32) -> RGBAImage {
    let mut face = RGBAImage::new(2 * s, s + s / 2);
    for ty in 0..s {
        for tx in 0..s {
            let pixel = rgba_multiply(
                texture.get_pixel(tx, ty),
                SHADE_RIGHT,
                SHADE_RIGHT,
                SHADE_RIGHT,
                1.0,
            );
            let px = s + tx;
            let py = (2 * s - tx + ty) / 2;
            face.set_pixel(px, py, pixel);
        }
    }
    face
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_texture(s: i32, color: u32) -> RGBAImage {
        let mut tex = RGBAImage::new(s, s);
        tex.fill(color, 0, 0, s, s);
        tex
    }

    fn catalog_with_stone(view: RenderViewType) -> BlockImages {
        let mut resources = TextureResources::empty(16).unwrap();
        resources.insert("stone", solid_texture(16, rgba(128, 128, 128, 255)));
        let mut images = BlockImages::new(view, 0);
        images.generate_blocks(&resources);
        images
    }

    #[test]
    fn test_topdown_sprite_is_texture_sized() {
        let images = catalog_with_stone(RenderViewType::TopDown);
        let stone = BlockState::new("minecraft:stone");
        let sprite = images.sprite(&stone, 0).unwrap();
        assert_eq!((sprite.width(), sprite.height()), (16, 16));
        assert_eq!(sprite.get_pixel(8, 8), rgba(128, 128, 128, 255));
        assert!(!images.is_transparent(&stone));
    }

    #[test]
    fn test_isometric_sprite_dimensions_and_shading() {
        let images = catalog_with_stone(RenderViewType::Isometric);
        let stone = BlockState::new("minecraft:stone");
        let sprite = images.sprite(&stone, FACE_ALL).unwrap();
        assert_eq!((sprite.width(), sprite.height()), (32, 24));

        // top face pixel keeps full brightness
        assert_eq!(rgba_alpha(sprite.get_pixel(16, 4)), 255);
        assert_eq!(crate::image::rgba_red(sprite.get_pixel(16, 4)), 128);
        // left face is shaded 0.75
        assert_eq!(crate::image::rgba_red(sprite.get_pixel(4, 16)), 96);
        // right face is shaded 0.85
        assert_eq!(crate::image::rgba_red(sprite.get_pixel(28, 16)), 108);
    }

    #[test]
    fn test_face_mask_zero_is_empty() {
        let images = catalog_with_stone(RenderViewType::Isometric);
        let stone = BlockState::new("minecraft:stone");
        let sprite = images.sprite(&stone, 0).unwrap();
        assert!(sprite.pixels().iter().all(|p| rgba_alpha(*p) == 0));
    }

    #[test]
    fn test_unknown_block_has_no_sprite() {
        let images = catalog_with_stone(RenderViewType::TopDown);
        let odd = BlockState::new("minecraft:end_portal_frame");
        assert!(images.sprite(&odd, 0).is_none());
        assert_eq!(images.marker().get_pixel(0, 0), rgba(255, 0, 255, 255));
    }

    #[test]
    fn test_water_is_transparent_and_tinted() {
        let images = catalog_with_stone(RenderViewType::TopDown);
        let water = BlockState::new("minecraft:water");
        assert!(images.sprite(&water, 0).is_some());
        assert!(images.is_transparent(&water));
        assert_eq!(images.tint_of(&water), Some(BiomeTint::Water));
    }

    #[test]
    fn test_biome_tint_table() {
        assert_eq!(
            biome_tint_of("minecraft:grass_block"),
            Some(BiomeTint::Grass)
        );
        assert_eq!(
            biome_tint_of("minecraft:oak_leaves"),
            Some(BiomeTint::Foliage)
        );
        assert_eq!(biome_tint_of("minecraft:stone"), None);

        let (r, g, b) = biome_tint_color(BiomeTint::Grass, "minecraft:plains");
        assert!(r < g && b < g);
    }
}
