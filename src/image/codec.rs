//! PNG/JPEG adapter. The rest of the crate only ever sees [`RGBAImage`];
//! conversion to the codec crate's buffers happens here and nowhere else.

use super::{blend, rgba, rgba_alpha, rgba_blue, rgba_green, rgba_red, RGBAImage, RGBAPixel};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// The two tile output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageFormatKind {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormatKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            ImageFormatKind::Png => "png",
            ImageFormatKind::Jpeg => "jpg",
        }
    }

    pub fn from_suffix(suffix: &str) -> CodecResult<Self> {
        match suffix {
            "png" => Ok(ImageFormatKind::Png),
            "jpg" | "jpeg" => Ok(ImageFormatKind::Jpeg),
            other => Err(CodecError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Decodes a PNG or JPEG file into an [`RGBAImage`].
pub fn read_image(path: &Path) -> CodecResult<RGBAImage> {
    let decoded = ImageReader::open(path)?.decode()?.to_rgba8();
    let (width, height) = decoded.dimensions();
    let mut data = Vec::with_capacity((width * height) as usize);
    for pixel in decoded.pixels() {
        let [r, g, b, a] = pixel.0;
        data.push(rgba(r, g, b, a));
    }
    Ok(RGBAImage::from_pixels(width as i32, height as i32, data))
}

/// Encodes as PNG (RGBA8). The file is flushed and synced before the call
/// returns, so a following rename publishes a complete image.
pub fn write_png(image: &RGBAImage, path: &Path) -> CodecResult<()> {
    let mut bytes = Vec::with_capacity(image.pixels().len() * 4);
    for &pixel in image.pixels() {
        bytes.extend_from_slice(&[
            rgba_red(pixel),
            rgba_green(pixel),
            rgba_blue(pixel),
            rgba_alpha(pixel),
        ]);
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    image::write_buffer_with_format(
        &mut writer,
        &bytes,
        image.width() as u32,
        image.height() as u32,
        ExtendedColorType::Rgba8,
        ImageFormat::Png,
    )?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Encodes as JPEG. JPEG has no alpha channel: pixels with alpha below 250
/// are blended onto `background` first (a bit of transparency is ignored).
pub fn write_jpeg(
    image: &RGBAImage,
    path: &Path,
    quality: u8,
    background: RGBAPixel,
) -> CodecResult<()> {
    let mut bytes = Vec::with_capacity(image.pixels().len() * 3);
    for &pixel in image.pixels() {
        let mut color = pixel;
        if rgba_alpha(pixel) < 250 {
            color = background;
            blend(&mut color, pixel);
        }
        bytes.extend_from_slice(&[rgba_red(color), rgba_green(color), rgba_blue(color)]);
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    encoder.write_image(
        &bytes,
        image.width() as u32,
        image.height() as u32,
        ExtendedColorType::Rgb8,
    )?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Writes in the given format; JPEG quality and background only apply to
/// JPEG output.
pub fn write_image(
    image: &RGBAImage,
    path: &Path,
    format: ImageFormatKind,
    jpeg_quality: u8,
    background: RGBAPixel,
) -> CodecResult<()> {
    match format {
        ImageFormatKind::Png => write_png(image, path),
        ImageFormatKind::Jpeg => write_jpeg(image, path, jpeg_quality, background),
    }
}
