use exif::{In, Reader, Tag, Value};
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, ImageFormat, RgbaImage};
use log::debug;
use std::io::Cursor;

use crate::preview_types::PreviewResult;

pub fn decode(data: &[u8]) -> PreviewResult<DynamicImage> {
    Ok(image::load_from_memory(data)?)
}

/// Renditions are always stored as PNG so they keep their alpha channel and
/// can be decoded again regardless of the source format.
pub fn encode_png(img: &DynamicImage) -> PreviewResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    match img.color() {
        ColorType::Rgb32F | ColorType::Rgba32F => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut buffer, ImageFormat::Png)?
        }
        _ => img.write_to(&mut buffer, ImageFormat::Png)?,
    }
    Ok(buffer.into_inner())
}

/// Resizes to exactly `width`x`height`, keeping the color type (and thus any
/// alpha channel) of the source.
pub fn precise_resize(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.width() == width && img.height() == height {
        return img.clone();
    }
    img.resize_exact(width, height, FilterType::Lanczos3)
}

/// Crops a `width`x`height` window at (`x`, `y`). Returns `None` when the
/// window is empty or does not fit inside the image.
pub fn crop(img: &DynamicImage, x: u32, y: u32, width: u32, height: u32) -> Option<DynamicImage> {
    if width == 0 || height == 0 {
        return None;
    }
    let fits_x = x.checked_add(width).is_some_and(|right| right <= img.width());
    let fits_y = y.checked_add(height).is_some_and(|bottom| bottom <= img.height());
    if !fits_x || !fits_y {
        debug!(
            "Crop {}x{}+{}+{} outside of {}x{} image",
            width,
            height,
            x,
            y,
            img.width(),
            img.height()
        );
        return None;
    }
    Some(img.crop_imm(x, y, width, height))
}

/// Centers `img` on a fully transparent `width`x`height` canvas. Parts of the
/// image that do not fit are clipped by the canvas.
pub fn center_on_transparent(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let mut canvas = RgbaImage::new(width, height);
    let offset_x = (width as i64 - img.width() as i64) / 2;
    let offset_y = (height as i64 - img.height() as i64) / 2;
    imageops::replace(
        &mut canvas,
        &img.to_rgba8(),
        offset_x.max(0),
        offset_y.max(0),
    );
    DynamicImage::ImageRgba8(canvas)
}

/// Reads the EXIF orientation tag from an encoded image, if it carries one.
pub fn read_orientation(data: &[u8]) -> Option<u32> {
    let exif = Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()?;
    let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
    match field.value {
        Value::Short(ref v) if !v.is_empty() => Some(v[0] as u32),
        _ => None,
    }
}

/// Turns the stored pixels upright according to an EXIF orientation value.
pub fn apply_orientation(img: DynamicImage, orientation: Option<u32>) -> DynamicImage {
    match orientation {
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        // mirrored along the main diagonal
        Some(5) => img.fliph().rotate270(),
        Some(6) => img.rotate90(),
        // mirrored along the anti-diagonal
        Some(7) => img.fliph().rotate90(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}
