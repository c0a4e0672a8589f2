use std::fmt;
use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const DIRECTORY: &str = "httpd/unix-directory";

/// Detects MIME type based on the file extension of a logical path
pub fn from_path(path: &str) -> Option<MimeType> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(from_extension)
}

fn from_extension(ext: &str) -> Option<MimeType> {
    let (type_, subtype) = match ext.to_lowercase().as_str() {
        // Raster images the built-in provider can decode
        "jpg" | "jpeg" => ("image", "jpeg"),
        "png" => ("image", "png"),
        "gif" => ("image", "gif"),
        "webp" => ("image", "webp"),
        "bmp" => ("image", "bmp"),
        "tiff" | "tif" => ("image", "tiff"),
        "tga" => ("image", "x-tga"),
        "qoi" => ("image", "qoi"),
        "hdr" => ("image", "vnd.radiance"),
        "pbm" | "pgm" | "ppm" | "pnm" => ("image", "x-portable-anymap"),

        // Known types that need a dedicated provider
        "svg" => ("image", "svg+xml"),
        "heic" => ("image", "heic"),
        "pdf" => ("application", "pdf"),
        "txt" | "md" => ("text", "plain"),
        "mp4" => ("video", "mp4"),
        "mov" => ("video", "quicktime"),
        "webm" => ("video", "webm"),
        "mp3" => ("audio", "mpeg"),

        _ => return None,
    };
    Some(MimeType::new(type_, subtype))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    type_: String,
    subtype: String,
}

impl MimeType {
    pub fn new(type_: &str, subtype: &str) -> Self {
        Self {
            type_: type_.to_string(),
            subtype: subtype.to_string(),
        }
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)
    }
}
