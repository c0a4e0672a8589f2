use image::DynamicImage;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PreviewMode {
    /// Fit inside the requested box
    #[default]
    Fill,
    /// Fill the requested box completely, cropping overflow
    Cover,
}

impl PreviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewMode::Fill => "fill",
            PreviewMode::Cover => "cover",
        }
    }
}

impl FromStr for PreviewMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fill" => Ok(PreviewMode::Fill),
            "cover" => Ok(PreviewMode::Cover),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A requested bounding box plus the resize policy for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewRequest {
    pub width: u32,
    pub height: u32,
    pub allow_upscale: bool,
    pub keep_aspect: bool,
    pub mode: PreviewMode,
}

impl PreviewRequest {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            allow_upscale: true,
            keep_aspect: false,
            mode: PreviewMode::Fill,
        }
    }

    pub fn allow_upscale(mut self, allow_upscale: bool) -> Self {
        self.allow_upscale = allow_upscale;
        self
    }

    pub fn keep_aspect(mut self, keep_aspect: bool) -> Self {
        self.keep_aspect = keep_aspect;
        self
    }

    pub fn mode(mut self, mode: PreviewMode) -> Self {
        self.mode = mode;
        self
    }
}

impl fmt::Display for PreviewRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} (upscale={}, aspect={}, mode={})",
            self.width, self.height, self.allow_upscale, self.keep_aspect, self.mode
        )
    }
}

/// Result of a resolution: a decoded bitmap, or nothing when the caller should
/// fall back to a type icon.
#[derive(Debug, Clone, Default)]
pub struct PreviewImage {
    image: Option<DynamicImage>,
    path: Option<String>,
}

impl PreviewImage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(image: DynamicImage, path: Option<String>) -> Self {
        Self {
            image: Some(image),
            path,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.image.is_some()
    }

    pub fn image(&self) -> Option<&DynamicImage> {
        self.image.as_ref()
    }

    pub fn into_image(self) -> Option<DynamicImage> {
        self.image
    }

    /// Cache path the bitmap was served from or persisted to. `None` when the
    /// image could not be cached.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|img| (img.width(), img.height()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid preview request: {0}")]
    InvalidRequest(String),
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
    #[error("No preview providers registered")]
    NoProviders,
}

pub type PreviewResult<T> = Result<T, PreviewError>;
