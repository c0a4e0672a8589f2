use async_trait::async_trait;
use image::DynamicImage;
use log::debug;
use std::fmt;
use std::sync::Arc;

use crate::file_index::SourceFile;
use crate::file_store::FileStore;
use crate::image_ops;
use crate::preview_types::PreviewResult;

/// Mimetype pattern a provider is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MimePattern {
    /// Exact mimetype, e.g. `image/png`
    Exact(String),
    /// Mimetype prefix, e.g. `image/`
    Prefix(String),
    /// Any of the listed exact mimetypes
    OneOf(Vec<String>),
}

impl MimePattern {
    /// Parses `image/*` into a prefix, `image/png|image/gif` into a list and
    /// anything else into an exact pattern.
    pub fn parse(pattern: &str) -> Self {
        if let Some(prefix) = pattern.strip_suffix('*') {
            MimePattern::Prefix(prefix.to_string())
        } else if pattern.contains('|') {
            MimePattern::OneOf(pattern.split('|').map(|p| p.trim().to_string()).collect())
        } else {
            MimePattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, mimetype: &str) -> bool {
        match self {
            MimePattern::Exact(exact) => mimetype == exact,
            MimePattern::Prefix(prefix) => mimetype.starts_with(prefix.as_str()),
            MimePattern::OneOf(options) => options.iter().any(|option| option == mimetype),
        }
    }
}

impl fmt::Display for MimePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MimePattern::Exact(exact) => write!(f, "{}", exact),
            MimePattern::Prefix(prefix) => write!(f, "{}*", prefix),
            MimePattern::OneOf(options) => write!(f, "{}", options.join("|")),
        }
    }
}

/// Turns a source file into a first bitmap bounded by `max_width`x`max_height`.
#[async_trait]
pub trait RenderProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `Ok(None)` when the provider cannot render this particular file.
    async fn render(
        &self,
        file: &SourceFile,
        files: &dyn FileStore,
        max_width: u32,
        max_height: u32,
        allow_upscale: bool,
    ) -> PreviewResult<Option<DynamicImage>>;
}

/// A provider together with the mimetype pattern it was registered under.
#[derive(Clone)]
pub struct ProviderRegistration {
    pub pattern: MimePattern,
    pub provider: Arc<dyn RenderProvider>,
}

impl ProviderRegistration {
    pub fn new(pattern: MimePattern, provider: Arc<dyn RenderProvider>) -> Self {
        Self { pattern, provider }
    }
}

impl fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("pattern", &self.pattern)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Scales `width`x`height` to fit the bounds, keeping the aspect ratio.
/// Without `allow_upscale` the dimensions are never increased.
pub fn fit_within(
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
    allow_upscale: bool,
) -> (u32, u32) {
    let factor_x = max_width as f64 / width as f64;
    let factor_y = max_height as f64 / height as f64;
    let mut factor = factor_x.min(factor_y);
    if !allow_upscale && factor > 1.0 {
        factor = 1.0;
    }

    let new_width = ((width as f64 * factor).round() as u32).max(1);
    let new_height = ((height as f64 * factor).round() as u32).max(1);
    (new_width, new_height)
}

/// Renders raster images the `image` crate can decode.
pub struct ImageProvider;

impl ImageProvider {
    pub fn pattern() -> MimePattern {
        MimePattern::OneOf(
            [
                "image/jpeg",
                "image/png",
                "image/gif",
                "image/webp",
                "image/bmp",
                "image/tiff",
                "image/x-tga",
                "image/qoi",
                "image/vnd.radiance",
                "image/x-portable-anymap",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
        )
    }

    pub fn registration() -> ProviderRegistration {
        ProviderRegistration::new(Self::pattern(), Arc::new(ImageProvider))
    }
}

#[async_trait]
impl RenderProvider for ImageProvider {
    fn name(&self) -> &str {
        "image"
    }

    async fn render(
        &self,
        file: &SourceFile,
        files: &dyn FileStore,
        max_width: u32,
        max_height: u32,
        allow_upscale: bool,
    ) -> PreviewResult<Option<DynamicImage>> {
        let data = files.read(&file.path).await?;

        let img = match image_ops::decode(&data) {
            Ok(img) => img,
            Err(e) => {
                debug!("Cannot decode {} as an image: {}", file.path, e);
                return Ok(None);
            }
        };
        let img = image_ops::apply_orientation(img, image_ops::read_orientation(&data));

        let (width, height) = fit_within(
            img.width(),
            img.height(),
            max_width,
            max_height,
            allow_upscale,
        );
        if (width, height) == (img.width(), img.height()) {
            return Ok(Some(img));
        }

        Ok(Some(img.thumbnail_exact(width, height)))
    }
}
