//! Preview resolution.
//!
//! A request is answered from the cheapest source available, in this order:
//!
//! 1. a cached rendition named exactly after the computed target size
//! 2. the master rendition, when the request is at least as large as it
//! 3. the narrowest cached rendition with a matching aspect ratio that is
//!    still wide enough, resized down to the target and cached
//! 4. the master rendition resized to the target and cached
//!
//! The master rendition is rendered by the first matching provider the first
//! time a file is previewed, bounded by the configured maximum size.

use image::DynamicImage;
use log::{debug, error, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::PreviewConfig;
use crate::file_index::{FileIndex, SourceFile};
use crate::file_store::FileStore;
use crate::image_ops;
use crate::naming::{self, EntryName};
use crate::preview_store::{CachedRendition, PreviewStore};
use crate::providers::{MimePattern, ProviderRegistration, RenderProvider};
use crate::preview_types::{
    PreviewError, PreviewImage, PreviewMode, PreviewRequest, PreviewResult,
};

const ASPECT_RATIO_EPSILON: f64 = 0.000001;

/// A request after validation and clamping to the configured maximum size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NormalizedRequest {
    pub width: u32,
    pub height: u32,
    pub scaling_up: bool,
    pub keep_aspect: bool,
    pub mode: PreviewMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection<'a> {
    Exact(&'a CachedRendition),
    Master(&'a CachedRendition),
    Source(&'a CachedRendition),
}

/// The master rendition rendered during this resolution, if any.
struct FreshMaster {
    image: Option<DynamicImage>,
    persisted: bool,
}

impl FreshMaster {
    fn cached() -> Self {
        Self {
            image: None,
            persisted: true,
        }
    }
}

pub struct PreviewResolver {
    pub(crate) config: PreviewConfig,
    pub(crate) files: Arc<dyn FileStore>,
    pub(crate) previews: PreviewStore,
    pub(crate) index: Arc<dyn FileIndex>,
    providers: Vec<ProviderRegistration>,
}

pub struct PreviewResolverBuilder {
    config: PreviewConfig,
    files: Arc<dyn FileStore>,
    previews: Option<Arc<dyn FileStore>>,
    index: Arc<dyn FileIndex>,
    providers: Vec<ProviderRegistration>,
}

impl PreviewResolverBuilder {
    /// Stores renditions somewhere other than the source file store.
    pub fn preview_store(mut self, store: Arc<dyn FileStore>) -> Self {
        self.previews = Some(store);
        self
    }

    /// Appends a provider. Providers are tried in the order they were added.
    pub fn provider(mut self, pattern: MimePattern, provider: Arc<dyn RenderProvider>) -> Self {
        self.providers
            .push(ProviderRegistration::new(pattern, provider));
        self
    }

    pub fn registration(mut self, registration: ProviderRegistration) -> Self {
        self.providers.push(registration);
        self
    }

    pub fn build(self) -> PreviewResult<PreviewResolver> {
        if self.providers.is_empty() && self.config.enabled {
            error!("No preview providers exist");
            return Err(PreviewError::NoProviders);
        }

        let previews = self.previews.unwrap_or_else(|| self.files.clone());

        Ok(PreviewResolver {
            config: self.config,
            files: self.files,
            previews: PreviewStore::new(previews),
            index: self.index,
            providers: self.providers,
        })
    }
}

impl PreviewResolver {
    /// Starts a resolver whose renditions live next to the source files
    /// unless [`PreviewResolverBuilder::preview_store`] says otherwise.
    pub fn builder(
        config: PreviewConfig,
        files: Arc<dyn FileStore>,
        index: Arc<dyn FileIndex>,
    ) -> PreviewResolverBuilder {
        PreviewResolverBuilder {
            config,
            files,
            previews: None,
            index,
            providers: Vec::new(),
        }
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Returns a preview of the file with the given id.
    ///
    /// Only an invalid request is an error. A missing or unreadable file, a
    /// mimetype no provider handles, or providers that all fail yield an
    /// empty [`PreviewImage`] so the caller can show a type icon instead.
    pub async fn resolve_preview(
        &self,
        file_id: u64,
        request: PreviewRequest,
    ) -> PreviewResult<PreviewImage> {
        let request = self.normalize(&request)?;
        if !self.config.enabled {
            debug!("Previews are disabled");
            return Ok(PreviewImage::empty());
        }

        match self.index.file_by_id(file_id).await {
            Some(file) => Ok(self.resolve_file(&file, &request).await),
            None => {
                debug!("File with id {} not found", file_id);
                Ok(PreviewImage::empty())
            }
        }
    }

    pub async fn resolve_preview_for_path(
        &self,
        path: &str,
        request: PreviewRequest,
    ) -> PreviewResult<PreviewImage> {
        let request = self.normalize(&request)?;
        if !self.config.enabled {
            debug!("Previews are disabled");
            return Ok(PreviewImage::empty());
        }

        match self.index.file_info(path).await {
            Some(file) => Ok(self.resolve_file(&file, &request).await),
            None => {
                debug!("File:\"{}\" not found", path);
                Ok(PreviewImage::empty())
            }
        }
    }

    pub(crate) fn normalize(&self, request: &PreviewRequest) -> PreviewResult<NormalizedRequest> {
        if request.width == 0 {
            return Err(PreviewError::InvalidRequest(
                "Cannot set width of 0 or smaller!".to_string(),
            ));
        }
        if request.height == 0 {
            return Err(PreviewError::InvalidRequest(
                "Cannot set height of 0 or smaller!".to_string(),
            ));
        }

        Ok(NormalizedRequest {
            width: limit_dimension(request.width, self.config.max_width, "width"),
            height: limit_dimension(request.height, self.config.max_height, "height"),
            scaling_up: request.allow_upscale && self.config.upscaling_possible(),
            keep_aspect: request.keep_aspect,
            mode: request.mode,
        })
    }

    async fn resolve_file(&self, file: &SourceFile, request: &NormalizedRequest) -> PreviewImage {
        if file.is_dir || !file.readable {
            debug!("File:\"{}\" is not a readable file", file.path);
            return PreviewImage::empty();
        }

        let listing = match self.previews.list(file.id).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Failed to list previews of {}: {}", file.path, e);
                Vec::new()
            }
        };

        if find_master(&listing).is_some() {
            let mut fresh = FreshMaster::cached();
            if let Some(preview) = self.serve(file.id, request, &listing, &mut fresh).await {
                return preview;
            }

            // Never replace just the max preview; start the folder over instead.
            warn!(
                "Cached max preview of {} is unusable, regenerating all previews",
                file.path
            );
            if let Err(e) = self.previews.delete_all(&[file.id]).await {
                warn!("Failed to clear previews of {}: {}", file.path, e);
            }
            return self.generate_and_serve(file, request, Vec::new()).await;
        }

        self.generate_and_serve(file, request, listing).await
    }

    async fn generate_and_serve(
        &self,
        file: &SourceFile,
        request: &NormalizedRequest,
        mut listing: Vec<CachedRendition>,
    ) -> PreviewImage {
        let (image, master, persisted) = match self.generate_master(file).await {
            Some(generated) => generated,
            None => return PreviewImage::empty(),
        };

        listing.retain(|entry| !entry.name.is_max);
        listing.push(master);

        let mut fresh = FreshMaster {
            image: Some(image),
            persisted,
        };
        self.serve(file.id, request, &listing, &mut fresh)
            .await
            .unwrap_or_default()
    }

    /// Answers the request from the cache folder listing. Returns `None` only
    /// when the master rendition itself cannot be loaded.
    async fn serve(
        &self,
        file_id: u64,
        request: &NormalizedRequest,
        listing: &[CachedRendition],
        fresh: &mut FreshMaster,
    ) -> Option<PreviewImage> {
        let master = find_master(listing)?;
        let (selection, target) = self.select(request, master, listing);

        match selection {
            Selection::Exact(entry) => {
                match self.load(entry).await {
                    Some(img) if (img.width(), img.height()) == target => {
                        debug!("Preview cache hit for {}", entry.path);
                        return Some(PreviewImage::new(img, Some(entry.path.clone())));
                    }
                    Some(img) => debug!(
                        "Cached preview {} is {}x{}, regenerating",
                        entry.path,
                        img.width(),
                        img.height()
                    ),
                    None => {}
                }
                self.derive(file_id, request, master, master, target, fresh)
                    .await
            }
            Selection::Master(entry) => {
                let img = self.load_master(entry, fresh).await?;
                debug!("Serving max preview {}", entry.path);
                Some(PreviewImage::new(img, served_path(entry, fresh)))
            }
            Selection::Source(entry) => {
                self.derive(file_id, request, entry, master, target, fresh)
                    .await
            }
        }
    }

    fn select<'a>(
        &self,
        request: &NormalizedRequest,
        master: &'a CachedRendition,
        listing: &'a [CachedRendition],
    ) -> (Selection<'a>, (u32, u32)) {
        let master_size = master.name.dimensions();
        let target = self.simulate_dimensions(request, master_size);

        if target.0 == 0 || target.1 == 0 || target == master_size {
            return (Selection::Master(master), target);
        }

        let wanted = EntryName::derived(target.0, target.1, request.keep_aspect, request.mode);
        if let Some(entry) = listing.iter().find(|entry| entry.name == wanted) {
            return (Selection::Exact(entry), target);
        }

        if request.width >= master_size.0 && request.height >= master_size.1 {
            return (Selection::Master(master), target);
        }

        let wanted_ratio = if request.keep_aspect {
            master.name.aspect_ratio()
        } else {
            request.width as f64 / request.height as f64
        };

        let mut candidates: BTreeMap<u32, &CachedRendition> = BTreeMap::new();
        for entry in listing {
            let (x, y) = entry.name.dimensions();
            if (entry.name.aspect_ratio() - wanted_ratio).abs() >= ASPECT_RATIO_EPSILON
                || self.unscalable(request, x, y)
            {
                continue;
            }
            candidates.insert(x, entry);
        }

        let source = candidates
            .range(request.width..)
            .next()
            .map(|(_, entry)| *entry)
            .unwrap_or(master);

        (Selection::Source(source), target)
    }

    /// Size of the rendition a request maps to, given the master's actual
    /// size. Mirrors the sizing `resize` applies to the master so that a
    /// generated rendition is found again under the same name.
    pub(crate) fn simulate_dimensions(
        &self,
        request: &NormalizedRequest,
        master_size: (u32, u32),
    ) -> (u32, u32) {
        let scale_factor = self.scale_factor(request);
        let (width, height) = match request.mode {
            PreviewMode::Cover => {
                apply_cover(request.width, request.height, master_size, scale_factor)
            }
            PreviewMode::Fill => (request.width, request.height),
        };

        if request.keep_aspect {
            apply_aspect_ratio(width, height, master_size, scale_factor)
        } else {
            self.fix_size(width, height, request.scaling_up)
        }
    }

    fn fix_size(&self, width: u32, height: u32, scaling_up: bool) -> (u32, u32) {
        if scaling_up {
            (
                width.min(self.config.max_width),
                height.min(self.config.max_height),
            )
        } else {
            (width, height)
        }
    }

    fn scale_factor(&self, request: &NormalizedRequest) -> f64 {
        if request.scaling_up {
            self.config.max_scale_factor as f64
        } else {
            1.0
        }
    }

    /// A rendition smaller than the request can only be a source when
    /// upscaling is on and the needed factor stays within the configured max.
    pub(crate) fn unscalable(&self, request: &NormalizedRequest, x: u32, y: u32) -> bool {
        if x < request.width || y < request.height {
            if request.scaling_up {
                let scale_factor = request.width as f64 / x as f64;
                return scale_factor > self.config.max_scale_factor as f64;
            }
            return true;
        }
        false
    }

    async fn derive(
        &self,
        file_id: u64,
        request: &NormalizedRequest,
        source: &CachedRendition,
        master: &CachedRendition,
        target: (u32, u32),
        fresh: &mut FreshMaster,
    ) -> Option<PreviewImage> {
        let (source, img) = if source.name.is_max {
            (master, self.load_master(master, fresh).await?)
        } else {
            match self.load(source).await {
                Some(img) => (source, img),
                None => (master, self.load_master(master, fresh).await?),
            }
        };

        if (img.width(), img.height()) == target {
            return Some(PreviewImage::new(img, served_path(source, fresh)));
        }

        debug!(
            "Deriving {}x{} preview from {}",
            target.0, target.1, source.path
        );
        let (img, modified) = self.resize(img, request);
        if !modified {
            return Some(PreviewImage::new(img, served_path(source, fresh)));
        }

        Some(self.store_rendition(file_id, request, img).await)
    }

    /// Resizes, crops and pads a source bitmap towards the requested box.
    /// The flag is false when the source came back untouched.
    pub(crate) fn resize(
        &self,
        img: DynamicImage,
        request: &NormalizedRequest,
    ) -> (DynamicImage, bool) {
        let source_size = (img.width(), img.height());
        if source_size.0 == 0 || source_size.1 == 0 {
            return (img, false);
        }
        let scale_factor = self.scale_factor(request);
        let (mut asked_width, mut asked_height) = (request.width, request.height);

        if request.mode == PreviewMode::Cover {
            (asked_width, asked_height) =
                apply_cover(asked_width, asked_height, source_size, scale_factor);
        }
        if request.keep_aspect {
            (asked_width, asked_height) =
                apply_aspect_ratio(asked_width, asked_height, source_size, scale_factor);
        }
        if asked_width == 0 || asked_height == 0 {
            debug!(
                "Cannot save preview of dimension {}x{}",
                asked_width, asked_height
            );
            return (img, false);
        }

        let (new_width, new_height) =
            self.scale(asked_width, asked_height, source_size, request.scaling_up);
        if new_width == 0 || new_height == 0 {
            debug!(
                "Cannot save preview of dimension {}x{}",
                new_width, new_height
            );
            return (img, false);
        }

        let untouched = (new_width, new_height) == source_size;
        let scaled = if untouched {
            img
        } else {
            image_ops::precise_resize(&img, new_width, new_height)
        };

        if (new_width, new_height) == (asked_width, asked_height) {
            return (scaled, !untouched);
        }

        if new_width >= asked_width && new_height >= asked_height {
            // Never crop on the Y axis, document pages must keep their top
            let crop_x = (new_width - asked_width) / 2;
            return match image_ops::crop(&scaled, crop_x, 0, asked_width, asked_height) {
                Some(cropped) => (cropped, true),
                None => (scaled, !untouched),
            };
        }

        if request.scaling_up {
            return (crop_and_fill(scaled, asked_width, asked_height), true);
        }

        // Smaller than asked and not allowed to grow
        (scaled, !untouched)
    }

    /// Factor that brings the source to cover the asked box, capped at 1
    /// without upscaling and at the configured max scale factor.
    fn scale(
        &self,
        asked_width: u32,
        asked_height: u32,
        source_size: (u32, u32),
        scaling_up: bool,
    ) -> (u32, u32) {
        let factor_x = asked_width as f64 / source_size.0 as f64;
        let factor_y = asked_height as f64 / source_size.1 as f64;
        let mut factor = factor_x.max(factor_y);

        if !scaling_up && factor > 1.0 {
            factor = 1.0;
        }

        let max_scale_factor = self.config.max_scale_factor as f64;
        if factor > max_scale_factor {
            debug!(
                "scale factor reduced from {} to {}",
                factor, max_scale_factor
            );
            factor = max_scale_factor;
        }

        (
            (source_size.0 as f64 * factor).round() as u32,
            (source_size.1 as f64 * factor).round() as u32,
        )
    }

    async fn store_rendition(
        &self,
        file_id: u64,
        request: &NormalizedRequest,
        img: DynamicImage,
    ) -> PreviewImage {
        let name = EntryName::derived(img.width(), img.height(), request.keep_aspect, request.mode);
        let path = naming::entry_path(file_id, &name.file_name());

        let result = match image_ops::encode_png(&img) {
            Ok(data) => match self.previews.ensure_folder(file_id).await {
                Ok(()) => self.previews.write(&path, &data).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!("Saved preview to cache: {}", path);
                PreviewImage::new(img, Some(path))
            }
            Err(e) => {
                warn!("Failed to store preview {}: {}", path, e);
                PreviewImage::new(img, None)
            }
        }
    }

    /// Renders the master rendition with the first provider that succeeds and
    /// stores it. The flag tells whether it made it to the cache.
    async fn generate_master(
        &self,
        file: &SourceFile,
    ) -> Option<(DynamicImage, CachedRendition, bool)> {
        let mut matched = false;

        for registration in &self.providers {
            if !registration.pattern.matches(&file.mimetype) {
                continue;
            }
            matched = true;
            let provider = &registration.provider;

            debug!(
                "Generating preview for \"{}\" with \"{}\"",
                file.path,
                provider.name()
            );
            let img = match provider
                .render(
                    file,
                    self.files.as_ref(),
                    self.config.max_width,
                    self.config.max_height,
                    false,
                )
                .await
            {
                Ok(Some(img)) if img.width() > 0 && img.height() > 0 => img,
                Ok(_) => {
                    debug!("Provider \"{}\" returned no preview", provider.name());
                    continue;
                }
                Err(e) => {
                    debug!("Provider \"{}\" failed: {}", provider.name(), e);
                    continue;
                }
            };

            let name = EntryName::master(img.width(), img.height());
            let entry = CachedRendition {
                path: naming::entry_path(file.id, &name.file_name()),
                name,
            };
            let persisted = match self.store_master(file.id, &entry, &img).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to store max preview {}: {}", entry.path, e);
                    false
                }
            };
            return Some((img, entry, persisted));
        }

        if matched {
            debug!("No provider could render \"{}\"", file.path);
        } else {
            debug!("No preview provider for mimetype {}", file.mimetype);
        }
        None
    }

    async fn store_master(
        &self,
        file_id: u64,
        entry: &CachedRendition,
        img: &DynamicImage,
    ) -> PreviewResult<()> {
        let data = image_ops::encode_png(img)?;
        self.previews.ensure_folder(file_id).await?;
        self.previews.write(&entry.path, &data).await
    }

    async fn load(&self, entry: &CachedRendition) -> Option<DynamicImage> {
        let data = match self.previews.read(&entry.path).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to read cached preview {}: {}", entry.path, e);
                return None;
            }
        };
        match image_ops::decode(&data) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!("Failed to decode cached preview {}: {}", entry.path, e);
                None
            }
        }
    }

    async fn load_master(
        &self,
        master: &CachedRendition,
        fresh: &mut FreshMaster,
    ) -> Option<DynamicImage> {
        match fresh.image.take() {
            Some(img) => Some(img),
            None => self.load(master).await,
        }
    }
}

fn find_master(listing: &[CachedRendition]) -> Option<&CachedRendition> {
    listing.iter().find(|entry| entry.name.is_max)
}

fn served_path(entry: &CachedRendition, fresh: &FreshMaster) -> Option<String> {
    if entry.name.is_max && !fresh.persisted {
        None
    } else {
        Some(entry.path.clone())
    }
}

fn limit_dimension(value: u32, max: u32, name: &str) -> u32 {
    if value > max {
        debug!("{} reduced from {} to {}", name, value, max);
        max
    } else {
        value
    }
}

/// Shrinks the asked box so it matches the source's aspect ratio. Each
/// axis is rounded on its own, which can drift by one pixel.
pub(crate) fn apply_aspect_ratio(
    asked_width: u32,
    asked_height: u32,
    source: (u32, u32),
    scale_factor: f64,
) -> (u32, u32) {
    let ratio = source.0 as f64 / source.1 as f64;
    let width = (asked_width as f64).min(source.0 as f64 * scale_factor);
    let height = (asked_height as f64).min(source.1 as f64 * scale_factor);

    if width / ratio < height {
        // width restricted
        (width as u32, (width / ratio).round() as u32)
    } else {
        ((height * ratio).round() as u32, height as u32)
    }
}

/// Grows the asked box so the source covers it completely.
pub(crate) fn apply_cover(
    asked_width: u32,
    asked_height: u32,
    source: (u32, u32),
    scale_factor: f64,
) -> (u32, u32) {
    let ratio = source.0 as f64 / source.1 as f64;
    let width = (asked_width as f64).min(source.0 as f64 * scale_factor);
    let height = (asked_height as f64).min(source.1 as f64 * scale_factor);

    if width / ratio > height {
        // height restricted
        (width as u32, (width / ratio).round() as u32)
    } else {
        ((height * ratio).round() as u32, height as u32)
    }
}

/// Crops whatever overflows the box, then centers the rest on a transparent
/// canvas of exactly the box size.
fn crop_and_fill(img: DynamicImage, asked_width: u32, asked_height: u32) -> DynamicImage {
    let mut img = img;

    if img.width() > asked_width {
        let crop_x = (img.width() - asked_width) / 2;
        if let Some(cropped) = image_ops::crop(&img, crop_x, 0, asked_width, img.height()) {
            img = cropped;
        }
    }
    if img.height() > asked_height {
        let crop_y = (img.height() - asked_height) / 2;
        if let Some(cropped) = image_ops::crop(&img, 0, crop_y, img.width(), asked_height) {
            img = cropped;
        }
    }

    image_ops::center_on_transparent(&img, asked_width, asked_height)
}
