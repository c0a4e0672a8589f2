use std::env;

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewConfig {
    /// Largest width a master rendition (and any clamped request) may have
    pub max_width: u32,
    /// Largest height a master rendition (and any clamped request) may have
    pub max_height: u32,
    pub max_scale_factor: u32,
    pub enabled: bool,
    pub data_path: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_width: 2048,
            max_height: 2048,
            max_scale_factor: 2,
            enabled: true,
            data_path: "./data".to_string(),
        }
    }
}

impl PreviewConfig {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = PreviewConfig {
            max_width: env::var("PREVIEW_MAX_X")
                .unwrap_or_else(|_| "2048".to_string())
                .parse()?,
            max_height: env::var("PREVIEW_MAX_Y")
                .unwrap_or_else(|_| "2048".to_string())
                .parse()?,
            max_scale_factor: env::var("PREVIEW_MAX_SCALE_FACTOR")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            enabled: env::var("PREVIEW_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            data_path: env::var("PREVIEW_DATA_PATH").unwrap_or_else(|_| "./data".to_string()),
        };

        if config.max_width == 0 || config.max_height == 0 {
            return Err("PREVIEW_MAX_X and PREVIEW_MAX_Y must be positive".into());
        }
        if config.max_scale_factor == 0 {
            return Err("PREVIEW_MAX_SCALE_FACTOR must be at least 1".into());
        }

        Ok(config)
    }

    /// Upscaling is never possible when the scale factor is pinned to 1.
    pub fn upscaling_possible(&self) -> bool {
        self.max_scale_factor > 1
    }
}
