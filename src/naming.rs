//! Cache naming scheme.
//!
//! Every rendition of a source file lives in `thumbnails/<fileId>/` and is
//! named `<width>-<height>[-max][-with-aspect][-cover].png`. The flags are
//! whole `-`-delimited tokens, so a master is recognised by an exact `max`
//! token rather than by searching the name for a substring.

use std::fmt;

use crate::preview_types::PreviewMode;

pub const THUMBNAILS_FOLDER: &str = "thumbnails";

const EXTENSION: &str = ".png";
const MAX_SUFFIX: &str = "-max";
const ASPECT_SUFFIX: &str = "-with-aspect";
const COVER_SUFFIX: &str = "-cover";

pub fn cache_folder_path(file_id: u64) -> String {
    format!("{}/{}/", THUMBNAILS_FOLDER, file_id)
}

pub fn entry_name(
    width: u32,
    height: u32,
    is_max: bool,
    keep_aspect: bool,
    mode: PreviewMode,
) -> String {
    let mut name = format!("{}-{}", width, height);
    if is_max {
        name.push_str(MAX_SUFFIX);
    } else if keep_aspect {
        name.push_str(ASPECT_SUFFIX);
    }
    if mode == PreviewMode::Cover {
        name.push_str(COVER_SUFFIX);
    }
    name.push_str(EXTENSION);
    name
}

pub fn entry_path(file_id: u64, name: &str) -> String {
    format!("{}{}", cache_folder_path(file_id), name)
}

/// Structured form of a cache entry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryName {
    pub width: u32,
    pub height: u32,
    pub is_max: bool,
    pub keep_aspect: bool,
    pub mode: PreviewMode,
}

impl EntryName {
    pub fn master(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            is_max: true,
            keep_aspect: false,
            mode: PreviewMode::Fill,
        }
    }

    pub fn derived(width: u32, height: u32, keep_aspect: bool, mode: PreviewMode) -> Self {
        Self {
            width,
            height,
            is_max: false,
            keep_aspect,
            mode,
        }
    }

    /// Parses a file name produced by [`entry_name`]. Anything else in the
    /// cache folder (temporary files, foreign names) yields `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(EXTENSION)?;

        let (dims, flags) = match stem.find('-') {
            Some(first) => match stem[first + 1..].find('-') {
                Some(second) => stem.split_at(first + 1 + second),
                None => (stem, ""),
            },
            None => return None,
        };

        let (width, height) = dims.split_once('-')?;
        if !is_dimension(width) || !is_dimension(height) {
            return None;
        }
        let width: u32 = width.parse().ok()?;
        let height: u32 = height.parse().ok()?;
        if width == 0 || height == 0 {
            return None;
        }

        let (flags, mode) = match flags.strip_suffix(COVER_SUFFIX) {
            Some(rest) => (rest, PreviewMode::Cover),
            None => (flags, PreviewMode::Fill),
        };
        let (is_max, keep_aspect) = match flags {
            "" => (false, false),
            MAX_SUFFIX => (true, false),
            ASPECT_SUFFIX => (false, true),
            _ => return None,
        };

        Some(Self {
            width,
            height,
            is_max,
            keep_aspect,
            mode,
        })
    }

    pub fn file_name(&self) -> String {
        entry_name(
            self.width,
            self.height,
            self.is_max,
            self.keep_aspect,
            self.mode,
        )
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

fn is_dimension(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_folder_path() {
        assert_eq!(cache_folder_path(42), "thumbnails/42/");
        assert_eq!(entry_path(42, "1-2.png"), "thumbnails/42/1-2.png");
    }

    #[test]
    fn test_entry_names() {
        assert_eq!(
            entry_name(2048, 1536, true, false, PreviewMode::Fill),
            "2048-1536-max.png"
        );
        assert_eq!(
            entry_name(300, 225, false, true, PreviewMode::Fill),
            "300-225-with-aspect.png"
        );
        assert_eq!(
            entry_name(300, 300, false, false, PreviewMode::Cover),
            "300-300-cover.png"
        );
        assert_eq!(
            entry_name(300, 300, false, true, PreviewMode::Cover),
            "300-300-with-aspect-cover.png"
        );
        // The max marker wins over the aspect marker
        assert_eq!(
            entry_name(64, 32, true, true, PreviewMode::Fill),
            "64-32-max.png"
        );
        assert_eq!(
            entry_name(64, 32, false, false, PreviewMode::Fill),
            "64-32.png"
        );
    }

    #[test]
    fn test_parse_entry_names() {
        assert_eq!(
            EntryName::parse("2048-1536-max.png"),
            Some(EntryName::master(2048, 1536))
        );
        assert_eq!(
            EntryName::parse("300-225-with-aspect.png"),
            Some(EntryName::derived(300, 225, true, PreviewMode::Fill))
        );
        assert_eq!(
            EntryName::parse("300-300-with-aspect-cover.png"),
            Some(EntryName::derived(300, 300, true, PreviewMode::Cover))
        );
        assert_eq!(
            EntryName::parse("32-32.png"),
            Some(EntryName::derived(32, 32, false, PreviewMode::Fill))
        );
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(EntryName::parse("32-32.jpg"), None);
        assert_eq!(EntryName::parse("32.png"), None);
        assert_eq!(EntryName::parse("0-32.png"), None);
        assert_eq!(EntryName::parse("32-32-maxi.png"), None);
        assert_eq!(EntryName::parse("32-32-max.png.tmp-1"), None);
        assert_eq!(EntryName::parse("a-32-max.png"), None);
        assert_eq!(EntryName::parse("+3-32.png"), None);
    }

    #[test]
    fn test_max_marker_is_a_whole_token() {
        let parsed = EntryName::parse("100-50-with-aspect.png").unwrap();
        assert!(!parsed.is_max);

        let parsed = EntryName::parse("100-50-max-cover.png").unwrap();
        assert!(parsed.is_max);
        assert_eq!(parsed.mode, PreviewMode::Cover);
    }

    #[test]
    fn test_file_name_matches_parse() {
        let name = EntryName::derived(120, 90, true, PreviewMode::Cover);
        assert_eq!(EntryName::parse(&name.file_name()), Some(name));
        assert_eq!(format!("{}", name), "120-90-with-aspect-cover.png");
    }
}
