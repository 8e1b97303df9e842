use std::fmt;
use std::path::Path;

/// Stylesheet languages, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleDialect {
    /// Plain CSS. Also used for any extension not listed below, in which
    /// case the content passes through the preprocess stage unchanged.
    Css,
    Scss,
    /// Indented Sass syntax.
    Sass,
    Less,
    Stylus,
}

impl StyleDialect {
    pub fn from_path(path: &Path) -> Self {
        Self::detect(path).unwrap_or(Self::Css)
    }

    /// The dialect of a recognized stylesheet extension, `None` otherwise.
    pub fn detect(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "css" => Some(Self::Css),
            "scss" => Some(Self::Scss),
            "sass" => Some(Self::Sass),
            "less" => Some(Self::Less),
            "styl" | "stylus" => Some(Self::Stylus),
            _ => None,
        }
    }

    /// Whether content needs a preprocessor before postprocessing.
    pub fn needs_preprocessing(&self) -> bool {
        !matches!(self, Self::Css)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Scss => "scss",
            Self::Sass => "sass",
            Self::Less => "less",
            Self::Stylus => "stylus",
        }
    }
}

impl fmt::Display for StyleDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Markers that pull other files into a stylesheet. Content containing any
/// of them cannot be fingerprinted on its own text.
pub const INCLUDE_MARKERS: &[&str] = &["@import", "@use"];

pub fn has_include_markers(content: &str) -> bool {
    INCLUDE_MARKERS.iter().any(|marker| content.contains(marker))
}
