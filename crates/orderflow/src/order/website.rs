use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of upload targets an upload block may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Website {
    Pixiv,
    Booth,
    Dropbox,
    Unifans,
    /// Runs the whole pipeline but skips the upload itself.
    Test,
}

impl Website {
    pub const ALL: [Website; 5] = [
        Website::Pixiv,
        Website::Booth,
        Website::Dropbox,
        Website::Unifans,
        Website::Test,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Website::Pixiv => "pixiv",
            Website::Booth => "booth",
            Website::Dropbox => "dropbox",
            Website::Unifans => "unifans",
            Website::Test => "test",
        }
    }

    /// Whether the site accepts a zip archive in place of loose files.
    pub fn supports_packing(self) -> bool {
        matches!(self, Website::Booth | Website::Dropbox)
    }

    pub fn supports_extension_file(self) -> bool {
        matches!(self, Website::Booth | Website::Dropbox)
    }

    /// Maximum number of tags the site accepts on a post.
    pub fn tag_limit(self) -> Option<usize> {
        match self {
            Website::Pixiv => Some(10),
            Website::Booth => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for Website {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
