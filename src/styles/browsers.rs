//! Browser support matrix and postprocess target derivation
//!
//! The support matrix is a list of resolved `"<family> <version>"` entries
//! (`"chrome 120"`, `"ios_saf 17.0-17.2"`, `"safari TP"`). It is passed to
//! each processor explicitly; there is no process-wide default to patch.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Resolved entries for the browsers supported by default: the latest
/// Chrome and Firefox, the last two Edge, Safari and iOS majors, and
/// Firefox ESR.
pub const DEFAULT_BROWSERS: &[&str] = &[
    "chrome 130",
    "edge 130",
    "edge 129",
    "firefox 132",
    "firefox 128",
    "ios_saf 18.0",
    "ios_saf 17.6-17.7",
    "safari 18.0",
    "safari 17.6",
];

/// Families the compaction stage understands, by its own names.
const SUPPORTED_TARGET_FAMILIES: &[&str] = &["safari", "firefox", "edge", "chrome", "ios"];

/// Technology Preview builds are assumed to support every known feature.
const SAFARI_PREVIEW_VERSION: &str = "999";

/// Stand-in for Internet Explorer, which the compaction stage cannot target.
const IE_TARGET: &str = "edge12";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct SupportMatrix {
    entries: Vec<String>,
}

impl SupportMatrix {
    /// Validates every entry. An entry must be exactly a family and a
    /// version separated by whitespace.
    pub fn parse<I, S>(entries: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let mut parts = entry.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(family), Some(version), None) => {
                    parsed.push(format!("{} {}", family.to_lowercase(), version));
                }
                _ => {
                    return Err(BuildError::configuration(format!(
                        "malformed browser entry '{}': expected '<family> <version>'",
                        entry
                    )))
                }
            }
        }
        Ok(Self { entries: parsed })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Translates the matrix into compaction targets such as `chrome120`.
    ///
    /// Unknown families are dropped. `None` means "no specific targets" and
    /// is returned instead of an empty list, which would mean "target
    /// nothing".
    pub fn to_targets(&self) -> Option<Vec<String>> {
        let mut targets = Vec::new();

        for entry in &self.entries {
            let Some((family, version)) = entry.split_once(' ') else {
                continue;
            };

            // iOS Safari uses ranges (`12.0-12.2`); the lowest version is
            // enough for minimum feature checks.
            let (family, version) = match family {
                "ios_saf" => ("ios", version.split('-').next().unwrap_or(version)),
                _ => (family, version),
            };

            if family == "ie" {
                targets.push(IE_TARGET.to_string());
            } else if SUPPORTED_TARGET_FAMILIES.contains(&family) {
                let version = if family == "safari" && version == "TP" {
                    SAFARI_PREVIEW_VERSION
                } else {
                    version
                };
                targets.push(format!("{}{}", family, version));
            }
        }

        if targets.is_empty() {
            None
        } else {
            Some(targets)
        }
    }
}

impl Default for SupportMatrix {
    fn default() -> Self {
        Self {
            entries: DEFAULT_BROWSERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for SupportMatrix {
    type Error = BuildError;

    fn try_from(entries: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(entries)
    }
}

impl From<SupportMatrix> for Vec<String> {
    fn from(matrix: SupportMatrix) -> Self {
        matrix.entries
    }
}
