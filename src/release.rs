//! Pinned upstream release and the local names derived from it.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Compression suffixes stripped from the archive name to get the source
/// directory. Longest first so `.tar.xz` wins over `.tar`.
const ARCHIVE_SUFFIXES: &[&str] = &[".tar.bz2", ".tar.zst", ".tar.xz", ".tar.gz", ".tgz", ".tar"];

/// One upstream source release.
///
/// The archive name is always the URL's final path segment and the source
/// directory is the archive name without its compression suffix
/// (`linux-6.7.tar.xz` unpacks into `linux-6.7`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    url: String,
    archive_name: String,
    source_dir_name: String,
}

impl ReleaseDescriptor {
    pub fn from_url(url: &str) -> Result<Self> {
        let url = url.trim();
        let path = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let Some(archive_name) = path.rsplit('/').find(|segment| !segment.is_empty()) else {
            bail!("release URL '{}' has no path segment", url);
        };
        if !path.contains("://") || path.ends_with(&format!("://{}", archive_name)) {
            bail!("release URL '{}' does not name an archive file", url);
        }

        let Some(suffix) = ARCHIVE_SUFFIXES
            .iter()
            .find(|suffix| archive_name.len() > suffix.len() && archive_name.ends_with(*suffix))
        else {
            bail!(
                "release archive '{}' has an unrecognized suffix (expected one of {})",
                archive_name,
                ARCHIVE_SUFFIXES.join(", ")
            );
        };

        Ok(Self {
            url: url.to_string(),
            archive_name: archive_name.to_string(),
            source_dir_name: archive_name[..archive_name.len() - suffix.len()].to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    pub fn source_dir_name(&self) -> &str {
        &self.source_dir_name
    }
}

impl fmt::Display for ReleaseDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl Serialize for ReleaseDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.url)
    }
}

impl<'de> Deserialize<'de> for ReleaseDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let url = String::deserialize(deserializer)?;
        ReleaseDescriptor::from_url(&url).map_err(serde::de::Error::custom)
    }
}
