//! The flat image-version map kept next to the environment configuration.

use std::{fs::File, path::{Path, PathBuf}};

use indexmap::IndexMap;
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to open versions file {path}", path = path.display()))]
    OpenFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse versions file {path}", path = path.display()))]
    ParseFile {
        source: serde_json::Error,
        path: PathBuf,
    },

    #[snafu(display("no version is defined for image {image:?}"))]
    UnknownImage { image: String },
}

/// Maps image names (without registry) to version strings, loaded from the
/// `versions.json` the configuration directory carries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct VersionMap(IndexMap<String, String>);

impl VersionMap {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).context(OpenFileSnafu { path })?;
        serde_json::from_reader(file).context(ParseFileSnafu { path })
    }

    /// The pinned version of `image`; an unlisted image is an error, not a
    /// default.
    pub fn version_of(&self, image: &str) -> Result<&str> {
        self.0
            .get(image)
            .map(String::as_str)
            .context(UnknownImageSnafu { image })
    }

    pub fn insert(&mut self, image: impl Into<String>, version: impl Into<String>) {
        self.0.insert(image.into(), version.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for VersionMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(image, version)| (image.into(), version.into()))
                .collect(),
        )
    }
}
