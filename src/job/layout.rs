use std::path::{Path, PathBuf};

use crate::settings::{Section, SettingsError};

/// Catalog file name without directories and the `.fits` extension
pub fn catalog_stem(catalog: &str) -> &str {
    let name = catalog.rsplit('/').next().unwrap_or(catalog);
    match name.rfind(".fits") {
        Some(end) => &name[..end],
        None => name,
    }
}

/// Where one mock realization lives under the mock root, from the `[ohio]` section
#[derive(Clone, Debug, PartialEq)]
pub struct MockLayout {
    pub rootdir: PathBuf,
    pub version: String,
    pub release: String,
    pub survey: String,
    pub catalog: String,
    pub realization: u32,
}

impl MockLayout {
    pub fn from_section(rootdir: &Path, realization: u32, ohio: &Section) -> Result<Self, SettingsError> {
        Ok(MockLayout {
            rootdir: rootdir.to_path_buf(),
            version: ohio.get_str("version")?.to_string(),
            release: ohio.get_str("release")?.to_string(),
            survey: ohio.get_str("survey")?.to_string(),
            catalog: ohio.get_str("catalog")?.to_string(),
            realization,
        })
    }

    /// `v1.2/iron/main/<catalog>/v1.2.<realization>`, relative to any root
    pub fn interm_path(&self) -> PathBuf {
        PathBuf::from(&self.version)
            .join(&self.release)
            .join(&self.survey)
            .join(catalog_stem(&self.catalog))
            .join(format!("{}.{}", self.version, self.realization))
    }

    pub fn transmissions_dir(&self) -> PathBuf {
        self.rootdir.join(self.interm_path()).join("transmissions")
    }

    /// `1` for `v1.2`
    pub fn major_version(&self) -> &str {
        self.version.trim_start_matches('v').split('.').next().unwrap_or_default()
    }
}

/// Where the observed spectra are read from, from the `[desi]` section
#[derive(Clone, Debug, PartialEq)]
pub struct DataLayout {
    pub redux: PathBuf,
    pub release: String,
    pub survey: String,
    pub catalog: String,
}

impl DataLayout {
    pub fn from_section(desi: &Section) -> Result<Self, SettingsError> {
        Ok(DataLayout {
            redux: PathBuf::from(desi.get_str("redux")?),
            release: desi.get_str("release")?.to_string(),
            survey: desi.get_str("survey")?.to_string(),
            catalog: desi.get_str("catalog")?.to_string(),
        })
    }

    /// `iron/main/<catalog>`
    pub fn interm_path(&self) -> PathBuf {
        PathBuf::from(&self.release).join(&self.survey).join(catalog_stem(&self.catalog))
    }

    pub fn healpix_dir(&self) -> PathBuf {
        self.redux.join(&self.release).join("healpix")
    }
}
