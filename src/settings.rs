//! Layered, section-keyed configuration
//!
//! Settings are TOML documents. The built-in defaults are read first, then every file passed on
//! the command line is merged on top of them (later files win). Top-level tables are sections,
//! e.g. `[quickquasars]`. A table that holds a `default` table is a category: its `default` values
//! are merged into every sibling, so `[qsonic.default]` provides the base for `[qsonic.lya]` and
//! `[qsonic.lyb]`, which become the sections `qsonic.lya` and `qsonic.lyb`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;
use thiserror::Error;
use toml::{Table, Value};

/// Typed access to one flat section
pub mod section;

/// Merge layers and expand category defaults
mod load;

/// Command-line overrides and the key-rename table
pub mod args;

pub use args::SettingsArgs;
pub use section::Section;

/// included default settings
static DEFAULTS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/settings/defaults.toml"));

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("can't read settings file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings are not valid TOML")]
    Parse(#[from] toml::de::Error),
    #[error("settings section [{0}] is not defined")]
    MissingSection(String),
    #[error("[{section}] has no key `{key}`")]
    MissingKey { section: String, key: String },
    #[error("[{section}] {key} should be a {expected}")]
    WrongType {
        section: String,
        key: String,
        expected: &'static str,
    },
    #[error("[{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },
    #[error("invalid settings layout: {0}")]
    Layout(String),
    #[error("command-line overrides can't be converted to settings values")]
    Args(#[from] toml::ser::Error),
}

/// A single value replaced in a settings snapshot
#[derive(Clone, Debug, PartialEq)]
pub struct Override {
    pub section: String,
    pub key: String,
    pub value: Value,
}

impl Override {
    pub fn new(section: impl Into<String>, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Override { section: section.into(), key: key.into(), value: value.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SettingsStore {
    sections: BTreeMap<String, Section>,
}

impl SettingsStore {
    /// Built-in defaults only
    pub fn defaults() -> Result<Self, SettingsError> {
        Self::from_layers(&[DEFAULTS])
    }

    /// Built-in defaults with each file in `paths` merged on top
    pub fn load(paths: &[PathBuf]) -> Result<Self, SettingsError> {
        let mut layers = vec![DEFAULTS.to_string()];
        for path in paths {
            layers.push(read_layer(path)?);
        }
        Self::from_layers(&layers)
    }

    /// Built-in defaults with one inline document on top
    #[cfg(test)]
    pub fn defaults_with(layer: &str) -> Result<Self, SettingsError> {
        Self::from_layers(&[DEFAULTS, layer])
    }

    /// Merge TOML documents in order, then expand category defaults
    pub fn from_layers<S: AsRef<str>>(layers: &[S]) -> Result<Self, SettingsError> {
        let mut root = Table::new();
        for layer in layers {
            let table: Table = toml::from_str(layer.as_ref())?;
            load::merge_tables(&mut root, table);
        }
        Ok(SettingsStore { sections: load::expand(root)? })
    }

    pub fn section(&self, name: &str) -> Result<&Section, SettingsError> {
        self.sections
            .get(name)
            .ok_or_else(|| SettingsError::MissingSection(name.to_string()))
    }

    /// Concrete sections of a category, e.g. `qsonic.lya` and `qsonic.lyb` for `qsonic`
    pub fn category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Section> + 'a {
        self.sections
            .values()
            .filter(move |section| section.category() == category && section.label().is_some())
    }

    /// An independent copy with `overrides` applied; `self` is left untouched
    pub fn with_overrides(&self, overrides: &[Override]) -> Result<Self, SettingsError> {
        let mut snapshot = self.clone();
        for item in overrides {
            let section = snapshot
                .sections
                .get_mut(&item.section)
                .ok_or_else(|| SettingsError::MissingSection(item.section.clone()))?;
            section.set(&item.key, item.value.clone());
        }
        Ok(snapshot)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.sections)
    }
}

impl fmt::Display for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for section in self.sections.values() {
            writeln!(f, "{}", section.name())?;
            for (key, value) in section.iter() {
                writeln!(f, "  {key}: {value}")?;
            }
            writeln!(f, "---------------------")?;
        }
        Ok(())
    }
}

fn read_layer(path: &Path) -> Result<String, SettingsError> {
    info!("Reading settings from {}", path.display());
    fs::read_to_string(path).map_err(|source| SettingsError::Read { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_expand_categories() {
        let settings = SettingsStore::defaults().unwrap();
        let lya = settings.section("qsonic.lya").unwrap();
        assert_eq!(lya.category(), "qsonic");
        assert_eq!(lya.label(), Some("lya"));
        assert_eq!(lya.get_float("wave1").unwrap(), 3600.0);
        assert!(settings.section("qsonic.default").is_err());
        assert_eq!(settings.category("qsonic").count(), 1);
    }

    #[test]
    fn later_layers_win_and_siblings_inherit_defaults() {
        let user = r#"
            [quickquasars]
            nexp = 4

            [qsonic.default]
            cont_order = 0

            [qsonic.lyb]
            forest_w1 = 920.0
            forest_w2 = 1020.0
        "#;
        let settings = SettingsStore::from_layers(&[DEFAULTS, user]).unwrap();

        let qq = settings.section("quickquasars").unwrap();
        assert_eq!(qq.get_int("nexp").unwrap(), 4);
        assert_eq!(qq.get_float("zmin_qq").unwrap(), 1.8);

        let lyb = settings.section("qsonic.lyb").unwrap();
        assert_eq!(lyb.get_int("cont_order").unwrap(), 0);
        assert_eq!(lyb.get_float("forest_w1").unwrap(), 920.0);
        assert_eq!(lyb.get_float("wave2").unwrap(), 6600.0);

        let lya = settings.section("qsonic.lya").unwrap();
        assert_eq!(lya.get_int("cont_order").unwrap(), 0);
        assert_eq!(lya.get_float("forest_w1").unwrap(), 1040.0);

        let forests: Vec<&str> = settings.category("qsonic").filter_map(Section::label).collect();
        assert_eq!(forests, vec!["lya", "lyb"]);
    }

    #[test]
    fn nested_table_outside_category_is_rejected() {
        let err = SettingsStore::from_layers(&["[ohio.sub]\nversion = \"v1\"\n"]).unwrap_err();
        assert!(matches!(err, SettingsError::Layout(_)));
    }

    #[test]
    fn overrides_make_independent_snapshots() {
        let base = SettingsStore::defaults().unwrap();
        let snapshot = base
            .with_overrides(&[Override::new("desi", "catalog", "/data/split-0.fits")])
            .unwrap();

        assert_eq!(snapshot.section("desi").unwrap().get_str("catalog").unwrap(), "/data/split-0.fits");
        assert_ne!(base.section("desi").unwrap().get_str("catalog").unwrap(), "/data/split-0.fits");
        assert!(base.with_overrides(&[Override::new("nope", "catalog", "x")]).is_err());
    }

    #[test]
    fn json_snapshot_holds_every_section() {
        let settings = SettingsStore::defaults().unwrap();
        let json: serde_json::Value = serde_json::from_str(&settings.to_json().unwrap()).unwrap();
        assert_eq!(json["quickquasars"]["nexp"], 1);
        assert_eq!(json["qmle.lya"]["sq_group"], "ly");
    }
}
