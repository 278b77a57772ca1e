use std::collections::BTreeMap;

use serde::Serialize;
use toml::Value;

use crate::settings::SettingsError;

/// Flat key → value map for one program, e.g. `[quickquasars]` or `[qsonic.lya]`
///
/// The category is `qsonic` for both `qsonic.lya` and a plain `[qsonic]` section; the label is the
/// sibling name (`lya`) and only exists for sections expanded from a category.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Section {
    #[serde(skip)]
    name: String,
    #[serde(skip)]
    category: String,
    #[serde(skip)]
    label: Option<String>,
    #[serde(flatten)]
    values: BTreeMap<String, Value>,
}

impl Section {
    pub fn new(category: &str, label: Option<&str>, values: BTreeMap<String, Value>) -> Self {
        let name = match label {
            Some(label) => format!("{category}.{label}"),
            None => category.to_string(),
        };
        Section {
            name,
            category: category.to_string(),
            label: label.map(str::to_string),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn set(&mut self, key: &str, value: Value) -> Option<Value> {
        self.values.insert(key.to_string(), value)
    }

    fn get(&self, key: &str) -> Result<&Value, SettingsError> {
        self.values.get(key).ok_or_else(|| SettingsError::MissingKey {
            section: self.name.clone(),
            key: key.to_string(),
        })
    }

    fn wrong_type(&self, key: &str, expected: &'static str) -> SettingsError {
        SettingsError::WrongType { section: self.name.clone(), key: key.to_string(), expected }
    }

    pub fn get_str(&self, key: &str) -> Result<&str, SettingsError> {
        self.get(key)?.as_str().ok_or_else(|| self.wrong_type(key, "string"))
    }

    pub fn get_int(&self, key: &str) -> Result<i64, SettingsError> {
        self.get(key)?.as_integer().ok_or_else(|| self.wrong_type(key, "integer"))
    }

    /// Non-negative integer that fits a `u32` (node and thread counts, bin numbers)
    pub fn get_count(&self, key: &str) -> Result<u32, SettingsError> {
        let value = self.get_int(key)?;
        u32::try_from(value).map_err(|_| SettingsError::InvalidValue {
            section: self.name.clone(),
            key: key.to_string(),
            reason: format!("{value} is not a valid count"),
        })
    }

    /// Floats, with integers accepted as well (`time = 1` means one hour)
    pub fn get_float(&self, key: &str) -> Result<f64, SettingsError> {
        match self.get(key)? {
            Value::Float(value) => Ok(*value),
            Value::Integer(value) => Ok(*value as f64),
            _ => Err(self.wrong_type(key, "number")),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, SettingsError> {
        self.get(key)?.as_bool().ok_or_else(|| self.wrong_type(key, "boolean"))
    }

    /// `skip` is either a boolean or a list of section names, categories or `all`
    pub fn is_skipped(&self) -> Result<bool, SettingsError> {
        match self.values.get("skip") {
            None => Ok(false),
            Some(Value::Boolean(skip)) => Ok(*skip),
            Some(Value::Array(names)) => Ok(self.is_listed(names)),
            Some(_) => Err(self.wrong_type("skip", "boolean or list")),
        }
    }

    /// `--skip qsonic qmle.lyb` skips every qsonic section and only the lyb qmle section
    pub(super) fn is_listed(&self, names: &[Value]) -> bool {
        names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| name == "all" || name == self.name || name == self.category)
    }

    pub fn get_str_or<'a>(&'a self, key: &str, fallback: &'a str) -> Result<&'a str, SettingsError> {
        match self.values.get(key) {
            Some(_) => self.get_str(key),
            None => Ok(fallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> Section {
        let values: BTreeMap<String, Value> = toml::from_str(
            r#"
            nodes = 2
            time = 1
            wave1 = 3600.5
            batch = true
            queue = "debug"
            negative = -3
            "#,
        )
        .unwrap();
        Section::new("qsonic", Some("lya"), values)
    }

    #[test]
    fn typed_getters() {
        let section = section();
        assert_eq!(section.name(), "qsonic.lya");
        assert_eq!(section.get_count("nodes").unwrap(), 2);
        assert_eq!(section.get_float("time").unwrap(), 1.0);
        assert_eq!(section.get_float("wave1").unwrap(), 3600.5);
        assert!(section.get_bool("batch").unwrap());
        assert_eq!(section.get_str("queue").unwrap(), "debug");
        assert_eq!(section.get_str_or("dla_mask", "").unwrap(), "");
    }

    #[test]
    fn type_and_presence_errors() {
        let section = section();
        assert!(matches!(section.get_str("nodes"), Err(SettingsError::WrongType { .. })));
        assert!(matches!(section.get_int("missing"), Err(SettingsError::MissingKey { .. })));
        assert!(matches!(section.get_count("negative"), Err(SettingsError::InvalidValue { .. })));
        assert!(matches!(section.get_bool("queue"), Err(SettingsError::WrongType { .. })));
    }

    #[test]
    fn skip_as_flag_or_list() {
        let mut section = section();
        assert!(!section.is_skipped().unwrap());

        section.set("skip", toml::Value::try_from(vec!["qmle", "qsonic.lyb"]).unwrap());
        assert!(!section.is_skipped().unwrap());
        section.set("skip", toml::Value::try_from(vec!["qsonic"]).unwrap());
        assert!(section.is_skipped().unwrap());
        section.set("skip", toml::Value::try_from(vec!["all"]).unwrap());
        assert!(section.is_skipped().unwrap());
        section.set("skip", Value::Boolean(true));
        assert!(section.is_skipped().unwrap());
        section.set("skip", Value::Integer(1));
        assert!(section.is_skipped().is_err());
    }
}
