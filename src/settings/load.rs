use std::collections::BTreeMap;

use toml::{Table, Value};

use crate::settings::{Section, SettingsError};

/// Name of the table inside a category that every sibling inherits from
pub const DEFAULT_TABLE: &str = "default";

/// Deep-merge `layer` into `base`, values from `layer` win
pub(super) fn merge_tables(base: &mut Table, layer: Table) {
    for (key, value) in layer {
        match value {
            Value::Table(incoming) => {
                if let Some(Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                    continue;
                }
                base.insert(key, Value::Table(incoming));
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn the merged document into flat sections, expanding category defaults into siblings
pub(super) fn expand(root: Table) -> Result<BTreeMap<String, Section>, SettingsError> {
    let mut sections = BTreeMap::new();

    for (name, value) in root {
        let Value::Table(table) = value else {
            return Err(SettingsError::Layout(format!("top-level key `{name}` must be a table")));
        };

        if table.contains_key(DEFAULT_TABLE) {
            for section in expand_category(&name, table)? {
                sections.insert(section.name().to_string(), section);
            }
        } else {
            let values = scalar_values(&name, table)?;
            sections.insert(name.clone(), Section::new(&name, None, values));
        }
    }

    Ok(sections)
}

fn expand_category(category: &str, mut table: Table) -> Result<Vec<Section>, SettingsError> {
    let default = match table.remove(DEFAULT_TABLE) {
        Some(Value::Table(default)) => scalar_values(category, default)?,
        _ => return Err(SettingsError::Layout(format!("[{category}.{DEFAULT_TABLE}] must be a table"))),
    };

    let mut sections = Vec::new();
    for (label, value) in table {
        let Value::Table(overrides) = value else {
            return Err(SettingsError::Layout(format!(
                "[{category}] is a category, `{label}` must be a table"
            )));
        };
        let mut values = default.clone();
        values.extend(scalar_values(&format!("{category}.{label}"), overrides)?);
        sections.push(Section::new(category, Some(&label), values));
    }

    Ok(sections)
}

fn scalar_values(name: &str, table: Table) -> Result<BTreeMap<String, Value>, SettingsError> {
    table
        .into_iter()
        .map(|(key, value)| match value {
            Value::Table(_) => Err(SettingsError::Layout(format!(
                "[{name}] {key} is a table, only categories with a `{DEFAULT_TABLE}` table may nest"
            ))),
            value => Ok((key, value)),
        })
        .collect()
}
