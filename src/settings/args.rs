use clap::Args;
use log::{debug, warn};
use serde::Serialize;
use toml::{Table, Value};

use crate::settings::{Section, SettingsError, SettingsStore};

/// Section keys whose command-line flag has a different name, as (category, key, flag)
///
/// Several programs share key names (`base_seed`, `suffix`, `skip`) but need separate flags.
static KEY_MAP: &[(&str, &str, &str)] = &[
    ("quickquasars", "base_seed", "base_seed_qq"),
    ("quickquasars", "skip", "skip_qq"),
    ("quickquasars", "suffix", "suffix_qq"),
    ("quickquasars", "extra_opts", "extra_opts_qq"),
    ("transmissions", "base_seed", "base_seed_transmissions"),
    ("transmissions", "skip", "no_transmissions"),
    ("qsonic", "suffix", "suffix_qsonic"),
    ("qsonic", "extra_opts", "extra_opts_qsonic"),
    ("qmle", "suffix", "suffix_qmle"),
    ("qmle", "extra_opts", "extra_opts_qmle"),
];

/// Keys that change how a job runs but not what it writes, so they don't need a new suffix
static RESOURCE_KEYS: &[&str] = &["nodes", "nthreads", "time", "queue", "batch", "skip"];

const SKIP_KEY: &str = "skip";
const SUFFIX_KEY: &str = "suffix";
const EXTRA_OPTS_KEY: &str = "extra_opts";

/// Command-line flag name for a section key
pub fn arg_key<'a>(category: &str, key: &'a str) -> &'a str {
    KEY_MAP
        .iter()
        .find(|(prg, prg_key, _)| *prg == category && *prg_key == key)
        .map_or(key, |(_, _, arg)| arg)
}

/// Switches left off arrive as `false`, empty text or an empty list and never override a setting;
/// options that weren't given are missing from the table altogether
fn is_set(value: &Value) -> bool {
    match value {
        Value::Boolean(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Table(table) => !table.is_empty(),
        Value::Integer(_) | Value::Float(_) | Value::Datetime(_) => true,
    }
}

impl Section {
    /// Apply command-line values and report whether the suffix warning applies
    pub(super) fn apply_args(&mut self, args: &Table) -> bool {
        let mut modified = false;
        let mut suffix_changed = false;
        let keys: Vec<String> = self.keys().cloned().collect();

        for key in keys {
            let value = match args.get(arg_key(self.category(), &key)).filter(|value| is_set(value)) {
                Some(value) => value,
                // sections with their own skip flag still follow the shared --skip list
                None if key == SKIP_KEY => match args.get(SKIP_KEY).filter(|value| is_set(value)) {
                    Some(value) => value,
                    None => continue,
                },
                None => continue,
            };

            let new_value = match (key.as_str(), value) {
                (SKIP_KEY, Value::Array(names)) => {
                    if !self.is_listed(names) {
                        continue;
                    }
                    Value::Boolean(true)
                }
                (EXTRA_OPTS_KEY, Value::String(extra)) => match self.value(&key).and_then(Value::as_str) {
                    Some(existing) if !existing.is_empty() => Value::String(format!("{existing} {extra}")),
                    _ => Value::String(extra.clone()),
                },
                _ => value.clone(),
            };

            if self.value(&key) == Some(&new_value) {
                continue;
            }

            debug!("[{}] {key} = {new_value}", self.name());
            self.set(&key, new_value);

            if key == SUFFIX_KEY {
                suffix_changed = true;
            } else if !RESOURCE_KEYS.contains(&key.as_str()) {
                modified = true;
            }
        }

        modified && self.contains(SUFFIX_KEY) && !suffix_changed
    }
}

impl SettingsStore {
    /// Override settings with command-line values, returning the sections that got a suffix warning
    pub fn update_from_args(&mut self, args: &Table) -> Vec<String> {
        let mut warned = Vec::new();
        for section in self.sections.values_mut() {
            if section.apply_args(args) {
                warn!(
                    "You have changed default settings of {}, but didn't provide a suffix to distinguish its outputs",
                    section.name()
                );
                warned.push(section.name().to_string());
            }
        }
        warned
    }
}

/// Command-line overrides shared by every chain
///
/// Field names are the flag names looked up through the key-rename table, so they must match the
/// section keys (or their renamed form) exactly.
#[derive(Args, Debug, Default, Serialize)]
pub struct SettingsArgs {
    /// Mock version, e.g. v1.2
    #[arg(long, help_heading = "Folder settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[arg(long, help_heading = "Folder settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[arg(long, help_heading = "Folder settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survey: Option<String>,
    /// Quasar catalog
    #[arg(long, help_heading = "Folder settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,

    /// Number of exposures
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nexp: Option<i64>,
    /// Could be 'random' or a file
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dla: Option<String>,
    /// Add BAL features with this probability, typical: 0.16
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bal: Option<f64>,
    /// Boring mocks
    #[arg(long, help_heading = "Quickquasars settings")]
    pub boring: bool,
    /// Minimum quasar redshift
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zmin_qq: Option<f64>,
    /// True continuum wavelength steps
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cont_dwave: Option<f64>,
    /// Environment command for quickquasars
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_command_qq: Option<String>,
    /// Realization number is concatenated to the right
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_seed_qq: Option<i64>,
    /// Don't run quickquasars
    #[arg(long, help_heading = "Quickquasars settings")]
    pub skip_qq: bool,
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix_qq: Option<String>,
    /// Appended to the quickquasars command line
    #[arg(long, help_heading = "Quickquasars settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_opts_qq: Option<String>,

    /// Realization number is concatenated to the left
    #[arg(long, help_heading = "Transmission file settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_seed_transmissions: Option<i64>,
    /// Do not generate transmission files
    #[arg(long, help_heading = "Transmission file settings")]
    pub no_transmissions: bool,

    /// First observed wavelength edge
    #[arg(long, help_heading = "QSOnic settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave1: Option<f64>,
    /// Last observed wavelength edge
    #[arg(long, help_heading = "QSOnic settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave2: Option<f64>,
    /// First forest wavelength edge
    #[arg(long, help_heading = "QSOnic settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forest_w1: Option<f64>,
    /// Last forest wavelength edge
    #[arg(long, help_heading = "QSOnic settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forest_w2: Option<f64>,
    #[arg(long, help_heading = "QSOnic settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cont_order: Option<i64>,
    #[arg(long, help_heading = "QSOnic settings")]
    pub skip_resomat: bool,
    /// DLA catalog to mask, or 'truth' for the simulated DLAs of a mock
    #[arg(long, help_heading = "Masking options")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dla_mask: Option<String>,
    /// Mask BALs (assumes they are in the catalog)
    #[arg(long, help_heading = "Masking options")]
    pub bal_mask: bool,
    /// Sky mask file
    #[arg(long, help_heading = "Masking options")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sky_mask: Option<String>,
    #[arg(long, help_heading = "QSOnic settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix_qsonic: Option<String>,
    /// Appended to the qsonic-fit command line
    #[arg(long, help_heading = "QSOnic settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_opts_qsonic: Option<String>,

    #[arg(long, help_heading = "QMLE settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix_qmle: Option<String>,
    /// Number of bootstrap realizations, 0 disables the bootstrap covariance
    #[arg(long, help_heading = "QMLE settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nboot: Option<i64>,
    #[arg(long, help_heading = "QMLE settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub niter: Option<i64>,
    /// Use the delta file list with this SNR cut
    #[arg(long, help_heading = "QMLE settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr_cut: Option<i64>,
    #[arg(long, help_heading = "QMLE settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_opts_qmle: Option<String>,

    /// Applied to every job
    #[arg(long, help_heading = "SLURM settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<i64>,
    #[arg(long, help_heading = "SLURM settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nthreads: Option<i64>,
    /// In hours
    #[arg(long, help_heading = "SLURM settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[arg(long, help_heading = "SLURM settings")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Submit the jobs
    #[arg(long, help_heading = "SLURM settings")]
    pub batch: bool,
    /// Sections or categories to skip, 'all' skips everything
    #[arg(long, value_delimiter = ',', num_args = 1.., help_heading = "SLURM settings")]
    pub skip: Vec<String>,
}

impl SettingsArgs {
    /// Flat table of flag name → value, unset options are left out
    pub fn to_arg_map(&self) -> Result<Table, SettingsError> {
        match Value::try_from(self)? {
            Value::Table(table) => Ok(table),
            _ => Ok(Table::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(text: &str) -> Table {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn renamed_keys_fall_back_to_identity() {
        assert_eq!(arg_key("quickquasars", "base_seed"), "base_seed_qq");
        assert_eq!(arg_key("transmissions", "skip"), "no_transmissions");
        assert_eq!(arg_key("qsonic", "suffix"), "suffix_qsonic");
        assert_eq!(arg_key("qsonic", "wave1"), "wave1");
        assert_eq!(arg_key("ohio", "catalog"), "catalog");
    }

    #[test]
    fn unrelated_change_without_suffix_warns() {
        let mut settings = SettingsStore::defaults().unwrap();
        let warned = settings.update_from_args(&args("cont_order = 2\n"));

        assert_eq!(warned, vec!["qsonic.lya".to_string()]);
        assert_eq!(settings.section("qsonic.lya").unwrap().get_int("cont_order").unwrap(), 2);
    }

    #[test]
    fn changed_suffix_silences_warning() {
        let mut settings = SettingsStore::defaults().unwrap();
        let warned = settings.update_from_args(&args("cont_order = 2\nsuffix_qsonic = \"-o2\"\n"));

        assert!(warned.is_empty());
        assert_eq!(settings.section("qsonic.lya").unwrap().get_str("suffix").unwrap(), "-o2");
    }

    #[test]
    fn resource_and_unset_values_do_not_warn() {
        let mut settings = SettingsStore::defaults().unwrap();
        let warned = settings.update_from_args(&args(
            "nodes = 4\nbatch = true\nboring = false\nsuffix_qq = \"\"\n",
        ));

        assert!(warned.is_empty());
        let qq = settings.section("quickquasars").unwrap();
        assert_eq!(qq.get_int("nodes").unwrap(), 4);
        assert!(qq.get_bool("batch").unwrap());
        assert!(!qq.get_bool("boring").unwrap());
        assert_eq!(qq.get_str("suffix").unwrap(), "");
    }

    #[test]
    fn quickquasars_seed_is_renamed() {
        let mut settings = SettingsStore::defaults().unwrap();
        settings.update_from_args(&args("base_seed_qq = 1234\nbase_seed_transmissions = 99\n"));

        assert_eq!(settings.section("quickquasars").unwrap().get_int("base_seed").unwrap(), 1234);
        assert_eq!(settings.section("transmissions").unwrap().get_int("base_seed").unwrap(), 99);
    }

    #[test]
    fn skip_list_matches_name_category_or_all() {
        let mut settings = SettingsStore::defaults().unwrap();
        settings.update_from_args(&args("skip = [\"qsonic\", \"sq\"]\n"));
        assert!(settings.section("qsonic.lya").unwrap().get_bool("skip").unwrap());
        assert!(settings.section("sq").unwrap().get_bool("skip").unwrap());
        assert!(!settings.section("qmle.lya").unwrap().get_bool("skip").unwrap());

        let mut settings = SettingsStore::defaults().unwrap();
        settings.update_from_args(&args("skip = [\"qmle.lya\"]\n"));
        assert!(settings.section("qmle.lya").unwrap().get_bool("skip").unwrap());
        assert!(!settings.section("qsonic.lya").unwrap().get_bool("skip").unwrap());

        let mut settings = SettingsStore::defaults().unwrap();
        settings.update_from_args(&args("skip = [\"all\"]\n"));
        for name in ["qsonic.lya", "qmle.lya", "sq"] {
            assert!(settings.section(name).unwrap().get_bool("skip").unwrap());
        }
        // their own flags are renamed, the shared list still applies
        assert!(settings.section("transmissions").unwrap().get_bool("skip").unwrap());
        assert!(settings.section("quickquasars").unwrap().get_bool("skip").unwrap());

        let mut settings = SettingsStore::defaults().unwrap();
        settings.update_from_args(&args("skip = [\"quickquasars\"]\n"));
        assert!(settings.section("quickquasars").unwrap().get_bool("skip").unwrap());
        assert!(!settings.section("transmissions").unwrap().get_bool("skip").unwrap());
    }

    #[test]
    fn zero_is_a_valid_override() {
        let layer = "[qsonic.default]\ncont_order = 2\n[qmle.default]\nnboot = 100\nsnr_cut = 3\n";
        let mut settings = SettingsStore::from_layers(&[super::super::DEFAULTS, layer]).unwrap();
        let parsed = SettingsArgs { cont_order: Some(0), nboot: Some(0), snr_cut: Some(0), ..Default::default() };
        settings.update_from_args(&parsed.to_arg_map().unwrap());

        assert_eq!(settings.section("qsonic.lya").unwrap().get_int("cont_order").unwrap(), 0);
        let qmle = settings.section("qmle.lya").unwrap();
        assert_eq!(qmle.get_int("nboot").unwrap(), 0);
        assert_eq!(qmle.get_int("snr_cut").unwrap(), 0);
    }

    #[test]
    fn boolean_skip_flags_use_renamed_keys() {
        let mut settings = SettingsStore::defaults().unwrap();
        settings.update_from_args(&args("no_transmissions = true\n"));
        assert!(settings.section("transmissions").unwrap().get_bool("skip").unwrap());
        assert!(!settings.section("quickquasars").unwrap().get_bool("skip").unwrap());
    }

    #[test]
    fn extra_options_are_appended() {
        let layer = "[quickquasars]\nextra_opts = \"--desi-footprint\"\n";
        let mut settings = SettingsStore::from_layers(&[super::super::DEFAULTS, layer]).unwrap();
        settings.update_from_args(&args("extra_opts_qq = \"--nmax 10\"\nsuffix_qq = \"-n10\"\n"));

        let qq = settings.section("quickquasars").unwrap();
        assert_eq!(qq.get_str("extra_opts").unwrap(), "--desi-footprint --nmax 10");
    }

    #[test]
    fn clap_arguments_become_a_flat_table() {
        let parsed = SettingsArgs {
            nexp: Some(4),
            boring: true,
            suffix_qq: Some("-b".to_string()),
            skip: vec!["qmle".to_string()],
            ..Default::default()
        };
        let table = parsed.to_arg_map().unwrap();

        assert_eq!(table.get("nexp"), Some(&Value::Integer(4)));
        assert_eq!(table.get("boring"), Some(&Value::Boolean(true)));
        assert_eq!(table.get("batch"), Some(&Value::Boolean(false)));
        assert!(table.get("dla").is_none());
    }
}
