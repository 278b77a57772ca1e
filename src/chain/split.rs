use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::info;

use crate::chain::data::{Branch, FanOut};
use crate::chain::JobChain;
use crate::db::Ledger;
use crate::settings::{Override, SettingsStore};
use crate::slurm::submit::Submitter;

/// Every forest of the data chain, repeated for each split of the quasar catalog
///
/// Each split is built from its own settings snapshot with `[desi] catalog` replaced; the base
/// settings are never changed. Continuum fits of all splits run one after the other and lookup
/// tables are shared between splits.
pub struct DataSplitJobChain {
    chain: JobChain,
    fan_out: FanOut,
    catalogs: Vec<PathBuf>,
}

impl DataSplitJobChain {
    pub fn new(
        delta_dir: &Path,
        settings: &SettingsStore,
        split_catalogs: &[PathBuf],
        submitter: Box<dyn Submitter>,
    ) -> anyhow::Result<Self> {
        if split_catalogs.is_empty() {
            bail!("no split catalogs given");
        }

        let chain = JobChain::new("split", delta_dir, settings, submitter)?;
        let mut fan_out = FanOut::new(chain.site(), delta_dir);

        for (i, catalog) in split_catalogs.iter().enumerate() {
            info!("Split {i} uses catalog {}", catalog.display());
            let snapshot = settings
                .with_overrides(&[Override::new("desi", "catalog", catalog.display().to_string())])
                .with_context(|| format!("can't build settings for split {i}"))?;
            fan_out.add_branches(&snapshot, Some(&format!("split{i}")))?;
        }

        Ok(DataSplitJobChain { chain, fan_out, catalogs: split_catalogs.to_vec() })
    }

    pub fn chain(&self) -> &JobChain {
        &self.chain
    }

    pub fn catalogs(&self) -> &[PathBuf] {
        &self.catalogs
    }

    pub fn branches(&self) -> &[Branch] {
        self.fan_out.branches()
    }

    pub fn schedule(&mut self) -> anyhow::Result<()> {
        self.fan_out.schedule(&mut self.chain)
    }

    pub fn finish(&mut self, ledger: Option<&Ledger>) -> anyhow::Result<()> {
        self.chain.finish(ledger).context("can't finish the split data chain")
    }
}
