use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{info, warn};

use crate::chain::{carry, JobChain};
use crate::db::Ledger;
use crate::job::layout::DataLayout;
use crate::job::lookup::SqTable;
use crate::job::qmle::Qmle;
use crate::job::qsonic::Qsonic;
use crate::job::{Job, JobKind};
use crate::settings::SettingsStore;
use crate::slurm::dependency::{Dependency, JobId};
use crate::slurm::script::Site;
use crate::slurm::submit::Submitter;

/// Continuum fit and power estimate of one forest
pub struct Branch {
    pub forest: String,
    pub qsonic: Job,
    pub qmle: Job,
}

impl Branch {
    fn sq_group(&self) -> &str {
        self.qmle.as_power_estimate().map_or("", Qmle::sq_group)
    }
}

struct Lookup {
    job: Job,
    jobid: Option<JobId>,
}

/// Branches with their lookup tables, one table per `sq_group`
pub(super) struct FanOut {
    site: Site,
    delta_dir: PathBuf,
    branches: Vec<Branch>,
    lookups: BTreeMap<String, Lookup>,
}

impl FanOut {
    pub(super) fn new(site: &Site, delta_dir: &Path) -> Self {
        FanOut { site: site.clone(), delta_dir: delta_dir.to_path_buf(), branches: Vec::new(), lookups: BTreeMap::new() }
    }

    pub(super) fn branches(&self) -> &[Branch] {
        &self.branches
    }

    /// One branch per `qsonic.<forest>` section of `settings`
    ///
    /// With a `tag`, output folders and job names are tagged so branches built from several
    /// settings snapshots don't collide.
    pub(super) fn add_branches(&mut self, settings: &SettingsStore, tag: Option<&str>) -> anyhow::Result<()> {
        let layout = DataLayout::from_section(settings.section("desi")?)?;
        let sq_root = self.delta_dir.join("sq");

        for section in settings.category("qsonic") {
            let forest = section.label().unwrap_or_default().to_string();
            let foldername = match tag {
                Some(tag) => format!("{forest}-{tag}"),
                None => forest.clone(),
            };

            let fit = Qsonic::for_data(section, &foldername, &self.delta_dir, &layout)?;
            let qmle_section = settings
                .section(&format!("qmle.{forest}"))
                .with_context(|| format!("[{}] has no power estimate settings", section.name()))?;
            let estimate = Qmle::new(qmle_section, &fit, &sq_root)?;
            self.add_lookup(settings, &estimate, &sq_root)?;
            info!("Adding {} branch with lookup tables {}", foldername, estimate.sq_group());

            let mut qsonic = Job::new(section, &self.site, JobKind::ContinuumFit(fit))?;
            let mut qmle = Job::new(qmle_section, &self.site, JobKind::PowerEstimate(estimate))?;
            if let Some(tag) = tag {
                qsonic = qsonic.tagged(tag);
                qmle = qmle.tagged(tag);
            }
            self.branches.push(Branch { forest, qsonic, qmle });
        }

        Ok(())
    }

    /// Memoised by group; the first forest of a group decides the binning
    fn add_lookup(&mut self, settings: &SettingsStore, estimate: &Qmle, sq_root: &Path) -> anyhow::Result<()> {
        let group = estimate.sq_group();
        if let Some(lookup) = self.lookups.get(group) {
            let shared = lookup.job.as_lookup_table().map(SqTable::binning);
            if shared != Some(estimate.binning()) {
                warn!("Lookup table group {group} is shared by forests with different binning, using the first one");
            }
            return Ok(());
        }

        let table = SqTable::new(group, sq_root, estimate.binning().clone());
        let job = Job::new(settings.section("sq")?, &self.site, JobKind::LookupTable(table))?.tagged(group);
        self.lookups.insert(group.to_string(), Lookup { job, jobid: None });
        Ok(())
    }

    /// Continuum fits run one after the other; each estimate waits on its fit and its lookup tables
    pub(super) fn schedule(&mut self, chain: &mut JobChain) -> anyhow::Result<()> {
        let mut fit_jobid = JobId::NOT_SUBMITTED;

        for branch in self.branches.iter_mut() {
            let sq_jobid = match self.lookups.get_mut(branch.sq_group()) {
                Some(Lookup { jobid: Some(jobid), .. }) => *jobid,
                Some(lookup) => {
                    let jobid = chain.schedule_lookup(&mut lookup.job)?;
                    lookup.jobid = Some(jobid);
                    jobid
                }
                None => JobId::NOT_SUBMITTED,
            };

            let jobid = chain.schedule_job(&mut branch.qsonic, &Dependency::from(fit_jobid), false)?;
            fit_jobid = carry(fit_jobid, jobid);

            let qmle_jobid = chain.schedule_job(&mut branch.qmle, &Dependency::after_ok([jobid, sq_jobid]), false)?;
            if qmle_jobid.is_submitted() {
                if let Some(command) = branch.qmle.as_power_estimate().and_then(Qmle::bootstrap_command) {
                    chain.add_extra_command(command);
                }
            }
        }

        Ok(())
    }
}

/// One continuum fit and power estimate per forest of the observed spectra
pub struct DataJobChain {
    chain: JobChain,
    fan_out: FanOut,
}

impl DataJobChain {
    pub fn new(delta_dir: &Path, settings: &SettingsStore, submitter: Box<dyn Submitter>) -> anyhow::Result<Self> {
        let chain = JobChain::new("data", delta_dir, settings, submitter)?;
        let mut fan_out = FanOut::new(chain.site(), delta_dir);
        fan_out.add_branches(settings, None)?;
        if fan_out.branches().is_empty() {
            warn!("No [qsonic.<forest>] sections, nothing to do");
        }
        Ok(DataJobChain { chain, fan_out })
    }

    pub fn chain(&self) -> &JobChain {
        &self.chain
    }

    pub fn branches(&self) -> &[Branch] {
        self.fan_out.branches()
    }

    pub fn schedule(&mut self) -> anyhow::Result<()> {
        self.fan_out.schedule(&mut self.chain)
    }

    pub fn finish(&mut self, ledger: Option<&Ledger>) -> anyhow::Result<()> {
        self.chain.finish(ledger).context("can't finish the data chain")
    }
}
