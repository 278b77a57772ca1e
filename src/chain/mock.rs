use std::path::Path;

use anyhow::Context;
use log::info;

use crate::chain::{carry, JobChain};
use crate::db::Ledger;
use crate::job::layout::MockLayout;
use crate::job::lookup::SqTable;
use crate::job::qmle::Qmle;
use crate::job::qsonic::Qsonic;
use crate::job::quickquasars::Quickquasars;
use crate::job::transmissions::Transmissions;
use crate::job::{Job, JobKind};
use crate::settings::SettingsStore;
use crate::slurm::dependency::{Dependency, JobId};
use crate::slurm::submit::Submitter;

/// Transmissions → quickquasars → qsonic → qmle, one realization at a time
///
/// Continuum fitting and power estimation only run when a delta directory is given. The lookup
/// tables are shared by every realization and submitted once.
pub struct MockJobChain {
    chain: JobChain,
    transmissions: Job,
    quickquasars: Job,
    qsonic: Option<Job>,
    qmle: Option<Job>,
    sq: Option<Job>,
    sq_jobid: Option<JobId>,
}

impl MockJobChain {
    pub fn new(
        rootdir: &Path,
        realization: u32,
        delta_dir: Option<&Path>,
        forest: &str,
        settings: &SettingsStore,
        submitter: Box<dyn Submitter>,
    ) -> anyhow::Result<Self> {
        let chain = JobChain::new(&format!("mock-{realization}"), rootdir, settings, submitter)?;
        let site = chain.site().clone();
        let layout = MockLayout::from_section(rootdir, realization, settings.section("ohio")?)?;

        let section = settings.section("transmissions")?;
        let transmissions = Transmissions::new(section, layout.clone())?;
        let transmissions = Job::new(section, &site, JobKind::Transmission(transmissions))?;

        let qq_section = settings.section("quickquasars")?;
        let qq = Quickquasars::new(qq_section, layout)?;

        let (mut qsonic, mut qmle, mut sq) = (None, None, None);
        if let Some(delta_dir) = delta_dir {
            let section = settings.section(&format!("qsonic.{forest}"))?;
            let fit = Qsonic::for_mock(section, delta_dir, &qq)?;

            let sq_root = delta_dir.join("sq");
            let qmle_section = settings.section(&format!("qmle.{forest}"))?;
            let estimate = Qmle::new(qmle_section, &fit, &sq_root)?;
            let table = SqTable::new(estimate.sq_group(), &sq_root, estimate.binning().clone());

            sq = Some(Job::new(settings.section("sq")?, &site, JobKind::LookupTable(table))?.tagged(estimate.sq_group()));
            qmle = Some(Job::new(qmle_section, &site, JobKind::PowerEstimate(estimate))?);
            qsonic = Some(Job::new(section, &site, JobKind::ContinuumFit(fit))?);
        } else {
            info!("No delta directory, continuum fitting and power estimation are left out");
        }

        let quickquasars = Job::new(qq_section, &site, JobKind::Simulation(qq))?;
        Ok(MockJobChain { chain, transmissions, quickquasars, qsonic, qmle, sq, sq_jobid: None })
    }

    pub fn chain(&self) -> &JobChain {
        &self.chain
    }

    pub fn quickquasars(&self) -> &Job {
        &self.quickquasars
    }

    pub fn qsonic(&self) -> Option<&Job> {
        self.qsonic.as_ref()
    }

    /// Schedule the current realization, returning the id the next stage would depend on
    pub fn schedule(&mut self) -> anyhow::Result<JobId> {
        let sq_jobid = match (self.sq_jobid, self.sq.as_mut()) {
            (Some(jobid), _) => jobid,
            (None, Some(sq)) => {
                let jobid = self.chain.schedule_lookup(sq)?;
                self.sq_jobid = Some(jobid);
                jobid
            }
            (None, None) => JobId::NOT_SUBMITTED,
        };

        let mut last = self.chain.schedule_job(&mut self.transmissions, &Dependency::none(), false)?;
        let jobid = self.chain.schedule_job(&mut self.quickquasars, &Dependency::from(last), false)?;
        last = carry(last, jobid);

        if let Some(qsonic) = self.qsonic.as_mut() {
            let jobid = self.chain.schedule_job(qsonic, &Dependency::from(last), false)?;
            last = carry(last, jobid);
        }

        if let Some(qmle) = self.qmle.as_mut() {
            let jobid = self.chain.schedule_job(qmle, &Dependency::after_ok([last, sq_jobid]), false)?;
            if jobid.is_submitted() {
                if let Some(command) = qmle.as_power_estimate().and_then(Qmle::bootstrap_command) {
                    self.chain.add_extra_command(command);
                }
            }
            last = carry(last, jobid);
        }

        Ok(last)
    }

    /// Move every job to the next realization
    pub fn inc_realization(&mut self) {
        self.transmissions.inc_realization();
        self.quickquasars.inc_realization();
        if let Some(qsonic) = self.qsonic.as_mut() {
            qsonic.follow(&self.quickquasars);
            if let Some(qmle) = self.qmle.as_mut() {
                qmle.follow(qsonic);
            }
        }

        if let Some(qq) = self.quickquasars.as_simulation() {
            let realization = qq.layout().realization;
            info!("Moved to realization {realization}");
            self.chain.rename(&format!("mock-{realization}"));
        }
    }

    pub fn finish(&mut self, ledger: Option<&Ledger>) -> anyhow::Result<()> {
        self.chain.finish(ledger).context("can't finish the mock chain")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::slurm::submit::fake::FakeSubmitter;

    const ALL_BATCH: &str = r#"
        [transmissions]
        batch = true
        [quickquasars]
        batch = true
        [qsonic.default]
        batch = true
        [qmle.default]
        batch = true
        nboot = 100
        [sq]
        batch = true
    "#;

    fn mock(dir: &Path, layer: &str, submitter: &FakeSubmitter) -> MockJobChain {
        let settings = SettingsStore::defaults_with(layer).unwrap();
        let delta_dir = dir.join("deltas");
        MockJobChain::new(&dir.join("mocks"), 0, Some(&delta_dir), "lya", &settings, Box::new(submitter.clone()))
            .unwrap()
    }

    #[test]
    fn full_chain_order_and_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = FakeSubmitter::new(100);
        let mut mock = mock(dir.path(), ALL_BATCH, &submitter);

        let last = mock.schedule().unwrap();
        let submissions = submitter.submissions();
        let names: Vec<String> = mock.chain().submissions().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["sq-ly", "transmissions", "quickquasars", "qsonic.lya", "qmle.lya"]);

        // sq 100 (held), transmissions 101, quickquasars 102, qsonic 103, qmle 104
        assert!(submissions[0].2);
        assert_eq!(submissions[2].1.as_deref(), Some("--dependency=afterok:101"));
        assert_eq!(submissions[3].1.as_deref(), Some("--dependency=afterok:102"));
        assert_eq!(submissions[4].1.as_deref(), Some("--dependency=afterok:103:100"));
        assert_eq!(last, JobId(104));
        assert_eq!(mock.chain().held(), &[JobId(100)]);
        assert_eq!(mock.chain().extra_commands().len(), 1);
    }

    #[test]
    fn skipped_stages_pass_their_upstream_on() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = FakeSubmitter::new(100);
        let layer = ALL_BATCH.replace("[quickquasars]\n        batch = true", "[quickquasars]\n        skip = true");
        let mut mock = mock(dir.path(), &layer, &submitter);

        mock.schedule().unwrap();
        let submissions = submitter.submissions();
        // sq 100, transmissions 101, qsonic 102 waits on the transmissions
        assert_eq!(submissions.len(), 4);
        assert_eq!(submissions[2].1.as_deref(), Some("--dependency=afterok:101"));
        assert!(!mock.quickquasars().as_simulation().unwrap().desibase_dir().exists());
    }

    #[test]
    fn realizations_share_one_lookup_table() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = FakeSubmitter::new(100);
        let mut mock = mock(dir.path(), ALL_BATCH, &submitter);

        mock.schedule().unwrap();
        let first = mock.qsonic().unwrap().script().unwrap().to_path_buf();
        mock.inc_realization();
        mock.schedule().unwrap();
        mock.finish(None).unwrap();

        let scripts: Vec<_> = submitter.submissions().into_iter().map(|s| s.0).collect();
        assert_eq!(scripts.iter().filter(|s| s.ends_with("run-sq.sl")).count(), 1);
        assert_eq!(submitter.releases(), vec![vec![JobId(100)]]);

        let second = mock.qsonic().unwrap().script().unwrap();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().contains("/v1.2.1/"));
        assert!(fs::read_to_string(dir.path().join("mocks").join("run-p1d-postprocess.sl"))
            .unwrap()
            .contains("regularizeBootstrapCov.py"));
    }

    #[test]
    fn ledger_rows_carry_their_realization() {
        let dir = tempfile::tempdir().unwrap();
        let submitter = FakeSubmitter::new(100);
        let mut mock = mock(dir.path(), ALL_BATCH, &submitter);

        mock.schedule().unwrap();
        mock.inc_realization();
        mock.schedule().unwrap();
        let ledger = Ledger::open_in_memory().unwrap();
        mock.finish(Some(&ledger)).unwrap();

        let first: Vec<String> = ledger.list(Some("mock-0")).unwrap().into_iter().map(|row| row.name).collect();
        assert_eq!(first, vec!["sq-ly", "transmissions", "quickquasars", "qsonic.lya", "qmle.lya"]);

        let second: Vec<String> = ledger.list(Some("mock-1")).unwrap().into_iter().map(|row| row.name).collect();
        assert_eq!(second, vec!["transmissions", "quickquasars", "qsonic.lya", "qmle.lya", "p1d-postprocess"]);
        assert_eq!(mock.chain().name(), "mock-1");
    }

    #[test]
    fn finished_lookup_tables_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("deltas").join("sq").join("ly");
        fs::create_dir_all(&marker).unwrap();
        fs::write(marker.join("sq-complete"), "").unwrap();

        let submitter = FakeSubmitter::new(100);
        let mut mock = mock(dir.path(), ALL_BATCH, &submitter);
        mock.schedule().unwrap();

        let submissions = submitter.submissions();
        assert_eq!(submissions.len(), 4);
        assert_eq!(submissions[3].1.as_deref(), Some("--dependency=afterok:102"));
        assert!(mock.chain().held().is_empty());
    }

    #[test]
    fn without_delta_dir_only_simulates() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::defaults_with(ALL_BATCH).unwrap();
        let submitter = FakeSubmitter::new(100);
        let mut mock = MockJobChain::new(dir.path(), 3, None, "lya", &settings, Box::new(submitter.clone())).unwrap();

        assert_eq!(mock.schedule().unwrap(), JobId(101));
        assert_eq!(submitter.submissions().len(), 2);
        assert_eq!(mock.chain().name(), "mock-3");
    }
}
