//! Schedulable units of the pipeline
//!
//! A [`Job`] holds what every batch job needs (resources, the `batch` and `skip` switches, its
//! lifecycle state) and a [`JobKind`] that knows the directories, commands and config files of one
//! external program. Jobs are set up once per realization: directories are created if absent, the
//! script is rendered to a fixed path, then the job is handed to a [`Submitter`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{debug, info};

use crate::settings::{Section, SettingsError};
use crate::slurm::dependency::{Dependency, JobId};
use crate::slurm::script::{Resources, ScriptError, ScriptPlan, ScriptWriter, Site};
use crate::slurm::submit::{SubmitError, Submitter};

/// Mock and data folder structure
pub mod layout;
pub mod transmissions;
pub mod quickquasars;
pub mod qsonic;
pub mod qmle;
/// Lookup tables for the power estimator
pub mod lookup;

use lookup::SqTable;
use qmle::Qmle;
use qsonic::Qsonic;
use quickquasars::Quickquasars;
use transmissions::Transmissions;

#[derive(Clone, Debug, PartialEq)]
pub enum JobKind {
    Transmission(Transmissions),
    Simulation(Quickquasars),
    ContinuumFit(Qsonic),
    PowerEstimate(Qmle),
    LookupTable(SqTable),
}

impl JobKind {
    /// Every directory the job writes to
    fn directories(&self) -> Vec<PathBuf> {
        match self {
            JobKind::Transmission(transmissions) => vec![transmissions.outdir()],
            JobKind::Simulation(qq) => qq.directories(),
            JobKind::ContinuumFit(qsonic) => qsonic.directories(),
            JobKind::PowerEstimate(qmle) => qmle.directories(),
            JobKind::LookupTable(sq) => sq.directories(),
        }
    }

    /// Config files read by the program, written next to the script
    fn attachments(&self) -> Vec<(PathBuf, String)> {
        match self {
            JobKind::PowerEstimate(qmle) => qmle.attachments(),
            JobKind::LookupTable(sq) => sq.attachments(),
            _ => Vec::new(),
        }
    }

    fn plan(&self, resources: &Resources) -> ScriptPlan {
        match self {
            JobKind::Transmission(transmissions) => transmissions.plan(resources),
            JobKind::Simulation(qq) => qq.plan(resources),
            JobKind::ContinuumFit(qsonic) => qsonic.plan(resources),
            JobKind::PowerEstimate(qmle) => qmle.plan(resources),
            JobKind::LookupTable(sq) => sq.plan(resources),
        }
    }

    /// Only the mock generators own a realization, the others follow their upstream job
    fn inc_realization(&mut self) -> bool {
        match self {
            JobKind::Transmission(transmissions) => transmissions.inc_realization(),
            JobKind::Simulation(qq) => qq.inc_realization(),
            _ => return false,
        }
        true
    }
}

/// Lifecycle of a job within one realization
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobState {
    Unconfigured,
    DirectoryCreated,
    ScriptRendered,
    Submitted,
}

#[derive(Clone, Debug)]
pub struct Job {
    /// Settings section the job was built from, used in logs and the ledger
    pub name: String,
    pub resources: Resources,
    pub batch: bool,
    pub skip: bool,
    pub kind: JobKind,
    site: Site,
    state: JobState,
    script: Option<PathBuf>,
}

impl Job {
    pub fn new(section: &Section, site: &Site, kind: JobKind) -> Result<Self, SettingsError> {
        Ok(Job {
            name: section.name().to_string(),
            resources: Resources::from_section(section)?,
            batch: section.get_bool("batch")?,
            skip: section.is_skipped()?,
            kind,
            site: site.clone(),
            state: JobState::Unconfigured,
            script: None,
        })
    }

    /// Append `tag` to the name, for jobs built several times from one section
    pub fn tagged(mut self, tag: &str) -> Self {
        self.name = format!("{}-{}", self.name, tag);
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn script(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    /// Create missing output directories and return the one holding the script
    pub fn create_directory(&mut self) -> io::Result<PathBuf> {
        info!("Creating directories:");
        for dir in self.kind.directories() {
            info!("+ {}", dir.display());
            fs::create_dir_all(&dir)?;
        }
        self.state = self.state.max(JobState::DirectoryCreated);
        Ok(self.kind.plan(&self.resources).outdir)
    }

    /// Script text for the current configuration
    pub fn render_script(&self) -> Result<String, ScriptError> {
        ScriptWriter::new(&self.site).render(&self.kind.plan(&self.resources), &self.resources)
    }

    /// Write config files and the script, overwriting older versions
    pub fn create_script(&mut self) -> Result<PathBuf, ScriptError> {
        for (path, contents) in self.kind.attachments() {
            fs::write(&path, contents).map_err(|source| ScriptError::Write { path: path.clone(), source })?;
            info!("Config file is saved as {}", path.display());
        }

        let plan = self.kind.plan(&self.resources);
        let path = ScriptWriter::new(&self.site).write(&plan, &self.resources)?;
        self.script = Some(path.clone());
        self.state = JobState::ScriptRendered;
        Ok(path)
    }

    /// Directories and script, once per realization; nothing at all for skipped jobs
    pub fn setup(&mut self) -> anyhow::Result<()> {
        info!("Setting up a {} job...", self.name);
        if self.skip {
            info!("{} is skipped", self.name);
            return Ok(());
        }
        if self.script.is_some() {
            debug!("{} is already set up", self.name);
            return Ok(());
        }

        self.create_directory()
            .with_context(|| format!("can't create directories for {}", self.name))?;
        self.create_script()
            .with_context(|| format!("can't write the {} script", self.name))?;
        Ok(())
    }

    /// Submit the rendered script
    ///
    /// Skipped jobs, jobs with `batch` off and jobs without a script return
    /// [`JobId::NOT_SUBMITTED`] and leave the batch system alone.
    pub fn schedule(
        &mut self,
        submitter: &mut dyn Submitter,
        dependency: &Dependency,
        hold: bool,
    ) -> Result<JobId, SubmitError> {
        if self.skip || !self.batch {
            return Ok(JobId::NOT_SUBMITTED);
        }
        let Some(script) = self.script.as_deref() else {
            return Ok(JobId::NOT_SUBMITTED);
        };

        let jobid = submitter.submit(script, dependency, hold)?;
        if jobid.is_submitted() {
            self.state = JobState::Submitted;
            info!("{} job submitted with JobID: {}", self.name, jobid);
        }
        Ok(jobid)
    }

    /// Move a mock generator to the next realization, static settings stay as they are
    pub fn inc_realization(&mut self) {
        if self.kind.inc_realization() {
            self.reset();
        }
    }

    /// Re-derive input and output paths from a moved upstream job
    pub fn follow(&mut self, upstream: &Job) {
        match (&mut self.kind, &upstream.kind) {
            (JobKind::ContinuumFit(qsonic), JobKind::Simulation(qq)) => qsonic.follow(qq),
            (JobKind::PowerEstimate(qmle), JobKind::ContinuumFit(qsonic)) => qmle.follow(qsonic),
            _ => {
                debug!("{} does not depend on the paths of {}", self.name, upstream.name);
                return;
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = JobState::Unconfigured;
        self.script = None;
    }

    pub fn as_simulation(&self) -> Option<&Quickquasars> {
        match &self.kind {
            JobKind::Simulation(qq) => Some(qq),
            _ => None,
        }
    }

    pub fn as_continuum_fit(&self) -> Option<&Qsonic> {
        match &self.kind {
            JobKind::ContinuumFit(qsonic) => Some(qsonic),
            _ => None,
        }
    }

    pub fn as_power_estimate(&self) -> Option<&Qmle> {
        match &self.kind {
            JobKind::PowerEstimate(qmle) => Some(qmle),
            _ => None,
        }
    }

    pub fn as_lookup_table(&self) -> Option<&SqTable> {
        match &self.kind {
            JobKind::LookupTable(sq) => Some(sq),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::layout::MockLayout;
    use crate::settings::SettingsStore;
    use crate::slurm::submit::fake::FakeSubmitter;

    fn jobs(rootdir: &Path, layer: &str) -> (Job, Job, Job) {
        let settings = SettingsStore::defaults_with(layer).unwrap();
        let site = Site::from_section(settings.section("slurm").unwrap()).unwrap();
        let layout = MockLayout::from_section(rootdir, 0, settings.section("ohio").unwrap()).unwrap();

        let tr_section = settings.section("transmissions").unwrap();
        let transmissions = Transmissions::new(tr_section, layout.clone()).unwrap();
        let qq_section = settings.section("quickquasars").unwrap();
        let qq = Quickquasars::new(qq_section, layout).unwrap();
        let fit_section = settings.section("qsonic.lya").unwrap();
        let fit = Qsonic::for_mock(fit_section, &rootdir.join("deltas"), &qq).unwrap();

        (
            Job::new(tr_section, &site, JobKind::Transmission(transmissions)).unwrap(),
            Job::new(qq_section, &site, JobKind::Simulation(qq)).unwrap(),
            Job::new(fit_section, &site, JobKind::ContinuumFit(fit)).unwrap(),
        )
    }

    fn tree(dir: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            for entry in fs::read_dir(&current).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path.clone());
                }
                paths.push(path);
            }
        }
        paths.sort();
        paths
    }

    #[test]
    fn skipped_job_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let (mut transmissions, _, _) = jobs(dir.path(), "[transmissions]\nskip = true\nbatch = true\n");
        let mut submitter = FakeSubmitter::new(100);

        transmissions.setup().unwrap();
        let jobid = transmissions.schedule(&mut submitter, &Dependency::none(), false).unwrap();

        assert_eq!(jobid, JobId::NOT_SUBMITTED);
        assert_eq!(transmissions.script(), None);
        assert_eq!(transmissions.state(), JobState::Unconfigured);
        assert!(tree(dir.path()).is_empty());
        assert!(submitter.calls().is_empty());
    }

    #[test]
    fn batch_off_renders_but_never_submits() {
        let dir = tempfile::tempdir().unwrap();
        let (mut transmissions, _, _) = jobs(dir.path(), "");
        let mut submitter = FakeSubmitter::new(100);

        transmissions.setup().unwrap();
        let jobid = transmissions.schedule(&mut submitter, &Dependency::none(), false).unwrap();

        assert_eq!(jobid, JobId::NOT_SUBMITTED);
        assert_eq!(transmissions.state(), JobState::ScriptRendered);
        assert!(transmissions.script().unwrap().is_file());
        assert!(submitter.calls().is_empty());
    }

    #[test]
    fn create_directory_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut qq, _) = jobs(dir.path(), "");

        let first = qq.create_directory().unwrap();
        let before = tree(dir.path());
        let second = qq.create_directory().unwrap();

        assert_eq!(first, second);
        assert_eq!(before, tree(dir.path()));
        assert!(first.join("spectra-16").is_dir());
        assert!(first.join("logs").is_dir());
    }

    #[test]
    fn identical_settings_render_identical_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let (_, _, mut first) = jobs(dir.path(), "");
        let (_, _, mut second) = jobs(dir.path(), "");

        first.setup().unwrap();
        let text = fs::read_to_string(first.script().unwrap()).unwrap();
        second.setup().unwrap();

        assert_eq!(first.script(), second.script());
        assert_eq!(fs::read_to_string(second.script().unwrap()).unwrap(), text);
        assert_eq!(second.render_script().unwrap(), text);
    }

    #[test]
    fn setup_once_per_realization() {
        let dir = tempfile::tempdir().unwrap();
        let (mut transmissions, _, _) = jobs(dir.path(), "");
        transmissions.setup().unwrap();
        let script = transmissions.script().unwrap().to_path_buf();
        fs::write(&script, "edited").unwrap();

        transmissions.setup().unwrap();
        assert_eq!(fs::read_to_string(&script).unwrap(), "edited");
    }

    #[test]
    fn submitted_with_dependency_and_hold() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut qq, _) = jobs(dir.path(), "[quickquasars]\nbatch = true\n");
        let mut submitter = FakeSubmitter::new(100);

        qq.setup().unwrap();
        let jobid = qq.schedule(&mut submitter, &Dependency::from(JobId(42)), true).unwrap();

        assert_eq!(jobid, JobId(100));
        assert_eq!(qq.state(), JobState::Submitted);
        let submissions = submitter.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].0, qq.script().unwrap());
        assert_eq!(submissions[0].1.as_deref(), Some("--dependency=afterok:42"));
        assert!(submissions[0].2);
    }

    #[test]
    fn inc_realization_only_moves_realization_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (mut transmissions, mut qq, mut fit) = jobs(dir.path(), "");
        for job in [&mut transmissions, &mut qq, &mut fit] {
            job.setup().unwrap();
        }
        let resources = qq.resources.clone();
        let fit_script = fit.script().unwrap().to_path_buf();

        transmissions.inc_realization();
        qq.inc_realization();
        fit.inc_realization();
        assert_eq!(fit.state(), JobState::ScriptRendered);
        fit.follow(&qq);

        for job in [&transmissions, &qq, &fit] {
            assert_eq!(job.state(), JobState::Unconfigured);
            assert_eq!(job.script(), None);
        }
        let simulation = qq.as_simulation().unwrap();
        assert_eq!(simulation.seed(), "623001");
        assert_eq!(simulation.foldername(), "desi-1.5-1");
        assert_eq!(qq.resources, resources);
        match &transmissions.kind {
            JobKind::Transmission(tr) => assert_eq!(tr.seed(), "1332298"),
            other => panic!("unexpected kind {other:?}"),
        }

        fit.setup().unwrap();
        let moved = fit.script().unwrap();
        assert_ne!(moved, fit_script);
        assert!(moved.to_string_lossy().contains("/v1.2.1/"));
    }

    #[test]
    fn power_estimate_writes_config_next_to_script() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::defaults().unwrap();
        let site = Site::from_section(settings.section("slurm").unwrap()).unwrap();
        let (_, _, fit) = jobs(dir.path(), "");
        let section = settings.section("qmle.lya").unwrap();
        let qmle = Qmle::new(section, fit.as_continuum_fit().unwrap(), &dir.path().join("sq")).unwrap();
        let mut job = Job::new(section, &site, JobKind::PowerEstimate(qmle)).unwrap();

        job.setup().unwrap();
        let config = job.as_power_estimate().unwrap().config_path();
        assert!(config.is_file());
        assert_eq!(config.parent(), job.script().unwrap().parent());
    }
}
