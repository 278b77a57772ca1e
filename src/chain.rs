//! Job chains: the dependency graphs of one pipeline run
//!
//! [`JobChain`] is the bookkeeping shared by every topology. It sets up and submits jobs, remembers
//! which ids reached the batch system and which of them are held, collects commands to run after
//! the chain and finally writes everything to the job ledger. The topologies are:
//!
//! - [`MockJobChain`]: transmissions → quickquasars → qsonic → qmle for one mock realization at a time
//! - [`DataJobChain`]: one qsonic → qmle branch per forest on observed spectra
//! - [`DataSplitJobChain`]: the same branches repeated for every split of the quasar catalog
//!
//! Processing jobs start `afterok` their upstream jobs. Lookup tables are submitted held and
//! released by [`JobChain::finish`]; the post-processing job starts `afterany` every submitted id.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use log::info;

use crate::db::{Ledger, SubmissionState};
use crate::job::Job;
use crate::settings::{SettingsError, SettingsStore};
use crate::slurm::dependency::{Dependency, JobId};
use crate::slurm::script::{Resources, ScriptPlan, ScriptWriter, Site};
use crate::slurm::submit::{SubmitError, Submitter};

/// Mock realizations
pub mod mock;
/// Observed data, all forests at once
pub mod data;
/// Observed data, one branch set per catalog split
pub mod split;

pub use data::DataJobChain;
pub use mock::MockJobChain;
pub use split::DataSplitJobChain;

/// Name of the post-processing job and its script
pub const POSTPROCESS_JOBNAME: &str = "p1d-postprocess";

/// A job that reached the batch system
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    /// Chain name at submission time, mock chains change it with every realization
    pub chain: String,
    pub name: String,
    pub id: JobId,
    pub script: Option<PathBuf>,
    pub state: SubmissionState,
}

pub struct JobChain {
    name: String,
    rootdir: PathBuf,
    site: Site,
    postprocess: Resources,
    submitter: Box<dyn Submitter>,
    submissions: Vec<Submission>,
    held: Vec<JobId>,
    extra_commands: Vec<String>,
}

impl JobChain {
    /// `rootdir` holds the post-processing script and the ledger
    pub fn new(
        name: &str,
        rootdir: &Path,
        settings: &SettingsStore,
        submitter: Box<dyn Submitter>,
    ) -> Result<Self, SettingsError> {
        Ok(JobChain {
            name: name.to_string(),
            rootdir: rootdir.to_path_buf(),
            site: Site::from_section(settings.section("slurm")?)?,
            postprocess: Resources::from_section(settings.section("postprocess")?)?,
            submitter,
            submissions: Vec::new(),
            held: Vec::new(),
            extra_commands: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Later submissions are recorded under `name`
    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    /// Every submitted id, in submission order
    pub fn ids(&self) -> Vec<JobId> {
        self.submissions.iter().map(|submission| submission.id).collect()
    }

    pub fn held(&self) -> &[JobId] {
        &self.held
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn extra_commands(&self) -> &[String] {
        &self.extra_commands
    }

    /// Set up and submit `job`, keeping its id unless nothing was submitted
    pub fn schedule_job(&mut self, job: &mut Job, dependency: &Dependency, hold: bool) -> anyhow::Result<JobId> {
        job.setup()?;
        let jobid = job
            .schedule(self.submitter.as_mut(), dependency, hold)
            .with_context(|| format!("can't submit the {} job", job.name))?;

        if jobid.is_submitted() {
            let state = if hold { SubmissionState::Held } else { SubmissionState::Queued };
            self.submissions.push(Submission {
                chain: self.name.clone(),
                name: job.name.clone(),
                id: jobid,
                script: job.script().map(Path::to_path_buf),
                state,
            });
            if hold {
                self.held.push(jobid);
            }
        }

        info!("--------------------------------------------------");
        Ok(jobid)
    }

    /// Reuse finished lookup tables, otherwise submit them held until the chain is complete
    pub fn schedule_lookup(&mut self, sq: &mut Job) -> anyhow::Result<JobId> {
        if let Some(table) = sq.as_lookup_table().filter(|table| table.is_complete()) {
            info!("Reusing lookup tables in {}", table.outdir().display());
            return Ok(JobId::NOT_SUBMITTED);
        }
        self.schedule_job(sq, &Dependency::none(), true)
    }

    /// Release every held job with one call
    pub fn release_held_jobs(&mut self) -> Result<(), SubmitError> {
        if self.held.is_empty() {
            info!("No held jobs to release");
            return Ok(());
        }

        info!("Releasing held jobs: {:?}", self.held.iter().map(JobId::to_string).collect::<Vec<_>>());
        self.submitter.release(&self.held)?;
        for submission in self.submissions.iter_mut().filter(|s| self.held.contains(&s.id)) {
            submission.state = SubmissionState::Released;
        }
        self.held.clear();
        Ok(())
    }

    /// Run `command` once the chain is over
    pub fn add_extra_command(&mut self, command: String) {
        self.extra_commands.push(command);
    }

    /// One job running the extra commands and a summary of every submitted id
    ///
    /// The script is always written. It is only submitted when something else was, and then starts
    /// after all of it whatever the outcome.
    pub fn submit_extra_commands(&mut self, jobname: &str, resources: &Resources) -> anyhow::Result<JobId> {
        if self.extra_commands.is_empty() {
            info!("No extra commands to run, {jobname} only summarises the chain");
        }

        let ids = self.ids();
        let mut commands = self.extra_commands.clone();
        if !ids.is_empty() {
            let ids: Vec<String> = ids.iter().map(JobId::to_string).collect();
            commands.push(format!("sacct -j {} --format=JobID,JobName%40,State,Elapsed", ids.join(",")));
        }

        let plan = ScriptPlan {
            jobname: jobname.to_string(),
            outdir: self.rootdir.clone(),
            fname_core: jobname.to_string(),
            env_command: None,
            commands,
        };
        fs::create_dir_all(&self.rootdir)
            .with_context(|| format!("can't create {}", self.rootdir.display()))?;
        let script = ScriptWriter::new(&self.site).write(&plan, resources)?;

        if ids.is_empty() {
            info!("Nothing was submitted, not submitting {}", script.display());
            return Ok(JobId::NOT_SUBMITTED);
        }

        let jobid = self
            .submitter
            .submit(&script, &Dependency::after_any(ids), false)
            .with_context(|| format!("can't submit {jobname}"))?;
        if jobid.is_submitted() {
            info!("{jobname} job submitted with JobID: {jobid}");
            self.submissions.push(Submission {
                chain: self.name.clone(),
                name: jobname.to_string(),
                id: jobid,
                script: Some(script),
                state: SubmissionState::Queued,
            });
        }
        Ok(jobid)
    }

    pub fn save_jobids(&self, ledger: &Ledger) -> rusqlite::Result<()> {
        for submission in &self.submissions {
            ledger.record(submission)?;
        }
        info!(
            "Saved {} job ids of {} at {}",
            self.submissions.len(),
            self.name,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        Ok(())
    }

    /// Release held jobs, submit the extra commands, then save the ids
    pub fn finish(&mut self, ledger: Option<&Ledger>) -> anyhow::Result<()> {
        self.release_held_jobs().context("can't release held jobs")?;
        let postprocess = self.postprocess.clone();
        self.submit_extra_commands(POSTPROCESS_JOBNAME, &postprocess)?;

        for submission in &self.submissions {
            info!("{:>12} {:<24} {}", submission.id, submission.name, submission.state);
        }
        if let Some(ledger) = ledger {
            self.save_jobids(ledger).context("can't save job ids")?;
        }
        Ok(())
    }
}

/// Downstream jobs wait on the last job that was actually submitted
fn carry(previous: JobId, current: JobId) -> JobId {
    if current.is_submitted() {
        current
    } else {
        previous
    }
}
