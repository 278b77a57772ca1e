use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus};
use std::thread;
use std::time::Duration;

use log::info;
use thiserror::Error;

use crate::settings::{Section, SettingsError};
use crate::slurm::dependency::{Dependency, JobId};

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("failed to run {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("no job id in {program} output: {output:?}")]
    Unparsable { program: String, output: String },
}

/// Hands rendered scripts to a batch system
pub trait Submitter {
    /// Submit `script`, returning its job id
    fn submit(&mut self, script: &Path, dependency: &Dependency, hold: bool) -> Result<JobId, SubmitError>;

    /// Move held jobs to the queue
    fn release(&mut self, ids: &[JobId]) -> Result<(), SubmitError>;
}

/// Submits with `sbatch` and releases with `scontrol`
#[derive(Clone, Debug)]
pub struct Sbatch {
    sbatch: String,
    scontrol: String,
    /// Wait after each submission to stay under the scheduler's request rate limit
    delay: Duration,
}

impl Sbatch {
    pub fn from_section(section: &Section) -> Result<Self, SettingsError> {
        let delay = section.get_float("submit_delay")?;
        if !delay.is_finite() || delay < 0.0 {
            return Err(SettingsError::InvalidValue {
                section: section.name().to_string(),
                key: "submit_delay".to_string(),
                reason: format!("{delay} is not a valid number of seconds"),
            });
        }
        Ok(Sbatch {
            sbatch: section.get_str_or("sbatch", "sbatch")?.to_string(),
            scontrol: section.get_str_or("scontrol", "scontrol")?.to_string(),
            delay: Duration::from_secs_f64(delay),
        })
    }

    fn run(&self, program: &str, arguments: &[String]) -> Result<String, SubmitError> {
        let mut command = Command::new(program);
        let cmd = command.args(arguments);
        info!("Running {} {}", program, arguments.join(" "));

        let output = cmd
            .output()
            .map_err(|source| SubmitError::Spawn { program: program.to_string(), source })?;

        if !output.status.success() {
            return Err(SubmitError::Failed {
                program: program.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Submitter for Sbatch {
    fn submit(&mut self, script: &Path, dependency: &Dependency, hold: bool) -> Result<JobId, SubmitError> {
        let arguments = sbatch_arguments(script, dependency, hold);
        let stdout = self.run(&self.sbatch, &arguments)?;
        let jobid = parse_job_id(&stdout).ok_or_else(|| SubmitError::Unparsable {
            program: self.sbatch.clone(),
            output: stdout.clone(),
        })?;

        thread::sleep(self.delay);
        Ok(jobid)
    }

    fn release(&mut self, ids: &[JobId]) -> Result<(), SubmitError> {
        let arguments = release_arguments(ids);
        self.run(&self.scontrol, &arguments)?;
        Ok(())
    }
}

/// Logs the commands that would run and submits nothing
#[derive(Clone, Debug, Default)]
pub struct DryRun;

impl Submitter for DryRun {
    fn submit(&mut self, script: &Path, dependency: &Dependency, hold: bool) -> Result<JobId, SubmitError> {
        info!("--dry-run set, not running: sbatch {}", sbatch_arguments(script, dependency, hold).join(" "));
        Ok(JobId::NOT_SUBMITTED)
    }

    fn release(&mut self, ids: &[JobId]) -> Result<(), SubmitError> {
        info!("--dry-run set, not running: scontrol {}", release_arguments(ids).join(" "));
        Ok(())
    }
}

pub fn sbatch_arguments(script: &Path, dependency: &Dependency, hold: bool) -> Vec<String> {
    let mut arguments = Vec::new();
    if let Some(flag) = dependency.to_flag() {
        arguments.push(flag);
    }
    if hold {
        arguments.push("--hold".to_string());
    }
    arguments.push(script.display().to_string());
    arguments
}

fn release_arguments(ids: &[JobId]) -> Vec<String> {
    let ids: Vec<String> = ids.iter().map(JobId::to_string).collect();
    vec!["release".to_string(), ids.join(",")]
}

/// Job id at the end of the last non-empty line, e.g. `Submitted batch job 1234`
pub fn parse_job_id(output: &str) -> Option<JobId> {
    let line = output.lines().rev().map(str::trim).find(|line| !line.is_empty())?;
    let start = line
        .char_indices()
        .rev()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(0, |(i, c)| i + c.len_utf8());
    line[start..].parse().ok().map(JobId)
}

/// Records every call and hands out increasing ids
#[cfg(test)]
pub mod fake {
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use super::{SubmitError, Submitter};
    use crate::slurm::dependency::{Dependency, JobId};

    #[derive(Clone, Debug, PartialEq)]
    pub enum Call {
        Submit {
            script: PathBuf,
            dependency: Option<String>,
            hold: bool,
            jobid: JobId,
        },
        Release(Vec<JobId>),
    }

    /// Clones share one call log, so a test keeps a handle after boxing the submitter
    #[derive(Clone, Debug)]
    pub struct FakeSubmitter {
        next: Rc<RefCell<i64>>,
        calls: Rc<RefCell<Vec<Call>>>,
    }

    impl FakeSubmitter {
        pub fn new(first: i64) -> Self {
            FakeSubmitter { next: Rc::new(RefCell::new(first)), calls: Rc::default() }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        pub fn submissions(&self) -> Vec<(PathBuf, Option<String>, bool, JobId)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Submit { script, dependency, hold, jobid } => Some((script, dependency, hold, jobid)),
                    Call::Release(_) => None,
                })
                .collect()
        }

        pub fn releases(&self) -> Vec<Vec<JobId>> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Release(ids) => Some(ids),
                    Call::Submit { .. } => None,
                })
                .collect()
        }
    }

    impl Submitter for FakeSubmitter {
        fn submit(&mut self, script: &Path, dependency: &Dependency, hold: bool) -> Result<JobId, SubmitError> {
            let jobid = {
                let mut next = self.next.borrow_mut();
                let jobid = JobId(*next);
                *next += 1;
                jobid
            };
            self.calls.borrow_mut().push(Call::Submit {
                script: script.to_path_buf(),
                dependency: dependency.to_flag(),
                hold,
                jobid,
            });
            Ok(jobid)
        }

        fn release(&mut self, ids: &[JobId]) -> Result<(), SubmitError> {
            self.calls.borrow_mut().push(Call::Release(ids.to_vec()));
            Ok(())
        }
    }
}
