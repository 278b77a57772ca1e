use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Duration;
use log::info;
use serde::Serialize;
use thiserror::Error;
use tinytemplate::TinyTemplate;

use crate::settings::{Section, SettingsError};

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("can't render batch script header")]
    Template(#[from] tinytemplate::error::Error),
    #[error("can't write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Site-wide `#SBATCH` options from the `[slurm]` section
#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    pub account: String,
    pub constraint: String,
}

impl Site {
    pub fn from_section(section: &Section) -> Result<Self, SettingsError> {
        Ok(Site {
            account: section.get_str("account")?.to_string(),
            constraint: section.get_str("constraint")?.to_string(),
        })
    }
}

/// Resources requested by one job
#[derive(Clone, Debug, PartialEq)]
pub struct Resources {
    pub nodes: u32,
    pub nthreads: u32,
    /// Wall time in hours
    pub time: f64,
    pub queue: String,
}

/// Longest wall time accepted in settings, in hours
const MAX_TIME: f64 = 720.0;

impl Resources {
    pub fn from_section(section: &Section) -> Result<Self, SettingsError> {
        let time = section.get_float("time")?;
        if !time.is_finite() || time <= 0.0 || time > MAX_TIME {
            return Err(SettingsError::InvalidValue {
                section: section.name().to_string(),
                key: "time".to_string(),
                reason: format!("{time} is not a wall time between 0 and {MAX_TIME} hours"),
            });
        }
        Ok(Resources {
            nodes: section.get_count("nodes")?,
            nthreads: section.get_count("nthreads")?,
            time,
            queue: section.get_str("queue")?.to_string(),
        })
    }
}

/// Everything a job puts in its batch script
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptPlan {
    pub jobname: String,
    /// Where the script and the SLURM logs go
    pub outdir: PathBuf,
    /// Script is saved as `run-{fname_core}.sl`
    pub fname_core: String,
    /// Run before the commands, e.g. to source a software environment
    pub env_command: Option<String>,
    /// Chained with `&&`, so a failing command stops the job
    pub commands: Vec<String>,
}

impl ScriptPlan {
    pub fn script_path(&self) -> PathBuf {
        self.outdir.join(format!("run-{}.sl", self.fname_core))
    }
}

/// Rendering context for the SBATCH header
#[derive(Serialize)]
struct HeaderContext<'a> {
    constraint: &'a str,
    account: &'a str,
    queue: &'a str,
    nodes: u32,
    time: String,
    name: &'a str,
    outdir: String,
}

/// Renders batch scripts for one site
pub struct ScriptWriter<'a> {
    site: &'a Site,
}

impl<'a> ScriptWriter<'a> {
    pub fn new(site: &'a Site) -> Self {
        ScriptWriter { site }
    }

    /// Script text: SBATCH header, environment command, then the chained commands
    pub fn render(&self, plan: &ScriptPlan, resources: &Resources) -> Result<String, ScriptError> {
        let mut script = self.render_header(plan, resources)?;

        if let Some(env_command) = plan.env_command.as_deref().filter(|command| !command.is_empty()) {
            script.push_str(env_command);
            script.push_str("\n\n");
        }

        script.push_str(&plan.commands.join(" &&\n"));
        script.push('\n');
        Ok(script)
    }

    /// Render and save to [`ScriptPlan::script_path`], overwriting an older script
    pub fn write(&self, plan: &ScriptPlan, resources: &Resources) -> Result<PathBuf, ScriptError> {
        let script = self.render(plan, resources)?;
        let path = plan.script_path();
        fs::write(&path, script).map_err(|source| ScriptError::Write { path: path.clone(), source })?;
        info!("{} script is saved as {}", plan.jobname, path.display());
        Ok(path)
    }

    /// Render the SBATCH header using TinyTemplate
    fn render_header(&self, plan: &ScriptPlan, resources: &Resources) -> Result<String, ScriptError> {
        /// included header template
        static HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/header.txt"));
        let mut tt = TinyTemplate::new();
        tt.set_default_formatter(&tinytemplate::format_unescaped);
        tt.add_template("header", HEADER)?;

        let context = HeaderContext {
            constraint: &self.site.constraint,
            account: &self.site.account,
            queue: &resources.queue,
            nodes: resources.nodes,
            time: format_walltime(resources.time),
            name: &plan.jobname,
            outdir: display(&plan.outdir),
        };

        Ok(tt.render("header", &context)?)
    }
}

/// Hours as a SLURM `HH:MM:SS` wall time, e.g. 0.5 -> `00:30:00`
pub fn format_walltime(hours: f64) -> String {
    let total = Duration::seconds((hours * 3600.0).round() as i64);
    format!(
        "{:02}:{:02}:{:02}",
        total.num_hours(),
        total.num_minutes() % 60,
        total.num_seconds() % 60
    )
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
