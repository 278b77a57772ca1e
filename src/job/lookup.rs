use std::path::{Path, PathBuf};

use crate::job::qmle::QmleBinning;
use crate::slurm::script::{Resources, ScriptPlan};

/// Touched by the job once every table is written
const COMPLETE_MARKER: &str = "sq-complete";

/// Signal and derivative lookup tables with `CreateSQLookUpTable`, shared by every estimator in a group
#[derive(Clone, Debug, PartialEq)]
pub struct SqTable {
    group: String,
    outdir: PathBuf,
    binning: QmleBinning,
}

impl SqTable {
    pub fn new(group: &str, sq_root: &Path, binning: QmleBinning) -> Self {
        SqTable { group: group.to_string(), outdir: sq_root.join(group), binning }
    }

    pub fn binning(&self) -> &QmleBinning {
        &self.binning
    }

    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    pub fn config_path(&self) -> PathBuf {
        self.outdir.join("config-sq.param")
    }

    pub fn config(&self) -> String {
        let mut lines = vec![format!("LookUpTableDir {}", self.outdir.display())];
        lines.extend(self.binning.config_lines());
        let mut config = lines.join("\n");
        config.push('\n');
        config
    }

    /// Tables from an earlier run can be reused
    pub fn is_complete(&self) -> bool {
        self.outdir.join(COMPLETE_MARKER).is_file()
    }

    pub(super) fn directories(&self) -> Vec<PathBuf> {
        vec![self.outdir.clone()]
    }

    pub(super) fn attachments(&self) -> Vec<(PathBuf, String)> {
        vec![(self.config_path(), self.config())]
    }

    pub(super) fn plan(&self, resources: &Resources) -> ScriptPlan {
        ScriptPlan {
            jobname: format!("sq-{}", self.group),
            outdir: self.outdir.clone(),
            fname_core: "sq".to_string(),
            env_command: None,
            commands: vec![
                format!(
                    "srun -N {} -n {} -c 2 CreateSQLookUpTable {}",
                    resources.nodes,
                    resources.nthreads,
                    self.config_path().display()
                ),
                format!("touch {}", self.outdir.join(COMPLETE_MARKER).display()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::settings::SettingsStore;

    fn table(sq_root: &Path) -> SqTable {
        let settings = SettingsStore::defaults().unwrap();
        let binning = QmleBinning::from_section(settings.section("qmle.lya").unwrap()).unwrap();
        SqTable::new("ly", sq_root, binning)
    }

    #[test]
    fn marker_means_complete() {
        let dir = tempfile::tempdir().unwrap();
        let table = table(dir.path());
        assert!(!table.is_complete());

        fs::create_dir_all(table.outdir()).unwrap();
        fs::write(table.outdir().join(COMPLETE_MARKER), "").unwrap();
        assert!(table.is_complete());
    }

    #[test]
    fn plan_touches_marker_last() {
        let table = table(Path::new("/d/sq"));
        let resources = Resources { nodes: 1, nthreads: 128, time: 0.5, queue: "regular".to_string() };
        let plan = table.plan(&resources);

        assert_eq!(plan.jobname, "sq-ly");
        assert_eq!(plan.outdir, PathBuf::from("/d/sq/ly"));
        assert_eq!(plan.commands[0], "srun -N 1 -n 128 -c 2 CreateSQLookUpTable /d/sq/ly/config-sq.param");
        assert_eq!(plan.commands[1], "touch /d/sq/ly/sq-complete");
        assert!(table.config().starts_with("LookUpTableDir /d/sq/ly\nK0 0\n"));
    }
}
