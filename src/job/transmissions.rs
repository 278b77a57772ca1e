use std::path::PathBuf;

use crate::job::layout::MockLayout;
use crate::settings::{Section, SettingsError};
use crate::slurm::script::{Resources, ScriptPlan};

/// Lyman-alpha transmission files generated with `newGenDESILiteMocks.py`
#[derive(Clone, Debug, PartialEq)]
pub struct Transmissions {
    layout: MockLayout,
    base_seed: i64,
}

impl Transmissions {
    pub fn new(section: &Section, layout: MockLayout) -> Result<Self, SettingsError> {
        Ok(Transmissions { layout, base_seed: section.get_int("base_seed")? })
    }

    /// Realization on the left of the base seed
    pub fn seed(&self) -> String {
        format!("{}{}", self.layout.realization, self.base_seed)
    }

    pub fn outdir(&self) -> PathBuf {
        self.layout.transmissions_dir()
    }

    pub(super) fn plan(&self, resources: &Resources) -> ScriptPlan {
        let realization = self.layout.realization;
        let outdir = self.outdir();
        let generate = format!(
            "newGenDESILiteMocks.py {} --master-file {} --save-qqfile --nproc {} --seed {}",
            outdir.display(),
            self.layout.catalog,
            resources.nthreads,
            self.seed()
        );

        ScriptPlan {
            jobname: format!("ohio-trans-y1-{realization}"),
            outdir,
            fname_core: format!("gen-trans-{realization}"),
            env_command: None,
            commands: vec![r#"echo "Generating transmission files using qsotools.""#.to_string(), generate],
        }
    }

    pub(super) fn inc_realization(&mut self) {
        self.layout.realization += 1;
    }
}
