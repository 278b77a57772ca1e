use std::path::PathBuf;

use crate::job::layout::MockLayout;
use crate::settings::{Section, SettingsError};
use crate::slurm::script::{Resources, ScriptPlan};

/// Simulated DESI spectra from transmission files with `quickquasars`
#[derive(Clone, Debug, PartialEq)]
pub struct Quickquasars {
    layout: MockLayout,
    nexp: u32,
    /// `random` or a DLA file, empty for no DLAs
    dla: String,
    /// BAL probability
    bal: f64,
    boring: bool,
    zmin: f64,
    cont_dwave: f64,
    base_seed: i64,
    suffix: String,
    extra_opts: String,
    env_command: String,
}

impl Quickquasars {
    pub fn new(section: &Section, layout: MockLayout) -> Result<Self, SettingsError> {
        Ok(Quickquasars {
            layout,
            nexp: section.get_count("nexp")?,
            dla: section.get_str("dla")?.to_string(),
            bal: section.get_float("bal")?,
            boring: section.get_bool("boring")?,
            zmin: section.get_float("zmin_qq")?,
            cont_dwave: section.get_float("cont_dwave")?,
            base_seed: section.get_int("base_seed")?,
            suffix: section.get_str_or("suffix", "")?.to_string(),
            extra_opts: section.get_str_or("extra_opts", "")?.to_string(),
            env_command: section.get_str_or("env_command_qq", "")?.to_string(),
        })
    }

    pub fn layout(&self) -> &MockLayout {
        &self.layout
    }

    /// Realization on the right of the base seed
    pub fn seed(&self) -> String {
        format!("{}{}", self.base_seed, self.layout.realization)
    }

    pub fn exptime(&self) -> String {
        format!("{}000", self.nexp)
    }

    pub fn simulates_dlas(&self) -> bool {
        !self.dla.is_empty()
    }

    /// Systematics code and the quickquasars options that go with it
    ///
    /// Digits are appended in a fixed order: 1 DLA, 4 BAL, 5 redshift errors (always), 6 boring.
    pub fn systematics(&self) -> (String, String) {
        let mut code = String::new();
        let mut options = format!(
            "--zmin {} --zbest --bbflux --seed {} --exptime {} --save-continuum --save-continuum-dwave {}",
            self.zmin,
            self.seed(),
            self.exptime(),
            self.cont_dwave
        );

        if self.simulates_dlas() {
            code.push('1');
            options.push_str(&format!(" --dla {}", self.dla));
        }
        if self.bal > 0.0 {
            code.push('4');
            options.push_str(&format!(" --balprob {}", self.bal));
        }
        code.push('5');
        options.push_str(" --sigma_kms_fog 0");
        if self.boring {
            code.push('6');
            options.push_str(" --no-transmission");
        }
        if !self.extra_opts.is_empty() {
            options.push(' ');
            options.push_str(&self.extra_opts);
        }

        (code, options)
    }

    /// e.g. `desi-1.5-1` for v1.2 with one exposure and no extra systematics
    pub fn foldername(&self) -> String {
        let (code, _) = self.systematics();
        format!("desi-{}.{}-{}{}", self.layout.major_version(), code, self.nexp, self.suffix)
    }

    pub fn desibase_dir(&self) -> PathBuf {
        self.layout.rootdir.join(self.layout.interm_path()).join(self.foldername())
    }

    pub fn spectra_dir(&self) -> PathBuf {
        self.desibase_dir().join("spectra-16")
    }

    pub fn zcatalog(&self) -> PathBuf {
        self.desibase_dir().join("zcat.fits")
    }

    /// Written only when DLAs are simulated
    pub fn truth_dla_catalog(&self) -> PathBuf {
        self.desibase_dir().join("dla_cat.fits")
    }

    pub(super) fn directories(&self) -> Vec<PathBuf> {
        let desibase = self.desibase_dir();
        vec![desibase.join("logs"), desibase.join("spectra-16"), desibase]
    }

    pub(super) fn plan(&self, resources: &Resources) -> ScriptPlan {
        let desibase = self.desibase_dir();
        let (_, options) = self.systematics();
        let nodes = resources.nodes;
        let nthreads = resources.nthreads;

        let quickquasars = format!(
            "srun -N 1 -n 1 -c {nthreads} quickquasars -i $tfiles --nproc {nthreads} --outdir {} {options}",
            self.spectra_dir().display()
        );
        let logs = desibase.join("logs");

        // split the transmission files evenly over the nodes, one quickquasars per node
        let distribute = [
            format!("files=`ls -1 {}/*/*/lya-transmission*.fits*`", self.layout.transmissions_dir().display()),
            "nfiles=`echo $files | wc -w`".to_string(),
            format!("nfilespernode=$(( $nfiles/{nodes} + 1))"),
            String::new(),
            r#"echo "n files =" $nfiles"#.to_string(),
            r#"echo "n files per node =" $nfilespernode"#.to_string(),
            String::new(),
            "first=1".to_string(),
            "last=$nfilespernode".to_string(),
            format!("for node in `seq {nodes}` ; do"),
            r#"    echo "starting node $node""#.to_string(),
            format!("    if (( $node == {nodes} )) ; then"),
            "        last=\"\"".to_string(),
            "    fi".to_string(),
            "    echo ${first}-${last}".to_string(),
            r#"    tfiles=`echo $files | cut -d " " -f ${first}-${last}`"#.to_string(),
            "    first=$(( $first + $nfilespernode ))".to_string(),
            "    last=$(( $last + $nfilespernode ))".to_string(),
            format!("    command=\"{quickquasars}\""),
            String::new(),
            "    echo $command".to_string(),
            format!("    echo \"log in {}/node-$node.log\"", logs.display()),
            String::new(),
            format!("    $command >& {}/node-$node.log &", logs.display()),
            "done".to_string(),
        ]
        .join("\n");

        let mut commands = vec![
            r#"echo "get list of skewers to run ...""#.to_string(),
            distribute,
            "wait".to_string(),
            "echo 'END'".to_string(),
            format!(
                "desi_zcatalog -i {} -o {} --minimal --prefix zbest",
                self.spectra_dir().display(),
                self.zcatalog().display()
            ),
        ];
        if self.simulates_dlas() {
            commands.push(format!(
                "get-qq-true-dla-catalog {} {} --nproc {nthreads}",
                self.spectra_dir().display(),
                desibase.display()
            ));
        }

        ScriptPlan {
            jobname: format!("ohio-qq-y1-{}", self.layout.realization),
            outdir: desibase,
            fname_core: "quickquasars".to_string(),
            env_command: Some(self.env_command.clone()),
            commands,
        }
    }

    pub(super) fn inc_realization(&mut self) {
        self.layout.realization += 1;
    }
}
