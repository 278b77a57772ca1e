use std::path::{Path, PathBuf};

use crate::job::layout::DataLayout;
use crate::job::quickquasars::Quickquasars;
use crate::settings::{Section, SettingsError};
use crate::slurm::script::{Resources, ScriptPlan};

const TRUTH: &str = "truth";

/// Which DLAs qsonic masks
#[derive(Clone, Debug, PartialEq)]
pub enum DlaMask {
    Off,
    /// The simulation's own DLA catalog, follows the realization
    Truth(PathBuf),
    /// A catalog set in the settings, never moved
    File(PathBuf),
}

impl DlaMask {
    pub fn path(&self) -> Option<&Path> {
        match self {
            DlaMask::Off => None,
            DlaMask::Truth(path) | DlaMask::File(path) => Some(path),
        }
    }
}

/// Continuum fitting with `qsonic-fit`, noise calibration with `qsonic-calib`, then file lists for
/// the power estimator
#[derive(Clone, Debug, PartialEq)]
pub struct Qsonic {
    /// Output folder below the intermediate path, the simulation folder for mocks
    foldername: String,
    mock: bool,
    wave1: f64,
    wave2: f64,
    forest_w1: f64,
    forest_w2: f64,
    cont_order: i64,
    coadd_arms: bool,
    skip_resomat: bool,
    dla_mask: DlaMask,
    bal_mask: bool,
    sky_mask: String,
    user_suffix: String,
    extra_opts: String,
    delta_root: PathBuf,
    interm_path: PathBuf,
    indir: PathBuf,
    catalog: PathBuf,
}

impl Qsonic {
    /// Fit the spectra simulated by `qq`
    pub fn for_mock(section: &Section, delta_root: &Path, qq: &Quickquasars) -> Result<Self, SettingsError> {
        let dla_mask = match section.get_str("dla_mask")? {
            "" => DlaMask::Off,
            TRUTH if !qq.simulates_dlas() => {
                return Err(SettingsError::InvalidValue {
                    section: section.name().to_string(),
                    key: "dla_mask".to_string(),
                    reason: "a truth DLA mask needs quickquasars to simulate DLAs".to_string(),
                })
            }
            TRUTH => DlaMask::Truth(qq.truth_dla_catalog()),
            path => DlaMask::File(PathBuf::from(path)),
        };

        let mut qsonic = Qsonic::from_section(section, delta_root, dla_mask, true)?;
        qsonic.follow(qq);
        Ok(qsonic)
    }

    /// Fit observed spectra, writing into a folder named `foldername`
    pub fn for_data(
        section: &Section,
        foldername: &str,
        delta_root: &Path,
        layout: &DataLayout,
    ) -> Result<Self, SettingsError> {
        let dla_mask = match section.get_str("dla_mask")? {
            "" => DlaMask::Off,
            TRUTH => {
                return Err(SettingsError::InvalidValue {
                    section: section.name().to_string(),
                    key: "dla_mask".to_string(),
                    reason: "there is no truth DLA catalog for observed data".to_string(),
                })
            }
            path => DlaMask::File(PathBuf::from(path)),
        };

        let mut qsonic = Qsonic::from_section(section, delta_root, dla_mask, false)?;
        qsonic.foldername = foldername.to_string();
        qsonic.interm_path = layout.interm_path();
        qsonic.indir = layout.healpix_dir();
        qsonic.catalog = PathBuf::from(&layout.catalog);
        Ok(qsonic)
    }

    fn from_section(section: &Section, delta_root: &Path, dla_mask: DlaMask, mock: bool) -> Result<Self, SettingsError> {
        Ok(Qsonic {
            foldername: String::new(),
            mock,
            wave1: section.get_float("wave1")?,
            wave2: section.get_float("wave2")?,
            forest_w1: section.get_float("forest_w1")?,
            forest_w2: section.get_float("forest_w2")?,
            cont_order: section.get_int("cont_order")?,
            coadd_arms: section.get_bool("coadd_arms")?,
            skip_resomat: section.get_bool("skip_resomat")?,
            dla_mask,
            bal_mask: section.get_bool("bal_mask")?,
            sky_mask: section.get_str("sky_mask")?.to_string(),
            user_suffix: section.get_str_or("suffix", "")?.to_string(),
            extra_opts: section.get_str_or("extra_opts", "")?.to_string(),
            delta_root: delta_root.to_path_buf(),
            interm_path: PathBuf::new(),
            indir: PathBuf::new(),
            catalog: PathBuf::new(),
        })
    }

    /// Point at the spectra of `qq`'s current realization; a DLA file from the settings is kept
    pub(super) fn follow(&mut self, qq: &Quickquasars) {
        self.foldername = qq.foldername();
        self.interm_path = qq.layout().interm_path();
        self.indir = qq.spectra_dir();
        self.catalog = qq.zcatalog();
        if let DlaMask::Truth(path) = &mut self.dla_mask {
            *path = qq.truth_dla_catalog();
        }
    }

    pub fn dla_mask(&self) -> &DlaMask {
        &self.dla_mask
    }

    /// `-co<order>`, then `-m` with one letter per mask (d, b, s), then the user suffix
    pub fn suffix(&self) -> String {
        let dla = self.dla_mask != DlaMask::Off;
        let sky = !self.sky_mask.is_empty();

        let mut suffix = format!("-co{}", self.cont_order);
        if dla || self.bal_mask || sky {
            suffix.push_str("-m");
        }
        if dla {
            suffix.push('d');
        }
        if self.bal_mask {
            suffix.push('b');
        }
        if sky {
            suffix.push('s');
        }
        suffix.push_str(&self.user_suffix);
        suffix
    }

    pub fn outdelta_dir(&self) -> PathBuf {
        self.delta_root
            .join(&self.interm_path)
            .join(&self.foldername)
            .join(format!("Delta{}", self.suffix()))
    }

    /// Delta file list written by the last step, optionally for a signal-to-noise cut
    pub fn file_list(&self, snr_cut: u32) -> PathBuf {
        match snr_cut {
            0 => self.outdelta_dir().join("fname_list.txt"),
            cut => self.outdelta_dir().join(format!("fname_list-snr{cut}.txt")),
        }
    }

    pub fn foldername(&self) -> &str {
        &self.foldername
    }

    pub(super) fn directories(&self) -> Vec<PathBuf> {
        vec![self.outdelta_dir()]
    }

    pub(super) fn plan(&self, resources: &Resources) -> ScriptPlan {
        let outdelta = self.outdelta_dir();
        let srun = format!("srun -N {} -n {} -c 2", resources.nodes, resources.nthreads);
        let windows = format!(
            "--wave1 {} --wave2 {} \\\n--forest-w1 {} --forest-w2 {}",
            self.wave1, self.wave2, self.forest_w1, self.forest_w2
        );

        let mut fit = vec![
            format!("{srun} qsonic-fit"),
            format!("-i {}", self.indir.display()),
            format!("--catalog {}", self.catalog.display()),
            format!("-o {}", outdelta.display()),
            "--rfdwave 0.8 --skip 0.2".to_string(),
            "--no-iterations 20".to_string(),
            format!("--cont-order {}", self.cont_order),
            windows.clone(),
        ];
        if self.mock {
            fit.push("--mock-analysis".to_string());
        }
        if let Some(path) = self.dla_mask.path() {
            fit.push(format!("--dla-mask {}", path.display()));
        }
        if self.bal_mask {
            fit.push("--bal-mask".to_string());
        }
        if !self.sky_mask.is_empty() {
            fit.push(format!("--sky-mask {}", self.sky_mask));
        }
        if self.coadd_arms {
            fit.push("--coadd-arms".to_string());
        }
        if self.skip_resomat {
            fit.push("--skip-resomat".to_string());
        }
        if !self.extra_opts.is_empty() {
            fit.push(self.extra_opts.clone());
        }

        let calib = [
            format!("{srun} qsonic-calib"),
            format!("-i {}", outdelta.display()),
            format!("-o {}", outdelta.join("var_stats").display()),
            windows,
        ];

        let lists = format!("getLists4QMLEfromPICCA.py {} --nproc {}", outdelta.display(), resources.nthreads);

        ScriptPlan {
            jobname: format!("qsonic-{}", self.foldername),
            outdir: outdelta,
            fname_core: "qsonic-fit".to_string(),
            env_command: None,
            commands: vec![
                fit.join(" \\\n"),
                calib.join(" \\\n"),
                lists.clone(),
                format!("{lists} --snr-cut 1"),
                format!("{lists} --snr-cut 2"),
            ],
        }
    }
}
