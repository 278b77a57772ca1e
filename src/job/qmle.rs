use std::path::{Path, PathBuf};

use crate::job::qsonic::Qsonic;
use crate::settings::{Section, SettingsError};
use crate::slurm::script::{Resources, ScriptPlan};

/// Redshift and wavenumber binning, shared by the estimator and its lookup tables
#[derive(Clone, Debug, PartialEq)]
pub struct QmleBinning {
    pub z_first: f64,
    pub dz: f64,
    pub nz: u32,
    pub k0: f64,
    pub nklin: u32,
    pub dklin: f64,
    pub nklog: u32,
    pub dklog: f64,
    /// Pixel width in Angstrom
    pub pixel_width: f64,
    pub resolution: u32,
}

impl QmleBinning {
    pub fn from_section(section: &Section) -> Result<Self, SettingsError> {
        Ok(QmleBinning {
            z_first: section.get_float("z_first")?,
            dz: section.get_float("dz")?,
            nz: section.get_count("nz")?,
            k0: section.get_float("k0")?,
            nklin: section.get_count("nklin")?,
            dklin: section.get_float("dklin")?,
            nklog: section.get_count("nklog")?,
            dklog: section.get_float("dklog")?,
            pixel_width: section.get_float("pixel_width")?,
            resolution: section.get_count("resolution")?,
        })
    }

    pub fn config_lines(&self) -> Vec<String> {
        vec![
            format!("K0 {}", self.k0),
            format!("NumberOfLinearBins {}", self.nklin),
            format!("LinearKBinWidth {}", self.dklin),
            format!("NumberOfLog10Bins {}", self.nklog),
            format!("Log10KBinWidth {}", self.dklog),
            format!("FirstRedshiftBinCenter {}", self.z_first),
            format!("RedshiftBinWidth {}", self.dz),
            format!("NumberOfRedshiftBins {}", self.nz),
            format!("PixelWidth {}", self.pixel_width),
            format!("SpectographRes {}", self.resolution),
            "SignalLookUpTableBase signal".to_string(),
            "DerivativeSLookUpTableBase deriv".to_string(),
        ]
    }
}

/// One-dimensional power spectrum with `LyaPowerEstimateSQ`
#[derive(Clone, Debug, PartialEq)]
pub struct Qmle {
    foldername: String,
    sq_group: String,
    sq_dir: PathBuf,
    delta_dir: PathBuf,
    file_list: PathBuf,
    binning: QmleBinning,
    niter: u32,
    chisq_conv: f64,
    cont_logamp: f64,
    cont_logslope: f64,
    snr_cut: u32,
    nboot: u32,
    suffix: String,
    extra_opts: String,
}

impl Qmle {
    /// Estimate the power of the deltas written by `fit`, with lookup tables below `sq_root`
    pub fn new(section: &Section, fit: &Qsonic, sq_root: &Path) -> Result<Self, SettingsError> {
        let sq_group = section.get_str("sq_group")?.to_string();
        if sq_group.is_empty() || sq_group.contains('/') {
            return Err(SettingsError::InvalidValue {
                section: section.name().to_string(),
                key: "sq_group".to_string(),
                reason: format!("`{sq_group}` can't name a lookup table folder"),
            });
        }

        let snr_cut = section.get_count("snr_cut")?;
        Ok(Qmle {
            foldername: fit.foldername().to_string(),
            sq_dir: sq_root.join(&sq_group),
            sq_group,
            delta_dir: fit.outdelta_dir(),
            file_list: fit.file_list(snr_cut),
            binning: QmleBinning::from_section(section)?,
            niter: section.get_count("niter")?,
            chisq_conv: section.get_float("chisq_conv")?,
            cont_logamp: section.get_float("cont_logamp")?,
            cont_logslope: section.get_float("cont_logslope")?,
            snr_cut,
            nboot: section.get_count("nboot")?,
            suffix: section.get_str_or("suffix", "")?.to_string(),
            extra_opts: section.get_str_or("extra_opts", "")?.to_string(),
        })
    }

    /// Read the deltas of `fit` after it moved to another realization
    pub(super) fn follow(&mut self, fit: &Qsonic) {
        self.foldername = fit.foldername().to_string();
        self.delta_dir = fit.outdelta_dir();
        self.file_list = fit.file_list(self.snr_cut);
    }

    pub fn sq_group(&self) -> &str {
        &self.sq_group
    }

    pub fn binning(&self) -> &QmleBinning {
        &self.binning
    }

    pub fn outdir(&self) -> PathBuf {
        self.delta_dir.join(format!("results{}", self.suffix))
    }

    pub fn config_path(&self) -> PathBuf {
        self.outdir().join("config-qmle.param")
    }

    pub fn config(&self) -> String {
        let outdir = self.outdir();
        let mut lines = vec![
            format!("FileNameList {}", self.file_list.display()),
            format!("FileInputDir {}", self.delta_dir.display()),
            format!("OutputDir {}", outdir.display()),
            "OutputFileBase qmle".to_string(),
            format!("LookUpTableDir {}", self.sq_dir.display()),
        ];
        lines.extend(self.binning.config_lines());
        lines.extend([
            format!("NumberOfIterations {}", self.niter),
            format!("ChiSqConvergence {}", self.chisq_conv),
            format!("ContinuumLogAmplitudeMarginalization {}", self.cont_logamp),
            format!("ContinuumLogSlopeMarginalization {}", self.cont_logslope),
            "InputIsPicca 1".to_string(),
            format!("NumberOfBoots {}", self.nboot),
        ]);

        let mut config = lines.join("\n");
        config.push('\n');
        config
    }

    /// Regularises the bootstrap covariance once the estimate is done
    pub fn bootstrap_command(&self) -> Option<String> {
        if self.nboot == 0 {
            return None;
        }
        let outdir = self.outdir();
        Some(format!(
            "regularizeBootstrapCov.py --boot-matrix {} --qmle-fisher {} --fbase {}",
            outdir.join(format!("qmle_bootstrap_{}.txt", self.nboot)).display(),
            outdir.join(format!("qmle_it{}_fisher.txt", self.niter)).display(),
            outdir.join("qmle").display()
        ))
    }

    pub(super) fn directories(&self) -> Vec<PathBuf> {
        vec![self.outdir()]
    }

    pub(super) fn attachments(&self) -> Vec<(PathBuf, String)> {
        vec![(self.config_path(), self.config())]
    }

    pub(super) fn plan(&self, resources: &Resources) -> ScriptPlan {
        let mut estimate = format!(
            "srun -N {} -n {} -c 2 LyaPowerEstimateSQ {}",
            resources.nodes,
            resources.nthreads,
            self.config_path().display()
        );
        if !self.extra_opts.is_empty() {
            estimate.push(' ');
            estimate.push_str(&self.extra_opts);
        }

        ScriptPlan {
            jobname: format!("qmle-{}", self.foldername),
            outdir: self.outdir(),
            fname_core: "qmle".to_string(),
            env_command: None,
            commands: vec![estimate],
        }
    }
}
