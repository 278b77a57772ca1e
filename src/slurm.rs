//! Render batch scripts and hand them to SLURM

/// Job identifiers and dependency constraints between them
pub mod dependency;

/// Render `#SBATCH` headers and job commands into batch scripts
pub mod script;

/// Submit rendered scripts with sbatch and release held jobs
pub mod submit;
