use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier returned by the batch system when a job is submitted
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl JobId {
    /// Skipped, batch disabled, dry run or reused: nothing reached the batch system
    pub const NOT_SUBMITTED: JobId = JobId(-1);

    pub fn is_submitted(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DependencyKind {
    /// Start only if every upstream job succeeded
    #[default]
    AfterOk,
    /// Start once every upstream job ended, whatever its exit status
    AfterAny,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DependencyKind::AfterOk => write!(f, "afterok"),
            DependencyKind::AfterAny => write!(f, "afterany"),
        }
    }
}

/// Run after all of `ids`
///
/// Sentinel identifiers are kept but ignored, so a skipped upstream job never constrains anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dependency {
    pub kind: DependencyKind,
    ids: Vec<JobId>,
}

impl Dependency {
    pub fn none() -> Self {
        Dependency::default()
    }

    pub fn after_ok<I: IntoIterator<Item = JobId>>(ids: I) -> Self {
        Dependency { kind: DependencyKind::AfterOk, ids: ids.into_iter().collect() }
    }

    pub fn after_any<I: IntoIterator<Item = JobId>>(ids: I) -> Self {
        Dependency { kind: DependencyKind::AfterAny, ids: ids.into_iter().collect() }
    }

    /// Identifiers that were actually submitted
    pub fn ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.ids.iter().copied().filter(|id| id.is_submitted())
    }

    pub fn is_empty(&self) -> bool {
        self.ids().next().is_none()
    }

    /// `--dependency=afterok:5:7`, or `None` when nothing upstream was submitted
    pub fn to_flag(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let ids: Vec<String> = self.ids().map(|id| id.to_string()).collect();
        Some(format!("--dependency={}:{}", self.kind, ids.join(":")))
    }
}

impl From<JobId> for Dependency {
    fn from(id: JobId) -> Self {
        Dependency::after_ok([id])
    }
}
