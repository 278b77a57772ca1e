use std::fmt;

/// What the batch system was last told about a submission
///
/// Lookup tables are submitted held and released once everything that reads them is queued.
/// Terminal states (completed, failed) are only known to the batch system; the summary step
/// asks `sacct` for them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubmissionState {
    Held,
    Released,
    Queued,
}

impl SubmissionState {
    /// stored in the `state` column
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Held => "held",
            SubmissionState::Released => "released",
            SubmissionState::Queued => "queued",
        }
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
