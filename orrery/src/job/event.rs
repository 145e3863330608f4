//! Events the coordinator emits to observers on the control thread.

use std::fmt;

use thiserror::Error;

/// Identifier of one submitted job. Increases by one per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

impl JobId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// A progress update reported by a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub label: String,
    pub current: i64,
    pub min: i64,
    pub max: i64,
}

impl Progress {
    /// Completed fraction in `[0, 1]`. An empty range counts as done.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.max <= self.min {
            return 1.0;
        }
        let span = i128::from(self.max) - i128::from(self.min);
        let done = i128::from(self.current) - i128::from(self.min);
        (done as f64 / span as f64).clamp(0.0, 1.0)
    }
}

/// Why a job did not produce an artifact.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job observed the cancel flag, or was superseded by a newer submission.
    #[error("job was cancelled")]
    Cancelled,
    /// The job body failed for a domain reason.
    #[error("job failed: {0}")]
    Execution(String),
    /// The job body panicked; the panic was caught at the worker boundary.
    #[error("job panicked: {0}")]
    Panicked(String),
    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The control-thread finalize step rejected the artifact.
    #[error("finalize failed: {0}")]
    Finalize(String),
}

impl JobError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Notification delivered to [`JobObserver`]s, always on the control thread.
#[derive(Debug)]
pub enum JobEvent<'a, R, A> {
    /// Emitted synchronously inside `submit`, before the worker is spawned.
    Started { id: JobId, label: &'a str },
    Progress { id: JobId, progress: &'a Progress },
    Succeeded {
        id: JobId,
        request: &'a R,
        artifact: &'a A,
    },
    Failed {
        id: JobId,
        request: &'a R,
        error: &'a JobError,
    },
}

impl<R, A> JobEvent<'_, R, A> {
    #[must_use]
    pub const fn id(&self) -> JobId {
        match *self {
            Self::Started { id, .. }
            | Self::Progress { id, .. }
            | Self::Succeeded { id, .. }
            | Self::Failed { id, .. } => id,
        }
    }
}

/// Fire-and-forget receiver of job events (progress bars, status lines, logs).
pub trait JobObserver<R, A> {
    fn on_event(&mut self, event: &JobEvent<'_, R, A>);
}

impl<R, A, F> JobObserver<R, A> for F
where
    F: FnMut(&JobEvent<'_, R, A>),
{
    fn on_event(&mut self, event: &JobEvent<'_, R, A>) {
        self(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(current: i64, min: i64, max: i64) -> Progress {
        Progress {
            label: "loading".into(),
            current,
            min,
            max,
        }
    }

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(progress(50, 0, 100).fraction(), 0.5);
        assert_eq!(progress(-5, 0, 100).fraction(), 0.0);
        assert_eq!(progress(150, 0, 100).fraction(), 1.0);
        assert_eq!(progress(3, 3, 3).fraction(), 1.0);
    }

    #[test]
    fn fraction_handles_full_i64_range() {
        assert_eq!(progress(0, i64::MIN, i64::MAX).fraction(), 0.5);
        assert_eq!(progress(i64::MIN, i64::MIN, i64::MAX).fraction(), 0.0);
        assert_eq!(progress(i64::MAX, i64::MIN, i64::MAX).fraction(), 1.0);
        assert_eq!(progress(i64::MIN, -1, i64::MAX).fraction(), 0.0);
    }

    #[test]
    fn errors_render_one_line() {
        assert_eq!(JobError::Cancelled.to_string(), "job was cancelled");
        assert_eq!(
            JobError::Execution("model missing".into()).to_string(),
            "job failed: model missing"
        );
        assert!(JobError::Cancelled.is_cancelled());
        assert!(!JobError::Panicked("boom".into()).is_cancelled());
    }

    #[test]
    fn job_id_display() {
        assert_eq!(JobId::new(7).to_string(), "job-7");
    }
}
