use std::any::Any;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error a fallible work item may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A single work item that failed, either by returning an error or by panicking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("work item {index} failed: {reason}")]
pub struct WorkerFailure {
    /// Position of the item in the submitted batch (or the loop index).
    pub index: i64,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{} of {total} work items failed: {}", .failures.len(), join_failures(.failures))]
    Composite {
        total: usize,
        failures: Vec<WorkerFailure>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Failures carried by a composite error, empty for every other kind.
    pub fn failures(&self) -> &[WorkerFailure] {
        match self {
            Error::Composite { failures, .. } => failures,
            _ => &[],
        }
    }

    pub(crate) fn composite(total: usize, mut failures: Vec<WorkerFailure>) -> Self {
        failures.sort_by_key(|f| f.index);
        Error::Composite { total, failures }
    }
}

fn join_failures(failures: &[WorkerFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Extracts a readable message out of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::catch_unwind;

    #[test]
    fn composite_message() {
        let err = Error::composite(
            3,
            vec![
                WorkerFailure {
                    index: 2,
                    reason: "two".into(),
                },
                WorkerFailure {
                    index: 0,
                    reason: "zero".into(),
                },
            ],
        );
        assert_eq!(
            err.to_string(),
            "2 of 3 work items failed: work item 0 failed: zero; work item 2 failed: two",
        );
        assert_eq!(err.failures()[0].index, 0);
    }

    #[test]
    fn panic_payloads() {
        let payload = catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload), "static");

        let n = 7;
        let payload = catch_unwind(|| panic!("formatted {}", n)).unwrap_err();
        assert_eq!(panic_message(payload), "formatted 7");

        let payload = catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(payload), "panic with a non-string payload");
    }

    #[test]
    fn non_composite_has_no_failures() {
        assert!(Error::Config("x".into()).failures().is_empty());
    }
}
