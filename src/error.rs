use thiserror::Error;

/// Failure of the suspended operation an add waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LatencyError {
    #[error("simulated operation failed")]
    Failed,
    #[error("pending operation was abandoned before it resolved")]
    Abandoned,
}

/// The accumulator's only error kind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("add({a}, {b}) failed; total left unchanged")]
    OperationFailed {
        a: f64,
        b: f64,
        #[source]
        source: LatencyError,
    },
}

/// Returned when a [`ManualScheduler`](crate::ManualScheduler) cannot settle
/// the work it was asked to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DrainError {
    #[error("future did not complete after draining the task queue ({pending_timers} timer(s) still pending)")]
    Stalled { pending_timers: usize },
    #[error("aborting after running {limit} timers, assuming an infinite loop")]
    TimerLimit { limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn operation_failed_exposes_latency_source() {
        let err = Error::OperationFailed {
            a: 2.0,
            b: 2.0,
            source: LatencyError::Failed,
        };
        assert_eq!(err.to_string(), "add(2, 2) failed; total left unchanged");
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "simulated operation failed");
    }

    #[test]
    fn timer_limit_message_names_limit() {
        let err = DrainError::TimerLimit { limit: 10 };
        assert!(err.to_string().contains("10 timers"));
    }
}
