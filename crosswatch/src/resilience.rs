//! Resilience patterns for talking to vendor APIs: timeout configuration and
//! re-exports of production-grade circuit breaker (`failsafe`) logic.

pub mod timeout {
    //! Timeout configuration for outbound HTTP requests.

    use std::time::Duration;

    /// Default timeout for external HTTP requests
    pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Timeout configuration
    #[derive(Debug, Clone, Copy)]
    pub struct TimeoutConfig {
        pub http: Duration,
    }

    impl Default for TimeoutConfig {
        fn default() -> Self {
            Self { http: HTTP_REQUEST_TIMEOUT }
        }
    }

    impl TimeoutConfig {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Set HTTP request timeout
        #[must_use]
        pub const fn with_http_timeout(mut self, timeout: Duration) -> Self {
            self.http = timeout;
            self
        }
    }
}

pub mod retry {
    //! Error classification used to decide whether a pair-sync step should be
    //! retried at the orchestration level (vendor-level retry/backoff already
    //! happens inside `crosswatch_providers::http`).

    /// Check if an error should be retried
    ///
    /// Checks the error for known transient I/O error kinds, then falls back to
    /// string matching for errors that don't expose `std::io::Error` directly.
    pub fn should_retry_error(err: &(dyn std::error::Error + 'static)) -> bool {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return is_transient_io_error(io_err);
        }

        let err_msg = err.to_string().to_lowercase();
        err_msg.contains("timed out")
            || err_msg.contains("timeout")
            || err_msg.contains("connection reset")
            || err_msg.contains("connection refused")
            || err_msg.contains("connection aborted")
            || err_msg.contains("broken pipe")
    }

    fn is_transient_io_error(err: &std::io::Error) -> bool {
        matches!(
            err.kind(),
            std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        )
    }
}

pub mod circuit_breaker {
    //! Circuit breaker pattern for vendor APIs, backed by the `failsafe` crate.
    //! One breaker per `(provider, instance)` pair is expected to live in the
    //! registry, so a flaky backend doesn't get hammered every reconcile pass.

    use std::time::Duration;

    pub use failsafe::CircuitBreaker;

    /// Opens after `failure_threshold` consecutive failures.
    /// Uses exponential backoff from `min_backoff` to `max_backoff` in open state.
    pub fn create(
        failure_threshold: u32,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> failsafe::StateMachine<
        failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
        (),
    > {
        let backoff = failsafe::backoff::exponential(min_backoff, max_backoff);
        let policy = failsafe::failure_policy::consecutive_failures(failure_threshold, backoff);
        failsafe::Config::new().failure_policy(policy).build()
    }

    /// Default settings: 5 consecutive failures, 10-60s backoff.
    pub fn create_default() -> failsafe::StateMachine<
        failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
        (),
    > {
        create(5, Duration::from_secs(10), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::CircuitBreaker;
    use std::time::Duration;
    use timeout::TimeoutConfig;

    #[test]
    fn test_timeout_config() {
        let config = TimeoutConfig::new().with_http_timeout(Duration::from_secs(60));
        assert_eq!(config.http.as_secs(), 60);
    }

    #[test]
    fn test_circuit_breaker_failsafe() {
        let cb = circuit_breaker::create(3, Duration::from_secs(2), Duration::from_secs(10));
        assert!(cb.is_call_permitted());
        for _ in 0..3 {
            cb.on_error();
        }
        assert!(!cb.is_call_permitted());
    }

    #[test]
    fn test_circuit_breaker_recovery() {
        let cb = circuit_breaker::create(2, Duration::from_secs(2), Duration::from_secs(5));
        cb.on_error();
        cb.on_error();
        assert!(!cb.is_call_permitted());

        std::thread::sleep(Duration::from_millis(2500));
        assert!(cb.is_call_permitted());

        cb.on_success();
        assert!(cb.is_call_permitted());
    }

    #[test]
    fn test_should_retry_error() {
        let timeout_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        assert!(retry::should_retry_error(&timeout_err));

        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        assert!(!retry::should_retry_error(&not_found));
    }
}
