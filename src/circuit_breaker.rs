use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Breaker shared by every outbound WhatsApp Cloud API call.
pub type ApiCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates the circuit breaker guarding the messaging provider.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// Which errors count as failures is decided by the caller (see
/// `failsafe::futures::CircuitBreaker::call_with`); provider 4xx answers are
/// the caller's fault and should not trip it.
pub fn create_api_circuit_breaker() -> ApiCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::Error;

    #[test]
    fn opens_after_five_failures() {
        use failsafe::CircuitBreaker;

        let cb = create_api_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("simulated error"));
            assert!(result.is_err());
        }

        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[tokio::test]
    async fn ignored_errors_do_not_open_the_circuit() {
        use failsafe::futures::CircuitBreaker;

        let cb = create_api_circuit_breaker();

        for _ in 0..10 {
            let result = cb
                .call_with(
                    |e: &&str| *e == "transient",
                    async { Err::<(), &str>("client error") },
                )
                .await;
            assert!(matches!(result, Err(Error::Inner("client error"))));
        }

        let result = cb.call_with(|_: &&str| true, async { Ok::<i32, &str>(7) }).await;
        assert_eq!(result.ok(), Some(7));
    }
}
