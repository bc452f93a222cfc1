//! Retry helper for store calls that can fail transiently.

use std::{thread::sleep, time::Duration};

use rand::Rng;
use tracing::{error, warn};

/// Default number of retries for store calls before giving up.
pub const DEFAULT_STORE_CALL_MAX_RETRIES: u16 = 4;

/// Computes backoff delays between retry attempts.
pub trait Backoff {
    /// Base delay in ms.
    fn base_delay_ms(&self) -> u64;

    /// Generates the next delay given the current delay.
    fn next_delay_ms(&self, curr_delay_ms: u64) -> u64;
}

/// Exponential backoff with a fixed-point multiplier and random jitter.
///
/// The multiplier is expressed as a ratio (`multiplier / multiplier_base`) to
/// avoid floating-point math. Jitter of up to `jitter_ms` is added to every
/// delay so that retry storms from concurrent callers spread out.
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    multiplier: u64,
    multiplier_base: u64,
    jitter_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(base_delay_ms: u64, multiplier: u64, multiplier_base: u64, jitter_ms: u64) -> Self {
        assert!(multiplier_base != 0);
        Self {
            base_delay_ms,
            multiplier,
            multiplier_base,
            jitter_ms,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        // 100ms growing 2x per attempt, with up to 50ms of jitter.
        Self {
            base_delay_ms: 100,
            multiplier: 2,
            multiplier_base: 1,
            jitter_ms: 50,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    fn next_delay_ms(&self, curr_delay_ms: u64) -> u64 {
        curr_delay_ms * self.multiplier / self.multiplier_base
    }
}

impl ExponentialBackoff {
    fn jittered(&self, delay_ms: u64) -> u64 {
        if self.jitter_ms == 0 {
            return delay_ms;
        }
        delay_ms + rand::thread_rng().gen_range(0..self.jitter_ms)
    }
}

/// Runs a fallible operation, retrying on `Err` up to `max_retries` times
/// with delays from the provided backoff.
///
/// Logs a warning on each failed attempt and an error when retries are
/// exhausted, at which point the last error is returned.
pub fn retry_with_backoff<R, E, F>(
    name: &str,
    max_retries: u16,
    backoff: &ExponentialBackoff,
    operation: F,
) -> Result<R, E>
where
    F: FnMut() -> Result<R, E>,
    E: std::fmt::Debug,
{
    retry_with_backoff_inner(name, max_retries, backoff, operation, sleep)
}

/// Inner retry loop, generic over the sleep function so tests can observe
/// delays without actually sleeping.
fn retry_with_backoff_inner<R, E, F, S>(
    name: &str,
    max_retries: u16,
    backoff: &ExponentialBackoff,
    mut operation: F,
    mut sleep_fn: S,
) -> Result<R, E>
where
    F: FnMut() -> Result<R, E>,
    E: std::fmt::Debug,
    S: FnMut(Duration),
{
    let mut delay = backoff.base_delay_ms();

    for attempt in 0..=max_retries {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries => {
                warn!(?err, %name, attempt = attempt + 1, "operation failed, retrying");
                sleep_fn(Duration::from_millis(backoff.jittered(delay)));
                delay = backoff.next_delay_ms(delay);
            }
            Err(err) => {
                error!(%name, "max retries exceeded, returning last error");
                return Err(err);
            }
        }
    }

    unreachable!()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn no_jitter_backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(100, 2, 1, 0)
    }

    #[test]
    fn exhausts_retries_and_returns_last_error() {
        let backoff = no_jitter_backoff();
        let sleeps = Arc::new(Mutex::new(Vec::new()));
        let attempts = Arc::new(Mutex::new(0));

        let result = retry_with_backoff_inner(
            "always_fails",
            2,
            &backoff,
            {
                let attempts = Arc::clone(&attempts);
                move || -> Result<(), &str> {
                    *attempts.lock().unwrap() += 1;
                    Err("nope")
                }
            },
            {
                let sleeps = Arc::clone(&sleeps);
                move |d| sleeps.lock().unwrap().push(d.as_millis() as u64)
            },
        );

        assert_eq!(result, Err("nope"));
        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(sleeps.lock().unwrap().to_vec(), vec![100, 200]);
    }

    #[test]
    fn stops_retrying_after_success() {
        let backoff = no_jitter_backoff();
        let attempts = Arc::new(Mutex::new(0));

        let result = retry_with_backoff_inner(
            "flaky",
            5,
            &backoff,
            {
                let attempts = Arc::clone(&attempts);
                move || -> Result<u32, &str> {
                    let mut n = attempts.lock().unwrap();
                    *n += 1;
                    if *n < 3 {
                        Err("not yet")
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| {},
        );

        assert_eq!(result, Ok(42));
        assert_eq!(*attempts.lock().unwrap(), 3);
    }
}
