//! Retry/Catch policy matching and backoff computation.

use rand::Rng;

use stateflow_core::types::{error_names, Catcher, JitterStrategy, Retrier};

/// First retrier whose `ErrorEquals` covers the error, with its index for
/// per-retrier attempt bookkeeping.
pub(crate) fn find_retrier<'a>(
    retriers: &'a [Retrier],
    error: &str,
) -> Option<(usize, &'a Retrier)> {
    retriers
        .iter()
        .enumerate()
        .find(|(_, r)| matches(&r.error_equals, error))
}

pub(crate) fn find_catcher<'a>(catchers: &'a [Catcher], error: &str) -> Option<&'a Catcher> {
    catchers.iter().find(|c| matches(&c.error_equals, error))
}

fn matches(error_equals: &[String], error: &str) -> bool {
    error_equals
        .iter()
        .any(|e| e == error || e == error_names::ALL)
}

/// Backoff before the given 1-based attempt: `interval * rate^(attempt-1)`,
/// capped by `MaxDelaySeconds`, with full jitter drawing uniformly from
/// `[0, delay]`.
pub(crate) fn backoff_delay(retrier: &Retrier, attempt: u32) -> f64 {
    let mut delay = retrier.interval() * retrier.backoff().powi(attempt.saturating_sub(1) as i32);
    if let Some(cap) = retrier.max_delay_seconds {
        delay = delay.min(cap);
    }
    match retrier.jitter_strategy {
        Some(JitterStrategy::Full) => {
            if delay > 0.0 {
                rand::thread_rng().gen_range(0.0..=delay)
            } else {
                0.0
            }
        }
        _ => delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn retrier(doc: serde_json::Value) -> Retrier {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let retriers = vec![
            retrier(json!({ "ErrorEquals": ["States.Timeout"], "MaxAttempts": 5 })),
            retrier(json!({ "ErrorEquals": ["States.ALL"], "MaxAttempts": 1 })),
        ];
        let (idx, r) = find_retrier(&retriers, "States.Timeout").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(r.attempts(), 5);

        let (idx, _) = find_retrier(&retriers, "Custom.Error").unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_no_match() {
        let retriers = vec![retrier(json!({ "ErrorEquals": ["States.Timeout"] }))];
        assert!(find_retrier(&retriers, "Custom.Error").is_none());
    }

    #[test]
    fn test_backoff_progression() {
        let r = retrier(json!({
            "ErrorEquals": ["States.ALL"],
            "IntervalSeconds": 2.0,
            "BackoffRate": 3.0
        }));
        assert_eq!(backoff_delay(&r, 1), 2.0);
        assert_eq!(backoff_delay(&r, 2), 6.0);
        assert_eq!(backoff_delay(&r, 3), 18.0);
    }

    #[test]
    fn test_backoff_cap() {
        let r = retrier(json!({
            "ErrorEquals": ["States.ALL"],
            "IntervalSeconds": 10.0,
            "BackoffRate": 10.0,
            "MaxDelaySeconds": 15.0
        }));
        assert_eq!(backoff_delay(&r, 2), 15.0);
    }

    #[test]
    fn test_full_jitter_within_bounds() {
        let r = retrier(json!({
            "ErrorEquals": ["States.ALL"],
            "IntervalSeconds": 4.0,
            "JitterStrategy": "FULL"
        }));
        for _ in 0..50 {
            let d = backoff_delay(&r, 1);
            assert!((0.0..=4.0).contains(&d));
        }
    }
}
