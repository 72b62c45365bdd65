use super::*;

#[test]
fn backoff_doubles_and_caps() {
    let p = RetryPolicy::default();
    assert_eq!(p.backoff(1), Duration::from_secs(1));
    assert_eq!(p.backoff(2), Duration::from_secs(2));
    assert_eq!(p.backoff(3), Duration::from_secs(4));
    assert_eq!(p.backoff(4), Duration::from_secs(8));
    assert_eq!(p.backoff(10), Duration::from_secs(8));
    assert_eq!(p.backoff(u32::MAX), Duration::from_secs(8));
}

#[test]
fn attempt_budget_counts_the_first_try() {
    let p = RetryPolicy::default();
    assert!(p.allows_retry_after(1));
    assert!(p.allows_retry_after(2));
    assert!(!p.allows_retry_after(3));

    let once = RetryPolicy::immediate(0);
    assert_eq!(once.max_attempts, 1);
    assert!(!once.allows_retry_after(1));
    assert_eq!(once.backoff(5), Duration::ZERO);
}

#[test]
fn built_from_retrieval_config() {
    let cfg = RetrievalConfig {
        max_attempts: 5,
        backoff_base_ms: 250,
        backoff_max_ms: 1_000,
        ..RetrievalConfig::default()
    };
    let p = RetryPolicy::from(&cfg);
    assert_eq!(p.max_attempts, 5);
    assert_eq!(p.backoff(1), Duration::from_millis(250));
    assert_eq!(p.backoff(4), Duration::from_millis(1_000));
}
