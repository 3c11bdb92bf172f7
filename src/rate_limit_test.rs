use super::*;

fn limiter(per_employee: usize, global: usize) -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
        per_employee_limit: per_employee,
        per_employee_window: Duration::from_secs(60),
        global_limit: global,
        global_window: Duration::from_secs(60),
    })
}

#[test]
fn per_employee_allows_up_to_limit() {
    let rl = limiter(3, 100);
    let now = Instant::now();
    for i in 0..3 {
        assert!(rl.check_and_record_at("Avi", now).is_ok(), "request {i} should succeed");
    }
    assert!(matches!(
        rl.check_and_record_at("Avi", now),
        Err(RateLimitError::PerEmployee { limit: 3, .. })
    ));
}

#[test]
fn global_limit_spans_employees() {
    let rl = limiter(10, 2);
    let now = Instant::now();
    rl.check_and_record_at("Avi", now).unwrap();
    rl.check_and_record_at("Rina", now).unwrap();
    assert!(matches!(rl.check_and_record_at("Moshe", now), Err(RateLimitError::Global { .. })));
}

#[test]
fn rejected_request_is_not_recorded() {
    let rl = limiter(1, 2);
    let now = Instant::now();
    rl.check_and_record_at("Avi", now).unwrap();
    assert!(rl.check_and_record_at("Avi", now).is_err());
    // The rejection above must not have consumed the second global slot.
    assert!(rl.check_and_record_at("Rina", now).is_ok());
}

#[test]
fn window_expiry_allows_new_requests() {
    let rl = limiter(2, 100);
    let start = Instant::now();
    rl.check_and_record_at("Avi", start).unwrap();
    rl.check_and_record_at("Avi", start).unwrap();
    assert!(rl.check_and_record_at("Avi", start).is_err());

    let later = start + Duration::from_secs(60) + Duration::from_millis(1);
    assert!(rl.check_and_record_at("Avi", later).is_ok());
}

#[test]
fn distinct_employees_do_not_interfere() {
    let rl = limiter(1, 100);
    let now = Instant::now();
    rl.check_and_record_at("Avi", now).unwrap();
    assert!(rl.check_and_record_at("Avi", now).is_err());
    assert!(rl.check_and_record_at("Rina", now).is_ok());
}

#[test]
fn errors_map_to_429_and_are_retryable() {
    let err = RateLimitError::Global { limit: 1, window_secs: 60 };
    assert_eq!(err.http_status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(err.retryable());
}
