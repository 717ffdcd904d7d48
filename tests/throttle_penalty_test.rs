// Throttle engine scenarios against the in-memory KV store: the login
// brute-force sequence and penalty decay over time.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use keygate_backend::app_config::{ThrottleSettings, ThrottleTierSettings};
use keygate_backend::cache::{KvStore, MemoryKvStore};
use keygate_backend::services::throttle::{ThrottleDecision, ThrottleService, ThrottleTier};

fn auth_tier() -> ThrottleTierSettings {
    ThrottleTierSettings {
        throttle_threshold: 3,
        max_requests_per_minute: 5,
        window_seconds: 60,
        max_delay_ms: 1000,
        penalty_seconds: 300,
    }
}

fn settings() -> ThrottleSettings {
    ThrottleSettings {
        enabled: true,
        global: ThrottleTierSettings {
            throttle_threshold: 1000,
            max_requests_per_minute: 2000,
            window_seconds: 60,
            max_delay_ms: 2000,
            penalty_seconds: 300,
        },
        user: ThrottleTierSettings {
            throttle_threshold: 60,
            max_requests_per_minute: 120,
            window_seconds: 60,
            max_delay_ms: 1500,
            penalty_seconds: 300,
        },
        auth: auth_tier(),
    }
}

fn service() -> (Arc<MemoryKvStore>, ThrottleService) {
    let store = Arc::new(MemoryKvStore::new());
    (store.clone(), ThrottleService::new(store, settings()))
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

const IDENTITY: &str = "203.0.113.9:/api/v1/auth/login";
const PENALTY_KEY: &str = "throttle:auth:203.0.113.9:/api/v1/auth/login:penalty";

#[tokio::test]
async fn six_consecutive_logins_end_blocked_in_penalty() {
    let (_store, service) = service();

    // Requests 1-3: clean
    for _ in 0..3 {
        assert!(matches!(
            service.check(ThrottleTier::Auth, IDENTITY).await.unwrap(),
            ThrottleDecision::Allowed { .. }
        ));
    }

    // Requests 4-5: progressively delayed
    for _ in 0..2 {
        assert!(matches!(
            service.check(ThrottleTier::Auth, IDENTITY).await.unwrap(),
            ThrottleDecision::Throttled { .. }
        ));
    }

    // Request 6: blocked, fresh penalty
    match service.check(ThrottleTier::Auth, IDENTITY).await.unwrap() {
        ThrottleDecision::Blocked(info) => {
            assert!(info.in_penalty);
            assert_eq!(info.remaining_attempts, 0);
            assert_eq!(info.next_attempt_in_seconds, 60);
        },
        other => panic!("expected Blocked on the sixth request, got {:?}", other),
    }
}

#[tokio::test]
async fn penalty_decay_releases_one_attempt_then_blocks_again() {
    let (store, service) = service();

    // Drive into penalty
    for _ in 0..6 {
        service.check(ThrottleTier::Auth, IDENTITY).await.unwrap();
    }

    // Advance the penalty clock by 65 seconds
    store
        .set(PENALTY_KEY, (now_secs() - 65).to_string(), None)
        .await
        .unwrap();

    // The released attempt is consumed
    match service.check(ThrottleTier::Auth, IDENTITY).await.unwrap() {
        ThrottleDecision::Allowed { remaining_released } => {
            assert_eq!(remaining_released, Some(0));
        },
        other => panic!("expected the released attempt, got {:?}", other),
    }

    // An immediate second attempt is blocked again
    assert!(matches!(
        service.check(ThrottleTier::Auth, IDENTITY).await.unwrap(),
        ThrottleDecision::Blocked(_)
    ));
}

#[tokio::test]
async fn counter_window_boundary_blocked_only_past_max() {
    let (_store, service) = service();

    let mut decisions = Vec::new();
    for _ in 0..6 {
        decisions.push(service.check(ThrottleTier::Auth, IDENTITY).await.unwrap());
    }

    // Count 5 (== max) throttled, count 6 blocked
    assert!(matches!(decisions[4], ThrottleDecision::Throttled { .. }));
    assert!(matches!(decisions[5], ThrottleDecision::Blocked(_)));
}

#[tokio::test]
async fn identities_do_not_share_counters() {
    let (_store, service) = service();

    for _ in 0..6 {
        service.check(ThrottleTier::Auth, IDENTITY).await.unwrap();
    }

    // A different IP on the same path is untouched
    assert!(matches!(
        service
            .check(ThrottleTier::Auth, "198.51.100.7:/api/v1/auth/login")
            .await
            .unwrap(),
        ThrottleDecision::Allowed { .. }
    ));
}

#[tokio::test]
async fn penalty_survives_renewed_normal_window() {
    let (store, service) = service();

    for _ in 0..6 {
        service.check(ThrottleTier::Auth, IDENTITY).await.unwrap();
    }

    // Even if the window counter disappears, the penalty governs
    store
        .remove("throttle:auth:203.0.113.9:/api/v1/auth/login")
        .await
        .unwrap();

    assert!(matches!(
        service.check(ThrottleTier::Auth, IDENTITY).await.unwrap(),
        ThrottleDecision::Blocked(_)
    ));
}
