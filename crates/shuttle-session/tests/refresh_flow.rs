//! End-to-end refresh behavior through the public API.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use shuttle_protocol::{Identity, RoleCode, UserId};
use shuttle_session::{
    MemoryRefreshStore, RefreshTokenStore, SessionConfig, SessionError, SessionManager,
    TokenError,
};
use uuid::Uuid;

const SECRET: &[u8] = b"integration-signing-secret-32-bytes-long";
const KEY: &[u8] = b"fedcba9876543210fedcba9876543210";

fn manager() -> SessionManager<MemoryRefreshStore> {
    SessionManager::new(SECRET, KEY, MemoryRefreshStore::new(), SessionConfig::default())
        .expect("valid keys")
}

fn driver() -> Identity {
    Identity {
        user_id: UserId(42),
        user_uuid: Uuid::from_u128(42),
        display_name: "Sari".into(),
        role: RoleCode::Driver,
    }
}

// =========================================================================
// Rotation
// =========================================================================

#[tokio::test]
async fn test_rotate_twice_immediately_is_too_soon_or_invalid() {
    let m = manager();
    let t = SystemTime::now();
    let pair = m.login_at(&driver(), t).await.unwrap();

    let first = m.rotate_at(&pair.refresh.token, t).await.unwrap();
    let rotated = first.refresh.expect("rotation returns a refresh token");
    assert!(m.authenticate_at(&first.access.token, t).is_ok());

    let half_second = t + Duration::from_millis(500);

    // The replaced token no longer matches the record.
    assert!(matches!(
        m.rotate_at(&pair.refresh.token, half_second).await,
        Err(SessionError::Token(TokenError::Invalid(_)))
    ));
    // The current token is inside the guard window.
    assert!(matches!(
        m.rotate_at(&rotated.token, half_second).await,
        Err(SessionError::TooSoon)
    ));
}

#[tokio::test]
async fn test_rotate_after_guard_window_succeeds() {
    let m = manager();
    let t = SystemTime::now();
    let pair = m.login_at(&driver(), t).await.unwrap();

    let first = m.rotate_at(&pair.refresh.token, t).await.unwrap().refresh.unwrap();
    let later = t + Duration::from_secs(2);
    let second = m.rotate_at(&first.token, later).await.unwrap();

    let current = second.refresh.unwrap();
    let record = m.store().fetch(driver().user_uuid).await.unwrap();
    assert_eq!(record.token, current.token);
    assert_eq!(record.last_used_at, Some(later));
}

#[tokio::test]
async fn test_rotation_keeps_login_ceiling() {
    let m = manager();
    let t = SystemTime::now();
    let pair = m.login_at(&driver(), t).await.unwrap();
    let ceiling = pair.refresh.claims.abs_exp;

    let day = Duration::from_secs(24 * 60 * 60);
    let rotated = m
        .rotate_at(&pair.refresh.token, t + day * 10)
        .await
        .unwrap()
        .refresh
        .unwrap();
    assert_eq!(rotated.claims.abs_exp, ceiling);
    assert_eq!(Some(rotated.claims.exp), ceiling);
}

#[tokio::test]
async fn test_refresh_access_keeps_refresh_token_current() {
    let m = manager();
    let t = SystemTime::now();
    let pair = m.login_at(&driver(), t).await.unwrap();

    let outcome = m.refresh_access_at(&pair.refresh.token, t).await.unwrap();
    assert!(outcome.refresh.is_none());
    assert!(m.authenticate_at(&outcome.access.token, t).is_ok());

    assert!(matches!(
        m.refresh_access_at(&pair.refresh.token, t + Duration::from_millis(10)).await,
        Err(SessionError::TooSoon)
    ));
    assert!(m
        .refresh_access_at(&pair.refresh.token, t + Duration::from_secs(5))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_rotate_expired_refresh_returns_expired() {
    let m = manager();
    let t = SystemTime::now();
    let pair = m.login_at(&driver(), t).await.unwrap();

    let result = m
        .rotate_at(&pair.refresh.token, t + Duration::from_secs(16 * 24 * 60 * 60))
        .await;
    assert!(matches!(result, Err(SessionError::Token(TokenError::Expired))));
}

#[tokio::test]
async fn test_concurrent_rotations_only_one_wins() {
    let m = Arc::new(manager());
    let t = SystemTime::now();
    let pair = m.login_at(&driver(), t).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let m = Arc::clone(&m);
        let token = pair.refresh.token.clone();
        handles.push(tokio::spawn(async move { m.rotate_at(&token, t).await }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}

// =========================================================================
// Logout
// =========================================================================

#[tokio::test]
async fn test_logout_then_fresh_login_is_valid() {
    let m = manager();
    let pair = m.login(&driver()).await.unwrap();
    let header = format!("Bearer {}", pair.access.token);

    assert!(m.authenticate(&header).is_ok());
    m.logout(driver().user_uuid, &header).await.unwrap();
    assert_eq!(m.authenticate(&header).unwrap_err().status_code(), 401);

    let fresh = m.login(&driver()).await.unwrap();
    assert!(m.authenticate(&fresh.access.token).is_ok());
    assert!(m.rotate(&fresh.refresh.token).await.is_ok());
}
