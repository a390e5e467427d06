//! Tests for the LoginGuard builder pattern

use std::sync::Arc;

use chrono::Duration;
use lockout::{LockoutConfig, LoginGuardBuilder, LoginGuardBuilderError, ManualClock};

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_sqlite() {
    let guard = LoginGuardBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build guard");

    guard.health_check().await.expect("Health check failed");
    assert!(guard.check("1.2.3.4", "alice").await.unwrap().is_allowed());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_sqlite_pool() {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite");

    let guard = LoginGuardBuilder::new()
        .with_sqlite_pool(pool)
        .apply_migrations(true)
        .build()
        .await
        .expect("Failed to build guard");

    guard.health_check().await.expect("Health check failed");
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_manual_migration() {
    let guard = LoginGuardBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .build()
        .await
        .expect("Failed to build guard");

    // Without migrations the address store is unusable and must refuse
    assert!(guard.check("1.2.3.4", "alice").await.is_err());

    guard.migrate().await.expect("Migration failed");
    assert!(guard.check("1.2.3.4", "alice").await.unwrap().is_allowed());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_address_lock_persists() {
    let clock = ManualClock::default();
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();

    let guard = LoginGuardBuilder::new()
        .with_sqlite_pool(pool.clone())
        .with_identity_config(LockoutConfig::disabled())
        .with_clock(Arc::new(clock.clone()))
        .apply_migrations(true)
        .build()
        .await
        .unwrap();
    for _ in 0..5 {
        guard
            .authenticate("1.2.3.4", "alice", async { Ok::<_, std::io::Error>(false) })
            .await
            .unwrap();
    }
    drop(guard);

    // A new guard over the same database sees the lock
    let guard = LoginGuardBuilder::new()
        .with_sqlite_pool(pool)
        .with_clock(Arc::new(clock.clone()))
        .build()
        .await
        .unwrap();
    assert!(!guard.check("1.2.3.4", "bob").await.unwrap().is_allowed());

    clock.advance(Duration::minutes(1));
    assert!(guard.check("1.2.3.4", "bob").await.unwrap().is_allowed());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_invalid_sqlite_url() {
    let result = LoginGuardBuilder::new()
        .with_sqlite("sqlite:///nonexistent/dir/lockout.db")
        .await;

    assert!(matches!(
        result,
        Err(LoginGuardBuilderError::StorageConnection(_))
    ));
}

#[tokio::test]
async fn test_builder_with_memory_and_custom_configs() {
    let guard = LoginGuardBuilder::new()
        .with_memory()
        .with_address_config(LockoutConfig::flat(10, Duration::minutes(5)))
        .with_identity_config(LockoutConfig::flat(3, Duration::minutes(30)))
        .build()
        .await
        .expect("Failed to build guard");

    assert_eq!(guard.address_limiter().config().max_attempts, 10);
    assert_eq!(guard.identity_limiter().config().max_attempts, 3);
    guard.migrate().await.unwrap();
    guard.health_check().await.unwrap();
}
