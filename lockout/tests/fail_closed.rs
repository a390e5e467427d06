//! Storage failures must refuse logins, never permit them

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use lockout::{
    Error, GuardError, LockoutRepository, LockoutState, LoginGuard, RepositoryProvider,
};
use lockout_core::{error::StorageError, policy::Transition};

struct UnavailableRepository;

fn unavailable() -> Error {
    Error::Storage(StorageError::Timeout(std::time::Duration::from_secs(5)))
}

#[async_trait]
impl LockoutRepository for UnavailableRepository {
    async fn get(&self, _key: &str) -> Result<Option<LockoutState>, Error> {
        Err(unavailable())
    }

    async fn put(&self, _state: &LockoutState) -> Result<(), Error> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &str) -> Result<bool, Error> {
        Err(unavailable())
    }

    async fn for_each(
        &self,
        _visit: &mut (dyn for<'s> FnMut(&'s LockoutState) + Send),
    ) -> Result<(), Error> {
        Err(unavailable())
    }

    async fn update(
        &self,
        _key: &str,
        _apply: &mut (dyn for<'s> FnMut(Option<&'s LockoutState>) -> Result<Transition, Error> + Send),
    ) -> Result<Option<LockoutState>, Error> {
        Err(unavailable())
    }
}

struct UnavailableStorage {
    lockout: Arc<UnavailableRepository>,
}

#[async_trait]
impl RepositoryProvider for UnavailableStorage {
    type LockoutRepo = UnavailableRepository;

    fn lockout(&self) -> Arc<Self::LockoutRepo> {
        self.lockout.clone()
    }

    async fn migrate(&self) -> Result<(), Error> {
        Err(unavailable())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Err(unavailable())
    }
}

fn guard() -> LoginGuard<UnavailableStorage> {
    LoginGuard::new(Arc::new(UnavailableStorage {
        lockout: Arc::new(UnavailableRepository),
    }))
}

#[tokio::test]
async fn test_check_fails_closed() {
    let error = guard().check("1.2.3.4", "alice").await.unwrap_err();
    assert!(error.is_transient());
}

#[tokio::test]
async fn test_authenticate_does_not_verify_when_storage_is_down() {
    let verified = Arc::new(AtomicBool::new(false));
    let flag = verified.clone();

    let result = guard()
        .authenticate("1.2.3.4", "alice", async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, std::io::Error>(true)
        })
        .await;

    assert!(matches!(result, Err(GuardError::Lockout(_))));
    assert!(!verified.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_health_check_reports_outage() {
    let guard = guard();
    assert!(guard.health_check().await.is_err());
    assert!(guard.migrate().await.is_err());
}
