use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use lockout::LoginGuard;
use lockout_core::RepositoryProvider;

use crate::error::LockoutRejection;

pub struct GuardState<R: RepositoryProvider> {
    pub guard: Arc<LoginGuard<R>>,
}

impl<R: RepositoryProvider> GuardState<R> {
    pub fn new(guard: Arc<LoginGuard<R>>) -> Self {
        Self { guard }
    }
}

impl<R: RepositoryProvider> Clone for GuardState<R> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
        }
    }
}

/// Refuse requests from locked source addresses.
///
/// The client address comes from `ConnectInfo<SocketAddr>`, so the app must be
/// served with `into_make_service_with_connect_info::<SocketAddr>()`. Allowed
/// requests carry the address [`LockoutStatus`](lockout::LockoutStatus) in their
/// extensions for the handler.
pub async fn address_lockout<R>(
    State(state): State<GuardState<R>>,
    mut request: Request,
    next: Next,
) -> Result<Response, LockoutRejection>
where
    R: RepositoryProvider,
{
    let address = client_address(&request).ok_or_else(|| {
        tracing::error!("Missing connection info, cannot key address lockout");
        LockoutRejection::Internal("missing connection info".to_string())
    })?;

    let status = state
        .guard
        .address_limiter()
        .enforce(&address)
        .await
        .map_err(|e| {
            if e.is_rate_limited() {
                tracing::debug!(address = %address, "Request refused, address locked");
            } else {
                tracing::error!(address = %address, error = %e, "Address lockout check failed");
            }
            LockoutRejection::from(e)
        })?;

    request.extensions_mut().insert(status);
    Ok(next.run(request).await)
}

/// The source IP of `request`, as a lockout key.
pub fn client_address(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}
