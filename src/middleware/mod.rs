use actix_session::{
    config::{CookieContentSecurity, PersistentSession},
    storage::CookieSessionStore,
    SessionExt, SessionMiddleware,
};
use actix_web::cookie::{Key, SameSite};
use actix_web::{
    body::BoxBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage,
};

use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::{authenticate, AuthBackend, AuthService, AuthenticatedUser, SESSION_USER_KEY};
use crate::config::SessionConfig;
use crate::database::Repository;
use crate::permissions::Permission;
use crate::throttle::{ThrottleClass, ThrottleRate, ThrottleStore};
use crate::utils::error::AppError;
use crate::utils::logging::log_request;

/// Cookie signing/encryption key. Build it once and share it between workers.
pub fn session_key(config: &SessionConfig) -> Key {
    if config.secret_key.len() >= 32 {
        return Key::derive_from(config.secret_key.as_bytes());
    }

    if config.secret_key.is_empty() {
        log::warn!("SECRET_KEY not set, sessions will not survive a restart");
    } else {
        log::warn!("SECRET_KEY shorter than 32 bytes, using a generated key instead");
    }
    Key::generate()
}

/// Private (encrypted) cookie sessions
pub fn session_middleware(config: &SessionConfig, key: Key) -> SessionMiddleware<CookieSessionStore> {
    SessionMiddleware::builder(CookieSessionStore::default(), key)
        .cookie_name(config.cookie_name.clone())
        .cookie_path("/".into())
        .cookie_secure(config.cookie_secure)
        .cookie_http_only(true)
        .cookie_content_security(CookieContentSecurity::Private)
        .cookie_same_site(SameSite::Lax)
        .session_lifecycle(
            PersistentSession::default()
                .session_ttl(actix_web::cookie::time::Duration::seconds(config.cookie_age_seconds)),
        )
        .build()
}

fn client_ip(req: &ServiceRequest) -> String {
    req.connection_info().peer_addr().unwrap_or("unknown").to_string()
}

/// Resolves the caller from session, JWT or API token and stores an
/// [`AuthenticatedUser`] in the request extensions.
pub struct AuthenticationMiddleware {
    pub repo: Arc<dyn Repository>,
    pub auth_service: Arc<AuthService>,
    pub backends: Vec<AuthBackend>,
}

impl<S> Transform<S, ServiceRequest> for AuthenticationMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticationMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthenticationMiddlewareService {
            service: Arc::new(service),
            repo: Arc::clone(&self.repo),
            auth_service: Arc::clone(&self.auth_service),
            backends: self.backends.clone(),
        }))
    }
}

pub struct AuthenticationMiddlewareService<S> {
    service: Arc<S>,
    repo: Arc<dyn Repository>,
    auth_service: Arc<AuthService>,
    backends: Vec<AuthBackend>,
}

impl<S> Service<ServiceRequest> for AuthenticationMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let repo = Arc::clone(&self.repo);
        let auth_service = Arc::clone(&self.auth_service);
        let backends = self.backends.clone();

        Box::pin(async move {
            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let session_user = if backends.contains(&AuthBackend::Session) {
                match req.get_session().get::<i64>(SESSION_USER_KEY) {
                    Ok(id) => id,
                    Err(e) => {
                        log::warn!("Ignoring unreadable session: {}", e);
                        None
                    }
                }
            } else {
                None
            };

            let result = authenticate(
                repo.as_ref(),
                &auth_service,
                &backends,
                authorization.as_deref(),
                session_user,
            )
            .await;

            match result {
                Ok(Some(user)) => {
                    log::debug!("Authenticated {} via {:?}", user.user, user.backend);
                    req.extensions_mut().insert(user);
                    service.call(req).await
                }
                Ok(None) => service.call(req).await,
                Err(err) => {
                    let challenge = backends.first().and_then(AuthBackend::authenticate_header);
                    Ok(req.error_response(err.with_challenge(challenge)))
                }
            }
        })
    }
}

/// Rejects requests the scope's permission policy does not allow
pub struct PermissionMiddleware {
    pub permission: Permission,
    /// Challenge of the scope's first authentication class
    pub challenge: Option<String>,
}

impl<S> Transform<S, ServiceRequest> for PermissionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = PermissionMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PermissionMiddlewareService {
            service: Arc::new(service),
            permission: self.permission,
            challenge: self.challenge.clone(),
        }))
    }
}

pub struct PermissionMiddlewareService<S> {
    service: Arc<S>,
    permission: Permission,
    challenge: Option<String>,
}

impl<S> Service<ServiceRequest> for PermissionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let permission = self.permission;
        let challenge = self.challenge.clone();

        Box::pin(async move {
            let authenticated = req.extensions().contains::<AuthenticatedUser>();

            if permission.has_permission(req.method(), authenticated) {
                return service.call(req).await;
            }

            let err = if authenticated {
                AppError::PermissionDenied
            } else {
                AppError::NotAuthenticated { challenge }
            };
            Ok(req.error_response(err))
        })
    }
}

/// Per-scope request throttling
pub struct ThrottleMiddleware {
    pub store: Arc<Mutex<ThrottleStore>>,
    pub classes: Vec<(ThrottleClass, ThrottleRate)>,
}

impl<S> Transform<S, ServiceRequest> for ThrottleMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = ThrottleMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ThrottleMiddlewareService {
            service: Arc::new(service),
            store: Arc::clone(&self.store),
            classes: self.classes.clone(),
        }))
    }
}

pub struct ThrottleMiddlewareService<S> {
    service: Arc<S>,
    store: Arc<Mutex<ThrottleStore>>,
    classes: Vec<(ThrottleClass, ThrottleRate)>,
}

impl<S> Service<ServiceRequest> for ThrottleMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let store = Arc::clone(&self.store);
        let classes = self.classes.clone();

        Box::pin(async move {
            let user_id = req.extensions().get::<AuthenticatedUser>().map(|u| u.user.id);
            let ip = client_ip(&req);
            let now = chrono::Utc::now().timestamp();

            // Every class is checked; the longest wait wins
            let mut wait: Option<u64> = None;
            {
                let mut store = store.lock().await;
                for (class, rate) in &classes {
                    let Some(key) = class.cache_key(user_id, &ip) else {
                        continue;
                    };
                    if let Err(seconds) = store.check(&key, *rate, now) {
                        log::warn!("Throttled {} ({}), retry in {}s", key, rate, seconds);
                        wait = Some(wait.map_or(seconds, |w| w.max(seconds)));
                    }
                }
            }

            match wait {
                Some(wait_seconds) => Ok(req.error_response(AppError::Throttled { wait_seconds })),
                None => service.call(req).await,
            }
        })
    }
}

/// Security headers middleware
pub struct SecurityHeadersMiddleware;

impl<S> Transform<S, ServiceRequest> for SecurityHeadersMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = SecurityHeadersMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SecurityHeadersMiddlewareService {
            service: Arc::new(service),
        }))
    }
}

pub struct SecurityHeadersMiddlewareService<S> {
    service: Arc<S>,
}

impl<S> Service<ServiceRequest> for SecurityHeadersMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);

        Box::pin(async move {
            let mut res = service.call(req).await?;

            let headers = res.headers_mut();

            headers.insert(
                header::X_CONTENT_TYPE_OPTIONS,
                header::HeaderValue::from_static("nosniff"),
            );

            headers.insert(
                header::X_FRAME_OPTIONS,
                header::HeaderValue::from_static("DENY"),
            );

            headers.insert(
                header::REFERRER_POLICY,
                header::HeaderValue::from_static("same-origin"),
            );

            headers.insert(
                header::HeaderName::from_static("cross-origin-opener-policy"),
                header::HeaderValue::from_static("same-origin"),
            );

            Ok(res)
        })
    }
}

/// Logging middleware
pub struct LoggingMiddleware;

impl<S> Transform<S, ServiceRequest> for LoggingMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggingMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(LoggingMiddlewareService {
            service: Arc::new(service),
        }))
    }
}

pub struct LoggingMiddlewareService<S> {
    service: Arc<S>,
}

impl<S> Service<ServiceRequest> for LoggingMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BoxBody>, Error = Error>,
    S: 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);
        let start_time = std::time::Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();
        let remote_addr = client_ip(&req);

        Box::pin(async move {
            let result = service.call(req).await;
            let duration = start_time.elapsed().as_millis();

            match &result {
                Ok(res) => log_request(&method, &path, res.status().as_u16(), duration, &remote_addr),
                Err(err) => {
                    log::error!(
                        "Request failed: {} {} {} {}ms from {}",
                        method, path, err, duration, remote_addr
                    );
                }
            }

            result
        })
    }
}
