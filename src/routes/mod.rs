use actix_web::body::BoxBody;
use actix_web::dev::{ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::error::{JsonPayloadError, PathError, QueryPayloadError};
use actix_web::{web, Error, HttpRequest, Scope};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::{AuthBackend, AuthService};
use crate::config::ApiConfig;
use crate::database::Repository;
use crate::handlers::{self, accounts, auth, students, viewset};
use crate::middleware::{AuthenticationMiddleware, PermissionMiddleware, ThrottleMiddleware};
use crate::permissions::Permission;
use crate::services::{AccountService, ModelService, StudentService, UserService};
use crate::throttle::{ThrottleClass, ThrottleRate, ThrottleStore};
use crate::utils::error::AppError;

/// Shared services handed to every worker
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub auth: Arc<AuthService>,
    pub students: Arc<StudentService>,
    pub accounts: Arc<AccountService>,
    pub users: Arc<UserService>,
    pub throttle_store: Arc<Mutex<ThrottleStore>>,
    pub api: ApiConfig,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>, auth: AuthService, api: ApiConfig) -> Self {
        let auth = Arc::new(auth);
        Self {
            students: Arc::new(StudentService::new(Arc::clone(&repo))),
            accounts: Arc::new(AccountService::new(Arc::clone(&repo))),
            users: Arc::new(UserService::new(Arc::clone(&repo), Arc::clone(&auth))),
            throttle_store: Arc::new(Mutex::new(ThrottleStore::new())),
            repo,
            auth,
            api,
        }
    }

    /// Configured throttle classes paired with their rates
    pub fn throttles(&self) -> Vec<(ThrottleClass, ThrottleRate)> {
        self.api
            .throttle_classes
            .iter()
            .map(|class| {
                let rate = match class {
                    ThrottleClass::User => self.api.user_throttle_rate,
                    ThrottleClass::Anon => self.api.anon_throttle_rate,
                };
                (*class, rate)
            })
            .collect()
    }
}

fn json_error(err: JsonPayloadError, req: &HttpRequest) -> Error {
    match err {
        JsonPayloadError::ContentType => AppError::UnsupportedMediaType(
            req.headers()
                .get(actix_web::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
        )
        .into(),
        other => AppError::Parse(other.to_string()).into(),
    }
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> Error {
    AppError::BadRequest(err.to_string()).into()
}

/// Unparseable lookups behave like unknown ones
fn path_error(_err: PathError, _req: &HttpRequest) -> Error {
    AppError::NotFound.into()
}

/// Scope guarded by authentication, then permission, then throttling
pub fn protected_scope(
    path: &str,
    state: &AppState,
    backends: Vec<AuthBackend>,
    permission: Permission,
    throttles: Vec<(ThrottleClass, ThrottleRate)>,
) -> Scope<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<BoxBody>,
        Error = Error,
        InitError = (),
    >,
> {
    let challenge = backends.first().and_then(AuthBackend::authenticate_header);

    web::scope(path)
        .wrap(ThrottleMiddleware {
            store: Arc::clone(&state.throttle_store),
            classes: throttles,
        })
        .wrap(PermissionMiddleware {
            permission,
            challenge,
        })
        .wrap(AuthenticationMiddleware {
            repo: Arc::clone(&state.repo),
            auth_service: Arc::clone(&state.auth),
            backends,
        })
}

/// Mount list/create on `/` and retrieve/update/partial_update/destroy on `/{id}/`
pub fn register_viewset<S: ModelService>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(viewset::list::<S>))
            .route(web::head().to(viewset::list::<S>))
            .route(web::post().to(viewset::create::<S>))
            .default_service(web::to(viewset::method_not_allowed)),
    )
    .service(
        web::resource("/{id}/")
            .route(web::get().to(viewset::retrieve::<S>))
            .route(web::head().to(viewset::retrieve::<S>))
            .route(web::put().to(viewset::update::<S>))
            .route(web::patch().to(viewset::partial_update::<S>))
            .route(web::delete().to(viewset::destroy::<S>))
            .default_service(web::to(viewset::method_not_allowed)),
    );
}

/// Register every route with its policies
pub fn configure(cfg: &mut web::ServiceConfig, state: &AppState) {
    cfg.app_data(web::Data::new(Arc::clone(&state.students)))
        .app_data(web::Data::new(Arc::clone(&state.accounts)))
        .app_data(web::Data::new(Arc::clone(&state.users)))
        .app_data(
            web::JsonConfig::default()
                .limit(state.api.max_json_payload_bytes)
                .error_handler(json_error),
        )
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .app_data(web::PathConfig::default().error_handler(path_error));

    cfg.route("/health", web::get().to(handlers::health_check))
        // Plain views, no authentication
        .service(web::resource("/studentapi/").route(web::route().to(students::student_api)))
        .route("/stuinfo/", web::get().to(students::student_list))
        .route("/stuinfo/{id}/", web::get().to(students::student_detail))
        .service(
            web::resource("/students/")
                .route(web::get().to(students::list_create_get))
                .route(web::post().to(students::list_create_post))
                .default_service(web::to(viewset::method_not_allowed)),
        )
        .route("/accounts/", web::get().to(accounts::account_list))
        // Credential exchange
        .route("/api/token/", web::post().to(auth::token_obtain_pair))
        .route("/api/token/refresh/", web::post().to(auth::token_refresh))
        .route("/api/token/verify/", web::post().to(auth::token_verify))
        .route("/api/login/", web::post().to(auth::obtain_auth_token))
        .route("/gottoken/", web::post().to(auth::obtain_auth_token))
        .route("/api-auth/login/", web::post().to(auth::session_login))
        .route("/api-auth/logout/", web::post().to(auth::session_logout));

    let backends = state.api.authentication_classes.clone();
    cfg.service(
        protected_scope(
            "/api/students",
            state,
            backends.clone(),
            Permission::IsAuthenticatedOrReadOnly,
            state.throttles(),
        )
        .configure(register_viewset::<StudentService>),
    )
    .service(
        protected_scope(
            "/api/accounts",
            state,
            backends,
            Permission::IsAuthenticatedOrReadOnly,
            state.throttles(),
        )
        .configure(register_viewset::<AccountService>),
    )
    .service(
        protected_scope(
            "/hello",
            state,
            vec![AuthBackend::Jwt],
            Permission::IsAuthenticated,
            Vec::new(),
        )
        .route("/", web::get().to(auth::hello)),
    );
}
