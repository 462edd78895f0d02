#![allow(dead_code)]

use std::sync::Arc;

use student_api::auth::AuthService;
use student_api::config::{ApiConfig, AuthConfig};
use student_api::database::InMemoryDatabase;
use student_api::models::User;
use student_api::routes::AppState;

pub const TEST_SECRET: &str = "test_secret_must_be_32_chars_long!!";
pub const PASSWORD: &str = "testpassword123";

pub fn auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: TEST_SECRET.to_string(),
        bcrypt_cost: 4,
        ..AuthConfig::default()
    }
}

pub fn state_with(api: ApiConfig, auth: AuthConfig) -> AppState {
    AppState::new(Arc::new(InMemoryDatabase::new()), AuthService::new(auth), api)
}

pub fn state() -> AppState {
    state_with(ApiConfig::default(), auth_config())
}

pub async fn create_user(state: &AppState, username: &str) -> User {
    state
        .users
        .create_user(username, &format!("{}@example.com", username.to_lowercase()), PASSWORD, false)
        .await
        .unwrap()
}

pub fn bearer(state: &AppState, user: &User) -> (&'static str, String) {
    let token = state.auth.access_token(user.id).unwrap();
    ("Authorization", format!("Bearer {}", token))
}

/// Full application: session, security headers and every route
macro_rules! test_app {
    ($state:expr) => {{
        let state: student_api::routes::AppState = $state;
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(student_api::middleware::session_middleware(
                    &student_api::config::SessionConfig::default(),
                    actix_web::cookie::Key::generate(),
                ))
                .wrap(student_api::middleware::SecurityHeadersMiddleware)
                .configure(move |cfg| student_api::routes::configure(cfg, &state)),
        )
        .await
    }};
}
