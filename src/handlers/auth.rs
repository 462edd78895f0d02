use actix_session::Session;
use actix_web::{web, Either, HttpResponse};
use std::sync::Arc;

use crate::auth::SESSION_USER_KEY;
use crate::serializers::{self, CredentialsInput, RefreshInput, VerifyInput};
use crate::services::UserService;
use crate::utils::error::AppError;
use crate::utils::response;

/// Credentials arrive as JSON or as an HTML form post
pub type Credentials = Either<web::Json<CredentialsInput>, web::Form<CredentialsInput>>;

fn credentials(body: Credentials) -> Result<(String, String), AppError> {
    let input = match body {
        Either::Left(json) => json.into_inner(),
        Either::Right(form) => form.into_inner(),
    };
    input.into_pair()
}

/// `POST /api/token/`
pub async fn token_obtain_pair(
    body: Credentials,
    users: web::Data<Arc<UserService>>,
) -> Result<HttpResponse, AppError> {
    let (username, password) = credentials(body)?;
    let pair = users.obtain_token_pair(&username, &password).await?;
    Ok(response::success_response(pair))
}

/// `POST /api/token/refresh/`
pub async fn token_refresh(
    body: web::Json<RefreshInput>,
    users: web::Data<Arc<UserService>>,
) -> Result<HttpResponse, AppError> {
    serializers::check(&*body, false)?;
    let refresh = body.into_inner().refresh.unwrap_or_default();
    Ok(response::success_response(users.refresh(&refresh).await?))
}

/// `POST /api/token/verify/`
pub async fn token_verify(
    body: web::Json<VerifyInput>,
    users: web::Data<Arc<UserService>>,
) -> Result<HttpResponse, AppError> {
    serializers::check(&*body, false)?;
    let token = body.into_inner().token.unwrap_or_default();
    users.verify(&token).await?;
    Ok(response::success_response(serde_json::json!({})))
}

/// `POST /gottoken/` and `POST /api/login/`
pub async fn obtain_auth_token(
    body: Credentials,
    users: web::Data<Arc<UserService>>,
) -> Result<HttpResponse, AppError> {
    let (username, password) = credentials(body)?;
    let token = users.obtain_auth_token(&username, &password).await?;
    Ok(response::success_response(serde_json::json!({ "token": token.key })))
}

/// `POST /api-auth/login/`
pub async fn session_login(
    body: Credentials,
    session: Session,
    users: web::Data<Arc<UserService>>,
) -> Result<HttpResponse, AppError> {
    let (username, password) = credentials(body)?;
    let user = users.authenticate(&username, &password).await?.ok_or_else(|| {
        AppError::field(
            "non_field_errors",
            "Please enter a correct username and password. Note that both fields may be case-sensitive.",
        )
    })?;

    // New session id on login
    session.renew();
    session
        .insert(SESSION_USER_KEY, user.id)
        .map_err(|e| AppError::Internal(format!("session insert failed: {}", e)))?;
    users.record_login(&user).await?;

    log::info!("Session login for user {}", user);
    Ok(response::success_response(user))
}

/// `POST /api-auth/logout/`
pub async fn session_logout(session: Session) -> HttpResponse {
    session.purge();
    response::success_response(serde_json::json!({ "detail": "Successfully logged out." }))
}

/// `GET /hello/`, JWT only
pub async fn hello() -> HttpResponse {
    response::success_response(serde_json::json!({ "message": "Hello, World!" }))
}
