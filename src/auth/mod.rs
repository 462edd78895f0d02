use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::database::Repository;
use crate::models::User;
use crate::utils::error::AppError;

/// Session key holding the logged-in user's id
pub const SESSION_USER_KEY: &str = "_auth_user_id";

/// Credential schemes a scope may accept, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthBackend {
    Session,
    Jwt,
    Token,
}

impl AuthBackend {
    /// Value for `WWW-Authenticate`; session auth has none, so its failures are 403s
    pub fn authenticate_header(&self) -> Option<String> {
        match self {
            AuthBackend::Session => None,
            AuthBackend::Jwt => Some("Bearer realm=\"api\"".to_string()),
            AuthBackend::Token => Some("Token".to_string()),
        }
    }

    fn keyword(&self) -> Option<&'static str> {
        match self {
            AuthBackend::Session => None,
            AuthBackend::Jwt => Some("Bearer"),
            AuthBackend::Token => Some("Token"),
        }
    }
}

impl FromStr for AuthBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "session" | "sessionauthentication" => Ok(AuthBackend::Session),
            "jwt" | "jwtauthentication" => Ok(AuthBackend::Jwt),
            "token" | "tokenauthentication" => Ok(AuthBackend::Token),
            other => Err(format!("unknown authentication class {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub token_type: TokenType,
    pub user_id: i64,
    pub exp: i64, // Expiration time
    pub iat: i64, // Issued at
    pub jti: String, // JWT ID
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

/// Access/refresh pair returned by the token endpoint
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token is invalid or expired")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("Token has wrong type")]
    WrongType,

    #[error("Token is blacklisted")]
    Blacklisted,
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::AuthenticationFailed {
            detail: err.to_string(),
            code: Some("token_not_valid"),
            challenge: AuthBackend::Jwt.authenticate_header(),
        }
    }
}

/// Identity attached to a request by the authentication middleware
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub backend: AuthBackend,
}

/// Password hashing and JWT issuing
pub struct AuthService {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Hash a password using bcrypt
    pub fn hash_password(&self, password: &str) -> Result<String, bcrypt::BcryptError> {
        bcrypt::hash(password, self.config.bcrypt_cost)
    }

    /// Verify a password against its hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
        bcrypt::verify(password, hash)
    }

    fn claims_for(&self, user_id: i64, token_type: TokenType, now: DateTime<Utc>) -> Claims {
        let lifetime = match token_type {
            TokenType::Access => Duration::minutes(self.config.access_token_lifetime_minutes),
            TokenType::Refresh => Duration::days(self.config.refresh_token_lifetime_days),
        };

        Claims {
            token_type,
            user_id,
            exp: (now + lifetime).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String, TokenError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?)
    }

    pub fn access_token(&self, user_id: i64) -> Result<String, TokenError> {
        self.encode_claims(&self.claims_for(user_id, TokenType::Access, Utc::now()))
    }

    pub fn refresh_token(&self, user_id: i64) -> Result<String, TokenError> {
        self.encode_claims(&self.claims_for(user_id, TokenType::Refresh, Utc::now()))
    }

    /// Generate access and refresh tokens for a user
    pub fn generate_tokens(&self, user: &User) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            refresh: self.refresh_token(user.id)?,
            access: self.access_token(user.id)?,
        })
    }

    /// Validate signature and expiry without checking the token type
    pub fn decode_token(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(token_data.claims)
    }

    pub fn validate_token(&self, token: &str, expected: TokenType) -> Result<Claims, TokenError> {
        let claims = self.decode_token(token)?;
        if claims.token_type != expected {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_token(token, TokenType::Access)
    }

    /// Validate and decode a refresh token
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_token(token, TokenType::Refresh)
    }
}

/// 40 hex characters, the opaque API token format
pub fn generate_token_key() -> Result<String, getrandom::Error> {
    crate::utils::random_hex(20)
}

/// Split an `Authorization` header into keyword and credentials
pub fn split_authorization(header: &str) -> (&str, Option<&str>, usize) {
    let parts: Vec<&str> = header.split_whitespace().collect();
    let keyword = parts.first().copied().unwrap_or("");
    (keyword, parts.get(1).copied(), parts.len())
}

/// Resolve the caller's identity using the scope's authentication classes.
///
/// Returns `Ok(None)` for anonymous requests and an error when a class finds
/// credentials it cannot accept.
pub async fn authenticate(
    repo: &dyn Repository,
    auth: &AuthService,
    backends: &[AuthBackend],
    authorization: Option<&str>,
    session_user_id: Option<i64>,
) -> Result<Option<AuthenticatedUser>, AppError> {
    for backend in backends {
        let user = match backend {
            AuthBackend::Session => match session_user_id {
                // Inactive or deleted session users are simply anonymous
                Some(id) => repo.get_user_by_id(id).await?.filter(|u| u.is_active),
                None => None,
            },
            AuthBackend::Jwt | AuthBackend::Token => match authorization {
                Some(header) => credential_user(repo, auth, *backend, header).await?,
                None => None,
            },
        };

        if let Some(user) = user {
            return Ok(Some(AuthenticatedUser {
                user,
                backend: *backend,
            }));
        }
    }

    Ok(None)
}

async fn credential_user(
    repo: &dyn Repository,
    auth: &AuthService,
    backend: AuthBackend,
    header: &str,
) -> Result<Option<User>, AppError> {
    let (keyword, credentials, parts) = split_authorization(header);
    if backend.keyword().map_or(true, |k| !k.eq_ignore_ascii_case(keyword)) {
        return Ok(None);
    }

    match backend {
        AuthBackend::Jwt => {
            let token = match (credentials, parts) {
                (Some(token), 2) => token,
                _ => {
                    return Err(AppError::authentication_failed(
                        "Authorization header must contain two space-delimited values",
                    ))
                }
            };

            let claims = auth.validate_access_token(token).map_err(|_| AppError::AuthenticationFailed {
                detail: "Given token not valid for any token type".to_string(),
                code: Some("token_not_valid"),
                challenge: None,
            })?;

            match repo.get_user_by_id(claims.user_id).await? {
                Some(user) if user.is_active => Ok(Some(user)),
                Some(_) => Err(AppError::AuthenticationFailed {
                    detail: "User is inactive".to_string(),
                    code: Some("user_inactive"),
                    challenge: None,
                }),
                None => Err(AppError::AuthenticationFailed {
                    detail: "User not found".to_string(),
                    code: Some("user_not_found"),
                    challenge: None,
                }),
            }
        }
        AuthBackend::Token => {
            let key = match (credentials, parts) {
                (None, _) => {
                    return Err(AppError::authentication_failed(
                        "Invalid token header. No credentials provided.",
                    ))
                }
                (Some(key), 2) => key,
                (Some(_), _) => {
                    return Err(AppError::authentication_failed(
                        "Invalid token header. Token string should not contain spaces.",
                    ))
                }
            };

            let token = repo
                .get_auth_token(key)
                .await?
                .ok_or_else(|| AppError::authentication_failed("Invalid token."))?;

            match repo.get_user_by_id(token.user_id).await? {
                Some(user) if user.is_active => Ok(Some(user)),
                _ => Err(AppError::authentication_failed("User inactive or deleted.")),
            }
        }
        AuthBackend::Session => Ok(None),
    }
}
