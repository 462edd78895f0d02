use serde::{Deserialize, Serialize};

/// Pagination parameters
#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Slice of a listing to fetch from storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl PaginationParams {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    /// Listings are only paginated when the client asks for it
    pub fn requested(&self) -> bool {
        self.page.is_some() || self.limit.is_some()
    }

    pub fn page_number(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page_number() - 1) * i64::from(self.limit())
    }

    pub fn to_page(&self) -> Option<Page> {
        self.requested().then(|| Page {
            offset: self.offset(),
            limit: i64::from(self.limit()),
        })
    }
}

/// Paginated response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, params: &PaginationParams, total: u64) -> Self {
        let limit = params.limit();
        let total_pages = total.div_ceil(u64::from(limit));
        Self {
            data,
            pagination: PaginationMeta {
                page: params.page_number(),
                limit,
                total,
                total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
            },
        }
    }
}

/// Mask sensitive values partially (e.g., tokens, emails, passwords)
pub fn mask_sensitive(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.is_empty() {
        return String::new();
    }

    if let Some((local, domain)) = value.split_once('@') {
        let visible: String = local.chars().take(if local.chars().count() <= 2 { 1 } else { 2 }).collect();
        return format!("{}***@{}", visible, domain);
    }

    if chars.len() <= 4 {
        return format!("{}***", chars[0]);
    }

    let start: String = chars[..4].iter().collect();
    let end: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", start, end)
}

/// Truncate string to maximum length (in characters)
pub fn truncate_string(input: &str, max_len: usize) -> String {
    if input.chars().count() <= max_len {
        input.to_string()
    } else {
        let kept: String = input.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Generate `len` random bytes from the OS RNG rendered as lowercase hex
pub fn random_hex(len: usize) -> Result<String, getrandom::Error> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf)?;
    Ok(buf.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Logging helpers
pub mod logging {
    use log::{Level, LevelFilter};

    pub fn level_from_string(level: &str) -> LevelFilter {
        match level.to_lowercase().as_str() {
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Info,
        }
    }

    pub fn level_for_status(status: u16) -> Level {
        match status {
            400..=499 => Level::Warn,
            500..=599 => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn log_request(method: &str, path: &str, status: u16, duration_ms: u128, remote_addr: &str) {
        log::log!(
            level_for_status(status),
            "{} {} {} {}ms from {}",
            method,
            path,
            status,
            duration_ms,
            remote_addr
        );
    }
}

/// Error handling utilities
pub mod error {
    use actix_web::http::{header, StatusCode};
    use actix_web::{HttpResponse, ResponseError};
    use std::collections::BTreeMap;

    use crate::database::DbError;

    /// Field name to messages, rendered as the response body of a 400
    pub type FieldErrors = BTreeMap<String, Vec<String>>;

    #[derive(Debug, thiserror::Error)]
    pub enum AppError {
        #[error("invalid input")]
        Validation(FieldErrors),

        #[error("JSON parse error - {0}")]
        Parse(String),

        #[error("{0}")]
        BadRequest(String),

        #[error("Not found.")]
        NotFound,

        #[error("Method \"{0}\" not allowed.")]
        MethodNotAllowed(String),

        #[error("Unsupported media type \"{0}\" in request.")]
        UnsupportedMediaType(String),

        #[error("Authentication credentials were not provided.")]
        NotAuthenticated { challenge: Option<String> },

        #[error("{detail}")]
        AuthenticationFailed {
            detail: String,
            code: Option<&'static str>,
            challenge: Option<String>,
        },

        #[error("You do not have permission to perform this action.")]
        PermissionDenied,

        #[error("Request was throttled. Expected available in {wait_seconds} seconds.")]
        Throttled { wait_seconds: u64 },

        #[error("{0}")]
        Internal(String),
    }

    impl AppError {
        pub fn field(field: &str, message: &str) -> Self {
            let mut errors = FieldErrors::new();
            errors.insert(field.to_string(), vec![message.to_string()]);
            AppError::Validation(errors)
        }

        pub fn authentication_failed(detail: impl Into<String>) -> Self {
            AppError::AuthenticationFailed {
                detail: detail.into(),
                code: None,
                challenge: None,
            }
        }

        /// Attach the `WWW-Authenticate` challenge of the scope's first authentication class
        pub fn with_challenge(self, value: Option<String>) -> Self {
            match self {
                AppError::NotAuthenticated { .. } => AppError::NotAuthenticated { challenge: value },
                AppError::AuthenticationFailed { detail, code, .. } => AppError::AuthenticationFailed {
                    detail,
                    code,
                    challenge: value,
                },
                other => other,
            }
        }

        fn challenge(&self) -> Option<&str> {
            match self {
                AppError::NotAuthenticated { challenge } | AppError::AuthenticationFailed { challenge, .. } => {
                    challenge.as_deref()
                }
                _ => None,
            }
        }
    }

    impl ResponseError for AppError {
        fn status_code(&self) -> StatusCode {
            match self {
                AppError::Validation(_) | AppError::Parse(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
                AppError::NotFound => StatusCode::NOT_FOUND,
                AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
                AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                // Without a challenge to send back, a 401 is not allowed
                AppError::NotAuthenticated { .. } | AppError::AuthenticationFailed { .. } => {
                    if self.challenge().is_some() {
                        StatusCode::UNAUTHORIZED
                    } else {
                        StatusCode::FORBIDDEN
                    }
                }
                AppError::PermissionDenied => StatusCode::FORBIDDEN,
                AppError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
                AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }

        fn error_response(&self) -> HttpResponse {
            let mut builder = HttpResponse::build(self.status_code());

            if let Some(challenge) = self.challenge() {
                builder.insert_header((header::WWW_AUTHENTICATE, challenge.to_string()));
            }

            match self {
                AppError::Validation(errors) => builder.json(errors),
                AppError::AuthenticationFailed {
                    detail,
                    code: Some(code),
                    ..
                } => builder.json(serde_json::json!({ "detail": detail, "code": code })),
                AppError::Throttled { wait_seconds } => builder
                    .insert_header((header::RETRY_AFTER, wait_seconds.to_string()))
                    .json(serde_json::json!({ "detail": self.to_string() })),
                AppError::Internal(message) => {
                    super::log_internal_error("internal", message, None);
                    builder.json(serde_json::json!({ "detail": "A server error occurred." }))
                }
                _ => builder.json(serde_json::json!({ "detail": self.to_string() })),
            }
        }
    }

    impl From<DbError> for AppError {
        fn from(err: DbError) -> Self {
            match err {
                DbError::UnknownUser(id) => {
                    AppError::field("users", &format!("Invalid pk \"{}\" - object does not exist.", id))
                }
                DbError::Conflict(message) => AppError::BadRequest(message),
                other => AppError::Internal(other.to_string()),
            }
        }
    }

    impl From<bcrypt::BcryptError> for AppError {
        fn from(err: bcrypt::BcryptError) -> Self {
            AppError::Internal(format!("password hashing failed: {}", err))
        }
    }

    impl From<getrandom::Error> for AppError {
        fn from(err: getrandom::Error) -> Self {
            AppError::Internal(format!("OS RNG failure: {}", err))
        }
    }
}

/// Response helpers
pub mod response {
    use actix_web::http::StatusCode;
    use actix_web::HttpResponse;
    use serde::Serialize;

    pub fn json_response<T: Serialize>(data: T, status: StatusCode) -> HttpResponse {
        HttpResponse::build(status).json(data)
    }

    pub fn success_response<T: Serialize>(data: T) -> HttpResponse {
        json_response(data, StatusCode::OK)
    }

    pub fn created_response<T: Serialize>(data: T) -> HttpResponse {
        json_response(data, StatusCode::CREATED)
    }

    /// `{"error": message}` body used by the plain function views
    pub fn error_response(message: &str, status: StatusCode) -> HttpResponse {
        json_response(serde_json::json!({ "error": message }), status)
    }
}

/// Log internal error details with sensitive fields masked.
pub fn log_internal_error(category: &str, message: &str, details: Option<serde_json::Value>) {
    let sanitized = details.map(|d| match d {
        serde_json::Value::Object(mut map) => {
            for key in ["password", "token", "access", "refresh", "authorization", "email"] {
                if let Some(v) = map.get_mut(key) {
                    if let Some(s) = v.as_str() {
                        *v = serde_json::Value::String(mask_sensitive(s));
                    }
                }
            }
            serde_json::Value::Object(map)
        }
        other => serde_json::Value::String(truncate_string(&mask_sensitive(&other.to_string()), 1024)),
    });

    log::error!("{}: {} - details: {:?}", category, message, sanitized);
}
