use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{generate_token_key, AuthBackend, AuthService, TokenError, TokenPair};
use crate::config::SeedUserConfig;
use crate::database::Repository;
use crate::models::{Account, AuthToken, NewUser, Student, User};
use crate::serializers::{self, AccountInput, StudentInput};
use crate::utils::error::AppError;
use crate::utils::{PaginatedResponse, PaginationParams};

/// Plain array unless the client asked for a page
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Listing<T> {
    All(Vec<T>),
    Paged(PaginatedResponse<T>),
}

impl<T> Listing<T> {
    pub fn len(&self) -> usize {
        match self {
            Listing::All(items) => items.len(),
            Listing::Paged(page) => page.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The six model viewset actions over one record kind
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    type Item: Serialize + Send;
    type Input: DeserializeOwned + Send + 'static;

    async fn list(&self, params: &PaginationParams) -> Result<Listing<Self::Item>, AppError>;
    async fn get(&self, id: i64) -> Result<Self::Item, AppError>;
    async fn create(&self, input: Self::Input) -> Result<Self::Item, AppError>;
    async fn update(&self, id: i64, input: Self::Input, partial: bool) -> Result<Self::Item, AppError>;
    async fn delete(&self, id: i64) -> Result<(), AppError>;
}

/// Student business logic
pub struct StudentService {
    repo: Arc<dyn Repository>,
}

impl StudentService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ModelService for StudentService {
    type Item = Student;
    type Input = StudentInput;

    async fn list(&self, params: &PaginationParams) -> Result<Listing<Student>, AppError> {
        let students = self.repo.list_students(params.to_page()).await?;
        if !params.requested() {
            return Ok(Listing::All(students));
        }
        let total = self.repo.count_students().await?;
        Ok(Listing::Paged(PaginatedResponse::new(students, params, total)))
    }

    async fn get(&self, id: i64) -> Result<Student, AppError> {
        self.repo.get_student(id).await?.ok_or(AppError::NotFound)
    }

    async fn create(&self, input: StudentInput) -> Result<Student, AppError> {
        serializers::check(&input, false)?;
        let student = self.repo.create_student(&input.apply(None)).await?;
        log::info!("Created student {} ({})", student.id, student);
        Ok(student)
    }

    /// PUT validates the full record, PATCH only the fields sent
    async fn update(&self, id: i64, input: StudentInput, partial: bool) -> Result<Student, AppError> {
        let existing = self.get(id).await?;
        serializers::check(&input, partial)?;
        self.repo
            .update_student(id, &input.apply(Some(&existing)))
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn delete(&self, id: i64) -> Result<(), AppError> {
        if self.repo.delete_student(id).await? {
            log::info!("Deleted student {}", id);
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }
}

/// Account business logic
pub struct AccountService {
    repo: Arc<dyn Repository>,
}

impl AccountService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ModelService for AccountService {
    type Item = Account;
    type Input = AccountInput;

    async fn list(&self, params: &PaginationParams) -> Result<Listing<Account>, AppError> {
        let accounts = self.repo.list_accounts(params.to_page()).await?;
        if !params.requested() {
            return Ok(Listing::All(accounts));
        }
        let total = self.repo.count_accounts().await?;
        Ok(Listing::Paged(PaginatedResponse::new(accounts, params, total)))
    }

    async fn get(&self, id: i64) -> Result<Account, AppError> {
        self.repo.get_account(id).await?.ok_or(AppError::NotFound)
    }

    async fn create(&self, input: AccountInput) -> Result<Account, AppError> {
        serializers::check(&input, false)?;
        let account = self.repo.create_account(&input.apply(None)).await?;
        log::info!("Created account {} ({})", account.id, account);
        Ok(account)
    }

    async fn update(&self, id: i64, input: AccountInput, partial: bool) -> Result<Account, AppError> {
        let existing = self.get(id).await?;
        serializers::check(&input, partial)?;
        self.repo
            .update_account(id, &input.apply(Some(&existing)))
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn delete(&self, id: i64) -> Result<(), AppError> {
        if self.repo.delete_account(id).await? {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }
}

/// Body of a successful refresh
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

/// User accounts and credential exchange
pub struct UserService {
    repo: Arc<dyn Repository>,
    auth: Arc<AuthService>,
}

impl UserService {
    pub fn new(repo: Arc<dyn Repository>, auth: Arc<AuthService>) -> Self {
        Self { repo, auth }
    }

    /// Check a username/password pair; inactive users never match
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, AppError> {
        let user = match self.repo.get_user_by_username(username).await? {
            Some(user) => user,
            None => {
                log::debug!("Login attempt for unknown user {}", username);
                return Ok(None);
            }
        };

        if !self.auth.verify_password(password, &user.password_hash)? {
            log::warn!("Failed login for user {}", username);
            return Ok(None);
        }

        Ok(user.is_active.then_some(user))
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        is_staff: bool,
    ) -> Result<User, AppError> {
        if username.trim().is_empty() {
            return Err(AppError::field("username", serializers::BLANK));
        }
        if username.chars().count() > 150 {
            return Err(AppError::field(
                "username",
                "Ensure this field has no more than 150 characters.",
            ));
        }

        let password_hash = self.auth.hash_password(password)?;
        let user = self
            .repo
            .create_user(&NewUser {
                username: username.trim().to_string(),
                email: email.trim().to_string(),
                password_hash,
                is_staff,
            })
            .await?;

        log::info!("Created user {} ({})", user.id, user);
        Ok(user)
    }

    /// Create the configured seed user unless the username is taken already
    pub async fn seed(&self, seed: &SeedUserConfig) -> Result<User, AppError> {
        if let Some(existing) = self.repo.get_user_by_username(&seed.username).await? {
            log::info!("Seed user {} already exists", existing);
            return Ok(existing);
        }
        self.create_user(&seed.username, &seed.email, &seed.password, seed.is_staff)
            .await
    }

    /// Inactive users keep their data but can no longer authenticate
    pub async fn set_active(&self, user_id: i64, active: bool) -> Result<(), AppError> {
        if !self.repo.set_user_active(user_id, active).await? {
            return Err(AppError::NotFound);
        }
        log::info!("User {} is now {}", user_id, if active { "active" } else { "inactive" });
        Ok(())
    }

    pub async fn record_login(&self, user: &User) -> Result<(), AppError> {
        self.repo.update_last_login(user.id).await?;
        Ok(())
    }

    /// `POST /api/token/`
    pub async fn obtain_token_pair(&self, username: &str, password: &str) -> Result<TokenPair, AppError> {
        let user = self.authenticate(username, password).await?.ok_or_else(|| {
            AppError::AuthenticationFailed {
                detail: "No active account found with the given credentials".to_string(),
                code: Some("no_active_account"),
                challenge: AuthBackend::Jwt.authenticate_header(),
            }
        })?;

        Ok(self.auth.generate_tokens(&user)?)
    }

    /// `POST /api/token/refresh/`, rotating and blacklisting when configured.
    ///
    /// With rotation and blacklisting on, inserting the blacklist row is the
    /// check: of two concurrent refreshes with one token only the first
    /// insert succeeds.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, AppError> {
        let claims = self.auth.validate_refresh_token(refresh_token)?;
        let config = self.auth.config();
        let claim_on_use = config.rotate_refresh_tokens && config.blacklist_after_rotation;

        if !claim_on_use && self.repo.is_token_blacklisted(&claims.jti).await? {
            return Err(TokenError::Blacklisted.into());
        }

        match self.repo.get_user_by_id(claims.user_id).await? {
            Some(user) if user.is_active => {}
            _ => {
                return Err(AppError::AuthenticationFailed {
                    detail: "No active account found for the given token.".to_string(),
                    code: Some("no_active_account"),
                    challenge: AuthBackend::Jwt.authenticate_header(),
                })
            }
        }

        if claim_on_use {
            if !self.repo.blacklist_token(&claims.jti, claims.expires_at()).await? {
                return Err(TokenError::Blacklisted.into());
            }
            log::debug!("Blacklisted rotated refresh token {}", claims.jti);
        }

        let access = self.auth.access_token(claims.user_id)?;
        if !config.rotate_refresh_tokens {
            return Ok(RefreshResponse { access, refresh: None });
        }

        Ok(RefreshResponse {
            access,
            refresh: Some(self.auth.refresh_token(claims.user_id)?),
        })
    }

    /// `POST /api/token/verify/`
    pub async fn verify(&self, token: &str) -> Result<(), AppError> {
        let claims = self.auth.decode_token(token)?;
        if self.repo.is_token_blacklisted(&claims.jti).await? {
            return Err(TokenError::Blacklisted.into());
        }
        Ok(())
    }

    /// Opaque API token for valid credentials, created on first use
    pub async fn obtain_auth_token(&self, username: &str, password: &str) -> Result<AuthToken, AppError> {
        let user = self.authenticate(username, password).await?.ok_or_else(|| {
            AppError::field("non_field_errors", "Unable to log in with provided credentials.")
        })?;

        let candidate = generate_token_key()?;
        Ok(self.repo.get_or_create_auth_token(user.id, &candidate).await?)
    }

    /// Expired blacklist rows are dead weight once the token itself has expired
    pub async fn flush_expired_tokens(&self) -> Result<u64, AppError> {
        Ok(self.repo.flush_expired_tokens().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::database::InMemoryDatabase;

    fn users(rotate: bool) -> UserService {
        let auth = AuthService::new(AuthConfig {
            jwt_secret: "test_secret_must_be_32_chars_long!!".to_string(),
            bcrypt_cost: 4,
            rotate_refresh_tokens: rotate,
            ..AuthConfig::default()
        });
        UserService::new(Arc::new(InMemoryDatabase::new()), Arc::new(auth))
    }

    #[tokio::test]
    async fn inactive_or_wrong_password_does_not_authenticate() {
        let service = users(false);
        let user = service.create_user("Ayush", "", "testpassword123", false).await.unwrap();
        assert!(service.authenticate("Ayush", "nope").await.unwrap().is_none());
        assert!(service.authenticate("ghost", "testpassword123").await.unwrap().is_none());
        assert!(service.authenticate("Ayush", "testpassword123").await.unwrap().is_some());

        service.set_active(user.id, false).await.unwrap();
        assert!(service.authenticate("Ayush", "testpassword123").await.unwrap().is_none());
        assert!(matches!(service.set_active(999, false).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn inactive_user_cannot_refresh() {
        let service = users(false);
        let user = service.create_user("Ayush", "", "testpassword123", false).await.unwrap();
        let pair = service.obtain_token_pair("Ayush", "testpassword123").await.unwrap();
        service.set_active(user.id, false).await.unwrap();

        let err = service.refresh(&pair.refresh).await.unwrap_err();
        assert!(matches!(err, AppError::AuthenticationFailed { code: Some("no_active_account"), .. }));
    }

    #[tokio::test]
    async fn rotation_blacklists_the_used_refresh_token() {
        let service = users(true);
        service.create_user("Ayush", "", "testpassword123", false).await.unwrap();
        let pair = service.obtain_token_pair("Ayush", "testpassword123").await.unwrap();

        let rotated = service.refresh(&pair.refresh).await.unwrap();
        assert!(rotated.refresh.is_some());

        let replay = service.refresh(&pair.refresh).await.unwrap_err();
        assert_eq!(replay.to_string(), "Token is blacklisted");
        assert!(service.verify(&pair.refresh).await.is_err());
    }

    #[tokio::test]
    async fn rotation_rejects_a_token_already_claimed() {
        let service = users(true);
        let user = service.create_user("Ayush", "", "testpassword123", false).await.unwrap();
        let refresh = service.auth.refresh_token(user.id).unwrap();
        let claims = service.auth.validate_refresh_token(&refresh).unwrap();

        // Another request rotated this token first
        assert!(service.repo.blacklist_token(&claims.jti, claims.expires_at()).await.unwrap());

        let err = service.refresh(&refresh).await.unwrap_err();
        assert_eq!(err.to_string(), "Token is blacklisted");
    }

    #[tokio::test]
    async fn without_rotation_refresh_is_reusable() {
        let service = users(false);
        service.create_user("Ayush", "", "testpassword123", false).await.unwrap();
        let pair = service.obtain_token_pair("Ayush", "testpassword123").await.unwrap();

        let first = service.refresh(&pair.refresh).await.unwrap();
        assert!(first.refresh.is_none());
        assert!(service.refresh(&pair.refresh).await.is_ok());
        assert!(service.refresh(&pair.access).await.is_err());
    }

    #[tokio::test]
    async fn auth_token_is_stable_per_user() {
        let service = users(false);
        service.create_user("Ayush", "", "testpassword123", false).await.unwrap();
        let first = service.obtain_auth_token("Ayush", "testpassword123").await.unwrap();
        let second = service.obtain_auth_token("Ayush", "testpassword123").await.unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(first.key.len(), 40);

        let err = service.obtain_auth_token("Ayush", "wrongpass").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(ref f) if f.contains_key("non_field_errors")));
    }

    #[tokio::test]
    async fn student_partial_update_keeps_other_fields() {
        let students = StudentService::new(Arc::new(InMemoryDatabase::new()));
        let created = students
            .create(StudentInput {
                name: Some("Aniket Tripathi".to_string()),
                age: Some(serde_json::json!(20)),
                email: Some("test@gmail.com".to_string()),
            })
            .await
            .unwrap();

        let patched = students
            .update(created.id, StudentInput { age: Some(serde_json::json!(21)), ..Default::default() }, true)
            .await
            .unwrap();
        assert_eq!(patched.name, "Aniket Tripathi");
        assert_eq!(patched.age, 21);

        let full = students
            .update(created.id, StudentInput { age: Some(serde_json::json!(22)), ..Default::default() }, false)
            .await;
        assert!(matches!(full, Err(AppError::Validation(_))));
        assert!(matches!(students.get(99).await, Err(AppError::NotFound)));
    }
}
