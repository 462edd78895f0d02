use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::collections::HashMap;
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;
use crate::models::{Account, AuthToken, NewAccount, NewStudent, NewUser, Student, User};
use crate::utils::Page;

mod memory;

pub use memory::InMemoryDatabase;

/// Schema applied by `init_schema` and by the `migrate` binary
pub const SCHEMA_SQL: &str = include_str!("../../migrations/V1__initial_schema.sql");

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to create connection pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("{0}")]
    Conflict(String),

    #[error("user {0} does not exist")]
    UnknownUser(i64),
}

pub type DbResult<T> = Result<T, DbError>;

/// Persistence operations for every model the API exposes.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_students(&self, page: Option<Page>) -> DbResult<Vec<Student>>;
    async fn count_students(&self) -> DbResult<u64>;
    async fn get_student(&self, id: i64) -> DbResult<Option<Student>>;
    async fn create_student(&self, student: &NewStudent) -> DbResult<Student>;
    async fn update_student(&self, id: i64, student: &NewStudent) -> DbResult<Option<Student>>;
    async fn delete_student(&self, id: i64) -> DbResult<bool>;

    async fn list_accounts(&self, page: Option<Page>) -> DbResult<Vec<Account>>;
    async fn count_accounts(&self) -> DbResult<u64>;
    async fn get_account(&self, id: i64) -> DbResult<Option<Account>>;
    /// Fails with `DbError::UnknownUser` when a linked user is missing
    async fn create_account(&self, account: &NewAccount) -> DbResult<Account>;
    async fn update_account(&self, id: i64, account: &NewAccount) -> DbResult<Option<Account>>;
    async fn delete_account(&self, id: i64) -> DbResult<bool>;

    async fn create_user(&self, user: &NewUser) -> DbResult<User>;
    async fn get_user_by_id(&self, id: i64) -> DbResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> DbResult<Option<User>>;
    async fn update_last_login(&self, id: i64) -> DbResult<()>;
    /// `false` when no such user exists
    async fn set_user_active(&self, id: i64, active: bool) -> DbResult<bool>;

    /// Return the user's token, storing `candidate_key` if none exists yet
    async fn get_or_create_auth_token(&self, user_id: i64, candidate_key: &str) -> DbResult<AuthToken>;
    async fn get_auth_token(&self, key: &str) -> DbResult<Option<AuthToken>>;

    /// `false` when the token was already blacklisted
    async fn blacklist_token(&self, jti: &str, expires_at: DateTime<Utc>) -> DbResult<bool>;
    async fn is_token_blacklisted(&self, jti: &str) -> DbResult<bool>;
    /// Drop blacklist entries whose token has expired anyway
    async fn flush_expired_tokens(&self) -> DbResult<u64>;
}

/// Sorted, deduplicated user ids for an account link set
pub(crate) fn normalize_user_ids(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn page_bounds(page: Option<Page>) -> (Option<i64>, i64) {
    match page {
        Some(p) => (Some(p.limit), p.offset),
        None => (None, 0),
    }
}

fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}

fn map_unique_violation(err: tokio_postgres::Error, message: &str) -> DbError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        DbError::Conflict(message.to_string())
    } else {
        DbError::Postgres(err)
    }
}

/// Database connection pool
pub type DbPool = Pool;

/// PostgreSQL backed repository
pub struct DatabaseService {
    pool: DbPool,
}

impl DatabaseService {
    /// Create a new database service with connection pool
    pub async fn new(config: &DatabaseConfig) -> DbResult<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.max_connections));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Test connection
        let client = pool.get().await?;
        client.execute("SELECT 1", &[]).await?;

        log::info!("Database connection established");

        Ok(Self { pool })
    }

    /// Get a database client from the pool
    pub async fn get_client(&self) -> DbResult<deadpool_postgres::Client> {
        Ok(self.pool.get().await?)
    }

    /// Create tables and indexes if missing
    pub async fn init_schema(&self) -> DbResult<()> {
        let client = self.get_client().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        log::info!("Database schema initialized");
        Ok(())
    }

    /// Linked user ids for each of the given accounts
    async fn account_links(
        client: &deadpool_postgres::Client,
        account_ids: &[i64],
    ) -> DbResult<HashMap<i64, Vec<i64>>> {
        let rows = client
            .query(
                "SELECT account_id, user_id FROM account_users WHERE account_id = ANY($1) ORDER BY user_id",
                &[&account_ids],
            )
            .await?;

        let mut links: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in rows {
            links.entry(row.get("account_id")).or_default().push(row.get("user_id"));
        }
        Ok(links)
    }

    /// Replace an account's user links inside a transaction, checking every user exists
    async fn write_account_links(
        tx: &deadpool_postgres::Transaction<'_>,
        account_id: i64,
        user_ids: &[i64],
    ) -> DbResult<()> {
        let rows = tx
            .query("SELECT id FROM users WHERE id = ANY($1)", &[&user_ids])
            .await?;
        let found: Vec<i64> = rows.iter().map(|r| r.get("id")).collect();
        if let Some(missing) = user_ids.iter().find(|id| !found.contains(*id)) {
            return Err(DbError::UnknownUser(*missing));
        }

        tx.execute("DELETE FROM account_users WHERE account_id = $1", &[&account_id])
            .await?;
        tx.execute(
            "INSERT INTO account_users (account_id, user_id) SELECT $1, unnest($2::BIGINT[])",
            &[&account_id, &user_ids],
        )
        .await?;
        Ok(())
    }

    fn row_to_student(row: &tokio_postgres::Row) -> Student {
        Student {
            id: row.get("id"),
            name: row.get("name"),
            age: row.get("age"),
            email: row.get("email"),
        }
    }

    fn row_to_account(row: &tokio_postgres::Row, users: Vec<i64>) -> Account {
        Account {
            id: row.get("id"),
            account_name: row.get("account_name"),
            users,
            created: row.get("created"),
        }
    }

    fn row_to_user(row: &tokio_postgres::Row) -> User {
        User {
            id: row.get("id"),
            username: row.get("username"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            is_active: row.get("is_active"),
            is_staff: row.get("is_staff"),
            date_joined: row.get("date_joined"),
            last_login: row.get("last_login"),
        }
    }

    fn row_to_token(row: &tokio_postgres::Row) -> AuthToken {
        AuthToken {
            key: row.get("key"),
            user_id: row.get("user_id"),
            created: row.get("created"),
        }
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, is_active, is_staff, date_joined, last_login";

#[async_trait]
impl Repository for DatabaseService {
    async fn list_students(&self, page: Option<Page>) -> DbResult<Vec<Student>> {
        let client = self.get_client().await?;
        let (limit, offset) = page_bounds(page);

        let rows = client
            .query(
                "SELECT id, name, age, email FROM students ORDER BY id LIMIT $1 OFFSET $2",
                &[&limit, &offset],
            )
            .await?;

        Ok(rows.iter().map(Self::row_to_student).collect())
    }

    async fn count_students(&self) -> DbResult<u64> {
        let client = self.get_client().await?;
        let row = client.query_one("SELECT COUNT(*) FROM students", &[]).await?;
        Ok(count_to_u64(row.get(0)))
    }

    async fn get_student(&self, id: i64) -> DbResult<Option<Student>> {
        let client = self.get_client().await?;
        let row = client
            .query_opt("SELECT id, name, age, email FROM students WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(Self::row_to_student))
    }

    async fn create_student(&self, student: &NewStudent) -> DbResult<Student> {
        let client = self.get_client().await?;
        let row = client
            .query_one(
                "INSERT INTO students (name, age, email) VALUES ($1, $2, $3) RETURNING id, name, age, email",
                &[&student.name, &student.age, &student.email],
            )
            .await?;
        Ok(Self::row_to_student(&row))
    }

    async fn update_student(&self, id: i64, student: &NewStudent) -> DbResult<Option<Student>> {
        let client = self.get_client().await?;
        let row = client
            .query_opt(
                "UPDATE students SET name = $2, age = $3, email = $4 WHERE id = $1 RETURNING id, name, age, email",
                &[&id, &student.name, &student.age, &student.email],
            )
            .await?;
        Ok(row.as_ref().map(Self::row_to_student))
    }

    async fn delete_student(&self, id: i64) -> DbResult<bool> {
        let client = self.get_client().await?;
        let removed = client.execute("DELETE FROM students WHERE id = $1", &[&id]).await?;
        Ok(removed > 0)
    }

    async fn list_accounts(&self, page: Option<Page>) -> DbResult<Vec<Account>> {
        let client = self.get_client().await?;
        let (limit, offset) = page_bounds(page);

        let rows = client
            .query(
                "SELECT id, account_name, created FROM accounts ORDER BY id LIMIT $1 OFFSET $2",
                &[&limit, &offset],
            )
            .await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.get("id")).collect();
        let mut links = Self::account_links(&client, &ids).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("id");
                Self::row_to_account(row, links.remove(&id).unwrap_or_default())
            })
            .collect())
    }

    async fn count_accounts(&self) -> DbResult<u64> {
        let client = self.get_client().await?;
        let row = client.query_one("SELECT COUNT(*) FROM accounts", &[]).await?;
        Ok(count_to_u64(row.get(0)))
    }

    async fn get_account(&self, id: i64) -> DbResult<Option<Account>> {
        let client = self.get_client().await?;
        let row = match client
            .query_opt("SELECT id, account_name, created FROM accounts WHERE id = $1", &[&id])
            .await?
        {
            Some(row) => row,
            None => return Ok(None),
        };

        let mut links = Self::account_links(&client, &[id]).await?;
        Ok(Some(Self::row_to_account(&row, links.remove(&id).unwrap_or_default())))
    }

    async fn create_account(&self, account: &NewAccount) -> DbResult<Account> {
        let users = normalize_user_ids(&account.users);
        let mut client = self.get_client().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO accounts (account_name) VALUES ($1) RETURNING id, account_name, created",
                &[&account.account_name],
            )
            .await?;
        let id: i64 = row.get("id");
        Self::write_account_links(&tx, id, &users).await?;
        tx.commit().await?;

        Ok(Self::row_to_account(&row, users))
    }

    async fn update_account(&self, id: i64, account: &NewAccount) -> DbResult<Option<Account>> {
        let users = normalize_user_ids(&account.users);
        let mut client = self.get_client().await?;
        let tx = client.transaction().await?;

        let row = match tx
            .query_opt(
                "UPDATE accounts SET account_name = $2 WHERE id = $1 RETURNING id, account_name, created",
                &[&id, &account.account_name],
            )
            .await?
        {
            Some(row) => row,
            None => return Ok(None),
        };
        Self::write_account_links(&tx, id, &users).await?;
        tx.commit().await?;

        Ok(Some(Self::row_to_account(&row, users)))
    }

    async fn delete_account(&self, id: i64) -> DbResult<bool> {
        let client = self.get_client().await?;
        let removed = client.execute("DELETE FROM accounts WHERE id = $1", &[&id]).await?;
        Ok(removed > 0)
    }

    async fn create_user(&self, user: &NewUser) -> DbResult<User> {
        let client = self.get_client().await?;
        let query = format!(
            "INSERT INTO users (username, email, password_hash, is_staff) VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        );
        let row = client
            .query_one(
                query.as_str(),
                &[&user.username, &user.email, &user.password_hash, &user.is_staff],
            )
            .await
            .map_err(|e| map_unique_violation(e, "A user with that username already exists."))?;
        Ok(Self::row_to_user(&row))
    }

    async fn get_user_by_id(&self, id: i64) -> DbResult<Option<User>> {
        let client = self.get_client().await?;
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = client.query_opt(query.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn get_user_by_username(&self, username: &str) -> DbResult<Option<User>> {
        let client = self.get_client().await?;
        let query = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);
        let row = client.query_opt(query.as_str(), &[&username]).await?;
        Ok(row.as_ref().map(Self::row_to_user))
    }

    async fn update_last_login(&self, id: i64) -> DbResult<()> {
        let client = self.get_client().await?;
        client
            .execute("UPDATE users SET last_login = NOW() WHERE id = $1", &[&id])
            .await?;
        Ok(())
    }

    async fn set_user_active(&self, id: i64, active: bool) -> DbResult<bool> {
        let client = self.get_client().await?;
        let updated = client
            .execute("UPDATE users SET is_active = $2 WHERE id = $1", &[&id, &active])
            .await?;
        Ok(updated > 0)
    }

    async fn get_or_create_auth_token(&self, user_id: i64, candidate_key: &str) -> DbResult<AuthToken> {
        let client = self.get_client().await?;
        client
            .execute(
                "INSERT INTO auth_tokens (key, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING",
                &[&candidate_key, &user_id],
            )
            .await?;
        let row = client
            .query_one("SELECT key, user_id, created FROM auth_tokens WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(Self::row_to_token(&row))
    }

    async fn get_auth_token(&self, key: &str) -> DbResult<Option<AuthToken>> {
        let client = self.get_client().await?;
        let row = client
            .query_opt("SELECT key, user_id, created FROM auth_tokens WHERE key = $1", &[&key])
            .await?;
        Ok(row.as_ref().map(Self::row_to_token))
    }

    async fn blacklist_token(&self, jti: &str, expires_at: DateTime<Utc>) -> DbResult<bool> {
        let client = self.get_client().await?;
        let inserted = client
            .execute(
                "INSERT INTO blacklisted_tokens (jti, expires_at) VALUES ($1, $2) ON CONFLICT (jti) DO NOTHING",
                &[&jti, &expires_at],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn is_token_blacklisted(&self, jti: &str) -> DbResult<bool> {
        let client = self.get_client().await?;
        let row = client
            .query_opt("SELECT jti FROM blacklisted_tokens WHERE jti = $1", &[&jti])
            .await?;
        Ok(row.is_some())
    }

    async fn flush_expired_tokens(&self) -> DbResult<u64> {
        let client = self.get_client().await?;
        let removed = client
            .execute("DELETE FROM blacklisted_tokens WHERE expires_at < NOW()", &[])
            .await?;
        log::debug!("flush_expired_tokens removed {} rows", removed);
        Ok(removed)
    }
}
