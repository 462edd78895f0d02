use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{normalize_user_ids, DbError, DbResult, Repository};
use crate::models::{Account, AuthToken, NewAccount, NewStudent, NewUser, Student, User};
use crate::utils::Page;

#[derive(Default)]
struct State {
    students: BTreeMap<i64, Student>,
    accounts: BTreeMap<i64, Account>,
    users: BTreeMap<i64, User>,
    tokens: HashMap<String, AuthToken>,
    blacklist: HashMap<String, DateTime<Utc>>,
    last_student_id: i64,
    last_account_id: i64,
    last_user_id: i64,
}

impl State {
    fn check_users(&self, ids: &[i64]) -> DbResult<()> {
        match ids.iter().find(|id| !self.users.contains_key(*id)) {
            Some(missing) => Err(DbError::UnknownUser(*missing)),
            None => Ok(()),
        }
    }
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

fn paginate<'a, T: Clone + 'a>(items: impl Iterator<Item = &'a T>, page: Option<Page>) -> Vec<T> {
    match page {
        Some(p) => items
            .skip(usize::try_from(p.offset).unwrap_or(0))
            .take(usize::try_from(p.limit).unwrap_or(usize::MAX))
            .cloned()
            .collect(),
        None => items.cloned().collect(),
    }
}

/// Process-local repository, used for `DATABASE_URL=memory://` and in tests
#[derive(Default)]
pub struct InMemoryDatabase {
    state: RwLock<State>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryDatabase {
    async fn list_students(&self, page: Option<Page>) -> DbResult<Vec<Student>> {
        let state = self.state.read().await;
        Ok(paginate(state.students.values(), page))
    }

    async fn count_students(&self) -> DbResult<u64> {
        Ok(self.state.read().await.students.len() as u64)
    }

    async fn get_student(&self, id: i64) -> DbResult<Option<Student>> {
        Ok(self.state.read().await.students.get(&id).cloned())
    }

    async fn create_student(&self, student: &NewStudent) -> DbResult<Student> {
        let mut state = self.state.write().await;
        let id = next_id(&mut state.last_student_id);
        let created = Student {
            id,
            name: student.name.clone(),
            age: student.age,
            email: student.email.clone(),
        };
        state.students.insert(id, created.clone());
        Ok(created)
    }

    async fn update_student(&self, id: i64, student: &NewStudent) -> DbResult<Option<Student>> {
        let mut state = self.state.write().await;
        Ok(state.students.get_mut(&id).map(|existing| {
            existing.name = student.name.clone();
            existing.age = student.age;
            existing.email = student.email.clone();
            existing.clone()
        }))
    }

    async fn delete_student(&self, id: i64) -> DbResult<bool> {
        Ok(self.state.write().await.students.remove(&id).is_some())
    }

    async fn list_accounts(&self, page: Option<Page>) -> DbResult<Vec<Account>> {
        let state = self.state.read().await;
        Ok(paginate(state.accounts.values(), page))
    }

    async fn count_accounts(&self) -> DbResult<u64> {
        Ok(self.state.read().await.accounts.len() as u64)
    }

    async fn get_account(&self, id: i64) -> DbResult<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn create_account(&self, account: &NewAccount) -> DbResult<Account> {
        let users = normalize_user_ids(&account.users);
        let mut state = self.state.write().await;
        state.check_users(&users)?;

        let id = next_id(&mut state.last_account_id);
        let created = Account {
            id,
            account_name: account.account_name.clone(),
            users,
            created: Utc::now(),
        };
        state.accounts.insert(id, created.clone());
        Ok(created)
    }

    async fn update_account(&self, id: i64, account: &NewAccount) -> DbResult<Option<Account>> {
        let users = normalize_user_ids(&account.users);
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&id) {
            return Ok(None);
        }
        state.check_users(&users)?;

        Ok(state.accounts.get_mut(&id).map(|existing| {
            existing.account_name = account.account_name.clone();
            existing.users = users;
            existing.clone()
        }))
    }

    async fn delete_account(&self, id: i64) -> DbResult<bool> {
        Ok(self.state.write().await.accounts.remove(&id).is_some())
    }

    async fn create_user(&self, user: &NewUser) -> DbResult<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(DbError::Conflict("A user with that username already exists.".to_string()));
        }

        let id = next_id(&mut state.last_user_id);
        let created = User {
            id,
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            is_active: true,
            is_staff: user.is_staff,
            date_joined: Utc::now(),
            last_login: None,
        };
        state.users.insert(id, created.clone());
        Ok(created)
    }

    async fn get_user_by_id(&self, id: i64) -> DbResult<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> DbResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn update_last_login(&self, id: i64) -> DbResult<()> {
        if let Some(user) = self.state.write().await.users.get_mut(&id) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_user_active(&self, id: i64, active: bool) -> DbResult<bool> {
        match self.state.write().await.users.get_mut(&id) {
            Some(user) => {
                user.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_or_create_auth_token(&self, user_id: i64, candidate_key: &str) -> DbResult<AuthToken> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.tokens.values().find(|t| t.user_id == user_id) {
            return Ok(existing.clone());
        }

        let token = AuthToken {
            key: candidate_key.to_string(),
            user_id,
            created: Utc::now(),
        };
        state.tokens.insert(token.key.clone(), token.clone());
        Ok(token)
    }

    async fn get_auth_token(&self, key: &str) -> DbResult<Option<AuthToken>> {
        Ok(self.state.read().await.tokens.get(key).cloned())
    }

    async fn blacklist_token(&self, jti: &str, expires_at: DateTime<Utc>) -> DbResult<bool> {
        let mut state = self.state.write().await;
        if state.blacklist.contains_key(jti) {
            return Ok(false);
        }
        state.blacklist.insert(jti.to_string(), expires_at);
        Ok(true)
    }

    async fn is_token_blacklisted(&self, jti: &str) -> DbResult<bool> {
        Ok(self.state.read().await.blacklist.contains_key(jti))
    }

    async fn flush_expired_tokens(&self) -> DbResult<u64> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let before = state.blacklist.len();
        state.blacklist.retain(|_, expires_at| *expires_at >= now);
        Ok((before - state.blacklist.len()) as u64)
    }
}
