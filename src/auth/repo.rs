use std::fmt;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::repo_types::{Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictField {
    Username,
    Email,
}

impl fmt::Display for ConflictField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictField::Username => "Username",
            ConflictField::Email => "Email",
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(ConflictField),

    #[error("credential store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

/// Persistent user records keyed by username and by email.
///
/// Lookups return `Ok(None)` only when the record does not exist; any
/// failure to reach the store is an `Err`. Uniqueness of username and email
/// is enforced by the store itself, so `insert` is the source of truth even
/// when callers pre-check.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn insert(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, StoreError>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, role, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<User, StoreError> {
        let res = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash, role, created_at
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let field = match db_err.constraint() {
                    Some(c) if c.contains("email") => ConflictField::Email,
                    _ => ConflictField::Username,
                };
                Err(StoreError::Conflict(field))
            }
            Err(e) => Err(StoreError::Unavailable(e)),
        }
    }
}

#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use time::OffsetDateTime;

    use super::*;

    /// In-process store with the same uniqueness rules as the `users` table.
    #[derive(Default)]
    pub struct MemoryCredentialStore {
        users: Mutex<Vec<User>>,
        unavailable: bool,
    }

    impl MemoryCredentialStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call fails as if the database were down.
        pub fn unavailable() -> Self {
            Self {
                users: Mutex::default(),
                unavailable: true,
            }
        }

        pub fn len(&self) -> usize {
            self.users.lock().unwrap().len()
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.unavailable {
                return Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }

        fn find<P: Fn(&User) -> bool>(&self, pred: P) -> Result<Option<User>, StoreError> {
            self.check()?;
            Ok(self.users.lock().unwrap().iter().find(|u| pred(u)).cloned())
        }
    }

    #[async_trait]
    impl CredentialStore for MemoryCredentialStore {
        async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            self.find(|u| u.username == username)
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.find(|u| u.email == email)
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
            self.find(|u| u.id == id)
        }

        async fn insert(
            &self,
            username: &str,
            email: &str,
            password_hash: &str,
            role: Role,
        ) -> Result<User, StoreError> {
            self.check()?;
            let mut users = self.users.lock().unwrap();
            if users.iter().any(|u| u.username == username) {
                return Err(StoreError::Conflict(ConflictField::Username));
            }
            if users.iter().any(|u| u.email == email) {
                return Err(StoreError::Conflict(ConflictField::Email));
            }
            let user = User {
                id: Uuid::new_v4(),
                username: username.to_string(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                role,
                created_at: OffsetDateTime::now_utc(),
            };
            users.push(user.clone());
            Ok(user)
        }
    }

    #[tokio::test]
    async fn insert_enforces_uniqueness() {
        let store = MemoryCredentialStore::new();
        store.insert("alice", "a@x.io", "h", Role::User).await.unwrap();

        let err = store.insert("alice", "b@x.io", "h", Role::User).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ConflictField::Username)));
        assert_eq!(err.to_string(), "Username already exists");

        let err = store.insert("bob", "a@x.io", "h", Role::User).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ConflictField::Email)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_is_not_absent() {
        let store = MemoryCredentialStore::unavailable();
        assert!(matches!(
            store.find_by_username("alice").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
