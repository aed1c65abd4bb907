//! Identity resolution: turns credentials or a federated assertion into a
//! canonical [`Identity`], creating users where the flow calls for it.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};

use crate::{
    auth::{
        password::{hash_password_blocking, unusable_password_hash_blocking, verify_password_blocking},
        repo::{CredentialStore, StoreError},
        repo_types::{Identity, Role},
    },
    error::AppError,
};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Upper bound on username candidates tried during federated sign-up.
pub const MAX_USERNAME_PROBES: u32 = 1000;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Username seed from an email's local part: lower-cased, anything outside
/// `[a-z0-9_]` replaced by `_`.
pub(crate) fn username_base(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let base: String = local
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if base.is_empty() {
        "user".to_string()
    } else {
        base
    }
}

fn store_failure(e: StoreError) -> AppError {
    match e {
        StoreError::Conflict(field) => AppError::Conflict(format!("{field} already exists")),
        StoreError::Unavailable(e) => AppError::Dependency(e.into()),
    }
}

/// Direct credential authentication. Unknown user and wrong password are
/// the same `AuthenticationFailure`.
pub async fn authenticate_credentials(
    store: &dyn CredentialStore,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<Identity, AppError> {
    let (Some(username), Some(password)) = (
        username.filter(|s| !s.is_empty()),
        password.filter(|s| !s.is_empty()),
    ) else {
        return Err(AppError::AuthenticationFailure);
    };

    let user = match store.find_by_username(username).await.map_err(store_failure)? {
        Some(u) => u,
        None => {
            warn!(%username, "login unknown username");
            return Err(AppError::AuthenticationFailure);
        }
    };

    if !verify_password_blocking(password.to_string(), user.password_hash.clone()).await {
        warn!(%username, user_id = %user.id, "login invalid password");
        return Err(AppError::AuthenticationFailure);
    }

    info!(user_id = %user.id, %username, "user authenticated");
    Ok(Identity::from(&user))
}

/// Federated authentication from a provider-verified email. First sign-in
/// provisions a user with an unusable password and role `user`.
pub async fn resolve_federated(
    store: &dyn CredentialStore,
    asserted_email: &str,
) -> Result<Identity, AppError> {
    let email = normalize_email(asserted_email);
    if !is_valid_email(&email) {
        warn!(email = %asserted_email, "federated assertion carried an invalid email");
        return Err(AppError::AuthenticationFailure);
    }

    if let Some(user) = store.find_by_email(&email).await.map_err(store_failure)? {
        return Ok(Identity::from(&user));
    }

    let username = allocate_username(store, &email).await?;
    let password_hash = unusable_password_hash_blocking().await?;

    let user = match store.insert(&username, &email, &password_hash, Role::User).await {
        Ok(u) => u,
        Err(StoreError::Conflict(field)) => {
            // Lost a race with a concurrent sign-in; the pre-check is only advisory.
            error!(%username, %email, conflict = %field, "federated provisioning conflict");
            return Err(AppError::IdentityProvisioning);
        }
        Err(StoreError::Unavailable(e)) => return Err(AppError::Dependency(e.into())),
    };

    info!(user_id = %user.id, username = %user.username, email = %user.email, "user provisioned from federated sign-in");
    Ok(Identity::from(&user))
}

async fn allocate_username(store: &dyn CredentialStore, email: &str) -> Result<String, AppError> {
    let base = username_base(email);
    for attempt in 0..MAX_USERNAME_PROBES {
        let candidate = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}{attempt}")
        };
        if store
            .find_by_username(&candidate)
            .await
            .map_err(store_failure)?
            .is_none()
        {
            return Ok(candidate);
        }
    }
    error!(%base, probes = MAX_USERNAME_PROBES, "could not allocate a unique username");
    Err(AppError::IdentityProvisioning)
}

/// Validated registration input.
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl NewUser {
    pub fn validate(
        username: Option<&str>,
        email: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self, AppError> {
        let (Some(username), Some(email), Some(password)) = (username, email, password) else {
            return Err(AppError::Validation("All fields are required".into()));
        };
        let username = username.trim();
        let email = normalize_email(email);
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AppError::Validation("All fields are required".into()));
        }
        if !is_valid_email(&email) {
            return Err(AppError::Validation("Invalid email format".into()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters long"
            )));
        }
        Ok(Self {
            username: username.to_string(),
            email,
            password: password.to_string(),
        })
    }
}

/// Direct registration with an explicit password.
pub async fn register_user(
    store: &dyn CredentialStore,
    new: NewUser,
    role: Role,
) -> Result<Identity, AppError> {
    // Friendly early answers; the insert below still enforces uniqueness.
    if store
        .find_by_username(&new.username)
        .await
        .map_err(store_failure)?
        .is_some()
    {
        return Err(AppError::Conflict("Username already exists".into()));
    }
    if store
        .find_by_email(&new.email)
        .await
        .map_err(store_failure)?
        .is_some()
    {
        return Err(AppError::Conflict("Email already exists".into()));
    }

    let hash = hash_password_blocking(new.password).await?;
    let user = store
        .insert(&new.username, &new.email, &hash, role)
        .await
        .map_err(store_failure)?;

    info!(user_id = %user.id, username = %user.username, email = %user.email, role = %user.role, "user registered");
    Ok(Identity::from(&user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{repo::memory::MemoryCredentialStore, repo_types::User};

    async fn seed(store: &MemoryCredentialStore, username: &str, email: &str, password: &str) -> Identity {
        let new = NewUser::validate(Some(username), Some(email), Some(password)).unwrap();
        register_user(store, new, Role::User).await.unwrap()
    }

    #[test]
    fn username_base_normalizes_local_part() {
        assert_eq!(username_base("alice@example.com"), "alice");
        assert_eq!(username_base("Alice.Smith+ops@example.com"), "alice_smith_ops");
        assert_eq!(username_base("j_doe99@x.io"), "j_doe99");
        assert_eq!(username_base("@example.com"), "user");
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email("no-at-sign.com"));
    }

    #[test]
    fn registration_validation_messages() {
        let err = NewUser::validate(Some("bob"), None, Some("secret1")).unwrap_err();
        assert_eq!(err.to_string(), "All fields are required");

        let err = NewUser::validate(Some("bob"), Some("bob@nowhere"), Some("secret1")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid email format");

        let err = NewUser::validate(Some("bob"), Some("bob@x.io"), Some("12345")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("at least 6"));

        let ok = NewUser::validate(Some(" bob "), Some(" Bob@X.io "), Some("123456")).unwrap();
        assert_eq!(ok.username, "bob");
        assert_eq!(ok.email, "bob@x.io");
    }

    #[tokio::test]
    async fn register_succeeds_once_then_conflicts() {
        let store = MemoryCredentialStore::new();
        let id = seed(&store, "bob", "bob@x.io", "secret1").await;
        assert_eq!(id.role, Role::User);

        let same_username = NewUser::validate(Some("bob"), Some("other@x.io"), Some("secret1")).unwrap();
        let err = register_user(&store, same_username, Role::User).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.to_string(), "Username already exists");

        let same_email = NewUser::validate(Some("robert"), Some("bob@x.io"), Some("secret1")).unwrap();
        let err = register_user(&store, same_email, Role::User).await.unwrap_err();
        assert_eq!(err.to_string(), "Email already exists");

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn credentials_roundtrip_returns_stored_identity() {
        let store = MemoryCredentialStore::new();
        let registered = seed(&store, "carol", "carol@x.io", "p4ssword").await;

        let id = authenticate_credentials(&store, Some("carol"), Some("p4ssword"))
            .await
            .unwrap();
        assert_eq!(id, registered);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let store = MemoryCredentialStore::new();
        seed(&store, "dave", "dave@x.io", "p4ssword").await;

        let wrong = authenticate_credentials(&store, Some("dave"), Some("nope!!"))
            .await
            .unwrap_err();
        let unknown = authenticate_credentials(&store, Some("mallory"), Some("p4ssword"))
            .await
            .unwrap_err();
        let missing = authenticate_credentials(&store, Some("dave"), None)
            .await
            .unwrap_err();

        for err in [&wrong, &unknown, &missing] {
            assert!(matches!(err, AppError::AuthenticationFailure));
            assert_eq!(err.status(), wrong.status());
            assert_eq!(err.to_string(), wrong.to_string());
        }
    }

    #[tokio::test]
    async fn store_outage_is_not_an_auth_failure() {
        let store = MemoryCredentialStore::unavailable();
        let err = authenticate_credentials(&store, Some("dave"), Some("p4ssword"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Dependency(_)));
    }

    #[tokio::test]
    async fn federated_sign_ins_allocate_suffixed_usernames() {
        let store = MemoryCredentialStore::new();

        let first = resolve_federated(&store, "alice@example.com").await.unwrap();
        assert_eq!(first.username, "alice");
        assert_eq!(first.role, Role::User);

        let second = resolve_federated(&store, "alice@other.com").await.unwrap();
        assert_eq!(second.username, "alice1");

        let third = resolve_federated(&store, "Alice@third.org").await.unwrap();
        assert_eq!(third.username, "alice2");
        assert_eq!(third.email, "alice@third.org");

        assert_ne!(first.id, second.id);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn federated_returning_user_is_not_duplicated() {
        let store = MemoryCredentialStore::new();
        let first = resolve_federated(&store, "erin@example.com").await.unwrap();
        let again = resolve_federated(&store, "erin@example.com").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn federated_links_to_registered_user_by_email() {
        let store = MemoryCredentialStore::new();
        let registered = seed(&store, "frank_admin", "frank@example.com", "secret1").await;
        let id = resolve_federated(&store, "frank@example.com").await.unwrap();
        assert_eq!(id.username, "frank_admin");
        assert_eq!(id.id, registered.id);
    }

    #[tokio::test]
    async fn federated_account_cannot_use_password_login() {
        let store = MemoryCredentialStore::new();
        let id = resolve_federated(&store, "gina@example.com").await.unwrap();
        for guess in ["", "password", "gina"] {
            let res = authenticate_credentials(&store, Some(id.username.as_str()), Some(guess)).await;
            assert!(matches!(res, Err(AppError::AuthenticationFailure)));
        }
    }

    #[tokio::test]
    async fn federated_probe_is_bounded() {
        let store = MemoryCredentialStore::new();
        store.insert("hank", "hank@a.io", "h", Role::User).await.unwrap();
        for i in 1..MAX_USERNAME_PROBES {
            store
                .insert(&format!("hank{i}"), &format!("hank{i}@a.io"), "h", Role::User)
                .await
                .unwrap();
        }
        let err = resolve_federated(&store, "hank@b.io").await.unwrap_err();
        assert!(matches!(err, AppError::IdentityProvisioning));
    }

    /// Sees no existing usernames, as if another sign-in committed between
    /// the availability check and the insert.
    struct StaleUsernameView(MemoryCredentialStore);

    #[async_trait::async_trait]
    impl CredentialStore for StaleUsernameView {
        async fn find_by_username(&self, _username: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
            self.0.find_by_email(email).await
        }

        async fn find_by_id(&self, id: uuid::Uuid) -> Result<Option<User>, StoreError> {
            self.0.find_by_id(id).await
        }

        async fn insert(
            &self,
            username: &str,
            email: &str,
            password_hash: &str,
            role: Role,
        ) -> Result<User, StoreError> {
            self.0.insert(username, email, password_hash, role).await
        }
    }

    #[tokio::test]
    async fn federated_insert_race_fails_closed() {
        let inner = MemoryCredentialStore::new();
        inner.insert("zed", "zed@first.io", "h", Role::User).await.unwrap();
        let store = StaleUsernameView(inner);

        let err = resolve_federated(&store, "zed@example.com").await.unwrap_err();
        assert!(matches!(err, AppError::IdentityProvisioning));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.0.len(), 1);
        assert!(store.0.find_by_email("zed@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn federated_rejects_malformed_assertion() {
        let store = MemoryCredentialStore::new();
        let err = resolve_federated(&store, "not-an-email").await.unwrap_err();
        assert!(matches!(err, AppError::AuthenticationFailure));
        assert_eq!(store.len(), 0);
    }
}
