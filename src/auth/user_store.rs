//! User & revocation storage (C6), SQLite-backed exactly per spec §6's
//! persisted-state schema: `users(username PK, password_hash, role)` and
//! `token_revocations(token_id PK, expires_at)`. Grounded on the teacher's
//! `UserStore`, narrowed to these two tables (the teacher's `api_keys`
//! table and `ApiKey` concept are dropped — not part of this spec).

use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use rusqlite::{params, Connection};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::models::{User, UserRole};

pub struct UserStore {
    db_path: String,
}

impl UserStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS token_revocations (
                token_id TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL
            )",
            [],
        )?;

        self.create_default_admin(&conn)?;

        Ok(())
    }

    fn create_default_admin(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE role = 'admin'",
                [],
                |row| row.get(0),
            )
            .context("failed to check for admin users")?;

        if count == 0 {
            let password_hash = hash("admin123", DEFAULT_COST).context("failed to hash password")?;

            conn.execute(
                "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
                params!["admin", password_hash, UserRole::Admin.as_str()],
            )
            .context("failed to insert default admin")?;

            info!("default admin user created (username: admin, password: admin123)");
            warn!("change the default admin password before exposing this gateway publicly");
        }

        Ok(())
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = Connection::open(&self.db_path)?;

        let result = conn.query_row(
            "SELECT username, password_hash, role FROM users WHERE username = ?1",
            params![username],
            |row| {
                let role_str: String = row.get(2)?;
                Ok(User {
                    username: row.get(0)?,
                    password_hash: row.get(1)?,
                    role: UserRole::from_str(&role_str).unwrap_or(UserRole::User),
                })
            },
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_user_by_username(username)? {
            Some(user) => verify(password, &user.password_hash).context("failed to verify password"),
            None => Ok(false),
        }
    }

    pub fn create_user(&self, username: &str, password: &str, role: UserRole) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("failed to hash password")?;

        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)",
            params![username, password_hash, role.as_str()],
        )
        .context("failed to insert user (username may already exist)")?;

        info!(%username, role = role.as_str(), "created user");

        Ok(User {
            username: username.to_string(),
            password_hash,
            role,
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare("SELECT username, password_hash, role FROM users")?;

        let users = stmt
            .query_map([], |row| {
                let role_str: String = row.get(2)?;
                Ok(User {
                    username: row.get(0)?,
                    password_hash: row.get(1)?,
                    role: UserRole::from_str(&role_str).unwrap_or(UserRole::User),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(users)
    }

    /// Records a revocation, keyed by the token's own `token_id` so lookup
    /// at verification time never needs the full token string.
    pub fn revoke_token(&self, token_id: &Uuid, expires_at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT OR REPLACE INTO token_revocations (token_id, expires_at) VALUES (?1, ?2)",
            params![token_id.to_string(), expires_at.to_rfc3339()],
        )
        .context("failed to record token revocation")?;
        Ok(())
    }

    pub fn is_token_revoked(&self, token_id: &Uuid) -> Result<bool> {
        let conn = Connection::open(&self.db_path)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM token_revocations WHERE token_id = ?1",
            params![token_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Drops revocation rows whose underlying token has already expired —
    /// the row is load-bearing only until the token would stop verifying
    /// anyway. Not called automatically; a maintenance hook for callers
    /// that want to keep the table small over a long-running process.
    pub fn prune_expired_revocations(&self) -> Result<usize> {
        let conn = Connection::open(&self.db_path)?;
        let now = chrono::Utc::now().to_rfc3339();
        let removed = conn.execute(
            "DELETE FROM token_revocations WHERE expires_at < ?1",
            params![now],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path).unwrap();
        (store, temp_file)
    }

    #[test]
    fn default_admin_created() {
        let (store, _temp) = create_test_store();

        let admin = store.get_user_by_username("admin").unwrap().unwrap();
        assert_eq!(admin.username, "admin");
        assert_eq!(admin.role, UserRole::Admin);
    }

    #[test]
    fn password_verification() {
        let (store, _temp) = create_test_store();

        assert!(store.verify_password("admin", "admin123").unwrap());
        assert!(!store.verify_password("admin", "wrongpassword").unwrap());
        assert!(!store.verify_password("nonexistent", "password").unwrap());
    }

    #[test]
    fn create_and_retrieve_user() {
        let (store, _temp) = create_test_store();

        let user = store.create_user("trader1", "password123", UserRole::User).unwrap();
        assert_eq!(user.username, "trader1");
        assert_eq!(user.role, UserRole::User);

        let retrieved = store.get_user_by_username("trader1").unwrap().unwrap();
        assert_eq!(retrieved.username, "trader1");
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let (store, _temp) = create_test_store();

        store.create_user("dup", "pass", UserRole::User).unwrap();
        assert!(store.create_user("dup", "pass2", UserRole::User).is_err());
    }

    #[test]
    fn list_users_includes_default_admin() {
        let (store, _temp) = create_test_store();

        store.create_user("trader1", "pass", UserRole::User).unwrap();
        let users = store.list_users().unwrap();
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn revocation_roundtrip() {
        let (store, _temp) = create_test_store();
        let token_id = Uuid::new_v4();

        assert!(!store.is_token_revoked(&token_id).unwrap());
        store
            .revoke_token(&token_id, chrono::Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        assert!(store.is_token_revoked(&token_id).unwrap());
    }

    #[test]
    fn prune_removes_only_expired_revocations() {
        let (store, _temp) = create_test_store();
        let expired_id = Uuid::new_v4();
        let live_id = Uuid::new_v4();

        store
            .revoke_token(&expired_id, chrono::Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        store
            .revoke_token(&live_id, chrono::Utc::now() + chrono::Duration::hours(1))
            .unwrap();

        let removed = store.prune_expired_revocations().unwrap();
        assert_eq!(removed, 1);
        assert!(!store.is_token_revoked(&expired_id).unwrap());
        assert!(store.is_token_revoked(&live_id).unwrap());
    }
}
