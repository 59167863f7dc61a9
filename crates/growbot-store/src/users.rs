use chrono::Utc;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use tracing::instrument;
use uuid::Uuid;

use growbot_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;

/// Users and their browser session tokens. Only token hashes are stored.
pub struct UserRepo {
    db: Database,
}

fn hash_token(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub fn create(&self, email: &str) -> Result<UserId, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (email, created_at) VALUES (?1, ?2)",
                rusqlite::params![email, Utc::now().to_rfc3339()],
            )?;
            Ok(UserId::new(conn.last_insert_rowid()))
        })
    }

    pub fn exists(&self, user: UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [user.get()], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Mint a new opaque token for `user`. The plain token is returned once.
    #[instrument(skip(self), fields(user_id = %user))]
    pub fn issue_token(&self, user: UserId) -> Result<String, StoreError> {
        if !self.exists(user)? {
            return Err(StoreError::NotFound(format!("user {user}")));
        }
        let token = Uuid::new_v4().simple().to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_tokens (token_hash, user_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![hash_token(&token), user.get(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        Ok(token)
    }

    pub fn resolve_token(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let user = conn
                .query_row(
                    "SELECT user_id FROM user_tokens WHERE token_hash = ?1",
                    [hash_token(token)],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(user.map(UserId::new))
        })
    }
}
