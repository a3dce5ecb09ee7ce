//! Feed owners.
//!
//! Only the fields needed to address a failure notification are kept here.

use chrono::{DateTime, Utc};

use super::{parse_datetime, DbPool};
use crate::Result;

/// A user who owns feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

/// Repository for user lookups.
pub struct UserRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a user.
    pub async fn create(&self, username: &str, email: Option<&str>) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (username, email) VALUES (?, ?)
             RETURNING id, username, email, created_at",
        )
        .bind(username)
        .bind(email)
        .fetch_one(self.pool)
        .await?;
        Ok(row.into())
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by username.
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, email, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Return the user with this username, creating it if necessary.
    pub async fn get_or_create(&self, username: &str, email: Option<&str>) -> Result<User> {
        if let Some(user) = self.get_by_username(username).await? {
            return Ok(user);
        }
        self.create(username, email).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = UserRepository::new(db.pool());

        let user = repo.create("alice", Some("alice@example.com")).await.unwrap();
        assert!(user.id > 0);
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));

        let fetched = repo.get_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(fetched, user);
        assert!(repo.get_by_id(user.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = UserRepository::new(db.pool());

        let first = repo.get_or_create("bob", None).await.unwrap();
        let second = repo.get_or_create("bob", Some("ignored@example.com")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.email.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = UserRepository::new(db.pool());

        repo.create("carol", None).await.unwrap();
        assert!(repo.create("carol", None).await.is_err());
    }
}
