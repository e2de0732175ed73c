use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Public projection of a user row. Carries no credential, so anything built
/// from it (responses, events) cannot leak the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub email: String,
    pub country: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Input to `UserService::create_user`.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub email: String,
    pub country: Option<String>,
    pub password: String,
}

/// Input to `UserService::update_user`. `password: None` keeps the stored hash.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub email: String,
    pub country: Option<String>,
    pub password: Option<String>,
}

/// Row written by `UserRepository::update`.
#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub email: String,
    pub country: Option<String>,
    pub password_hash: Option<String>,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserFilter {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub country: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl UserFilter {
    /// Returns `(skip, limit)`. Pages are 1-based; anything below 1 is read as
    /// the first page. A page size below 1 falls back to the default and large
    /// sizes are capped.
    pub fn window(&self) -> (i64, i64) {
        let page = self.page.max(1);
        let limit = if self.page_size < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size.min(MAX_PAGE_SIZE)
        };
        ((page - 1).saturating_mul(limit), limit)
    }

    pub fn first_name(&self) -> Option<&str> {
        non_empty(&self.first_name)
    }

    pub fn last_name(&self) -> Option<&str> {
        non_empty(&self.last_name)
    }

    pub fn country(&self) -> Option<&str> {
        non_empty(&self.country)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The write hit the unique index on `email`.
    #[error("unique constraint violated")]
    Conflict,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
