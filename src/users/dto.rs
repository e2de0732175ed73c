use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::{NewUser, User, UserChanges};

/// Request body for CreateUser.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub nickname: Option<String>,
    #[serde(default)]
    pub email: String,
    pub country: Option<String>,
    #[serde(default)]
    pub password: String,
}

impl From<CreateUserRequest> for NewUser {
    fn from(r: CreateUserRequest) -> Self {
        Self {
            first_name: r.first_name,
            last_name: r.last_name,
            nickname: r.nickname,
            email: r.email,
            country: r.country,
            password: r.password,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Request body for UpdateUser. Leave `password` out to keep the current one.
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub nickname: Option<String>,
    #[serde(default)]
    pub email: String,
    pub country: Option<String>,
    pub password: Option<String>,
}

impl UpdateUserRequest {
    pub fn into_changes(self, id: Uuid) -> UserChanges {
        UserChanges {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            nickname: self.nickname,
            email: self.email,
            country: self.country,
            password: self.password,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpdateUserResponse {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct DeleteUserResponse {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    pub users: Vec<User>,
    pub total_count: i64,
}
