use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    state::AppState,
    users::{
        dto::{
            CreateUserRequest, CreateUserResponse, DeleteUserResponse, ListUsersResponse,
            UpdateUserRequest, UpdateUserResponse,
        },
        error::{Result, UserError},
        repo_types::{User, UserFilter},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route(
            "/users/:id",
            get(get_user_by_id).put(update_user).delete(delete_user),
        )
}

/// Ids that do not parse can never match a stored user.
fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| UserError::NotFound)
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateUserResponse>)> {
    let Json(payload) = payload?;
    let (id, created_at) = state.users.create_user(payload.into()).await?;
    Ok((StatusCode::CREATED, Json(CreateUserResponse { id, created_at })))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UpdateUserResponse>> {
    let id = parse_id(&id)?;
    let Json(payload) = payload?;
    let updated_at = state.users.update_user(payload.into_changes(id)).await?;
    Ok(Json(UpdateUserResponse { id, updated_at }))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteUserResponse>> {
    let id = parse_id(&id)?;
    state.users.delete_user(id).await?;
    Ok(Json(DeleteUserResponse { id }))
}

#[instrument(skip(state))]
pub async fn get_user_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>> {
    let id = parse_id(&id)?;
    Ok(Json(state.users.get_user(id).await?))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    filter: std::result::Result<Query<UserFilter>, QueryRejection>,
) -> Result<Json<ListUsersResponse>> {
    let Query(filter) = filter?;
    let (users, total_count) = state.users.list_users(&filter).await?;
    Ok(Json(ListUsersResponse { users, total_count }))
}
