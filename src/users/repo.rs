use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use crate::users::repo_types::{StoreError, User, UserFilter, UserUpdate};

const USER_COLUMNS: &str =
    "id, first_name, last_name, nickname, email, country, created_at, updated_at";

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user with an already hashed credential.
    async fn create(&self, user: &User, password_hash: &str) -> Result<(), StoreError>;

    /// Returns the stored row after the update, or `None` if the id is unknown.
    async fn update(&self, changes: &UserUpdate) -> Result<Option<User>, StoreError>;

    /// Returns `false` when no row matched.
    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// One page of matching users plus the total number of matches.
    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64), StoreError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError>;
}

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Conflict;
        }
    }
    StoreError::Database(err)
}

fn push_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(first_name) = filter.first_name() {
        qb.push(" AND first_name = ").push_bind(first_name);
    }
    if let Some(last_name) = filter.last_name() {
        qb.push(" AND last_name = ").push_bind(last_name);
    }
    if let Some(country) = filter.country() {
        qb.push(" AND country = ").push_bind(country);
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: &User, password_hash: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users
                (id, first_name, last_name, nickname, email, country,
                 password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.nickname)
        .bind(&user.email)
        .bind(&user.country)
        .bind(password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.db)
        .await
        .map_err(map_write_err)?;

        info!(user_id = %user.id, "user inserted");
        Ok(())
    }

    async fn update(&self, changes: &UserUpdate) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET first_name = $2,
                   last_name = $3,
                   nickname = $4,
                   email = $5,
                   country = $6,
                   password_hash = COALESCE($7, password_hash),
                   updated_at = GREATEST($8, updated_at)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(changes.id)
        .bind(&changes.first_name)
        .bind(&changes.last_name)
        .bind(&changes.nickname)
        .bind(&changes.email)
        .bind(&changes.country)
        .bind(&changes.password_hash)
        .bind(changes.updated_at)
        .fetch_optional(&self.db)
        .await
        .map_err(map_write_err)?;

        match &user {
            Some(u) => info!(user_id = %u.id, "user updated"),
            None => debug!(user_id = %changes.id, "update matched no user"),
        }
        Ok(user)
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        let deleted = res.rows_affected() > 0;
        if deleted {
            info!(user_id = %id, "user deleted");
        } else {
            debug!(user_id = %id, "delete matched no user");
        }
        Ok(deleted)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64), StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        push_filter(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.db).await?;

        let (skip, limit) = filter.window();
        let mut page = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_filter(&mut page, filter);
        page.push(" ORDER BY created_at, id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(skip);
        let users = page.build_query_as::<User>().fetch_all(&self.db).await?;

        debug!(total, returned = users.len(), skip, limit, "users listed");
        Ok((users, total))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }
}
