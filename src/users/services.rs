use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::notifier::UserNotifier;
use crate::users::{
    error::{Result, UserError},
    password::CredentialHasher,
    repo::UserRepository,
    repo_types::{NewUser, User, UserChanges, UserFilter, UserUpdate},
};

/// Domain events fired after a successful mutation.
#[derive(Debug, Clone)]
enum UserEvent {
    Created(User),
    Updated(User),
    Deleted(Uuid),
}

impl UserEvent {
    fn kind(&self) -> &'static str {
        match self {
            UserEvent::Created(_) => "created",
            UserEvent::Updated(_) => "updated",
            UserEvent::Deleted(_) => "deleted",
        }
    }

    fn user_id(&self) -> Uuid {
        match self {
            UserEvent::Created(u) | UserEvent::Updated(u) => u.id,
            UserEvent::Deleted(id) => *id,
        }
    }
}

/// The only place business rules live: validation, persistence ordering and
/// event dispatch.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    notifier: Arc<dyn UserNotifier>,
    hasher: CredentialHasher,
    publish_timeout: Duration,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn trimmed_opt(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Current time at the store's microsecond precision, so values handed back to
/// callers match what a later read returns.
fn now_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now - time::Duration::nanoseconds(i64::from(now.nanosecond() % 1_000))
}

fn require_names(first_name: &str, last_name: &str) -> Result<()> {
    if is_blank(first_name) || is_blank(last_name) {
        return Err(UserError::MissingRequiredField("name"));
    }
    Ok(())
}

impl UserService {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        notifier: Arc<dyn UserNotifier>,
        hasher: CredentialHasher,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            notifier,
            hasher,
            publish_timeout,
        }
    }

    async fn hash(&self, plain: String) -> Result<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| UserError::Internal(e.to_string()))?
            .map_err(|e| UserError::Internal(e.to_string()))
    }

    /// Fire-and-forget publish on its own task with a fresh deadline. The
    /// caller's future can be dropped without cancelling it; failures are
    /// only logged.
    fn dispatch(&self, event: UserEvent) {
        let notifier = Arc::clone(&self.notifier);
        let deadline = Instant::now() + self.publish_timeout;
        tokio::spawn(async move {
            let kind = event.kind();
            let user_id = event.user_id();
            let res = match &event {
                UserEvent::Created(u) => notifier.user_created(u, deadline).await,
                UserEvent::Updated(u) => notifier.user_updated(u, deadline).await,
                UserEvent::Deleted(id) => notifier.user_deleted(*id, deadline).await,
            };
            match res {
                Ok(()) => info!(%user_id, kind, "user event published"),
                Err(e) => warn!(%user_id, kind, error = %e, "user event publish failed"),
            }
        });
    }

    #[instrument(skip(self, draft), fields(email = %draft.email.trim()))]
    pub async fn create_user(&self, draft: NewUser) -> Result<(Uuid, OffsetDateTime)> {
        if is_blank(&draft.email) || draft.password.is_empty() {
            return Err(UserError::MissingRequiredField("email/password"));
        }
        require_names(&draft.first_name, &draft.last_name)?;

        let email = draft.email.trim().to_string();
        if self.repo.exists_by_email(&email).await? {
            warn!("email already registered");
            return Err(UserError::DuplicateEmail);
        }

        let now = now_utc();
        let user = User {
            id: Uuid::new_v4(),
            first_name: draft.first_name.trim().to_string(),
            last_name: draft.last_name.trim().to_string(),
            nickname: trimmed_opt(draft.nickname),
            email,
            country: trimmed_opt(draft.country),
            created_at: now,
            updated_at: now,
        };
        let password_hash = self.hash(draft.password).await?;

        self.repo.create(&user, &password_hash).await?;
        info!(user_id = %user.id, "user created");

        let created = (user.id, user.created_at);
        self.dispatch(UserEvent::Created(user));
        Ok(created)
    }

    #[instrument(skip(self, changes), fields(user_id = %changes.id))]
    pub async fn update_user(&self, changes: UserChanges) -> Result<OffsetDateTime> {
        if is_blank(&changes.email) {
            return Err(UserError::MissingRequiredField("email"));
        }
        require_names(&changes.first_name, &changes.last_name)?;

        let password_hash = match changes.password {
            Some(p) if p.is_empty() => return Err(UserError::MissingRequiredField("password")),
            Some(p) => Some(self.hash(p).await?),
            None => None,
        };

        let update = UserUpdate {
            id: changes.id,
            first_name: changes.first_name.trim().to_string(),
            last_name: changes.last_name.trim().to_string(),
            nickname: trimmed_opt(changes.nickname),
            email: changes.email.trim().to_string(),
            country: trimmed_opt(changes.country),
            password_hash,
            updated_at: now_utc(),
        };

        let user = self.repo.update(&update).await?.ok_or(UserError::NotFound)?;
        info!(credential_changed = update.password_hash.is_some(), "user updated");

        let updated_at = user.updated_at;
        self.dispatch(UserEvent::Updated(user));
        Ok(updated_at)
    }

    /// The "deleted" event goes out only once the row is actually gone.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: Uuid) -> Result<()> {
        if !self.repo.delete_by_id(id).await? {
            return Err(UserError::NotFound);
        }
        info!("user deleted");
        self.dispatch(UserEvent::Deleted(id));
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        self.repo.get_by_id(id).await?.ok_or(UserError::NotFound)
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self, filter: &UserFilter) -> Result<(Vec<User>, i64)> {
        Ok(self.repo.list(filter).await?)
    }
}
