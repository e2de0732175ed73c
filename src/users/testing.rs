//! In-memory collaborators for service and router tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};
use uuid::Uuid;

use crate::notifier::{NotifyError, UserNotifier};
use crate::users::repo::UserRepository;
use crate::users::repo_types::{StoreError, User, UserFilter, UserUpdate};

#[derive(Default)]
pub struct InMemoryUserRepository {
    rows: Mutex<Vec<(User, String)>>,
    calls: AtomicUsize,
    creates: AtomicUsize,
}

impl InMemoryUserRepository {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn password_hash(&self, id: Uuid) -> Option<String> {
        let rows = self.rows.lock().unwrap();
        rows.iter()
            .find(|(u, _)| u.id == id)
            .map(|(_, hash)| hash.clone())
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn matches(filter: &UserFilter, user: &User) -> bool {
    filter.first_name().map_or(true, |v| user.first_name == v)
        && filter.last_name().map_or(true, |v| user.last_name == v)
        && filter
            .country()
            .map_or(true, |v| user.country.as_deref() == Some(v))
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: &User, password_hash: &str) -> Result<(), StoreError> {
        self.touch();
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|(u, _)| u.email == user.email) {
            return Err(StoreError::Conflict);
        }
        rows.push((user.clone(), password_hash.to_string()));
        Ok(())
    }

    async fn update(&self, changes: &UserUpdate) -> Result<Option<User>, StoreError> {
        self.touch();
        let mut rows = self.rows.lock().unwrap();
        // Unknown id wins over an email clash, as with `UPDATE .. WHERE id`.
        if !rows.iter().any(|(u, _)| u.id == changes.id) {
            return Ok(None);
        }
        if rows
            .iter()
            .any(|(u, _)| u.email == changes.email && u.id != changes.id)
        {
            return Err(StoreError::Conflict);
        }
        let Some((user, hash)) = rows.iter_mut().find(|(u, _)| u.id == changes.id) else {
            return Ok(None);
        };
        user.first_name = changes.first_name.clone();
        user.last_name = changes.last_name.clone();
        user.nickname = changes.nickname.clone();
        user.email = changes.email.clone();
        user.country = changes.country.clone();
        user.updated_at = changes.updated_at.max(user.updated_at);
        if let Some(new_hash) = &changes.password_hash {
            *hash = new_hash.clone();
        }
        Ok(Some(user.clone()))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        self.touch();
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|(u, _)| u.id != id);
        Ok(rows.len() < before)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.touch();
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().find(|(u, _)| u.id == id).map(|(u, _)| u.clone()))
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64), StoreError> {
        self.touch();
        let rows = self.rows.lock().unwrap();
        let matching: Vec<User> = rows
            .iter()
            .map(|(u, _)| u)
            .filter(|u| matches(filter, u))
            .cloned()
            .collect();
        let total = matching.len() as i64;
        let (skip, limit) = filter.window();
        let page = matching
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        self.touch();
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().any(|(u, _)| u.email == email))
    }
}

/// Repository whose every call fails as if the database were unreachable.
pub struct UnreachableRepository;

#[async_trait]
impl UserRepository for UnreachableRepository {
    async fn create(&self, _: &User, _: &str) -> Result<(), StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
    async fn update(&self, _: &UserUpdate) -> Result<Option<User>, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
    async fn delete_by_id(&self, _: Uuid) -> Result<bool, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
    async fn get_by_id(&self, _: Uuid) -> Result<Option<User>, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
    async fn list(&self, _: &UserFilter) -> Result<(Vec<User>, i64), StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
    async fn exists_by_email(&self, _: &str) -> Result<bool, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Created(User),
    Updated(User),
    Deleted(Uuid),
}

/// Forwards every publish to a channel. With `fail` set it records the
/// attempt and then reports a broker rejection.
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<Published>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, fail: false }, rx)
    }

    pub fn failing() -> (Self, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, fail: true }, rx)
    }

    fn record(&self, event: Published, routing_key: &'static str) -> Result<(), NotifyError> {
        let _ = self.tx.send(event);
        if self.fail {
            Err(NotifyError::Rejected(routing_key))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl UserNotifier for RecordingNotifier {
    async fn user_created(&self, user: &User, _: Instant) -> Result<(), NotifyError> {
        self.record(Published::Created(user.clone()), "user.created")
    }
    async fn user_updated(&self, user: &User, _: Instant) -> Result<(), NotifyError> {
        self.record(Published::Updated(user.clone()), "user.updated")
    }
    async fn user_deleted(&self, id: Uuid, _: Instant) -> Result<(), NotifyError> {
        self.record(Published::Deleted(id), "user.deleted")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Confirmed(Uuid),
    DeadlineElapsed(Uuid),
}

/// Takes `delay` to confirm each publish and gives up at the deadline like the
/// broker client does. Every outcome is forwarded once it is settled.
pub struct SlowNotifier {
    delay: Duration,
    tx: mpsc::UnboundedSender<PublishOutcome>,
}

impl SlowNotifier {
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<PublishOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { delay, tx }, rx)
    }

    async fn settle(&self, id: Uuid, deadline: Instant) -> Result<(), NotifyError> {
        let res = tokio::time::timeout_at(deadline, tokio::time::sleep(self.delay)).await;
        let outcome = match res {
            Ok(()) => PublishOutcome::Confirmed(id),
            Err(_) => PublishOutcome::DeadlineElapsed(id),
        };
        let _ = self.tx.send(outcome);
        match outcome {
            PublishOutcome::Confirmed(_) => Ok(()),
            PublishOutcome::DeadlineElapsed(_) => Err(NotifyError::DeadlineElapsed),
        }
    }
}

#[async_trait]
impl UserNotifier for SlowNotifier {
    async fn user_created(&self, user: &User, deadline: Instant) -> Result<(), NotifyError> {
        self.settle(user.id, deadline).await
    }
    async fn user_updated(&self, user: &User, deadline: Instant) -> Result<(), NotifyError> {
        self.settle(user.id, deadline).await
    }
    async fn user_deleted(&self, id: Uuid, deadline: Instant) -> Result<(), NotifyError> {
        self.settle(id, deadline).await
    }
}
