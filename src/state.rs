use crate::config::AppConfig;
use crate::notifier::RabbitNotifier;
use crate::users::{
    password::CredentialHasher,
    repo::PgUserRepository,
    services::UserService,
};
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: UserService,
}

impl AppState {
    /// Loads config and connects to the store and the broker. Any failure here
    /// aborts startup.
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url())
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let notifier = RabbitNotifier::connect(&config.broker.url()).await?;
        let hasher = CredentialHasher::new(config.hash)?;

        let users = UserService::new(
            Arc::new(PgUserRepository::new(db)),
            Arc::new(notifier),
            hasher,
            config.publish_timeout,
        );

        Ok(Self { config, users })
    }

    #[cfg(test)]
    pub fn from_parts(
        config: Arc<AppConfig>,
        repo: Arc<dyn crate::users::repo::UserRepository>,
        notifier: Arc<dyn crate::notifier::UserNotifier>,
        hasher: CredentialHasher,
    ) -> Self {
        let users = UserService::new(repo, notifier, hasher, config.publish_timeout);
        Self { config, users }
    }
}
