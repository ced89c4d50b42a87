use crate::config::{AppConfig, JwtConfig, SmtpConfig};
use crate::mail::{Mailer, NoopMailer, SmtpMailer};
use crate::store::{memory::MemStore, postgres::PgStore, DocumentStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        let store = Arc::new(PgStore::new(pool)) as Arc<dyn DocumentStore>;
        let mailer = Arc::new(SmtpMailer::new(config.smtp.clone())?) as Arc<dyn Mailer>;

        Ok(Self {
            store,
            mailer,
            config,
        })
    }

    pub fn from_parts(
        store: Arc<dyn DocumentStore>,
        mailer: Arc<dyn Mailer>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    /// Fully in-memory state for tests: no database, no SMTP.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: "postgres://localhost/unused".into(),
            base_url: "http://localhost:8080".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            smtp: SmtpConfig {
                host: "localhost".into(),
                port: 587,
                username: String::new(),
                password: String::new(),
                from_name: "Trailhead".into(),
                from_email: "noreply@trailhead.local".into(),
            },
        });
        Self {
            store: Arc::new(MemStore::new()),
            mailer: Arc::new(NoopMailer),
            config,
        }
    }
}
