//! Runtime services and shared state for the backend.

use chrono::Utc;
use tracing::{info, instrument};

use crate::{
    auth::{credentials, roles},
    base::{
        config::Config,
        types::{Res, Void},
    },
    collector,
    service::{db::DbClient, llm::LlmClient, traffic::TrafficClient},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the configuration and the database, traffic API, and LLM
/// clients. It is designed to be trivially cloneable, allowing it to be passed
/// around (and into axum as state) without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The database client instance.
    pub db: DbClient,
    /// The traffic API client instance.
    pub traffic: TrafficClient,
    /// The LLM client instance.
    pub llm: LlmClient,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the database.
        let db = DbClient::surreal(&config).await?;

        // Initialize the traffic API client.
        let traffic = TrafficClient::tomtom(&config);

        // Initialize the LLM client.
        let llm = LlmClient::from_config(&config);

        Ok(Self { config, db, traffic, llm })
    }

    /// Start the HTTP server and, when enabled, the background collectors.
    ///
    /// Runs until ctrl-c.
    pub async fn start(&self) -> Void {
        if self.config.collectors_enabled {
            collector::spawn_collectors(self);
        }

        let app = crate::api::router(self.clone());

        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr).await?;
        info!("Listening on {}.", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received.");
            })
            .await?;

        Ok(())
    }

    /// Ensure demo accounts exist; roles themselves are static.
    ///
    /// With `with_demo_users`, creates the demo admin account if missing.
    #[instrument(skip_all)]
    pub async fn seed(&self, with_demo_users: bool) -> Void {
        info!("Assignable roles: {:?}", roles::role_names());

        if !with_demo_users {
            return Ok(());
        }

        if self.db.get_user("admin").await?.is_some() {
            info!("User exists: admin");
            return Ok(());
        }

        self.db
            .create_user(&crate::service::db::UserRecord {
                id: None,
                username: "admin".to_string(),
                email: "admin@example.com".to_string(),
                password_hash: credentials::hash_password("admin123"),
                first_name: String::new(),
                last_name: String::new(),
                is_active: true,
                roles: vec![roles::ADMIN_ROLE.to_string()],
                date_joined: Utc::now(),
                last_login: None,
            })
            .await?;

        info!("Created user: admin");

        Ok(())
    }
}
