//! Command execution against the booking service

use anyhow::{Context, Result, bail};
use booking_auth::{FileStore, KeyValueStore, LoginRequest, RegisterRequest};
use booking_session::{ApiRequest, SessionContext};
use common::Secret;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cli::Command;
use crate::config::Config;

const CLASSROOM_LIST_PATH: &str = "/class-room-list";
const GLOBAL_CLASS_LIST_PATH: &str = "/global-class-list";
const MY_BOOKINGS_PATH: &str = "/my-bookings";
const MY_CLASS_LIST_PATH: &str = "/my-class-list";
const CREATE_BOOKING_PATH: &str = "/create-booking";

/// Loaded configuration plus the session built from it.
pub struct App {
    config: Config,
    http: reqwest::Client,
    context: SessionContext,
}

impl App {
    /// Build the app with the file-backed session store from the config.
    pub async fn open(config: Config) -> Result<Self> {
        let path = config.storage.session_path()?;
        info!(path = %path.display(), "opening session store");
        let store = FileStore::open(path.clone())
            .await
            .with_context(|| format!("failed to open session store {}", path.display()))?;
        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(config: Config, medium: Arc<dyn KeyValueStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        let context = SessionContext::new(http.clone(), config.api.base_url.clone(), medium);
        Ok(Self {
            config,
            http,
            context,
        })
    }

    /// Run one command and return the document to print.
    pub async fn run(&self, command: Command) -> Result<serde_json::Value> {
        match command {
            Command::Login { username } => self.login(username).await,
            Command::Logout => {
                self.context.logout().await?;
                Ok(serde_json::to_value(self.context.session())?)
            }
            Command::Status => {
                self.context.bootstrap().await?;
                Ok(serde_json::to_value(self.context.session())?)
            }
            Command::Classrooms(filters) => {
                let mut request = ApiRequest::get(CLASSROOM_LIST_PATH);
                for (key, value) in filters.query() {
                    request = request.query(key, value);
                }
                self.authenticated(request).await
            }
            Command::GlobalClasses => {
                self.authenticated(ApiRequest::get(GLOBAL_CLASS_LIST_PATH))
                    .await
            }
            Command::MyBookings => self.authenticated(ApiRequest::get(MY_BOOKINGS_PATH)).await,
            Command::MyClasses => self.authenticated(ApiRequest::get(MY_CLASS_LIST_PATH)).await,
            Command::Book { file } => {
                let raw = tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let body: serde_json::Value = serde_json::from_str(&raw)
                    .with_context(|| format!("{} is not valid JSON", file.display()))?;
                self.authenticated(ApiRequest::post(CREATE_BOOKING_PATH, body))
                    .await
            }
            Command::Register {
                username,
                email,
                role,
            } => {
                let request = RegisterRequest {
                    username,
                    email,
                    password: self.password()?,
                    role: Some(role),
                };
                let created =
                    booking_auth::register(&self.http, &self.config.api.base_url, &request).await?;
                Ok(created)
            }
            Command::Get { path } => self.authenticated(ApiRequest::get(path)).await,
        }
    }

    async fn login(&self, username: Option<String>) -> Result<serde_json::Value> {
        let Some(username) = username.or_else(|| self.config.account.username.clone()) else {
            bail!("no username given and account.username is not configured");
        };
        let request = LoginRequest {
            username,
            password: self.password()?,
            remember_me: true,
        };

        let response =
            booking_auth::login(&self.http, &self.config.api.base_url, &request).await?;
        let user = response.profile(&request.username);
        self.context.login(response.credential, user).await?;
        Ok(serde_json::to_value(self.context.session())?)
    }

    /// Validate the stored session, then send `request` through the pipeline.
    async fn authenticated(&self, request: ApiRequest) -> Result<serde_json::Value> {
        self.context.bootstrap().await?;
        let session = self.context.session();
        if !session.logged_in {
            match session.error {
                Some(kind) => bail!("session ended ({}); run `booking-dashboard login`", kind.label()),
                None => bail!("not logged in; run `booking-dashboard login`"),
            }
        }

        let response = self.context.client().execute(request).await?;
        if response.body().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(response.json()?)
    }

    fn password(&self) -> Result<Secret<String>> {
        match &self.config.account.password {
            Some(password) => Ok(password.clone()),
            None => bail!("no password: set BOOKING_PASSWORD or account.password_file"),
        }
    }
}
