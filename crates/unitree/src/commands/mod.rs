//! Command dispatch: bridges CLI args -> engine/store -> output formatting.

pub mod config_cmd;
pub mod recover;
pub mod run;
pub mod sessions;
pub mod status;
pub mod sync;
pub mod util;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use unitree_api::{ApiClient, TlsMode, TransportConfig};
use unitree_config::Config;
use unitree_core::{Clock, Engine, EngineConfig, JsonFileStore, MergedLedger, SharedSignals};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Loaded configuration with CLI overrides applied.
pub struct Context {
    pub config_path: PathBuf,
    pub config: Config,
}

impl Context {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config_path = util::config_path(global);
        let mut config = unitree_config::load_config_from(&config_path)?;

        if let Some(ref user) = global.user {
            config.device.user_id = Some(user.clone());
        }
        if let Some(ref device) = global.device {
            config.device.device_id = Some(device.clone());
        }
        if let Some(ref state_file) = global.state_file {
            config.storage.state_file = Some(state_file.clone());
        }

        Ok(Self {
            config_path,
            config,
        })
    }

    pub fn engine_config(&self) -> Result<EngineConfig, CliError> {
        Ok(self.config.to_engine_config()?)
    }

    pub fn state_file(&self) -> PathBuf {
        self.config.state_file()
    }

    /// Open the local session store.
    pub async fn open_store(&self) -> Result<Arc<JsonFileStore>, CliError> {
        let path = self.state_file();
        JsonFileStore::open(&path)
            .await
            .map(Arc::new)
            .map_err(|e| util::storage_error(&path, e))
    }

    /// Backend client, or `None` when no base URL is configured.
    pub fn api_client(&self) -> Result<Option<ApiClient>, CliError> {
        let Some(base_url) = self.config.api_base_url()? else {
            return Ok(None);
        };
        let token = unitree_config::resolve_api_token(&self.config)?;
        let transport = TransportConfig {
            tls: self
                .config
                .api
                .ca_cert
                .clone()
                .map_or(TlsMode::System, TlsMode::CustomCa),
            timeout: self.config.api_timeout(),
        };
        Ok(Some(ApiClient::from_token(
            base_url.as_str(),
            &token,
            &transport,
        )?))
    }

    pub fn require_api_client(&self) -> Result<ApiClient, CliError> {
        self.api_client()?.ok_or(CliError::NoBackend)
    }

    /// Build an engine over the local store, fed by `signals`.
    ///
    /// With `online` and a configured backend, the engine also syncs and
    /// reads the daily balance as the larger of local and backend totals.
    /// A backend that cannot be set up is logged and skipped.
    pub fn engine(
        &self,
        store: &Arc<JsonFileStore>,
        signals: &SharedSignals,
        clock: Arc<dyn Clock>,
        online: bool,
    ) -> Result<Engine, CliError> {
        let builder = Engine::builder(self.engine_config()?)
            .network(Arc::new(signals.clone()))
            .location(Arc::new(signals.clone()))
            .permission(Arc::new(signals.clone()))
            .store(store.clone())
            .clock(clock);

        let client = if online {
            self.api_client().unwrap_or_else(|e| {
                warn!(error = %e, "backend unavailable, running offline");
                None
            })
        } else {
            None
        };

        let builder = match client {
            Some(client) => {
                let client = Arc::new(client);
                builder
                    .remote(client.clone())
                    .ledger(Arc::new(MergedLedger::new(store.clone(), client)))
            }
            None => builder.ledger(store.clone()),
        };
        Ok(builder.build()?)
    }
}

/// Dispatch a config-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Validate(args) => validate::handle(ctx, &args, global),
        Command::Run(args) => run::handle(ctx, args, global).await,
        Command::Recover => recover::handle(ctx, global).await,
        Command::Status => status::handle(ctx, global).await,
        Command::Sessions(args) => sessions::handle(ctx, &args, global).await,
        Command::Sync => sync::handle(ctx, global).await,
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions are handled before dispatch".into(),
        )),
    }
}
