use crate::api::{ApiClient, RfpService};
use crate::cli::GlobalArgs;
use crate::config::{self, LoadedConfig};
use crate::session::{self, EntryPoint, SessionIdentity};
use anyhow::Result;
use std::path::PathBuf;

/// Everything a command needs before it talks to the backend.
pub(crate) struct AppContext {
    pub(crate) config: LoadedConfig,
    pub(crate) api_url: String,
    pub(crate) session_path: Option<PathBuf>,
    pub(crate) session: Option<SessionIdentity>,
}

impl AppContext {
    pub(crate) fn load(global: &GlobalArgs) -> Result<Self> {
        let config = config::load_effective(global.config.as_deref())?;
        let api_url = config::resolve_api_url(global.api_url.as_deref(), &config.config)?;
        let session_path = session::resolve_session_path(global.session.as_deref(), &config.config);
        let session = match global.session.as_deref() {
            // An explicit --session must exist.
            Some(path) => Some(session::load_session(path)?),
            None => session::load_session_optional(session_path.as_deref())?,
        };
        tracing::debug!(
            api_url = %api_url,
            config = ?config.source,
            session = ?session_path,
            "context loaded"
        );
        Ok(Self {
            config,
            api_url,
            session_path,
            session,
        })
    }

    /// Check the role gate for `entry`.
    pub(crate) fn authorize(&self, entry: EntryPoint) -> Result<()> {
        session::authorize(self.session.as_ref(), entry)?;
        Ok(())
    }

    /// Service bound to the session's token, if any.
    pub(crate) fn service(&self) -> RfpService {
        let token = self
            .session
            .as_ref()
            .and_then(|identity| identity.auth_token.clone());
        RfpService::new(ApiClient::new(&self.api_url, token))
    }

    /// Service without credentials, for entry points that need no session.
    pub(crate) fn anonymous_service(&self) -> RfpService {
        RfpService::new(ApiClient::new(&self.api_url, None))
    }
}
