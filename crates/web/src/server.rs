//! HTTP server: shared state, router and listener

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use craftcloud_common::{Database, PanelApi, PanelClient, Provisioner};

use crate::auth::{require_session, SessionStore};
use crate::config::WebServerConfig;
use crate::routes::{auth, health, servers};

/// Everything a handler can reach
pub struct AppState {
    pub cfg: WebServerConfig,
    pub db: Database,
    pub panel: Arc<dyn PanelApi>,
    pub provisioner: Arc<Provisioner>,
    pub sessions: SessionStore,
}

/// Web server state
#[derive(Clone)]
pub struct WebServer {
    state: Arc<AppState>,
}

pub async fn serve(cfg: WebServerConfig) -> anyhow::Result<()> {
    let addr = cfg.listen_addr;
    let server = WebServer::new(cfg)?;
    server.serve(addr).await
}

impl WebServer {
    /// Open the database and build the panel client from `cfg`.
    pub fn new(cfg: WebServerConfig) -> anyhow::Result<Self> {
        let db = Database::open(&cfg.db_path)?;
        let panel = PanelClient::new(cfg.panel.clone())?;

        if cfg.panel.admin_key.is_none() || cfg.panel.client_key.is_none() {
            warn!("Panel API keys are not fully configured; see /api/health");
        }

        Ok(Self::with_parts(cfg, db, Arc::new(panel)))
    }

    /// Assemble from pre-built parts.
    pub fn with_parts(cfg: WebServerConfig, db: Database, panel: Arc<dyn PanelApi>) -> Self {
        let provisioner = Arc::new(Provisioner::new(
            db.clone(),
            panel.clone(),
            cfg.provision.clone(),
        ));
        let sessions = SessionStore::new(db.clone());

        Self {
            state: Arc::new(AppState {
                cfg,
                db,
                panel,
                provisioner,
                sessions,
            }),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Create router
    pub fn router(&self) -> Router {
        // Protected routes (require a session and server ownership)
        let protected_routes = Router::new()
            .route("/api/servers/:id", get(servers::get_server))
            .route("/api/servers/:id/power", post(servers::send_power))
            .route("/api/servers/:id/command", post(servers::send_command))
            .route("/api/servers/:id/eula", post(servers::accept_eula))
            .route("/api/servers/:id/logs", get(servers::get_logs))
            .route("/api/servers/:id/websocket", get(servers::get_websocket))
            .route("/api/servers/:id/ws-proxy", get(servers::get_ws_proxy))
            .route_layer(middleware::from_fn_with_state(
                self.state.clone(),
                require_session,
            ));

        Router::new()
            .route("/api/health", get(health::health))
            .route("/api/auth/register", post(auth::register))
            .route("/api/auth/login", post(auth::login))
            .route("/api/auth/logout", post(auth::logout))
            .route("/api/auth/session", get(auth::session))
            .merge(protected_routes)
            .fallback(not_found_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("CraftCloud API listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

async fn not_found_handler() -> crate::error::ApiError {
    crate::error::ApiError::not_found("Not found")
}
