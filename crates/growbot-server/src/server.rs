use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, patch, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use growbot_core::collaborators::{BlobStorage, Persistence, SessionAuthority};

use crate::config::ServerConfig;
use crate::delivery::EventDelivery;
use crate::dispatch::CommandDispatcher;
use crate::fanout::NotificationFanout;
use crate::inbound::InboundHandler;
use crate::link::LinkRegistry;
use crate::relay::MediaRelay;
use crate::shutdown::ShutdownCoordinator;
use crate::{api, health, robot_link, user_session, video};

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub links: Arc<LinkRegistry>,
    pub relays: Arc<MediaRelay>,
    pub fanout: Arc<NotificationFanout>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub delivery: Arc<EventDelivery>,
    pub inbound: Arc<InboundHandler>,
    pub persistence: Arc<dyn Persistence>,
    pub sessions: Arc<dyn SessionAuthority>,
    pub config: Arc<ServerConfig>,
    pub shutdown: ShutdownCoordinator,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

pub struct GrowbotServer {
    state: AppState,
}

impl GrowbotServer {
    pub fn new(
        config: ServerConfig,
        persistence: Arc<dyn Persistence>,
        blobs: Arc<dyn BlobStorage>,
        sessions: Arc<dyn SessionAuthority>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let links = Arc::new(LinkRegistry::new());
        let fanout = Arc::new(NotificationFanout::new());
        let relays = Arc::new(MediaRelay::new(config.relay.clone(), shutdown.token()));

        let state = AppState {
            dispatcher: Arc::new(CommandDispatcher::new(links.clone(), persistence.clone())),
            delivery: Arc::new(EventDelivery::new(links.clone(), persistence.clone())),
            inbound: Arc::new(InboundHandler::new(
                persistence.clone(),
                blobs,
                fanout.clone(),
            )),
            links,
            relays,
            fanout,
            persistence,
            sessions,
            config: Arc::new(config),
            shutdown,
            metrics,
            started_at: Instant::now(),
        };
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.state.shutdown
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/stream", get(user_session::ws_handler))
            .route("/stream/{robot_id}", get(robot_link::ws_handler))
            .route("/stream-video/{robot_id}", get(video::producer_handler))
            .route("/robot/{robot_id}/video", get(video::viewer_handler))
            .route("/robot/{robot_id}/move", post(api::move_robot))
            .route("/robot/{robot_id}/startDemo", post(api::start_demo))
            .route("/robot/{robot_id}/settings", patch(api::patch_settings))
            .route("/robot/{robot_id}/status", get(api::robot_status))
            .route("/events", post(api::create_event))
            .route("/health", get(health::health_handler))
            .route("/metrics", get(health::metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in the background until the shutdown token fires.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.state.config.bind_address()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(%addr, "growbot server listening");
        Ok((addr, handle))
    }
}
