use crate::capture::{MediaCapture, Resolution};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::host::BroadcastCoordinator;
use crate::peer::transport::TransportFactory;
use crate::signaling::SignalingChannel;
use crate::status::StatusEmitter;
use crate::viewer::{MediaSink, ViewerSessionManager};
use std::sync::Arc;
use tracing::info;

/// What the client is doing right now. Only one orchestrator is live.
#[derive(Clone, Default)]
pub enum AppMode {
    #[default]
    Home,
    Hosting(BroadcastCoordinator),
    Viewing(ViewerSessionManager),
}

impl AppMode {
    pub fn name(&self) -> &'static str {
        match self {
            AppMode::Home => "home",
            AppMode::Hosting(_) => "hosting",
            AppMode::Viewing(_) => "viewing",
        }
    }
}

pub struct App {
    config: Arc<SessionConfig>,
    signaling: Arc<dyn SignalingChannel>,
    factory: Arc<dyn TransportFactory>,
    capture: Arc<dyn MediaCapture>,
    sink: Arc<dyn MediaSink>,
    status: StatusEmitter,
    mode: AppMode,
}

impl App {
    pub fn new(
        config: SessionConfig,
        signaling: Arc<dyn SignalingChannel>,
        factory: Arc<dyn TransportFactory>,
        capture: Arc<dyn MediaCapture>,
        sink: Arc<dyn MediaSink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            signaling,
            factory,
            capture,
            sink,
            status: StatusEmitter::new(),
            mode: AppMode::Home,
        }
    }

    pub fn status(&self) -> &StatusEmitter {
        &self.status
    }

    pub fn mode(&self) -> &AppMode {
        &self.mode
    }

    /// Tears down the current mode, then starts sharing. Stays home on error.
    pub async fn host(
        &mut self,
        room_id: &str,
        password: Option<String>,
        resolution: Resolution,
    ) -> Result<BroadcastCoordinator> {
        self.go_home().await;
        let host = BroadcastCoordinator::new(
            self.config.clone(),
            self.signaling.clone(),
            self.factory.clone(),
            self.capture.clone(),
            self.status.clone(),
        );
        host.start_sharing(room_id, password, resolution).await?;
        self.mode = AppMode::Hosting(host.clone());
        info!("mode: {}", self.mode.name());
        Ok(host)
    }

    pub async fn view(
        &mut self,
        room_id: &str,
        password: Option<String>,
    ) -> Result<ViewerSessionManager> {
        self.go_home().await;
        let viewer = ViewerSessionManager::new(
            self.config.clone(),
            self.signaling.clone(),
            self.factory.clone(),
            self.sink.clone(),
            self.status.clone(),
        );
        viewer.join_room(room_id, password).await?;
        self.mode = AppMode::Viewing(viewer.clone());
        info!("mode: {}", self.mode.name());
        Ok(viewer)
    }

    pub async fn go_home(&mut self) {
        match std::mem::take(&mut self.mode) {
            AppMode::Home => {}
            AppMode::Hosting(host) => host.stop_sharing().await,
            AppMode::Viewing(viewer) => viewer.leave().await,
        }
    }
}
