//! HTTP server for declared endpoints

use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use tracing::info;

use dynrest_common::config::ServerConfig;
use dynrest_common::error::Result;

use crate::handlers::{self, AppState};

/// Register the health route and the catch-all endpoint dispatcher
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_handler))
        .default_service(web::to(handlers::endpoint_handler));
}

/// Serves the endpoint table over HTTP
pub struct RestServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl RestServer {
    pub fn new(config: &ServerConfig, state: Arc<AppState>) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Run the server until it is stopped
    pub async fn run(&self) -> Result<()> {
        let state = self.state.clone();
        let host = self.config.host.clone();
        let port = self.config.port;
        let body_limit = self.config.max_body_bytes;

        info!("Starting endpoint server on {}:{}", host, port);
        info!("  API root: {}", state.settings.api_root);
        info!("  Engine: {:?}", state.executor.dialect().engine());

        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(state.clone()))
                .app_data(web::PayloadConfig::new(body_limit))
                .wrap(middleware::Compress::default())
                .wrap(middleware::Logger::default())
                .configure(configure)
        })
        .workers(self.config.workers.max(1))
        .bind(format!("{host}:{port}"))?
        .run()
        .await?;

        Ok(())
    }
}
