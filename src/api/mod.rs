//! HTTP gateway for the speech and chat providers
//!
//! Exposes the transcribe, chat and speech stages to clients that should not
//! hold provider credentials. `parley talk` in gateway mode talks to this.

pub mod ai;
pub mod chat;
mod error;
pub mod health;
pub mod voice;

pub use error::{ApiError, ErrorBody};

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::providers::{ConversationClient, SpeechSynthesizer, TranscriptionClient};

/// Largest accepted upload (the Whisper API limit)
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared state for API handlers
#[derive(Clone)]
pub struct GatewayState {
    pub transcriber: Arc<dyn TranscriptionClient>,
    pub conversation: Arc<dyn ConversationClient>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

/// Builder for [`ApiServer`]
pub struct ApiServerBuilder {
    state: GatewayState,
    port: u16,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn TranscriptionClient>,
        conversation: Arc<dyn ConversationClient>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            state: GatewayState {
                transcriber,
                conversation,
                synthesizer,
            },
            port: crate::config::DEFAULT_PORT,
        }
    }

    /// Set the listening port
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(self.state),
            port: self.port,
        }
    }
}

/// The gateway HTTP server
pub struct ApiServer {
    state: Arc<GatewayState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .merge(voice::router(Arc::clone(&self.state)))
            .merge(chat::router(Arc::clone(&self.state)))
            .merge(ai::router(Arc::clone(&self.state)))
            .merge(health::router())
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server on `0.0.0.0:<port>`
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server fails
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "API server listening");
        }

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
