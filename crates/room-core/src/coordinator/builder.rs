//! Builder for SessionCoordinator

use std::sync::Arc;

use crate::config::{ConfigError, CoordinatorConfig};
use crate::credentials::{CredentialProvider, HttpCredentialProvider};
use crate::errors::Result;
use crate::render::{NullRenderer, Renderer};
use crate::transport::MediaTransport;

use super::SessionCoordinator;

/// Builder for [`SessionCoordinator`]
///
/// A transport is required. Without explicit credentials the configured
/// `token_endpoint` is used through [`HttpCredentialProvider`]; without a
/// renderer nothing is drawn.
pub struct SessionCoordinatorBuilder {
    config: CoordinatorConfig,
    transport: Option<Arc<dyn MediaTransport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl SessionCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            transport: None,
            credentials: None,
            renderer: None,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_room(mut self, room_name: impl Into<String>) -> Self {
        self.config.room_name = room_name.into();
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MediaTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn build(self) -> Result<Arc<SessionCoordinator>> {
        self.config.validate()?;

        let transport = self
            .transport
            .ok_or_else(|| ConfigError::invalid("transport", "a media transport is required"))?;

        let endpoint = self.config.token_endpoint.clone();
        let credentials: Arc<dyn CredentialProvider> = match (self.credentials, endpoint) {
            (Some(credentials), _) => credentials,
            (None, Some(endpoint)) => Arc::new(HttpCredentialProvider::new(endpoint)?),
            (None, None) => {
                return Err(ConfigError::invalid(
                    "token_endpoint",
                    "set a token endpoint or supply a credential provider",
                )
                .into())
            }
        };

        let renderer: Arc<dyn Renderer> = self.renderer.unwrap_or_else(|| Arc::new(NullRenderer));

        Ok(SessionCoordinator::new(
            self.config,
            transport,
            credentials,
            renderer,
        ))
    }
}

impl Default for SessionCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialProvider;
    use crate::errors::SessionError;
    use crate::transport::MemoryRoom;
    use crate::types::SessionState;

    #[test]
    fn test_transport_required() {
        let err = SessionCoordinatorBuilder::new()
            .with_credentials(Arc::new(StaticCredentialProvider::new("t")))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Config(ConfigError::Invalid { field: "transport", .. })
        ));
    }

    #[test]
    fn test_credentials_required() {
        let err = SessionCoordinatorBuilder::new()
            .with_transport(Arc::new(MemoryRoom::new("huddle")))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Config(ConfigError::Invalid { field: "token_endpoint", .. })
        ));
    }

    #[test]
    fn test_token_endpoint_fallback() {
        let mut config = CoordinatorConfig::new("lobby");
        config.token_endpoint = Some("http://127.0.0.1:9/token".to_string());

        let coordinator = SessionCoordinatorBuilder::new()
            .with_config(config)
            .with_transport(Arc::new(MemoryRoom::new("lobby")))
            .build()
            .unwrap();
        assert_eq!(coordinator.state(), SessionState::Idle);
        assert_eq!(coordinator.config().room_name, "lobby");
    }
}
