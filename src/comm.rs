// MIT License - Copyright (c) 2026 Peter Wright
// Connection lifecycle, authentication and discovery requests

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::error::{DoozError, Result};
use crate::event::{EventSender, HubEvent};
use crate::protocol::{
    DeviceDescriptor, GroupDescriptor, Request, SceneDescriptor, authentication_accepted,
    decode_groups, decode_mesh, decode_scenes,
};
use crate::transport::direct::{DirectTransport, request_timeout};
use crate::transport::session::RpcSession;

/// Hub descriptors gathered by one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub devices: Vec<DeviceDescriptor>,
    pub groups: Vec<GroupDescriptor>,
    pub scenes: Vec<SceneDescriptor>,
}

/// High-level communication handler.
///
/// Owns the current transport and knows the request sequence the hub
/// expects: authenticate first, then the discovery calls.
pub struct HubComm {
    config: HubConfig,
    transport: Option<DirectTransport>,
    event_tx: EventSender,
}

impl HubComm {
    pub fn new(config: HubConfig, event_tx: EventSender) -> Self {
        Self {
            config,
            transport: None,
            event_tx,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Open a fresh TCP transport, replacing any previous one.
    pub async fn connect(&mut self) -> Result<()> {
        self.close_transport().await;
        let transport = DirectTransport::connect(&self.config, self.event_tx.clone()).await?;
        self.transport = Some(transport);
        Ok(())
    }

    /// Use an already-open stream as the transport.
    pub async fn attach<S>(&mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.close_transport().await;
        self.transport = Some(DirectTransport::from_stream(
            stream,
            request_timeout(&self.config),
            self.event_tx.clone(),
        ));
    }

    async fn close_transport(&mut self) {
        if let Some(mut old) = self.transport.take() {
            let _ = old.disconnect().await;
        }
    }

    pub fn session(&self) -> Result<&Arc<RpcSession>> {
        self.transport
            .as_ref()
            .map(DirectTransport::session)
            .ok_or(DoozError::Disconnected)
    }

    pub async fn is_connected(&self) -> bool {
        match &self.transport {
            Some(t) => t.is_connected().await,
            None => false,
        }
    }

    /// Send a request through the active transport.
    pub async fn send(&self, request: &Request) -> Result<Value> {
        self.session()?.send(request).await
    }

    /// Present the configured credentials.
    ///
    /// The hub answers with a status value; `false` or a status string
    /// other than "ok" is a rejection.
    pub async fn authenticate(&self) -> Result<()> {
        debug!("Authenticating as {}", self.config.login);
        let result = self
            .send(&Request::Authenticate {
                login: self.config.login.clone(),
                password: self.config.password.clone(),
            })
            .await
            .map_err(|e| match e {
                DoozError::Rpc(err) => DoozError::AuthenticationFailed {
                    reason: err.to_string(),
                },
                other => other,
            })?;

        if !authentication_accepted(&result) {
            return Err(DoozError::AuthenticationFailed {
                reason: format!("hub answered {}", result),
            });
        }
        info!("Authenticated with hub");
        let _ = self.event_tx.send(HubEvent::Authenticated);
        Ok(())
    }

    pub async fn discover_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let result = self.send(&Request::Discover).await?;
        let devices = decode_mesh(&result)?;
        debug!("Discovered {} devices", devices.len());
        Ok(devices)
    }

    pub async fn discover_groups(&self) -> Result<Vec<GroupDescriptor>> {
        let result = self.send(&Request::DiscoverGroups).await?;
        let groups = decode_groups(&result)?;
        debug!("Discovered {} groups", groups.len());
        Ok(groups)
    }

    pub async fn discover_scenes(&self) -> Result<Vec<SceneDescriptor>> {
        let result = self.send(&Request::DiscoverScenes).await?;
        let scenes = decode_scenes(&result)?;
        debug!("Discovered {} scenes", scenes.len());
        Ok(scenes)
    }

    /// Run the discovery calls enabled in the config.
    ///
    /// Device discovery failing is an error. Groups and scenes are optional
    /// hub features: a failure there is logged and yields an empty list,
    /// unless the transport itself went away.
    pub async fn discover(&self) -> Result<Discovery> {
        let devices = self.discover_devices().await?;

        let groups = if self.config.discover_groups {
            match self.discover_groups().await {
                Ok(groups) => groups,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Group discovery failed: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let scenes = if self.config.discover_scenes {
            match self.discover_scenes().await {
                Ok(scenes) => scenes,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Scene discovery failed: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Discovery {
            devices,
            groups,
            scenes,
        })
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(transport) = self.transport.as_mut() {
            transport.disconnect().await?;
        }
        Ok(())
    }
}
