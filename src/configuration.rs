use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use tonic::Status;
use tracing::{info, warn};

use crate::tunnelrpc::capability::{ConfigurationManager, UpdateConfigurationResponse};

/// Version reported before any configuration has been applied.
pub const INITIAL_VERSION: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedConfiguration {
    pub version: i32,
    pub config: Bytes,
}

/// Keeps the most recent configuration pushed over RPC.
///
/// Versions must strictly increase. A push of an older or equal version leaves the stored
/// configuration untouched and is answered with the version still in effect and an error.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Option<AppliedConfiguration>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<AppliedConfiguration> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_applied_version(&self) -> i32 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(INITIAL_VERSION, |applied| applied.version)
    }

    /// Apply `config` as `version` if it is newer than the one in effect.
    pub fn apply(&self, version: i32, config: Bytes) -> UpdateConfigurationResponse {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let last_applied_version = current
            .as_ref()
            .map_or(INITIAL_VERSION, |applied| applied.version);

        if version <= last_applied_version {
            warn!(
                version,
                last_applied_version,
                "Ignoring configuration that is not newer than the current one"
            );
            return UpdateConfigurationResponse {
                last_applied_version,
                error: Some(format!(
                    "configuration version {version} is not newer than applied version {last_applied_version}"
                )),
            };
        }

        info!(version, bytes = config.len(), "Configuration applied");
        *current = Some(AppliedConfiguration { version, config });

        UpdateConfigurationResponse {
            last_applied_version: version,
            error: None,
        }
    }
}

#[tonic::async_trait]
impl ConfigurationManager for ConfigStore {
    async fn update_configuration(
        &self,
        version: i32,
        config: Bytes,
    ) -> Result<UpdateConfigurationResponse, Status> {
        Ok(self.apply(version, config))
    }
}
