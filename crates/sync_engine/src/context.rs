use std::{
    fs,
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use shared::{
    domain::{GatewayConfig, OperatorId, TenantId},
    error::SyncError,
};
use storage::Storage;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub tenant: TenantId,
    pub operator: Option<OperatorId>,
    /// `None` leaves every gateway-dependent operation a logged no-op.
    pub gateway: Option<GatewayConfig>,
}

impl SessionContext {
    pub fn new(tenant: TenantId, gateway: Option<GatewayConfig>) -> Arc<Self> {
        Arc::new(Self {
            tenant,
            operator: None,
            gateway,
        })
    }

    pub async fn resolve(settings: &EngineSettings, storage: &Storage) -> Result<Arc<Self>> {
        let operator = settings.operator_id.as_deref().map(OperatorId::from);
        let tenant = match (&settings.tenant_id, &operator) {
            (Some(tenant), _) => TenantId::from(tenant.as_str()),
            (None, Some(operator)) => storage
                .resolve_tenant_for_operator(operator)
                .await?
                .ok_or_else(|| {
                    SyncError::configuration_missing(format!(
                        "operator {operator} is not linked to a tenant"
                    ))
                })?,
            (None, None) => {
                return Err(SyncError::configuration_missing(
                    "neither tenant_id nor operator_id is configured",
                )
                .into())
            }
        };

        let gateway = resolve_gateway(&settings.gateway_cache_path, &tenant, storage).await?;
        info!(
            tenant = %tenant,
            gateway = gateway.as_ref().map(|g| g.instance_name.as_str()),
            "engine: session context resolved"
        );
        Ok(Arc::new(Self {
            tenant,
            operator,
            gateway,
        }))
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.gateway.as_ref().map(|g| g.instance_name.as_str())
    }
}

async fn resolve_gateway(
    cache_path: &Path,
    tenant: &TenantId,
    storage: &Storage,
) -> Result<Option<GatewayConfig>> {
    if let Some(cached) = read_cached_gateway(cache_path) {
        debug!(path = %cache_path.display(), "config: gateway config from local cache");
        return Ok(Some(cached));
    }

    let Some(durable) = storage.gateway_config(tenant).await? else {
        warn!(tenant = %tenant, "config: no gateway configured, gateway operations disabled");
        return Ok(None);
    };
    if !durable.is_complete() {
        warn!(tenant = %tenant, "config: stored gateway config is incomplete, ignoring");
        return Ok(None);
    }
    if let Err(err) = write_cached_gateway(cache_path, &durable) {
        warn!(error = %err, "config: failed to refresh gateway cache");
    }
    Ok(Some(durable))
}

fn read_cached_gateway(path: &Path) -> Option<GatewayConfig> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<GatewayConfig>(&raw) {
        Ok(config) if config.is_complete() => Some(config),
        Ok(_) => None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "config: unreadable gateway cache");
            None
        }
    }
}

fn write_cached_gateway(path: &Path, config: &GatewayConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(config)?;
    fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
