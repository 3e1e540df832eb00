//! Per-tenant limits
//!
//! Limits are looked up on every call so that runtime overrides apply to
//! the next request without restarting anything.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Limits for one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Active streams one tenant may hold in this ingester; 0 = unlimited
    #[serde(default = "default_max_streams")]
    pub max_local_streams_per_user: usize,
}

fn default_max_streams() -> usize {
    10_000
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_local_streams_per_user: default_max_streams(),
        }
    }
}

/// Default limits plus per-tenant overrides
#[derive(Debug, Default)]
pub struct Overrides {
    defaults: Limits,
    tenants: RwLock<HashMap<String, Limits>>,
}

impl Overrides {
    pub fn new(defaults: Limits, tenants: HashMap<String, Limits>) -> Self {
        Self {
            defaults,
            tenants: RwLock::new(tenants),
        }
    }

    /// Effective limits for a tenant
    pub fn limits(&self, tenant: &str) -> Limits {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn max_local_streams_per_user(&self, tenant: &str) -> usize {
        self.limits(tenant).max_local_streams_per_user
    }

    /// Install or replace a tenant override
    pub fn set_tenant_limits(&self, tenant: impl Into<String>, limits: Limits) {
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant.into(), limits);
    }

    /// Remove a tenant override, falling back to defaults
    pub fn clear_tenant_limits(&self, tenant: &str) {
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant);
    }
}
