//! Process-scoped configuration (SPEC_FULL.md §6, §6a, §9a).
//!
//! Loaded once at startup via `figment`, the way
//! `examples/golemcloud-golem/cloud-servers-oss/src/config.rs` loads
//! `CloudServiceConfig`: an optional base TOML file merged with
//! `METRICS__<GROUP>__<FIELD>` environment overrides. The resulting
//! `AppConfig` is passed by shared reference into every component at
//! construction (§9 "Global configuration ... is a process-scoped immutable
//! config struct").

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{McsError, McsResult};

#[derive(Clone, Debug, Deserialize)]
pub struct ClusterConfig {
    pub namespace: String,
    pub service_account: String,
    pub name: String,
    pub image_repo: String,
    pub image_tag: String,
    pub scheduler_memory_request: String,
    pub scheduler_memory_limit: String,
    pub worker_memory_request: String,
    pub worker_memory_limit: String,
    pub worker_threads: u32,
    pub worker_pool_type: String,
    pub worker_temp_scratch_path: String,
    pub min_workers: u32,
    pub max_workers: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket_name: String,
    pub access_key_id: String,
    pub secret: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExportBackendConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub catalog: String,
    pub export_catalog: String,
    pub export_schema: String,
}

/// Five independent debug toggles (§6). `all` implies `with_embedded_engine`,
/// `cache`, and `cluster`; `cluster_no_shutdown` is independent (§9a).
#[derive(Clone, Debug, Deserialize, Default)]
pub struct DebugConfig {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub with_embedded_engine: bool,
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub cluster: bool,
    #[serde(default)]
    pub cluster_no_shutdown: bool,
}

impl DebugConfig {
    /// Apply the `all` implication rule. Grounded in
    /// `original_source/.../types.py`'s `AppConfig.handle_debugging()` validator.
    fn normalize(mut self) -> Self {
        if self.all {
            self.with_embedded_engine = true;
            self.cache = true;
            self.cluster = true;
        }
        self
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceConfig {
    pub results_path_prefix: String,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub object_store: ObjectStoreConfig,
    pub export_backend: ExportBackendConfig,
    pub service: ServiceConfig,
}

impl AppConfig {
    /// Load from an optional base TOML file plus `METRICS__`-prefixed
    /// environment variables, double-underscore nested.
    pub fn load(config_path: Option<&str>) -> McsResult<Self> {
        let mut figment = Figment::new();
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("METRICS__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .map_err(|e| McsError::Configuration(e.to_string()))?;
        config.service.debug = config.service.debug.normalize();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> McsResult<()> {
        if self.object_store.bucket_name.trim().is_empty() {
            return Err(McsError::Configuration(
                "object_store.bucket_name must not be empty".to_string(),
            ));
        }
        if self.cluster.min_workers > self.cluster.max_workers {
            return Err(McsError::Configuration(format!(
                "cluster.min_workers ({}) must not exceed cluster.max_workers ({})",
                self.cluster.min_workers, self.cluster.max_workers
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_all_implies_the_first_three_toggles_only() {
        let debug = DebugConfig {
            all: true,
            with_embedded_engine: false,
            cache: false,
            cluster: false,
            cluster_no_shutdown: false,
        }
        .normalize();

        assert!(debug.with_embedded_engine);
        assert!(debug.cache);
        assert!(debug.cluster);
        assert!(!debug.cluster_no_shutdown);
    }
}
