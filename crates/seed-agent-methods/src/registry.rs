//! Runtime registry of enabled seed methods.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use seed_agent_core::{MethodKind, SeedMethodDescriptor};

use crate::config::MethodsConfig;
use crate::context::MethodBase;
use crate::method::SeedMethod;
use crate::methods::{ClonePlugin, Lvm, Mydumper, Mysqldump, Xtrabackup};

/// Enabled methods, keyed by kind, with their last probed descriptors.
pub struct SeedMethodRegistry {
    base: MethodBase,
    methods: BTreeMap<MethodKind, Arc<dyn SeedMethod>>,
    descriptors: RwLock<BTreeMap<MethodKind, SeedMethodDescriptor>>,
}

impl SeedMethodRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new(base: MethodBase) -> Self {
        Self {
            base,
            methods: BTreeMap::new(),
            descriptors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register every method enabled in `config`.
    #[must_use]
    pub fn from_config(base: MethodBase, config: &MethodsConfig) -> Self {
        let mut registry = Self::new(base.clone());
        if config.mysqldump.enabled {
            registry.register(Arc::new(Mysqldump::new(base.clone(), config.mysqldump.clone())));
        }
        if config.mydumper.enabled {
            registry.register(Arc::new(Mydumper::new(base.clone(), config.mydumper.clone())));
        }
        if config.xtrabackup.enabled {
            registry.register(Arc::new(Xtrabackup::new(
                base.clone(),
                config.xtrabackup.clone(),
            )));
        }
        if config.lvm.enabled {
            registry.register(Arc::new(Lvm::new(base.clone(), config.lvm.clone())));
        }
        if config.clone_plugin.enabled {
            registry.register(Arc::new(ClonePlugin::new(base)));
        }
        registry
    }

    /// Add or replace a method. It is unavailable until the next refresh.
    pub fn register(&mut self, method: Arc<dyn SeedMethod>) {
        let kind = method.kind();
        self.descriptors.write().insert(kind, method.describe(false));
        self.methods.insert(kind, method);
    }

    /// Shared runner, database and settings.
    #[must_use]
    pub const fn base(&self) -> &MethodBase {
        &self.base
    }

    /// Look a method up by kind.
    #[must_use]
    pub fn get(&self, kind: MethodKind) -> Option<Arc<dyn SeedMethod>> {
        self.methods.get(&kind).cloned()
    }

    /// Look a method up by name, case-insensitively (`mysqldump`,
    /// `ClonePlugin`, `clone_plugin`, ...).
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn SeedMethod>> {
        name.parse::<MethodKind>().ok().and_then(|kind| self.get(kind))
    }

    /// Whether the last probe found the method usable.
    #[must_use]
    pub fn is_available(&self, kind: MethodKind) -> bool {
        self.descriptors
            .read()
            .get(&kind)
            .is_some_and(|d| d.is_available)
    }

    /// Cached descriptors of every registered method.
    #[must_use]
    pub fn descriptors(&self) -> Vec<SeedMethodDescriptor> {
        self.descriptors.read().values().cloned().collect()
    }

    /// Probe every method concurrently and cache the resulting descriptors.
    pub async fn refresh_availability(&self) -> Vec<SeedMethodDescriptor> {
        let probes = self.methods.values().map(|method| async move {
            let available = method.is_available().await;
            method.describe(available)
        });
        let fresh = join_all(probes).await;

        for descriptor in &fresh {
            tracing::info!(
                method = %descriptor.name,
                available = descriptor.is_available,
                "Seed method probed"
            );
        }

        let mut descriptors = self.descriptors.write();
        for descriptor in &fresh {
            descriptors.insert(descriptor.name, descriptor.clone());
        }
        fresh
    }
}

impl std::fmt::Debug for SeedMethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedMethodRegistry")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseConfig;
    use crate::mock::MockDatabase;
    use seed_agent_exec::{CommandRunner, RecordingRunner};

    fn base(runner: &Arc<RecordingRunner>, db: &Arc<MockDatabase>) -> MethodBase {
        MethodBase::new(
            Arc::clone(runner) as Arc<dyn CommandRunner>,
            Arc::clone(db) as Arc<dyn crate::Database>,
            BaseConfig::default(),
        )
    }

    #[test]
    fn only_enabled_methods_are_registered() {
        let runner = Arc::new(RecordingRunner::new());
        let db = Arc::new(MockDatabase::new());
        let registry = SeedMethodRegistry::from_config(base(&runner, &db), &MethodsConfig::default());

        assert!(registry.get(MethodKind::Mysqldump).is_some());
        assert!(registry.get(MethodKind::Xtrabackup).is_none());
        assert_eq!(registry.descriptors().len(), 1);
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let runner = Arc::new(RecordingRunner::new());
        let db = Arc::new(MockDatabase::new());
        let mut config = MethodsConfig::default();
        config.clone_plugin.enabled = true;
        let registry = SeedMethodRegistry::from_config(base(&runner, &db), &config);

        for name in ["mysqldump", "Mysqldump", "MYSQLDUMP"] {
            assert_eq!(registry.resolve(name).unwrap().kind(), MethodKind::Mysqldump);
        }
        for name in ["ClonePlugin", "clone_plugin"] {
            assert_eq!(registry.resolve(name).unwrap().kind(), MethodKind::ClonePlugin);
        }
        assert!(registry.resolve("mydumper").is_none());
        assert!(registry.resolve("rsync").is_none());
    }

    #[tokio::test]
    async fn refresh_probes_every_method() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail("xtrabackup --version", "not found");
        let db = Arc::new(MockDatabase::new());
        let mut config = MethodsConfig::default();
        config.xtrabackup.enabled = true;
        let registry = SeedMethodRegistry::from_config(base(&runner, &db), &config);

        assert!(!registry.is_available(MethodKind::Mysqldump));
        let fresh = registry.refresh_availability().await;

        assert_eq!(fresh.len(), 2);
        assert!(registry.is_available(MethodKind::Mysqldump));
        assert!(!registry.is_available(MethodKind::Xtrabackup));
        assert!(runner.saw("mysqldump --version"));
    }
}
