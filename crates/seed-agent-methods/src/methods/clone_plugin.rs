//! Native `CLONE INSTANCE` (MySQL 8.0.17+).

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use seed_agent_core::{BackupMetadata, Engine, MethodKind, Side};
use seed_agent_exec::quote;

use crate::context::{MethodBase, StageContext};
use crate::error::{MethodError, Result};
use crate::method::{BackupRequest, SeedMethod};

const PLUGIN: &str = "clone";

/// The clone plugin seed method.
#[derive(Debug, Clone)]
pub struct ClonePlugin {
    base: MethodBase,
}

impl ClonePlugin {
    /// Create the method.
    #[must_use]
    pub const fn new(base: MethodBase) -> Self {
        Self { base }
    }

    async fn plugin_active(&self) -> Result<bool> {
        let status = self.base.database().plugin_status(PLUGIN).await?;
        Ok(status.is_some_and(|s| s.eq_ignore_ascii_case("ACTIVE")))
    }

    fn clone_statement(&self, host: &str, port: u16) -> String {
        let mysql = &self.base.config().mysql;
        format!(
            "SET GLOBAL clone_valid_donor_list = '{donor}'; \
             CLONE INSTANCE FROM '{user}'@'{host}':{port} IDENTIFIED BY '{password}'",
            donor = sql_literal(&format!("{host}:{port}")),
            user = sql_literal(&mysql.seed_user),
            host = sql_literal(host),
            password = sql_literal(&mysql.seed_password),
        )
    }
}

#[async_trait]
impl SeedMethod for ClonePlugin {
    fn kind(&self) -> MethodKind {
        MethodKind::ClonePlugin
    }

    fn supported_engines(&self) -> BTreeSet<Engine> {
        [Engine::InnoDb].into_iter().collect()
    }

    fn backups_into_datadir(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        let timeout = self.base.config().probe_timeout;
        match tokio::time::timeout(timeout, self.plugin_active()).await {
            Ok(Ok(active)) => active,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Clone plugin probe failed");
                false
            }
            Err(_) => {
                tracing::debug!("Clone plugin probe timed out");
                false
            }
        }
    }

    async fn prepare(&self, _side: Side, ctx: &StageContext) -> Result<()> {
        if !self.plugin_active().await? {
            return Err(MethodError::Config("clone plugin is not active".into()));
        }
        ctx.progress("Clone plugin active");
        Ok(())
    }

    async fn backup(&self, request: &BackupRequest, ctx: &StageContext) -> Result<()> {
        if request.side == Side::Source {
            ctx.progress("Clone is pulled by the recipient");
            return Ok(());
        }
        ctx.progress(format!("Cloning from {}:{}", request.host, request.port));
        let command = format!(
            "mysql {} -e {}",
            self.base.local_client_args(),
            quote(&self.clone_statement(&request.host, request.port)),
        );
        self.base.exec(ctx, &command).await
    }

    async fn restore(&self, ctx: &StageContext) -> Result<()> {
        self.base.start_service(ctx).await
    }

    async fn get_metadata(&self) -> Result<BackupMetadata> {
        self.base
            .database()
            .clone_status()
            .await?
            .filter(|meta| !meta.is_empty())
            .ok_or_else(|| {
                MethodError::MissingArtifact(PathBuf::from("performance_schema.clone_status"))
            })
    }

    async fn cleanup(&self, _side: Side, _ctx: &StageContext) -> Result<()> {
        Ok(())
    }
}

fn sql_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseConfig;
    use crate::mock::MockDatabase;
    use seed_agent_exec::{CommandLine, CommandRunner, RecordingRunner};
    use std::sync::Arc;

    fn method(runner: &Arc<RecordingRunner>, db: &Arc<MockDatabase>) -> ClonePlugin {
        let mut config = BaseConfig::default();
        config.mysql.seed_user = "seed".into();
        config.mysql.seed_password = "it's".into();
        ClonePlugin::new(MethodBase::new(
            Arc::clone(runner) as Arc<dyn CommandRunner>,
            Arc::clone(db) as Arc<dyn crate::Database>,
            config,
        ))
    }

    #[tokio::test]
    async fn availability_follows_plugin_status() {
        let runner = Arc::new(RecordingRunner::new());
        let db = Arc::new(MockDatabase::new());
        let m = method(&runner, &db);
        assert!(!m.is_available().await);

        db.set_plugin_status(PLUGIN, "DISABLED");
        assert!(!m.is_available().await);

        db.set_plugin_status(PLUGIN, "ACTIVE");
        assert!(m.is_available().await);
    }

    #[tokio::test]
    async fn recipient_runs_clone_through_the_client() {
        let runner = Arc::new(RecordingRunner::new());
        let db = Arc::new(MockDatabase::new());
        let m = method(&runner, &db);
        let request = BackupRequest {
            side: Side::Target,
            host: "db-source".into(),
            port: 3306,
        };
        m.backup(&request, &StageContext::detached()).await.unwrap();

        let calls = runner.calls();
        assert!(calls[0].tracked);
        let line = CommandLine::parse(&calls[0].command).unwrap();
        let sql = line.stages()[0].last().unwrap();
        assert_eq!(
            sql,
            "SET GLOBAL clone_valid_donor_list = 'db-source:3306'; \
             CLONE INSTANCE FROM 'seed'@'db-source':3306 IDENTIFIED BY 'it''s'"
        );
        assert!(!line.to_string().contains("it''s"));
    }

    #[tokio::test]
    async fn donor_side_does_nothing() {
        let runner = Arc::new(RecordingRunner::new());
        let db = Arc::new(MockDatabase::new());
        let m = method(&runner, &db);
        let request = BackupRequest {
            side: Side::Source,
            host: "db-target".into(),
            port: 3306,
        };
        m.backup(&request, &StageContext::detached()).await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn prepare_requires_active_plugin() {
        let runner = Arc::new(RecordingRunner::new());
        let db = Arc::new(MockDatabase::new());
        let m = method(&runner, &db);
        assert!(m.prepare(Side::Target, &StageContext::detached()).await.is_err());
        db.set_plugin_status(PLUGIN, "ACTIVE");
        assert!(m.prepare(Side::Target, &StageContext::detached()).await.is_ok());
    }

    #[tokio::test]
    async fn metadata_from_clone_status() {
        let runner = Arc::new(RecordingRunner::new());
        let db = Arc::new(MockDatabase::new());
        let m = method(&runner, &db);
        assert!(matches!(
            m.get_metadata().await,
            Err(MethodError::MissingArtifact(_))
        ));

        let meta = BackupMetadata::positional("binlog.000002", 156)
            .with_gtid("d400d115-6565-11ea-bb6f-5254008afee6:1-20");
        db.set_clone_status(meta.clone());
        assert_eq!(m.get_metadata().await.unwrap(), meta);
    }
}
