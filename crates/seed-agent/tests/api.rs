//! End-to-end tests of the agent HTTP API against a scripted seed method.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::Utc;
use serde_json::Value;

use seed_agent::{create_router, AgentState, ApiConfig};
use seed_agent_control::{AgentIdentity, AgentToken, SeedControl, SeedCoordinator};
use seed_agent_core::{BackupMetadata, MethodKind, SeedId, StageKind};
use seed_agent_exec::{CommandRunner, RecordingRunner};
use seed_agent_methods::{
    BaseConfig, Database, MethodBase, MockDatabase, Script, ScriptedMethod, SeedMethod,
    SeedMethodRegistry,
};

const TOKEN: &str = "abc123";
const HEADER: &str = "x-seed-token";

struct Harness {
    server: TestServer,
    coordinator: Arc<SeedCoordinator>,
    method: Arc<ScriptedMethod>,
    runner: Arc<RecordingRunner>,
    identity: Arc<AgentIdentity>,
}

async fn harness_with(config: ApiConfig) -> Harness {
    let runner = Arc::new(RecordingRunner::new());
    let base = MethodBase::new(
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::new(MockDatabase::new()) as Arc<dyn Database>,
        BaseConfig::default(),
    );
    let method = Arc::new(ScriptedMethod::new(MethodKind::Mysqldump, base.clone()));
    let mut registry = SeedMethodRegistry::new(base);
    registry.register(Arc::clone(&method) as Arc<dyn SeedMethod>);
    registry.refresh_availability().await;

    let coordinator = Arc::new(SeedCoordinator::new(Arc::new(registry), "db-2"));
    let identity = Arc::new(AgentIdentity::new("db-2", 3002, AgentToken::new(TOKEN)));
    let state = AgentState::new(Arc::clone(&coordinator), Arc::clone(&identity), config);
    let server = TestServer::new(create_router(state)).unwrap();

    Harness {
        server,
        coordinator,
        method,
        runner,
        identity,
    }
}

async fn harness() -> Harness {
    harness_with(ApiConfig {
        token_http_header: HEADER.to_string(),
        ..ApiConfig::default()
    })
    .await
}

impl Harness {
    async fn get(&self, path: &str) -> axum_test::TestResponse {
        self.server
            .get(path)
            .add_header(
                HeaderName::from_static(HEADER),
                HeaderValue::from_static(TOKEN),
            )
            .await
    }

    async fn settled(&self, seed_id: SeedId, stage: StageKind) {
        for _ in 0..400 {
            if self
                .coordinator
                .stage(seed_id, stage)
                .is_ok_and(|r| r.status.is_terminal())
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{stage} of seed {seed_id} did not settle");
    }
}

const ID: SeedId = SeedId::new(42);

#[tokio::test]
async fn status_follows_control_plane_contact() {
    let h = harness().await;

    let response = h.server.get("/api/status").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "BAD");

    h.identity.record_contact(Utc::now());
    let response = h.server.get("/api/status").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "OK");
}

#[tokio::test]
async fn status_endpoint_is_configurable() {
    let h = harness_with(ApiConfig {
        status_endpoint: "/health".to_string(),
        ..ApiConfig::default()
    })
    .await;
    h.identity.record_contact(Utc::now());

    assert_eq!(h.server.get("/health").await.status_code(), StatusCode::OK);
    assert_eq!(
        h.server.get("/api/status").await.status_code(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn stage_routes_require_the_token() {
    let h = harness().await;

    let response = h.server.get("/api/active-seed").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["Code"], "ERROR");
    assert_eq!(body["Message"], "Invalid token");

    let response = h
        .server
        .get("/api/active-seed")
        .add_query_param("token", "wrong")
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = h
        .server
        .get("/api/active-seed")
        .add_query_param("token", TOKEN)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), Value::Null);

    assert_eq!(
        h.get("/api/active-seed").await.status_code(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn duplicate_prepare_is_already_started() {
    let h = harness().await;
    h.method.script(StageKind::Prepare, Script::Hold);

    let response = h.get("/api/prepare/42/mysqldump/target").await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    assert_eq!(response.text(), "Started");

    let response = h.get("/api/prepare/42/mysqldump/target").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "Prepare stage already started for seed");

    h.method.release();
    h.settled(ID, StageKind::Prepare).await;
    assert_eq!(h.method.call_count(StageKind::Prepare), 1);
}

#[tokio::test]
async fn full_seed_over_http() {
    let h = harness().await;
    h.method
        .set_metadata(BackupMetadata::positional("mysql-bin.000005", 1234).with_gtid("uuid:1-9"));

    assert_eq!(
        h.get("/api/prepare/42/mysqldump/target").await.status_code(),
        StatusCode::ACCEPTED
    );
    h.settled(ID, StageKind::Prepare).await;

    assert_eq!(
        h.get("/api/backup/42/mysqldump/db-1/3306").await.status_code(),
        StatusCode::ACCEPTED
    );
    h.settled(ID, StageKind::Backup).await;

    let record: Value = h.get("/api/seed-stage-state/42/backup").await.json();
    assert_eq!(record["SeedID"], 42);
    assert_eq!(record["Stage"], "Backup");
    assert_eq!(record["Status"], "Completed");
    assert_eq!(record["Hostname"], "db-2");

    let response = h.get("/api/get-metadata/42/mysqldump").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let metadata: BackupMetadata = response.json();
    assert_eq!(metadata.log_file, "mysql-bin.000005");
    assert_eq!(metadata.log_pos, 1234);
    assert_eq!(metadata.gtid_executed, "uuid:1-9");

    assert_eq!(
        h.get("/api/restore/42/mysqldump").await.status_code(),
        StatusCode::ACCEPTED
    );
    h.settled(ID, StageKind::Restore).await;
    assert_eq!(
        h.get("/api/cleanup/42/mysqldump/target").await.status_code(),
        StatusCode::ACCEPTED
    );
    h.settled(ID, StageKind::Cleanup).await;

    let active: Value = h.get("/api/active-seed").await.json();
    assert_eq!(active["ID"], 42);
    assert_eq!(active["Stage"], "Cleanup");
    assert_eq!(active["Status"], "Completed");
}

#[tokio::test]
async fn bad_parameters_are_structured_errors() {
    let h = harness().await;

    let response = h.get("/api/prepare/forty-two/mysqldump/target").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["Code"], "ERROR");
    assert_eq!(body["Details"]["Parameter"], "seed_id");

    let response = h.get("/api/backup/42/mysqldump/db-1/99999").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["Details"]["Parameter"], "port");

    let response = h.get("/api/seed-stage-state/42/teleport").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn control_errors_map_to_status_codes() {
    let h = harness().await;

    let response = h.get("/api/seed-stage-state/7/prepare").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["Message"], "SeedID not found: 7");

    let response = h.get("/api/prepare/42/rsync/target").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    h.get("/api/prepare/42/mysqldump/target").await;
    h.settled(ID, StageKind::Prepare).await;
    let response = h.get("/api/abort-seed-stage/42/prepare").await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn abort_over_http_cancels_the_stage() {
    let h = harness().await;
    h.runner.block_until_cancelled("mysqldump --all-databases");
    h.method.script(
        StageKind::Backup,
        Script::RunCommand("mysqldump --all-databases".into()),
    );

    h.get("/api/prepare/42/mysqldump/target").await;
    h.settled(ID, StageKind::Prepare).await;
    h.get("/api/backup/42/mysqldump/db-1/3306").await;

    for _ in 0..400 {
        if h
            .coordinator
            .stage(ID, StageKind::Backup)
            .is_ok_and(|r| r.process().is_some())
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let response = h.get("/api/abort-seed-stage/42/backup").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "Backup stage of seed 42 aborted");

    let record: Value = h.get("/api/seed-stage-state/42/backup").await.json();
    assert_eq!(record["Status"], "Cancelled");
}

#[tokio::test]
async fn seed_methods_lists_descriptors() {
    let h = harness().await;

    let methods: Value = h.get("/api/seed-methods").await.json();
    let methods = methods.as_array().unwrap();
    assert_eq!(methods.len(), 1);
    assert_eq!(methods[0]["is_available"], true);
}
