use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use bankdesk_agent::AgentRuntime;
use bankdesk_db::DbPool;
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    runtime: AgentRuntime,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub agents: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, runtime: AgentRuntime) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, runtime })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "bankdesk-server runtime initialized".to_string(),
        },
        database,
        agents: agents_check(&state.runtime),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn agents_check(runtime: &AgentRuntime) -> HealthCheck {
    let bus = runtime.bus();
    HealthCheck {
        status: "ready",
        detail: format!(
            "{} sessions, {} messages in flight, {} undelivered",
            runtime.sessions().len(),
            bus.in_flight(),
            bus.undelivered_count()
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use axum::{extract::State, http::StatusCode, Json};
    use bankdesk_agent::{AgentRuntime, CollectingReplySink, OfflineModel, RuntimeDeps, RuntimeSettings};
    use bankdesk_core::audit::InMemoryAuditSink;
    use bankdesk_db::connect_with_settings;
    use bankdesk_db::repositories::{
        InMemoryAccountRepository, InMemoryCredentialRepository, InMemoryGatewayRepository,
    };
    use tower::ServiceExt;

    use crate::health::{health, router, HealthState};

    fn idle_runtime() -> AgentRuntime {
        AgentRuntime::start(RuntimeDeps {
            model: Arc::new(OfflineModel::new()),
            accounts: Arc::new(InMemoryAccountRepository::default()),
            gateway: Arc::new(InMemoryGatewayRepository::default()),
            credentials: Arc::new(InMemoryCredentialRepository::default()),
            replies: Arc::new(CollectingReplySink::default()),
            audit: Arc::new(InMemoryAuditSink::default()),
            settings: RuntimeSettings::default(),
        })
        .expect("runtime should start")
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool.clone(), runtime: idle_runtime() })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.agents.detail, "0 sessions, 0 messages in flight, 0 undelivered");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_degrades_when_database_is_closed() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) =
            health(State(HealthState { db_pool: pool, runtime: idle_runtime() })).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_route_is_mounted() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");

        let response = router(pool.clone(), idle_runtime())
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("router should respond");

        assert_eq!(response.status(), StatusCode::OK);
        pool.close().await;
    }
}
