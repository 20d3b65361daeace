use crate::config::SyncdConfig;
use crate::database::LocalDb;
use crate::queue::{PendingQueue, ReplayError, Replayer};
use async_trait::async_trait;
use mlog_proto::{
    LoginRequest, LoginResponse, Mission, MissionDraft, MissionList, MissionPatch, MissionQuery,
    PendingOperation, RegisterRequest, UserInfo, WriteMethod,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The server answered with success but the body did not match the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Local(#[from] anyhow::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Result of a mission write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    Applied(T),
    /// The server was unreachable; the write waits in the pending queue.
    Queued { seq: i64 },
}

/// Where a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Server,
    Cache,
}

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    db: Arc<LocalDb>,
    queue: Arc<PendingQueue>,
}

impl ApiClient {
    pub fn new(
        config: &SyncdConfig,
        db: Arc<LocalDb>,
        queue: Arc<PendingQueue>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base: config.api_base().to_string(),
            db,
            queue,
        })
    }

    fn request(&self, method: Method, path: &str) -> ClientResult<RequestBuilder> {
        let mut builder = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(token) = self.db.token()? {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn dispatch(&self, op: &PendingOperation) -> ClientResult<Response> {
        let method = match op.method() {
            WriteMethod::Post => Method::POST,
            WriteMethod::Put => Method::PUT,
            WriteMethod::Patch => Method::PATCH,
            WriteMethod::Delete => Method::DELETE,
        };
        let mut builder = self.request(method, &op.endpoint())?;
        if let Some(body) = op.body().map_err(anyhow::Error::from)? {
            builder = builder.json(&body);
        }
        Ok(builder.send().await?)
    }

    /// Missions from the server, or the local cache when the server cannot be reached.
    pub async fn list_missions(&self, query: &MissionQuery) -> ClientResult<(Vec<Mission>, Source)> {
        let result: ClientResult<MissionList> = async {
            let resp = self.request(Method::GET, "/api/missions")?.query(query).send().await?;
            parse::<MissionList>(resp).await
        }
        .await;

        match result {
            Ok(list) => {
                if *query == MissionQuery::default() {
                    self.db.store_missions(&list.missions)?;
                }
                Ok((list.missions, Source::Server))
            }
            Err(e) if is_unavailable(&e) => {
                tracing::warn!(error = %e, "server unavailable, showing cached missions");
                Ok((self.db.cached_missions()?, Source::Cache))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_mission(&self, id: i64) -> ClientResult<(Option<Mission>, Source)> {
        let result: ClientResult<Option<Mission>> = async {
            let resp = self
                .request(Method::GET, &format!("/api/missions/{}", id))?
                .send()
                .await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            parse::<Mission>(resp).await.map(Some)
        }
        .await;

        match result {
            Ok(mission) => Ok((mission, Source::Server)),
            Err(e) if is_unavailable(&e) => {
                let cached = self.db.cached_missions()?.into_iter().find(|m| m.id == id);
                Ok((cached, Source::Cache))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create_mission(&self, draft: MissionDraft) -> ClientResult<WriteOutcome<Mission>> {
        let outcome = self
            .write::<Mission>(PendingOperation::CreateMission { draft })
            .await?;
        if let WriteOutcome::Applied(mission) = &outcome {
            self.db.prepend_mission(mission)?;
        }
        Ok(outcome)
    }

    pub async fn update_mission(
        &self,
        id: i64,
        draft: MissionDraft,
    ) -> ClientResult<WriteOutcome<Mission>> {
        let outcome = self
            .write::<Mission>(PendingOperation::UpdateMission { id, draft })
            .await?;
        if let WriteOutcome::Applied(mission) = &outcome {
            self.db.upsert_cached_mission(mission)?;
        }
        Ok(outcome)
    }

    pub async fn patch_mission(
        &self,
        id: i64,
        patch: MissionPatch,
    ) -> ClientResult<WriteOutcome<Mission>> {
        let outcome = self
            .write::<Mission>(PendingOperation::PatchMission { id, patch })
            .await?;
        if let WriteOutcome::Applied(mission) = &outcome {
            self.db.upsert_cached_mission(mission)?;
        }
        Ok(outcome)
    }

    pub async fn delete_mission(&self, id: i64) -> ClientResult<WriteOutcome<()>> {
        let outcome = self
            .write::<Value>(PendingOperation::DeleteMission { id })
            .await?;
        self.db.remove_cached_mission(id)?;
        Ok(match outcome {
            WriteOutcome::Applied(_) => WriteOutcome::Applied(()),
            WriteOutcome::Queued { seq } => WriteOutcome::Queued { seq },
        })
    }

    /// Send a write; network failures and 5xx answers put it in the pending
    /// queue, 4xx answers are returned as `Rejected`.
    async fn write<T: DeserializeOwned>(&self, op: PendingOperation) -> ClientResult<WriteOutcome<T>> {
        let result = match self.dispatch(&op).await {
            Ok(resp) => parse_optional::<T>(resp).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => Ok(WriteOutcome::Applied(value)),
            Err(e) if is_unavailable(&e) => {
                tracing::warn!(operation = %op, error = %e, "server unavailable, write will be synced later");
                let seq = self.queue.enqueue(op)?;
                Ok(WriteOutcome::Queued { seq })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> ClientResult<UserInfo> {
        let body = RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
            role: None,
        };
        let resp = self
            .http
            .post(format!("{}/api/users/register", self.base))
            .json(&body)
            .send()
            .await?;
        parse(resp).await
    }

    /// Log in and remember the session for later requests.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        token: Option<String>,
    ) -> ClientResult<LoginResponse> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
            token,
        };
        let resp = self
            .http
            .post(format!("{}/api/users/login", self.base))
            .json(&body)
            .send()
            .await?;
        let login: LoginResponse = parse(resp).await?;
        self.db.set_session(&login.token, &login.user)?;
        Ok(login)
    }

    pub fn logout(&self) -> ClientResult<()> {
        Ok(self.db.clear_session()?)
    }
}

#[async_trait]
impl Replayer for ApiClient {
    async fn replay(&self, op: &PendingOperation) -> Result<(), ReplayError> {
        let resp = match self.dispatch(op).await {
            Ok(resp) => resp,
            Err(e) => return Err(ReplayError::Transport(e.to_string())),
        };
        let status = resp.status();
        if !status.is_success() {
            return Err(ReplayError::Rejected {
                status: status.as_u16(),
            });
        }
        if let PendingOperation::CreateMission { .. } = op {
            match resp.json::<Mission>().await {
                Ok(mission) => {
                    if let Err(e) = self.db.prepend_mission(&mission) {
                        tracing::warn!(error = ?e, "failed to cache replayed mission");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "replayed create returned no mission"),
            }
        }
        Ok(())
    }
}

/// Network failure or a 5xx answer: the write may succeed later.
fn is_unavailable(e: &ClientError) -> bool {
    matches!(e, ClientError::Transport(_) | ClientError::Server { .. })
}

async fn error_for(resp: Response) -> ClientError {
    let status = resp.status();
    let message = match resp.json::<Value>().await {
        Ok(body) => error_message(&body).unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    };
    if status.is_server_error() {
        ClientError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        ClientError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// `{ "error": "..." }` or `{ "errors": { field: message } }`
fn error_message(body: &Value) -> Option<String> {
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Some(error.to_string());
    }
    let errors = body.get("errors")?.as_object()?;
    Some(
        errors
            .iter()
            .map(|(field, message)| format!("{}: {}", field, message.as_str().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

async fn parse<T: DeserializeOwned>(resp: Response) -> ClientResult<T> {
    if !resp.status().is_success() {
        return Err(error_for(resp).await);
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Like `parse`, but an empty body (204) reads as JSON null.
async fn parse_optional<T: DeserializeOwned>(resp: Response) -> ClientResult<T> {
    if !resp.status().is_success() {
        return Err(error_for(resp).await);
    }
    let bytes = resp.bytes().await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DrainPolicy;
    use crate::test_support::{draft, mission};
    use mockito::Matcher;
    use serde_json::json;

    struct Fixture {
        client: ApiClient,
        db: Arc<LocalDb>,
        queue: Arc<PendingQueue>,
    }

    fn fixture(api_url: &str, policy: DrainPolicy) -> Fixture {
        let db = Arc::new(LocalDb::in_memory().unwrap());
        let queue = Arc::new(PendingQueue::new(db.clone(), policy));
        let config = SyncdConfig {
            api_url: api_url.to_string(),
            request_timeout_secs: 2,
            ..SyncdConfig::default()
        };
        let client = ApiClient::new(&config, db.clone(), queue.clone()).unwrap();
        Fixture { client, db, queue }
    }

    const UNREACHABLE: &str = "http://127.0.0.1:9";

    #[tokio::test]
    async fn offline_delete_is_queued_then_replayed() {
        let offline = fixture(UNREACHABLE, DrainPolicy::BestEffort);
        let outcome = offline.client.delete_mission(5).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued { .. }));
        let queued = offline.queue.snapshot().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].op, PendingOperation::DeleteMission { id: 5 });

        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/api/missions/5")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let online = fixture(&server.url(), DrainPolicy::BestEffort);
        online.queue.enqueue(queued[0].op.clone()).unwrap();

        let report = online.queue.drain_and_replay(&online.client).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(online.queue.is_empty().unwrap());
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_write_is_not_queued() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/missions")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errors":{"name":"Mission Name must be at least 3 characters long"}}"#)
            .create_async()
            .await;
        let f = fixture(&server.url(), DrainPolicy::BestEffort);

        let err = f.client.create_mission(draft("Ab")).await.unwrap_err();
        match err {
            ClientError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("at least 3 characters"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn server_error_write_is_queued() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/api/missions/3")
            .with_status(500)
            .with_body(r#"{"error":"Internal server error"}"#)
            .create_async()
            .await;
        let f = fixture(&server.url(), DrainPolicy::BestEffort);

        let outcome = f.client.update_mission(3, draft("Ares")).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued { .. }));
        assert_eq!(f.queue.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn created_mission_is_cached_and_token_sent() {
        let mut server = mockito::Server::new_async().await;
        let created = mission(11, "Ares");
        let mock = server
            .mock("POST", "/api/missions")
            .match_header("authorization", "Bearer jwt-123")
            .match_body(Matcher::PartialJson(json!({ "name": "Ares", "type": "Resupply" })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(&created).unwrap())
            .create_async()
            .await;
        let f = fixture(&server.url(), DrainPolicy::BestEffort);
        f.db.set_value("token", "jwt-123").unwrap();

        let outcome = f.client.create_mission(draft("Ares")).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Applied(created.clone()));
        assert_eq!(f.db.cached_missions().unwrap(), vec![created]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn listing_falls_back_to_cache() {
        let f = fixture(UNREACHABLE, DrainPolicy::BestEffort);
        f.db.store_missions(&[mission(1, "Cached")]).unwrap();
        let (missions, source) = f.client.list_missions(&MissionQuery::default()).await.unwrap();
        assert_eq!(source, Source::Cache);
        assert_eq!(missions[0].name, "Cached");
    }

    #[tokio::test]
    async fn listing_refreshes_cache() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/missions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(&json!({ "missions": [mission(4, "Fresh")] })).unwrap())
            .create_async()
            .await;
        let f = fixture(&server.url(), DrainPolicy::BestEffort);

        let (missions, source) = f.client.list_missions(&MissionQuery::default()).await.unwrap();
        assert_eq!(source, Source::Server);
        assert_eq!(missions.len(), 1);
        assert_eq!(f.db.cached_missions().unwrap()[0].name, "Fresh");
    }

    #[tokio::test]
    async fn login_stores_session() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/users/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "token": "jwt-abc",
                    "user": { "id": 1, "username": "kim", "role": "user", "twoFactorEnabled": false }
                })
                .to_string(),
            )
            .create_async()
            .await;
        let f = fixture(&server.url(), DrainPolicy::BestEffort);

        let login = f.client.login("kim", "secret", None).await.unwrap();
        assert_eq!(login.user.username, "kim");
        assert_eq!(f.db.token().unwrap().as_deref(), Some("jwt-abc"));
        assert_eq!(f.db.user().unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn malformed_success_body_is_not_queued() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/api/missions")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body("{\"id\": 12, \"name\"")
            .expect(1)
            .create_async()
            .await;
        let f = fixture(&server.url(), DrainPolicy::BestEffort);

        let err = f.client.create_mission(draft("Ares")).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)), "unexpected error: {err:?}");
        assert!(f.queue.is_empty().unwrap());
        create.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_listing_does_not_fall_back_to_cache() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/missions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;
        let f = fixture(&server.url(), DrainPolicy::BestEffort);
        f.db.store_missions(&[mission(1, "Cached")]).unwrap();

        let err = f.client.list_missions(&MissionQuery::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)), "unexpected error: {err:?}");
        assert_eq!(f.db.cached_missions().unwrap()[0].name, "Cached");
    }

    #[tokio::test]
    async fn replay_maps_status_to_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/api/missions/8")
            .with_status(404)
            .create_async()
            .await;
        let f = fixture(&server.url(), DrainPolicy::RetainFailed);
        let err = f
            .client
            .replay(&PendingOperation::DeleteMission { id: 8 })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Rejected { status: 404 }));
        assert!(!err.is_transient());
    }
}
