/**
 * HTTP Remote Executor
 *
 * Sends queued actions to a PostgREST-style REST API:
 * - create: `POST /rest/v1/{channel}`
 * - update: `PATCH /rest/v1/{channel}?id=eq.{id}`
 * - delete: `DELETE /rest/v1/{channel}?id=eq.{id}`
 * - interaction: `POST /rest/v1/{channel}` with the raw payload
 *
 * Every request carries `Idempotency-Key: {action id}` so a replay after a
 * crash is absorbed by the backend. A created entity with a temporary id is
 * sent with `client_ref` set to that id; the server echoes it back in the
 * realtime insert so the reconciler can match it.
 */
use crate::offline::executor::RemoteExecutor;
use crate::offline::queue::{ActionKind, QueuedAction};
use crate::shared::config::SyncConfig;
use crate::shared::entity::{CacheEntity, EntityId, Mutation};
use crate::shared::error::{Result, SyncError};
use crate::sync::ReachabilityProbe;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Executes actions over HTTP
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    config: SyncConfig,
}

impl HttpExecutor {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    fn table_url(&self, channel: &str) -> String {
        self.config.api_url(&format!("/rest/v1/{}", channel))
    }

    fn row_url(&self, channel: &str, id: &EntityId) -> String {
        format!("{}?id=eq.{}", self.table_url(channel), id.as_str())
    }

    fn authorize(&self, request: RequestBuilder, action: &QueuedAction) -> RequestBuilder {
        let mut request = request
            .header("Idempotency-Key", action.id.to_string())
            .header("Prefer", "return=representation");
        if let Some(key) = &self.config.api_key {
            request = request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }
        request
    }

    fn build_request(&self, action: &QueuedAction) -> Result<RequestBuilder> {
        if action.kind == ActionKind::RecordInteraction {
            return Ok(self.client.post(self.table_url(&action.channel)).json(&action.payload));
        }

        let request = match action.mutation()? {
            Mutation::Create { entity } => {
                let mut body = entity.fields.clone();
                if entity.id.is_temporary() {
                    body.insert("client_ref".into(), Value::String(entity.id.as_str().to_string()));
                } else {
                    body.insert("id".into(), Value::String(entity.id.as_str().to_string()));
                }
                self.client.post(self.table_url(&action.channel)).json(&body)
            }
            Mutation::Update { id, fields } => self.client.patch(self.row_url(&action.channel, &id)).json(&fields),
            Mutation::Delete { id } => self.client.delete(self.row_url(&action.channel, &id)),
        };
        Ok(request)
    }
}

#[async_trait]
impl RemoteExecutor for HttpExecutor {
    async fn execute(&self, action: &QueuedAction) -> Result<Option<CacheEntity>> {
        let request = self.authorize(self.build_request(action)?, action);
        tracing::debug!("[Sync] HTTP {:?} {} on {}", action.kind, action.id, action.channel);

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        match action.kind {
            ActionKind::CreateEntity | ActionKind::UpdateEntity => {
                let body = response.text().await?;
                Ok(parse_returned_row(&body))
            }
            ActionKind::DeleteEntity | ActionKind::RecordInteraction => Ok(None),
        }
    }
}

/// A request that never reached the backend
fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_connect() {
        SyncError::Offline
    } else {
        SyncError::from(err)
    }
}

/// Map a non-2xx response to an error category
async fn status_error(status: StatusCode, response: Response) -> SyncError {
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| status.to_string());
    let message = format!("{} - {}", status, text);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SyncError::validation("body", message),
        StatusCode::NOT_FOUND | StatusCode::CONFLICT => SyncError::conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => SyncError::network(message),
        s if s.is_server_error() => SyncError::network(message),
        _ => SyncError::validation("status", message),
    }
}

/// First row of a `return=representation` body, if any.
///
/// The write already succeeded, so a body we cannot read is logged and
/// confirmed without a server copy.
fn parse_returned_row(body: &str) -> Option<CacheEntity> {
    if body.trim().is_empty() {
        return None;
    }
    let row = match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(rows)) => rows.into_iter().next(),
        Ok(row @ Value::Object(_)) => Some(row),
        Ok(_) => None,
        Err(e) => {
            tracing::error!("[Sync] Unreadable response body after a successful write: {}", e);
            return None;
        }
    };
    let Some(Value::Object(mut fields)) = row else {
        return None;
    };

    let id = match fields.remove("id") {
        Some(Value::String(id)) => id,
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            tracing::error!("[Sync] Returned row has no id, confirming without it");
            return None;
        }
    };
    let version = fields.remove("version").and_then(|v| v.as_i64()).unwrap_or(0);
    fields.remove("client_ref");
    Some(CacheEntity::new(id, version, strip_nulls(fields)))
}

fn strip_nulls(fields: Map<String, Value>) -> Map<String, Value> {
    fields.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

/// Reachability check against the backend health endpoint
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: config.api_url("/rest/v1/"),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            // Any answer means the backend is reachable
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("[Network] Probe failed: {}", e);
                false
            }
        }
    }
}
