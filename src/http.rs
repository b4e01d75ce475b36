//! REST implementation of [`CanvasBackend`].
//!
//! Visual components live under `/api/components/`, text blocks under
//! `/api/blocks/`. Both take the same grid fields on the wire
//! (`position_x`, `position_y`, `width`, `height`). A component's payload
//! is split into `name` and `config`; a block's payload is sent verbatim
//! as `content`.
//!
//! ERROR HANDLING
//! ==============
//! Non-2xx responses become [`BackendError::from_status`], with the body's
//! `detail` field as the message when present. A 401 also drops the stored
//! token and the caller has to supply a new one.

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::backend::{BackendError, CanvasBackend, ItemPatch, NewItem, RemoteItem};
use crate::config::ApiConfig;
use crate::placement::ItemKind;
use crate::ready::ReadyGate;
use crate::store::ServerId;

const COMPONENTS: &str = "/api/components";
const BLOCKS: &str = "/api/blocks";

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
    ready: ReadyGate,
}

impl HttpBackend {
    /// Build a client from API config. The readiness gate starts open when
    /// the config carries a token.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the HTTP client cannot be constructed.
    pub fn new(config: &ApiConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let ready = ReadyGate::closed();
        if config.token.is_some() {
            ready.open();
        }
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(config.token.clone()),
            ready,
        })
    }

    /// Gate that opens once a credential is available. Hand it to the
    /// canvas builder so no request goes out unauthenticated.
    #[must_use]
    pub fn ready(&self) -> ReadyGate {
        self.ready.clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        self.ready.open();
    }

    pub fn clear_token(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let builder = self.http.request(method, url);
        match self
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
        {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and return the body of a successful response.
    async fn execute(&self, builder: RequestBuilder) -> Result<String, BackendError> {
        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if (200..300).contains(&status) {
            return Ok(text);
        }
        if status == 401 {
            warn!("backend rejected credential; clearing token");
            self.clear_token();
        }
        Err(BackendError::from_status(status, error_detail(status, &text)))
    }

    async fn create(&self, base: &str, body: &CreateBody<'_>) -> Result<ServerId, BackendError> {
        let text = self
            .execute(self.request(Method::POST, &format!("{base}/")).json(body))
            .await?;
        let created: Created = parse(&text)?;
        debug!(id = %created.id.0, base, "backend created record");
        Ok(created.id.0)
    }

    async fn update(&self, base: &str, id: &str, body: &UpdateBody) -> Result<(), BackendError> {
        self.execute(self.request(Method::PUT, &format!("{base}/{id}")).json(body))
            .await
            .map(|_| ())
    }

    async fn delete(&self, base: &str, id: &str) -> Result<(), BackendError> {
        self.execute(self.request(Method::DELETE, &format!("{base}/{id}")))
            .await
            .map(|_| ())
    }

    async fn list(&self, base: &str, dashboard_id: &str) -> Result<Vec<Record>, BackendError> {
        let text = self
            .execute(self.request(Method::GET, &format!("{base}/dashboard/{dashboard_id}")))
            .await?;
        parse(&text)
    }
}

#[async_trait::async_trait]
impl CanvasBackend for HttpBackend {
    async fn list_items(&self, dashboard_id: &str) -> Result<Vec<RemoteItem>, BackendError> {
        let components = self.list(COMPONENTS, dashboard_id).await?;
        let blocks = match self.list(BLOCKS, dashboard_id).await {
            Ok(blocks) => blocks,
            Err(BackendError::Status { status: 404, .. }) => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(components
            .into_iter()
            .map(Record::into_component)
            .chain(blocks.into_iter().map(Record::into_block))
            .collect())
    }

    async fn create_item(&self, dashboard_id: &str, item: &NewItem) -> Result<ServerId, BackendError> {
        self.create(COMPONENTS, &CreateBody::component(dashboard_id, item))
            .await
    }

    async fn update_item(&self, id: &str, patch: &ItemPatch) -> Result<(), BackendError> {
        self.update(COMPONENTS, id, &UpdateBody::component(patch))
            .await
    }

    async fn delete_item(&self, id: &str) -> Result<(), BackendError> {
        self.delete(COMPONENTS, id).await
    }

    async fn create_block(&self, dashboard_id: &str, block: &NewItem) -> Result<ServerId, BackendError> {
        self.create(BLOCKS, &CreateBody::block(dashboard_id, block)).await
    }

    async fn update_block(&self, id: &str, patch: &ItemPatch) -> Result<(), BackendError> {
        self.update(BLOCKS, id, &UpdateBody::block(patch)).await
    }

    async fn delete_block(&self, id: &str) -> Result<(), BackendError> {
        self.delete(BLOCKS, id).await
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    dashboard_id: &'a str,
    #[serde(rename = "type")]
    kind: ItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a Value>,
    position_x: u32,
    position_y: u32,
    width: u32,
    height: u32,
}

impl<'a> CreateBody<'a> {
    fn component(dashboard_id: &'a str, item: &'a NewItem) -> Self {
        let (name, config) = split_component_payload(item.kind, &item.payload);
        Self {
            dashboard_id,
            kind: item.kind,
            name: Some(name),
            config: Some(config),
            content: None,
            position_x: item.placement.x,
            position_y: item.placement.y,
            width: item.placement.w,
            height: item.placement.h,
        }
    }

    fn block(dashboard_id: &'a str, item: &'a NewItem) -> Self {
        Self {
            dashboard_id,
            kind: item.kind,
            name: None,
            config: None,
            content: Some(&item.payload),
            position_x: item.placement.x,
            position_y: item.placement.y,
            width: item.placement.w,
            height: item.placement.h,
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct UpdateBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position_x: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position_y: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

impl UpdateBody {
    fn with_placement(patch: &ItemPatch) -> Self {
        let mut body = Self::default();
        if let Some(p) = patch.placement {
            body.position_x = Some(p.x);
            body.position_y = Some(p.y);
            body.width = Some(p.w);
            body.height = Some(p.h);
        }
        body
    }

    fn component(patch: &ItemPatch) -> Self {
        let mut body = Self::with_placement(patch);
        if let Some(payload) = &patch.payload {
            body.name = payload
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string);
            body.config = Some(payload.get("config").cloned().unwrap_or_else(|| json!({})));
        }
        body
    }

    fn block(patch: &ItemPatch) -> Self {
        let mut body = Self::with_placement(patch);
        body.content = patch.payload.clone();
        body
    }
}

/// Server ids arrive as strings or integers depending on the table.
#[derive(Debug, Deserialize)]
#[serde(from = "RawId")]
struct WireId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl From<RawId> for WireId {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => Self(s),
            RawId::Number(n) => Self(n.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Created {
    id: WireId,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: WireId,
    #[serde(rename = "type")]
    kind: ItemKind,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    position_x: Option<u32>,
    #[serde(default)]
    position_y: Option<u32>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

impl Record {
    fn into_component(mut self) -> RemoteItem {
        let title = self.name.take().unwrap_or_else(|| self.kind.to_string());
        let config = self.config.take().unwrap_or_else(|| json!({}));
        self.into_remote(json!({"title": title, "config": config}))
    }

    fn into_block(mut self) -> RemoteItem {
        let payload = self.content.take().unwrap_or(Value::Null);
        self.into_remote(payload)
    }

    fn into_remote(self, payload: Value) -> RemoteItem {
        RemoteItem {
            id: self.id.0,
            kind: self.kind,
            payload,
            x: self.position_x,
            y: self.position_y,
            w: self.width,
            h: self.height,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

// =============================================================================
// PARSING
// =============================================================================

fn split_component_payload(kind: ItemKind, payload: &Value) -> (String, Value) {
    let name = payload
        .get("title")
        .and_then(Value::as_str)
        .map_or_else(|| kind.to_string(), str::to_string);
    let config = payload
        .get("config")
        .cloned()
        .unwrap_or_else(|| json!({}));
    (name, config)
}

fn parse<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, BackendError> {
    serde_json::from_str(text).map_err(|e| BackendError::Decode(e.to_string()))
}

/// Prefer the API's `detail` message over the raw body.
fn error_detail(status: u16, text: &str) -> String {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(ErrorBody { detail: Some(Value::String(detail)) }) => detail,
        Ok(ErrorBody { detail: Some(other) }) => other.to_string(),
        _ if text.trim().is_empty() => format!("HTTP {status}"),
        _ => text.to_string(),
    }
}
