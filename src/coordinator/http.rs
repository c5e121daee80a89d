//! HTTP adapter for the coordinator's REST + SSE surface.
//!
//! Records live in collections under `/api/collections/<name>/records`;
//! realtime change notifications arrive as server-sent events from
//! `/api/realtime`, filtered server-side to this machine's executions.
//! SSE framing is confined to this module; the rest of the agent only
//! sees [`RecordEvent`]s.

use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::coordinator::gateway::{Coordinator, Subscription, UnsubscribeFuture};
use crate::coordinator::types::{
    ExecutionFilter, ExecutionPatch, ExecutionRecord, Machine, MachinePatch, NewExecution,
    RecordEvent,
};
use crate::error::GatewayError;

const MACHINES: &str = "machines";
const EXECUTIONS: &str = "executions";

/// Production gateway speaking the coordinator's HTTP API.
pub struct HttpCoordinator {
    client: Client,
    base_url: String,
    token: SecretString,
    request_timeout: Duration,
}

impl HttpCoordinator {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        // No global timeout: it would also bound the long-lived SSE
        // connection. CRUD calls set a per-request timeout instead.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            request_timeout: Duration::from_secs(30),
        }
    }

    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{collection}/records", self.base_url)
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{id}", self.records_url(collection))
    }

    async fn get_first<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Option<String>,
    ) -> Result<Option<T>, GatewayError> {
        let mut request = self
            .client
            .get(self.records_url(collection))
            .timeout(self.request_timeout)
            .bearer_auth(self.token.expose_secret())
            .query(&[("perPage", "1")]);
        if let Some(filter) = filter {
            request = request.query(&[("filter", filter.as_str())]);
        }

        let response = request.send().await.map_err(transport_error)?;
        let list: ListResponse<T> = read_json(check_status(response).await?).await?;
        Ok(list.items.into_iter().next())
    }

    async fn patch_record<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .patch(self.record_url(collection, id))
            .timeout(self.request_timeout)
            .bearer_auth(self.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(check_status(response).await?).await
    }
}

#[async_trait::async_trait]
impl Coordinator for HttpCoordinator {
    async fn fetch_machine(&self) -> Result<Machine, GatewayError> {
        // The bearer token scopes the listing to this agent's machine.
        self.get_first(MACHINES, None)
            .await?
            .ok_or(GatewayError::NotFound {
                what: "machine record".to_string(),
            })
    }

    async fn update_machine(&self, id: &str, patch: MachinePatch) -> Result<Machine, GatewayError> {
        self.patch_record(MACHINES, id, &patch).await
    }

    async fn create_execution(
        &self,
        fields: NewExecution,
    ) -> Result<ExecutionRecord, GatewayError> {
        let response = self
            .client
            .post(self.records_url(EXECUTIONS))
            .timeout(self.request_timeout)
            .bearer_auth(self.token.expose_secret())
            .json(&fields)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(check_status(response).await?).await
    }

    async fn update_execution(
        &self,
        id: &str,
        patch: ExecutionPatch,
    ) -> Result<ExecutionRecord, GatewayError> {
        self.patch_record(EXECUTIONS, id, &patch).await
    }

    async fn fetch_execution(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Option<ExecutionRecord>, GatewayError> {
        let expr = filter_expr(filter);
        self.get_first(EXECUTIONS, (!expr.is_empty()).then_some(expr))
            .await
    }

    async fn subscribe(&self, machine_id: &str) -> Result<Subscription, GatewayError> {
        let url = format!("{}/api/realtime", self.base_url);
        let filter = format!("machine=\"{machine_id}\"");

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.token.expose_secret())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .query(&[("filter", filter.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let (tx, rx) = mpsc::channel(64);
        let reader = tokio::spawn(pump_events(Box::pin(response.bytes_stream()), tx));
        let abort = reader.abort_handle();

        let unsubscribe = Box::new(move || -> UnsubscribeFuture {
            Box::pin(async move {
                abort.abort();
                Ok(())
            })
        });

        Ok(Subscription::new(
            Box::pin(ReceiverStream::new(rx)),
            unsubscribe,
        ))
    }
}

/// Render a lookup filter in the coordinator's filter syntax.
fn filter_expr(filter: &ExecutionFilter) -> String {
    let mut parts = Vec::new();
    if let Some(machine) = &filter.machine {
        parts.push(format!("machine=\"{machine}\""));
    }
    if let Some(invisible) = filter.invisible {
        parts.push(format!("invisible={invisible}"));
    }
    parts.join(" && ")
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    GatewayError::Connect {
        reason: e.to_string(),
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(GatewayError::Auth);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound {
            what: if body.is_empty() {
                "record".to_string()
            } else {
                snippet(&body).to_string()
            },
        });
    }
    Err(GatewayError::Http {
        status: status.as_u16(),
        body: snippet(&body).to_string(),
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let text = response.text().await.map_err(transport_error)?;
    serde_json::from_str(&text).map_err(|e| GatewayError::Decode {
        reason: format!("{e}; body: {}", snippet(&text)),
    })
}

fn snippet(text: &str) -> &str {
    let mut cut = text.len().min(200);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

/// Forward decoded record events from an SSE byte stream into a channel.
///
/// Ends when the HTTP stream ends or errors, or when the receiver is
/// dropped. Dropping `tx` closes the event stream, which the supervisor
/// treats as a disconnect.
async fn pump_events<S, B, E>(mut stream: S, tx: mpsc::Sender<RecordEvent>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut parser = SseParser::default();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "realtime stream failed");
                return;
            }
        };
        for message in parser.feed(chunk.as_ref()) {
            if message.data.is_empty() {
                continue;
            }
            match serde_json::from_str::<RecordEvent>(&message.data) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                // Connection handshake and other non-record frames.
                Err(e) => tracing::debug!(
                    event = %message.event,
                    error = %e,
                    "skipping non-record realtime frame"
                ),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct SseMessage {
    event: String,
    data: String,
}

/// Incremental server-sent-event frame splitter.
///
/// Frames are separated by a blank line; `data:` lines accumulate,
/// `:` comment lines (keepalives) are ignored.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(message) = parse_frame(&String::from_utf8_lossy(&frame)) {
                messages.push(message);
            }
        }
        messages
    }
}

fn parse_frame(frame: &str) -> Option<SseMessage> {
    let mut event = String::new();
    let mut data_lines = Vec::new();
    for line in frame.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim_start().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }
    if event.is_empty() && data_lines.is_empty() {
        return None;
    }
    Some(SseMessage {
        event,
        data: data_lines.join("\n"),
    })
}
