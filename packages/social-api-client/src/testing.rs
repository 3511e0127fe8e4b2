//! Scripted transport for exercising the client without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::{ApiRequest, RawResponse, Transport};

type Scripted = Result<RawResponse, TransportError>;

/// Replays queued responses per API method, in order.
///
/// A method with nothing queued answers with an empty listing, so a scripted
/// pagination simply stops when its pages run out.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, method: &str, response: RawResponse) {
        self.enqueue(method, Ok(response));
    }

    pub fn push_err(&self, method: &str, error: TransportError) {
        self.enqueue(method, Err(error));
    }

    fn enqueue(&self, method: &str, scripted: Scripted) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts
            .entry(method.to_string())
            .or_default()
            .push_back(scripted);
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_for(&self, method: &str) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    /// `200` listing body.
    pub fn list(items: Vec<Value>, total: u64) -> RawResponse {
        RawResponse {
            status: 200,
            body: json!({ "response": { "count": total, "items": items } }).to_string(),
        }
    }

    pub fn throttled() -> RawResponse {
        RawResponse {
            status: 429,
            body: "Too Many Requests".to_string(),
        }
    }

    pub fn status(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.to_string(),
        }
    }

    /// `200` carrying an in-band API error object.
    pub fn api_error(code: i64, message: &str) -> RawResponse {
        RawResponse {
            status: 200,
            body: json!({ "error": { "error_code": code, "error_msg": message } }).to_string(),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(&self, request: &ApiRequest, _credential: &str) -> Scripted {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(request.method)
            .and_then(|queue| queue.pop_front());

        next.unwrap_or_else(|| Ok(Self::list(Vec::new(), 0)))
    }
}

/// Wall post JSON as the API returns it.
pub fn post_json(id: i64, owner_id: i64, comments: u64) -> Value {
    json!({
        "id": id,
        "owner_id": owner_id,
        "text": format!("post {}", id),
        "date": 1_700_000_000 + id,
        "comments": { "count": comments },
    })
}

/// Comment JSON as the API returns it (no owner/post ids).
pub fn comment_json(id: i64, from_id: i64, text: &str) -> Value {
    json!({
        "id": id,
        "from_id": from_id,
        "text": text,
        "date": 1_700_000_000 + id,
        "likes": { "count": id % 7 },
    })
}
