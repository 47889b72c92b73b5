//! A scriptable JSON-RPC endpoint on localhost.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use axum::{
    Router,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};
use url::Url;

/// What the endpoint answers to one request.
#[derive(Debug, Clone)]
pub enum RpcReply {
    Result(Value),
    Error { code: i64, message: String },
    /// Fails the whole HTTP exchange with this status.
    Status(StatusCode),
}

impl RpcReply {
    pub fn result(value: impl Into<Value>) -> Self {
        Self::Result(value.into())
    }

    /// A quantity, hex encoded.
    pub fn quantity(n: u64) -> Self {
        Self::Result(json!(format!("{n:#x}")))
    }

    /// An `eth_call` return value.
    pub fn abi(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        Self::Result(json!(data))
    }

    /// A single ABI word holding a bool.
    pub fn abi_bool(value: bool) -> Self {
        Self::abi(U256::from(value as u8).to_be_bytes::<32>().to_vec())
    }

    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// One request the endpoint received.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    /// Calldata of an `eth_call` or `eth_estimateGas`, if any.
    pub fn calldata(&self) -> Option<Bytes> {
        let tx = self.params.get(0)?;
        let data = tx.get("input").or_else(|| tx.get("data"))?;
        serde_json::from_value(data.clone()).ok()
    }

    /// Target contract of an `eth_call`.
    pub fn to(&self) -> Option<Address> {
        serde_json::from_value(self.params.get(0)?.get("to")?.clone()).ok()
    }

    /// A block number parameter of an `eth_getLogs` filter, e.g. `fromBlock`.
    pub fn filter_block(&self, field: &str) -> Option<u64> {
        let hex = self.params.get(0)?.get(field)?.as_str()?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
    }

    /// The four-byte selector of [`Self::calldata`].
    pub fn selector(&self) -> Option<[u8; 4]> {
        let data = self.calldata()?;
        data.get(..4)?.try_into().ok()
    }
}

type Handler = dyn Fn(&RpcRequest) -> RpcReply + Send + Sync;

/// Serves JSON-RPC from a handler closure and records every request.
pub struct MockRpc {
    url: Url,
    requests: Arc<Mutex<Vec<RpcRequest>>>,
    server: JoinHandle<()>,
}

impl MockRpc {
    pub async fn spawn(handler: impl Fn(&RpcRequest) -> RpcReply + Send + Sync + 'static) -> Self {
        let handler: Arc<Handler> = Arc::new(handler);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let app = Router::new().route(
            "/",
            post(move |body: String| {
                let response = respond(&body, handler.as_ref(), &recorded);
                async move { response }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock rpc");
        let addr = listener.local_addr().expect("mock rpc address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock rpc server");
        });

        Self {
            url: format!("http://{addr}").parse().expect("mock rpc url"),
            requests,
            server,
        }
    }

    pub fn url(&self) -> Url {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<RpcRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received for `method`.
    pub fn count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|req| req.method == method)
            .count()
    }
}

impl Drop for MockRpc {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn respond(body: &str, handler: &Handler, recorded: &Mutex<Vec<RpcRequest>>) -> Response {
    let Ok(payload) = serde_json::from_str::<Value>(body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let calls = match payload {
        Value::Array(calls) => calls,
        single => vec![single],
    };

    let mut replies = Vec::with_capacity(calls.len());
    for call in &calls {
        let request = RpcRequest {
            method: call["method"].as_str().unwrap_or_default().to_string(),
            params: call.get("params").cloned().unwrap_or(Value::Null),
        };
        recorded.lock().push(request.clone());

        let id = call.get("id").cloned().unwrap_or(Value::Null);
        match handler(&request) {
            RpcReply::Result(result) => {
                replies.push(json!({"jsonrpc": "2.0", "id": id, "result": result}));
            }
            RpcReply::Error { code, message } => replies.push(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message},
            })),
            RpcReply::Status(status) => return status.into_response(),
        }
    }

    let body = if replies.len() == 1 && !body.trim_start().starts_with('[') {
        replies.swap_remove(0)
    } else {
        Value::Array(replies)
    };
    ([(header::CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}
