//! MCP server: JSON-RPC 2.0 over newline-delimited stdio.
//!
//! Protocol methods are answered inline. Each `tools/call` runs on its own
//! worker thread so a slow store call never holds up the next request;
//! responses are written as they complete and matched by id. At most
//! [`DEFAULT_MAX_IN_FLIGHT`] calls run at once; further input waits for a
//! worker to finish.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::dispatch::{Dispatcher, ToolCall};
use crate::error::{McpError, Result};

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Default cap on concurrently running tool calls.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Standard MCP methods
pub mod methods {
    /// Handshake
    pub const INITIALIZE: &str = "initialize";
    /// Liveness check
    pub const PING: &str = "ping";
    /// Tool listing
    pub const LIST_TOOLS: &str = "tools/list";
    /// Tool invocation
    pub const CALL_TOOL: &str = "tools/call";
    /// Prefix of client notifications, which get no response
    pub const NOTIFICATION_PREFIX: &str = "notifications/";
}

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request id; absent for notifications
    #[serde(default)]
    pub id: Option<JsonValue>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: JsonValue,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
}

/// JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Id of the request being answered
    pub id: JsonValue,
    /// Success result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    /// Failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: JsonValue, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// What to do with one decoded request.
enum Route {
    Reply(JsonRpcResponse),
    Call(JsonValue, ToolCall),
    Ignore,
}

/// MCP server over a [`Dispatcher`].
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    max_in_flight: usize,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Cap the number of tool calls running at once (minimum 1).
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Serve stdin/stdout until EOF.
    pub fn run_sync(&self) -> Result<()> {
        let stdin = std::io::stdin();
        self.run(BufReader::new(stdin.lock()), std::io::stdout())?;
        Ok(())
    }

    /// Serve requests from `reader`, writing responses to `writer`.
    ///
    /// Returns the writer once input is exhausted and every in-flight tool
    /// call has answered.
    pub fn run<R, W>(&self, reader: R, writer: W) -> Result<W>
    where
        R: BufRead,
        W: Write + Send + 'static,
    {
        let writer = Arc::new(Mutex::new(writer));
        let mut workers: VecDeque<JoinHandle<()>> = VecDeque::new();

        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match self.route(trimmed) {
                Route::Reply(response) => write_response(&writer, &response)?,
                Route::Ignore => {}
                Route::Call(id, call) => {
                    let (done, running): (VecDeque<_>, VecDeque<_>) =
                        workers.drain(..).partition(|w| w.is_finished());
                    workers = running;
                    done.into_iter().for_each(join_worker);
                    while workers.len() >= self.max_in_flight {
                        if let Some(oldest) = workers.pop_front() {
                            join_worker(oldest);
                        }
                    }
                    match self.spawn_worker(id.clone(), call, &writer) {
                        Ok(handle) => workers.push_back(handle),
                        Err(e) => {
                            tracing::error!("failed to start tool worker: {}", e);
                            write_response(&writer, &spawn_failure(id, &e))?;
                        }
                    }
                }
            }
        }

        for worker in workers {
            join_worker(worker);
        }

        Arc::try_unwrap(writer)
            .map(Mutex::into_inner)
            .map_err(|_| McpError::Internal("response writer still shared".to_string()))
    }

    fn spawn_worker<W>(
        &self,
        id: JsonValue,
        call: ToolCall,
        writer: &Arc<Mutex<W>>,
    ) -> io::Result<JoinHandle<()>>
    where
        W: Write + Send + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        let writer = Arc::clone(writer);
        std::thread::Builder::new()
            .name(format!("tool-{}", call.name))
            .spawn(move || {
                let result = dispatcher.invoke(call);
                let response = JsonRpcResponse::success(id, result.to_json());
                if let Err(e) = write_response(&writer, &response) {
                    tracing::error!("failed to write response: {}", e);
                }
            })
    }

    fn route(&self, line: &str) -> Route {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                return Route::Reply(JsonRpcResponse::error(
                    JsonValue::Null,
                    -32700,
                    format!("Parse error: {}", e),
                ))
            }
        };

        let Some(id) = request.id else {
            tracing::debug!(method = %request.method, "notification");
            return Route::Ignore;
        };
        if request.method.starts_with(methods::NOTIFICATION_PREFIX) {
            return Route::Ignore;
        }

        match request.method.as_str() {
            methods::INITIALIZE => Route::Reply(JsonRpcResponse::success(
                id,
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": {
                        "name": "cosmos-mcp",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )),
            methods::PING => Route::Reply(JsonRpcResponse::success(id, serde_json::json!({}))),
            methods::LIST_TOOLS => Route::Reply(JsonRpcResponse::success(
                id,
                serde_json::json!({ "tools": self.dispatcher.tools() }),
            )),
            methods::CALL_TOOL => match serde_json::from_value::<ToolCall>(request.params) {
                Ok(call) => Route::Call(id, call),
                Err(e) => Route::Reply(JsonRpcResponse::error(
                    id,
                    -32602,
                    format!("Invalid params: {}", e),
                )),
            },
            other => Route::Reply(JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", other),
            )),
        }
    }
}

fn join_worker(worker: JoinHandle<()>) {
    if worker.join().is_err() {
        tracing::error!("tool worker thread panicked");
    }
}

/// Answer for a call whose worker could not be started.
fn spawn_failure(id: JsonValue, err: &io::Error) -> JsonRpcResponse {
    JsonRpcResponse::error(
        id,
        -32603,
        format!("Internal error: failed to start tool worker: {}", err),
    )
}

fn write_response<W: Write>(writer: &Mutex<W>, response: &JsonRpcResponse) -> Result<()> {
    let json = serde_json::to_string(response)?;
    let mut out = writer.lock();
    writeln!(out, "{}", json)?;
    out.flush()?;
    Ok(())
}
