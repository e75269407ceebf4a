//! MCP-compatible JSON-RPC 2.0 server.
//!
//! Exposes the documentation retrieval tools over a single transport
//! method, `POST /mcp`, matching the teacher's Axum-based `server.rs` but
//! replacing its bespoke `/tools/*` REST routes with the spec's JSON-RPC
//! 2.0 control plane: `tools/list` enumerates the available tools,
//! `tools/call` dispatches to one of them by name.
//!
//! # Error Contract
//!
//! Responses follow JSON-RPC 2.0 exactly: a request either carries a
//! `result` or an `error` (never both). Error codes:
//!
//! | Code | Meaning |
//! |------|---------|
//! | `-32700` | Parse error — the request body was not valid JSON |
//! | `-32600` | Invalid request — missing/malformed JSON-RPC envelope |
//! | `-32601` | Method (or unknown tool name) not found |
//! | `-32602` | Invalid params — including an unknown `project` |
//! | `-32603` | Internal error |
//!
//! A degraded hybrid search (one of dense/lexical failed) is still a
//! *successful* response: the `result` carries `"degraded": true` rather
//! than an error, per §6 of the design.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, matching the teacher's
//! permissive CORS policy for browser-based and cross-origin MCP clients.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::ChunkType;
use crate::registry::Registry;
use crate::search::{HybridSearcher, SearchOptions};
use crate::text_store::TextStore;
use crate::vector_store::VectorStore;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    registry: Arc<Registry>,
    text_store: Arc<TextStore>,
    vector_store: Arc<VectorStore>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
}

/// Starts the MCP JSON-RPC server. Loads the Project Registry and runs
/// migrations once up front, then binds `[server].bind` and serves
/// `POST /mcp` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    crate::migrate::run_migrations(config).await?;

    let registry = Registry::load(&config.registry.config_root, &config.quality)?;
    let pool = crate::db::connect(config).await?;
    let text_store = TextStore::new(pool.clone());
    let vector_store = VectorStore::new(pool);
    let embedding_provider = embedding::create_provider(&config.embedding)?;

    let state = AppState {
        config: Arc::new(config.clone()),
        registry: Arc::new(registry),
        text_store: Arc::new(text_store),
        vector_store: Arc::new(vector_store),
        embedding_provider: Arc::from(embedding_provider),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/mcp", post(handle_mcp))
        .layer(cors)
        .with_state(state);

    info!(bind = %config.server.bind, "MCP server listening");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ JSON-RPC envelope ============

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorBody>,
}

#[derive(Serialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorBody { code, message: message.into() }),
        }
    }
}

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

#[instrument(skip(state, body))]
async fn handle_mcp(State(state): State<AppState>, body: Bytes) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => return Json(RpcResponse::err(Value::Null, PARSE_ERROR, format!("parse error: {err}"))),
    };

    let id = request.id.clone();

    let Some(jsonrpc) = &request.jsonrpc else {
        return Json(RpcResponse::err(id, INVALID_REQUEST, "missing \"jsonrpc\" field"));
    };
    if jsonrpc != "2.0" {
        return Json(RpcResponse::err(id, INVALID_REQUEST, "\"jsonrpc\" must be \"2.0\""));
    }
    let Some(method) = &request.method else {
        return Json(RpcResponse::err(id, INVALID_REQUEST, "missing \"method\" field"));
    };

    match method.as_str() {
        "tools/list" => Json(RpcResponse::ok(id, tools_list())),
        "tools/call" => match dispatch_tool_call(&state, request.params).await {
            Ok(result) => Json(RpcResponse::ok(id, result)),
            Err(err) => Json(RpcResponse::err(id, err.code, err.message)),
        },
        other => Json(RpcResponse::err(id, METHOD_NOT_FOUND, format!("unknown method: {other}"))),
    }
}

struct ToolError {
    code: i64,
    message: String,
}

impl ToolError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self { code: INVALID_PARAMS, message: message.into() }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self { code: METHOD_NOT_FOUND, message: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self { code: INTERNAL_ERROR, message: message.into() }
    }
}

// ============ tools/list ============

/// Static registry of the tools this core implements. Additional
/// prompt-shaping wrappers (`explain_concept`, `debug_helper`,
/// `resolve_import`, `get_pattern`, `validate_zkapp_code`) are out of core
/// scope per the design notes; the registry is open to them but none are
/// registered here.
fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "list_projects",
            "description": "Enumerate the configured documentation projects.",
            "inputSchema": { "type": "object", "properties": {}, "additionalProperties": false },
        }),
        json!({
            "name": "search_documentation",
            "description": "Hybrid dense+lexical search over a project's indexed documentation.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "project": { "type": "string" },
                    "k": { "type": "integer", "minimum": 1 },
                    "typeFilter": { "type": "array", "items": { "type": "string" } },
                },
                "required": ["query", "project"],
                "additionalProperties": false,
            },
        }),
        json!({
            "name": "get_code_examples",
            "description": "Search a project's documentation for code and worked examples on a topic.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "topic": { "type": "string" },
                    "project": { "type": "string" },
                    "k": { "type": "integer", "minimum": 1 },
                },
                "required": ["topic", "project"],
                "additionalProperties": false,
            },
        }),
        json!({
            "name": "get_api_signature",
            "description": "Look up API reference chunks for a symbol within a project.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "symbol": { "type": "string" },
                    "project": { "type": "string" },
                    "k": { "type": "integer", "minimum": 1 },
                },
                "required": ["symbol", "project"],
                "additionalProperties": false,
            },
        }),
    ]
}

fn tools_list() -> Value {
    json!({ "tools": tool_definitions() })
}

// ============ tools/call ============

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn dispatch_tool_call(state: &AppState, params: Value) -> Result<Value, ToolError> {
    let call: ToolCallParams = serde_json::from_value(params)
        .map_err(|err| ToolError::invalid_params(format!("invalid tools/call params: {err}")))?;

    match call.name.as_str() {
        "list_projects" => Ok(list_projects(state)),
        "search_documentation" => search_documentation(state, call.arguments).await,
        "get_code_examples" => get_code_examples(state, call.arguments).await,
        "get_api_signature" => get_api_signature(state, call.arguments).await,
        other => Err(ToolError::not_found(format!("unknown tool: {other}"))),
    }
}

fn list_projects(state: &AppState) -> Value {
    let mut projects: Vec<Value> = state
        .registry
        .list_projects()
        .into_iter()
        .map(|p| json!({ "id": p.id, "name": p.name }))
        .collect();
    projects.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    json!({ "projects": projects })
}

#[derive(Deserialize)]
struct SearchDocumentationArgs {
    query: String,
    project: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default, rename = "typeFilter")]
    type_filter: Option<Vec<String>>,
}

async fn search_documentation(state: &AppState, arguments: Value) -> Result<Value, ToolError> {
    let args: SearchDocumentationArgs = serde_json::from_value(arguments)
        .map_err(|err| ToolError::invalid_params(format!("invalid arguments: {err}")))?;

    let type_filter = match args.type_filter {
        Some(types) => Some(parse_type_filter(&types)?),
        None => None,
    };

    run_search(state, &args.query, &args.project, args.k, type_filter).await
}

#[derive(Deserialize)]
struct GetCodeExamplesArgs {
    topic: String,
    project: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn get_code_examples(state: &AppState, arguments: Value) -> Result<Value, ToolError> {
    let args: GetCodeExamplesArgs = serde_json::from_value(arguments)
        .map_err(|err| ToolError::invalid_params(format!("invalid arguments: {err}")))?;

    run_search(
        state,
        &args.topic,
        &args.project,
        args.k,
        Some(vec![ChunkType::Code, ChunkType::Example]),
    )
    .await
}

#[derive(Deserialize)]
struct GetApiSignatureArgs {
    symbol: String,
    project: String,
    #[serde(default)]
    k: Option<usize>,
}

async fn get_api_signature(state: &AppState, arguments: Value) -> Result<Value, ToolError> {
    let args: GetApiSignatureArgs = serde_json::from_value(arguments)
        .map_err(|err| ToolError::invalid_params(format!("invalid arguments: {err}")))?;

    run_search(
        state,
        &args.symbol,
        &args.project,
        args.k,
        Some(vec![ChunkType::ApiReference]),
    )
    .await
}

fn parse_type_filter(types: &[String]) -> Result<Vec<ChunkType>, ToolError> {
    types
        .iter()
        .map(|t| {
            ChunkType::parse(t).ok_or_else(|| ToolError::invalid_params(format!("unknown chunk type: {t}")))
        })
        .collect()
}

async fn run_search(
    state: &AppState,
    query: &str,
    project: &str,
    k: Option<usize>,
    type_filter: Option<Vec<ChunkType>>,
) -> Result<Value, ToolError> {
    if !state.registry.contains_project(project) {
        return Err(ToolError::invalid_params(format!("unknown project: {project}")));
    }

    let searcher = HybridSearcher {
        registry: state.registry.as_ref(),
        text_store: state.text_store.as_ref(),
        vector_store: state.vector_store.as_ref(),
        embedding_provider: state.embedding_provider.as_ref(),
        config: state.config.as_ref(),
    };

    let options = SearchOptions { k, type_filter, ..Default::default() };

    let response = searcher.search(query, project, options).await.map_err(|err| {
        let msg = err.to_string();
        if msg.contains("empty") || msg.contains("unknown project") {
            ToolError::invalid_params(msg)
        } else {
            warn!(error = %msg, "search_documentation failed");
            ToolError::internal(msg)
        }
    })?;

    let hits: Vec<Value> = response
        .hits
        .iter()
        .map(|hit| {
            json!({
                "chunkId": hit.chunk_id,
                "documentId": hit.document_id,
                "projectId": hit.project_id,
                "url": hit.url,
                "title": hit.title,
                "type": hit.chunk_type,
                "language": hit.language,
                "text": hit.text,
                "score": hit.score,
                "denseRank": hit.dense_rank,
                "lexicalRank": hit.lexical_rank,
            })
        })
        .collect();

    Ok(json!({ "hits": hits, "degraded": response.degraded }))
}
