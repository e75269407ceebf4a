use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;

use tempfile::TempDir;

fn ctx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ctx");
    path
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct TestEnv {
    _tmp: TempDir,
    config_path: PathBuf,
    files_dir: PathBuf,
    bind_addr: String,
}

fn setup_test_env() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_root = root.join("registry");
    fs::create_dir_all(config_root.join("projects")).unwrap();
    fs::create_dir_all(config_root.join("sources")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    )
    .unwrap();

    fs::write(
        config_root.join("projects/demo.json"),
        r#"{"id": "demo", "name": "Demo Project"}"#,
    )
    .unwrap();
    fs::write(
        config_root.join("sources/demo-docs.json"),
        format!(
            r#"{{"kind": "local-markdown", "id": "demo-docs", "project_id": "demo", "root": "{}", "url_prefix": "demo"}}"#,
            files_dir.display().to_string().replace('\\', "\\\\")
        ),
    )
    .unwrap();
    fs::write(
        config_root.join("mapping.json"),
        r#"{"projects": [{"project_id": "demo", "source_ids": ["demo-docs"]}]}"#,
    )
    .unwrap();

    let bind_addr = format!("127.0.0.1:{}", free_port());

    let config_content = format!(
        r#"[db]
path = "{db}/data.sqlite"

[server]
bind = "{bind}"

[registry]
config_root = "{registry}"
"#,
        db = root.display(),
        bind = bind_addr,
        registry = config_root.display(),
    );

    let config_path = root.join("ctx.toml");
    fs::write(&config_path, config_content).unwrap();

    TestEnv { _tmp: tmp, config_path, files_dir, bind_addr }
}

fn run_ctx(config_path: &Path, args: &[&str]) -> (String, String, i32) {
    let binary = ctx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ctx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code().unwrap_or(-1))
}

#[test]
fn test_index_list_prints_registered_projects() {
    let env = setup_test_env();
    let (stdout, _stderr, code) = run_ctx(&env.config_path, &["index", "--list"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("demo"), "expected project listing, got: {stdout}");
}

#[test]
fn test_index_requires_project_or_list() {
    let env = setup_test_env();
    let (_stdout, stderr, code) = run_ctx(&env.config_path, &["index"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("--project"), "got: {stderr}");
}

#[test]
fn test_index_rejects_list_and_project_together() {
    let env = setup_test_env();
    let (_stdout, stderr, code) = run_ctx(&env.config_path, &["index", "--list", "--project", "demo"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("mutually exclusive"), "got: {stderr}");
}

#[test]
fn test_index_rejects_unknown_project() {
    let env = setup_test_env();
    let (_stdout, stderr, code) = run_ctx(&env.config_path, &["index", "--project", "nonexistent"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown project"), "got: {stderr}");
}

#[test]
fn test_index_rejects_unknown_source() {
    let env = setup_test_env();
    let (_stdout, stderr, code) =
        run_ctx(&env.config_path, &["index", "--project", "demo", "--source", "nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown source"), "got: {stderr}");
}

#[test]
fn test_index_dry_run_reports_without_writing() {
    let env = setup_test_env();
    let (stdout, _stderr, code) = run_ctx(&env.config_path, &["index", "--project", "demo", "--dry-run"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("dry-run"), "got: {stdout}");
    assert!(stdout.contains("demo-docs"), "got: {stdout}");

    // dry-run never touches the database.
    let db_path = env.config_path.parent().unwrap().join("data.sqlite");
    assert!(!db_path.exists(), "dry-run must not create the database");
}

#[test]
fn test_index_runs_and_reports_succeeded() {
    let env = setup_test_env();
    let (stdout, _stderr, code) = run_ctx(&env.config_path, &["index", "--project", "demo"]);
    assert_eq!(code, 0, "stdout={stdout}");
    assert!(stdout.contains("demo-docs"), "got: {stdout}");
    assert!(stdout.contains("succeeded"), "got: {stdout}");
    assert!(stdout.contains("changed=2"), "expected 2 documents changed, got: {stdout}");
}

#[test]
fn test_index_second_run_is_incremental_noop() {
    let env = setup_test_env();
    run_ctx(&env.config_path, &["index", "--project", "demo"]);
    let (stdout, _stderr, code) = run_ctx(&env.config_path, &["index", "--project", "demo"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("changed=0"), "expected no-op rerun, got: {stdout}");
}

#[test]
fn test_index_resume_after_edit_reindexes_only_changed_document() {
    let env = setup_test_env();
    run_ctx(&env.config_path, &["index", "--project", "demo"]);

    std::thread::sleep(Duration::from_millis(50));
    fs::write(
        env.files_dir.join("alpha.md"),
        "# Alpha Document Updated\n\nThis file was modified for the test.",
    )
    .unwrap();

    let (stdout, _stderr, code) = run_ctx(&env.config_path, &["index", "--project", "demo", "--resume"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("changed=1"), "expected exactly one changed document, got: {stdout}");
}

// ============ MCP JSON-RPC server ============

struct ServerHandle {
    child: Child,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_server(env: &TestEnv) -> ServerHandle {
    let binary = ctx_binary();
    let child = Command::new(&binary)
        .arg("--config")
        .arg(&env.config_path)
        .arg("serve")
        .spawn()
        .expect("failed to spawn ctx serve");

    wait_for_port(&env.bind_addr);
    ServerHandle { child }
}

fn wait_for_port(addr: &str) {
    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("server at {addr} never came up");
}

fn rpc(addr: &str, body: serde_json::Value) -> serde_json::Value {
    let client = reqwest::blocking::Client::new();
    client
        .post(format!("http://{addr}/mcp"))
        .json(&body)
        .send()
        .expect("request failed")
        .json()
        .expect("response was not JSON")
}

fn rpc_raw(addr: &str, body: &str) -> serde_json::Value {
    let client = reqwest::blocking::Client::new();
    client
        .post(format!("http://{addr}/mcp"))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .expect("request failed")
        .json()
        .expect("response was not JSON")
}

#[test]
fn test_mcp_tools_list_enumerates_core_tools() {
    let env = setup_test_env();
    let _server = spawn_server(&env);

    let resp = rpc(
        &env.bind_addr,
        serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
    );
    let names: Vec<&str> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"list_projects"));
    assert!(names.contains(&"search_documentation"));
    assert!(names.contains(&"get_code_examples"));
    assert!(names.contains(&"get_api_signature"));
}

#[test]
fn test_mcp_list_projects_tool_call() {
    let env = setup_test_env();
    let _server = spawn_server(&env);

    let resp = rpc(
        &env.bind_addr,
        serde_json::json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "list_projects", "arguments": {}}
        }),
    );
    let projects = resp["result"]["projects"].as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["id"], "demo");
}

#[test]
fn test_mcp_search_documentation_returns_hits_after_indexing() {
    let env = setup_test_env();
    run_ctx(&env.config_path, &["index", "--project", "demo"]);
    let _server = spawn_server(&env);

    let resp = rpc(
        &env.bind_addr,
        serde_json::json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {
                "name": "search_documentation",
                "arguments": {"query": "Rust programming", "project": "demo"}
            }
        }),
    );
    let hits = resp["result"]["hits"].as_array().unwrap();
    assert!(!hits.is_empty(), "expected at least one hit, got: {resp}");
    assert_eq!(resp["result"]["degraded"], false);
}

#[test]
fn test_mcp_search_documentation_unknown_project_is_invalid_params() {
    let env = setup_test_env();
    let _server = spawn_server(&env);

    let resp = rpc(
        &env.bind_addr,
        serde_json::json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": {
                "name": "search_documentation",
                "arguments": {"query": "anything", "project": "nonexistent"}
            }
        }),
    );
    assert_eq!(resp["error"]["code"], -32602);
}

#[test]
fn test_mcp_unknown_method_is_method_not_found() {
    let env = setup_test_env();
    let _server = spawn_server(&env);

    let resp = rpc(&env.bind_addr, serde_json::json!({"jsonrpc": "2.0", "id": 5, "method": "nope"}));
    assert_eq!(resp["error"]["code"], -32601);
}

#[test]
fn test_mcp_unknown_tool_is_method_not_found() {
    let env = setup_test_env();
    let _server = spawn_server(&env);

    let resp = rpc(
        &env.bind_addr,
        serde_json::json!({
            "jsonrpc": "2.0", "id": 6, "method": "tools/call",
            "params": {"name": "nonexistent_tool", "arguments": {}}
        }),
    );
    assert_eq!(resp["error"]["code"], -32601);
}

#[test]
fn test_mcp_malformed_json_is_parse_error() {
    let env = setup_test_env();
    let _server = spawn_server(&env);

    let resp = rpc_raw(&env.bind_addr, "{ not json");
    assert_eq!(resp["error"]["code"], -32700);
}

#[test]
fn test_mcp_missing_jsonrpc_field_is_invalid_request() {
    let env = setup_test_env();
    let _server = spawn_server(&env);

    let resp = rpc(&env.bind_addr, serde_json::json!({"id": 7, "method": "tools/list"}));
    assert_eq!(resp["error"]["code"], -32600);
}
