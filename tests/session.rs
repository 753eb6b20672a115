//! End-to-end protocol tests: a client and the server talk over an
//! in-memory duplex stream, one full session per test.

use std::io;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use yarals::compiler::{CompileStatus, Compiler};
use yarals::rpc::Message;
use yarals::server::YaraLanguageServer;
use yarals::transport::{MessageReader, MessageWriter};

struct MockCompiler(CompileStatus);

impl Compiler for MockCompiler {
    fn compile(&self, _source: &str) -> io::Result<CompileStatus> {
        Ok(self.0.clone())
    }
}

struct TestClient {
    reader: MessageReader<ReadHalf<DuplexStream>>,
    writer: MessageWriter<WriteHalf<DuplexStream>>,
    next_id: i64,
}

impl TestClient {
    fn start<C: Compiler>(server: YaraLanguageServer<C>) -> (Self, JoinHandle<()>) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let server = Arc::new(server);
        let handle = tokio::spawn(async move {
            let (read, write) = tokio::io::split(server_side);
            server.handle_client(read, write).await;
        });
        let (read, write) = tokio::io::split(client_side);
        let client = Self {
            reader: MessageReader::new(read),
            writer: MessageWriter::new(write),
            next_id: 0,
        };
        (client, handle)
    }

    async fn request(&mut self, method: &str, params: Value) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.writer
            .write(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await
            .unwrap();
        id
    }

    async fn notify(&mut self, method: &str, params: Value) {
        self.writer
            .write(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Message {
        self.reader
            .read()
            .await
            .unwrap()
            .expect("server closed the stream")
    }

    /// Next reply carrying `id`, skipping interleaved notifications.
    async fn response(&mut self, id: i64) -> Message {
        loop {
            let message = self.recv().await;
            if message.id == Some(json!(id)) {
                return message;
            }
        }
    }

    /// Params of the next notification with the given method.
    async fn notification(&mut self, method: &str) -> Value {
        loop {
            let message = self.recv().await;
            if message.method.as_deref() == Some(method) {
                return message.params.unwrap_or(Value::Null);
            }
        }
    }

    async fn initialize(&mut self, capabilities: Value) -> Message {
        let id = self
            .request("initialize", json!({"capabilities": capabilities}))
            .await;
        self.response(id).await
    }

    /// Full handshake: initialize with every capability, then the
    /// `initialized` notification and its connection notice.
    async fn handshake(&mut self) {
        self.initialize(full_capabilities()).await;
        self.notify("initialized", json!({})).await;
        let notice = self.notification("window/showMessageRequest").await;
        assert_eq!(notice["message"], json!("Successfully connected"));
    }

    async fn open(&mut self, uri: &str, text: &str) {
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": {"uri": uri, "version": 1},
                "contentChanges": [{"text": text}]
            }),
        )
        .await;
    }
}

fn full_capabilities() -> Value {
    json!({
        "textDocument": {
            "completion": {"dynamicRegistration": true},
            "definition": {"dynamicRegistration": true},
            "hover": {"dynamicRegistration": true},
            "references": {"dynamicRegistration": true},
            "rename": {"dynamicRegistration": true},
            "synchronization": {"dynamicRegistration": true}
        },
        "workspace": {
            "executeCommand": {"dynamicRegistration": true}
        }
    })
}

fn server_without_compiler() -> YaraLanguageServer<MockCompiler> {
    YaraLanguageServer::new(None)
}

fn server_with(status: CompileStatus) -> YaraLanguageServer<MockCompiler> {
    YaraLanguageServer::new(Some(MockCompiler(status)))
}

const RULES: &str =
    "rule foo {\n  strings:\n    $a = \"x\"\n  condition:\n    $a and all of ($b*)\n}\n";

#[tokio::test]
async fn handshake_negotiates_all_requested_capabilities() {
    let (mut client, _server) = TestClient::start(server_with(CompileStatus::Success));
    let reply = client.initialize(full_capabilities()).await;
    let result = reply.result.expect("initialize result");

    assert_eq!(result["serverInfo"]["name"], json!("yarals"));
    let capabilities = &result["capabilities"];
    assert_eq!(
        capabilities["completionProvider"]["triggerCharacters"],
        json!(["."])
    );
    assert_eq!(capabilities["definitionProvider"], json!(true));
    assert_eq!(capabilities["referencesProvider"], json!(true));
    assert_eq!(capabilities["renameProvider"], json!(true));
    assert_eq!(
        capabilities["executeCommandProvider"]["commands"],
        json!(["compileRule", "compileAllRules"])
    );
}

#[tokio::test]
async fn completion_is_not_announced_without_dynamic_registration() {
    let (mut client, _server) = TestClient::start(server_with(CompileStatus::Success));
    let reply = client
        .initialize(json!({
            "textDocument": {
                "completion": {"dynamicRegistration": false},
                "definition": {"dynamicRegistration": true}
            }
        }))
        .await;
    let capabilities = &reply.result.expect("initialize result")["capabilities"];
    assert!(capabilities.get("completionProvider").is_none());
    assert_eq!(capabilities["definitionProvider"], json!(true));
}

#[tokio::test]
async fn requests_before_the_handshake_are_dropped() {
    let (mut client, _server) = TestClient::start(server_without_compiler());
    client
        .request(
            "textDocument/hover",
            json!({
                "textDocument": {"uri": "file:///open/a.yara"},
                "position": {"line": 0, "character": 0}
            }),
        )
        .await;
    // the first thing the server says is the initialize reply
    let reply = client.initialize(full_capabilities()).await;
    assert_eq!(reply.id, Some(json!(2)));
}

#[tokio::test]
async fn unknown_methods_are_silently_ignored() {
    let (mut client, _server) = TestClient::start(server_without_compiler());
    client.handshake().await;
    client.open("file:///open/a.yara", RULES).await;

    client
        .request("textDocument/formatting", json!({}))
        .await;
    let id = client
        .request(
            "textDocument/definition",
            json!({
                "textDocument": {"uri": "file:///open/a.yara"},
                "position": {"line": 4, "character": 5}
            }),
        )
        .await;
    let reply = client.response(id).await;
    assert!(reply.result.is_some());
}

#[tokio::test]
async fn navigation_features_answer_over_the_overlay() {
    let (mut client, _server) = TestClient::start(server_without_compiler());
    client.handshake().await;
    let uri = "file:///open/rules.yara";
    client.open(uri, RULES).await;

    let id = client
        .request(
            "textDocument/definition",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": 4, "character": 5}
            }),
        )
        .await;
    let locations = client.response(id).await.result.unwrap();
    assert_eq!(locations.as_array().unwrap().len(), 1);
    assert_eq!(locations[0]["range"]["start"], json!({"line": 2, "character": 5}));

    let id = client
        .request(
            "textDocument/references",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": 4, "character": 5},
                "context": {"includeDeclaration": true}
            }),
        )
        .await;
    let references = client.response(id).await.result.unwrap();
    assert_eq!(references.as_array().unwrap().len(), 2);

    let id = client
        .request(
            "textDocument/rename",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": 4, "character": 5},
                "newName": "swap"
            }),
        )
        .await;
    let edit = client.response(id).await.result.unwrap();
    let edits = &edit["changes"][uri];
    assert_eq!(edits.as_array().unwrap().len(), 2);
    assert_eq!(edits[0]["newText"], json!("swap"));

    let id = client
        .request(
            "textDocument/hover",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": 4, "character": 5}
            }),
        )
        .await;
    let hover = client.response(id).await.result.unwrap();
    assert_eq!(hover["contents"]["value"], json!("\"x\""));
}

#[tokio::test]
async fn completion_walks_the_module_schema() {
    let (mut client, _server) = TestClient::start(server_without_compiler());
    client.handshake().await;
    let uri = "file:///open/modules.yara";
    client
        .open(uri, "rule c {\n  condition:\n    cuckoo.\n}\n")
        .await;

    let id = client
        .request(
            "textDocument/completion",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": 2, "character": 11},
                "context": {"triggerKind": 2, "triggerCharacter": "."}
            }),
        )
        .await;
    let items = client.response(id).await.result.unwrap();
    let labels: Vec<&str> = items
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, ["filesystem", "network", "registry", "sync"]);
}

#[tokio::test]
async fn saving_without_compile_on_save_clears_diagnostics() {
    let (mut client, _server) = TestClient::start(server_with(CompileStatus::Failure(
        "line 1: would fail if compiled".into(),
    )));
    client.handshake().await;
    let uri = "file:///open/saved.yara";
    client.open(uri, RULES).await;

    client
        .notify("textDocument/didSave", json!({"textDocument": {"uri": uri}}))
        .await;
    let published = client.notification("textDocument/publishDiagnostics").await;
    assert_eq!(published["uri"], json!(uri));
    assert_eq!(published["diagnostics"], json!([]));
}

#[tokio::test]
async fn saving_with_compile_on_save_publishes_compiler_verdict() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "rule Bad {\n  condition: tru\n}\n").unwrap();
    let uri = lsp_types::Url::from_file_path(file.path()).unwrap();

    let (mut client, _server) = TestClient::start(server_with(CompileStatus::Failure(
        "line 2: undefined identifier \"tru\"".into(),
    )));
    client.handshake().await;
    client
        .notify(
            "workspace/didChangeConfiguration",
            json!({"settings": {"yara": {"compile_on_save": true}}}),
        )
        .await;

    client
        .notify(
            "textDocument/didSave",
            json!({"textDocument": {"uri": uri.as_str()}}),
        )
        .await;
    let published = client.notification("textDocument/publishDiagnostics").await;
    let diagnostics = published["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["severity"], json!(1));
    assert_eq!(diagnostics[0]["message"], json!("undefined identifier \"tru\""));
    assert_eq!(diagnostics[0]["range"]["start"]["line"], json!(1));
}

#[tokio::test]
async fn missing_compiler_warns_once_then_reports_clean() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "rule Ok { condition: true }\n").unwrap();
    let uri = lsp_types::Url::from_file_path(file.path()).unwrap();

    let (mut client, _server) = TestClient::start(server_without_compiler());
    client.handshake().await;
    client
        .notify(
            "workspace/didChangeConfiguration",
            json!({"settings": {"yara": {"compile_on_save": true}}}),
        )
        .await;

    client
        .notify(
            "textDocument/didSave",
            json!({"textDocument": {"uri": uri.as_str()}}),
        )
        .await;
    let warning = client.notification("window/showMessage").await;
    assert_eq!(warning["type"], json!(2));
    assert_eq!(
        warning["message"],
        json!("yarac is not installed. Diagnostics and Compile commands are disabled")
    );

    // later saves degrade to a silent clean verdict
    client
        .notify(
            "textDocument/didSave",
            json!({"textDocument": {"uri": uri.as_str()}}),
        )
        .await;
    let published = client.notification("textDocument/publishDiagnostics").await;
    assert_eq!(published["diagnostics"], json!([]));
}

#[tokio::test]
async fn compile_all_rules_publishes_per_document() {
    let (mut client, _server) = TestClient::start(server_with(CompileStatus::Failure(
        "line 1: syntax error".into(),
    )));
    client.handshake().await;
    client.open("file:///open/a.yara", "rule A {").await;
    client.open("file:///open/b.yara", "rule B {").await;

    let id = client
        .request(
            "workspace/executeCommand",
            json!({"command": "compileAllRules", "arguments": []}),
        )
        .await;
    // one notification per failing document, in uri order, then the reply
    let first = client.notification("textDocument/publishDiagnostics").await;
    assert_eq!(first["uri"], json!("file:///open/a.yara"));
    assert_eq!(first["diagnostics"].as_array().unwrap().len(), 1);
    let second = client.notification("textDocument/publishDiagnostics").await;
    assert_eq!(second["uri"], json!("file:///open/b.yara"));
    let reply = client.response(id).await;
    assert_eq!(reply.result, Some(Value::Null));
}

#[tokio::test]
async fn compile_rule_command_replies_without_compiling() {
    let (mut client, _server) = TestClient::start(server_with(CompileStatus::Failure(
        "line 1: never published".into(),
    )));
    client.handshake().await;
    client.open("file:///open/a.yara", "rule A {").await;

    let id = client
        .request(
            "workspace/executeCommand",
            json!({"command": "compileRule", "arguments": []}),
        )
        .await;
    let reply = client.response(id).await;
    assert_eq!(reply.result, Some(Value::Null));
}

#[tokio::test]
async fn feature_failures_name_the_failing_feature() {
    let (mut client, _server) = TestClient::start(server_without_compiler());
    client.handshake().await;
    let missing = "file:///open/never-opened.yara";

    client
        .request(
            "textDocument/completion",
            json!({
                "textDocument": {"uri": missing},
                "position": {"line": 0, "character": 0}
            }),
        )
        .await;
    let message = client.notification("window/showMessage").await;
    assert_eq!(message["type"], json!(1));
    assert!(message["message"]
        .as_str()
        .unwrap()
        .starts_with("Could not offer completion items"));

    client
        .request(
            "textDocument/definition",
            json!({
                "textDocument": {"uri": missing},
                "position": {"line": 0, "character": 0}
            }),
        )
        .await;
    let message = client.notification("window/showMessage").await;
    assert!(message["message"]
        .as_str()
        .unwrap()
        .starts_with("Could not offer definition"));

    client
        .request(
            "textDocument/documentHighlight",
            json!({
                "textDocument": {"uri": missing},
                "position": {"line": 0, "character": 0}
            }),
        )
        .await;
    let message = client.notification("window/showMessage").await;
    assert!(message["message"]
        .as_str()
        .unwrap()
        .starts_with("Could not offer code highlighting"));
}

#[tokio::test]
async fn shutdown_clears_the_overlay_but_keeps_serving() {
    let (mut client, _server) = TestClient::start(server_without_compiler());
    client.handshake().await;
    let uri = "file:///open/gone-after-shutdown.yara";
    client.open(uri, RULES).await;

    let id = client.request("shutdown", json!(null)).await;
    let reply = client.response(id).await;
    assert_eq!(reply.result, Some(json!({})));

    // the overlay entry is gone and the uri has no on-disk backing, so the
    // request fails with a message instead of a reply
    client
        .request(
            "textDocument/definition",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": 4, "character": 5}
            }),
        )
        .await;
    let message = client.notification("window/showMessage").await;
    assert_eq!(message["type"], json!(1));
    assert!(message["message"]
        .as_str()
        .unwrap()
        .contains("gone-after-shutdown"));
}

#[tokio::test]
async fn exit_terminates_the_connection() {
    let (mut client, server) = TestClient::start(server_without_compiler());
    client.handshake().await;
    client.notify("exit", json!(null)).await;
    server.await.unwrap();
    assert!(client.reader.read().await.unwrap().is_none());
}
