//! A tiny scripted language server for tests and demos.
//!
//! Speaks the same framing as real servers over stdin/stdout. Every line of a
//! synced document that contains `error` or `warn` produces a diagnostic.

use anyhow::Result;
use bitcode_lsp::codec::{FrameReader, FrameWriter};
use bitcode_lsp::message::{Message, Request, RequestId, ResponseError};
use serde_json::{Value, json};
use tokio::io::{Stdout, stdin, stdout};

struct MockServer {
    writer: FrameWriter<Stdout>,
}

impl MockServer {
    async fn send(&mut self, msg: Message) -> Result<()> {
        self.writer.write_message(&msg).await?;
        Ok(())
    }

    async fn handle_request(&mut self, req: Request) -> Result<()> {
        let params = req.params.unwrap_or(Value::Null);
        let outcome = match req.method.as_str() {
            "initialize" => Ok(json!({
                "capabilities": {
                    "textDocumentSync": 1,
                    "hoverProvider": true,
                    "completionProvider": { "triggerCharacters": ["."] },
                    "codeActionProvider": true
                },
                "serverInfo": { "name": "bitcode-mock-lsp", "version": env!("CARGO_PKG_VERSION") }
            })),
            "textDocument/hover" => {
                let pos = &params["position"];
                Ok(json!({
                    "contents": {
                        "kind": "markdown",
                        "value": format!("hover at {}:{}", pos["line"], pos["character"])
                    }
                }))
            }
            "textDocument/completion" => Ok(json!({
                "isIncomplete": false,
                "items": [
                    { "label": "mock_item", "kind": 3, "detail": "fn mock_item()" },
                    { "label": "mock_value", "kind": 6 }
                ]
            })),
            "textDocument/codeAction" => {
                let actions: Vec<Value> = params["context"]["diagnostics"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|d| json!({ "title": format!("Fix: {}", d["message"].as_str().unwrap_or("")), "kind": "quickfix" }))
                    .collect();
                Ok(Value::Array(actions))
            }
            "shutdown" => Ok(Value::Null),
            other => Err(ResponseError::method_not_found(other)),
        };
        self.send(Message::response(req.id, outcome)).await
    }

    async fn handle_notification(&mut self, method: &str, params: Value) -> Result<bool> {
        match method {
            "initialized" => {
                // Exercise the client's answers to server-initiated requests.
                self.send(Message::Request(Request {
                    id: RequestId::String("cfg-1".into()),
                    method: "workspace/configuration".into(),
                    params: Some(json!({ "items": [{ "section": "mock" }] })),
                }))
                .await?;
            }
            "textDocument/didOpen" => {
                let doc = &params["textDocument"];
                self.publish(doc["uri"].clone(), &doc["version"], doc["text"].as_str().unwrap_or(""))
                    .await?;
            }
            "textDocument/didChange" => {
                let doc = &params["textDocument"];
                let text = params["contentChanges"][0]["text"].as_str().unwrap_or("");
                self.publish(doc["uri"].clone(), &doc["version"], text).await?;
            }
            "exit" => return Ok(false),
            _ => {}
        }
        Ok(true)
    }

    async fn publish(&mut self, uri: Value, version: &Value, text: &str) -> Result<()> {
        let diagnostics: Vec<Value> = text
            .lines()
            .enumerate()
            .filter_map(|(line, content)| {
                let (severity, what) = if let Some(col) = content.find("error") {
                    (1, col)
                } else {
                    (2, content.find("warn")?)
                };
                Some(json!({
                    "range": {
                        "start": { "line": line, "character": what },
                        "end": { "line": line, "character": content.len() }
                    },
                    "severity": severity,
                    "source": "mock",
                    "message": format!("line {} mentions {}", line + 1, if severity == 1 { "error" } else { "warn" })
                }))
            })
            .collect();

        let pushed_actions: Vec<Value> = diagnostics
            .iter()
            .map(|d| json!({ "title": format!("Quick fix: {}", d["message"].as_str().unwrap_or("")) }))
            .collect();
        let any = !diagnostics.is_empty();

        self.send(Message::notification(
            "textDocument/publishDiagnostics",
            Some(json!({ "uri": uri, "version": version, "diagnostics": diagnostics })),
        ))
        .await?;
        if any {
            self.send(Message::notification(
                "textDocument/codeAction",
                Some(json!({ "uri": uri, "actions": pushed_actions })),
            ))
            .await?;
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    eprintln!("bitcode-mock-lsp: ready");
    let mut reader = FrameReader::new(stdin());
    let mut server = MockServer {
        writer: FrameWriter::new(stdout()),
    };

    loop {
        let msg = match reader.read_message().await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) if e.is_recoverable() => {
                eprintln!("bitcode-mock-lsp: skipping bad frame: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        match msg {
            Message::Request(req) => server.handle_request(req).await?,
            Message::Notification(n) => {
                if !server
                    .handle_notification(&n.method, n.params.unwrap_or(Value::Null))
                    .await?
                {
                    break;
                }
            }
            Message::Response(resp) => eprintln!("bitcode-mock-lsp: client answered {}", resp.id),
        }
    }
    eprintln!("bitcode-mock-lsp: bye");
    Ok(())
}
