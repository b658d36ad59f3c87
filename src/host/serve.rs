//! JSON-lines tool invocation loop

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::Instrument;

use crate::dispatch::ToolDispatcher;
use crate::tracing::ErrorTraceExt;
use crate::types::{ErrorCode, ToolError};

/// Serve invocations from `reader` until EOF
///
/// Each non-blank line is one `{type, ...}` invocation; an optional `id` is
/// echoed back on the response. Invocations are handled one at a time and
/// every line gets exactly one response line, including lines that are not
/// valid UTF-8.
pub async fn serve<R, W>(dispatcher: &ToolDispatcher, mut reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let mut handled = 0u64;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                handle_line(dispatcher, line).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invocation is not valid UTF-8");
                error_response(
                    None,
                    ErrorCode::ParseError.code(),
                    format!("Invalid UTF-8 in input line: {e}"),
                )
            }
        };
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
        handled += 1;
    }

    tracing::info!(handled, "Input closed");
    Ok(())
}

async fn handle_line(dispatcher: &ToolDispatcher, line: &str) -> Value {
    let mut request: Value = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Unparsable invocation");
            return error_response(None, ErrorCode::ParseError.code(), format!("Invalid JSON: {e}"));
        }
    };

    let id = request.as_object_mut().and_then(|fields| fields.remove("id"));
    let tool = request
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let span = tracing::info_span!("tool_invocation", tool = %tool);

    match dispatcher.dispatch(request).instrument(span).await {
        Ok(result) => result_response(&result, id),
        Err(error) => {
            error.trace_error();
            error_response(id, error.error_code().code(), error.to_string())
        }
    }
}

fn result_response<T: Serialize>(result: &T, id: Option<Value>) -> Value {
    match serde_json::to_value(result) {
        Ok(mut value) => {
            if let (Some(id), Some(fields)) = (id, value.as_object_mut()) {
                fields.insert("id".to_string(), id);
            }
            value
        }
        Err(e) => {
            let error = ToolError::from(e);
            error.trace_error();
            error_response(id, error.error_code().code(), error.to_string())
        }
    }
}

fn error_response(id: Option<Value>, code: i32, message: String) -> Value {
    let mut response = json!({
        "error": {
            "code": code,
            "message": message,
        }
    });
    if let (Some(id), Some(fields)) = (id, response.as_object_mut()) {
        fields.insert("id".to_string(), id);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{StdioLauncher, ToolServerRegistry};
    use crate::process::CommandExecutionEngine;
    use crate::types::ExecutionConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir) -> ToolDispatcher {
        ToolDispatcher::new(
            dir.path(),
            Arc::new(CommandExecutionEngine::new(ExecutionConfig::default())),
            Arc::new(ToolServerRegistry::new(Arc::new(StdioLauncher::new()))),
            Vec::new(),
        )
    }

    async fn run(dispatcher: &ToolDispatcher, input: &str) -> Vec<Value> {
        run_bytes(dispatcher, input.as_bytes()).await
    }

    async fn run_bytes(dispatcher: &ToolDispatcher, input: &[u8]) -> Vec<Value> {
        let mut output = Vec::new();
        serve(dispatcher, input, &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_line() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "remember").unwrap();
        let dispatcher = dispatcher(&dir);

        let input = concat!(
            r#"{"id": 1, "type": "read_file", "path": "notes.txt"}"#,
            "\n\n",
            "not json\n",
            r#"{"id": "b", "type": "teleport"}"#,
            "\n",
        );
        let responses = run(&dispatcher, input).await;

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["content"], "remember");
        assert_eq!(responses[0]["status"], "success");

        assert_eq!(responses[1]["error"]["code"], ErrorCode::ParseError.code());
        assert!(responses[1].get("id").is_none());

        assert_eq!(responses[2]["id"], "b");
        assert_eq!(responses[2]["error"]["code"], ErrorCode::UnknownTool.code());
        assert!(
            responses[2]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("teleport")
        );
    }

    #[tokio::test]
    async fn test_invalid_input_is_reported() {
        let dir = TempDir::new().unwrap();
        let responses = run(
            &dispatcher(&dir),
            "{\"type\": \"execute_command\", \"input\": \"y\"}\n",
        )
        .await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], ErrorCode::InvalidParams.code());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let dir = TempDir::new().unwrap();
        assert!(run(&dispatcher(&dir), "").await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_the_loop() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "still here").unwrap();

        let mut input = b"{\"id\": 1, \"type\": \"x\xff\"}\n".to_vec();
        input.extend_from_slice(br#"{"id": 2, "type": "read_file", "path": "notes.txt"}"#);
        input.push(b'\n');
        let responses = run_bytes(&dispatcher(&dir), &input).await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], ErrorCode::ParseError.code());
        assert!(
            responses[0]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("UTF-8")
        );
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["content"], "still here");
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let dir = TempDir::new().unwrap();
        let responses = run(&dispatcher(&dir), r#"{"id": 7, "type": "teleport"}"#).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 7);
    }

    #[test]
    fn test_serialization_failure_keeps_id() {
        let mut unencodable = std::collections::HashMap::new();
        unencodable.insert((1, 2), "non-string key");

        let response = result_response(&unencodable, Some(json!("req-9")));
        assert_eq!(response["id"], "req-9");
        assert!(response["error"]["code"].is_i64());

        let response = result_response(&json!({"status": "success"}), Some(json!(3)));
        assert_eq!(response["id"], 3);
        assert_eq!(response["status"], "success");
    }
}
