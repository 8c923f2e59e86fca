//! Built-in `minimal` tool with no external dependencies

use serde_json::{json, Value};

use gateway_protocol::MethodDescriptor;

use super::provider::{Tool, ToolError};

pub const MINIMAL_TOOL: &str = "minimal";

pub fn minimal_tool() -> Tool {
    Tool::builder(
        MINIMAL_TOOL,
        "Provides basic functionality without external dependencies",
        "1.0.0",
    )
    .method(
        MethodDescriptor::new("get_current_time", "Get current date and time")
            .with_returns(json!({"type": "string", "description": "Current date and time"})),
        |_| async { Ok(json!(chrono::Local::now().to_rfc3339())) },
    )
    .method(
        MethodDescriptor::new("get_platform_info", "Get platform information")
            .with_returns(json!({"type": "object", "description": "Platform information"})),
        |_| async { Ok(platform_info()) },
    )
    .method(
        MethodDescriptor::new("echo", "Echo back the input")
            .with_parameters(json!({
                "text": {"type": "string", "description": "Text to echo"}
            }))
            .with_returns(json!({
                "type": "string",
                "description": "The same text that was input"
            })),
        |args| async move { echo(&args) },
    )
    .build()
}

fn platform_info() -> Value {
    json!({
        "system": std::env::consts::OS,
        "family": std::env::consts::FAMILY,
        "machine": std::env::consts::ARCH,
        "server_version": env!("CARGO_PKG_VERSION"),
    })
}

fn echo(args: &Value) -> Result<Value, ToolError> {
    match args.get("text") {
        Some(Value::String(text)) => Ok(Value::String(text.clone())),
        Some(_) => Err(ToolError::invalid_arguments("'text' must be a string")),
        None => Err(ToolError::invalid_arguments("missing required argument 'text'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolHandle;

    #[test]
    fn test_descriptor() {
        let tool = minimal_tool();
        let descriptor = tool.descriptor();
        assert_eq!(descriptor.name, "minimal");
        assert_eq!(descriptor.version, "1.0.0");
        let methods: Vec<&str> = descriptor.methods.keys().map(String::as_str).collect();
        assert_eq!(methods, vec!["echo", "get_current_time", "get_platform_info"]);
        assert!(descriptor.methods["echo"].parameter_schema["text"].is_object());
    }

    #[tokio::test]
    async fn test_echo() {
        let tool = minimal_tool();
        let result = tool.invoke("echo", json!({"text": "hello"})).await;
        assert_eq!(result, Ok(json!("hello")));
    }

    #[tokio::test]
    async fn test_echo_requires_text() {
        let tool = minimal_tool();
        let err = tool.invoke("echo", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("text"));

        let err = tool.invoke("echo", json!({"text": 5})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_current_time_is_rfc3339() {
        let tool = minimal_tool();
        let value = tool.invoke("get_current_time", json!({})).await.unwrap();
        let text = value.as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(text).is_ok());
    }

    #[tokio::test]
    async fn test_platform_info() {
        let tool = minimal_tool();
        let value = tool.invoke("get_platform_info", json!({})).await.unwrap();
        assert_eq!(value["system"], std::env::consts::OS);
        assert!(value["machine"].is_string());
    }
}
