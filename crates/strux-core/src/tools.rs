use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ExtractError;
use crate::schema::FunctionDefinition;
use crate::types::{ToolResult, ToolUse};

/// A tool invocation surfaced to the caller: the model's request paired with
/// the execution result when a registered executor resolved it, or `None`
/// when execution is owned by the caller.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub request: ToolUse,
    pub result: Option<ToolResult>,
}

/// Executes one tool invocation on behalf of the pipeline
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<String, ExtractError>;
}

/// Synchronous function wrapped as a tool executor
struct FnExecutor {
    f: Arc<dyn Fn(Value) -> Result<String, ExtractError> + Send + Sync>,
}

#[async_trait::async_trait]
impl ToolExecutor for FnExecutor {
    async fn call(&self, arguments: Value) -> Result<String, ExtractError> {
        (self.f)(arguments)
    }
}

/// A declared tool, with an executor when the pipeline owns its execution
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: FunctionDefinition,
    pub executor: Option<Arc<dyn ToolExecutor>>,
}

/// The set of tools offered to the model on non-tool-call-mode requests.
///
/// Declaration order is preserved for the outbound request; lookup by name
/// drives resolution when the model calls one.
#[derive(Clone, Default)]
pub struct ToolSet {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool the pipeline executes itself
    pub fn register(&mut self, definition: FunctionDefinition, executor: Arc<dyn ToolExecutor>) {
        self.insert(definition, Some(executor));
    }

    /// Register a synchronous function tool
    pub fn register_fn(
        &mut self,
        definition: FunctionDefinition,
        f: impl Fn(Value) -> Result<String, ExtractError> + Send + Sync + 'static,
    ) {
        self.register(definition, Arc::new(FnExecutor { f: Arc::new(f) }));
    }

    /// Declare a tool whose execution the caller owns; the pipeline will
    /// surface its invocations unresolved
    pub fn declare(&mut self, definition: FunctionDefinition) {
        self.insert(definition, None);
    }

    fn insert(&mut self, definition: FunctionDefinition, executor: Option<Arc<dyn ToolExecutor>>) {
        let name = definition.name.clone();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                executor,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Declarations in registration order
    pub fn definitions(&self) -> Vec<FunctionDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolve one tool invocation into its result message content.
    ///
    /// Executor failures and malformed arguments become error-flagged
    /// results rather than pipeline failures; an unregistered name yields
    /// `None` so the caller can decide whether to surface the request.
    pub async fn resolve(&self, request: &ToolUse) -> Option<ToolResult> {
        let tool = self.get(&request.name)?;
        let executor = tool.executor.as_ref()?;

        let outcome = match serde_json::from_str::<Value>(&request.arguments) {
            Ok(arguments) => executor.call(arguments).await,
            Err(e) => Err(ExtractError::decode(
                format!("error parsing tool arguments: {e}"),
                request.arguments.clone(),
            )),
        };
        let (content, is_error) = match outcome {
            Ok(content) => (content, false),
            Err(e) => (format!("tool call error: {e}"), true),
        };
        Some(ToolResult {
            id: request.id.clone(),
            name: request.name.clone(),
            content,
            is_error,
        })
    }

    /// Error-flagged result for a tool the model named but nobody declared
    pub fn unknown_tool_result(request: &ToolUse) -> ToolResult {
        ToolResult {
            id: request.id.clone(),
            name: request.name.clone(),
            content: format!("unknown tool: {}", request.name),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup_definition() -> FunctionDefinition {
        FunctionDefinition {
            name: "lookup".into(),
            description: "Look something up".into(),
            parameters: json!({
                "type": "object",
                "properties": { "q": { "type": "string" } },
                "required": ["q"],
            }),
        }
    }

    #[tokio::test]
    async fn resolve_runs_the_executor() {
        let mut tools = ToolSet::new();
        tools.register_fn(lookup_definition(), |args| {
            Ok(format!("results for {}", args["q"].as_str().unwrap_or("?")))
        });

        let request = ToolUse {
            id: "call_1".into(),
            name: "lookup".into(),
            arguments: r#"{"q":"rust"}"#.into(),
        };
        let result = tools.resolve(&request).await.unwrap();
        assert_eq!(result.content, "results for rust");
        assert!(!result.is_error);
        assert_eq!(result.id, "call_1");
    }

    #[tokio::test]
    async fn malformed_arguments_become_error_results() {
        let mut tools = ToolSet::new();
        tools.register_fn(lookup_definition(), |_| Ok("unreachable".into()));

        let request = ToolUse {
            id: "call_2".into(),
            name: "lookup".into(),
            arguments: "{not json".into(),
        };
        let result = tools.resolve(&request).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("tool call error"));
    }

    #[tokio::test]
    async fn executor_failures_become_error_results() {
        let mut tools = ToolSet::new();
        tools.register_fn(lookup_definition(), |_| {
            Err(ExtractError::transport("backend down"))
        });

        let request = ToolUse {
            name: "lookup".into(),
            arguments: "{}".into(),
            ..Default::default()
        };
        let result = tools.resolve(&request).await.unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn unregistered_and_declared_tools_stay_unresolved() {
        let mut tools = ToolSet::new();
        tools.declare(lookup_definition());

        let declared = ToolUse {
            name: "lookup".into(),
            arguments: "{}".into(),
            ..Default::default()
        };
        assert!(tools.resolve(&declared).await.is_none());

        let unknown = ToolUse {
            name: "nonexistent".into(),
            arguments: "{}".into(),
            ..Default::default()
        };
        assert!(tools.resolve(&unknown).await.is_none());
        let result = ToolSet::unknown_tool_result(&unknown);
        assert!(result.is_error);
        assert!(result.content.contains("nonexistent"));
    }

    #[test]
    fn definitions_preserve_registration_order() {
        let mut tools = ToolSet::new();
        for name in ["c", "a", "b"] {
            tools.declare(FunctionDefinition {
                name: name.into(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            });
        }
        let names: Vec<_> = tools.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["c", "a", "b"]);
    }
}
