//! Tool calling.
//!
//! Type-safe tool definitions for the agent runtime. A [`Tool`] declares its
//! argument shape as a deserializable type with a [`schemars::JsonSchema`]
//! derive; the [`Tools`] registry erases the argument type, validates and
//! coerces raw JSON arguments against the schema, and dispatches execution.
//!
//! Tools receive three things besides their arguments: the tool-call id (for
//! correlating partial output), a [`CancelToken`] they are expected to poll,
//! and an optional update callback for streaming intermediate results. They
//! never see the shared conversation context.
//!
//! # Example
//!
//! ```rust
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use strand_core::llm::{Tool, ToolResult};
//! use strand_core::CancelToken;
//! use std::borrow::Cow;
//!
//! #[derive(JsonSchema, Deserialize)]
//! struct LsArgs {
//!     /// Directory to list.
//!     path: String,
//! }
//!
//! struct Ls;
//!
//! impl Tool for Ls {
//!     type Arguments = LsArgs;
//!
//!     fn name(&self) -> Cow<'static, str> {
//!         "ls".into()
//!     }
//!     fn description(&self) -> Cow<'static, str> {
//!         "List directory entries".into()
//!     }
//!
//!     async fn execute(
//!         &self,
//!         _tool_call_id: &str,
//!         args: LsArgs,
//!         _cancel: CancelToken,
//!         _on_update: Option<&strand_core::llm::ToolUpdateFn>,
//!     ) -> strand_core::Result {
//!         Ok(ToolResult::text(format!("listing {}", args.path)))
//!     }
//! }
//! ```

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Debug;
use core::{future::Future, pin::Pin};

use schemars::{JsonSchema, Schema, schema_for};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::message::ContentBlock;
use super::schema::coerce_arguments;
use crate::Result;
use crate::cancel::CancelToken;

/// Output of one tool execution.
///
/// `content` is what the model sees; `details` is an opaque payload for UIs
/// and session consumers.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ToolResult {
    /// Ordered text and image blocks.
    pub content: Vec<ContentBlock>,
    /// Opaque structured payload, not sent to models.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub details: Option<Value>,
}

impl ToolResult {
    /// Creates a result with a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            details: None,
        }
    }

    /// Attaches an opaque details payload.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Callback receiving intermediate [`ToolResult`] snapshots during execution.
pub type ToolUpdateFn = dyn Fn(ToolResult) + Send + Sync;

/// A tool callable by the model.
pub trait Tool: Send + Sync {
    /// Argument shape. The derived schema is what the model sees.
    type Arguments: JsonSchema + DeserializeOwned;

    /// Tool name. Must be unique within a registry.
    fn name(&self) -> Cow<'static, str>;

    /// Human-facing label; defaults to the name.
    fn label(&self) -> Cow<'static, str> {
        self.name()
    }

    /// Tool description for the model.
    fn description(&self) -> Cow<'static, str>;

    /// Executes the tool.
    ///
    /// Implementations should poll `cancel` during long operations and
    /// return promptly once it fires. `on_update` may be called any number
    /// of times with intermediate snapshots.
    fn execute(
        &self,
        tool_call_id: &str,
        arguments: Self::Arguments,
        cancel: CancelToken,
        on_update: Option<&ToolUpdateFn>,
    ) -> impl Future<Output = Result> + Send;
}

/// Tool metadata and argument schema, as presented to the model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ToolDefinition {
    name: Cow<'static, str>,
    label: Cow<'static, str>,
    description: Cow<'static, str>,
    parameters: Schema,
}

impl ToolDefinition {
    /// Creates a definition for a tool instance.
    #[must_use]
    pub fn new<T: Tool>(tool: &T) -> Self {
        Self {
            name: tool.name(),
            label: tool.label(),
            description: tool.description(),
            parameters: schema_for!(T::Arguments),
        }
    }

    /// Returns the tool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the human-facing label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the tool's description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the JSON schema for the tool's arguments.
    #[must_use]
    pub const fn parameters(&self) -> &Schema {
        &self.parameters
    }
}

trait ToolImpl: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    fn execute<'a>(
        &'a self,
        tool_call_id: &'a str,
        arguments: Value,
        cancel: CancelToken,
        on_update: Option<&'a ToolUpdateFn>,
    ) -> Pin<Box<dyn Future<Output = Result> + Send + 'a>>;
}

impl<T: Tool> ToolImpl for T {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self)
    }

    fn execute<'a>(
        &'a self,
        tool_call_id: &'a str,
        arguments: Value,
        cancel: CancelToken,
        on_update: Option<&'a ToolUpdateFn>,
    ) -> Pin<Box<dyn Future<Output = Result> + Send + 'a>> {
        Box::pin(async move {
            let schema = schema_for!(T::Arguments);
            let coerced = coerce_arguments(&schema, &arguments)?;
            let typed: T::Arguments = serde_json::from_value(coerced)?;
            Tool::execute(self, tool_call_id, typed, cancel, on_update).await
        })
    }
}

/// Registry dispatching tool calls by name.
///
/// Raw JSON arguments are validated and coerced against the declared schema
/// before reaching the tool; validation failures surface as errors that list
/// every offending argument path.
pub struct Tools {
    tools: BTreeMap<String, Box<dyn ToolImpl>>,
}

impl Debug for Tools {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tools")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Tools {
    fn default() -> Self {
        Self::new()
    }
}

impl Tools {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Registers a tool. Replaces any existing tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools
            .insert(tool.name().to_string(), Box::new(tool) as Box<dyn ToolImpl>);
    }

    /// Removes a tool from the registry.
    pub fn unregister(&mut self, name: &str) {
        self.tools.remove(name);
    }

    /// Returns `true` if a tool with the given name is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns definitions of all registered tools.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    /// Validates arguments and executes the named tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is not found, arguments fail validation,
    /// or execution fails.
    pub async fn execute(
        &self,
        name: &str,
        tool_call_id: &str,
        arguments: Value,
        cancel: CancelToken,
        on_update: Option<&ToolUpdateFn>,
    ) -> Result {
        let Some(tool) = self.tools.get(name) else {
            return Err(anyhow::Error::msg(alloc::format!(
                "Tool '{name}' not found"
            )));
        };
        tool.execute(tool_call_id, arguments, cancel, on_update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::ToString;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(JsonSchema, Deserialize)]
    struct EchoArgs {
        text: String,
        #[serde(default)]
        repeat: u32,
    }

    struct Echo;

    impl Tool for Echo {
        type Arguments = EchoArgs;

        fn name(&self) -> Cow<'static, str> {
            "echo".into()
        }

        fn description(&self) -> Cow<'static, str> {
            "Echoes its input".into()
        }

        async fn execute(
            &self,
            _tool_call_id: &str,
            args: EchoArgs,
            _cancel: CancelToken,
            on_update: Option<&ToolUpdateFn>,
        ) -> Result {
            if let Some(update) = on_update {
                update(ToolResult::text("working"));
            }
            let mut out = String::new();
            for _ in 0..args.repeat.max(1) {
                out.push_str(&args.text);
            }
            Ok(ToolResult::text(out))
        }
    }

    #[test]
    fn definition_carries_schema() {
        let definition = ToolDefinition::new(&Echo);
        assert_eq!(definition.name(), "echo");
        assert_eq!(definition.label(), "echo");
        let schema = serde_json::to_value(definition.parameters()).unwrap();
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"]["text"].is_object());
    }

    #[tokio::test]
    async fn execute_validates_and_runs() {
        let mut tools = Tools::new();
        tools.register(Echo);
        assert!(tools.has("echo"));
        assert_eq!(tools.len(), 1);

        let result = tools
            .execute(
                "echo",
                "call_1",
                json!({"text": "hi", "repeat": 2}),
                CancelToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.content[0].as_text(), Some("hihi"));
    }

    #[tokio::test]
    async fn execute_coerces_stringly_numbers() {
        let mut tools = Tools::new();
        tools.register(Echo);

        // "2" coerces to 2 per the schema.
        let result = tools
            .execute(
                "echo",
                "call_1",
                json!({"text": "a", "repeat": "2"}),
                CancelToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.content[0].as_text(), Some("aa"));
    }

    #[tokio::test]
    async fn execute_rejects_missing_required() {
        let mut tools = Tools::new();
        tools.register(Echo);

        let err = tools
            .execute("echo", "call_1", json!({}), CancelToken::new(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("text"), "got: {err}");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let tools = Tools::new();
        let err = tools
            .execute("nope", "call_1", json!({}), CancelToken::new(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn updates_reach_the_callback() {
        let mut tools = Tools::new();
        tools.register(Echo);

        let seen = alloc::sync::Arc::new(core::sync::atomic::AtomicUsize::new(0));
        let seen_in_cb = seen.clone();
        let on_update = move |_result: ToolResult| {
            seen_in_cb.fetch_add(1, core::sync::atomic::Ordering::SeqCst);
        };
        tools
            .execute(
                "echo",
                "call_1",
                json!({"text": "x"}),
                CancelToken::new(),
                Some(&on_update),
            )
            .await
            .unwrap();
        assert_eq!(seen.load(core::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_debug_lists_names() {
        let mut tools = Tools::new();
        tools.register(Echo);
        let rendered = format!("{tools:?}");
        assert!(rendered.contains("echo"));
    }
}
