//! Command table construction and dispatch

use crate::error::TableError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tether_proto::{CommandResult, Value};
use tracing::{debug, warn};

/// A command handler.
///
/// Arguments arrive bound positionally to the declared argument names.
/// Failures are reported through `Err`; dispatch converts them into
/// [`CommandResult::Err`], so a failing handler never disturbs the session.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the command
    async fn call(&self, args: &[String]) -> anyhow::Result<Value>;
}

/// Declared shape of one command: its handler, the names of its arguments,
/// and the operator prompts used to solicit them.
pub struct CommandSpec {
    handler: Arc<dyn Handler>,
    arg_names: Vec<String>,
    prompts: Vec<String>,
}

impl CommandSpec {
    /// Declared argument names, in binding order
    pub fn arg_names(&self) -> &[String] {
        &self.arg_names
    }

    /// Operator prompts, parallel to the argument names
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    /// Number of declared arguments
    pub fn arity(&self) -> usize {
        self.arg_names.len()
    }
}

/// Builder for an immutable [`CommandTable`].
///
/// Arity is validated here, at construction time: a spec whose prompts do
/// not parallel its argument names, or a name registered twice, fails the
/// build rather than a later dispatch.
#[derive(Default)]
pub struct CommandTableBuilder {
    commands: HashMap<String, CommandSpec>,
    order: Vec<String>,
}

impl CommandTableBuilder {
    /// Register a command that takes no arguments
    pub fn register(
        self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, TableError> {
        self.register_with_args(name, handler, &[], &[])
    }

    /// Register a command with declared arguments and their prompts
    pub fn register_with_args(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
        arg_names: &[&str],
        prompts: &[&str],
    ) -> Result<Self, TableError> {
        let name = name.into();

        if arg_names.len() != prompts.len() {
            return Err(TableError::PromptMismatch {
                name,
                args: arg_names.len(),
                prompts: prompts.len(),
            });
        }
        if self.commands.contains_key(&name) {
            return Err(TableError::DuplicateCommand(name));
        }

        debug!("registered command: {name}");
        self.order.push(name.clone());
        self.commands.insert(
            name,
            CommandSpec {
                handler,
                arg_names: arg_names.iter().map(|s| s.to_string()).collect(),
                prompts: prompts.iter().map(|s| s.to_string()).collect(),
            },
        );
        Ok(self)
    }

    /// Finish the build
    pub fn build(self) -> CommandTable {
        CommandTable {
            commands: self.commands,
            order: self.order,
        }
    }
}

/// Immutable mapping from command name to handler, built once at agent
/// startup.
pub struct CommandTable {
    commands: HashMap<String, CommandSpec>,
    order: Vec<String>,
}

impl CommandTable {
    /// Start building a table
    pub fn builder() -> CommandTableBuilder {
        CommandTableBuilder::default()
    }

    /// Command names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Look up the spec for a command
    pub fn spec(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Dispatch one request against the table.
    ///
    /// Unknown names and handler failures both come back as
    /// [`CommandResult::Err`]; dispatch itself never fails. Zero-argument
    /// commands ignore whatever arguments were supplied; commands with
    /// declared arguments get them bound positionally, with missing
    /// positions bound as empty strings.
    pub async fn dispatch(&self, name: &str, args: &[String]) -> CommandResult {
        let Some(spec) = self.commands.get(name) else {
            warn!("unknown command: {name}");
            return CommandResult::err(format!("unknown command: {name}"));
        };

        let mut bound = if spec.arity() == 0 {
            Vec::new()
        } else {
            args.to_vec()
        };
        bound.resize(spec.arity(), String::new());

        match spec.handler.call(&bound).await {
            Ok(value) => CommandResult::Ok(value),
            Err(e) => {
                warn!("command {name} failed: {e}");
                CommandResult::Err(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn call(&self, args: &[String]) -> anyhow::Result<Value> {
            Ok(Value::Text(args.join(" ")))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl Handler for FailingHandler {
        async fn call(&self, _args: &[String]) -> anyhow::Result<Value> {
            bail!("handler blew up")
        }
    }

    struct CountingHandler;

    #[async_trait]
    impl Handler for CountingHandler {
        async fn call(&self, args: &[String]) -> anyhow::Result<Value> {
            Ok(Value::Int(args.len() as i64))
        }
    }

    fn table() -> CommandTable {
        CommandTable::builder()
            .register("noargs", Arc::new(CountingHandler))
            .unwrap()
            .register_with_args(
                "echo",
                Arc::new(EchoHandler),
                &["text"],
                &["Text to echo: "],
            )
            .unwrap()
            .register("boom", Arc::new(FailingHandler))
            .unwrap()
            .build()
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let result = table().dispatch("nope", &[]).await;
        match result {
            CommandResult::Err(message) => assert!(message.contains("unknown command")),
            CommandResult::Ok(_) => panic!("expected Err"),
        }
    }

    #[tokio::test]
    async fn test_zero_arity_ignores_supplied_args() {
        let args = vec!["stray".to_string(), "args".to_string()];
        let result = table().dispatch("noargs", &args).await;
        assert_eq!(result, CommandResult::Ok(Value::Int(0)));
    }

    #[tokio::test]
    async fn test_positional_binding_pads_missing() {
        let result = table().dispatch("echo", &[]).await;
        assert_eq!(result, CommandResult::Ok(Value::Text(String::new())));

        let args = vec!["hello".to_string(), "ignored".to_string()];
        let result = table().dispatch("echo", &args).await;
        assert_eq!(result, CommandResult::Ok(Value::Text("hello".to_string())));
    }

    #[tokio::test]
    async fn test_handler_failure_is_contained() {
        let result = table().dispatch("boom", &[]).await;
        assert_eq!(result, CommandResult::Err("handler blew up".to_string()));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = CommandTable::builder()
            .register("echo", Arc::new(EchoHandler))
            .unwrap()
            .register("echo", Arc::new(EchoHandler));
        assert!(matches!(result, Err(TableError::DuplicateCommand(_))));
    }

    #[test]
    fn test_prompt_arity_validated_at_build() {
        let result = CommandTable::builder().register_with_args(
            "kill",
            Arc::new(EchoHandler),
            &["pid"],
            &[],
        );
        assert!(matches!(result, Err(TableError::PromptMismatch { .. })));
    }

    #[test]
    fn test_names_keep_registration_order() {
        let table = table();
        let names: Vec<&str> = table.names().collect();
        assert_eq!(names, vec!["noargs", "echo", "boom"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.spec("echo").unwrap().arity(), 1);
        assert_eq!(table.spec("echo").unwrap().prompts(), ["Text to echo: "]);
    }
}
