//! Task steps: per-record prompts sent to a text-generation model.
//!
//! A [`Task`] formats each input record into chat messages and parses the
//! model completion into new fields. [`TaskStep`] runs a task against an
//! [`Llm`] and emits every record combined with the parsed fields.

use super::{BatchStream, StepContext, TransformStep};
use crate::core::{merge_records, Batch, Record};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The speaker role ("system", "user", "assistant").
    pub role: String,
    /// The message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A text-generation model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Llm: Send + Sync {
    /// Model identifier, used in logs.
    fn model_name(&self) -> String;

    /// Generates a completion for a conversation.
    async fn generate(&self, messages: Vec<ChatMessage>) -> anyhow::Result<String>;
}

/// Prompt formatting and completion parsing for one kind of task.
pub trait Task: Send + Sync + Debug {
    /// Fields read from each input record.
    fn input_fields(&self) -> Vec<String>;

    /// Fields produced from the completion.
    fn output_fields(&self) -> Vec<String>;

    /// Builds the conversation for one record.
    fn format_input(&self, record: &Record) -> anyhow::Result<Vec<ChatMessage>>;

    /// Parses a completion into output fields.
    fn format_output(&self, completion: &str) -> anyhow::Result<Record>;
}

/// Transform step running a [`Task`] against an [`Llm`], one record at a time.
pub struct TaskStep<T: Task> {
    task: T,
    llm: Arc<dyn Llm>,
}

impl<T: Task> TaskStep<T> {
    /// Creates a new task step.
    pub fn new(task: T, llm: Arc<dyn Llm>) -> Self {
        Self { task, llm }
    }

    /// Returns the task.
    pub fn task(&self) -> &T {
        &self.task
    }

    async fn run_batch(&self, input: Batch, step: &str) -> anyhow::Result<Batch> {
        let mut output = Vec::with_capacity(input.len());
        for mut record in input {
            let messages = self.task.format_input(&record)?;
            let completion = self.llm.generate(messages).await?;
            let fields = self.task.format_output(&completion)?;
            merge_records(&mut record, fields);
            output.push(record);
        }
        debug!(step = %step, model = %self.llm.model_name(), records = output.len(), "Task batch generated");
        Ok(output)
    }
}

impl<T: Task> Debug for TaskStep<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStep")
            .field("task", &self.task)
            .field("model", &self.llm.model_name())
            .finish()
    }
}

impl<T: Task> TransformStep for TaskStep<T> {
    fn input_fields(&self) -> Vec<String> {
        self.task.input_fields()
    }

    fn output_fields(&self) -> Vec<String> {
        self.task.output_fields()
    }

    fn process<'a>(&'a self, input: Batch, ctx: &'a StepContext) -> BatchStream<'a> {
        stream::once(self.run_batch(input, ctx.step_name())).boxed()
    }
}

/// Returns true if `value` is a list of `{role, content}` string messages.
#[must_use]
pub fn is_chat_format(value: &serde_json::Value) -> bool {
    value.as_array().is_some_and(|items| {
        items.iter().all(|item| {
            item.get("role").is_some_and(serde_json::Value::is_string)
                && item.get("content").is_some_and(serde_json::Value::is_string)
        })
    })
}

/// Plain text generation from a single input field.
///
/// A string input becomes an empty system message followed by a user
/// message. An input already in chat format is sent as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextGeneration {
    input: String,
    output: String,
}

impl TextGeneration {
    /// Default name of the output field.
    pub const DEFAULT_OUTPUT: &'static str = "generations";

    /// Creates a text generation task reading `input`.
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: Self::DEFAULT_OUTPUT.to_string(),
        }
    }

    /// Sets the output field name.
    #[must_use]
    pub fn with_output_field(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

impl Task for TextGeneration {
    fn input_fields(&self) -> Vec<String> {
        vec![self.input.clone()]
    }

    fn output_fields(&self) -> Vec<String> {
        vec![self.output.clone()]
    }

    fn format_input(&self, record: &Record) -> anyhow::Result<Vec<ChatMessage>> {
        let value = record
            .get(&self.input)
            .ok_or_else(|| anyhow::anyhow!("record has no field '{}'", self.input))?;

        if let Some(text) = value.as_str() {
            return Ok(vec![ChatMessage::new("system", ""), ChatMessage::new("user", text)]);
        }
        if is_chat_format(value) {
            return Ok(serde_json::from_value(value.clone())?);
        }
        anyhow::bail!(
            "field '{}' must be a string or a list of chat messages, got {}",
            self.input,
            value
        )
    }

    fn format_output(&self, completion: &str) -> anyhow::Result<Record> {
        let mut record = Record::new();
        record.insert(self.output.clone(), serde_json::Value::String(completion.to_string()));
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_is_chat_format() {
        assert!(is_chat_format(&json!([{"role": "user", "content": "hi"}])));
        assert!(is_chat_format(&json!([])));
        assert!(!is_chat_format(&json!([{"role": "user"}])));
        assert!(!is_chat_format(&json!("hi")));
    }

    #[test]
    fn test_text_generation_format_string_input() {
        let task = TextGeneration::new("instruction");
        let messages = task
            .format_input(&record(json!({"instruction": "Say hi"})))
            .unwrap();

        assert_eq!(
            messages,
            vec![ChatMessage::new("system", ""), ChatMessage::new("user", "Say hi")]
        );
    }

    #[test]
    fn test_text_generation_format_chat_input() {
        let task = TextGeneration::new("conversation");
        let messages = task
            .format_input(&record(json!({
                "conversation": [{"role": "user", "content": "Hello"}]
            })))
            .unwrap();

        assert_eq!(messages, vec![ChatMessage::new("user", "Hello")]);
    }

    #[test]
    fn test_text_generation_default_output_field() {
        let task = TextGeneration::new("instruction");
        assert_eq!(task.output_fields(), vec!["generations".to_string()]);
        assert_eq!(
            task.format_output("hi").unwrap(),
            record(json!({"generations": "hi"}))
        );
    }

    #[test]
    fn test_text_generation_rejects_other_input() {
        let task = TextGeneration::new("instruction");
        assert!(task.format_input(&record(json!({"instruction": 42}))).is_err());
        assert!(task.format_input(&record(json!({"other": "x"}))).is_err());
    }

    #[tokio::test]
    async fn test_task_step_merges_generation() {
        let mut llm = MockLlm::new();
        llm.expect_model_name().returning(|| "mock".to_string());
        llm.expect_generate()
            .times(2)
            .returning(|messages| Ok(format!("echo: {}", messages[1].content)));

        let step = TaskStep::new(
            TextGeneration::new("instruction").with_output_field("answer"),
            Arc::new(llm),
        );
        let ctx = StepContext::new("generate", "run");
        let input = vec![
            record(json!({"id": 1, "instruction": "a"})),
            record(json!({"id": 2, "instruction": "b"})),
        ];

        let out: Vec<Batch> = step.process(input, &ctx).try_collect().await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0],
            vec![
                record(json!({"id": 1, "instruction": "a", "answer": "echo: a"})),
                record(json!({"id": 2, "instruction": "b", "answer": "echo: b"})),
            ]
        );
        assert_eq!(step.output_fields(), vec!["answer".to_string()]);
    }

    #[tokio::test]
    async fn test_task_step_propagates_model_error() {
        let mut llm = MockLlm::new();
        llm.expect_model_name().returning(|| "mock".to_string());
        llm.expect_generate()
            .returning(|_| Err(anyhow::anyhow!("rate limited")));

        let step = TaskStep::new(TextGeneration::new("instruction"), Arc::new(llm));
        let ctx = StepContext::new("generate", "run");

        let result: anyhow::Result<Vec<Batch>> = step
            .process(vec![record(json!({"instruction": "a"}))], &ctx)
            .try_collect()
            .await;
        assert_eq!(result.unwrap_err().to_string(), "rate limited");
    }
}
