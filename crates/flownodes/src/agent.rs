//! Research agent built from three collaborating nodes.
//!
//! `DecideAction` asks a completion model whether to search or answer,
//! `SearchWeb` gathers results into the store's `context` and loops back,
//! `AnswerQuestion` writes the final `answer`. The model and the search
//! backend are collaborators supplied by the caller.

use async_trait::async_trait;
use flowcore::{Action, AsyncNode, NodeContext, NodeError, Value};
use flowruntime::{AsyncFlow, AsyncRunner};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const QUESTION_KEY: &str = "question";
pub const CONTEXT_KEY: &str = "context";
pub const SEARCH_QUERY_KEY: &str = "search_query";
pub const ANSWER_KEY: &str = "answer";
pub const ERROR_KEY: &str = "error";

const NO_CONTEXT: &str = "No previous search";
const NO_RESULTS: &str = "Search completed, but no results were found.";

/// Text under `key`, or empty when it is missing or not text. The node's
/// exec turns an empty input into a failure it can route on.
fn text_or_empty(ctx: &NodeContext, node: &str, key: &str) -> String {
    match ctx.store.get_str(key) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("{}: {}, continuing with an empty {}", node, e, key);
            String::new()
        }
    }
}

/// Text completion backend (an LLM or anything that answers prompts)
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, NodeError>;
}

/// Search or fetch backend returning plain text results
#[async_trait]
pub trait Search: Send + Sync {
    async fn search(&self, query: &str) -> Result<String, NodeError>;
}

/// Search through an HTTP endpoint taking the query as a url parameter
pub struct HttpSearch {
    client: reqwest::Client,
    endpoint: String,
    param: String,
}

impl HttpSearch {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| NodeError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            param: "q".to_string(),
        })
    }

    /// Name of the query parameter (default `q`)
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }
}

#[async_trait]
impl Search for HttpSearch {
    async fn search(&self, query: &str) -> Result<String, NodeError> {
        tracing::debug!("Searching {} for '{}'", self.endpoint, query);

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[(self.param.as_str(), query)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| NodeError::ExecutionFailed(format!("search request failed: {}", e)))?;

        response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("failed to read search results: {}", e)))
    }
}

/// The actions the agent's nodes route on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    Search,
    Answer,
    Decide,
    Done,
    Error,
}

impl AgentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentAction::Search => "search",
            AgentAction::Answer => "answer",
            AgentAction::Decide => "decide",
            AgentAction::Done => "done",
            AgentAction::Error => "error",
        }
    }
}

impl fmt::Display for AgentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AgentAction> for Action {
    fn from(action: AgentAction) -> Self {
        Action::new(action.as_str())
    }
}

/// Reply the completion model is asked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub search_query: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
}

impl Decision {
    /// Parse a model reply. The JSON may sit inside a fenced code block.
    pub fn parse(reply: &str) -> Result<Self, NodeError> {
        let body = fenced_block(reply).unwrap_or(reply).trim();
        let decision: Decision = serde_json::from_str(body)
            .map_err(|e| NodeError::ExecutionFailed(format!("unparseable decision: {}", e)))?;
        decision.validate()?;
        Ok(decision)
    }

    fn validate(&self) -> Result<(), NodeError> {
        let missing = |field: &str| {
            NodeError::ExecutionFailed(format!(
                "decision '{}' is missing '{}'",
                self.action, field
            ))
        };
        match self.action.as_str() {
            "search" if self.search_query.as_deref().map_or(true, str::is_empty) => {
                Err(missing("search_query"))
            }
            "answer" if self.answer.is_none() => Err(missing("answer")),
            "search" | "answer" => Ok(()),
            other => Err(NodeError::ExecutionFailed(format!(
                "decision action must be 'search' or 'answer', got '{}'",
                other
            ))),
        }
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the info string of the fence, e.g. ```json
    let body = after.find('\n').map_or(after, |nl| &after[nl + 1..]);
    Some(body.find("```").map_or(body, |end| &body[..end]))
}

fn string_field(value: &Value, field: &str) -> String {
    value
        .as_object()
        .and_then(|obj| obj.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Asks the model whether to search or to answer
pub struct DecideAction {
    completion: Arc<dyn Completion>,
}

impl DecideAction {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self { completion }
    }

    fn prompt(question: &str, context: &str) -> String {
        format!(
            r#"### CONTEXT
You are a research assistant that can search the web to find relevant information and provide accurate answers.
Question: {question}
Previous Research: {context}

### ACTION SPACE
[1] search
  Description: Look up more information on the web
  Parameters:
    - search_query (str): What to search for

[2] answer
  Description: Answer the question with current knowledge
  Parameters:
    - answer (str): Final answer to the question

## NEXT ACTION
Decide the next action based on the context and available actions.
Return your response as a JSON object:

```json
{{"action": "search or answer", "reason": "why", "search_query": "if action is search", "answer": "if action is answer"}}
```"#
        )
    }
}

#[async_trait]
impl AsyncNode for DecideAction {
    fn name(&self) -> &str {
        "DecideAction"
    }

    async fn prep_async(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let question = text_or_empty(ctx, "DecideAction", QUESTION_KEY);
        let context = ctx
            .store
            .get_str(CONTEXT_KEY)
            .unwrap_or_else(|_| NO_CONTEXT.to_string());

        Ok(Value::Object(HashMap::from([
            ("question".to_string(), Value::String(question)),
            ("context".to_string(), Value::String(context)),
        ])))
    }

    async fn exec_async(&self, _ctx: &NodeContext, prep: &Value) -> Result<Value, NodeError> {
        let question = string_field(prep, "question");
        if question.is_empty() {
            return Err(NodeError::MissingInput(QUESTION_KEY.to_string()));
        }
        let prompt = Self::prompt(&question, &string_field(prep, "context"));
        let reply = self.completion.complete(&prompt).await?;
        if reply.trim().is_empty() {
            return Err(NodeError::ExecutionFailed("empty reply from the model".to_string()));
        }

        let decision = Decision::parse(&reply)?;
        let json = serde_json::to_value(&decision)
            .map_err(|e| NodeError::ExecutionFailed(e.to_string()))?;
        Ok(Value::from_json(json))
    }

    async fn post_async(
        &self,
        ctx: &NodeContext,
        _prep: Value,
        exec: Value,
    ) -> Result<Action, NodeError> {
        if let Value::Error(reason) = exec {
            tracing::warn!("Agent could not decide: {}", reason);
            ctx.store.insert(ERROR_KEY, reason);
            return Ok(AgentAction::Error.into());
        }

        match string_field(&exec, "action").as_str() {
            "search" => {
                let query = string_field(&exec, "search_query");
                ctx.events.info(format!("Agent decided to search for: {}", query));
                ctx.store.insert(SEARCH_QUERY_KEY, query);
                Ok(AgentAction::Search.into())
            }
            _ => {
                // A direct answer becomes the context the final answer is written from
                ctx.events.info("Agent decided to answer the question");
                ctx.store.insert(CONTEXT_KEY, string_field(&exec, "answer"));
                Ok(AgentAction::Answer.into())
            }
        }
    }
}

/// Runs the pending search query and appends its results to the context
pub struct SearchWeb {
    search: Arc<dyn Search>,
}

impl SearchWeb {
    pub fn new(search: Arc<dyn Search>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl AsyncNode for SearchWeb {
    fn name(&self) -> &str {
        "SearchWeb"
    }

    async fn prep_async(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::String(text_or_empty(ctx, "SearchWeb", SEARCH_QUERY_KEY)))
    }

    async fn exec_async(&self, _ctx: &NodeContext, prep: &Value) -> Result<Value, NodeError> {
        let query = prep.as_str().unwrap_or_default();
        if query.trim().is_empty() {
            return Err(NodeError::MissingInput(SEARCH_QUERY_KEY.to_string()));
        }
        let results = self.search.search(query).await?;
        if results.trim().is_empty() {
            return Ok(Value::String(NO_RESULTS.to_string()));
        }
        Ok(Value::String(results))
    }

    async fn post_async(
        &self,
        ctx: &NodeContext,
        prep: Value,
        exec: Value,
    ) -> Result<Action, NodeError> {
        let query = prep.as_str().unwrap_or_default();
        let results = match &exec {
            Value::Error(e) => format!("Search error: {}", e),
            other => other.as_str().unwrap_or_default().to_string(),
        };

        ctx.store.append_str(
            CONTEXT_KEY,
            &format!("SEARCH: {}\nRESULTS:\n{}", query, results),
            "\n\n",
        );
        ctx.events.info("Found information, analyzing results");
        Ok(AgentAction::Decide.into())
    }
}

/// Writes the final answer from the question and the gathered context
pub struct AnswerQuestion {
    completion: Arc<dyn Completion>,
}

impl AnswerQuestion {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self { completion }
    }
}

/// Drop a markdown fence the model may wrap its answer in
fn strip_fence(answer: &str) -> &str {
    let answer = answer.trim();
    match answer.strip_prefix("```") {
        Some(rest) => {
            let body = rest.find('\n').map_or("", |nl| &rest[nl + 1..]);
            body.trim_end().trim_end_matches("```").trim()
        }
        None => answer,
    }
}

#[async_trait]
impl AsyncNode for AnswerQuestion {
    fn name(&self) -> &str {
        "AnswerQuestion"
    }

    async fn prep_async(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let question = text_or_empty(ctx, "AnswerQuestion", QUESTION_KEY);
        let context = ctx.store.get_str(CONTEXT_KEY).unwrap_or_default();

        Ok(Value::Object(HashMap::from([
            ("question".to_string(), Value::String(question)),
            ("context".to_string(), Value::String(context)),
        ])))
    }

    async fn exec_async(&self, _ctx: &NodeContext, prep: &Value) -> Result<Value, NodeError> {
        let question = string_field(prep, "question");
        if question.is_empty() {
            return Err(NodeError::MissingInput(QUESTION_KEY.to_string()));
        }
        let prompt = format!(
            "### CONTEXT\nBased on the following information, answer the question.\n\
             Question: {}\nResearch: {}\n\n## YOUR ANSWER:\n\
             Answer using only the research above. If it is insufficient, say so.",
            question,
            string_field(prep, "context"),
        );

        let reply = self.completion.complete(&prompt).await?;
        let answer = strip_fence(&reply);
        if answer.is_empty() {
            return Err(NodeError::ExecutionFailed("empty answer from the model".to_string()));
        }
        Ok(Value::String(answer.to_string()))
    }

    async fn post_async(
        &self,
        ctx: &NodeContext,
        _prep: Value,
        exec: Value,
    ) -> Result<Action, NodeError> {
        match exec {
            Value::String(answer) => {
                ctx.store.insert(ANSWER_KEY, answer);
                Ok(AgentAction::Done.into())
            }
            other => {
                let reason = other.as_error().unwrap_or("no answer").to_string();
                ctx.store
                    .insert(ANSWER_KEY, format!("Failed to generate final answer: {}", reason));
                ctx.store.insert(ERROR_KEY, reason);
                Ok(AgentAction::Error.into())
            }
        }
    }
}

/// Decide → Search → Decide … → Answer.
///
/// The flow ends when the answer node returns `done` (or any node returns
/// `error`), neither of which has a successor. Set `question` in the store
/// before running; without one the flow ends with `error`.
pub fn agent_flow(
    completion: Arc<dyn Completion>,
    search: Arc<dyn Search>,
) -> Result<AsyncFlow, flowcore::FlowError> {
    let mut flow = AsyncFlow::new().named("research_agent");

    let decide = flow.add_async(
        AsyncRunner::new(DecideAction::new(Arc::clone(&completion)))
            .with_retry(3, Duration::from_millis(100)),
    );
    let search = flow.add_async_node(SearchWeb::new(search));
    let answer = flow.add_async_node(AnswerQuestion::new(completion));

    flow.connect(decide, AgentAction::Search, search)?;
    flow.connect(decide, AgentAction::Answer, answer)?;
    flow.connect(search, AgentAction::Decide, decide)?;

    Ok(flow)
}
