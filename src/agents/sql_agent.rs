//! SQL Agent
//!
//! A ReAct loop around the hosted model. Each turn the model writes a thought, an
//! `Action` and an `Action Input`; generation stops at `Observation:`, the named
//! tool runs against the read-only database and its output is appended to the
//! scratchpad for the next turn. The loop ends when the model writes
//! `Final Answer:` or when `max_iterations` model calls have been spent.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agents::prompt::{
    create_agent_prompt, create_query_check_prompt, OBSERVATION_STOP, TOOL_LIST_TABLES, TOOL_NAMES,
    TOOL_QUERY, TOOL_QUERY_CHECKER, TOOL_SCHEMA,
};
use crate::agents::toolkit::SqlDatabase;
use crate::config::{AgentConfig, LLMConfig};
use crate::llm::LLM;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

const FINAL_ANSWER: &str = "Final Answer:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";

pub const ITERATION_LIMIT_ANSWER: &str = "Agent stopped due to iteration limit.";

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub max_iterations: usize,
    pub top_k: usize,
    pub sample_rows: usize,
}

impl AgentSettings {
    pub fn from_config(llm: &LLMConfig, agent: &AgentConfig) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_iterations: agent.max_iterations,
            top_k: agent.top_k,
            sample_rows: agent.sample_rows,
        }
    }
}

/// One tool call made by the agent, reported as it happens
#[derive(Debug, Clone, Serialize)]
pub struct AgentStep {
    pub iteration: usize,
    pub thought: String,
    pub tool: String,
    pub tool_input: String,
    pub observation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub answer: String,
    pub steps: usize,
    pub stopped_early: bool,
}

#[derive(Debug, PartialEq)]
enum ParsedOutput {
    Action { thought: String, tool: String, input: String },
    Finish(String),
    Invalid(String),
}

fn parse_output(text: &str) -> ParsedOutput {
    let action_at = text.find(ACTION);

    if let Some(final_at) = text.find(FINAL_ANSWER) {
        let acted_first = action_at.map_or(false, |a| a < final_at) && text[..final_at].contains(ACTION_INPUT);
        if acted_first {
            return ParsedOutput::Invalid(
                "Parsing LLM output produced both a final answer and a parse-able action".to_string(),
            );
        }
        return ParsedOutput::Finish(text[final_at + FINAL_ANSWER.len()..].trim().to_string());
    }

    let Some(action_at) = action_at else {
        return ParsedOutput::Invalid("Invalid Format: Missing 'Action:' after 'Thought:'".to_string());
    };
    let after_action = &text[action_at + ACTION.len()..];
    let Some(input_at) = after_action.find(ACTION_INPUT) else {
        return ParsedOutput::Invalid(
            "Invalid Format: Missing 'Action Input:' after 'Action:'".to_string(),
        );
    };

    let thought = text[..action_at].trim();
    let thought = thought.strip_prefix("Thought:").unwrap_or(thought).trim();
    let tool = after_action[..input_at].trim().trim_matches('`').trim();
    let input = &after_action[input_at + ACTION_INPUT.len()..];
    let input = input.split(OBSERVATION_STOP).next().unwrap_or(input);
    let input = input.trim().trim_matches('"').trim();

    ParsedOutput::Action {
        thought: thought.to_string(),
        tool: tool.to_string(),
        input: input.to_string(),
    }
}

fn parse_table_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|name| name.trim().trim_matches(|c| c == '"' || c == '`' || c == '\'').trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct SqlAgent {
    llm: LLM,
    db: SqlDatabase,
    settings: AgentSettings,
}

impl SqlAgent {
    pub fn new(llm: LLM, db: SqlDatabase, settings: AgentSettings) -> Self {
        Self { llm, db, settings }
    }

    async fn complete(&self, prompt: String, stop: Option<Vec<String>>) -> AppResult<String> {
        let request = LLMRequest {
            model: self.settings.model.clone(),
            messages: vec![LLMMessage::user(prompt)],
            max_tokens: None,
            temperature: Some(self.settings.temperature),
            stop,
        };
        let response = self.llm.create_chat_completion(&request).await?;
        Ok(response.content)
    }

    async fn call_tool(&self, tool: &str, input: &str) -> String {
        let result = match tool {
            TOOL_LIST_TABLES => self.db.table_names().await.map(|names| names.join(", ")),
            TOOL_SCHEMA => self.db.table_info(&parse_table_list(input)).await,
            TOOL_QUERY => self.db.run(input).await,
            TOOL_QUERY_CHECKER => {
                self.complete(create_query_check_prompt(self.db.dialect(), input), None)
                    .await
            }
            other => {
                return format!(
                    "{} is not a valid tool, try one of [{}].",
                    other,
                    TOOL_NAMES.join(", ")
                )
            }
        };

        result.unwrap_or_else(|e| format!("Error: {}", e))
    }

    /// Answer one question; `on_step` sees every tool call as it completes.
    pub async fn run<F>(&self, question: &str, mut on_step: F) -> AppResult<AgentOutcome>
    where
        F: FnMut(&AgentStep) + Send,
    {
        info!(
            question_len = question.len(),
            provider = %self.llm.provider(),
            model = %self.settings.model,
            "Running SQL agent"
        );

        let mut scratchpad = String::new();
        for iteration in 1..=self.settings.max_iterations {
            let prompt = create_agent_prompt(self.db.dialect(), self.settings.top_k, question, &scratchpad);
            let output = self
                .complete(prompt, Some(vec![OBSERVATION_STOP.to_string()]))
                .await
                .map_err(|e| AppError::AgentExecution(e.to_string()))?;

            let (thought, tool, tool_input, observation) = match parse_output(&output) {
                ParsedOutput::Finish(answer) => {
                    info!(iterations = iteration, answer_len = answer.len(), "SQL agent finished");
                    return Ok(AgentOutcome {
                        answer,
                        steps: iteration - 1,
                        stopped_early: false,
                    });
                }
                ParsedOutput::Action { thought, tool, input } => {
                    let observation = self.call_tool(&tool, &input).await;
                    (thought, tool, input, observation)
                }
                ParsedOutput::Invalid(message) => {
                    warn!(iteration, error = %message, "Could not parse agent output");
                    (String::new(), "_Exception".to_string(), output.trim().to_string(), message)
                }
            };

            debug!(iteration, tool = %tool, input = %tool_input, "Agent step");

            scratchpad.push_str(output.trim_end());
            scratchpad.push_str("\nObservation: ");
            scratchpad.push_str(&observation);
            scratchpad.push_str("\nThought: ");

            on_step(&AgentStep {
                iteration,
                thought,
                tool,
                tool_input,
                observation,
            });
        }

        warn!(max_iterations = self.settings.max_iterations, "SQL agent hit the iteration limit");
        Ok(AgentOutcome {
            answer: ITERATION_LIMIT_ANSWER.to_string(),
            steps: self.settings.max_iterations,
            stopped_early: true,
        })
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

/// Bind an agent to the store at `db_path` and answer `question` against it.
pub async fn run_query<F>(
    db_path: &Path,
    question: &str,
    llm: LLM,
    settings: AgentSettings,
    on_step: F,
) -> AppResult<AgentOutcome>
where
    F: FnMut(&AgentStep) + Send,
{
    let db = SqlDatabase::open_read_only(db_path, settings.sample_rows).await?;
    let agent = SqlAgent::new(llm, db, settings);
    let outcome = agent.run(question, on_step).await;
    agent.close().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::delimited::decode_csv;
    use crate::llm::scripted::ScriptedModel;
    use crate::store::write_table;

    fn settings(max_iterations: usize) -> AgentSettings {
        AgentSettings {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            max_iterations,
            top_k: 10,
            sample_rows: 3,
        }
    }

    async fn sample_store(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("temp_sample.db");
        let table = decode_csv("sample.csv", b"id,name\n1,alice\n2,bob\n").unwrap();
        write_table(&table, &path, "sample").await.unwrap();
        path
    }

    #[test]
    fn test_parse_action() {
        let parsed = parse_output("Thought: look at tables\nAction: sql_db_schema\nAction Input: \"sample\"");
        assert_eq!(
            parsed,
            ParsedOutput::Action {
                thought: "look at tables".to_string(),
                tool: "sql_db_schema".to_string(),
                input: "sample".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_final_answer_and_errors() {
        assert_eq!(
            parse_output("I now know the final answer\nFinal Answer: 2 rows"),
            ParsedOutput::Finish("2 rows".to_string())
        );
        assert!(matches!(parse_output("just chatting"), ParsedOutput::Invalid(_)));
        assert!(matches!(parse_output("Action: sql_db_query"), ParsedOutput::Invalid(_)));
        assert!(matches!(
            parse_output("Action: sql_db_query\nAction Input: SELECT 1\nFinal Answer: 1"),
            ParsedOutput::Invalid(_)
        ));
    }

    #[test]
    fn test_parse_table_list() {
        assert_eq!(parse_table_list(" sample, `AE`,'DM' ,"), vec!["sample", "AE", "DM"]);
    }

    #[tokio::test]
    async fn test_row_count_question() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let model = ScriptedModel::new([
            "Action: sql_db_list_tables\nAction Input: ",
            "The sample table looks relevant.\nAction: sql_db_schema\nAction Input: sample",
            "Action: sql_db_query\nAction Input: SELECT COUNT(*) FROM sample",
            "I now know the final answer\nFinal Answer: There are 2 rows in the sample table.",
        ]);

        let mut steps = Vec::new();
        let outcome = run_query(&path, "how many rows are there", model.llm(), settings(15), |step| {
            steps.push(step.clone())
        })
        .await
        .unwrap();

        assert_eq!(outcome.answer, "There are 2 rows in the sample table.");
        assert_eq!(outcome.steps, 3);
        assert!(!outcome.stopped_early);

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].observation, "sample");
        assert!(steps[1].observation.contains("CREATE TABLE"));
        assert_eq!(steps[2].observation, "[(2,)]");

        let requests = model.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].stop, Some(vec![OBSERVATION_STOP.to_string()]));
        assert_eq!(requests[0].temperature, Some(0.0));
        assert!(requests[3].messages[0].content.contains("Observation: [(2,)]"));
    }

    #[tokio::test]
    async fn test_destructive_sql_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let model = ScriptedModel::new([
            "Action: sql_db_query\nAction Input: DROP TABLE sample",
            "Final Answer: I could not do that.",
        ]);

        let mut observations = Vec::new();
        run_query(&path, "drop the table", model.llm(), settings(15), |step| {
            observations.push(step.observation.clone())
        })
        .await
        .unwrap();

        assert!(observations[0].starts_with("Error:"));
        let db = SqlDatabase::open_read_only(&path, 3).await.unwrap();
        assert_eq!(db.run("SELECT COUNT(*) FROM sample").await.unwrap(), "[(2,)]");
        db.close().await;
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let model = ScriptedModel::new(["I am not sure", "Action: sql_db_drop\nAction Input: x"]);

        let mut observations = Vec::new();
        let outcome = run_query(&path, "anything", model.llm(), settings(2), |step| {
            observations.push(step.observation.clone())
        })
        .await
        .unwrap();

        assert_eq!(outcome.answer, ITERATION_LIMIT_ANSWER);
        assert!(outcome.stopped_early);
        assert!(observations[0].contains("Invalid Format"));
        assert!(observations[1].contains("is not a valid tool"));
    }

    #[tokio::test]
    async fn test_model_failure_is_an_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_store(dir.path()).await;
        let model = ScriptedModel::new(Vec::<String>::new());

        let result = run_query(&path, "anything", model.llm(), settings(15), |_| {}).await;
        assert!(matches!(result, Err(AppError::AgentExecution(_))));
    }
}
