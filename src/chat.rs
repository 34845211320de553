//! Interactive chat loop.
//!
//! Reads one question per line, runs it through the [`Agent`] and prints
//! `Bot: <answer>`. Turn failures are printed and the loop continues;
//! `exit`, `quit` or end of input ends the session.

use anyhow::Result;
use std::io::{BufRead, Write};

use crate::agent::{Agent, ChatSession};

const QUIT_WORDS: &[&str] = &["exit", "quit"];

/// Run the loop until the user quits. Returns the number of answered turns.
pub async fn run_chat<R, W>(agent: &Agent, input: R, mut output: W) -> Result<usize>
where
    R: BufRead,
    W: Write,
{
    let mut session = ChatSession::new();
    tracing::info!(session = %session.id(), "chat session started");
    writeln!(output, "Ask a question about your documents (type 'exit' to quit).")?;

    let mut answered = 0;
    let mut lines = input.lines();
    loop {
        write!(output, "You: ")?;
        output.flush()?;

        let Some(line) = lines.next() else {
            writeln!(output)?;
            break;
        };
        let line = line?;
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if QUIT_WORDS.iter().any(|w| question.eq_ignore_ascii_case(w)) {
            break;
        }

        match agent.run_turn(&mut session, question).await {
            Ok(reply) => {
                writeln!(output, "Bot: {}", reply.text)?;
                answered += 1;
            }
            Err(e) => writeln!(output, "error: {}", e)?,
        }
    }

    writeln!(output, "Goodbye!")?;
    tracing::info!(session = %session.id(), answered, "chat session ended");
    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ModelRequest, ModelStep, ReasoningModel};
    use crate::config::AgentConfig;
    use crate::error::ModelError;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl ReasoningModel for Echo {
        async fn step(&self, request: ModelRequest<'_>) -> Result<ModelStep, ModelError> {
            match request.history.last() {
                Some(crate::agent::Message::User(t)) if t == "fail" => {
                    Err(ModelError::Rejected("bad request".into()))
                }
                Some(crate::agent::Message::User(t)) => Ok(ModelStep::FinalAnswer(format!("echo {}", t))),
                _ => Ok(ModelStep::FinalAnswer(String::new())),
            }
        }
    }

    fn agent() -> Agent {
        Agent::new(Arc::new(Echo), ToolRegistry::new(), &AgentConfig::default())
    }

    #[tokio::test]
    async fn answers_until_quit() {
        let mut out = Vec::new();
        let n = run_chat(&agent(), "hello\n\n  \nQUIT\nignored\n".as_bytes(), &mut out)
            .await
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(n, 1);
        assert!(out.contains("Bot: echo hello"));
        assert!(!out.contains("ignored"));
        assert!(out.trim_end().ends_with("Goodbye!"));
    }

    #[tokio::test]
    async fn failed_turn_does_not_end_session() {
        let mut out = Vec::new();
        let n = run_chat(&agent(), "fail\nagain\n".as_bytes(), &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();
        assert_eq!(n, 1);
        assert!(out.contains("error: model rejected request: bad request"));
        assert!(out.contains("Bot: echo again"));
    }
}
