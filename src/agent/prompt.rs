//! Per-turn system instruction.
//!
//! The configured system prompt carries the grounding rules shared by
//! every turn. A [`PromptStrategy`] chosen from keywords in the user's
//! question layers a persona, a task and an output format on top of it.
//! Strategies are tried in order and the first match wins; [`RAG_QA`]
//! matches everything.

/// Persona and answer shape for one kind of question.
#[derive(Debug, PartialEq, Eq)]
pub struct PromptStrategy {
    pub name: &'static str,
    keywords: &'static [&'static str],
    persona: &'static str,
    task: &'static str,
    output_format: &'static str,
}

impl PromptStrategy {
    /// Case-insensitive keyword match. A strategy without keywords matches
    /// any query.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.keywords.is_empty() || self.keywords.iter().any(|k| query.contains(k))
    }

    /// Shared rules followed by this strategy's sections.
    pub fn system_instruction(&self, guardrails: &str) -> String {
        format!(
            "{}\n\n## Persona\n{}\n\n## Task\n{}\n\n## Output format\n{}",
            guardrails.trim_end(),
            self.persona,
            self.task,
            self.output_format
        )
    }
}

pub static SUMMARIZER: PromptStrategy = PromptStrategy {
    name: "summarizer",
    keywords: &[
        "summarize", "summarise", "summary", "tl;dr", "overview", "high level", "brief", "recap",
        "key points", "main points",
    ],
    persona: "You condense documentation into short, accurate summaries.",
    task: "Summarize the retrieved passages that relate to the question. Keep figures, \
           names and dates exactly as written and leave out anything not in the passages.",
    output_format: "Three to five bullet points, most important first, then a line \
                    'Sources:' listing the documents used.",
};

pub static EXTRACTOR: PromptStrategy = PromptStrategy {
    name: "extractor",
    keywords: &[
        "extract", "list", "which", "give me", "show me", "what is the", "what was the",
        "what are the", "how many", "how much", "when was", "date of",
    ],
    persona: "You pick exact facts out of documentation without adding anything.",
    task: "Extract the specific values the question asks for from the retrieved passages. \
           When a requested value is not in the passages, write '<field>: not found in the documents'.",
    output_format: "Key-value pairs or a bullet list, one fact per line, then a line \
                    'Sources:' listing the documents used.",
};

pub static RAG_QA: PromptStrategy = PromptStrategy {
    name: "rag_qa",
    keywords: &[],
    persona: "You are a documentation assistant who answers only from the knowledge base.",
    task: "Answer the question from the retrieved passages. If they do not cover it, \
           say what is missing instead of guessing.",
    output_format: "A direct answer in two or three sentences, an 'Evidence:' section quoting \
                    the supporting passages, then a line 'Sources:' listing the documents used.",
};

/// Strategies in match order.
pub static STRATEGIES: [&PromptStrategy; 3] = [&SUMMARIZER, &EXTRACTOR, &RAG_QA];

/// First strategy matching `query`.
pub fn choose_strategy(query: &str) -> &'static PromptStrategy {
    STRATEGIES
        .iter()
        .copied()
        .find(|s| s.matches(query.trim()))
        .unwrap_or(&RAG_QA)
}
