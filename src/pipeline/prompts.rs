//! Prompt templates and fixed retrieval queries for the pipeline stages.
//!
//! Template placeholders are literal `{context}`, `{hypothesis}` and `{count}`
//! markers filled by the render functions; no other substitution happens.

/// Retrieval query for the SUMMARIZE stage
pub const LITERATURE_QUERY: &str =
    "overview of the literature: main findings, methods, and contributions";

/// Retrieval query for the GAP_ANALYZE stage
pub const GAP_QUERY: &str = "limitations, open problems, and directions for future work";

pub const SUMMARIZE_PROMPT: &str = "You are a scientific literature assistant. \
Summarize the following excerpts from the literature into a concise overview \
of findings and methods:\n\n{context}\n\nSummary:";

pub const PROPOSER_PROMPT: &str = "You are an interdisciplinary researcher. \
Based on the following summarized literature:\n\n{context}\n\n\
Propose {count} novel, plausible hypotheses. List each clearly.";

pub const VALIDATOR_PROMPT: &str = "You are a rigorous scientific validator. \
Given the hypothesis:\n\n\"{hypothesis}\"\n\nAnd this summarized context:\n\n{context}\n\n\
1) Rate feasibility 1–10.\n\
2) Summarize supporting/contradicting evidence.\n\
3) Note assumptions or missing data.\n";

pub const GAP_PROMPT: &str = "Analyze this summarized context:\n\n{context}\n\n\
Identify 2–3 high-priority research gaps, with brief justification.";

pub fn render_summarize(context: &str) -> String {
    SUMMARIZE_PROMPT.replace("{context}", context)
}

pub fn render_proposer(context: &str, count: usize) -> String {
    PROPOSER_PROMPT
        .replace("{context}", context)
        .replace("{count}", &count.to_string())
}

pub fn render_validator(hypothesis: &str, context: &str) -> String {
    VALIDATOR_PROMPT
        .replace("{hypothesis}", hypothesis)
        .replace("{context}", context)
}

pub fn render_gap(context: &str) -> String {
    GAP_PROMPT.replace("{context}", context)
}
