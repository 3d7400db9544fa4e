//! Prompt formatting and structured answer extraction.

use super::{Answer, Label, OutputMode, WorkItem};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// System prompt for the graded-answer variant.
pub const GRADED_SYSTEM_PROMPT: &str = "You are answering a multiple-choice exam question. \
Respond with a single JSON object and nothing else, of the form \
{\"answer\": \"A\" | \"B\" | \"C\" | \"D\", \"reason\": \"<one or two sentences>\"}.";

/// Message in a conversation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One call's worth of input, built from a work item and owned by that call.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Registry model name
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub mode: OutputMode,
}

impl InvocationRequest {
    /// Single-prompt request, used by the CLI smoke test.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, mode: OutputMode) -> Self {
        Self {
            model: model.into(),
            system: system_prompt(mode),
            messages: vec![Message::user(prompt)],
            mode,
        }
    }

    pub fn for_item(item: &WorkItem, model: &str, mode: OutputMode) -> Self {
        Self::new(model, format_question(&item.question, &item.options), mode)
    }
}

fn system_prompt(mode: OutputMode) -> Option<String> {
    match mode {
        OutputMode::Graded => Some(GRADED_SYSTEM_PROMPT.to_string()),
        OutputMode::FreeText => None,
    }
}

/// Render a question and its four options as the user turn.
pub fn format_question(question: &str, options: &[String; 4]) -> String {
    let mut prompt = String::with_capacity(question.len() + 64);
    prompt.push_str(question.trim_end());
    prompt.push('\n');
    for (label, option) in Label::ALL.iter().zip(options) {
        prompt.push_str(&format!("{label}: {option}\n"));
    }
    prompt.push_str("정답:");
    prompt
}

#[derive(Debug, Deserialize)]
struct LooseAnswer {
    answer: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Extract `{answer, reason}` from model text.
///
/// Accepts a fenced ```json block or the first JSON object in the text that
/// decodes as an answer. Otherwise falls back to an explicit answer phrase
/// ("정답은 B입니다", "the answer is B") and then to a leading option letter
/// that stands on its own ("B", "(B) ...", "B. ..."). Returns the reason for
/// failure when none of these match.
pub fn extract_answer(text: &str) -> std::result::Result<Answer, String> {
    let json_error = match json_answer(text) {
        Some(Ok(answer)) => return Ok(answer),
        Some(Err(e)) => Some(e),
        None => None,
    };

    if let Some(label) = letter_answer(text) {
        return Ok(Answer {
            answer: label,
            reason: text.trim().to_string(),
        });
    }

    Err(json_error.unwrap_or_else(|| "no answer found in model output".to_string()))
}

/// First answer object in `text`, or the first decode error if none parses.
fn json_answer(text: &str) -> Option<std::result::Result<Answer, String>> {
    let mut first_error = None;

    if let Ok(fenced) = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```") {
        if let Some(block) = fenced.captures(text).and_then(|c| c.get(1)) {
            match parse_json_answer(block.as_str()) {
                Ok(answer) => return Some(Ok(answer)),
                Err(e) => first_error = Some(e),
            }
        }
    }

    // Objects are decoded as a stream so trailing text after one is ignored.
    for (start, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<LooseAnswer>();
        let result = match stream.next() {
            Some(Ok(loose)) => loose_to_answer(loose),
            Some(Err(e)) => Err(format!("invalid answer JSON: {e}")),
            None => continue,
        };
        match result {
            Ok(answer) => return Some(Ok(answer)),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    first_error.map(Err)
}

fn parse_json_answer(candidate: &str) -> std::result::Result<Answer, String> {
    let loose: LooseAnswer =
        serde_json::from_str(candidate).map_err(|e| format!("invalid answer JSON: {e}"))?;
    loose_to_answer(loose)
}

fn loose_to_answer(loose: LooseAnswer) -> std::result::Result<Answer, String> {
    let answer = loose
        .answer
        .parse::<Label>()
        .map_err(|e| format!("invalid answer field: {e}"))?;
    Ok(Answer {
        answer,
        reason: loose.reason.unwrap_or_default(),
    })
}

fn letter_answer(text: &str) -> Option<Label> {
    // Letters must not run into Latin letters; Hangul may follow ("B입니다").
    let patterns = [
        r"(?:정답|[Aa]nswer)\s*(?:은|는|is)?\s*[:：]?\s*\(?([ABCD])(?:[^A-Za-z]|$)",
        r"^\s*\(([ABCD])\)",
        r"^\s*([ABCD])(?:[).:]|[ \t]*(?:\r?\n|$))",
    ];
    patterns.iter().find_map(|pattern| {
        let re = Regex::new(pattern).ok()?;
        re.captures(text)?.get(1)?.as_str().parse().ok()
    })
}
