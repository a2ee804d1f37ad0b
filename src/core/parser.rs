use crate::domain::model::{Completion, Entry, FinishReason};
use regex::Regex;
use std::sync::OnceLock;

fn numbered_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.").expect("static regex"))
}

/// Extracts Q&A pairs from one completion.
///
/// The model is prompted to answer in this shape:
///
/// ```text
/// 1. Question
/// - Answer
///
/// 2. Question
/// - Answer
/// ```
///
/// Anything else is skipped. A question without an answer is dropped. When
/// the completion was cut off by the token limit the last pair is dropped as
/// well, since there is no telling whether its answer is complete.
pub fn parse_single_completion(text: &str, finish_reason: &FinishReason, model_id: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut question = "";

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if numbered_line().is_match(line) {
            // 題號之後的文字；同時丟棄尚未配對的問題
            question = line.split_once('.').map(|(_, rest)| rest.trim()).unwrap_or("");
        } else if let Some(rest) = line.strip_prefix('-') {
            let answer = rest.trim();
            if !question.is_empty() && !answer.is_empty() {
                entries.push(Entry::new(question, answer).with_created_by(model_id));
                question = "";
            }
        }
    }

    if finish_reason.is_truncated() && entries.pop().is_some() {
        tracing::debug!("Completion hit the length limit, dropped the last pair");
    }

    entries
}

pub fn parse_multiple(completions: &[Completion], model_id: &str) -> Vec<Entry> {
    completions
        .iter()
        .flat_map(|c| parse_single_completion(&c.content, &c.finish_reason, model_id))
        .collect()
}
