use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::utils::error::MettaError;

/// A question/answer training record.
///
/// `rating` is not a field: it is derived from `users` every time it is read,
/// and `users` can only change through methods on this type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub context: String,
    pub generated_by: Option<String>,
    users: BTreeMap<String, i64>,
    pub created_by: String,
    pub created_by_uid: String,
}

impl Entry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            ..Default::default()
        }
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    pub fn with_users(mut self, users: BTreeMap<String, i64>) -> Self {
        self.users = users;
        self
    }

    pub fn users(&self) -> &BTreeMap<String, i64> {
        &self.users
    }

    /// Records (or replaces) a user's rating.
    pub fn rate(&mut self, user: impl Into<String>, score: i64) {
        self.users.insert(user.into(), score);
    }

    pub fn remove_rating(&mut self, user: &str) -> Option<i64> {
        self.users.remove(user)
    }

    /// Mean of all user ratings, `0.0` when nobody rated the entry.
    pub fn rating(&self) -> f64 {
        if self.users.is_empty() {
            return 0.0;
        }
        let total: i64 = self.users.values().sum();
        total as f64 / self.users.len() as f64
    }

    pub fn is_persisted(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn to_instruction(&self) -> Instruction {
        Instruction {
            instruction: self.question.clone(),
            input: String::new(),
            output: self.answer.clone(),
        }
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Entry", 9)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("question", &self.question)?;
        state.serialize_field("answer", &self.answer)?;
        state.serialize_field("context", &self.context)?;
        state.serialize_field("generated_by", &self.generated_by)?;
        state.serialize_field("users", &self.users)?;
        state.serialize_field("created_by", &self.created_by)?;
        state.serialize_field("created_by_uid", &self.created_by_uid)?;
        state.serialize_field("rating", &self.rating())?;
        state.end()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_persisted() {
            return write!(f, "Q: {},  A: {}", self.question, self.answer);
        }
        write!(
            f,
            "Entry(id='{}', question='{}', answer='{}', context='{}', generated_by='{}', users={:?}, created_by='{}', created_by_uid='{}', rating={})",
            self.id,
            self.question,
            self.answer,
            self.context,
            self.generated_by.as_deref().unwrap_or(""),
            self.users,
            self.created_by,
            self.created_by_uid,
            self.rating()
        )
    }
}

/// Fine-tuning record shape used by `export --format instructions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub instruction: String,
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Cut off by the response token limit.
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn is_truncated(&self) -> bool {
        matches!(self, FinishReason::Length)
    }
}

impl From<&str> for FinishReason {
    fn from(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// One candidate returned by the completion service.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub finish_reason: FinishReason,
}

impl Completion {
    pub fn new(content: impl Into<String>, finish_reason: FinishReason) -> Self {
        Self {
            content: content.into(),
            finish_reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    LessThan,
    LessThanOrEqual,
    Equal,
    GreaterThanOrEqual,
    GreaterThan,
    In,
}

impl FromStr for QueryOperator {
    type Err = MettaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "<" => Ok(QueryOperator::LessThan),
            "<=" => Ok(QueryOperator::LessThanOrEqual),
            "==" => Ok(QueryOperator::Equal),
            ">=" => Ok(QueryOperator::GreaterThanOrEqual),
            ">" => Ok(QueryOperator::GreaterThan),
            "in" => Ok(QueryOperator::In),
            other => Err(MettaError::InvalidConfigValueError {
                field: "op_string".to_string(),
                value: other.to_string(),
                reason: "Acceptable values are <, <=, ==, >=, > and in".to_string(),
            }),
        }
    }
}

/// A filter value typed from its command-line spelling.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Array(Vec<QueryValue>),
}

impl QueryValue {
    pub fn parse(raw: &str, op: QueryOperator) -> Self {
        if op == QueryOperator::In {
            return QueryValue::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(Self::parse_scalar)
                    .collect(),
            );
        }
        Self::parse_scalar(raw)
    }

    fn parse_scalar(raw: &str) -> Self {
        match raw {
            "null" => QueryValue::Null,
            "true" => QueryValue::Bool(true),
            "false" => QueryValue::Bool(false),
            _ => {
                if let Ok(i) = raw.parse::<i64>() {
                    QueryValue::Integer(i)
                } else if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
                    QueryValue::Double(f)
                } else {
                    // `NaN`, `inf` and friends stay literal text
                    QueryValue::String(raw.to_string())
                }
            }
        }
    }
}

/// Where the store put a newly added document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub path: String,
}

pub type AddResult = (DateTime<Utc>, DocumentRef);

/// One line of a seed JSONL file.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedTask {
    pub instruction: String,
    #[serde(default)]
    pub instances: Vec<SeedInstance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedInstance {
    #[serde(default)]
    pub input: String,
    pub output: String,
}

impl SeedTask {
    pub fn into_entry(self) -> Option<Entry> {
        let instance = self.instances.into_iter().next()?;
        let question = self.instruction.trim();
        let answer = instance.output.trim();
        if question.is_empty() || answer.is_empty() {
            return None;
        }
        Some(Entry::new(question, answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_is_mean_of_users() {
        let mut entry = Entry::new("q", "a");
        entry.rate("u1", 4);
        entry.rate("u2", 2);
        assert_eq!(entry.rating(), 3.0);
    }

    #[test]
    fn test_rating_without_users() {
        assert_eq!(Entry::new("q", "a").rating(), 0.0);
    }

    #[test]
    fn test_rating_follows_user_changes() {
        let mut entry = Entry::new("q", "a");
        entry.rate("u1", 5);
        assert_eq!(entry.rating(), 5.0);
        entry.rate("u1", 1);
        assert_eq!(entry.rating(), 1.0);
        entry.remove_rating("u1");
        assert_eq!(entry.rating(), 0.0);
    }

    #[test]
    fn test_display_transient_and_persisted() {
        let mut entry = Entry::new("What is 2+2?", "4");
        assert_eq!(entry.to_string(), "Q: What is 2+2?,  A: 4");

        entry.id = "abc".to_string();
        let shown = entry.to_string();
        assert!(shown.starts_with("Entry(id='abc'"));
        assert!(shown.contains("rating=0"));
    }

    #[test]
    fn test_serialize_includes_rating() {
        let entry = Entry::new("q", "a").with_users(BTreeMap::from([
            ("u1".to_string(), 4),
            ("u2".to_string(), 2),
        ]));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["rating"], 3.0);
        assert_eq!(json["users"]["u1"], 4);
    }

    #[test]
    fn test_query_operator_parsing() {
        assert_eq!("<=".parse::<QueryOperator>().unwrap(), QueryOperator::LessThanOrEqual);
        assert_eq!("in".parse::<QueryOperator>().unwrap(), QueryOperator::In);
        assert!("!=".parse::<QueryOperator>().is_err());
    }

    #[test]
    fn test_query_value_typing() {
        assert_eq!(
            QueryValue::parse("gpt-3.5-turbo", QueryOperator::Equal),
            QueryValue::String("gpt-3.5-turbo".to_string())
        );
        assert_eq!(QueryValue::parse("3", QueryOperator::GreaterThan), QueryValue::Integer(3));
        assert_eq!(QueryValue::parse("null", QueryOperator::Equal), QueryValue::Null);
        assert_eq!(
            QueryValue::parse("a, b", QueryOperator::In),
            QueryValue::Array(vec![
                QueryValue::String("a".to_string()),
                QueryValue::String("b".to_string())
            ])
        );
    }

    #[test]
    fn test_query_value_keeps_non_finite_spellings_as_text() {
        assert_eq!(QueryValue::parse("2.5", QueryOperator::Equal), QueryValue::Double(2.5));
        for raw in ["NaN", "nan", "inf", "-inf", "infinity", "Infinity"] {
            assert_eq!(
                QueryValue::parse(raw, QueryOperator::Equal),
                QueryValue::String(raw.to_string())
            );
        }
        assert_eq!(
            QueryValue::parse("1.5,NaN", QueryOperator::In),
            QueryValue::Array(vec![QueryValue::Double(1.5), QueryValue::String("NaN".to_string())])
        );
    }

    #[test]
    fn test_seed_task_into_entry() {
        let task: SeedTask = serde_json::from_str(
            r#"{"instruction": " What is MeTTa? ", "instances": [{"input": "", "output": " A language. "}]}"#,
        )
        .unwrap();
        let entry = task.into_entry().unwrap();
        assert_eq!(entry.question, "What is MeTTa?");
        assert_eq!(entry.answer, "A language.");
        assert_eq!(entry.generated_by, None);
        assert!(entry.users().is_empty());

        let empty: SeedTask = serde_json::from_str(r#"{"instruction": "x", "instances": []}"#).unwrap();
        assert!(empty.into_entry().is_none());
    }
}
