use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::chunks::{SlotElement, StoredSlot};
use crate::error::{FeedbackError, Result};

/// Placeholder used wherever a positional value is missing.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Negative => "Negative",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Positive" => Some(Sentiment::Positive),
            "Negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored comment: plain text, or an object carrying its own annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommentEntry {
    Text(String),
    Annotated {
        #[serde(
            default,
            deserialize_with = "lenient_text",
            skip_serializing_if = "Option::is_none"
        )]
        text: Option<String>,
        #[serde(
            default,
            deserialize_with = "lenient_text",
            skip_serializing_if = "Option::is_none"
        )]
        sentiment: Option<String>,
        #[serde(
            default,
            deserialize_with = "lenient_text",
            skip_serializing_if = "Option::is_none"
        )]
        topic: Option<String>,
    },
}

impl SlotElement for CommentEntry {
    fn placeholder() -> Self {
        CommentEntry::Annotated {
            text: None,
            sentiment: None,
            topic: None,
        }
    }
}

/// A stored topic assignment. Older producers wrote bare labels, newer ones
/// write objects that may embed a sentiment of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicEntry {
    Label(String),
    Annotated {
        #[serde(
            default,
            deserialize_with = "lenient_text",
            skip_serializing_if = "Option::is_none"
        )]
        topic: Option<String>,
        #[serde(
            default,
            deserialize_with = "lenient_text",
            skip_serializing_if = "Option::is_none"
        )]
        sentiment: Option<String>,
        #[serde(
            default,
            deserialize_with = "lenient_number",
            skip_serializing_if = "Option::is_none"
        )]
        probability: Option<f64>,
    },
}

impl SlotElement for TopicEntry {
    fn placeholder() -> Self {
        TopicEntry::Annotated {
            topic: None,
            sentiment: None,
            probability: None,
        }
    }
}

/// Keeps string values; anything else reads as absent.
fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        _ => None,
    })
}

/// Accepts numbers and numeric strings; anything else reads as absent.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

impl TopicEntry {
    pub fn topic(&self) -> Option<&str> {
        match self {
            TopicEntry::Label(label) => Some(label.as_str()),
            TopicEntry::Annotated { topic, .. } => topic.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub topic: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub word: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub category: String,
    pub percentage: f64,
}

/// Classifier output for one CSV upload, index-aligned by comment position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub comments: Vec<String>,
    pub sentiments: Vec<Sentiment>,
    pub topics: Vec<TopicAssignment>,
    pub top_keywords: Vec<Keyword>,
    pub category_distribution: Vec<CategoryShare>,
}

impl AnalysisResult {
    pub fn validate(&self) -> Result<()> {
        if self.sentiments.len() != self.comments.len() || self.topics.len() != self.comments.len()
        {
            return Err(FeedbackError::Validation(format!(
                "misaligned analysis: {} comments, {} sentiments, {} topics",
                self.comments.len(),
                self.sentiments.len(),
                self.topics.len()
            )));
        }
        Ok(())
    }

    /// Topic assignments in their persisted form.
    pub fn topic_entries(&self) -> Vec<TopicEntry> {
        self.topics
            .iter()
            .map(|assignment| TopicEntry::Annotated {
                topic: Some(assignment.topic.clone()),
                sentiment: None,
                probability: Some(assignment.probability),
            })
            .collect()
    }

    pub fn comment_entries(&self) -> Vec<CommentEntry> {
        self.comments
            .iter()
            .cloned()
            .map(CommentEntry::Text)
            .collect()
    }

    pub fn sentiment_labels(&self) -> Vec<String> {
        self.sentiments
            .iter()
            .map(|sentiment| sentiment.as_str().to_string())
            .collect()
    }
}

/// Academic period an upload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub start_year: u32,
    pub end_year: u32,
    pub semester: u32,
}

impl Term {
    pub fn new(start_year: u32, end_year: u32, semester: u32) -> Result<Self> {
        if start_year == 0 || end_year == 0 || semester == 0 {
            return Err(FeedbackError::Validation(
                "Missing required fields for the filename".to_string(),
            ));
        }
        if end_year < start_year {
            return Err(FeedbackError::Validation(format!(
                "end year {end_year} precedes start year {start_year}"
            )));
        }
        Ok(Self {
            start_year,
            end_year,
            semester,
        })
    }

    pub fn filename(&self) -> String {
        format!("{}_{}_{}", self.start_year, self.end_year, self.semester)
    }
}

/// Analysis waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedUpload {
    pub filename: String,
    pub teacher_uname: String,
    pub grade: Option<String>,
    pub recommendation: String,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub id: Uuid,
    pub filename: String,
    pub teacher_uname: String,
    pub recommendation: String,
    pub grade: Option<String>,
    pub upload_date: DateTime<Utc>,
    /// Index `i` holds slot `i + 1`; `None` when the slot was never written.
    pub slots: Vec<Option<StoredSlot>>,
}

impl UploadRecord {
    pub fn populated_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[derive(Debug, Clone)]
pub struct TeacherRecord {
    pub uname: String,
    pub first_name: String,
    pub last_name: String,
    pub campus_acronym: String,
    pub college_acronym: Option<String>,
    pub program_acronym: Option<String>,
    pub is_deleted: bool,
}

/// Organizational filter a report is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Teacher {
        uname: String,
    },
    Program {
        campus: String,
        college: String,
        program: String,
    },
    College {
        campus: String,
        college: String,
    },
    Campus {
        campus: String,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Teacher { uname } => write!(f, "teacher {uname}"),
            Scope::Program {
                campus,
                college,
                program,
            } => write!(f, "program {program} ({college}, {campus})"),
            Scope::College { campus, college } => write!(f, "college {college} ({campus})"),
            Scope::Campus { campus } => write!(f, "campus {campus}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFilter {
    Overall,
    Named(String),
}

impl FileFilter {
    pub const OVERALL: &'static str = "overall";

    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") | Some(Self::OVERALL) => FileFilter::Overall,
            Some(name) => FileFilter::Named(name.to_string()),
        }
    }
}

/// One term bucket of a report; in multi-teacher scopes several uploads
/// sharing a filename land in the same bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileView {
    pub filename: String,
    pub comments: Vec<CommentEntry>,
    pub sentiments: Vec<String>,
    pub topics: Vec<TopicEntry>,
    pub positive: usize,
    pub negative: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSentiment {
    pub filename: String,
    pub sentiment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSentiment {
    pub topic: String,
    pub sentiment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedComment {
    pub text: String,
    pub sentiment: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeReport {
    pub scope: String,
    pub selected_file: Option<String>,
    pub files: Vec<FileView>,
    /// Counts for the selected file, or the whole scope when none is selected.
    pub positive: usize,
    pub negative: usize,
    pub total_positive: usize,
    pub total_negative: usize,
    pub sentiments: Vec<FileSentiment>,
    pub topics: Vec<TopicSentiment>,
    pub comments: Vec<AnnotatedComment>,
    pub recommendation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_builds_synthetic_filename() {
        let term = Term::new(2021, 2022, 1).unwrap();
        assert_eq!(term.filename(), "2021_2022_1");
    }

    #[test]
    fn term_rejects_missing_parts() {
        assert!(matches!(
            Term::new(2021, 0, 1),
            Err(FeedbackError::Validation(_))
        ));
        assert!(Term::new(2023, 2022, 2).is_err());
    }

    #[test]
    fn file_filter_defaults_to_overall() {
        assert_eq!(FileFilter::from_param(None), FileFilter::Overall);
        assert_eq!(FileFilter::from_param(Some("overall")), FileFilter::Overall);
        assert_eq!(
            FileFilter::from_param(Some("2021_2022_1")),
            FileFilter::Named("2021_2022_1".to_string())
        );
    }

    #[test]
    fn topic_entries_accept_both_shapes() {
        let entries: Vec<TopicEntry> = serde_json::from_str(
            r#"["Tardiness", {"topic": "Cleanliness", "sentiment": "Negative"}]"#,
        )
        .unwrap();
        assert_eq!(entries[0], TopicEntry::Label("Tardiness".to_string()));
        assert_eq!(
            entries[1],
            TopicEntry::Annotated {
                topic: Some("Cleanliness".to_string()),
                sentiment: Some("Negative".to_string()),
                probability: None,
            }
        );
        assert_eq!(entries[1].topic(), Some("Cleanliness"));
    }

    #[test]
    fn analysis_validation_catches_misalignment() {
        let result = AnalysisResult {
            comments: vec!["good".to_string(), "late".to_string()],
            sentiments: vec![Sentiment::Positive],
            topics: vec![],
            top_keywords: vec![],
            category_distribution: vec![],
        };
        assert!(matches!(
            result.validate(),
            Err(FeedbackError::Validation(_))
        ));
    }
}
