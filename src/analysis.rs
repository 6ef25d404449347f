use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::info;

use crate::chunks::SlotLayout;
use crate::collaborators::{RecommendationGenerator, SentimentClassifier, TopicModeler};
use crate::error::{FeedbackError, Result};
use crate::models::{AnalysisResult, StagedUpload, Term};
use crate::recommend::{build_feedback_summary, generate_recommendation};

const COMMENT_COLUMN: &str = "comment";

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub teacher_uname: String,
    pub term: Term,
    pub grade: Option<String>,
}

/// Reads the `comment` column of a CSV document, one entry per data row.
pub fn read_comments<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let column = reader
        .headers()?
        .iter()
        .position(|header| header.trim() == COMMENT_COLUMN)
        .ok_or_else(|| {
            FeedbackError::Validation("CSV file missing required 'comment' column.".to_string())
        })?;

    let mut comments = Vec::new();
    for record in reader.records() {
        let record = record?;
        comments.push(record.get(column).unwrap_or_default().trim().to_string());
    }

    if comments.is_empty() {
        return Err(FeedbackError::Validation(
            "CSV file contains no comments.".to_string(),
        ));
    }
    Ok(comments)
}

pub fn read_comments_csv(path: &Path) -> Result<Vec<String>> {
    read_comments(File::open(path)?)
}

/// Runs both classifiers over the comments and asks for report text.
///
/// Classifier failures abort the upload; a generator failure only replaces
/// the report text with the fallback message.
pub async fn analyze_comments(
    comments: Vec<String>,
    request: &UploadRequest,
    classifier: &dyn SentimentClassifier,
    topic_modeler: &dyn TopicModeler,
    generator: &dyn RecommendationGenerator,
    layout: SlotLayout,
) -> Result<StagedUpload> {
    if request.teacher_uname.trim().is_empty() {
        return Err(FeedbackError::Validation(
            "Missing teacher username".to_string(),
        ));
    }
    layout.check_rows(comments.len())?;

    let sentiments = classifier.predict(&comments).await?;
    if sentiments.len() != comments.len() {
        return Err(FeedbackError::Collaborator(format!(
            "classifier returned {} labels for {} comments",
            sentiments.len(),
            comments.len()
        )));
    }

    let topic_output = topic_modeler.process(&comments).await?;
    if topic_output.assignments.len() != comments.len() {
        return Err(FeedbackError::Collaborator(format!(
            "topic pipeline returned {} assignments for {} comments",
            topic_output.assignments.len(),
            comments.len()
        )));
    }

    let analysis = AnalysisResult {
        comments,
        sentiments,
        topics: topic_output.assignments,
        top_keywords: topic_output.top_keywords,
        category_distribution: topic_output.category_distribution,
    };
    analysis.validate()?;

    let summary = build_feedback_summary(
        &analysis.sentiments,
        &analysis.topics,
        &analysis.comments,
        &analysis.top_keywords,
        &analysis.category_distribution,
    );
    let recommendation = generate_recommendation(generator, &summary).await;

    let filename = request.term.filename();
    info!(
        teacher = %request.teacher_uname,
        filename = %filename,
        comments = analysis.comments.len(),
        positive = summary.positive,
        negative = summary.negative,
        "analyzed upload"
    );

    Ok(StagedUpload {
        filename,
        teacher_uname: request.teacher_uname.clone(),
        grade: request.grade.clone(),
        recommendation,
        analysis,
    })
}
