//! Scope-level aggregation of upload records.
//!
//! Every report view starts by reconstructing each record from its slots,
//! then merges the reconstructed records into per-term buckets sorted by
//! academic term.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, debug_span};
use uuid::Uuid;

use crate::chunks::{join, SlotFamily};
use crate::error::{NotFound, Result};
use crate::models::{
    AnnotatedComment, CommentEntry, FileFilter, FileSentiment, FileView, Scope, ScopeReport,
    Sentiment, TopicEntry, TopicSentiment, UploadRecord, UNKNOWN,
};

pub const NEGATIVE_LEANING_RECOMMENDATION: &str =
    "There are more negative comments. Consider scheduling professional development seminars.";
pub const POSITIVE_LEANING_RECOMMENDATION: &str =
    "Feedback is generally positive, but keep monitoring for potential issues.";

/// `(start_year, end_year, semester)`.
pub type TermKey = (u32, u32, u32);

/// Key given to filenames that do not follow the term convention.
pub const FALLBACK_TERM_KEY: TermKey = (9999, 9999, 9);

#[derive(Debug, Clone)]
pub struct ReconstructedRecord {
    pub id: Uuid,
    pub filename: String,
    pub recommendation: String,
    pub upload_date: DateTime<Utc>,
    pub comments: Vec<CommentEntry>,
    pub sentiments: Vec<String>,
    pub topics: Vec<TopicEntry>,
}

pub fn reconstruct(record: &UploadRecord) -> ReconstructedRecord {
    let _span = debug_span!("reconstruct", upload = %record.id, filename = %record.filename)
        .entered();

    ReconstructedRecord {
        id: record.id,
        filename: record.filename.clone(),
        recommendation: record.recommendation.clone(),
        upload_date: record.upload_date,
        comments: join(&record.slots, SlotFamily::Comments),
        sentiments: join(&record.slots, SlotFamily::Sentiments),
        topics: join(&record.slots, SlotFamily::Topics),
    }
}

/// Parses `{start}_{end}_{semester}` (optionally with a `.csv` suffix).
pub fn term_sort_key(filename: &str) -> TermKey {
    let stem = filename.strip_suffix(".csv").unwrap_or(filename);
    let parts: Vec<&str> = stem.split('_').collect();
    if let [start, end, semester] = parts.as_slice() {
        if let (Ok(start), Ok(end), Ok(semester)) = (
            start.trim().parse(),
            end.trim().parse(),
            semester.trim().parse(),
        ) {
            return (start, end, semester);
        }
    }
    FALLBACK_TERM_KEY
}

#[derive(Debug, Clone)]
struct FileBucket {
    filename: String,
    comments: Vec<CommentEntry>,
    sentiments: Vec<String>,
    topics: Vec<TopicEntry>,
    /// From the earliest upload in the bucket.
    recommendation: String,
}

/// Reconstructs records and merges those sharing a filename, oldest upload
/// first, then orders the buckets by term.
fn group_by_file(records: &[UploadRecord]) -> Vec<FileBucket> {
    let mut ordered: Vec<&UploadRecord> = records.iter().collect();
    ordered.sort_by(|a, b| {
        a.upload_date
            .cmp(&b.upload_date)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut buckets: HashMap<String, FileBucket> = HashMap::new();
    for record in ordered {
        let mut rebuilt = reconstruct(record);
        let bucket = buckets
            .entry(rebuilt.filename.clone())
            .or_insert_with(|| FileBucket {
                filename: rebuilt.filename.clone(),
                comments: Vec::new(),
                sentiments: Vec::new(),
                topics: Vec::new(),
                recommendation: rebuilt.recommendation.clone(),
            });
        bucket.comments.append(&mut rebuilt.comments);
        bucket.sentiments.append(&mut rebuilt.sentiments);
        bucket.topics.append(&mut rebuilt.topics);
    }

    let mut files: Vec<FileBucket> = buckets.into_values().collect();
    files.sort_by(|a, b| {
        term_sort_key(&a.filename)
            .cmp(&term_sort_key(&b.filename))
            .then_with(|| a.filename.cmp(&b.filename))
    });
    files
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

fn positional_sentiment(sentiments: &[String], index: usize) -> &str {
    present(sentiments.get(index).map(String::as_str)).unwrap_or(UNKNOWN)
}

/// Pairs each topic entry with a sentiment. A sentiment embedded in the
/// entry wins over the one at the same position in `sentiments`.
pub fn pair_topics(sentiments: &[String], topics: &[TopicEntry]) -> Vec<TopicSentiment> {
    topics
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let positional = positional_sentiment(sentiments, index);
            let (topic, sentiment) = match entry {
                TopicEntry::Label(label) => (present(Some(label.as_str())), positional),
                TopicEntry::Annotated {
                    topic, sentiment, ..
                } => (
                    present(topic.as_deref()),
                    present(sentiment.as_deref()).unwrap_or(positional),
                ),
            };
            TopicSentiment {
                topic: topic.unwrap_or(UNKNOWN).to_string(),
                sentiment: sentiment.to_string(),
            }
        })
        .collect()
}

/// Attaches sentiment and topic to every comment by position. Gaps become
/// `Unknown` so the output stays aligned with the input.
pub fn annotate_comments(
    sentiments: &[String],
    topics: &[TopicEntry],
    comments: &[CommentEntry],
) -> Vec<AnnotatedComment> {
    comments
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let fallback_sentiment = positional_sentiment(sentiments, index);
            let fallback_topic = topics.get(index).and_then(|entry| present(entry.topic()));

            let (text, sentiment, topic) = match entry {
                CommentEntry::Text(text) => {
                    (Some(text.as_str()), fallback_sentiment, fallback_topic)
                }
                CommentEntry::Annotated {
                    text,
                    sentiment,
                    topic,
                } => (
                    present(text.as_deref()),
                    present(sentiment.as_deref()).unwrap_or(fallback_sentiment),
                    present(topic.as_deref()).or(fallback_topic),
                ),
            };

            AnnotatedComment {
                text: text.unwrap_or(UNKNOWN).to_string(),
                sentiment: sentiment.to_string(),
                topic: topic.unwrap_or(UNKNOWN).to_string(),
            }
        })
        .collect()
}

pub fn count_sentiment(sentiments: &[String], target: Sentiment) -> usize {
    sentiments
        .iter()
        .filter(|label| Sentiment::from_label(label) == Some(target))
        .count()
}

/// Fixed two-branch recommendation used when no single file is selected.
pub fn threshold_recommendation(positive: usize, negative: usize) -> &'static str {
    if negative > positive {
        NEGATIVE_LEANING_RECOMMENDATION
    } else {
        POSITIVE_LEANING_RECOMMENDATION
    }
}

pub fn build_scope_report(
    records: &[UploadRecord],
    scope: &Scope,
    filter: &FileFilter,
) -> Result<ScopeReport> {
    if records.is_empty() {
        return Err(NotFound::NoUploads {
            scope: scope.to_string(),
        }
        .into());
    }

    let buckets = group_by_file(records);

    let mut files = Vec::with_capacity(buckets.len());
    let mut sentiments = Vec::new();
    let mut topics = Vec::new();
    let mut comments = Vec::new();

    for bucket in &buckets {
        sentiments.extend(bucket.sentiments.iter().map(|label| FileSentiment {
            filename: bucket.filename.clone(),
            sentiment: label.clone(),
        }));
        topics.extend(pair_topics(&bucket.sentiments, &bucket.topics));
        comments.extend(annotate_comments(
            &bucket.sentiments,
            &bucket.topics,
            &bucket.comments,
        ));

        files.push(FileView {
            filename: bucket.filename.clone(),
            comments: bucket.comments.clone(),
            sentiments: bucket.sentiments.clone(),
            topics: bucket.topics.clone(),
            positive: count_sentiment(&bucket.sentiments, Sentiment::Positive),
            negative: count_sentiment(&bucket.sentiments, Sentiment::Negative),
        });
    }

    let total_positive = files.iter().map(|file| file.positive).sum();
    let total_negative = files.iter().map(|file| file.negative).sum();

    let (selected_file, positive, negative, recommendation) = match filter {
        FileFilter::Overall => (
            None,
            total_positive,
            total_negative,
            threshold_recommendation(total_positive, total_negative).to_string(),
        ),
        FileFilter::Named(name) => {
            let position = files
                .iter()
                .position(|file| &file.filename == name)
                .ok_or_else(|| NotFound::FileNotFound {
                    filename: name.clone(),
                    scope: scope.to_string(),
                })?;
            (
                Some(name.clone()),
                files[position].positive,
                files[position].negative,
                buckets[position].recommendation.clone(),
            )
        }
    };

    debug!(
        scope = %scope,
        records = records.len(),
        files = files.len(),
        comments = comments.len(),
        "built scope report"
    );

    Ok(ScopeReport {
        scope: scope.to_string(),
        selected_file,
        files,
        positive,
        negative,
        total_positive,
        total_negative,
        sentiments,
        topics,
        comments,
        recommendation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{split_families, SlotLayout, SlotPayload, StoredSlot};
    use crate::error::FeedbackError;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn record(
        teacher: &str,
        filename: &str,
        minutes: i64,
        sentiments: &[&str],
        recommendation: &str,
    ) -> UploadRecord {
        let comments: Vec<CommentEntry> = (0..sentiments.len())
            .map(|i| CommentEntry::Text(format!("{teacher} {filename} #{i}")))
            .collect();
        let labels: Vec<String> = sentiments.iter().map(|s| s.to_string()).collect();
        let topics: Vec<TopicEntry> = (0..sentiments.len())
            .map(|_| TopicEntry::Label("Teaching Quality".to_string()))
            .collect();
        // small slots so every record spans several of them
        let layout = SlotLayout::new(8, 2).unwrap();
        let slots = split_families(&comments, &labels, &topics, layout).unwrap();

        UploadRecord {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            teacher_uname: teacher.to_string(),
            recommendation: recommendation.to_string(),
            grade: None,
            upload_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minutes),
            slots: slots.into_iter().map(Some).collect(),
        }
    }

    fn teacher_scope() -> Scope {
        Scope::Teacher {
            uname: "mreyes".to_string(),
        }
    }

    #[test]
    fn term_key_parses_well_formed_names() {
        assert_eq!(term_sort_key("2021_2022_1"), (2021, 2022, 1));
        assert_eq!(term_sort_key("2021_2022_2.csv"), (2021, 2022, 2));
    }

    #[test]
    fn term_key_falls_back_for_malformed_names() {
        assert_eq!(term_sort_key("garbage"), FALLBACK_TERM_KEY);
        assert_eq!(term_sort_key("2021_2022"), FALLBACK_TERM_KEY);
        assert_eq!(term_sort_key("2021_x_1"), FALLBACK_TERM_KEY);
        assert!(term_sort_key("2030_2031_3") < term_sort_key("garbage"));
    }

    #[test]
    fn topics_pair_with_positional_or_embedded_sentiment() {
        let sentiments = vec!["Positive".to_string(), "Negative".to_string()];
        let topics = vec![
            TopicEntry::Label("Tardiness".to_string()),
            TopicEntry::Annotated {
                topic: Some("Cleanliness".to_string()),
                sentiment: Some("Negative".to_string()),
                probability: None,
            },
        ];
        let paired = pair_topics(&sentiments, &topics);
        assert_eq!(
            paired,
            vec![
                TopicSentiment {
                    topic: "Tardiness".to_string(),
                    sentiment: "Positive".to_string()
                },
                TopicSentiment {
                    topic: "Cleanliness".to_string(),
                    sentiment: "Negative".to_string()
                },
            ]
        );
    }

    #[test]
    fn embedded_sentiment_overrides_position() {
        let sentiments = vec!["Positive".to_string()];
        let topics = vec![TopicEntry::Annotated {
            topic: Some("Cleanliness".to_string()),
            sentiment: Some("Negative".to_string()),
            probability: Some(80.0),
        }];
        assert_eq!(pair_topics(&sentiments, &topics)[0].sentiment, "Negative");

        let without_embedded = vec![TopicEntry::Annotated {
            topic: Some("Cleanliness".to_string()),
            sentiment: None,
            probability: Some(80.0),
        }];
        assert_eq!(
            pair_topics(&sentiments, &without_embedded)[0].sentiment,
            "Positive"
        );
    }

    #[test]
    fn missing_positions_become_unknown() {
        let sentiments = vec!["Negative".to_string()];
        let topics = vec![
            TopicEntry::Label("Tardiness".to_string()),
            TopicEntry::Annotated {
                topic: None,
                sentiment: None,
                probability: None,
            },
        ];
        let comments = vec![
            CommentEntry::Text("late again".to_string()),
            CommentEntry::Annotated {
                text: None,
                sentiment: Some("Positive".to_string()),
                topic: None,
            },
            CommentEntry::Text("no topic here".to_string()),
        ];

        let paired = pair_topics(&sentiments, &topics);
        assert_eq!(paired[1].topic, UNKNOWN);
        assert_eq!(paired[1].sentiment, UNKNOWN);

        let annotated = annotate_comments(&sentiments, &topics, &comments);
        assert_eq!(annotated.len(), 3);
        assert_eq!(annotated[0].sentiment, "Negative");
        assert_eq!(annotated[0].topic, "Tardiness");
        assert_eq!(annotated[1].text, UNKNOWN);
        assert_eq!(annotated[1].sentiment, "Positive");
        assert_eq!(annotated[1].topic, UNKNOWN);
        assert_eq!(annotated[2].sentiment, UNKNOWN);
        assert_eq!(annotated[2].topic, UNKNOWN);
    }

    #[test]
    fn files_are_sorted_by_term_whatever_the_input_order() {
        let records = vec![
            record("mreyes", "garbage", 0, &["Positive"], "a"),
            record("mreyes", "2022_2023_1", 1, &["Negative"], "b"),
            record("mreyes", "2021_2022_2", 2, &["Positive"], "c"),
            record("mreyes", "2021_2022_1", 3, &["Positive", "Negative"], "d"),
        ];
        let report = build_scope_report(&records, &teacher_scope(), &FileFilter::Overall).unwrap();
        let names: Vec<&str> = report.files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(
            names,
            vec!["2021_2022_1", "2021_2022_2", "2022_2023_1", "garbage"]
        );

        let mut reversed = records.clone();
        reversed.reverse();
        let mut rotated = records.clone();
        rotated.rotate_left(2);
        for permutation in [reversed, rotated] {
            let other =
                build_scope_report(&permutation, &teacher_scope(), &FileFilter::Overall).unwrap();
            assert_eq!(other, report);
        }
    }

    #[test]
    fn uploads_sharing_a_term_merge_in_upload_order() {
        let scope = Scope::College {
            campus: "MAIN".to_string(),
            college: "CCS".to_string(),
        };
        let later = record("jdelacruz", "2023_2024_1", 10, &["Negative", "Negative"], "later");
        let earlier = record("mreyes", "2023_2024_1", 5, &["Positive", "Positive", "Positive"], "earlier");
        let report =
            build_scope_report(&[later, earlier], &scope, &FileFilter::Overall).unwrap();

        assert_eq!(report.files.len(), 1);
        let file = &report.files[0];
        assert_eq!(file.comments.len(), 5);
        assert_eq!(
            file.comments[0],
            CommentEntry::Text("mreyes 2023_2024_1 #0".to_string())
        );
        assert_eq!(file.positive, 3);
        assert_eq!(file.negative, 2);
        assert_eq!(report.sentiments.len(), 5);
        assert_eq!(report.topics.len(), 5);
        assert_eq!(report.comments.len(), 5);
        assert_eq!(report.comments[4].sentiment, "Negative");
    }

    #[test]
    fn overall_view_uses_threshold_recommendation() {
        let records = vec![
            record("mreyes", "2021_2022_1", 0, &["Positive", "Negative", "Negative"], "first"),
            record(
                "mreyes",
                "2021_2022_2",
                1,
                &["Positive", "Positive", "Negative", "Negative", "Negative", "Negative", "Negative"],
                "second",
            ),
        ];
        let report = build_scope_report(&records, &teacher_scope(), &FileFilter::Overall).unwrap();
        assert_eq!(report.positive, 3);
        assert_eq!(report.negative, 7);
        assert_eq!(report.recommendation, NEGATIVE_LEANING_RECOMMENDATION);
        assert_eq!(report.selected_file, None);

        let named = build_scope_report(
            &records,
            &teacher_scope(),
            &FileFilter::Named("2021_2022_1".to_string()),
        )
        .unwrap();
        assert_eq!(named.recommendation, "first");
        assert_eq!(named.positive, 1);
        assert_eq!(named.negative, 2);
        assert_eq!(named.total_positive, 3);
        assert_eq!(named.total_negative, 7);
        assert_eq!(named.selected_file.as_deref(), Some("2021_2022_1"));
    }

    #[test]
    fn ties_lean_positive() {
        assert_eq!(threshold_recommendation(2, 2), POSITIVE_LEANING_RECOMMENDATION);
        assert_eq!(threshold_recommendation(0, 1), NEGATIVE_LEANING_RECOMMENDATION);
    }

    #[test]
    fn empty_scope_and_missing_file_are_different_not_found_errors() {
        match build_scope_report(&[], &teacher_scope(), &FileFilter::Overall) {
            Err(FeedbackError::NotFound(NotFound::NoUploads { scope })) => {
                assert_eq!(scope, "teacher mreyes")
            }
            other => panic!("expected no uploads, got {other:?}"),
        }

        let records = vec![record("mreyes", "2021_2022_1", 0, &["Positive"], "r")];
        match build_scope_report(
            &records,
            &teacher_scope(),
            &FileFilter::Named("2019_2020_1".to_string()),
        ) {
            Err(FeedbackError::NotFound(NotFound::FileNotFound { filename, .. })) => {
                assert_eq!(filename, "2019_2020_1")
            }
            other => panic!("expected file not found, got {other:?}"),
        }
    }

    #[test]
    fn malformed_slot_shrinks_the_record_instead_of_failing() {
        let mut damaged = record(
            "mreyes",
            "2021_2022_1",
            0,
            &["Positive", "Negative", "Positive", "Negative"],
            "r",
        );
        // slot 2 of the comments family is corrupt legacy text
        damaged.slots[1] = Some(StoredSlot {
            comments: Some(SlotPayload::Encoded("[\"unterminated".to_string())),
            ..damaged.slots[1].clone().unwrap()
        });
        let healthy = record("mreyes", "2021_2022_2", 1, &["Positive"], "r2");

        let rebuilt = reconstruct(&damaged);
        assert_eq!(rebuilt.comments.len(), 2);
        assert_eq!(rebuilt.sentiments.len(), 4);

        let report =
            build_scope_report(&[damaged, healthy], &teacher_scope(), &FileFilter::Overall)
                .unwrap();
        assert_eq!(report.files[0].comments.len(), 2);
        assert_eq!(report.comments.len(), 3);
    }

    #[test]
    fn null_elements_become_unknown_and_keep_families_aligned() {
        let slot = |comments, sentiments, topics| {
            Some(StoredSlot {
                comments: SlotPayload::from_column(Some(comments)),
                sentiments: SlotPayload::from_column(Some(sentiments)),
                topics: SlotPayload::from_column(Some(topics)),
            })
        };
        let gappy = UploadRecord {
            id: Uuid::new_v4(),
            filename: "2022_2023_1".to_string(),
            teacher_uname: "mreyes".to_string(),
            recommendation: "r".to_string(),
            grade: None,
            upload_date: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            slots: vec![
                slot(
                    json!(["good", null, "late"]),
                    json!(["Positive", "Negative", null]),
                    json!(["Tardiness", null, {"topic": "Tardiness", "probability": "n/a"}]),
                ),
                slot(
                    json!(["patient"]),
                    json!(["Positive"]),
                    json!(["Teaching Quality"]),
                ),
            ],
        };

        let rebuilt = reconstruct(&gappy);
        assert_eq!(rebuilt.comments.len(), 4);
        assert_eq!(rebuilt.sentiments.len(), 4);
        assert_eq!(rebuilt.topics.len(), 4);
        assert_eq!(rebuilt.topics[2].topic(), Some("Tardiness"));

        let report =
            build_scope_report(&[gappy], &teacher_scope(), &FileFilter::Overall).unwrap();
        let annotated: Vec<(&str, &str, &str)> = report
            .comments
            .iter()
            .map(|c| (c.text.as_str(), c.sentiment.as_str(), c.topic.as_str()))
            .collect();
        assert_eq!(
            annotated,
            vec![
                ("good", "Positive", "Tardiness"),
                (UNKNOWN, "Negative", UNKNOWN),
                ("late", UNKNOWN, "Tardiness"),
                ("patient", "Positive", "Teaching Quality"),
            ]
        );
        assert_eq!((report.positive, report.negative), (2, 1));
    }

    #[test]
    fn legacy_text_payloads_reconstruct_transparently() {
        let legacy = UploadRecord {
            id: Uuid::new_v4(),
            filename: "2020_2021_1".to_string(),
            teacher_uname: "mreyes".to_string(),
            recommendation: "legacy".to_string(),
            grade: None,
            upload_date: Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap(),
            slots: vec![Some(StoredSlot {
                comments: SlotPayload::from_column(Some(json!("[\"clear\", \"late\"]"))),
                sentiments: SlotPayload::from_column(Some(json!(["Positive", "Negative"]))),
                topics: SlotPayload::from_column(Some(json!(
                    "[\"Teaching Quality\", {\"topic\": \"Tardiness\", \"sentiment\": \"Negative\"}]"
                ))),
            })],
        };
        let rebuilt = reconstruct(&legacy);
        assert_eq!(rebuilt.comments.len(), 2);
        assert_eq!(rebuilt.topics[1].topic(), Some("Tardiness"));
    }
}
