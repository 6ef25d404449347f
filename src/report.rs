use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{ScopeReport, Sentiment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBreakdown {
    pub topic: String,
    pub positive: usize,
    pub negative: usize,
}

pub fn summarize_by_topic(report: &ScopeReport) -> Vec<TopicBreakdown> {
    let mut map: HashMap<&str, (usize, usize)> = HashMap::new();

    for pair in &report.topics {
        let entry = map.entry(pair.topic.as_str()).or_insert((0, 0));
        match Sentiment::from_label(&pair.sentiment) {
            Some(Sentiment::Positive) => entry.0 += 1,
            Some(Sentiment::Negative) => entry.1 += 1,
            None => {}
        }
    }

    let mut summaries: Vec<TopicBreakdown> = map
        .into_iter()
        .map(|(topic, (positive, negative))| TopicBreakdown {
            topic: topic.to_string(),
            positive,
            negative,
        })
        .collect();

    summaries.sort_by(|a, b| {
        (b.positive + b.negative)
            .cmp(&(a.positive + a.negative))
            .then_with(|| a.topic.cmp(&b.topic))
    });
    summaries
}

pub fn build_report(report: &ScopeReport) -> String {
    let mut output = String::new();
    let selection = report.selected_file.as_deref().unwrap_or("all terms");

    let _ = writeln!(output, "# Faculty Feedback Report");
    let _ = writeln!(output, "Generated for {} ({})", report.scope, selection);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Sentiment");
    let _ = writeln!(
        output,
        "- {} positive, {} negative",
        report.positive, report.negative
    );
    if report.selected_file.is_some() {
        let _ = writeln!(
            output,
            "- Across all terms: {} positive, {} negative",
            report.total_positive, report.total_negative
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Terms");
    for file in &report.files {
        let _ = writeln!(
            output,
            "- {}: {} comments ({} positive, {} negative)",
            file.filename,
            file.comments.len(),
            file.positive,
            file.negative
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Topic Breakdown");
    let topics = summarize_by_topic(report);
    if topics.is_empty() {
        let _ = writeln!(output, "No topics recorded for this scope.");
    } else {
        for topic in &topics {
            let _ = writeln!(
                output,
                "- {}: {} positive, {} negative",
                topic.topic, topic.positive, topic.negative
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommendation");
    let _ = writeln!(output, "{}", report.recommendation);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Sample Comments");
    if report.comments.is_empty() {
        let _ = writeln!(output, "No comments recorded for this scope.");
    } else {
        for comment in report.comments.iter().take(5) {
            let _ = writeln!(
                output,
                "- [{} / {}] {}",
                comment.sentiment, comment.topic, comment.text
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnnotatedComment, FileView, TopicSentiment};

    fn sample_report() -> ScopeReport {
        let pair = |topic: &str, sentiment: &str| TopicSentiment {
            topic: topic.to_string(),
            sentiment: sentiment.to_string(),
        };
        ScopeReport {
            scope: "teacher mreyes".to_string(),
            selected_file: Some("2023_2024_1".to_string()),
            files: vec![FileView {
                filename: "2023_2024_1".to_string(),
                comments: vec![],
                sentiments: vec![],
                topics: vec![],
                positive: 2,
                negative: 1,
            }],
            positive: 2,
            negative: 1,
            total_positive: 5,
            total_negative: 4,
            sentiments: vec![],
            topics: vec![
                pair("Tardiness", "Negative"),
                pair("Teaching Quality", "Positive"),
                pair("Tardiness", "Negative"),
                pair("Tardiness", "Unknown"),
            ],
            comments: vec![AnnotatedComment {
                text: "Always late".to_string(),
                sentiment: "Negative".to_string(),
                topic: "Tardiness".to_string(),
            }],
            recommendation: "Improve punctuality.".to_string(),
        }
    }

    #[test]
    fn topics_are_tallied_and_ranked() {
        let topics = summarize_by_topic(&sample_report());
        assert_eq!(
            topics[0],
            TopicBreakdown {
                topic: "Tardiness".to_string(),
                positive: 0,
                negative: 2
            }
        );
        assert_eq!(topics[1].topic, "Teaching Quality");
    }

    #[test]
    fn every_topic_present_is_listed() {
        let mut report = sample_report();
        report.topics = (0..14)
            .map(|i| TopicSentiment {
                topic: format!("Topic {i:02}"),
                sentiment: "Positive".to_string(),
            })
            .collect();
        let markdown = build_report(&report);
        assert!(markdown.contains("- Topic 00: 1 positive, 0 negative"));
        assert!(markdown.contains("- Topic 13: 1 positive, 0 negative"));
    }

    #[test]
    fn markdown_lists_terms_and_recommendation() {
        let markdown = build_report(&sample_report());
        assert!(markdown.contains("Generated for teacher mreyes (2023_2024_1)"));
        assert!(markdown.contains("- Across all terms: 5 positive, 4 negative"));
        assert!(markdown.contains("- 2023_2024_1: 0 comments (2 positive, 1 negative)"));
        assert!(markdown.contains("## Recommendation\nImprove punctuality."));
        assert!(markdown.contains("- [Negative / Tardiness] Always late"));
    }
}
