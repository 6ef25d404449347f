//! Builds the evidence handed to the recommendation generator.

use std::collections::HashMap;
use std::fmt::Write;

use serde::Serialize;
use tracing::{debug, warn};

use crate::collaborators::RecommendationGenerator;
use crate::models::{CategoryShare, Keyword, Sentiment, TopicAssignment};

pub const TOPIC_TAXONOMY: [&str; 11] = [
    "Teaching Effectiveness",
    "Preparedness and Punctuality",
    "Fairness and Supportiveness",
    "Student Engagement",
    "Professional Appearance",
    "Cleanliness and Classroom Management",
    "Teaching Quality",
    "Availability and Communication",
    "Tardiness",
    "Assessment Fairness and Difficulty",
    "Instructional Materials and Aids",
];

pub const FALLBACK_RECOMMENDATION: &str = "Failed to generate recommendation.";
pub const MAX_EXEMPLARS_PER_BUCKET: usize = 5;
const TOP_TOPIC_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicTally {
    pub topic: String,
    pub positive: usize,
    pub negative: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicFrequency {
    pub topic: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackSummary {
    pub positive: usize,
    pub negative: usize,
    /// One entry per taxonomy topic, in taxonomy order.
    pub topic_tallies: Vec<TopicTally>,
    /// Most frequent topics regardless of sentiment.
    pub top_topics: Vec<TopicFrequency>,
    pub top_keywords: Vec<Keyword>,
    pub category_distribution: Vec<CategoryShare>,
    pub exemplars: String,
}

impl FeedbackSummary {
    fn tally(&self, topic: &str) -> Option<&TopicTally> {
        self.topic_tallies.iter().find(|tally| tally.topic == topic)
    }

    pub fn positive_highlights(&self) -> Vec<String> {
        self.top_topics
            .iter()
            .filter_map(|top| self.tally(&top.topic))
            .filter(|tally| tally.positive > 0)
            .map(|tally| format!("- {}: {} positive mentions", tally.topic, tally.positive))
            .collect()
    }

    pub fn improvement_areas(&self) -> Vec<String> {
        self.top_topics
            .iter()
            .filter_map(|top| self.tally(&top.topic))
            .filter(|tally| tally.negative > 0)
            .map(|tally| format!("- {}: {} negative mentions", tally.topic, tally.negative))
            .collect()
    }
}

pub fn build_feedback_summary(
    sentiments: &[Sentiment],
    topics: &[TopicAssignment],
    comments: &[String],
    top_keywords: &[Keyword],
    category_distribution: &[CategoryShare],
) -> FeedbackSummary {
    let positive = sentiments
        .iter()
        .filter(|s| **s == Sentiment::Positive)
        .count();
    let negative = sentiments
        .iter()
        .filter(|s| **s == Sentiment::Negative)
        .count();

    let mut topic_tallies: Vec<TopicTally> = TOPIC_TAXONOMY
        .iter()
        .map(|topic| TopicTally {
            topic: topic.to_string(),
            positive: 0,
            negative: 0,
        })
        .collect();
    for (assignment, sentiment) in topics.iter().zip(sentiments) {
        if let Some(tally) = topic_tallies
            .iter_mut()
            .find(|tally| tally.topic == assignment.topic)
        {
            match sentiment {
                Sentiment::Positive => tally.positive += 1,
                Sentiment::Negative => tally.negative += 1,
            }
        }
    }

    let top_topics = rank_topics(topics);
    let exemplars =
        build_topic_comment_exemplars(topics, sentiments, comments, MAX_EXEMPLARS_PER_BUCKET);

    debug!(
        positive,
        negative,
        top_topics = top_topics.len(),
        "built feedback summary"
    );

    FeedbackSummary {
        positive,
        negative,
        topic_tallies,
        top_topics,
        top_keywords: top_keywords.to_vec(),
        category_distribution: category_distribution.to_vec(),
        exemplars,
    }
}

/// Topics by raw frequency, ties kept in first-seen order.
fn rank_topics(topics: &[TopicAssignment]) -> Vec<TopicFrequency> {
    let mut order: Vec<TopicFrequency> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for assignment in topics {
        let topic = assignment.topic.trim();
        if topic.is_empty() {
            continue;
        }
        match positions.get(topic) {
            Some(&position) => order[position].count += 1,
            None => {
                positions.insert(topic, order.len());
                order.push(TopicFrequency {
                    topic: topic.to_string(),
                    count: 1,
                });
            }
        }
    }

    order.sort_by(|a, b| b.count.cmp(&a.count));
    order.truncate(TOP_TOPIC_COUNT);
    order
}

/// Up to `max_per_bucket` raw comments per topic and sentiment, in comment
/// order, formatted as a text block.
pub fn build_topic_comment_exemplars(
    topics: &[TopicAssignment],
    sentiments: &[Sentiment],
    comments: &[String],
    max_per_bucket: usize,
) -> String {
    let mut topic_order: Vec<&str> = Vec::new();
    let mut buckets: HashMap<(&str, Sentiment), Vec<&str>> = HashMap::new();

    for ((assignment, sentiment), comment) in topics.iter().zip(sentiments).zip(comments) {
        let topic = assignment.topic.as_str();
        if topic.is_empty() {
            continue;
        }
        if !topic_order.contains(&topic) {
            topic_order.push(topic);
        }
        let bucket = buckets.entry((topic, *sentiment)).or_default();
        if bucket.len() < max_per_bucket {
            bucket.push(comment.as_str());
        }
    }

    let mut lines: Vec<String> = Vec::new();
    for topic in topic_order {
        lines.push(format!("\nTopic: {topic}"));
        for sentiment in [Sentiment::Positive, Sentiment::Negative] {
            let Some(examples) = buckets.get(&(topic, sentiment)) else {
                continue;
            };
            lines.push(format!("{sentiment} Comments:"));
            for (number, example) in examples.iter().enumerate() {
                lines.push(format!("{}. {example}", number + 1));
            }
        }
    }
    lines.join("\n")
}

pub fn render_prompt(summary: &FeedbackSummary) -> String {
    let top_topics: Vec<&str> = summary
        .top_topics
        .iter()
        .map(|top| top.topic.as_str())
        .collect();

    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Using the data provided below, generate a formal and concise teacher performance report."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "FEEDBACK SUMMARY:");
    let _ = writeln!(
        prompt,
        "Positive comments: {} | Negative comments: {}",
        summary.positive, summary.negative
    );
    let _ = writeln!(prompt, "Top topics: {}", top_topics.join(", "));
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "POSITIVE HIGHLIGHTS:");
    let _ = writeln!(prompt, "{}", summary.positive_highlights().join("\n"));
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "AREAS FOR IMPROVEMENT:");
    let _ = writeln!(prompt, "{}", summary.improvement_areas().join("\n"));
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "TOPIC-SPECIFIC COMMENT EXAMPLES:");
    let _ = writeln!(prompt, "{}", summary.exemplars);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Structure your response as follows:");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "1. STRENGTHS");
    let _ = writeln!(
        prompt,
        "   - Recommend action for each positive highlight in one sentence each, supported by student examples where relevant."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "2. AREAS REQUIRING ATTENTION");
    let _ = writeln!(
        prompt,
        "   - Recommend action for each negative highlight in one sentence each, informed by the negative examples provided."
    );
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Guidelines:");
    let _ = writeln!(prompt, "- Use a professional and objective tone.");
    let _ = writeln!(prompt, "- Avoid assumptions or commentary outside the data.");
    let _ = writeln!(prompt, "- Keep language concise and action-oriented.");
    let _ = writeln!(prompt, "- Number all recommended actions clearly.");
    prompt
}

/// Asks the generator for report text. Any failure degrades to
/// [`FALLBACK_RECOMMENDATION`].
pub async fn generate_recommendation(
    generator: &dyn RecommendationGenerator,
    summary: &FeedbackSummary,
) -> String {
    let prompt = render_prompt(summary);
    match generator.generate(&prompt).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            warn!("recommendation generator returned empty text");
            FALLBACK_RECOMMENDATION.to_string()
        }
        Err(err) => {
            warn!(error = %err, "recommendation generation failed");
            FALLBACK_RECOMMENDATION.to_string()
        }
    }
}
