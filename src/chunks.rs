//! Slot storage for oversized upload sequences.
//!
//! An upload's comments, sentiments and topics are partitioned into at most
//! `slot_count` contiguous slots of `capacity` elements each. All three
//! families go through the same generic [`split`] with one shared layout, so
//! slot `i` of every family covers the same index range.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{FeedbackError, Result};
use crate::models::UNKNOWN;

pub const DEFAULT_SLOT_COUNT: usize = 3;
pub const DEFAULT_SLOT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub slot_count: usize,
    pub capacity: usize,
}

impl Default for SlotLayout {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            capacity: DEFAULT_SLOT_CAPACITY,
        }
    }
}

impl SlotLayout {
    pub fn new(slot_count: usize, capacity: usize) -> Result<Self> {
        if slot_count == 0 || capacity == 0 {
            return Err(FeedbackError::Validation(format!(
                "slot layout needs at least one slot of non-zero capacity (got {slot_count} x {capacity})"
            )));
        }
        if slot_count.checked_mul(capacity).is_none() {
            return Err(FeedbackError::Validation(format!(
                "slot layout {slot_count} x {capacity} exceeds the addressable row count"
            )));
        }
        Ok(Self {
            slot_count,
            capacity,
        })
    }

    pub fn max_rows(&self) -> usize {
        self.slot_count * self.capacity
    }

    pub fn check_rows(&self, count: usize) -> Result<()> {
        if count > self.max_rows() {
            return Err(FeedbackError::RowLimitExceeded {
                count,
                limit: self.max_rows(),
            });
        }
        Ok(())
    }
}

/// Partitions `items` into left-packed slots of at most `layout.capacity`.
pub fn split<T: Clone>(items: &[T], layout: SlotLayout) -> Result<Vec<Vec<T>>> {
    let needed = items.len().div_ceil(layout.capacity);
    if needed > layout.slot_count {
        return Err(FeedbackError::CapacityExceeded {
            slots: needed,
            available: layout.slot_count,
        });
    }
    Ok(items.chunks(layout.capacity).map(<[T]>::to_vec).collect())
}

/// A slot column as found in the database: either a JSON sequence, or text
/// that encodes one (legacy rows).
#[derive(Debug, Clone, PartialEq)]
pub enum SlotPayload {
    Structured(Value),
    Encoded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning(String);

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SlotPayload {
    pub fn from_column(value: Option<Value>) -> Option<Self> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(SlotPayload::Encoded(text)),
            Some(value) => Some(SlotPayload::Structured(value)),
        }
    }

    pub fn to_column(&self) -> Value {
        match self {
            SlotPayload::Structured(value) => value.clone(),
            SlotPayload::Encoded(text) => Value::String(text.clone()),
        }
    }

    /// Decodes the payload element by element. Only an unparseable payload or
    /// a non-sequence fails; a bad element becomes [`SlotElement::placeholder`].
    pub fn decode<T: SlotElement>(&self) -> std::result::Result<Vec<T>, DecodeWarning> {
        let value = match self {
            SlotPayload::Structured(value) => value.clone(),
            SlotPayload::Encoded(text) => serde_json::from_str::<Value>(text)
                .map_err(|err| DecodeWarning(format!("unparseable text payload: {err}")))?,
        };
        let elements = match value {
            Value::Array(elements) => elements,
            // a lone object is a one-element sequence
            object @ Value::Object(_) => vec![object],
            other => {
                return Err(DecodeWarning(format!("expected a sequence, found {other}")));
            }
        };
        Ok(elements.into_iter().map(decode_element).collect())
    }
}

/// An element of a slot family. Elements that are null or of an unexpected
/// shape keep their position as a placeholder.
pub trait SlotElement: DeserializeOwned {
    fn placeholder() -> Self;
}

impl SlotElement for String {
    fn placeholder() -> Self {
        UNKNOWN.to_string()
    }
}

fn decode_element<T: SlotElement>(element: Value) -> T {
    serde_json::from_value(element).unwrap_or_else(|err| {
        debug!(error = %err, "slot element replaced by placeholder");
        T::placeholder()
    })
}

/// One storage slot across the three families. Families are nullable
/// individually so legacy rows with a missing column still load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSlot {
    pub comments: Option<SlotPayload>,
    pub sentiments: Option<SlotPayload>,
    pub topics: Option<SlotPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFamily {
    Comments,
    Sentiments,
    Topics,
}

impl SlotFamily {
    pub fn column_prefix(&self) -> &'static str {
        match self {
            SlotFamily::Comments => "comments",
            SlotFamily::Sentiments => "sentiment",
            SlotFamily::Topics => "topics",
        }
    }

    fn payload<'a>(&self, slot: &'a StoredSlot) -> Option<&'a SlotPayload> {
        match self {
            SlotFamily::Comments => slot.comments.as_ref(),
            SlotFamily::Sentiments => slot.sentiments.as_ref(),
            SlotFamily::Topics => slot.topics.as_ref(),
        }
    }
}

/// Concatenates one family across slots in slot order.
///
/// Absent slots are skipped. A payload that is not a sequence at all is
/// logged and skipped as well, so the result may be shorter than what was
/// written; bad elements inside a sequence keep their position.
pub fn join<T: SlotElement>(slots: &[Option<StoredSlot>], family: SlotFamily) -> Vec<T> {
    let mut items = Vec::new();
    for (index, slot) in slots.iter().enumerate() {
        let Some(payload) = slot.as_ref().and_then(|slot| family.payload(slot)) else {
            continue;
        };
        match payload.decode::<T>() {
            Ok(mut decoded) => items.append(&mut decoded),
            Err(warning) => warn!(
                slot = index + 1,
                family = family.column_prefix(),
                "skipping slot payload: {warning}"
            ),
        }
    }
    items
}

/// Splits the three parallel families with one layout and pairs them up
/// slot by slot.
pub fn split_families<C, S, T>(
    comments: &[C],
    sentiments: &[S],
    topics: &[T],
    layout: SlotLayout,
) -> Result<Vec<StoredSlot>>
where
    C: Serialize + Clone,
    S: Serialize + Clone,
    T: Serialize + Clone,
{
    if sentiments.len() != comments.len() || topics.len() != comments.len() {
        return Err(FeedbackError::Validation(format!(
            "families must be index-aligned: {} comments, {} sentiments, {} topics",
            comments.len(),
            sentiments.len(),
            topics.len()
        )));
    }

    let comment_slots = split(comments, layout)?;
    let sentiment_slots = split(sentiments, layout)?;
    let topic_slots = split(topics, layout)?;

    let slots = comment_slots
        .into_iter()
        .zip(sentiment_slots)
        .zip(topic_slots)
        .map(|((comments, sentiments), topics)| -> Result<StoredSlot> {
            Ok(StoredSlot {
                comments: Some(SlotPayload::Structured(serde_json::to_value(comments)?)),
                sentiments: Some(SlotPayload::Structured(serde_json::to_value(sentiments)?)),
                topics: Some(SlotPayload::Structured(serde_json::to_value(topics)?)),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        rows = comments.len(),
        slots = slots.len(),
        capacity = layout.capacity,
        "split upload into slots"
    );
    Ok(slots)
}
