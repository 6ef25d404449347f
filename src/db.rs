use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::chunks::{split_families, SlotLayout, SlotPayload, StoredSlot};
use crate::error::{FeedbackError, NotFound, Result};
use crate::models::{
    AnalysisResult, CategoryShare, Keyword, Scope, Sentiment, StagedUpload, TeacherRecord,
    TopicAssignment, UploadRecord,
};

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Checks a staged upload and lays it out into slots. Runs before any
/// transaction is opened.
pub fn prepare_slots(staged: &StagedUpload, layout: SlotLayout) -> Result<Vec<StoredSlot>> {
    let analysis = &staged.analysis;
    if staged.teacher_uname.trim().is_empty()
        || staged.filename.trim().is_empty()
        || staged.recommendation.trim().is_empty()
        || analysis.comments.is_empty()
    {
        return Err(FeedbackError::Validation(
            "Missing required fields".to_string(),
        ));
    }
    analysis.validate()?;
    layout.check_rows(analysis.comments.len())?;

    split_families(
        &analysis.comment_entries(),
        &analysis.sentiment_labels(),
        &analysis.topic_entries(),
        layout,
    )
}

/// Persists one upload and its slots in a single transaction.
pub async fn save_upload(
    pool: &PgPool,
    staged: &StagedUpload,
    layout: SlotLayout,
) -> Result<UploadRecord> {
    let slots = prepare_slots(staged, layout)?;

    let mut tx = pool.begin().await?;

    let teacher_exists: bool = sqlx::query(
        "SELECT EXISTS (SELECT 1 FROM faculty_feedback.teachers WHERE uname = $1) AS present",
    )
    .bind(&staged.teacher_uname)
    .fetch_one(&mut *tx)
    .await?
    .get("present");

    if !teacher_exists {
        return Err(NotFound::TeacherNotFound {
            uname: staged.teacher_uname.clone(),
        }
        .into());
    }

    let id = Uuid::new_v4();
    let upload_date: DateTime<Utc> = sqlx::query(
        r#"
        INSERT INTO faculty_feedback.uploads
        (id, filename, teacher_uname, recommendation, grade)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING upload_date
        "#,
    )
    .bind(id)
    .bind(&staged.filename)
    .bind(&staged.teacher_uname)
    .bind(&staged.recommendation)
    .bind(&staged.grade)
    .fetch_one(&mut *tx)
    .await?
    .get("upload_date");

    for (index, slot) in slots.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO faculty_feedback.upload_slots
            (upload_id, slot_index, comments, sentiment, topics)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind((index + 1) as i16)
        .bind(slot.comments.as_ref().map(SlotPayload::to_column))
        .bind(slot.sentiments.as_ref().map(SlotPayload::to_column))
        .bind(slot.topics.as_ref().map(SlotPayload::to_column))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!(
        upload = %id,
        teacher = %staged.teacher_uname,
        filename = %staged.filename,
        rows = staged.analysis.comments.len(),
        slots = slots.len(),
        "saved upload"
    );

    Ok(UploadRecord {
        id,
        filename: staged.filename.clone(),
        teacher_uname: staged.teacher_uname.clone(),
        recommendation: staged.recommendation.clone(),
        grade: staged.grade.clone(),
        upload_date,
        slots: slots.into_iter().map(Some).collect(),
    })
}

/// Uploads for one teacher in insertion order.
pub async fn load_by_teacher(pool: &PgPool, uname: &str) -> Result<Vec<UploadRecord>> {
    let rows = sqlx::query(
        "SELECT id, filename, teacher_uname, recommendation, grade, upload_date \
         FROM faculty_feedback.uploads \
         WHERE teacher_uname = $1 \
         ORDER BY upload_date, id",
    )
    .bind(uname)
    .fetch_all(pool)
    .await?;

    let mut records: Vec<UploadRecord> = rows.iter().map(record_from_row).collect();
    attach_slots(pool, &mut records).await?;
    Ok(records)
}

/// Uploads for a set of teachers, no particular order.
pub async fn load_by_teachers(pool: &PgPool, unames: &[String]) -> Result<Vec<UploadRecord>> {
    if unames.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        "SELECT id, filename, teacher_uname, recommendation, grade, upload_date \
         FROM faculty_feedback.uploads \
         WHERE teacher_uname = ANY($1)",
    )
    .bind(unames)
    .fetch_all(pool)
    .await?;

    let mut records: Vec<UploadRecord> = rows.iter().map(record_from_row).collect();
    attach_slots(pool, &mut records).await?;
    Ok(records)
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> UploadRecord {
    UploadRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        teacher_uname: row.get("teacher_uname"),
        recommendation: row.get("recommendation"),
        grade: row.get("grade"),
        upload_date: row.get("upload_date"),
        slots: Vec::new(),
    }
}

async fn attach_slots(pool: &PgPool, records: &mut [UploadRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let ids: Vec<Uuid> = records.iter().map(|record| record.id).collect();
    let rows = sqlx::query(
        "SELECT upload_id, slot_index, comments, sentiment, topics \
         FROM faculty_feedback.upload_slots \
         WHERE upload_id = ANY($1) \
         ORDER BY upload_id, slot_index",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let positions: HashMap<Uuid, usize> = ids
        .iter()
        .enumerate()
        .map(|(position, id)| (*id, position))
        .collect();

    for row in rows {
        let upload_id: Uuid = row.get("upload_id");
        let slot_index: i16 = row.get("slot_index");
        let Some(&position) = positions.get(&upload_id) else {
            continue;
        };
        let slot = StoredSlot {
            comments: SlotPayload::from_column(row.get("comments")),
            sentiments: SlotPayload::from_column(row.get("sentiment")),
            topics: SlotPayload::from_column(row.get("topics")),
        };
        place_slot(&mut records[position].slots, slot_index as usize, slot);
    }

    debug!(records = records.len(), "attached slots");
    Ok(())
}

/// Puts a 1-based slot into its position, growing the slot array as needed.
pub fn place_slot(slots: &mut Vec<Option<StoredSlot>>, slot_index: usize, slot: StoredSlot) {
    if slot_index == 0 {
        return;
    }
    if slots.len() < slot_index {
        slots.resize(slot_index, None);
    }
    slots[slot_index - 1] = Some(slot);
}

/// Resolves a scope to the teacher identifiers whose uploads it covers.
///
/// A single-teacher scope is taken as given so soft-deleted teachers keep
/// their history; wider scopes only cover active teachers.
pub async fn fetch_scope_teachers(pool: &PgPool, scope: &Scope) -> Result<Vec<String>> {
    let mut query = String::from(
        "SELECT uname FROM faculty_feedback.teachers \
         WHERE is_deleted = FALSE AND upper(campus_acronym) = upper($1)",
    );
    let mut binds: Vec<&str> = Vec::new();

    match scope {
        Scope::Teacher { uname } => return Ok(vec![uname.clone()]),
        Scope::Campus { campus } => binds.push(campus),
        Scope::College { campus, college } => {
            query.push_str(" AND upper(college_acronym) = upper($2)");
            binds.push(campus);
            binds.push(college);
        }
        Scope::Program {
            campus,
            college,
            program,
        } => {
            query.push_str(
                " AND upper(college_acronym) = upper($2) AND upper(program_acronym) = upper($3)",
            );
            binds.push(campus);
            binds.push(college);
            binds.push(program);
        }
    }
    query.push_str(" ORDER BY uname");

    let mut rows = sqlx::query(&query);
    for value in binds {
        rows = rows.bind(value);
    }

    let unames: Vec<String> = rows
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get("uname"))
        .collect();

    if unames.is_empty() {
        return Err(NotFound::NoTeachers {
            scope: scope.to_string(),
        }
        .into());
    }
    Ok(unames)
}

pub async fn fetch_teacher(pool: &PgPool, uname: &str) -> Result<TeacherRecord> {
    let row = sqlx::query(
        "SELECT uname, first_name, last_name, campus_acronym, college_acronym, \
         program_acronym, is_deleted \
         FROM faculty_feedback.teachers WHERE uname = $1",
    )
    .bind(uname)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| NotFound::TeacherNotFound {
        uname: uname.to_string(),
    })?;

    Ok(TeacherRecord {
        uname: row.get("uname"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        campus_acronym: row.get("campus_acronym"),
        college_acronym: row.get("college_acronym"),
        program_acronym: row.get("program_acronym"),
        is_deleted: row.get("is_deleted"),
    })
}

/// Soft-deletes or restores a teacher. Uploads are left untouched.
pub async fn set_teacher_deleted(pool: &PgPool, uname: &str, deleted: bool) -> Result<()> {
    let result = sqlx::query(
        "UPDATE faculty_feedback.teachers SET is_deleted = $2 \
         WHERE uname = $1 AND is_deleted <> $2",
    )
    .bind(uname)
    .bind(deleted)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(NotFound::TeacherNotFound {
            uname: uname.to_string(),
        }
        .into());
    }
    info!(teacher = %uname, deleted, "updated teacher status");
    Ok(())
}

pub async fn seed(pool: &PgPool, layout: SlotLayout) -> Result<usize> {
    let teachers = vec![
        ("mreyes", "Maria", "Reyes", "MAIN", "CCS", "BSCS"),
        ("jdelacruz", "Juan", "Dela Cruz", "MAIN", "CCS", "BSIT"),
        ("asantos", "Ana", "Santos", "MAIN", "CTE", "BSED"),
    ];

    for (uname, first_name, last_name, campus, college, program) in teachers {
        sqlx::query(
            r#"
            INSERT INTO faculty_feedback.teachers
            (uname, first_name, last_name, campus_acronym, college_acronym, program_acronym)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (uname) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                campus_acronym = EXCLUDED.campus_acronym,
                college_acronym = EXCLUDED.college_acronym,
                program_acronym = EXCLUDED.program_acronym
            "#,
        )
        .bind(uname)
        .bind(first_name)
        .bind(last_name)
        .bind(campus)
        .bind(college)
        .bind(program)
        .execute(pool)
        .await?;
    }

    let uploads = vec![
        (
            "mreyes",
            "2023_2024_1",
            vec![
                ("Explains lessons clearly and patiently.", Sentiment::Positive, "Teaching Effectiveness"),
                ("Always arrives late to class.", Sentiment::Negative, "Tardiness"),
                ("Very approachable during consultation.", Sentiment::Positive, "Availability and Communication"),
            ],
        ),
        (
            "mreyes",
            "2023_2024_2",
            vec![
                ("Quizzes are fair and well prepared.", Sentiment::Positive, "Assessment Fairness and Difficulty"),
                ("Room is often messy after class.", Sentiment::Negative, "Cleanliness and Classroom Management"),
            ],
        ),
        (
            "jdelacruz",
            "2023_2024_1",
            vec![
                ("Slides are outdated.", Sentiment::Negative, "Instructional Materials and Aids"),
                ("Keeps the class engaged with activities.", Sentiment::Positive, "Student Engagement"),
            ],
        ),
    ];

    let mut inserted = 0usize;
    for (uname, filename, rows) in uploads {
        let exists: bool = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM faculty_feedback.uploads \
             WHERE teacher_uname = $1 AND filename = $2) AS present",
        )
        .bind(uname)
        .bind(filename)
        .fetch_one(pool)
        .await?
        .get("present");
        if exists {
            continue;
        }

        let staged = StagedUpload {
            filename: filename.to_string(),
            teacher_uname: uname.to_string(),
            grade: None,
            recommendation: "Seeded upload; no generated recommendation.".to_string(),
            analysis: AnalysisResult {
                comments: rows.iter().map(|(text, _, _)| text.to_string()).collect(),
                sentiments: rows.iter().map(|(_, sentiment, _)| *sentiment).collect(),
                topics: rows
                    .iter()
                    .map(|(_, _, topic)| TopicAssignment {
                        topic: topic.to_string(),
                        probability: 90.0,
                    })
                    .collect(),
                top_keywords: vec![Keyword {
                    word: "class".to_string(),
                    weight: 1.0,
                }],
                category_distribution: vec![CategoryShare {
                    category: "Teaching Effectiveness".to_string(),
                    percentage: 100.0,
                }],
            },
        };
        save_upload(pool, &staged, layout).await?;
        inserted += 1;
    }

    Ok(inserted)
}
