use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod aggregate;
mod analysis;
mod chunks;
mod collaborators;
mod db;
mod error;
mod models;
mod recommend;
mod report;

use crate::analysis::UploadRequest;
use crate::chunks::{SlotLayout, DEFAULT_SLOT_CAPACITY, DEFAULT_SLOT_COUNT};
use crate::collaborators::{
    GeminiConfig, GeminiGenerator, InferenceClient, DEFAULT_GEMINI_MODEL, DEFAULT_INFERENCE_URL,
};
use crate::error::FeedbackError;
use crate::models::{FileFilter, Scope, StagedUpload, Term};

#[derive(Parser)]
#[command(name = "faculty-feedback")]
#[command(about = "Student feedback analysis and reporting for faculty", long_about = None)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,
    #[arg(long, env = "FEEDBACK_SLOT_COUNT", default_value_t = DEFAULT_SLOT_COUNT, global = true)]
    slot_count: usize,
    #[arg(long, env = "FEEDBACK_SLOT_CAPACITY", default_value_t = DEFAULT_SLOT_CAPACITY, global = true)]
    slot_capacity: usize,
    #[arg(long, env = "INFERENCE_URL", default_value = DEFAULT_INFERENCE_URL, global = true)]
    inference_url: String,
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL, global = true)]
    gemini_model: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct UploadArgs {
    /// CSV file with a `comment` column
    #[arg(long)]
    csv: PathBuf,
    #[arg(long)]
    teacher: String,
    #[arg(long)]
    start_year: u32,
    #[arg(long)]
    end_year: u32,
    #[arg(long)]
    semester: u32,
    #[arg(long)]
    grade: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo directory and a few uploads
    Seed,
    /// Classify a CSV of comments and stage the result without saving it
    Analyze {
        #[command(flatten)]
        upload: UploadArgs,
        #[arg(long, default_value = "staged.json")]
        out: PathBuf,
    },
    /// Persist a staged analysis
    Save {
        #[arg(long)]
        staged: PathBuf,
    },
    /// Analyze and save in one step
    Upload {
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// Aggregate feedback for a teacher or an organizational unit
    #[command(group(
        ArgGroup::new("scope")
            .args(["teacher", "campus"])
            .required(true)
            .multiple(false)
    ))]
    Report {
        #[arg(long)]
        teacher: Option<String>,
        #[arg(long)]
        campus: Option<String>,
        #[arg(long, requires = "campus")]
        college: Option<String>,
        #[arg(long, requires = "college")]
        program: Option<String>,
        /// Term file to focus on, or `overall`
        #[arg(long)]
        file_name: Option<String>,
        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List a teacher's uploads
    History {
        #[arg(long)]
        teacher: String,
    },
    /// Hide a teacher from campus, college and program reports
    DeleteTeacher {
        #[arg(long)]
        teacher: String,
    },
    RestoreTeacher {
        #[arg(long)]
        teacher: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("faculty_feedback=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(database_url: Option<&str>) -> anyhow::Result<PgPool> {
    let database_url =
        database_url.context("DATABASE_URL must be set to a production Postgres instance")?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

fn resolve_scope(
    teacher: Option<String>,
    campus: Option<String>,
    college: Option<String>,
    program: Option<String>,
) -> anyhow::Result<Scope> {
    match (teacher, campus, college, program) {
        (Some(uname), None, None, None) => Ok(Scope::Teacher { uname }),
        (None, Some(campus), Some(college), Some(program)) => Ok(Scope::Program {
            campus,
            college,
            program,
        }),
        (None, Some(campus), Some(college), None) => Ok(Scope::College { campus, college }),
        (None, Some(campus), None, None) => Ok(Scope::Campus { campus }),
        _ => anyhow::bail!("choose either --teacher or --campus [--college [--program]]"),
    }
}

async fn analyze(cli: &Cli, upload: &UploadArgs, layout: SlotLayout) -> anyhow::Result<StagedUpload> {
    let request = UploadRequest {
        teacher_uname: upload.teacher.clone(),
        term: Term::new(upload.start_year, upload.end_year, upload.semester)?,
        grade: upload.grade.clone(),
    };
    let comments = analysis::read_comments_csv(&upload.csv)
        .with_context(|| format!("failed to read {}", upload.csv.display()))?;

    let inference = InferenceClient::new(cli.inference_url.as_str());
    let generator = GeminiGenerator::new(GeminiConfig {
        model: cli.gemini_model.clone(),
        ..GeminiConfig::default()
    });

    let staged = analysis::analyze_comments(
        comments,
        &request,
        &inference,
        &inference,
        &generator,
        layout,
    )
    .await?;
    Ok(staged)
}

fn write_output(out: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let layout = SlotLayout::new(cli.slot_count, cli.slot_capacity)?;

    match &cli.command {
        Commands::InitDb => {
            let pool = connect(cli.database_url.as_deref()).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(cli.database_url.as_deref()).await?;
            let inserted = db::seed(&pool, layout).await?;
            println!("Seed data inserted ({inserted} uploads).");
        }
        Commands::Analyze { upload, out } => {
            let staged = analyze(&cli, upload, layout).await?;
            std::fs::write(out, serde_json::to_string_pretty(&staged)?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Analyzed {} comments for {} ({}). Staged at {}.",
                staged.analysis.comments.len(),
                staged.teacher_uname,
                staged.filename,
                out.display()
            );
        }
        Commands::Save { staged } => {
            let raw = std::fs::read_to_string(staged)
                .with_context(|| format!("failed to read {}", staged.display()))?;
            let staged: StagedUpload = serde_json::from_str(&raw)
                .context("staged file is not a valid analysis")?;
            let pool = connect(cli.database_url.as_deref()).await?;
            let record = db::save_upload(&pool, &staged, layout).await?;
            println!(
                "Saved {} for {} as {} ({} slots).",
                record.filename,
                record.teacher_uname,
                record.id,
                record.populated_slots()
            );
        }
        Commands::Upload { upload } => {
            // Connect first so a bad DATABASE_URL fails before the classifiers run.
            let pool = connect(cli.database_url.as_deref()).await?;
            let staged = analyze(&cli, upload, layout).await?;
            let record = db::save_upload(&pool, &staged, layout).await?;
            println!(
                "Saved {} comments for {} ({}) as {}.",
                staged.analysis.comments.len(),
                record.teacher_uname,
                record.filename,
                record.id
            );
        }
        Commands::Report {
            teacher,
            campus,
            college,
            program,
            file_name,
            format,
            out,
        } => {
            let scope = resolve_scope(
                teacher.clone(),
                campus.clone(),
                college.clone(),
                program.clone(),
            )?;
            let filter = FileFilter::from_param(file_name.as_deref());
            let pool = connect(cli.database_url.as_deref()).await?;

            let records = match &scope {
                Scope::Teacher { uname } => db::load_by_teacher(&pool, uname).await?,
                _ => {
                    let unames = db::fetch_scope_teachers(&pool, &scope).await?;
                    db::load_by_teachers(&pool, &unames).await?
                }
            };
            let scope_report = aggregate::build_scope_report(&records, &scope, &filter)?;
            info!(
                scope = %scope,
                files = scope_report.files.len(),
                positive = scope_report.positive,
                negative = scope_report.negative,
                "built report"
            );

            let rendered = match format {
                ReportFormat::Markdown => report::build_report(&scope_report),
                ReportFormat::Json => {
                    let mut json = serde_json::to_string_pretty(&scope_report)?;
                    json.push('\n');
                    json
                }
            };
            write_output(out.as_deref(), &rendered)?;
        }
        Commands::History { teacher } => {
            let pool = connect(cli.database_url.as_deref()).await?;
            let profile = db::fetch_teacher(&pool, teacher).await?;
            let records = db::load_by_teacher(&pool, &profile.uname).await?;

            let status = if profile.is_deleted { " [deleted]" } else { "" };
            println!(
                "{} {} ({}) {}/{}/{}{}",
                profile.first_name,
                profile.last_name,
                profile.uname,
                profile.campus_acronym,
                profile.college_acronym.as_deref().unwrap_or("-"),
                profile.program_acronym.as_deref().unwrap_or("-"),
                status
            );
            if records.is_empty() {
                println!("No uploads recorded.");
                return Ok(());
            }
            for record in &records {
                let rebuilt = aggregate::reconstruct(record);
                println!(
                    "- {} uploaded {} | grade {} | {} slots, {} comments | {}",
                    rebuilt.filename,
                    rebuilt.upload_date.format("%Y-%m-%d %H:%M"),
                    record.grade.as_deref().unwrap_or("-"),
                    record.populated_slots(),
                    rebuilt.comments.len(),
                    rebuilt.id
                );
            }
        }
        Commands::DeleteTeacher { teacher } => {
            let pool = connect(cli.database_url.as_deref()).await?;
            db::set_teacher_deleted(&pool, teacher, true).await?;
            println!("Teacher {teacher} deleted.");
        }
        Commands::RestoreTeacher { teacher } => {
            let pool = connect(cli.database_url.as_deref()).await?;
            db::set_teacher_deleted(&pool, teacher, false).await?;
            println!("Teacher {teacher} restored.");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<FeedbackError>() {
                Some(feedback) if feedback.is_not_found() => {
                    warn!(error = %feedback, "nothing to report");
                    eprintln!("{}", feedback.public_message());
                }
                Some(feedback) => {
                    error!(error = %format!("{err:#}"), "command failed");
                    eprintln!("{}", feedback.public_message());
                }
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(value: &str) -> Option<String> {
        Some(value.to_string())
    }

    #[test]
    fn scope_narrows_with_each_level() {
        assert_eq!(
            resolve_scope(None, some("MAIN"), None, None).unwrap(),
            Scope::Campus {
                campus: "MAIN".to_string()
            }
        );
        assert_eq!(
            resolve_scope(None, some("MAIN"), some("CCS"), some("BSCS")).unwrap(),
            Scope::Program {
                campus: "MAIN".to_string(),
                college: "CCS".to_string(),
                program: "BSCS".to_string(),
            }
        );
        assert!(resolve_scope(some("mreyes"), some("MAIN"), None, None).is_err());
    }

    #[test]
    fn cli_requires_one_scope_for_reports() {
        assert!(Cli::try_parse_from(["faculty-feedback", "report"]).is_err());
        assert!(Cli::try_parse_from([
            "faculty-feedback",
            "report",
            "--teacher",
            "mreyes",
            "--campus",
            "MAIN"
        ])
        .is_err());
        assert!(
            Cli::try_parse_from(["faculty-feedback", "report", "--campus", "MAIN", "--program", "X"])
                .is_err()
        );
        assert!(Cli::try_parse_from([
            "faculty-feedback",
            "report",
            "--teacher",
            "mreyes",
            "--file-name",
            "2023_2024_1",
            "--format",
            "json"
        ])
        .is_ok());
    }
}
