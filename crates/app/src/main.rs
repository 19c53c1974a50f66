use std::fmt;
use std::path::PathBuf;

use prep_core::model::{QuestionId, QuestionProgressPatch, QuestionStatus, UserId};
use serde_json::{Map, Value};
use services::{AppServices, Clock, HttpConfig, ProgressSynchronizer, SyncConfig, SyncOutcome};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingCommand,
    UnknownCommand(String),
    MissingValue { flag: &'static str },
    MissingArgument { command: &'static str, name: &'static str },
    UnknownArg(String),
    InvalidQuestionId { raw: String },
    InvalidStatus { raw: String },
    InvalidNumber { what: &'static str, raw: String },
    InvalidExam { raw: String },
    InvalidUserId { raw: String },
    InvalidDbUrl { raw: String },
    AnswerNeedsVerdict,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingCommand => write!(f, "missing command"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { command, name } => {
                write!(f, "{command} requires <{name}>")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidQuestionId { raw } => write!(f, "invalid question id: {raw}"),
            ArgsError::InvalidStatus { raw } => {
                write!(f, "invalid status: {raw} (expected new, studying or mastered)")
            }
            ArgsError::InvalidNumber { what, raw } => write!(f, "invalid {what}: {raw}"),
            ArgsError::InvalidExam { raw } => {
                write!(f, "exam attempt must be a JSON object: {raw}")
            }
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user value: {raw:?}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::AnswerNeedsVerdict => {
                write!(f, "answer requires exactly one of --correct or --wrong")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  prep show | stats | export | reset            [--db <sqlite_url>] [--user <id>]");
    eprintln!("  prep answer <question> --correct|--wrong [--time <secs>] [--domain <name>]");
    eprintln!("  prep status <question> <new|studying|mastered>");
    eprintln!("  prep bookmark <question>");
    eprintln!("  prep note <question> <text...>");
    eprintln!("  prep exam <attempt_json>");
    eprintln!("  prep study <secs>");
    eprintln!("  prep import <file>");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://prep.sqlite3");
    eprintln!("  --user local");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PREP_DB_URL, PREP_USER_ID, RUST_LOG");
    eprintln!("  PREP_API_BASE_URL, PREP_API_TOKEN   # sync against a remote API instead of --db");
    eprintln!("  PREP_SAVE_DELAY_MS, PREP_EXAM_SAVE_DELAY_MS");
    eprintln!("  PREP_AUTO_SAVE_SECS, PREP_FLUSH_TIMEOUT_MS");
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Show,
    Stats,
    Answer {
        id: QuestionId,
        correct: bool,
        time_spent: u64,
        domain: Option<String>,
    },
    Status {
        id: QuestionId,
        status: QuestionStatus,
    },
    Bookmark(QuestionId),
    Note {
        id: QuestionId,
        text: String,
    },
    Exam(Map<String, Value>),
    Study(u64),
    Export,
    Import(PathBuf),
    Reset,
}

impl Command {
    fn mutates(&self) -> bool {
        !matches!(self, Self::Show | Self::Stats | Self::Export)
    }
}

/// Flags only `answer` understands.
#[derive(Default)]
struct AnswerFlags {
    correct: Option<bool>,
    time_spent: u64,
    domain: Option<String>,
}

#[derive(Debug)]
struct Args {
    db_url: String,
    user_id: UserId,
    command: Command,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, ArgsError> {
        let mut args = args.into_iter();
        let name = args.next().ok_or(ArgsError::MissingCommand)?;

        let mut db_url = std::env::var("PREP_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://prep.sqlite3".into(), normalize_sqlite_url);
        let mut user_raw = std::env::var("PREP_USER_ID").unwrap_or_else(|_| "local".into());
        let mut answer = AnswerFlags::default();
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => user_raw = require_value(&mut args, "--user")?,
                "--correct" | "--wrong" => {
                    let verdict = arg == "--correct";
                    if answer.correct.is_some_and(|seen| seen != verdict) {
                        return Err(ArgsError::AnswerNeedsVerdict);
                    }
                    answer.correct = Some(verdict);
                }
                "--time" => {
                    let value = require_value(&mut args, "--time")?;
                    answer.time_spent = parse_number("--time", &value)?;
                }
                "--domain" => answer.domain = Some(require_value(&mut args, "--domain")?),
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let user_id = user_raw
            .parse::<UserId>()
            .map_err(|_| ArgsError::InvalidUserId { raw: user_raw.clone() })?;
        let command = Self::build_command(&name, positional, answer)?;
        Ok(Self {
            db_url,
            user_id,
            command,
        })
    }

    fn build_command(
        name: &str,
        positional: Vec<String>,
        answer: AnswerFlags,
    ) -> Result<Command, ArgsError> {
        let mut rest = positional.into_iter();
        let command = match name {
            "show" => Command::Show,
            "stats" => Command::Stats,
            "export" => Command::Export,
            "reset" => Command::Reset,
            "answer" => Command::Answer {
                id: question_arg(&mut rest, "answer")?,
                correct: answer.correct.ok_or(ArgsError::AnswerNeedsVerdict)?,
                time_spent: answer.time_spent,
                domain: answer.domain,
            },
            "status" => {
                let id = question_arg(&mut rest, "status")?;
                let raw = rest.next().ok_or(ArgsError::MissingArgument {
                    command: "status",
                    name: "status",
                })?;
                let status =
                    QuestionStatus::parse(&raw).ok_or(ArgsError::InvalidStatus { raw })?;
                Command::Status { id, status }
            }
            "bookmark" => Command::Bookmark(question_arg(&mut rest, "bookmark")?),
            "note" => {
                let id = question_arg(&mut rest, "note")?;
                let text = rest.by_ref().collect::<Vec<_>>().join(" ");
                if text.trim().is_empty() {
                    return Err(ArgsError::MissingArgument {
                        command: "note",
                        name: "text",
                    });
                }
                Command::Note { id, text }
            }
            "exam" => {
                let raw = rest.next().ok_or(ArgsError::MissingArgument {
                    command: "exam",
                    name: "attempt_json",
                })?;
                let payload = serde_json::from_str::<Map<String, Value>>(&raw)
                    .map_err(|_| ArgsError::InvalidExam { raw: raw.clone() })?;
                Command::Exam(payload)
            }
            "study" => {
                let raw = rest.next().ok_or(ArgsError::MissingArgument {
                    command: "study",
                    name: "secs",
                })?;
                Command::Study(parse_number("study seconds", &raw)?)
            }
            "import" => {
                let raw = rest.next().ok_or(ArgsError::MissingArgument {
                    command: "import",
                    name: "file",
                })?;
                Command::Import(PathBuf::from(raw))
            }
            other => return Err(ArgsError::UnknownCommand(other.to_string())),
        };

        if let Some(extra) = rest.next() {
            return Err(ArgsError::UnknownArg(extra));
        }
        Ok(command)
    }
}

fn question_arg(
    rest: &mut impl Iterator<Item = String>,
    command: &'static str,
) -> Result<QuestionId, ArgsError> {
    let raw = rest.next().ok_or(ArgsError::MissingArgument {
        command,
        name: "question",
    })?;
    raw.parse::<QuestionId>()
        .map_err(|_| ArgsError::InvalidQuestionId { raw })
}

fn parse_number(what: &'static str, raw: &str) -> Result<u64, ArgsError> {
    raw.trim().parse().map_err(|_| ArgsError::InvalidNumber {
        what,
        raw: raw.to_string(),
    })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_services(
    args: &Args,
    clock: Clock,
) -> Result<AppServices, Box<dyn std::error::Error>> {
    if let Some(http) = HttpConfig::from_env() {
        info!(
            base_url = %http.base_url,
            user = %args.user_id,
            "syncing against remote progress API"
        );
        return Ok(AppServices::new_remote(http, clock, args.user_id.clone())?);
    }

    // Open + migrate SQLite here so core/services stay free of filesystem glue.
    prepare_sqlite_file(&args.db_url)?;
    Ok(AppServices::new_sqlite(&args.db_url, clock, args.user_id.clone()).await?)
}

fn apply(sync: &ProgressSynchronizer, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Show => println!("{}", serde_json::to_string_pretty(&sync.snapshot())?),
        Command::Stats => println!("{}", serde_json::to_string_pretty(&sync.stats())?),
        Command::Export => println!("{}", sync.export_progress()?),
        Command::Answer {
            id,
            correct,
            time_spent,
            domain,
        } => {
            sync.record_answer(id, correct, time_spent, domain);
            if let Some(question) = sync.question(id) {
                println!(
                    "question {id}: {} ({}/{} correct)",
                    question.status.as_str(),
                    question.correct_attempts,
                    question.attempts
                );
            }
        }
        Command::Status { id, status } => {
            sync.update_question_progress(id, QuestionProgressPatch::status(status));
            println!("question {id}: {}", status.as_str());
        }
        Command::Bookmark(id) => {
            sync.toggle_bookmark(id);
            let bookmarked = sync.question(id).is_some_and(|q| q.bookmarked);
            println!(
                "question {id}: {}",
                if bookmarked { "bookmarked" } else { "bookmark removed" }
            );
        }
        Command::Note { id, text } => sync.add_note(id, &text),
        Command::Exam(payload) => sync.add_exam_attempt(payload),
        Command::Study(seconds) => sync.update_study_time(seconds),
        Command::Import(path) => {
            let raw = std::fs::read_to_string(&path)?;
            sync.import_progress(&raw)?;
            println!("imported progress from {}", path.display());
        }
        Command::Reset => {
            sync.reset_progress();
            println!("progress reset");
        }
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if argv.is_empty() || matches!(argv[0].as_str(), "--help" | "-h" | "help") {
        print_usage();
        return Ok(());
    }

    let args = Args::parse(argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let clock = Clock::default_clock();
    let services = open_services(&args, clock).await?;
    let sync = services.synchronizer(SyncConfig::from_env());

    // Never mutate (and later flush) a record that did not come from the server.
    if let SyncOutcome::Failed(message) = sync.load_progress().await {
        return Err(message.into());
    }

    let mutates = args.command.mutates();
    apply(&sync, args.command)?;

    match sync.shutdown().await {
        SyncOutcome::Failed(message) => Err(message.into()),
        SyncOutcome::Completed if mutates => {
            info!(user = %args.user_id, "progress saved");
            Ok(())
        }
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Args, ArgsError> {
        Args::parse(line.split_whitespace().map(str::to_string))
    }

    #[test]
    fn answer_collects_flags() {
        let args = parse("answer 12 --wrong --time 45 --domain networking --user user_a").unwrap();
        assert_eq!(args.user_id.as_str(), "user_a");
        assert_eq!(
            args.command,
            Command::Answer {
                id: QuestionId::new(12),
                correct: false,
                time_spent: 45,
                domain: Some("networking".into()),
            }
        );
    }

    #[test]
    fn answer_requires_one_verdict() {
        assert!(matches!(parse("answer 3"), Err(ArgsError::AnswerNeedsVerdict)));
        assert!(matches!(
            parse("answer 3 --correct --wrong"),
            Err(ArgsError::AnswerNeedsVerdict)
        ));
    }

    #[test]
    fn status_and_note_parse_positionals() {
        let args = parse("status 8 mastered").unwrap();
        assert_eq!(
            args.command,
            Command::Status {
                id: QuestionId::new(8),
                status: QuestionStatus::Mastered,
            }
        );
        assert!(matches!(
            parse("status 8 done"),
            Err(ArgsError::InvalidStatus { .. })
        ));

        let args = parse("note 8 check the quota table").unwrap();
        assert_eq!(
            args.command,
            Command::Note {
                id: QuestionId::new(8),
                text: "check the quota table".into(),
            }
        );
    }

    #[test]
    fn rejects_unknown_commands_and_extra_args() {
        assert!(matches!(parse("sync"), Err(ArgsError::UnknownCommand(_))));
        assert!(matches!(parse("stats extra"), Err(ArgsError::UnknownArg(_))));
        assert!(matches!(parse("stats --verbose"), Err(ArgsError::UnknownArg(_))));
    }

    #[test]
    fn normalize_keeps_memory_and_absolute_urls() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:/tmp/prep.sqlite3".into()),
            "sqlite:///tmp/prep.sqlite3"
        );
    }
}
