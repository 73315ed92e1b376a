use std::fmt;

use engine::{AttemptSession, EngineConfig, StartOutcome};
use quiz_core::Clock;
use quiz_core::model::{
    AnswerId, AnswerOption, Question, QuestionId, QuizDefinition, QuizId, UserId,
};
use storage::{AutosaveStore, Storage};
use storage::http::ApiConfig;
use storage::sqlite::SqliteRepository;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod console;

#[derive(Debug, PartialEq, Eq)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
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

fn require_number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let raw = require_value(args, flag)?;
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- run    [options] [--practice] [--randomize] [--resume|--restart]");
    eprintln!("  cargo run -p app -- seed   [--db <sqlite_url>] [--questions <n>]");
    eprintln!("  cargo run -p app -- status [options]");
    eprintln!("  cargo run -p app -- clear  [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>   default sqlite:quiz.sqlite3");
    eprintln!("  --quiz-id <id>      default 1");
    eprintln!("  --user-id <id>      default 1");
    eprintln!("  --questions <n>     question ids 1..=n, default 20");
    eprintln!("  --minutes <m>       time limit, 0 for untimed, default 10");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_ID, QUIZ_USER_ID");
    eprintln!("  QUIZ_API_BASE_URL, QUIZ_API_NONCE   use the REST backend instead of SQLite");
    eprintln!("  QUIZ_PAGE_SIZE, QUIZ_PREFETCH_THRESHOLD, QUIZ_AUTOSAVE_DEBOUNCE_MS,");
    eprintln!("  QUIZ_SAFETY_TIMEOUT_MS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Seed,
    Status,
    Clear,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "seed" => Some(Self::Seed),
            "status" => Some(Self::Status),
            "clear" => Some(Self::Clear),
            _ => None,
        }
    }
}

/// What to do when a saved attempt is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    Ask,
    Resume,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    db_url: String,
    quiz_id: QuizId,
    user_id: UserId,
    questions: u64,
    minutes: u32,
    randomize: bool,
    practice: bool,
    recovery: Recovery,
}

impl Args {
    /// Defaults, overridden by `QUIZ_DB_URL`, `QUIZ_ID` and `QUIZ_USER_ID`.
    fn from_env() -> Self {
        let id = |key: &str| {
            std::env::var(key)
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(1)
        };
        Self {
            db_url: std::env::var("QUIZ_DB_URL")
                .ok()
                .map_or_else(|| normalize_sqlite_url("quiz.sqlite3".into()), normalize_sqlite_url),
            quiz_id: QuizId::new(id("QUIZ_ID")),
            user_id: UserId::new(id("QUIZ_USER_ID")),
            questions: 20,
            minutes: 10,
            randomize: false,
            practice: false,
            recovery: Recovery::Ask,
        }
    }

    fn parse(mut self, args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    self.db_url = normalize_sqlite_url(value);
                }
                "--quiz-id" => self.quiz_id = QuizId::new(require_number(args, "--quiz-id")?),
                "--user-id" => self.user_id = UserId::new(require_number(args, "--user-id")?),
                "--questions" => self.questions = require_number(args, "--questions")?,
                "--minutes" => self.minutes = require_number(args, "--minutes")?,
                "--randomize" => self.randomize = true,
                "--practice" => self.practice = true,
                "--resume" => self.recovery = Recovery::Resume,
                "--restart" => self.recovery = Recovery::Restart,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }
        Ok(self)
    }

    fn quiz(&self) -> QuizDefinition {
        let ids = (1..=self.questions).map(QuestionId::new).collect();
        let quiz = if self.practice {
            QuizDefinition::practice(self.quiz_id, ids)
        } else {
            QuizDefinition::graded(self.quiz_id, ids)
        };
        quiz.with_duration_minutes(self.minutes)
            .with_randomize(self.randomize)
    }
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
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
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

/// Arithmetic question `id` with four options, one of them correct.
fn demo_question(id: u64) -> Question {
    let (a, b) = (id, (id * 7) % 13 + 1);
    let answer = a + b;
    let mut values = [answer, answer + 1, answer.saturating_sub(1).max(1) + 10, answer + 2];
    values.rotate_left(usize::try_from(id % 4).unwrap_or(0));
    let options = values
        .iter()
        .zip(0_u64..)
        .map(|(value, k)| AnswerOption {
            id: AnswerId::new(id * 10 + k),
            text: value.to_string(),
        })
        .collect::<Vec<_>>();
    let correct = options
        .iter()
        .find(|o| o.text == answer.to_string())
        .map(|o| o.id);

    let question = Question::new(QuestionId::new(id), format!("What is {a} + {b}?"))
        .with_options(options)
        .with_points(if id % 5 == 0 { 2 } else { 1 });
    match correct {
        Some(correct) => question.with_correct_answer(correct),
        None => question,
    }
}

async fn seed(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    prepare_sqlite_file(&args.db_url)?;
    let repo = SqliteRepository::connect(&args.db_url).await?;
    repo.migrate().await?;
    for id in 1..=args.questions {
        repo.upsert_question(&demo_question(id)).await?;
    }
    tracing::info!(db = %args.db_url, questions = args.questions, "seeded questions");
    println!("seeded {} questions into {}", args.questions, args.db_url);
    Ok(())
}

/// REST backend when `QUIZ_API_BASE_URL` is set, SQLite otherwise.
async fn open_storage(args: &Args) -> Result<Storage, Box<dyn std::error::Error>> {
    if std::env::var_os("QUIZ_API_BASE_URL").is_some() {
        let config = ApiConfig::from_env()?;
        tracing::info!(base_url = %config.base_url(), "using REST backend");
        return Ok(Storage::rest(config));
    }
    prepare_sqlite_file(&args.db_url)?;
    Ok(Storage::sqlite(&args.db_url).await?)
}

async fn run_attempt(args: &Args, storage: &Storage) -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env();
    let mut session = AttemptSession::new(
        storage,
        args.quiz(),
        args.user_id,
        config,
        Clock::default_clock(),
    );

    let mut input = console::stdin_lines();
    let mut outcome = session.start().await?;
    if outcome == StartOutcome::AwaitingRecovery {
        let resume = match args.recovery {
            Recovery::Resume => true,
            Recovery::Restart => false,
            Recovery::Ask => console::ask_resume(&session, &mut input).await?,
        };
        outcome = if resume {
            session.resume().await?
        } else {
            session.restart().await?
        };
    }
    if let StartOutcome::Degraded { reason } = &outcome {
        println!("warning: {reason}; questions will appear once loaded");
    }

    match console::drive(&mut session, &mut input).await? {
        Some(result) => console::print_result(&result),
        None => println!("left the quiz; progress is kept for later"),
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let cmd = match argv.next() {
        None => Command::Run,
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let args = Args::from_env().parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    match cmd {
        Command::Seed => seed(&args).await,
        Command::Run => {
            let storage = open_storage(&args).await?;
            run_attempt(&args, &storage).await
        }
        Command::Status => {
            let storage = open_storage(&args).await?;
            match storage.autosave.get(args.user_id, args.quiz_id).await? {
                Some(snapshot) => console::print_snapshot(&snapshot),
                None => println!("no saved attempt for quiz {}", args.quiz_id),
            }
            Ok(())
        }
        Command::Clear => {
            let storage = open_storage(&args).await?;
            storage.autosave.delete(args.user_id, args.quiz_id).await?;
            println!("cleared saved attempt for quiz {}", args.quiz_id);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,engine=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Args {
        Args {
            db_url: "sqlite::memory:".into(),
            quiz_id: QuizId::new(1),
            user_id: UserId::new(1),
            questions: 20,
            minutes: 10,
            randomize: false,
            practice: false,
            recovery: Recovery::Ask,
        }
    }

    fn parse(args: &[&str]) -> Result<Args, ArgsError> {
        defaults().parse(&mut args.iter().map(ToString::to_string))
    }

    #[test]
    fn parses_run_flags() {
        let args = parse(&[
            "--quiz-id", "3", "--user-id", "7", "--questions", "120", "--minutes", "0",
            "--practice", "--restart",
        ])
        .unwrap();
        assert_eq!(args.quiz_id, QuizId::new(3));
        assert_eq!(args.user_id, UserId::new(7));
        assert_eq!(args.questions, 120);
        assert!(args.practice);
        assert_eq!(args.recovery, Recovery::Restart);

        let quiz = args.quiz();
        assert!(quiz.is_practice());
        assert_eq!(quiz.question_ids.len(), 120);
        assert_eq!(quiz.time_limit_secs(), None);
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            parse(&["--quiz-id", "three"]),
            Err(ArgsError::InvalidNumber {
                flag: "--quiz-id",
                raw: "three".into()
            })
        );
        assert_eq!(
            parse(&["--minutes"]),
            Err(ArgsError::MissingValue { flag: "--minutes" })
        );
        assert_eq!(
            parse(&["--verbose"]),
            Err(ArgsError::UnknownArg("--verbose".into()))
        );
    }

    #[test]
    fn sqlite_urls_are_made_absolute() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:///tmp/q.db".into()),
            "sqlite:///tmp/q.db"
        );
        assert!(normalize_sqlite_url("sqlite:q.db".into()).starts_with("sqlite:///"));
    }

    #[test]
    fn demo_questions_have_exactly_one_correct_option() {
        for id in 1..=40 {
            let q = demo_question(id);
            let correct = q.correct_answer.unwrap();
            assert_eq!(q.options.len(), 4);
            assert_eq!(q.options.iter().filter(|o| o.id == correct).count(), 1);
            let (a, b) = (id, (id * 7) % 13 + 1);
            let text = &q.options.iter().find(|o| o.id == correct).unwrap().text;
            assert_eq!(text, &(a + b).to_string());
        }
    }
}
