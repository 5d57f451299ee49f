use std::fmt;
use std::sync::Arc;

use quiz_core::model::{Gender, Identity, IdentityDraft, IdentityKind, ModuleId, UserId};
use quiz_core::{Clock, ModuleCatalog, ModuleInfo};
use services::{AnswerOutcome, LogTelemetry, SessionService, SyncHealth};
use storage::{RestStore, SyncStores};
use tracing::debug;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => {
                write!(f, "invalid {flag} value: {raw}")
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

fn parse_index(flag: &'static str, raw: String) -> Result<u32, ArgsError> {
    raw.parse().map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- status [--json]");
    eprintln!("  cargo run -p app -- start  --module <n>");
    eprintln!("  cargo run -p app -- answer --module <n> --question <n> --choice <n> [--wrong]");
    eprintln!("  cargo run -p app -- skip");
    eprintln!("  cargo run -p app -- reset");
    eprintln!();
    eprintln!("Common flags:");
    eprintln!("  --db <path>    device database (default quiz.sqlite3)");
    eprintln!("  --user <id>    play as this account instead of a guest");
    eprintln!("  --name <name>  display name for --user (default Player)");
    eprintln!("  --verbose      debug logging");
    eprintln!();
    eprintln!("The CLI trusts the caller to grade the answer; pass --wrong when the");
    eprintln!("chosen option was incorrect.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB, QUIZ_USER, QUIZ_NAME, QUIZ_SYNC_URL, QUIZ_SYNC_KEY");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Start,
    Answer,
    Skip,
    Reset,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "status" => Some(Self::Status),
            "start" => Some(Self::Start),
            "answer" => Some(Self::Answer),
            "skip" => Some(Self::Skip),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

struct Args {
    db_path: String,
    user: Option<String>,
    name: Option<String>,
    module: Option<u32>,
    question: Option<u32>,
    choice: Option<u32>,
    wrong: bool,
    json: bool,
    verbose: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_path: std::env::var("QUIZ_DB")
                .ok()
                .unwrap_or_else(|| "quiz.sqlite3".into()),
            user: std::env::var("QUIZ_USER").ok().filter(|v| !v.is_empty()),
            name: std::env::var("QUIZ_NAME").ok().filter(|v| !v.is_empty()),
            module: None,
            question: None,
            choice: None,
            wrong: false,
            json: false,
            verbose: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => parsed.db_path = require_value(args, "--db")?,
                "--user" => parsed.user = Some(require_value(args, "--user")?),
                "--name" => parsed.name = Some(require_value(args, "--name")?),
                "--module" => {
                    let value = require_value(args, "--module")?;
                    parsed.module = Some(parse_index("--module", value)?);
                }
                "--question" => {
                    let value = require_value(args, "--question")?;
                    parsed.question = Some(parse_index("--question", value)?);
                }
                "--choice" => {
                    let value = require_value(args, "--choice")?;
                    parsed.choice = Some(parse_index("--choice", value)?);
                }
                "--wrong" => parsed.wrong = true,
                "--json" => parsed.json = true,
                "--verbose" => parsed.verbose = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn identity(&self) -> Result<Option<Identity>, Box<dyn std::error::Error>> {
        let Some(user) = self.user.as_deref() else {
            return Ok(None);
        };
        let draft = IdentityDraft {
            id: UserId::new(user),
            kind: IdentityKind::Authenticated,
            display_name: self.name.clone().unwrap_or_else(|| "Player".into()),
            organization: None,
            country: None,
            gender: Gender::Undisclosed,
            created_at: Clock::system().now(),
        };
        Ok(Some(draft.validate()?))
    }

}

fn required(field: Option<u32>, flag: &'static str) -> Result<u32, ArgsError> {
    field.ok_or(ArgsError::MissingValue { flag })
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// The ten IFRS 17 study modules, five questions each. Question content
/// lives with the shell that renders it; the engine only needs the shape.
fn demo_catalog() -> Result<ModuleCatalog, Box<dyn std::error::Error>> {
    let titles = [
        "Scope and Definitions",
        "Level of Aggregation",
        "Initial Recognition",
        "Fulfilment Cash Flows",
        "Contractual Service Margin",
        "Premium Allocation Approach",
        "Onerous Contracts",
        "Reinsurance Held",
        "Presentation",
        "Disclosure",
    ];
    let modules = titles
        .iter()
        .enumerate()
        .map(|(index, title)| ModuleInfo::new(ModuleId::new(index as u32), *title, 5))
        .collect();
    Ok(ModuleCatalog::new(modules)?)
}

fn prepare_db_path(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn sync_label(health: SyncHealth) -> &'static str {
    match health {
        SyncHealth::LocalOnly => "device only",
        SyncHealth::Synced => "synced",
        SyncHealth::Pending => "save pending",
        SyncHealth::Degraded => "sync degraded",
    }
}

fn print_status(service: &SessionService, json: bool) {
    let Some(overview) = service.overview() else {
        println!("no active session");
        return;
    };
    if json {
        match serde_json::to_string_pretty(&overview) {
            Ok(body) => println!("{body}"),
            Err(err) => eprintln!("could not render status: {err}"),
        }
        return;
    }
    let kind = if overview.guest { "guest" } else { "account" };
    println!("user       {} ({kind})", overview.user);
    println!(
        "position   module {} question {}",
        overview.module, overview.question
    );
    println!(
        "score      {} (level {}, {} xp)",
        overview.score, overview.level, overview.xp
    );
    println!("streak     {} (combo x{})", overview.streak, overview.combo);
    println!(
        "modules    {} completed, {} answered in the current one",
        overview.completed_modules, overview.answered_in_module
    );
    println!(
        "power-ups  skip {} / hint {} / eliminate {}",
        overview.power_ups.skip, overview.power_ups.hint, overview.power_ups.eliminate
    );
    println!("sync       {}", sync_label(overview.sync));
}

fn print_outcome(outcome: &AnswerOutcome) {
    if outcome.correct {
        match outcome.award {
            Some(award) if award.leveled_up => {
                println!("correct! +{} points, level {} reached", award.points, award.level);
            }
            Some(award) => println!("correct! +{} points", award.points),
            None => println!("already answered earlier; moving on"),
        }
    } else {
        println!("not this time; streak reset");
    }
    if let Some(done) = outcome.completion {
        if done.newly_completed {
            if done.perfect {
                println!("module complete, and every answer was right");
            } else {
                println!("module complete");
            }
        }
        if let Some(unlocked) = done.newly_unlocked {
            println!("module {} unlocked", unlocked.value());
        }
    }
    println!(
        "next up: module {} question {}",
        outcome.module.value(),
        outcome.question
    );
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // Default behavior: report status when no subcommand is given.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Status,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Status,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let args = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    setup_logging(args.verbose);

    prepare_db_path(&args.db_path)?;
    let remote = Arc::new(RestStore::from_env());
    if !remote.enabled() {
        debug!("QUIZ_SYNC_URL not set; progress stays on this device");
    }
    let stores = SyncStores::device(&args.db_path, remote)?;

    let mut service =
        SessionService::new(stores, demo_catalog()?, Clock::system(), Arc::new(LogTelemetry));
    let plan = service.boot(args.identity()?).await;
    debug!(
        module = plan.module.value(),
        question = plan.question,
        "session resumed"
    );

    match cmd {
        Command::Status => print_status(&service, args.json),
        Command::Start => {
            let module = required(args.module, "--module")?;
            service.start_module(ModuleId::new(module)).await?;
            println!("module {module} started");
            print_status(&service, args.json);
        }
        Command::Answer => {
            let module = required(args.module, "--module")?;
            let question = required(args.question, "--question")?;
            let choice = required(args.choice, "--choice")?;
            let outcome = service
                .submit_answer(ModuleId::new(module), question, choice, !args.wrong)
                .await?;
            print_outcome(&outcome);
        }
        Command::Skip => {
            let outcome = service.skip_question().await?;
            let skips_left = service.progress().map_or(0, |p| p.power_ups().skip);
            println!("question skipped ({skips_left} skips left)");
            if let Some(done) = outcome.completion {
                if done.newly_completed {
                    println!("module complete");
                }
                if let Some(unlocked) = done.newly_unlocked {
                    println!("module {} unlocked", unlocked.value());
                }
            }
            println!(
                "next up: module {} question {}",
                outcome.module.value(),
                outcome.question
            );
        }
        Command::Reset => {
            service.reset().await?;
            println!("progress cleared");
            print_status(&service, args.json);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
