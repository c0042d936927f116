use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use typelens_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use typelens_contracts::errors::EngineError;
use typelens_contracts::parse::GuessOutcome;
use typelens_contracts::records::SessionStore;
use typelens_contracts::sessions::{InterviewPhase, InterviewSession};
use typelens_engine::{FeatureReply, GuessReply, InsightEngine, ReportReply};

#[derive(Debug, Parser)]
#[command(name = "typelens", version, about = "MBTI insight engine")]
struct Cli {
    /// Data directory holding records, transcripts, and analytics.
    #[arg(long, global = true, default_value = "./typelens-data")]
    data: PathBuf,

    /// User identity records and the interview session are keyed by.
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[arg(long, global = true, default_value = "gpt-4")]
    text_model: String,

    #[arg(long, global = true, default_value = "gpt-4o-mini")]
    vision_model: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat: plain messages drive the adaptive interview,
    /// slash commands reach every other feature.
    Chat,
    /// Interpret a message against a claimed type.
    Interpret { type_code: String, message: String },
    /// Rephrase a message from one type's voice into another's.
    Translate {
        from: String,
        to: String,
        message: String,
    },
    /// Ranked type guesses for a piece of writing.
    Guess { message: String },
    /// Ranked type guesses for an image.
    GuessImage { path: PathBuf },
    /// One adaptive-interview turn; state persists between invocations.
    Interview(InterviewArgs),
    /// Combined report over the interview history.
    Report,
    /// Visitor and click counters.
    Stats,
    /// Top up the insight balance.
    Grant { count: u64 },
}

#[derive(Debug, Args)]
struct InterviewArgs {
    /// The message (or name) to submit for this turn.
    #[arg(long)]
    say: Option<String>,

    /// Discard any in-progress interview state first.
    #[arg(long)]
    reset: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("typelens error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut engine = InsightEngine::new(
        &cli.data,
        &cli.user,
        Some(cli.text_model.clone()),
        Some(cli.vision_model.clone()),
    )?;
    let sessions = SessionStore::new(cli.data.join("sessions"));

    match cli.command {
        Command::Chat => run_chat(&mut engine, &sessions, &cli.user)?,
        Command::Interpret { type_code, message } => {
            let reply = feature_result(engine.interpret(&type_code, &message))?;
            println!("{}", render_feature(&reply));
        }
        Command::Translate { from, to, message } => {
            let reply = feature_result(engine.translate(&from, &to, &message))?;
            println!("{}", render_feature(&reply));
        }
        Command::Guess { message } => {
            let guess = feature_result(engine.guess_text(&message))?;
            println!("{}", render_guess(&guess));
        }
        Command::GuessImage { path } => {
            let guess = feature_result(engine.guess_image(&path))?;
            println!("{}", render_guess(&guess));
        }
        Command::Interview(args) => {
            run_interview_once(&mut engine, &sessions, &cli.user, args)?
        }
        Command::Report => match feature_result(engine.combined_report())? {
            Some(report) => println!("{}", render_report(&report)),
            None => println!("No completed interviews yet. Run `typelens chat` first."),
        },
        Command::Stats => print_stats(&engine),
        Command::Grant { count } => {
            let profile = engine.grant_insights(count)?;
            println!("Granted {count}. Balance: {} insights.", profile.insights);
        }
    }
    Ok(0)
}

/// Lifts engine feature errors that are user-facing conditions (quota,
/// bad type codes) into printed messages instead of process failures.
fn feature_result<T>(result: Result<T, EngineError>) -> Result<T> {
    result.map_err(|err| anyhow::anyhow!(friendly_error(&err)))
}

fn friendly_error(err: &EngineError) -> String {
    match err {
        EngineError::QuotaExhausted => {
            "You are out of insights. Use `typelens grant N` to top up.".to_string()
        }
        EngineError::UnknownType(code) => {
            format!("'{code}' is not one of the sixteen MBTI type codes.")
        }
        other => other.to_string(),
    }
}

fn run_chat(engine: &mut InsightEngine, sessions: &SessionStore, user: &str) -> Result<()> {
    let mut session = match sessions.load(user) {
        Some(session) => session,
        None => {
            let opening = engine.interview_turn(&InterviewSession::default(), "")?;
            println!("{}", opening.reply);
            sessions.save(user, &opening.session)?;
            opening.session
        }
    };
    if session.is_in_progress() {
        println!(
            "Resuming your interview, {} (question {}).",
            session.name, session.question_number
        );
    }
    println!("Typelens chat started. Type /help for commands.");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "quit" => break,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join("  "));
                println!("Anything without a leading slash is an interview answer.");
            }
            "say" => {
                let text = intent.prompt.clone().unwrap_or_default();
                session = interview_step(engine, sessions, user, session, &text)?;
            }
            "restart_interview" => {
                sessions.clear(user)?;
                let opening = engine.interview_turn(&InterviewSession::default(), "")?;
                println!("{}", opening.reply);
                sessions.save(user, &opening.session)?;
                session = opening.session;
            }
            "interpret" => {
                let type_code = arg_str(&intent, "type");
                let message = arg_str(&intent, "message");
                match engine.interpret(&type_code, &message) {
                    Ok(reply) => println!("{}", render_feature(&reply)),
                    Err(err) => println!("{}", friendly_error(&err)),
                }
            }
            "translate" => {
                let from = arg_str(&intent, "from");
                let to = arg_str(&intent, "to");
                let message = arg_str(&intent, "message");
                match engine.translate(&from, &to, &message) {
                    Ok(reply) => println!("{}", render_feature(&reply)),
                    Err(err) => println!("{}", friendly_error(&err)),
                }
            }
            "guess" => {
                let message = arg_str(&intent, "message");
                match engine.guess_text(&message) {
                    Ok(guess) => println!("{}", render_guess(&guess)),
                    Err(err) => println!("{}", friendly_error(&err)),
                }
            }
            "guess_image" => {
                let path = PathBuf::from(arg_str(&intent, "path"));
                if !path.exists() {
                    println!("Image not found: {}", path.display());
                    continue;
                }
                match engine.guess_image(&path) {
                    Ok(guess) => println!("{}", render_guess(&guess)),
                    Err(err) => println!("{}", friendly_error(&err)),
                }
            }
            "report" => match engine.combined_report() {
                Ok(Some(report)) => println!("{}", render_report(&report)),
                Ok(None) => println!("No completed interviews yet."),
                Err(err) => println!("{}", friendly_error(&err)),
            },
            "show_type" => match engine.latest_type() {
                Some(code) => println!("Latest known type: {code}"),
                None => println!("No type on record yet. Finish an interview first."),
            },
            "show_insights" => {
                let profile = engine.profile();
                if profile.premium {
                    println!("Premium account: unlimited insights.");
                } else {
                    println!("Insights remaining: {}", profile.insights);
                }
            }
            "grant" => {
                let count = intent
                    .command_args
                    .get("count")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(1);
                let profile = engine.grant_insights(count)?;
                println!("Granted {count}. Balance: {} insights.", profile.insights);
            }
            "show_stats" => print_stats(engine),
            "set_text_model" => {
                let model = non_empty_arg(&intent, "model");
                match model {
                    Some(model) => {
                        engine.set_text_model(Some(model.clone()));
                        println!("Text model set to {model}");
                    }
                    None => println!(
                        "Text model: {}",
                        engine.text_model().unwrap_or("default")
                    ),
                }
            }
            "set_vision_model" => {
                let model = non_empty_arg(&intent, "model");
                match model {
                    Some(model) => {
                        engine.set_vision_model(Some(model.clone()));
                        println!("Vision model set to {model}");
                    }
                    None => println!(
                        "Vision model: {}",
                        engine.vision_model().unwrap_or("default")
                    ),
                }
            }
            "invalid" => {
                println!("{}", arg_str(&intent, "usage"));
            }
            _ => {
                println!(
                    "Unknown command /{}. Type /help for the list.",
                    arg_str(&intent, "command")
                );
            }
        }
    }
    Ok(())
}

/// Submits one interview input, prints the outcome, and keeps the stored
/// session in step with what the engine handed back.
fn interview_step(
    engine: &mut InsightEngine,
    sessions: &SessionStore,
    user: &str,
    session: InterviewSession,
    input: &str,
) -> Result<InterviewSession> {
    match engine.interview_turn(&session, input) {
        Ok(outcome) => {
            println!("{}", outcome.reply);
            if let Some(analysis) = &outcome.analysis {
                println!(
                    "\nInterview complete. Type: {} (confidence {:.0}%).",
                    analysis.mbti_type, analysis.confidence
                );
                if !analysis.explanation.is_empty() {
                    println!("{}", analysis.explanation);
                }
            }
            if outcome.session.phase == InterviewPhase::Complete {
                sessions.clear(user)?;
            } else {
                sessions.save(user, &outcome.session)?;
            }
            Ok(outcome.session)
        }
        Err(EngineError::QuotaExhausted) => {
            println!("{}", friendly_error(&EngineError::QuotaExhausted));
            Ok(session)
        }
        Err(err) => {
            println!(
                "The interview hit a snag ({err}). Your last message was not recorded; try it again."
            );
            Ok(session)
        }
    }
}

fn run_interview_once(
    engine: &mut InsightEngine,
    sessions: &SessionStore,
    user: &str,
    args: InterviewArgs,
) -> Result<()> {
    if args.reset {
        sessions.clear(user)?;
        println!("Interview state cleared.");
        if args.say.is_none() {
            return Ok(());
        }
    }
    let session = sessions
        .load(user)
        .unwrap_or_default();
    let input = args.say.unwrap_or_default();
    interview_step(engine, sessions, user, session, &input)?;
    Ok(())
}

fn arg_str(intent: &typelens_contracts::chat::Intent, key: &str) -> String {
    intent
        .command_args
        .get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn non_empty_arg(intent: &typelens_contracts::chat::Intent, key: &str) -> Option<String> {
    let value = arg_str(intent, key);
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn render_feature(reply: &FeatureReply) -> String {
    if reply.cached {
        format!("{}\n(cached)", reply.text)
    } else {
        reply.text.clone()
    }
}

fn render_guess(guess: &GuessReply) -> String {
    match &guess.outcome {
        GuessOutcome::Ranked(entries) => {
            let mut lines = Vec::with_capacity(entries.len());
            for entry in entries {
                lines.push(format!(
                    "{}. {} - {}%\n   {}",
                    entry.rank, entry.code, entry.percent, entry.reasoning
                ));
            }
            lines.join("\n")
        }
        GuessOutcome::Unparsed(raw) => raw.clone(),
    }
}

fn render_report(report: &ReportReply) -> String {
    format!(
        "Most frequent type: {} ({:.2}% of {} sessions)\n\n{}",
        report.aggregate.mbti_type, report.aggregate.confidence, report.aggregate.total,
        report.text
    )
}

fn print_stats(engine: &InsightEngine) {
    let counters = engine.stats();
    println!(
        "Visits: {} total, {} unique.",
        counters.total_visits, counters.unique_visitors
    );
    if counters.feature_clicks.is_empty() {
        println!("No feature clicks yet.");
    } else {
        for (feature, count) in &counters.feature_clicks {
            println!("  {feature}: {count}");
        }
    }
}

#[cfg(test)]
mod tests {
    use typelens_contracts::parse::{GuessOutcome, RankedGuess};
    use typelens_contracts::records::SessionStore;
    use typelens_contracts::sessions::{InterviewPhase, InterviewSession};
    use typelens_engine::{FeatureReply, GuessReply, InsightEngine};

    use super::{interview_step, render_feature, render_guess};

    fn dryrun_engine(dir: &std::path::Path) -> InsightEngine {
        InsightEngine::new(
            dir,
            "local",
            Some("dryrun-text-1".to_string()),
            Some("dryrun-text-1".to_string()),
        )
        .expect("engine construction")
    }

    #[test]
    fn render_guess_formats_ranked_entries() {
        let guess = GuessReply {
            outcome: GuessOutcome::Ranked(vec![RankedGuess {
                rank: 1,
                code: "INTJ".to_string(),
                percent: 70,
                reasoning: "Structured.".to_string(),
            }]),
            reply: FeatureReply {
                text: String::new(),
                model: "dryrun-text-1".to_string(),
                degraded: false,
                cached: false,
            },
        };
        let rendered = render_guess(&guess);
        assert!(rendered.contains("1. INTJ - 70%"));
        assert!(rendered.contains("Structured."));
    }

    #[test]
    fn render_guess_falls_back_to_raw() {
        let guess = GuessReply {
            outcome: GuessOutcome::Unparsed("free-form reply".to_string()),
            reply: FeatureReply {
                text: "free-form reply".to_string(),
                model: "dryrun-text-1".to_string(),
                degraded: false,
                cached: false,
            },
        };
        assert_eq!(render_guess(&guess), "free-form reply");
    }

    #[test]
    fn render_feature_marks_cached_replays() {
        let reply = FeatureReply {
            text: "insight".to_string(),
            model: "dryrun-text-1".to_string(),
            degraded: false,
            cached: true,
        };
        assert!(render_feature(&reply).ends_with("(cached)"));
    }

    #[test]
    fn interview_step_persists_session_between_turns() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(temp.path());
        let sessions = SessionStore::new(temp.path().join("sessions"));

        let opening = interview_step(
            &mut engine,
            &sessions,
            "local",
            InterviewSession::default(),
            "",
        )?;
        assert_eq!(opening.phase, InterviewPhase::AwaitingName);

        let started = interview_step(&mut engine, &sessions, "local", opening, "Alex")?;
        assert!(started.is_in_progress());
        let stored = sessions.load("local").expect("state saved");
        assert_eq!(stored, started);

        // A caller that lost its in-memory copy resumes from the store.
        let resumed = interview_step(&mut engine, &sessions, "local", stored, "Mostly quiet.")?;
        assert_eq!(resumed.exchange_count, 1);
        Ok(())
    }

    #[test]
    fn interview_step_clears_store_on_completion() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut engine = dryrun_engine(temp.path());
        let sessions = SessionStore::new(temp.path().join("sessions"));

        let mut session = interview_step(
            &mut engine,
            &sessions,
            "local",
            InterviewSession::default(),
            "",
        )?;
        session = interview_step(&mut engine, &sessions, "local", session, "Alex")?;
        while session.phase != InterviewPhase::Complete {
            session = interview_step(&mut engine, &sessions, "local", session, "Reading.")?;
        }
        assert!(sessions.load("local").is_none());
        Ok(())
    }
}
