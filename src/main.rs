//! study-console - terminal driver for a Phase II study session
//!
//! Image and narration files are given on the command line; everything else
//! is typed at the prompt. `help` lists the commands.

use std::path::{Path, PathBuf};
use study_bridge::config::BridgeConfig;
use study_bridge::connection::WebSocketConnector;
use study_bridge::protocol::{FeedbackChoice, FeedbackForm, SatisfactionSurvey, DEFAULT_CATEGORIES};
use study_bridge::runtime::{self, Command, RuntimeHandle, SessionSnapshot, UiEvent};
use study_bridge::selection::ImageCatalog;
use study_bridge::state_machine::NoticeLevel;
use study_bridge::transcript::Variant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
commands:
  user <id>                set the participant id
  connect                  open the bridge connection
  start | resume           start (or resume) the model session
  choose a|b               record the Phase I preference for the current image
  new                      ask for a response on the current image
  yes | no                 accept or reject the last response
  text <feedback>          feedback text for the last response
  survey <n> <n> <n> <n> <n>   satisfaction scores, 1-7
  rank <category>          add or remove a category in the ranking
  mark <category> <note>   annotate a category (empty note clears it)
  continue                 send feedback and move to the next image
  select <key|file>        jump to an image (key is <persona>_<activity>)
  next                     move to the next image
  images                   list images
  export [dir]             write <user>_Reflection.json
  status | help | quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout belongs to the console
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "study_bridge=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = BridgeConfig::from_env()?;
    let catalog = load_catalog(std::env::args().skip(1).map(PathBuf::from)).await?;
    if catalog.is_empty() {
        tracing::warn!("No Persona_<pid>_Activity_<aid> images given on the command line");
    }
    let image_keys: Vec<String> = catalog.records().iter().map(|r| r.key.clone()).collect();

    tracing::info!(
        url = %config.bridge_url,
        method = %config.method,
        images = catalog.len(),
        "Starting study console"
    );

    let handle = runtime::start(config, catalog, WebSocketConnector);
    let mut events = handle.subscribe();
    let mut form = FeedbackForm::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{HELP}");
    handle.send(Command::Status).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line, &mut form, &image_keys) {
                    Input::Command(command) => handle.send(command).await?,
                    Input::Print(text) => println!("{text}"),
                    Input::Nothing => {}
                    Input::Quit => break,
                }
            }
            event = events.recv() => match event {
                Ok(UiEvent::FeedbackCleared) => {
                    form = FeedbackForm::default();
                    println!("(feedback form cleared)");
                }
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Console fell behind on events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    shutdown(handle).await;
    Ok(())
}

async fn shutdown(handle: RuntimeHandle) {
    handle.shutdown().await;
    tracing::info!("Study console stopped");
}

/// Build the catalog from image paths and attach any narration files
async fn load_catalog(
    paths: impl Iterator<Item = PathBuf>,
) -> Result<ImageCatalog, Box<dyn std::error::Error>> {
    let paths: Vec<PathBuf> = paths.collect();
    let names: Vec<String> = paths.iter().filter_map(|p| file_name(p)).collect();
    let mut catalog = ImageCatalog::from_names(&names);

    for path in &paths {
        let Some(name) = file_name(path) else { continue };
        if !name.to_ascii_lowercase().contains("_description.") {
            continue;
        }
        let contents = tokio::fs::read_to_string(path).await?;
        if let Err(e) = catalog.attach_narration(&name, &contents) {
            tracing::warn!(path = %path.display(), error = %e, "Skipping narration");
        }
    }
    Ok(catalog)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

enum Input {
    Command(Command),
    Print(String),
    Nothing,
    Quit,
}

fn parse_line(line: &str, form: &mut FeedbackForm, image_keys: &[String]) -> Input {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match word {
        "" => Input::Nothing,
        "help" => Input::Print(HELP.to_string()),
        "quit" | "exit" => Input::Quit,
        "user" => Input::Command(Command::SetParticipant(rest.to_string())),
        "connect" => Input::Command(Command::Connect),
        "start" => Input::Command(Command::StartSession { resume: false }),
        "resume" => Input::Command(Command::StartSession { resume: true }),
        "choose" => match rest.to_ascii_lowercase().as_str() {
            "a" => Input::Command(Command::ConfirmChoice { variant: Variant::A }),
            "b" => Input::Command(Command::ConfirmChoice { variant: Variant::B }),
            _ => Input::Print("choose a or b".to_string()),
        },
        "new" => Input::Command(Command::RequestContext),
        "yes" => {
            form.choice = FeedbackChoice::Yes;
            Input::Nothing
        }
        "no" => {
            form.choice = FeedbackChoice::No;
            Input::Nothing
        }
        "text" => {
            form.response = rest.to_string();
            Input::Nothing
        }
        "survey" => match parse_survey(rest) {
            Ok(survey) => {
                form.survey = survey;
                Input::Print(format!("survey: {survey}"))
            }
            Err(message) => Input::Print(message),
        },
        "rank" => {
            if DEFAULT_CATEGORIES.contains(&rest) {
                form.toggle_category(rest);
                Input::Print(format!("ranking: {}", form.ranking.join(", ")))
            } else {
                Input::Print(format!("categories: {}", DEFAULT_CATEGORIES.join(", ")))
            }
        }
        "mark" => {
            let (category, note) = rest.split_once(' ').unwrap_or((rest, ""));
            if DEFAULT_CATEGORIES.contains(&category) {
                form.set_mark(category, note.trim());
                Input::Print(format!("mark: {}", form.render_marks()))
            } else {
                Input::Print(format!("categories: {}", DEFAULT_CATEGORIES.join(", ")))
            }
        }
        "continue" => Input::Command(Command::Continue(form.clone())),
        "select" => Input::Command(Command::Select {
            key: rest.to_string(),
        }),
        "next" => Input::Command(Command::NextImage),
        "images" => Input::Print(image_keys.join(" ")),
        "export" => Input::Command(Command::Export {
            dir: (!rest.is_empty()).then(|| PathBuf::from(rest)),
        }),
        "status" => Input::Command(Command::Status),
        other => Input::Print(format!("unknown command {other:?}; type help")),
    }
}

fn parse_survey(rest: &str) -> Result<SatisfactionSurvey, String> {
    let scores: Vec<u8> = rest
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| "survey scores must be numbers".to_string())?;
    let scores: [u8; 5] = scores
        .try_into()
        .map_err(|_| "survey needs exactly five scores".to_string())?;
    SatisfactionSurvey::new(scores).map_err(|e| e.to_string())
}

fn print_event(event: &UiEvent) {
    match event {
        UiEvent::Snapshot(snapshot) => print_snapshot(snapshot),
        UiEvent::Response {
            text,
            interaction_count,
        } => println!("[model #{interaction_count}] {text}"),
        UiEvent::Notice(notice) => {
            let tag = match notice.level {
                NoticeLevel::Info => "info",
                NoticeLevel::Warning => "warning",
                NoticeLevel::Error => "error",
            };
            println!("[{tag}] {}", notice.message);
        }
        UiEvent::SelectionChanged(Some(selection)) => {
            println!("[image] {} ({})", selection.image_name, selection.scenario_text());
        }
        UiEvent::SelectionChanged(None) => println!("[image] none"),
        UiEvent::Outbound { kind } => println!("[sent] {kind}"),
        UiEvent::Exported { path } => println!("[export] {}", path.display()),
        UiEvent::FeedbackCleared => {}
    }
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    let image = snapshot
        .selection
        .as_ref()
        .map_or("none", |s| s.image_name.as_str());
    println!(
        "[status] user={} connection={} phase={} count={} loading={} image={} turns={}",
        snapshot.participant.as_deref().unwrap_or("-"),
        snapshot.connection.name(),
        snapshot.phase,
        snapshot.interaction_count,
        snapshot.loading,
        image,
        snapshot.recorded_turns,
    );
}
