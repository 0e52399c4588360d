mod client;
mod config;
mod files;
mod session;
mod transcript;

use std::io::Write as _;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use client::{Client, FilePayload};
use config::{ConfigFile, ResolvedConfig};
use files::IngestStatus;
use session::{ChatEvent, ChatSession};
use transcript::{DeliveryStatus, Role, should_group_with_previous};

#[derive(Parser, Debug)]
#[command(
    name = "neonchat",
    about = "A terminal client for the Neon chat assistant",
    long_about = None,
)]
struct Args {
    /// Message to send directly (omit to enter interactive mode)
    message: Option<String>,

    /// Profile to use from config file
    #[arg(short, long, env = "NEONCHAT_PROFILE")]
    profile: Option<String>,

    /// Override endpoint URL
    #[arg(long, env = "NEONCHAT_ENDPOINT")]
    endpoint: Option<String>,

    /// Write a default config file to ~/.config/neonchat/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Probe the backend health endpoint and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("neonchat=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: neonchat");
        return Ok(());
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved =
        ResolvedConfig::resolve(&file, args.profile.as_deref(), args.endpoint.as_deref());
    let client = Client::new(resolved.endpoint.clone(), resolved.timeout_secs)?;

    // ── --check ───────────────────────────────────────────────────────────────
    if args.check {
        match client.health_check().await {
            Ok(status) => println!("✓ {} — {status}", resolved.endpoint),
            Err(e) => {
                println!("✗ {} — {}", resolved.endpoint, e.detail());
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = ChatSession::new(Box::new(client), tx);

    // ── Single-shot mode ──────────────────────────────────────────────────────
    if let Some(message) = args.message {
        return run_single_shot(&mut session, rx, &message).await;
    }

    run_repl(&mut session, rx, &resolved).await
}

// ── Single-shot mode (one message, plain stdout) ──────────────────────────────

async fn run_single_shot(
    session: &mut ChatSession,
    mut rx: UnboundedReceiver<ChatEvent>,
    message: &str,
) -> Result<()> {
    session.submit(message).await;
    drain_events(&mut rx, session);

    let failed = session
        .transcript()
        .turns()
        .first()
        .map(|t| t.delivery_status == DeliveryStatus::Error)
        .unwrap_or(true);
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

// ── Interactive mode ──────────────────────────────────────────────────────────

const HELP: &str = "\
commands:
  :upload <path>…     upload documents (pdf, docx, txt, md)
  :files              list uploaded files
  :include <name>     toggle a file in/out of answer context
  :remove <name>      remove a file (removing the last clears the backend too)
  :clear              clear all files, local and remote
  :rag on|off         toggle retrieval-augmented answering
  :react <n> <emoji>  react to turn n (indexes shown by :log)
  :log                print the transcript with delivery statuses
  :new                start a fresh transcript
  :quit               exit
anything else is sent as a chat message";

async fn run_repl(
    session: &mut ChatSession,
    mut rx: UnboundedReceiver<ChatEvent>,
    resolved: &ResolvedConfig,
) -> Result<()> {
    println!();
    println!(
        "  ▲ neonchat  {}  ·  {}",
        resolved.profile_name, resolved.endpoint
    );
    println!("  type :help for commands");
    println!();

    let stdin = std::io::stdin();
    loop {
        print!("you ▸ ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(':') {
            let mut parts = rest.split_whitespace();
            let cmd = parts.next().unwrap_or("");
            let args: Vec<&str> = parts.collect();
            match cmd {
                "quit" | "q" | "exit" => break,
                "help" => println!("{HELP}"),
                "upload" => {
                    if let Err(e) = upload_paths(session, &args).await {
                        println!("  ✗ {e:#}");
                    }
                }
                "files" => print_files(session),
                "include" => match args.first() {
                    Some(name) => {
                        if session.toggle_inclusion(name) {
                            let included = session
                                .files()
                                .files()
                                .iter()
                                .find(|f| f.name == *name)
                                .is_some_and(|f| f.included_in_context);
                            println!(
                                "  {name} is now {} context",
                                if included { "in" } else { "out of" }
                            );
                        } else {
                            println!("  no accepted file named {name}");
                        }
                    }
                    None => println!("  usage: :include <name>"),
                },
                "remove" => match args.first() {
                    Some(name) => {
                        if !session.remove_file(name).await {
                            println!("  no file named {name}");
                        }
                    }
                    None => println!("  usage: :remove <name>"),
                },
                "clear" => session.clear_all().await,
                "rag" => match args.first() {
                    Some(&"on") => {
                        if !session.set_rag_enabled(true) {
                            println!("  no accepted file is included in context — upload one first");
                        }
                    }
                    Some(&"off") => {
                        session.set_rag_enabled(false);
                    }
                    _ => println!(
                        "  RAG is {} — use :rag on|off",
                        on_off(session.files().rag_enabled())
                    ),
                },
                "react" => match (args.first().and_then(|s| s.parse::<usize>().ok()), args.get(1)) {
                    (Some(n), Some(emoji)) => {
                        if session.add_reaction(n, emoji) {
                            let turn = &session.transcript().turns()[n];
                            let rendered: Vec<String> = turn
                                .reactions
                                .iter()
                                .map(|(e, c)| format!("{e} {c}"))
                                .collect();
                            println!("  {}", rendered.join("  "));
                        } else {
                            println!("  no turn {n}");
                        }
                    }
                    _ => println!("  usage: :react <n> <emoji>"),
                },
                "log" => print_transcript(session),
                "new" => {
                    session.reset_transcript();
                    println!("  ✓ new conversation");
                }
                _ => println!("  unknown command :{cmd} — try :help"),
            }
        } else {
            session.submit(line).await;
        }

        drain_events(&mut rx, session);
    }
    Ok(())
}

async fn upload_paths(session: &mut ChatSession, paths: &[&str]) -> Result<()> {
    if paths.is_empty() {
        println!("  usage: :upload <path>…");
        return Ok(());
    }
    let mut payloads = Vec::new();
    for p in paths {
        let bytes = std::fs::read(p).with_context(|| format!("Failed to read {p}"))?;
        let name = std::path::Path::new(p)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(p)
            .to_string();
        payloads.push(FilePayload { name, bytes });
    }
    if let Err(e) = session.upload(payloads).await {
        println!("  ✗ {e}");
    }
    Ok(())
}

// ── Output helpers ────────────────────────────────────────────────────────────

fn drain_events(rx: &mut UnboundedReceiver<ChatEvent>, session: &ChatSession) {
    while let Ok(event) = rx.try_recv() {
        match event {
            ChatEvent::SubmissionAccepted { .. } => {}
            ChatEvent::TypingChanged(true) => println!("  ⋯ neon is typing"),
            ChatEvent::TypingChanged(false) => {}
            ChatEvent::TurnResolved { status, .. } => match status {
                DeliveryStatus::Delivered => println!("  ✓✓ delivered"),
                DeliveryStatus::Error => println!("  ✗ not delivered"),
                _ => {}
            },
            ChatEvent::AssistantReplied { index } => {
                if let Some(turn) = session.transcript().turns().get(index) {
                    println!("neon ▸ {}", turn.content);
                }
            }
            ChatEvent::BatchStarted { .. } => println!("  ⋯ uploading"),
            ChatEvent::BatchResolved { accepted: true, .. } => println!("  ✓ files ingested"),
            ChatEvent::BatchResolved {
                accepted: false, ..
            } => println!("  ✗ upload failed — see :files"),
            ChatEvent::FilesCleared => println!("  ✓ context cleared"),
            ChatEvent::RagChanged(on) => println!("  RAG {}", on_off(on)),
        }
    }
}

fn print_files(session: &ChatSession) {
    let files = session.files().files();
    if files.is_empty() {
        println!("  no files uploaded");
        return;
    }
    for f in files {
        let status = match f.ingest_status {
            IngestStatus::Uploading => "⋯ uploading",
            IngestStatus::Accepted => "✓ accepted ",
            IngestStatus::Rejected => "✗ rejected ",
        };
        let context = match f.ingest_status {
            IngestStatus::Accepted if f.included_in_context => "  [in context]",
            IngestStatus::Accepted => "  [excluded]",
            _ => "",
        };
        let detail = f
            .error_detail
            .as_deref()
            .map(|d| format!("  — {d}"))
            .unwrap_or_default();
        println!("  {status} {}{context}{detail}", f.name);
    }
    println!("  RAG: {}", on_off(session.files().rag_enabled()));
}

fn print_transcript(session: &ChatSession) {
    let turns = session.transcript().turns();
    if turns.is_empty() {
        println!("  empty transcript");
        return;
    }
    for (i, turn) in turns.iter().enumerate() {
        let previous = i.checked_sub(1).map(|p| &turns[p]);
        // Grouped turns drop the author label, like the original bubbles.
        let label = if should_group_with_previous(turn, previous) {
            "     "
        } else {
            match turn.role {
                Role::User => "you  ",
                Role::Assistant => "neon ",
            }
        };
        let reactions = if turn.reactions.is_empty() {
            String::new()
        } else {
            let rendered: Vec<String> = turn
                .reactions
                .iter()
                .map(|(e, c)| format!("{e} {c}"))
                .collect();
            format!("  [{}]", rendered.join("  "))
        };
        println!(
            "  {i:>2} {label}▸ {}  {}{reactions}",
            turn.content,
            turn.delivery_status.glyph()
        );
    }
}

fn print_profiles(file: &ConfigFile) {
    if file.profiles.is_empty() {
        println!("No profiles configured. Run `neonchat --init` to create a starter config.");
        return;
    }
    println!("Profiles ({}):", config::config_path().display());
    let mut names: Vec<_> = file.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &file.profiles[name];
        let marker = if *name == file.default_profile { "*" } else { " " };
        println!("  {marker} {name:<12} {}", p.endpoint);
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
