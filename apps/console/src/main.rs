use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use sync_engine::{
    config::load_settings_from,
    engine::EngineEvent,
    status::{ConversationFilter, Tab},
    SyncEngine,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{parse, Command, HELP};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = sync_engine::config::DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    operator_id: Option<String>,
    #[arg(long)]
    tenant_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config);
    if let Some(url) = args.database_url {
        settings.database_url = url;
    }
    if args.operator_id.is_some() {
        settings.operator_id = args.operator_id;
    }
    if args.tenant_id.is_some() {
        settings.tenant_id = args.tenant_id;
    }

    let engine = SyncEngine::connect(settings).await?;
    engine.start().await?;
    println!("{HELP}");
    print_list(&engine, Tab::default());

    let mut events = engine.subscribe_events();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::ConnectionChanged(status) => info!(
                    state = ?status.state,
                    failed_attempts = status.failed_attempts,
                    gave_up = status.gave_up,
                    "console: push channel status"
                ),
                EngineEvent::GatewayReachability { reachable } => {
                    info!(reachable, "console: gateway reachability")
                }
                EngineEvent::SendFailed { key, error } => {
                    println!("! message to {key} was not sent: {}", error.message)
                }
                EngineEvent::Failure(error) => warn!(kind = ?error.kind, "console: {}", error.message),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}\n{HELP}");
                continue;
            }
        };

        match command {
            Command::Select(key) => {
                engine.select_conversation(&key);
                if let Some(conversation) = engine.snapshot().get(&key) {
                    for message in &conversation.messages {
                        let who = if message.sender.is_self() { "me" } else { "them" };
                        println!(
                            "  [{}] {who}: {}",
                            message.timestamp.format("%Y-%m-%d %H:%M"),
                            message.body.content()
                        );
                    }
                }
            }
            Command::Send { key, text } => {
                if let Ok(id) = engine.send_message(&key, &text).await {
                    println!("sent {id}");
                }
            }
            Command::Status { key, status } => {
                if engine.change_status(&key, status).is_none() {
                    println!("no conversation {key}");
                }
            }
            Command::Scroll { key, position } => engine.save_scroll_position(&key, position),
            Command::List(tab) => print_list(&engine, tab),
            Command::Quit => break,
        }
    }

    engine.shutdown().await;
    event_log.abort();
    Ok(())
}

fn print_list(engine: &SyncEngine, tab: Tab) {
    let counts = engine.tab_counts();
    println!(
        "waiting={} attending={} pending={} finished={} contacts={}",
        counts.waiting,
        counts.attending,
        counts.pending,
        counts.finished,
        counts.contacts
    );
    let selected = engine.snapshot().selected().cloned();
    let filter = ConversationFilter {
        tab,
        ..ConversationFilter::default()
    };
    for conversation in engine.view(&filter) {
        let marker = if selected.as_ref() == Some(&conversation.key) { '>' } else { ' ' };
        println!(
            "{marker} {:<16} {:<20} {:>3} {}",
            conversation.contact_address,
            conversation.display_name,
            conversation.unread,
            conversation.last_message_preview.as_deref().unwrap_or("")
        );
    }
}
