//! Line-oriented terminal front end
//!
//! Reads stdin, turns lines into runtime commands and prints `UiEvent`s as
//! they arrive. A line ending in `\` continues onto the next one; the text
//! collected so far is kept as the draft.

mod command;

use command::{parse_line, Line, ReplCommand, Target, HELP};

use crate::model::{DeliveryStatus, Message, Role};
use crate::runtime::{BackendHealth, Command, SessionHandle, SessionSnapshot, UiEvent};
use crate::session::TurnInput;
use crate::store::{search, ListSource};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

/// `events` should be subscribed before the runtime starts so startup
/// output is not missed
pub async fn run(
    handle: SessionHandle,
    events: broadcast::Receiver<UiEvent>,
) -> std::io::Result<()> {
    let printer = tokio::spawn(print_events(events));

    let mut draft = match handle.snapshot().await {
        Some(snapshot) => {
            print_status(&snapshot);
            snapshot.preferences.draft
        }
        None => String::new(),
    };
    if !draft.is_empty() {
        println!("Restored draft:\n{draft}");
    }
    println!("Type a message, or /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(partial) = line.strip_suffix('\\') {
            draft.push_str(partial);
            draft.push('\n');
            handle.send(Command::SetDraft(draft.clone())).await;
            continue;
        }

        let full = if draft.is_empty() {
            line
        } else {
            std::mem::take(&mut draft) + &line
        };

        let keep_going = match parse_line(&full) {
            Ok(Line::Empty) => true,
            Ok(Line::Text(text)) => handle.send(Command::Submit(TurnInput::Text { text })).await,
            Ok(Line::Command(command)) => execute(&handle, command).await,
            Err(e) => {
                println!("{e}");
                true
            }
        };
        if !keep_going {
            break;
        }
    }

    handle.send(Command::Shutdown).await;
    printer.abort();
    Ok(())
}

/// Returns false when the session should end
async fn execute(handle: &SessionHandle, command: ReplCommand) -> bool {
    let Some(snapshot) = handle.snapshot().await else {
        return false;
    };

    let to_send = match command {
        ReplCommand::New => Command::NewConversation,
        ReplCommand::List { filter } => {
            print_conversations(&snapshot, filter.as_deref().unwrap_or(""));
            return true;
        }
        ReplCommand::Open(target) => match resolve(&snapshot, &target) {
            Some(id) => Command::Select { id },
            None => return unknown_conversation(&target),
        },
        ReplCommand::Delete(target) => match resolve(&snapshot, &target) {
            Some(id) => Command::Delete { id },
            None => return unknown_conversation(&target),
        },
        ReplCommand::Regen { message } => Command::Regenerate {
            at: message.map(|n| n - 1),
        },
        ReplCommand::Continue => Command::Continue,
        ReplCommand::Quality(quality) => {
            println!("Quality: {quality}");
            Command::SetQuality(quality)
        }
        ReplCommand::Web(on) => {
            let on = on.unwrap_or(!snapshot.toggles.web_search);
            println!("Search: {}", if on { "web" } else { "knowledge base" });
            Command::SetWebSearch(on)
        }
        ReplCommand::Speak(on) => {
            let on = on.unwrap_or(!snapshot.toggles.voice_replies);
            println!("Spoken replies: {}", if on { "on" } else { "off" });
            Command::SetVoiceReplies(on)
        }
        ReplCommand::Voice => Command::StartVoice,
        ReplCommand::Stop => Command::StopVoice,
        ReplCommand::Attach(path) => Command::Attach { path },
        ReplCommand::Detach => Command::Detach,
        ReplCommand::File { path, prompt } => {
            if !path.is_file() {
                println!("No such file: {}", path.display());
                return true;
            }
            Command::Submit(TurnInput::File {
                text: prompt,
                attachment: crate::model::Attachment::from_path(&path),
            })
        }
        ReplCommand::QuickList => {
            for (i, prompt) in snapshot.preferences.quick_prompts.iter().enumerate() {
                println!("{:>3}. {prompt}", i + 1);
            }
            return true;
        }
        ReplCommand::QuickAdd(prompt) => Command::AddQuickPrompt(prompt),
        ReplCommand::QuickRemove(n) => Command::RemoveQuickPrompt(n - 1),
        ReplCommand::QuickSend(n) => match snapshot.preferences.quick_prompts.get(n - 1) {
            Some(prompt) => Command::Submit(TurnInput::Text {
                text: prompt.clone(),
            }),
            None => {
                println!("No quick prompt #{n}");
                return true;
            }
        },
        ReplCommand::Login(passcode) => Command::Login { passcode },
        ReplCommand::Status => {
            print_status(&snapshot);
            return true;
        }
        ReplCommand::Help => {
            println!("{HELP}");
            return true;
        }
        ReplCommand::Quit => return false,
    };
    handle.send(to_send).await
}

fn resolve(snapshot: &SessionSnapshot, target: &Target) -> Option<String> {
    match target {
        Target::Position(n) => snapshot.conversations.get(n - 1).map(|c| c.id.clone()),
        Target::Id(id) => snapshot
            .conversations
            .iter()
            .any(|c| &c.id == id)
            .then(|| id.clone()),
    }
}

fn unknown_conversation(target: &Target) -> bool {
    match target {
        Target::Position(n) => println!("No conversation #{n}; /list shows them"),
        Target::Id(id) => println!("No conversation {id}; /list shows them"),
    }
    true
}

fn print_conversations(snapshot: &SessionSnapshot, filter: &str) {
    let hits = search(&snapshot.conversations, filter);
    if hits.is_empty() {
        println!("No conversations");
    }
    for (n, c) in hits {
        let marker = if snapshot.active_id.as_deref() == Some(c.id.as_str()) {
            '*'
        } else {
            ' '
        };
        let updated = c.updated_at.as_deref().unwrap_or("");
        println!("{marker}{n:>3}. {}  {updated}", c.title);
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    let backend = match snapshot.backend {
        BackendHealth::Checking => "checking",
        BackendHealth::Up => "up",
        BackendHealth::Down => "unreachable",
    };
    println!(
        "Conversation: {}  quality: {}  search: {}  spoken replies: {}  backend: {backend}",
        snapshot.active_id.as_deref().unwrap_or("(new)"),
        snapshot.toggles.quality,
        if snapshot.toggles.web_search { "web" } else { "knowledge base" },
        if snapshot.toggles.voice_replies { "on" } else { "off" },
    );
    if let Some(attachment) = &snapshot.attachment {
        println!("Attached: {}", attachment.file_name);
    }
    if let Some(meta) = &snapshot.last_meta {
        println!("Last reply: {} ({})", meta.model, meta.quality);
    }
    if snapshot.busy {
        println!("Waiting for a reply");
    }
}

async fn print_events(mut events: broadcast::Receiver<UiEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(text) = render_event(&event) {
                    println!("{text}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Terminal fell behind session events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn render_message(index: usize, message: &Message) -> String {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    format!("[{}] {who}: {}", index + 1, message.content)
}

/// Terminal rendering of an event; `None` for events with nothing to show
pub fn render_event(event: &UiEvent) -> Option<String> {
    match event {
        UiEvent::MessageAppended { index, message } => Some(render_message(*index, message)),
        UiEvent::MessageUpdated { index, message } => {
            (message.status == Some(DeliveryStatus::Failed))
                .then(|| format!("[{}] not delivered", index + 1))
        }
        UiEvent::ConversationChanged { id, messages } => {
            let mut out = match id {
                Some(id) => format!("-- conversation {id} ({} messages)", messages.len()),
                None => "-- new conversation".to_string(),
            };
            for (i, message) in messages.iter().enumerate() {
                out.push('\n');
                out.push_str(&render_message(i, message));
            }
            Some(out)
        }
        UiEvent::ConversationsUpdated {
            source: ListSource::Cache,
            conversations,
        } if !conversations.is_empty() => {
            Some("(conversation list from local cache)".to_string())
        }
        UiEvent::TurnStarted { kind } => Some(format!("... waiting for reply ({kind})")),
        UiEvent::MetaUpdated(meta) => Some(format!("    {} / {}", meta.model, meta.quality)),
        UiEvent::AttachmentChanged(Some(a)) => {
            Some(format!("Attached {} ({}); /detach to remove", a.file_name, a.mime))
        }
        UiEvent::AttachmentChanged(None) => Some("Attachment removed".to_string()),
        UiEvent::Listening(true) => Some("Listening. /stop when done.".to_string()),
        UiEvent::BackendStatus(BackendHealth::Up) => Some("Backend is up".to_string()),
        UiEvent::BackendStatus(BackendHealth::Down) => {
            Some("Backend is unreachable; showing cached data".to_string())
        }
        UiEvent::LoginRequired => Some("Sign in required: /login <passcode>".to_string()),
        UiEvent::Notice { message } => Some(message.clone()),
        UiEvent::Error { message } => Some(format!("error: {message}")),
        _ => None,
    }
}
