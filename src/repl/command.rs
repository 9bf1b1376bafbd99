//! Slash command parsing

use crate::model::Quality;
use std::path::PathBuf;
use thiserror::Error;

/// A conversation referenced by its position in the last listing or by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// 1-based position
    Position(usize),
    Id(String),
}

impl Target {
    fn parse(arg: &str) -> Self {
        match arg.parse::<usize>() {
            Ok(n) if n > 0 => Target::Position(n),
            _ => Target::Id(arg.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    New,
    List { filter: Option<String> },
    Open(Target),
    Delete(Target),
    /// Regenerate the reply at a 1-based message number, or the last one
    Regen { message: Option<usize> },
    Continue,
    Quality(Quality),
    /// `None` flips the current value
    Web(Option<bool>),
    Speak(Option<bool>),
    Voice,
    Stop,
    Attach(PathBuf),
    Detach,
    /// One-shot file question without attaching
    File { path: PathBuf, prompt: String },
    QuickList,
    QuickAdd(String),
    QuickRemove(usize),
    /// Send quick prompt number n (1-based)
    QuickSend(usize),
    Login(String),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command /{0}; try /help")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

/// One line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    Command(ReplCommand),
    Empty,
}

pub const HELP: &str = "\
/new                     start a new conversation
/list [filter]           list conversations, optionally filtered by title
/open <n|id>             open a conversation
/delete <n|id>           delete a conversation
/regen [n]               regenerate reply n (default: the last one)
/continue                ask the model to keep going
/quality auto|low|medium|high
/web [on|off]            use web search instead of the knowledge base
/speak [on|off]          spoken replies to voice input
/voice, /stop            start and finish voice capture
/attach <path>, /detach  keep a file attached to the next turns
/file <path> [prompt]    ask about a file once
/quick [add <text>|rm <n>]  list or edit quick prompts
/q <n>                   send quick prompt n
/login <passcode>        sign in
/status                  show toggles and backend status
/quit";

pub fn parse_line(line: &str) -> Result<Line, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Line::Empty);
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Ok(Line::Text(trimmed.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let arg_opt = (!arg.is_empty()).then(|| arg.to_string());

    let command = match name {
        "new" => ReplCommand::New,
        "list" | "ls" => ReplCommand::List { filter: arg_opt },
        "open" => ReplCommand::Open(Target::parse(required(arg, "/open <n|id>")?)),
        "delete" | "rm" => ReplCommand::Delete(Target::parse(required(arg, "/delete <n|id>")?)),
        "regen" => ReplCommand::Regen {
            message: match arg_opt {
                None => None,
                Some(n) => Some(positive(&n, "/regen [n]")?),
            },
        },
        "continue" => ReplCommand::Continue,
        "quality" => ReplCommand::Quality(
            arg.parse()
                .map_err(|_| ParseError::Usage("/quality auto|low|medium|high"))?,
        ),
        "web" => ReplCommand::Web(switch(arg, "/web [on|off]")?),
        "speak" => ReplCommand::Speak(switch(arg, "/speak [on|off]")?),
        "voice" => ReplCommand::Voice,
        "stop" => ReplCommand::Stop,
        "attach" => ReplCommand::Attach(PathBuf::from(required(arg, "/attach <path>")?)),
        "detach" => ReplCommand::Detach,
        "file" => {
            let arg = required(arg, "/file <path> [prompt]")?;
            let (path, prompt) = match arg.split_once(char::is_whitespace) {
                Some((path, prompt)) => (path, prompt.trim()),
                None => (arg, ""),
            };
            ReplCommand::File {
                path: PathBuf::from(path),
                prompt: prompt.to_string(),
            }
        }
        "quick" => match arg.split_once(char::is_whitespace) {
            _ if arg.is_empty() => ReplCommand::QuickList,
            Some(("add", text)) if !text.trim().is_empty() => {
                ReplCommand::QuickAdd(text.trim().to_string())
            }
            Some(("rm", n)) => ReplCommand::QuickRemove(positive(n.trim(), "/quick rm <n>")?),
            _ => return Err(ParseError::Usage("/quick [add <text>|rm <n>]")),
        },
        "q" => ReplCommand::QuickSend(positive(arg, "/q <n>")?),
        "login" => ReplCommand::Login(required(arg, "/login <passcode>")?.to_string()),
        "status" => ReplCommand::Status,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Line::Command(command))
}

fn required<'a>(arg: &'a str, usage: &'static str) -> Result<&'a str, ParseError> {
    if arg.is_empty() {
        Err(ParseError::Usage(usage))
    } else {
        Ok(arg)
    }
}

fn positive(arg: &str, usage: &'static str) -> Result<usize, ParseError> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn switch(arg: &str, usage: &'static str) -> Result<Option<bool>, ParseError> {
    match arg {
        "" => Ok(None),
        "on" => Ok(Some(true)),
        "off" => Ok(Some(false)),
        _ => Err(ParseError::Usage(usage)),
    }
}
