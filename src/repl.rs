// Line-oriented terminal front-end

use crate::commands::{self, SendError, SendOutcome};
use crate::models::{Message, Role, GREETING};
use crate::reveal::reveal;
use crate::state::AppState;
use crate::store::Notice;
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

const HELP: &str = "\
Commands:
  /new                  start a new conversation
  /list                 list saved conversations
  /open <id>            open a conversation
  /rename <id> <title>  rename a conversation
  /delete <id>          delete a conversation
  /help                 show this help
  /quit                 exit
Anything else is sent to Lumi.";

const DISCLAIMER: &str = "Lumi provides general information and support, not professional medical advice. \
Always consult healthcare providers for medical concerns.";

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    New,
    List,
    Open(&'a str),
    Rename(&'a str, &'a str),
    Delete(&'a str),
    Help,
    Quit,
    Send(&'a str),
    Invalid(&'static str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(line);
    };
    let (name, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    let rest = rest.trim();
    match name {
        "new" => Input::New,
        "list" => Input::List,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        "open" if !rest.is_empty() => Input::Open(rest),
        "delete" if !rest.is_empty() => Input::Delete(rest),
        "rename" => match rest.split_once(char::is_whitespace) {
            Some((id, title)) if !title.trim().is_empty() => Input::Rename(id, title.trim()),
            _ => Input::Invalid("usage: /rename <id> <title>"),
        },
        "open" | "delete" => Input::Invalid("a conversation id is required"),
        _ => Input::Invalid("unknown command, try /help"),
    }
}

fn notice_text(notice: Notice) -> &'static str {
    match notice {
        Notice::GuestLimitReached => "Message limit reached. Sign in to continue chatting and save your conversations.",
        Notice::ConversationDeleted => "Conversation deleted.",
        Notice::ReplyFailed => "Couldn't reach Lumi. Please try again.",
    }
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> anyhow::Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

// Plays the reveal animation by redrawing the current line
async fn write_revealed<W: AsyncWrite + Unpin>(out: &mut W, text: &str, step: Duration) -> anyhow::Result<()> {
    let mut frames = Box::pin(reveal(text, step));
    while let Some(frame) = frames.next().await {
        out.write_all(format!("\rLumi: {}", frame).as_bytes()).await?;
        out.flush().await?;
    }
    out.write_all(b"\n").await?;
    Ok(())
}

/// Reads commands from stdin until EOF or `/quit`.
pub async fn run(state: AppState, reveal_step: Duration) -> anyhow::Result<()> {
    let stdin = BufReader::new(io::stdin());
    let mut stdout = io::stdout();
    drive(state, stdin, &mut stdout, reveal_step).await
}

async fn drive<R, W>(state: AppState, input: R, out: &mut W, reveal_step: Duration) -> anyhow::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(out, DISCLAIMER).await?;
    match commands::resume_conversation(&state).await {
        Some(conv) => {
            for message in &conv.messages {
                write_line(out, &format!("{}: {}", speaker(message), message.text)).await?;
            }
        }
        // Nothing stored until the first message is sent
        None => write_line(out, &format!("Lumi: {}", GREETING)).await?,
    }

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Input::Quit => break,
            Input::Help => write_line(out, HELP).await?,
            Input::Invalid(reason) => write_line(out, reason).await?,
            Input::New => {
                let conv = commands::create_conversation(&state).await.map_err(anyhow::Error::msg)?;
                write_line(out, &format!("[{}] Lumi: {}", conv.id, conv.messages[0].text)).await?;
            }
            Input::List => {
                let summaries = commands::list_conversations(&state).await;
                if summaries.is_empty() {
                    write_line(out, "No conversations yet.").await?;
                }
                for s in summaries {
                    let when = s.updated_at.format("%b %d, %H:%M");
                    write_line(out, &format!("{}  {}  ({})  {}", s.id, s.title, when, s.preview)).await?;
                }
            }
            Input::Open(id) => {
                let conv = commands::open_conversation(&state, id).await.map_err(anyhow::Error::msg)?;
                write_line(out, &format!("== {} [{}]", conv.title, conv.id)).await?;
                for message in &conv.messages {
                    write_line(out, &format!("{}: {}", speaker(message), message.text)).await?;
                }
            }
            Input::Rename(id, title) => {
                match commands::rename_conversation(&state, id, title).await {
                    Ok(true) => write_line(out, "Renamed.").await?,
                    Ok(false) => write_line(out, "No such conversation.").await?,
                    Err(e) => write_line(out, &e).await?,
                }
            }
            Input::Delete(id) => match commands::delete_conversation(&state, id).await {
                Ok(Some(notice)) => write_line(out, notice_text(notice)).await?,
                Ok(None) => write_line(out, "No such conversation.").await?,
                Err(e) => write_line(out, &e).await?,
            },
            Input::Send(text) => match commands::send_message(&state, text).await {
                Ok(SendOutcome::SignInRequired) => {
                    write_line(out, notice_text(Notice::GuestLimitReached)).await?;
                }
                Ok(SendOutcome::Replied { reply, notices, .. }) => {
                    write_revealed(out, &reply, reveal_step).await?;
                    for notice in notices {
                        write_line(out, notice_text(notice)).await?;
                    }
                }
                Err(SendError::EmptyMessage) => {}
                Err(e) => write_line(out, &e.to_string()).await?,
            },
        }
    }

    log::info!("Input closed, exiting");
    Ok(())
}

fn speaker(message: &Message) -> &'static str {
    match message.role {
        Role::User => "You",
        Role::Assistant => "Lumi",
    }
}
