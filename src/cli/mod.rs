use std::io::Write as _;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::core::chat::ChatController;
use crate::core::chat_stream::{StreamDispatcher, StreamEvent};
use crate::core::config::Config;
use crate::core::session::SessionContext;
use crate::core::transcript::Transcript;
use crate::core::turn::{Attachment, AttachmentKind, Reaction, Turn, TurnId};
use crate::utils::logging::LoggingState;

#[derive(Parser)]
#[command(name = "palaver")]
#[command(about = "A terminal chat client for Gemini-style streaming AI APIs")]
#[command(long_about = "Palaver connects to a Gemini-style streaming API for real-time \
conversations with image and audio attachments.\n\n\
Environment Variables:\n\
  GEMINI_API_KEY    Your API key (required)\n\n\
Commands:\n\
  /reset            Clear the conversation and start a fresh context\n\
  /search <text>    Filter the transcript (case-insensitive)\n\
  /like <n>         Toggle a like on turn n\n\
  /dislike <n>      Toggle a dislike on turn n\n\
  /reply <n>        Quote turn n in your next message\n\
  /forward <n>      Forward turn n\n\
  /attach <path>    Attach an image to your next message\n\
  /quit             Exit")]
pub struct Args {
    #[arg(short, long, help = "Model to use for chat")]
    pub model: Option<String>,

    #[arg(long, help = "API base URL")]
    pub base_url: Option<String>,

    #[arg(short, long, help = "Sampling temperature")]
    pub temperature: Option<f32>,

    #[arg(long, help = "Override the built-in system prompt")]
    pub system_prompt: Option<String>,

    #[arg(short, long, help = "Log the transcript to this file")]
    pub log: Option<String>,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().unwrap_or_else(|e| {
        error!("failed to load config, using defaults: {e}");
        Config::default()
    });

    let api_key = std::env::var("GEMINI_API_KEY")
        .map_err(|_| "GEMINI_API_KEY environment variable is not set")?;

    let log_file = args.log.or_else(|| config.log_file.clone());
    let logging = LoggingState::new(log_file);

    let session = SessionContext::new(
        reqwest::Client::new(),
        args.base_url.as_deref().unwrap_or(config.base_url()),
        api_key,
        args.model.as_deref().unwrap_or(config.model()),
        args.system_prompt.as_deref().unwrap_or(config.system_prompt()),
        args.temperature.unwrap_or(config.temperature()),
        logging,
    );

    let mut controller = ChatController::new(session);
    let (dispatcher, mut rx) = StreamDispatcher::new();

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_attachment: Option<Attachment> = None;

    println!("palaver — type a message, /quit to exit");
    prompt(&controller);

    loop {
        tokio::select! {
            line = stdin_lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_line(&mut controller, &dispatcher, &mut pending_attachment, &line).await {
                    break;
                }
                if !controller.is_sending() {
                    prompt(&controller);
                }
            }
            Some((event, stream_id)) = rx.recv() => {
                let was_sending = controller.is_sending();
                if controller.is_current_stream(stream_id) {
                    render_stream_event(&event);
                }
                controller.handle_stream_event(event, stream_id);
                if was_sending && !controller.is_sending() {
                    prompt(&controller);
                }
            }
        }
    }

    Ok(())
}

fn prompt(controller: &ChatController) {
    if let Some(reply) = controller.pending_reply() {
        print!("(replying to \"{}\") > ", reply.snippet);
    } else {
        print!("> ");
    }
    let _ = std::io::stdout().flush();
}

fn render_stream_event(event: &StreamEvent) {
    match event {
        StreamEvent::Chunk(text) => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        StreamEvent::End => println!(),
        StreamEvent::Error(detail) => println!("\n{detail}"),
    }
}

/// Returns `false` when the loop should exit.
async fn handle_line(
    controller: &mut ChatController,
    dispatcher: &StreamDispatcher,
    pending_attachment: &mut Option<Attachment>,
    line: &str,
) -> bool {
    let line = line.trim();
    match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
        ("/quit", _) | ("/exit", _) => return false,
        ("/reset", _) => {
            controller.reset();
            *pending_attachment = None;
            println!("Conversation cleared.");
        }
        ("/search", query) => {
            let hits = controller.transcript().search(query);
            if hits.is_empty() {
                println!("No matches.");
            } else {
                for turn in hits {
                    print_turn(controller.transcript(), turn);
                }
            }
        }
        ("/like", rest) => annotate(controller, rest, Reaction::Like),
        ("/dislike", rest) => annotate(controller, rest, Reaction::Dislike),
        ("/reply", rest) => match turn_id_at(controller.transcript(), rest) {
            Some(id) => {
                if let Some(context) = controller.reply(id) {
                    println!("Replying to \"{}\"", context.snippet);
                }
            }
            None => println!("No such turn."),
        },
        ("/forward", rest) => match turn_id_at(controller.transcript(), rest) {
            Some(id) => {
                if controller.forward(id).is_some() {
                    println!("Forwarded.");
                }
            }
            None => println!("No such turn."),
        },
        ("/attach", path) => match load_image_attachment(path).await {
            Ok(attachment) => {
                println!("Attached {path}; it will go out with your next message.");
                *pending_attachment = Some(attachment);
            }
            Err(e) => println!("Could not attach {path}: {e}"),
        },
        _ => {
            let attachment = pending_attachment.take();
            match controller.send(line, attachment) {
                Some(params) => dispatcher.spawn_stream(params),
                None => {
                    if controller.is_sending() {
                        println!("Still waiting on the previous response.");
                    }
                }
            }
        }
    }
    true
}

fn annotate(controller: &mut ChatController, rest: &str, kind: Reaction) {
    match turn_id_at(controller.transcript(), rest) {
        Some(id) => controller.react(id, kind),
        None => println!("No such turn."),
    }
}

/// Resolve a 1-based transcript position typed by the user to a turn id.
fn turn_id_at(transcript: &Transcript, rest: &str) -> Option<TurnId> {
    let position: usize = rest.parse().ok()?;
    transcript.iter().nth(position.checked_sub(1)?).map(|t| t.id)
}

fn print_turn(transcript: &Transcript, turn: &Turn) {
    let position = transcript
        .iter()
        .position(|t| t.id == turn.id)
        .map(|i| i + 1)
        .unwrap_or(0);
    let who = if turn.is_user() { "You" } else { "Assistant" };
    println!("[{position}] {who}: {}", turn.content);
}

async fn load_image_attachment(path: &str) -> Result<Attachment, Box<dyn std::error::Error>> {
    let mime_type = match path.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        _ => return Err("only png, jpeg, gif, and webp images can be attached".into()),
    };
    let bytes = tokio::fs::read(path).await?;
    Ok(Attachment::from_bytes(
        AttachmentKind::Image,
        path,
        &bytes,
        mime_type,
    ))
}
