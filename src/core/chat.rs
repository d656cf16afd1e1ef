use tracing::{debug, warn};

use crate::api::Part;
use crate::core::chat_stream::{StreamEvent, StreamParams};
use crate::core::constants::{REPLY_SNIPPET_MAX, TRANSPORT_APOLOGY};
use crate::core::session::SessionContext;
use crate::core::transcript::{Transcript, TurnPatch};
use crate::core::turn::{Attachment, Reaction, ReplyContext, Turn, TurnId};
use crate::utils::encode::strip_data_uri;

/// Drives one conversation: owns the transcript and the session context,
/// reconciles stream events onto the placeholder turn, and applies user
/// annotations (reactions, replies, forwards).
///
/// The controller never talks to the network itself. `send` returns the
/// [`StreamParams`] for the caller to hand to a
/// [`StreamDispatcher`](crate::core::chat_stream::StreamDispatcher), and
/// events flow back in through [`handle_stream_event`](Self::handle_stream_event).
pub struct ChatController {
    transcript: Transcript,
    session: SessionContext,
    /// Local accumulator for the in-flight reply. Chunks are concatenated
    /// here and appended to the placeholder; store state is never re-read,
    /// so rapid successive patches cannot lose updates.
    current_response: String,
    /// Id of the placeholder the active stream is filling, if any.
    streaming_turn: Option<TurnId>,
    /// Snapshot captured by [`reply`](Self::reply), consumed by the next send.
    pending_reply: Option<ReplyContext>,
}

impl ChatController {
    pub fn new(session: SessionContext) -> Self {
        Self {
            transcript: Transcript::new(),
            session,
            current_response: String::new(),
            streaming_turn: None,
            pending_reply: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_sending(&self) -> bool {
        self.session.sending
    }

    pub fn pending_reply(&self) -> Option<&ReplyContext> {
        self.pending_reply.as_ref()
    }

    /// Whether events tagged with this stream id belong to the active send.
    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.session.is_current_stream(stream_id)
    }

    /// Validate and stage a send. Returns `None` (and changes nothing) when
    /// the message is empty after trimming and carries no attachment, or
    /// when another send is still in flight. On success the transcript gains
    /// a user turn and a streaming placeholder, and the returned params
    /// describe the stream to open.
    pub fn send(&mut self, text: &str, attachment: Option<Attachment>) -> Option<StreamParams> {
        let trimmed = text.trim();
        if trimmed.is_empty() && attachment.is_none() {
            return None;
        }
        if self.session.sending {
            debug!("send ignored: a response is already streaming");
            return None;
        }

        let reply_context = self.pending_reply.take();
        let outbound_text = compose_outbound_text(trimmed, reply_context.as_ref());

        // Assemble the prompt parts before touching any state, so a
        // zero-part send can never leave a dangling user turn.
        let mut parts = Vec::new();
        if let Some(att) = &attachment {
            parts.push(Part::inline_data(
                att.mime_type.clone(),
                strip_data_uri(&att.data_uri).to_string(),
            ));
        }
        if !outbound_text.is_empty() {
            parts.push(Part::text(outbound_text));
        }
        if parts.is_empty() {
            return None;
        }

        if let Err(e) = self
            .session
            .logging
            .log_message(&format!("You: {trimmed}"))
        {
            warn!("failed to log message: {e}");
        }

        let user_id = self.transcript.allocate_id();
        self.transcript
            .push(Turn::user(user_id, trimmed, attachment, reply_context));

        let placeholder_id = self.transcript.allocate_id();
        self.transcript.push(Turn::assistant_placeholder(placeholder_id));
        self.streaming_turn = Some(placeholder_id);
        self.current_response.clear();

        let session = self.session.model_session();
        session
            .push_user(parts)
            .expect("parts checked non-empty above");
        let model = session.model().to_string();
        let system_instruction = session.system_instruction();
        let contents = session.history().to_vec();
        let temperature = session.temperature();

        let (cancel_token, stream_id) = self.session.start_new_stream();

        Some(StreamParams {
            client: self.session.client.clone(),
            base_url: self.session.base_url.clone(),
            api_key: self.session.api_key.clone(),
            model,
            system_instruction,
            contents,
            temperature,
            cancel_token,
            stream_id,
        })
    }

    /// Apply one event from the stream worker. Events from superseded
    /// streams are dropped; everything else patches the store in arrival
    /// order.
    pub fn handle_stream_event(&mut self, event: StreamEvent, stream_id: u64) {
        if !self.session.is_current_stream(stream_id) {
            debug!("dropping event from superseded stream {stream_id}");
            return;
        }

        match event {
            StreamEvent::Chunk(text) => {
                if text.is_empty() {
                    return;
                }
                // Accumulate only while a placeholder is live; text with no
                // turn to land on would otherwise leak into the next reply.
                if let Some(id) = self.streaming_turn {
                    self.current_response.push_str(&text);
                    self.transcript.patch(id, TurnPatch::append(text));
                }
            }
            StreamEvent::End => {
                if let Some(id) = self.streaming_turn.take() {
                    self.transcript.patch(id, TurnPatch::settled());
                    if !self.current_response.is_empty() {
                        let reply = std::mem::take(&mut self.current_response);
                        if let Err(e) = self.session.logging.log_message(&reply) {
                            warn!("failed to log response: {e}");
                        }
                        self.session.model_session().push_model(reply);
                    }
                }
                self.session.sending = false;
                self.session.stream_cancel_token = None;
            }
            StreamEvent::Error(detail) => {
                warn!("stream failed: {detail}");
                // Settle the placeholder with whatever partial content it
                // accumulated; the partial reply never joins the session
                // history. Without a live placeholder there is nothing to
                // apologize under, so the event changes nothing.
                if let Some(id) = self.streaming_turn.take() {
                    self.transcript.patch(id, TurnPatch::settled());
                    self.current_response.clear();
                    let apology_id = self.transcript.allocate_id();
                    self.transcript
                        .push(Turn::assistant(apology_id, TRANSPORT_APOLOGY));
                }
            }
        }
    }

    /// Toggle a reaction on a settled turn: reacting with the current kind
    /// clears it, any other kind replaces it. Unknown ids and
    /// still-streaming turns are no-ops.
    pub fn react(&mut self, id: TurnId, kind: Reaction) {
        let Some(turn) = self.transcript.get(id) else {
            return;
        };
        if turn.streaming {
            return;
        }
        let next = if turn.reaction == Some(kind) {
            None
        } else {
            Some(kind)
        };
        self.transcript.patch(id, TurnPatch::reaction(next));
    }

    /// Capture a quote snapshot of the given turn for the next send. The
    /// store is not touched; the snapshot is a value copy, so later edits to
    /// the quoted turn do not leak into it.
    pub fn reply(&mut self, id: TurnId) -> Option<ReplyContext> {
        let turn = self.transcript.get(id)?;
        let context = ReplyContext {
            turn_id: id,
            snippet: snippet_of(&turn.content),
            from_user: turn.is_user(),
        };
        self.pending_reply = Some(context.clone());
        Some(context)
    }

    pub fn cancel_reply(&mut self) {
        self.pending_reply = None;
    }

    /// Forward a turn: appends a new user turn marked `forwarded` with the
    /// same content and attachment. Unknown ids are no-ops.
    pub fn forward(&mut self, id: TurnId) -> Option<TurnId> {
        let source = self.transcript.get(id)?;
        let content = source.content.clone();
        let attachment = source.attachment.clone();
        let new_id = self.transcript.allocate_id();
        let mut turn = Turn::user(new_id, content, attachment, None);
        turn.forwarded = true;
        self.transcript.push(turn);
        Some(new_id)
    }

    /// Clear the transcript and discard the upstream conversational context
    /// as one action. An in-flight stream is cancelled; a worker that races
    /// the cancel no-ops against the cleared store. Idempotent.
    pub fn reset(&mut self) {
        self.session.cancel_current_stream();
        self.streaming_turn = None;
        self.current_response.clear();
        self.transcript.clear();
        self.session.invalidate_session();
    }
}

fn compose_outbound_text(text: &str, reply: Option<&ReplyContext>) -> String {
    match reply {
        Some(context) => {
            let author = if context.from_user { "You" } else { "Assistant" };
            if text.is_empty() {
                format!("[Replying to {author}: \"{}\"]", context.snippet)
            } else {
                format!("[Replying to {author}: \"{}\"]\n{text}", context.snippet)
            }
        }
        None => text.to_string(),
    }
}

fn snippet_of(content: &str) -> String {
    if content.chars().count() <= REPLY_SNIPPET_MAX {
        return content.to_string();
    }
    let mut snippet: String = content.chars().take(REPLY_SNIPPET_MAX).collect();
    snippet.push('…');
    snippet
}
