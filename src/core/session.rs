use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::{Content, Part, SystemInstruction};
use crate::utils::logging::LoggingState;

/// Errors raised while preparing a prompt for the upstream API.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    /// A send must carry at least one part (text or inline data).
    EmptyPrompt,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::EmptyPrompt => write!(f, "cannot send an empty prompt"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Explicit handle for one upstream conversational context.
///
/// The remote API is stateless per request; what makes a "chat session" is
/// the accumulated `contents` history this handle carries. Each send ships
/// the whole history, so dropping the handle is what forgets the
/// conversation.
pub struct ModelSession {
    model: String,
    system_prompt: String,
    temperature: f32,
    history: Vec<Content>,
}

impl ModelSession {
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            temperature,
            history: Vec::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn system_instruction(&self) -> Option<SystemInstruction> {
        if self.system_prompt.trim().is_empty() {
            None
        } else {
            Some(SystemInstruction::new(self.system_prompt.clone()))
        }
    }

    /// Record the user's side of an exchange. Zero-part prompts are rejected
    /// before anything touches the history or the network.
    pub fn push_user(&mut self, parts: Vec<Part>) -> Result<(), SessionError> {
        if parts.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }
        self.history.push(Content::user(parts));
        Ok(())
    }

    /// Record the model's completed reply so the next send carries it.
    pub fn push_model(&mut self, text: impl Into<String>) {
        self.history.push(Content::model(text));
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }
}

/// Runtime context shared by every send: HTTP client, credentials, the
/// current model session, and in-flight stream bookkeeping.
pub struct SessionContext {
    pub client: Client,
    pub base_url: String,
    pub api_key: String,
    pub logging: LoggingState,
    model: String,
    system_prompt: String,
    temperature: f32,
    model_session: Option<ModelSession>,
    pub stream_cancel_token: Option<CancellationToken>,
    pub current_stream_id: u64,
    pub sending: bool,
}

impl SessionContext {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f32,
        logging: LoggingState,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            logging,
            model: model.into(),
            system_prompt: system_prompt.into(),
            temperature,
            model_session: None,
            stream_cancel_token: None,
            current_stream_id: 0,
            sending: false,
        }
    }

    /// The active model session, created on first use.
    pub fn model_session(&mut self) -> &mut ModelSession {
        if self.model_session.is_none() {
            self.model_session = Some(ModelSession::new(
                self.model.clone(),
                self.system_prompt.clone(),
                self.temperature,
            ));
        }
        self.model_session
            .as_mut()
            .expect("model session was just created")
    }

    /// Drop the upstream context; the next send starts a fresh conversation.
    /// Safe to call repeatedly and with no session active.
    pub fn invalidate_session(&mut self) {
        self.model_session = None;
    }

    pub fn has_session(&self) -> bool {
        self.model_session.is_some()
    }

    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.current_stream_id == stream_id
    }

    pub fn cancel_current_stream(&mut self) {
        if let Some(token) = &self.stream_cancel_token {
            token.cancel();
        }
        // Retire the id as well: a worker that loses the cancel race (its
        // request already failed, say) must not have its events accepted.
        self.current_stream_id += 1;
        self.stream_cancel_token = None;
        self.sending = false;
    }

    /// Cancel whatever is in flight and arm a fresh cancel token and stream
    /// id for the next response.
    pub fn start_new_stream(&mut self) -> (CancellationToken, u64) {
        self.cancel_current_stream();

        self.current_stream_id += 1;

        let token = CancellationToken::new();
        self.stream_cancel_token = Some(token.clone());
        self.sending = true;

        (token, self.current_stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::{DEFAULT_TEMPERATURE, SYSTEM_PROMPT};

    fn test_context() -> SessionContext {
        SessionContext::new(
            Client::new(),
            "https://api.example.test/v1beta",
            "test-key",
            "test-model",
            SYSTEM_PROMPT,
            DEFAULT_TEMPERATURE,
            LoggingState::new(None),
        )
    }

    #[test]
    fn model_session_is_created_lazily_once() {
        let mut ctx = test_context();
        assert!(!ctx.has_session());
        ctx.model_session().push_model("remembered");
        assert!(ctx.has_session());
        assert_eq!(ctx.model_session().history().len(), 1);
    }

    #[test]
    fn invalidate_drops_history_and_is_idempotent() {
        let mut ctx = test_context();
        ctx.model_session()
            .push_user(vec![Part::text("hi")])
            .unwrap();
        ctx.invalidate_session();
        ctx.invalidate_session();
        assert!(!ctx.has_session());
        assert!(ctx.model_session().history().is_empty());
    }

    #[test]
    fn empty_prompts_are_rejected() {
        let mut session = ModelSession::new("m", "sys", 0.7);
        assert_eq!(session.push_user(Vec::new()), Err(SessionError::EmptyPrompt));
        assert!(session.history().is_empty());
    }

    #[test]
    fn blank_system_prompt_sends_no_instruction() {
        let session = ModelSession::new("m", "   ", 0.7);
        assert!(session.system_instruction().is_none());
    }

    #[test]
    fn start_new_stream_bumps_id_and_cancels_predecessor() {
        let mut ctx = test_context();
        let (first_token, first_id) = ctx.start_new_stream();
        assert!(ctx.sending);
        let (_second_token, second_id) = ctx.start_new_stream();
        assert!(first_token.is_cancelled());
        assert!(second_id > first_id);
        assert!(ctx.is_current_stream(second_id));
        assert!(!ctx.is_current_stream(first_id));
    }

    #[test]
    fn cancel_clears_sending_flag() {
        let mut ctx = test_context();
        ctx.start_new_stream();
        ctx.cancel_current_stream();
        assert!(!ctx.sending);
        assert!(ctx.stream_cancel_token.is_none());
    }
}
