use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prompts;

use super::transcript::Transcript;

/// Hard cap on user-message/assistant-reply pairs per session.
pub const MAX_EXCHANGES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewPhase {
    #[default]
    NotStarted,
    AwaitingName,
    InProgress,
    Complete,
}

/// The whole of one user's in-progress adaptive interview.
///
/// This is an explicit value object: engine calls take it in and hand an
/// updated copy back, and the caller persists it between requests. Nothing
/// about the interview lives anywhere else, so a failed completion leaves
/// the caller holding the exact state it submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterviewSession {
    #[serde(default)]
    pub phase: InterviewPhase,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub question_number: u32,
    #[serde(default)]
    pub exchange_count: u32,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub excluded_topics: Vec<String>,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub transcript: Option<Transcript>,
}

impl InterviewSession {
    /// First visit: nothing known yet, the caller renders a name prompt.
    pub fn awaiting_name() -> Self {
        Self {
            phase: InterviewPhase::AwaitingName,
            ..Self::default()
        }
    }

    /// `AwaitingName -> InProgress` on a non-empty submitted name. The
    /// exclusion list is every topic this user covered in prior sessions.
    pub fn start(name: &str, excluded_topics: Vec<String>) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let instruction = prompts::interview_instruction(name, &excluded_topics);
        let mut transcript = Transcript::new(name);
        let session_id = Uuid::new_v4().to_string();
        transcript.session_id = session_id.clone();
        Some(Self {
            phase: InterviewPhase::InProgress,
            name: name.to_string(),
            session_id,
            question_number: 1,
            exchange_count: 0,
            topic: None,
            excluded_topics,
            instruction,
            transcript: Some(transcript),
        })
    }

    /// `InProgress -> Complete`: every session-scoped field is cleared; the
    /// persisted transcript and analysis are the durable record.
    pub fn completed() -> Self {
        Self {
            phase: InterviewPhase::Complete,
            ..Self::default()
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.phase == InterviewPhase::InProgress
    }
}

/// Termination guard, evaluated exactly once after each completed exchange:
/// the session ends when the assistant's reply contains the literal
/// termination phrase (case-insensitive) or the exchange cap is reached,
/// whichever comes first.
pub fn should_complete(reply: &str, session: &InterviewSession) -> bool {
    if session.exchange_count >= MAX_EXCHANGES {
        return true;
    }
    let phrase = prompts::termination_phrase(&session.name).to_lowercase();
    reply.to_lowercase().contains(&phrase)
}
