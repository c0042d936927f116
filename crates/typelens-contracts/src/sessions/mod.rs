mod interview;
mod transcript;

pub use interview::{should_complete, InterviewPhase, InterviewSession, MAX_EXCHANGES};
pub use transcript::{ChatMessage, Role, Transcript, TranscriptTurn};
