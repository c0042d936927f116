use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One `{role, content}` entry in a completion request message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One conversation turn. `question_number` is set on assistant turns only
/// and increments exactly once per assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
}

/// Ordered record of one interview conversation. Created empty when a named
/// session starts, appended to on each exchange, persisted as
/// `transcripts/<session_id>.json` at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub session_id: String,
    pub subject: String,
    pub created_at: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub turns: Vec<TranscriptTurn>,
}

fn default_schema_version() -> u64 {
    1
}

impl Transcript {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            schema_version: 1,
            session_id: Uuid::new_v4().to_string(),
            subject: subject.into(),
            created_at: now_utc_iso(),
            topic: None,
            turns: Vec::new(),
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(TranscriptTurn {
            role: Role::User,
            text: text.into(),
            question_number: None,
        });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>, question_number: u32) {
        self.turns.push(TranscriptTurn {
            role: Role::Assistant,
            text: text.into(),
            question_number: Some(question_number),
        });
    }

    /// The transcript as a completion message list, without any system
    /// instruction.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role,
                content: turn.text.clone(),
            })
            .collect()
    }

    /// Plain-text rendering used inside analysis and summary prompts.
    pub fn rendered(&self) -> String {
        let mut lines = Vec::with_capacity(self.turns.len());
        for turn in &self.turns {
            match turn.role {
                Role::Assistant => {
                    let label = turn
                        .question_number
                        .map(|number| format!("Interviewer (Q{number})"))
                        .unwrap_or_else(|| "Interviewer".to_string());
                    lines.push(format!("{label}: {}", turn.text));
                }
                Role::User => lines.push(format!("{}: {}", self.subject, turn.text)),
                Role::System => {}
            }
        }
        lines.join("\n")
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Lenient load: anything unreadable or unparsable is simply absent.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_round_trip_through_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("transcripts").join("t.json");

        let mut transcript = Transcript::new("Alex");
        transcript.push_assistant("The topic I would like to explore with you today is: Rest.", 1);
        transcript.push_user("I nap aggressively.");
        transcript.topic = Some("Rest".to_string());
        transcript.save(&path)?;

        let loaded = Transcript::load(&path).expect("transcript should load");
        assert_eq!(loaded, transcript);
        assert_eq!(loaded.turns[0].question_number, Some(1));
        assert_eq!(loaded.turns[1].question_number, None);
        Ok(())
    }

    #[test]
    fn load_missing_file_is_none() {
        assert!(Transcript::load(Path::new("/nonexistent/t.json")).is_none());
    }

    #[test]
    fn rendered_labels_speakers_and_questions() {
        let mut transcript = Transcript::new("Alex");
        transcript.push_assistant("First question?", 1);
        transcript.push_user("An answer.");
        let text = transcript.rendered();
        assert!(text.contains("Interviewer (Q1): First question?"));
        assert!(text.contains("Alex: An answer."));
    }

    #[test]
    fn messages_preserve_roles_in_order() {
        let mut transcript = Transcript::new("Alex");
        transcript.push_assistant("Q?", 1);
        transcript.push_user("A.");
        let messages = transcript.messages();
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[1].role, Role::User);
    }
}
