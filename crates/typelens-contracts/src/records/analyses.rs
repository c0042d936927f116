use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One completed interview's verdict. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub user: String,
    pub session_id: String,
    pub mbti_type: String,
    pub confidence: f64,
    pub explanation: String,
    pub ts: String,
}

impl AnalysisRecord {
    pub fn new(
        user: impl Into<String>,
        session_id: impl Into<String>,
        mbti_type: impl Into<String>,
        confidence: f64,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            session_id: session_id.into(),
            mbti_type: mbti_type.into(),
            confidence,
            explanation: explanation.into(),
            ts: now_utc_iso(),
        }
    }
}

/// Append-only `analyses.jsonl`.
#[derive(Debug, Clone)]
pub struct AnalysisStore {
    path: PathBuf,
}

impl AnalysisStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AnalysisRecord) -> anyhow::Result<()> {
        append_jsonl(&self.path, record)
    }

    /// All of one user's records in write order. Unreadable lines are
    /// skipped, a missing file is an empty history.
    pub fn for_user(&self, user: &str) -> Vec<AnalysisRecord> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        raw.lines()
            .filter_map(|line| serde_json::from_str::<AnalysisRecord>(line).ok())
            .filter(|record| record.user == user)
            .collect()
    }
}

/// The user's historical profile: their most frequent type, how often it
/// recurs, and every explanation recorded for it.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateProfile {
    pub mbti_type: String,
    pub confidence: f64,
    pub explanation: String,
    pub matching: usize,
    pub total: usize,
}

/// Most frequent type across the record set, confidence =
/// matching/total x 100 rounded to two decimals, explanations for that
/// type concatenated in record order. Ties break to the first maximum
/// found.
pub fn aggregate_profile(records: &[AnalysisRecord]) -> Option<AggregateProfile> {
    if records.is_empty() {
        return None;
    }

    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for record in records {
        *counts.entry(record.mbti_type.as_str()).or_insert(0) += 1;
    }
    let mut winner: Option<(&str, usize)> = None;
    for (code, count) in &counts {
        let beats_current = winner.map(|(_, best)| *count > best).unwrap_or(true);
        if beats_current {
            winner = Some((*code, *count));
        }
    }
    let (winner, matching) = winner.map(|(code, count)| (code.to_string(), count))?;

    let total = records.len();
    let confidence = ((matching as f64 / total as f64) * 100.0 * 100.0).round() / 100.0;
    let explanation = records
        .iter()
        .filter(|record| record.mbti_type == winner)
        .map(|record| record.explanation.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<&str>>()
        .join("\n\n");

    Some(AggregateProfile {
        mbti_type: winner,
        confidence,
        explanation,
        matching,
        total,
    })
}

fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    use std::io::Write;
    file.write_all(serde_json::to_string(record)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
