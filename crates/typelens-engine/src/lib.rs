use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use typelens_contracts::errors::{CompletionError, EngineError, EngineResult};
use typelens_contracts::events::{EventPayload, EventWriter};
use typelens_contracts::mbti;
use typelens_contracts::models::{ModelSelector, ModelSpec};
use typelens_contracts::parse::{self, GuessOutcome};
use typelens_contracts::prompts;
use typelens_contracts::records::{
    aggregate_profile, AggregateProfile, AnalysisRecord, AnalysisStore, CompletionCache,
    CounterStore, Counters, Profile, ProfileStore, TopicStore,
};
use typelens_contracts::sessions::{
    should_complete, ChatMessage, InterviewPhase, InterviewSession, Transcript,
};

/// Defaults the product has always used for one-shot completions.
const DEFAULT_MAX_TOKENS: u64 = 300;
const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Analyses and combined reports need room for a full paragraph.
const ANALYSIS_MAX_TOKENS: u64 = 600;
/// Estimated-token ceiling for the compiled history in a combined report.
const REPORT_TOKEN_BUDGET: u64 = 4000;

pub const NAME_PROMPT: &str =
    "Welcome to the adaptive interview. What name should I call you by?";

/// One request against a chat-completion endpoint: a model identifier, an
/// ordered message list, an output token cap, a sample count, and a
/// temperature. Message entries are `{role, content}` objects; content is a
/// string, or a parts array for vision requests.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub max_tokens: u64,
    pub n: u64,
    pub temperature: f64,
}

impl CompletionRequest {
    pub fn from_chat(model: impl Into<String>, messages: &[ChatMessage]) -> Self {
        Self {
            model: model.into(),
            messages: messages
                .iter()
                .map(|message| serde_json::to_value(message).unwrap_or(Value::Null))
                .collect(),
            max_tokens: DEFAULT_MAX_TOKENS,
            n: 1,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Every message content flattened into one haystack. The dryrun
    /// provider keys its canned replies off this.
    fn combined_text(&self) -> String {
        let mut parts = Vec::new();
        for message in &self.messages {
            match message.get("content") {
                Some(Value::String(text)) => parts.push(text.clone()),
                Some(Value::Array(chunks)) => {
                    for chunk in chunks {
                        if let Some(text) = chunk.get("text").and_then(Value::as_str) {
                            parts.push(text.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        parts.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct CompletionReply {
    pub text: String,
    pub model: String,
}

/// A single blocking call to a hosted completion service. One attempt per
/// request; every failure is terminal for that request.
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionReply, CompletionError>;
}

#[derive(Default)]
pub struct CompletionProviderRegistry {
    providers: BTreeMap<String, Box<dyn CompletionProvider>>,
}

impl CompletionProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: CompletionProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn CompletionProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry() -> CompletionProviderRegistry {
    let mut registry = CompletionProviderRegistry::new();
    registry.register(DryrunProvider);
    registry.register(OpenAiProvider::new());
    registry
}

/// Offline provider: deterministic canned replies shaped to satisfy the
/// response parser, keyed off the instruction text. Lets tests and keyless
/// demos exercise every feature without a network.
struct DryrunProvider;

impl CompletionProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionReply, CompletionError> {
        let haystack = request.combined_text();
        let text = if haystack.contains("MBTI Type: XXXX") {
            "MBTI Type: INTJ\nConfidence: 74%\nExplanation: Deliberate phrasing, \
             future-oriented answers, and a preference for structure ran through the session."
                .to_string()
        } else if haystack.contains("List your top guesses") {
            "1. INTJ - 62%\nReasoning: Tight structure and long-range framing.\n\
             2. INTP - 23%\nReasoning: Abstract qualifiers over concrete detail.\n\
             3. ENTJ - 15%\nReasoning: Occasional directive turns of phrase."
                .to_string()
        } else if haystack.contains("adaptive personality interview") {
            "The topic I would like to explore with you today is: Weekend routines. \
             When a free Saturday opens up in front of you, what do you find yourself doing first?"
                .to_string()
        } else if haystack.contains("Condense the following interview transcript") {
            "The subject described a quiet, internally planned life with bursts of decisive action."
                .to_string()
        } else if haystack.contains("combined personality report") {
            "Across every session the same picture holds: a reflective planner who measures \
             twice and commits completely once convinced."
                .to_string()
        } else {
            "The message leans hard on planning language and measured qualifiers, which is \
             exactly how this type writes when it is comfortable."
                .to_string()
        };

        Ok(CompletionReply {
            text,
            model: request.model.clone(),
        })
    }
}

/// OpenAI-compatible chat completions over blocking HTTP. Bearer auth from
/// the environment, JSON in and out, no retry or backoff.
struct OpenAiProvider {
    api_base: String,
    http: HttpClient,
}

impl OpenAiProvider {
    fn new() -> Self {
        Self {
            api_base: env::var("OPENAI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("OPENAI_API_KEY")
    }
}

impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionReply, CompletionError> {
        let Some(api_key) = Self::api_key() else {
            return Err(CompletionError::MissingApiKey("openai"));
        };
        let endpoint = format!("{}/chat/completions", self.api_base);
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "n": request.n.max(1),
            "temperature": request.temperature,
        });

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .map_err(|err| CompletionError::Network(err.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CompletionError::RateLimited);
        }
        let body = response
            .text()
            .map_err(|err| CompletionError::Network(err.to_string()))?;
        if !status.is_success() {
            return Err(CompletionError::Http {
                status: status.as_u16(),
                detail: truncate_text(&body, 256),
            });
        }

        let parsed: Value =
            serde_json::from_str(&body).map_err(|_| CompletionError::MalformedResponse)?;
        let text = parsed
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or(CompletionError::MalformedResponse)?
            .to_string();

        Ok(CompletionReply {
            text,
            model: request.model.clone(),
        })
    }
}

/// Rendered outcome of a one-shot feature. `degraded` marks the fixed
/// apology substituted after a completion failure; `cached` marks a replay
/// that charged nothing.
#[derive(Debug, Clone)]
pub struct FeatureReply {
    pub text: String,
    pub model: String,
    pub degraded: bool,
    pub cached: bool,
}

/// A guess feature reply plus its parse: ranked records when the model kept
/// the contract, the raw text otherwise.
#[derive(Debug, Clone)]
pub struct GuessReply {
    pub outcome: GuessOutcome,
    pub reply: FeatureReply,
}

/// Result of submitting one chat input to the interview. The caller
/// persists `session` and, when `analysis` is set, the interview is over
/// and every durable record has already been written.
#[derive(Debug, Clone)]
pub struct InterviewTurnOutcome {
    pub session: InterviewSession,
    pub reply: String,
    pub analysis: Option<AnalysisRecord>,
}

/// Combined report over a user's interview history.
#[derive(Debug, Clone)]
pub struct ReportReply {
    pub aggregate: AggregateProfile,
    pub text: String,
    pub degraded: bool,
}

/// The orchestration core: owns the data directory, the analytics stream,
/// every record store, and the provider registry, and drives each feature
/// end to end.
pub struct InsightEngine {
    data_dir: PathBuf,
    user: String,
    events: EventWriter,
    analyses: AnalysisStore,
    topics: TopicStore,
    profiles: ProfileStore,
    counters: CounterStore,
    cache: CompletionCache,
    model_selector: ModelSelector,
    text_model: Option<String>,
    vision_model: Option<String>,
    providers: CompletionProviderRegistry,
}

impl InsightEngine {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        user: impl Into<String>,
        text_model: Option<String>,
        vision_model: Option<String>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let user = user.into();
        let events = EventWriter::new(data_dir.join("events.jsonl"), user.clone());

        let engine = Self {
            analyses: AnalysisStore::new(data_dir.join("analyses.jsonl")),
            topics: TopicStore::new(data_dir.join("topics.jsonl")),
            profiles: ProfileStore::new(data_dir.join("profiles")),
            counters: CounterStore::new(data_dir.join("counters.json")),
            cache: CompletionCache::new(data_dir.join("cache.json")),
            model_selector: ModelSelector::new(None),
            text_model,
            vision_model,
            providers: default_provider_registry(),
            events,
            user,
            data_dir,
        };
        engine.record_visit()?;
        Ok(engine)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn text_model(&self) -> Option<&str> {
        self.text_model.as_deref()
    }

    pub fn set_text_model(&mut self, model: Option<String>) {
        self.text_model = model;
    }

    pub fn vision_model(&self) -> Option<&str> {
        self.vision_model.as_deref()
    }

    pub fn set_vision_model(&mut self, model: Option<String>) {
        self.vision_model = model;
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    /// Replaces or adds a provider; tests use this to script replies.
    pub fn register_provider<P: CompletionProvider + 'static>(&mut self, provider: P) {
        self.providers.register(provider);
    }

    pub fn emit_event(&self, event_type: &str, payload: EventPayload) -> Result<Value> {
        self.events.emit(event_type, payload)
    }

    pub fn profile(&self) -> Profile {
        self.profiles.load(&self.user)
    }

    pub fn latest_type(&self) -> Option<String> {
        self.profile().latest_type
    }

    pub fn stats(&self) -> Counters {
        self.counters.load()
    }

    pub fn grant_insights(&mut self, count: u64) -> Result<Profile> {
        let mut profile = self.profiles.load(&self.user);
        profile.insights += count;
        self.profiles.save(&profile)?;
        self.events.emit(
            "insights_granted",
            map_object(json!({ "count": count, "balance": profile.insights })),
        )?;
        Ok(profile)
    }

    fn record_visit(&self) -> Result<()> {
        let counters = self.counters.record_visit(&self.user)?;
        self.events.emit(
            "visit",
            map_object(json!({
                "total_visits": counters.total_visits,
                "unique_visitors": counters.unique_visitors,
            })),
        )?;
        Ok(())
    }

    fn record_click(&self, feature: &str) -> Result<()> {
        let count = self.counters.record_click(feature)?;
        self.events.emit(
            "feature_click",
            map_object(json!({ "feature": feature, "count": count })),
        )?;
        Ok(())
    }

    fn select_model(&self, capability: &str) -> EngineResult<ModelSpec> {
        let requested = match capability {
            "vision" => self.vision_model.as_deref(),
            _ => self.text_model.as_deref(),
        };
        let selection = self
            .model_selector
            .select(requested, capability)
            .map_err(|message| EngineError::Other(anyhow!(message)))?;
        if let Some(reason) = &selection.fallback_reason {
            let _ = self.events.emit(
                "model_fallback",
                map_object(json!({
                    "capability": capability,
                    "requested": selection.requested.clone(),
                    "selected": selection.model.name.clone(),
                    "reason": reason.clone(),
                })),
            );
        }
        Ok(selection.model)
    }

    fn run_completion(
        &self,
        feature: &str,
        model: &ModelSpec,
        request: &CompletionRequest,
    ) -> Result<CompletionReply, CompletionError> {
        let provider = self
            .providers
            .get(&model.provider)
            .ok_or_else(|| CompletionError::UnknownProvider(model.provider.clone()))?;
        match provider.complete(request) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                let _ = self.events.emit(
                    "completion_failed",
                    map_object(json!({
                        "feature": feature,
                        "model": model.name.clone(),
                        "error": err.to_string(),
                    })),
                );
                Err(err)
            }
        }
    }

    /// Shared path for interpret/translate/guess: click, cache lookup,
    /// quota check, single completion, charge-and-cache on success, fixed
    /// apology on completion failure.
    fn one_shot(
        &mut self,
        feature: &'static str,
        capability: &str,
        messages: Vec<ChatMessage>,
        cache_inputs: Value,
        max_tokens: u64,
    ) -> EngineResult<FeatureReply> {
        self.record_click(feature)?;
        let model = self.select_model(capability)?;
        let cache_key = stable_hash(&json!({
            "feature": feature,
            "model": model.name,
            "inputs": cache_inputs,
        }));

        if let Some(text) = self.cache.get(&cache_key) {
            self.events.emit(
                "cache_hit",
                map_object(json!({ "feature": feature, "model": model.name.clone() })),
            )?;
            return Ok(FeatureReply {
                text,
                model: model.name,
                degraded: false,
                cached: true,
            });
        }

        let mut profile = self.profiles.load(&self.user);
        if !profile.can_spend() {
            self.events.emit(
                "quota_exhausted",
                map_object(json!({ "feature": feature })),
            )?;
            return Err(EngineError::QuotaExhausted);
        }

        let request = CompletionRequest::from_chat(&model.name, &messages).with_max_tokens(max_tokens);
        match self.run_completion(feature, &model, &request) {
            Ok(reply) => {
                profile.spend();
                self.profiles.save(&profile)?;
                self.cache.set(&cache_key, &reply.text)?;
                self.events.emit(
                    "feature_served",
                    map_object(json!({
                        "feature": feature,
                        "model": model.name.clone(),
                        "insights_left": profile.insights,
                    })),
                )?;
                Ok(FeatureReply {
                    text: reply.text,
                    model: model.name,
                    degraded: false,
                    cached: false,
                })
            }
            Err(_) => Ok(FeatureReply {
                text: prompts::APOLOGY.to_string(),
                model: model.name,
                degraded: true,
                cached: false,
            }),
        }
    }

    pub fn interpret(&mut self, type_code: &str, message: &str) -> EngineResult<FeatureReply> {
        let code = mbti::normalize_code(type_code)
            .ok_or_else(|| EngineError::UnknownType(type_code.to_string()))?;
        let messages = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompts::interpret(&code, message)),
        ];
        self.one_shot(
            "interpret",
            "text",
            messages,
            json!({ "type": code, "message": message }),
            DEFAULT_MAX_TOKENS,
        )
    }

    pub fn translate(
        &mut self,
        source: &str,
        target: &str,
        message: &str,
    ) -> EngineResult<FeatureReply> {
        let source = mbti::normalize_code(source)
            .ok_or_else(|| EngineError::UnknownType(source.to_string()))?;
        let target = mbti::normalize_code(target)
            .ok_or_else(|| EngineError::UnknownType(target.to_string()))?;
        let messages = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompts::translate(&source, &target, message)),
        ];
        self.one_shot(
            "translate",
            "text",
            messages,
            json!({ "from": source, "to": target, "message": message }),
            DEFAULT_MAX_TOKENS,
        )
    }

    pub fn guess_text(&mut self, message: &str) -> EngineResult<GuessReply> {
        let messages = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(prompts::guess(message)),
        ];
        let reply = self.one_shot(
            "guess",
            "text",
            messages,
            json!({ "message": message }),
            DEFAULT_MAX_TOKENS,
        )?;
        Ok(guess_reply_from(reply))
    }

    pub fn guess_image(&mut self, path: &Path) -> EngineResult<GuessReply> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed reading {}", path.display()))
            .map_err(EngineError::Other)?;
        let data_url = prepare_guess_image_data_url(&bytes).map_err(EngineError::Other)?;

        self.record_click("guess_image")?;
        let model = self.select_model("vision")?;
        let cache_key = stable_hash(&json!({
            "feature": "guess_image",
            "model": model.name,
            "inputs": { "image_sha256": sha256_hex(&bytes) },
        }));
        if let Some(text) = self.cache.get(&cache_key) {
            self.events.emit(
                "cache_hit",
                map_object(json!({ "feature": "guess_image", "model": model.name.clone() })),
            )?;
            return Ok(guess_reply_from(FeatureReply {
                text,
                model: model.name,
                degraded: false,
                cached: true,
            }));
        }

        let mut profile = self.profiles.load(&self.user);
        if !profile.can_spend() {
            self.events.emit(
                "quota_exhausted",
                map_object(json!({ "feature": "guess_image" })),
            )?;
            return Err(EngineError::QuotaExhausted);
        }

        let request = CompletionRequest {
            model: model.name.clone(),
            messages: vec![
                json!({ "role": "system", "content": prompts::SYSTEM_PROMPT }),
                json!({
                    "role": "user",
                    "content": [
                        { "type": "text", "text": prompts::guess_image_instruction() },
                        { "type": "image_url", "image_url": { "url": data_url } },
                    ],
                }),
            ],
            max_tokens: DEFAULT_MAX_TOKENS,
            n: 1,
            temperature: DEFAULT_TEMPERATURE,
        };
        let reply = match self.run_completion("guess_image", &model, &request) {
            Ok(reply) => {
                profile.spend();
                self.profiles.save(&profile).map_err(EngineError::Other)?;
                self.cache.set(&cache_key, &reply.text).map_err(EngineError::Other)?;
                self.events.emit(
                    "feature_served",
                    map_object(json!({
                        "feature": "guess_image",
                        "model": model.name.clone(),
                        "insights_left": profile.insights,
                    })),
                )?;
                FeatureReply {
                    text: reply.text,
                    model: model.name,
                    degraded: false,
                    cached: false,
                }
            }
            Err(_) => FeatureReply {
                text: prompts::APOLOGY.to_string(),
                model: model.name,
                degraded: true,
                cached: false,
            },
        };
        Ok(guess_reply_from(reply))
    }

    /// Advances the adaptive interview by one input. No state the caller
    /// holds is mutated on failure: the returned session is a fresh value,
    /// and an `Err` means the caller should keep what it already had and
    /// let the user resubmit the same turn.
    pub fn interview_turn(
        &mut self,
        session: &InterviewSession,
        input: &str,
    ) -> EngineResult<InterviewTurnOutcome> {
        match session.phase {
            InterviewPhase::NotStarted | InterviewPhase::Complete => Ok(InterviewTurnOutcome {
                session: InterviewSession::awaiting_name(),
                reply: NAME_PROMPT.to_string(),
                analysis: None,
            }),
            InterviewPhase::AwaitingName => self.interview_start(input),
            InterviewPhase::InProgress => self.interview_exchange(session, input),
        }
    }

    fn interview_start(&mut self, name: &str) -> EngineResult<InterviewTurnOutcome> {
        let profile = self.profiles.load(&self.user);
        if !profile.can_spend() {
            self.events.emit(
                "quota_exhausted",
                map_object(json!({ "feature": "interview" })),
            )?;
            return Err(EngineError::QuotaExhausted);
        }

        let excluded = self.topics.topics_for_user(&self.user);
        let Some(mut session) = InterviewSession::start(name, excluded) else {
            return Ok(InterviewTurnOutcome {
                session: InterviewSession::awaiting_name(),
                reply: NAME_PROMPT.to_string(),
                analysis: None,
            });
        };

        self.record_click("interview")?;
        let model = self.select_model("text")?;
        let messages = vec![ChatMessage::system(session.instruction.clone())];
        let request = CompletionRequest::from_chat(&model.name, &messages);
        let reply = self.run_completion("interview", &model, &request)?;

        let transcript = session
            .transcript
            .as_mut()
            .expect("started session carries a transcript");
        transcript.push_assistant(reply.text.clone(), session.question_number);
        capture_topic(&mut session, &reply.text);
        session.question_number += 1;

        let mut profile = profile;
        profile.spend();
        self.profiles.save(&profile)?;
        self.events.emit(
            "interview_started",
            map_object(json!({
                "session_id": session.session_id.clone(),
                "subject": session.name.clone(),
                "excluded_topics": session.excluded_topics.len(),
            })),
        )?;

        Ok(InterviewTurnOutcome {
            session,
            reply: reply.text,
            analysis: None,
        })
    }

    fn interview_exchange(
        &mut self,
        session: &InterviewSession,
        input: &str,
    ) -> EngineResult<InterviewTurnOutcome> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(InterviewTurnOutcome {
                session: session.clone(),
                reply: "Take your time. Answer whenever you are ready.".to_string(),
                analysis: None,
            });
        }

        // Work on a copy; the caller's value stays untouched until the
        // completion has succeeded.
        let mut updated = session.clone();
        let Some(transcript) = updated.transcript.as_mut() else {
            return Err(EngineError::SessionStateMissing);
        };

        let model = self.select_model("text")?;
        let mut messages = vec![ChatMessage::system(updated.instruction.clone())];
        messages.extend(transcript.messages());
        messages.push(ChatMessage::user(input));
        let request = CompletionRequest::from_chat(&model.name, &messages);
        let reply = self.run_completion("interview", &model, &request)?;

        transcript.push_user(input);
        updated.exchange_count += 1;
        transcript.push_assistant(reply.text.clone(), updated.question_number);
        capture_topic(&mut updated, &reply.text);
        updated.question_number += 1;

        if should_complete(&reply.text, &updated) {
            let analysis = self.finalize_interview(&mut updated)?;
            return Ok(InterviewTurnOutcome {
                session: InterviewSession::completed(),
                reply: reply.text,
                analysis: Some(analysis),
            });
        }

        self.events.emit(
            "interview_turn",
            map_object(json!({
                "session_id": updated.session_id.clone(),
                "exchange_count": updated.exchange_count,
                "question_number": updated.question_number,
            })),
        )?;
        Ok(InterviewTurnOutcome {
            session: updated,
            reply: reply.text,
            analysis: None,
        })
    }

    /// Second completion over the finished transcript, then every durable
    /// write: transcript file, topic record, analysis record, latest type.
    fn finalize_interview(&mut self, session: &mut InterviewSession) -> EngineResult<AnalysisRecord> {
        let transcript = session
            .transcript
            .as_mut()
            .ok_or(EngineError::SessionStateMissing)?;

        let model = self.select_model("text")?;
        let analysis_input = format!(
            "{}\n\n{}",
            prompts::analysis_instruction(&session.name),
            transcript.rendered()
        );
        let messages = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(analysis_input),
        ];
        let request = CompletionRequest::from_chat(&model.name, &messages)
            .with_max_tokens(ANALYSIS_MAX_TOKENS);
        let reply = self.run_completion("interview_analysis", &model, &request)?;

        let fields = parse::parse_analysis(&reply.text);
        let record = AnalysisRecord::new(
            &self.user,
            &session.session_id,
            &fields.mbti_type,
            fields.confidence,
            &fields.explanation,
        );

        transcript.topic = session.topic.clone();
        let transcript_path = self
            .data_dir
            .join("transcripts")
            .join(format!("{}.json", session.session_id));
        transcript.save(&transcript_path)?;

        if let Some(topic) = &session.topic {
            self.topics.append(&self.user, &session.session_id, topic)?;
        }
        self.analyses.append(&record)?;

        let mut profile = self.profiles.load(&self.user);
        profile.latest_type = Some(record.mbti_type.clone());
        self.profiles.save(&profile)?;

        self.events.emit(
            "interview_completed",
            map_object(json!({
                "session_id": session.session_id.clone(),
                "mbti_type": record.mbti_type.clone(),
                "confidence": record.confidence,
                "exchanges": session.exchange_count,
            })),
        )?;
        Ok(record)
    }

    /// Combined report over every completed interview. `Ok(None)` when the
    /// user has no history yet.
    pub fn combined_report(&mut self) -> EngineResult<Option<ReportReply>> {
        let records = self.analyses.for_user(&self.user);
        let Some(aggregate) = aggregate_profile(&records) else {
            return Ok(None);
        };
        self.record_click("report")?;

        let model = self.select_model("text")?;
        let compiled = self.compile_history(&records, &model)?;

        let mut profile = self.profiles.load(&self.user);
        if !profile.can_spend() {
            self.events.emit(
                "quota_exhausted",
                map_object(json!({ "feature": "report" })),
            )?;
            return Err(EngineError::QuotaExhausted);
        }

        let subject = records
            .last()
            .and_then(|record| {
                let path = self
                    .data_dir
                    .join("transcripts")
                    .join(format!("{}.json", record.session_id));
                Transcript::load(&path).map(|transcript| transcript.subject)
            })
            .unwrap_or_else(|| self.user.clone());
        let report_input = format!(
            "{}\n\n{}",
            prompts::combined_report(&subject, &aggregate.mbti_type, aggregate.confidence),
            compiled
        );
        let messages = vec![
            ChatMessage::system(prompts::SYSTEM_PROMPT),
            ChatMessage::user(report_input),
        ];
        let request = CompletionRequest::from_chat(&model.name, &messages)
            .with_max_tokens(ANALYSIS_MAX_TOKENS);

        match self.run_completion("report", &model, &request) {
            Ok(reply) => {
                profile.spend();
                self.profiles.save(&profile)?;
                self.events.emit(
                    "feature_served",
                    map_object(json!({
                        "feature": "report",
                        "model": model.name.clone(),
                        "insights_left": profile.insights,
                    })),
                )?;
                Ok(Some(ReportReply {
                    aggregate,
                    text: reply.text,
                    degraded: false,
                }))
            }
            Err(_) => Ok(Some(ReportReply {
                aggregate,
                text: prompts::APOLOGY.to_string(),
                degraded: true,
            })),
        }
    }

    /// Renders session transcripts newest-first under the report token
    /// budget. Once the budget would overflow, older transcripts are
    /// condensed through the summarizer; sections that still do not fit are
    /// dropped.
    fn compile_history(
        &self,
        records: &[AnalysisRecord],
        model: &ModelSpec,
    ) -> EngineResult<String> {
        let mut sections: Vec<String> = Vec::new();
        let mut used_tokens: u64 = 0;

        for record in records.iter().rev() {
            let path = self
                .data_dir
                .join("transcripts")
                .join(format!("{}.json", record.session_id));
            let Some(transcript) = Transcript::load(&path) else {
                continue;
            };
            let rendered = format!(
                "Session {} (concluded {}):\n{}",
                record.session_id,
                record.mbti_type,
                transcript.rendered()
            );
            let cost = estimate_tokens(&rendered);
            if used_tokens + cost <= REPORT_TOKEN_BUDGET {
                used_tokens += cost;
                sections.push(rendered);
                continue;
            }

            let summary_input = format!(
                "{}\n\n{}",
                prompts::summarize_transcript(&transcript.subject),
                transcript.rendered()
            );
            let messages = vec![
                ChatMessage::system(prompts::SYSTEM_PROMPT),
                ChatMessage::user(summary_input),
            ];
            let request = CompletionRequest::from_chat(&model.name, &messages);
            let Ok(reply) = self.run_completion("report_summary", model, &request) else {
                continue;
            };
            let condensed = format!(
                "Session {} (summarized, concluded {}): {}",
                record.session_id, record.mbti_type, reply.text
            );
            let condensed_cost = estimate_tokens(&condensed);
            if used_tokens + condensed_cost > REPORT_TOKEN_BUDGET {
                continue;
            }
            used_tokens += condensed_cost;
            sections.push(condensed);
        }

        Ok(sections.join("\n\n"))
    }
}

fn guess_reply_from(reply: FeatureReply) -> GuessReply {
    let outcome = if reply.degraded {
        GuessOutcome::Unparsed(reply.text.clone())
    } else {
        parse::parse_ranked_guesses(&reply.text)
    };
    GuessReply { outcome, reply }
}

fn capture_topic(session: &mut InterviewSession, reply: &str) {
    if session.topic.is_some() {
        return;
    }
    let topic = parse::extract_topic(reply);
    if topic != parse::UNKNOWN_TOPIC {
        session.topic = Some(topic);
    }
}

/// Flattens and downscales an uploaded image, then re-encodes it as a JPEG
/// data URL small enough for a vision request.
fn prepare_guess_image_data_url(bytes: &[u8]) -> Result<String> {
    let image = image::load_from_memory(bytes).context("unreadable image upload")?;
    let resized = image.resize(768, 768, FilterType::Triangle).to_rgb8();
    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, 90);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(resized))
        .context("image re-encode failed")?;
    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(encoded)))
}

fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn stable_hash(payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
