use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, MESSAGE_COMMANDS, MODEL_COMMANDS, NO_ARG_COMMANDS, PATH_COMMANDS,
};

/// Parsed chat input. Plain text becomes a `say` intent carrying the
/// interview turn; slash commands become their registered actions with
/// typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

/// Pulls `count` leading whitespace-separated tokens off `arg`, returning
/// the tokens and the untouched remainder.
fn split_leading_tokens(arg: &str, count: usize) -> Option<(Vec<String>, String)> {
    let mut rest = arg.trim_start();
    let mut tokens = Vec::with_capacity(count);
    for _ in 0..count {
        let token_len = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        if token_len == 0 {
            return None;
        }
        tokens.push(rest[..token_len].to_string());
        rest = rest[token_len..].trim_start();
    }
    Some((tokens, rest.to_string()))
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, MODEL_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("model", Value::String(arg.to_string()));
            }

            if command == "interpret" {
                let Some((tokens, message)) = split_leading_tokens(arg, 1) else {
                    return invalid(text, &command, "usage: /interpret TYPE MESSAGE");
                };
                if message.is_empty() {
                    return invalid(text, &command, "usage: /interpret TYPE MESSAGE");
                }
                return Intent::new("interpret", text)
                    .with_arg("type", Value::String(tokens[0].clone()))
                    .with_arg("message", Value::String(message));
            }

            if command == "translate" {
                let Some((tokens, message)) = split_leading_tokens(arg, 2) else {
                    return invalid(text, &command, "usage: /translate FROM TO MESSAGE");
                };
                if message.is_empty() {
                    return invalid(text, &command, "usage: /translate FROM TO MESSAGE");
                }
                return Intent::new("translate", text)
                    .with_arg("from", Value::String(tokens[0].clone()))
                    .with_arg("to", Value::String(tokens[1].clone()))
                    .with_arg("message", Value::String(message));
            }

            if command == "grant" {
                let count = arg.parse::<u64>().unwrap_or(1);
                return Intent::new("grant", text)
                    .with_arg("count", Value::Number(count.into()));
            }

            if let Some(action) = find_action(&command, MESSAGE_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("message", Value::String(arg.to_string()));
            }

            if let Some(action) = find_action(&command, PATH_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("path", Value::String(parse_single_path_arg(arg)));
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("say", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

fn invalid(raw: &str, command: &str, usage: &str) -> Intent {
    Intent::new("invalid", raw)
        .with_arg("command", Value::String(command.to_string()))
        .with_arg("usage", Value::String(usage.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_an_interview_turn() {
        let intent = parse_intent("I spend weekends alone recharging.");
        assert_eq!(intent.action, "say");
        assert_eq!(
            intent.prompt.as_deref(),
            Some("I spend weekends alone recharging.")
        );
    }

    #[test]
    fn empty_input_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_interpret_with_message() {
        let intent = parse_intent("/interpret INTJ I plan everything twice.");
        assert_eq!(intent.action, "interpret");
        assert_eq!(intent.command_args["type"], json!("INTJ"));
        assert_eq!(intent.command_args["message"], json!("I plan everything twice."));
    }

    #[test]
    fn interpret_without_message_is_invalid() {
        let intent = parse_intent("/interpret INTJ");
        assert_eq!(intent.action, "invalid");
        assert!(intent.command_args["usage"]
            .as_str()
            .unwrap_or_default()
            .contains("/interpret"));
    }

    #[test]
    fn parse_translate_with_two_codes() {
        let intent = parse_intent("/translate INTJ ENFP let us make a spreadsheet");
        assert_eq!(intent.action, "translate");
        assert_eq!(intent.command_args["from"], json!("INTJ"));
        assert_eq!(intent.command_args["to"], json!("ENFP"));
        assert_eq!(
            intent.command_args["message"],
            json!("let us make a spreadsheet")
        );
    }

    #[test]
    fn parse_guess_keeps_message_verbatim() {
        let intent = parse_intent("/guess some text, with: punctuation!");
        assert_eq!(intent.action, "guess");
        assert_eq!(
            intent.command_args["message"],
            json!("some text, with: punctuation!")
        );
    }

    #[test]
    fn parse_guess_image_with_quoted_path() {
        let intent = parse_intent("/guess_image \"/tmp/my photo.png\"");
        assert_eq!(intent.action, "guess_image");
        assert_eq!(intent.command_args["path"], json!("/tmp/my photo.png"));
    }

    #[test]
    fn parse_model_commands() {
        let text_model = parse_intent("/text_model gpt-4o");
        assert_eq!(text_model.action, "set_text_model");
        assert_eq!(text_model.command_args["model"], json!("gpt-4o"));

        let vision_model = parse_intent("/vision_model gpt-4o-mini");
        assert_eq!(vision_model.action, "set_vision_model");
        assert_eq!(vision_model.command_args["model"], json!("gpt-4o-mini"));
    }

    #[test]
    fn parse_grant_with_and_without_count() {
        assert_eq!(parse_intent("/grant 5").command_args["count"], json!(5));
        assert_eq!(parse_intent("/grant").command_args["count"], json!(1));
        assert_eq!(parse_intent("/grant lots").command_args["count"], json!(1));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/report").action, "report");
        assert_eq!(parse_intent("/type").action, "show_type");
        assert_eq!(parse_intent("/insights").action, "show_insights");
        assert_eq!(parse_intent("/stats").action, "show_stats");
        assert_eq!(parse_intent("/restart").action, "restart_interview");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
