#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const MODEL_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "text_model",
        action: "set_text_model",
    },
    CommandSpec {
        command: "vision_model",
        action: "set_vision_model",
    },
];

pub(crate) const MESSAGE_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "guess",
        action: "guess",
    },
];

pub(crate) const PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "guess_image",
    action: "guess_image",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "report",
        action: "report",
    },
    CommandSpec {
        command: "type",
        action: "show_type",
    },
    CommandSpec {
        command: "insights",
        action: "show_insights",
    },
    CommandSpec {
        command: "stats",
        action: "show_stats",
    },
    CommandSpec {
        command: "restart",
        action: "restart_interview",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/interpret TYPE MESSAGE",
    "/translate FROM TO MESSAGE",
    "/guess MESSAGE",
    "/guess_image PATH",
    "/report",
    "/type",
    "/insights",
    "/grant N",
    "/stats",
    "/text_model NAME",
    "/vision_model NAME",
    "/restart",
    "/help",
    "/quit",
];
