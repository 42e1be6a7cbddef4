//! Console commands the launcher is willing to forward to the server.
//!
//! The grammar is plain data: each [`CommandRule`] names a verb and the shape
//! of the tokens that must follow it. Validation walks the rules in order and
//! accepts on the first one that matches the whole input.

/// Shape of a single token following the verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// One of a fixed set of keywords.
    OneOf(&'static [&'static str]),
    /// A required word-character token, e.g. a player name or XUID.
    Named(&'static str),
    /// A trailing word-character token that may be omitted.
    Optional(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRule {
    pub verb: &'static str,
    pub args: &'static [ArgShape],
}

use ArgShape::{Named, OneOf, Optional};

/// Commands accepted from the operator console.
pub const COMMAND_GRAMMAR: &[CommandRule] = &[
    CommandRule {
        verb: "stop",
        args: &[],
    },
    CommandRule {
        verb: "save",
        args: &[OneOf(&["hold", "resume", "query"])],
    },
    CommandRule {
        verb: "allowlist",
        args: &[OneOf(&["on", "off", "list", "reload"])],
    },
    CommandRule {
        verb: "allowlist",
        args: &[OneOf(&["add", "remove"]), Named("playerNameOrXuid")],
    },
    CommandRule {
        verb: "permission",
        args: &[OneOf(&["list", "reload"])],
    },
    CommandRule {
        verb: "op",
        args: &[Named("playerNameOrXuid")],
    },
    CommandRule {
        verb: "deop",
        args: &[Named("playerNameOrXuid")],
    },
    CommandRule {
        verb: "kick",
        args: &[Named("playerNameOrXuid"), Optional("reason")],
    },
    CommandRule {
        verb: "changesetting",
        args: &[Named("setting"), Named("value")],
    },
];

fn is_word(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_alphanumeric() || c == '_')
}

impl CommandRule {
    pub fn matches(&self, command: &str) -> bool {
        // a line break or tab would smuggle a second command into stdin
        if command.chars().any(char::is_control) {
            return false;
        }

        let mut tokens = command.split_whitespace();
        if tokens.next() != Some(self.verb) {
            return false;
        }

        for shape in self.args {
            let token = tokens.next();
            let ok = match (shape, token) {
                (OneOf(options), Some(token)) => options.contains(&token),
                (Named(_), Some(token)) | (Optional(_), Some(token)) => is_word(token),
                (Optional(_), None) => true,
                (_, None) => false,
            };
            if !ok {
                return false;
            }
        }

        tokens.next().is_none()
    }
}

/// Accepts or rejects console input against a fixed grammar.
#[derive(Debug, Clone, Copy)]
pub struct CommandValidator {
    rules: &'static [CommandRule],
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(COMMAND_GRAMMAR)
    }
}

impl CommandValidator {
    pub fn new(rules: &'static [CommandRule]) -> Self {
        Self { rules }
    }

    pub fn is_valid(&self, command: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(command))
    }
}
