//! Maps SuperTuxKart server log lines to lifecycle events.
//!
//! Only a handful of lines matter; everything else is passed through.

use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Ready,
    /// `name` is `None` when the line matched but the captured name was blank.
    PlayerJoined { name: Option<String> },
    PlayerLeft { name: Option<String> },
    NoPlayersRemain,
}

struct Rule {
    pattern: Regex,
    build: fn(Option<String>) -> LifecycleEvent,
}

fn rule(pattern: &str, build: fn(Option<String>) -> LifecycleEvent) -> Rule {
    Rule {
        // Patterns are literals below.
        pattern: Regex::new(pattern).expect("invalid log classifier pattern"),
        build,
    }
}

// Order matters: first match wins.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"Listening has been started", |_| LifecycleEvent::Ready),
        rule(r"ServerLobby: New player (.+) with online id \d+", |name| {
            LifecycleEvent::PlayerJoined { name }
        }),
        rule(r"ServerLobby: (.+) disconnected$", |name| {
            LifecycleEvent::PlayerLeft { name }
        }),
        rule(r"STKHost.+There are now 0 peers\.$", |_| {
            LifecycleEvent::NoPlayersRemain
        }),
    ]
});

pub fn classify(line: &str) -> Option<LifecycleEvent> {
    RULES.iter().find_map(|r| {
        let caps = r.pattern.captures(line)?;
        let name = caps
            .get(1)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some((r.build)(name))
    })
}
