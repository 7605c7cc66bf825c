//! Status output sink
//!
//! Agents narrate what they do as short human-readable lines
//! (`A.1 -- Created delta #1f2e. I now see A=#+#1f2e; B=#`). Where the
//! lines go is up to the host.

use parking_lot::Mutex;

use peersync_core::AgentId;

use crate::{Command, CommandOutcome};

/// Line-oriented status output
pub trait StatusSink: Send + Sync {
    fn say(&self, agent: AgentId, message: &str);

    /// Called once per executed command
    fn outcome(&self, _agent: AgentId, _command: &Command, _outcome: &CommandOutcome) {}
}

/// Forwards status lines to `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn say(&self, agent: AgentId, message: &str) {
        tracing::info!(target: "peersync::status", agent = %agent, "{message}");
    }
}

/// One recorded status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub agent: AgentId,
    pub message: String,
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -- {}", self.agent, self.message)
    }
}

/// Keeps every line and outcome in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<StatusLine>>,
    outcomes: Mutex<Vec<(AgentId, Command, CommandOutcome)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<StatusLine> {
        self.lines.lock().clone()
    }

    pub fn lines_for(&self, agent: AgentId) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|l| l.agent == agent)
            .map(|l| l.message.clone())
            .collect()
    }

    pub fn outcomes(&self) -> Vec<(AgentId, Command, CommandOutcome)> {
        self.outcomes.lock().clone()
    }

    /// Outcome of the first recorded command matching `command`'s text
    pub fn outcome_of(&self, line: &str) -> Option<CommandOutcome> {
        let wanted = Command::parse(line).ok()?;
        self.outcomes
            .lock()
            .iter()
            .find(|(_, cmd, _)| *cmd == wanted)
            .map(|(_, _, outcome)| outcome.clone())
    }
}

impl StatusSink for RecordingSink {
    fn say(&self, agent: AgentId, message: &str) {
        self.lines.lock().push(StatusLine {
            agent,
            message: message.to_string(),
        });
    }

    fn outcome(&self, agent: AgentId, command: &Command, outcome: &CommandOutcome) {
        self.outcomes
            .lock()
            .push((agent, command.clone(), outcome.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        let a1: AgentId = "A.1".parse().unwrap();
        let b1: AgentId = "B.1".parse().unwrap();
        sink.say(a1, "Gossiping.");
        sink.say(b1, "OK; I see A=#");
        assert_eq!(sink.lines()[0].to_string(), "A.1 -- Gossiping.");
        assert_eq!(sink.lines_for(b1), vec!["OK; I see A=#".to_string()]);

        let cmd = Command::parse("A.1: rem A.2").unwrap();
        sink.outcome(a1, &cmd, &CommandOutcome::Unsupported("rem"));
        assert_eq!(
            sink.outcome_of("a.1: rem A.2"),
            Some(CommandOutcome::Unsupported("rem"))
        );
        assert_eq!(sink.outcome_of("A.1: state"), None);
    }
}
