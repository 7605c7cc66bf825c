//! Command feed and verb table
//!
//! Commands arrive one per line as `<Party>.<Number>: <verb> [args]` and are
//! appended to a feed shared by all agents. Every agent walks the whole feed
//! with its own cursor and executes the commands addressed to it.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use tokio::sync::Notify;

use peersync_core::{AgentId, AgentSpec, GroupTag, PartyId, SyncError, SyncResult};
use peersync_gossip::GossipReport;
use peersync_state::Entry;

/// One parsed command line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub target: AgentId,
    /// Lower-cased first word
    pub verb: String,
    /// Everything after the verb, trimmed
    pub args: String,
}

impl Command {
    /// Parse `A.1: simple by 2@a`. The id is case-insensitive; the colon may
    /// be replaced by whitespace.
    pub fn parse(line: &str) -> SyncResult<Command> {
        let line = line.trim();
        let bad = || SyncError::InvalidCommand(format!("expected `<Party>.<Number>: <verb>`, got {line:?}"));

        let id = line.get(..3).ok_or_else(bad)?;
        let target: AgentId = id.parse().map_err(|_| bad())?;
        let rest = &line[3..];
        let rest = match rest.strip_prefix(':') {
            Some(rest) => rest,
            None if rest.starts_with(char::is_whitespace) => rest,
            None => return Err(bad()),
        };

        let rest = rest.trim();
        let (verb, args) = match rest.split_once(char::is_whitespace) {
            Some((verb, args)) => (verb, args.trim()),
            None => (rest, ""),
        };
        if verb.is_empty() {
            return Err(bad());
        }
        Ok(Command {
            target,
            verb: verb.to_ascii_lowercase(),
            args: args.to_string(),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.verb)?;
        if !self.args.is_empty() {
            write!(f, " {}", self.args)?;
        }
        Ok(())
    }
}

/// Append-only command feed shared by every agent of a registry
#[derive(Debug, Default)]
pub struct CommandFeed {
    commands: Mutex<Vec<Command>>,
    appended: Notify,
}

impl CommandFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command; returns its index
    pub fn push(&self, command: Command) -> usize {
        let index = {
            let mut commands = self.commands.lock();
            commands.push(command);
            commands.len() - 1
        };
        self.appended.notify_waiters();
        index
    }

    /// Parse and append one line
    pub fn push_line(&self, line: &str) -> SyncResult<usize> {
        Ok(self.push(Command::parse(line)?))
    }

    pub fn get(&self, index: usize) -> Option<Command> {
        self.commands.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }

    /// Fires after every append
    pub fn appended(&self) -> &Notify {
        &self.appended
    }
}

/// `by N@g` - threshold of signatures required from a group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub threshold: u8,
    pub group: GroupTag,
}

impl Requirement {
    /// Parse the `N@g` part (`N` in 1..=9)
    pub fn parse(text: &str) -> SyncResult<Requirement> {
        let bad = || SyncError::InvalidCommand(format!("bad requirement {text:?}, expected N@g"));
        let bytes = text.as_bytes();
        if bytes.len() != 3 || bytes[1] != b'@' {
            return Err(bad());
        }
        let threshold = match bytes[0] {
            d @ b'1'..=b'9' => d - b'0',
            _ => return Err(bad()),
        };
        let group = GroupTag::new(bytes[2] as char).map_err(|_| bad())?;
        Ok(Requirement { threshold, group })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.threshold, self.group)
    }
}

/// Split an optional trailing `by N@g` off `args`
fn split_requirement(args: &str) -> SyncResult<(&str, Option<Requirement>)> {
    let args = args.trim();
    let Some((head, req)) = args.rsplit_once(char::is_whitespace) else {
        return Ok((args, None));
    };
    let head = head.trim_end();
    let split = head
        .len()
        .checked_sub(2)
        .and_then(|cut| Some((head.get(..cut)?, head.get(cut..)?)));
    match split {
        Some((rest, by))
            if by.eq_ignore_ascii_case("by")
                && (rest.is_empty() || rest.ends_with(char::is_whitespace)) =>
        {
            Ok((rest.trim(), Some(Requirement::parse(req)?)))
        }
        _ => Ok((args, None)),
    }
}

/// A command resolved against the verb table
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invocation {
    Simple { requirement: Option<Requirement> },
    Add { spec: AgentSpec, requirement: Option<Requirement> },
    Rem { spec: AgentSpec, requirement: Option<Requirement> },
    State,
    Gossip,
}

type VerbParser = fn(&str) -> SyncResult<Invocation>;

fn parse_simple(args: &str) -> SyncResult<Invocation> {
    match split_requirement(args)? {
        ("", requirement) => Ok(Invocation::Simple { requirement }),
        (extra, _) => Err(SyncError::InvalidCommand(format!("unexpected arguments {extra:?}"))),
    }
}

fn parse_agent_args(args: &str) -> SyncResult<(AgentSpec, Option<Requirement>)> {
    let (spec, requirement) = split_requirement(args)?;
    if spec.is_empty() || spec.contains(char::is_whitespace) {
        return Err(SyncError::InvalidCommand(format!("expected one agent spec, got {spec:?}")));
    }
    Ok((spec.parse()?, requirement))
}

fn parse_add(args: &str) -> SyncResult<Invocation> {
    let (spec, requirement) = parse_agent_args(args)?;
    Ok(Invocation::Add { spec, requirement })
}

fn parse_rem(args: &str) -> SyncResult<Invocation> {
    let (spec, requirement) = parse_agent_args(args)?;
    Ok(Invocation::Rem { spec, requirement })
}

fn parse_state(_: &str) -> SyncResult<Invocation> {
    Ok(Invocation::State)
}

fn parse_gossip(_: &str) -> SyncResult<Invocation> {
    Ok(Invocation::Gossip)
}

/// Verb name -> argument parser
pub struct VerbTable {
    verbs: HashMap<&'static str, VerbParser>,
}

impl VerbTable {
    /// `simple`, `add`, `rem`, `state`, `gossip`
    pub fn standard() -> Self {
        let mut verbs: HashMap<&'static str, VerbParser> = HashMap::new();
        verbs.insert("simple", parse_simple);
        verbs.insert("add", parse_add);
        verbs.insert("rem", parse_rem);
        verbs.insert("state", parse_state);
        verbs.insert("gossip", parse_gossip);
        VerbTable { verbs }
    }

    pub fn resolve(&self, command: &Command) -> SyncResult<Invocation> {
        let parse = self
            .verbs
            .get(command.verb.as_str())
            .ok_or_else(|| SyncError::UnknownVerb(command.verb.clone()))?;
        parse(&command.args)
    }

    pub fn verbs(&self) -> Vec<&'static str> {
        let mut verbs: Vec<&'static str> = self.verbs.keys().copied().collect();
        verbs.sort_unstable();
        verbs
    }
}

impl Default for VerbTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// What executing a command did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// `simple`: new entry stored and broadcast
    Created { party: PartyId, entry: Entry },
    /// `add`: admission stored and the new agent started
    Admitted { agent: AgentId, entry: Entry },
    /// `state`: current fingerprint
    Reported(String),
    /// `gossip`: one anti-entropy round
    Gossiped(GossipReport),
    /// Understood but refused (duplicate or cross-party admission)
    Rejected(String),
    /// Understood but not implemented
    Unsupported(&'static str),
    /// Unknown verb or malformed arguments
    Unrecognized(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CommandOutcome::Created { .. }
                | CommandOutcome::Admitted { .. }
                | CommandOutcome::Reported(_)
                | CommandOutcome::Gossiped(_)
        )
    }
}
