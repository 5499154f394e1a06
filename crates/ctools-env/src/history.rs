//! Revision history (`conda-meta/history`).
//!
//! The log is a sequence of revisions. Each starts with a header line
//! `==> <date> <==`, followed by `#` comment lines and content lines. A
//! revision's content is either a full listing of installed distributions or
//! a diff where every line starts with `+` (added) or `-` (removed).
//!
//! ```text
//! ==> 2016-05-10 14:02:11 <==
//! # cmd: /opt/conda/bin/conda create -n py35 python=3.5
//! # create specs: ['python 3.5*']
//! python-3.5.1-0
//! ==> 2016-06-01 09:30:00 <==
//! # cmd: conda update python
//! -python-3.5.1-0
//! +python-3.5.2-0
//! ```
//!
//! Distribution identifiers may carry a `channel::` prefix, a `[features]`
//! suffix or a `.tar.bz2` suffix. States hold the bare `name-version-build`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use once_cell::sync::OnceCell;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::environment::META_DIR;

/// File name of the revision log inside `conda-meta/`
pub const HISTORY_FILE: &str = "history";

const DEFAULT_CHANNEL: &str = "defaults";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed history at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// One `==> date <==` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub date: String,
    /// Content lines, as written
    pub content: BTreeSet<String>,
    /// `#` lines, in order
    pub comments: Vec<String>,
    /// 1-based line number of the header
    pub line: usize,
}

impl Revision {
    /// Whether this revision lists changes rather than a full state.
    pub fn is_diff(&self) -> bool {
        self.content
            .iter()
            .any(|line| line.starts_with('+') || line.starts_with('-'))
    }

    /// A diff revision may only hold `+` and `-` lines.
    pub fn check(&self) -> Result<()> {
        if !self.is_diff() {
            return Ok(());
        }
        match self
            .content
            .iter()
            .find(|line| !line.starts_with('+') && !line.starts_with('-'))
        {
            Some(line) => Err(HistoryError::Malformed {
                line: self.line,
                reason: format!("did not expect `{line}` in a diff revision"),
            }),
            None => Ok(()),
        }
    }

    /// Header date parsed as a local timestamp, when it has the usual format.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.date, "%Y-%m-%d %H:%M:%S").ok()
    }
}

/// Installed distributions after one revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct State {
    pub date: String,
    pub packages: BTreeSet<String>,
}

/// A command recorded in the log's comments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRequest {
    pub date: String,
    pub cmd: Vec<String>,
    /// `install`, `remove`, `update`, `create`, ...
    pub action: Option<String>,
    pub specs: Vec<String>,
}

/// A package that changed version between two states
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    pub old: String,
    pub new: String,
}

/// What one revision did, by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryEvent {
    pub date: String,
    pub rev: usize,
    pub install: Vec<String>,
    pub remove: Vec<String>,
    pub upgrade: Vec<Change>,
    pub downgrade: Vec<Change>,
}

/// A distribution identifier split into its parts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dist {
    pub channel: String,
    /// `name-version-build`, with channel and suffixes removed
    pub dist: String,
    pub name: String,
    pub version: String,
    pub build: String,
}

impl Dist {
    pub fn parse(raw: &str) -> Self {
        let mut dist = raw.trim();
        if dist.ends_with(']') {
            dist = dist.split('[').next().unwrap_or(dist);
        }
        dist = dist.strip_suffix(".tar.bz2").unwrap_or(dist);
        let (channel, dist) = match dist.split_once("::") {
            Some((channel, rest)) => (channel, rest),
            None => (DEFAULT_CHANNEL, dist),
        };

        let mut parts = dist.rsplitn(3, '-');
        let last = parts.next().unwrap_or("");
        let (name, version, build) = match (parts.next(), parts.next()) {
            (Some(version), Some(name)) => (name, version, last),
            (Some(name), None) => (name, last, ""),
            _ => (last, "", ""),
        };

        Self {
            channel: channel.to_string(),
            dist: dist.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            build: build.to_string(),
        }
    }

    fn is_default_channel(&self) -> bool {
        self.channel == DEFAULT_CHANNEL
    }

    /// `name-version-build`, prefixed with `channel::` off the default channel.
    fn display_name(&self) -> String {
        if self.is_default_channel() {
            self.dist.clone()
        } else {
            format!("{}::{}", self.channel, self.dist)
        }
    }
}

/// Parse the text of a history log.
///
/// Content before the first header is rejected, as is a revision mixing diff
/// lines with a full listing.
pub fn parse(text: &str) -> Result<Vec<Revision>> {
    let mut revisions: Vec<Revision> = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(date) = separator_date(line) {
            revisions.push(Revision {
                date: date.to_string(),
                content: BTreeSet::new(),
                comments: Vec::new(),
                line: index + 1,
            });
            continue;
        }
        let Some(current) = revisions.last_mut() else {
            return Err(HistoryError::Malformed {
                line: index + 1,
                reason: "content before the first revision header".to_string(),
            });
        };
        if line.starts_with('#') {
            current.comments.push(line.to_string());
        } else {
            current.content.insert(line.to_string());
        }
    }
    for revision in &revisions {
        revision.check()?;
    }
    Ok(revisions)
}

/// `==> date <==` with any whitespace around the date.
fn separator_date(line: &str) -> Option<&str> {
    let inner = line.strip_prefix("==>")?;
    let end = inner.find("<==")?;
    let date = inner[..end].trim();
    (!date.is_empty()).then_some(date)
}

/// `# cmd: <argv>`
fn command_comment(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('#')?.trim_start();
    let argv = rest.strip_prefix("cmd:")?.trim();
    (!argv.is_empty()).then_some(argv)
}

/// `# <action> specs: <list>`
fn specs_comment(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('#')?.trim_start();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let (action, rest) = rest.split_at(end);
    if action.is_empty() {
        return None;
    }
    let specs = rest.trim_start().strip_prefix("specs:")?.trim();
    (!specs.is_empty()).then_some((action, specs))
}

/// Specs are written as a Python list literal.
fn parse_specs(raw: &str) -> Vec<String> {
    if let Ok(specs) = serde_json::from_str::<Vec<String>>(&raw.replace('\'', "\"")) {
        return specs;
    }
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|spec| spec.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|spec| !spec.is_empty())
        .collect()
}

/// Parsed revision log of one environment.
///
/// Derived views are computed on first use and kept.
#[derive(Debug)]
pub struct History {
    path: PathBuf,
    revisions: Vec<Revision>,
    requests: OnceCell<Vec<UserRequest>>,
    states: OnceCell<Vec<State>>,
    events: OnceCell<Vec<HistoryEvent>>,
}

impl History {
    /// History of the environment rooted at `prefix`.
    pub fn open(prefix: impl AsRef<Path>) -> Result<Self> {
        Self::load(prefix.as_ref().join(META_DIR).join(HISTORY_FILE))
    }

    /// Read a history file. A missing file is an empty history.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let revisions = match fs::read_to_string(&path) {
            Ok(text) => parse(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no history file");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::from_revisions(path, revisions))
    }

    pub fn from_revisions(path: PathBuf, revisions: Vec<Revision>) -> Self {
        Self {
            path,
            revisions,
            requests: OnceCell::new(),
            states: OnceCell::new(),
            events: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Revisions, failing on the first malformed one. Histories assembled with
    /// [`History::from_revisions`] have not been through [`parse`].
    fn checked_revisions(&self) -> Result<&[Revision]> {
        for revision in &self.revisions {
            revision.check()?;
        }
        Ok(&self.revisions)
    }

    /// Commands recorded in the log. Revisions without a `# cmd:` comment are
    /// left out.
    pub fn get_user_requests(&self) -> &[UserRequest] {
        self.requests.get_or_init(|| {
            let mut requests = Vec::new();
            for revision in &self.revisions {
                let mut cmd = None;
                let mut action = None;
                let mut specs = Vec::new();
                for comment in &revision.comments {
                    if let Some(argv) = command_comment(comment) {
                        let mut argv: Vec<String> = argv.split_whitespace().map(str::to_string).collect();
                        if let Some(program) = argv.first_mut() {
                            if program.ends_with("conda") {
                                *program = "conda".to_string();
                            }
                        }
                        cmd = Some(argv);
                    }
                    if let Some((verb, raw)) = specs_comment(comment) {
                        action = Some(verb.to_string());
                        specs = parse_specs(raw);
                    }
                }
                if let Some(cmd) = cmd {
                    requests.push(UserRequest {
                        date: revision.date.clone(),
                        cmd,
                        action,
                        specs,
                    });
                }
            }
            requests
        })
    }

    /// Installed distributions after every revision, oldest first.
    pub fn construct_states(&self) -> Result<&[State]> {
        self.states
            .get_or_try_init(|| {
                let revisions = self.checked_revisions()?;
                let mut states = Vec::with_capacity(revisions.len());
                let mut current = BTreeSet::new();
                for revision in revisions {
                    if !revision.is_diff() {
                        current = revision.content.iter().map(|d| Dist::parse(d).dist).collect();
                    } else {
                        // Removals first, so a re-added dist survives.
                        for dist in revision.content.iter().filter_map(|l| l.strip_prefix('-')) {
                            current.remove(&Dist::parse(dist).dist);
                        }
                        for dist in revision.content.iter().filter_map(|l| l.strip_prefix('+')) {
                            current.insert(Dist::parse(dist).dist);
                        }
                    }
                    states.push(State {
                        date: revision.date.clone(),
                        packages: current.clone(),
                    });
                }
                Ok(states)
            })
            .map(Vec::as_slice)
    }

    /// State after revision `rev`, if there is one.
    pub fn state(&self, rev: usize) -> Result<Option<&BTreeSet<String>>> {
        Ok(self.construct_states()?.get(rev).map(|state| &state.packages))
    }

    /// Current state according to the log; empty when the log is.
    pub fn latest_state(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .construct_states()?
            .last()
            .map(|state| state.packages.clone())
            .unwrap_or_default())
    }

    /// Per-revision install, remove, upgrade and downgrade events.
    ///
    /// Upgrades and downgrades compare `(version, build)` as plain strings.
    pub fn object_log(&self) -> Result<&[HistoryEvent]> {
        self.events
            .get_or_try_init(|| {
                let events: Vec<HistoryEvent> = self
                    .checked_revisions()?
                    .iter()
                    .enumerate()
                    .map(|(rev, revision)| revision_event(rev, revision))
                    .collect();
                Ok(events)
            })
            .map(Vec::as_slice)
    }

    /// Human readable log, one block per revision.
    ///
    /// Diffs list changed packages as `name  {old -> new}`, then removals,
    /// then additions.
    pub fn pretty_log(&self) -> Result<String> {
        let mut out = String::new();
        for (rev, revision) in self.checked_revisions()?.iter().enumerate() {
            let _ = writeln!(out, "{}  (rev {})", revision.date, rev);
            for line in pretty_content(revision) {
                let _ = writeln!(out, "    {line}");
            }
            out.push('\n');
        }
        Ok(out)
    }
}

fn revision_event(rev: usize, revision: &Revision) -> HistoryEvent {
    let mut event = HistoryEvent {
        date: revision.date.clone(),
        rev,
        ..Default::default()
    };
    if !revision.is_diff() {
        event.install = revision
            .content
            .iter()
            .map(|d| Dist::parse(d).display_name())
            .collect();
        return event;
    }

    let (added, removed) = split_diff(revision);
    for (name, new) in &added {
        match removed.get(name) {
            Some(old) => {
                let change = Change {
                    old: old.display_name(),
                    new: new.display_name(),
                };
                if (&new.version, &new.build) > (&old.version, &old.build) {
                    event.upgrade.push(change);
                } else {
                    event.downgrade.push(change);
                }
            }
            None => event.install.push(new.display_name()),
        }
    }
    event.remove = removed
        .iter()
        .filter(|(name, _)| !added.contains_key(*name))
        .map(|(_, old)| old.display_name())
        .collect();
    event
}

/// Added and removed distributions of a diff revision, keyed by lowercased name.
fn split_diff(revision: &Revision) -> (BTreeMap<String, Dist>, BTreeMap<String, Dist>) {
    let mut added = BTreeMap::new();
    let mut removed = BTreeMap::new();
    for line in &revision.content {
        if let Some(dist) = line.strip_prefix('+') {
            let dist = Dist::parse(dist);
            added.insert(dist.name.to_lowercase(), dist);
        } else if let Some(dist) = line.strip_prefix('-') {
            let dist = Dist::parse(dist);
            removed.insert(dist.name.to_lowercase(), dist);
        }
    }
    (added, removed)
}

fn pretty_content(revision: &Revision) -> Vec<String> {
    if !revision.is_diff() {
        return revision.content.iter().cloned().collect();
    }

    let label = |dist: &Dist| {
        if dist.is_default_channel() {
            dist.version.clone()
        } else {
            format!("{} ({})", dist.version, dist.channel)
        }
    };
    let (added, removed) = split_diff(revision);
    let mut lines = Vec::new();
    for (name, new) in &added {
        if let Some(old) = removed.get(name) {
            lines.push(format!(" {name}  {{{} -> {}}}", label(old), label(new)));
        }
    }
    for (name, old) in &removed {
        if !added.contains_key(name) {
            lines.push(format!("-{name}-{}", label(old)));
        }
    }
    for (name, new) in &added {
        if !removed.contains_key(name) {
            lines.push(format!("+{name}-{}", label(new)));
        }
    }
    lines
}
