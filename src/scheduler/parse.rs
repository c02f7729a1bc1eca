//! Parsers for the scheduler's textual output.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::job::JobState;

static SUBMITTED_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Submitted batch job (\d+)").ok());

/// Extract the job id from submit output (`Submitted batch job <id>`).
#[must_use]
pub fn parse_job_id(stdout: &str) -> Option<String> {
    SUBMITTED_RE
        .as_ref()?
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Split whitespace-separated `Key=Value` tokens into a map.
///
/// Tokens without `=` are ignored; the first `=` splits key from value.
#[must_use]
pub fn parse_key_values(output: &str) -> HashMap<String, String> {
    output
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

/// Whether scheduler output says the job id is no longer known.
#[must_use]
pub fn is_unknown_job(output: &str) -> bool {
    output.to_ascii_lowercase().contains("invalid job id")
}

/// Parsed job status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    /// Raw `JobState` token.
    pub state_token: String,
    /// Mapped state.
    pub state: JobState,
    /// Raw `NodeList` value, absent while unassigned.
    pub node_list: Option<String>,
}

/// Parse `show job` output; `None` when no `JobState` is present.
#[must_use]
pub fn parse_job_status(output: &str) -> Option<JobSnapshot> {
    let fields = parse_key_values(output);
    let state_token = fields.get("JobState")?.clone();
    let node_list = fields
        .get("NodeList")
        .filter(|list| first_node(list).is_some())
        .cloned();
    Some(JobSnapshot {
        state: JobState::from_token(&state_token),
        state_token,
        node_list,
    })
}

/// First host of a compressed host list.
///
/// `n[01-03,07]` yields `n01`, `a1,a2` yields `a1`. Placeholder values such
/// as `(null)` yield `None`.
#[must_use]
pub fn first_node(node_list: &str) -> Option<String> {
    let list = node_list.trim();
    if list.is_empty() || list == "(null)" || list.eq_ignore_ascii_case("none assigned") {
        return None;
    }

    let mut depth = 0_i32;
    let mut end = list.len();
    for (idx, ch) in list.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth -= 1,
            ',' if depth == 0 => {
                end = idx;
                break;
            }
            _ => {}
        }
    }
    let entry = &list[..end];

    let Some(open) = entry.find('[') else {
        return Some(entry.to_owned());
    };
    let close = open + entry[open..].rfind(']')?;
    let prefix = &entry[..open];
    let suffix = &entry[close + 1..];
    let first = entry[open + 1..close].split(',').next()?.split('-').next()?;
    if first.is_empty() {
        return None;
    }
    Some(format!("{prefix}{first}{suffix}"))
}
