// Derived, read-only projections over the task list

use crate::models::{Task, TaskFilter, TaskStats};
use regex::{Regex, RegexBuilder};
use std::cmp::Reverse;
use tracing::warn;

/// A parsed search query
enum Query {
    Blank,
    Literal(Regex),
    /// The query could not be compiled; nothing matches it
    Unmatchable,
}

impl Query {
    /// A whitespace-only query means "no search"; otherwise the query is
    /// matched verbatim, surrounding whitespace included
    fn parse(query: &str) -> Self {
        if query.trim().is_empty() {
            return Query::Blank;
        }

        match RegexBuilder::new(&regex::escape(query)).case_insensitive(true).build() {
            Ok(re) => Query::Literal(re),
            Err(e) => {
                warn!(query, error = ?e, "Failed to build search matcher, matching nothing");
                Query::Unmatchable
            }
        }
    }
}

/// Tasks visible under the given filter and search query
///
/// With a non-blank query, only tasks containing it (case-insensitive) are kept
/// and they are ranked: prefix matches first, then earliest match position, then
/// shorter text. The sort is stable so ties keep list order. The status filter is
/// applied after searching.
pub fn filtered_tasks<'a>(tasks: &'a [Task], filter: TaskFilter, search_query: &str) -> Vec<&'a Task> {
    let searched: Vec<&Task> = match Query::parse(search_query) {
        Query::Blank => tasks.iter().collect(),
        Query::Unmatchable => Vec::new(),
        Query::Literal(re) => {
            let mut ranked: Vec<(usize, usize, &Task)> = tasks
                .iter()
                .filter_map(|task| {
                    let m = re.find(&task.text)?;
                    let position = task.text[..m.start()].chars().count();
                    Some((position, task.text.chars().count(), task))
                })
                .collect();
            ranked.sort_by_key(|&(position, len, _)| (Reverse(position == 0), position, len));
            ranked.into_iter().map(|(_, _, task)| task).collect()
        }
    };

    searched.into_iter().filter(|task| filter.matches(task)).collect()
}

/// Total, active and completed counts
pub fn stats(tasks: &[Task]) -> TaskStats {
    let total = tasks.len();
    let completed = tasks.iter().filter(|t| t.completed).count();
    TaskStats {
        total,
        active: total - completed,
        completed,
    }
}

pub fn has_completed(tasks: &[Task]) -> bool {
    tasks.iter().any(|t| t.completed)
}

pub fn has_active(tasks: &[Task]) -> bool {
    tasks.iter().any(|t| !t.completed)
}

/// A piece of task text, marked when it matched the search query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    pub matched: bool,
}

/// Split `text` around every case-insensitive occurrence of the query
///
/// The segments concatenate back to `text`. A blank query yields one plain segment.
pub fn highlight<'a>(text: &'a str, query: &str) -> Vec<Segment<'a>> {
    let Query::Literal(re) = Query::parse(query) else {
        return vec![Segment { text, matched: false }];
    };

    let mut segments = Vec::new();
    let mut last = 0;
    for m in re.find_iter(text) {
        if m.start() > last {
            segments.push(Segment {
                text: &text[last..m.start()],
                matched: false,
            });
        }
        segments.push(Segment {
            text: m.as_str(),
            matched: true,
        });
        last = m.end();
    }
    if last < text.len() || segments.is_empty() {
        segments.push(Segment {
            text: &text[last..],
            matched: false,
        });
    }

    segments
}
