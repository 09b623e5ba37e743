//! Breadth-first search over parsed JSON documents.
//!
//! Pages embed large, loosely structured JSON blobs whose layout shifts between
//! revisions. Rather than hard-coding full paths, callers describe what they are
//! looking for with a [`Matcher`] and let the search find the shallowest node that
//! satisfies it.
use serde_json::Value;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no node matched the search")]
pub struct NotFound;

/// Edge label of a node relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Name(&'a str),
    Index(usize),
}

/// One step of a fixed sub-path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Key(&'static str),
    Index(usize),
}

impl Step {
    fn matches(&self, key: Key<'_>) -> bool {
        match (self, key) {
            (Step::Key(name), Key::Name(k)) => *name == k,
            (Step::Index(i), Key::Index(k)) => *i == k,
            _ => false,
        }
    }
}

/// Visitor applied at every `(path, key, value)` triple during traversal.
///
/// Returning `Some` stops descent below that node and records the returned value
/// as a match.
pub trait Matcher {
    fn visit<'v>(&self, path: &[Key<'v>], key: Key<'v>, value: &'v Value) -> Option<&'v Value>;
}

/// Matches any object member named `name`; array indices never match.
#[derive(Debug, Clone, Copy)]
pub struct ByKey(pub &'static str);

impl Matcher for ByKey {
    fn visit<'v>(&self, _path: &[Key<'v>], key: Key<'v>, value: &'v Value) -> Option<&'v Value> {
        match key {
            Key::Name(name) if name == self.0 => Some(value),
            _ => None,
        }
    }
}

/// Matches when the current key equals the first step and the remaining steps
/// resolve below it.
#[derive(Debug, Clone, Copy)]
pub struct BySubPath {
    steps: &'static [Step],
    return_root: bool,
}

impl BySubPath {
    pub const fn new(steps: &'static [Step]) -> Self {
        Self {
            steps,
            return_root: false,
        }
    }

    /// Yield the node under the first step instead of the resolved sub-value.
    pub const fn returning_root(mut self) -> Self {
        self.return_root = true;
        self
    }
}

impl Matcher for BySubPath {
    fn visit<'v>(&self, _path: &[Key<'v>], key: Key<'v>, value: &'v Value) -> Option<&'v Value> {
        let (first, rest) = self.steps.split_first()?;
        if !first.matches(key) {
            return None;
        }
        let child = get(value, rest)?;
        Some(if self.return_root { value } else { child })
    }
}

/// Resolve `steps` from `root`. Missing keys, out-of-range indices and type
/// mismatches all yield `None`.
pub fn get<'v>(root: &'v Value, steps: &[Step]) -> Option<&'v Value> {
    steps.iter().try_fold(root, |node, step| match step {
        Step::Key(name) => node.as_object()?.get(*name),
        Step::Index(i) => node.as_array()?.get(*i),
    })
}

fn children(value: &Value) -> Vec<(Key<'_>, &Value)> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (Key::Name(k.as_str()), v)).collect(),
        Value::Array(items) => items.iter().enumerate().map(|(i, v)| (Key::Index(i), v)).collect(),
        _ => Vec::new(),
    }
}

fn is_composite(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn walk<'v>(root: &'v Value, matcher: &dyn Matcher, first_only: bool) -> Vec<&'v Value> {
    let mut found = Vec::new();
    let mut queue: VecDeque<(Vec<Key<'v>>, &'v Value)> = VecDeque::new();
    queue.push_back((Vec::new(), root));
    while let Some((path, node)) = queue.pop_front() {
        for (key, value) in children(node) {
            if let Some(hit) = matcher.visit(&path, key, value) {
                found.push(hit);
                if first_only {
                    return found;
                }
            } else if is_composite(value) {
                let mut child_path = path.clone();
                child_path.push(key);
                queue.push_back((child_path, value));
            }
        }
    }
    found
}

/// First match in breadth-first order: shallowest wins, then left-to-right.
pub fn find_first<'v>(root: &'v Value, matcher: &dyn Matcher) -> Result<&'v Value, NotFound> {
    walk(root, matcher, true).into_iter().next().ok_or(NotFound)
}

/// Every match in breadth-first order.
pub fn find_all<'v>(root: &'v Value, matcher: &dyn Matcher) -> Vec<&'v Value> {
    walk(root, matcher, false)
}
