//! Path-addressed JSON document tree
//!
//! Both the in-process store and the relay server keep their state in a
//! [`Document`]. Paths are slash separated (`GameSessions/<uuid>/countdown`).
//! Writing `null` is the same as deleting, and deleting prunes parents that
//! become empty, so an absent path and an empty object are indistinguishable.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }

    /// Returns the value at `path`, or `None` if nothing is stored there.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in split_path(path) {
            node = node.get(segment)?;
        }
        if is_empty(node) {
            None
        } else {
            Some(node)
        }
    }

    /// Overwrites the value at `path`, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: Value) {
        if value.is_null() {
            self.delete(path);
            return;
        }

        let segments: Vec<&str> = split_path(path).collect();
        let Some((last, parents)) = segments.split_last() else {
            self.root = match value {
                Value::Object(_) => value,
                _ => Value::Object(Map::new()),
            };
            return;
        };

        let mut node = &mut self.root;
        for segment in parents {
            node = ensure_object(node)
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        ensure_object(node).insert(last.to_string(), value);
    }

    /// Removes the value at `path`. Returns false if nothing was stored there.
    pub fn delete(&mut self, path: &str) -> bool {
        let segments: Vec<&str> = split_path(path).collect();
        if segments.is_empty() {
            let had_content = !is_empty(&self.root);
            self.root = Value::Object(Map::new());
            return had_content;
        }
        remove_at(&mut self.root, &segments)
    }

    /// Number of top-level children under `path`.
    pub fn child_count(&self, path: &str) -> usize {
        self.get(path)
            .and_then(Value::as_object)
            .map_or(0, Map::len)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// True if a write at one path can change the value observed at the other,
/// i.e. one path is an ancestor of, or equal to, the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    split_path(a).zip(split_path(b)).all(|(x, y)| x == y)
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

fn remove_at(node: &mut Value, segments: &[&str]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    let Value::Object(map) = node else {
        return false;
    };

    if rest.is_empty() {
        return map.remove(*first).is_some();
    }

    let removed = match map.get_mut(*first) {
        Some(child) => remove_at(child, rest),
        None => false,
    };
    if removed && map.get(*first).map_or(false, is_empty) {
        map.remove(*first);
    }
    removed
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
