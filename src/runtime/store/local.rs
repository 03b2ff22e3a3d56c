//! Local store: the generic nested optional-value tree, addressed by route.
//!
//! Durability of the underlying bytes is owned by an external collaborator;
//! this type holds the in-process tree and implements the batch/collection
//! semantics layered above it.

use serde_json::{Map, Value};

use crate::core::Route;

use super::StoreError;

#[derive(Debug)]
pub struct LocalStore {
    root: Value,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, route: &Route) -> Option<&Value> {
        let mut cursor = &self.root;
        for step in route.steps() {
            cursor = cursor.as_object()?.get(step.as_str())?;
        }
        Some(cursor)
    }

    /// Structural containment: does the parent object actually hold this
    /// key? Distinguishes "present and null" from "absent".
    pub fn contains(&self, route: &Route) -> bool {
        self.get(route).is_some()
    }

    /// Expand one logical update into the physical writes it implies.
    ///
    /// A mapping written at a bare collection fans out into one write per
    /// member id; writing null/absent clears the whole collection. This is
    /// validation too: it must run for every update in a batch before any
    /// of them is applied, so a bad update fails the batch up front.
    pub fn expand(
        route: &Route,
        value: Option<Value>,
    ) -> Result<Vec<(Route, Option<Value>)>, StoreError> {
        if !route.is_collection_terminal() {
            return Ok(vec![(route.clone(), value)]);
        }
        match value {
            None | Some(Value::Null) => Ok(vec![(route.clone(), None)]),
            Some(Value::Object(members)) => {
                if members.is_empty() {
                    return Ok(vec![(route.clone(), None)]);
                }
                Ok(members
                    .into_iter()
                    .map(|(id, member)| (route.member(id), Some(member)))
                    .collect())
            }
            Some(other) => Err(StoreError::InvalidCollectionValue {
                route: route.to_string(),
                found: json_type_name(&other),
            }),
        }
    }

    /// Apply pre-expanded writes in order. Returns the routes whose
    /// addressed location actually changed (presence or value), which is
    /// what gates publisher emission.
    pub fn apply(&mut self, updates: Vec<(Route, Option<Value>)>) -> Vec<Route> {
        let mut changed = Vec::new();
        for (route, value) in updates {
            if self.apply_one(&route, value) {
                changed.push(route);
            }
        }
        changed
    }

    fn apply_one(&mut self, route: &Route, value: Option<Value>) -> bool {
        let steps = route.steps();
        debug_assert!(!steps.is_empty(), "empty route");
        let (last, parents) = match steps.split_last() {
            Some(split) => split,
            None => return false,
        };
        match value {
            Some(value) => {
                let mut cursor = &mut self.root;
                for step in parents {
                    if !cursor.is_object() {
                        // A scalar in the middle of the path gives way to
                        // the structure the route demands.
                        *cursor = Value::Object(Map::new());
                    }
                    let Value::Object(map) = cursor else {
                        unreachable!("object ensured above");
                    };
                    cursor = map
                        .entry(step.as_str().to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                }
                if !cursor.is_object() {
                    *cursor = Value::Object(Map::new());
                }
                let Value::Object(map) = cursor else {
                    unreachable!("object ensured above");
                };
                let changed = map.get(last.as_str()) != Some(&value);
                if changed {
                    map.insert(last.as_str().to_string(), value);
                }
                changed
            }
            None => {
                let mut cursor = &mut self.root;
                for step in parents {
                    match cursor.as_object_mut().and_then(|m| m.get_mut(step.as_str())) {
                        Some(next) => cursor = next,
                        None => return false,
                    }
                }
                match cursor.as_object_mut() {
                    Some(map) => map.remove(last.as_str()).is_some(),
                    None => false,
                }
            }
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
