//! Captures the observable state of a suspended test method.
//!
//! Starting from the visible local variables and the test fixture's fields,
//! values are flattened into `expression -> leaf` pairs. Objects are expanded
//! only through whitelisted inspector methods and their public fields, so
//! every captured expression can be re-evaluated in a generated assertion.

mod inspectors;

pub use inspectors::InspectorSet;

use crate::debugger::{ProgramPoint, Subject};
use crate::jdwp::{JdwpError, ObjectId, Value};
use crate::trace::{PointSnapshot, TraceValue};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("cannot read frame state at line {line}: {source}")]
    StructuralReadFailed {
        line: u32,
        #[source]
        source: JdwpError,
    },
}

pub struct StateObserver<'a> {
    inspectors: &'a InspectorSet,
    max_depth: usize,
}

impl<'a> StateObserver<'a> {
    pub fn new(inspectors: &'a InspectorSet, max_depth: usize) -> Self {
        Self {
            inspectors,
            max_depth,
        }
    }

    /// Snapshot the state visible at `point`. May be empty.
    pub fn observe<S: Subject + ?Sized>(
        &self,
        subject: &mut S,
        point: &ProgramPoint,
    ) -> Result<PointSnapshot, ObserveError> {
        let structural = |source| ObserveError::StructuralReadFailed {
            line: point.line,
            source,
        };
        let locals = subject.visible_variables(point).map_err(structural)?;
        let fixture = subject.fixture_fields(point).map_err(structural)?;

        let mut walk = Walk {
            observer: self,
            subject,
            point,
            out: PointSnapshot::default(),
        };
        let root = BTreeSet::new();

        let local_names: HashSet<String> = locals.iter().map(|(name, _)| name.clone()).collect();
        for (name, value) in locals {
            walk.value(name, value, &root, 0);
        }
        for (name, value) in fixture {
            let key = if local_names.contains(&name) {
                format!("this.{name}")
            } else {
                name
            };
            walk.value(key, value, &root, 0);
        }

        Ok(walk.out)
    }
}

/// Map a primitive JDWP value to its trace form.
///
/// A `char` holding half of a surrogate pair has no literal form and yields `None`.
fn leaf(value: &Value) -> Option<TraceValue> {
    let leaf = match *value {
        Value::Boolean(v) => TraceValue::Bool(v),
        Value::Byte(v) => TraceValue::Int(i64::from(v)),
        Value::Short(v) => TraceValue::Int(i64::from(v)),
        Value::Int(v) => TraceValue::Int(i64::from(v)),
        Value::Long(v) => TraceValue::Int(v),
        Value::Char(v) => TraceValue::Char(char::from_u32(u32::from(v))?),
        Value::Float(v) => TraceValue::Float(v),
        Value::Double(v) => TraceValue::Double(v),
        Value::Null => TraceValue::Null,
        Value::Void | Value::String(_) | Value::Array(_) | Value::Object(_) => return None,
    };
    Some(leaf)
}

struct Walk<'w, 'o, S: ?Sized> {
    observer: &'w StateObserver<'o>,
    subject: &'w mut S,
    point: &'w ProgramPoint,
    out: PointSnapshot,
}

impl<S: Subject + ?Sized> Walk<'_, '_, S> {
    /// `path` holds the runtime types already expanded on the way to this value.
    fn value(&mut self, key: String, value: Value, path: &BTreeSet<String>, depth: usize) {
        if let Some(leaf) = leaf(&value) {
            self.out.insert(key, leaf);
            return;
        }

        match value {
            Value::String(id) => match self.subject.string_value(id) {
                Ok(s) => self.out.insert(key, TraceValue::Str(s)),
                Err(e) => tracing::debug!("Dropping {}: {}", key, e),
            },
            Value::Array(id) => self.array(key, id, path, depth),
            Value::Object(id) => self.object(key, id, path, depth),
            _ => {}
        }
    }

    fn array(&mut self, key: String, id: ObjectId, path: &BTreeSet<String>, depth: usize) {
        if depth >= self.observer.max_depth {
            return;
        }
        let elements = match self.subject.array_elements(id) {
            Ok(elements) => elements,
            Err(e) => {
                tracing::debug!("Dropping {}: {}", key, e);
                return;
            }
        };
        for (i, element) in elements.into_iter().enumerate() {
            self.value(format!("{key}[{i}]"), element, path, depth + 1);
        }
    }

    fn object(&mut self, key: String, id: ObjectId, path: &BTreeSet<String>, depth: usize) {
        if depth >= self.observer.max_depth {
            return;
        }
        let ty = match self.subject.runtime_type(id) {
            Ok(ty) => ty,
            Err(e) => {
                tracing::debug!("Dropping {}: {}", key, e);
                return;
            }
        };
        if path.contains(&ty.name) {
            return;
        }
        let mut path = path.clone();
        path.insert(ty.name.clone());

        match self.subject.inspector_candidates(&ty) {
            Ok(candidates) => {
                for method in candidates {
                    if !self.observer.inspectors.contains(&method.qualified_name()) {
                        continue;
                    }
                    let child = format!("{key}.{}()", method.name);
                    match self.subject.invoke(self.point, id, &method) {
                        Ok(result) => self.value(child, result, &path, depth + 1),
                        Err(e) => tracing::debug!("Dropping {}: {}", child, e),
                    }
                }
            }
            Err(e) => tracing::debug!("No inspectors for {}: {}", key, e),
        }

        match self.subject.public_fields(id, &ty) {
            Ok(fields) => {
                for (name, value) in fields {
                    self.value(format!("{key}.{name}"), value, &path, depth + 1);
                }
            }
            Err(e) => tracing::debug!("No public fields for {}: {}", key, e),
        }
    }
}
