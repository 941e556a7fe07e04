// ── Key registry ──
//
// Process-lifetime memory of every key observed: where it was seen, what
// type it has (declared by the catalogue or inferred from values), and
// which literal values turned up. Owned explicitly and shared between
// the validator and the reporter; never persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde_json::Value;

use crate::catalogue::{Group, KeySpec, ValueKind};

/// Best knowledge of a key's value type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum InferredType {
    /// No value observed yet.
    Unknown,
    Boolean,
    Number,
    String,
    /// A literal enumeration; the name is synthesised from the literals.
    Enum(String),
}

impl InferredType {
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(s) => enum_type_name(s).map_or(Self::String, Self::Enum),
            _ => Self::Unknown,
        }
    }

    /// Map an API option `type` field (`Double`, `Int`, `Boolean`, or
    /// an enumeration type name) to a type.
    pub fn from_declared(type_name: &str) -> Self {
        match type_name {
            "Boolean" => Self::Boolean,
            "Int" | "Double" | "Number" => Self::Number,
            "String" => Self::String,
            other if other.contains(".EnumType.") => {
                enum_type_name(&format!("{other}.x")).map_or(Self::Unknown, Self::Enum)
            }
            _ => Self::Unknown,
        }
    }

    fn from_kind(kind: &ValueKind) -> Self {
        match kind {
            ValueKind::Boolean => Self::Boolean,
            ValueKind::Number => Self::Number,
            ValueKind::String | ValueKind::ProgramKey => Self::String,
            ValueKind::Enum(_) => Self::Enum(kind.describe()),
            ValueKind::Any => Self::Unknown,
        }
    }
}

/// Synthesise an enumeration type name from one of its literals.
///
/// `Foo.Bar.EnumType.X.A` → `X`; deeper namespaces are concatenated
/// (`A.EnumType.Mode.Sub.Value` → `ModeSub`). Returns `None` for strings
/// that are not enumeration literals.
pub fn enum_type_name(literal: &str) -> Option<String> {
    let (_, rest) = literal.split_once(".EnumType.")?;
    let (type_path, _value) = rest.rsplit_once('.')?;
    let name: String = type_path.split('.').collect();
    if name.is_empty() { None } else { Some(name) }
}

/// Everything known about one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: String,
    pub groups: BTreeSet<Group>,
    /// Kind declared by the catalogue, if the key is catalogued.
    pub declared: Option<ValueKind>,
    pub inferred: InferredType,
    /// Literal values seen, with whether each was recognised.
    pub literals: BTreeMap<String, bool>,
    /// Whether the key (in every group it was seen in) is catalogued.
    pub recognised: bool,
}

impl KeyRecord {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            groups: BTreeSet::new(),
            declared: None,
            inferred: InferredType::Unknown,
            literals: BTreeMap::new(),
            recognised: true,
        }
    }

    /// Type used for reporting: declared wins over inferred.
    pub fn value_type(&self) -> InferredType {
        match self.declared {
            Some(ref kind) if !matches!(kind, ValueKind::Any) => InferredType::from_kind(kind),
            _ => self.inferred.clone(),
        }
    }
}

/// One observation handed to [`KeyRegistry::observe`].
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub group: Group,
    pub key: &'a str,
    pub value: Option<&'a Value>,
    pub spec: Option<&'a KeySpec>,
    /// Whether `value` (if a literal) was recognised.
    pub literal_recognised: bool,
}

#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: Mutex<BTreeMap<String, KeyRecord>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, KeyRecord>> {
        self.keys
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record one observation. Returns `true` if this is the first time
    /// the key was seen in this group or the literal is new.
    pub fn observe(&self, observation: Observation<'_>) -> bool {
        let mut keys = self.lock();
        let record = keys
            .entry(observation.key.to_owned())
            .or_insert_with(|| KeyRecord::new(observation.key));

        let mut new = record.groups.insert(observation.group);
        match observation.spec {
            Some(spec) => record.declared = Some(spec.kind),
            None => record.recognised = false,
        }

        if let Some(value) = observation.value {
            let inferred = InferredType::from_value(value);
            if inferred.is_known() && !record.inferred.is_known() {
                record.inferred = inferred;
            }
            if let Some(literal) = value.as_str() {
                if enum_type_name(literal).is_some() || observation.group == Group::Program {
                    new |= record
                        .literals
                        .insert(literal.to_owned(), observation.literal_recognised)
                        .is_none();
                }
            }
        }
        new
    }

    /// Record a declared option type, e.g. from a program definition.
    pub fn declare(&self, group: Group, key: &str, declared: InferredType) {
        let mut keys = self.lock();
        let record = keys
            .entry(key.to_owned())
            .or_insert_with(|| KeyRecord::new(key));
        record.groups.insert(group);
        if declared.is_known() && !record.inferred.is_known() {
            record.inferred = declared;
        }
    }

    pub fn get(&self, key: &str) -> Option<KeyRecord> {
        self.lock().get(key).cloned()
    }

    pub fn type_known(&self, key: &str) -> bool {
        self.lock()
            .get(key)
            .is_some_and(|r| r.value_type().is_known())
    }

    pub fn snapshot(&self) -> Vec<KeyRecord> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
