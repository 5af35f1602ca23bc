//! Attribute projections for attribute-store backends.
//!
//! A create writes a full record. An update writes a set of per-attribute
//! instructions, which is where the three request states (absent, empty,
//! non-empty) collapse into the two the store understands (delete, set).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::ChangeRequest;

/// A full attribute row, keyed by attribute name.
pub type Record = BTreeMap<String, String>;

/// Partial-update instructions, keyed by attribute name.
pub type Instructions = BTreeMap<String, Instruction>;

/// What to do with one attribute on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum Instruction {
    Set(String),
    Delete,
}

impl Instruction {
    fn from_value(value: &str) -> Self {
        if value.is_empty() {
            Instruction::Delete
        } else {
            Instruction::Set(value.to_string())
        }
    }
}

/// The record written on create.
///
/// Empty core fields are omitted. Extension attributes are written as given.
pub fn full_projection(request: &ChangeRequest) -> Record {
    let mut record = Record::new();
    record.insert("id".to_string(), request.widget_id.clone());

    for (name, value) in core_fields(request) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            record.insert(name.to_string(), value.to_string());
        }
    }
    for attr in &request.other_attributes {
        record.insert(attr.name.clone(), attr.value.clone());
    }
    record
}

/// The instructions applied on update. Absent fields produce nothing.
pub fn partial_projection(request: &ChangeRequest) -> Instructions {
    let mut instructions = Instructions::new();

    for (name, value) in core_fields(request) {
        if let Some(value) = value {
            instructions.insert(name.to_string(), Instruction::from_value(value));
        }
    }
    for attr in &request.other_attributes {
        instructions.insert(attr.name.clone(), Instruction::from_value(&attr.value));
    }
    instructions
}

fn core_fields(request: &ChangeRequest) -> [(&'static str, Option<&str>); 3] {
    [
        ("owner", request.owner.as_deref()),
        ("label", request.label.as_deref()),
        ("description", request.description.as_deref()),
    ]
}
