//! Core data model.
//!
//! A change request is one pending create/update/delete of a widget. It is
//! built fresh from each polled payload and dropped once the backend call
//! returns.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// What a change request asks the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Change Request
// ---------------------------------------------------------------------------

/// A free-form `{name, value}` extension attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A decoded widget change request.
///
/// `owner`, `label` and `description` keep absence distinct from the empty
/// string: `None` leaves the field alone, `Some("")` clears it on update.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    /// Transport identifier. Never stored.
    pub request_id: Option<String>,
    pub widget_id: String,
    pub operation: Operation,
    pub owner: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub other_attributes: Vec<Attribute>,
    /// The payload object without transport keys; stored verbatim by flat backends.
    pub document: serde_json::Map<String, serde_json::Value>,
}

impl ChangeRequest {
    /// A minimal request with no optional fields set.
    pub fn new(operation: Operation, widget_id: impl Into<String>) -> Self {
        let widget_id = widget_id.into();
        let mut document = serde_json::Map::new();
        document.insert(
            "widgetId".to_string(),
            serde_json::Value::String(widget_id.clone()),
        );
        Self {
            request_id: None,
            widget_id,
            operation,
            owner: None,
            label: None,
            description: None,
            other_attributes: Vec::new(),
            document,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        self.document
            .insert("owner".to_string(), serde_json::Value::String(owner.clone()));
        self.owner = Some(owner);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.document
            .insert("label".to_string(), serde_json::Value::String(label.clone()));
        self.label = Some(label);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.document.insert(
            "description".to_string(),
            serde_json::Value::String(description.clone()),
        );
        self.description = Some(description);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.other_attributes.push(Attribute::new(name, value));
        let attrs = serde_json::to_value(&self.other_attributes).unwrap_or_default();
        self.document.insert("otherAttributes".to_string(), attrs);
        self
    }

    /// The owner, if present and non-empty.
    pub fn non_empty_owner(&self) -> Option<&str> {
        self.owner.as_deref().filter(|o| !o.is_empty())
    }
}
