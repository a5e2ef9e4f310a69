//! Startup-only field stripping.
//!
//! Paths use JSON pointer syntax (`/ui/default_immersive_mode`). Only object
//! members can be marked; a pointer that resolves to nothing is ignored.

use super::DocumentName;
use serde_json::Value;

/// Per-document set of fields that must not be applied from a hot reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPolicy {
    startup_only: Vec<String>,
}

impl FieldPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `pointer` as startup-only.
    pub fn startup_only(mut self, pointer: impl Into<String>) -> Self {
        self.startup_only.push(pointer.into());
        self
    }

    /// Built-in policy for `name`.
    pub fn for_document(name: DocumentName) -> Self {
        match name {
            DocumentName::Ui => Self::new().startup_only("/ui/default_immersive_mode"),
            DocumentName::Theme | DocumentName::Commands => Self::new(),
        }
    }

    pub fn startup_only_paths(&self) -> &[String] {
        &self.startup_only
    }

    pub fn is_startup_only(&self, pointer: &str) -> bool {
        self.startup_only.iter().any(|p| p == pointer)
    }

    /// Copy of `value` with every startup-only field removed.
    pub fn strip(&self, value: &Value) -> Value {
        let mut out = value.clone();
        for pointer in &self.startup_only {
            if remove_pointer(&mut out, pointer) {
                tracing::debug!(field = %pointer, "stripped startup-only field from reload");
            }
        }
        out
    }
}

fn remove_pointer(value: &mut Value, pointer: &str) -> bool {
    let Some((parent, last)) = pointer.rsplit_once('/') else {
        return false;
    };
    let key = last.replace("~1", "/").replace("~0", "~");
    let target = if parent.is_empty() {
        Some(value)
    } else {
        value.pointer_mut(parent)
    };
    match target {
        Some(Value::Object(map)) => map.remove(&key).is_some(),
        _ => false,
    }
}
