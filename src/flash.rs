//! One-shot flash messages kept in four queues inside the session map.
//!
//! Queues live under reserved session keys as lists of strings. Adding appends; taking drains
//! all four queues at once, so a message is rendered on exactly one page.

use serde::Serialize;

use crate::codec::{SessionMap, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashKind {
    Message,
    Success,
    Warning,
    Error,
}

impl FlashKind {
    pub const ALL: [FlashKind; 4] = [
        FlashKind::Message,
        FlashKind::Success,
        FlashKind::Warning,
        FlashKind::Error,
    ];

    pub(crate) fn session_key(self) -> &'static str {
        match self {
            FlashKind::Message => "_flash_message_",
            FlashKind::Success => "_flash_success_",
            FlashKind::Warning => "_flash_warning_",
            FlashKind::Error => "_flash_error_",
        }
    }

    /// Key under which this queue appears in template render data.
    pub fn data_key(self) -> &'static str {
        match self {
            FlashKind::Message => "flash_message",
            FlashKind::Success => "flash_success",
            FlashKind::Warning => "flash_warning",
            FlashKind::Error => "flash_error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Flashes {
    pub message: Vec<String>,
    pub success: Vec<String>,
    pub warning: Vec<String>,
    pub error: Vec<String>,
}

impl Flashes {
    pub fn get(&self, kind: FlashKind) -> &[String] {
        match kind {
            FlashKind::Message => &self.message,
            FlashKind::Success => &self.success,
            FlashKind::Warning => &self.warning,
            FlashKind::Error => &self.error,
        }
    }

    fn get_mut(&mut self, kind: FlashKind) -> &mut Vec<String> {
        match kind {
            FlashKind::Message => &mut self.message,
            FlashKind::Success => &mut self.success,
            FlashKind::Warning => &mut self.warning,
            FlashKind::Error => &mut self.error,
        }
    }

    pub fn is_empty(&self) -> bool {
        FlashKind::ALL.iter().all(|kind| self.get(*kind).is_empty())
    }

    /// Writes all four queues into template data, empty queues included.
    pub fn merge_into(self, data: &mut serde_json::Map<String, serde_json::Value>) {
        for kind in FlashKind::ALL {
            data.insert(kind.data_key().to_string(), self.get(kind).into());
        }
    }
}

pub(crate) fn push(values: &mut SessionMap, kind: FlashKind, msg: String) {
    let entry = values
        .entry(kind.session_key().to_string())
        .or_insert_with(|| Value::List(Vec::new()));

    match entry {
        Value::List(items) => items.push(Value::String(msg)),
        other => *other = Value::List(vec![Value::String(msg)]),
    }
}

pub(crate) fn take_all(values: &mut SessionMap) -> Flashes {
    let mut flashes = Flashes::default();

    for kind in FlashKind::ALL {
        if let Some(Value::List(items)) = values.remove(kind.session_key()) {
            flashes.get_mut(kind).extend(
                items
                    .into_iter()
                    .filter_map(|item| item.as_str().map(str::to_string)),
            );
        }
    }

    flashes
}
