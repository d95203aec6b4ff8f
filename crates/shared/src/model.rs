//! Core domain entities.
use serde::{Deserialize, Serialize};

/// A discovered serial port believed to be a Grid device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: Option<String>,
    /// Normalized (trimmed, uppercased) serial number, when the OS reports one.
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Firmware {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

/// Position uniquely keying a module within a connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub dx: i8,
    pub dy: i8,
}

impl Position {
    pub const BROADCAST: Position = Position { dx: -127, dy: -127 };

    pub fn new(dx: i8, dy: i8) -> Self {
        Self { dx, dy }
    }
}

/// A module discovered from a HEARTBEAT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub position: Position,
    pub type_name: String,
    pub type_id: u8,
    pub firmware: Firmware,
    pub element_count: usize,
}

/// A `(short, name?, script)` triple bound to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub short: String,
    pub name: Option<String>,
    pub script: String,
}

impl Action {
    pub fn new(short: impl Into<String>, name: Option<String>, script: impl Into<String>) -> Self {
        Self {
            short: short.into(),
            name,
            script: script.into(),
        }
    }

    /// Whitespace-normalized comparison used by default-collapse.
    pub fn structurally_eq(&self, other: &Action) -> bool {
        self.short == other.short
            && self.name == other.name
            && normalize_whitespace(&self.script) == normalize_whitespace(&other.script)
    }
}

pub fn normalize_whitespace(script: &str) -> String {
    script.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An event binding: element index, event-type code, ordered actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConfig {
    pub element: u8,
    pub event_type: u8,
    pub actions: Vec<Action>,
}

impl EventConfig {
    /// Structural equality used by the round-trip law.
    pub fn actions_eq(&self, other: &[Action]) -> bool {
        self.actions.len() == other.len()
            && self
                .actions
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.structurally_eq(b))
    }
}

/// One of four selectable pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageConfig {
    pub page: u8,
    pub events: Vec<EventConfig>,
}

/// A fully fetched or loaded module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub module: ModuleInfo,
    pub pages: Vec<PageConfig>,
}
