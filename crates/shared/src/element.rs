//! Closed element-type / event-type families with per-variant capability
//! tables driving default-binding collapse and expansion.
use crate::model::Action;

/// A control family on a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementType {
    Button,
    Encoder,
    Potentiometer,
    Fader,
    Display,
    /// The virtual system element present on every module (index 0 on most
    /// module types), carrying module-wide events like init/timer.
    System,
}

/// A named trigger on an element, identified by a small integer code
/// specific to the element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    Init,
    Press,
    Turn,
    Timer,
    MapMode,
    MidiRx,
    Draw,
}

impl EventType {
    pub fn code(self) -> u8 {
        match self {
            EventType::Init => 0,
            EventType::Press => 1,
            EventType::Turn => 2,
            EventType::Timer => 3,
            EventType::MapMode => 4,
            EventType::MidiRx => 5,
            EventType::Draw => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(EventType::Init),
            1 => Some(EventType::Press),
            2 => Some(EventType::Turn),
            3 => Some(EventType::Timer),
            4 => Some(EventType::MapMode),
            5 => Some(EventType::MidiRx),
            6 => Some(EventType::Draw),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventType::Init => "init",
            EventType::Press => "press",
            EventType::Turn => "turn",
            EventType::Timer => "timer",
            EventType::MapMode => "mapMode",
            EventType::MidiRx => "midiRx",
            EventType::Draw => "draw",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "init" => Some(EventType::Init),
            "press" | "button" => Some(EventType::Press),
            "turn" => Some(EventType::Turn),
            "timer" => Some(EventType::Timer),
            "mapMode" => Some(EventType::MapMode),
            "midiRx" => Some(EventType::MidiRx),
            "draw" => Some(EventType::Draw),
            _ => None,
        }
    }
}

impl ElementType {
    pub fn slug(self) -> &'static str {
        match self {
            ElementType::Button => "button",
            ElementType::Encoder => "encoder",
            ElementType::Potentiometer => "potentiometer",
            ElementType::Fader => "fader",
            ElementType::Display => "display",
            ElementType::System => "system",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "button" => Some(ElementType::Button),
            "encoder" => Some(ElementType::Encoder),
            "potentiometer" => Some(ElementType::Potentiometer),
            "fader" => Some(ElementType::Fader),
            "display" => Some(ElementType::Display),
            "system" => Some(ElementType::System),
            _ => None,
        }
    }

    /// Events this element type fires. Used by Device's per-element event
    /// enumeration and ConfigRepo's default
    /// expansion.
    pub fn supported_events(self) -> &'static [EventType] {
        match self {
            ElementType::Button => &[EventType::Init, EventType::Press, EventType::Timer],
            ElementType::Encoder => &[
                EventType::Init,
                EventType::Turn,
                EventType::Press,
                EventType::Timer,
            ],
            ElementType::Potentiometer => &[EventType::Init, EventType::Turn],
            ElementType::Fader => &[EventType::Init, EventType::Turn],
            ElementType::Display => &[EventType::Init, EventType::Draw],
            ElementType::System => &[
                EventType::Init,
                EventType::Timer,
                EventType::MapMode,
                EventType::MidiRx,
            ],
        }
    }

    /// The factory action list for a supported event, or `None` if this
    /// `(element-type, event-type)` pair carries no default.
    pub fn default_config(self, event: EventType) -> Option<Vec<Action>> {
        if !self.supported_events().contains(&event) {
            return None;
        }
        match (self, event) {
            (ElementType::Button, EventType::Press) => Some(vec![Action::new(
                "midi",
                None,
                "midi.note(0, 60, 127)".to_string(),
            )]),
            (ElementType::Encoder, EventType::Turn) => Some(vec![Action::new(
                "midi",
                None,
                "midi.cc(0, 1, value)".to_string(),
            )]),
            // All other supported (type, event) pairs default to no bound
            // actions: an empty script list is itself the default.
            _ => Some(Vec::new()),
        }
    }
}

/// `HWCFG -> type name` lookup table. Lookup tries the full value first,
/// then the value masked to its low 7 bits, then falls back to
/// `Unknown(raw)`.
const MODULE_TYPES: &[(u8, &str)] = &[
    (0, "PO16"),
    (1, "BU16"),
    (2, "EN16"),
    (3, "FA16"),
    (4, "DI16"),
];

pub fn module_type_from_hwcfg(hwcfg: u8) -> String {
    if let Some((_, name)) = MODULE_TYPES.iter().find(|(code, _)| *code == hwcfg) {
        return (*name).to_string();
    }
    let masked = hwcfg & 0x7F;
    if let Some((_, name)) = MODULE_TYPES.iter().find(|(code, _)| *code == masked) {
        return (*name).to_string();
    }
    format!("Unknown({hwcfg})")
}

/// The element-type implied by a module's type name, used to resolve which
/// events an `EventConfig` must match. Falls back to `System` for the
/// virtual element and unknown module types, leaving the caller to reject
/// anything that isn't actually supported.
pub fn element_type_for_module(type_name: &str) -> ElementType {
    match type_name {
        "BU16" => ElementType::Button,
        "EN16" => ElementType::Encoder,
        "PO16" => ElementType::Potentiometer,
        "FA16" => ElementType::Fader,
        "DI16" => ElementType::Display,
        _ => ElementType::System,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hwcfg_lookup_prefers_full_value_over_masked() {
        // 0x81 masked is 0x01 (BU16); full value 0x81 is unmapped, so this
        // must fall through to masked, not to Unknown.
        assert_eq!(module_type_from_hwcfg(0x81), "BU16");
    }

    #[test]
    fn unmapped_hwcfg_is_unknown() {
        assert_eq!(module_type_from_hwcfg(0x7F), "Unknown(127)");
    }
}
