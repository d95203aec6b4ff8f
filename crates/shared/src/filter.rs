//! Request/response correlation filter.
use packet_codec::{DecodedMessage, Instruction, ParamValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub sx: Option<i8>,
    pub sy: Option<i8>,
    pub class: Option<String>,
    pub instruction: Option<Instruction>,
    pub params: BTreeMap<String, ParamValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.instruction = Some(instruction);
        self
    }

    pub fn sx(mut self, sx: i8) -> Self {
        self.sx = Some(sx);
        self
    }

    pub fn sy(mut self, sy: i8) -> Self {
        self.sy = Some(sy);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Value-equality between numeric and numeric-string accepted: the device
    /// emits mixed representations for the same parameter.
    pub fn matches(&self, message: &DecodedMessage) -> bool {
        if let Some(sx) = self.sx
            && sx != message.sx
        {
            return false;
        }
        if let Some(sy) = self.sy
            && sy != message.sy
        {
            return false;
        }
        if let Some(class) = &self.class
            && class != &message.class
        {
            return false;
        }
        if let Some(instruction) = self.instruction
            && instruction != message.instruction
        {
            return false;
        }
        for (key, expected) in &self.params {
            match message.params.get(key) {
                Some(actual) if actual.numeric_eq(expected) => {}
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn message(params: BTreeMap<String, ParamValue>) -> DecodedMessage {
        DecodedMessage {
            sx: 0,
            sy: -1,
            class: "PAGEACTIVE".to_string(),
            instruction: Instruction::Report,
            params,
        }
    }

    #[test]
    fn numeric_filter_matches_numeric_string_param() {
        let mut params = BTreeMap::new();
        params.insert(
            "PAGENUMBER".to_string(),
            ParamValue::String("0".to_string()),
        );
        params.insert(
            "ELEMENTNUMBER".to_string(),
            ParamValue::String("1".to_string()),
        );
        params.insert("EVENTTYPE".to_string(), ParamValue::String("3".to_string()));
        let message = message(params);

        let filter = Filter::new()
            .sx(0)
            .sy(-1)
            .param("PAGENUMBER", 0i64)
            .param("ELEMENTNUMBER", 1i64)
            .param("EVENTTYPE", 3i64);

        assert!(filter.matches(&message));
    }

    #[test]
    fn mismatched_class_does_not_match() {
        let filter = Filter::new().class("PAGEACTIVE");
        let mut other = message(BTreeMap::new());
        other.class = "HEARTBEAT".to_string();
        assert!(!filter.matches(&other));
    }
}
