//! A small, self-consistent text wire format standing in for the real
//! class/instruction byte layout. The engine only ever calls
//! [`encode_packet`]/[`decode_packet_frame`]; nothing else in this workspace
//! inspects the bytes in between.
use crate::dto::{DecodedMessage, Descriptor, Instruction, ParamValue};
use std::collections::BTreeMap;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const PARAM_SEP: char = ',';
const KV_SEP: char = '=';

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed class record: {0:?}")]
    MalformedRecord(String),
    #[error("malformed address {0:?}")]
    MalformedAddress(String),
    #[error("unknown instruction {0:?}")]
    UnknownInstruction(String),
    #[error("malformed parameter {0:?}")]
    MalformedParam(String),
}

fn instruction_tag(instruction: Instruction) -> &'static str {
    match instruction {
        Instruction::Execute => "EXECUTE",
        Instruction::Fetch => "FETCH",
        Instruction::Report => "REPORT",
        Instruction::Acknowledge => "ACKNOWLEDGE",
    }
}

fn parse_instruction(tag: &str) -> Result<Instruction, CodecError> {
    match tag {
        "EXECUTE" => Ok(Instruction::Execute),
        "FETCH" => Ok(Instruction::Fetch),
        "REPORT" => Ok(Instruction::Report),
        "ACKNOWLEDGE" => Ok(Instruction::Acknowledge),
        other => Err(CodecError::UnknownInstruction(other.to_string())),
    }
}

fn format_param(value: &ParamValue) -> String {
    match value {
        ParamValue::String(s) => format!("s:{s}"),
        ParamValue::Number(n) => format!("n:{n}"),
    }
}

fn parse_param(raw: &str) -> Result<ParamValue, CodecError> {
    let (tag, rest) = raw
        .split_once(':')
        .ok_or_else(|| CodecError::MalformedParam(raw.to_string()))?;
    match tag {
        "s" => Ok(ParamValue::String(rest.to_string())),
        "n" => rest
            .parse::<f64>()
            .map(ParamValue::Number)
            .map_err(|_| CodecError::MalformedParam(raw.to_string())),
        _ => Err(CodecError::MalformedParam(raw.to_string())),
    }
}

/// Encode one request into its wire bytes.
pub fn encode_packet(descriptor: &Descriptor) -> Vec<u8> {
    let params = descriptor
        .params
        .iter()
        .map(|(k, v)| format!("{k}{KV_SEP}{}", format_param(v)))
        .collect::<Vec<_>>()
        .join(&PARAM_SEP.to_string());

    format!(
        "{class}{FIELD_SEP}{instr}{FIELD_SEP}{dx},{dy}{FIELD_SEP}{params}",
        class = descriptor.class,
        instr = instruction_tag(descriptor.instruction),
        dx = descriptor.dx,
        dy = descriptor.dy,
    )
    .into_bytes()
}

/// Decode a frame payload (as emitted by the Framer) into zero or more class
/// messages. A single frame may carry several records, record-separated.
pub fn decode_packet_frame(bytes: &[u8]) -> Result<Vec<DecodedMessage>, CodecError> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    for record in text.split(RECORD_SEP) {
        if record.is_empty() {
            continue;
        }
        out.push(decode_record(record)?);
    }
    Ok(out)
}

fn decode_record(record: &str) -> Result<DecodedMessage, CodecError> {
    let mut fields = record.splitn(4, FIELD_SEP);
    let class = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CodecError::MalformedRecord(record.to_string()))?;
    let instr_tag = fields
        .next()
        .ok_or_else(|| CodecError::MalformedRecord(record.to_string()))?;
    let addr = fields
        .next()
        .ok_or_else(|| CodecError::MalformedRecord(record.to_string()))?;
    let params_raw = fields.next().unwrap_or("");

    let instruction = parse_instruction(instr_tag)?;

    let (sx_raw, sy_raw) = addr
        .split_once(PARAM_SEP)
        .ok_or_else(|| CodecError::MalformedAddress(addr.to_string()))?;
    let sx = sx_raw
        .parse::<i8>()
        .map_err(|_| CodecError::MalformedAddress(addr.to_string()))?;
    let sy = sy_raw
        .parse::<i8>()
        .map_err(|_| CodecError::MalformedAddress(addr.to_string()))?;

    let mut params = BTreeMap::new();
    if !params_raw.is_empty() {
        for kv in params_raw.split(PARAM_SEP) {
            let (k, v) = kv
                .split_once(KV_SEP)
                .ok_or_else(|| CodecError::MalformedParam(kv.to_string()))?;
            params.insert(k.to_string(), parse_param(v)?);
        }
    }

    Ok(DecodedMessage {
        sx,
        sy,
        class: class.to_string(),
        instruction,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_descriptor_into_decoded_message() {
        let descriptor = Descriptor::new(-127, -127, "HEARTBEAT", Instruction::Execute)
            .with_param("TYPE", 255i64);
        let bytes = encode_packet(&descriptor);
        // The encoded form uses DX,DY where the decoded form reads it back as SX,SY
        // (no real device loop-back in this test; just verify the shapes agree).
        let reparsed = decode_record(&String::from_utf8(bytes).unwrap()).unwrap();
        assert_eq!(reparsed.sx, -127);
        assert_eq!(reparsed.sy, -127);
        assert_eq!(reparsed.class, "HEARTBEAT");
        assert_eq!(reparsed.instruction, Instruction::Execute);
        assert_eq!(reparsed.params["TYPE"].as_f64(), Some(255.0));
    }

    #[test]
    fn decodes_multiple_records_in_one_frame() {
        let mut frame = Vec::new();
        frame.extend(encode_packet(&Descriptor::new(
            0,
            0,
            "HEARTBEAT",
            Instruction::Report,
        )));
        frame.push(RECORD_SEP as u8);
        frame.extend(encode_packet(&Descriptor::new(
            1,
            0,
            "HEARTBEAT",
            Instruction::Report,
        )));
        let decoded = decode_packet_frame(&frame).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].sx, 1);
    }

    #[test]
    fn numeric_and_numeric_string_params_compare_equal() {
        let a = ParamValue::Number(0.0);
        let b = ParamValue::String("0".to_string());
        assert!(a.numeric_eq(&b));
        assert!(b.numeric_eq(&a));
    }
}
