//! The device-wire action-stream codec shared by [`crate::device`] (fetch/send)
//! and [`crate::config`] (script-file bodies).
use crate::script::ScriptTranspiler;
use shared::model::{normalize_whitespace, Action};
use shared::GridError;

/// Scripts beyond this many characters fail with `ScriptTooLarge`.
pub const MAX_SCRIPT_CHARS: usize = 100_000;

const ACTION_MARKER: &str = "--[[@";

/// Wraps a device-bound script payload in `<?lua ... ?>`.
pub fn wrap_lua(body: &str) -> String {
    format!("<?lua {body} ?>")
}

/// Strips the `<?lua ... ?>` wrapper placed around `ACTIONSTRING`.
pub fn unwrap_lua(wrapped: &str) -> Result<&str, GridError> {
    wrapped
        .strip_prefix("<?lua ")
        .and_then(|rest| rest.strip_suffix(" ?>"))
        .ok_or_else(|| GridError::protocol("ACTIONSTRING missing <?lua ... ?> wrapper"))
}

/// Parses a single-line wire-format action stream:
/// `--[[@short[#name]]] body --[[@short2]] body2 ...`. Accepts
/// input up to [`MAX_SCRIPT_CHARS`] characters; over this, fails with
/// `Protocol` ("ScriptTooLarge" in spec terms). Splits non-greedily on the
/// `--[[@...]]` delimiter.
pub fn parse_action_stream(input: &str) -> Result<Vec<Action>, GridError> {
    if input.chars().count() > MAX_SCRIPT_CHARS {
        return Err(GridError::protocol(format!(
            "script exceeds {MAX_SCRIPT_CHARS} characters"
        )));
    }

    let mut actions = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find(ACTION_MARKER) {
        let after_marker = &rest[start + ACTION_MARKER.len()..];
        let Some(close_at) = after_marker.find("]]") else {
            return Err(GridError::protocol("unterminated action header"));
        };
        let header = &after_marker[..close_at];
        let after_header = &after_marker[close_at + 2..];
        let next_start = after_header.find(ACTION_MARKER);
        let (body, remainder) = match next_start {
            Some(idx) => (&after_header[..idx], &after_header[idx..]),
            None => (after_header, ""),
        };
        let (short, name) = split_header(header);
        actions.push(Action::new(short, name, body.trim().to_string()));
        rest = remainder;
    }
    Ok(actions)
}

fn split_header(header: &str) -> (String, Option<String>) {
    match header.split_once('#') {
        Some((short, name)) => (short.to_string(), Some(name.to_string())),
        None => (header.to_string(), None),
    }
}

/// Serializes an action list to the single-line wire format, minifying each
/// body via `transpiler`; falls back to whitespace-collapse if the minifier
/// rejects the body.
pub fn format_action_stream(actions: &[Action], transpiler: &dyn ScriptTranspiler) -> String {
    actions
        .iter()
        .map(|action| {
            let header = match &action.name {
                Some(name) => format!("{ACTION_MARKER}{}#{name}]]", action.short),
                None => format!("{ACTION_MARKER}{}]]", action.short),
            };
            let body = transpiler
                .minify(&action.script)
                .unwrap_or_else(|_| normalize_whitespace(&action.script));
            format!("{header} {body}")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::WhitespaceCollapseTranspiler;

    #[test]
    fn round_trips_two_actions() {
        let actions = vec![
            Action::new("midi", None, "midi.note(0, 60, 127)".to_string()),
            Action::new("led", Some("Flash".to_string()), "led.flash()".to_string()),
        ];
        let wire = format_action_stream(&actions, &WhitespaceCollapseTranspiler);
        let parsed = parse_action_stream(&wire).unwrap();
        assert_eq!(parsed, actions);
    }

    #[test]
    fn oversized_script_is_rejected() {
        let huge = "x".repeat(MAX_SCRIPT_CHARS + 1);
        assert!(parse_action_stream(&huge).is_err());
    }

    #[test]
    fn wraps_and_unwraps_lua() {
        let wrapped = wrap_lua("print('hi')");
        assert_eq!(wrapped, "<?lua print('hi') ?>");
        assert_eq!(unwrap_lua(&wrapped).unwrap(), "print('hi')");
    }

    #[test]
    fn unwrap_rejects_missing_wrapper() {
        assert!(unwrap_lua("print('hi')").is_err());
    }
}
