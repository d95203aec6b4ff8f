//! Directory <-> `ModuleConfig` tree.
//!
//! One top-level directory holds one subdirectory per module
//! (`NN-<type-slug>`), each carrying a `module.json` manifest and zero or
//! more `page-<N>.lua` script files. Events equal to their per-element-type
//! default collapse on write and re-expand on read.
use crate::script::{ScriptTranspiler, WhitespaceCollapseTranspiler};
use serde::{Deserialize, Serialize};
use shared::element::{element_type_for_module, ElementType, EventType};
use shared::model::{normalize_whitespace, Action, EventConfig, Firmware, ModuleConfig, ModuleInfo, PageConfig, Position};
use shared::{GridError, ValidationIssue};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone)]
struct FirmwareManifest {
    major: u16,
    minor: u16,
    patch: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ElementManifest {
    index: u8,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ModuleManifest {
    version: String,
    created: String,
    modified: String,
    #[serde(rename = "toolVersion")]
    tool_version: String,
    index: usize,
    position: [i8; 2],
    #[serde(rename = "type")]
    type_name: String,
    #[serde(rename = "typeId")]
    type_id: u8,
    firmware: FirmwareManifest,
    elements: Vec<ElementManifest>,
    pages: Vec<u8>,
}

const MANIFEST_VERSION: &str = "1.0.0";

/// Directory <-> `ModuleConfig` tree codec.
pub struct ConfigRepo {
    base_dir: PathBuf,
    transpiler: Box<dyn ScriptTranspiler>,
}

impl ConfigRepo {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_transpiler(base_dir, Box::new(WhitespaceCollapseTranspiler))
    }

    pub fn with_transpiler(base_dir: impl Into<PathBuf>, transpiler: Box<dyn ScriptTranspiler>) -> Self {
        Self {
            base_dir: base_dir.into(),
            transpiler,
        }
    }

    /// Writes every module atomically (one temp directory renamed into place
    /// per module), in `configs`' order (module indices are 1-based).
    pub fn write(&self, configs: &[ModuleConfig]) -> Result<(), GridError> {
        std::fs::create_dir_all(&self.base_dir).map_err(io_err)?;
        for (zero_based, config) in configs.iter().enumerate() {
            self.write_module(zero_based + 1, config)?;
        }
        Ok(())
    }

    fn write_module(&self, index: usize, config: &ModuleConfig) -> Result<(), GridError> {
        validate_safe_path_component(&config.module.type_name)?;
        let slug = slugify(&config.module.type_name);
        let dirname = format!("{index:02}-{slug}");
        validate_safe_path_component(&dirname)?;
        let target_dir = resolve_module_dir(&self.base_dir, &dirname)?;

        let tmp = tempfile::Builder::new()
            .prefix(".gridctl-tmp-")
            .tempdir_in(&self.base_dir)
            .map_err(io_err)?;

        let element_type = element_type_for_module(&config.module.type_name);
        let mut written_pages = Vec::new();
        for page in &config.pages {
            if self.render_page(tmp.path(), page, element_type, &config.module)? {
                written_pages.push(page.page);
            }
        }
        if written_pages.is_empty() {
            self.write_sentinel_page(tmp.path(), &config.module)?;
            written_pages.push(0);
        }

        let previous_created = std::fs::read_to_string(target_dir.join("module.json"))
            .ok()
            .and_then(|text| serde_json::from_str::<ModuleManifest>(&text).ok())
            .map(|m| m.created);
        let now = chrono::Utc::now().to_rfc3339();
        let manifest = ModuleManifest {
            version: MANIFEST_VERSION.to_string(),
            created: previous_created.unwrap_or_else(|| now.clone()),
            modified: now,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            index,
            position: [config.module.position.dx, config.module.position.dy],
            type_name: config.module.type_name.clone(),
            type_id: config.module.type_id,
            firmware: FirmwareManifest {
                major: config.module.firmware.major,
                minor: config.module.firmware.minor,
                patch: config.module.firmware.patch,
            },
            elements: (0..config.module.element_count)
                .map(|i| ElementManifest {
                    index: i as u8,
                    type_name: element_type.slug().to_string(),
                })
                .collect(),
            pages: written_pages,
        };
        let manifest_json = serde_json::to_string_pretty(&manifest).map_err(json_err)?;
        std::fs::write(tmp.path().join("module.json"), manifest_json).map_err(io_err)?;

        if target_dir.exists() {
            std::fs::remove_dir_all(&target_dir).map_err(io_err)?;
        }
        let tmp_path = tmp.keep();
        std::fs::rename(&tmp_path, &target_dir).map_err(io_err)?;
        Ok(())
    }

    /// Renders one page's non-default events to `page-<N>.lua`. Returns
    /// `false` (writes nothing) when every event on the page equals its
    /// default.
    fn render_page(
        &self,
        dir: &Path,
        page: &PageConfig,
        element_type: ElementType,
        module: &ModuleInfo,
    ) -> Result<bool, GridError> {
        let events = non_default_events(page, element_type);
        if events.is_empty() {
            return Ok(false);
        }

        let mut out = String::new();
        out.push_str(&format!("-- grid: page={}\n", page.page));
        out.push_str(&format!("-- grid: module={}\n", module.type_name));
        out.push_str(&format!(
            "-- grid: position=[{},{}]\n\n",
            module.position.dx, module.position.dy
        ));
        for event in events {
            let event_name = EventType::from_code(event.event_type)
                .map(|e| e.name().to_string())
                .unwrap_or_else(|| event.event_type.to_string());
            out.push_str(&format!(
                "-- grid:event element={} event={}\n",
                event.element, event_name
            ));
            for action in &event.actions {
                let header = match &action.name {
                    Some(name) => format!("--[[@{}#{name}]]", action.short),
                    None => format!("--[[@{}]]", action.short),
                };
                let body = self
                    .transpiler
                    .humanize(&action.script)
                    .unwrap_or_else(|_| normalize_whitespace(&action.script));
                out.push_str(&header);
                out.push('\n');
                out.push_str(&body);
                out.push('\n');
            }
            out.push_str("-- ============================================================\n");
        }
        std::fs::write(dir.join(format!("page-{}.lua", page.page)), out).map_err(io_err)?;
        Ok(true)
    }

    /// Every event on every page equals default: write a sentinel
    /// `page-0.lua` so the round trip stays faithful.
    fn write_sentinel_page(&self, dir: &Path, module: &ModuleInfo) -> Result<(), GridError> {
        let mut out = String::new();
        out.push_str("-- grid: page=0\n");
        out.push_str(&format!("-- grid: module={}\n", module.type_name));
        out.push_str(&format!(
            "-- grid: position=[{},{}]\n\n",
            module.position.dx, module.position.dy
        ));
        out.push_str("-- All events use default configuration\n");
        std::fs::write(dir.join("page-0.lua"), out).map_err(io_err)
    }

    /// Reads every module subdirectory back into `ModuleConfig`s, sorted by
    /// directory name.
    pub fn read(&self) -> Result<Vec<ModuleConfig>, GridError> {
        let mut entries: Vec<_> = std::fs::read_dir(&self.base_dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        entries
            .into_iter()
            .map(|entry| self.read_module(&entry.path()))
            .collect()
    }

    fn read_module(&self, dir: &Path) -> Result<ModuleConfig, GridError> {
        let manifest_path = dir.join("module.json");
        let manifest_text = std::fs::read_to_string(&manifest_path)
            .map_err(|e| GridError::config(format!("{}: {e}", manifest_path.display())))?;
        let manifest: ModuleManifest = serde_json::from_str(&manifest_text)
            .map_err(|e| GridError::config(format!("{}: {e}", manifest_path.display())))?;

        let module_info = ModuleInfo {
            position: Position::new(manifest.position[0], manifest.position[1]),
            type_name: manifest.type_name.clone(),
            type_id: manifest.type_id,
            firmware: Firmware {
                major: manifest.firmware.major,
                minor: manifest.firmware.minor,
                patch: manifest.firmware.patch,
            },
            element_count: manifest.elements.len(),
        };
        let element_type = element_type_for_module(&module_info.type_name);

        let mut pages = Vec::new();
        for &page_num in &manifest.pages {
            let path = dir.join(format!("page-{page_num}.lua"));
            let text = std::fs::read_to_string(&path)
                .map_err(|e| GridError::config(format!("{}: {e}", path.display())))?;
            let overrides = parse_page_file(&text, &path, page_num, &module_info)?;
            let mut overrides: HashMap<(u8, u8), EventConfig> = overrides
                .into_iter()
                .map(|event| ((event.element, event.event_type), event))
                .collect();

            let mut events = Vec::new();
            for element in 0..module_info.element_count as u8 {
                for &event_type in element_type.supported_events() {
                    let key = (element, event_type.code());
                    let event = overrides.remove(&key).unwrap_or_else(|| EventConfig {
                        element,
                        event_type: event_type.code(),
                        actions: element_type.default_config(event_type).unwrap_or_default(),
                    });
                    events.push(event);
                }
            }
            pages.push(PageConfig {
                page: page_num,
                events,
            });
        }

        Ok(ModuleConfig {
            module: module_info,
            pages,
        })
    }
}

/// Events whose action list differs from the `(element-type, event-type)`
/// default. An event-type code with no matching variant is always kept, so
/// unrecognized bindings are never silently dropped.
fn non_default_events(page: &PageConfig, element_type: ElementType) -> Vec<&EventConfig> {
    page.events
        .iter()
        .filter(|event| match EventType::from_code(event.event_type) {
            Some(event_type) => match element_type.default_config(event_type) {
                Some(default_actions) => !event.actions_eq(&default_actions),
                None => true,
            },
            None => true,
        })
        .collect()
}

fn slugify(type_name: &str) -> String {
    let mut slug = String::new();
    let mut last_was_dash = false;
    for ch in type_name.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

/// Refuses any path component that escapes the base directory or contains a
/// separator or `..`.
fn validate_safe_path_component(component: &str) -> Result<(), GridError> {
    if component.is_empty()
        || component.contains('/')
        || component.contains('\\')
        || component.split(['/', '\\']).any(|part| part == "..")
    {
        return Err(GridError::config(format!(
            "unsafe path component: {component:?}"
        )));
    }
    Ok(())
}

fn resolve_module_dir(base: &Path, dirname: &str) -> Result<PathBuf, GridError> {
    let joined = base.join(dirname);
    if joined.parent() != Some(base) {
        return Err(GridError::config(format!(
            "module directory {dirname:?} escapes base directory"
        )));
    }
    Ok(joined)
}

fn io_err(err: std::io::Error) -> GridError {
    GridError::config(err.to_string())
}

fn json_err(err: serde_json::Error) -> GridError {
    GridError::config(err.to_string())
}

struct EventHeader {
    element: u8,
    event_type: EventType,
    element_type_override: Option<String>,
}

fn page_from_filename(path: &Path) -> Option<u8> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("page-")?
        .parse()
        .ok()
}

/// Parses one `page-<N>.lua` file into its overriding events. `expected_page`
/// is the page number implied by the caller's manifest entry, used for the
/// front-matter/filename mismatch check.
fn parse_page_file(
    text: &str,
    path: &Path,
    expected_page: u8,
    module_info: &ModuleInfo,
) -> Result<Vec<EventConfig>, GridError> {
    let mut lines = text.lines().peekable();
    let mut front_matter: BTreeMap<String, String> = BTreeMap::new();
    let mut page_from_frontmatter: Option<u8> = None;

    while let Some(&line) = lines.peek() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            lines.next();
            continue;
        }
        if trimmed.starts_with("-- grid:event") {
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("-- grid:") {
            let rest = rest.trim();
            let Some((key, value)) = rest.split_once('=') else {
                return Err(GridError::config(format!(
                    "{}: malformed front-matter line {trimmed:?}",
                    path.display()
                )));
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return Err(GridError::config(format!(
                    "{}: malformed front-matter line {trimmed:?}",
                    path.display()
                )));
            }
            if key == "page" {
                page_from_frontmatter = Some(value.parse::<u8>().map_err(|_| {
                    GridError::config(format!("{}: invalid page number {value:?}", path.display()))
                })?);
            } else {
                front_matter.insert(key.to_string(), value.to_string());
            }
            lines.next();
            continue;
        }
        lines.next();
    }

    let filename_page = page_from_filename(path);
    let page = match (page_from_frontmatter, filename_page) {
        (Some(fm), Some(fname)) if fm != fname => {
            log::warn!(
                "{}: front-matter page {fm} disagrees with filename page {fname}; front-matter wins",
                path.display()
            );
            fm
        }
        (Some(fm), _) => fm,
        (None, Some(fname)) => {
            log::warn!(
                "{}: page number missing from front-matter; using filename {fname}",
                path.display()
            );
            fname
        }
        (None, None) => expected_page,
    };
    if page != expected_page {
        log::warn!(
            "{}: resolved page {page} disagrees with manifest entry {expected_page}",
            path.display()
        );
    }

    if let Some(module_name) = front_matter.get("module")
        && module_name != &module_info.type_name
    {
        return Err(GridError::config(format!(
            "{}: front-matter module {module_name:?} disagrees with module.json type {:?}",
            path.display(),
            module_info.type_name
        )));
    }
    if let Some(position_str) = front_matter.get("position") {
        let parsed = parse_position_literal(position_str).ok_or_else(|| {
            GridError::config(format!(
                "{}: malformed position {position_str:?}",
                path.display()
            ))
        })?;
        if parsed != module_info.position {
            return Err(GridError::config(format!(
                "{}: front-matter position {position_str:?} disagrees with module.json position ({},{})",
                path.display(),
                module_info.position.dx,
                module_info.position.dy
            )));
        }
    }

    let element_type = element_type_for_module(&module_info.type_name);
    let mut events = Vec::new();
    let mut current: Option<(EventHeader, Vec<String>)> = None;
    for line in lines {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("-- grid:event") {
            if let Some((header, body_lines)) = current.take() {
                events.push(finish_event(header, body_lines, element_type, path)?);
            }
            current = Some((parse_event_header(rest, path)?, Vec::new()));
            continue;
        }
        let Some((_, body_lines)) = current.as_mut() else {
            continue;
        };
        if is_ignored_comment_line(trimmed) {
            continue;
        }
        body_lines.push(line.to_string());
    }
    if let Some((header, body_lines)) = current.take() {
        events.push(finish_event(header, body_lines, element_type, path)?);
    }

    Ok(events)
}

fn parse_position_literal(input: &str) -> Option<Position> {
    let inner = input.trim().strip_prefix('[')?.strip_suffix(']')?;
    let (dx, dy) = inner.split_once(',')?;
    Some(Position::new(dx.trim().parse().ok()?, dy.trim().parse().ok()?))
}

fn tokenize_kv(input: &str) -> Vec<(String, String)> {
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    for ch in input.trim().chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch.is_whitespace() && !in_quotes {
            if !buf.is_empty() {
                parts.push(std::mem::take(&mut buf));
            }
        } else {
            buf.push(ch);
        }
    }
    if !buf.is_empty() {
        parts.push(buf);
    }
    parts
        .into_iter()
        .filter_map(|part| part.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect()
}

fn parse_event_header(rest: &str, path: &Path) -> Result<EventHeader, GridError> {
    let mut element = None;
    let mut event_name = None;
    let mut element_type_override = None;
    for (key, value) in tokenize_kv(rest) {
        match key.as_str() {
            "element" => element = value.parse::<u8>().ok(),
            "event" => event_name = Some(value),
            "elementType" => element_type_override = Some(value),
            _ => {}
        }
    }
    let element = element.ok_or_else(|| {
        GridError::config(format!("{}: event header missing element=", path.display()))
    })?;
    let event_name = event_name.ok_or_else(|| {
        GridError::config(format!("{}: event header missing event=", path.display()))
    })?;
    let event_type = EventType::from_name(&event_name).ok_or_else(|| {
        GridError::config(format!("{}: unknown event name {event_name:?}", path.display()))
    })?;
    Ok(EventHeader {
        element,
        event_type,
        element_type_override,
    })
}

fn finish_event(
    header: EventHeader,
    body_lines: Vec<String>,
    resolved_element_type: ElementType,
    path: &Path,
) -> Result<EventConfig, GridError> {
    if let Some(override_name) = &header.element_type_override {
        let overridden = ElementType::from_slug(&override_name.to_lowercase());
        if overridden != Some(resolved_element_type) {
            log::warn!(
                "{}: elementType {override_name:?} disagrees with module manifest; manifest value wins",
                path.display()
            );
        }
    }
    if !resolved_element_type.supported_events().contains(&header.event_type) {
        return Err(GridError::config(format!(
            "{}: event {} not supported by element type {:?}",
            path.display(),
            header.event_type.name(),
            resolved_element_type
        )));
    }

    let body = body_lines.join("\n");
    let actions = parse_event_body_actions(&body, path)?;
    Ok(EventConfig {
        element: header.element,
        event_type: header.event_type.code(),
        actions,
    })
}

fn parse_event_body_actions(body: &str, path: &Path) -> Result<Vec<Action>, GridError> {
    let mut actions: Vec<(String, Option<String>, Vec<String>)> = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if let Some((short, name, inline)) = parse_modern_action_header(trimmed) {
            let mut lines = Vec::new();
            if let Some(code) = inline {
                lines.push(code);
            }
            actions.push((short, name, lines));
            continue;
        }
        if let Some((short, name)) = parse_legacy_action_header(trimmed) {
            actions.push((short, name, Vec::new()));
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        match actions.last_mut() {
            Some((_, _, lines)) => lines.push(line.to_string()),
            None => {
                return Err(GridError::config(format!(
                    "{}: script body before any action header: {trimmed:?}",
                    path.display()
                )))
            }
        }
    }

    Ok(actions
        .into_iter()
        .map(|(short, name, lines)| Action::new(short, name, lines.join("\n").trim().to_string()))
        .collect())
}

/// The modern action header: `--[[@short[#name]]] [inline code]`.
fn parse_modern_action_header(line: &str) -> Option<(String, Option<String>, Option<String>)> {
    let after = line.strip_prefix("--[[@")?;
    let close = after.find("]]")?;
    let header = &after[..close];
    let inline = after[close + 2..].trim();
    let (short, name) = match header.split_once('#') {
        Some((short, name)) => (short.to_string(), Some(name.to_string())),
        None => (header.to_string(), None),
    };
    let inline = if inline.is_empty() { None } else { Some(inline.to_string()) };
    Some((short, name, inline))
}

/// The legacy action header: `--[[ @action short "name" ]]`.
fn parse_legacy_action_header(line: &str) -> Option<(String, Option<String>)> {
    let inner = line.strip_prefix("--[[")?.trim();
    let inner = inner.strip_suffix("]]")?.trim();
    let inner = inner.strip_prefix("@action")?.trim();
    match inner.find('"') {
        Some(quote_start) => {
            let short = inner[..quote_start].trim().to_string();
            let after = &inner[quote_start + 1..];
            let name_end = after.find('"')?;
            Some((short, Some(after[..name_end].to_string())))
        }
        None => Some((inner.to_string(), None)),
    }
}

fn is_ignored_comment_line(line: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "-- Grid Configuration",
        "-- Module:",
        "-- Element:",
        "-- Event:",
        "-- Page:",
        "-- grid:event",
        "-- grid:",
        "-- action:",
    ];
    if PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
        return true;
    }
    if let Some(rest) = line.strip_prefix("--") {
        let rest = rest.trim();
        if rest.len() >= 3 && (rest.chars().all(|c| c == '-') || rest.chars().all(|c| c == '=')) {
            return true;
        }
    }
    false
}

/// Aggregates every push-path diagnostic across `configs` before any device
/// operation starts.
pub fn validate_all(configs: &[ModuleConfig]) -> Result<(), GridError> {
    let issues: Vec<ValidationIssue> = configs.iter().flat_map(validate_module_config).collect();
    if issues.is_empty() {
        Ok(())
    } else {
        Err(GridError::Validation(issues))
    }
}

/// Checks invariants (c) "every EventConfig matches a supported event" and
/// (d) "at most one EventConfig per (page, element, eventType)".
pub fn validate_module_config(config: &ModuleConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let element_type = element_type_for_module(&config.module.type_name);
    let position = config.module.position;

    for page in &config.pages {
        if page.page > 3 {
            issues.push(ValidationIssue::new(
                &config.module.type_name,
                position.dx,
                position.dy,
                page.page,
                0,
                "-",
                format!("page {} out of range 0..3", page.page),
            ));
        }

        let mut seen = HashSet::new();
        for event in &page.events {
            let event_label = EventType::from_code(event.event_type)
                .map(|e| e.name())
                .unwrap_or("unknown");

            if !seen.insert((event.element, event.event_type)) {
                issues.push(ValidationIssue::new(
                    &config.module.type_name,
                    position.dx,
                    position.dy,
                    page.page,
                    event.element,
                    event_label,
                    "duplicate event binding for this (page, element, event) triple",
                ));
            }

            match EventType::from_code(event.event_type) {
                Some(event_type) if element_type.supported_events().contains(&event_type) => {}
                Some(event_type) => issues.push(ValidationIssue::new(
                    &config.module.type_name,
                    position.dx,
                    position.dy,
                    page.page,
                    event.element,
                    event_type.name(),
                    format!("event not supported by element type {element_type:?}"),
                )),
                None => issues.push(ValidationIssue::new(
                    &config.module.type_name,
                    position.dx,
                    position.dy,
                    page.page,
                    event.element,
                    event_label,
                    format!("unknown event-type code {}", event.event_type),
                )),
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::Firmware;

    fn test_module(position: Position) -> ModuleInfo {
        ModuleInfo {
            position,
            type_name: "BU16".to_string(),
            type_id: 99,
            firmware: Firmware { major: 1, minor: 0, patch: 0 },
            element_count: 2,
        }
    }

    fn non_default_config(position: Position) -> ModuleConfig {
        ModuleConfig {
            module: test_module(position),
            pages: vec![PageConfig {
                page: 0,
                events: vec![
                    EventConfig {
                        element: 0,
                        event_type: EventType::Init.code(),
                        actions: vec![Action::new("print", None, "print('init')".to_string())],
                    },
                    EventConfig {
                        element: 1,
                        event_type: EventType::Press.code(),
                        actions: vec![Action::new("print", None, "print('button')".to_string())],
                    },
                ],
            }],
        }
    }

    #[test]
    fn round_trip_preserves_non_default_actions() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ConfigRepo::new(dir.path());
        let config = non_default_config(Position::new(0, 0));

        repo.write(std::slice::from_ref(&config)).unwrap();

        let module_dirs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(module_dirs.len(), 1);
        let module_dir = module_dirs.into_iter().next().unwrap().unwrap().path();
        let lua_files: Vec<_> = std::fs::read_dir(&module_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|ext| ext == "lua").unwrap_or(false))
            .collect();
        assert_eq!(lua_files.len(), 1, "only page-0.lua should be written");

        let read_back = repo.read().unwrap();
        assert_eq!(read_back.len(), 1);
        let page0 = &read_back[0].pages[0];
        let init = page0.events.iter().find(|e| e.element == 0 && e.event_type == EventType::Init.code()).unwrap();
        assert_eq!(init.actions[0].script, "print('init')");
        let press = page0.events.iter().find(|e| e.element == 1 && e.event_type == EventType::Press.code()).unwrap();
        assert_eq!(press.actions[0].script, "print('button')");
    }

    #[test]
    fn all_default_page_is_skipped_and_pages_list_is_zero_only() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ConfigRepo::new(dir.path());
        let mut config = non_default_config(Position::new(0, 0));
        // Page 1 carries only default-valued events.
        config.pages.push(PageConfig {
            page: 1,
            events: vec![EventConfig {
                element: 0,
                event_type: EventType::Init.code(),
                actions: Vec::new(),
            }],
        });

        repo.write(std::slice::from_ref(&config)).unwrap();
        let read_back = repo.read().unwrap();
        assert_eq!(read_back[0].pages.len(), 1);
        assert_eq!(read_back[0].pages[0].page, 0);
    }

    #[test]
    fn empty_module_writes_sentinel_page() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ConfigRepo::new(dir.path());
        let config = ModuleConfig {
            module: test_module(Position::new(0, 0)),
            pages: vec![PageConfig {
                page: 0,
                events: vec![EventConfig {
                    element: 0,
                    event_type: EventType::Init.code(),
                    actions: Vec::new(),
                }],
            }],
        };

        repo.write(std::slice::from_ref(&config)).unwrap();
        let read_back = repo.read().unwrap();
        assert_eq!(read_back[0].pages.len(), 1);
        assert_eq!(read_back[0].pages[0].page, 0);
    }

    #[test]
    fn rejects_unsafe_module_type_path_component() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ConfigRepo::new(dir.path());
        let mut config = non_default_config(Position::new(0, 0));
        config.module.type_name = "../escape".to_string();
        assert!(repo.write(std::slice::from_ref(&config)).is_err());
    }

    #[test]
    fn validate_flags_duplicate_and_unsupported_events() {
        let mut config = non_default_config(Position::new(0, 0));
        config.pages[0].events.push(EventConfig {
            element: 0,
            event_type: EventType::Init.code(),
            actions: Vec::new(),
        });
        config.pages[0].events.push(EventConfig {
            element: 0,
            event_type: EventType::Draw.code(),
            actions: Vec::new(),
        });
        let issues = validate_module_config(&config);
        assert!(issues.len() >= 2);
    }
}
