use super::{OutputError, SecretData};
use crate::config::SecretDefinition;
use std::fmt::Write as _;
use std::io::Write as _;
use std::collections::BTreeSet;
use std::path::{Component, Path};
use tracing::debug;

/// Decoded key/value pairs ready to be written.
pub type DecodedData = Vec<(String, Vec<u8>)>;

/// Append a dotenv block for one secret to `definition.destination`.
///
/// The file is opened in append mode so several secrets can share one
/// destination; existing content is never truncated.
pub fn write_dotenv(definition: &SecretDefinition, data: &DecodedData) -> Result<(), OutputError> {
    let destination = Path::new(&definition.destination);
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| OutputError::io(parent, e))?;
    }

    let block = render_dotenv_block(&definition.name, data);

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(destination)
        .map_err(|e| OutputError::io(destination, e))?;
    file.write_all(block.as_bytes())
        .map_err(|e| OutputError::io(destination, e))?;

    debug!("Appended {} key(s) to {}", data.len(), destination.display());
    Ok(())
}

/// Write one file per key into the `definition.destination` directory.
pub fn write_files(definition: &SecretDefinition, data: &DecodedData) -> Result<(), OutputError> {
    let destination = Path::new(&definition.destination);
    if !destination.exists() {
        std::fs::create_dir_all(destination).map_err(|e| OutputError::io(destination, e))?;
    }
    if !destination.is_dir() {
        return Err(OutputError::NotADirectory(destination.to_path_buf()));
    }
    if let Some((key, _)) = data.iter().find(|(key, _)| !is_plain_file_name(key)) {
        return Err(OutputError::InvalidFileKey {
            secret: definition.name.clone(),
            key: key.clone(),
        });
    }

    for (key, value) in data {
        let target = destination.join(key);
        std::fs::write(&target, value).map_err(|e| OutputError::io(&target, e))?;
    }

    debug!("Wrote {} file(s) to {}", data.len(), destination.display());
    Ok(())
}

/// A single normal path component: no separators, no `.`/`..`, not absolute.
fn is_plain_file_name(key: &str) -> bool {
    if key.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(key).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Remove blocks previously written for `names` from a dotenv file.
///
/// Everything else in the file is left untouched. Returns whether the file
/// changed; a missing file is not an error.
pub fn remove_dotenv_blocks(destination: &Path, names: &BTreeSet<&str>) -> Result<bool, OutputError> {
    let content = match std::fs::read_to_string(destination) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(OutputError::io(destination, e)),
    };

    let stripped = strip_dotenv_blocks(&content, names);
    if stripped == content {
        return Ok(false);
    }

    std::fs::write(destination, stripped).map_err(|e| OutputError::io(destination, e))?;
    debug!("Removed previous secret blocks from {}", destination.display());
    Ok(true)
}

/// Drop every `render_dotenv_block` output whose source name is in `names`.
pub fn strip_dotenv_blocks(content: &str, names: &BTreeSet<&str>) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut kept = Vec::with_capacity(lines.len());

    let mut i = 0;
    while i < lines.len() {
        if lines[i].is_empty() && block_header_at(&lines[i + 1..], names) {
            i += 4;
            while i < lines.len() && is_value_line(lines[i]) {
                i += 1;
            }
            continue;
        }
        kept.push(lines[i]);
        i += 1;
    }

    kept.join("\n")
}

fn block_header_at(lines: &[&str], names: &BTreeSet<&str>) -> bool {
    let [rule, header, closing, ..] = lines else {
        return false;
    };
    let is_rule = !rule.is_empty() && rule.chars().all(|c| c == '#');
    let name = header
        .strip_prefix("# Secret source: ")
        .and_then(|rest| rest.strip_suffix(" #"));

    is_rule
        && rule == closing
        && rule.len() == header.len()
        && name.is_some_and(|name| names.contains(name))
}

/// A `KEY="value"` line as written by `render_dotenv_block`.
fn is_value_line(line: &str) -> bool {
    line.split_once('=')
        .is_some_and(|(key, value)| !key.is_empty() && value.len() >= 2 && value.starts_with('"') && value.ends_with('"'))
}

/// Header plus `KEY="value"` lines for one secret.
pub fn render_dotenv_block(name: &str, data: &DecodedData) -> String {
    let header = format!("Secret source: {name}");
    let rule = "#".repeat(header.len() + 4);

    let mut out = format!("\n{rule}\n# {header} #\n{rule}\n");
    for (key, value) in data {
        let _ = writeln!(out, "{key}={}", quote(value));
    }
    out
}

/// Double-quote a value, escaping quotes, backslashes, control characters
/// and bytes that are not valid UTF-8.
pub fn quote(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');

    let mut rest = value;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                escape_str(valid, &mut out);
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                // `valid` was just checked by from_utf8.
                escape_str(std::str::from_utf8(valid).unwrap_or_default(), &mut out);
                let bad_len = e.error_len().unwrap_or(after.len());
                for byte in &after[..bad_len] {
                    let _ = write!(out, "\\x{byte:02x}");
                }
                rest = &after[bad_len..];
            }
        }
    }

    out.push('"');
    out
}

fn escape_str(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{0b}' => out.push_str("\\v"),
            c if c.is_control() && (c as u32) < 0x80 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}

/// Apply a definition's key mapping. An empty mapping keeps every key.
pub fn map_keys(data: SecretData, definition: &SecretDefinition) -> Result<SecretData, OutputError> {
    if definition.mapping.is_empty() {
        return Ok(data);
    }

    definition
        .mapping
        .iter()
        .map(|(output_key, source_key)| {
            data.get(source_key)
                .map(|value| (output_key.clone(), value.clone()))
                .ok_or_else(|| OutputError::MissingMappedKey {
                    secret: definition.name.clone(),
                    key: source_key.clone(),
                })
        })
        .collect()
}
