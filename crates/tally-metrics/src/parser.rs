//! Parser for the text exposition format produced by [`crate::encoder`] and
//! by other Prometheus-compatible exporters.

use std::{iter::Peekable, str::CharIndices};

use tally_common::error::{Result, TallyError};

use crate::registry::{is_valid_label_name, is_valid_metric_name};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

/// Parse a complete payload. A single malformed line rejects the payload.
pub fn parse(payload: &str) -> Result<Vec<ParsedSample>> {
    let mut samples = Vec::new();

    for (index, raw_line) in payload.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let sample = parse_line(line).map_err(|message| TallyError::Parse {
            line: index + 1,
            message,
        })?;
        samples.push(sample);
    }

    Ok(samples)
}

fn parse_line(line: &str) -> std::result::Result<ParsedSample, String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| "sample has no value".to_string())?;
    let name = &line[..name_end];
    if !is_valid_metric_name(name) {
        return Err(format!("invalid metric name {name:?}"));
    }

    let mut rest = &line[name_end..];
    let mut labels = Vec::new();
    if rest.starts_with('{') {
        let consumed = parse_labels(rest, &mut labels)?;
        rest = &rest[consumed..];
    }

    if !rest.starts_with(char::is_whitespace) {
        return Err("expected whitespace before value".to_string());
    }

    let mut fields = rest.split_whitespace();
    let value = fields
        .next()
        .ok_or_else(|| "sample has no value".to_string())
        .and_then(parse_value)?;
    let timestamp_ms = match fields.next() {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| format!("invalid timestamp {raw:?}"))?,
        ),
        None => None,
    };
    if let Some(extra) = fields.next() {
        return Err(format!("unexpected trailing token {extra:?}"));
    }

    Ok(ParsedSample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

/// Parses `{...}` at the start of `input` and returns the number of bytes
/// consumed, closing brace included.
fn parse_labels(
    input: &str,
    labels: &mut Vec<(String, String)>,
) -> std::result::Result<usize, String> {
    let mut chars = input.char_indices().peekable();
    chars.next();

    loop {
        skip_whitespace(&mut chars);
        match chars.peek() {
            Some(&(position, '}')) => return Ok(position + 1),
            Some(_) => {}
            None => return Err("unterminated label set".to_string()),
        }

        let mut label_name = String::new();
        while let Some(&(_, c)) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            label_name.push(c);
            chars.next();
        }
        if !is_valid_label_name(&label_name) {
            return Err(format!("invalid label name {label_name:?}"));
        }

        skip_whitespace(&mut chars);
        if !matches!(chars.next(), Some((_, '='))) {
            return Err(format!("expected '=' after label {label_name}"));
        }
        skip_whitespace(&mut chars);
        if !matches!(chars.next(), Some((_, '"'))) {
            return Err(format!("expected quoted value for label {label_name}"));
        }

        let mut label_value = String::new();
        loop {
            match chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => label_value.push('\n'),
                    Some((_, '\\')) => label_value.push('\\'),
                    Some((_, '"')) => label_value.push('"'),
                    Some((_, other)) => {
                        return Err(format!("invalid escape \\{other} in label {label_name}"));
                    }
                    None => return Err("unterminated label value".to_string()),
                },
                Some((_, c)) => label_value.push(c),
                None => return Err("unterminated label value".to_string()),
            }
        }

        if labels.iter().any(|(existing, _)| *existing == label_name) {
            return Err(format!("duplicate label {label_name}"));
        }
        labels.push((label_name, label_value));

        skip_whitespace(&mut chars);
        match chars.next() {
            Some((_, ',')) => continue,
            Some((position, '}')) => return Ok(position + 1),
            _ => return Err("expected ',' or '}' after label value".to_string()),
        }
    }
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
}

fn parse_value(raw: &str) -> std::result::Result<f64, String> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw
            .parse::<f64>()
            .map_err(|_| format!("invalid sample value {raw:?}")),
    }
}
