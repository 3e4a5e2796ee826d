use crate::condition::EnvironmentFacts;
use crate::raw::{EditOp, Provenance, RawConfigData, RawValue};
use crate::ConfigError;

struct PendingOption {
    section: String,
    key: String,
    op: EditOp,
    lines: Vec<String>,
    active: bool,
}

impl PendingOption {
    fn flush(self, data: &mut RawConfigData, origin: &Provenance) {
        if !self.active {
            return;
        }
        let value = self.lines.join("\n").trim().to_owned();
        let section = data.section_mut(&self.section);
        match self.op {
            EditOp::Assign => section.insert(self.key, RawValue::new(value, origin.clone())),
            op => section
                .edits
                .entry(self.key)
                .or_default()
                .push(op, &value, origin),
        }
    }
}

/// Parse configuration text into raw section data.
///
/// Sections gated by a false expression are dropped here, together with
/// any `+=` / `-=` lines they contain.
pub fn parse(
    text: &str,
    origin: &Provenance,
    facts: &EnvironmentFacts,
) -> Result<RawConfigData, ConfigError> {
    let mut data = RawConfigData::new();
    let mut current: Option<(String, bool)> = None;
    let mut pending: Option<PendingOption> = None;

    let parse_error = |line: usize, message: String| ConfigError::Parse {
        origin: origin.to_string(),
        line,
        message,
    };

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;

        if line.trim().is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            match pending.as_mut() {
                Some(p) => p.lines.push(line.trim().to_owned()),
                None => {
                    return Err(parse_error(
                        lineno,
                        "continuation line without an option".to_owned(),
                    ))
                }
            }
            continue;
        }

        if let Some(flushed) = pending.take() {
            flushed.flush(&mut data, origin);
        }

        if let Some(header) = line.strip_prefix('[') {
            let Some((inner, rest)) = header.split_once(']') else {
                return Err(parse_error(lineno, format!("unterminated section header: {line}")));
            };
            let rest = rest.trim();
            if !(rest.is_empty() || rest.starts_with('#') || rest.starts_with(';')) {
                return Err(parse_error(
                    lineno,
                    format!("unexpected text after section header: {rest}"),
                ));
            }
            let (name, expression) = match inner.split_once(':') {
                Some((n, e)) => (n.trim(), Some(e.trim())),
                None => (inner.trim(), None),
            };
            if name.is_empty() {
                return Err(parse_error(lineno, "empty section name".to_owned()));
            }
            let active = match expression {
                Some(expr) => facts.evaluate(expr).map_err(|reason| ConfigError::BadCondition {
                    origin: origin.to_string(),
                    line: lineno,
                    expression: expr.to_owned(),
                    reason,
                })?,
                None => true,
            };
            if active {
                data.section_mut(name);
            } else {
                tracing::debug!("{origin}:{lineno}: section [{name}] skipped by condition");
            }
            current = Some((name.to_owned(), active));
            continue;
        }

        let Some((section, active)) = current.as_ref() else {
            return Err(parse_error(
                lineno,
                format!("option outside of any section: {line}"),
            ));
        };
        let Some((key, value)) = line.split_once('=') else {
            return Err(parse_error(lineno, format!("expected `key = value`: {line}")));
        };
        let key = key.trim_end();
        let (key, op) = if let Some(k) = key.strip_suffix('+') {
            (k.trim_end(), EditOp::Append)
        } else if let Some(k) = key.strip_suffix('-') {
            (k.trim_end(), EditOp::Remove)
        } else {
            (key, EditOp::Assign)
        };
        if key.is_empty() {
            return Err(parse_error(lineno, format!("empty option name: {line}")));
        }
        pending = Some(PendingOption {
            section: section.clone(),
            key: key.to_owned(),
            op,
            lines: vec![value.trim().to_owned()],
            active: *active,
        });
    }

    if let Some(flushed) = pending.take() {
        flushed.flush(&mut data, origin);
    }
    Ok(data)
}
