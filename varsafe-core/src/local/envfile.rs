use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct EnvParseError {
    pub line: usize,
    pub message: String,
}

impl EnvParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Dotenv-style `KEY=VALUE` file. Rendering is sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    pub entries: BTreeMap<String, String>,
}

impl EnvFile {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn parse(content: &str) -> Result<Self, EnvParseError> {
        let mut entries = BTreeMap::new();
        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line
                .strip_prefix("export ")
                .map(str::trim_start)
                .unwrap_or(line);
            let Some((key, rest)) = line.split_once('=') else {
                return Err(EnvParseError::new(line_no, "expected KEY=VALUE"));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(EnvParseError::new(line_no, "empty key"));
            }
            if !key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
            {
                return Err(EnvParseError::new(line_no, format!("invalid key {key:?}")));
            }
            let value = parse_value(rest.trim_start()).map_err(|msg| EnvParseError::new(line_no, msg))?;
            entries.insert(key.to_string(), value);
        }
        Ok(Self { entries })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_value(value));
            out.push('\n');
        }
        out
    }
}

fn parse_value(rest: &str) -> Result<String, String> {
    if let Some(body) = rest.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = body.chars();
        loop {
            match chars.next() {
                None => return Err("unterminated double quote".to_string()),
                Some('"') => break,
                Some('\\') => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some('"') => value.push('"'),
                    Some('\\') => value.push('\\'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err("unterminated double quote".to_string()),
                },
                Some(ch) => value.push(ch),
            }
        }
        ensure_trailing_comment(chars.as_str())?;
        return Ok(value);
    }
    if let Some(body) = rest.strip_prefix('\'') {
        let Some(end) = body.find('\'') else {
            return Err("unterminated single quote".to_string());
        };
        ensure_trailing_comment(&body[end + 1..])?;
        return Ok(body[..end].to_string());
    }
    let value = match rest.find(" #").or_else(|| rest.find("\t#")) {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    Ok(value.trim_end().to_string())
}

fn ensure_trailing_comment(tail: &str) -> Result<(), String> {
    let tail = tail.trim();
    if tail.is_empty() || tail.starts_with('#') {
        Ok(())
    } else {
        Err(format!("unexpected characters after quoted value: {tail:?}"))
    }
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|ch| ch.is_whitespace() || matches!(ch, '#' | '"' | '\'' | '\\'));
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_forms() {
        let file = EnvFile::parse(
            r#"
# comment
export PORT=3000
EMPTY=
GREETING="hello world" # trailing
LITERAL='a\nb'
MULTI="line1\nline2"
URL=https://example.com/#anchor
INLINE=value # note
"#,
        )
        .unwrap();
        let get = |key: &str| file.entries.get(key).map(String::as_str);
        assert_eq!(get("PORT"), Some("3000"));
        assert_eq!(get("EMPTY"), Some(""));
        assert_eq!(get("GREETING"), Some("hello world"));
        assert_eq!(get("LITERAL"), Some("a\\nb"));
        assert_eq!(get("MULTI"), Some("line1\nline2"));
        assert_eq!(get("URL"), Some("https://example.com/#anchor"));
        assert_eq!(get("INLINE"), Some("value"));
    }

    #[test]
    fn rejects_malformed_lines() {
        let err = EnvFile::parse("OK=1\nnot a pair\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(EnvFile::parse("A=\"open").is_err());
        assert!(EnvFile::parse("A='x' junk").is_err());
    }

    #[test]
    fn render_is_sorted_and_quotes_when_needed() {
        let mut entries = BTreeMap::new();
        entries.insert("B".to_string(), "has space".to_string());
        entries.insert("A".to_string(), "plain".to_string());
        entries.insert("C".to_string(), "say \"hi\"\n".to_string());
        let rendered = EnvFile::new(entries.clone()).render();
        assert_eq!(
            rendered,
            "A=plain\nB=\"has space\"\nC=\"say \\\"hi\\\"\\n\"\n"
        );
        assert_eq!(EnvFile::parse(&rendered).unwrap().entries, entries);
    }
}
