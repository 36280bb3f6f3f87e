use std::fmt;

use regex::Regex;

/// Glob over variable keys: `*` matches any run of characters, `?` exactly one.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    compiled: Regex,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        Ok(Self {
            source: pattern.to_string(),
            compiled: Regex::new(&expr)?,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.compiled.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiles every pattern; the first invalid one is returned as the error.
pub fn compile_all<'a, I>(patterns: I) -> Result<Vec<KeyPattern>, (String, regex::Error)>
where
    I: IntoIterator<Item = &'a String>,
{
    patterns
        .into_iter()
        .map(|pattern| KeyPattern::new(pattern).map_err(|err| (pattern.clone(), err)))
        .collect()
}

pub fn any_match(patterns: &[KeyPattern], key: &str) -> bool {
    patterns.iter().any(|pattern| pattern.matches(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_and_suffix_wildcards() {
        let suffix = KeyPattern::new("*_SECRET").unwrap();
        assert!(suffix.matches("SESSION_SECRET"));
        assert!(!suffix.matches("SECRET_SESSION"));

        let prefix = KeyPattern::new("API_*").unwrap();
        assert!(prefix.matches("API_TOKEN"));
        assert!(!prefix.matches("MY_API_TOKEN"));
    }

    #[test]
    fn literal_characters_are_escaped() {
        let pattern = KeyPattern::new("A.B").unwrap();
        assert!(pattern.matches("A.B"));
        assert!(!pattern.matches("AXB"));
        let single = KeyPattern::new("DB?").unwrap();
        assert!(single.matches("DB1"));
        assert!(!single.matches("DB12"));
    }
}
