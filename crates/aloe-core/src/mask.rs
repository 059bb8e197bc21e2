use regex::Regex;

use crate::config::MaskConfig;
use crate::error::AloeError;

/// Compiled form of [`MaskConfig`].
#[derive(Debug, Clone)]
pub struct Masker {
    rules: Vec<(String, Regex)>,
    placeholder: String,
    max_len: usize,
}

impl Masker {
    /// Compile every rule. A bad regex is a configuration error naming the rule.
    pub fn new(cfg: &MaskConfig) -> Result<Self, AloeError> {
        let mut rules = Vec::with_capacity(cfg.rules.len());
        for rule in &cfg.rules {
            let re = Regex::new(&rule.regex)
                .map_err(|e| AloeError::Config(format!("mask rule '{}': {e}", rule.name)))?;
            rules.push((rule.name.clone(), re));
        }
        if cfg.max_pattern_len == 0 {
            return Err(AloeError::Config("mask.max_pattern_len must be > 0".into()));
        }
        Ok(Self {
            rules,
            placeholder: cfg.placeholder.clone(),
            max_len: cfg.max_pattern_len,
        })
    }

    /// Lower-case, replace volatile tokens, collapse whitespace, truncate.
    pub fn mask(&self, message: &str) -> String {
        let mut out = message.to_lowercase();
        for (_, re) in &self.rules {
            if re.is_match(&out) {
                out = re.replace_all(&out, self.placeholder.as_str()).into_owned();
            }
        }
        let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
        truncate_chars(collapsed, self.max_len)
    }

    /// True when nothing but placeholders, punctuation and whitespace remains.
    pub fn is_empty_pattern(&self, pattern: &str) -> bool {
        let stripped = if self.placeholder.is_empty() {
            pattern.to_string()
        } else {
            pattern.replace(&self.placeholder, " ")
        };
        !stripped.chars().any(char::is_alphanumeric)
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(n, _)| n.as_str())
    }
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s,
    }
}
