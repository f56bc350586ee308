use super::FilterConfig;
use crate::error::{CollectorError, Result};
use regex::Regex;
use std::collections::HashMap;

/// A compiled list of glob patterns
///
/// Every pattern of a list is translated and joined into one anchored
/// regular expression, so a list costs a single match per value.
#[derive(Debug, Clone)]
pub struct Matcher(Regex);

impl Matcher {
    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> CollectorError {
    CollectorError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

/// Translate one glob into regex syntax
///
/// Supports `*`, `?`, `[...]` classes (`!` negates), `{a,b}` alternation
/// (nestable) and `\` escapes. Everything else is literal.
fn translate(pattern: &str) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut depth = 0usize;
    let mut chars = pattern.chars();
    let mut buf = [0u8; 4];

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                let mut first = true;
                loop {
                    let Some(c) = chars.next() else {
                        return Err("unclosed character class".to_string());
                    };
                    match c {
                        ']' if !first => break,
                        '!' | '^' if first => out.push('^'),
                        '[' | ']' | '&' | '~' | '\\' | '^' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                    first = false;
                }
                out.push(']');
            }
            '{' => {
                depth += 1;
                out.push_str("(?:");
            }
            '}' if depth > 0 => {
                depth -= 1;
                out.push(')');
            }
            ',' if depth > 0 => out.push('|'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(escaped.encode_utf8(&mut buf))),
                None => return Err("dangling escape".to_string()),
            },
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }

    if depth > 0 {
        return Err("unclosed alternation".to_string());
    }
    Ok(out)
}

/// Compile a pattern list into a single matcher
///
/// An empty list yields no matcher at all.
pub fn compile(patterns: &[String]) -> Result<Option<Matcher>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    // translate individually so errors name the offending pattern
    let alternatives = patterns
        .iter()
        .map(|p| translate(p).map_err(|reason| invalid(p, reason)))
        .collect::<Result<Vec<_>>>()?;

    let joined = format!("(?s)^(?:{})$", alternatives.join("|"));
    let regex = Regex::new(&joined).map_err(|e| invalid(&patterns.join(","), e.to_string()))?;
    Ok(Some(Matcher(regex)))
}

fn compile_per_key(lists: &HashMap<String, Vec<String>>) -> Result<HashMap<String, Matcher>> {
    let mut out = HashMap::with_capacity(lists.len());
    for (key, patterns) in lists {
        if let Some(m) = compile(patterns)? {
            out.insert(key.clone(), m);
        }
    }
    Ok(out)
}

/// Allow/deny filter over metric names and tags
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    metric_allow: Option<Matcher>,
    metric_deny: Option<Matcher>,
    tag_allow: HashMap<String, Matcher>,
    tag_deny: HashMap<String, Matcher>,
    tag_include: Option<Matcher>,
    tag_exclude: Option<Matcher>,
}

impl GlobFilter {
    /// Compile every list of `config`
    pub fn new(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            metric_allow: compile(config.allow_list())?,
            metric_deny: compile(config.deny_list())?,
            tag_allow: compile_per_key(config.tag_allow_list())?,
            tag_deny: compile_per_key(config.tag_deny_list())?,
            tag_include: compile(&config.tag_include)?,
            tag_exclude: compile(&config.tag_exclude)?,
        })
    }

    /// Build a filter, or `None` when the configuration would accept everything
    pub fn from_config(config: &FilterConfig) -> Result<Option<Self>> {
        if config.is_empty() {
            return Ok(None);
        }
        Self::new(config).map(Some)
    }

    /// Decide whether a metric passes, trimming its tags when it does
    ///
    /// Checks run in order: name allow, name deny, tag allow (any configured
    /// key matching is enough), tag deny. Only accepted metrics have their tag
    /// map touched by the include/exclude lists.
    pub fn matches(&self, name: &str, tags: &mut HashMap<String, String>) -> bool {
        if let Some(allow) = &self.metric_allow {
            if !allow.is_match(name) {
                return false;
            }
        }
        if let Some(deny) = &self.metric_deny {
            if deny.is_match(name) {
                return false;
            }
        }
        if !self.tag_allow.is_empty() && !matches_any_tag(&self.tag_allow, tags) {
            return false;
        }
        if !self.tag_deny.is_empty() && matches_any_tag(&self.tag_deny, tags) {
            return false;
        }

        if let Some(include) = &self.tag_include {
            tags.retain(|k, _| include.is_match(k));
        }
        if let Some(exclude) = &self.tag_exclude {
            tags.retain(|k, _| !exclude.is_match(k));
        }
        true
    }

    /// Whether any tag-based rule is configured
    pub fn uses_tags(&self) -> bool {
        !self.tag_allow.is_empty()
            || !self.tag_deny.is_empty()
            || self.tag_include.is_some()
            || self.tag_exclude.is_some()
    }
}

fn matches_any_tag(matchers: &HashMap<String, Matcher>, tags: &HashMap<String, String>) -> bool {
    matchers.iter().any(|(key, matcher)| {
        tags.get(key)
            .map(|value| matcher.is_match(value))
            .unwrap_or(false)
    })
}
