//! Glob-based metric filtering
//!
//! Filters are configured per source, per converter and per sink with the
//! same [`FilterConfig`] shape:
//! - metric name allow/deny lists
//! - per-tag-key allow/deny lists on tag values
//! - tag include/exclude lists that strip tags from accepted metrics
//!
//! `*` matches any run of characters including `.` and `/`, and `{a,b}`
//! alternation is supported.

mod glob;

#[cfg(test)]
mod tests;

pub use glob::{compile, GlobFilter, Matcher};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declarative filter settings
///
/// The older `*_whitelist` / `*_blacklist` spellings are still accepted; when
/// both spellings are set the allow/deny lists take precedence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    #[serde(alias = "metricAllowList")]
    pub metric_allow_list: Vec<String>,

    #[serde(alias = "metricDenyList")]
    pub metric_deny_list: Vec<String>,

    /// Tag key -> patterns; a metric must match at least one configured key
    #[serde(alias = "metricTagAllowList")]
    pub metric_tag_allow_list: HashMap<String, Vec<String>>,

    /// Tag key -> patterns; a metric matching any configured key is dropped
    #[serde(alias = "metricTagDenyList")]
    pub metric_tag_deny_list: HashMap<String, Vec<String>>,

    /// Tag keys to keep on accepted metrics
    #[serde(alias = "tagInclude")]
    pub tag_include: Vec<String>,

    /// Tag keys to remove from accepted metrics
    #[serde(alias = "tagExclude")]
    pub tag_exclude: Vec<String>,

    #[serde(alias = "metricWhitelist", skip_serializing_if = "Vec::is_empty")]
    pub metric_whitelist: Vec<String>,

    #[serde(alias = "metricBlacklist", skip_serializing_if = "Vec::is_empty")]
    pub metric_blacklist: Vec<String>,

    #[serde(alias = "metricTagWhitelist", skip_serializing_if = "HashMap::is_empty")]
    pub metric_tag_whitelist: HashMap<String, Vec<String>>,

    #[serde(alias = "metricTagBlacklist", skip_serializing_if = "HashMap::is_empty")]
    pub metric_tag_blacklist: HashMap<String, Vec<String>>,
}

impl FilterConfig {
    pub fn allow_list(&self) -> &[String] {
        prefer(&self.metric_allow_list, &self.metric_whitelist)
    }

    pub fn deny_list(&self) -> &[String] {
        prefer(&self.metric_deny_list, &self.metric_blacklist)
    }

    pub fn tag_allow_list(&self) -> &HashMap<String, Vec<String>> {
        if self.metric_tag_allow_list.is_empty() {
            &self.metric_tag_whitelist
        } else {
            &self.metric_tag_allow_list
        }
    }

    pub fn tag_deny_list(&self) -> &HashMap<String, Vec<String>> {
        if self.metric_tag_deny_list.is_empty() {
            &self.metric_tag_blacklist
        } else {
            &self.metric_tag_deny_list
        }
    }

    /// True when no list of any spelling is set
    pub fn is_empty(&self) -> bool {
        self.allow_list().is_empty()
            && self.deny_list().is_empty()
            && self.tag_allow_list().is_empty()
            && self.tag_deny_list().is_empty()
            && self.tag_include.is_empty()
            && self.tag_exclude.is_empty()
    }
}

fn prefer<'a>(current: &'a [String], deprecated: &'a [String]) -> &'a [String] {
    if current.is_empty() {
        deprecated
    } else {
        current
    }
}
