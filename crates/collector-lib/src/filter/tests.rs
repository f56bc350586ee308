use super::*;
use std::collections::HashMap;

fn tags(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn filter(config: FilterConfig) -> GlobFilter {
    GlobFilter::new(&config).unwrap()
}

#[test]
fn test_compile_empty_yields_none() {
    assert!(compile(&[]).unwrap().is_none());
}

#[test]
fn test_compile_multiple_patterns() {
    let m = compile(&strings(&["kubernetes.pod.*", "kubernetes.node.cpu.*"]))
        .unwrap()
        .unwrap();
    assert!(m.is_match("kubernetes.pod.memory.usage"));
    assert!(m.is_match("kubernetes.node.cpu.usage_rate"));
    assert!(!m.is_match("kubernetes.node.memory.usage"));
}

#[test]
fn test_compile_patterns_with_their_own_alternation() {
    let m = compile(&strings(&["a.{x,y}", "b.*"])).unwrap().unwrap();
    assert!(m.is_match("a.x"));
    assert!(m.is_match("b.anything/at/all"));
    assert!(!m.is_match("a.z"));
}

#[test]
fn test_invalid_pattern_is_an_error() {
    let config = FilterConfig {
        metric_allow_list: strings(&["foo[", "bar"]),
        ..Default::default()
    };
    let err = GlobFilter::new(&config).unwrap_err();
    assert!(err.to_string().contains("foo["));
}

#[test]
fn test_glob_syntax() {
    let m = compile(&strings(&["pod.?", "node.[!0-9]*", "ns.{a,{b,c}d}", "lit\\*al"]))
        .unwrap()
        .unwrap();
    assert!(m.is_match("pod.x"));
    assert!(!m.is_match("pod.xy"));
    assert!(m.is_match("node.cpu"));
    assert!(!m.is_match("node.1cpu"));
    assert!(m.is_match("ns.a"));
    assert!(m.is_match("ns.cd"));
    assert!(!m.is_match("ns.c"));
    assert!(m.is_match("lit*al"));
    assert!(!m.is_match("litteral"));
}

#[test]
fn test_regex_metacharacters_are_literal() {
    let m = compile(&strings(&["cpu.usage+rate", "(x)|y"])).unwrap().unwrap();
    assert!(m.is_match("cpu.usage+rate"));
    assert!(!m.is_match("cpu_usagerate"));
    assert!(m.is_match("(x)|y"));
    assert!(!m.is_match("y"));
}

#[test]
fn test_unclosed_alternation_is_an_error() {
    let err = compile(&strings(&["ok.*", "a.{x,y"])).unwrap_err();
    assert!(err.to_string().contains("a.{x,y"));
}

#[test]
fn test_star_crosses_separators() {
    let f = filter(FilterConfig {
        metric_allow_list: strings(&["kubernetes.*"]),
        ..Default::default()
    });
    assert!(f.matches("kubernetes.pod_container/cpu/usage_rate", &mut HashMap::new()));
}

#[test]
fn test_metric_allow_list() {
    let f = filter(FilterConfig {
        metric_allow_list: strings(&["foo"]),
        ..Default::default()
    });
    assert!(!f.matches("foobar", &mut HashMap::new()));
    assert!(f.matches("foo", &mut HashMap::new()));

    let f = filter(FilterConfig {
        metric_allow_list: strings(&["foo*"]),
        ..Default::default()
    });
    assert!(f.matches("foobar", &mut HashMap::new()));
}

#[test]
fn test_metric_deny_list() {
    let f = filter(FilterConfig {
        metric_deny_list: strings(&["foo"]),
        ..Default::default()
    });
    assert!(f.matches("foobar", &mut HashMap::new()));

    let f = filter(FilterConfig {
        metric_deny_list: strings(&["foo*"]),
        ..Default::default()
    });
    assert!(!f.matches("foobar", &mut HashMap::new()));
}

#[test]
fn test_tag_allow_list_matches_any_key() {
    let f = filter(FilterConfig {
        metric_tag_allow_list: HashMap::from([
            ("env".to_string(), strings(&["?rod1*", "prod2*"])),
            ("type".to_string(), strings(&["pod", "service"])),
            ("node".to_string(), strings(&["10.2.*", "10.3.*"])),
        ]),
        ..Default::default()
    });

    assert!(!f.matches("m", &mut tags(&[("env", "prod")])));
    assert!(f.matches("m", &mut tags(&[("env", "prod234")])));
    assert!(f.matches("m", &mut tags(&[("env", "trod134")])));
    assert!(f.matches("m", &mut tags(&[("type", "service")])));
    assert!(f.matches("m", &mut tags(&[("node", "10.2.45.2")])));
    assert!(!f.matches("m", &mut tags(&[("bar", "foo")])));
}

#[test]
fn test_tag_deny_list() {
    let f = filter(FilterConfig {
        metric_tag_deny_list: HashMap::from([("foo".to_string(), strings(&["va*"]))]),
        ..Default::default()
    });
    assert!(f.matches("bar", &mut tags(&[("bar", "foo")])));
    assert!(!f.matches("bar", &mut tags(&[("bar", "foo"), ("foo", "val")])));
}

#[test]
fn test_tag_include_and_exclude() {
    let include = filter(FilterConfig {
        tag_include: strings(&["foo*"]),
        ..Default::default()
    });
    let mut t = tags(&[("foo", "bar"), ("foobar", "x"), ("key1", "val1")]);
    assert!(include.matches("bar", &mut t));
    assert_eq!(t.len(), 2);
    assert!(t.contains_key("foo") && t.contains_key("foobar"));

    let exclude = filter(FilterConfig {
        tag_exclude: strings(&["foo*"]),
        ..Default::default()
    });
    let mut t = tags(&[("foo", "bar"), ("foobar", "x"), ("key1", "val1")]);
    assert!(exclude.matches("bar", &mut t));
    assert_eq!(t, tags(&[("key1", "val1")]));
}

#[test]
fn test_rejected_metric_keeps_its_tags() {
    let f = filter(FilterConfig {
        metric_deny_list: strings(&["drop.*"]),
        tag_exclude: strings(&["*"]),
        ..Default::default()
    });
    let mut t = tags(&[("a", "1")]);
    assert!(!f.matches("drop.me", &mut t));
    assert_eq!(t.len(), 1);
}

#[test]
fn test_matching_is_idempotent() {
    let f = filter(FilterConfig {
        metric_allow_list: strings(&["kubernetes.*"]),
        tag_exclude: strings(&["pod_id", "host_id"]),
        ..Default::default()
    });
    let mut t = tags(&[("pod_id", "1"), ("host_id", "2"), ("cluster", "c")]);
    assert!(f.matches("kubernetes.pod.cpu", &mut t));
    let after_first = t.clone();
    assert!(f.matches("kubernetes.pod.cpu", &mut t));
    assert_eq!(t, after_first);
}

#[test]
fn test_from_config_empty_is_none() {
    assert!(GlobFilter::from_config(&FilterConfig::default())
        .unwrap()
        .is_none());

    let f = GlobFilter::from_config(&FilterConfig {
        tag_include: strings(&["cluster"]),
        ..Default::default()
    })
    .unwrap()
    .unwrap();
    assert!(f.uses_tags());
}

#[test]
fn test_deprecated_spellings() {
    let config: FilterConfig = serde_json::from_value(serde_json::json!({
        "metricWhitelist": ["kubernetes.*"],
        "metricBlacklist": ["kubernetes.sys.*"],
        "metricTagBlacklist": {"env": ["dev"]}
    }))
    .unwrap();
    assert!(!config.is_empty());

    let f = filter(config);
    assert!(f.matches("kubernetes.pod.cpu", &mut HashMap::new()));
    assert!(!f.matches("kubernetes.sys.cpu", &mut HashMap::new()));
    assert!(!f.matches("kubernetes.pod.cpu", &mut tags(&[("env", "dev")])));
    assert!(!f.matches("other", &mut HashMap::new()));
}

#[test]
fn test_new_spelling_wins_over_deprecated() {
    let config = FilterConfig {
        metric_allow_list: strings(&["new.*"]),
        metric_whitelist: strings(&["old.*"]),
        ..Default::default()
    };
    let f = filter(config);
    assert!(f.matches("new.metric", &mut HashMap::new()));
    assert!(!f.matches("old.metric", &mut HashMap::new()));
}
