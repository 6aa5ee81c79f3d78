//! Rule evaluation for tool calls.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use super::glob::glob_match;
use crate::config::Server;

/// Outcome of evaluating one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    /// Index of the matching rule; `-1` when the default applied.
    pub matched_rule: i32,
    pub reason: String,
}

/// Evaluates tool calls against one server's ordered policy rules.
///
/// The engine is total: it never fails, suspends, or allocates beyond the
/// decision it returns. It is read-only after construction.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    server: Server,
}

impl PolicyEngine {
    pub fn new(server: Server) -> Self {
        Self { server }
    }

    /// Check whether a tool call with the given arguments is allowed.
    ///
    /// Rules are evaluated top-down; the first rule whose tool name is
    /// exact-equal and whose `when` clauses all hold wins, regardless of any
    /// later rule. With no match the server default applies.
    pub fn evaluate(&self, tool: &str, arguments: &Map<String, Value>) -> Decision {
        for (index, rule) in self.server.rules.iter().enumerate() {
            if rule.tool != tool {
                continue;
            }
            if !when_matches(&rule.when, arguments) {
                continue;
            }
            let reason = if rule.allow {
                format!("matched rule {index}")
            } else {
                format!("denied by rule {index}")
            };
            return Decision {
                allow: rule.allow,
                matched_rule: index as i32,
                reason,
            };
        }

        let allow = self.server.default == "allow";
        Decision {
            allow,
            matched_rule: -1,
            reason: format!("no matching rule, using default: {}", self.server.default),
        }
    }

    /// Tool names carrying at least one `allow: true` rule.
    ///
    /// Drives tools/list filtering. A tool mentioned only in deny rules is
    /// excluded even under `default: allow`.
    pub fn allowed_tools(&self) -> BTreeSet<String> {
        self.server
            .rules
            .iter()
            .filter(|rule| rule.allow)
            .map(|rule| rule.tool.clone())
            .collect()
    }
}

/// All `when` clauses must hold: the argument exists and its stringified
/// value matches the glob. An empty `when` always holds.
fn when_matches(when: &BTreeMap<String, String>, arguments: &Map<String, Value>) -> bool {
    when.iter().all(|(key, pattern)| {
        arguments
            .get(key)
            .is_some_and(|value| glob_match(pattern, &stringify(value)))
    })
}

/// Canonical text form of an argument value: strings bare, scalars in their
/// JSON rendering, arrays and objects as canonical JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rule;
    use serde_json::json;

    fn server(default: &str, rules: Vec<Rule>) -> Server {
        Server {
            command: "test-server".to_string(),
            args: Vec::new(),
            secrets: None,
            default: default.to_string(),
            rules,
        }
    }

    fn rule(tool: &str, allow: bool, when: &[(&str, &str)]) -> Rule {
        Rule {
            tool: tool.to_string(),
            allow,
            when: when
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn allows_by_rule_with_matching_when() {
        let engine = PolicyEngine::new(server(
            "deny",
            vec![rule("read_file", true, &[("path", "/public/**")])],
        ));

        let decision = engine.evaluate("read_file", &args(&[("path", json!("/public/a.md"))]));
        assert!(decision.allow);
        assert_eq!(decision.matched_rule, 0);
        assert_eq!(decision.reason, "matched rule 0");
    }

    #[test]
    fn falls_back_to_default_deny() {
        let engine = PolicyEngine::new(server(
            "deny",
            vec![rule("read_file", true, &[("path", "/public/**")])],
        ));

        let decision = engine.evaluate("read_file", &args(&[("path", json!("/private/x"))]));
        assert!(!decision.allow);
        assert_eq!(decision.matched_rule, -1);
        assert_eq!(decision.reason, "no matching rule, using default: deny");
    }

    #[test]
    fn falls_back_to_default_allow() {
        let engine = PolicyEngine::new(server("allow", vec![]));

        let decision = engine.evaluate("anything", &Map::new());
        assert!(decision.allow);
        assert_eq!(decision.matched_rule, -1);
        assert_eq!(decision.reason, "no matching rule, using default: allow");
    }

    #[test]
    fn first_match_wins() {
        let engine = PolicyEngine::new(server(
            "deny",
            vec![
                rule("write_file", false, &[("path", "/protected/**")]),
                rule("write_file", true, &[]),
            ],
        ));

        let denied = engine.evaluate("write_file", &args(&[("path", json!("/protected/x"))]));
        assert!(!denied.allow);
        assert_eq!(denied.matched_rule, 0);
        assert_eq!(denied.reason, "denied by rule 0");

        let allowed = engine.evaluate("write_file", &args(&[("path", json!("/tmp/y"))]));
        assert!(allowed.allow);
        assert_eq!(allowed.matched_rule, 1);
        assert_eq!(allowed.reason, "matched rule 1");
    }

    #[test]
    fn later_allow_cannot_override_earlier_deny() {
        let engine = PolicyEngine::new(server(
            "allow",
            vec![rule("shell", false, &[]), rule("shell", true, &[])],
        ));

        let decision = engine.evaluate("shell", &Map::new());
        assert!(!decision.allow);
        assert_eq!(decision.matched_rule, 0);
    }

    #[test]
    fn skips_rules_for_other_tools() {
        let engine = PolicyEngine::new(server("deny", vec![rule("read_file", true, &[])]));

        let decision = engine.evaluate("write_file", &Map::new());
        assert!(!decision.allow);
        assert_eq!(decision.matched_rule, -1);
    }

    #[test]
    fn missing_argument_fails_the_when_clause() {
        let engine = PolicyEngine::new(server(
            "deny",
            vec![rule("read_file", true, &[("path", "**")])],
        ));

        let decision = engine.evaluate("read_file", &Map::new());
        assert!(!decision.allow);
        assert_eq!(decision.matched_rule, -1);
    }

    #[test]
    fn all_when_clauses_are_conjoined() {
        let engine = PolicyEngine::new(server(
            "deny",
            vec![rule(
                "query",
                true,
                &[("table", "public_*"), ("mode", "read")],
            )],
        ));

        let both = args(&[("table", json!("public_users")), ("mode", json!("read"))]);
        assert!(engine.evaluate("query", &both).allow);

        let one = args(&[("table", json!("public_users")), ("mode", json!("write"))]);
        assert!(!engine.evaluate("query", &one).allow);
    }

    #[test]
    fn non_string_arguments_are_stringified() {
        let engine = PolicyEngine::new(server(
            "deny",
            vec![
                rule("set_limit", true, &[("count", "42")]),
                rule("toggle", true, &[("enabled", "true")]),
            ],
        ));

        assert!(
            engine
                .evaluate("set_limit", &args(&[("count", json!(42))]))
                .allow
        );
        assert!(
            !engine
                .evaluate("set_limit", &args(&[("count", json!(43))]))
                .allow
        );
        assert!(
            engine
                .evaluate("toggle", &args(&[("enabled", json!(true))]))
                .allow
        );
    }

    #[test]
    fn stringify_uses_canonical_json_for_composites() {
        assert_eq!(stringify(&json!("plain")), "plain");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(null)), "null");
        assert_eq!(stringify(&json!(["a", 1])), r#"["a",1]"#);
        assert_eq!(stringify(&json!({"k": "v"})), r#"{"k":"v"}"#);
    }

    #[test]
    fn allowed_tools_collects_allow_rules_only() {
        let engine = PolicyEngine::new(server(
            "allow",
            vec![
                rule("read_file", true, &[("path", "/public/**")]),
                rule("read_file", true, &[("path", "/docs/**")]),
                rule("write_file", false, &[]),
                rule("list_directory", true, &[]),
            ],
        ));

        let allowed = engine.allowed_tools();
        assert_eq!(
            allowed.into_iter().collect::<Vec<_>>(),
            vec!["list_directory", "read_file"]
        );
    }

    #[test]
    fn allowed_tools_empty_when_only_deny_rules() {
        let engine = PolicyEngine::new(server("allow", vec![rule("shell", false, &[])]));
        assert!(engine.allowed_tools().is_empty());
    }
}
