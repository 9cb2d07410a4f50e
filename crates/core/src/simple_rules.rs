//! Line-oriented rule dialect: `if <field.path> <op> <value> then <action>`.
//!
//! One rule per non-blank, non-comment line. Lines that do not parse
//! are collected rather than discarded so callers can distinguish "no
//! rules" from "rules we could not read".

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    Matches,
}

impl RuleOp {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "==" | "=" | "eq" => Some(Self::Eq),
            "!=" | "ne" => Some(Self::Ne),
            ">" | "gt" => Some(Self::Gt),
            "<" | "lt" => Some(Self::Lt),
            ">=" | "gte" => Some(Self::Gte),
            "<=" | "lte" => Some(Self::Lte),
            "contains" | "includes" => Some(Self::Contains),
            "matches" | "match" => Some(Self::Matches),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
}

impl RuleAction {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "allow" | "approve" | "grant" | "permit" => Some(Self::Allow),
            "deny" | "reject" | "block" | "forbid" => Some(Self::Deny),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimpleRule {
    pub line: usize,
    pub field: String,
    pub op: RuleOp,
    pub value: String,
    pub action: RuleAction,
    /// Trailing text after a deny keyword, surfaced as the denial reason.
    pub message: Option<String>,
    pattern: Option<Regex>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnparsedLine {
    pub line: usize,
    pub text: String,
    pub error: String,
}

/// Result of parsing a source blob. `unparsed` is non-empty when any
/// non-comment line failed to parse.
#[derive(Clone, Debug, Default)]
pub struct RuleSet {
    pub rules: Vec<SimpleRule>,
    pub unparsed: Vec<UnparsedLine>,
}

impl RuleSet {
    /// True when the source contained rule-shaped lines but none parsed.
    pub fn is_unusable(&self) -> bool {
        self.rules.is_empty() && !self.unparsed.is_empty()
    }
}

pub fn parse_rules(source: &str) -> RuleSet {
    let mut set = RuleSet::default();
    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let text = raw_line.trim();
        if text.is_empty() || text.starts_with('#') || text.starts_with("//") {
            continue;
        }
        match parse_line(text) {
            Ok(mut rule) => {
                rule.line = line_no;
                set.rules.push(rule);
            }
            Err(error) => set.unparsed.push(UnparsedLine {
                line: line_no,
                text: text.to_string(),
                error,
            }),
        }
    }
    set
}

fn parse_line(text: &str) -> Result<SimpleRule, String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 5 || !tokens[0].eq_ignore_ascii_case("if") {
        return Err("expected `if <field> <op> <value> then <action>`".to_string());
    }

    let field = tokens[1].to_string();
    let op = RuleOp::parse(tokens[2])
        .ok_or_else(|| format!("unknown operator `{}`", tokens[2]))?;

    let then_pos = tokens
        .iter()
        .position(|t| t.eq_ignore_ascii_case("then"))
        .ok_or_else(|| "missing `then` keyword".to_string())?;
    if then_pos <= 3 || then_pos + 1 >= tokens.len() {
        return Err("expected `then <action>` after the condition".to_string());
    }

    let value = unquote(&tokens[3..then_pos].join(" "));
    let action = RuleAction::parse(tokens[then_pos + 1])
        .ok_or_else(|| format!("unknown action `{}`", tokens[then_pos + 1]))?;
    let message = if then_pos + 2 < tokens.len() {
        Some(tokens[then_pos + 2..].join(" "))
    } else {
        None
    };

    let pattern = if op == RuleOp::Matches {
        let raw = value
            .strip_prefix('/')
            .and_then(|v| v.strip_suffix('/'))
            .unwrap_or(&value);
        Some(Regex::new(raw).map_err(|e| format!("invalid pattern: {e}"))?)
    } else {
        None
    };

    Ok(SimpleRule {
        line: 0,
        field,
        op,
        value,
        action,
        message,
        pattern,
    })
}

fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

#[derive(Clone, Debug, Serialize)]
pub struct MatchedRule {
    pub line: usize,
    pub field: String,
    pub action: RuleAction,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RuleOutcome {
    pub allowed: bool,
    pub matched: Vec<MatchedRule>,
    pub denial_reasons: Vec<String>,
    pub evaluated: usize,
}

/// Evaluates every rule against `input`. A deny rule passes only when
/// its condition does not match; an allow rule always passes (it exists
/// to record a match). The overall verdict is the conjunction of all
/// per-rule passes, so an empty rule set is permissive.
pub fn evaluate(set: &RuleSet, input: &Value) -> RuleOutcome {
    let mut allowed = true;
    let mut matched = Vec::new();
    let mut denial_reasons = Vec::new();

    for rule in &set.rules {
        let field_value = resolve_path(input, &rule.field);
        let hit = condition_matches(rule, field_value.as_ref());

        if hit {
            matched.push(MatchedRule {
                line: rule.line,
                field: rule.field.clone(),
                action: rule.action,
                message: rule.message.clone(),
            });
        }

        let passed = match rule.action {
            RuleAction::Allow => true,
            RuleAction::Deny => !hit,
        };
        if !passed {
            allowed = false;
            denial_reasons.push(
                rule.message
                    .clone()
                    .unwrap_or_else(|| format!("rule at line {} denied", rule.line)),
            );
        }
    }

    RuleOutcome {
        allowed,
        matched,
        denial_reasons,
        evaluated: set.rules.len(),
    }
}

/// Dotted-path traversal. Missing intermediate keys resolve to `None`.
fn resolve_path(input: &Value, path: &str) -> Option<Value> {
    let mut current = input;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn condition_matches(rule: &SimpleRule, field: Option<&Value>) -> bool {
    let field = match field {
        Some(v) if !v.is_null() => v,
        // Undefined never satisfies a condition except Ne against a
        // defined comparison value.
        _ => return rule.op == RuleOp::Ne,
    };

    match rule.op {
        RuleOp::Eq => values_equal(field, &rule.value),
        RuleOp::Ne => !values_equal(field, &rule.value),
        RuleOp::Gt | RuleOp::Lt | RuleOp::Gte | RuleOp::Lte => {
            match (as_number(field), rule.value.parse::<f64>().ok()) {
                (Some(a), Some(b)) => match rule.op {
                    RuleOp::Gt => a > b,
                    RuleOp::Lt => a < b,
                    RuleOp::Gte => a >= b,
                    RuleOp::Lte => a <= b,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
        RuleOp::Contains => match field {
            Value::String(s) => s.contains(&rule.value),
            Value::Array(items) => items.iter().any(|item| values_equal(item, &rule.value)),
            _ => false,
        },
        RuleOp::Matches => match (field.as_str(), &rule.pattern) {
            (Some(s), Some(pattern)) => pattern.is_match(s),
            _ => false,
        },
    }
}

fn values_equal(field: &Value, expected: &str) -> bool {
    match field {
        Value::String(s) => s == expected,
        Value::Bool(b) => expected.parse::<bool>() == Ok(*b),
        Value::Number(_) => match (as_number(field), expected.parse::<f64>().ok()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{evaluate, parse_rules, RuleAction, RuleOp};

    #[test]
    fn parses_operator_and_action_aliases() {
        let set = parse_rules(
            "if tier eq gold then permit\n\
             if score gte 700 then grant\n\
             if region != eu then reject wrong region",
        );
        assert!(set.unparsed.is_empty());
        assert_eq!(set.rules.len(), 3);
        assert_eq!(set.rules[0].op, RuleOp::Eq);
        assert_eq!(set.rules[0].action, RuleAction::Allow);
        assert_eq!(set.rules[1].op, RuleOp::Gte);
        assert_eq!(set.rules[2].action, RuleAction::Deny);
        assert_eq!(set.rules[2].message.as_deref(), Some("wrong region"));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let set = parse_rules("# header\n\n// note\nif age < 18 then deny Underage\n");
        assert_eq!(set.rules.len(), 1);
        assert!(set.unparsed.is_empty());
        assert!(!set.is_unusable());
    }

    #[test]
    fn garbage_lines_are_collected_as_unparsed() {
        let set = parse_rules("when the moon is full\nif age < 18 then deny Underage");
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.unparsed.len(), 1);
        assert_eq!(set.unparsed[0].line, 1);
    }

    #[test]
    fn all_garbage_source_is_unusable() {
        let set = parse_rules("this is prose\nso is this");
        assert!(set.is_unusable());
    }

    #[test]
    fn invalid_regex_fails_at_parse_time() {
        let set = parse_rules("if email matches /[unclosed/ then deny bad email");
        assert!(set.rules.is_empty());
        assert!(set.unparsed[0].error.contains("invalid pattern"));
    }

    #[test]
    fn underage_deny_rule_blocks_minor_and_passes_adult() {
        let set = parse_rules("if age < 18 then deny Underage");

        let minor = evaluate(&set, &json!({"age": 15}));
        assert!(!minor.allowed);
        assert_eq!(minor.denial_reasons, vec!["Underage".to_string()]);

        let adult = evaluate(&set, &json!({"age": 30}));
        assert!(adult.allowed);
        assert!(adult.matched.is_empty());
    }

    #[test]
    fn nested_paths_traverse_objects() {
        let set = parse_rules("if customer.address.country == DE then allow");
        let outcome = evaluate(&set, &json!({"customer": {"address": {"country": "DE"}}}));
        assert!(outcome.allowed);
        assert_eq!(outcome.matched.len(), 1);
    }

    #[test]
    fn undefined_field_fails_comparisons_except_ne() {
        let deny_on_missing = parse_rules("if risk.score > 90 then deny too risky");
        // Condition cannot match without the field, so the deny passes.
        assert!(evaluate(&deny_on_missing, &json!({})).allowed);

        let ne_on_missing = parse_rules("if status != active then deny inactive");
        // Undefined is not equal to a defined value, the deny fires.
        assert!(!evaluate(&ne_on_missing, &json!({})).allowed);
    }

    #[test]
    fn contains_checks_strings_and_arrays() {
        let set = parse_rules("if tags contains vip then allow");
        assert_eq!(evaluate(&set, &json!({"tags": ["new", "vip"]})).matched.len(), 1);
        assert!(evaluate(&set, &json!({"tags": ["new"]})).matched.is_empty());

        let substr = parse_rules("if email contains @example.com then allow");
        assert_eq!(
            evaluate(&substr, &json!({"email": "a@example.com"})).matched.len(),
            1
        );
    }

    #[test]
    fn matches_accepts_slash_delimited_and_bare_patterns() {
        let slashed = parse_rules(r"if sku matches /^SKU-\d+$/ then allow");
        assert_eq!(evaluate(&slashed, &json!({"sku": "SKU-42"})).matched.len(), 1);

        let bare = parse_rules(r"if sku match ^SKU-\d+$ then allow");
        assert!(evaluate(&bare, &json!({"sku": "nope"})).matched.is_empty());
    }

    #[test]
    fn verdict_is_conjunction_over_all_rules() {
        let set = parse_rules(
            "if age >= 18 then allow\n\
             if country == US then deny not supported",
        );
        let outcome = evaluate(&set, &json!({"age": 25, "country": "US"}));
        assert!(!outcome.allowed);
        assert_eq!(outcome.evaluated, 2);
        assert_eq!(outcome.matched.len(), 2);
    }

    #[test]
    fn empty_rule_set_is_permissive() {
        let set = parse_rules("# only a comment\n");
        let outcome = evaluate(&set, &json!({"anything": 1}));
        assert!(outcome.allowed);
        assert_eq!(outcome.evaluated, 0);
    }
}
