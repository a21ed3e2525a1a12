//! Post-run assertions over captured node outputs
//!
//! Assertions address values with a small dot/bracket path language
//! (`retrieve.output.results[0].score`) walked over the node-output bag
//! produced by [`RunReport::node_outputs`](crate::RunReport::node_outputs).
//! A path that does not resolve is simply absent; evaluation never fails,
//! it only reports.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison performed by an assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionOp {
    Exists,
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    LengthGte,
    LengthEq,
    NoErrors,
    NoErrorsDownstream,
}

/// One check to run against a node-output bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    /// Path into the bag; for `noErrors` an optional scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub op: AssertionOp,
    /// Expected value, where the operator takes one
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    /// Start node for `noErrorsDownstream`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Assertion {
    pub fn new(path: impl Into<String>, op: AssertionOp, value: Value) -> Self {
        Self {
            path: Some(path.into()),
            op,
            value,
            from: None,
            description: None,
        }
    }

    /// No node reachable from `from` over live edges carries an error
    pub fn no_errors_downstream(from: impl Into<String>) -> Self {
        Self {
            path: None,
            op: AssertionOp::NoErrorsDownstream,
            value: Value::Null,
            from: Some(from.into()),
            description: None,
        }
    }

    /// No node in the bag carries an error
    pub fn no_errors() -> Self {
        Self {
            path: None,
            op: AssertionOp::NoErrors,
            value: Value::Null,
            from: None,
            description: None,
        }
    }
}

/// An edge as seen by reachability checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeLink {
    pub source: String,
    pub target: String,
    /// The edge never carried a value (unselected branch, pruned source)
    #[serde(default)]
    pub blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub assertion: Assertion,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionReport {
    pub passed: bool,
    pub results: Vec<AssertionResult>,
}

impl AssertionReport {
    pub fn failures(&self) -> impl Iterator<Item = &AssertionResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Evaluate every assertion; `passed` is their conjunction
pub fn evaluate(assertions: &[Assertion], node_outputs: &Value, edges: &[EdgeLink]) -> AssertionReport {
    let results: Vec<AssertionResult> = assertions
        .iter()
        .map(|assertion| evaluate_one(assertion, node_outputs, edges))
        .collect();
    AssertionReport {
        passed: results.iter().all(|r| r.passed),
        results,
    }
}

fn evaluate_one(assertion: &Assertion, bag: &Value, edges: &[EdgeLink]) -> AssertionResult {
    let path = assertion.path.as_deref().unwrap_or("");
    let actual = assertion.path.as_deref().and_then(|p| resolve_path(bag, p));
    let expected = &assertion.value;

    let (passed, message) = match assertion.op {
        AssertionOp::Exists => match actual {
            Some(v) if !v.is_null() => (true, format!("{} exists", path)),
            _ => (false, format!("{} does not exist", path)),
        },
        AssertionOp::Equals => match actual {
            Some(v) if v == expected => (true, format!("{} equals {}", path, expected)),
            Some(v) => (false, format!("{} is {}, expected {}", path, v, expected)),
            None => (false, format!("{} is undefined, expected {}", path, expected)),
        },
        AssertionOp::NotEquals => match actual {
            Some(v) if v == expected => (false, format!("{} unexpectedly equals {}", path, expected)),
            _ => (true, format!("{} differs from {}", path, expected)),
        },
        AssertionOp::Gt | AssertionOp::Gte | AssertionOp::Lt | AssertionOp::Lte => {
            compare_numbers(assertion.op, path, actual, expected)
        }
        AssertionOp::Contains | AssertionOp::NotContains => {
            let want = assertion.op == AssertionOp::Contains;
            match actual {
                None => (false, format!("{} is undefined", path)),
                Some(v) => {
                    let found = contains(v, expected);
                    let verb = if found { "contains" } else { "does not contain" };
                    (found == want, format!("{} {} {}", path, verb, expected))
                }
            }
        }
        AssertionOp::LengthGte | AssertionOp::LengthEq => {
            match (actual.and_then(length_of), to_number(expected)) {
                (Some(len), Some(want)) => {
                    let ok = if assertion.op == AssertionOp::LengthEq {
                        len as f64 == want
                    } else {
                        len as f64 >= want
                    };
                    (ok, format!("{} has length {} (expected {})", path, len, want))
                }
                (None, _) => (false, format!("{} has no length", path)),
                (_, None) => (false, format!("expected length {} is not a number", expected)),
            }
        }
        AssertionOp::NoErrors => {
            let scope: Vec<(String, &Value)> = match assertion.path.as_deref() {
                Some(p) => actual.map(|v| vec![(p.to_string(), v)]).unwrap_or_default(),
                None => bag
                    .as_object()
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v)).collect())
                    .unwrap_or_default(),
            };
            let failing: Vec<String> = scope
                .into_iter()
                .filter(|(_, v)| carries_error(v))
                .map(|(k, _)| k)
                .collect();
            if failing.is_empty() {
                (true, "no errors".to_string())
            } else {
                (false, format!("errors in: {}", failing.join(", ")))
            }
        }
        AssertionOp::NoErrorsDownstream => {
            let from = assertion.from.as_deref().or(assertion.path.as_deref()).unwrap_or("");
            let mut failing: Vec<&str> = downstream_of(from, edges)
                .into_iter()
                .filter(|id| bag.get(*id).is_some_and(carries_error))
                .collect();
            failing.sort_unstable();
            if failing.is_empty() {
                (true, format!("no errors downstream of {}", from))
            } else {
                (false, format!("errors downstream of {}: {}", from, failing.join(", ")))
            }
        }
    };

    AssertionResult {
        assertion: assertion.clone(),
        passed,
        message: assertion
            .description
            .as_ref()
            .map(|d| format!("{}: {}", d, message))
            .unwrap_or(message),
        actual: actual.cloned(),
    }
}

#[derive(Debug, PartialEq)]
enum PathToken {
    Key(String),
    Index(usize),
}

fn tokenize(path: &str) -> Vec<PathToken> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();

    let flush = |current: &mut String, tokens: &mut Vec<PathToken>| {
        if !current.is_empty() {
            tokens.push(PathToken::Key(std::mem::take(current)));
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '.' => flush(&mut current, &mut tokens),
            '[' => {
                flush(&mut current, &mut tokens);
                let mut inner = String::new();
                for next in chars.by_ref() {
                    if next == ']' {
                        break;
                    }
                    inner.push(next);
                }
                let inner = inner.trim();
                match inner.parse::<usize>() {
                    Ok(index) => tokens.push(PathToken::Index(index)),
                    Err(_) => tokens.push(PathToken::Key(inner.trim_matches(|q| q == '"' || q == '\'').to_string())),
                }
            }
            other => current.push(other),
        }
    }
    flush(&mut current, &mut tokens);
    tokens
}

/// Walk a dot/bracket path; any missing step yields `None`
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    tokenize(path).into_iter().try_fold(root, |current, token| match (current, token) {
        (Value::Object(map), PathToken::Key(key)) => map.get(&key),
        (Value::Array(items), PathToken::Index(i)) => items.get(i),
        (Value::Array(items), PathToken::Key(key)) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn compare_numbers(op: AssertionOp, path: &str, actual: Option<&Value>, expected: &Value) -> (bool, String) {
    let (Some(a), Some(b)) = (actual.and_then(to_number), to_number(expected)) else {
        return (
            false,
            format!(
                "{} ({}) and {} are not both numeric",
                path,
                actual.map(Value::to_string).unwrap_or_else(|| "undefined".into()),
                expected
            ),
        );
    };
    let (ok, symbol) = match op {
        AssertionOp::Gt => (a > b, ">"),
        AssertionOp::Gte => (a >= b, ">="),
        AssertionOp::Lt => (a < b, "<"),
        _ => (a <= b, "<="),
    };
    (ok, format!("{} = {} {} {}", path, a, symbol, b))
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            other => s.contains(&other.to_string()),
        },
        Value::Array(items) => items.contains(needle),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        _ => false,
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn carries_error(entry: &Value) -> bool {
    entry.get("error").is_some_and(|e| !e.is_null())
}

/// Nodes reachable from `from` over non-blocked edges (excluding `from`
/// unless it sits on a cycle)
fn downstream_of<'a>(from: &'a str, edges: &'a [EdgeLink]) -> HashSet<&'a str> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        for edge in edges.iter().filter(|e| !e.blocked && e.source == current) {
            if visited.insert(edge.target.as_str()) {
                queue.push_back(edge.target.as_str());
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag() -> Value {
        json!({
            "search": {"type": "json", "output": {"results": [{"score": 0.9, "text": "rust"}], "count": "3"}},
            "router": {"type": "json", "output": {"decision": true}},
            "tool": {"type": "json", "output": {"status": 200}},
            "broken": {"type": "error", "output": "boom", "error": "boom"}
        })
    }

    fn edges() -> Vec<EdgeLink> {
        vec![
            EdgeLink { source: "search".into(), target: "router".into(), blocked: false },
            EdgeLink { source: "router".into(), target: "tool".into(), blocked: false },
            EdgeLink { source: "router".into(), target: "broken".into(), blocked: true },
            EdgeLink { source: "tool".into(), target: "search".into(), blocked: false },
        ]
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("a.b[0].c"),
            vec![
                PathToken::Key("a".into()),
                PathToken::Key("b".into()),
                PathToken::Index(0),
                PathToken::Key("c".into())
            ]
        );
        assert_eq!(tokenize("a[\"x y\"]"), vec![PathToken::Key("a".into()), PathToken::Key("x y".into())]);
    }

    #[test]
    fn test_missing_path_is_undefined() {
        let bag = bag();
        assert!(resolve_path(&bag, "search.output.results[4].score").is_none());
        assert!(resolve_path(&bag, "nope.output").is_none());
        assert!(resolve_path(&bag, "router.output.decision.deeper").is_none());
    }

    #[test]
    fn test_comparisons() {
        let report = evaluate(
            &[
                Assertion::new("search.output.results[0].score", AssertionOp::Gt, json!(0.5)),
                Assertion::new("search.output.results[0].score", AssertionOp::Lte, json!("0.9")),
                Assertion::new("search.output.count", AssertionOp::Gte, json!(3)),
                Assertion::new("router.output.decision", AssertionOp::Equals, json!(true)),
                Assertion::new("tool.output.status", AssertionOp::NotEquals, json!(500)),
                Assertion::new("search.output.results", AssertionOp::LengthEq, json!(1)),
                Assertion::new("search.output.results[0].text", AssertionOp::Contains, json!("us")),
                Assertion::new("search.output.results[0].text", AssertionOp::NotContains, json!("go")),
                Assertion::new("tool.output", AssertionOp::Exists, Value::Null),
            ],
            &bag(),
            &edges(),
        );
        for result in &report.results {
            assert!(result.passed, "{}", result.message);
        }
        assert!(report.passed);
    }

    #[test]
    fn test_non_numeric_fails_without_panicking() {
        let report = evaluate(
            &[Assertion::new("router.output", AssertionOp::Gt, json!(1))],
            &bag(),
            &edges(),
        );
        assert!(!report.passed);
        assert!(report.results[0].message.contains("not both numeric"));
    }

    #[test]
    fn test_no_errors_downstream_skips_blocked_edges_and_cycles() {
        let ok = evaluate(&[Assertion::no_errors_downstream("search")], &bag(), &edges());
        assert!(ok.passed);

        let mut edges = edges();
        edges[2].blocked = false;
        let bad = evaluate(&[Assertion::no_errors_downstream("search")], &bag(), &edges);
        assert!(!bad.passed);
        assert!(bad.results[0].message.contains("broken"));
    }

    #[test]
    fn test_no_errors_scopes() {
        let all = evaluate(&[Assertion::no_errors()], &bag(), &edges());
        assert!(!all.passed);

        let mut scoped = Assertion::no_errors();
        scoped.path = Some("tool".into());
        assert!(evaluate(&[scoped], &bag(), &edges()).passed);
    }

    #[test]
    fn test_assertion_deserializes() {
        let assertion: Assertion =
            serde_json::from_value(json!({"path": "a.output", "op": "lengthGte", "value": 2})).unwrap();
        assert_eq!(assertion.op, AssertionOp::LengthGte);

        let downstream: Assertion =
            serde_json::from_value(json!({"op": "noErrorsDownstream", "from": "retrieve"})).unwrap();
        assert_eq!(downstream.from.as_deref(), Some("retrieve"));
    }
}
