//! `${...}` input templates for workflow steps.
//!
//! Recognized references:
//!
//! * `${user.field}`: a field of the caller's inputs
//! * `${stepN}`: the whole output of step N
//! * `${stepN.field}`: a field of step N's output; dotted paths walk nested
//!   objects, and string outputs holding JSON are decoded first
//!
//! Anything else, and any reference that cannot be resolved, stays in the
//! rendered text exactly as written.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").expect("valid placeholder regex"));
static STEP_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^step(\d+)(?:\.(.+))?$").expect("valid step regex"));
static CONDITION_STEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"step(\d+)").expect("valid condition regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    User(String),
    StepWhole(usize),
    StepField(usize, String),
}

impl Reference {
    fn parse(inner: &str) -> Option<Self> {
        let inner = inner.trim();
        if let Some(field) = inner.strip_prefix("user.") {
            return (!field.is_empty()).then(|| Reference::User(field.to_string()));
        }

        let captures = STEP_REF.captures(inner)?;
        let step: usize = captures.get(1)?.as_str().parse().ok()?;
        match captures.get(2) {
            Some(field) => Some(Reference::StepField(step, field.as_str().to_string())),
            None => Some(Reference::StepWhole(step)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// A reference plus its source text, rendered verbatim when unresolved
    Ref { reference: Reference, raw: String },
}

/// Values a template can draw from during one workflow execution
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub user: &'a Map<String, Value>,
    pub steps: &'a HashMap<usize, Value>,
}

impl<'a> Scope<'a> {
    pub fn lookup(&self, reference: &Reference) -> Option<Value> {
        match reference {
            Reference::User(field) => self.user.get(field).cloned(),
            Reference::StepWhole(step) => self.steps.get(step).cloned(),
            Reference::StepField(step, path) => {
                let output = self.steps.get(step)?;
                let decoded;
                let mut current = match output {
                    Value::String(text) => {
                        decoded = serde_json::from_str::<Value>(text).ok()?;
                        &decoded
                    }
                    other => other,
                };
                for key in path.split('.') {
                    current = match current {
                        Value::Object(map) => map.get(key)?,
                        Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                Some(current.clone())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;

        for captures in PLACEHOLDER.captures_iter(input) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let Some(reference) = Reference::parse(inner.as_str()) else {
                continue;
            };

            if whole.start() > last {
                segments.push(Segment::Literal(input[last..whole.start()].to_string()));
            }
            segments.push(Segment::Ref {
                reference,
                raw: whole.as_str().to_string(),
            });
            last = whole.end();
        }

        if last < input.len() {
            segments.push(Segment::Literal(input[last..].to_string()));
        }

        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Ref { reference, .. } => Some(reference),
            Segment::Literal(_) => None,
        })
    }

    /// A template that is exactly one reference yields the referenced value
    /// with its JSON type intact. Mixed templates render to a string.
    pub fn render(&self, scope: &Scope<'_>) -> Value {
        if let [Segment::Ref { reference, raw }] = self.segments.as_slice() {
            return scope
                .lookup(reference)
                .unwrap_or_else(|| Value::String(raw.clone()));
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Ref { reference, raw } => match scope.lookup(reference) {
                    Some(Value::String(text)) => out.push_str(&text),
                    Some(value) => out.push_str(&value.to_string()),
                    None => out.push_str(raw),
                },
            }
        }
        Value::String(out)
    }
}

/// Resolve every string inside `value`, descending into arrays and objects
pub fn resolve_value(value: &Value, scope: &Scope<'_>) -> Value {
    match value {
        Value::String(text) if text.contains("${") => Template::parse(text).render(scope),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_value(item, scope)).collect()),
        Value::Object(map) => Value::Object(resolve_input(map, scope)),
        other => other.clone(),
    }
}

pub fn resolve_input(template: &Map<String, Value>, scope: &Scope<'_>) -> Map<String, Value> {
    template
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, scope)))
        .collect()
}

/// Run conditions only check that the referenced step produced an output.
/// A condition without a step reference always passes.
pub fn condition_holds(condition: &str, steps: &HashMap<usize, Value>) -> bool {
    match CONDITION_STEP
        .captures(condition)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
    {
        Some(step) => steps.contains_key(&step),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_parts() -> (Map<String, Value>, HashMap<usize, Value>) {
        let user = json!({"drug": "aspirin", "limit": 5});
        let mut steps = HashMap::new();
        steps.insert(1, json!({"cid": 2244, "targets": [{"name": "PTGS1"}]}));
        steps.insert(2, Value::String(r#"{"smiles": "CC(=O)O"}"#.to_string()));
        steps.insert(3, Value::String("plain text".to_string()));
        (user.as_object().cloned().unwrap_or_default(), steps)
    }

    #[test]
    fn parses_references_and_literals() {
        let template = Template::parse("find ${user.drug} in ${step1.cid}${bogus} ${step2}");
        assert_eq!(
            template.references().cloned().collect::<Vec<_>>(),
            vec![
                Reference::User("drug".to_string()),
                Reference::StepField(1, "cid".to_string()),
                Reference::StepWhole(2),
            ]
        );
        assert!(matches!(&template.segments()[0], Segment::Literal(text) if text == "find "));
    }

    #[test]
    fn single_reference_keeps_json_type() {
        let (user, steps) = scope_parts();
        let scope = Scope { user: &user, steps: &steps };

        assert_eq!(Template::parse("${user.limit}").render(&scope), json!(5));
        assert_eq!(Template::parse("${step1.cid}").render(&scope), json!(2244));
        assert_eq!(Template::parse("${step1.targets.0.name}").render(&scope), json!("PTGS1"));
        assert_eq!(
            Template::parse("${step1}").render(&scope),
            json!({"cid": 2244, "targets": [{"name": "PTGS1"}]})
        );
    }

    #[test]
    fn mixed_templates_render_text() {
        let (user, steps) = scope_parts();
        let scope = Scope { user: &user, steps: &steps };

        assert_eq!(
            Template::parse("cid=${step1.cid} for ${user.drug}").render(&scope),
            json!("cid=2244 for aspirin")
        );
    }

    #[test]
    fn json_strings_are_decoded_for_field_access() {
        let (user, steps) = scope_parts();
        let scope = Scope { user: &user, steps: &steps };

        assert_eq!(Template::parse("${step2.smiles}").render(&scope), json!("CC(=O)O"));
        assert_eq!(Template::parse("${step3.x}").render(&scope), json!("${step3.x}"));
    }

    #[test]
    fn unresolved_references_stay_literal() {
        let (user, steps) = scope_parts();
        let scope = Scope { user: &user, steps: &steps };

        assert_eq!(Template::parse("${user.missing}").render(&scope), json!("${user.missing}"));
        assert_eq!(Template::parse("${step9}").render(&scope), json!("${step9}"));
        assert_eq!(Template::parse("${step1.nope} ok").render(&scope), json!("${step1.nope} ok"));
        assert_eq!(Template::parse("${unclosed").render(&scope), json!("${unclosed"));
    }

    #[test]
    fn resolves_nested_inputs() {
        let (user, steps) = scope_parts();
        let scope = Scope { user: &user, steps: &steps };
        let template = json!({"query": "${user.drug}", "filters": {"ids": ["${step1.cid}", 7]}, "n": 3});

        let resolved = resolve_input(template.as_object().unwrap(), &scope);
        assert_eq!(
            Value::Object(resolved),
            json!({"query": "aspirin", "filters": {"ids": [2244, 7]}, "n": 3})
        );
    }

    #[test]
    fn conditions_check_output_existence() {
        let (_, steps) = scope_parts();
        assert!(condition_holds("step1.success == True", &steps));
        assert!(!condition_holds("step4.success", &steps));
        assert!(condition_holds("always", &steps));
    }
}
