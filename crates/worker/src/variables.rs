// Placeholder substitution over the action tree.
//
// `{{.NAME}}` placeholders are resolved once, before execution, from parent
// parameters, build arguments and secrets. `{{.cds.build.NAME}}` placeholders
// are resolved per node right before it runs, from the build-variable table
// that earlier steps publish into.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use worker_common::constants::{
    BUILD_VARIABLE_PREFIX, MAX_RESOLUTION_PASSES, MAX_RESOLVED_VALUE_LENGTH,
};

use crate::model::{Action, ActionBuild, Parameter, Secret};

const OPEN: &str = "{{.";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("action '{action}' has a parameter without a name")]
    MalformedParameter { action: String },

    #[error("parameter '{parameter}' of action '{action}' does not converge to a fixed value")]
    Unresolvable { action: String, parameter: String },
}

/// A piece of text produced by [`Placeholders`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    /// A well-formed `{{.NAME}}` token; carries `NAME`.
    Token(&'a str),
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Splits a value into literal text and placeholder tokens.
///
/// A token is `{{.` followed by a non-empty run of `[A-Za-z0-9_.-]` and `}}`.
/// Anything that does not match exactly is literal text.
pub struct Placeholders<'a> {
    rest: &'a str,
}

impl<'a> Placeholders<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { rest: input }
    }
}

impl<'a> Iterator for Placeholders<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        if self.rest.is_empty() {
            return None;
        }

        let Some(start) = self.rest.find(OPEN) else {
            let literal = self.rest;
            self.rest = "";
            return Some(Segment::Literal(literal));
        };

        if start > 0 {
            let literal = &self.rest[..start];
            self.rest = &self.rest[start..];
            return Some(Segment::Literal(literal));
        }

        let after_open = &self.rest[OPEN.len()..];
        let name_len = after_open
            .find(|c: char| !is_name_char(c))
            .unwrap_or(after_open.len());
        let name = &after_open[..name_len];

        if !name.is_empty() && after_open[name_len..].starts_with(CLOSE) {
            self.rest = &after_open[name_len + CLOSE.len()..];
            return Some(Segment::Token(name));
        }

        // Not a token: keep the opener as text and rescan right after it.
        self.rest = after_open;
        Some(Segment::Literal(OPEN))
    }
}

/// Replace every `{{.name}}` token in `input` by `value`.
pub fn replace_placeholder(input: &str, name: &str, value: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for segment in Placeholders::new(input) {
        match segment {
            Segment::Literal(text) => output.push_str(text),
            Segment::Token(token) if token == name => output.push_str(value),
            Segment::Token(token) => {
                output.push_str(OPEN);
                output.push_str(token);
                output.push_str(CLOSE);
            }
        }
    }
    output
}

/// Names of the placeholders still present in `input`.
pub fn placeholder_names(input: &str) -> Vec<&str> {
    Placeholders::new(input)
        .filter_map(|segment| match segment {
            Segment::Token(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// The three substitution sources, in precedence order.
struct Sources<'a> {
    parent: &'a [Parameter],
    args: &'a [Parameter],
    secrets: &'a [Secret],
}

impl<'a> Sources<'a> {
    fn entries(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.parent
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .chain(self.args.iter().map(|p| (p.name.as_str(), p.value.as_str())))
            .chain(self.secrets.iter().map(|s| (s.name.as_str(), s.value.as_str())))
    }

    /// One pass: every entry of every source, in order.
    fn apply(&self, value: &str) -> String {
        let mut current = value.to_string();
        for (name, replacement) in self.entries() {
            if current.contains(OPEN) {
                current = replace_placeholder(&current, name, replacement);
            }
        }
        current
    }

    /// Repeat passes until the value stops changing.
    fn resolve(&self, value: &str) -> Option<String> {
        let mut seen = HashSet::new();
        let mut current = value.to_string();
        for _ in 0..MAX_RESOLUTION_PASSES {
            let next = self.apply(&current);
            if next == current {
                return Some(next);
            }
            if next.len() > MAX_RESOLVED_VALUE_LENGTH || !seen.insert(current) {
                return None;
            }
            current = next;
        }
        None
    }
}

/// Resolve every parameter of `action` and of all its descendants in place.
///
/// Each node is resolved against its parent's parameters (already resolved),
/// then the build arguments, then the secrets. The first failing parameter
/// stops the walk; values rewritten before it keep their new content.
pub fn resolve_action(
    action: &mut Action,
    parent: Option<&Action>,
    build: &ActionBuild,
    secrets: &[Secret],
) -> Result<(), ResolveError> {
    let parent = parent.map(|p| p.parameters.as_slice()).unwrap_or_default();
    resolve_node(action, parent, build, secrets)
}

fn resolve_node(
    action: &mut Action,
    parent: &[Parameter],
    build: &ActionBuild,
    secrets: &[Secret],
) -> Result<(), ResolveError> {
    let sources = Sources {
        parent,
        args: &build.args,
        secrets,
    };

    for parameter in action.parameters.iter_mut() {
        if parameter.name.is_empty() {
            return Err(ResolveError::MalformedParameter {
                action: action.name.clone(),
            });
        }
        parameter.value =
            sources
                .resolve(&parameter.value)
                .ok_or_else(|| ResolveError::Unresolvable {
                    action: action.name.clone(),
                    parameter: parameter.name.clone(),
                })?;
    }

    let Action {
        parameters,
        actions,
        ..
    } = action;
    for child in actions.iter_mut() {
        resolve_node(child, parameters, build, secrets)?;
    }
    Ok(())
}

/// Build arguments override same-named parameters of the node about to run.
pub fn apply_build_arguments(action: &mut Action, build: &ActionBuild) {
    for arg in &build.args {
        for parameter in action.parameters.iter_mut().filter(|p| p.name == arg.name) {
            parameter.value = arg.value.clone();
        }
    }
}

/// Values published by steps during a build, readable by later steps as
/// `{{.cds.build.NAME}}`.
#[derive(Clone, Default)]
pub struct BuildVariables {
    inner: Arc<RwLock<Vec<Parameter>>>,
}

impl std::fmt::Debug for BuildVariables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildVariables")
            .field("count", &self.inner.read().len())
            .finish()
    }
}

impl BuildVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, or replace the value of an existing one.
    pub fn publish(&self, name: &str, value: &str) {
        let mut vars = self.inner.write();
        match vars.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => vars.push(Parameter::new(name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Rewrite the node's own parameters with the current table content.
    pub fn substitute(&self, action: &mut Action) {
        let vars = self.inner.read();
        if vars.is_empty() {
            return;
        }
        for parameter in action.parameters.iter_mut() {
            for var in vars.iter() {
                let token = format!("{BUILD_VARIABLE_PREFIX}{}", var.name);
                parameter.value = replace_placeholder(&parameter.value, &token, &var.value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_with_args(args: &[(&str, &str)]) -> ActionBuild {
        ActionBuild {
            id: 1,
            args: args.iter().map(|(n, v)| Parameter::new(*n, *v)).collect(),
            ..ActionBuild::default()
        }
    }

    #[test]
    fn scanner_splits_tokens_and_literals() {
        let segments: Vec<_> = Placeholders::new("a {{.x}} b {{.y.z}}").collect();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("a "),
                Segment::Token("x"),
                Segment::Literal(" b "),
                Segment::Token("y.z"),
            ]
        );
    }

    #[test]
    fn malformed_tokens_stay_literal() {
        for input in ["{{.}}", "{{.a b}}", "{{.open", "{{ .a}}", "{{.a}", "json {{.\"k\"}}"] {
            assert_eq!(replace_placeholder(input, "a", "X"), input, "input: {input}");
        }
        assert_eq!(replace_placeholder("{{.{{.a}}", "a", "X"), "{{.X");
    }

    #[test]
    fn placeholder_names_lists_tokens() {
        assert_eq!(placeholder_names("{{.a}}-{{.b}}-{{.}}"), vec!["a", "b"]);
    }

    #[test]
    fn chained_substitution_reaches_fixpoint() {
        let parent = Action::group("parent", vec![]).with_parameter("a", "{{.b}}");
        let mut action = Action::builtin("Script").with_parameter("v", "{{.a}}-{{.b}}");
        let build = build_with_args(&[("b", "x")]);

        resolve_action(&mut action, Some(&parent), &build, &[]).unwrap();
        assert_eq!(action.parameter("v"), Some("x-x"));
    }

    #[test]
    fn parent_parameters_win_over_secrets() {
        let parent = Action::group("parent", vec![]).with_parameter("name", "from-parent");
        let mut action = Action::builtin("Script")
            .with_parameter("v", "{{.name}}")
            .with_parameter("w", "{{.only_secret}}");
        let secrets = vec![
            Secret::new("name", "from-secret"),
            Secret::new("only_secret", "secret-value"),
        ];

        resolve_action(&mut action, Some(&parent), &ActionBuild::default(), &secrets).unwrap();
        assert_eq!(action.parameter("v"), Some("from-parent"));
        assert_eq!(action.parameter("w"), Some("secret-value"));
    }

    #[test]
    fn build_arguments_win_over_secrets() {
        let mut action = Action::builtin("Script").with_parameter("v", "{{.key}}");
        let build = build_with_args(&[("key", "from-arg")]);
        let secrets = vec![Secret::new("key", "from-secret")];

        resolve_action(&mut action, None, &build, &secrets).unwrap();
        assert_eq!(action.parameter("v"), Some("from-arg"));
    }

    #[test]
    fn context_flows_top_down() {
        let mut root = Action::group(
            "root",
            vec![Action::group(
                "middle",
                vec![Action::builtin("Script").with_parameter("cmd", "deploy {{.target}}")],
            )
            .with_parameter("target", "{{.env}}-cluster")],
        )
        .with_parameter("env", "{{.stage}}");
        let build = build_with_args(&[("stage", "prod")]);

        resolve_action(&mut root, None, &build, &[]).unwrap();
        let middle = &root.actions[0];
        assert_eq!(root.parameter("env"), Some("prod"));
        assert_eq!(middle.parameter("target"), Some("prod-cluster"));
        assert_eq!(middle.actions[0].parameter("cmd"), Some("deploy prod-cluster"));
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let mut action = Action::builtin("Script").with_parameter("v", "{{.unknown}} {{.cds.build.x}}");
        resolve_action(&mut action, None, &ActionBuild::default(), &[]).unwrap();
        assert_eq!(action.parameter("v"), Some("{{.unknown}} {{.cds.build.x}}"));
    }

    #[test]
    fn growing_cycle_is_unresolvable() {
        let parent = Action::group("parent", vec![]).with_parameter("a", "x{{.a}}");
        let mut action = Action::builtin("Script").with_parameter("v", "{{.a}}");

        let err = resolve_action(&mut action, Some(&parent), &ActionBuild::default(), &[])
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::Unresolvable {
                action: "Script".to_string(),
                parameter: "v".to_string()
            }
        );
    }

    #[test]
    fn doubling_cycle_stops_before_exhausting_memory() {
        let parent = Action::group("parent", vec![]).with_parameter("a", "{{.a}}{{.a}}");
        let mut action = Action::builtin("Script").with_parameter("v", "{{.a}}");
        assert!(resolve_action(&mut action, Some(&parent), &ActionBuild::default(), &[]).is_err());
    }

    #[test]
    fn empty_parameter_name_is_malformed() {
        let mut root = Action::group(
            "root",
            vec![
                Action::builtin("first").with_parameter("v", "{{.b}}"),
                Action::builtin("broken").with_parameter("", "x"),
            ],
        );
        let build = build_with_args(&[("b", "done")]);

        let err = resolve_action(&mut root, None, &build, &[]).unwrap_err();
        assert!(matches!(err, ResolveError::MalformedParameter { ref action } if action == "broken"));
        // earlier siblings keep their substitution
        assert_eq!(root.actions[0].parameter("v"), Some("done"));
    }

    #[test]
    fn build_arguments_override_matching_parameters() {
        let mut action = Action::builtin("GitClone")
            .with_parameter("branch", "main")
            .with_parameter("url", "git@example.com:repo.git");
        let build = build_with_args(&[("branch", "feature/x")]);

        apply_build_arguments(&mut action, &build);
        assert_eq!(action.parameter("branch"), Some("feature/x"));
        assert_eq!(action.parameter("url"), Some("git@example.com:repo.git"));
    }

    #[test]
    fn build_variables_publish_and_substitute() {
        let vars = BuildVariables::new();
        vars.publish("version", "1.0");
        vars.publish("version", "1.1");
        vars.publish("commit", "abc123");
        assert_eq!(vars.len(), 2);
        assert_eq!(vars.get("version").as_deref(), Some("1.1"));

        let mut action = Action::builtin("Script")
            .with_parameter("script", "release {{.cds.build.version}} ({{.cds.build.commit}}) {{.version}}");
        vars.substitute(&mut action);
        assert_eq!(action.parameter("script"), Some("release 1.1 (abc123) {{.version}}"));

        vars.clear();
        assert!(vars.is_empty());
    }
}
