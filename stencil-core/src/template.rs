//! # Template Resolution
//!
//! Resolves pattern text against a variable mapping and the caller's input.
//!
//! Pattern text is parsed into a [`Template`] before any input is bound, so the
//! input is always emitted as a literal and can never be re-interpreted as
//! template source. Recognised placeholders:
//!
//! - `{{input}}` - the reserved input placeholder, always bound to the explicit input.
//! - `{{name}}` - a variable; unknown names resolve to the empty string.
//! - `{{ext:name:operation:value}}` - an extension call. `value` is resolved first
//!   and handed to the [`ExtensionRunner`]; the call site is replaced with its output.

use std::collections::HashMap;
use log::{debug, log_enabled, Level};
use thiserror::Error;
use crate::dispatcher::{ExtensionError, ExtensionRunner};
use crate::parser::parse_template;

pub const INPUT_PLACEHOLDER: &str = "{{input}}";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("extension call '{name}:{operation}' failed: {source}")]
    Extension {
        name: String,
        operation: String,
        #[source]
        source: ExtensionError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    Literal(String),
    Input,
    Variable(String),
    Extension(ExtensionCall),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionCall {
    pub name: String,
    pub operation: String,
    pub argument: Vec<TemplateNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub nodes: Vec<TemplateNode>,
}

impl Template {
    pub fn parse(text: &str) -> Template {
        parse_template(text)
    }

    pub fn variables(&self) -> Vec<&String> {
        let mut names = Vec::new();
        collect_variables(&self.nodes, &mut names);
        names
    }

    pub fn extension_calls(&self) -> Vec<&ExtensionCall> {
        let mut calls = Vec::new();
        collect_extension_calls(&self.nodes, &mut calls);
        calls
    }
}

fn collect_variables<'a>(nodes: &'a [TemplateNode], names: &mut Vec<&'a String>) {
    for node in nodes {
        match node {
            TemplateNode::Variable(name) => names.push(name),
            TemplateNode::Extension(call) => collect_variables(&call.argument, names),
            _ => {}
        }
    }
}

fn collect_extension_calls<'a>(nodes: &'a [TemplateNode], calls: &mut Vec<&'a ExtensionCall>) {
    for node in nodes {
        if let TemplateNode::Extension(call) = node {
            calls.push(call);
            collect_extension_calls(&call.argument, calls);
        }
    }
}

/// Appends the input placeholder on its own line when `text` has none,
/// so a pattern never silently drops the caller's input.
pub fn ensure_input(text: &mut String) {
    if !text.contains(INPUT_PLACEHOLDER) {
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(INPUT_PLACEHOLDER);
    }
}

/// Input-only resolution: guarantees the input placeholder and replaces it
/// with `input`. No other placeholder is touched.
pub fn apply_input(text: &str, input: &str) -> String {
    let mut text = text.to_string();
    ensure_input(&mut text);
    text.replace(INPUT_PLACEHOLDER, input)
}

pub struct TemplateResolver<'a, R: ExtensionRunner + ?Sized> {
    runner: &'a R,
}

impl<'a, R: ExtensionRunner + ?Sized> TemplateResolver<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        Self { runner }
    }

    /// Full resolution: guarantees the input placeholder, then expands every
    /// variable and extension call. The input itself is inserted verbatim.
    ///
    /// Either every placeholder resolves or an error is returned; there is no
    /// partially substituted result.
    pub fn apply(&self, text: &str, variables: &HashMap<String, String>, input: &str) -> Result<String, ResolveError> {
        let mut text = text.to_string();
        ensure_input(&mut text);
        self.expand(&text, variables, input)
    }

    /// Expands `text` without adding the input placeholder.
    pub fn expand(&self, text: &str, variables: &HashMap<String, String>, input: &str) -> Result<String, ResolveError> {
        let template = Template::parse(text);
        if log_enabled!(Level::Debug) {
            debug!(
                "template has {} variable(s) and {} extension call(s)",
                template.variables().len(),
                template.extension_calls().len()
            );
        }
        self.render(&template.nodes, variables, input)
    }

    // Extension calls run left to right, innermost argument first.
    fn render(&self, nodes: &[TemplateNode], variables: &HashMap<String, String>, input: &str) -> Result<String, ResolveError> {
        let mut result = String::new();

        for node in nodes {
            match node {
                TemplateNode::Literal(text) => result.push_str(text),
                TemplateNode::Input => result.push_str(input),
                TemplateNode::Variable(name) => {
                    match variables.get(name) {
                        Some(value) => result.push_str(value),
                        None => debug!("variable '{}' not provided, substituting empty string", name),
                    }
                },
                TemplateNode::Extension(call) => {
                    let value = self.render(&call.argument, variables, input)?;
                    debug!("dispatching extension call {}:{}", call.name, call.operation);
                    let output = self.runner
                        .run(&call.name, &call.operation, &value)
                        .map_err(|source| ResolveError::Extension {
                            name: call.name.clone(),
                            operation: call.operation.clone(),
                            source,
                        })?;
                    result.push_str(&output);
                },
            }
        }

        Ok(result)
    }
}
