// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Proc template compilation and application
//!
//! A proc is an ordered list of string parts; parts beginning with `$`
//! name positional parameters. Applying a compiled template interpolates
//! argument value lists and splits the result into an argv vector. The
//! quoting here exists only for the engine's own join/split round trip;
//! commands are spawned without shell interpretation.

use std::collections::BTreeMap;

use crate::errors::{TickleError, TickleResult};

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Param(usize),
}

/// A compiled proc template: an argv builder over named parameters
#[derive(Debug, Clone)]
pub struct ProcTemplate {
    name: String,
    params: Vec<String>,
    parts: Vec<Part>,
}

impl ProcTemplate {
    /// Compile a template, capturing parameter names in order.
    /// Empty parts are dropped.
    pub fn compile(name: &str, template: &[String]) -> Self {
        let mut params = Vec::new();
        let mut parts = Vec::new();
        for part in template {
            if part.is_empty() {
                continue;
            }
            match part.strip_prefix('$') {
                Some(param) => {
                    parts.push(Part::Param(params.len()));
                    params.push(param.to_string());
                }
                None => parts.push(Part::Literal(part.clone())),
            }
        }
        Self {
            name: name.to_string(),
            params,
            parts,
        }
    }

    /// Proc name this template was compiled from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the argv vector for a concrete set of arguments.
    pub fn apply(&self, args: &BTreeMap<String, Vec<String>>) -> TickleResult<Vec<String>> {
        for param in &self.params {
            if !args.contains_key(param) {
                return Err(TickleError::MissingArgument {
                    proc: self.name.clone(),
                    param: param.clone(),
                });
            }
        }
        let rendered = self
            .parts
            .iter()
            .map(|part| match part {
                Part::Literal(literal) => literal.clone(),
                Part::Param(index) => quote_join(&args[&self.params[*index]]),
            })
            .collect::<Vec<_>>()
            .join(" ");
        Ok(split_quoted(&rendered))
    }
}

/// Join a value list with single spaces, double-quoting values that
/// contain an ASCII space.
fn quote_join(values: &[String]) -> String {
    values
        .iter()
        .map(|value| {
            if value.contains(' ') {
                format!("\"{value}\"")
            } else {
                value.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a rendered command line on spaces. A token with a leading `"`
/// opens a quoted span closed by a token with a trailing `"`; the span's
/// interior becomes a single argv element. Empty tokens are dropped.
fn split_quoted(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_span = false;
    for token in line.split(' ') {
        if in_span {
            buf.push(' ');
            match token.strip_suffix('"') {
                Some(inner) => {
                    buf.push_str(inner);
                    out.push(std::mem::take(&mut buf));
                    in_span = false;
                }
                None => buf.push_str(token),
            }
        } else if let Some(rest) = token.strip_prefix('"') {
            match rest.strip_suffix('"') {
                Some(inner) if !inner.is_empty() => out.push(inner.to_string()),
                Some(_) => {}
                None => {
                    buf.push_str(rest);
                    in_span = true;
                }
            }
        } else if !token.is_empty() {
            out.push(token.to_string());
        }
    }
    if in_span {
        out.push(buf);
    }
    out
}
