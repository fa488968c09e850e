//! `{{name}}` substitution on the working request.

use std::borrow::Cow;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

use super::ProcessorContext;
use crate::error::Result;
use crate::hooks::{Hook, HookResult};
use crate::types::{Body, Variables};

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_$][\w$.-]*)\s*\}\}").expect("placeholder pattern is valid");
}

/// Region action replacing `{{name}}` placeholders in the url, header
/// values and body of `context.request`.
///
/// Dotted names walk into object variables. Unknown names stay verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceVariables;

#[async_trait]
impl Hook<ProcessorContext, bool> for ReplaceVariables {
    async fn call(&self, ctx: &mut ProcessorContext) -> Result<HookResult<bool>> {
        let ProcessorContext {
            request, variables, ..
        } = ctx;
        let Some(request) = request.as_mut() else {
            return Ok(HookResult::Value(true));
        };

        if let Cow::Owned(url) = replace_str(request.url(), variables) {
            *request.url_mut() = url;
        }
        for value in request.headers_mut().values_mut() {
            replace_value(value, variables);
        }
        match request.body_mut() {
            Some(Body::Text(text)) => {
                if let Cow::Owned(replaced) = replace_str(text, variables) {
                    *text = replaced;
                }
            }
            Some(Body::Json(json)) => replace_value(json, variables),
            _ => {}
        }
        Ok(HookResult::Value(true))
    }
}

/// Replace placeholders in `input`; borrowed when nothing matched.
pub fn replace_str<'a>(input: &'a str, variables: &Variables) -> Cow<'a, str> {
    PLACEHOLDER.replace_all(input, |caps: &Captures<'_>| {
        match lookup(variables, &caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        }
    })
}

fn replace_value(value: &mut Value, variables: &Variables) {
    match value {
        Value::String(s) => {
            if let Cow::Owned(replaced) = replace_str(s, variables) {
                *s = replaced;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| replace_value(v, variables)),
        Value::Object(map) => map.values_mut().for_each(|v| replace_value(v, variables)),
        _ => {}
    }
}

fn lookup<'a>(variables: &'a Variables, name: &str) -> Option<&'a Value> {
    if let Some(value) = variables.get(name) {
        return Some(value);
    }
    let mut parts = name.split('.');
    let mut current = variables.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}
