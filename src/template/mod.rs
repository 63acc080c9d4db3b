//! Template resolution for kubesmith.
//!
//! Playbooks, module arguments and gating conditions embed Jinja2-style
//! expressions (`{{ ... }}`) in string values. This module evaluates them
//! against a host's resolved variable context using minijinja. The resolver
//! is stateless: callers pass the context on every call and nothing is
//! cached between renders.

mod filters;

use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use serde_json::Map;

use crate::error::{Error, Result};

/// A flat variable context: the JSON object a host's variables resolve to.
pub type Vars = Map<String, serde_json::Value>;

/// The shared template environment with the kubesmith filter library.
static ENVIRONMENT: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    filters::register(&mut env);
    env
});

/// Returns true if the string contains template delimiters.
///
/// Strings without delimiters are passed through untouched by
/// [`parse_string`], which keeps the common case (plain scalars) cheap.
pub fn is_template_syntax(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

/// Render a single string against the given context.
///
/// Short-circuits when the input contains no template delimiters. Parse and
/// render errors propagate typed; they are never silently swallowed.
pub fn parse_string(ctx: &Vars, source: &str) -> Result<String> {
    if !is_template_syntax(source) {
        return Ok(source.to_owned());
    }

    ENVIRONMENT
        .render_str(source, ctx)
        .map_err(|e| Error::template_render(source, e.to_string()))
}

/// Evaluate a list of conditions, requiring every one to render true.
///
/// Each condition is rendered once, then the rendered text is wrapped in
/// delimiters and rendered again. The second pass supports conditions whose
/// *output* is itself an un-delimited expression (e.g. a comparison produced
/// by a helper). An unevaluable condition is an error — callers must fail
/// closed, never silently skip or pass.
pub fn parse_bool(ctx: &Vars, conditions: &[String]) -> Result<bool> {
    for condition in conditions {
        let first = parse_string(ctx, condition)?;
        let wrapped = format!("{{{{ {} }}}}", first.trim());
        let rendered = ENVIRONMENT
            .render_str(&wrapped, ctx)
            .map_err(|e| Error::template_render(condition, e.to_string()))?;
        if !rendered.trim().eq_ignore_ascii_case("true") {
            return Ok(false);
        }
    }

    Ok(true)
}
