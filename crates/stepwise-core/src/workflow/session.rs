//! Session chaining for workflow steps.

use crate::workflow::resolver::{self, VariableContext};
use crate::workflow::schema::is_bare_step_id;

/// Resolve a step's `resume_session` field to a session id.
///
/// `analyze` is shorthand for `${{ steps.analyze.outputs.session_id }}`.
/// When the referenced step has not run or produced no session, the step
/// starts a fresh session (`None`) instead of failing.
pub fn resolve_resume_session(template: Option<&str>, ctx: &VariableContext<'_>) -> Option<String> {
    let template = template.map(str::trim).filter(|t| !t.is_empty())?;

    let resolved = if is_bare_step_id(template) {
        let path = format!("steps.{}.outputs.session_id", template);
        ctx.lookup(&path).map(resolver::render)
    } else {
        Some(ctx.resolve(template))
    };

    match resolved.map(|s| s.trim().to_string()) {
        Some(session) if !session.is_empty() && !resolver::has_tokens(&session) => Some(session),
        _ => {
            tracing::debug!(
                "[Session] '{}' did not resolve to a session, starting fresh",
                template
            );
            None
        }
    }
}
