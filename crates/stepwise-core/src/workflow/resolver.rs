//! Variable resolver for `${{ <path> }}` tokens.
//!
//! Paths:
//! - `inputs.<key>`: workflow inputs
//! - `env.<key>`: workflow env, overridden by the step's job env
//! - `steps.<id>.outputs.<field>`: outputs of an earlier step
//!
//! Tokens that cannot be resolved stay in the text unchanged. The process
//! environment is never consulted.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Outputs of one step, keyed by field (`result`, `session_id`, ...).
pub type StepOutputs = BTreeMap<String, Value>;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("token regex is valid"))
}

/// Everything a token may refer to while one step is being prepared.
#[derive(Debug, Clone, Copy)]
pub struct VariableContext<'a> {
    pub inputs: &'a BTreeMap<String, Value>,
    pub env: &'a BTreeMap<String, Value>,
    pub outputs: &'a BTreeMap<String, StepOutputs>,
}

impl<'a> VariableContext<'a> {
    pub fn new(
        inputs: &'a BTreeMap<String, Value>,
        env: &'a BTreeMap<String, Value>,
        outputs: &'a BTreeMap<String, StepOutputs>,
    ) -> Self {
        Self {
            inputs,
            env,
            outputs,
        }
    }

    pub fn lookup(&self, path: &str) -> Option<&'a Value> {
        let mut parts = path.split('.');
        match parts.next()? {
            "inputs" => self.inputs.get(&rest(parts)?),
            "env" => self.env.get(&rest(parts)?),
            "steps" => {
                let step_id = parts.next()?;
                if parts.next()? != "outputs" {
                    return None;
                }
                let field = parts.next()?;
                let mut value = self.outputs.get(step_id)?.get(field)?;
                // Walk into structured outputs: steps.a.outputs.meta.owner
                for key in parts {
                    value = value.get(key)?;
                }
                Some(value)
            }
            _ => None,
        }
    }

    /// Substitute every resolvable token in `text`.
    pub fn resolve(&self, text: &str) -> String {
        token_regex()
            .replace_all(text, |caps: &regex::Captures| {
                let path = &caps[1];
                match self.lookup(path) {
                    Some(value) => render(value),
                    None => {
                        tracing::debug!("[Resolver] Unresolved token '{}' left as-is", &caps[0]);
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}

/// Keys may themselves contain dots (`env.app.name`).
fn rest<'s>(parts: std::str::Split<'s, char>) -> Option<String> {
    let key = parts.collect::<Vec<_>>().join(".");
    (!key.is_empty()).then_some(key)
}

/// Strings render raw; everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Paths of all tokens in `text`, in order of appearance.
pub fn token_paths(text: &str) -> Vec<&str> {
    token_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

pub fn has_tokens(text: &str) -> bool {
    token_regex().is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixture {
        inputs: BTreeMap<String, Value>,
        env: BTreeMap<String, Value>,
        outputs: BTreeMap<String, StepOutputs>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut analyze = StepOutputs::new();
            analyze.insert("result".into(), json!("found 3 issues"));
            analyze.insert("session_id".into(), json!("abc"));
            analyze.insert("exit_code".into(), json!(0));
            analyze.insert("meta".into(), json!({"owner": "core"}));

            Self {
                inputs: BTreeMap::from([("target".into(), json!("src"))]),
                env: BTreeMap::from([
                    ("LANG_HINT".into(), json!("rust")),
                    ("RETRIES".into(), json!(3)),
                ]),
                outputs: BTreeMap::from([("analyze".into(), analyze)]),
            }
        }

        fn ctx(&self) -> VariableContext<'_> {
            VariableContext::new(&self.inputs, &self.env, &self.outputs)
        }
    }

    #[test]
    fn test_resolves_all_scopes() {
        let f = Fixture::new();
        let text = "Fix ${{ inputs.target }} in ${{env.LANG_HINT}}: ${{ steps.analyze.outputs.result }}";
        assert_eq!(f.ctx().resolve(text), "Fix src in rust: found 3 issues");
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let f = Fixture::new();
        assert_eq!(f.ctx().resolve("${{ env.RETRIES }}x"), "3x");
        assert_eq!(f.ctx().resolve("${{ steps.analyze.outputs.exit_code }}"), "0");
        assert_eq!(f.ctx().resolve("${{ steps.analyze.outputs.meta.owner }}"), "core");
        assert_eq!(
            f.ctx().resolve("${{ steps.analyze.outputs.meta }}"),
            r#"{"owner":"core"}"#
        );
    }

    #[test]
    fn test_unresolved_tokens_stay_literal() {
        let f = Fixture::new();
        let text = "a ${{ steps.later.outputs.result }} b ${{ inputs.missing }} c ${{ secrets.x }}";
        assert_eq!(f.ctx().resolve(text), text);
    }

    #[test]
    fn test_process_env_not_consulted() {
        let f = Fixture::new();
        assert_eq!(f.ctx().resolve("${{ env.PATH }}"), "${{ env.PATH }}");
    }

    #[test]
    fn test_token_paths() {
        assert_eq!(
            token_paths("${{ inputs.a }} and ${{steps.b.outputs.result}}"),
            vec!["inputs.a", "steps.b.outputs.result"]
        );
        assert!(token_paths("no tokens, ${ plain }").is_empty());
        assert!(has_tokens("x ${{ env.Y }}"));
    }
}
