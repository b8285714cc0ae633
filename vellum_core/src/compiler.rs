use crate::VellumResult;
use crate::directives::RuleTable;

/// Rewrite template source into artifact source by applying every rule in
/// `rules`, in table order, to the accumulating text.
///
/// The result is only idempotent when no rewrite reintroduces the pattern of
/// another rule.
pub fn compile(source: &str, rules: &RuleTable) -> VellumResult<String> {
	let mut content = source.to_string();

	for rule in rules.iter() {
		content = rule.compile()?.apply(&content);
	}

	Ok(content)
}
