use derive_more::Deref;
use serde::Deserialize;

use crate::VellumError;
use crate::VellumResult;
use crate::pattern::MatchPattern;
use crate::pattern::Rewrite;

/// The built-in directives in the order they are applied. Later rules see
/// the output of earlier ones, so the blank line stripper must stay last.
pub const DEFAULT_DIRECTIVES: [(&str, &str); 12] = [
	("{{%s%?%s}}", "<?vm echo escape($1) ?>"),
	("{!%s%?%s!}", "<?vm echo $1 ?>"),
	(
		"@foreach%s(%b)%*%s@endforeach",
		"<?vm foreach ($1): ?>$2<?vm endforeach ?>",
	),
	("@rawcode%s%*%s@endrawcode", "<?vm $1 ?>"),
	("@extends%s(%b)%s", "<?vm layout.extend($1) ?>"),
	(
		"@section%s(%b)%*%s@endsection",
		"<?vm layout.start_section($1) ?>$2<?vm layout.stop_section() ?>",
	),
	("@section%s(%b)%s", "<?vm layout.start_section($1) ?>"),
	("@content%s(%b)%s", "<?vm layout.content($1) ?>"),
	("@include%s(%b)%s", "<?vm layout.include($1) ?>"),
	("@import%s(%b)%s", "<?vm layout.import($1) ?>"),
	("@hook%s(%b)%s", "<?vm hook($1) ?>"),
	("%^%s%n", ""),
];

/// A pattern-to-rewrite mapping applied during compilation.
///
/// Both halves are kept in their source form. They are only parsed when the
/// rule is used, so a malformed custom rule surfaces as a
/// [`VellumError::Pattern`] at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectiveRule {
	pub pattern: String,
	pub rewrite: String,
}

impl DirectiveRule {
	pub fn new(pattern: impl Into<String>, rewrite: impl Into<String>) -> Self {
		Self {
			pattern: pattern.into(),
			rewrite: rewrite.into(),
		}
	}

	/// Parse both halves and check that the rewrite only references captures
	/// the pattern provides.
	pub fn compile(&self) -> VellumResult<CompiledRule> {
		let pattern = MatchPattern::parse(&self.pattern)?;
		let rewrite = Rewrite::parse(&self.rewrite);
		let highest = rewrite.highest_capture();

		if highest > pattern.capture_count() {
			return Err(VellumError::Pattern {
				pattern: self.pattern.clone(),
				reason: format!(
					"rewrite references `${highest}` but the pattern only has {} capture(s)",
					pattern.capture_count()
				),
			});
		}

		Ok(CompiledRule { pattern, rewrite })
	}
}

/// A rule whose pattern and rewrite have been parsed and checked.
#[derive(Debug, Clone)]
pub struct CompiledRule {
	pattern: MatchPattern,
	rewrite: Rewrite,
}

impl CompiledRule {
	pub fn apply(&self, text: &str) -> String {
		self.pattern.replace_all(text, &self.rewrite)
	}
}

/// An ordered set of directive rules keyed by pattern.
#[derive(Debug, Clone, Default, Deref)]
pub struct RuleTable {
	#[deref]
	rules: Vec<DirectiveRule>,
}

impl RuleTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert a rule, or overwrite the rewrite of an existing rule with the
	/// same pattern. Overwritten rules keep their position.
	pub fn register(&mut self, pattern: impl Into<String>, rewrite: impl Into<String>) {
		let rule = DirectiveRule::new(pattern, rewrite);

		if let Some(existing) = self
			.rules
			.iter_mut()
			.find(|existing| existing.pattern == rule.pattern)
		{
			existing.rewrite = rule.rewrite;
		} else {
			self.rules.push(rule);
		}
	}

	/// Register every rule in order. Does nothing for an empty collection.
	pub fn register_all<P, R>(&mut self, rules: impl IntoIterator<Item = (P, R)>)
	where
		P: Into<String>,
		R: Into<String>,
	{
		for (pattern, rewrite) in rules {
			self.register(pattern, rewrite);
		}
	}

	/// Look up the rewrite registered for `pattern`.
	pub fn rewrite_for(&self, pattern: &str) -> Option<&str> {
		self.rules
			.iter()
			.find(|rule| rule.pattern == pattern)
			.map(|rule| rule.rewrite.as_str())
	}

	/// Parse every rule up front, returning the first error.
	pub fn validate(&self) -> VellumResult<()> {
		for rule in &self.rules {
			rule.compile()?;
		}

		Ok(())
	}
}

/// A fresh table holding the built-in directives.
pub fn default_rule_table() -> RuleTable {
	let mut table = RuleTable::new();
	table.register_all(DEFAULT_DIRECTIVES);
	table
}
