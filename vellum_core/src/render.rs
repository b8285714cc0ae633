use std::collections::BTreeMap;
use std::collections::HashMap;

use minijinja::Environment;
use minijinja::UndefinedBehavior;
use minijinja::Value;
use minijinja::value::ValueKind;
use tracing::debug;
use tracing::warn;

use crate::VellumError;
use crate::VellumResult;
use crate::artifact::Node;
use crate::artifact::parse_artifact;
use crate::artifact::split_top_level;
use crate::cache::ViewCompiler;
use crate::layout::Chunk;
use crate::layout::LayoutContext;

/// The process-provided function behind `@hook(...)`. It receives the
/// evaluated arguments and returns raw output.
pub type HookFn = dyn Fn(&[Value]) -> VellumResult<String>;

/// Views deeper than this in an include chain are treated as a runaway
/// recursion.
pub const MAX_INCLUDE_DEPTH: usize = 64;

/// Renders views by executing their compiled artifacts.
///
/// Every view that takes part in a render, including layouts, includes and
/// imports, goes through the same [`ViewCompiler`] and is therefore
/// recompiled when its source is newer than its artifact.
pub struct Renderer<'a> {
	compiler: &'a ViewCompiler,
	hook: Option<Box<HookFn>>,
}

impl<'a> Renderer<'a> {
	pub fn new(compiler: &'a ViewCompiler) -> Self {
		Self {
			compiler,
			hook: None,
		}
	}

	/// Install the function called by `@hook(...)`.
	#[must_use]
	pub fn with_hook(mut self, hook: impl Fn(&[Value]) -> VellumResult<String> + 'static) -> Self {
		self.hook = Some(Box::new(hook));
		self
	}

	/// Render `view` with `data` as the top-level variables.
	#[allow(clippy::implicit_hasher)]
	pub fn render(
		&self,
		view: &str,
		data: &HashMap<String, serde_json::Value>,
	) -> VellumResult<String> {
		let mut layout = LayoutContext::new();
		let mut scope = Scope::new(data);
		let chunks = self.render_chain(view, &mut layout, &mut scope, &mut Vec::new())?;

		Ok(layout.finish(&chunks))
	}

	/// Run `view` and then each ancestor it extends. The output of the last
	/// template in the chain is returned.
	fn render_chain(
		&self,
		view: &str,
		layout: &mut LayoutContext,
		scope: &mut Scope,
		includes: &mut Vec<String>,
	) -> VellumResult<Vec<Chunk>> {
		let outer_extends = layout.replace_extends(None);
		let base_layer = layout.layer();
		let mut chain = vec![view.to_string()];
		let mut current = view.to_string();

		let output = loop {
			let output = self.execute_view(&current, layout, scope, includes)?;

			let Some(parent) = layout.replace_extends(None) else {
				break output;
			};

			if chain.contains(&parent) {
				return Err(VellumError::LayoutCycle(parent));
			}

			if !self.compiler.exists(&parent) {
				warn!(view = %current, extends = %parent, "extended layout not found, keeping the view's own output");
				break output;
			}

			debug!(child = %current, parent = %parent, "rendering extended layout");
			chain.push(parent.clone());
			layout.set_layer(layout.layer() + 1);
			current = parent;
		};

		layout.set_layer(base_layer);
		layout.replace_extends(outer_extends);

		Ok(output)
	}

	fn execute_view(
		&self,
		view: &str,
		layout: &mut LayoutContext,
		scope: &mut Scope,
		includes: &mut Vec<String>,
	) -> VellumResult<Vec<Chunk>> {
		let report = self.compiler.compile(view)?;
		let path = report.unit.artifact_path;
		let source = std::fs::read_to_string(&path)?;
		let program = parse_artifact(&source, &path.display().to_string())?;
		let env = environment();

		layout.begin_pass();
		let mut run = Execution {
			renderer: self,
			env: &env,
			view,
			layout,
			scope,
			includes,
		};
		let result = run.nodes(program.nodes());
		let output = run.layout.end_pass();
		result?;

		Ok(output)
	}
}

/// State for executing the statements of one view.
struct Execution<'r, 'e, 's> {
	renderer: &'r Renderer<'r>,
	env: &'e Environment<'s>,
	view: &'r str,
	layout: &'r mut LayoutContext,
	scope: &'r mut Scope,
	includes: &'r mut Vec<String>,
}

impl<'s> Execution<'_, '_, 's> {
	fn nodes(&mut self, nodes: &'s [Node]) -> VellumResult<()> {
		for node in nodes {
			self.node(node)?;
		}

		Ok(())
	}

	fn node(&mut self, node: &'s Node) -> VellumResult<()> {
		match node {
			Node::Text(text) => self.layout.write_text(text),
			Node::Echo { expr, escape } => {
				let text = display_value(&self.eval(expr)?);
				if *escape {
					self.layout.write_text(&escape_html(&text));
				} else {
					self.layout.write_text(&text);
				}
			}
			Node::ForEach {
				iterable,
				binding,
				body,
			} => self.for_each(iterable, binding, body)?,
			Node::Assign { name, expr } => {
				let value = self.eval(expr)?;
				self.scope.bind(name, value);
			}
			Node::Extend(args) => {
				if let Some(view) = self.eval_name(args)? {
					self.layout.declare_extends(view);
				}
			}
			Node::StartSection(args) => {
				if let Some(name) = self.eval_name(args)? {
					self.layout.start_region(name);
				}
			}
			Node::StopSection => self.layout.stop_region(),
			Node::Content(args) => {
				if let Some(name) = self.eval_name(args)? {
					self.layout.write_region(name);
				}
			}
			Node::Include(args) => self.include(args)?,
			Node::Import(args) => self.import(args)?,
			Node::Hook(args) => self.hook(args)?,
		}

		Ok(())
	}

	fn for_each(&mut self, iterable: &'s str, binding: &'s str, body: &'s [Node]) -> VellumResult<()> {
		let value = self.eval(iterable)?;
		let items = value.try_iter().map_err(|e| self.error(e))?;
		let names: Vec<&str> = binding.split(',').map(str::trim).collect();

		for (index, item) in items.enumerate() {
			self.scope.push_frame();
			match names.as_slice() {
				[key_name, value_name] => {
					if value.kind() == ValueKind::Map {
						let entry = value.get_item(&item).map_err(|e| self.error(e))?;
						self.scope.bind(key_name, item);
						self.scope.bind(value_name, entry);
					} else {
						self.scope.bind(key_name, Value::from(index));
						self.scope.bind(value_name, item);
					}
				}
				_ => {
					let item = if value.kind() == ValueKind::Map {
						value.get_item(&item).map_err(|e| self.error(e))?
					} else {
						item
					};
					self.scope.bind(binding.trim(), item);
				}
			}
			let result = self.nodes(body);
			self.scope.pop_frame();
			result?;
		}

		Ok(())
	}

	fn include(&mut self, args: &'s str) -> VellumResult<()> {
		let parts = arguments(args);
		let Some(target) = self.eval_name_part(parts.first().copied())? else {
			return Ok(());
		};

		self.scope.push_frame();
		let result = self.include_with(&target, parts.get(1).copied());
		self.scope.pop_frame();

		self.layout.write_text(&result?);
		Ok(())
	}

	fn include_with(&mut self, target: &str, data: Option<&'s str>) -> VellumResult<String> {
		if let Some(data) = data {
			let data = self.eval(data)?;
			self.bind_map(&data)?;
		}

		self.render_nested(target)
	}

	fn import(&mut self, args: &'s str) -> VellumResult<()> {
		let parts = arguments(args);
		let Some(target) = self.eval_name_part(parts.first().copied())? else {
			return Ok(());
		};
		let alias = self
			.eval_name_part(parts.get(1).copied())?
			.unwrap_or_else(|| target.clone());

		let content = self.render_nested(&target)?;
		debug!(view = %target, %alias, "imported view");
		self.layout.set_import(alias, content);

		Ok(())
	}

	fn hook(&mut self, args: &'s str) -> VellumResult<()> {
		let values = arguments(args)
			.into_iter()
			.map(|arg| self.eval(arg))
			.collect::<VellumResult<Vec<_>>>()?;

		match &self.renderer.hook {
			Some(hook) => {
				let output = hook(values.as_slice())?;
				self.layout.write_text(&output);
			}
			None => debug!(view = %self.view, "no hook registered, skipping `@hook`"),
		}

		Ok(())
	}

	/// Render `target` with its own region map and return its resolved
	/// output. Sections of the nested view never reach the caller's regions.
	fn render_nested(&mut self, target: &str) -> VellumResult<String> {
		if self.includes.len() >= MAX_INCLUDE_DEPTH || self.includes.iter().any(|view| view == target) {
			return Err(VellumError::Render {
				view: self.view.to_string(),
				reason: format!("`{target}` includes itself"),
			});
		}

		self.includes.push(target.to_string());
		let outer = self.layout.enter_scope();
		let result = self
			.renderer
			.render_chain(target, self.layout, self.scope, self.includes)
			.map(|chunks| self.layout.resolve(&chunks));
		self.layout.leave_scope(outer);
		self.includes.pop();

		result
	}

	fn bind_map(&mut self, data: &Value) -> VellumResult<()> {
		if data.kind() != ValueKind::Map {
			return Err(VellumError::Render {
				view: self.view.to_string(),
				reason: format!("include data must be a map, got {}", data.kind()),
			});
		}

		for key in data.try_iter().map_err(|e| self.error(e))? {
			let value = data.get_item(&key).map_err(|e| self.error(e))?;
			self.scope.bind(&key.to_string(), value);
		}

		Ok(())
	}

	fn eval(&self, expr: &'s str) -> VellumResult<Value> {
		let expr = expr.trim();
		if expr.is_empty() {
			return Ok(Value::UNDEFINED);
		}

		let expression = self
			.env
			.compile_expression(expr)
			.map_err(|e| self.error(e))?;

		expression
			.eval(self.scope.context(self.layout.imports()))
			.map_err(|e| self.error(e))
	}

	/// Evaluate a view or region name. Empty arguments yield `None`.
	fn eval_name(&self, args: &'s str) -> VellumResult<Option<String>> {
		self.eval_name_part(arguments(args).first().copied())
	}

	fn eval_name_part(&self, part: Option<&'s str>) -> VellumResult<Option<String>> {
		let Some(part) = part.filter(|part| !part.trim().is_empty()) else {
			return Ok(None);
		};

		let value = self.eval(part)?;
		Ok(Some(
			value
				.as_str()
				.map_or_else(|| value.to_string(), str::to_string),
		))
	}

	fn error(&self, error: minijinja::Error) -> VellumError {
		VellumError::Render {
			view: self.view.to_string(),
			reason: error.to_string(),
		}
	}
}

/// Variables visible to expressions: the render data at the bottom, one
/// frame per loop iteration or include above it.
struct Scope {
	frames: Vec<BTreeMap<String, Value>>,
}

impl Scope {
	fn new(data: &HashMap<String, serde_json::Value>) -> Self {
		let base = data
			.iter()
			.map(|(key, value)| (key.clone(), Value::from_serialize(value)))
			.collect();

		Self { frames: vec![base] }
	}

	fn push_frame(&mut self) {
		self.frames.push(BTreeMap::new());
	}

	fn pop_frame(&mut self) {
		if self.frames.len() > 1 {
			self.frames.pop();
		}
	}

	fn bind(&mut self, name: &str, value: Value) {
		if let Some(frame) = self.frames.last_mut() {
			frame.insert(name.to_string(), value);
		}
	}

	fn context(&self, imports: &BTreeMap<String, String>) -> Value {
		let mut merged: BTreeMap<String, Value> = BTreeMap::new();
		merged.insert("imports".to_string(), Value::from_serialize(imports));

		for frame in &self.frames {
			for (name, value) in frame {
				merged.insert(name.clone(), value.clone());
			}
		}

		Value::from_serialize(&merged)
	}
}

fn environment<'s>() -> Environment<'s> {
	let mut env = Environment::new();
	env.set_undefined_behavior(UndefinedBehavior::Lenient);
	env
}

/// Split call arguments at top-level commas, dropping empty trailing ones.
fn arguments(args: &str) -> Vec<&str> {
	let mut parts = split_top_level(args, &[',']);
	if parts.last().is_some_and(|part| part.trim().is_empty()) {
		parts.pop();
	}
	parts
}

/// Text written for a value: nothing for undefined and none.
fn display_value(value: &Value) -> String {
	if value.is_undefined() || value.is_none() {
		String::new()
	} else {
		value.to_string()
	}
}

/// Escape HTML special characters.
///
/// ```
/// use vellum_core::escape_html;
///
/// assert_eq!(
/// 	escape_html("<a href=\"x\">Tom & 'Jerry'</a>"),
/// 	"&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;"
/// );
/// ```
pub fn escape_html(text: &str) -> String {
	let mut escaped = String::with_capacity(text.len());
	for ch in text.chars() {
		match ch {
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'&' => escaped.push_str("&amp;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#x27;"),
			_ => escaped.push(ch),
		}
	}
	escaped
}
