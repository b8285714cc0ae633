use std::collections::BTreeMap;
use std::collections::HashMap;

use tracing::debug;

/// A piece of rendered output. Region references stay symbolic until the
/// render call finishes so a layout can place `@content` before the section
/// that fills it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
	Text(String),
	Region(String),
}

/// Where a render pass currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPhase {
	/// Nothing has been declared yet.
	Idle,
	/// A template declared the layout it extends.
	ExtendsDeclared,
	/// At least one region has been opened.
	RegionsCollecting,
	/// A template finished and its regions were resolved; its ancestor (if
	/// any) is next.
	Resolved,
	/// The final output was assembled.
	Done,
}

#[derive(Debug)]
struct OpenRegion {
	name: String,
	pass: usize,
	body: Vec<Chunk>,
}

#[derive(Debug)]
struct ResolvedRegion {
	layer: usize,
	body: Vec<Chunk>,
}

/// Regions and layer of an enclosing render, held while an included or
/// imported view renders.
#[derive(Debug)]
pub struct RegionScope {
	layer: usize,
	regions: HashMap<String, ResolvedRegion>,
}

/// Layout state for a single render call.
///
/// Templates in an extends chain run child first. Each step up the chain is
/// one layer higher, and a region resolved on a lower layer is never
/// replaced by a higher one, which is how a child overrides its layout.
/// Within one layer the last section of a given name wins.
#[derive(Debug)]
pub struct LayoutContext {
	phase: LayoutPhase,
	extends: Option<String>,
	layer: usize,
	output: Vec<Chunk>,
	suspended: Vec<Vec<Chunk>>,
	stack: Vec<OpenRegion>,
	regions: HashMap<String, ResolvedRegion>,
	imports: BTreeMap<String, String>,
}

impl Default for LayoutContext {
	fn default() -> Self {
		Self::new()
	}
}

impl LayoutContext {
	pub fn new() -> Self {
		Self {
			phase: LayoutPhase::Idle,
			extends: None,
			layer: 0,
			output: Vec::new(),
			suspended: Vec::new(),
			stack: Vec::new(),
			regions: HashMap::new(),
			imports: BTreeMap::new(),
		}
	}

	pub fn phase(&self) -> LayoutPhase {
		self.phase
	}

	pub fn layer(&self) -> usize {
		self.layer
	}

	pub fn set_layer(&mut self, layer: usize) {
		self.layer = layer;
	}

	/// Record `view` as the ancestor of the running template. A later
	/// declaration replaces an earlier one.
	pub fn declare_extends(&mut self, view: impl Into<String>) {
		let view = view.into();
		if let Some(previous) = &self.extends {
			debug!(%previous, replacement = %view, "extends declared more than once");
		}
		self.extends = Some(view);
		if self.phase == LayoutPhase::Idle {
			self.phase = LayoutPhase::ExtendsDeclared;
		}
	}

	/// Swap the pending extends target, returning the previous one.
	pub fn replace_extends(&mut self, view: Option<String>) -> Option<String> {
		std::mem::replace(&mut self.extends, view)
	}

	/// Start buffering output for a new template.
	pub fn begin_pass(&mut self) {
		self.suspended.push(std::mem::take(&mut self.output));
	}

	/// Close the regions the template left open and return its output.
	pub fn end_pass(&mut self) -> Vec<Chunk> {
		let pass = self.suspended.len();
		while self.stack.last().is_some_and(|region| region.pass == pass) {
			self.close_top_region();
		}

		if self.phase != LayoutPhase::Idle {
			self.phase = LayoutPhase::Resolved;
		}

		let outer = self.suspended.pop().unwrap_or_default();
		std::mem::replace(&mut self.output, outer)
	}

	pub fn write_text(&mut self, text: &str) {
		if text.is_empty() {
			return;
		}

		let sink = self.sink();
		if let Some(Chunk::Text(last)) = sink.last_mut() {
			last.push_str(text);
		} else {
			sink.push(Chunk::Text(text.to_string()));
		}
	}

	/// Emit a placeholder for the region `name`.
	pub fn write_region(&mut self, name: impl Into<String>) {
		self.sink().push(Chunk::Region(name.into()));
	}

	/// Open the region `name`. A region the same template left open is closed
	/// first, so sections never nest.
	pub fn start_region(&mut self, name: impl Into<String>) {
		let pass = self.suspended.len();
		if self.stack.last().is_some_and(|region| region.pass == pass) {
			self.close_top_region();
		}

		self.stack.push(OpenRegion {
			name: name.into(),
			pass,
			body: Vec::new(),
		});
		self.phase = LayoutPhase::RegionsCollecting;
	}

	/// Close the most recently opened region of the running template. Does
	/// nothing when that template has no open region.
	pub fn stop_region(&mut self) {
		let pass = self.suspended.len();
		if self.stack.last().is_some_and(|region| region.pass == pass) {
			self.close_top_region();
		} else {
			debug!("stop_section without an open section");
		}
	}

	/// The resolved body of region `name`, with nested region references
	/// substituted.
	pub fn region(&self, name: &str) -> Option<String> {
		self.regions
			.get(name)
			.map(|region| self.resolve(&region.body))
	}

	/// Set the regions of the running render aside so a nested view starts
	/// from an empty region map on layer 0. Hand the result back to
	/// [`LayoutContext::leave_scope`] once the nested output is resolved.
	#[must_use]
	pub fn enter_scope(&mut self) -> RegionScope {
		RegionScope {
			layer: std::mem::replace(&mut self.layer, 0),
			regions: std::mem::take(&mut self.regions),
		}
	}

	/// Drop the nested view's regions and restore the enclosing ones.
	pub fn leave_scope(&mut self, scope: RegionScope) {
		self.layer = scope.layer;
		self.regions = scope.regions;
	}

	pub fn set_import(&mut self, alias: impl Into<String>, content: String) {
		self.imports.insert(alias.into(), content);
	}

	pub fn imports(&self) -> &BTreeMap<String, String> {
		&self.imports
	}

	/// Substitute region references in `chunks`. Unknown regions render as
	/// nothing, as does a region that refers back to itself.
	pub fn resolve(&self, chunks: &[Chunk]) -> String {
		let mut output = String::new();
		let mut active = Vec::new();
		self.resolve_into(chunks, &mut output, &mut active);
		output
	}

	/// Assemble the final output of the render call.
	pub fn finish(&mut self, chunks: &[Chunk]) -> String {
		let output = self.resolve(chunks);
		self.phase = LayoutPhase::Done;
		output
	}

	fn resolve_into<'a>(
		&'a self,
		chunks: &'a [Chunk],
		output: &mut String,
		active: &mut Vec<&'a str>,
	) {
		for chunk in chunks {
			match chunk {
				Chunk::Text(text) => output.push_str(text),
				Chunk::Region(name) => {
					if active.contains(&name.as_str()) {
						continue;
					}
					let Some(region) = self.regions.get(name) else {
						continue;
					};
					active.push(name);
					self.resolve_into(&region.body, output, active);
					active.pop();
				}
			}
		}
	}

	fn sink(&mut self) -> &mut Vec<Chunk> {
		let pass = self.suspended.len();
		match self.stack.last_mut() {
			Some(region) if region.pass == pass => &mut region.body,
			_ => &mut self.output,
		}
	}

	fn close_top_region(&mut self) {
		let Some(OpenRegion { name, body, .. }) = self.stack.pop() else {
			return;
		};

		match self.regions.get(&name) {
			Some(existing) if existing.layer < self.layer => {
				debug!(region = %name, "keeping override from a descendant template");
			}
			_ => {
				self.regions.insert(
					name,
					ResolvedRegion {
						layer: self.layer,
						body,
					},
				);
			}
		}
	}
}
