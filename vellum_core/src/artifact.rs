use derive_more::Deref;
use logos::Logos;

use crate::VellumError;
use crate::VellumResult;

/// Opens a statement tag in artifact source.
pub const TAG_OPEN: &str = "<?vm";
/// Closes a statement tag in artifact source.
pub const TAG_CLOSE: &str = "?>";

/// Raw tokens produced by logos for flat tokenization of artifact source.
#[derive(Logos, Debug, PartialEq)]
enum RawToken {
	#[token("<?vm")]
	TagOpen,
	#[token("?>")]
	TagClose,
	#[token("\n")]
	Newline,
	#[token("<")]
	Lt,
	#[token("?")]
	Question,
	#[regex(r"[^<?\n]+")]
	Text,
}

/// A chunk of artifact source: literal text or the body of a statement tag.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
	Text(String),
	Tag { body: String, line: usize },
}

/// A parsed artifact statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	/// Literal output.
	Text(String),
	/// `echo escape(expr)` or `echo expr`.
	Echo { expr: String, escape: bool },
	/// `foreach (iterable as binding): ... endforeach`. A single binding
	/// receives each value, maps included. `key, value` binds map keys or
	/// sequence indices alongside the values.
	ForEach {
		iterable: String,
		binding: String,
		body: Vec<Node>,
	},
	/// `let name = expr` / `set name = expr`.
	Assign { name: String, expr: String },
	/// `layout.extend(view)`.
	Extend(String),
	/// `layout.start_section(name)`.
	StartSection(String),
	/// `layout.stop_section()`.
	StopSection,
	/// `layout.content(name)`.
	Content(String),
	/// `layout.include(view[, data])`.
	Include(String),
	/// `layout.import(view[, alias])`.
	Import(String),
	/// `hook(args...)`.
	Hook(String),
}

/// A parsed artifact, ready to be executed by the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deref)]
pub struct Program(#[deref] Vec<Node>);

impl Program {
	pub fn nodes(&self) -> &[Node] {
		&self.0
	}
}

/// Parse artifact source. `path` is only used in error messages.
pub fn parse_artifact(source: &str, path: &str) -> VellumResult<Program> {
	let pieces = split_pieces(source, path)?;
	let mut parser = ArtifactParser {
		path,
		stack: vec![Frame::root()],
	};

	for piece in pieces {
		match piece {
			Piece::Text(text) => parser.push(Node::Text(text)),
			Piece::Tag { body, line } => parser.statement(&body, line)?,
		}
	}

	parser.finish()
}

/// Split `source` on `<?vm` / `?>` tags, tracking the line each tag starts
/// on.
fn split_pieces(source: &str, path: &str) -> VellumResult<Vec<Piece>> {
	let mut pieces = Vec::new();
	let mut text = String::new();
	let mut tag: Option<(String, usize)> = None;
	let mut line = 1;

	for (token, span) in RawToken::lexer(source).spanned() {
		let slice = &source[span];

		match token {
			Ok(RawToken::TagOpen) if tag.is_none() => {
				if !text.is_empty() {
					pieces.push(Piece::Text(std::mem::take(&mut text)));
				}
				tag = Some((String::new(), line));
			}
			Ok(RawToken::TagClose) if tag.is_some() => {
				if let Some((body, start_line)) = tag.take() {
					pieces.push(Piece::Tag {
						body,
						line: start_line,
					});
				}
			}
			// Unrecognized bytes are kept as they are.
			_ => {
				match tag.as_mut() {
					Some((body, _)) => body.push_str(slice),
					None => text.push_str(slice),
				}
			}
		}

		line += slice.matches('\n').count();
	}

	if let Some((_, start_line)) = tag {
		return Err(VellumError::ArtifactSyntax {
			path: path.to_string(),
			line: start_line,
			reason: format!("`{TAG_OPEN}` is never closed with `{TAG_CLOSE}`"),
		});
	}

	if !text.is_empty() {
		pieces.push(Piece::Text(text));
	}

	Ok(pieces)
}

struct Frame {
	nodes: Vec<Node>,
	/// `(iterable, binding, line)` of the loop this frame collects the body
	/// for. `None` for the root frame.
	opened_by: Option<(String, String, usize)>,
}

impl Frame {
	fn root() -> Self {
		Self {
			nodes: Vec::new(),
			opened_by: None,
		}
	}
}

struct ArtifactParser<'a> {
	path: &'a str,
	stack: Vec<Frame>,
}

impl ArtifactParser<'_> {
	fn push(&mut self, node: Node) {
		if let Some(frame) = self.stack.last_mut() {
			frame.nodes.push(node);
		}
	}

	fn error(&self, line: usize, reason: impl Into<String>) -> VellumError {
		VellumError::ArtifactSyntax {
			path: self.path.to_string(),
			line,
			reason: reason.into(),
		}
	}

	fn statement(&mut self, body: &str, line: usize) -> VellumResult<()> {
		let statement = body.trim();

		if let Some(expr) = statement.strip_prefix("echo ") {
			let expr = expr.trim();
			let node = match call_arguments(expr, "escape") {
				Some(inner) => {
					Node::Echo {
						expr: inner.to_string(),
						escape: true,
					}
				}
				None => {
					Node::Echo {
						expr: expr.to_string(),
						escape: false,
					}
				}
			};
			self.push(node);
			return Ok(());
		}

		if let Some(header) = statement.strip_prefix("foreach") {
			let header = header
				.trim()
				.strip_suffix(':')
				.map(str::trim_end)
				.and_then(|header| header.strip_prefix('('))
				.and_then(|header| header.strip_suffix(')'))
				.ok_or_else(|| self.error(line, format!("malformed loop header `{statement}`")))?;
			let (iterable, binding) = header
				.rsplit_once(" as ")
				.ok_or_else(|| self.error(line, format!("loop header `{header}` is missing `as`")))?;
			self.stack.push(Frame {
				nodes: Vec::new(),
				opened_by: Some((
					iterable.trim().to_string(),
					binding.trim().to_string(),
					line,
				)),
			});
			return Ok(());
		}

		if statement.trim_end_matches(';') == "endforeach" {
			return self.close_loop(line);
		}

		if let Some(node) = layout_call(statement) {
			self.push(node);
			return Ok(());
		}

		for code in split_top_level(statement, &[';', '\n']) {
			let code = code.trim();
			if code.is_empty() {
				continue;
			}
			let node = assignment(code)
				.ok_or_else(|| self.error(line, format!("unrecognized statement `{code}`")))?;
			self.push(node);
		}

		Ok(())
	}

	fn close_loop(&mut self, line: usize) -> VellumResult<()> {
		if self.stack.len() < 2 {
			return Err(self.error(line, "`endforeach` without a matching `foreach`"));
		}

		let Some(Frame {
			nodes,
			opened_by: Some((iterable, binding, _)),
		}) = self.stack.pop()
		else {
			return Err(self.error(line, "`endforeach` without a matching `foreach`"));
		};

		self.push(Node::ForEach {
			iterable,
			binding,
			body: nodes,
		});
		Ok(())
	}

	fn finish(mut self) -> VellumResult<Program> {
		if self.stack.len() > 1 {
			let line = self
				.stack
				.last()
				.and_then(|frame| frame.opened_by.as_ref())
				.map_or(0, |(_, _, line)| *line);
			return Err(self.error(line, "`foreach` is never closed with `endforeach`"));
		}

		Ok(Program(self.stack.pop().map(|frame| frame.nodes).unwrap_or_default()))
	}
}

fn layout_call(statement: &str) -> Option<Node> {
	if let Some(args) = call_arguments(statement, "layout.extend") {
		return Some(Node::Extend(args.to_string()));
	}
	if let Some(args) = call_arguments(statement, "layout.start_section") {
		return Some(Node::StartSection(args.to_string()));
	}
	if call_arguments(statement, "layout.stop_section").is_some() {
		return Some(Node::StopSection);
	}
	if let Some(args) = call_arguments(statement, "layout.content") {
		return Some(Node::Content(args.to_string()));
	}
	if let Some(args) = call_arguments(statement, "layout.include") {
		return Some(Node::Include(args.to_string()));
	}
	if let Some(args) = call_arguments(statement, "layout.import") {
		return Some(Node::Import(args.to_string()));
	}
	if let Some(args) = call_arguments(statement, "hook") {
		return Some(Node::Hook(args.to_string()));
	}

	None
}

/// When `statement` is exactly `name(args)` (optionally followed by `;`),
/// return the trimmed `args`.
fn call_arguments<'a>(statement: &'a str, name: &str) -> Option<&'a str> {
	let rest = statement.strip_prefix(name)?.trim_start();
	let inner = rest
		.trim_end()
		.trim_end_matches(';')
		.trim_end()
		.strip_prefix('(')?
		.strip_suffix(')')?;

	// `escape(a) ~ escape(b)` must not be read as a single call.
	let closing = split_top_level(inner, &[')']);
	(closing.len() == 1).then(|| inner.trim())
}

fn assignment(code: &str) -> Option<Node> {
	let rest = code
		.strip_prefix("let ")
		.or_else(|| code.strip_prefix("set "))?;
	let (name, expr) = rest.split_once('=')?;
	let name = name.trim();

	if name.is_empty() || !name.chars().all(|ch| ch.is_alphanumeric() || ch == '_') {
		return None;
	}

	Some(Node::Assign {
		name: name.to_string(),
		expr: expr.trim().to_string(),
	})
}

/// Split `input` on any of `separators` that appear outside quoted strings
/// and brackets. An unbalanced closing bracket also counts as a separator
/// when it is listed.
pub fn split_top_level<'a>(input: &'a str, separators: &[char]) -> Vec<&'a str> {
	let mut parts = Vec::new();
	let mut depth = 0_usize;
	let mut quote: Option<char> = None;
	let mut escaped = false;
	let mut start = 0;

	for (offset, ch) in input.char_indices() {
		if let Some(delimiter) = quote {
			if escaped {
				escaped = false;
			} else if ch == '\\' {
				escaped = true;
			} else if ch == delimiter {
				quote = None;
			}
			continue;
		}

		match ch {
			'\'' | '"' => quote = Some(ch),
			'(' | '[' | '{' => depth += 1,
			')' | ']' | '}' if depth > 0 => depth -= 1,
			_ if depth == 0 && separators.contains(&ch) => {
				parts.push(&input[start..offset]);
				start = offset + ch.len_utf8();
			}
			_ => {}
		}
	}

	parts.push(&input[start..]);
	parts
}
