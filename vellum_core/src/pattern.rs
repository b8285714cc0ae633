use std::ops::Range;

use crate::VellumError;
use crate::VellumResult;

/// How a capture slot decides where its text ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
	/// `%?` — the shortest run that lets the rest of the pattern match. Never
	/// crosses a line break.
	Lazy,
	/// `%*` — like [`CaptureKind::Lazy`] but free to span lines.
	LazyMultiline,
	/// `%+` — the longest run on the current line that lets the rest of the
	/// pattern match.
	GreedyLine,
	/// `%b` — the shortest run on the current line with balanced `()`, `[]`
	/// and `{}` outside of quoted strings.
	Balanced,
}

/// A single element of a [`MatchPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
	/// Text that must appear verbatim.
	Literal(String),
	/// `%s` — zero or more whitespace characters, newlines included.
	Whitespace,
	/// `%^` — the start of the input or the position right after a `\n`.
	LineStart,
	/// `%n` — one or more `\r` / `\n` characters.
	LineBreaks,
	/// A numbered capture slot.
	Capture(CaptureKind),
}

/// A structured match expression made of literal runs and typed capture
/// slots.
///
/// Patterns are written in a compact source form where `%` introduces a
/// segment and everything else is literal text:
///
/// ```text
/// {{%s%?%s}}                     {{ expr }}
/// @section%s(%b)%*%s@endsection  @section('name') body @endsection
/// %^%s%n                         a whitespace-only line
/// ```
///
/// Captures are numbered from 1 in the order they appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
	segments: Vec<Segment>,
	captures: usize,
}

/// The location of a successful match and of each of its captures, as byte
/// ranges into the searched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
	pub range: Range<usize>,
	pub captures: Vec<Range<usize>>,
}

impl MatchPattern {
	/// Parse the pattern source form.
	pub fn parse(source: &str) -> VellumResult<Self> {
		let mut segments = Vec::new();
		let mut literal = String::new();
		let mut chars = source.chars();

		while let Some(ch) = chars.next() {
			if ch != '%' {
				literal.push(ch);
				continue;
			}

			let Some(token) = chars.next() else {
				return Err(pattern_error(source, "trailing `%` without a segment token"));
			};

			let segment = match token {
				'%' => {
					literal.push('%');
					continue;
				}
				's' => Segment::Whitespace,
				'?' => Segment::Capture(CaptureKind::Lazy),
				'*' => Segment::Capture(CaptureKind::LazyMultiline),
				'+' => Segment::Capture(CaptureKind::GreedyLine),
				'b' => Segment::Capture(CaptureKind::Balanced),
				'^' => Segment::LineStart,
				'n' => Segment::LineBreaks,
				other => {
					return Err(pattern_error(
						source,
						format!("unknown segment token `%{other}`"),
					));
				}
			};

			if !literal.is_empty() {
				segments.push(Segment::Literal(std::mem::take(&mut literal)));
			}
			segments.push(segment);
		}

		if !literal.is_empty() {
			segments.push(Segment::Literal(literal));
		}

		if segments.is_empty() {
			return Err(pattern_error(source, "pattern is empty"));
		}

		let captures = segments
			.iter()
			.filter(|segment| matches!(segment, Segment::Capture(_)))
			.count();

		Ok(Self {
			segments,
			captures,
		})
	}

	pub fn capture_count(&self) -> usize {
		self.captures
	}

	/// Match the pattern starting exactly at byte offset `start`.
	pub fn match_at(&self, text: &str, start: usize) -> Option<PatternMatch> {
		let mut captures = Vec::with_capacity(self.captures);
		let end = match_segments(&self.segments, text, start, &mut captures)?;

		Some(PatternMatch {
			range: start..end,
			captures,
		})
	}

	/// Find the leftmost match starting at or after byte offset `from`.
	pub fn find_at(&self, text: &str, from: usize) -> Option<PatternMatch> {
		let mut start = from;

		while start <= text.len() {
			// Jump straight to candidates when the pattern opens with literal
			// text.
			if let Some(Segment::Literal(literal)) = self.segments.first() {
				start += text[start..].find(literal.as_str())?;
			}

			if let Some(found) = self.match_at(text, start) {
				return Some(found);
			}

			start = next_boundary(text, start)?;
		}

		None
	}

	/// Replace every non-overlapping match in `text` with the expansion of
	/// `rewrite`.
	pub fn replace_all(&self, text: &str, rewrite: &Rewrite) -> String {
		let mut output = String::with_capacity(text.len());
		let mut cursor = 0;

		while let Some(found) = self.find_at(text, cursor) {
			output.push_str(&text[cursor..found.range.start]);
			rewrite.expand(text, &found, &mut output);
			cursor = found.range.end;

			if found.range.is_empty() {
				let Some(next) = next_boundary(text, cursor) else {
					break;
				};
				output.push_str(&text[cursor..next]);
				cursor = next;
			}
		}

		output.push_str(&text[cursor..]);
		output
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RewritePart {
	Text(String),
	Capture(usize),
}

/// Replacement text with positional capture references: `$1` is the first
/// capture, `$0` the whole match. A `$` not followed by a digit is literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
	parts: Vec<RewritePart>,
}

impl Rewrite {
	pub fn parse(source: &str) -> Self {
		let mut parts = Vec::new();
		let mut text = String::new();
		let mut chars = source.chars().peekable();

		while let Some(ch) = chars.next() {
			if ch != '$' {
				text.push(ch);
				continue;
			}

			let mut digits = String::new();
			while let Some(&digit) = chars.peek() {
				if !digit.is_ascii_digit() {
					break;
				}
				digits.push(digit);
				chars.next();
			}

			if digits.is_empty() {
				text.push('$');
				continue;
			}

			if !text.is_empty() {
				parts.push(RewritePart::Text(std::mem::take(&mut text)));
			}
			parts.push(RewritePart::Capture(digits.parse().unwrap_or(usize::MAX)));
		}

		if !text.is_empty() {
			parts.push(RewritePart::Text(text));
		}

		Self { parts }
	}

	/// The highest capture number referenced, `0` when none are.
	pub fn highest_capture(&self) -> usize {
		self.parts
			.iter()
			.filter_map(|part| {
				match part {
					RewritePart::Capture(index) => Some(*index),
					RewritePart::Text(_) => None,
				}
			})
			.max()
			.unwrap_or(0)
	}

	pub fn expand(&self, text: &str, found: &PatternMatch, output: &mut String) {
		for part in &self.parts {
			match part {
				RewritePart::Text(value) => output.push_str(value),
				RewritePart::Capture(0) => output.push_str(&text[found.range.clone()]),
				RewritePart::Capture(index) => {
					if let Some(range) = found.captures.get(index - 1) {
						output.push_str(&text[range.clone()]);
					}
				}
			}
		}
	}
}

fn pattern_error(pattern: &str, reason: impl Into<String>) -> VellumError {
	VellumError::Pattern {
		pattern: pattern.to_string(),
		reason: reason.into(),
	}
}

fn next_boundary(text: &str, position: usize) -> Option<usize> {
	text[position..]
		.chars()
		.next()
		.map(|ch| position + ch.len_utf8())
}

fn run_length(text: &str, predicate: impl Fn(char) -> bool) -> usize {
	text.find(|ch: char| !predicate(ch)).unwrap_or(text.len())
}

fn match_segments(
	segments: &[Segment],
	text: &str,
	position: usize,
	captures: &mut Vec<Range<usize>>,
) -> Option<usize> {
	let Some((segment, rest)) = segments.split_first() else {
		return Some(position);
	};

	match segment {
		Segment::Literal(literal) => {
			if text[position..].starts_with(literal.as_str()) {
				match_segments(rest, text, position + literal.len(), captures)
			} else {
				None
			}
		}
		Segment::LineStart => {
			if position == 0 || text[..position].ends_with('\n') {
				match_segments(rest, text, position, captures)
			} else {
				None
			}
		}
		Segment::Whitespace => {
			let end = position + run_length(&text[position..], char::is_whitespace);
			continue_at(rest, text, (position..=end).rev(), captures)
		}
		Segment::LineBreaks => {
			let end = position + run_length(&text[position..], |ch| ch == '\r' || ch == '\n');
			if end == position {
				return None;
			}
			continue_at(rest, text, (position + 1..=end).rev(), captures)
		}
		Segment::Capture(kind) => {
			let line_end = position + text[position..].find('\n').unwrap_or(text.len() - position);
			match kind {
				CaptureKind::Lazy => capture_at(rest, text, position, position..=line_end, captures),
				CaptureKind::LazyMultiline => {
					capture_at(rest, text, position, position..=text.len(), captures)
				}
				CaptureKind::GreedyLine => {
					capture_at(rest, text, position, (position..=line_end).rev(), captures)
				}
				CaptureKind::Balanced => {
					let ends = balanced_ends(text, position, line_end);
					capture_at(rest, text, position, ends.into_iter(), captures)
				}
			}
		}
	}
}

fn continue_at(
	rest: &[Segment],
	text: &str,
	positions: impl Iterator<Item = usize>,
	captures: &mut Vec<Range<usize>>,
) -> Option<usize> {
	positions
		.filter(|position| text.is_char_boundary(*position))
		.find_map(|position| match_segments(rest, text, position, captures))
}

fn capture_at(
	rest: &[Segment],
	text: &str,
	start: usize,
	ends: impl Iterator<Item = usize>,
	captures: &mut Vec<Range<usize>>,
) -> Option<usize> {
	for end in ends.filter(|end| text.is_char_boundary(*end)) {
		captures.push(start..end);
		if let Some(matched) = match_segments(rest, text, end, captures) {
			return Some(matched);
		}
		captures.pop();
	}

	None
}

/// Candidate end offsets (ascending) for a balanced capture beginning at
/// `start`. Scanning stops at `limit` or at the first closing bracket without
/// a matching opener.
fn balanced_ends(text: &str, start: usize, limit: usize) -> Vec<usize> {
	let mut ends = vec![start];
	let mut depth = 0_usize;
	let mut quote: Option<char> = None;
	let mut escaped = false;

	for (offset, ch) in text[start..limit].char_indices() {
		if let Some(delimiter) = quote {
			if escaped {
				escaped = false;
			} else if ch == '\\' {
				escaped = true;
			} else if ch == delimiter {
				quote = None;
			}
		} else {
			match ch {
				'\'' | '"' => quote = Some(ch),
				'(' | '[' | '{' => depth += 1,
				')' | ']' | '}' => {
					if depth == 0 {
						break;
					}
					depth -= 1;
				}
				_ => {}
			}
		}

		if quote.is_none() && depth == 0 {
			ends.push(start + offset + ch.len_utf8());
		}
	}

	ends
}
