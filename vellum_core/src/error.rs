use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum VellumError {
	#[error(transparent)]
	#[diagnostic(code(vellum::io_error))]
	Io(#[from] std::io::Error),

	/// The input directory is missing, not a directory or read-only by its
	/// permission bits, or the output path lacks a trailing separator.
	#[error("invalid view directory `{path}`: {reason}")]
	#[diagnostic(
		code(vellum::directory),
		help("the input directory must exist and be writable, and the output directory must end with `/`")
	)]
	Directory { path: String, reason: String },

	#[error("view `{view}` not found at `{path}`")]
	#[diagnostic(
		code(vellum::source_not_found),
		help("check the view name and the configured input directory and source extension")
	)]
	SourceNotFound { view: String, path: String },

	#[error("invalid directive pattern `{pattern}`: {reason}")]
	#[diagnostic(
		code(vellum::pattern),
		help("patterns support `%s`, `%?`, `%*`, `%+`, `%b`, `%^`, `%n` and `%%`")
	)]
	Pattern { pattern: String, reason: String },

	#[error("malformed artifact `{path}` at line {line}: {reason}")]
	#[diagnostic(
		code(vellum::artifact_syntax),
		help("recompile the view with `vellum compile --force`")
	)]
	ArtifactSyntax {
		path: String,
		line: usize,
		reason: String,
	},

	#[error("failed to render view `{view}`: {reason}")]
	#[diagnostic(code(vellum::render))]
	Render { view: String, reason: String },

	#[error("layout cycle detected: `{0}` extends itself")]
	#[diagnostic(
		code(vellum::layout_cycle),
		help("remove the `@extends` declaration that points back into the chain")
	)]
	LayoutCycle(String),

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(vellum::config_parse),
		help("check that vellum.toml is valid TOML with [views], [data] and/or [[directives]] sections")
	)]
	ConfigParse(String),

	#[error("failed to load data file `{path}`: {reason}")]
	#[diagnostic(code(vellum::data_file))]
	DataFile { path: String, reason: String },

	#[error("unsupported data file format: `{0}`")]
	#[diagnostic(
		code(vellum::unsupported_format),
		help("supported formats: text, json, toml, yaml, yml")
	)]
	UnsupportedDataFormat(String),
}

pub type VellumResult<T> = Result<T, VellumError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
