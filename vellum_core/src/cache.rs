use std::path::MAIN_SEPARATOR;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use ignore::gitignore::Gitignore;
use ignore::gitignore::GitignoreBuilder;
use tracing::debug;

use crate::VellumError;
use crate::VellumResult;
use crate::compiler::compile;
use crate::directives::RuleTable;
use crate::directives::default_rule_table;

/// Default extension of template source files.
pub const DEFAULT_SOURCE_EXTENSION: &str = "tmpl";
/// Default extension of compiled artifacts.
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "out";

/// Where sources are read from and artifacts written to.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
	/// Root directory of template sources. Nested views keep their directory
	/// structure below it.
	pub input_dir: PathBuf,
	/// Root directory of compiled artifacts. Must end with a path separator.
	pub output_dir: PathBuf,
	pub source_extension: String,
	pub artifact_extension: String,
	/// Gitignore-style patterns, relative to `input_dir`, skipped by
	/// [`ViewCompiler::compile_all`].
	pub exclude_patterns: Vec<String>,
}

impl CompilerOptions {
	pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
		Self {
			input_dir: input_dir.into(),
			output_dir: output_dir.into(),
			source_extension: DEFAULT_SOURCE_EXTENSION.to_string(),
			artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
			exclude_patterns: Vec::new(),
		}
	}

	/// Map a view name onto its source and artifact locations.
	///
	/// `layouts/app` reads `<input>/layouts/app.tmpl` and writes
	/// `<output>/layouts.app.out`.
	pub fn resolve(&self, view: &str) -> CompilationUnit {
		let view = view.trim_start_matches(['/', '\\']);
		let source_path = self
			.input_dir
			.join(format!("{view}.{}", self.source_extension));
		let artifact_path = self.output_dir.join(format!(
			"{}.{}",
			flatten_view_name(view),
			self.artifact_extension
		));

		CompilationUnit {
			view: view.to_string(),
			source_path,
			artifact_path,
		}
	}
}

/// A view resolved to the file it is compiled from and the artifact it is
/// compiled to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
	pub view: String,
	pub source_path: PathBuf,
	pub artifact_path: PathBuf,
}

/// Why an artifact does or does not need rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
	/// No artifact exists yet.
	Missing,
	/// The source was modified after the artifact was written.
	Outdated,
	/// The artifact reflects the current source.
	Fresh,
}

/// What a compile call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileOutcome {
	/// The artifact did not exist and was written.
	Compiled,
	/// The artifact was stale (or compilation was forced) and was
	/// overwritten.
	Recompiled,
	/// The existing artifact was kept.
	Fresh,
}

impl CompileOutcome {
	pub fn wrote_artifact(self) -> bool {
		!matches!(self, Self::Fresh)
	}
}

#[derive(Debug, Clone)]
pub struct CompileReport {
	pub unit: CompilationUnit,
	pub outcome: CompileOutcome,
}

/// Compiles views to artifacts on disk, skipping views whose artifact is
/// still fresh.
///
/// Freshness is a modification time comparison of the single source file
/// against its artifact. Views pulled in with `@include`, `@import` or
/// `@extends` are not tracked, so editing one of them does not invalidate
/// the artifacts of the views that reference it.
#[derive(Debug, Clone)]
pub struct ViewCompiler {
	options: CompilerOptions,
	rules: RuleTable,
}

impl ViewCompiler {
	pub fn new(options: CompilerOptions) -> Self {
		Self::with_rules(options, default_rule_table())
	}

	pub fn with_rules(options: CompilerOptions, rules: RuleTable) -> Self {
		Self { options, rules }
	}

	pub fn options(&self) -> &CompilerOptions {
		&self.options
	}

	pub fn rules(&self) -> &RuleTable {
		&self.rules
	}

	pub fn rules_mut(&mut self) -> &mut RuleTable {
		&mut self.rules
	}

	pub fn resolve(&self, view: &str) -> CompilationUnit {
		self.options.resolve(view)
	}

	/// Returns true when the source file of `view` exists.
	pub fn exists(&self, view: &str) -> bool {
		self.resolve(view).source_path.is_file()
	}

	/// Check the input directory and prepare the output directory, creating
	/// it when it does not exist yet.
	///
	/// Writability is judged from the permission bits alone, so a directory
	/// owned by another user passes here and fails later when an artifact is
	/// written.
	pub fn validate_directories(&self) -> VellumResult<()> {
		let input = &self.options.input_dir;
		let output = &self.options.output_dir;

		let metadata = std::fs::metadata(input).map_err(|e| {
			VellumError::Directory {
				path: input.display().to_string(),
				reason: e.to_string(),
			}
		})?;

		if !metadata.is_dir() {
			return Err(VellumError::Directory {
				path: input.display().to_string(),
				reason: "input path is not a directory".to_string(),
			});
		}

		if metadata.permissions().readonly() {
			return Err(VellumError::Directory {
				path: input.display().to_string(),
				reason: "input directory is not writable".to_string(),
			});
		}

		let output_display = output.to_string_lossy();
		if !output_display.ends_with('/') && !output_display.ends_with(MAIN_SEPARATOR) {
			return Err(VellumError::Directory {
				path: output_display.to_string(),
				reason: "output directory must end with a path separator".to_string(),
			});
		}

		if !output.exists() {
			debug!(path = %output.display(), "creating output directory");
			create_output_dir(output)?;
		}

		Ok(())
	}

	/// Decide whether the artifact of `unit` has to be (re)written.
	pub fn staleness(&self, unit: &CompilationUnit) -> VellumResult<Staleness> {
		let artifact = match std::fs::metadata(&unit.artifact_path) {
			Ok(metadata) => metadata,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Staleness::Missing),
			Err(e) => return Err(e.into()),
		};
		let source = std::fs::metadata(&unit.source_path)?;

		if source.modified()? > artifact.modified()? {
			Ok(Staleness::Outdated)
		} else {
			Ok(Staleness::Fresh)
		}
	}

	/// Compile `view` unless its artifact is fresh.
	pub fn compile(&self, view: &str) -> VellumResult<CompileReport> {
		self.compile_view(view, false)
	}

	/// Compile `view` and overwrite its artifact regardless of freshness.
	pub fn compile_forced(&self, view: &str) -> VellumResult<CompileReport> {
		self.compile_view(view, true)
	}

	/// Compile every source file below the input directory, in path order.
	pub fn compile_all(&self, force: bool) -> VellumResult<Vec<CompileReport>> {
		self.validate_directories()?;

		self.discover_views()?
			.iter()
			.map(|view| self.compile_view(view, force))
			.collect()
	}

	/// Names of every view below the input directory, sorted.
	pub fn discover_views(&self) -> VellumResult<Vec<String>> {
		let root = &self.options.input_dir;
		let exclude = build_exclude_matcher(root, &self.options.exclude_patterns)?;
		let suffix = format!(".{}", self.options.source_extension);
		let mut files = Vec::new();
		walk_sources(root, &suffix, &exclude, &mut files)?;

		let mut views: Vec<String> = files
			.iter()
			.filter_map(|path| {
				let relative = path.strip_prefix(root).ok()?.to_string_lossy().replace('\\', "/");
				relative.strip_suffix(&suffix).map(str::to_string)
			})
			.collect();
		views.sort();

		Ok(views)
	}

	fn compile_view(&self, view: &str, force: bool) -> VellumResult<CompileReport> {
		self.validate_directories()?;

		let unit = self.resolve(view);
		if !unit.source_path.is_file() {
			return Err(VellumError::SourceNotFound {
				view: unit.view,
				path: unit.source_path.display().to_string(),
			});
		}

		let outcome = match (self.staleness(&unit)?, force) {
			(Staleness::Missing, _) => CompileOutcome::Compiled,
			(Staleness::Outdated, _) | (Staleness::Fresh, true) => CompileOutcome::Recompiled,
			(Staleness::Fresh, false) => {
				debug!(view = %unit.view, "artifact is fresh");
				return Ok(CompileReport {
					unit,
					outcome: CompileOutcome::Fresh,
				});
			}
		};

		let source = std::fs::read_to_string(&unit.source_path)?;
		let artifact = compile(&source, &self.rules)?;
		write_artifact(&unit.artifact_path, &artifact)?;
		debug!(view = %unit.view, ?outcome, artifact = %unit.artifact_path.display(), "wrote artifact");

		Ok(CompileReport { unit, outcome })
	}
}

/// `a/b/c` becomes `a.b.c`.
pub fn flatten_view_name(view: &str) -> String {
	view.replace(['/', '\\'], ".")
}

#[cfg(unix)]
fn create_output_dir(path: &Path) -> VellumResult<()> {
	use std::os::unix::fs::DirBuilderExt;

	std::fs::DirBuilder::new()
		.recursive(true)
		.mode(0o777)
		.create(path)?;
	Ok(())
}

#[cfg(not(unix))]
fn create_output_dir(path: &Path) -> VellumResult<()> {
	std::fs::create_dir_all(path)?;
	Ok(())
}

/// Write through a temporary sibling and rename it into place so readers
/// never observe a partially written artifact.
fn write_artifact(path: &Path, content: &str) -> VellumResult<()> {
	let temp_path = path.with_extension(format!(
		"tmp-{}-{}",
		std::process::id(),
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_or(0, |duration| duration.as_nanos())
	));

	std::fs::write(&temp_path, content)?;

	if let Err(e) = std::fs::rename(&temp_path, path) {
		let _ = std::fs::remove_file(&temp_path);
		return Err(e.into());
	}

	Ok(())
}

fn build_exclude_matcher(root: &Path, patterns: &[String]) -> VellumResult<Gitignore> {
	let mut builder = GitignoreBuilder::new(root);
	for pattern in patterns {
		builder.add_line(None, pattern).map_err(|e| {
			VellumError::ConfigParse(format!("invalid exclude pattern `{pattern}`: {e}"))
		})?;
	}
	builder
		.build()
		.map_err(|e| VellumError::ConfigParse(format!("failed to build exclude rules: {e}")))
}

fn walk_sources(
	dir: &Path,
	suffix: &str,
	exclude: &Gitignore,
	files: &mut Vec<PathBuf>,
) -> VellumResult<()> {
	for entry in std::fs::read_dir(dir)? {
		let path = entry?.path();
		let is_dir = path.is_dir();

		if exclude.matched(&path, is_dir).is_ignore() {
			continue;
		}

		if is_dir {
			walk_sources(&path, suffix, exclude, files)?;
		} else if path
			.file_name()
			.and_then(|name| name.to_str())
			.is_some_and(|name| name.ends_with(suffix))
		{
			files.push(path);
		}
	}

	Ok(())
}
