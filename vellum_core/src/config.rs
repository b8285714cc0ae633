use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::VellumError;
use crate::VellumResult;
use crate::cache::CompilerOptions;
use crate::cache::DEFAULT_ARTIFACT_EXTENSION;
use crate::cache::DEFAULT_SOURCE_EXTENSION;
use crate::directives::DirectiveRule;
use crate::directives::RuleTable;
use crate::directives::default_rule_table;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] =
	["vellum.toml", ".vellum.toml", ".config/vellum.toml"];

/// Default input directory, relative to the project root.
pub const DEFAULT_INPUT_DIR: &str = "views/";
/// Default output directory, relative to the project root.
pub const DEFAULT_OUTPUT_DIR: &str = ".vellum/compiled/";

/// Configuration loaded from a `vellum.toml` file.
///
/// ```toml
/// [views]
/// input = "views/"
/// output = ".vellum/compiled/"
/// source_extension = "tmpl"
/// artifact_extension = "out"
/// exclude = ["drafts/"]
///
/// [data]
/// site = "data/site.toml"
///
/// [[directives]]
/// pattern = "@upper(%b)"
/// rewrite = "<?vm echo escape($1 | upper) ?>"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VellumConfig {
	#[serde(default)]
	pub views: ViewsConfig,
	/// Map of variable name to a data file, relative to the project root.
	/// Each file is parsed by its extension and exposed to every render.
	#[serde(default)]
	pub data: HashMap<String, PathBuf>,
	/// Extra directives, applied after the built-in ones.
	#[serde(default)]
	pub directives: Vec<DirectiveRule>,
}

/// The `[views]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewsConfig {
	#[serde(default = "default_input")]
	pub input: PathBuf,
	/// Kept verbatim so a missing trailing separator is reported instead of
	/// silently fixed.
	#[serde(default = "default_output")]
	pub output: String,
	#[serde(default = "default_source_extension")]
	pub source_extension: String,
	#[serde(default = "default_artifact_extension")]
	pub artifact_extension: String,
	/// Gitignore-style patterns skipped when compiling every view.
	#[serde(default)]
	pub exclude: Vec<String>,
}

impl Default for ViewsConfig {
	fn default() -> Self {
		Self {
			input: default_input(),
			output: default_output(),
			source_extension: default_source_extension(),
			artifact_extension: default_artifact_extension(),
			exclude: Vec::new(),
		}
	}
}

fn default_input() -> PathBuf {
	PathBuf::from(DEFAULT_INPUT_DIR)
}

fn default_output() -> String {
	DEFAULT_OUTPUT_DIR.to_string()
}

fn default_source_extension() -> String {
	DEFAULT_SOURCE_EXTENSION.to_string()
}

fn default_artifact_extension() -> String {
	DEFAULT_ARTIFACT_EXTENSION.to_string()
}

impl VellumConfig {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if there is none.
	pub fn load(root: &Path) -> VellumResult<Option<Self>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		let content = std::fs::read_to_string(&config_path)?;
		let config: Self =
			toml::from_str(&content).map_err(|e| VellumError::ConfigParse(e.to_string()))?;

		Ok(Some(config))
	}

	/// Load the config at `root`, falling back to the defaults.
	pub fn load_or_default(root: &Path) -> VellumResult<Self> {
		Ok(Self::load(root)?.unwrap_or_default())
	}

	/// Compiler options with the configured directories joined onto `root`.
	pub fn compiler_options(&self, root: &Path) -> CompilerOptions {
		let mut output = root.join(&self.views.output).into_os_string();
		// `Path::join` keeps a trailing separator, but an empty output would
		// lose it.
		if self.views.output.is_empty() {
			output.push("/");
		}

		let mut options = CompilerOptions::new(root.join(&self.views.input), PathBuf::from(output));
		options
			.source_extension
			.clone_from(&self.views.source_extension);
		options
			.artifact_extension
			.clone_from(&self.views.artifact_extension);
		options.exclude_patterns.clone_from(&self.views.exclude);
		options
	}

	/// The built-in rules followed by the configured ones. Every rule is
	/// checked, so a malformed pattern is reported before anything compiles.
	pub fn rule_table(&self) -> VellumResult<RuleTable> {
		let mut rules = default_rule_table();
		rules.register_all(
			self.directives
				.iter()
				.map(|rule| (rule.pattern.as_str(), rule.rewrite.as_str())),
		);
		rules.validate()?;

		Ok(rules)
	}

	/// Read each data file and parse it into a `serde_json::Value` keyed by
	/// variable name.
	pub fn load_data(&self, root: &Path) -> VellumResult<HashMap<String, serde_json::Value>> {
		let mut data = HashMap::new();

		for (name, rel_path) in &self.data {
			let abs_path = root.join(rel_path);
			let content = std::fs::read_to_string(&abs_path).map_err(|e| {
				VellumError::DataFile {
					path: rel_path.display().to_string(),
					reason: e.to_string(),
				}
			})?;
			let format = abs_path
				.extension()
				.and_then(|e| e.to_str())
				.unwrap_or("")
				.to_ascii_lowercase();
			let value = parse_data_file(&content, &format, &rel_path.display().to_string())?;

			data.insert(name.clone(), value);
		}

		Ok(data)
	}
}

/// Parse a data file's content into a `serde_json::Value` based on its
/// format.
fn parse_data_file(
	content: &str,
	format: &str,
	path_display: &str,
) -> VellumResult<serde_json::Value> {
	let data_error = |reason: String| {
		VellumError::DataFile {
			path: path_display.to_string(),
			reason,
		}
	};

	match format {
		"text" | "txt" => Ok(serde_json::Value::String(content.to_string())),
		"json" => serde_json::from_str(content).map_err(|e| data_error(e.to_string())),
		"toml" => {
			let value: toml::Value =
				toml::from_str(content).map_err(|e| data_error(e.to_string()))?;
			toml_to_json(value).ok_or_else(|| data_error("contains a non-finite float".into()))
		}
		"yaml" | "yml" => serde_yaml_ng::from_str(content).map_err(|e| data_error(e.to_string())),
		other => Err(VellumError::UnsupportedDataFormat(other.to_string())),
	}
}

/// Convert a `toml::Value` to a `serde_json::Value`. Returns `None` for
/// floats JSON cannot represent.
fn toml_to_json(value: toml::Value) -> Option<serde_json::Value> {
	let json = match value {
		toml::Value::String(s) => serde_json::Value::String(s),
		toml::Value::Integer(i) => serde_json::Value::Number(i.into()),
		toml::Value::Float(f) => serde_json::Value::Number(serde_json::Number::from_f64(f)?),
		toml::Value::Boolean(b) => serde_json::Value::Bool(b),
		toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
		toml::Value::Array(arr) => {
			serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect::<Option<_>>()?)
		}
		toml::Value::Table(table) => {
			let mut map = serde_json::Map::new();
			for (k, v) in table {
				map.insert(k, toml_to_json(v)?);
			}
			serde_json::Value::Object(map)
		}
	};

	Some(json)
}
