use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::AnyResult;
use crate::CompilerOptions;
use crate::ViewCompiler;

/// A temporary project with a `views/` input directory and an `out/`
/// output directory.
pub struct Project {
	pub dir: TempDir,
	pub compiler: ViewCompiler,
}

impl Project {
	pub fn root(&self) -> &Path {
		self.dir.path()
	}

	pub fn source_path(&self, view: &str) -> PathBuf {
		self.compiler.resolve(view).source_path
	}

	pub fn artifact_path(&self, view: &str) -> PathBuf {
		self.compiler.resolve(view).artifact_path
	}

	pub fn write_view(&self, view: &str, content: &str) -> AnyResult<()> {
		let path = self.source_path(view);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, content)?;
		Ok(())
	}

	pub fn artifact(&self, view: &str) -> AnyResult<String> {
		Ok(std::fs::read_to_string(self.artifact_path(view))?)
	}
}

pub fn project(views: &[(&str, &str)]) -> AnyResult<Project> {
	let dir = tempfile::tempdir()?;
	std::fs::create_dir_all(dir.path().join("views"))?;
	let options = CompilerOptions::new(dir.path().join("views"), dir.path().join("out/"));
	let project = Project {
		compiler: ViewCompiler::new(options),
		dir,
	};

	for (view, content) in views {
		project.write_view(view, content)?;
	}

	Ok(project)
}

/// Convert a JSON object into render data.
pub fn data(value: serde_json::Value) -> HashMap<String, serde_json::Value> {
	match value {
		serde_json::Value::Object(map) => map.into_iter().collect(),
		_ => HashMap::new(),
	}
}

pub fn base_layout() -> &'static str {
	"@section('title')Default@endsection<title>@content('title')</title>"
}
