use std::path::Path;

use assert_cmd::Command;
use insta_cmd::get_cargo_bin;
use vellum_core::AnyEmptyResult;

pub fn vellum_cmd() -> Command {
	let mut cmd = Command::new(get_cargo_bin("vellum"));
	cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
	cmd
}

/// Write `views` below `root/views/` with the default source extension.
pub fn write_views(root: &Path, views: &[(&str, &str)]) -> AnyEmptyResult {
	for (view, content) in views {
		let path = root.join("views").join(format!("{view}.tmpl"));
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, content)?;
	}

	Ok(())
}
