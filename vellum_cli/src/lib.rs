use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Compile and render directive-based view templates.",
	long_about = "vellum compiles view templates written with `{{ }}`, `@extends`, `@section` \
	              and friends into cached artifacts, and renders them with layout \
	              inheritance.\n\nQuick start:\n  vellum compile        Compile every view that \
	              changed\n  vellum render home    Render the `home` view to stdout"
)]
pub struct VellumCli {
	#[command(subcommand)]
	pub command: Option<Commands>,

	/// Path to the project root directory.
	#[arg(long, short, global = true)]
	pub path: Option<PathBuf>,

	/// Enable verbose output, including debug logs from the compiler.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Compile views into artifacts.
	///
	/// Without view names every view below the input directory is compiled.
	/// Views whose artifact is newer than their source are skipped unless
	/// `--force` is given.
	Compile {
		/// Names of the views to compile, relative to the input directory and
		/// without the source extension (e.g. `layouts/app`).
		views: Vec<String>,

		/// Compile every view, even when view names are given.
		#[arg(long, default_value_t = false)]
		all: bool,

		/// Rewrite artifacts even when they are fresh.
		#[arg(long, default_value_t = false)]
		force: bool,

		/// Watch the input directory and recompile on changes.
		#[arg(long, default_value_t = false)]
		watch: bool,
	},
	/// Render a view to stdout.
	///
	/// Stale artifacts are recompiled first. Data files from the `[data]`
	/// section of `vellum.toml` are available as top-level variables.
	Render {
		/// The view to render.
		view: String,

		/// A JSON object merged over the configured data.
		#[arg(long)]
		data: Option<String>,
	},
}
