use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;
use vellum_cli::Commands;
use vellum_cli::VellumCli;
use vellum_core::CompileOutcome;
use vellum_core::CompileReport;
use vellum_core::Renderer;
use vellum_core::VellumConfig;
use vellum_core::ViewCompiler;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,dimmed) => {
		if color_enabled() {
			format!("{}", $text.dimmed())
		} else {
			format!("{}", $text)
		}
	};
}

fn main() {
	let args = VellumCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	init_tracing(args.verbose, use_color);

	// Install miette's fancy handler for rich error diagnostics.
	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	let result = match &args.command {
		Some(Commands::Compile {
			views,
			all,
			force,
			watch,
		}) => run_compile(&args, views, *all, *force, *watch),
		Some(Commands::Render { view, data }) => run_render(&args, view, data.as_deref()),
		None => {
			eprintln!("No subcommand specified. Run `vellum --help` for usage.");
			process::exit(1);
		}
	};

	if let Err(e) = result {
		// Try to render through miette for rich diagnostics with help text
		// and error codes.
		match e.downcast::<vellum_core::VellumError>() {
			Ok(vellum_err) => {
				let report: miette::Report = (*vellum_err).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Logs go to stderr so rendered output on stdout stays clean. `RUST_LOG`
/// takes precedence over `--verbose`.
fn init_tracing(verbose: bool, use_color: bool) {
	let default_level = if verbose {
		"vellum_core=debug"
	} else {
		"vellum_core=warn"
	};
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(use_color)
		.with_target(false)
		.init();
}

fn resolve_root(args: &VellumCli) -> PathBuf {
	args.path
		.clone()
		.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn load_compiler(args: &VellumCli) -> Result<(VellumConfig, ViewCompiler), Box<dyn std::error::Error>> {
	let root = resolve_root(args);
	let config = VellumConfig::load_or_default(&root)?;
	let compiler = ViewCompiler::with_rules(config.compiler_options(&root), config.rule_table()?);

	Ok((config, compiler))
}

fn run_compile(
	args: &VellumCli,
	views: &[String],
	all: bool,
	force: bool,
	watch: bool,
) -> Result<(), Box<dyn std::error::Error>> {
	let (_, compiler) = load_compiler(args)?;
	run_compile_once(args, &compiler, views, all, force)?;

	if !watch {
		return Ok(());
	}

	// Watch mode
	println!("\nWatching for view changes... (press Ctrl+C to stop)");

	let (tx, rx) = mpsc::channel();

	let mut watcher =
		notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
			if let Ok(event) = res {
				if matches!(
					event.kind,
					notify::EventKind::Modify(_) | notify::EventKind::Create(_)
				) {
					let _ = tx.send(());
				}
			}
		})?;

	use notify::Watcher;
	watcher.watch(&compiler.options().input_dir, notify::RecursiveMode::Recursive)?;

	loop {
		rx.recv()?;
		// Debounce: drain additional events within 200ms.
		while rx.recv_timeout(Duration::from_millis(200)).is_ok() {}

		println!("\nView change detected, compiling...");
		// Only stale views are rewritten after a change, even with `--force`.
		if let Err(e) = run_compile_once(args, &compiler, views, all, false) {
			eprintln!("{} {e}", colored!("error:", red));
		}
	}
}

fn run_compile_once(
	args: &VellumCli,
	compiler: &ViewCompiler,
	views: &[String],
	all: bool,
	force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
	let reports = if all || views.is_empty() {
		compiler.compile_all(force)?
	} else {
		views
			.iter()
			.map(|view| {
				if force {
					compiler.compile_forced(view)
				} else {
					compiler.compile(view)
				}
			})
			.collect::<Result<Vec<_>, _>>()?
	};

	if reports.is_empty() {
		println!("No views found.");
		return Ok(());
	}

	for report in &reports {
		print_report(args, report);
	}

	let written = reports
		.iter()
		.filter(|report| report.outcome.wrote_artifact())
		.count();

	if written == 0 {
		println!("All {} view(s) are already up to date.", reports.len());
	} else {
		println!(
			"Compiled {written} view(s), {} already up to date.",
			reports.len() - written
		);
	}

	Ok(())
}

fn print_report(args: &VellumCli, report: &CompileReport) {
	let label = match report.outcome {
		CompileOutcome::Compiled => colored!("compiled", green),
		CompileOutcome::Recompiled => colored!("recompiled", green),
		CompileOutcome::Fresh => {
			if !args.verbose {
				return;
			}
			colored!("fresh", dimmed)
		}
	};

	println!("  {label:<10} {}", report.unit.view);
}

fn run_render(
	args: &VellumCli,
	view: &str,
	data: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
	let root = resolve_root(args);
	let (config, compiler) = load_compiler(args)?;
	let mut context = config.load_data(&root)?;

	if let Some(data) = data {
		let overrides: HashMap<String, serde_json::Value> = serde_json::from_str(data)
			.map_err(|e| format!("`--data` must be a JSON object: {e}"))?;
		context.extend(overrides);
	}

	let output = Renderer::new(&compiler).render(view, &context)?;
	print!("{output}");

	Ok(())
}
