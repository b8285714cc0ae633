use std::time::Duration;
use std::time::SystemTime;

use minijinja::Value;
use rstest::rstest;
use serde_json::json;
use similar_asserts::assert_eq;

use super::__fixtures::*;
use super::*;
use crate::artifact::Node;
use crate::artifact::parse_artifact;
use crate::pattern::MatchPattern;

#[rstest]
#[case::unknown_token("@x(%q)")]
#[case::trailing_percent("abc%")]
#[case::empty("")]
fn invalid_patterns_are_rejected(#[case] source: &str) {
	let result = MatchPattern::parse(source);
	assert!(matches!(result, Err(VellumError::Pattern { .. })));
}

#[rstest]
#[case::trimmed_echo("{{%s%?%s}}", "a {{ b }} c", vec!["b"])]
#[case::lazy("<%?>", "<a><b>", vec!["a"])]
#[case::greedy_line("<%+>", "<a><b>", vec!["a><b"])]
#[case::multiline("<%*>", "<a\nb>", vec!["a\nb"])]
#[case::balanced(
	"@include%s(%b)%s",
	"@include('a', {'b': 'c)'}) rest",
	vec!["'a', {'b': 'c)'}"]
)]
#[case::escaped_percent("100%%", "it is 100%", vec![])]
fn pattern_captures(
	#[case] source: &str,
	#[case] text: &str,
	#[case] expected: Vec<&str>,
) -> VellumResult<()> {
	let pattern = MatchPattern::parse(source)?;
	let found = pattern.find_at(text, 0);
	assert!(found.is_some(), "`{source}` should match `{text}`");

	let captures: Vec<&str> = found
		.map(|found| found.captures)
		.unwrap_or_default()
		.into_iter()
		.map(|range| &text[range])
		.collect();
	assert_eq!(captures, expected);

	Ok(())
}

#[test]
fn lazy_capture_stays_on_one_line() -> VellumResult<()> {
	let pattern = MatchPattern::parse("<%?>")?;
	assert!(pattern.find_at("<a\nb>", 0).is_none());

	Ok(())
}

#[test]
fn rewrite_cannot_reference_missing_capture() {
	let result = DirectiveRule::new("@twice(%b)", "$1 $2").compile();
	assert!(matches!(result, Err(VellumError::Pattern { .. })));
}

#[test]
fn default_rules_end_with_blank_line_stripper() {
	let rules = default_rule_table();
	assert_eq!(rules.len(), DEFAULT_DIRECTIVES.len());
	assert_eq!(rules.first().map(|rule| rule.pattern.as_str()), Some("{{%s%?%s}}"));
	assert_eq!(rules.last().map(|rule| rule.pattern.as_str()), Some("%^%s%n"));
}

#[test]
fn template_without_directives_only_loses_blank_lines() -> VellumResult<()> {
	let source = "<p>Hello</p>\n\n<p>World</p>\n   \n<p>!</p>\n";
	let output = compile(source, &default_rule_table())?;
	assert_eq!(output, "<p>Hello</p>\n<p>World</p>\n<p>!</p>\n");

	Ok(())
}

#[rstest]
#[case::escaped("{{ user.name }}", "<?vm echo escape(user.name) ?>")]
#[case::escaped_tight("{{user.name}}", "<?vm echo escape(user.name) ?>")]
#[case::raw("{! html !}", "<?vm echo html ?>")]
#[case::extends("@extends('layouts/app')\n", "<?vm layout.extend('layouts/app') ?>")]
#[case::content("<main>@content('body')</main>", "<main><?vm layout.content('body') ?></main>")]
#[case::hook("@hook('analytics', page)", "<?vm hook('analytics', page) ?>")]
fn compiles_directives(#[case] source: &str, #[case] expected: &str) -> VellumResult<()> {
	let output = compile(source, &default_rule_table())?;
	assert_eq!(output, expected);

	Ok(())
}

#[test]
fn compiles_foreach_body() -> VellumResult<()> {
	let source = "@foreach(items as item)\n<li>{{ item }}</li>\n@endforeach";
	let output = compile(source, &default_rule_table())?;
	assert_eq!(
		output,
		"<?vm foreach (items as item): ?>\n<li><?vm echo escape(item) ?></li><?vm endforeach ?>"
	);

	Ok(())
}

#[test]
fn compiles_section_forms() -> VellumResult<()> {
	let rules = default_rule_table();
	insta::assert_snapshot!(
		compile("@section('title')Home@endsection", &rules)?,
		@"<?vm layout.start_section('title') ?>Home<?vm layout.stop_section() ?>"
	);
	insta::assert_snapshot!(
		compile("@section('sidebar') links", &rules)?,
		@"<?vm layout.start_section('sidebar') ?>links"
	);

	Ok(())
}

#[test]
fn reregistering_a_pattern_replaces_its_rewrite() -> VellumResult<()> {
	let mut rules = default_rule_table();
	rules.register("{{%s%?%s}}", "<?vm echo $1 ?>");

	assert_eq!(rules.len(), DEFAULT_DIRECTIVES.len());
	assert_eq!(rules.rewrite_for("{{%s%?%s}}"), Some("<?vm echo $1 ?>"));
	assert_eq!(compile("{{ x }}", &rules)?, "<?vm echo x ?>");

	Ok(())
}

#[test]
fn malformed_custom_rule_fails_compilation() {
	let mut rules = default_rule_table();
	rules.register("@upper(%z)", "<?vm echo $1 ?>");

	assert!(matches!(rules.validate(), Err(VellumError::Pattern { .. })));
	assert!(matches!(compile("text", &rules), Err(VellumError::Pattern { .. })));
}

#[test]
fn nested_views_flatten_into_artifact_names() -> AnyEmptyResult {
	let project = project(&[("layouts/app", "<html></html>")])?;
	let report = project.compiler.compile("layouts/app")?;

	assert_eq!(report.outcome, CompileOutcome::Compiled);
	assert!(report.unit.source_path.ends_with("views/layouts/app.tmpl"));
	assert!(report.unit.artifact_path.ends_with("out/layouts.app.out"));
	assert_eq!(project.artifact("layouts/app")?, "<html></html>");

	Ok(())
}

#[test]
fn fresh_artifact_is_not_rewritten() -> AnyEmptyResult {
	let project = project(&[("home", "{{ title }}")])?;
	project.compiler.compile("home")?;
	let written = std::fs::metadata(project.artifact_path("home"))?.modified()?;

	let report = project.compiler.compile("home")?;
	assert_eq!(report.outcome, CompileOutcome::Fresh);
	assert!(!report.outcome.wrote_artifact());
	assert_eq!(
		std::fs::metadata(project.artifact_path("home"))?.modified()?,
		written
	);

	Ok(())
}

#[test]
fn newer_source_is_recompiled_exactly_once() -> AnyEmptyResult {
	let project = project(&[("home", "{{ title }}")])?;
	project.compiler.compile("home")?;

	project.write_view("home", "{! title !}")?;
	std::fs::File::options()
		.write(true)
		.open(project.artifact_path("home"))?
		.set_modified(SystemTime::now() - Duration::from_secs(120))?;

	let unit = project.compiler.resolve("home");
	assert_eq!(project.compiler.staleness(&unit)?, Staleness::Outdated);

	let report = project.compiler.compile("home")?;
	assert_eq!(report.outcome, CompileOutcome::Recompiled);
	assert_eq!(project.artifact("home")?, "<?vm echo title ?>");

	assert_eq!(
		project.compiler.compile("home")?.outcome,
		CompileOutcome::Fresh
	);

	Ok(())
}

#[test]
fn deleted_artifact_is_compiled_again() -> AnyEmptyResult {
	let project = project(&[("home", "{{ title }}")])?;
	project.compiler.compile("home")?;
	std::fs::remove_file(project.artifact_path("home"))?;

	let unit = project.compiler.resolve("home");
	assert_eq!(project.compiler.staleness(&unit)?, Staleness::Missing);
	assert_eq!(
		project.compiler.compile("home")?.outcome,
		CompileOutcome::Compiled
	);

	Ok(())
}

#[test]
fn forced_compile_rewrites_fresh_artifact() -> AnyEmptyResult {
	let project = project(&[("home", "{{ title }}")])?;
	project.compiler.compile("home")?;

	let report = project.compiler.compile_forced("home")?;
	assert_eq!(report.outcome, CompileOutcome::Recompiled);

	Ok(())
}

#[test]
fn output_dir_without_separator_is_rejected() -> AnyEmptyResult {
	let dir = tempfile::tempdir()?;
	std::fs::create_dir_all(dir.path().join("views"))?;
	std::fs::write(dir.path().join("views/home.tmpl"), "home")?;
	let compiler = ViewCompiler::new(CompilerOptions::new(
		dir.path().join("views"),
		dir.path().join("out"),
	));

	assert!(matches!(
		compiler.compile("home"),
		Err(VellumError::Directory { .. })
	));

	Ok(())
}

#[test]
fn missing_input_dir_is_rejected() -> AnyEmptyResult {
	let dir = tempfile::tempdir()?;
	let compiler = ViewCompiler::new(CompilerOptions::new(
		dir.path().join("missing"),
		dir.path().join("out/"),
	));

	assert!(matches!(
		compiler.validate_directories(),
		Err(VellumError::Directory { .. })
	));

	Ok(())
}

#[test]
fn missing_output_dir_is_created() -> AnyEmptyResult {
	let project = project(&[])?;
	assert!(!project.root().join("out").exists());

	project.compiler.validate_directories()?;
	assert!(project.root().join("out").is_dir());

	Ok(())
}

#[cfg(unix)]
#[test]
fn read_only_input_dir_is_rejected() -> AnyEmptyResult {
	use std::os::unix::fs::PermissionsExt;

	let project = project(&[("home", "home")])?;
	let input = project.root().join("views");
	std::fs::set_permissions(&input, std::fs::Permissions::from_mode(0o555))?;
	let result = project.compiler.compile("home");
	std::fs::set_permissions(&input, std::fs::Permissions::from_mode(0o755))?;

	assert!(matches!(result, Err(VellumError::Directory { .. })));

	Ok(())
}

#[test]
fn missing_view_is_reported() -> AnyEmptyResult {
	let project = project(&[])?;
	let result = project.compiler.compile("nope");

	assert!(matches!(result, Err(VellumError::SourceNotFound { view, .. }) if view == "nope"));

	Ok(())
}

#[test]
fn compile_all_skips_excluded_views() -> AnyEmptyResult {
	let project = project(&[
		("home", "home"),
		("partials/nav", "nav"),
		("drafts/wip", "wip"),
	])?;
	let mut options = project.compiler.options().clone();
	options.exclude_patterns = vec!["drafts/".to_string()];
	let compiler = ViewCompiler::new(options);

	let views: Vec<String> = compiler
		.compile_all(false)?
		.into_iter()
		.map(|report| report.unit.view)
		.collect();
	assert_eq!(views, vec!["home".to_string(), "partials/nav".to_string()]);
	assert!(!project.artifact_path("drafts/wip").exists());

	Ok(())
}

#[rstest]
#[case::unclosed_tag("<?vm echo x")]
#[case::stray_endforeach("<?vm endforeach ?>")]
#[case::unclosed_foreach("<?vm foreach (xs as x): ?>")]
#[case::unknown_statement("<?vm frobnicate ?>")]
fn malformed_artifacts_are_rejected(#[case] source: &str) {
	let result = parse_artifact(source, "home.out");
	assert!(matches!(result, Err(VellumError::ArtifactSyntax { .. })));
}

#[test]
fn parses_artifact_statements() -> VellumResult<()> {
	let program = parse_artifact(
		"<?vm let a = 1; set b = a + 1 ?><?vm foreach (xs as x): ?><?vm echo escape(x) ?><?vm \
		 endforeach ?>",
		"home.out",
	)?;

	assert_eq!(
		program.nodes(),
		&[
			Node::Assign {
				name: "a".into(),
				expr: "1".into()
			},
			Node::Assign {
				name: "b".into(),
				expr: "a + 1".into()
			},
			Node::ForEach {
				iterable: "xs".into(),
				binding: "x".into(),
				body: vec![Node::Echo {
					expr: "x".into(),
					escape: true
				}],
			},
		]
	);

	Ok(())
}

#[test]
fn descendant_region_beats_ancestor() {
	let mut layout = LayoutContext::new();
	assert_eq!(layout.phase(), LayoutPhase::Idle);

	layout.begin_pass();
	layout.declare_extends("base");
	layout.start_region("title");
	layout.write_text("Child");
	let _ = layout.end_pass();
	assert_eq!(layout.phase(), LayoutPhase::Resolved);

	layout.set_layer(1);
	layout.begin_pass();
	layout.start_region("title");
	layout.write_text("Base");
	layout.stop_region();
	layout.write_text("<title>");
	layout.write_region("title");
	layout.write_text("</title>");
	let output = layout.end_pass();

	assert_eq!(layout.finish(&output), "<title>Child</title>");
	assert_eq!(layout.phase(), LayoutPhase::Done);
}

#[test]
fn last_region_of_a_template_wins() {
	let mut layout = LayoutContext::new();
	layout.begin_pass();
	layout.start_region("title");
	layout.write_text("one");
	layout.start_region("title");
	layout.write_text("two");
	let _ = layout.end_pass();

	assert_eq!(layout.region("title").as_deref(), Some("two"));
}

#[test]
fn child_section_overrides_layout_default() -> AnyEmptyResult {
	let project = project(&[
		("base", base_layout()),
		("home", "@extends('base')\n@section('title')Child@endsection"),
	])?;
	let renderer = Renderer::new(&project.compiler);

	assert_eq!(renderer.render("home", &data(json!({})))?, "<title>Child</title>");
	assert_eq!(renderer.render("base", &data(json!({})))?, "<title>Default</title>");

	Ok(())
}

#[test]
fn missing_region_renders_empty() -> AnyEmptyResult {
	let project = project(&[("home", "<p>@content('missing')</p>")])?;
	let output = Renderer::new(&project.compiler).render("home", &data(json!({})))?;
	assert_eq!(output, "<p></p>");

	Ok(())
}

#[test]
fn renders_escaped_and_raw_output() -> AnyEmptyResult {
	let project = project(&[("home", "{{ html }}|{! html !}|{{ missing }}")])?;
	let output = Renderer::new(&project.compiler).render("home", &data(json!({"html": "<b>"})))?;
	assert_eq!(output, "&lt;b&gt;|<b>|");

	Ok(())
}

#[test]
fn renders_foreach_body_for_each_item() -> AnyEmptyResult {
	let project = project(&[
		("list", "@foreach(items as item)<li>{{ item }}</li>@endforeach"),
		(
			"scores",
			"@foreach(scores as name, score){{ name }}={{ score }};@endforeach",
		),
		("values", "@foreach(scores as score){{ score }};@endforeach"),
	])?;
	let renderer = Renderer::new(&project.compiler);

	let list = renderer.render("list", &data(json!({"items": ["a", "<b>"]})))?;
	assert_eq!(list, "<li>a</li><li>&lt;b&gt;</li>");

	let scores = renderer.render("scores", &data(json!({"scores": {"ada": 3, "bob": 5}})))?;
	assert_eq!(scores, "ada=3;bob=5;");

	let values = renderer.render("values", &data(json!({"scores": {"ada": 3, "bob": 5}})))?;
	assert_eq!(values, "3;5;");

	Ok(())
}

#[test]
fn rawcode_binds_variables() -> AnyEmptyResult {
	let project = project(&[(
		"home",
		"@rawcode\nlet greeting = 'hi'\n@endrawcode{{ greeting }}!",
	)])?;
	let output = Renderer::new(&project.compiler).render("home", &data(json!({})))?;
	assert_eq!(output, "hi!");

	Ok(())
}

#[test]
fn include_renders_inline_with_data() -> AnyEmptyResult {
	let project = project(&[
		("partials/nav", "<nav>{{ title }}</nav>"),
		(
			"home",
			"<body>@include('partials/nav', {'title': 'Home'})</body>{{ title }}",
		),
	])?;
	let output = Renderer::new(&project.compiler).render("home", &data(json!({"title": "Top"})))?;
	assert_eq!(output, "<body><nav>Home</nav></body>Top");

	Ok(())
}

#[test]
fn included_view_keeps_its_own_layout() -> AnyEmptyResult {
	let project = project(&[
		("base", "<main>@content('body')</main>"),
		(
			"page",
			"@extends('base')@section('body')PAGE @include('card')@endsection",
		),
		("card", "@extends('cardlayout')@section('body')CARD@endsection"),
		("cardlayout", "<div>@content('body')</div>"),
	])?;
	let output = Renderer::new(&project.compiler).render("page", &data(json!({})))?;
	assert_eq!(output, "<main>PAGE <div>CARD</div></main>");

	Ok(())
}

#[test]
fn recursive_include_is_an_error() -> AnyEmptyResult {
	let project = project(&[("loop", "@include('loop')")])?;
	let result = Renderer::new(&project.compiler).render("loop", &data(json!({})));
	assert!(matches!(result, Err(VellumError::Render { .. })));

	Ok(())
}

#[test]
fn import_stores_output_under_alias() -> AnyEmptyResult {
	let project = project(&[
		("nav", "<nav>{{ title }}</nav>"),
		("home", "@import('nav', 'menu')<header>{! imports.menu !}</header>"),
	])?;
	let output = Renderer::new(&project.compiler).render("home", &data(json!({"title": "Hi"})))?;
	assert_eq!(output, "<header><nav>Hi</nav></header>");

	Ok(())
}

#[test]
fn imported_sections_stay_out_of_the_importer() -> AnyEmptyResult {
	let project = project(&[
		("widget", "@section('title')WIDGET@endsection<b>w</b>"),
		(
			"home",
			"@section('title')Home@endsection@import('widget')<title>@content('title')</title>{! imports.widget !}",
		),
	])?;
	let output = Renderer::new(&project.compiler).render("home", &data(json!({})))?;
	assert_eq!(output, "<title>Home</title><b>w</b>");

	Ok(())
}

#[test]
fn hook_receives_evaluated_arguments() -> AnyEmptyResult {
	let project = project(&[("home", "@hook('greet', name)")])?;
	let renderer = Renderer::new(&project.compiler).with_hook(|args: &[Value]| {
		let name = args.get(1).map(ToString::to_string).unwrap_or_default();
		Ok(format!("hello {name}"))
	});

	let output = renderer.render("home", &data(json!({"name": "Ada"})))?;
	assert_eq!(output, "hello Ada");

	let silent = Renderer::new(&project.compiler).render("home", &data(json!({"name": "Ada"})))?;
	assert_eq!(silent, "");

	Ok(())
}

#[test]
fn extends_cycle_is_an_error() -> AnyEmptyResult {
	let project = project(&[("a", "@extends('b')A"), ("b", "@extends('a')B")])?;
	let result = Renderer::new(&project.compiler).render("a", &data(json!({})));
	assert!(matches!(result, Err(VellumError::LayoutCycle(view)) if view == "a"));

	Ok(())
}

#[test]
#[tracing_test::traced_test]
fn missing_extends_target_keeps_child_output() {
	let project = project(&[("home", "@extends('nope')Body")]).unwrap();
	let output = Renderer::new(&project.compiler)
		.render("home", &data(json!({})))
		.unwrap();

	assert_eq!(output, "Body");
	assert!(logs_contain("extended layout not found"));
}

#[test]
fn loads_config_with_custom_directives_and_data() -> AnyEmptyResult {
	let dir = tempfile::tempdir()?;
	let root = dir.path();
	std::fs::write(
		root.join("vellum.toml"),
		r#"[views]
input = "templates/"
output = "build/"

[data]
site = "site.toml"

[[directives]]
pattern = "@upper(%b)"
rewrite = "<?vm echo escape($1 | upper) ?>"
"#,
	)?;
	std::fs::write(root.join("site.toml"), "name = \"Vellum\"\n")?;
	std::fs::create_dir_all(root.join("templates"))?;
	std::fs::write(root.join("templates/home.tmpl"), "@upper(site.name) {{ site.name }}")?;

	let config = VellumConfig::load(root)?.ok_or("config should be discovered")?;
	let rules = config.rule_table()?;
	assert_eq!(rules.len(), DEFAULT_DIRECTIVES.len() + 1);

	let options = config.compiler_options(root);
	assert_eq!(options.input_dir, root.join("templates/"));
	assert_eq!(options.output_dir, root.join("build/"));

	let compiler = ViewCompiler::with_rules(options, rules);
	let output = Renderer::new(&compiler).render("home", &config.load_data(root)?)?;
	assert_eq!(output, "VELLUM Vellum");

	Ok(())
}

#[test]
fn config_discovery_falls_back_to_defaults() -> AnyEmptyResult {
	let dir = tempfile::tempdir()?;
	assert!(VellumConfig::load(dir.path())?.is_none());

	let config = VellumConfig::load_or_default(dir.path())?;
	assert_eq!(config.views.output, DEFAULT_OUTPUT_DIR);
	assert_eq!(config.views.source_extension, "tmpl");
	assert_eq!(config.rule_table()?.len(), DEFAULT_DIRECTIVES.len());

	Ok(())
}

#[test]
fn config_rejects_malformed_directive() -> AnyEmptyResult {
	let dir = tempfile::tempdir()?;
	std::fs::create_dir_all(dir.path().join(".config"))?;
	std::fs::write(
		dir.path().join(".config/vellum.toml"),
		"[[directives]]\npattern = \"@bad(%q)\"\nrewrite = \"$1\"\n",
	)?;

	let config = VellumConfig::load_or_default(dir.path())?;
	assert!(matches!(config.rule_table(), Err(VellumError::Pattern { .. })));

	Ok(())
}

#[rstest]
#[case::json("data.json", r#"{"a": 1}"#, json!({"a": 1}))]
#[case::yaml("data.yaml", "a: 1\n", json!({"a": 1}))]
#[case::toml("data.toml", "a = 1\n", json!({"a": 1}))]
#[case::text("data.txt", "hello", json!("hello"))]
fn loads_data_files(
	#[case] file: &str,
	#[case] content: &str,
	#[case] expected: serde_json::Value,
) -> AnyEmptyResult {
	let dir = tempfile::tempdir()?;
	std::fs::write(dir.path().join(file), content)?;
	let mut config = VellumConfig::default();
	config.data.insert("value".into(), file.into());

	let data = config.load_data(dir.path())?;
	assert_eq!(data.get("value"), Some(&expected));

	Ok(())
}

#[test]
fn unsupported_data_format_is_reported() -> AnyEmptyResult {
	let dir = tempfile::tempdir()?;
	std::fs::write(dir.path().join("data.ini"), "a = 1")?;
	let mut config = VellumConfig::default();
	config.data.insert("value".into(), "data.ini".into());

	assert!(matches!(
		config.load_data(dir.path()),
		Err(VellumError::UnsupportedDataFormat(format)) if format == "ini"
	));

	Ok(())
}

#[test]
fn escapes_html_special_characters() {
	assert_eq!(escape_html("<a href=\"x\">&'</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&#x27;&lt;/a&gt;");
}
