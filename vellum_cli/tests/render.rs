use predicates::prelude::*;
use rstest::rstest;
use vellum_core::AnyEmptyResult;

mod common;

use common::vellum_cmd;
use common::write_views;

#[test]
fn render_resolves_layout_sections() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write_views(tmp.path(), &[
		(
			"layouts/app",
			"@section('title')Default@endsection<title>@content('title')</title><main>@content('body')</main>",
		),
		(
			"home",
			"@extends('layouts/app')\n@section('title')Home@endsection\n@section('body')<p>{{ message }}</p>@endsection",
		),
	])?;

	vellum_cmd()
		.args(["render", "home", "--data", r#"{"message": "<hi>"}"#, "--path"])
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("<title>Home</title><main><p>&lt;hi&gt;</p></main>");

	Ok(())
}

#[test]
fn render_reads_configured_data() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	std::fs::write(tmp.path().join("vellum.toml"), "[data]\nsite = \"site.json\"\n")?;
	std::fs::write(tmp.path().join("site.json"), r#"{"name": "Vellum"}"#)?;
	write_views(tmp.path(), &[("home", "Welcome to {{ site.name }}")])?;

	vellum_cmd()
		.args(["render", "home", "--path"])
		.arg(tmp.path())
		.assert()
		.success()
		.stdout("Welcome to Vellum");

	Ok(())
}

#[rstest]
#[case::extends_cycle(&[("a", "@extends('b')"), ("b", "@extends('a')")], "a", "vellum::layout_cycle")]
#[case::missing_view(&[("a", "a")], "nope", "vellum::source_not_found")]
#[case::bad_expression(&[("a", "{{ 1 + }}")], "a", "vellum::render")]
fn render_reports_errors(
	#[case] views: &[(&str, &str)],
	#[case] view: &str,
	#[case] code: &str,
) -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write_views(tmp.path(), views)?;

	vellum_cmd()
		.args(["render", view, "--path"])
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicate::str::contains(code));

	Ok(())
}

#[test]
fn render_rejects_non_object_data() -> AnyEmptyResult {
	let tmp = tempfile::tempdir()?;
	write_views(tmp.path(), &[("home", "home")])?;

	vellum_cmd()
		.args(["render", "home", "--data", "[1, 2]", "--path"])
		.arg(tmp.path())
		.assert()
		.code(2)
		.stderr(predicate::str::contains("must be a JSON object"));

	Ok(())
}
