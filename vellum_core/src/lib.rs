//! `vellum_core` compiles directive-based view templates into executable
//! artifacts and renders them with layout inheritance.
//!
//! ## Processing Pipeline
//!
//! ```text
//! view source (views/home.tmpl)
//!   → Rule table (ordered pattern → rewrite directives)
//!   → Compiler (applies every rule to the accumulating text)
//!   → Cache (writes .vellum/compiled/home.out unless it is fresh)
//!   → Artifact parser (statement tags into a program)
//!   → Renderer (executes the program, resolving extends/sections/includes)
//! ```
//!
//! ## Modules
//!
//! - [`config`] — Configuration loading from `vellum.toml`: directories,
//!   data files and custom directives.
//! - [`pattern`] — The structured pattern language used by directive rules.
//! - [`directives`] — Built-in directives and the [`RuleTable`].
//! - [`cache`] — The [`ViewCompiler`], which keeps artifacts in sync with
//!   their sources.
//! - [`artifact`] — The artifact statement language.
//! - [`layout`] — Region and extends bookkeeping for one render call.
//!
//! ## Directives
//!
//! | Directive | Artifact |
//! | --- | --- |
//! | `{{ expr }}` | escaped echo |
//! | `{! expr !}` | raw echo |
//! | `@foreach(items as item) ... @endforeach` | loop |
//! | `@rawcode ... @endrawcode` | code statements |
//! | `@extends('layouts/app')` | declare the parent layout |
//! | `@section('name') ... @endsection` | fill a region |
//! | `@content('name')` | place a region |
//! | `@include('partial', {...})` | render another view inline |
//! | `@import('partial', 'alias')` | render another view into `imports.alias` |
//! | `@hook(args...)` | call the host hook |
//!
//! Expressions are [`minijinja`](https://docs.rs/minijinja) expressions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::path::Path;
//!
//! use vellum_core::Renderer;
//! use vellum_core::VellumConfig;
//! use vellum_core::ViewCompiler;
//!
//! let root = Path::new(".");
//! let config = VellumConfig::load_or_default(root).unwrap();
//! let compiler = ViewCompiler::with_rules(config.compiler_options(root), config.rule_table().unwrap());
//!
//! let output = Renderer::new(&compiler).render("home", &HashMap::new()).unwrap();
//! println!("{output}");
//! ```

pub use cache::*;
pub use compiler::*;
pub use config::*;
pub use directives::*;
pub use error::*;
pub use layout::*;
pub use render::*;

pub mod artifact;
pub mod cache;
mod compiler;
pub mod config;
pub mod directives;
#[allow(unused_assignments)]
mod error;
pub mod layout;
pub mod pattern;
mod render;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
