//! OntoForm module language
//!
//! This crate defines the surface syntax for OntoForm modules, a
//! line-oriented schema/theory/instance language, and provides a total
//! parser producing an immutable, typed AST.
//!
//! The parser never performs semantic checks: well-typedness and constraint
//! checking live in `ontoform-kernel`, which consumes the AST defined here.

pub mod ast;
pub mod format;
pub mod parse;

pub use ast::Module;
pub use format::format_constraint;
pub use parse::{parse_constraint, parse_module, parse_path_expr, parse_rewrite_vars, ParseError};
