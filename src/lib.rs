//! A front-to-back compiler pipeline for a small expression-oriented
//! language: a regex-driven tokenizer, an operator-precedence parser with
//! user-extensible operators, a dependency-ordered pass manager running
//! operator desugaring, lexical name resolution and type checking, and a
//! lowering stage emitting SSA-form code for a generic backend.

pub mod ast;
pub mod astbuilder;
pub mod codegen;
pub mod compilepass;
pub mod dlogger;
pub mod driver;
pub mod ir;
pub mod nameres;
pub mod source;
pub mod token;
pub mod tokenize;
pub mod typecheck;
pub mod types;
pub mod user_op_rewriter;

pub use driver::{CompileFailure, Driver};
