use super::ast::{DeclTable, Item};
use super::astbuilder::{Parser, SyntaxError};
use super::codegen::Codegen;
use super::compilepass::{PassConfigError, PassManager};
use super::dlogger::DiagnosticLog;
use super::ir;
use super::nameres::NameResolver;
use super::source::SourceFile;
use super::tokenize::Grammar;
use super::typecheck::Typechecker;
use super::user_op_rewriter::UserOpRewriter;
use derive_more::{Display, Error, From};
use lsp_types::Diagnostic;

#[derive(Debug, Display, Error, From)]
pub enum CompileFailure {
  /// The pass pipeline itself was misconfigured; reported before any
  /// unit is processed.
  #[display("pipeline configuration error: {_0}")]
  Config(#[from] PassConfigError),
  /// The unit failed; carries every diagnostic collected during the run.
  #[display("compilation failed with {errors} error(s)")]
  Failed {
    diagnostics: Vec<Diagnostic>,
    errors: usize,
  },
}

/// Assembles the whole pipeline: tokenize, parse, run the passes over
/// each item, then lower to the backend module.
pub struct Driver {
  log: DiagnosticLog,
}

impl Driver {
  pub fn new() -> Self {
    Driver {
      log: DiagnosticLog::new(),
    }
  }

  /// Compiles one unit of source text. On success the emitted module is
  /// returned; otherwise every collected diagnostic is, and no module.
  ///
  /// Lexing and parsing failures abort the unit immediately. Analysis
  /// errors accumulate: every pass runs over every item and the unit's
  /// success is the AND of every individual check. Code generation runs
  /// only for units whose passes all succeeded, and a codegen failure
  /// discards only the function being lowered.
  pub fn compile(
    &mut self,
    source: &str,
    name: Option<&str>,
  ) -> Result<ir::Module, CompileFailure> {
    let file = SourceFile::new(source, name.map(str::to_owned));
    let mut decls = DeclTable::new();

    let mut pm = PassManager::new(vec![
      Box::new(UserOpRewriter::new()),
      Box::new(NameResolver::new(
        self.log.get_logger(Some(String::from("nameres"))),
      )),
      Box::new(Typechecker::new(
        self.log.get_logger(Some(String::from("typecheck"))),
      )),
    ])?;

    let mut parse_logger = self.log.get_logger(Some(String::from("parse")));
    let grammar = Grammar::default();
    let mut items: Vec<Item> = vec![];
    let mut fatal = false;
    for parsed in Parser::new(grammar.tokenize(&file)) {
      match parsed {
        Ok(item) => items.push(item),
        Err(SyntaxError::Lex(err)) => {
          parse_logger.log_lex_error(err.range, err.character);
          fatal = true;
        }
        Err(SyntaxError::Parse(err)) => {
          parse_logger.log_parse_error(err.range, &err.message);
          fatal = true;
        }
      }
    }

    let mut ok = !fatal;
    if !fatal {
      for item in &mut items {
        ok &= pm.run_item(item, &mut decls);
      }
    }

    let mut cg = Codegen::new(
      name.unwrap_or("main"),
      self.log.get_logger(Some(String::from("codegen"))),
    );
    if ok {
      for item in &items {
        ok &= cg.item(item, &mut decls);
      }
    }

    let diagnostics = self.log.drain();
    if ok && diagnostics.is_empty() {
      Ok(cg.finish())
    } else {
      let errors = diagnostics.len();
      Err(CompileFailure::Failed {
        diagnostics,
        errors,
      })
    }
  }
}

impl Default for Driver {
  fn default() -> Self {
    Driver::new()
  }
}
