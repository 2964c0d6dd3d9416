use super::source::SourceFile;
use super::types::Ty;
use lsp_types::Diagnostic;
use lsp_types::DiagnosticSeverity;
use lsp_types::NumberOrString;
use lsp_types::Range;
use std::sync::mpsc::channel;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;

/// Collects every diagnostic emitted during a compile invocation. Each
/// pipeline stage gets its own cloneable `DiagnosticLogger` writing into
/// the shared channel.
pub struct DiagnosticLog {
  recv: Receiver<Diagnostic>,
  send: Sender<Diagnostic>,
}

impl DiagnosticLog {
  pub fn new() -> Self {
    let (send, recv) = channel();
    DiagnosticLog { recv, send }
  }

  pub fn get_logger(&mut self, source: Option<String>) -> DiagnosticLogger {
    DiagnosticLogger {
      sender: self.send.clone(),
      source,
    }
  }

  /// Takes every diagnostic logged so far, in emission order.
  pub fn drain(&mut self) -> Vec<Diagnostic> {
    self.recv.try_iter().collect()
  }
}

impl Default for DiagnosticLog {
  fn default() -> Self {
    DiagnosticLog::new()
  }
}

#[derive(Clone)]
pub struct DiagnosticLogger {
  sender: Sender<Diagnostic>,
  source: Option<String>,
}

impl DiagnosticLogger {
  fn log(&mut self, d: Diagnostic) {
    self.sender.send(d).unwrap()
  }

  fn error(&mut self, range: Range, code: i32, message: String) {
    self.log(Diagnostic {
      range,
      severity: Some(DiagnosticSeverity::ERROR),
      code: Some(NumberOrString::Number(code)),
      code_description: None,
      source: self.source.clone(),
      message,
      related_information: None,
      tags: None,
      data: None,
    })
  }

  pub fn log_lex_error(&mut self, range: Range, character: char) {
    self.error(
      range,
      codes::LEX_ERROR,
      format!("unexpected character `{}`", character),
    )
  }

  pub fn log_parse_error(&mut self, range: Range, message: &str) {
    self.error(range, codes::PARSE_ERROR, message.to_owned())
  }

  pub fn log_redeclaration(&mut self, range: Range, name: &str) {
    self.error(
      range,
      codes::REDECLARATION,
      format!("redeclaration of `{}` in same scope", name),
    )
  }

  pub fn log_undeclared_symbol(&mut self, range: Range, name: &str) {
    self.error(
      range,
      codes::UNDECLARED_SYMBOL,
      format!("undeclared symbol `{}`", name),
    )
  }

  pub fn log_not_a_type(&mut self, range: Range, name: &str) {
    self.error(
      range,
      codes::NOT_A_TYPE,
      format!("`{}` is not a type name", name),
    )
  }

  pub fn log_return_type_mismatch(&mut self, range: Range, expected: &Ty, found: &Ty) {
    self.error(
      range,
      codes::RETURN_TYPE_MISMATCH,
      format!(
        "function body has type {} but the declared result type is {}",
        found, expected
      ),
    )
  }

  pub fn log_operand_type_mismatch(&mut self, range: Range, lhs: &Ty, rhs: &Ty) {
    self.error(
      range,
      codes::OPERAND_TYPE_MISMATCH,
      format!(
        "operands of infix operator must have the same type; found {} and {}",
        lhs, rhs
      ),
    )
  }

  pub fn log_non_boolean_condition(&mut self, range: Range, found: &Ty) {
    self.error(
      range,
      codes::NON_BOOLEAN_CONDITION,
      format!("`if` condition must have type bool; found {}", found),
    )
  }

  pub fn log_branch_type_mismatch(&mut self, range: Range, then: &Ty, orelse: &Ty) {
    self.error(
      range,
      codes::BRANCH_TYPE_MISMATCH,
      format!(
        "`then` and `else` branches must have the same type; found {} and {}",
        then, orelse
      ),
    )
  }

  pub fn log_not_callable(&mut self, range: Range, found: &Ty) {
    self.error(
      range,
      codes::NOT_CALLABLE,
      format!("expression of type {} is not callable", found),
    )
  }

  pub fn log_arity_mismatch(&mut self, range: Range, expected: usize, found: usize) {
    self.error(
      range,
      codes::ARITY_MISMATCH,
      format!(
        "wrong number of arguments to function: expected {}, got {}",
        expected, found
      ),
    )
  }

  pub fn log_argument_type_mismatch(&mut self, range: Range, expected: &Ty, found: &Ty) {
    self.error(
      range,
      codes::ARGUMENT_TYPE_MISMATCH,
      format!(
        "parameter type does not match argument type: expected {}, got {}",
        expected, found
      ),
    )
  }

  pub fn log_duplicate_definition(&mut self, range: Range, name: &str) {
    self.error(
      range,
      codes::DUPLICATE_DEFINITION,
      format!("function `{}` is already defined", name),
    )
  }

  pub fn log_invalid_assignment_target(&mut self, range: Range) {
    self.error(
      range,
      codes::INVALID_ASSIGNMENT_TARGET,
      String::from("left side of `=` must be a mutable variable"),
    )
  }

  pub fn log_unbound_variable(&mut self, range: Range, name: &str) {
    self.error(
      range,
      codes::UNBOUND_VARIABLE,
      format!("variable `{}` has no value in this context", name),
    )
  }

  pub fn log_invalid_operator(&mut self, range: Range, op: &str) {
    self.error(
      range,
      codes::INVALID_OPERATOR,
      format!("invalid binary operator `{}`", op),
    )
  }
}

/// Stable diagnostic codes, one per failure in the error taxonomy.
pub mod codes {
  pub const LEX_ERROR: i32 = 1;
  pub const PARSE_ERROR: i32 = 2;
  pub const REDECLARATION: i32 = 3;
  pub const UNDECLARED_SYMBOL: i32 = 4;
  pub const NOT_A_TYPE: i32 = 5;
  pub const RETURN_TYPE_MISMATCH: i32 = 6;
  pub const OPERAND_TYPE_MISMATCH: i32 = 7;
  pub const NON_BOOLEAN_CONDITION: i32 = 8;
  pub const BRANCH_TYPE_MISMATCH: i32 = 9;
  pub const NOT_CALLABLE: i32 = 10;
  pub const ARITY_MISMATCH: i32 = 11;
  pub const ARGUMENT_TYPE_MISMATCH: i32 = 12;
  pub const DUPLICATE_DEFINITION: i32 = 13;
  pub const INVALID_ASSIGNMENT_TARGET: i32 = 14;
  pub const UNBOUND_VARIABLE: i32 = 15;
  pub const INVALID_OPERATOR: i32 = 16;
}

fn severity_name(severity: Option<DiagnosticSeverity>) -> &'static str {
  match severity {
    Some(DiagnosticSeverity::WARNING) => "warning",
    Some(DiagnosticSeverity::INFORMATION) => "note",
    Some(DiagnosticSeverity::HINT) => "hint",
    _ => "error",
  }
}

/// Renders `file:line:col: severity: message`, the offending source
/// line(s), and a `~~~` underline spanning the diagnostic's range.
pub fn render(diag: &Diagnostic, file: &SourceFile) -> String {
  let pos = format!(
    "{}:{}:{}: ",
    file.name().unwrap_or("<input>"),
    diag.range.start.line + 1,
    diag.range.start.character,
  );
  let header = format!(
    "{}{}: {}",
    pos,
    severity_name(diag.severity),
    diag.message
  );
  format!("{}\n{}", header, file.squiggly(diag.range, "  "))
}

/// The `N error(s) generated.` summary line.
pub fn error_count_line(count: usize) -> String {
  if count == 1 {
    String::from("1 error generated.")
  } else {
    format!("{} errors generated.", count)
  }
}
