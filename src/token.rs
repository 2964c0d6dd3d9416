use lsp_types::Range;
use serde::Serialize;
use strum::AsRefStr;

#[derive(Debug, Clone, AsRefStr, PartialEq, Serialize)]
pub enum TokenKind {
  // Keywords
  Def,    // def
  Extern, // extern
  If,     // if
  Then,   // then
  Else,   // else
  For,    // for
  Let,    // let
  In,     // in
  // function, parameter, or type name
  Ident(String),
  // numeric literal
  Number(f64),
  // Punctuation
  LParen, // (
  RParen, // )
  Comma,  // ,
  // residual operator class; binding powers live in the parser's table
  Op(String),
  // synthetic end of input
  Eof,
}

impl TokenKind {
  /// Human-readable form for diagnostics.
  pub fn describe(&self) -> String {
    match self {
      TokenKind::Ident(name) => format!("identifier `{}`", name),
      TokenKind::Number(value) => format!("number `{}`", value),
      TokenKind::Op(op) => format!("operator `{}`", op),
      TokenKind::LParen => String::from("`(`"),
      TokenKind::RParen => String::from("`)`"),
      TokenKind::Comma => String::from("`,`"),
      TokenKind::Eof => String::from("end of input"),
      other => format!("`{}`", other.as_ref().to_lowercase()),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  /// Absolute byte offset of the first character.
  pub offset: usize,
  pub range: Range,
}

impl Token {
  pub fn new(kind: TokenKind, text: impl Into<String>, offset: usize, range: Range) -> Self {
    Token {
      kind,
      text: text.into(),
      offset,
      range,
    }
  }
}
