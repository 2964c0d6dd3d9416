use super::source::SourceFile;
use super::token::{Token, TokenKind};
use derive_more::{Display, Error};
use lsp_types::Range;
use regex::Regex;

const SKIP: &str = "Skip";
const MISMATCH: &str = "Mismatch";

/// One named token pattern. `build` turns the matched text into a token
/// kind, or `None` for trivia that is matched and dropped (comments).
#[derive(Clone)]
pub struct TokenRule {
  pub name: &'static str,
  pub pattern: &'static str,
  pub build: fn(&str) -> Option<TokenKind>,
}

/// An ordered list of token rules. Earlier rules win where patterns
/// overlap, so keywords must be registered before the identifier rule.
/// The names `Skip` and `Mismatch` are reserved for the whitespace and
/// catch-all arms appended at the end.
pub struct Grammar {
  rules: Vec<TokenRule>,
}

impl Grammar {
  pub fn new() -> Self {
    Grammar { rules: vec![] }
  }

  pub fn token(
    &mut self,
    name: &'static str,
    pattern: &'static str,
    build: fn(&str) -> Option<TokenKind>,
  ) -> &mut Self {
    self.rules.push(TokenRule {
      name,
      pattern,
      build,
    });
    self
  }

  fn pattern(&self) -> String {
    let mut arms: Vec<String> = self
      .rules
      .iter()
      .map(|rule| format!("(?P<{}>{})", rule.name, rule.pattern))
      .collect();
    arms.push(format!(r"(?P<{}>[ \t\r\n]+)", SKIP));
    arms.push(format!(r"(?P<{}>.)", MISMATCH));
    arms.join("|")
  }

  pub fn tokenize<'s>(&self, file: &'s SourceFile) -> Tokenizer<'s> {
    Tokenizer {
      re: Regex::new(&self.pattern()).expect("token rule patterns compile"),
      rules: self.rules.clone(),
      file,
      pos: 0,
      done: false,
    }
  }
}

impl Default for Grammar {
  /// The full surface grammar: keywords, identifiers, numbers, line
  /// comments, punctuation, and a residual operator class matching any
  /// run of leftover characters.
  fn default() -> Self {
    let mut g = Grammar::new();
    g.token("Def", r"\bdef\b", |_| Some(TokenKind::Def))
      .token("Extern", r"\bextern\b", |_| Some(TokenKind::Extern))
      .token("If", r"\bif\b", |_| Some(TokenKind::If))
      .token("Then", r"\bthen\b", |_| Some(TokenKind::Then))
      .token("Else", r"\belse\b", |_| Some(TokenKind::Else))
      .token("For", r"\bfor\b", |_| Some(TokenKind::For))
      .token("Let", r"\blet\b", |_| Some(TokenKind::Let))
      .token("In", r"\bin\b", |_| Some(TokenKind::In))
      .token("Ident", r"\b[A-Za-z_][A-Za-z0-9_]*\b", |text| {
        Some(TokenKind::Ident(text.to_owned()))
      })
      .token("Number", r"[0-9]*\.[0-9]+|[0-9]+(?:\.[0-9]*)?", |text| {
        Some(TokenKind::Number(text.parse().unwrap_or(0.0)))
      })
      .token("Comment", r"#[^\n]*", |_| None)
      .token("LParen", r"\(", |_| Some(TokenKind::LParen))
      .token("RParen", r"\)", |_| Some(TokenKind::RParen))
      .token("Comma", r",", |_| Some(TokenKind::Comma))
      .token("Op", r"[^\s0-9A-Za-z_()#,]+", |text| {
        Some(TokenKind::Op(text.to_owned()))
      });
    g
  }
}

#[derive(Debug, Clone, Display, Error)]
#[display("unexpected character `{character}`")]
pub struct LexError {
  pub character: char,
  pub offset: usize,
  pub range: Range,
}

/// Lazy token stream over a source file. Yields each matched token in
/// order, then a single synthetic `Eof` token. A byte matching no rule
/// yields a fatal `LexError` and ends the stream.
pub struct Tokenizer<'s> {
  re: Regex,
  rules: Vec<TokenRule>,
  file: &'s SourceFile,
  pos: usize,
  done: bool,
}

impl<'s> Tokenizer<'s> {
  fn lex_error(&mut self, start: usize, end: usize) -> LexError {
    self.done = true;
    LexError {
      character: self.file.text()[start..].chars().next().unwrap_or('\0'),
      offset: start,
      range: self.file.range(start, end),
    }
  }
}

impl<'s> Iterator for Tokenizer<'s> {
  type Item = Result<Token, LexError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    let file = self.file;
    let text = file.text();
    loop {
      if self.pos >= text.len() {
        self.done = true;
        let range = self.file.range(self.pos, self.pos);
        return Some(Ok(Token::new(TokenKind::Eof, "", self.pos, range)));
      }

      let caps = self.re.captures_at(text, self.pos)?;

      let mut matched = None;
      for rule in &self.rules {
        if let Some(m) = caps.name(rule.name) {
          matched = Some((m.start(), m.end(), rule.build));
          break;
        }
      }

      match matched {
        Some((start, end, _)) if end == start => {
          // a rule that consumes nothing would loop forever
          return Some(Err(self.lex_error(start, start + 1)));
        }
        Some((start, end, build)) => {
          self.pos = end;
          match build(&text[start..end]) {
            Some(kind) => {
              let token = Token::new(kind, &text[start..end], start, self.file.range(start, end));
              return Some(Ok(token));
            }
            None => continue,
          }
        }
        None => {
          if let Some(m) = caps.name(SKIP) {
            self.pos = m.end();
            continue;
          }
          let m = caps.name(MISMATCH)?;
          return Some(Err(self.lex_error(m.start(), m.end())));
        }
      }
    }
  }
}
