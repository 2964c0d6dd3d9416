use super::ast::{Expr, ExprKind, FormalParam, Function, Item, Prototype};
use super::source::union_of;
use super::token::{Token, TokenKind};
use super::tokenize::LexError;
use derive_more::{Display, Error, From};
use hashbrown::{HashMap, HashSet};
use lsp_types::{Position, Range};
use peekmore::{PeekMore, PeekMoreIterator};

/// Left binding power of the call operator `(`.
const CALL_POWER: i32 = 100;
/// Right binding power used for the operand of a registered unary
/// operator: tighter than every binary operator, looser than a call.
const UNARY_OPERAND_POWER: i32 = 80;

#[derive(Debug, Clone, Display, Error)]
#[display("{message}")]
pub struct ParseError {
  pub message: String,
  pub range: Range,
}

/// A fatal front-end failure: either the tokenizer hit an unexpected
/// character or the parser hit an unexpected token. Both abort the unit.
#[derive(Debug, Clone, Display, Error, From)]
pub enum SyntaxError {
  Lex(LexError),
  Parse(ParseError),
}

impl SyntaxError {
  pub fn range(&self) -> Range {
    match self {
      SyntaxError::Lex(err) => err.range,
      SyntaxError::Parse(err) => err.range,
    }
  }
}

/// Binding powers for infix operator tokens plus the set of registered
/// prefix (unary) operators. `def binary`/`def unary` declarations mutate
/// this table as a side effect of parsing the declaration itself, so only
/// tokens parsed afterwards observe the new operator.
pub struct OpTable {
  infix: HashMap<String, i32>,
  prefix: HashSet<String>,
}

impl Default for OpTable {
  fn default() -> Self {
    let mut infix = HashMap::new();
    // `=` sits below the comparisons and associates to the right
    infix.insert(String::from("="), 5);
    infix.insert(String::from("<"), 10);
    infix.insert(String::from("+"), 20);
    infix.insert(String::from("-"), 20);
    infix.insert(String::from("*"), 40);
    OpTable {
      infix,
      prefix: HashSet::new(),
    }
  }
}

impl OpTable {
  pub fn infix_power(&self, op: &str) -> Option<i32> {
    self.infix.get(op).copied()
  }

  pub fn set_infix(&mut self, op: String, power: i32) {
    self.infix.insert(op, power);
  }

  pub fn add_prefix(&mut self, op: String) {
    self.prefix.insert(op);
  }

  pub fn is_prefix(&self, op: &str) -> bool {
    self.prefix.contains(op)
  }
}

/// Operator-precedence parser over the token stream. Iterating yields the
/// top-level items; the first syntax error is fatal and ends the stream.
pub struct Parser<I: Iterator<Item = Result<Token, LexError>>> {
  tokens: PeekMoreIterator<I>,
  ops: OpTable,
  last_range: Range,
  done: bool,
}

impl<I: Iterator<Item = Result<Token, LexError>>> Parser<I> {
  pub fn new(tokens: I) -> Self {
    Parser {
      tokens: tokens.peekmore(),
      ops: OpTable::default(),
      last_range: Range::new(Position::new(0, 0), Position::new(0, 0)),
      done: false,
    }
  }

  fn eof_token(&self) -> Token {
    Token::new(TokenKind::Eof, "", 0, self.last_range)
  }

  fn peek(&mut self) -> Result<Token, SyntaxError> {
    match self.tokens.peek_nth(0) {
      Some(Ok(tk)) => Ok(tk.clone()),
      Some(Err(err)) => Err(SyntaxError::Lex(err.clone())),
      None => Ok(self.eof_token()),
    }
  }

  fn advance(&mut self) -> Result<Token, SyntaxError> {
    match self.tokens.next() {
      Some(Ok(tk)) => {
        self.last_range = tk.range;
        Ok(tk)
      }
      Some(Err(err)) => Err(SyntaxError::Lex(err)),
      None => Ok(self.eof_token()),
    }
  }

  fn error_at(&self, range: Range, expected: &str, found: &TokenKind) -> SyntaxError {
    SyntaxError::Parse(ParseError {
      message: format!("expected {} but found unexpected {}", expected, found.describe()),
      range,
    })
  }

  fn expect(&mut self, kind: TokenKind) -> Result<Token, SyntaxError> {
    let tk = self.advance()?;
    if tk.kind == kind {
      Ok(tk)
    } else {
      Err(self.error_at(tk.range, &kind.describe(), &tk.kind))
    }
  }

  fn expect_ident(&mut self, expected: &str) -> Result<(String, Range), SyntaxError> {
    let tk = self.advance()?;
    match tk.kind {
      TokenKind::Ident(name) => Ok((name, tk.range)),
      other => Err(self.error_at(tk.range, expected, &other)),
    }
  }

  fn expect_op(&mut self, op: &str) -> Result<Token, SyntaxError> {
    let tk = self.advance()?;
    match &tk.kind {
      TokenKind::Op(o) if o == op => Ok(tk),
      _ => Err(self.error_at(tk.range, &format!("`{}`", op), &tk.kind)),
    }
  }

  /// Left binding power of the upcoming token.
  fn left_power(&mut self) -> Result<i32, SyntaxError> {
    let tk = self.peek()?;
    Ok(match &tk.kind {
      TokenKind::LParen => CALL_POWER,
      TokenKind::Op(op) => self.ops.infix_power(op).unwrap_or(0),
      _ => 0,
    })
  }

  /// Parses an expression, extending the left operand while the next
  /// token binds tighter than `rbp`.
  fn parse_expr(&mut self, rbp: i32) -> Result<Expr, SyntaxError> {
    let mut left = self.parse_prefix()?;
    while rbp < self.left_power()? {
      left = self.parse_infix(left)?;
    }
    Ok(left)
  }

  fn parse_prefix(&mut self) -> Result<Expr, SyntaxError> {
    let tk = self.advance()?;
    match tk.kind {
      TokenKind::Number(value) => Ok(Expr::new(tk.range, ExprKind::Number(value))),
      TokenKind::Ident(name) => {
        Ok(Expr::new(tk.range, ExprKind::Variable { name, decl: None }))
      }
      TokenKind::LParen => {
        let mut expr = self.parse_expr(0)?;
        let rp = self.expect(TokenKind::RParen)?;
        expr.range = union_of(tk.range, rp.range);
        Ok(expr)
      }
      TokenKind::If => {
        let test = self.parse_expr(0)?;
        self.expect(TokenKind::Then)?;
        let then = self.parse_expr(0)?;
        self.expect(TokenKind::Else)?;
        let orelse = self.parse_expr(0)?;
        let range = union_of(tk.range, orelse.range);
        Ok(Expr::new(
          range,
          ExprKind::If {
            test: Box::new(test),
            then: Box::new(then),
            orelse: Box::new(orelse),
          },
        ))
      }
      TokenKind::For => {
        let (name, _) = self.expect_ident("loop variable name")?;
        self.expect_op("=")?;
        let start = self.parse_expr(0)?;
        self.expect(TokenKind::Comma)?;
        let end = self.parse_expr(0)?;
        let step = if self.peek()?.kind == TokenKind::Comma {
          self.advance()?;
          self.parse_expr(0)?
        } else {
          Expr::new(tk.range, ExprKind::Number(1.0))
        };
        self.expect(TokenKind::In)?;
        let body = self.parse_expr(0)?;
        let range = union_of(tk.range, body.range);
        Ok(Expr::new(
          range,
          ExprKind::For {
            name,
            decl: None,
            start: Box::new(start),
            end: Box::new(end),
            step: Box::new(step),
            body: Box::new(body),
          },
        ))
      }
      TokenKind::Let => {
        let (name, _) = self.expect_ident("binding name")?;
        self.expect_op("=")?;
        let init = self.parse_expr(0)?;
        self.expect(TokenKind::In)?;
        let body = self.parse_expr(0)?;
        let range = union_of(tk.range, body.range);
        Ok(Expr::new(
          range,
          ExprKind::Let {
            name,
            decl: None,
            init: Box::new(init),
            body: Box::new(body),
          },
        ))
      }
      TokenKind::Op(op) if self.ops.is_prefix(&op) => {
        let operand = self.parse_expr(UNARY_OPERAND_POWER)?;
        let callee = Expr::new(
          tk.range,
          ExprKind::Variable {
            name: format!("unary{}", op),
            decl: None,
          },
        );
        let range = union_of(tk.range, operand.range);
        Ok(Expr::new(
          range,
          ExprKind::Call {
            callee: Box::new(callee),
            args: vec![operand],
          },
        ))
      }
      other => Err(self.error_at(tk.range, "expression", &other)),
    }
  }

  fn parse_infix(&mut self, left: Expr) -> Result<Expr, SyntaxError> {
    let tk = self.advance()?;
    match tk.kind {
      TokenKind::LParen => {
        let mut args = vec![];
        if self.peek()?.kind != TokenKind::RParen {
          args.push(self.parse_expr(0)?);
          while self.peek()?.kind == TokenKind::Comma {
            self.advance()?;
            args.push(self.parse_expr(0)?);
          }
        }
        let rp = self.expect(TokenKind::RParen)?;
        let range = union_of(left.range, rp.range);
        Ok(Expr::new(
          range,
          ExprKind::Call {
            callee: Box::new(left),
            args,
          },
        ))
      }
      TokenKind::Op(op) => {
        let lbp = self.ops.infix_power(&op).unwrap_or(0);
        // `=` is the one right-associative operator
        let rbp = if op == "=" { lbp - 1 } else { lbp };
        let rhs = self.parse_expr(rbp)?;
        let range = union_of(left.range, rhs.range);
        Ok(Expr::new(
          range,
          ExprKind::Binary {
            op,
            lhs: Box::new(left),
            rhs: Box::new(rhs),
          },
        ))
      }
      other => Err(self.error_at(tk.range, "infix operator", &other)),
    }
  }

  /// Parses `(<param>*) [-> <type>]` after the head, where the head is a
  /// plain name, `binary <op> <precedence>`, or `unary <op>`. Operator
  /// heads register themselves in the operator table immediately.
  fn parse_prototype(&mut self) -> Result<Prototype, SyntaxError> {
    let (mut name, name_range) = self.expect_ident("function name")?;
    let mut range = name_range;

    if (name == "binary" || name == "unary")
      && matches!(self.peek()?.kind, TokenKind::Op(_))
    {
      let op_tk = self.advance()?;
      let TokenKind::Op(op) = op_tk.kind else {
        unreachable!()
      };
      if name == "binary" {
        let prec_tk = self.advance()?;
        let prec = match &prec_tk.kind {
          TokenKind::Number(prec) => *prec,
          other => return Err(self.error_at(prec_tk.range, "operator precedence", other)),
        };
        if prec.fract() != 0.0 || prec < 1.0 {
          return Err(SyntaxError::Parse(ParseError {
            message: String::from("operator precedence must be a positive integer"),
            range: prec_tk.range,
          }));
        }
        self.ops.set_infix(op.clone(), prec as i32);
        range = union_of(range, prec_tk.range);
      } else {
        self.ops.add_prefix(op.clone());
        range = union_of(range, op_tk.range);
      }
      name = format!("{}{}", name, op);
    }

    self.expect(TokenKind::LParen)?;
    let mut params = vec![];
    while matches!(self.peek()?.kind, TokenKind::Ident(_)) {
      let (pname, mut prange) = self.expect_ident("parameter name")?;
      let mut typename = None;
      if matches!(&self.peek()?.kind, TokenKind::Op(op) if op == ":") {
        self.advance()?;
        let (tyname, tyrange) = self.expect_ident("type name")?;
        typename = Some(Expr::new(
          tyrange,
          ExprKind::Variable {
            name: tyname,
            decl: None,
          },
        ));
        prange = union_of(prange, tyrange);
      }
      params.push(FormalParam {
        range: prange,
        name: pname,
        typename,
        decl: None,
      });
    }
    let rp = self.expect(TokenKind::RParen)?;
    range = union_of(range, rp.range);

    let mut result_typename = None;
    if matches!(&self.peek()?.kind, TokenKind::Op(op) if op == "->") {
      self.advance()?;
      let (tyname, tyrange) = self.expect_ident("result type name")?;
      result_typename = Some(Expr::new(
        tyrange,
        ExprKind::Variable {
          name: tyname,
          decl: None,
        },
      ));
      range = union_of(range, tyrange);
    }

    Ok(Prototype {
      range,
      name,
      params,
      result_typename,
      decl: None,
    })
  }

  fn parse_item(&mut self) -> Result<Item, SyntaxError> {
    let tk = self.advance()?;
    match tk.kind {
      TokenKind::Def => {
        let proto = self.parse_prototype()?;
        let body = self.parse_expr(1)?;
        let range = union_of(tk.range, body.range);
        Ok(Item::Function(Function { range, proto, body }))
      }
      TokenKind::Extern => {
        let mut proto = self.parse_prototype()?;
        proto.range = union_of(tk.range, proto.range);
        Ok(Item::Prototype(proto))
      }
      other => Err(self.error_at(tk.range, "`def` or `extern`", &other)),
    }
  }
}

impl<I: Iterator<Item = Result<Token, LexError>>> Iterator for Parser<I> {
  type Item = Result<Item, SyntaxError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    // items may be separated by stray `;` operators
    loop {
      match self.peek() {
        Ok(tk) => match &tk.kind {
          TokenKind::Op(op) if op == ";" => {
            let _ = self.advance();
          }
          TokenKind::Eof => {
            self.done = true;
            return None;
          }
          _ => break,
        },
        Err(err) => {
          self.done = true;
          return Some(Err(err));
        }
      }
    }

    let item = self.parse_item();
    if item.is_err() {
      self.done = true;
    }
    Some(item)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::source::SourceFile;
  use crate::tokenize::Grammar;

  fn parse_all(source: &str) -> Vec<Item> {
    let file = SourceFile::new(source, None);
    Parser::new(Grammar::default().tokenize(&file))
      .collect::<Result<Vec<_>, _>>()
      .unwrap()
  }

  fn parse_body(source: &str) -> Expr {
    let items = parse_all(source);
    match items.into_iter().next().unwrap() {
      Item::Function(func) => func.body,
      other => panic!("expected a function, got {:?}", other),
    }
  }

  fn binary_parts(expr: &Expr) -> (&str, &Expr, &Expr) {
    match &expr.kind {
      ExprKind::Binary { op, lhs, rhs } => (op.as_str(), lhs, rhs),
      other => panic!("expected binary, got {:?}", other),
    }
  }

  fn variable_name(expr: &Expr) -> &str {
    match &expr.kind {
      ExprKind::Variable { name, .. } => name.as_str(),
      other => panic!("expected variable, got {:?}", other),
    }
  }

  #[test]
  fn binary_operands_in_source_order() {
    let body = parse_body("def t() x + y");
    let (op, lhs, rhs) = binary_parts(&body);
    assert_eq!(op, "+");
    assert_eq!(variable_name(lhs), "x");
    assert_eq!(variable_name(rhs), "y");
  }

  #[test]
  fn precedence_nests_correctly() {
    // ((v*w) < (x+(y*z)))
    let body = parse_body("def t() v * w < x + y * z");
    let (op, lhs, rhs) = binary_parts(&body);
    assert_eq!(op, "<");
    let (lop, lv, lw) = binary_parts(lhs);
    assert_eq!((lop, variable_name(lv), variable_name(lw)), ("*", "v", "w"));
    let (rop, rx, ryz) = binary_parts(rhs);
    assert_eq!((rop, variable_name(rx)), ("+", "x"));
    let (mop, ry, rz) = binary_parts(ryz);
    assert_eq!((mop, variable_name(ry), variable_name(rz)), ("*", "y", "z"));
  }

  #[test]
  fn left_associative_chains() {
    // ((a - b) - c)
    let body = parse_body("def t() a - b - c");
    let (_, lhs, rhs) = binary_parts(&body);
    assert_eq!(variable_name(rhs), "c");
    let (_, la, lb) = binary_parts(lhs);
    assert_eq!((variable_name(la), variable_name(lb)), ("a", "b"));
  }

  #[test]
  fn assignment_is_right_associative() {
    // x = (y = (x + 1))
    let body = parse_body("def t(x y) x = y = x + 1");
    let (op, lhs, rhs) = binary_parts(&body);
    assert_eq!((op, variable_name(lhs)), ("=", "x"));
    let (op2, lhs2, _) = binary_parts(rhs);
    assert_eq!((op2, variable_name(lhs2)), ("=", "y"));
  }

  #[test]
  fn multiple_items_with_separators() {
    let items = parse_all("def f() a + b; def g() c");
    assert_eq!(items.len(), 2);
    let names: Vec<_> = items
      .iter()
      .map(|item| match item {
        Item::Function(func) => func.proto.name.clone(),
        Item::Prototype(proto) => proto.name.clone(),
      })
      .collect();
    assert_eq!(names, vec!["f", "g"]);
  }

  #[test]
  fn extern_prototypes() {
    let items = parse_all("extern f(); extern g()");
    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Item::Prototype(p) if p.name == "f"));
    assert!(matches!(&items[1], Item::Prototype(p) if p.name == "g"));
  }

  #[test]
  fn typed_parameters_and_result() {
    let items = parse_all("extern foo(bar:int baz) -> double");
    let Item::Prototype(proto) = &items[0] else {
      panic!("expected prototype");
    };
    assert_eq!(proto.params.len(), 2);
    assert_eq!(proto.params[0].name, "bar");
    assert_eq!(
      variable_name(proto.params[0].typename.as_ref().unwrap()),
      "int"
    );
    assert!(proto.params[1].typename.is_none());
    assert_eq!(
      variable_name(proto.result_typename.as_ref().unwrap()),
      "double"
    );
  }

  #[test]
  fn for_loop_shape() {
    let body = parse_body("def t() for x = 0, x < 10, 2 in x");
    let ExprKind::For {
      name,
      start,
      end,
      step,
      body: loop_body,
      ..
    } = &body.kind
    else {
      panic!("expected for, got {:?}", body.kind);
    };
    assert_eq!(name, "x");
    assert!(matches!(start.kind, ExprKind::Number(v) if v == 0.0));
    let (op, _, _) = binary_parts(end);
    assert_eq!(op, "<");
    assert!(matches!(step.kind, ExprKind::Number(v) if v == 2.0));
    assert_eq!(variable_name(loop_body), "x");
  }

  #[test]
  fn for_loop_step_defaults_to_one() {
    let body = parse_body("def t() for x = 0, x < 10 in x");
    let ExprKind::For { step, .. } = &body.kind else {
      panic!("expected for");
    };
    assert!(matches!(step.kind, ExprKind::Number(v) if v == 1.0));
  }

  #[test]
  fn let_binding_shape() {
    let body = parse_body("def t() let x = 1 in x + x");
    let ExprKind::Let { name, init, .. } = &body.kind else {
      panic!("expected let, got {:?}", body.kind);
    };
    assert_eq!(name, "x");
    assert!(matches!(init.kind, ExprKind::Number(v) if v == 1.0));
  }

  #[test]
  fn call_arguments() {
    let body = parse_body("def t() f(a, b + c)");
    let ExprKind::Call { callee, args } = &body.kind else {
      panic!("expected call");
    };
    assert_eq!(variable_name(callee), "f");
    assert_eq!(args.len(), 2);
    assert_eq!(variable_name(&args[0]), "a");
  }

  #[test]
  fn empty_call_arguments() {
    let body = parse_body("def t() f()");
    let ExprKind::Call { args, .. } = &body.kind else {
      panic!("expected call");
    };
    assert!(args.is_empty());
  }

  #[test]
  fn user_binary_operator_parses_at_declared_power() {
    // `&` at 6 binds looser than `<` at 10: x < y & z == ((x < y) & z)
    let items = parse_all("def binary& 6 (a b) a; def t(x y z) x < y & z");
    assert!(matches!(&items[0], Item::Function(f) if f.proto.name == "binary&"));
    let Item::Function(func) = &items[1] else {
      panic!("expected function");
    };
    let (op, lhs, _) = binary_parts(&func.body);
    assert_eq!(op, "&");
    let (inner, _, _) = binary_parts(lhs);
    assert_eq!(inner, "<");
  }

  #[test]
  fn user_unary_operator_lowers_to_call() {
    let items = parse_all("def unary! (v) 0 - v; def t(x) !f(x)");
    assert!(matches!(&items[0], Item::Function(f) if f.proto.name == "unary!"));
    let Item::Function(func) = &items[1] else {
      panic!("expected function");
    };
    // unary binds looser than call: !(f(x))
    let ExprKind::Call { callee, args } = &func.body.kind else {
      panic!("expected call");
    };
    assert_eq!(variable_name(callee), "unary!");
    assert!(matches!(&args[0].kind, ExprKind::Call { .. }));
  }

  #[test]
  fn fractional_operator_precedence_is_rejected() {
    let file = SourceFile::new("def binary& 6.5 (a b) a", None);
    let err = Parser::new(Grammar::default().tokenize(&file))
      .next()
      .unwrap()
      .unwrap_err();
    assert!(matches!(err, SyntaxError::Parse(_)));
  }

  #[test]
  fn expression_ranges_span_all_tokens() {
    let source = "def t() x + y";
    let file = SourceFile::new(source, None);
    let body = parse_body(source);
    assert_eq!(body.range, file.range(8, 13));
  }

  #[test]
  fn parse_error_is_fatal_and_positioned() {
    let file = SourceFile::new("def t() )", None);
    let mut parser = Parser::new(Grammar::default().tokenize(&file));
    let err = parser.next().unwrap().unwrap_err();
    let SyntaxError::Parse(parse) = err else {
      panic!("expected a parse error");
    };
    assert_eq!(parse.range, file.range(8, 9));
    // the stream ends after a fatal error
    assert!(parser.next().is_none());
  }

  #[test]
  fn lex_error_surfaces_through_parser() {
    let file = SourceFile::new("def t() \u{00a0}", None);
    let mut parser = Parser::new(Grammar::default().tokenize(&file));
    let err = parser.next().unwrap().unwrap_err();
    assert!(matches!(err, SyntaxError::Lex(_)));
  }
}
