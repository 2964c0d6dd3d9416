use super::ast::{Decl, DeclId, DeclKind, DeclTable, Expr, ExprKind, Function, Item, Prototype};
use super::compilepass::{Pass, PassKind};
use super::dlogger::DiagnosticLogger;
use super::types::{Primitive, Ty};
use hashbrown::HashMap;
use lsp_types::Range;

/// Lexical name resolution: binds every variable reference to a
/// declaration via a scope chain, collecting every error instead of
/// stopping at the first.
///
/// The global scope persists across items, so functions declared by one
/// item are visible to the next.
pub struct NameResolver {
  dlogger: DiagnosticLogger,
  scopes: Vec<HashMap<String, DeclId>>,
  seeded: bool,
}

impl NameResolver {
  pub fn new(dlogger: DiagnosticLogger) -> Self {
    NameResolver {
      dlogger,
      scopes: vec![HashMap::new()],
      seeded: false,
    }
  }

  /// Seeds the global scope with the builtin type declarations.
  fn ensure_builtins(&mut self, decls: &mut DeclTable) {
    if self.seeded {
      return;
    }
    self.seeded = true;
    for prim in [Primitive::Double, Primitive::Int, Primitive::Bool] {
      let id = decls.alloc(Decl::new(prim.name(), DeclKind::Type(Ty::Prim(prim))));
      self.scopes[0].insert(prim.name().to_owned(), id);
    }
  }

  fn push_scope(&mut self) {
    self.scopes.push(HashMap::new());
  }

  fn pop_scope(&mut self) {
    self.scopes.pop();
  }

  fn lookup(&self, name: &str) -> Option<DeclId> {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|scope| scope.get(name).copied())
  }

  /// Introduces `id` into the innermost scope. Conflicts are checked only
  /// against that scope, and redeclaring the identical declaration is not
  /// an error.
  fn declare(&mut self, decls: &DeclTable, id: DeclId, range: Range) -> bool {
    let name = &decls.get(id).name;
    let innermost = self.scopes.last_mut().expect("scope chain is never empty");
    match innermost.get(name).copied() {
      Some(existing) if existing != id => {
        self.dlogger.log_redeclaration(range, name);
        false
      }
      _ => {
        innermost.insert(name.clone(), id);
        true
      }
    }
  }

  fn visit_prototype(&mut self, decls: &mut DeclTable, proto: &mut Prototype) -> bool {
    let mut tys_ok = true;
    for param in &mut proto.params {
      // parameters get their declaration entries here; only the enclosing
      // function brings them into scope
      param
        .decl
        .get_or_insert_with(|| decls.alloc(Decl::new(param.name.clone(), DeclKind::FormalParam)));
      if let Some(typename) = &mut param.typename {
        tys_ok &= self.visit_expr(decls, typename);
      }
    }

    let mut result_ok = true;
    if let Some(result_typename) = &mut proto.result_typename {
      result_ok = self.visit_expr(decls, result_typename);
    }

    let id = *proto
      .decl
      .get_or_insert_with(|| decls.alloc(Decl::new(proto.name.clone(), DeclKind::Prototype)));
    let declared = self.declare(decls, id, proto.range);

    declared && result_ok && tys_ok
  }

  fn visit_function(&mut self, decls: &mut DeclTable, func: &mut Function) -> bool {
    let decl_ok = self.visit_prototype(decls, &mut func.proto);

    self.push_scope();
    let mut params_ok = true;
    for param in &func.proto.params {
      if let Some(id) = param.decl {
        params_ok &= self.declare(decls, id, param.range);
      }
    }
    let body_ok = self.visit_expr(decls, &mut func.body);
    self.pop_scope();

    decl_ok && params_ok && body_ok
  }

  fn visit_expr(&mut self, decls: &mut DeclTable, expr: &mut Expr) -> bool {
    let range = expr.range;
    match &mut expr.kind {
      ExprKind::Number(_) => true,
      ExprKind::Variable { name, decl } => match self.lookup(name) {
        Some(id) => {
          *decl = Some(id);
          true
        }
        None => {
          *decl = Some(decls.undeclared(name));
          self.dlogger.log_undeclared_symbol(range, name);
          false
        }
      },
      ExprKind::Binary { lhs, rhs, .. } => {
        let lhs_ok = self.visit_expr(decls, lhs);
        let rhs_ok = self.visit_expr(decls, rhs);
        lhs_ok && rhs_ok
      }
      ExprKind::Call { callee, args } => {
        let mut ok = self.visit_expr(decls, callee);
        for arg in args {
          ok &= self.visit_expr(decls, arg);
        }
        ok
      }
      ExprKind::If { test, then, orelse } => {
        let test_ok = self.visit_expr(decls, test);
        let then_ok = self.visit_expr(decls, then);
        let orelse_ok = self.visit_expr(decls, orelse);
        test_ok && then_ok && orelse_ok
      }
      ExprKind::For {
        name,
        decl,
        start,
        end,
        step,
        body,
      } => {
        // the loop variable's initializer must not see the variable
        let start_ok = self.visit_expr(decls, start);
        self.push_scope();
        let id = *decl
          .get_or_insert_with(|| decls.alloc(Decl::new(name.clone(), DeclKind::ForBinding)));
        let declared = self.declare(decls, id, range);
        let end_ok = self.visit_expr(decls, end);
        let step_ok = self.visit_expr(decls, step);
        let body_ok = self.visit_expr(decls, body);
        self.pop_scope();
        start_ok && declared && end_ok && step_ok && body_ok
      }
      ExprKind::Let {
        name,
        decl,
        init,
        body,
      } => {
        let init_ok = self.visit_expr(decls, init);
        self.push_scope();
        let id = *decl
          .get_or_insert_with(|| decls.alloc(Decl::new(name.clone(), DeclKind::LetBinding)));
        let declared = self.declare(decls, id, range);
        let body_ok = self.visit_expr(decls, body);
        self.pop_scope();
        init_ok && declared && body_ok
      }
    }
  }
}

impl Pass for NameResolver {
  fn kind(&self) -> PassKind {
    PassKind::NameResolver
  }

  fn dependencies(&self) -> &'static [PassKind] {
    &[PassKind::UserOpRewriter]
  }

  fn run_item(&mut self, item: &mut Item, decls: &mut DeclTable) -> bool {
    self.ensure_builtins(decls);
    match item {
      Item::Prototype(proto) => self.visit_prototype(decls, proto),
      Item::Function(func) => self.visit_function(decls, func),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::astbuilder::Parser;
  use crate::dlogger::{codes, DiagnosticLog};
  use crate::source::SourceFile;
  use crate::tokenize::Grammar;
  use crate::user_op_rewriter::UserOpRewriter;
  use lsp_types::NumberOrString;

  fn resolve(source: &str) -> (Vec<Item>, DeclTable, Vec<lsp_types::Diagnostic>, bool) {
    let file = SourceFile::new(source, None);
    let mut items: Vec<Item> = Parser::new(Grammar::default().tokenize(&file))
      .collect::<Result<_, _>>()
      .unwrap();
    let mut decls = DeclTable::new();
    let mut log = DiagnosticLog::new();
    let mut rewriter = UserOpRewriter::new();
    let mut resolver = NameResolver::new(log.get_logger(None));
    let mut ok = true;
    for item in &mut items {
      rewriter.run_item(item, &mut decls);
      ok &= resolver.run_item(item, &mut decls);
    }
    (items, decls, log.drain(), ok)
  }

  fn diag_codes(diags: &[lsp_types::Diagnostic]) -> Vec<i32> {
    diags
      .iter()
      .map(|d| match d.code {
        Some(NumberOrString::Number(n)) => n,
        _ => panic!("diagnostic without a numeric code"),
      })
      .collect()
  }

  #[test]
  fn parameters_and_types_resolve() {
    let (_, _, diags, ok) = resolve("def foo(a:int)->double a");
    assert!(ok);
    assert!(diags.is_empty());
  }

  #[test]
  fn undeclared_symbol_attaches_sentinel() {
    let (items, decls, diags, ok) = resolve("def foo() x");
    assert!(!ok);
    assert_eq!(diag_codes(&diags), vec![codes::UNDECLARED_SYMBOL]);

    let Item::Function(func) = &items[0] else {
      panic!("expected function");
    };
    let ExprKind::Variable { decl: Some(id), .. } = &func.body.kind else {
      panic!("expected resolved variable");
    };
    assert!(decls.get(*id).is_undeclared());
  }

  #[test]
  fn duplicate_parameters_report_one_redeclaration() {
    let (_, _, diags, ok) = resolve("def foo(a a) a");
    assert!(!ok);
    assert_eq!(diag_codes(&diags), vec![codes::REDECLARATION]);
  }

  #[test]
  fn loop_variable_is_not_visible_in_start() {
    let (_, _, diags, ok) = resolve("def t() for i = i, 10 in i");
    assert!(!ok);
    assert_eq!(diag_codes(&diags), vec![codes::UNDECLARED_SYMBOL]);
  }

  #[test]
  fn let_initializer_does_not_see_its_binding() {
    let (_, _, diags, ok) = resolve("def t() let x = x in x");
    assert!(!ok);
    assert_eq!(diag_codes(&diags), vec![codes::UNDECLARED_SYMBOL]);
  }

  #[test]
  fn inner_scopes_shadow_outer_bindings() {
    let (_, _, diags, ok) = resolve("def t(x) let x = 1 in x");
    assert!(ok, "{:?}", diags);
    assert!(diags.is_empty());
  }

  #[test]
  fn functions_are_visible_across_items() {
    let (_, _, diags, ok) = resolve("def f() 1 def g() f()");
    assert!(ok, "{:?}", diags);
  }

  #[test]
  fn extern_then_def_is_a_redeclaration() {
    let (_, _, diags, ok) = resolve("extern f() def f() 1");
    assert!(!ok);
    assert_eq!(diag_codes(&diags), vec![codes::REDECLARATION]);
  }

  #[test]
  fn unknown_type_name_is_undeclared() {
    let (_, _, diags, ok) = resolve("def t(a:flot) a");
    assert!(!ok);
    assert_eq!(diag_codes(&diags), vec![codes::UNDECLARED_SYMBOL]);
  }

  #[test]
  fn errors_do_not_stop_the_traversal() {
    let (_, _, diags, ok) = resolve("def t() x + y");
    assert!(!ok);
    assert_eq!(
      diag_codes(&diags),
      vec![codes::UNDECLARED_SYMBOL, codes::UNDECLARED_SYMBOL]
    );
  }
}
