use super::ast::{DeclTable, Expr, ExprKind, Item};
use super::compilepass::{Pass, PassKind};

/// Operators lowered directly by the code generator. Everything else is
/// desugared into a call of the ordinary function `binary<op>`.
pub const BUILTIN_OPS: [&str; 5] = ["+", "-", "*", "<", "="];

pub fn is_builtin_op(op: &str) -> bool {
  BUILTIN_OPS.contains(&op)
}

/// Rewrites binary expressions using non-builtin operators into function
/// calls, bottom-up, so overloaded operators resolve through ordinary
/// name lookup and dispatch. Running it again on its own output is a
/// no-op, and it never fails.
pub struct UserOpRewriter;

impl UserOpRewriter {
  pub fn new() -> Self {
    UserOpRewriter
  }

  fn rewrite_expr(expr: &mut Expr) {
    match &mut expr.kind {
      ExprKind::Number(_) | ExprKind::Variable { .. } => {}
      ExprKind::Binary { lhs, rhs, .. } => {
        Self::rewrite_expr(lhs);
        Self::rewrite_expr(rhs);
      }
      ExprKind::Call { callee, args } => {
        Self::rewrite_expr(callee);
        for arg in args {
          Self::rewrite_expr(arg);
        }
      }
      ExprKind::If { test, then, orelse } => {
        Self::rewrite_expr(test);
        Self::rewrite_expr(then);
        Self::rewrite_expr(orelse);
      }
      ExprKind::For {
        start,
        end,
        step,
        body,
        ..
      } => {
        Self::rewrite_expr(start);
        Self::rewrite_expr(end);
        Self::rewrite_expr(step);
        Self::rewrite_expr(body);
      }
      ExprKind::Let { init, body, .. } => {
        Self::rewrite_expr(init);
        Self::rewrite_expr(body);
      }
    }

    let desugar = matches!(&expr.kind, ExprKind::Binary { op, .. } if !is_builtin_op(op));
    if desugar {
      let kind = std::mem::replace(&mut expr.kind, ExprKind::Number(0.0));
      let ExprKind::Binary { op, lhs, rhs } = kind else {
        unreachable!()
      };
      let callee = Expr::new(
        expr.range,
        ExprKind::Variable {
          name: format!("binary{}", op),
          decl: None,
        },
      );
      expr.kind = ExprKind::Call {
        callee: Box::new(callee),
        args: vec![*lhs, *rhs],
      };
    }
  }
}

impl Default for UserOpRewriter {
  fn default() -> Self {
    UserOpRewriter::new()
  }
}

impl Pass for UserOpRewriter {
  fn kind(&self) -> PassKind {
    PassKind::UserOpRewriter
  }

  fn run_item(&mut self, item: &mut Item, _decls: &mut DeclTable) -> bool {
    if let Item::Function(func) = item {
      Self::rewrite_expr(&mut func.body);
    }
    true
  }
}
