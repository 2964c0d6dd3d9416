use super::ast::{DeclKind, DeclTable, Expr, ExprKind, FormalParam, Function, Item, Prototype};
use super::compilepass::{Pass, PassKind};
use super::dlogger::DiagnosticLogger;
use super::types::Ty;

/// Operators whose result is boolean rather than the operand type.
const COMPARISON_OPS: [&str; 6] = ["==", "<", ">", "<=", ">=", "!="];

/// Bottom-up type assignment and validation. Assumes name resolution has
/// already attached declarations; every mismatch is reported and checking
/// continues so one run surfaces every error in the unit.
pub struct Typechecker {
  dlogger: DiagnosticLogger,
}

impl Typechecker {
  pub fn new(dlogger: DiagnosticLogger) -> Self {
    Typechecker { dlogger }
  }

  /// A parameter's type is the primitive named by its annotation, or
  /// double when untyped. The declaration keeps the double default even
  /// when the annotation is bad, so later uses do not cascade.
  fn check_param(&mut self, decls: &mut DeclTable, param: &mut FormalParam) -> bool {
    let mut ok = true;
    let ty = match &param.typename {
      Some(typename) => match &typename.kind {
        ExprKind::Variable {
          decl: Some(id),
          name,
        } => match &decls.get(*id).kind {
          DeclKind::Type(ty) => Some(ty.clone()),
          // resolution already reported the unknown name
          DeclKind::Undeclared => {
            ok = false;
            None
          }
          _ => {
            self.dlogger.log_not_a_type(typename.range, name);
            ok = false;
            None
          }
        },
        _ => {
          ok = false;
          None
        }
      },
      None => Some(Ty::DOUBLE),
    };

    if let Some(id) = param.decl {
      decls.get_mut(id).ty = Some(ty.unwrap_or(Ty::DOUBLE));
    }
    ok
  }

  /// Synthesizes the prototype's function type from its parameters and
  /// result annotation (default result: double).
  fn check_prototype(&mut self, decls: &mut DeclTable, proto: &mut Prototype) -> bool {
    let mut ok = true;
    for param in &mut proto.params {
      ok &= self.check_param(decls, param);
    }

    let mut result_ty = Ty::DOUBLE;
    if let Some(typename) = &proto.result_typename {
      match &typename.kind {
        ExprKind::Variable {
          decl: Some(id),
          name,
        } => match &decls.get(*id).kind {
          DeclKind::Type(ty) => result_ty = ty.clone(),
          DeclKind::Undeclared => ok = false,
          _ => {
            self.dlogger.log_not_a_type(typename.range, name);
            ok = false;
          }
        },
        _ => ok = false,
      }
    }

    let param_tys: Vec<Ty> = proto
      .params
      .iter()
      .map(|p| {
        p.decl
          .and_then(|id| decls.get(id).ty.clone())
          .unwrap_or(Ty::DOUBLE)
      })
      .collect();
    if let Some(id) = proto.decl {
      decls.get_mut(id).ty = Some(Ty::function(result_ty, param_tys));
    }
    ok
  }

  fn check_function(&mut self, decls: &mut DeclTable, func: &mut Function) -> bool {
    let proto_ok = self.check_prototype(decls, &mut func.proto);
    let body_ok = self.check_expr(decls, &mut func.body);

    let mut ret_ok = true;
    let result_ty = func
      .proto
      .decl
      .and_then(|id| decls.get(id).ty.clone())
      .and_then(|ty| match ty {
        Ty::Function { result, .. } => Some(*result),
        _ => None,
      });
    if let (Some(expected), Some(found)) = (&result_ty, &func.body.ty) {
      if expected != found {
        self
          .dlogger
          .log_return_type_mismatch(func.body.range, expected, found);
        ret_ok = false;
      }
    }

    proto_ok && body_ok && ret_ok
  }

  fn check_expr(&mut self, decls: &mut DeclTable, expr: &mut Expr) -> bool {
    let range = expr.range;
    let (ty, ok) = match &mut expr.kind {
      ExprKind::Number(_) => (Some(Ty::DOUBLE), true),
      ExprKind::Variable { decl, .. } => {
        // an unresolved or untyped declaration was already reported
        match decl.and_then(|id| decls.get(id).ty.clone()) {
          Some(ty) => (Some(ty), true),
          None => (None, false),
        }
      }
      ExprKind::Binary { op, lhs, rhs } => {
        let lhs_ok = self.check_expr(decls, lhs);
        let rhs_ok = self.check_expr(decls, rhs);
        let mut ok = lhs_ok && rhs_ok;
        let ty = match (&lhs.ty, &rhs.ty) {
          (Some(lty), Some(rty)) if lty != rty => {
            self.dlogger.log_operand_type_mismatch(range, lty, rty);
            ok = false;
            None
          }
          (Some(lty), Some(_)) => {
            if COMPARISON_OPS.contains(&op.as_str()) {
              Some(Ty::BOOL)
            } else {
              Some(lty.clone())
            }
          }
          _ => None,
        };
        (ty, ok)
      }
      ExprKind::Call { callee, args } => {
        let mut ok = self.check_expr(decls, callee);
        for arg in args.iter_mut() {
          ok &= self.check_expr(decls, arg);
        }
        match &callee.ty {
          Some(Ty::Function { result, params }) => {
            let mut actuals_ok = true;
            if params.len() != args.len() {
              self.dlogger.log_arity_mismatch(range, params.len(), args.len());
              actuals_ok = false;
            }
            for (param_ty, arg) in params.iter().zip(args.iter()) {
              if let Some(arg_ty) = &arg.ty {
                if param_ty != arg_ty {
                  self
                    .dlogger
                    .log_argument_type_mismatch(arg.range, param_ty, arg_ty);
                  actuals_ok = false;
                }
              }
            }
            (Some((**result).clone()), ok && actuals_ok)
          }
          Some(other) => {
            self.dlogger.log_not_callable(callee.range, other);
            (None, false)
          }
          None => (None, false),
        }
      }
      ExprKind::If { test, then, orelse } => {
        let test_ok = self.check_expr(decls, test);
        let then_ok = self.check_expr(decls, then);
        let orelse_ok = self.check_expr(decls, orelse);
        let mut ok = test_ok && then_ok && orelse_ok;

        if let Some(test_ty) = &test.ty {
          if !test_ty.is_bool() {
            self.dlogger.log_non_boolean_condition(test.range, test_ty);
            ok = false;
          }
        }

        let ty = match (&then.ty, &orelse.ty) {
          (Some(then_ty), Some(orelse_ty)) if then_ty != orelse_ty => {
            self
              .dlogger
              .log_branch_type_mismatch(range, then_ty, orelse_ty);
            ok = false;
            None
          }
          (Some(then_ty), Some(_)) => Some(then_ty.clone()),
          _ => None,
        };
        (ty, ok)
      }
      ExprKind::For {
        decl,
        start,
        end,
        step,
        body,
        ..
      } => {
        let start_ok = self.check_expr(decls, start);
        // the loop variable takes the start expression's type
        if let Some(id) = decl {
          decls.get_mut(*id).ty = start.ty.clone();
        }
        let end_ok = self.check_expr(decls, end);
        let step_ok = self.check_expr(decls, step);
        let body_ok = self.check_expr(decls, body);
        // a loop is a statement: its own type is double no matter the body
        (Some(Ty::DOUBLE), start_ok && end_ok && step_ok && body_ok)
      }
      ExprKind::Let {
        decl, init, body, ..
      } => {
        let init_ok = self.check_expr(decls, init);
        if let Some(id) = decl {
          decls.get_mut(*id).ty = init.ty.clone();
        }
        let body_ok = self.check_expr(decls, body);
        (body.ty.clone(), init_ok && body_ok)
      }
    };
    expr.ty = ty;
    ok
  }
}

impl Pass for Typechecker {
  fn kind(&self) -> PassKind {
    PassKind::Typechecker
  }

  fn dependencies(&self) -> &'static [PassKind] {
    &[PassKind::NameResolver]
  }

  fn run_item(&mut self, item: &mut Item, decls: &mut DeclTable) -> bool {
    match item {
      Item::Prototype(proto) => self.check_prototype(decls, proto),
      Item::Function(func) => self.check_function(decls, func),
    }
  }
}
