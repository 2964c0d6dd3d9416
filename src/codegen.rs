use super::ast::{self, DeclTable, Expr, ExprKind, Item, Prototype};
use super::dlogger::DiagnosticLogger;
use super::ir::{self, BinOp, ValueBinding};
use super::types::{Primitive, Ty};

fn scalar_ir_type(ty: &Ty) -> Option<ir::IrType> {
  match ty {
    Ty::Prim(Primitive::Double) => Some(ir::IrType::Double),
    Ty::Prim(Primitive::Int) => Some(ir::INT),
    Ty::Prim(Primitive::Bool) => Some(ir::BOOL),
    Ty::Function { .. } => None,
  }
}

fn fn_ir_type(ty: &Ty) -> Option<ir::FnType> {
  let Ty::Function { result, params } = ty else {
    return None;
  };
  Some(ir::FnType {
    result: scalar_ir_type(result)?,
    params: params
      .iter()
      .map(scalar_ir_type)
      .collect::<Option<Vec<_>>>()?,
  })
}

/// Post-order lowering of a resolved, checked unit into SSA form. Mutable
/// bindings live in entry-block memory slots; `if` joins its branches with
/// a phi; failure discards only the function being lowered.
pub struct Codegen {
  dlogger: DiagnosticLogger,
  module: ir::Module,
}

impl Codegen {
  pub fn new(module_name: &str, dlogger: DiagnosticLogger) -> Self {
    Codegen {
      dlogger,
      module: ir::Module::new(module_name),
    }
  }

  pub fn finish(self) -> ir::Module {
    self.module
  }

  pub fn module(&self) -> &ir::Module {
    &self.module
  }

  pub fn item(&mut self, item: &Item, decls: &mut DeclTable) -> bool {
    match item {
      Item::Prototype(proto) => self.prototype(proto, decls).is_some(),
      Item::Function(func) => self.function(func, decls),
    }
  }

  /// Lowers a prototype to an external function declaration, reusing an
  /// already-emitted function of the same name if present.
  fn prototype(&mut self, proto: &Prototype, decls: &mut DeclTable) -> Option<ir::FuncId> {
    let Some(decl_id) = proto.decl else {
      self
        .dlogger
        .log_undeclared_symbol(proto.range, &proto.name);
      return None;
    };

    if let Some(fid) = self.module.get_function(&proto.name) {
      decls.get_mut(decl_id).value = Some(ValueBinding::Direct(ir::Value::Func(fid)));
      return Some(fid);
    }

    let Some(fnty) = decls.get(decl_id).ty.as_ref().and_then(fn_ir_type) else {
      self
        .dlogger
        .log_undeclared_symbol(proto.range, &proto.name);
      return None;
    };

    let param_names = proto.params.iter().map(|p| p.name.clone()).collect();
    let fid = self
      .module
      .declare_function(ir::Function::new(&proto.name, fnty, param_names));
    decls.get_mut(decl_id).value = Some(ValueBinding::Direct(ir::Value::Func(fid)));
    Some(fid)
  }

  fn function(&mut self, func: &ast::Function, decls: &mut DeclTable) -> bool {
    let Some(fid) = self.prototype(&func.proto, decls) else {
      return false;
    };
    if !self.module.func(fid).is_declaration() {
      self
        .dlogger
        .log_duplicate_definition(func.proto.range, &func.proto.name);
      return false;
    }

    let irfunc = self.module.func_mut(fid);
    let mut b = ir::Builder::new(irfunc);
    // the entry block holds only allocas and the branch into the body
    let entry = b.append_block("entry");
    let body_bb = b.append_block("body");
    b.position_at_end(entry);
    b.br(body_bb);
    b.position_at_end(body_bb);

    // parameters are spilled to slots so assignment can mutate them
    let mut params_ok = true;
    for (i, param) in func.proto.params.iter().enumerate() {
      let ty = param
        .decl
        .and_then(|id| decls.get(id).ty.clone())
        .as_ref()
        .and_then(scalar_ir_type);
      match (param.decl, ty) {
        (Some(id), Some(ty)) => {
          let slot = b.alloca_in_entry(ty, &param.name);
          b.store(slot, ir::Value::Param(i));
          decls.get_mut(id).value = Some(ValueBinding::Slot(slot));
        }
        _ => {
          self.dlogger.log_unbound_variable(param.range, &param.name);
          params_ok = false;
        }
      }
    }

    let result = if params_ok {
      lower_expr(&mut self.dlogger, decls, &mut b, &func.body)
    } else {
      None
    };

    match result {
      Some(value) => {
        b.ret(value);
        true
      }
      None => {
        // discard everything emitted for this function, keeping the
        // declaration so other functions still link against it
        self.module.func_mut(fid).discard_body();
        false
      }
    }
  }
}

fn lower_expr(
  dlogger: &mut DiagnosticLogger,
  decls: &mut DeclTable,
  b: &mut ir::Builder,
  expr: &Expr,
) -> Option<ir::Value> {
  match &expr.kind {
    ExprKind::Number(value) => Some(ir::Value::ConstDouble(*value)),

    ExprKind::Variable { name, decl } => match decl.and_then(|id| decls.get(id).value) {
      Some(ValueBinding::Slot(slot)) => {
        let ty = decl
          .and_then(|id| decls.get(id).ty.clone())
          .as_ref()
          .and_then(scalar_ir_type)
          .unwrap_or(ir::IrType::Double);
        Some(b.load(ty, slot, name))
      }
      Some(ValueBinding::Direct(value)) => Some(value),
      None => {
        dlogger.log_unbound_variable(expr.range, name);
        None
      }
    },

    ExprKind::Binary { op, lhs, rhs } if op == "=" => {
      let ExprKind::Variable { decl, .. } = &lhs.kind else {
        dlogger.log_invalid_assignment_target(lhs.range);
        return None;
      };
      let value = lower_expr(dlogger, decls, b, rhs)?;
      match decl.and_then(|id| decls.get(id).value) {
        Some(ValueBinding::Slot(slot)) => {
          b.store(slot, value);
          Some(value)
        }
        _ => {
          dlogger.log_invalid_assignment_target(lhs.range);
          None
        }
      }
    }

    ExprKind::Binary { op, lhs, rhs } => {
      let lhs_v = lower_expr(dlogger, decls, b, lhs)?;
      let rhs_v = lower_expr(dlogger, decls, b, rhs)?;
      let fp = !matches!(
        lhs.ty,
        Some(Ty::Prim(Primitive::Int)) | Some(Ty::Prim(Primitive::Bool))
      );
      let (binop, name) = match (op.as_str(), fp) {
        ("+", true) => (BinOp::FAdd, "addtmp"),
        ("+", false) => (BinOp::Add, "addtmp"),
        ("-", true) => (BinOp::FSub, "subtmp"),
        ("-", false) => (BinOp::Sub, "subtmp"),
        ("*", true) => (BinOp::FMul, "multmp"),
        ("*", false) => (BinOp::Mul, "multmp"),
        ("<", true) => (BinOp::FCmpULT, "cmptmp"),
        ("<", false) => (BinOp::ICmpSLT, "cmptmp"),
        _ => {
          dlogger.log_invalid_operator(expr.range, op);
          return None;
        }
      };
      Some(b.binary(binop, lhs_v, rhs_v, name))
    }

    ExprKind::Call { callee, args } => {
      let callee_v = lower_expr(dlogger, decls, b, callee)?;
      let mut arg_vals = Vec::with_capacity(args.len());
      for arg in args {
        arg_vals.push(lower_expr(dlogger, decls, b, arg)?);
      }
      let ty = expr
        .ty
        .as_ref()
        .and_then(scalar_ir_type)
        .unwrap_or(ir::IrType::Double);
      Some(b.call(ty, callee_v, arg_vals, "calltmp"))
    }

    ExprKind::If { test, then, orelse } => {
      let test_v = lower_expr(dlogger, decls, b, test)?;
      let then_bb = b.append_block("then");
      let else_bb = b.append_block("else");
      let merge_bb = b.append_block("endif");
      b.cond_br(test_v, then_bb, else_bb);

      b.position_at_end(then_bb);
      let then_v = lower_expr(dlogger, decls, b, then)?;
      b.br(merge_bb);
      // lowering the branch may have ended in a different block
      let then_end = b.block();

      b.position_at_end(else_bb);
      let else_v = lower_expr(dlogger, decls, b, orelse)?;
      b.br(merge_bb);
      let else_end = b.block();

      b.position_at_end(merge_bb);
      let phi_ty = then
        .ty
        .as_ref()
        .and_then(scalar_ir_type)
        .unwrap_or(ir::IrType::Double);
      let phi = b.phi(phi_ty, "iftmp");
      b.add_incoming(phi, then_v, then_end);
      b.add_incoming(phi, else_v, else_end);
      Some(ir::Value::Inst(phi))
    }

    ExprKind::For {
      name,
      decl,
      start,
      end,
      step,
      body,
    } => {
      let start_v = lower_expr(dlogger, decls, b, start)?;
      let Some(id) = *decl else {
        dlogger.log_unbound_variable(expr.range, name);
        return None;
      };
      let var_ty = decls
        .get(id)
        .ty
        .clone()
        .as_ref()
        .and_then(scalar_ir_type)
        .unwrap_or(ir::IrType::Double);
      let slot = b.alloca_in_entry(var_ty, name);
      b.store(slot, start_v);
      decls.get_mut(id).value = Some(ValueBinding::Slot(slot));

      let loop_bb = b.append_block("loop");
      let body_bb = b.append_block("forbody");
      let exit_bb = b.append_block("endfor");
      b.br(loop_bb);

      // the exit test compares the end expression against zero on every
      // iteration before the body runs
      b.position_at_end(loop_bb);
      let end_v = lower_expr(dlogger, decls, b, end)?;
      let end_ty = end
        .ty
        .as_ref()
        .and_then(scalar_ir_type)
        .unwrap_or(ir::IrType::Double);
      let cmp = if end_ty == ir::IrType::Double {
        BinOp::FCmpONE
      } else {
        BinOp::ICmpNE
      };
      let cond = b.binary(cmp, end_v, ir::Value::zero(end_ty), "loopcond");
      b.cond_br(cond, body_bb, exit_bb);

      b.position_at_end(body_bb);
      lower_expr(dlogger, decls, b, body)?;
      let cur = b.load(var_ty, slot, name);
      let step_v = lower_expr(dlogger, decls, b, step)?;
      let add = if var_ty == ir::IrType::Double {
        BinOp::FAdd
      } else {
        BinOp::Add
      };
      let next = b.binary(add, cur, step_v, "nextvar");
      b.store(slot, next);
      b.br(loop_bb);

      b.position_at_end(exit_bb);
      // the loop expression itself always yields zero
      Some(ir::Value::ConstDouble(0.0))
    }

    ExprKind::Let {
      name,
      decl,
      init,
      body,
    } => {
      let init_v = lower_expr(dlogger, decls, b, init)?;
      let Some(id) = *decl else {
        dlogger.log_unbound_variable(expr.range, name);
        return None;
      };
      let ty = decls
        .get(id)
        .ty
        .clone()
        .as_ref()
        .and_then(scalar_ir_type)
        .unwrap_or(ir::IrType::Double);
      let slot = b.alloca_in_entry(ty, name);
      b.store(slot, init_v);
      decls.get_mut(id).value = Some(ValueBinding::Slot(slot));
      lower_expr(dlogger, decls, b, body)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::astbuilder::Parser;
  use crate::compilepass::Pass;
  use crate::dlogger::{codes, DiagnosticLog};
  use crate::nameres::NameResolver;
  use crate::source::SourceFile;
  use crate::tokenize::Grammar;
  use crate::typecheck::Typechecker;
  use crate::user_op_rewriter::UserOpRewriter;
  use lsp_types::NumberOrString;

  fn lower(source: &str) -> (ir::Module, Vec<lsp_types::Diagnostic>, bool) {
    let file = SourceFile::new(source, None);
    let mut items: Vec<Item> = Parser::new(Grammar::default().tokenize(&file))
      .collect::<Result<_, _>>()
      .unwrap();
    let mut decls = DeclTable::new();
    let mut log = DiagnosticLog::new();
    let mut rewriter = UserOpRewriter::new();
    let mut resolver = NameResolver::new(log.get_logger(None));
    let mut checker = Typechecker::new(log.get_logger(None));
    let mut ok = true;
    for item in &mut items {
      ok &= rewriter.run_item(item, &mut decls);
      ok &= resolver.run_item(item, &mut decls);
      ok &= checker.run_item(item, &mut decls);
    }
    assert!(ok, "passes failed: {:?}", log.drain());

    let mut cg = Codegen::new("test", log.get_logger(None));
    let mut cg_ok = true;
    for item in &items {
      cg_ok &= cg.item(item, &mut decls);
    }
    (cg.finish(), log.drain(), cg_ok)
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
  fn prototype_lowers_to_external_declaration() {
    let (module, diags, ok) = lower("extern foo(bar:int) -> double");
    assert!(ok, "{:?}", diags);
    let fid = module.get_function("foo").unwrap();
    let func = module.func(fid);
    assert!(func.is_declaration());
    assert_eq!(func.param_names, vec!["bar"]);
    assert_eq!(func.ty.params, vec![ir::INT]);
    assert_eq!(func.ty.result, ir::IrType::Double);
    assert!(module.to_string().contains("declare double @foo(i32 %bar)"));
  }

  #[test]
  fn recursive_function_compiles() {
    let (module, diags, ok) = lower("def foo(bar:int) -> int foo(bar)");
    assert!(ok, "{:?}", diags);
    let printed = module.to_string();
    assert!(printed.contains("define i32 @foo(i32 %bar) {"));
    assert!(printed.contains("call i32 @foo"));
  }

  #[test]
  fn parameters_are_spilled_to_entry_slots() {
    let (module, _, ok) = lower("def id(x) x");
    assert!(ok);
    let printed = module.to_string();
    assert!(printed.contains("alloca double"));
    assert!(printed.contains("store double %x"));
    assert!(printed.contains("load double"));
  }

  #[test]
  fn if_joins_branches_with_a_phi() {
    let (module, diags, ok) = lower("def pick(x) if x < 0.0 then 1 else 2");
    assert!(ok, "{:?}", diags);
    let printed = module.to_string();
    assert!(printed.contains("fcmp ult double"));
    assert!(printed.contains("phi double"));
  }

  #[test]
  fn for_loop_tests_before_the_body_and_advances_the_slot() {
    let (module, diags, ok) = lower(
      "extern put(v)\n\
       def count(n) for i = 0, i < n in put(i)",
    );
    assert!(ok, "{:?}", diags);
    let printed = module.to_string();
    // exit test compares the end expression against zero
    assert!(printed.contains("icmp ne i1"));
    assert!(printed.contains("br i1 %loopcond"));
    // the loop variable is advanced through its slot
    assert!(printed.contains("%nextvar"));
    assert!(printed.contains("ret double 0.0"));
  }

  #[test]
  fn let_stores_the_initializer_in_a_slot() {
    let (module, diags, ok) = lower("def f() let x = 41 in x + 1");
    assert!(ok, "{:?}", diags);
    let printed = module.to_string();
    assert!(printed.contains("store double 41.0"));
    assert!(printed.contains("fadd double"));
  }

  #[test]
  fn assignment_stores_through_the_variable_slot() {
    let (module, diags, ok) = lower("def f(x) x = x + 1");
    assert!(ok, "{:?}", diags);
    let printed = module.to_string();
    assert!(printed.contains("fadd double"));
    // one store for the parameter spill, one for the assignment
    assert_eq!(printed.matches("store double").count(), 2);
  }

  #[test]
  fn assignment_to_a_non_variable_fails_the_function() {
    let file = SourceFile::new("def f(x) (x + 1) = 2", None);
    let mut items: Vec<Item> = Parser::new(Grammar::default().tokenize(&file))
      .collect::<Result<_, _>>()
      .unwrap();
    let mut decls = DeclTable::new();
    let mut log = DiagnosticLog::new();
    let mut resolver = NameResolver::new(log.get_logger(None));
    for item in &mut items {
      resolver.run_item(item, &mut decls);
      Typechecker::new(log.get_logger(None)).run_item(item, &mut decls);
    }
    log.drain();

    let mut cg = Codegen::new("test", log.get_logger(None));
    let ok = cg.item(&items[0], &mut decls);
    assert!(!ok);
    assert_eq!(diag_codes(&log.drain()), vec![codes::INVALID_ASSIGNMENT_TARGET]);
    // the failed function keeps only its declaration
    let module = cg.finish();
    assert!(module.func(module.get_function("f").unwrap()).is_declaration());
  }

  #[test]
  fn duplicate_definition_is_a_codegen_error() {
    // run resolution per item with separate resolvers so both bodies reach
    // codegen against one module
    let file = SourceFile::new("def f() 1 def f() 2", None);
    let items: Vec<Item> = Parser::new(Grammar::default().tokenize(&file))
      .collect::<Result<Vec<_>, _>>()
      .unwrap();
    let mut log = DiagnosticLog::new();
    let mut cg = Codegen::new("test", log.get_logger(None));

    let mut results = vec![];
    for item in items {
      let mut item = item;
      let mut decls = DeclTable::new();
      let mut resolver = NameResolver::new(log.get_logger(None));
      let mut checker = Typechecker::new(log.get_logger(None));
      assert!(resolver.run_item(&mut item, &mut decls));
      assert!(checker.run_item(&mut item, &mut decls));
      results.push(cg.item(&item, &mut decls));
    }

    assert_eq!(results, vec![true, false]);
    assert_eq!(diag_codes(&log.drain()), vec![codes::DUPLICATE_DEFINITION]);
  }

  #[test]
  fn earlier_functions_survive_a_later_failure() {
    let file = SourceFile::new("def good() 1 def bad(x) (1) = 2", None);
    let mut items: Vec<Item> = Parser::new(Grammar::default().tokenize(&file))
      .collect::<Result<_, _>>()
      .unwrap();
    let mut decls = DeclTable::new();
    let mut log = DiagnosticLog::new();
    let mut resolver = NameResolver::new(log.get_logger(None));
    let mut checker = Typechecker::new(log.get_logger(None));
    for item in &mut items {
      resolver.run_item(item, &mut decls);
      checker.run_item(item, &mut decls);
    }
    log.drain();

    let mut cg = Codegen::new("test", log.get_logger(None));
    let mut results = vec![];
    for item in &items {
      results.push(cg.item(item, &mut decls));
    }
    assert_eq!(results, vec![true, false]);

    let module = cg.finish();
    assert!(!module.func(module.get_function("good").unwrap()).is_declaration());
    assert!(module.func(module.get_function("bad").unwrap()).is_declaration());
  }
}
