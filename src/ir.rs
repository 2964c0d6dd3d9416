use std::fmt;

/// Scalar types carried by values in the emitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrType {
  Double,
  Int { bits: u8 },
}

pub const BOOL: IrType = IrType::Int { bits: 1 };
pub const INT: IrType = IrType::Int { bits: 32 };

impl fmt::Display for IrType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IrType::Double => write!(f, "double"),
      IrType::Int { bits } => write!(f, "i{}", bits),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnType {
  pub result: IrType,
  pub params: Vec<IrType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
  ConstDouble(f64),
  ConstInt { bits: u8, value: i64 },
  /// Result of an instruction in the current function.
  Inst(InstId),
  /// One of the current function's formal parameters.
  Param(usize),
  Func(FuncId),
}

impl Value {
  /// The zero constant of a scalar type, used for loop-exit tests.
  pub fn zero(ty: IrType) -> Value {
    match ty {
      IrType::Double => Value::ConstDouble(0.0),
      IrType::Int { bits } => Value::ConstInt { bits, value: 0 },
    }
  }
}

/// How a declaration's backend value is accessed: through a mutable
/// memory slot, or directly (functions and other immutable values).
#[derive(Debug, Clone, Copy)]
pub enum ValueBinding {
  Slot(Value),
  Direct(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
  FAdd,
  FSub,
  FMul,
  FCmpULT,
  FCmpONE,
  Add,
  Sub,
  Mul,
  ICmpSLT,
  ICmpNE,
}

impl BinOp {
  fn mnemonic(&self) -> &'static str {
    match self {
      BinOp::FAdd => "fadd",
      BinOp::FSub => "fsub",
      BinOp::FMul => "fmul",
      BinOp::FCmpULT => "fcmp ult",
      BinOp::FCmpONE => "fcmp one",
      BinOp::Add => "add",
      BinOp::Sub => "sub",
      BinOp::Mul => "mul",
      BinOp::ICmpSLT => "icmp slt",
      BinOp::ICmpNE => "icmp ne",
    }
  }

  fn is_comparison(&self) -> bool {
    matches!(
      self,
      BinOp::FCmpULT | BinOp::FCmpONE | BinOp::ICmpSLT | BinOp::ICmpNE
    )
  }
}

#[derive(Debug, Clone)]
pub enum InstKind {
  /// A memory slot in the entry block backing a mutable binding.
  Alloca { ty: IrType },
  Load { ty: IrType, slot: Value },
  Store { slot: Value, value: Value },
  Binary { op: BinOp, lhs: Value, rhs: Value },
  Call {
    ty: IrType,
    callee: Value,
    args: Vec<Value>,
  },
  /// Joins one value per predecessor edge.
  Phi {
    ty: IrType,
    incoming: Vec<(Value, BlockId)>,
  },
  Br { dest: BlockId },
  CondBr {
    cond: Value,
    then_dest: BlockId,
    else_dest: BlockId,
  },
  Ret { value: Value },
}

impl InstKind {
  pub fn is_terminator(&self) -> bool {
    matches!(
      self,
      InstKind::Br { .. } | InstKind::CondBr { .. } | InstKind::Ret { .. }
    )
  }
}

#[derive(Debug, Clone)]
pub struct Inst {
  /// Base of the printed value name; the instruction id makes it unique.
  pub name: String,
  pub kind: InstKind,
}

#[derive(Debug, Clone)]
pub struct Block {
  pub label: String,
  pub insts: Vec<InstId>,
}

#[derive(Debug, Clone)]
pub struct Function {
  pub name: String,
  pub ty: FnType,
  pub param_names: Vec<String>,
  insts: Vec<Inst>,
  pub blocks: Vec<Block>,
}

impl Function {
  pub fn new(name: impl Into<String>, ty: FnType, param_names: Vec<String>) -> Self {
    Function {
      name: name.into(),
      ty,
      param_names,
      insts: vec![],
      blocks: vec![],
    }
  }

  /// A function with no blocks is an external declaration.
  pub fn is_declaration(&self) -> bool {
    self.blocks.is_empty()
  }

  pub fn append_block(&mut self, label: &str) -> BlockId {
    let id = BlockId(self.blocks.len());
    self.blocks.push(Block {
      label: format!("{}{}", label, id.0),
      insts: vec![],
    });
    id
  }

  pub fn inst(&self, id: InstId) -> &Inst {
    &self.insts[id.0]
  }

  fn push_inst(&mut self, block: BlockId, name: &str, kind: InstKind) -> InstId {
    let id = InstId(self.insts.len());
    self.insts.push(Inst {
      name: name.to_owned(),
      kind,
    });
    self.blocks[block.0].insts.push(id);
    id
  }

  /// Allocates a memory slot in the entry block, in front of its
  /// terminator so the entry keeps the allocas-then-branch shape.
  fn push_entry_alloca(&mut self, ty: IrType, name: &str) -> InstId {
    let id = InstId(self.insts.len());
    self.insts.push(Inst {
      name: name.to_owned(),
      kind: InstKind::Alloca { ty },
    });
    let entry = &mut self.blocks[0];
    let at = entry
      .insts
      .iter()
      .position(|&i| self.insts[i.0].kind.is_terminator())
      .unwrap_or(entry.insts.len());
    entry.insts.insert(at, id);
    id
  }

  pub fn add_incoming(&mut self, phi: InstId, value: Value, block: BlockId) {
    if let InstKind::Phi { incoming, .. } = &mut self.insts[phi.0].kind {
      incoming.push((value, block));
    }
  }

  /// Discards every emitted block, leaving only the declaration.
  pub fn discard_body(&mut self) {
    self.blocks.clear();
    self.insts.clear();
  }

  fn value_ty(&self, value: &Value) -> IrType {
    match value {
      Value::ConstDouble(_) => IrType::Double,
      Value::ConstInt { bits, .. } => IrType::Int { bits: *bits },
      Value::Param(i) => self.ty.params[*i],
      Value::Inst(id) => match &self.insts[id.0].kind {
        InstKind::Alloca { ty } => *ty,
        InstKind::Load { ty, .. } => *ty,
        InstKind::Call { ty, .. } => *ty,
        InstKind::Phi { ty, .. } => *ty,
        InstKind::Binary { op, lhs, .. } => {
          if op.is_comparison() {
            BOOL
          } else {
            self.value_ty(lhs)
          }
        }
        _ => unreachable!("terminators and stores produce no value"),
      },
      Value::Func(_) => unreachable!("function values have no scalar type"),
    }
  }

  fn value_name(&self, module: &Module, value: &Value) -> String {
    match value {
      Value::ConstDouble(v) => format!("{:?}", v),
      Value::ConstInt { value, .. } => format!("{}", value),
      Value::Param(i) => format!("%{}", self.param_names[*i]),
      Value::Inst(id) => format!("%{}{}", self.insts[id.0].name, id.0),
      Value::Func(id) => format!("@{}", module.func(*id).name),
    }
  }

  fn operand(&self, module: &Module, value: &Value) -> String {
    format!("{} {}", self.value_ty(value), self.value_name(module, value))
  }

  fn write_signature(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} @{}(", self.ty.result, self.name)?;
    for (i, ty) in self.ty.params.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{} %{}", ty, self.param_names[i])?;
    }
    write!(f, ")")
  }

  fn write_inst(&self, f: &mut fmt::Formatter<'_>, module: &Module, id: InstId) -> fmt::Result {
    let inst = &self.insts[id.0];
    let result = self.value_name(module, &Value::Inst(id));
    match &inst.kind {
      InstKind::Alloca { ty } => write!(f, "  {} = alloca {}", result, ty),
      InstKind::Load { ty, slot } => write!(
        f,
        "  {} = load {}, {}* {}",
        result,
        ty,
        self.value_ty(slot),
        self.value_name(module, slot)
      ),
      InstKind::Store { slot, value } => write!(
        f,
        "  store {}, {}* {}",
        self.operand(module, value),
        self.value_ty(slot),
        self.value_name(module, slot)
      ),
      InstKind::Binary { op, lhs, rhs } => write!(
        f,
        "  {} = {} {}, {}",
        result,
        op.mnemonic(),
        self.operand(module, lhs),
        self.value_name(module, rhs)
      ),
      InstKind::Call { ty, callee, args } => {
        write!(
          f,
          "  {} = call {} {}(",
          result,
          ty,
          self.value_name(module, callee)
        )?;
        for (i, arg) in args.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", self.operand(module, arg))?;
        }
        write!(f, ")")
      }
      InstKind::Phi { ty, incoming } => {
        write!(f, "  {} = phi {} ", result, ty)?;
        for (i, (value, block)) in incoming.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(
            f,
            "[ {}, %{} ]",
            self.value_name(module, value),
            self.blocks[block.0].label
          )?;
        }
        Ok(())
      }
      InstKind::Br { dest } => write!(f, "  br label %{}", self.blocks[dest.0].label),
      InstKind::CondBr {
        cond,
        then_dest,
        else_dest,
      } => write!(
        f,
        "  br {}, label %{}, label %{}",
        self.operand(module, cond),
        self.blocks[then_dest.0].label,
        self.blocks[else_dest.0].label
      ),
      InstKind::Ret { value } => write!(f, "  ret {}", self.operand(module, value)),
    }
  }
}

/// The emitted compilation unit: an ordered list of declared and defined
/// functions, printable in an LLVM-flavoured text form for the consuming
/// JIT or linker.
#[derive(Debug, Clone)]
pub struct Module {
  pub name: String,
  funcs: Vec<Function>,
}

impl Module {
  pub fn new(name: impl Into<String>) -> Self {
    Module {
      name: name.into(),
      funcs: vec![],
    }
  }

  pub fn declare_function(&mut self, func: Function) -> FuncId {
    let id = FuncId(self.funcs.len());
    self.funcs.push(func);
    id
  }

  pub fn get_function(&self, name: &str) -> Option<FuncId> {
    self.funcs.iter().position(|f| f.name == name).map(FuncId)
  }

  pub fn func(&self, id: FuncId) -> &Function {
    &self.funcs[id.0]
  }

  pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
    &mut self.funcs[id.0]
  }

  pub fn funcs(&self) -> &[Function] {
    &self.funcs
  }
}

impl fmt::Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "; ModuleID = '{}'", self.name)?;
    for func in &self.funcs {
      writeln!(f)?;
      if func.is_declaration() {
        write!(f, "declare ")?;
        func.write_signature(f)?;
        writeln!(f)?;
      } else {
        write!(f, "define ")?;
        func.write_signature(f)?;
        writeln!(f, " {{")?;
        for block in &func.blocks {
          writeln!(f, "{}:", block.label)?;
          for &inst in &block.insts {
            func.write_inst(f, self, inst)?;
            writeln!(f)?;
          }
        }
        writeln!(f, "}}")?;
      }
    }
    Ok(())
  }
}

/// Positional instruction builder over one function, in the style of the
/// usual SSA builder APIs: append blocks, position at a block's end, and
/// emit instructions at the current position.
pub struct Builder<'f> {
  func: &'f mut Function,
  block: BlockId,
}

impl<'f> Builder<'f> {
  pub fn new(func: &'f mut Function) -> Self {
    Builder {
      func,
      block: BlockId(0),
    }
  }

  pub fn append_block(&mut self, label: &str) -> BlockId {
    self.func.append_block(label)
  }

  pub fn position_at_end(&mut self, block: BlockId) {
    self.block = block;
  }

  /// The block currently being appended to. Lowering a subexpression may
  /// move it, so control-flow constructs re-read it for phi edges.
  pub fn block(&self) -> BlockId {
    self.block
  }

  pub fn alloca_in_entry(&mut self, ty: IrType, name: &str) -> Value {
    Value::Inst(self.func.push_entry_alloca(ty, name))
  }

  pub fn load(&mut self, ty: IrType, slot: Value, name: &str) -> Value {
    Value::Inst(
      self
        .func
        .push_inst(self.block, name, InstKind::Load { ty, slot }),
    )
  }

  pub fn store(&mut self, slot: Value, value: Value) {
    self
      .func
      .push_inst(self.block, "", InstKind::Store { slot, value });
  }

  pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value, name: &str) -> Value {
    Value::Inst(
      self
        .func
        .push_inst(self.block, name, InstKind::Binary { op, lhs, rhs }),
    )
  }

  pub fn call(&mut self, ty: IrType, callee: Value, args: Vec<Value>, name: &str) -> Value {
    Value::Inst(
      self
        .func
        .push_inst(self.block, name, InstKind::Call { ty, callee, args }),
    )
  }

  pub fn phi(&mut self, ty: IrType, name: &str) -> InstId {
    self.func.push_inst(
      self.block,
      name,
      InstKind::Phi {
        ty,
        incoming: vec![],
      },
    )
  }

  pub fn add_incoming(&mut self, phi: InstId, value: Value, block: BlockId) {
    self.func.add_incoming(phi, value, block);
  }

  pub fn br(&mut self, dest: BlockId) {
    self.func.push_inst(self.block, "", InstKind::Br { dest });
  }

  pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) {
    self.func.push_inst(
      self.block,
      "",
      InstKind::CondBr {
        cond,
        then_dest,
        else_dest,
      },
    );
  }

  pub fn ret(&mut self, value: Value) {
    self.func.push_inst(self.block, "", InstKind::Ret { value });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn double_fn(name: &str, params: &[&str]) -> Function {
    Function::new(
      name,
      FnType {
        result: IrType::Double,
        params: vec![IrType::Double; params.len()],
      },
      params.iter().map(|s| s.to_string()).collect(),
    )
  }

  #[test]
  fn declarations_print_without_a_body() {
    let mut module = Module::new("m");
    module.declare_function(double_fn("sin", &["x"]));
    let printed = module.to_string();
    assert!(printed.contains("declare double @sin(double %x)"));
    assert!(!printed.contains("define"));
  }

  #[test]
  fn simple_function_body() {
    let mut module = Module::new("m");
    let id = module.declare_function(double_fn("addone", &["x"]));
    let func = module.func_mut(id);
    let mut b = Builder::new(func);
    let entry = b.append_block("entry");
    b.position_at_end(entry);
    let sum = b.binary(
      BinOp::FAdd,
      Value::Param(0),
      Value::ConstDouble(1.0),
      "addtmp",
    );
    b.ret(sum);

    let printed = module.to_string();
    assert!(printed.contains("define double @addone(double %x) {"));
    assert!(printed.contains("%addtmp0 = fadd double %x, 1.0"));
    assert!(printed.contains("ret double %addtmp0"));
  }

  #[test]
  fn entry_allocas_insert_before_the_terminator() {
    let mut module = Module::new("m");
    let id = module.declare_function(double_fn("f", &["x"]));
    let func = module.func_mut(id);
    let mut b = Builder::new(func);
    let entry = b.append_block("entry");
    let body = b.append_block("body");
    b.position_at_end(entry);
    b.br(body);
    b.position_at_end(body);
    // requested after the branch already terminates the entry block
    let slot = b.alloca_in_entry(IrType::Double, "x");
    b.store(slot, Value::Param(0));
    let loaded = b.load(IrType::Double, slot, "x");
    b.ret(loaded);

    let entry_insts = &module.func(id).blocks[0].insts;
    assert!(matches!(
      module.func(id).inst(entry_insts[0]).kind,
      InstKind::Alloca { .. }
    ));
    assert!(module.func(id).inst(entry_insts[1]).kind.is_terminator());

    let printed = module.to_string();
    assert!(printed.contains("alloca double"));
    assert!(printed.contains("load double, double*"));
  }

  #[test]
  fn phi_nodes_render_incoming_edges() {
    let mut module = Module::new("m");
    let id = module.declare_function(double_fn("pick", &[]));
    let func = module.func_mut(id);
    let mut b = Builder::new(func);
    let entry = b.append_block("entry");
    let then_bb = b.append_block("then");
    let else_bb = b.append_block("else");
    let merge = b.append_block("endif");
    b.position_at_end(entry);
    b.cond_br(Value::ConstInt { bits: 1, value: 1 }, then_bb, else_bb);
    b.position_at_end(then_bb);
    b.br(merge);
    b.position_at_end(else_bb);
    b.br(merge);
    b.position_at_end(merge);
    let phi = b.phi(IrType::Double, "iftmp");
    b.add_incoming(phi, Value::ConstDouble(1.0), then_bb);
    b.add_incoming(phi, Value::ConstDouble(2.0), else_bb);
    b.ret(Value::Inst(phi));

    let printed = module.to_string();
    assert!(printed.contains("phi double [ 1.0, %then1 ], [ 2.0, %else2 ]"));
    assert!(printed.contains("br i1 1, label %then1, label %else2"));
  }

  #[test]
  fn comparisons_are_boolean_values() {
    let mut module = Module::new("m");
    let id = module.declare_function(double_fn("cmp", &["a", "b"]));
    let func = module.func_mut(id);
    let mut b = Builder::new(func);
    let entry = b.append_block("entry");
    b.position_at_end(entry);
    let lt = b.binary(BinOp::FCmpULT, Value::Param(0), Value::Param(1), "cmptmp");
    assert_eq!(module.func(id).value_ty(&lt), BOOL);
  }

  #[test]
  fn discard_body_leaves_a_declaration() {
    let mut module = Module::new("m");
    let id = module.declare_function(double_fn("f", &[]));
    let func = module.func_mut(id);
    let mut b = Builder::new(func);
    let entry = b.append_block("entry");
    b.position_at_end(entry);
    b.ret(Value::ConstDouble(0.0));
    module.func_mut(id).discard_body();
    assert!(module.func(id).is_declaration());
    assert!(module.to_string().contains("declare double @f()"));
  }
}
