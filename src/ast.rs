use super::ir;
use super::types::Ty;
use lsp_types::Range;
use serde::Serialize;
use strum::AsRefStr;

/// Non-owning index into the compilation unit's declaration arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeclId(u32);

#[derive(Debug, Clone, AsRefStr, Serialize)]
pub enum DeclKind {
  /// A builtin type name; carries the type it denotes.
  Type(Ty),
  Prototype,
  FormalParam,
  ForBinding,
  LetBinding,
  /// Sentinel attached to a variable that failed resolution, so later
  /// passes can skip re-reporting the same error.
  Undeclared,
}

/// A named entity a variable reference can resolve to. The semantic type
/// is attached by the type checker, the backend handle by codegen.
#[derive(Debug, Clone, Serialize)]
pub struct Decl {
  pub name: String,
  pub kind: DeclKind,
  pub ty: Option<Ty>,
  #[serde(skip)]
  pub value: Option<ir::ValueBinding>,
}

impl Decl {
  pub fn new(name: impl Into<String>, kind: DeclKind) -> Self {
    Decl {
      name: name.into(),
      kind,
      ty: None,
      value: None,
    }
  }

  pub fn is_undeclared(&self) -> bool {
    matches!(self.kind, DeclKind::Undeclared)
  }
}

/// Arena of declarations, owned by the compilation unit. Declarations are
/// created during name resolution and never destroyed within a unit.
#[derive(Debug, Default, Serialize)]
pub struct DeclTable {
  decls: Vec<Decl>,
}

impl DeclTable {
  pub fn new() -> Self {
    DeclTable::default()
  }

  pub fn alloc(&mut self, decl: Decl) -> DeclId {
    let id = DeclId(self.decls.len() as u32);
    self.decls.push(decl);
    id
  }

  /// Allocates the `Undeclared` sentinel for a failed lookup.
  pub fn undeclared(&mut self, name: &str) -> DeclId {
    self.alloc(Decl::new(name, DeclKind::Undeclared))
  }

  pub fn get(&self, id: DeclId) -> &Decl {
    &self.decls[id.0 as usize]
  }

  pub fn get_mut(&mut self, id: DeclId) -> &mut Decl {
    &mut self.decls[id.0 as usize]
  }
}

#[derive(Debug, Clone, AsRefStr, Serialize)]
pub enum ExprKind {
  Number(f64),
  Variable {
    name: String,
    /// Resolved by name resolution; `Undeclared` sentinel on failure.
    decl: Option<DeclId>,
  },
  Binary {
    op: String,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Call {
    callee: Box<Expr>,
    args: Vec<Expr>,
  },
  If {
    test: Box<Expr>,
    then: Box<Expr>,
    orelse: Box<Expr>,
  },
  For {
    name: String,
    decl: Option<DeclId>,
    start: Box<Expr>,
    end: Box<Expr>,
    step: Box<Expr>,
    body: Box<Expr>,
  },
  Let {
    name: String,
    decl: Option<DeclId>,
    init: Box<Expr>,
    body: Box<Expr>,
  },
}

#[derive(Debug, Clone, Serialize)]
pub struct Expr {
  pub range: Range,
  /// Inferred by the type checker.
  pub ty: Option<Ty>,
  pub kind: ExprKind,
}

impl Expr {
  pub fn new(range: Range, kind: ExprKind) -> Self {
    Expr {
      range,
      ty: None,
      kind,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct FormalParam {
  pub range: Range,
  pub name: String,
  /// Type annotation, resolved as an ordinary variable reference against
  /// the builtin type declarations. Untyped parameters default to double.
  pub typename: Option<Expr>,
  pub decl: Option<DeclId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Prototype {
  pub range: Range,
  pub name: String,
  pub params: Vec<FormalParam>,
  pub result_typename: Option<Expr>,
  pub decl: Option<DeclId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Function {
  pub range: Range,
  pub proto: Prototype,
  pub body: Expr,
}

/// A top-level AST unit: an `extern` prototype or a `def` function.
#[derive(Debug, Clone, AsRefStr, Serialize)]
pub enum Item {
  Prototype(Prototype),
  Function(Function),
}

impl Item {
  pub fn range(&self) -> Range {
    match self {
      Item::Prototype(proto) => proto.range,
      Item::Function(func) => func.range,
    }
  }
}
