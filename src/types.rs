use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Primitive {
  Double,
  Int,
  Bool,
}

impl Primitive {
  pub fn name(&self) -> &'static str {
    match self {
      Primitive::Double => "double",
      Primitive::Int => "int",
      Primitive::Bool => "bool",
    }
  }
}

/// Semantic types, compared structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Ty {
  Prim(Primitive),
  Function { result: Box<Ty>, params: Vec<Ty> },
}

impl Ty {
  pub const DOUBLE: Ty = Ty::Prim(Primitive::Double);
  pub const INT: Ty = Ty::Prim(Primitive::Int);
  pub const BOOL: Ty = Ty::Prim(Primitive::Bool);

  pub fn function(result: Ty, params: Vec<Ty>) -> Ty {
    Ty::Function {
      result: Box::new(result),
      params,
    }
  }

  pub fn is_bool(&self) -> bool {
    *self == Ty::BOOL
  }
}

impl fmt::Display for Ty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Ty::Prim(prim) => write!(f, "{}", prim.name()),
      Ty::Function { result, params } => {
        write!(f, "(")?;
        for (i, param) in params.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", param)?;
        }
        write!(f, ") -> {}", result)
      }
    }
  }
}
