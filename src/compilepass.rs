use super::ast::{DeclTable, Item};
use derive_more::{Display, Error};
use hashbrown::HashMap;

/// Identity of a concrete pass, used to resolve declared dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum PassKind {
  UserOpRewriter,
  NameResolver,
  Typechecker,
}

/// One analysis or rewrite stage applied uniformly across an AST unit.
///
/// A pass may keep state between items (the name resolver keeps its global
/// scope), so processing reports success per item rather than globally.
pub trait Pass {
  fn kind(&self) -> PassKind;

  /// Kinds that must run earlier within the same manager.
  fn dependencies(&self) -> &'static [PassKind] {
    &[]
  }

  /// Processes one top-level item, returning whether every check passed.
  fn run_item(&mut self, item: &mut Item, decls: &mut DeclTable) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum PassConfigError {
  #[display("pass {pass} depends on missing pass {dependency}")]
  MissingDependency {
    pass: PassKind,
    dependency: PassKind,
  },
  #[display("cyclic pass dependency through {pass}")]
  CyclicDependency { pass: PassKind },
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
  Unvisited,
  Visiting,
  Done,
}

fn visit(
  i: usize,
  passes: &[Box<dyn Pass>],
  by_kind: &HashMap<PassKind, usize>,
  marks: &mut [Mark],
  order: &mut Vec<usize>,
) -> Result<(), PassConfigError> {
  match marks[i] {
    Mark::Done => return Ok(()),
    Mark::Visiting => {
      return Err(PassConfigError::CyclicDependency {
        pass: passes[i].kind(),
      })
    }
    Mark::Unvisited => {}
  }

  marks[i] = Mark::Visiting;
  for dep in passes[i].dependencies() {
    let j = *by_kind
      .get(dep)
      .ok_or(PassConfigError::MissingDependency {
        pass: passes[i].kind(),
        dependency: *dep,
      })?;
    visit(j, passes, by_kind, marks, order)?;
  }
  marks[i] = Mark::Done;
  order.push(i);
  Ok(())
}

/// Depth-first topological order over the passes' declared dependencies.
fn order_topologically(passes: &[Box<dyn Pass>]) -> Result<Vec<usize>, PassConfigError> {
  let mut by_kind = HashMap::new();
  for (i, pass) in passes.iter().enumerate() {
    by_kind.insert(pass.kind(), i);
  }

  let mut marks = vec![Mark::Unvisited; passes.len()];
  let mut order = Vec::with_capacity(passes.len());
  for i in 0..passes.len() {
    visit(i, passes, &by_kind, &mut marks, &mut order)?;
  }
  Ok(order)
}

/// Runs a set of passes over each AST unit in dependency order. The order
/// is computed once at construction and reused for every unit.
pub struct PassManager {
  passes: Vec<Box<dyn Pass>>,
  order: Vec<usize>,
}

impl PassManager {
  pub fn new(passes: Vec<Box<dyn Pass>>) -> Result<Self, PassConfigError> {
    let order = order_topologically(&passes)?;
    Ok(PassManager { passes, order })
  }

  pub fn order(&self) -> Vec<PassKind> {
    self.order.iter().map(|&i| self.passes[i].kind()).collect()
  }

  /// Runs every pass over one item. Failure is per unit: every pass still
  /// runs, and the result is the AND of all of them.
  pub fn run_item(&mut self, item: &mut Item, decls: &mut DeclTable) -> bool {
    let mut ok = true;
    for &i in &self.order {
      ok &= self.passes[i].run_item(item, decls);
    }
    ok
  }
}

impl std::fmt::Debug for PassManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PassManager")
      .field("order", &self.order())
      .finish_non_exhaustive()
  }
}
