//! Intermediate representation of a compiled component program.
//!
//! The parser lowers candidate source into this tree; the sandbox evaluates it.
//! Function bodies are reference counted so closures can share them cheaply.

use std::rc::Rc;

/// A whole compiled module. Imports are gone; the export is a plain expression.
#[derive(Debug, Clone, Default)]
pub struct Program {
  pub body: Vec<Stmt>,
  /// `export default <expr>` (a declaration export becomes an identifier).
  pub default_export: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
  Let { bindings: Vec<Binding>, mutable: bool },
  Function(Rc<FunctionDef>),
  Return(Option<Expr>),
  If { test: Expr, consequent: Vec<Stmt>, alternate: Option<Vec<Stmt>> },
  Block(Vec<Stmt>),
  Expr(Expr),
  /// `for (init; test; update)`; `let` bindings in `init` are per-iteration.
  For { init: Option<Box<Stmt>>, test: Option<Expr>, update: Option<Expr>, body: Vec<Stmt> },
  ForOf { target: Pattern, mutable: bool, iterable: Expr, body: Vec<Stmt> },
  /// `while` or, with `test_first == false`, `do ... while`.
  While { test: Expr, body: Vec<Stmt>, test_first: bool },
  Switch { discriminant: Expr, cases: Vec<SwitchCase> },
  Break,
  Continue,
}

/// `case test:` or, when `test` is `None`, `default:`.
#[derive(Debug, Clone)]
pub struct SwitchCase {
  pub test: Option<Expr>,
  pub body: Vec<Stmt>,
}

/// Destructuring target with an optional default (`x = 1`, `[a, b]`, `{ a, b: c }`).
#[derive(Debug, Clone)]
pub struct Binding {
  pub target: Pattern,
  pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub enum Pattern {
  Ident(String),
  Array(Vec<Option<Binding>>),
  Object(Vec<(String, Binding)>),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
  pub name: Option<String>,
  pub params: Vec<Binding>,
  pub body: FunctionBody,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
  Expr(Expr),
  Block(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
  Str(String),
  Expr(Expr),
}

#[derive(Debug, Clone)]
pub enum ArrayItem {
  Item(Expr),
  Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum PropDef {
  KeyValue(String, Expr),
  Spread(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Not,
  Neg,
  Plus,
  TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Pow,
  StrictEq,
  StrictNe,
  LooseEq,
  LooseNe,
  Lt,
  Gt,
  Le,
  Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
  And,
  Or,
  Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
  Set,
  Add,
  Sub,
  Mul,
  Div,
}

#[derive(Debug, Clone)]
pub enum Expr {
  Num(f64),
  Str(String),
  Template(Vec<TemplatePart>),
  Bool(bool),
  Null,
  Undefined,
  Ident(String),
  Array(Vec<ArrayItem>),
  Object(Vec<PropDef>),
  Member { object: Box<Expr>, property: String, optional: bool },
  Index { object: Box<Expr>, index: Box<Expr>, optional: bool },
  Call { callee: Box<Expr>, args: Vec<ArrayItem>, optional: bool },
  Function(Rc<FunctionDef>),
  Unary { op: UnaryOp, expr: Box<Expr> },
  Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
  Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr> },
  Conditional { test: Box<Expr>, consequent: Box<Expr>, alternate: Box<Expr> },
  Assign { op: AssignOp, target: Box<Expr>, value: Box<Expr> },
  /// `x++` / `--x`; `delta` is +1 or -1.
  Update { target: Box<Expr>, delta: f64, prefix: bool },
  Jsx(Rc<JsxElement>),
}

#[derive(Debug, Clone)]
pub enum JsxName {
  /// Lower-case or dashed tag rendered as-is (`div`, `my-widget`).
  Host(String),
  /// Capitalised or dotted name resolved in scope (`Item`, `React.Fragment`).
  Component(Expr),
  Fragment,
}

#[derive(Debug, Clone)]
pub enum JsxAttr {
  Named { name: String, value: Option<Expr> },
  Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum JsxChild {
  Text(String),
  Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct JsxElement {
  pub name: JsxName,
  pub attrs: Vec<JsxAttr>,
  pub children: Vec<JsxChild>,
}
