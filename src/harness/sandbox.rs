//! Tree-walking evaluator for compiled component programs.
//!
//! The global scope only exposes the rendering primitives (`React.createElement`,
//! `React.Fragment`, `useState`) plus a handful of pure helpers. There is no I/O,
//! no timers and no way to reach the host. Every evaluation step is counted
//! against a budget, and the wall clock is checked periodically.
//!
//! Scopes live in an arena owned by the interpreter; closures refer to them by
//! index, so dropping the interpreter frees everything a run allocated.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::ast::*;

const MAX_CALL_DEPTH: usize = 64;
const MAX_COMPONENT_DEPTH: usize = 32;
/// Steps between wall-clock checks.
const CLOCK_STRIDE: u64 = 1024;
/// Nesting cap for array stringification and rendering.
const MAX_ARRAY_NESTING: usize = 256;

/// Failure while executing or rendering candidate code. The message is JS-flavoured
/// so it reads naturally in grounding text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RenderError(pub String);

impl RenderError {
  pub fn type_error(msg: impl std::fmt::Display) -> Self {
    Self(format!("TypeError: {msg}"))
  }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Clone, Copy)]
pub struct Limits {
  pub step_budget: u64,
  pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFn {
  CreateElement,
  /// Marker value behind `React.Fragment`.
  Fragment,
  UseState,
  SetState,
  StringCtor,
  NumberCtor,
  MathFloor,
  MathCeil,
  MathRound,
  MathMax,
  MathMin,
  MathAbs,
  ConsoleLog,
}

#[derive(Debug)]
pub struct Closure {
  pub def: Rc<FunctionDef>,
  scope: ScopeId,
}

#[derive(Debug, Clone)]
pub enum ElementKind {
  Host(String),
  Component(Value),
  Fragment,
}

#[derive(Debug)]
pub struct Element {
  pub kind: ElementKind,
  pub props: Vec<(String, Value)>,
  pub children: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
  Undefined,
  Null,
  Bool(bool),
  Num(f64),
  Str(Rc<str>),
  Array(Rc<RefCell<Vec<Value>>>),
  Object(Rc<RefCell<Vec<(String, Value)>>>),
  Function(Rc<Closure>),
  Native(NativeFn),
  Element(Rc<Element>),
}

impl Value {
  pub fn str(s: impl AsRef<str>) -> Self {
    Value::Str(Rc::from(s.as_ref()))
  }

  pub fn array(items: Vec<Value>) -> Self {
    Value::Array(Rc::new(RefCell::new(items)))
  }

  pub fn object(entries: Vec<(String, Value)>) -> Self {
    Value::Object(Rc::new(RefCell::new(entries)))
  }

  pub fn from_json(json: &serde_json::Value) -> Self {
    match json {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(*b),
      serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
      serde_json::Value::String(s) => Value::str(s),
      serde_json::Value::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
      serde_json::Value::Object(map) => {
        Value::object(map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
      }
    }
  }

  pub fn is_callable(&self) -> bool {
    matches!(self, Value::Function(_) | Value::Native(_))
  }

  pub fn truthy(&self) -> bool {
    match self {
      Value::Undefined | Value::Null => false,
      Value::Bool(b) => *b,
      Value::Num(n) => *n != 0.0 && !n.is_nan(),
      Value::Str(s) => !s.is_empty(),
      _ => true,
    }
  }

  pub fn type_of(&self) -> &'static str {
    match self {
      Value::Undefined => "undefined",
      Value::Bool(_) => "boolean",
      Value::Num(_) => "number",
      Value::Str(_) => "string",
      Value::Function(_) | Value::Native(_) => "function",
      Value::Null | Value::Array(_) | Value::Object(_) | Value::Element(_) => "object",
    }
  }

  pub fn to_number(&self) -> f64 {
    match self {
      Value::Undefined => f64::NAN,
      Value::Null => 0.0,
      Value::Bool(b) => f64::from(u8::from(*b)),
      Value::Num(n) => *n,
      Value::Str(s) => {
        let t = s.trim();
        if t.is_empty() {
          0.0
        } else {
          t.parse().unwrap_or(f64::NAN)
        }
      }
      Value::Array(_) => Value::str(self.to_js_string()).to_number(),
      _ => f64::NAN,
    }
  }

  pub fn to_js_string(&self) -> String {
    self.js_string_with(&mut Vec::new())
  }

  fn js_string_with(&self, visiting: &mut Vec<*const RefCell<Vec<Value>>>) -> String {
    match self {
      Value::Undefined => "undefined".into(),
      Value::Null => "null".into(),
      Value::Bool(b) => b.to_string(),
      Value::Num(n) => number_to_string(*n),
      Value::Str(s) => s.to_string(),
      Value::Array(items) => join_items(items, ",", visiting),
      Value::Function(_) | Value::Native(_) => "function () { [code] }".into(),
      Value::Object(_) | Value::Element(_) => "[object Object]".into(),
    }
  }

  fn is_primitive(&self) -> bool {
    !matches!(self, Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Element(_))
  }
}

fn illegal_jump() -> RenderError {
  RenderError("SyntaxError: Illegal break or continue statement".into())
}

/// `Array.prototype.join`. An array already on the `visiting` path joins as `""`,
/// so self-referencing arrays terminate. Nesting past the cap is cut off the same way.
fn join_items(items: &Rc<RefCell<Vec<Value>>>, sep: &str, visiting: &mut Vec<*const RefCell<Vec<Value>>>) -> String {
  let ptr = Rc::as_ptr(items);
  if visiting.contains(&ptr) || visiting.len() >= MAX_ARRAY_NESTING {
    return String::new();
  }
  visiting.push(ptr);
  let snapshot = items.borrow().clone();
  let joined = snapshot
    .iter()
    .map(|v| match v {
      Value::Undefined | Value::Null => String::new(),
      other => other.js_string_with(visiting),
    })
    .collect::<Vec<_>>()
    .join(sep);
  visiting.pop();
  joined
}

/// JS `Number.prototype.toString` for the common cases.
pub fn number_to_string(n: f64) -> String {
  if n.is_nan() {
    "NaN".into()
  } else if n.is_infinite() {
    if n > 0.0 { "Infinity" } else { "-Infinity" }.into()
  } else if n.fract() == 0.0 && n.abs() < 1e21 {
    format!("{}", n as i128)
  } else {
    format!("{n}")
  }
}

pub fn strict_equals(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
    (Value::Bool(x), Value::Bool(y)) => x == y,
    (Value::Num(x), Value::Num(y)) => x == y,
    (Value::Str(x), Value::Str(y)) => x == y,
    (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
    (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
    (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
    (Value::Element(x), Value::Element(y)) => Rc::ptr_eq(x, y),
    (Value::Native(x), Value::Native(y)) => x == y,
    _ => false,
  }
}

fn loose_equals(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
    (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
    _ if a.is_primitive() && b.is_primitive() && std::mem::discriminant(a) != std::mem::discriminant(b) => {
      a.to_number() == b.to_number()
    }
    _ => strict_equals(a, b),
  }
}

type ScopeId = usize;

#[derive(Debug, Clone)]
struct Slot {
  value: Value,
  mutable: bool,
}

#[derive(Debug, Default)]
struct Scope {
  vars: HashMap<String, Slot>,
  parent: Option<ScopeId>,
}

enum Flow {
  Normal,
  Return(Value),
  Break,
  Continue,
}

pub struct Interpreter {
  scopes: Vec<Scope>,
  global: ScopeId,
  limits: Limits,
  steps: u64,
  deadline: Instant,
  call_depth: usize,
  component_depth: usize,
  /// Arrays on the current render path.
  rendering: Vec<*const RefCell<Vec<Value>>>,
}

impl Interpreter {
  pub fn new(limits: Limits) -> Self {
    let mut interp = Self {
      scopes: vec![Scope::default()],
      global: 0,
      limits,
      steps: 0,
      deadline: Instant::now() + limits.timeout,
      call_depth: 0,
      component_depth: 0,
      rendering: Vec::new(),
    };
    interp.install_globals();
    interp
  }

  fn install_globals(&mut self) {
    let react = Value::object(vec![
      ("createElement".into(), Value::Native(NativeFn::CreateElement)),
      ("Fragment".into(), Value::Native(NativeFn::Fragment)),
      ("useState".into(), Value::Native(NativeFn::UseState)),
    ]);
    let math = Value::object(vec![
      ("floor".into(), Value::Native(NativeFn::MathFloor)),
      ("ceil".into(), Value::Native(NativeFn::MathCeil)),
      ("round".into(), Value::Native(NativeFn::MathRound)),
      ("max".into(), Value::Native(NativeFn::MathMax)),
      ("min".into(), Value::Native(NativeFn::MathMin)),
      ("abs".into(), Value::Native(NativeFn::MathAbs)),
    ]);
    let console = Value::object(vec![
      ("log".into(), Value::Native(NativeFn::ConsoleLog)),
      ("warn".into(), Value::Native(NativeFn::ConsoleLog)),
      ("error".into(), Value::Native(NativeFn::ConsoleLog)),
    ]);
    let globals = [
      ("React", react),
      ("Fragment", Value::Native(NativeFn::Fragment)),
      ("useState", Value::Native(NativeFn::UseState)),
      ("String", Value::Native(NativeFn::StringCtor)),
      ("Number", Value::Native(NativeFn::NumberCtor)),
      ("Math", math),
      ("console", console),
      ("NaN", Value::Num(f64::NAN)),
      ("Infinity", Value::Num(f64::INFINITY)),
    ];
    for (name, value) in globals {
      self.scopes[self.global].vars.insert(name.into(), Slot { value, mutable: false });
    }
  }

  /// Run the module body in the global scope and resolve the exported component:
  /// the `export default` target, else the binding named `fallback`.
  pub fn load_module(&mut self, program: &Program, fallback: &str) -> RenderResult<Option<Value>> {
    let global = self.global;
    self.hoist(&program.body, global);
    match self.exec_block(&program.body, global)? {
      Flow::Normal => {}
      Flow::Return(_) => return Err(RenderError("SyntaxError: 'return' outside of function".into())),
      Flow::Break | Flow::Continue => return Err(illegal_jump()),
    }
    match &program.default_export {
      Some(expr) => self.eval(expr, global).map(Some),
      None => Ok(self.lookup(fallback, global).map(|slot| slot.value.clone())),
    }
  }

  /// Hooks are only callable between `enter_component` and `exit_component`.
  pub fn enter_component(&mut self) -> RenderResult<()> {
    if self.component_depth >= MAX_COMPONENT_DEPTH {
      return Err(RenderError("RangeError: maximum component nesting depth exceeded".into()));
    }
    self.component_depth += 1;
    Ok(())
  }

  pub fn exit_component(&mut self) {
    self.component_depth = self.component_depth.saturating_sub(1);
  }

  /// An array that contains itself can never finish rendering.
  pub fn enter_array(&mut self, items: &Rc<RefCell<Vec<Value>>>) -> RenderResult<()> {
    let ptr = Rc::as_ptr(items);
    if self.rendering.contains(&ptr) {
      return Err(RenderError("RangeError: Maximum call stack size exceeded (array contains itself)".into()));
    }
    if self.rendering.len() >= MAX_ARRAY_NESTING {
      return Err(RenderError("RangeError: Maximum call stack size exceeded (arrays nested too deeply)".into()));
    }
    self.rendering.push(ptr);
    Ok(())
  }

  pub fn exit_array(&mut self) {
    self.rendering.pop();
  }

  pub fn tick(&mut self) -> RenderResult<()> {
    self.steps += 1;
    if self.steps > self.limits.step_budget {
      return Err(RenderError(format!("step budget exceeded ({} steps)", self.limits.step_budget)));
    }
    if self.steps % CLOCK_STRIDE == 0 && Instant::now() > self.deadline {
      return Err(RenderError(format!("render timed out after {} ms", self.limits.timeout.as_millis())));
    }
    Ok(())
  }

  // --- scopes ---

  fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
    self.scopes.push(Scope { vars: HashMap::new(), parent: Some(parent) });
    self.scopes.len() - 1
  }

  /// Fresh sibling of `from` holding copies of its bindings.
  fn copy_scope(&mut self, from: ScopeId, parent: ScopeId) -> ScopeId {
    let vars = self.scopes[from].vars.clone();
    self.scopes.push(Scope { vars, parent: Some(parent) });
    self.scopes.len() - 1
  }

  fn lookup(&self, name: &str, mut scope: ScopeId) -> Option<&Slot> {
    loop {
      if let Some(slot) = self.scopes[scope].vars.get(name) {
        return Some(slot);
      }
      scope = self.scopes[scope].parent?;
    }
  }

  fn lookup_mut(&mut self, name: &str, scope: ScopeId) -> Option<&mut Slot> {
    let mut current = scope;
    loop {
      if self.scopes[current].vars.contains_key(name) {
        return self.scopes[current].vars.get_mut(name);
      }
      current = self.scopes[current].parent?;
    }
  }

  fn declare(&mut self, scope: ScopeId, name: &str, value: Value, mutable: bool) {
    self.scopes[scope].vars.insert(name.to_string(), Slot { value, mutable });
  }

  fn assign_var(&mut self, name: &str, value: Value, scope: ScopeId) -> RenderResult<()> {
    match self.lookup_mut(name, scope) {
      Some(slot) if slot.mutable => {
        slot.value = value;
        Ok(())
      }
      Some(_) => Err(RenderError::type_error("Assignment to constant variable.")),
      None => Err(RenderError(format!("ReferenceError: {name} is not defined"))),
    }
  }

  /// Function declarations are visible throughout their block.
  fn hoist(&mut self, body: &[Stmt], scope: ScopeId) {
    for stmt in body {
      if let Stmt::Function(def) = stmt {
        if let Some(name) = &def.name {
          let closure = Value::Function(Rc::new(Closure { def: def.clone(), scope }));
          self.declare(scope, name, closure, true);
        }
      }
    }
  }

  // --- statements ---

  fn exec_block(&mut self, body: &[Stmt], scope: ScopeId) -> RenderResult<Flow> {
    for stmt in body {
      match self.exec(stmt, scope)? {
        Flow::Normal => {}
        jump => return Ok(jump),
      }
    }
    Ok(Flow::Normal)
  }

  fn exec_nested(&mut self, body: &[Stmt], parent: ScopeId) -> RenderResult<Flow> {
    let scope = self.push_scope(parent);
    self.hoist(body, scope);
    self.exec_block(body, scope)
  }

  fn exec(&mut self, stmt: &Stmt, scope: ScopeId) -> RenderResult<Flow> {
    self.tick()?;
    match stmt {
      Stmt::Let { bindings, mutable } => {
        for binding in bindings {
          let value = match &binding.init {
            Some(init) => self.eval(init, scope)?,
            None => Value::Undefined,
          };
          self.bind_pattern(&binding.target, value, scope, *mutable)?;
        }
        Ok(Flow::Normal)
      }
      Stmt::Function(_) => Ok(Flow::Normal),
      Stmt::Return(expr) => {
        let value = match expr {
          Some(e) => self.eval(e, scope)?,
          None => Value::Undefined,
        };
        Ok(Flow::Return(value))
      }
      Stmt::If { test, consequent, alternate } => {
        if self.eval(test, scope)?.truthy() {
          self.exec_nested(consequent, scope)
        } else if let Some(alt) = alternate {
          self.exec_nested(alt, scope)
        } else {
          Ok(Flow::Normal)
        }
      }
      Stmt::Block(body) => self.exec_nested(body, scope),
      Stmt::Expr(expr) => {
        self.eval(expr, scope)?;
        Ok(Flow::Normal)
      }
      Stmt::Break => Ok(Flow::Break),
      Stmt::Continue => Ok(Flow::Continue),
      Stmt::For { init, test, update, body } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, scope),
      Stmt::ForOf { target, mutable, iterable, body } => {
        let iterable = self.eval(iterable, scope)?;
        let items = match &iterable {
          Value::Array(items) => items.borrow().clone(),
          Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
          other => return Err(RenderError::type_error(format!("{} is not iterable", other.type_of()))),
        };
        for item in items {
          self.tick()?;
          let iteration = self.push_scope(scope);
          self.bind_pattern(target, item, iteration, *mutable)?;
          match self.exec_nested(body, iteration)? {
            Flow::Break => break,
            Flow::Return(v) => return Ok(Flow::Return(v)),
            Flow::Normal | Flow::Continue => {}
          }
        }
        Ok(Flow::Normal)
      }
      Stmt::While { test, body, test_first } => {
        let mut check = *test_first;
        loop {
          self.tick()?;
          if check && !self.eval(test, scope)?.truthy() {
            break;
          }
          check = true;
          match self.exec_nested(body, scope)? {
            Flow::Break => break,
            Flow::Return(v) => return Ok(Flow::Return(v)),
            Flow::Normal | Flow::Continue => {}
          }
        }
        Ok(Flow::Normal)
      }
      Stmt::Switch { discriminant, cases } => {
        let value = self.eval(discriminant, scope)?;
        let mut start = None;
        for (i, case) in cases.iter().enumerate() {
          if let Some(test) = &case.test {
            if strict_equals(&value, &self.eval(test, scope)?) {
              start = Some(i);
              break;
            }
          }
        }
        let Some(start) = start.or_else(|| cases.iter().position(|c| c.test.is_none())) else {
          return Ok(Flow::Normal);
        };
        let block = self.push_scope(scope);
        for case in cases {
          self.hoist(&case.body, block);
        }
        for case in &cases[start..] {
          match self.exec_block(&case.body, block)? {
            Flow::Normal => {}
            Flow::Break => return Ok(Flow::Normal),
            jump => return Ok(jump),
          }
        }
        Ok(Flow::Normal)
      }
    }
  }

  /// Each iteration runs in a copy of the loop bindings, so closures keep the
  /// value they saw.
  fn exec_for(
    &mut self,
    init: Option<&Stmt>,
    test: Option<&Expr>,
    update: Option<&Expr>,
    body: &[Stmt],
    scope: ScopeId,
  ) -> RenderResult<Flow> {
    let mut current = self.push_scope(scope);
    if let Some(init) = init {
      self.exec(init, current)?;
    }
    let mut first = true;
    loop {
      self.tick()?;
      current = self.copy_scope(current, scope);
      if !first {
        if let Some(update) = update {
          self.eval(update, current)?;
        }
      }
      first = false;
      if let Some(test) = test {
        if !self.eval(test, current)?.truthy() {
          break;
        }
      }
      match self.exec_nested(body, current)? {
        Flow::Break => break,
        Flow::Return(v) => return Ok(Flow::Return(v)),
        Flow::Normal | Flow::Continue => {}
      }
    }
    Ok(Flow::Normal)
  }

  fn bind_pattern(&mut self, pattern: &Pattern, value: Value, scope: ScopeId, mutable: bool) -> RenderResult<()> {
    match pattern {
      Pattern::Ident(name) => {
        self.declare(scope, name, value, mutable);
        Ok(())
      }
      Pattern::Array(items) => {
        let elements = match &value {
          Value::Array(a) => a.borrow().clone(),
          Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
          other => return Err(RenderError::type_error(format!("{} is not iterable", other.type_of()))),
        };
        for (i, item) in items.iter().enumerate() {
          if let Some(binding) = item {
            let v = elements.get(i).cloned().unwrap_or(Value::Undefined);
            self.bind_with_default(binding, v, scope, mutable)?;
          }
        }
        Ok(())
      }
      Pattern::Object(props) => {
        if matches!(value, Value::Undefined | Value::Null) {
          return Err(RenderError::type_error(format!(
            "Cannot destructure '{}' as it is {}.",
            value.to_js_string(),
            value.to_js_string()
          )));
        }
        for (key, binding) in props {
          let v = self.get_property(&value, key)?;
          self.bind_with_default(binding, v, scope, mutable)?;
        }
        Ok(())
      }
    }
  }

  fn bind_with_default(&mut self, binding: &Binding, value: Value, scope: ScopeId, mutable: bool) -> RenderResult<()> {
    let value = match (&value, &binding.init) {
      (Value::Undefined, Some(init)) => self.eval(init, scope)?,
      _ => value,
    };
    self.bind_pattern(&binding.target, value, scope, mutable)
  }

  // --- expressions ---

  fn eval(&mut self, expr: &Expr, scope: ScopeId) -> RenderResult<Value> {
    self.tick()?;
    match expr {
      Expr::Num(n) => Ok(Value::Num(*n)),
      Expr::Str(s) => Ok(Value::str(s)),
      Expr::Bool(b) => Ok(Value::Bool(*b)),
      Expr::Null => Ok(Value::Null),
      Expr::Undefined => Ok(Value::Undefined),
      Expr::Template(parts) => {
        let mut out = String::new();
        for part in parts {
          match part {
            TemplatePart::Str(s) => out.push_str(s),
            TemplatePart::Expr(e) => out.push_str(&self.eval(e, scope)?.to_js_string()),
          }
        }
        Ok(Value::str(out))
      }
      Expr::Ident(name) => match self.lookup(name, scope) {
        Some(slot) => Ok(slot.value.clone()),
        None => Err(RenderError(format!("ReferenceError: {name} is not defined"))),
      },
      Expr::Array(items) => Ok(Value::array(self.eval_items(items, scope)?)),
      Expr::Object(props) => {
        let mut entries: Vec<(String, Value)> = vec![];
        for prop in props {
          match prop {
            PropDef::KeyValue(key, e) => {
              let v = self.eval(e, scope)?;
              set_entry(&mut entries, key, v);
            }
            PropDef::Spread(e) => match self.eval(e, scope)? {
              Value::Object(o) => {
                for (k, v) in o.borrow().iter() {
                  set_entry(&mut entries, k, v.clone());
                }
              }
              Value::Array(a) => {
                for (i, v) in a.borrow().iter().enumerate() {
                  set_entry(&mut entries, &i.to_string(), v.clone());
                }
              }
              _ => {}
            },
          }
        }
        Ok(Value::object(entries))
      }
      Expr::Member { object, property, optional } => {
        let obj = self.eval(object, scope)?;
        if *optional && matches!(obj, Value::Undefined | Value::Null) {
          return Ok(Value::Undefined);
        }
        self.get_property(&obj, property)
      }
      Expr::Index { object, index, optional } => {
        let obj = self.eval(object, scope)?;
        if *optional && matches!(obj, Value::Undefined | Value::Null) {
          return Ok(Value::Undefined);
        }
        let key = self.eval(index, scope)?.to_js_string();
        self.get_property(&obj, &key)
      }
      Expr::Call { callee, args, optional } => self.eval_call(callee, args, *optional, scope),
      Expr::Function(def) => Ok(Value::Function(Rc::new(Closure { def: def.clone(), scope }))),
      Expr::Unary { op, expr } => {
        let v = match (op, expr.as_ref()) {
          // `typeof undeclared` is not an error
          (UnaryOp::TypeOf, Expr::Ident(name)) if self.lookup(name, scope).is_none() => Value::Undefined,
          _ => self.eval(expr, scope)?,
        };
        Ok(match op {
          UnaryOp::Not => Value::Bool(!v.truthy()),
          UnaryOp::Neg => Value::Num(-v.to_number()),
          UnaryOp::Plus => Value::Num(v.to_number()),
          UnaryOp::TypeOf => Value::str(v.type_of()),
        })
      }
      Expr::Binary { op, left, right } => {
        let l = self.eval(left, scope)?;
        let r = self.eval(right, scope)?;
        Ok(binary(*op, &l, &r))
      }
      Expr::Logical { op, left, right } => {
        let l = self.eval(left, scope)?;
        let short = match op {
          LogicalOp::And => !l.truthy(),
          LogicalOp::Or => l.truthy(),
          LogicalOp::Nullish => !matches!(l, Value::Undefined | Value::Null),
        };
        if short {
          Ok(l)
        } else {
          self.eval(right, scope)
        }
      }
      Expr::Conditional { test, consequent, alternate } => {
        if self.eval(test, scope)?.truthy() {
          self.eval(consequent, scope)
        } else {
          self.eval(alternate, scope)
        }
      }
      Expr::Assign { op, target, value } => {
        let rhs = self.eval(value, scope)?;
        let new_value = match op {
          AssignOp::Set => rhs,
          _ => {
            let current = self.eval(target, scope)?;
            let bin = match op {
              AssignOp::Add => BinaryOp::Add,
              AssignOp::Sub => BinaryOp::Sub,
              AssignOp::Mul => BinaryOp::Mul,
              _ => BinaryOp::Div,
            };
            binary(bin, &current, &rhs)
          }
        };
        self.store(target, new_value.clone(), scope)?;
        Ok(new_value)
      }
      Expr::Update { target, delta, prefix } => {
        let old = self.eval(target, scope)?.to_number();
        let new = old + delta;
        self.store(target, Value::Num(new), scope)?;
        Ok(Value::Num(if *prefix { new } else { old }))
      }
      Expr::Jsx(el) => self.eval_jsx(el, scope),
    }
  }

  fn eval_items(&mut self, items: &[ArrayItem], scope: ScopeId) -> RenderResult<Vec<Value>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
      match item {
        ArrayItem::Item(e) => out.push(self.eval(e, scope)?),
        ArrayItem::Spread(e) => match self.eval(e, scope)? {
          Value::Array(a) => out.extend(a.borrow().iter().cloned()),
          Value::Str(s) => out.extend(s.chars().map(|c| Value::str(c.to_string()))),
          other => return Err(RenderError::type_error(format!("{} is not iterable", other.type_of()))),
        },
      }
    }
    Ok(out)
  }

  fn store(&mut self, target: &Expr, value: Value, scope: ScopeId) -> RenderResult<()> {
    match target {
      Expr::Ident(name) => self.assign_var(name, value, scope),
      Expr::Member { object, property, .. } => {
        let obj = self.eval(object, scope)?;
        set_property(&obj, property, value)
      }
      Expr::Index { object, index, .. } => {
        let obj = self.eval(object, scope)?;
        let key = self.eval(index, scope)?.to_js_string();
        set_property(&obj, &key, value)
      }
      _ => Err(RenderError("SyntaxError: invalid assignment target".into())),
    }
  }

  pub fn get_property(&self, obj: &Value, key: &str) -> RenderResult<Value> {
    Ok(match obj {
      Value::Undefined | Value::Null => {
        return Err(RenderError::type_error(format!(
          "Cannot read properties of {} (reading '{key}')",
          obj.to_js_string()
        )))
      }
      Value::Array(items) => {
        let items = items.borrow();
        match key {
          "length" => Value::Num(items.len() as f64),
          _ => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()).unwrap_or(Value::Undefined),
        }
      }
      Value::Str(s) => match key {
        "length" => Value::Num(s.chars().count() as f64),
        _ => key
          .parse::<usize>()
          .ok()
          .and_then(|i| s.chars().nth(i))
          .map(|c| Value::str(c.to_string()))
          .unwrap_or(Value::Undefined),
      },
      Value::Object(entries) => {
        entries.borrow().iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()).unwrap_or(Value::Undefined)
      }
      Value::Element(el) => match key {
        "props" => Value::object(el.props.clone()),
        "type" => match &el.kind {
          ElementKind::Host(tag) => Value::str(tag),
          ElementKind::Component(c) => c.clone(),
          ElementKind::Fragment => Value::Native(NativeFn::Fragment),
        },
        _ => Value::Undefined,
      },
      _ => Value::Undefined,
    })
  }

  fn eval_call(&mut self, callee: &Expr, args: &[ArrayItem], optional: bool, scope: ScopeId) -> RenderResult<Value> {
    if let Expr::Member { object, property, optional: member_optional } = callee {
      let receiver = self.eval(object, scope)?;
      if *member_optional && matches!(receiver, Value::Undefined | Value::Null) {
        return Ok(Value::Undefined);
      }
      let args = self.eval_items(args, scope)?;
      if let Some(result) = self.call_builtin_method(&receiver, property, &args)? {
        return Ok(result);
      }
      let func = self.get_property(&receiver, property)?;
      if optional && matches!(func, Value::Undefined | Value::Null) {
        return Ok(Value::Undefined);
      }
      if !func.is_callable() {
        return Err(RenderError::type_error(format!("{} is not a function", describe(callee))));
      }
      return self.call(&func, args);
    }

    let func = self.eval(callee, scope)?;
    if optional && matches!(func, Value::Undefined | Value::Null) {
      return Ok(Value::Undefined);
    }
    if !func.is_callable() {
      return Err(RenderError::type_error(format!("{} is not a function", describe(callee))));
    }
    let args = self.eval_items(args, scope)?;
    self.call(&func, args)
  }

  pub fn call(&mut self, func: &Value, args: Vec<Value>) -> RenderResult<Value> {
    match func {
      Value::Function(closure) => {
        if self.call_depth >= MAX_CALL_DEPTH {
          return Err(RenderError("RangeError: Maximum call stack size exceeded".into()));
        }
        self.call_depth += 1;
        let out = self.call_closure(closure, args);
        self.call_depth -= 1;
        out
      }
      Value::Native(native) => self.call_native(*native, args),
      other => Err(RenderError::type_error(format!("{} is not a function", other.type_of()))),
    }
  }

  fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> RenderResult<Value> {
    let scope = self.push_scope(closure.scope);
    let mut args = args.into_iter();
    for param in &closure.def.params {
      let value = args.next().unwrap_or(Value::Undefined);
      self.bind_with_default(param, value, scope, true)?;
    }
    match &closure.def.body {
      FunctionBody::Expr(e) => self.eval(e, scope),
      FunctionBody::Block(body) => {
        self.hoist(body, scope);
        match self.exec_block(body, scope)? {
          Flow::Return(v) => Ok(v),
          Flow::Normal => Ok(Value::Undefined),
          Flow::Break | Flow::Continue => Err(illegal_jump()),
        }
      }
    }
  }

  fn call_native(&mut self, native: NativeFn, args: Vec<Value>) -> RenderResult<Value> {
    if native == NativeFn::CreateElement {
      let mut rest = args.into_iter();
      let kind = element_kind(rest.next().unwrap_or(Value::Undefined))?;
      let props = match rest.next() {
        Some(Value::Object(o)) => o.borrow().clone(),
        _ => vec![],
      };
      let children = rest.collect();
      return Ok(Value::Element(Rc::new(Element { kind, props, children })));
    }
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
    let num = |i: usize| args.get(i).map(Value::to_number).unwrap_or(f64::NAN);
    Ok(match native {
      NativeFn::CreateElement => Value::Undefined,
      NativeFn::Fragment => return Err(RenderError::type_error("Fragment is not a function")),
      NativeFn::UseState => {
        if self.component_depth == 0 {
          return Err(RenderError(
            "Invalid hook call. Hooks can only be called inside of the body of a function component.".into(),
          ));
        }
        let initial = match arg(0) {
          f if f.is_callable() => self.call(&f, vec![])?,
          v => v,
        };
        Value::array(vec![initial, Value::Native(NativeFn::SetState)])
      }
      NativeFn::SetState => {
        return Err(RenderError(
          "Too many re-renders. State updates are not allowed while rendering to static markup.".into(),
        ))
      }
      NativeFn::StringCtor => Value::str(if args.is_empty() { String::new() } else { arg(0).to_js_string() }),
      NativeFn::NumberCtor => Value::Num(if args.is_empty() { 0.0 } else { num(0) }),
      NativeFn::MathFloor => Value::Num(num(0).floor()),
      NativeFn::MathCeil => Value::Num(num(0).ceil()),
      NativeFn::MathRound => Value::Num((num(0) + 0.5).floor()),
      NativeFn::MathAbs => Value::Num(num(0).abs()),
      NativeFn::MathMax => Value::Num(fold_numbers(&args, f64::NEG_INFINITY, f64::max)),
      NativeFn::MathMin => Value::Num(fold_numbers(&args, f64::INFINITY, f64::min)),
      NativeFn::ConsoleLog => Value::Undefined,
    })
  }

  /// Built-in methods on arrays, strings and numbers. `None` means "not a built-in".
  fn call_builtin_method(&mut self, receiver: &Value, name: &str, args: &[Value]) -> RenderResult<Option<Value>> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
    match receiver {
      Value::Array(items) => {
        let snapshot = items.borrow().clone();
        let len = snapshot.len();
        let result = match name {
          "map" | "filter" | "find" | "findIndex" | "some" | "every" | "forEach" => {
            let f = arg(0);
            if !f.is_callable() {
              return Err(RenderError::type_error(format!("{} is not a function", f.to_js_string())));
            }
            let mut mapped = vec![];
            for (i, item) in snapshot.iter().enumerate() {
              let out = self.call(&f, vec![item.clone(), Value::Num(i as f64), receiver.clone()])?;
              match name {
                "map" => mapped.push(out),
                "filter" if out.truthy() => mapped.push(item.clone()),
                "find" if out.truthy() => return Ok(Some(item.clone())),
                "findIndex" if out.truthy() => return Ok(Some(Value::Num(i as f64))),
                "some" if out.truthy() => return Ok(Some(Value::Bool(true))),
                "every" if !out.truthy() => return Ok(Some(Value::Bool(false))),
                _ => {}
              }
            }
            match name {
              "map" | "filter" => Value::array(mapped),
              "find" | "forEach" => Value::Undefined,
              "findIndex" => Value::Num(-1.0),
              "some" => Value::Bool(false),
              _ => Value::Bool(true),
            }
          }
          "reduce" => {
            let f = arg(0);
            let mut iter = snapshot.iter().enumerate();
            let mut acc = if args.len() > 1 {
              arg(1)
            } else {
              match iter.next() {
                Some((_, first)) => first.clone(),
                None => return Err(RenderError::type_error("Reduce of empty array with no initial value")),
              }
            };
            for (i, item) in iter {
              acc = self.call(&f, vec![acc, item.clone(), Value::Num(i as f64)])?;
            }
            acc
          }
          "join" => {
            let sep = match arg(0) {
              Value::Undefined => ",".to_string(),
              v => v.to_js_string(),
            };
            Value::str(join_items(items, &sep, &mut Vec::new()))
          }
          "includes" => Value::Bool(snapshot.iter().any(|v| same_value_zero(v, &arg(0)))),
          "indexOf" => Value::Num(
            snapshot.iter().position(|v| strict_equals(v, &arg(0))).map(|i| i as f64).unwrap_or(-1.0),
          ),
          "slice" => {
            let (start, end) = slice_bounds(len, &arg(0), &arg(1));
            Value::array(snapshot[start..end].to_vec())
          }
          "concat" => {
            let mut out = snapshot;
            for a in args {
              match a {
                Value::Array(more) => out.extend(more.borrow().iter().cloned()),
                other => out.push(other.clone()),
              }
            }
            Value::array(out)
          }
          "push" => {
            let mut items = items.borrow_mut();
            items.extend(args.iter().cloned());
            Value::Num(items.len() as f64)
          }
          _ => return Ok(None),
        };
        Ok(Some(result))
      }
      Value::Str(s) => {
        let result = match name {
          "toUpperCase" => Value::str(s.to_uppercase()),
          "toLowerCase" => Value::str(s.to_lowercase()),
          "trim" => Value::str(s.trim()),
          "includes" => Value::Bool(s.contains(arg(0).to_js_string().as_str())),
          "startsWith" => Value::Bool(s.starts_with(arg(0).to_js_string().as_str())),
          "endsWith" => Value::Bool(s.ends_with(arg(0).to_js_string().as_str())),
          "split" => match arg(0) {
            Value::Undefined => Value::array(vec![Value::Str(s.clone())]),
            sep => {
              let sep = sep.to_js_string();
              let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::str(c.to_string())).collect()
              } else {
                s.split(sep.as_str()).map(Value::str).collect()
              };
              Value::array(parts)
            }
          },
          "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), &arg(0), &arg(1));
            Value::str(chars[start..end].iter().collect::<String>())
          }
          "toString" => Value::Str(s.clone()),
          _ => return Ok(None),
        };
        Ok(Some(result))
      }
      Value::Num(n) => {
        let result = match name {
          "toFixed" => {
            let digits = arg(0).to_number();
            let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
            if !(0.0..=100.0).contains(&digits) {
              return Err(RenderError("RangeError: toFixed() digits argument must be between 0 and 100".into()));
            }
            if !n.is_finite() || n.abs() >= 1e21 {
              Value::str(number_to_string(*n))
            } else {
              let digits = digits as usize;
              let n = if *n == 0.0 { 0.0 } else { *n };
              Value::str(format!("{n:.digits$}"))
            }
          }
          "toString" => Value::str(number_to_string(*n)),
          _ => return Ok(None),
        };
        Ok(Some(result))
      }
      _ => Ok(None),
    }
  }

  // --- JSX ---

  fn eval_jsx(&mut self, el: &JsxElement, scope: ScopeId) -> RenderResult<Value> {
    let kind = match &el.name {
      JsxName::Host(tag) => ElementKind::Host(tag.clone()),
      JsxName::Fragment => ElementKind::Fragment,
      JsxName::Component(expr) => element_kind(self.eval(expr, scope)?)?,
    };
    let mut props: Vec<(String, Value)> = vec![];
    for attr in &el.attrs {
      match attr {
        JsxAttr::Named { name, value } => {
          let v = match value {
            Some(e) => self.eval(e, scope)?,
            None => Value::Bool(true),
          };
          set_entry(&mut props, name, v);
        }
        JsxAttr::Spread(e) => {
          if let Value::Object(o) = self.eval(e, scope)? {
            for (k, v) in o.borrow().iter() {
              set_entry(&mut props, k, v.clone());
            }
          }
        }
      }
    }
    let mut children = Vec::with_capacity(el.children.len());
    for child in &el.children {
      children.push(match child {
        JsxChild::Text(t) => Value::str(t),
        JsxChild::Expr(e) => self.eval(e, scope)?,
      });
    }
    Ok(Value::Element(Rc::new(Element { kind, props, children })))
  }
}

fn element_kind(ty: Value) -> RenderResult<ElementKind> {
  match ty {
    Value::Str(tag) => Ok(ElementKind::Host(tag.to_string())),
    Value::Native(NativeFn::Fragment) => Ok(ElementKind::Fragment),
    f @ (Value::Function(_) | Value::Native(_)) => Ok(ElementKind::Component(f)),
    other => Err(RenderError(format!(
      "Element type is invalid: expected a string or a function but got: {}",
      other.type_of()
    ))),
  }
}

fn set_entry(entries: &mut Vec<(String, Value)>, key: &str, value: Value) {
  match entries.iter_mut().find(|(k, _)| k == key) {
    Some(entry) => entry.1 = value,
    None => entries.push((key.to_string(), value)),
  }
}

fn set_property(obj: &Value, key: &str, value: Value) -> RenderResult<()> {
  match obj {
    Value::Object(entries) => {
      set_entry(&mut entries.borrow_mut(), key, value);
      Ok(())
    }
    Value::Array(items) => {
      let Ok(i) = key.parse::<usize>() else { return Ok(()) };
      let mut items = items.borrow_mut();
      if i >= items.len() {
        items.resize(i + 1, Value::Undefined);
      }
      items[i] = value;
      Ok(())
    }
    Value::Undefined | Value::Null => Err(RenderError::type_error(format!(
      "Cannot set properties of {} (setting '{key}')",
      obj.to_js_string()
    ))),
    _ => Ok(()),
  }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
  use BinaryOp::*;
  match op {
    Add => {
      let stringy = |v: &Value| !matches!(v, Value::Undefined | Value::Null | Value::Bool(_) | Value::Num(_));
      if stringy(l) || stringy(r) {
        Value::str(format!("{}{}", l.to_js_string(), r.to_js_string()))
      } else {
        Value::Num(l.to_number() + r.to_number())
      }
    }
    Sub => Value::Num(l.to_number() - r.to_number()),
    Mul => Value::Num(l.to_number() * r.to_number()),
    Div => Value::Num(l.to_number() / r.to_number()),
    Rem => Value::Num(l.to_number() % r.to_number()),
    Pow => Value::Num(l.to_number().powf(r.to_number())),
    StrictEq => Value::Bool(strict_equals(l, r)),
    StrictNe => Value::Bool(!strict_equals(l, r)),
    LooseEq => Value::Bool(loose_equals(l, r)),
    LooseNe => Value::Bool(!loose_equals(l, r)),
    Lt | Gt | Le | Ge => {
      let ordering = match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => l.to_number().partial_cmp(&r.to_number()),
      };
      let Some(ord) = ordering else { return Value::Bool(false) };
      Value::Bool(match op {
        Lt => ord.is_lt(),
        Gt => ord.is_gt(),
        Le => ord.is_le(),
        _ => ord.is_ge(),
      })
    }
  }
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::Num(x), Value::Num(y)) if x.is_nan() && y.is_nan() => true,
    _ => strict_equals(a, b),
  }
}

fn fold_numbers(args: &[Value], init: f64, f: fn(f64, f64) -> f64) -> f64 {
  args
    .iter()
    .map(Value::to_number)
    .try_fold(init, |acc, n| if n.is_nan() { None } else { Some(f(acc, n)) })
    .unwrap_or(f64::NAN)
}

fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
  let resolve = |v: &Value, default: usize| -> usize {
    match v {
      Value::Undefined => default,
      v => {
        let n = v.to_number();
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        if n < 0.0 {
          (len as f64 + n).max(0.0) as usize
        } else {
          (n as usize).min(len)
        }
      }
    }
  };
  let s = resolve(start, 0);
  let e = resolve(end, len);
  (s, e.max(s))
}

/// Source-ish name of a callee for error messages (`props.onSelect`, `items.mapp`).
fn describe(expr: &Expr) -> String {
  match expr {
    Expr::Ident(name) => name.clone(),
    Expr::Member { object, property, .. } => format!("{}.{property}", describe(object)),
    Expr::Index { object, .. } => format!("{}[...]", describe(object)),
    Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
    _ => "expression".into(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::harness::parser::parse_program;

  fn limits() -> Limits {
    Limits { step_budget: 100_000, timeout: Duration::from_secs(1) }
  }

  fn eval_export(src: &str) -> RenderResult<Value> {
    let program = parse_program(src).map_err(|e| RenderError(e.to_string()))?;
    let mut interp = Interpreter::new(limits());
    Ok(interp.load_module(&program, "Counter")?.unwrap_or(Value::Undefined))
  }

  #[test]
  fn arithmetic_and_string_coercion_follow_js() {
    let v = eval_export("export default 1 + 2 + '3' + 4;").unwrap();
    assert_eq!(v.to_js_string(), "334");
    let v = eval_export("export default [0.1 + 0.2, 10 / 4, 7 % 3, 2 ** 10, 1 / 0];").unwrap();
    assert_eq!(v.to_js_string(), "0.30000000000000004,2.5,1,1024,Infinity");
    let v = eval_export("export default [null == undefined, '1' == 1, '1' === 1, NaN === NaN];").unwrap();
    assert_eq!(v.to_js_string(), "true,true,false,false");
  }

  #[test]
  fn closures_destructuring_and_array_helpers() {
    let src = r#"
      const makeAdder = (n) => (x) => x + n;
      const { items = [], title } = { title: 'T' };
      const [first, , third = 'c'] = ['a', 'b'];
      let total = 0;
      [1, 2, 3].forEach(n => { total += n; });
      export default [makeAdder(2)(3), items.length, title, first, third, total,
        [3, 1, 2].filter(n => n > 1).map(n => n * 10).join('|')].join(',');
    "#;
    assert_eq!(eval_export(src).unwrap().to_js_string(), "5,0,T,a,c,6,30|20");
  }

  #[test]
  fn reading_property_of_undefined_is_a_type_error() {
    let err = eval_export("const o = {}; export default o.missing.deep;").unwrap_err();
    assert_eq!(err.0, "TypeError: Cannot read properties of undefined (reading 'deep')");
    let err = eval_export("export default nope;").unwrap_err();
    assert_eq!(err.0, "ReferenceError: nope is not defined");
  }

  #[test]
  fn const_reassignment_is_rejected() {
    let err = eval_export("const a = 1; a = 2;").unwrap_err();
    assert!(err.0.contains("constant"));
  }

  #[test]
  fn use_state_outside_component_is_invalid() {
    let err = eval_export("const [a] = useState(0);").unwrap_err();
    assert!(err.0.starts_with("Invalid hook call"));
  }

  #[test]
  fn unbounded_recursion_hits_call_depth() {
    let err = eval_export("function f(n) { return f(n + 1); } export default f(0);").unwrap_err();
    assert!(err.0.contains("Maximum call stack"));
  }

  #[test]
  fn step_budget_is_enforced() {
    let program = parse_program("const xs = [1,2,3,4,5,6,7,8,9,10]; export default xs.map(x => xs.map(y => x * y));").unwrap();
    let mut interp = Interpreter::new(Limits { step_budget: 50, timeout: Duration::from_secs(1) });
    let err = interp.load_module(&program, "Counter").unwrap_err();
    assert_eq!(err.0, "step budget exceeded (50 steps)");
  }

  #[test]
  fn number_formatting() {
    assert_eq!(number_to_string(3.0), "3");
    assert_eq!(number_to_string(-0.5), "-0.5");
    assert_eq!(number_to_string(f64::NAN), "NaN");
    let v = eval_export("export default (1.005).toFixed(1) + ':' + Math.max(1, 7, 3);").unwrap();
    assert_eq!(v.to_js_string(), "1.0:7");
  }

  #[test]
  fn loops_and_switch_control_flow() {
    let src = r#"
      let s = 0;
      for (let i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break; s += i; }
      const fns = [];
      for (let i = 0; i < 3; i++) { fns.push(() => i); }
      let n = 0;
      while (true) { n++; if (n === 4) break; }
      let d = 10;
      do { d++; } while (d < 5);
      let labels = '';
      for (const [k, v] of [['a', 1], ['b', 2], ['c', 3]]) {
        switch (v) {
          case 1: labels += k;
          case 2: labels += k.toUpperCase(); break;
          default: labels += '-';
        }
      }
      function first(xs) { for (const x of xs) { if (x > 1) return x; } return -1; }
      export default [s, fns.map(f => f()).join(''), n, d, labels, first([1, 5, 9])].join(',');
    "#;
    assert_eq!(eval_export(src).unwrap().to_js_string(), "12,012,4,11,aAB-,5");
  }

  #[test]
  fn infinite_loop_is_stopped_by_step_budget() {
    let program = parse_program("let i = 0; while (true) { i++; }").unwrap();
    let mut interp = Interpreter::new(Limits { step_budget: 500, timeout: Duration::from_secs(1) });
    let err = interp.load_module(&program, "Counter").unwrap_err();
    assert_eq!(err.0, "step budget exceeded (500 steps)");
  }

  #[test]
  fn to_fixed_follows_number_rules() {
    let v = eval_export("export default [(1/0).toFixed(2), (-1/0).toFixed(0), (0/0).toFixed(1), (2.5).toFixed(100).length].join(' ');")
      .unwrap();
    assert_eq!(v.to_js_string(), "Infinity -Infinity NaN 102");
    let err = eval_export("export default (1).toFixed(1000);").unwrap_err();
    assert!(err.0.starts_with("RangeError"));
    let err = eval_export("export default (1).toFixed(-1);").unwrap_err();
    assert!(err.0.starts_with("RangeError"));
  }

  #[test]
  fn self_referencing_array_stringifies_as_empty() {
    let v = eval_export("const a = [1]; a.push(a); export default a.join('-') + '|' + String(a) + '|' + (a + '');").unwrap();
    assert_eq!(v.to_js_string(), "1-|1,|1,");
  }
}
