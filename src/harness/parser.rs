//! Scannerless recursive-descent parser for the component language.
//!
//! Accepts a JSX-flavoured subset of JavaScript: function and arrow components,
//! `const`/`let` with destructuring, `if`/`return`, loops and `switch`, the usual
//! operators and JSX. Import directives are dropped here; export directives only
//! mark the exported component. Malformed source is a `SyntaxError`; valid
//! JavaScript the harness cannot run (classes, `try`, `new`) is reported as a
//! harness limitation instead. Both carry a position.

use std::rc::Rc;

use thiserror::Error;

use super::ast::*;

/// Nesting guard so hostile input cannot blow the native stack.
const MAX_NESTING: usize = 200;

const PUNCTUATORS: &[&str] = &[
  "===", "!==", "...", "**", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=",
  "*=", "/=", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*", "/", "%", "!", "?", ":", "=",
  ".", "&", "|",
];

const RESERVED: &[&str] = &[
  "const", "let", "var", "function", "return", "if", "else", "import", "export", "default", "true", "false",
  "null", "undefined", "typeof", "new", "class", "this", "while", "for", "do", "switch", "case", "break",
  "continue", "try", "catch", "finally", "throw", "async", "await", "yield", "delete", "in", "instanceof",
  "void", "with",
];

/// Leading text of diagnostics for valid code outside the supported subset.
pub const UNSUPPORTED_PREFIX: &str = "Unsupported by test harness";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
  Syntax,
  Unsupported,
}

impl std::fmt::Display for ParseErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ParseErrorKind::Syntax => f.write_str("SyntaxError"),
      ParseErrorKind::Unsupported => f.write_str(UNSUPPORTED_PREFIX),
    }
  }
}

/// Compile diagnostic with a one-based position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message} ({line}:{column})")]
pub struct ParseError {
  pub kind: ParseErrorKind,
  pub message: String,
  pub line: usize,
  pub column: usize,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Compile candidate source into a `Program`.
pub fn parse_program(src: &str) -> ParseResult<Program> {
  Parser { src, pos: 0, depth: 0 }.program()
}

fn is_ident_start(c: char) -> bool {
  c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_part(c: char) -> bool {
  is_ident_start(c) || c.is_alphanumeric()
}

fn is_reserved(word: &str) -> bool {
  RESERVED.contains(&word)
}

struct Parser<'a> {
  src: &'a str,
  pos: usize,
  depth: usize,
}

impl<'a> Parser<'a> {
  // --- cursor ---

  fn rest(&self) -> &'a str {
    &self.src[self.pos..]
  }

  fn peek(&self) -> Option<char> {
    self.rest().chars().next()
  }

  fn error(&self, message: impl Into<String>) -> ParseError {
    let consumed = &self.src[..self.pos.min(self.src.len())];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) + 1;
    ParseError { kind: ParseErrorKind::Syntax, message: message.into(), line, column }
  }

  fn unsupported(&self, message: impl Into<String>) -> ParseError {
    ParseError { kind: ParseErrorKind::Unsupported, ..self.error(message) }
  }

  fn enter(&mut self) -> ParseResult<()> {
    self.depth += 1;
    if self.depth > MAX_NESTING {
      return Err(self.error("nesting too deep"));
    }
    Ok(())
  }

  /// Skip whitespace and comments.
  fn trivia(&mut self) {
    loop {
      let r = self.rest();
      if let Some(c) = r.chars().next().filter(|c| c.is_whitespace()) {
        self.pos += c.len_utf8();
      } else if r.starts_with("//") {
        self.pos = r.find('\n').map(|i| self.pos + i + 1).unwrap_or(self.src.len());
      } else if r.starts_with("/*") {
        self.pos = r[2..].find("*/").map(|i| self.pos + i + 4).unwrap_or(self.src.len());
      } else {
        break;
      }
    }
  }

  fn at_end(&mut self) -> bool {
    self.trivia();
    self.pos >= self.src.len()
  }

  fn peek_punct(&mut self) -> Option<&'static str> {
    self.trivia();
    let r = self.rest();
    let p = PUNCTUATORS.iter().copied().find(|p| r.starts_with(p))?;
    // `cond?.5:1` is a ternary, not optional chaining
    if p == "?." && r[2..].starts_with(|c: char| c.is_ascii_digit()) {
      return Some("?");
    }
    Some(p)
  }

  fn is_punct(&mut self, p: &str) -> bool {
    self.peek_punct() == Some(p)
  }

  fn eat(&mut self, p: &str) -> bool {
    if self.is_punct(p) {
      self.pos += p.len();
      true
    } else {
      false
    }
  }

  fn expect(&mut self, p: &str) -> ParseResult<()> {
    if self.eat(p) {
      Ok(())
    } else {
      Err(self.error(format!("expected '{p}'")))
    }
  }

  fn peek_ident(&mut self) -> Option<&'a str> {
    self.trivia();
    let r = self.rest();
    let mut chars = r.char_indices();
    let (_, first) = chars.next()?;
    if !is_ident_start(first) {
      return None;
    }
    let end = chars.find(|(_, c)| !is_ident_part(*c)).map(|(i, _)| i).unwrap_or(r.len());
    Some(&r[..end])
  }

  fn eat_keyword(&mut self, kw: &str) -> bool {
    if self.peek_ident() == Some(kw) {
      self.pos += kw.len();
      true
    } else {
      false
    }
  }

  fn ident(&mut self) -> ParseResult<String> {
    match self.peek_ident() {
      Some(id) if !is_reserved(id) => {
        self.pos += id.len();
        Ok(id.to_string())
      }
      Some(id) => Err(self.error(format!("unexpected keyword '{id}'"))),
      None => Err(self.error("expected identifier")),
    }
  }

  /// Property names may be reserved words (`obj.default`).
  fn property_name(&mut self) -> ParseResult<String> {
    match self.peek_ident() {
      Some(id) => {
        self.pos += id.len();
        Ok(id.to_string())
      }
      None => Err(self.error("expected property name")),
    }
  }

  fn property_key(&mut self) -> ParseResult<String> {
    self.trivia();
    match self.peek() {
      Some('"') | Some('\'') => self.string_literal(),
      Some(c) if c.is_ascii_digit() => match self.number()? {
        Expr::Num(n) => Ok(super::sandbox::number_to_string(n)),
        _ => Err(self.error("expected property key")),
      },
      _ => self.property_name(),
    }
  }

  // --- module level ---

  fn program(&mut self) -> ParseResult<Program> {
    let mut program = Program::default();
    while !self.at_end() {
      if self.eat_keyword("import") {
        self.skip_import()?;
      } else if self.eat_keyword("export") {
        self.export(&mut program)?;
      } else {
        let stmt = self.statement()?;
        program.body.push(stmt);
      }
    }
    Ok(program)
  }

  /// `import x from 'y'`, `import { a } from "y"`, `import 'y'`: everything up to the module string.
  fn skip_import(&mut self) -> ParseResult<()> {
    loop {
      self.trivia();
      match self.peek() {
        Some('\'') | Some('"') => {
          self.string_literal()?;
          self.eat(";");
          return Ok(());
        }
        Some(c) => self.pos += c.len_utf8(),
        None => return Err(self.error("unterminated import declaration")),
      }
    }
  }

  fn export(&mut self, program: &mut Program) -> ParseResult<()> {
    if self.eat_keyword("default") {
      if self.peek_ident() == Some("function") {
        let def = self.function_def()?;
        match def.name.clone() {
          Some(name) => {
            program.body.push(Stmt::Function(def));
            program.default_export = Some(Expr::Ident(name));
          }
          None => program.default_export = Some(Expr::Function(def)),
        }
      } else {
        let expr = self.assignment()?;
        self.eat(";");
        program.default_export = Some(expr);
      }
      return Ok(());
    }

    if self.eat("{") {
      loop {
        if self.eat("}") {
          break;
        }
        let local = self.ident()?;
        if self.eat_keyword("as") && self.property_name()? == "default" {
          program.default_export = Some(Expr::Ident(local));
        }
        if !self.eat(",") {
          self.expect("}")?;
          break;
        }
      }
      self.eat(";");
      return Ok(());
    }

    let stmt = self.statement()?;
    program.body.push(stmt);
    Ok(())
  }

  // --- statements ---

  fn statement(&mut self) -> ParseResult<Stmt> {
    self.enter()?;
    let stmt = self.statement_inner();
    self.depth -= 1;
    stmt
  }

  fn statement_inner(&mut self) -> ParseResult<Stmt> {
    if self.eat(";") {
      return Ok(Stmt::Block(vec![]));
    }
    if self.eat("{") {
      return Ok(Stmt::Block(self.block_body()?));
    }
    match self.peek_ident() {
      Some("function") => Ok(Stmt::Function(self.function_def()?)),
      Some(kw @ ("const" | "let" | "var")) => {
        self.pos += kw.len();
        let mut bindings = vec![];
        loop {
          bindings.push(self.binding()?);
          if !self.eat(",") {
            break;
          }
        }
        self.eat(";");
        Ok(Stmt::Let { bindings, mutable: kw != "const" })
      }
      Some("return") => {
        self.pos += "return".len();
        if self.eat(";") || self.is_punct("}") || self.at_end() {
          return Ok(Stmt::Return(None));
        }
        let value = self.expression()?;
        self.eat(";");
        Ok(Stmt::Return(Some(value)))
      }
      Some("if") => {
        self.pos += "if".len();
        self.expect("(")?;
        let test = self.expression()?;
        self.expect(")")?;
        let consequent = self.branch()?;
        let alternate = if self.eat_keyword("else") { Some(self.branch()?) } else { None };
        Ok(Stmt::If { test, consequent, alternate })
      }
      Some("for") => {
        self.pos += "for".len();
        self.for_statement()
      }
      Some("while") => {
        self.pos += "while".len();
        self.expect("(")?;
        let test = self.expression()?;
        self.expect(")")?;
        let body = self.branch()?;
        Ok(Stmt::While { test, body, test_first: true })
      }
      Some("do") => {
        self.pos += "do".len();
        let body = self.branch()?;
        if !self.eat_keyword("while") {
          return Err(self.error("expected 'while' after 'do' body"));
        }
        self.expect("(")?;
        let test = self.expression()?;
        self.expect(")")?;
        self.eat(";");
        Ok(Stmt::While { test, body, test_first: false })
      }
      Some("switch") => {
        self.pos += "switch".len();
        self.switch_statement()
      }
      Some(kw @ ("break" | "continue")) => {
        self.pos += kw.len();
        let line_ends = self.is_line_break_ahead();
        if !line_ends && self.peek_ident().is_some_and(|label| !is_reserved(label)) {
          return Err(self.unsupported("labelled 'break'/'continue'"));
        }
        self.eat(";");
        Ok(if kw == "break" { Stmt::Break } else { Stmt::Continue })
      }
      Some(kw @ ("class" | "try" | "throw")) => Err(self.unsupported(format!("'{kw}' statements"))),
      _ => {
        let expr = self.expression()?;
        self.eat(";");
        Ok(Stmt::Expr(expr))
      }
    }
  }

  /// After `for`: the classic three-clause form or `for (const x of xs)`.
  fn for_statement(&mut self) -> ParseResult<Stmt> {
    self.expect("(")?;
    let init = match self.peek_ident() {
      Some(kw @ ("const" | "let" | "var")) => {
        self.pos += kw.len();
        let mutable = kw != "const";
        let target = self.pattern()?;
        if self.eat_keyword("of") {
          let iterable = self.expression()?;
          self.expect(")")?;
          let body = self.branch()?;
          return Ok(Stmt::ForOf { target, mutable, iterable, body });
        }
        if self.peek_ident() == Some("in") {
          return Err(self.unsupported("'for...in' loops"));
        }
        let first = if self.eat("=") { Some(self.assignment()?) } else { None };
        let mut bindings = vec![Binding { target, init: first }];
        while self.eat(",") {
          bindings.push(self.binding()?);
        }
        Some(Box::new(Stmt::Let { bindings, mutable }))
      }
      _ if self.is_punct(";") => None,
      _ => Some(Box::new(Stmt::Expr(self.expression()?))),
    };
    self.expect(";")?;
    let test = if self.is_punct(";") { None } else { Some(self.expression()?) };
    self.expect(";")?;
    let update = if self.is_punct(")") { None } else { Some(self.expression()?) };
    self.expect(")")?;
    let body = self.branch()?;
    Ok(Stmt::For { init, test, update, body })
  }

  /// After `switch`: discriminant and the `case`/`default` clauses.
  fn switch_statement(&mut self) -> ParseResult<Stmt> {
    self.expect("(")?;
    let discriminant = self.expression()?;
    self.expect(")")?;
    self.expect("{")?;
    let mut cases = vec![];
    let mut seen_default = false;
    loop {
      if self.eat("}") {
        return Ok(Stmt::Switch { discriminant, cases });
      }
      let test = if self.eat_keyword("case") {
        Some(self.expression()?)
      } else if self.eat_keyword("default") {
        if seen_default {
          return Err(self.error("more than one 'default' clause in switch statement"));
        }
        seen_default = true;
        None
      } else {
        return Err(self.error("expected 'case' or 'default'"));
      };
      self.expect(":")?;
      let mut body = vec![];
      while !matches!(self.peek_ident(), Some("case" | "default")) && !self.is_punct("}") {
        if self.at_end() {
          return Err(self.error("expected '}'"));
        }
        body.push(self.statement()?);
      }
      cases.push(SwitchCase { test, body });
    }
  }

  /// A newline before the next token ends `break`/`continue` (no label).
  fn is_line_break_ahead(&self) -> bool {
    let r = self.rest();
    let gap = r.len() - r.trim_start().len();
    r[..gap].contains('\n')
  }

  fn branch(&mut self) -> ParseResult<Vec<Stmt>> {
    if self.eat("{") {
      self.block_body()
    } else {
      Ok(vec![self.statement()?])
    }
  }

  /// Statements up to and including the closing `}`.
  fn block_body(&mut self) -> ParseResult<Vec<Stmt>> {
    let mut body = vec![];
    loop {
      if self.eat("}") {
        return Ok(body);
      }
      if self.at_end() {
        return Err(self.error("expected '}'"));
      }
      body.push(self.statement()?);
    }
  }

  fn function_def(&mut self) -> ParseResult<Rc<FunctionDef>> {
    self.eat_keyword("function");
    let name = match self.peek_ident() {
      Some(id) if !is_reserved(id) => {
        self.pos += id.len();
        Some(id.to_string())
      }
      _ => None,
    };
    self.expect("(")?;
    let params = self.params()?;
    self.expect("{")?;
    let body = self.block_body()?;
    Ok(Rc::new(FunctionDef { name, params, body: FunctionBody::Block(body) }))
  }

  /// Parameter list after `(`, consuming the closing `)`.
  fn params(&mut self) -> ParseResult<Vec<Binding>> {
    let mut params = vec![];
    loop {
      if self.eat(")") {
        return Ok(params);
      }
      params.push(self.binding()?);
      if !self.eat(",") {
        self.expect(")")?;
        return Ok(params);
      }
    }
  }

  fn binding(&mut self) -> ParseResult<Binding> {
    let target = self.pattern()?;
    let init = if self.eat("=") { Some(self.assignment()?) } else { None };
    Ok(Binding { target, init })
  }

  fn pattern(&mut self) -> ParseResult<Pattern> {
    if self.eat("[") {
      let mut items = vec![];
      loop {
        if self.eat("]") {
          break;
        }
        if self.eat(",") {
          items.push(None);
          continue;
        }
        items.push(Some(self.binding()?));
        if !self.eat(",") {
          self.expect("]")?;
          break;
        }
      }
      return Ok(Pattern::Array(items));
    }
    if self.eat("{") {
      let mut props = vec![];
      loop {
        if self.eat("}") {
          break;
        }
        let key = self.property_key()?;
        let binding = if self.eat(":") {
          self.binding()?
        } else {
          let init = if self.eat("=") { Some(self.assignment()?) } else { None };
          Binding { target: Pattern::Ident(key.clone()), init }
        };
        props.push((key, binding));
        if !self.eat(",") {
          self.expect("}")?;
          break;
        }
      }
      return Ok(Pattern::Object(props));
    }
    Ok(Pattern::Ident(self.ident()?))
  }

  // --- expressions ---

  fn expression(&mut self) -> ParseResult<Expr> {
    self.assignment()
  }

  fn assignment(&mut self) -> ParseResult<Expr> {
    self.enter()?;
    let expr = self.assignment_inner();
    self.depth -= 1;
    expr
  }

  fn assignment_inner(&mut self) -> ParseResult<Expr> {
    if let Some(arrow) = self.try_arrow()? {
      return Ok(arrow);
    }
    let left = self.conditional()?;
    let Some(p) = self.peek_punct() else { return Ok(left) };
    let op = match p {
      "=" => AssignOp::Set,
      "+=" => AssignOp::Add,
      "-=" => AssignOp::Sub,
      "*=" => AssignOp::Mul,
      "/=" => AssignOp::Div,
      _ => return Ok(left),
    };
    if !matches!(left, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }) {
      return Err(self.error("invalid assignment target"));
    }
    self.pos += p.len();
    let value = self.assignment()?;
    Ok(Expr::Assign { op, target: Box::new(left), value: Box::new(value) })
  }

  /// Arrow functions need lookahead: `x =>` or a parameter list followed by `=>`.
  fn try_arrow(&mut self) -> ParseResult<Option<Expr>> {
    let start = self.pos;
    if let Some(id) = self.peek_ident() {
      if is_reserved(id) {
        return Ok(None);
      }
      self.pos += id.len();
      if self.eat("=>") {
        let params = vec![Binding { target: Pattern::Ident(id.to_string()), init: None }];
        return self.arrow_body(params).map(Some);
      }
      self.pos = start;
      return Ok(None);
    }
    if self.eat("(") {
      if let Ok(params) = self.params() {
        if self.eat("=>") {
          return self.arrow_body(params).map(Some);
        }
      }
      self.pos = start;
    }
    Ok(None)
  }

  fn arrow_body(&mut self, params: Vec<Binding>) -> ParseResult<Expr> {
    let body = if self.eat("{") {
      FunctionBody::Block(self.block_body()?)
    } else {
      FunctionBody::Expr(self.assignment()?)
    };
    Ok(Expr::Function(Rc::new(FunctionDef { name: None, params, body })))
  }

  fn conditional(&mut self) -> ParseResult<Expr> {
    let test = self.binary(1)?;
    if self.eat("?") {
      let consequent = self.assignment()?;
      self.expect(":")?;
      let alternate = self.assignment()?;
      return Ok(Expr::Conditional {
        test: Box::new(test),
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
      });
    }
    Ok(test)
  }

  /// Precedence climbing over binary and logical operators.
  fn binary(&mut self, min_prec: u8) -> ParseResult<Expr> {
    let mut left = self.unary()?;
    loop {
      let Some(p) = self.peek_punct() else { break };
      let Some((prec, kind)) = binary_operator(p) else { break };
      if prec < min_prec {
        break;
      }
      self.pos += p.len();
      // `**` is right-associative
      let next_min = if p == "**" { prec } else { prec + 1 };
      let right = self.binary(next_min)?;
      left = match kind {
        OpKind::Logical(op) => Expr::Logical { op, left: Box::new(left), right: Box::new(right) },
        OpKind::Binary(op) => Expr::Binary { op, left: Box::new(left), right: Box::new(right) },
      };
    }
    Ok(left)
  }

  fn unary(&mut self) -> ParseResult<Expr> {
    self.enter()?;
    let expr = self.unary_inner();
    self.depth -= 1;
    expr
  }

  fn unary_inner(&mut self) -> ParseResult<Expr> {
    let op = match self.peek_punct() {
      Some("!") => Some(UnaryOp::Not),
      Some("-") => Some(UnaryOp::Neg),
      Some("+") => Some(UnaryOp::Plus),
      Some(p @ ("++" | "--")) => {
        self.pos += 2;
        let target = self.unary()?;
        let delta = if p == "++" { 1.0 } else { -1.0 };
        return Ok(Expr::Update { target: Box::new(target), delta, prefix: true });
      }
      _ => None,
    };
    if let Some(op) = op {
      self.pos += 1;
      let expr = self.unary()?;
      return Ok(Expr::Unary { op, expr: Box::new(expr) });
    }
    if self.eat_keyword("typeof") {
      let expr = self.unary()?;
      return Ok(Expr::Unary { op: UnaryOp::TypeOf, expr: Box::new(expr) });
    }
    self.postfix()
  }

  fn postfix(&mut self) -> ParseResult<Expr> {
    let mut expr = self.primary()?;
    loop {
      match self.peek_punct() {
        Some(".") => {
          self.pos += 1;
          let property = self.property_name()?;
          expr = Expr::Member { object: Box::new(expr), property, optional: false };
        }
        Some("?.") => {
          self.pos += 2;
          if self.eat("(") {
            let args = self.arguments()?;
            expr = Expr::Call { callee: Box::new(expr), args, optional: true };
          } else if self.eat("[") {
            let index = self.expression()?;
            self.expect("]")?;
            expr = Expr::Index { object: Box::new(expr), index: Box::new(index), optional: true };
          } else {
            let property = self.property_name()?;
            expr = Expr::Member { object: Box::new(expr), property, optional: true };
          }
        }
        Some("[") => {
          self.pos += 1;
          let index = self.expression()?;
          self.expect("]")?;
          expr = Expr::Index { object: Box::new(expr), index: Box::new(index), optional: false };
        }
        Some("(") => {
          self.pos += 1;
          let args = self.arguments()?;
          expr = Expr::Call { callee: Box::new(expr), args, optional: false };
        }
        Some(p @ ("++" | "--")) => {
          self.pos += 2;
          let delta = if p == "++" { 1.0 } else { -1.0 };
          return Ok(Expr::Update { target: Box::new(expr), delta, prefix: false });
        }
        _ => return Ok(expr),
      }
    }
  }

  /// Call arguments after `(`, consuming the closing `)`.
  fn arguments(&mut self) -> ParseResult<Vec<ArrayItem>> {
    let mut args = vec![];
    loop {
      if self.eat(")") {
        return Ok(args);
      }
      if self.eat("...") {
        args.push(ArrayItem::Spread(self.assignment()?));
      } else {
        args.push(ArrayItem::Item(self.assignment()?));
      }
      if !self.eat(",") {
        self.expect(")")?;
        return Ok(args);
      }
    }
  }

  fn primary(&mut self) -> ParseResult<Expr> {
    self.trivia();
    let Some(c) = self.peek() else { return Err(self.error("unexpected end of input")) };
    match c {
      '0'..='9' => return self.number(),
      '"' | '\'' => return self.string_literal().map(Expr::Str),
      '`' => return self.template(),
      '<' => return self.jsx().map(|el| Expr::Jsx(Rc::new(el))),
      '(' => {
        self.pos += 1;
        let expr = self.expression()?;
        self.expect(")")?;
        return Ok(expr);
      }
      '[' => {
        self.pos += 1;
        return self.array_literal();
      }
      '{' => {
        self.pos += 1;
        return self.object_literal();
      }
      _ => {}
    }
    if let Some(id) = self.peek_ident() {
      let literal = match id {
        "true" => Some(Expr::Bool(true)),
        "false" => Some(Expr::Bool(false)),
        "null" => Some(Expr::Null),
        "undefined" => Some(Expr::Undefined),
        _ => None,
      };
      if let Some(lit) = literal {
        self.pos += id.len();
        return Ok(lit);
      }
      if id == "function" {
        return self.function_def().map(Expr::Function);
      }
      if matches!(id, "new" | "this" | "class" | "async" | "await" | "yield" | "delete" | "void") {
        return Err(self.unsupported(format!("'{id}' expressions")));
      }
      if is_reserved(id) {
        return Err(self.error(format!("unexpected keyword '{id}'")));
      }
      self.pos += id.len();
      return Ok(Expr::Ident(id.to_string()));
    }
    Err(self.error(format!("unexpected character '{c}'")))
  }

  fn array_literal(&mut self) -> ParseResult<Expr> {
    let mut items = vec![];
    loop {
      if self.eat("]") {
        return Ok(Expr::Array(items));
      }
      if self.eat("...") {
        items.push(ArrayItem::Spread(self.assignment()?));
      } else {
        items.push(ArrayItem::Item(self.assignment()?));
      }
      if !self.eat(",") {
        self.expect("]")?;
        return Ok(Expr::Array(items));
      }
    }
  }

  fn object_literal(&mut self) -> ParseResult<Expr> {
    let mut props = vec![];
    loop {
      if self.eat("}") {
        return Ok(Expr::Object(props));
      }
      if self.eat("...") {
        props.push(PropDef::Spread(self.assignment()?));
      } else {
        let key = self.property_key()?;
        if self.eat(":") {
          props.push(PropDef::KeyValue(key, self.assignment()?));
        } else if self.eat("(") {
          // method shorthand `name() { ... }`
          let params = self.params()?;
          self.expect("{")?;
          let body = self.block_body()?;
          let def = FunctionDef { name: Some(key.clone()), params, body: FunctionBody::Block(body) };
          props.push(PropDef::KeyValue(key, Expr::Function(Rc::new(def))));
        } else {
          props.push(PropDef::KeyValue(key.clone(), Expr::Ident(key)));
        }
      }
      if !self.eat(",") {
        self.expect("}")?;
        return Ok(Expr::Object(props));
      }
    }
  }

  // --- literals ---

  fn number(&mut self) -> ParseResult<Expr> {
    let r = self.rest();
    if r.starts_with("0x") || r.starts_with("0X") {
      let digits: String = r[2..].chars().take_while(|c| c.is_ascii_hexdigit()).collect();
      let value = u64::from_str_radix(&digits, 16).map_err(|_| self.error("invalid hex literal"))?;
      self.pos += 2 + digits.len();
      return Ok(Expr::Num(value as f64));
    }
    let bytes = r.as_bytes();
    let digits_from = |mut i: usize| {
      while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'_') {
        i += 1;
      }
      i
    };
    let mut end = digits_from(0);
    if bytes.get(end) == Some(&b'.') && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
      end = digits_from(end + 1);
    }
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
      let mut j = end + 1;
      if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
        j += 1;
      }
      if bytes.get(j).is_some_and(u8::is_ascii_digit) {
        end = digits_from(j);
      }
    }
    let text: String = r[..end].chars().filter(|c| *c != '_').collect();
    let value = text.parse::<f64>().map_err(|_| self.error("invalid number literal"))?;
    self.pos += end;
    Ok(Expr::Num(value))
  }

  fn string_literal(&mut self) -> ParseResult<String> {
    let Some(quote) = self.peek() else { return Err(self.error("expected string")) };
    self.pos += 1;
    let mut out = String::new();
    loop {
      let Some(c) = self.peek() else { return Err(self.error("unterminated string literal")) };
      self.pos += c.len_utf8();
      match c {
        '\n' => return Err(self.error("unterminated string literal")),
        '\\' => out.push(self.escape()?),
        c if c == quote => return Ok(out),
        c => out.push(c),
      }
    }
  }

  fn escape(&mut self) -> ParseResult<char> {
    let Some(c) = self.peek() else { return Err(self.error("unterminated escape")) };
    self.pos += c.len_utf8();
    let simple = match c {
      'n' => Some('\n'),
      't' => Some('\t'),
      'r' => Some('\r'),
      '0' => Some('\0'),
      'b' => Some('\u{8}'),
      'f' => Some('\u{c}'),
      'v' => Some('\u{b}'),
      'x' | 'u' => None,
      other => Some(other),
    };
    if let Some(ch) = simple {
      return Ok(ch);
    }
    let r = self.rest();
    let (hex, consumed) = if c == 'u' && r.starts_with('{') {
      let close = r.find('}').ok_or_else(|| self.error("invalid unicode escape"))?;
      (&r[1..close], close + 1)
    } else {
      let len = if c == 'x' { 2 } else { 4 };
      if r.len() < len || !r.is_char_boundary(len) {
        return Err(self.error("invalid escape sequence"));
      }
      (&r[..len], len)
    };
    let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid escape sequence"))?;
    self.pos += consumed;
    char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
  }

  fn template(&mut self) -> ParseResult<Expr> {
    self.pos += 1;
    let mut parts = vec![];
    let mut current = String::new();
    loop {
      let r = self.rest();
      if r.starts_with("${") {
        self.pos += 2;
        if !current.is_empty() {
          parts.push(TemplatePart::Str(std::mem::take(&mut current)));
        }
        let expr = self.expression()?;
        self.expect("}")?;
        parts.push(TemplatePart::Expr(expr));
        continue;
      }
      let Some(c) = self.peek() else { return Err(self.error("unterminated template literal")) };
      self.pos += c.len_utf8();
      match c {
        '`' => break,
        '\\' => current.push(self.escape()?),
        c => current.push(c),
      }
    }
    if !current.is_empty() {
      parts.push(TemplatePart::Str(current));
    }
    Ok(Expr::Template(parts))
  }

  // --- JSX ---

  /// Element starting at `<`.
  fn jsx(&mut self) -> ParseResult<JsxElement> {
    self.enter()?;
    let el = self.jsx_inner();
    self.depth -= 1;
    el
  }

  fn jsx_inner(&mut self) -> ParseResult<JsxElement> {
    self.pos += 1;
    self.trivia();
    if self.peek() == Some('>') {
      self.pos += 1;
      let children = self.jsx_children("")?;
      return Ok(JsxElement { name: JsxName::Fragment, attrs: vec![], children });
    }

    let raw = self.jsx_name()?;
    let name = jsx_name_kind(&raw);
    let mut attrs = vec![];
    loop {
      self.trivia();
      let r = self.rest();
      if r.starts_with("/>") {
        self.pos += 2;
        return Ok(JsxElement { name, attrs, children: vec![] });
      }
      if r.starts_with('>') {
        self.pos += 1;
        let children = self.jsx_children(&raw)?;
        return Ok(JsxElement { name, attrs, children });
      }
      if r.starts_with('{') {
        self.pos += 1;
        self.expect("...")?;
        let expr = self.assignment()?;
        self.expect("}")?;
        attrs.push(JsxAttr::Spread(expr));
        continue;
      }
      if r.is_empty() {
        return Err(self.error("unterminated JSX element"));
      }

      let attr = self.jsx_name()?;
      self.trivia();
      let value = if self.rest().starts_with('=') {
        self.pos += 1;
        self.trivia();
        match self.peek() {
          Some(q @ ('"' | '\'')) => Some(Expr::Str(self.jsx_attr_string(q)?)),
          Some('{') => {
            self.pos += 1;
            let expr = self.assignment()?;
            self.expect("}")?;
            Some(expr)
          }
          Some('<') => Some(Expr::Jsx(Rc::new(self.jsx()?))),
          _ => return Err(self.error("expected JSX attribute value")),
        }
      } else {
        None
      };
      attrs.push(JsxAttr::Named { name: attr, value });
    }
  }

  fn jsx_name(&mut self) -> ParseResult<String> {
    self.trivia();
    let r = self.rest();
    let end = r
      .char_indices()
      .find(|(_, c)| !(is_ident_part(*c) || matches!(c, '-' | '.' | ':')))
      .map(|(i, _)| i)
      .unwrap_or(r.len());
    if end == 0 {
      return Err(self.error("expected JSX name"));
    }
    self.pos += end;
    Ok(r[..end].to_string())
  }

  fn jsx_attr_string(&mut self, quote: char) -> ParseResult<String> {
    self.pos += 1;
    let r = self.rest();
    let end = r.find(quote).ok_or_else(|| self.error("unterminated JSX attribute string"))?;
    self.pos += end + 1;
    Ok(decode_entities(&r[..end]))
  }

  /// Children up to and including the closing tag `</closing>`.
  fn jsx_children(&mut self, closing: &str) -> ParseResult<Vec<JsxChild>> {
    let mut children = vec![];
    loop {
      let r = self.rest();
      if r.is_empty() {
        return Err(self.error(format!("unterminated JSX element <{closing}>")));
      }
      if r.starts_with("</") {
        self.pos += 2;
        self.trivia();
        let name = if self.peek() == Some('>') { String::new() } else { self.jsx_name()? };
        self.trivia();
        if self.peek() != Some('>') {
          return Err(self.error("expected '>'"));
        }
        self.pos += 1;
        if name != closing {
          return Err(self.error(format!("expected closing tag </{closing}>, found </{name}>")));
        }
        return Ok(children);
      }
      if r.starts_with('<') {
        let el = self.jsx()?;
        children.push(JsxChild::Expr(Expr::Jsx(Rc::new(el))));
        continue;
      }
      if r.starts_with('{') {
        self.pos += 1;
        self.trivia();
        // `{/* comment */}`
        if self.peek() == Some('}') {
          self.pos += 1;
          continue;
        }
        let expr = self.assignment()?;
        self.expect("}")?;
        children.push(JsxChild::Expr(expr));
        continue;
      }
      let end = r.find(['<', '{']).unwrap_or(r.len());
      self.pos += end;
      let text = clean_jsx_text(&r[..end]);
      if !text.is_empty() {
        children.push(JsxChild::Text(decode_entities(&text)));
      }
    }
  }
}

enum OpKind {
  Binary(BinaryOp),
  Logical(LogicalOp),
}

fn binary_operator(p: &str) -> Option<(u8, OpKind)> {
  use BinaryOp::*;
  let entry = match p {
    "??" => (1, OpKind::Logical(LogicalOp::Nullish)),
    "||" => (2, OpKind::Logical(LogicalOp::Or)),
    "&&" => (3, OpKind::Logical(LogicalOp::And)),
    "===" => (6, OpKind::Binary(StrictEq)),
    "!==" => (6, OpKind::Binary(StrictNe)),
    "==" => (6, OpKind::Binary(LooseEq)),
    "!=" => (6, OpKind::Binary(LooseNe)),
    "<" => (7, OpKind::Binary(Lt)),
    ">" => (7, OpKind::Binary(Gt)),
    "<=" => (7, OpKind::Binary(Le)),
    ">=" => (7, OpKind::Binary(Ge)),
    "+" => (9, OpKind::Binary(Add)),
    "-" => (9, OpKind::Binary(Sub)),
    "*" => (10, OpKind::Binary(Mul)),
    "/" => (10, OpKind::Binary(Div)),
    "%" => (10, OpKind::Binary(Rem)),
    "**" => (11, OpKind::Binary(Pow)),
    _ => return None,
  };
  Some(entry)
}

/// Lower-case and dashed names are host tags; everything else resolves in scope.
fn jsx_name_kind(raw: &str) -> JsxName {
  if raw.contains('.') {
    let mut parts = raw.split('.');
    let first = parts.next().unwrap_or_default();
    let expr = parts.fold(Expr::Ident(first.to_string()), |object, property| Expr::Member {
      object: Box::new(object),
      property: property.to_string(),
      optional: false,
    });
    return JsxName::Component(expr);
  }
  match raw.chars().next() {
    Some(c) if c.is_lowercase() || raw.contains('-') => JsxName::Host(raw.to_string()),
    _ => JsxName::Component(Expr::Ident(raw.to_string())),
  }
}

/// JSX text whitespace rule: lines are trimmed where they touch a line break,
/// blank lines vanish, and the survivors are joined with single spaces.
fn clean_jsx_text(raw: &str) -> String {
  if !raw.contains('\n') {
    return raw.to_string();
  }
  let lines: Vec<&str> = raw.split('\n').collect();
  let last = lines.len() - 1;
  let mut out = String::new();
  for (i, line) in lines.iter().enumerate() {
    let mut s = *line;
    if i != 0 {
      s = s.trim_start();
    }
    if i != last {
      s = s.trim_end();
    }
    if !s.is_empty() {
      if !out.is_empty() {
        out.push(' ');
      }
      out.push_str(s);
    }
  }
  out
}

fn decode_entities(s: &str) -> String {
  if !s.contains('&') {
    return s.to_string();
  }
  let mut out = String::with_capacity(s.len());
  let mut rest = s;
  while let Some(amp) = rest.find('&') {
    out.push_str(&rest[..amp]);
    let tail = &rest[amp..];
    let decoded = tail.find(';').filter(|&semi| semi <= 10).and_then(|semi| {
      let name = &tail[1..semi];
      let ch = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ if name.starts_with("#x") || name.starts_with("#X") => {
          u32::from_str_radix(&name[2..], 16).ok().and_then(char::from_u32)
        }
        _ if name.starts_with('#') => name[1..].parse::<u32>().ok().and_then(char::from_u32),
        _ => None,
      };
      ch.map(|c| (c, semi + 1))
    });
    match decoded {
      Some((c, len)) => {
        out.push(c);
        rest = &tail[len..];
      }
      None => {
        out.push('&');
        rest = &tail[1..];
      }
    }
  }
  out.push_str(rest);
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  const COUNTER: &str = r#"
    import React, { useState } from 'react';

    export default function Counter({ initial = 0, label }) {
      const [count, setCount] = useState(initial);
      return (
        <div className="counter">
          <span>{label}: {count}</span>
          <button onClick={() => setCount(count + 1)}>+</button>
        </div>
      );
    }
  "#;

  #[test]
  fn parses_counter_component_and_marks_default_export() {
    let program = parse_program(COUNTER).unwrap();
    assert_eq!(program.body.len(), 1);
    assert!(matches!(program.default_export, Some(Expr::Ident(ref n)) if n == "Counter"));
    let Stmt::Function(def) = &program.body[0] else { panic!("expected function") };
    assert_eq!(def.params.len(), 1);
    assert!(matches!(def.params[0].target, Pattern::Object(ref props) if props.len() == 2));
  }

  #[test]
  fn arrow_component_export_forms() {
    let program = parse_program("const App = (props) => <p>{props.text}</p>;\nexport default App;").unwrap();
    assert!(matches!(program.default_export, Some(Expr::Ident(ref n)) if n == "App"));

    let program = parse_program("const A = () => <i/>; export { A as default };").unwrap();
    assert!(matches!(program.default_export, Some(Expr::Ident(ref n)) if n == "A"));

    let program = parse_program("export default () => <b>x</b>").unwrap();
    assert!(matches!(program.default_export, Some(Expr::Function(_))));
  }

  #[test]
  fn parenthesized_expression_is_not_an_arrow() {
    let program = parse_program("const x = (1 + 2) * 3;").unwrap();
    let Stmt::Let { bindings, .. } = &program.body[0] else { panic!() };
    assert!(matches!(bindings[0].init, Some(Expr::Binary { op: BinaryOp::Mul, .. })));
  }

  #[test]
  fn syntax_error_reports_position() {
    let err = parse_program("function A() {\n  return <div>oops</span>;\n}").unwrap_err();
    assert_eq!(err.line, 2);
    assert!(err.message.contains("</div>"), "{}", err.message);
  }

  #[test]
  fn loops_and_switch_parse() {
    let src = r#"
      for (let i = 0, j = 2; i < 3; i++) { if (i === j) break; }
      for (const [k, v] of pairs) continue;
      for (;;) { break }
      while (n > 0) n--;
      do { n++ } while (n < 3)
      switch (kind) { case 'a': case 'b': x = 1; break; default: x = 2; }
    "#;
    let program = parse_program(src).unwrap();
    assert!(matches!(program.body[0], Stmt::For { init: Some(_), test: Some(_), update: Some(_), .. }));
    assert!(matches!(program.body[1], Stmt::ForOf { target: Pattern::Array(_), mutable: false, .. }));
    assert!(matches!(program.body[2], Stmt::For { init: None, test: None, update: None, .. }));
    assert!(matches!(program.body[3], Stmt::While { test_first: true, .. }));
    assert!(matches!(program.body[4], Stmt::While { test_first: false, .. }));
    let Stmt::Switch { cases, .. } = &program.body[5] else { panic!("expected switch") };
    assert_eq!(cases.len(), 3);
    assert!(cases[0].body.is_empty());
    assert!(cases[2].test.is_none());
  }

  #[test]
  fn valid_but_unsupported_code_is_a_harness_limitation() {
    for src in ["class A {}", "function A() { try { f() } catch (e) {} }", "const d = new Date();"] {
      let err = parse_program(src).unwrap_err();
      assert_eq!(err.kind, ParseErrorKind::Unsupported, "{src}");
      assert!(err.to_string().starts_with(UNSUPPORTED_PREFIX), "{err}");
    }
    let err = parse_program("switch (x) { default: break; default: break; }").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Syntax);
    assert!(err.to_string().starts_with("SyntaxError"));
  }

  #[test]
  fn jsx_text_whitespace_is_collapsed_across_lines() {
    assert_eq!(clean_jsx_text("\n    Hello\n    world  \n  "), "Hello world");
    assert_eq!(clean_jsx_text("  inline  "), "  inline  ");
    assert_eq!(decode_entities("a &amp; b &#65; &unknown;"), "a & b A &unknown;");
  }

  #[test]
  fn template_and_optional_chaining() {
    let program = parse_program("const s = `Hi ${user?.name ?? 'anon'}!`; const t = ok ?.5 : 1;").unwrap();
    let Stmt::Let { bindings, .. } = &program.body[0] else { panic!() };
    assert!(matches!(bindings[0].init, Some(Expr::Template(ref parts)) if parts.len() == 3));
    let Stmt::Let { bindings, .. } = &program.body[1] else { panic!() };
    assert!(matches!(bindings[0].init, Some(Expr::Conditional { .. })));
  }

  #[test]
  fn deep_nesting_is_rejected_not_overflowed() {
    let src = format!("const x = {}1{};", "(".repeat(500), ")".repeat(500));
    let err = parse_program(&src).unwrap_err();
    assert!(err.message.contains("nesting"));
  }
}
