//! Static markup renderer for sandbox element trees.
//!
//! Output matches what a server-side `renderToStaticMarkup` produces for the
//! supported subset: no hydration markers, `className`/`htmlFor` renamed,
//! event handlers and `key`/`ref` dropped, void elements self-closed.

use super::sandbox::{number_to_string, Element, ElementKind, Interpreter, RenderError, RenderResult, Value};

const VOID_ELEMENTS: &[&str] = &[
  "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source", "track", "wbr",
];

/// Style properties that take bare numbers.
const UNITLESS: &[&str] = &[
  "opacity", "zIndex", "fontWeight", "lineHeight", "flex", "flexGrow", "flexShrink", "order", "zoom", "gridRow",
  "gridColumn", "columnCount", "tabSize", "orphans", "widows",
];

/// Render a component invoked with `props`, as if written `<Component {...props} />`.
pub fn render_root(interp: &mut Interpreter, component: &Value, props: Vec<(String, Value)>) -> RenderResult<String> {
  let root = Element { kind: ElementKind::Component(component.clone()), props, children: vec![] };
  let mut out = String::new();
  render_element(interp, &root, &mut out)?;
  Ok(out)
}

fn render_node(interp: &mut Interpreter, node: &Value, out: &mut String) -> RenderResult<()> {
  interp.tick()?;
  match node {
    Value::Undefined | Value::Null | Value::Bool(_) => Ok(()),
    Value::Function(_) | Value::Native(_) => Ok(()),
    Value::Num(n) => {
      out.push_str(&number_to_string(*n));
      Ok(())
    }
    Value::Str(s) => {
      escape_into(s, out);
      Ok(())
    }
    Value::Array(items) => {
      interp.enter_array(items)?;
      let snapshot = items.borrow().clone();
      let result = snapshot.iter().try_for_each(|item| render_node(interp, item, out));
      interp.exit_array();
      result
    }
    Value::Object(entries) => {
      let keys: Vec<String> = entries.borrow().iter().map(|(k, _)| k.clone()).collect();
      Err(RenderError(format!(
        "Objects are not valid as a React child (found: object with keys {{{}}})",
        keys.join(", ")
      )))
    }
    Value::Element(el) => render_element(interp, el, out),
  }
}

fn render_element(interp: &mut Interpreter, el: &Element, out: &mut String) -> RenderResult<()> {
  match &el.kind {
    ElementKind::Fragment => render_children(interp, el, out),
    ElementKind::Component(component) => {
      // depth covers the whole subtree so self-rendering components terminate
      interp.enter_component()?;
      let result = interp
        .call(component, vec![component_props(el)])
        .and_then(|rendered| render_node(interp, &rendered, out));
      interp.exit_component();
      result
    }
    ElementKind::Host(tag) => {
      out.push('<');
      out.push_str(tag);
      for (name, value) in &el.props {
        render_attr(name, value, out);
      }
      if VOID_ELEMENTS.contains(&tag.as_str()) {
        out.push_str("/>");
        return Ok(());
      }
      out.push('>');
      render_children(interp, el, out)?;
      out.push_str("</");
      out.push_str(tag);
      out.push('>');
      Ok(())
    }
  }
}

/// Explicit children win over a `children` prop.
fn render_children(interp: &mut Interpreter, el: &Element, out: &mut String) -> RenderResult<()> {
  if !el.children.is_empty() {
    for child in &el.children {
      render_node(interp, child, out)?;
    }
    return Ok(());
  }
  match el.props.iter().find(|(k, _)| k == "children") {
    Some((_, children)) => render_node(interp, children, out),
    None => Ok(()),
  }
}

fn component_props(el: &Element) -> Value {
  let mut props: Vec<(String, Value)> = el.props.iter().filter(|(k, _)| k != "key" && k != "ref").cloned().collect();
  let children = match el.children.len() {
    0 => None,
    1 => Some(el.children[0].clone()),
    _ => Some(Value::array(el.children.clone())),
  };
  if let Some(children) = children {
    props.retain(|(k, _)| k != "children");
    props.push(("children".into(), children));
  }
  Value::object(props)
}

fn render_attr(name: &str, value: &Value, out: &mut String) {
  if matches!(name, "children" | "key" | "ref" | "dangerouslySetInnerHTML") || is_event_handler(name) {
    return;
  }
  let name = match name {
    "className" => "class",
    "htmlFor" => "for",
    other => other,
  };
  let text = match value {
    Value::Undefined | Value::Null | Value::Function(_) | Value::Native(_) => return,
    Value::Bool(b) if name.starts_with("data-") || name.starts_with("aria-") => b.to_string(),
    Value::Bool(false) => return,
    Value::Bool(true) => String::new(),
    Value::Object(entries) if name == "style" => {
      let css = style_to_css(&entries.borrow());
      if css.is_empty() {
        return;
      }
      css
    }
    other => other.to_js_string(),
  };
  out.push(' ');
  out.push_str(name);
  out.push_str("=\"");
  escape_into(&text, out);
  out.push('"');
}

fn is_event_handler(name: &str) -> bool {
  name.len() > 2 && name.starts_with("on") && name[2..].starts_with(|c: char| c.is_ascii_uppercase())
}

fn style_to_css(entries: &[(String, Value)]) -> String {
  entries
    .iter()
    .filter_map(|(prop, value)| {
      let v = match value {
        Value::Undefined | Value::Null | Value::Bool(_) => return None,
        Value::Str(s) if s.trim().is_empty() => return None,
        Value::Num(n) if *n != 0.0 && !UNITLESS.contains(&prop.as_str()) && !prop.starts_with("--") => {
          format!("{}px", number_to_string(*n))
        }
        other => other.to_js_string().trim().to_string(),
      };
      Some(format!("{}:{}", css_property_name(prop), v))
    })
    .collect::<Vec<_>>()
    .join(";")
}

/// `backgroundColor` -> `background-color`, `WebkitTransition` -> `-webkit-transition`.
fn css_property_name(prop: &str) -> String {
  if prop.starts_with("--") {
    return prop.to_string();
  }
  let mut out = String::with_capacity(prop.len() + 4);
  if prop.starts_with("ms") && prop[2..].starts_with(|c: char| c.is_ascii_uppercase()) {
    out.push('-');
  }
  for c in prop.chars() {
    if c.is_ascii_uppercase() {
      out.push('-');
      out.push(c.to_ascii_lowercase());
    } else {
      out.push(c);
    }
  }
  out
}

fn escape_into(text: &str, out: &mut String) {
  for c in text.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#x27;"),
      c => out.push(c),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::harness::parser::parse_program;
  use crate::harness::sandbox::Limits;

  fn render(src: &str) -> RenderResult<String> {
    let program = parse_program(src).map_err(|e| RenderError(e.to_string()))?;
    let mut interp = Interpreter::new(Limits { step_budget: 100_000, timeout: Duration::from_secs(1) });
    let app = interp.load_module(&program, "App")?.unwrap_or(Value::Undefined);
    render_root(&mut interp, &app, vec![])
  }

  #[test]
  fn renders_attributes_like_static_markup() {
    let html = render(
      r#"export default function App() {
        return <label htmlFor="x" className="field" onClick={() => 1} data-on={true} hidden>
          a &lt; b &amp; "c"
          <input disabled={false} value={3} /><br/>
        </label>;
      }"#,
    )
    .unwrap();
    assert_eq!(
      html,
      r#"<label for="x" class="field" data-on="true" hidden="">a &lt; b &amp; &quot;c&quot;<input value="3"/><br/></label>"#
    );
  }

  #[test]
  fn style_objects_become_css() {
    let html =
      render(r#"export default () => <div style={{ backgroundColor: 'red', marginTop: 4, opacity: 0.5, width: 0 }} />"#)
        .unwrap();
    assert_eq!(html, r#"<div style="background-color:red;margin-top:4px;opacity:0.5;width:0"></div>"#);
  }

  #[test]
  fn nested_components_lists_and_fragments() {
    let html = render(
      r#"
      const Item = ({ label, children }) => <li>{label}{children}</li>;
      function App() {
        const items = ['a', 'b'];
        return (
          <>
            <ul>{items.map((x, i) => <Item key={i} label={x}>!</Item>)}</ul>
            {items.length > 5 && <p>many</p>}
            {null}{undefined}{false}{0}
          </>
        );
      }"#,
    )
    .unwrap();
    assert_eq!(html, "<ul><li>a!</li><li>b!</li></ul>0");
  }

  #[test]
  fn create_element_and_use_state_initial_render() {
    let html = render(
      r#"function App() {
        const [count] = React.useState(() => 2);
        return React.createElement('p', { className: 'c' }, 'Count: ', count);
      }"#,
    )
    .unwrap();
    assert_eq!(html, r#"<p class="c">Count: 2</p>"#);
  }

  #[test]
  fn objects_are_not_valid_children() {
    let err = render("export default () => <div>{{ a: 1 }}</div>").unwrap_err();
    assert!(err.0.starts_with("Objects are not valid as a React child"), "{}", err.0);
  }

  #[test]
  fn self_rendering_component_hits_nesting_limit() {
    let err = render("function App() { return <div><App/></div>; }").unwrap_err();
    assert!(err.0.contains("nesting"), "{}", err.0);
  }
}
