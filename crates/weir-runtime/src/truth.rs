/// Coerce a rendered expression to a boolean.
///
/// Empty strings, null renderings (`null`, `none`), `false` and any numeric
/// zero (`0`, `-0`, `0.0`) are false. Every other value is true.
pub fn is_truthy(rendered: Option<&str>) -> bool {
  let Some(value) = rendered else {
    return false;
  };

  let value = value.trim();
  if value.is_empty() {
    return false;
  }

  if matches!(value, "false" | "False" | "null" | "none" | "None") {
    return false;
  }

  match value.parse::<f64>() {
    Ok(number) => number != 0.0,
    Err(_) => true,
  }
}
