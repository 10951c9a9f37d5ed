//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values in one pass,
/// so braces inside substituted values are never expanded. Unknown keys are kept as is.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = String::with_capacity(tpl.len());
  let mut rest = tpl;
  while let Some(open) = rest.find('{') {
    out.push_str(&rest[..open]);
    let after = &rest[open + 1..];
    let value = after
      .find('}')
      .and_then(|close| pairs.iter().find(|(k, _)| *k == &after[..close]).map(|(_, v)| (close, *v)));
    match value {
      Some((close, v)) => {
        out.push_str(v);
        rest = &after[close + 1..];
      }
      None => {
        out.push('{');
        rest = after;
      }
    }
  }
  out.push_str(rest);
  out
}

/// Canonical form of a question text for duplicate detection:
/// lowercase, whitespace runs collapsed to a single space, trimmed.
pub fn normalize_question(s: &str) -> String {
  s.split_whitespace()
    .map(|w| w.to_lowercase())
    .collect::<Vec<_>>()
    .join(" ")
}

/// Log-safe truncation for large strings (char boundary aware).
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}

/// "A", "A & B", "A, B & C".
pub fn join_human(items: &[String]) -> String {
  match items {
    [] => String::new(),
    [one] => one.clone(),
    [init @ .., last] => format!("{} & {}", init.join(", "), last),
  }
}

/// Letter label for the i-th option (A, B, C, ...).
pub fn option_label(i: usize) -> String {
  let c = (b'A' + (i % 26) as u8) as char;
  c.to_string()
}

/// Reduce a user supplied file stem to a safe single path component.
pub fn sanitize_file_stem(raw: &str) -> String {
  let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
  let last = last.strip_suffix(".md").unwrap_or(last);
  let cleaned: String = last
    .chars()
    .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
    .collect();
  let cleaned = cleaned.trim_matches('_').to_string();
  if cleaned.is_empty() { "quiz".into() } else { cleaned }
}
