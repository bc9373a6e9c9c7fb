//! Stylesheet model and the shadow-boundary rewriter.
//!
//! Style text is parsed into a flat rule list (font-face, media, style,
//! other). [`patch_css`] projects the rules that must escape a shadow
//! boundary: `@font-face` is hoisted to the host element (fonts do not load
//! from inside a shadow root) and document-level selectors (`:root`, `body`)
//! are rewritten to `:host`.

use std::sync::LazyLock;

use regex::Regex;

use crate::dom::{Document, NodeId};

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)/\*.*?\*/").expect("comment regex is valid")
});

/// One rule of a parsed stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssRule {
    FontFace { declarations: String },
    Media { condition: String, rules: Vec<CssRule> },
    Style { selector: String, declarations: String },
    Other { css_text: String },
}

impl CssRule {
    /// Serialized form, normalized (`name: value;` declarations).
    pub fn css_text(&self) -> String {
        match self {
            Self::FontFace { declarations } => format!("@font-face {{ {declarations} }}"),
            Self::Media { condition, rules } => {
                let inner: Vec<String> = rules.iter().map(CssRule::css_text).collect();
                format!("@media {condition} {{ {} }}", inner.join(" "))
            }
            Self::Style {
                selector,
                declarations,
            } => format!("{selector} {{ {declarations} }}"),
            Self::Other { css_text } => css_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSheet {
    pub rules: Vec<CssRule>,
}

impl StyleSheet {
    /// Parse style text. Malformed trailing input is dropped.
    pub fn parse(source: &str) -> Self {
        let stripped = COMMENT_RE.replace_all(source, "");
        Self {
            rules: parse_rules(&stripped),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn css_text(&self) -> String {
        self.rules
            .iter()
            .map(CssRule::css_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn parse_rules(text: &str) -> Vec<CssRule> {
    let bytes = text.as_bytes();
    let mut rules = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() || bytes[i] == b'}' || bytes[i] == b';' {
            i += 1;
            continue;
        }
        let Some(open) = find_top_level(bytes, i, &[b'{', b';']) else {
            break;
        };
        let prelude = text[i..open].trim();
        if bytes[open] == b';' {
            rules.push(CssRule::Other {
                css_text: format!("{prelude};"),
            });
            i = open + 1;
            continue;
        }
        let Some(close) = find_block_end(bytes, open) else {
            break;
        };
        let body = &text[open + 1..close];
        rules.push(build_rule(prelude, body));
        i = close + 1;
    }
    rules
}

fn build_rule(prelude: &str, body: &str) -> CssRule {
    if let Some(at_rule) = prelude.strip_prefix('@') {
        let (keyword, rest) = at_rule
            .split_once(|c: char| c.is_whitespace())
            .unwrap_or((at_rule, ""));
        return match keyword.to_ascii_lowercase().as_str() {
            "media" => CssRule::Media {
                condition: collapse_whitespace(rest),
                rules: parse_rules(body),
            },
            "font-face" => CssRule::FontFace {
                declarations: normalize_declarations(body),
            },
            _ => CssRule::Other {
                css_text: format!("{} {{ {} }}", collapse_whitespace(prelude), body.trim()),
            },
        };
    }
    CssRule::Style {
        selector: collapse_whitespace(prelude),
        declarations: normalize_declarations(body),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_declarations(body: &str) -> String {
    body.split(';')
        .filter_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            let (name, value) = (name.trim(), collapse_whitespace(value));
            (!name.is_empty()).then(|| format!("{name}: {value};"))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Position of the first byte in `stops` at nesting depth zero, skipping
/// quoted strings.
fn find_top_level(bytes: &[u8], from: usize, stops: &[u8]) -> Option<usize> {
    let mut quote: Option<u8> = None;
    let mut paren = 0usize;
    for (offset, &b) in bytes[from..].iter().enumerate() {
        match (quote, b) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'(') => paren += 1,
            (None, b')') => paren = paren.saturating_sub(1),
            (None, b) if paren == 0 && stops.contains(&b) => return Some(from + offset),
            _ => {}
        }
    }
    None
}

/// Index of the `}` closing the block opened at `open`.
fn find_block_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (offset, &b) in bytes[open..].iter().enumerate() {
        match (quote, b) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'{') => depth += 1,
            (None, b'}') => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Shadow rewriter
// ---------------------------------------------------------------------------

/// Rewrite `sheet` for the shadow root `boundary`.
///
/// Returns the number of `<style>` nodes inserted. Non-shadow boundaries are
/// ignored. Repeated calls with the same sheet insert nothing new.
pub fn patch_css(doc: &mut Document, boundary: NodeId, sheet: &StyleSheet) -> usize {
    if !doc.is_shadow_root(boundary) {
        return 0;
    }
    patch_rules(doc, boundary, &sheet.rules, None)
}

fn patch_rules(
    doc: &mut Document,
    boundary: NodeId,
    rules: &[CssRule],
    media: Option<&str>,
) -> usize {
    let mut inserted = 0;
    let mut fonts = Vec::new();
    let mut roots = Vec::new();
    for rule in rules {
        match rule {
            CssRule::FontFace { .. } => fonts.push(rule.css_text()),
            CssRule::Media { condition, rules } => {
                inserted += patch_rules(doc, boundary, rules, Some(condition));
            }
            CssRule::Style {
                selector,
                declarations,
            } => {
                if selector.contains(":root") {
                    roots.push(format!(
                        "{} {{ {declarations} }}",
                        selector.replace(":root", ":host")
                    ));
                } else if selector == "body" {
                    roots.push(format!(":host {{ {declarations} }}"));
                }
            }
            CssRule::Other { .. } => {}
        }
    }
    if let Some(host) = doc.shadow_host(boundary) {
        inserted += append_patched_style(doc, host, &fonts, media);
    }
    inserted + append_patched_style(doc, boundary, &roots, media)
}

fn append_patched_style(
    doc: &mut Document,
    dest: NodeId,
    rules: &[String],
    media: Option<&str>,
) -> usize {
    if rules.is_empty() {
        return 0;
    }
    let content = rules.join("\n");
    let text = match media {
        Some(condition) => format!("@media {condition} {{\n {content}\n}}"),
        None => content,
    };
    if find_style(doc, dest, &text).is_some() {
        return 0;
    }
    let style = doc.create_element("style");
    // Fresh nodes cannot fail these writes.
    if doc.set_text_content(style, &text).is_err() || doc.append_child(dest, style).is_err() {
        return 0;
    }
    1
}

/// A direct `<style>` child of `host` whose text equals `text`.
pub fn find_style(doc: &Document, host: NodeId, text: &str) -> Option<NodeId> {
    doc.children(host)
        .iter()
        .copied()
        .find(|&c| doc.is_tag(c, "style") && doc.text_content(c) == text)
}
