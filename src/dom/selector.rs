//! Minimal CSS selector matching for `querySelector`.
//!
//! Supported: selector lists (`a, b`), descendant (` `) and child (`>`)
//! combinators, type selectors, `*`, `#id`, `.class`, `[attr]` and
//! `[attr=value]`. Anything else (pseudo-classes, sibling combinators) fails to
//! parse and matches nothing.

use super::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrMatch {
    Exists(String),
    Equals(String, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    /// Each alternative is a chain of compounds; the combinator at index `i`
    /// relates compound `i` to compound `i - 1`.
    alternatives: Vec<Vec<(Combinator, Compound)>>,
}

impl Selector {
    pub fn parse(input: &str) -> Option<Self> {
        let alternatives = split_top_level(input, ',')
            .into_iter()
            .map(|part| parse_complex(part.trim()))
            .collect::<Option<Vec<_>>>()?;
        if alternatives.is_empty() {
            return None;
        }
        Some(Self { alternatives })
    }

    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|chain| match_from(doc, node, chain, chain.len() - 1))
    }
}

fn match_from(doc: &Document, node: NodeId, chain: &[(Combinator, Compound)], idx: usize) -> bool {
    let (combinator, compound) = &chain[idx];
    if !matches_compound(doc, node, compound) {
        return false;
    }
    if idx == 0 {
        return true;
    }
    match combinator {
        Combinator::Child => doc
            .parent(node)
            .filter(|&p| doc.is_element(p))
            .is_some_and(|p| match_from(doc, p, chain, idx - 1)),
        Combinator::Descendant => {
            let mut ancestor = doc.parent(node);
            while let Some(a) = ancestor.filter(|&a| doc.is_element(a)) {
                if match_from(doc, a, chain, idx - 1) {
                    return true;
                }
                ancestor = doc.parent(a);
            }
            false
        }
    }
}

fn matches_compound(doc: &Document, node: NodeId, compound: &Compound) -> bool {
    let Some(tag) = doc.tag_name(node) else {
        return false;
    };
    if let Some(ref want) = compound.tag {
        if !want.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(ref id) = compound.id {
        if doc.get_attribute(node, "id") != Some(id.as_str()) {
            return false;
        }
    }
    if !compound.classes.is_empty() {
        let class_attr = doc.get_attribute(node, "class").unwrap_or("");
        let present: Vec<&str> = class_attr.split_whitespace().collect();
        if !compound.classes.iter().all(|c| present.contains(&c.as_str())) {
            return false;
        }
    }
    compound.attrs.iter().all(|attr| match attr {
        AttrMatch::Exists(name) => doc.has_attribute(node, name),
        AttrMatch::Equals(name, value) => doc.get_attribute(node, name) == Some(value.as_str()),
    })
}

/// Split on `sep` outside brackets and quotes.
fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, c) if c == sep && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_complex(input: &str) -> Option<Vec<(Combinator, Compound)>> {
    let chars: Vec<char> = input.chars().collect();
    let mut chain = Vec::new();
    let mut pending = Combinator::Descendant;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '>' {
            if chain.is_empty() {
                return None;
            }
            pending = Combinator::Child;
            i += 1;
            continue;
        }
        let start = i;
        let mut in_brackets = false;
        while i < chars.len() {
            let c = chars[i];
            if c == '[' {
                in_brackets = true;
            } else if c == ']' {
                in_brackets = false;
            } else if !in_brackets && (c.is_whitespace() || c == '>') {
                break;
            }
            i += 1;
        }
        let token: String = chars[start..i].iter().collect();
        chain.push((pending, parse_compound(&token)?));
        pending = Combinator::Descendant;
    }
    // A trailing `>` leaves a dangling combinator.
    if chain.is_empty() || pending == Combinator::Child {
        return None;
    }
    Some(chain)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], i: &mut usize) -> Option<String> {
    let start = *i;
    while *i < chars.len() && is_ident_char(chars[*i]) {
        *i += 1;
    }
    (*i > start).then(|| chars[start..*i].iter().collect())
}

fn parse_compound(token: &str) -> Option<Compound> {
    let chars: Vec<char> = token.chars().collect();
    let mut compound = Compound::default();
    let mut i = 0;
    if chars.first() == Some(&'*') {
        i = 1;
    } else if chars.first().is_some_and(|&c| is_ident_char(c)) {
        compound.tag = Some(read_ident(&chars, &mut i)?.to_ascii_lowercase());
    }
    while i < chars.len() {
        match chars[i] {
            '#' => {
                i += 1;
                compound.id = Some(read_ident(&chars, &mut i)?);
            }
            '.' => {
                i += 1;
                compound.classes.push(read_ident(&chars, &mut i)?);
            }
            '[' => {
                let close = chars[i..].iter().position(|&c| c == ']')? + i;
                let inner: String = chars[i + 1..close].iter().collect();
                compound.attrs.push(parse_attr(&inner)?);
                i = close + 1;
            }
            _ => return None,
        }
    }
    Some(compound)
}

fn parse_attr(inner: &str) -> Option<AttrMatch> {
    match inner.split_once('=') {
        Some((name, value)) => {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            Some(AttrMatch::Equals(name.to_ascii_lowercase(), value.to_string()))
        }
        None => {
            let name = inner.trim();
            (!name.is_empty()).then(|| AttrMatch::Exists(name.to_ascii_lowercase()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Document, NodeId, NodeId) {
        let mut doc = Document::new();
        let list = doc.create_element("ul");
        doc.set_attribute(list, "class", "menu main").unwrap();
        let item = doc.create_element("li");
        doc.set_attribute(item, "id", "first").unwrap();
        doc.set_attribute(item, "data-kind", "entry").unwrap();
        doc.append_child(list, item).unwrap();
        let body = doc.body();
        doc.append_child(body, list).unwrap();
        (doc, list, item)
    }

    #[test]
    fn simple_selectors_match() {
        let (doc, list, item) = tree();
        assert!(Selector::parse("ul").unwrap().matches(&doc, list));
        assert!(Selector::parse("#first").unwrap().matches(&doc, item));
        assert!(Selector::parse(".menu.main").unwrap().matches(&doc, list));
        assert!(Selector::parse("[data-kind=\"entry\"]").unwrap().matches(&doc, item));
        assert!(!Selector::parse(".missing").unwrap().matches(&doc, list));
    }

    #[test]
    fn combinators_walk_ancestors() {
        let (doc, _, item) = tree();
        assert!(Selector::parse("body li").unwrap().matches(&doc, item));
        assert!(Selector::parse("ul > li#first").unwrap().matches(&doc, item));
        assert!(!Selector::parse("body > li").unwrap().matches(&doc, item));
    }

    #[test]
    fn selector_lists_match_any_alternative() {
        let (doc, list, item) = tree();
        let sel = Selector::parse("#nope, li").unwrap();
        assert!(sel.matches(&doc, item));
        assert!(!sel.matches(&doc, list));
    }

    #[test]
    fn unsupported_syntax_does_not_parse() {
        assert!(Selector::parse("li:hover").is_none());
        assert!(Selector::parse("").is_none());
        assert!(Selector::parse("ul >").is_none());
    }
}
