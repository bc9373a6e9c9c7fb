//! In-memory host document: the raw primitives the sandbox intercepts.
//!
//! The [`Document`] is an arena of nodes (document, elements, shadow roots,
//! text). Its methods are the *unpatched* DOM operations; the sandbox's hook
//! points call them for every real write so that rerouting never recurses into
//! itself. Asynchronous browser facilities are modelled as queues the host
//! drains: mutation records for observed nodes, `load`/`error` events for
//! links, and custom-element reactions.

pub mod selector;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use url::Url;

use crate::css::StyleSheet;
use crate::error::{DomError, DomResult};
use crate::zone::CallSite;

pub use selector::Selector;

/// A document shared between the sandbox and the hosting environment.
pub type SharedDocument = Arc<Mutex<Document>>;

/// Custom-element lifecycle callback (`connectedCallback` and friends).
pub type LifecycleCallback = Arc<dyn Fn(&CallSite, NodeId) + Send + Sync>;

/// Event listener attached with `addEventListener`.
pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle to a node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowRootMode {
    Open,
    Closed,
}

/// Element payload. Tag and attribute names are stored lowercase.
#[derive(Debug, Clone, Default)]
pub struct ElementData {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub properties: HashMap<String, Value>,
    /// Stylesheet text delivered by the network for a `<link>`.
    pub loaded_css: Option<String>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    ShadowRoot { host: NodeId, mode: ShadowRootMode },
    Text(String),
}

/// Delivered to mutation observers when an observed node's children change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    Load(NodeId),
    Error(NodeId),
}

/// Custom-element reactions queued by connection changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Connected(NodeId),
    Disconnected(NodeId),
}

/// A registered custom element.
#[derive(Clone, Default)]
pub struct CustomElementDefinition {
    pub connected: Option<LifecycleCallback>,
    pub disconnected: Option<LifecycleCallback>,
}

impl fmt::Debug for CustomElementDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomElementDefinition")
            .field("connected", &self.connected.is_some())
            .field("disconnected", &self.disconnected.is_some())
            .finish()
    }
}

/// Result of `getComputedStyle`: the element's declared inline properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputedStyle {
    pub properties: BTreeMap<String, String>,
}

impl ComputedStyle {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// `insertAdjacentElement` positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacentPosition {
    BeforeBegin,
    AfterBegin,
    BeforeEnd,
    AfterEnd,
}

impl std::str::FromStr for AdjacentPosition {
    type Err = DomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beforebegin" => Ok(Self::BeforeBegin),
            "afterbegin" => Ok(Self::AfterBegin),
            "beforeend" => Ok(Self::BeforeEnd),
            "afterend" => Ok(Self::AfterEnd),
            _ => Err(DomError::InvalidPosition {
                position: s.to_string(),
            }),
        }
    }
}

struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    shadow_root: Option<NodeId>,
    listeners: Vec<(String, EventListener)>,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            shadow_root: None,
            listeners: Vec::new(),
        }
    }
}

/// The host document.
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
    html: NodeId,
    head: NodeId,
    body: NodeId,
    base_url: Option<Url>,
    definitions: HashMap<String, CustomElementDefinition>,
    observed: HashSet<NodeId>,
    records: VecDeque<MutationRecord>,
    events: VecDeque<DomEvent>,
    reactions: VecDeque<Reaction>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("node_count", &self.nodes.len())
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("definitions", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create `<html><head></head><body></body></html>`.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: vec![NodeData::new(NodeKind::Document)],
            root: NodeId(0),
            html: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            base_url: None,
            definitions: HashMap::new(),
            observed: HashSet::new(),
            records: VecDeque::new(),
            events: VecDeque::new(),
            reactions: VecDeque::new(),
        };
        doc.html = doc.create_element("html");
        doc.head = doc.create_element("head");
        doc.body = doc.create_element("body");
        let (root, html, head, body) = (doc.root, doc.html, doc.head, doc.body);
        doc.link(root, html, None);
        doc.link(html, head, None);
        doc.link(html, body, None);
        doc
    }

    /// Create a document whose relative URLs resolve against `base`.
    pub fn with_base_url(base: &str) -> Self {
        let mut doc = Self::new();
        doc.base_url = Url::parse(base).ok();
        doc
    }

    pub fn into_shared(self) -> SharedDocument {
        Arc::new(Mutex::new(self))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn document_element(&self) -> NodeId {
        self.html
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    // -----------------------------------------------------------------------
    // Node creation & inspection
    // -----------------------------------------------------------------------

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }))
    }

    pub fn create_text_node(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    pub fn kind(&self, node: NodeId) -> DomResult<&NodeKind> {
        Ok(&self.data(node)?.kind)
    }

    /// Lowercase tag name, `None` for non-elements.
    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        match self.data(node).ok()?.kind {
            NodeKind::Element(ref el) => Some(el.tag.as_str()),
            _ => None,
        }
    }

    pub fn is_tag(&self, node: NodeId, tag: &str) -> bool {
        self.tag_name(node)
            .is_some_and(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.tag_name(node).is_some()
    }

    pub fn is_shadow_root(&self, node: NodeId) -> bool {
        matches!(
            self.data(node).map(|d| &d.kind),
            Ok(NodeKind::ShadowRoot { .. })
        )
    }

    /// The light-DOM element hosting a shadow root.
    pub fn shadow_host(&self, root: NodeId) -> Option<NodeId> {
        match self.data(root).ok()?.kind {
            NodeKind::ShadowRoot { host, .. } => Some(host),
            _ => None,
        }
    }

    /// The element's open shadow root (`element.shadowRoot`).
    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        let root = self.data(host).ok()?.shadow_root?;
        match self.data(root).ok()?.kind {
            NodeKind::ShadowRoot {
                mode: ShadowRootMode::Open,
                ..
            } => Some(root),
            _ => None,
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.data(node).ok()?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.data(node)
            .map(|d| d.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|&c| c == node)?;
        siblings.get(pos + 1).copied()
    }

    /// Whether `node` is attached to the document, crossing shadow boundaries.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.root {
                return true;
            }
            current = match self.data(id) {
                Ok(data) => match data.kind {
                    NodeKind::ShadowRoot { host, .. } => Some(host),
                    _ => data.parent,
                },
                Err(_) => None,
            };
        }
        false
    }

    /// Whether `node` is `ancestor` or one of its descendants (same tree only).
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    // -----------------------------------------------------------------------
    // Attributes, properties, listeners
    // -----------------------------------------------------------------------

    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        let el = self.element(node).ok()?;
        el.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.get_attribute(node, name).is_some()
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> DomResult<()> {
        let name = name.to_ascii_lowercase();
        let el = self.element_mut(node)?;
        match el.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => el.attributes.push((name, value.to_string())),
        }
        Ok(())
    }

    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        self.element(node)
            .map(|el| el.attributes.as_slice())
            .unwrap_or(&[])
    }

    pub fn property(&self, node: NodeId, key: &str) -> Option<&Value> {
        self.element(node).ok()?.properties.get(key)
    }

    pub fn set_property(&mut self, node: NodeId, key: &str, value: Value) -> DomResult<()> {
        self.element_mut(node)?
            .properties
            .insert(key.to_string(), value);
        Ok(())
    }

    pub fn add_event_listener(
        &mut self,
        node: NodeId,
        event: &str,
        listener: EventListener,
    ) -> DomResult<()> {
        self.data_mut(node)?
            .listeners
            .push((event.to_string(), listener));
        Ok(())
    }

    /// Listeners registered for `event`; the caller invokes them after
    /// releasing the document.
    pub fn listeners(&self, node: NodeId, event: &str) -> Vec<EventListener> {
        self.data(node)
            .map(|d| {
                d.listeners
                    .iter()
                    .filter(|(name, _)| name == event)
                    .map(|(_, l)| l.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Text & stylesheets
    // -----------------------------------------------------------------------

    /// Concatenated text of the node's descendants (shadow trees excluded).
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    /// Replace all children with a single text node.
    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> DomResult<()> {
        if let NodeKind::Text(ref mut t) = self.data_mut(node)?.kind {
            *t = text.to_string();
            if let Some(parent) = self.parent(node) {
                self.record_mutation(parent);
            }
            return Ok(());
        }
        let children = self.data(node)?.children.clone();
        for child in children {
            self.detach(child);
        }
        if !text.is_empty() {
            let text_node = self.create_text_node(text);
            self.link(node, text_node, None);
        }
        self.record_mutation(node);
        Ok(())
    }

    /// The stylesheet of a `<style>` (its text) or a loaded `<link>`.
    pub fn sheet(&self, node: NodeId) -> Option<StyleSheet> {
        let el = self.element(node).ok()?;
        match el.tag.as_str() {
            "style" => Some(StyleSheet::parse(&self.text_content(node))),
            "link" => el.loaded_css.as_deref().map(StyleSheet::parse),
            _ => None,
        }
    }

    /// The link's `href`, resolved to an absolute URL when a base is known.
    pub fn href(&self, node: NodeId) -> Option<String> {
        let raw = self.get_attribute(node, "href")?;
        if raw.is_empty() {
            return None;
        }
        Some(self.resolve_url(raw))
    }

    pub fn resolve_url(&self, raw: &str) -> String {
        if let Ok(abs) = Url::parse(raw) {
            return abs.to_string();
        }
        match self.base_url.as_ref().and_then(|base| base.join(raw).ok()) {
            Some(joined) => joined.to_string(),
            None => raw.to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Tree mutation (raw primitives)
    // -----------------------------------------------------------------------

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or at the end when `None`).
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<NodeId> {
        self.validate_insert(parent, child)?;
        if let Some(r) = reference {
            if self.parent(r) != Some(parent) {
                return Err(DomError::NotAChild { parent, child: r });
            }
        }
        self.detach(child);
        self.link(parent, child, reference);
        self.record_mutation(parent);
        if self.is_connected(child) {
            self.queue_reactions(child, true);
        }
        Ok(child)
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        self.data(parent)?;
        if self.data(child)?.parent != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.detach(child);
        Ok(child)
    }

    /// `ChildNode.remove()`: detach from the parent, if any.
    pub fn remove(&mut self, node: NodeId) -> DomResult<()> {
        self.data(node)?;
        self.detach(node);
        Ok(())
    }

    /// `insertAdjacentElement`; `None` when the target has no parent for the
    /// sibling positions.
    pub fn insert_adjacent_element(
        &mut self,
        target: NodeId,
        position: AdjacentPosition,
        element: NodeId,
    ) -> DomResult<Option<NodeId>> {
        match position {
            AdjacentPosition::BeforeBegin => match self.parent(target) {
                Some(parent) => self.insert_before(parent, element, Some(target)).map(Some),
                None => Ok(None),
            },
            AdjacentPosition::AfterBegin => {
                let first = self.children(target).first().copied();
                self.insert_before(target, element, first).map(Some)
            }
            AdjacentPosition::BeforeEnd => self.append_child(target, element).map(Some),
            AdjacentPosition::AfterEnd => match self.parent(target) {
                Some(parent) => {
                    let next = self.next_sibling(target);
                    self.insert_before(parent, element, next).map(Some)
                }
                None => Ok(None),
            },
        }
    }

    pub fn attach_shadow(&mut self, host: NodeId, mode: ShadowRootMode) -> DomResult<NodeId> {
        self.element(host)?;
        if self.data(host)?.shadow_root.is_some() {
            return Err(DomError::ShadowRootExists { host });
        }
        let root = self.push(NodeKind::ShadowRoot { host, mode });
        self.data_mut(host)?.shadow_root = Some(root);
        Ok(root)
    }

    pub fn clone_node(&mut self, node: NodeId, deep: bool) -> DomResult<NodeId> {
        let kind = match self.kind(node)? {
            NodeKind::Element(el) => NodeKind::Element(ElementData {
                tag: el.tag.clone(),
                attributes: el.attributes.clone(),
                ..Default::default()
            }),
            NodeKind::Text(t) => NodeKind::Text(t.clone()),
            NodeKind::Document | NodeKind::ShadowRoot { .. } => {
                return Err(DomError::NotAnElement { node });
            }
        };
        let copy = self.push(kind);
        if deep {
            for child in self.children(node).to_vec() {
                let child_copy = self.clone_node(child, true)?;
                self.link(copy, child_copy, None);
            }
        }
        Ok(copy)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// First descendant of `scope` matching `selector`, in tree order.
    pub fn query_selector(&self, scope: NodeId, selector: &str) -> Option<NodeId> {
        let parsed = Selector::parse(selector)?;
        self.descendants(scope)
            .into_iter()
            .find(|&n| parsed.matches(self, n))
    }

    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> Vec<NodeId> {
        let Some(parsed) = Selector::parse(selector) else {
            return Vec::new();
        };
        self.descendants(scope)
            .into_iter()
            .filter(|&n| parsed.matches(self, n))
            .collect()
    }

    pub fn computed_style(&self, node: NodeId) -> DomResult<ComputedStyle> {
        if self.element(node).is_err() {
            return Err(DomError::ComputedStyle { node });
        }
        let mut properties = BTreeMap::new();
        if let Some(inline) = self.get_attribute(node, "style") {
            for decl in inline.split(';') {
                if let Some((name, value)) = decl.split_once(':') {
                    properties.insert(
                        name.trim().to_ascii_lowercase(),
                        value.trim().to_string(),
                    );
                }
            }
        }
        Ok(ComputedStyle { properties })
    }

    // -----------------------------------------------------------------------
    // Custom elements
    // -----------------------------------------------------------------------

    /// Raw `customElements.define`. Already-connected elements of that tag are
    /// upgraded (a connected reaction is queued for each).
    pub fn define_custom_element(
        &mut self,
        name: &str,
        definition: CustomElementDefinition,
    ) -> DomResult<()> {
        let valid = name.contains('-')
            && name.starts_with(|c: char| c.is_ascii_lowercase())
            && !name.chars().any(|c| c.is_ascii_uppercase());
        if !valid {
            return Err(DomError::InvalidCustomElementName {
                name: name.to_string(),
            });
        }
        if self.definitions.contains_key(name) {
            return Err(DomError::AlreadyDefined {
                name: name.to_string(),
            });
        }
        self.definitions.insert(name.to_string(), definition);
        let upgrades: Vec<NodeId> = self
            .shadow_including_descendants(self.root)
            .into_iter()
            .filter(|&n| self.is_tag(n, name))
            .collect();
        self.reactions
            .extend(upgrades.into_iter().map(Reaction::Connected));
        Ok(())
    }

    pub fn custom_element(&self, name: &str) -> Option<CustomElementDefinition> {
        self.definitions.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions.contains_key(&name.to_ascii_lowercase())
    }

    pub fn take_reactions(&mut self) -> Vec<Reaction> {
        self.reactions.drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Observers & events
    // -----------------------------------------------------------------------

    /// Start a childList mutation observer on `node`.
    pub fn observe(&mut self, node: NodeId) {
        self.observed.insert(node);
    }

    pub fn unobserve(&mut self, node: NodeId) {
        self.observed.remove(&node);
    }

    pub fn is_observed(&self, node: NodeId) -> bool {
        self.observed.contains(&node)
    }

    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        self.records.drain(..).collect()
    }

    /// The network finished loading a `<link>`'s stylesheet.
    pub fn complete_load(&mut self, node: NodeId, css: &str) -> DomResult<()> {
        self.element_mut(node)?.loaded_css = Some(css.to_string());
        self.events.push_back(DomEvent::Load(node));
        Ok(())
    }

    pub fn fail_load(&mut self, node: NodeId) -> DomResult<()> {
        self.element(node)?;
        self.events.push_back(DomEvent::Error(node));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomEvent> {
        self.events.drain(..).collect()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData::new(kind));
        id
    }

    fn data(&self, node: NodeId) -> DomResult<&NodeData> {
        self.nodes
            .get(node.index())
            .ok_or(DomError::UnknownNode { node })
    }

    fn data_mut(&mut self, node: NodeId) -> DomResult<&mut NodeData> {
        self.nodes
            .get_mut(node.index())
            .ok_or(DomError::UnknownNode { node })
    }

    fn element(&self, node: NodeId) -> DomResult<&ElementData> {
        match self.data(node)?.kind {
            NodeKind::Element(ref el) => Ok(el),
            _ => Err(DomError::NotAnElement { node }),
        }
    }

    fn element_mut(&mut self, node: NodeId) -> DomResult<&mut ElementData> {
        match self.data_mut(node)?.kind {
            NodeKind::Element(ref mut el) => Ok(el),
            _ => Err(DomError::NotAnElement { node }),
        }
    }

    fn validate_insert(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        let reject = |reason: &str| DomError::HierarchyRequest {
            parent,
            child,
            reason: reason.to_string(),
        };
        match self.data(parent)?.kind {
            NodeKind::Text(_) => return Err(reject("text nodes cannot have children")),
            _ => {}
        }
        match self.data(child)?.kind {
            NodeKind::Document => return Err(reject("the document cannot be inserted")),
            NodeKind::ShadowRoot { .. } => {
                return Err(reject("a shadow root cannot be inserted"));
            }
            _ => {}
        }
        let mut current = Some(parent);
        while let Some(id) = current {
            if id == child {
                return Err(reject("a node cannot be inserted into itself"));
            }
            current = match self.data(id)?.kind {
                NodeKind::ShadowRoot { host, .. } => Some(host),
                _ => self.parent(id),
            };
        }
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        let pos = reference.and_then(|r| self.children(parent).iter().position(|&c| c == r));
        let parent_data = &mut self.nodes[parent.index()];
        match pos {
            Some(i) => parent_data.children.insert(i, child),
            None => parent_data.children.push(child),
        }
        self.nodes[child.index()].parent = Some(parent);
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.parent(node) else {
            return;
        };
        let was_connected = self.is_connected(node);
        self.nodes[parent.index()].children.retain(|&c| c != node);
        self.nodes[node.index()].parent = None;
        self.record_mutation(parent);
        if was_connected {
            self.queue_reactions(node, false);
        }
    }

    fn record_mutation(&mut self, target: NodeId) {
        if self.observed.contains(&target) {
            self.records.push_back(MutationRecord { target });
        }
    }

    fn queue_reactions(&mut self, subtree: NodeId, connected: bool) {
        let defined: Vec<NodeId> = self
            .shadow_including_descendants(subtree)
            .into_iter()
            .filter(|&n| {
                self.tag_name(n)
                    .is_some_and(|tag| self.definitions.contains_key(tag))
            })
            .collect();
        for node in defined {
            self.reactions.push_back(if connected {
                Reaction::Connected(node)
            } else {
                Reaction::Disconnected(node)
            });
        }
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Ok(data) = self.data(node) else {
            return;
        };
        if let NodeKind::Text(ref t) = data.kind {
            out.push_str(t);
            return;
        }
        for &child in &data.children {
            self.collect_text(child, out);
        }
    }

    /// Descendants of `scope` in tree order, not entering shadow trees.
    fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev());
        }
        out
    }

    /// `node` and its descendants in shadow-including tree order.
    fn shadow_including_descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push(id);
            let Ok(data) = self.data(id) else {
                continue;
            };
            stack.extend(data.children.iter().rev());
            if let Some(root) = data.shadow_root {
                stack.push(root);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style_with(doc: &mut Document, css: &str) -> NodeId {
        let style = doc.create_element("style");
        doc.set_text_content(style, css).unwrap();
        style
    }

    #[test]
    fn new_document_has_head_and_body() {
        let doc = Document::new();
        assert!(doc.is_tag(doc.head(), "HEAD"));
        assert!(doc.is_tag(doc.body(), "body"));
        assert!(doc.is_connected(doc.body()));
        assert_eq!(doc.parent(doc.head()), Some(doc.document_element()));
    }

    #[test]
    fn append_moves_node_between_parents() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let (head, body) = (doc.head(), doc.body());
        doc.append_child(body, div).unwrap();
        doc.append_child(head, div).unwrap();
        assert!(doc.children(body).is_empty());
        assert_eq!(doc.children(head), &[div]);
    }

    #[test]
    fn remove_child_requires_ownership() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let body = doc.body();
        doc.append_child(body, div).unwrap();
        let err = doc.remove_child(doc.head(), div).unwrap_err();
        assert!(matches!(err, DomError::NotAChild { .. }));
        doc.remove_child(body, div).unwrap();
        assert!(!doc.is_connected(div));
    }

    #[test]
    fn cannot_insert_ancestor_into_descendant() {
        let mut doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("div");
        doc.append_child(outer, inner).unwrap();
        let err = doc.append_child(inner, outer).unwrap_err();
        assert!(matches!(err, DomError::HierarchyRequest { .. }));
    }

    #[test]
    fn shadow_tree_is_connected_through_its_host() {
        let mut doc = Document::new();
        let host = doc.create_element("module-cube");
        let root = doc.attach_shadow(host, ShadowRootMode::Open).unwrap();
        let style = style_with(&mut doc, "a { color: red; }");
        doc.append_child(root, style).unwrap();
        assert!(!doc.is_connected(style));
        let body = doc.body();
        doc.append_child(body, host).unwrap();
        assert!(doc.is_connected(style));
        assert_eq!(doc.shadow_root(host), Some(root));
        assert_eq!(doc.shadow_host(root), Some(host));
        assert!(matches!(
            doc.attach_shadow(host, ShadowRootMode::Open),
            Err(DomError::ShadowRootExists { .. })
        ));
    }

    #[test]
    fn document_queries_do_not_pierce_shadow_roots() {
        let mut doc = Document::new();
        let host = doc.create_element("div");
        let root = doc.attach_shadow(host, ShadowRootMode::Open).unwrap();
        let inner = doc.create_element("span");
        doc.set_attribute(inner, "id", "inner").unwrap();
        doc.append_child(root, inner).unwrap();
        let body = doc.body();
        doc.append_child(body, host).unwrap();

        assert_eq!(doc.query_selector(doc.root(), "#inner"), None);
        assert_eq!(doc.query_selector(root, "#inner"), Some(inner));
    }

    #[test]
    fn observed_nodes_record_content_changes() {
        let mut doc = Document::new();
        let style = doc.create_element("style");
        doc.observe(style);
        let text = doc.create_text_node("a{}");
        doc.append_child(style, text).unwrap();
        assert_eq!(doc.take_records(), vec![MutationRecord { target: style }]);
        doc.unobserve(style);
        doc.set_text_content(style, "b{}").unwrap();
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn connecting_defined_elements_queues_reactions() {
        let mut doc = Document::new();
        doc.define_custom_element("x-app", CustomElementDefinition::default())
            .unwrap();
        let app = doc.create_element("x-app");
        let body = doc.body();
        doc.append_child(body, app).unwrap();
        doc.remove(app).unwrap();
        assert_eq!(
            doc.take_reactions(),
            vec![Reaction::Connected(app), Reaction::Disconnected(app)]
        );
    }

    #[test]
    fn define_rejects_invalid_names() {
        let mut doc = Document::new();
        assert!(matches!(
            doc.define_custom_element("app", CustomElementDefinition::default()),
            Err(DomError::InvalidCustomElementName { .. })
        ));
        doc.define_custom_element("x-a", CustomElementDefinition::default())
            .unwrap();
        assert!(matches!(
            doc.define_custom_element("x-a", CustomElementDefinition::default()),
            Err(DomError::AlreadyDefined { .. })
        ));
    }

    #[test]
    fn insert_adjacent_afterend_places_sibling() {
        let mut doc = Document::new();
        let head = doc.head();
        let first = style_with(&mut doc, "a{}");
        let last = style_with(&mut doc, "c{}");
        doc.append_child(head, first).unwrap();
        doc.append_child(head, last).unwrap();
        let middle = style_with(&mut doc, "b{}");
        let placed = doc
            .insert_adjacent_element(first, AdjacentPosition::AfterEnd, middle)
            .unwrap();
        assert_eq!(placed, Some(middle));
        assert_eq!(doc.children(head), &[first, middle, last]);
    }

    #[test]
    fn href_resolves_against_base_url() {
        let mut doc = Document::with_base_url("https://portal.example.com/app/index.html");
        let link = doc.create_element("link");
        doc.set_attribute(link, "href", "/app1/style.css").unwrap();
        assert_eq!(
            doc.href(link).as_deref(),
            Some("https://portal.example.com/app1/style.css")
        );
    }

    #[test]
    fn computed_style_rejects_shadow_roots() {
        let mut doc = Document::new();
        let host = doc.create_element("div");
        doc.set_attribute(host, "style", "display: block; color:red")
            .unwrap();
        let root = doc.attach_shadow(host, ShadowRootMode::Open).unwrap();
        let style = doc.computed_style(host).unwrap();
        assert_eq!(style.get("color"), Some("red"));
        assert!(matches!(
            doc.computed_style(root),
            Err(DomError::ComputedStyle { .. })
        ));
    }
}
