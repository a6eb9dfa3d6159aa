use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use fancy_regex::Regex;
use once_cell::sync::OnceCell;

use crate::selector::{Complex, Compound, Pseudo, Relation, Selector};
use crate::{Error, Result};

const STACK_RED_ZONE: usize = 32 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

/// Handle to a node inside a [`Dom`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

const DOCUMENT: NodeId = NodeId(0);

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
}

impl Element {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// Arena-backed document tree.
///
/// Nodes are never freed: replacing an element's content detaches the old
/// children and leaves them unreachable in the arena.
#[derive(Debug, Clone)]
pub struct Dom {
    nodes: Vec<Node>,
    ids: HashMap<String, NodeId>,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
            ids: HashMap::new(),
        }
    }

    pub fn parse(html: &str) -> Result<Self> {
        let tokens = HtmlReader::tokenize(html)?;
        let mut dom = Self::new();
        dom.build(DOCUMENT, tokens);
        Ok(dom)
    }

    pub fn root(&self) -> NodeId {
        DOCUMENT
    }

    fn element(&self, node: NodeId) -> Option<&Element> {
        match &self.nodes[node.0].kind {
            NodeKind::Element(element) => Some(element),
            NodeKind::Document | NodeKind::Text(_) => None,
        }
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|element| element.tag.as_str())
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node).and_then(|element| element.attr(name))
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.parent(node)
            .filter(|parent| self.element(*parent).is_some())
    }

    /// First element in document order carrying `id`.
    pub fn by_id(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_text(node, &mut out);
        out
    }

    fn write_text(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Document | NodeKind::Element(_) => {
                for &child in &self.nodes[node.0].children {
                    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
                        self.write_text(child, out)
                    });
                }
            }
        }
    }

    pub fn inner_html(&self, node: NodeId) -> Result<String> {
        self.require_element(node, "innerHTML")?;
        let mut out = String::new();
        self.write_children(node, &mut out);
        Ok(out)
    }

    /// Replaces the children of `node` with the parsed `html` fragment.
    ///
    /// The fragment is tokenized before anything is detached, so a parse
    /// error leaves the document untouched.
    pub fn set_inner_html(&mut self, node: NodeId, html: &str) -> Result<()> {
        self.require_element(node, "innerHTML")?;
        let tokens = HtmlReader::tokenize(html)?;
        for child in std::mem::take(&mut self.nodes[node.0].children) {
            self.nodes[child.0].parent = None;
        }
        self.build(node, tokens);
        Ok(())
    }

    /// Appends the parsed `html` fragment after the existing children.
    pub fn append_html(&mut self, node: NodeId, html: &str) -> Result<()> {
        self.require_element(node, "append")?;
        let tokens = HtmlReader::tokenize(html)?;
        self.build(node, tokens);
        Ok(())
    }

    fn require_element(&self, node: NodeId, operation: &str) -> Result<()> {
        match self.element(node) {
            Some(_) => Ok(()),
            None => Err(Error::DomMutation(format!(
                "{operation} target is not an element"
            ))),
        }
    }

    fn push_node(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn push_text(&mut self, parent: NodeId, text: String) {
        if let Some(&last) = self.nodes[parent.0].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last.0].kind {
                existing.push_str(&text);
                return;
            }
        }
        self.push_node(parent, NodeKind::Text(text));
    }

    /// Attaches `tokens` under `parent`, closing elements leniently: an end
    /// tag with no open match is ignored, and one that matches an outer
    /// element closes everything opened inside it.
    fn build(&mut self, parent: NodeId, tokens: Vec<Token>) {
        let mut open = vec![parent];
        for token in tokens {
            let current = open.last().copied().unwrap_or(parent);
            match token {
                Token::Text(text) => self.push_text(current, text),
                Token::Open {
                    tag,
                    attrs,
                    closed,
                    raw,
                } => {
                    let stays_open = !closed && raw.is_none();
                    let node = self.push_node(current, NodeKind::Element(Element { tag, attrs }));
                    if let Some(raw) = raw.filter(|raw| !raw.is_empty()) {
                        self.push_node(node, NodeKind::Text(raw));
                    }
                    if stays_open {
                        open.push(node);
                    }
                }
                Token::Close(tag) => {
                    let depth = open
                        .iter()
                        .rposition(|node| self.tag_name(*node) == Some(tag.as_str()));
                    if let Some(depth) = depth.filter(|depth| *depth > 0) {
                        open.truncate(depth);
                    }
                }
            }
        }
        self.reindex();
    }

    fn reindex(&mut self) {
        let mut ids = HashMap::new();
        for node in self.descendants(DOCUMENT) {
            if let Some(id) = self.attr(node, "id") {
                ids.entry(id.to_string()).or_insert(node);
            }
        }
        self.ids = ids;
    }

    /// Elements strictly below `root`, in document order.
    fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = self.nodes[root.0].children.iter().rev().copied().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            if self.element(node).is_some() {
                out.push(node);
            }
            stack.extend(self.nodes[node.0].children.iter().rev().copied());
        }
        out
    }

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        Ok(self.select_all(&Selector::parse(selector)?))
    }

    /// Every element in the document matching `selector`.
    pub fn select_all(&self, selector: &Selector) -> Vec<NodeId> {
        if let Some(id) = selector.single_id() {
            return self.by_id(id).into_iter().collect();
        }
        self.find(&[DOCUMENT], selector)
    }

    /// Elements strictly below any of `roots` that match `selector`.
    ///
    /// Results follow the order of `roots`, then document order below each
    /// root. A node reachable from several roots is reported once.
    pub fn find(&self, roots: &[NodeId], selector: &Selector) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        roots
            .iter()
            .flat_map(|root| self.descendants(*root))
            .filter(|node| self.matches(*node, selector) && seen.insert(*node))
            .collect()
    }

    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        selector
            .alternatives
            .iter()
            .any(|complex| self.matches_complex(node, complex))
    }

    /// Nearest inclusive ancestor of `node` matching `selector`.
    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        std::iter::successors(Some(node), |current| self.parent(*current))
            .find(|candidate| self.matches(*candidate, selector))
    }

    fn matches_complex(&self, node: NodeId, complex: &Complex) -> bool {
        self.matches_compound(node, &complex.subject)
            && self.matches_context(node, &complex.context)
    }

    fn matches_context(&self, node: NodeId, context: &[(Relation, Compound)]) -> bool {
        let Some(((relation, compound), rest)) = context.split_first() else {
            return true;
        };
        let mut ancestors =
            std::iter::successors(self.parent_element(node), |current| {
                self.parent_element(*current)
            });
        let fits = |candidate: &NodeId| {
            self.matches_compound(*candidate, compound) && self.matches_context(*candidate, rest)
        };
        match relation {
            Relation::Parent => ancestors.next().as_ref().is_some_and(fits),
            Relation::Ancestor => ancestors.any(|candidate| fits(&candidate)),
        }
    }

    fn matches_compound(&self, node: NodeId, compound: &Compound) -> bool {
        let Some(element) = self.element(node) else {
            return false;
        };
        compound.tag.as_deref().is_none_or(|tag| element.tag == tag)
            && compound
                .id
                .as_deref()
                .is_none_or(|id| element.attr("id") == Some(id))
            && compound.classes.iter().all(|class| element.has_class(class))
            && compound
                .attrs
                .iter()
                .all(|test| test.matches(element.attr(&test.name)))
            && compound
                .pseudos
                .iter()
                .all(|pseudo| self.matches_pseudo(node, pseudo))
    }

    fn matches_pseudo(&self, node: NodeId, pseudo: &Pseudo) -> bool {
        match pseudo {
            Pseudo::FirstChild => self.element_siblings(node).first() == Some(&node),
            Pseudo::LastChild => self.element_siblings(node).last() == Some(&node),
            Pseudo::Not(inner) => !self.matches_compound(node, inner),
        }
    }

    fn element_siblings(&self, node: NodeId) -> Vec<NodeId> {
        self.parent(node)
            .map(|parent| {
                self.nodes[parent.0]
                    .children
                    .iter()
                    .copied()
                    .filter(|child| self.element(*child).is_some())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serializes a node and its subtree, escaping text and attribute values.
    pub fn dump_node(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_html(node, &mut out);
        out
    }

    fn write_children(&self, node: NodeId, out: &mut String) {
        for &child in &self.nodes[node.0].children {
            stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
                self.write_html(child, out)
            });
        }
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.0].kind {
            NodeKind::Document => self.write_children(node, out),
            NodeKind::Text(text) => {
                let verbatim = self
                    .parent(node)
                    .and_then(|parent| self.tag_name(parent))
                    .is_some_and(keeps_raw_text);
                if verbatim {
                    out.push_str(text);
                } else {
                    escape_into(text, false, out);
                }
            }
            NodeKind::Element(element) => {
                out.push('<');
                out.push_str(&element.tag);
                for (name, value) in &element.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                out.push('>');
                if is_void_tag(&element.tag) {
                    return;
                }
                self.write_children(node, out);
                out.push_str("</");
                out.push_str(&element.tag);
                out.push('>');
            }
        }
    }
}

fn escape_into(text: &str, in_attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' if !in_attribute => out.push_str("&lt;"),
            '>' if !in_attribute => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

#[derive(Debug)]
enum Token {
    Text(String),
    Open {
        tag: String,
        attrs: Vec<(String, String)>,
        /// Void or self-closing: nothing nests inside.
        closed: bool,
        /// Body of a raw-text element, consumed together with its end tag.
        raw: Option<String>,
    },
    Close(String),
}

/// Lenient HTML tokenizer.
///
/// Comments, doctypes and processing instructions are skipped. A `<` that
/// does not open markup stays text. Only an unterminated comment, tag,
/// quoted attribute value or raw-text element is an error.
struct HtmlReader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> HtmlReader<'a> {
    fn tokenize(src: &'a str) -> Result<Vec<Token>> {
        let mut reader = Self { src, pos: 0 };
        let mut tokens = Vec::new();
        while let Some(token) = reader.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Ok(None);
            }
            if let Some(body) = rest.strip_prefix("<!--") {
                let end = body
                    .find("-->")
                    .ok_or_else(|| Error::HtmlParse("unclosed HTML comment".into()))?;
                self.pos += "<!--".len() + end + "-->".len();
                continue;
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                self.pos += rest.find('>').map_or(rest.len(), |end| end + 1);
                continue;
            }

            let bytes = rest.as_bytes();
            if rest.starts_with("</") && bytes.get(2).is_some_and(u8::is_ascii_alphabetic) {
                return self.close_tag().map(Some);
            }
            if rest.starts_with('<') && bytes.get(1).is_some_and(u8::is_ascii_alphabetic) {
                return self.open_tag().map(Some);
            }
            return self.text().map(Some);
        }
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest.find(|ch: char| !keep(ch)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(|ch| ch.is_ascii_whitespace());
    }

    fn text(&mut self) -> Result<Token> {
        let rest = self.rest();
        let first = rest.chars().next().map_or(0, char::len_utf8);
        let len = rest[first..]
            .find('<')
            .map_or(rest.len(), |next| first + next);
        self.pos += len;
        Ok(Token::Text(decode_entities(&rest[..len])?.into_owned()))
    }

    fn close_tag(&mut self) -> Result<Token> {
        let rest = self.rest();
        let end = rest
            .find('>')
            .ok_or_else(|| Error::HtmlParse("unclosed end tag".into()))?;
        self.pos += end + 1;
        Ok(Token::Close(rest[2..end].trim().to_ascii_lowercase()))
    }

    fn open_tag(&mut self) -> Result<Token> {
        self.pos += 1;
        let tag = self.take_while(is_tag_name_char).to_ascii_lowercase();
        let mut attrs: Vec<(String, String)> = Vec::new();
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(Error::HtmlParse(format!("unclosed start tag <{tag}")));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                self_closing = true;
                break;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break;
            }
            if rest.starts_with('/') {
                self.pos += 1;
                continue;
            }

            let name = self.take_while(is_attr_name_char).to_ascii_lowercase();
            if name.is_empty() {
                return Err(Error::HtmlParse(format!(
                    "invalid attribute name in <{tag}>"
                )));
            }
            self.skip_whitespace();
            let value = if self.rest().starts_with('=') {
                self.pos += 1;
                self.skip_whitespace();
                self.attr_value()?
            } else {
                String::new()
            };
            // The first occurrence of a repeated attribute wins.
            if attrs.iter().all(|(existing, _)| *existing != name) {
                attrs.push((name, value));
            }
        }

        let raw = if !self_closing && is_raw_text_tag(&tag) {
            Some(self.raw_text(&tag)?)
        } else {
            None
        };
        Ok(Token::Open {
            closed: self_closing || is_void_tag(&tag),
            tag,
            attrs,
            raw,
        })
    }

    fn attr_value(&mut self) -> Result<String> {
        let rest = self.rest();
        let value = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let len = rest[1..].find(quote).ok_or_else(|| {
                    Error::HtmlParse("unclosed quoted attribute value".into())
                })?;
                self.pos += len + 2;
                &rest[1..=len]
            }
            _ => self.take_while(|ch| !ch.is_ascii_whitespace() && ch != '>'),
        };
        Ok(decode_entities(value)?.into_owned())
    }

    fn raw_text(&mut self, tag: &str) -> Result<String> {
        let rest = self.rest();
        let end = find_ignore_ascii_case(rest, &format!("</{tag}"))
            .ok_or_else(|| Error::HtmlParse(format!("unclosed <{tag}> element")))?;
        self.pos += rest[end..].find('>').map_or(rest.len(), |close| end + close + 1);
        let body = &rest[..end];
        if keeps_raw_text(tag) {
            Ok(body.to_string())
        } else {
            Ok(decode_entities(body)?.into_owned())
        }
    }
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

fn is_tag_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == ':'
}

fn is_attr_name_char(ch: char) -> bool {
    !ch.is_ascii_whitespace() && !matches!(ch, '=' | '>' | '/' | '"' | '\'')
}

/// Elements whose body is not markup.
fn is_raw_text_tag(tag: &str) -> bool {
    matches!(tag, "script" | "style" | "textarea" | "title")
}

/// Raw-text elements whose body is also kept free of character references.
fn keeps_raw_text(tag: &str) -> bool {
    matches!(tag, "script" | "style")
}

fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

fn character_reference_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceCell<Regex> = OnceCell::new();
    PATTERN.get_or_try_init(|| {
        Regex::new(r"&(?:#([0-9]{1,7})|#[xX]([0-9A-Fa-f]{1,6})|([A-Za-z][A-Za-z0-9]{1,31}));")
            .map_err(|err| Error::HtmlParse(format!("character reference pattern: {err}")))
    })
}

/// Replaces `&name;`, `&#N;` and `&#xH;` references. Unknown names and
/// code points that are not scalar values stay literal.
fn decode_entities(text: &str) -> Result<Cow<'_, str>> {
    if !text.contains('&') {
        return Ok(Cow::Borrowed(text));
    }

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    for captures in character_reference_pattern()?.captures_iter(text) {
        let captures = captures.map_err(|err| Error::HtmlParse(err.to_string()))?;
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let decoded = if let Some(decimal) = captures.get(1) {
            decimal.as_str().parse::<u32>().ok().and_then(char::from_u32)
        } else if let Some(hex) = captures.get(2) {
            u32::from_str_radix(hex.as_str(), 16)
                .ok()
                .and_then(char::from_u32)
        } else {
            captures.get(3).and_then(|name| named_reference(name.as_str()))
        };
        if let Some(ch) = decoded {
            out.push_str(&text[copied..whole.start()]);
            out.push(ch);
            copied = whole.end();
        }
    }
    out.push_str(&text[copied..]);
    Ok(Cow::Owned(out))
}

fn named_reference(name: &str) -> Option<char> {
    let ch = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{00A0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "middot" => '\u{00B7}',
        "bull" => '\u{2022}',
        "laquo" => '\u{00AB}',
        "raquo" => '\u{00BB}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "larr" => '\u{2190}',
        "rarr" => '\u{2192}',
        "times" => '\u{00D7}',
        "divide" => '\u{00F7}',
        "plusmn" => '\u{00B1}',
        "deg" => '\u{00B0}',
        "copy" => '\u{00A9}',
        "reg" => '\u{00AE}',
        "trade" => '\u{2122}',
        _ => return None,
    };
    Some(ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(selector: &str) -> Selector {
        Selector::parse(selector).expect("selector should parse")
    }

    #[test]
    fn parses_nested_elements_and_attributes() -> Result<()> {
        let dom = Dom::parse(
            "<!DOCTYPE html><div id='results' CLASS='box wide'><p data-n=3>one</p><br><p>two</p></div>",
        )?;
        let results = dom.by_id("results").expect("results div");
        assert_eq!(dom.tag_name(results), Some("div"));
        assert_eq!(dom.attr(results, "class"), Some("box wide"));
        assert_eq!(dom.text_content(results), "onetwo");
        assert_eq!(dom.query_selector_all("#results > p")?.len(), 2);
        assert_eq!(dom.query_selector_all("p[data-n='3']")?.len(), 1);
        assert_eq!(dom.query_selector_all("div.wide br, p[data-n]")?.len(), 2);
        Ok(())
    }

    #[test]
    fn raw_text_elements_are_not_parsed_as_markup() -> Result<()> {
        let dom = Dom::parse("<script>if (a < b) { x('<li>&amp;'); }</SCRIPT><li>real</li>")?;
        assert_eq!(dom.query_selector_all("li")?.len(), 1);
        let script = dom.query_selector("script")?.expect("script");
        assert_eq!(dom.text_content(script), "if (a < b) { x('<li>&amp;'); }");
        assert_eq!(dom.dump_node(script), "<script>if (a < b) { x('<li>&amp;'); }</script>");
        Ok(())
    }

    #[test]
    fn stray_less_than_is_text() -> Result<()> {
        let dom = Dom::parse("<p>1 < 2</p>")?;
        let p = dom.query_selector("p")?.expect("p");
        assert_eq!(dom.text_content(p), "1 < 2");
        assert_eq!(dom.inner_html(p)?, "1 &lt; 2");
        Ok(())
    }

    #[test]
    fn unterminated_markup_is_an_error() {
        for bad in [
            "<div><!-- oops</div>",
            "<p class='x>text</p>",
            "<p id=a",
            "<script>never closed",
        ] {
            assert!(
                matches!(Dom::parse(bad), Err(Error::HtmlParse(_))),
                "expected {bad:?} to fail"
            );
        }
    }

    #[test]
    fn character_references_decode_in_text_and_attributes() -> Result<()> {
        let dom = Dom::parse(
            "<p id='p' title='&quot;a&quot; &amp; b'>x &amp; y &ndash; &#65;&#x42; &bogus; &amp</p>",
        )?;
        let p = dom.by_id("p").expect("p");
        assert_eq!(dom.attr(p, "title"), Some("\"a\" & b"));
        assert_eq!(dom.text_content(p), "x & y \u{2013} AB &bogus; &amp");
        assert_eq!(
            dom.dump_node(p),
            "<p id=\"p\" title=\"&quot;a&quot; &amp; b\">x &amp; y \u{2013} AB &amp;bogus; &amp;amp</p>"
        );
        Ok(())
    }

    #[test]
    fn unmatched_end_tags_are_ignored() -> Result<()> {
        let dom = Dom::parse("<div id='a'></span><p id='b'>x</div><i id='c'></i>")?;
        let a = dom.by_id("a");
        assert_eq!(dom.by_id("b").and_then(|b| dom.parent(b)), a);
        assert_eq!(dom.by_id("c").and_then(|c| dom.parent(c)), Some(dom.root()));
        Ok(())
    }

    #[test]
    fn find_is_scoped_to_roots_and_deduplicated() -> Result<()> {
        let dom = Dom::parse(
            "<div class='s'><i>a</i><div class='s'><i>b</i></div></div><i>outside</i>",
        )?;
        let roots = dom.query_selector_all(".s")?;
        assert_eq!(roots.len(), 2);
        let found = dom.find(&roots, &sel("i"));
        let texts = found
            .iter()
            .map(|node| dom.text_content(*node))
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn closest_walks_inclusive_ancestors() -> Result<()> {
        let dom = Dom::parse("<section id='s'><ul><li id='x'>x</li></ul></section>")?;
        let li = dom.by_id("x").expect("li");
        let section = dom.by_id("s");
        assert_eq!(dom.closest(li, &sel("section")), section);
        assert_eq!(dom.closest(li, &sel("li")), Some(li));
        assert_eq!(dom.closest(li, &sel("table")), None);
        Ok(())
    }

    #[test]
    fn child_and_descendant_relations() -> Result<()> {
        let dom = Dom::parse(
            "<div class='q'><table><tr class='hit'></tr></table><tr class='hit'></tr></div>",
        )?;
        assert_eq!(dom.query_selector_all(".q .hit")?.len(), 2);
        assert_eq!(dom.query_selector_all(".q > .hit")?.len(), 1);
        assert_eq!(dom.query_selector_all("div > table > tr")?.len(), 1);
        assert_eq!(dom.query_selector_all("table .q")?.len(), 0);
        Ok(())
    }

    #[test]
    fn set_inner_html_replaces_children_and_reindexes_ids() -> Result<()> {
        let mut dom = Dom::parse("<p id='msg'><b id='old'>old</b></p>")?;
        let msg = dom.by_id("msg").expect("msg");
        dom.set_inner_html(msg, "<em id='new'>3 hits</em>")?;
        assert_eq!(dom.inner_html(msg)?, "<em id=\"new\">3 hits</em>");
        assert!(dom.by_id("old").is_none());
        assert!(dom.by_id("new").is_some());

        dom.append_html(msg, " and more")?;
        assert_eq!(dom.text_content(msg), "3 hits and more");
        Ok(())
    }

    #[test]
    fn failed_fragment_leaves_content_untouched() -> Result<()> {
        let mut dom = Dom::parse("<p id='msg'>kept</p>")?;
        let msg = dom.by_id("msg").expect("msg");
        assert!(dom.set_inner_html(msg, "<b title='x>").is_err());
        assert_eq!(dom.text_content(msg), "kept");
        Ok(())
    }

    #[test]
    fn rendering_into_document_is_rejected() -> Result<()> {
        let mut dom = Dom::parse("text")?;
        let root = dom.root();
        assert!(matches!(
            dom.set_inner_html(root, "x"),
            Err(Error::DomMutation(_))
        ));
        Ok(())
    }

    #[test]
    fn first_last_and_negated_children() -> Result<()> {
        let dom = Dom::parse("<ul><li>1</li>text<li>2</li><li>3</li></ul><ol><li>only</li></ol>")?;
        assert_eq!(dom.query_selector_all("ul li:first-child")?.len(), 1);
        assert_eq!(dom.query_selector_all("ul li:last-child")?.len(), 1);
        assert_eq!(dom.query_selector_all("li:first-child:last-child")?.len(), 1);
        assert_eq!(dom.query_selector_all("ul li:not(:first-child)")?.len(), 2);
        Ok(())
    }
}
