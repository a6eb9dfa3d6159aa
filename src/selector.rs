//! The selector subset counters are written in.
//!
//! Compounds combine a type (or `*`), `#id`, `.class`, `[attr]`,
//! `[attr=value]`, `:first-child`, `:last-child` and `:not(<compound>)`.
//! Compounds are joined by descendant (whitespace) or child (`>`)
//! combinators, and alternatives are separated by commas.

use crate::{Error, Result};

/// A parsed selector list, ready to be matched repeatedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    pub(crate) alternatives: Vec<Complex>,
}

/// One comma-separated alternative, stored for right-to-left matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Complex {
    /// Compound the candidate element itself must satisfy.
    pub(crate) subject: Compound,
    /// The compounds to its left, nearest first. Each relation says how the
    /// compound sits relative to the element matched just before it.
    pub(crate) context: Vec<(Relation, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relation {
    Parent,
    Ancestor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Compound {
    pub(crate) tag: Option<String>,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<AttrTest>,
    pub(crate) pseudos: Vec<Pseudo>,
}

impl Compound {
    fn id_only(&self) -> Option<&str> {
        let bare = self.tag.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.pseudos.is_empty();
        self.id.as_deref().filter(|_| bare)
    }
}

/// `[name]` when `value` is `None`, `[name=value]` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttrTest {
    pub(crate) name: String,
    pub(crate) value: Option<String>,
}

impl AttrTest {
    pub(crate) fn matches(&self, actual: Option<&str>) -> bool {
        match (&self.value, actual) {
            (None, found) => found.is_some(),
            (Some(expected), Some(found)) => expected == found,
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Pseudo {
    FirstChild,
    LastChild,
    Not(Box<Compound>),
}

impl Selector {
    pub fn parse(selector: &str) -> Result<Self> {
        let source = selector.trim();
        let alternatives = Cursor::new(source)
            .selector_list()
            .ok_or_else(|| Error::UnsupportedSelector(source.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The id when the whole selector is a bare `#id`.
    pub(crate) fn single_id(&self) -> Option<&str> {
        match self.alternatives.as_slice() {
            [only] if only.context.is_empty() => only.subject.id_only(),
            _ => None,
        }
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        let found = self.peek() == Some(expected);
        if found {
            self.pos += 1;
        }
        found
    }

    /// Returns whether anything was skipped.
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn selector_list(mut self) -> Option<Vec<Complex>> {
        let mut alternatives = vec![self.complex()?];
        loop {
            self.skip_ws();
            if self.peek().is_none() {
                return Some(alternatives);
            }
            if !self.eat(b',') {
                return None;
            }
            self.skip_ws();
            alternatives.push(self.complex()?);
        }
    }

    fn complex(&mut self) -> Option<Complex> {
        let mut compounds = vec![self.compound()?];
        let mut relations = Vec::new();
        loop {
            let spaced = self.skip_ws();
            let relation = if self.eat(b'>') {
                self.skip_ws();
                Relation::Parent
            } else if spaced && self.peek().is_some_and(|b| b != b',') {
                Relation::Ancestor
            } else {
                break;
            };
            relations.push(relation);
            compounds.push(self.compound()?);
        }

        let subject = compounds.pop()?;
        let context = relations
            .into_iter()
            .rev()
            .zip(compounds.into_iter().rev())
            .collect();
        Some(Complex { subject, context })
    }

    fn compound(&mut self) -> Option<Compound> {
        let start = self.pos;
        let mut compound = Compound::default();
        if !self.eat(b'*') {
            compound.tag = self.ident().map(|tag| tag.to_ascii_lowercase());
        }

        loop {
            match self.peek() {
                Some(b'#') => {
                    self.pos += 1;
                    let id = self.ident()?;
                    if compound.id.replace(id).is_some() {
                        return None;
                    }
                }
                Some(b'.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some(b'[') => {
                    self.pos += 1;
                    compound.attrs.push(self.attr_test()?);
                }
                Some(b':') => {
                    self.pos += 1;
                    compound.pseudos.push(self.pseudo()?);
                }
                _ => break,
            }
        }

        (self.pos > start).then_some(compound)
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| self.src[start..self.pos].to_string())
    }

    fn attr_test(&mut self) -> Option<AttrTest> {
        self.skip_ws();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_ws();
        let value = if self.eat(b'=') {
            self.skip_ws();
            Some(match self.peek()? {
                quote @ (b'"' | b'\'') => self.quoted(quote)?,
                _ => self.ident()?,
            })
        } else {
            None
        };
        self.skip_ws();
        self.eat(b']').then_some(AttrTest { name, value })
    }

    fn quoted(&mut self, quote: u8) -> Option<String> {
        let start = self.pos + 1;
        let len = self.src.get(start..)?.bytes().position(|b| b == quote)?;
        self.pos = start + len + 1;
        Some(self.src[start..start + len].to_string())
    }

    fn pseudo(&mut self) -> Option<Pseudo> {
        match self.ident()?.as_str() {
            "first-child" => Some(Pseudo::FirstChild),
            "last-child" => Some(Pseudo::LastChild),
            "not" => {
                if !self.eat(b'(') {
                    return None;
                }
                self.skip_ws();
                let inner = self.compound()?;
                self.skip_ws();
                self.eat(b')').then(|| Pseudo::Not(Box::new(inner)))
            }
            _ => None,
        }
    }
}
