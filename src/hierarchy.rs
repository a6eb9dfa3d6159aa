use serde::{Deserialize, Serialize};

use crate::format::Label;
use crate::selector::Selector;
use crate::{Error, Result};

/// Which message template set a render uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePhase {
    Searching,
    Done,
}

impl MessagePhase {
    pub fn from_done(done: bool) -> Self {
        if done { Self::Done } else { Self::Searching }
    }
}

/// One tier of the counted hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    selector: Selector,
    label: Label,
    display: Option<Selector>,
    searching: String,
    done: String,
}

impl Level {
    /// A level without a display target; both templates start empty.
    pub fn new(selector: &str, label: impl Into<Label>) -> Result<Self> {
        Ok(Self {
            selector: Selector::parse(selector)?,
            label: label.into(),
            display: None,
            searching: String::new(),
            done: String::new(),
        })
    }

    /// Renders this level's message into `selector`, looked up under the
    /// node the level was matched from. An empty selector clears the target.
    pub fn display(mut self, selector: &str) -> Result<Self> {
        self.display = parse_display(selector)?;
        Ok(self)
    }

    pub fn messages(mut self, searching: impl Into<String>, done: impl Into<String>) -> Self {
        self.searching = searching.into();
        self.done = done.into();
        self
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn display_target(&self) -> Option<&Selector> {
        self.display.as_ref()
    }

    pub fn template(&self, phase: MessagePhase) -> &str {
        match phase {
            MessagePhase::Searching => &self.searching,
            MessagePhase::Done => &self.done,
        }
    }
}

fn parse_display(selector: &str) -> Result<Option<Selector>> {
    if selector.trim().is_empty() {
        Ok(None)
    } else {
        Selector::parse(selector).map(Some)
    }
}

/// Levels ordered outermost first. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy {
    levels: Vec<Level>,
}

impl Hierarchy {
    pub fn new(levels: Vec<Level>) -> Result<Self> {
        if levels.is_empty() {
            return Err(Error::InvalidHierarchy(
                "a hierarchy needs at least one level".into(),
            ));
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Serialized counter definition in the parallel-array shape used by page
/// templates. Index `i` of every array describes level `i`, outermost first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    /// Selector for the node(s) the whole count is scoped to.
    #[serde(default = "default_root")]
    pub root: String,
    pub hits: Vec<String>,
    pub labels: Vec<Label>,
    /// Empty strings (or `null`) mean "do not render this level".
    #[serde(default)]
    pub display: Vec<Option<String>>,
    pub searching_messages: Vec<String>,
    pub done_messages: Vec<String>,
}

fn default_root() -> String {
    "body".to_string()
}

impl HierarchyConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))
    }

    /// Validates array alignment and selector syntax.
    pub fn to_hierarchy(&self) -> Result<Hierarchy> {
        let expected = self.hits.len();
        let display_len = if self.display.is_empty() {
            expected
        } else {
            self.display.len()
        };
        let lengths = [
            ("labels", self.labels.len()),
            ("display", display_len),
            ("searching_messages", self.searching_messages.len()),
            ("done_messages", self.done_messages.len()),
        ];
        if let Some((name, len)) = lengths.iter().find(|(_, len)| *len != expected) {
            return Err(Error::InvalidHierarchy(format!(
                "{name} has {len} entries but hits has {expected}"
            )));
        }

        let mut levels = Vec::with_capacity(expected);
        for (idx, selector) in self.hits.iter().enumerate() {
            let mut level = Level::new(selector, self.labels[idx].clone())?.messages(
                self.searching_messages[idx].clone(),
                self.done_messages[idx].clone(),
            );
            if let Some(Some(display)) = self.display.get(idx) {
                level = level.display(display)?;
            }
            levels.push(level);
        }
        Hierarchy::new(levels)
    }
}
