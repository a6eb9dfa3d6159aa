//! Hit counting and message rendering.
//!
//! [`count_hits`] walks a [`Hierarchy`] recursively and reports both the
//! per-level totals and the writes it wants to make; the presenters apply
//! those writes to the [`Dom`] once counting is finished.

use serde::{Deserialize, Serialize};

use crate::dom::{Dom, NodeId};
use crate::format::{Label, capitalize, format_template, throbber};
use crate::hierarchy::{Hierarchy, HierarchyConfig, Level, MessagePhase};
use crate::selector::Selector;
use crate::{Error, Result};

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

/// A pending `innerHTML` write produced while counting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Render {
    pub target: NodeId,
    pub html: String,
}

/// Result of one recursive count: totals per level (outermost first) and the
/// renders in the order they were produced (innermost calls first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub counts: Vec<usize>,
    pub renders: Vec<Render>,
}

impl Tally {
    /// Writes every render in order; later writes to the same node win.
    pub fn apply(&self, dom: &mut Dom) -> Result<()> {
        for render in &self.renders {
            dom.set_inner_html(render.target, &render.html)?;
        }
        Ok(())
    }
}

/// Counts `levels` under `roots`.
///
/// The first level is matched directly under the roots and its count is the
/// size of that match set. Every match then becomes the root for counting the
/// remaining levels, whose totals are summed across matches. A level's
/// display target is looked up under the same roots its selector was matched
/// against and receives that call's counts.
pub fn count_hits(
    dom: &Dom,
    roots: &[NodeId],
    levels: &[Level],
    phase: MessagePhase,
    throbber: &str,
) -> Result<Tally> {
    let Some((level, inner)) = levels.split_first() else {
        return Ok(Tally::default());
    };

    let matches = dom.find(roots, level.selector());
    let mut tally = Tally {
        counts: vec![0; levels.len()],
        renders: Vec::new(),
    };
    tally.counts[0] = matches.len();

    if !inner.is_empty() {
        for node in matches {
            let nested = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || {
                count_hits(dom, &[node], inner, phase, throbber)
            })?;
            for (total, count) in tally.counts[1..].iter_mut().zip(&nested.counts) {
                *total += count;
            }
            tally.renders.extend(nested.renders);
        }
    }

    if let Some(display) = level.display_target() {
        let html = level_message(level.template(phase), throbber, levels, &tally.counts)?;
        for target in dom.find(roots, display) {
            tally.renders.push(Render {
                target,
                html: html.clone(),
            });
        }
    }

    Ok(tally)
}

/// `{0}` is the throbber, then each level contributes its count and label.
fn level_message(
    template: &str,
    throbber: &str,
    levels: &[Level],
    counts: &[usize],
) -> Result<String> {
    let mut args = Vec::with_capacity(1 + counts.len() * 2);
    args.push(throbber.to_string());
    for (level, count) in levels.iter().zip(counts) {
        args.push(count.to_string());
        args.push(level.label().pluralize(*count));
    }
    format_template(template, &args)
}

/// Something the page can poll and eventually finalize.
pub trait Counter {
    fn kind(&self) -> &'static str;

    /// Recounts and re-renders. Never changes `is_done`.
    fn update(&mut self, dom: &mut Dom) -> Result<()>;

    fn is_done(&self) -> bool;

    /// Switches to the final message set. Calling it again has no effect.
    fn mark_done(&mut self);

    /// Completed `update` calls.
    fn updates(&self) -> u64;

    /// Counts from the most recent update.
    fn counts(&self) -> &[usize];
}

/// Counts a nested hierarchy of hits and renders per-level progress messages.
#[derive(Debug, Clone)]
pub struct HierarchicalHitCounter {
    root: Selector,
    hierarchy: Hierarchy,
    done: bool,
    updates: u64,
    counts: Vec<usize>,
}

impl HierarchicalHitCounter {
    pub fn new(root: &str, hierarchy: Hierarchy) -> Result<Self> {
        let counts = vec![0; hierarchy.len()];
        Ok(Self {
            root: Selector::parse(root)?,
            hierarchy,
            done: false,
            updates: 0,
            counts,
        })
    }

    pub fn from_config(config: &HierarchyConfig) -> Result<Self> {
        Self::new(&config.root, config.to_hierarchy()?)
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Per-level totals from the most recent update, outermost first.
    pub fn last_counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn phase(&self) -> MessagePhase {
        MessagePhase::from_done(self.done)
    }

    /// Counts without touching the document.
    pub fn measure(&self, dom: &Dom) -> Result<Tally> {
        let roots = dom.select_all(&self.root);
        count_hits(
            dom,
            &roots,
            self.hierarchy.levels(),
            self.phase(),
            &throbber(self.updates),
        )
    }
}

impl Counter for HierarchicalHitCounter {
    fn kind(&self) -> &'static str {
        "hierarchical"
    }

    fn update(&mut self, dom: &mut Dom) -> Result<()> {
        let tally = self.measure(dom)?;
        tally.apply(dom)?;
        self.counts = tally.counts;
        self.updates += 1;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn mark_done(&mut self) {
        self.done = true;
    }

    fn updates(&self) -> u64 {
        self.updates
    }

    fn counts(&self) -> &[usize] {
        &self.counts
    }
}

/// Flat counter: every hit selector is counted over the whole document and
/// summarized into a single element.
#[derive(Debug, Clone)]
pub struct HitCounter {
    element: Selector,
    message: String,
    hits: Vec<(Selector, Label)>,
    done: bool,
    updates: u64,
    counts: Vec<usize>,
}

impl HitCounter {
    /// `message` receives one `"<n> <label>"` string per hit, starting at
    /// `{0}`.
    pub fn new(
        element: &str,
        message: impl Into<String>,
        hits: Vec<(&str, Label)>,
    ) -> Result<Self> {
        let hits = hits
            .into_iter()
            .map(|(selector, label)| Selector::parse(selector).map(|selector| (selector, label)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            element: Selector::parse(element)?,
            message: message.into(),
            counts: vec![0; hits.len()],
            hits,
            done: false,
            updates: 0,
        })
    }

    pub fn from_config(config: &HitCounterConfig) -> Result<Self> {
        if config.hits.len() != config.labels.len() {
            return Err(Error::InvalidHierarchy(format!(
                "labels has {} entries but hits has {}",
                config.labels.len(),
                config.hits.len()
            )));
        }
        Self::new(
            &config.element,
            config.message.clone(),
            config
                .hits
                .iter()
                .map(String::as_str)
                .zip(config.labels.iter().cloned())
                .collect(),
        )
    }

    fn render(&self, counts: &[usize]) -> Result<String> {
        let parts = self
            .hits
            .iter()
            .zip(counts)
            .map(|((_, label), count)| format!("{count} {}", label.pluralize(*count)))
            .collect::<Vec<_>>();
        let message = format_template(&self.message, &parts)?;

        if self.done {
            return Ok(format!("Done. {}", capitalize(&message)));
        }
        let any = counts.iter().any(|count| *count > 0);
        Ok(format!(
            "Searching{} {}",
            throbber(self.updates),
            if any { message.as_str() } else { "" }
        ))
    }
}

impl Counter for HitCounter {
    fn kind(&self) -> &'static str {
        "flat"
    }

    fn update(&mut self, dom: &mut Dom) -> Result<()> {
        let counts = self
            .hits
            .iter()
            .map(|(selector, _)| dom.select_all(selector).len())
            .collect::<Vec<_>>();
        let html = self.render(&counts)?;
        for target in dom.select_all(&self.element) {
            dom.set_inner_html(target, &html)?;
        }
        self.counts = counts;
        self.updates += 1;
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn mark_done(&mut self) {
        self.done = true;
    }

    fn updates(&self) -> u64 {
        self.updates
    }

    fn counts(&self) -> &[usize] {
        &self.counts
    }
}

/// Serialized form of a [`HitCounter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitCounterConfig {
    pub element: String,
    pub message: String,
    pub hits: Vec<String>,
    pub labels: Vec<Label>,
}

impl HitCounterConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SECTIONS: &str = r#"
        <div id='root'>
          <p id='summary'></p>
          <div class='section'>
            <span class='status'></span>
            <i class='item'></i><i class='item'></i><i class='item'></i>
          </div>
          <div class='section'>
            <span class='status'></span>
            <i class='item'></i>
          </div>
        </div>
    "#;

    fn levels() -> Result<Vec<Level>> {
        Ok(vec![
            Level::new(".section", "section")?
                .display("#summary")?
                .messages("{1} {2}, {3} {4}{0}", "{1} {2} and {3} {4}"),
            Level::new(".item", "item")?
                .display(".status")?
                .messages("{1} {2}{0}", "{1} {2}"),
        ])
    }

    #[test]
    fn counts_sections_and_items() -> Result<()> {
        let dom = Dom::parse(TWO_SECTIONS)?;
        let roots = vec![dom.root()];
        let tally = count_hits(&dom, &roots, &levels()?, MessagePhase::Searching, " ...")?;
        assert_eq!(tally.counts, vec![2, 4]);
        Ok(())
    }

    #[test]
    fn each_section_renders_its_own_items_before_the_summary() -> Result<()> {
        let dom = Dom::parse(TWO_SECTIONS)?;
        let tally = count_hits(&dom, &[dom.root()], &levels()?, MessagePhase::Done, "")?;
        let htmls = tally
            .renders
            .iter()
            .map(|render| render.html.as_str())
            .collect::<Vec<_>>();
        assert_eq!(htmls, vec!["3 items", "1 item", "2 sections and 4 items"]);
        Ok(())
    }

    #[test]
    fn apply_writes_into_targets() -> Result<()> {
        let mut dom = Dom::parse(TWO_SECTIONS)?;
        let tally = count_hits(&dom, &[dom.root()], &levels()?, MessagePhase::Searching, ". ..")?;
        tally.apply(&mut dom)?;
        let summary = dom.by_id("summary").expect("summary");
        assert_eq!(dom.text_content(summary), "2 sections, 4 items. ..");
        let statuses = dom
            .query_selector_all(".status")?
            .into_iter()
            .map(|node| dom.text_content(node))
            .collect::<Vec<_>>();
        assert_eq!(statuses, vec!["3 items. ..", "1 item. .."]);
        Ok(())
    }

    #[test]
    fn outermost_count_is_direct_and_inner_levels_sum_per_match() -> Result<()> {
        // Both sections match directly under the root and are counted once.
        // The nested item is found from both sections, so it is summed twice.
        let dom = Dom::parse(
            "<div class='section'><i class='item'></i><div class='section'><i class='item'></i></div></div>",
        )?;
        let levels = vec![Level::new(".section", "section")?, Level::new(".item", "item")?];
        let tally = count_hits(&dom, &[dom.root()], &levels, MessagePhase::Searching, "")?;
        assert_eq!(tally.counts, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn items_outside_every_outer_match_are_not_counted() -> Result<()> {
        let dom = Dom::parse(
            "<div class='section'><i class='item'></i></div><i class='item'></i>",
        )?;
        let levels = vec![Level::new(".section", "section")?, Level::new(".item", "item")?];
        let tally = count_hits(&dom, &[dom.root()], &levels, MessagePhase::Searching, "")?;
        assert_eq!(tally.counts, vec![1, 1]);
        Ok(())
    }

    #[test]
    fn character_references_in_messages_are_decoded_on_render() -> Result<()> {
        let mut dom = Dom::parse(TWO_SECTIONS)?;
        let levels = vec![
            Level::new(".section", "section")?
                .display("#summary")?
                .messages("{1} {2} &ndash; {3} {4}", ""),
            Level::new(".item", "item")?,
        ];
        let tally = count_hits(&dom, &[dom.root()], &levels, MessagePhase::Searching, "")?;
        assert_eq!(tally.renders[0].html, "2 sections &ndash; 4 items");
        tally.apply(&mut dom)?;
        let summary = dom.by_id("summary").expect("summary");
        assert_eq!(dom.text_content(summary), "2 sections \u{2013} 4 items");
        Ok(())
    }

    #[test]
    fn no_matches_yield_zero_counts_and_zero_messages() -> Result<()> {
        let dom = Dom::parse("<p id='summary'></p>")?;
        let tally = count_hits(&dom, &[dom.root()], &levels()?, MessagePhase::Searching, "")?;
        assert_eq!(tally.counts, vec![0, 0]);
        assert_eq!(
            tally.renders,
            vec![Render {
                target: dom.by_id("summary").expect("summary"),
                html: "0 sections, 0 items".into(),
            }]
        );
        Ok(())
    }

    #[test]
    fn placeholders_beyond_the_slice_stay_literal() -> Result<()> {
        let dom = Dom::parse("<div class='section'><b></b><i class='item'></i></div>")?;
        let levels = vec![
            Level::new(".section", "section")?,
            Level::new(".item", "item")?
                .display("b")?
                .messages("{1} {2} of {3} {4}", ""),
        ];
        let tally = count_hits(&dom, &[dom.root()], &levels, MessagePhase::Searching, "")?;
        assert_eq!(tally.renders[0].html, "1 item of {3} {4}");
        Ok(())
    }

    #[test]
    fn hierarchical_counter_advances_throbber_and_switches_messages() -> Result<()> {
        let mut dom = Dom::parse(TWO_SECTIONS)?;
        let mut counter = HierarchicalHitCounter::new("#root", Hierarchy::new(levels()?)?)?;
        let summary = dom.by_id("summary").expect("summary");

        counter.update(&mut dom)?;
        assert_eq!(dom.text_content(summary), "2 sections, 4 items ...");
        counter.update(&mut dom)?;
        assert_eq!(dom.text_content(summary), "2 sections, 4 items. ..");
        assert_eq!(counter.updates(), 2);
        assert_eq!(counter.last_counts(), &[2, 4]);

        counter.mark_done();
        counter.mark_done();
        counter.update(&mut dom)?;
        assert!(counter.is_done());
        assert_eq!(dom.text_content(summary), "2 sections and 4 items");
        Ok(())
    }

    #[test]
    fn missing_root_counts_nothing() -> Result<()> {
        let mut dom = Dom::parse(TWO_SECTIONS)?;
        let mut counter = HierarchicalHitCounter::new("#nope", Hierarchy::new(levels()?)?)?;
        counter.update(&mut dom)?;
        assert_eq!(counter.counts(), &[0, 0]);
        assert_eq!(counter.updates(), 1);
        Ok(())
    }

    #[test]
    fn flat_counter_formats_searching_and_done() -> Result<()> {
        let mut dom = Dom::parse("<p id='status'></p><ul><li class='hit'></li></ul>")?;
        let mut counter = HitCounter::new(
            "#status",
            "{0} in {1}",
            vec![("li.hit", Label::simple("hit")), ("ul", Label::simple("family"))],
        )?;

        counter.update(&mut dom)?;
        let status = dom.by_id("status").expect("status");
        assert_eq!(dom.text_content(status), "Searching ... 1 hit in 1 family");

        counter.mark_done();
        counter.update(&mut dom)?;
        assert_eq!(dom.text_content(status), "Done. 1 hit in 1 family");
        assert_eq!(counter.counts(), &[1, 1]);
        Ok(())
    }

    #[test]
    fn flat_counter_hides_message_until_something_matches() -> Result<()> {
        let mut dom = Dom::parse("<p id='status'></p>")?;
        let mut counter = HitCounter::new("#status", "found {0}", vec![("li", Label::simple("entry"))])?;
        counter.update(&mut dom)?;
        let status = dom.by_id("status").expect("status");
        assert_eq!(dom.text_content(status), "Searching ... ");

        counter.mark_done();
        counter.update(&mut dom)?;
        assert_eq!(dom.text_content(status), "Done. Found 0 entries");
        Ok(())
    }

    #[test]
    fn flat_counter_config_requires_aligned_labels() -> Result<()> {
        let config = HitCounterConfig::from_json_str(
            r##"{"element": "#status", "message": "{0}", "hits": ["li", "ul"], "labels": ["hit"]}"##,
        )?;
        assert!(matches!(
            HitCounter::from_config(&config),
            Err(Error::InvalidHierarchy(_))
        ));
        Ok(())
    }
}
