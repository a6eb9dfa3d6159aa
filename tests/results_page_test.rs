use hit_counter::{
    Error, HierarchicalHitCounter, HierarchyConfig, HitCounter, HitCounterConfig, Page,
};

const RESULTS_SHELL: &str = r#"
<!DOCTYPE html>
<html>
  <body>
    <p id="flat-status"></p>
    <div id="results"><h2 id="progress"></h2></div>
  </body>
</html>
"#;

const QUERY_COUNTER: &str = r##"{
    "root": "#results",
    "hits": ["div.query", "tr.hit"],
    "labels": [["quer", "y", "ies"], "domain hit"],
    "display": ["#progress", "caption.query-status"],
    "searching_messages": ["Searching{0} {3} {4} in {1} {2}", "{1} {2}{0}"],
    "done_messages": ["Done: {3} {4} in {1} {2}", "{1} {2}"]
}"##;

fn query_block(name: &str, hits: usize) -> String {
    let rows = (0..hits)
        .map(|idx| format!("<tr class=\"hit\"><td>{name}-{idx}</td></tr>"))
        .collect::<String>();
    format!(
        "<div class=\"query\" id=\"{name}\"><table><caption class=\"query-status\"></caption>{rows}</table></div>"
    )
}

fn results_page() -> hit_counter::Result<(Page, hit_counter::CounterId)> {
    let mut page = Page::from_html(RESULTS_SHELL)?;
    let config = HierarchyConfig::from_json_str(QUERY_COUNTER)?;
    let id = page.install(HierarchicalHitCounter::from_config(&config)?);
    Ok((page, id))
}

#[test]
fn empty_results_page_reports_zero_hits() -> hit_counter::Result<()> {
    let (mut page, id) = results_page()?;
    page.auto_update(id, None)?;
    page.assert_text("#progress", "Searching ... 0 domain hits in 0 queries")?;
    Ok(())
}

#[test]
fn streamed_queries_are_counted_while_searching_and_finalized_when_loaded()
-> hit_counter::Result<()> {
    let (mut page, id) = results_page()?;
    page.auto_update(id, Some(250))?;
    page.done_when_ready(id)?;

    page.append_html("#results", &query_block("q1", 2))?;
    page.advance_time(250)?;
    page.assert_text("#progress", "Searching. .. 2 domain hits in 1 query")?;
    page.assert_text("#q1 caption", "2 domain hits. ..")?;

    page.append_html("#results", &query_block("q2", 1))?;
    page.append_html("#results", &query_block("q3", 0))?;
    page.advance_time(250)?;
    page.assert_text("#progress", "Searching.. . 3 domain hits in 3 queries")?;
    page.assert_text("#q2 caption", "1 domain hit.. .")?;
    page.assert_text("#q3 caption", "0 domain hits.. .")?;

    page.finish_loading()?;
    page.assert_text("#progress", "Done: 3 domain hits in 3 queries")?;
    page.assert_text("#q1 caption", "2 domain hits")?;

    page.flush()?;
    assert!(page.pending_timers().is_empty());
    assert_eq!(page.counter(id)?.counts(), &[3, 3]);
    Ok(())
}

#[test]
fn hits_outside_the_root_are_ignored() -> hit_counter::Result<()> {
    let (mut page, id) = results_page()?;
    page.append_html("body", &query_block("stray", 4))?;
    page.append_html("#results", &query_block("q1", 1))?;
    page.update(id)?;
    assert_eq!(page.counter(id)?.counts(), &[1, 1]);
    page.assert_text("#stray caption", "")?;
    Ok(())
}

#[test]
fn flat_counter_summarizes_the_whole_document() -> hit_counter::Result<()> {
    let mut page = Page::from_html(RESULTS_SHELL)?;
    let config = HitCounterConfig::from_json_str(
        r##"{
            "element": "#flat-status",
            "message": "{0} across {1}",
            "hits": ["tr.hit", "div.query"],
            "labels": [["match", "matches"], ["quer", "y", "ies"]]
        }"##,
    )?;
    let id = page.install(HitCounter::from_config(&config)?);
    page.auto_update(id, None)?;
    page.assert_text("#flat-status", "Searching ... ")?;

    page.append_html("#results", &query_block("q1", 3))?;
    page.advance_time(500)?;
    page.assert_text("#flat-status", "Searching. .. 3 matches across 1 query")?;

    page.done_when_ready(id)?;
    page.finish_loading()?;
    page.assert_text("#flat-status", "Done. 3 matches across 1 query")?;
    Ok(())
}

#[test]
fn invalid_configs_are_rejected_before_install() -> hit_counter::Result<()> {
    let mut config = HierarchyConfig::from_json_str(QUERY_COUNTER)?;
    config.labels.pop();
    assert!(matches!(
        HierarchicalHitCounter::from_config(&config),
        Err(Error::InvalidHierarchy(_))
    ));

    let mut config = HierarchyConfig::from_json_str(QUERY_COUNTER)?;
    config.root = "#results >".into();
    assert!(matches!(
        HierarchicalHitCounter::from_config(&config),
        Err(Error::UnsupportedSelector(_))
    ));

    assert!(matches!(
        HierarchyConfig::from_json_str("[]"),
        Err(Error::Config(_))
    ));
    Ok(())
}
