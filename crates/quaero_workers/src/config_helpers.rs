//! Step/job-definition config resolution shared by both workers:
//! filter-tag fallback chains, portfolio-table detection, and ticker
//! propagation from source documents.

use quaero_protocol::types::{ConfigLookup, ConfigMap, ConfigValue, Document, JobDefinition, JobStep};

/// System tags that never count as a propagatable ticker-like tag, even
/// though they happen to be short and lowercase.
const SYSTEM_TAG_EXCLUSIONS: &[&str] = &["docs", "summary", "web"];

/// `filter_tags`, falling back to `input_tags`, finally the step's own
/// name — §4.5.1 step 2.
pub fn resolve_filter_tags(step: &JobStep) -> Vec<String> {
    if let Some(tags) = step.config_str_list("filter_tags") {
        if !tags.is_empty() {
            return tags;
        }
    }
    if let Some(tags) = step.config_str_list("input_tags") {
        if !tags.is_empty() {
            return tags;
        }
    }
    vec![step.name.clone()]
}

/// A `variables` entry looks like a portfolio row when it carries both a
/// `ticker` and a `units` field.
fn looks_like_portfolio_row(row: &ConfigMap) -> bool {
    row.contains_key("ticker") && row.contains_key("units")
}

/// Renders `jobDef.config["variables"]` as a "Portfolio Holdings Data"
/// markdown table when its entries look like portfolio rows; `None`
/// when `variables` is absent or doesn't match the shape.
pub fn portfolio_table_markdown(job_def: &JobDefinition) -> Option<String> {
    let variables = job_def.variables()?;
    let rows = portfolio_rows(variables);
    if rows.is_empty() {
        return None;
    }

    let mut table = String::from("## Portfolio Holdings Data\n\n| Ticker | Units |\n|---|---|\n");
    for (ticker, units) in &rows {
        table.push_str(&format!("| {ticker} | {units} |\n"));
    }
    Some(table)
}

/// Tickers auto-augmented from portfolio-shaped `variables` rows, used
/// when `required_tickers` is not explicitly configured.
pub fn required_tickers_from_variables(job_def: &JobDefinition) -> Vec<String> {
    job_def
        .variables()
        .map(|vars| portfolio_rows(vars).into_iter().map(|(ticker, _)| ticker).collect())
        .unwrap_or_default()
}

fn portfolio_rows(variables: &ConfigMap) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    for value in variables.values() {
        if let ConfigValue::Map(row) = value {
            if looks_like_portfolio_row(row) {
                let ticker = row.get("ticker").and_then(ConfigValue::as_str).unwrap_or_default().to_string();
                let units = row
                    .get("units")
                    .map(|v| v.as_f64().map(|n| n.to_string()).unwrap_or_else(|| v.as_str().unwrap_or_default().to_string()))
                    .unwrap_or_default();
                if !ticker.is_empty() {
                    rows.push((ticker, units));
                }
            }
        }
    }
    rows
}

/// Collects tag propagation candidates from a set of source documents:
/// explicit `ticker:<code>` tags, plus any short (2-5 char) all-lowercase
/// tag that isn't a known system tag.
pub fn propagate_ticker_tags(source_docs: &[Document]) -> Vec<String> {
    let mut propagated = Vec::new();
    for doc in source_docs {
        for tag in &doc.tags {
            if tag.starts_with("ticker:") {
                if !propagated.contains(tag) {
                    propagated.push(tag.clone());
                }
                continue;
            }
            if is_short_lowercase_tag(tag) && !SYSTEM_TAG_EXCLUSIONS.contains(&tag.as_str()) && !propagated.contains(tag) {
                propagated.push(tag.clone());
            }
        }
    }
    propagated
}

fn is_short_lowercase_tag(tag: &str) -> bool {
    (2..=5).contains(&tag.len()) && tag.chars().all(|c| c.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quaero_protocol::types::WorkerType;

    fn step_with(config: ConfigMap) -> JobStep {
        JobStep { name: "fallback-name".to_string(), worker_type: WorkerType::Summary, config }
    }

    #[test]
    fn filter_tags_falls_back_to_input_tags_then_step_name() {
        let step = step_with(ConfigMap::new());
        assert_eq!(resolve_filter_tags(&step), vec!["fallback-name".to_string()]);

        let mut config = ConfigMap::new();
        config.insert("input_tags".to_string(), ConfigValue::Array(vec![ConfigValue::String("docs".to_string())]));
        let step = step_with(config);
        assert_eq!(resolve_filter_tags(&step), vec!["docs".to_string()]);

        let mut config = ConfigMap::new();
        config.insert("filter_tags".to_string(), ConfigValue::Array(vec![ConfigValue::String("news".to_string())]));
        config.insert("input_tags".to_string(), ConfigValue::Array(vec![ConfigValue::String("docs".to_string())]));
        let step = step_with(config);
        assert_eq!(resolve_filter_tags(&step), vec!["news".to_string()]);
    }

    fn job_def_with_variables(rows: Vec<(&str, &str, i64)>) -> JobDefinition {
        let mut variables = ConfigMap::new();
        for (key, ticker, units) in rows {
            let mut row = ConfigMap::new();
            row.insert("ticker".to_string(), ConfigValue::String(ticker.to_string()));
            row.insert("units".to_string(), ConfigValue::Number(units as f64));
            variables.insert(key.to_string(), ConfigValue::Map(row));
        }
        let mut config = ConfigMap::new();
        config.insert("variables".to_string(), ConfigValue::Map(variables));
        JobDefinition { id: "job-1".to_string(), name: "job".to_string(), steps: vec![], tags: vec![], config }
    }

    #[test]
    fn portfolio_table_rendered_when_rows_have_ticker_and_units() {
        let job_def = job_def_with_variables(vec![("holding_1", "ABC", 100)]);
        let table = portfolio_table_markdown(&job_def).unwrap();
        assert!(table.contains("ABC"));
        assert!(table.contains("Portfolio Holdings Data"));
    }

    #[test]
    fn no_table_when_variables_absent() {
        let job_def = JobDefinition { id: "j".to_string(), name: "j".to_string(), steps: vec![], tags: vec![], config: ConfigMap::new() };
        assert!(portfolio_table_markdown(&job_def).is_none());
    }

    #[test]
    fn required_tickers_auto_augmented_from_portfolio_rows() {
        let job_def = job_def_with_variables(vec![("a", "ABC", 10), ("b", "DEF", 20)]);
        let mut tickers = required_tickers_from_variables(&job_def);
        tickers.sort();
        assert_eq!(tickers, vec!["ABC".to_string(), "DEF".to_string()]);
    }

    #[test]
    fn propagates_explicit_ticker_tags_and_short_lowercase_tags() {
        let doc = Document::new("rss", "s1", "t", "c").with_tags(vec![
            "ticker:abc".to_string(),
            "asx".to_string(),
            "docs".to_string(),
            "announcement".to_string(),
        ]);
        let propagated = propagate_ticker_tags(&[doc]);
        assert!(propagated.contains(&"ticker:abc".to_string()));
        assert!(propagated.contains(&"asx".to_string()));
        assert!(!propagated.contains(&"docs".to_string()));
        assert!(!propagated.contains(&"announcement".to_string()));
    }
}
