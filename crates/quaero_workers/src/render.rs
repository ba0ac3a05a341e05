//! Converts a schema-enforced generation's JSON payload into markdown.
//! Format-specific renderers are selected by the presence of
//! diagnostic fields; everything else falls through to a generic
//! key-priority renderer.

use serde_json::Value;

const LEADING_KEYS: &[&str] = &["title", "name", "summary", "ticker", "headline"];
const TRAILING_KEYS: &[&str] = &["recommendations", "warnings", "alerts"];

pub fn render(value: &Value) -> String {
    if value.get("signal_noise_assessment").is_some() {
        return render_announcement_analysis(value);
    }
    if let Some(Value::Object(_)) = Some(value) {
        if value.get("ticker").and_then(Value::as_str).is_some() && value.get("stocks").is_none() {
            return render_single_stock(value);
        }
    }
    if let Some(Value::Array(stocks)) = value.get("stocks") {
        // Discriminate once, at the top: a `conviction_score` on the first
        // element means this is a purchase-conviction list, never the
        // plain stock-analysis renderer for the same document.
        let is_conviction = stocks.first().map(|s| s.get("conviction_score").is_some()).unwrap_or(false);
        return if is_conviction {
            render_conviction_list(value, stocks)
        } else {
            render_stock_list(value, stocks)
        };
    }
    render_generic(value, 1)
}

fn render_announcement_analysis(value: &Value) -> String {
    let mut out = String::new();
    if let Some(title) = value.get("title").and_then(Value::as_str) {
        out.push_str(&format!("# {title}\n\n"));
    } else {
        out.push_str("# Announcement Analysis\n\n");
    }
    if let Some(assessment) = value.get("signal_noise_assessment").and_then(Value::as_str) {
        out.push_str(&format!("**Signal / Noise**: {assessment}\n\n"));
    }
    for (key, val) in value.as_object().into_iter().flatten() {
        if key == "title" || key == "signal_noise_assessment" {
            continue;
        }
        out.push_str(&render_field(key, val, 2));
    }
    out
}

fn render_single_stock(value: &Value) -> String {
    let ticker = value.get("ticker").and_then(Value::as_str).unwrap_or("UNKNOWN");
    let mut out = format!("# {ticker}\n\n");
    for (key, val) in value.as_object().into_iter().flatten() {
        if key == "ticker" {
            continue;
        }
        out.push_str(&render_field(key, val, 2));
    }
    out
}

fn render_stock_list(value: &Value, stocks: &[Value]) -> String {
    let mut out = String::from("# Stock Analysis\n\n");
    for stock in stocks {
        let ticker = stock.get("ticker").and_then(Value::as_str).unwrap_or("UNKNOWN");
        out.push_str(&format!("## {ticker}\n\n"));
        for (key, val) in stock.as_object().into_iter().flatten() {
            if key == "ticker" {
                continue;
            }
            out.push_str(&render_field(key, val, 3));
        }
    }
    for (key, val) in value.as_object().into_iter().flatten() {
        if key == "stocks" {
            continue;
        }
        out.push_str(&render_field(key, val, 2));
    }
    out
}

fn render_conviction_list(value: &Value, stocks: &[Value]) -> String {
    let mut out = String::from("# Purchase Conviction\n\n");
    for stock in stocks {
        let ticker = stock.get("ticker").and_then(Value::as_str).unwrap_or("UNKNOWN");
        let score = stock.get("conviction_score").map(value_to_inline).unwrap_or_default();
        out.push_str(&format!("## {ticker} — conviction {score}\n\n"));
        for (key, val) in stock.as_object().into_iter().flatten() {
            if key == "ticker" || key == "conviction_score" {
                continue;
            }
            out.push_str(&render_field(key, val, 3));
        }
    }
    for (key, val) in value.as_object().into_iter().flatten() {
        if key == "stocks" {
            continue;
        }
        out.push_str(&render_field(key, val, 2));
    }
    out
}

fn render_generic(value: &Value, depth: usize) -> String {
    let Some(obj) = value.as_object() else {
        return value_to_inline(value);
    };

    let mut keys: Vec<&String> = obj.keys().collect();
    keys.sort_by_key(|k| key_priority(k));

    let mut out = String::new();
    for key in keys {
        out.push_str(&render_field(key, &obj[key], depth));
    }
    out
}

fn key_priority(key: &str) -> (i32, String) {
    if let Some(i) = LEADING_KEYS.iter().position(|k| *k == key) {
        return (-1 - i as i32, key.to_string());
    }
    if let Some(i) = TRAILING_KEYS.iter().position(|k| *k == key) {
        return (100 + i as i32, key.to_string());
    }
    (0, key.to_string())
}

fn render_field(key: &str, value: &Value, depth: usize) -> String {
    let heading = "#".repeat(depth.min(6));
    let title = humanize_key(key);

    match value {
        Value::Array(items) if items.iter().all(|v| !v.is_object() && !v.is_array()) => {
            let mut out = format!("{heading} {title}\n\n");
            for item in items {
                out.push_str(&format!("- {}\n", value_to_inline(item)));
            }
            out.push('\n');
            out
        }
        Value::Array(items) => {
            let mut out = format!("{heading} {title}\n\n");
            for (i, item) in items.iter().enumerate() {
                out.push_str(&format!("{} Item {}\n\n", "#".repeat((depth + 1).min(6)), i + 1));
                out.push_str(&render_generic(item, depth + 2));
            }
            out
        }
        Value::Object(_) => {
            let mut out = format!("{heading} {title}\n\n");
            out.push_str(&render_generic(value, depth + 1));
            out
        }
        _ => format!("{heading} {title}\n\n{}\n\n", value_to_inline(value)),
    }
}

fn humanize_key(key: &str) -> String {
    key.replace(['_', '-'], " ")
        .split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn value_to_inline(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generic_renderer_contains_every_top_level_key_exactly_once() {
        let value = json!({
            "title": "Weekly Digest",
            "summary": "All quiet",
            "warnings": ["none"],
        });
        let markdown = render(&value);
        for key in ["Title", "Summary", "Warnings"] {
            assert_eq!(markdown.matches(key).count(), 1, "expected exactly one heading for {key}");
        }
    }

    #[test]
    fn generic_renderer_orders_leading_and_trailing_keys() {
        let value = json!({
            "warnings": ["be careful"],
            "title": "Report",
            "body": "details",
        });
        let markdown = render(&value);
        let title_pos = markdown.find("Title").unwrap();
        let body_pos = markdown.find("Body").unwrap();
        let warnings_pos = markdown.find("Warnings").unwrap();
        assert!(title_pos < body_pos);
        assert!(body_pos < warnings_pos);
    }

    #[test]
    fn announcement_analysis_selected_by_signal_noise_field() {
        let value = json!({"title": "ACME raises guidance", "signal_noise_assessment": "signal"});
        let markdown = render(&value);
        assert!(markdown.starts_with("# ACME raises guidance"));
        assert!(markdown.contains("Signal / Noise"));
    }

    #[test]
    fn single_stock_selected_by_root_ticker() {
        let value = json!({"ticker": "ABC", "recommendation": "buy"});
        let markdown = render(&value);
        assert!(markdown.starts_with("# ABC"));
    }

    #[test]
    fn stocks_array_discriminates_conviction_vs_plain_at_the_top() {
        let plain = json!({"stocks": [{"ticker": "ABC", "notes": "steady"}]});
        let conviction = json!({"stocks": [{"ticker": "DEF", "conviction_score": 8}]});
        assert!(render(&plain).contains("Stock Analysis"));
        assert!(render(&conviction).contains("Purchase Conviction"));
        assert!(!render(&conviction).contains("Stock Analysis"));
    }

    #[test]
    fn primitive_arrays_render_as_bullets_object_arrays_as_subsections() {
        let value = json!({
            "tags": ["a", "b"],
            "holdings": [{"ticker": "ABC", "units": 10}],
        });
        let markdown = render(&value);
        assert!(markdown.contains("- a\n"));
        assert!(markdown.contains("Item 1"));
    }
}
