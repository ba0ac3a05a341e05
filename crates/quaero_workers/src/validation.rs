//! Output validation for the summary worker: pattern literals, ticker
//! presence, and benchmark-misuse detection, plus the feedback section
//! appended to the prompt before a regeneration attempt.

use quaero_protocol::ValidationResult;

fn ticker_patterns(ticker: &str) -> Vec<String> {
    vec![
        format!("ASX: {ticker}"),
        format!("ASX:{ticker}"),
        format!("| {ticker} |"),
        format!("| {ticker}\t"),
        format!("## {ticker}"),
        format!("### {ticker}"),
        format!("**{ticker}**"),
        format!("({ticker})"),
    ]
}

fn benchmark_misuse_patterns(benchmark: &str) -> Vec<String> {
    vec![
        format!("ASX: {benchmark}\nFUNDAMENTAL ANALYSIS:"),
        format!("CONVICTION SCORE: {benchmark}"),
        format!("| {benchmark} | QUALITY"),
        format!("| {benchmark} |\t"),
    ]
}

/// Runs the three checks in §4.5.3 against `output`, tagging `iteration`
/// onto the result.
pub fn validate(
    output: &str,
    required_tickers: &[String],
    benchmark_codes: &[String],
    output_validation: &[String],
    iteration: u32,
) -> ValidationResult {
    let mut result = ValidationResult::passed(iteration);
    let upper = output.to_uppercase();

    for literal in output_validation {
        if !output.contains(literal.as_str()) {
            result.pattern_issues.push(literal.clone());
        }
    }

    for ticker in required_tickers {
        let ticker_upper = ticker.to_uppercase();
        let found = ticker_patterns(&ticker_upper).iter().any(|p| upper.contains(p.as_str()));
        if !found {
            result.missing_tickers.push(ticker.clone());
        }
    }

    for benchmark in benchmark_codes {
        let benchmark_upper = benchmark.to_uppercase();
        for pattern in benchmark_misuse_patterns(&benchmark_upper) {
            if upper.contains(pattern.as_str()) {
                result
                    .benchmark_issues
                    .push(format!("benchmark '{benchmark}' treated as a stock (matched pattern '{pattern}')"));
            }
        }
    }

    result.recompute_valid();
    result
}

/// Builds the "VALIDATION FEEDBACK" section appended to the prompt
/// before a regeneration attempt.
pub fn feedback_section(result: &ValidationResult) -> String {
    let mut section = String::from("\n\n---\nVALIDATION FEEDBACK (MUST ADDRESS BEFORE RESUBMITTING):\n");

    if !result.missing_tickers.is_empty() {
        section.push_str("\nMissing required tickers — for each, write `ASX: <TICKER>` and provide full analysis:\n");
        for ticker in &result.missing_tickers {
            section.push_str(&format!("- {ticker}\n"));
        }
    }

    if !result.benchmark_issues.is_empty() {
        section.push_str("\nBenchmarks incorrectly treated as stocks — use them for comparison only, never as analysis subjects:\n");
        for issue in &result.benchmark_issues {
            section.push_str(&format!("- {issue}\n"));
        }
    }

    if !result.pattern_issues.is_empty() {
        section.push_str("\nRequired text missing from the output:\n");
        for pattern in &result.pattern_issues {
            section.push_str(&format!("- {pattern}\n"));
        }
    }

    section
}

/// Message for the terminal failure after the third unresolved attempt.
pub fn failure_message(result: &ValidationResult) -> String {
    let mut issues = Vec::new();
    if !result.missing_tickers.is_empty() {
        issues.push(format!("missing tickers: {}", result.missing_tickers.join(", ")));
    }
    if !result.benchmark_issues.is_empty() {
        issues.push(format!("benchmark misuse: {}", result.benchmark_issues.join("; ")));
    }
    if !result.pattern_issues.is_empty() {
        issues.push(format!("missing required text: {}", result.pattern_issues.join(", ")));
    }
    format!(
        "validation failed after {} attempts ({})",
        result.iteration_count,
        issues.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_missing_ticker() {
        let result = validate("ASX: ABC\n\nFull analysis here.", &["ABC".to_string(), "DEF".to_string()], &[], &[], 1);
        assert!(!result.valid);
        assert_eq!(result.missing_tickers, vec!["DEF".to_string()]);
    }

    #[test]
    fn accepts_ticker_in_table_pipe_form() {
        let result = validate("| ABC | Strong Buy |", &["ABC".to_string()], &[], &[], 1);
        assert!(result.missing_tickers.is_empty());
    }

    #[test]
    fn flags_benchmark_treated_as_stock() {
        let result = validate("| XJO | QUALITY | High |", &[], &["XJO".to_string()], &[], 1);
        assert!(!result.valid);
        assert_eq!(result.benchmark_issues.len(), 1);
    }

    #[test]
    fn pattern_validation_requires_literal_substring() {
        let result = validate("no disclaimer here", &[], &[], &["Past performance".to_string()], 1);
        assert_eq!(result.pattern_issues, vec!["Past performance".to_string()]);
    }

    #[test]
    fn feedback_section_names_missing_ticker_with_instruction() {
        let mut result = ValidationResult::passed(1);
        result.missing_tickers.push("DEF".to_string());
        result.recompute_valid();
        let feedback = feedback_section(&result);
        assert!(feedback.contains("DEF"));
        assert!(feedback.contains("ASX: <TICKER>"));
    }

    #[test]
    fn all_three_checks_passing_yields_valid() {
        let result = validate(
            "ASX: ABC full analysis. Past performance is not a guarantee.",
            &["ABC".to_string()],
            &[],
            &["Past performance".to_string()],
            1,
        );
        assert!(result.valid);
    }
}
