//! Best-effort recovery of a JSON document a provider cut off mid
//! generation. Tracks a bracket stack and the position of the last
//! completed top-level element or array item, then truncates and
//! closes what remains open.

/// Parses `text` as JSON; on failure, repairs a truncated tail and
/// retries once.
pub fn parse_with_repair(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(_) => {
            let repaired = repair(text);
            serde_json::from_str(&repaired)
        }
    }
}

/// Scans `text` tracking bracket depth with string/escape awareness,
/// remembering the last position at which a value or array element was
/// known-complete (a top-level comma or matching close bracket), then
/// truncates there, strips a dangling comma, and appends closers for
/// every bracket still open.
pub fn repair(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_valid_pos = 0usize;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                if stack.len() <= 1 {
                    last_valid_pos = i + 1;
                }
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' | '[' => stack.push(c),
            '}' => {
                stack.pop();
                if stack.len() <= 1 {
                    last_valid_pos = i + 1;
                }
            }
            ']' => {
                stack.pop();
                if stack.len() <= 1 {
                    last_valid_pos = i + 1;
                }
            }
            ',' if stack.len() == 1 => last_valid_pos = i + 1,
            't' | 'f' | 'n' | '0'..='9' | '-' => {
                // scalar literal; only counts as complete once we hit the
                // delimiter that follows it, handled by the ',' / close-bracket arms
            }
            _ => {}
        }
    }

    if last_valid_pos == 0 || last_valid_pos > chars.len() {
        last_valid_pos = chars.len();
    }

    let mut truncated: String = chars[..last_valid_pos].iter().collect();
    while truncated.trim_end().ends_with(',') {
        let trimmed_len = truncated.trim_end().len();
        truncated.truncate(trimmed_len - 1);
    }

    // Recompute the bracket stack over the truncated text so closers
    // line up even when the truncation point fell inside a nested value.
    let mut reopened: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in truncated.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => reopened.push(c),
            '}' | ']' => {
                reopened.pop();
            }
            _ => {}
        }
    }

    for open in reopened.iter().rev() {
        truncated.push(if *open == '{' { '}' } else { ']' });
    }

    truncated
}
