//! Cache content-hash: first 8 hex chars of `md5(prompt + "|docs:" +
//! sorted-joined-doc-ids)`. Stable under reordering of the source
//! document set, sensitive to any change in the prompt or the set of
//! ids it was computed over.

pub fn content_hash(prompt: &str, doc_ids: &[String]) -> String {
    let mut sorted = doc_ids.to_vec();
    sorted.sort();
    let joined = sorted.join(",");
    let digest = md5::compute(format!("{prompt}|docs:{joined}"));
    format!("{digest:x}")[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_under_doc_id_reordering() {
        let a = content_hash("summarize", &["b".to_string(), "a".to_string()]);
        let b = content_hash("summarize", &["a".to_string(), "b".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn changes_when_prompt_changes() {
        let a = content_hash("summarize", &["a".to_string()]);
        let b = content_hash("summarize v2", &["a".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn changes_when_doc_set_changes() {
        let a = content_hash("summarize", &["a".to_string()]);
        let b = content_hash("summarize", &["a".to_string(), "b".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn is_eight_hex_chars() {
        let h = content_hash("x", &[]);
        assert_eq!(h.len(), 8);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
