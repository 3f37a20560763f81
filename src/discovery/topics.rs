//! Rule-based topic fallback used when the embedding/LLM providers fail
//! cluster labeling, per spec.md §4.9 step 3/4. A static keyword table
//! mirrors the regex-table idea without adding a `regex` dependency the
//! rest of the crate doesn't otherwise need (see DESIGN.md).

const TOPIC_TABLE: &[(&str, &str)] = &[
    ("election", "elections"),
    ("president", "politics"),
    ("senate", "politics"),
    ("congress", "politics"),
    ("fomc", "economy"),
    ("interest rate", "economy"),
    ("inflation", "economy"),
    ("recession", "economy"),
    ("gdp", "economy"),
    ("war", "geopolitics"),
    ("ceasefire", "geopolitics"),
    ("sanctions", "geopolitics"),
    ("nato", "geopolitics"),
    ("crypto", "finance"),
    ("bitcoin", "finance"),
    ("ethereum", "finance"),
    ("ai ", "tech"),
    ("artificial intelligence", "ai"),
];

/// Closed taxonomy from spec.md §4.9 step 4.
pub fn classify(question: &str) -> &'static str {
    let q = question.to_lowercase();
    for (needle, topic) in TOPIC_TABLE {
        if q.contains(needle) {
            return topic;
        }
    }
    "other"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_topics() {
        assert_eq!(classify("Will the president resign?"), "politics");
        assert_eq!(classify("Will the Fed cut rates at the next FOMC?"), "economy");
    }

    #[test]
    fn falls_back_to_other() {
        assert_eq!(classify("Will the sun rise tomorrow?"), "other");
    }
}
