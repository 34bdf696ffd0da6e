/// Token cost of a text under the budget proxy: UTF-8 code points divided by
/// an average-chars-per-token constant, rounded up. Calibrated for a mostly
/// Korean corpus, where common tokenizers land near two characters per token.
pub fn estimated_tokens(text: &str, avg_chars_per_token: usize) -> usize {
    let chars = text.chars().count();
    let divisor = avg_chars_per_token.max(1);
    chars.div_ceil(divisor)
}

/// Sequentially admit items until the budget would be exceeded. An item is
/// never split: the first item that does not fit ends the scan.
pub fn admit_within_budget<T>(
    items: Vec<T>,
    token_budget: usize,
    avg_chars_per_token: usize,
    text_of: impl Fn(&T) -> &str,
) -> Vec<T> {
    let mut admitted = Vec::new();
    let mut spent = 0usize;

    for item in items {
        let cost = estimated_tokens(text_of(&item), avg_chars_per_token);
        if spent + cost > token_budget {
            break;
        }
        spent += cost;
        admitted.push(item);
    }

    admitted
}
