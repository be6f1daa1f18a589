/// keeps the first `limit` chars of `s`
pub fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
