//! Time primitives shared by the engine and its collaborators

/// Engine-relative time in milliseconds.
///
/// Every component is driven by an explicit `now` instead of reading a wall
/// clock, so the whole engine can be stepped deterministically.
pub type Millis = u64;

/// Milliseconds between `since` and `now`, zero if `now` is earlier.
pub fn elapsed_ms(since: Millis, now: Millis) -> Millis {
    now.saturating_sub(since)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_saturates() {
        assert_eq!(elapsed_ms(100, 250), 150);
        assert_eq!(elapsed_ms(250, 100), 0);
    }
}
