//! Topic pattern matching (§4.2, §6).
//!
//! Grounded in `iteration346_message_broker.py::_match_topic`'s two-pointer
//! scan, extended to the bit-exact grammar SPEC_FULL.md requires: `.`
//! separates segments, `*` matches exactly one segment, and `#` matches zero
//! or more trailing segments — including when `#` is immediately followed by
//! more literal segments, via backtracking lookahead, which the original
//! Python's early `return true` on `#` does not handle.

/// Match a topic-exchange binding key against a routing key.
///
/// `#` is only valid appearing once and matches the remainder of the key
/// greedily, backtracking segment-by-segment so that any literal/`*`
/// segments declared after it still have to match (Open Question #2:
/// `#` also matches zero trailing segments).
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_segments(&pattern, &key)
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.first() {
        None => key.is_empty(),
        Some(&"#") => {
            let rest = &pattern[1..];
            // '#' greedily consumes from the end backwards: try consuming
            // 0, 1, 2, ... of the remaining key segments until `rest`
            // matches what's left.
            for split in 0..=key.len() {
                if match_segments(rest, &key[split..]) {
                    return true;
                }
            }
            false
        }
        Some(&"*") => {
            if key.is_empty() {
                return false;
            }
            match_segments(&pattern[1..], &key[1..])
        }
        Some(seg) => {
            if key.first() != Some(seg) {
                return false;
            }
            match_segments(&pattern[1..], &key[1..])
        }
    }
}

/// Simple shell-style glob over an un-segmented string (used for route-rule
/// task-name patterns, which are not dot-delimited): `*` matches any run of
/// characters, everything else matches literally.
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    fn helper(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => {
                for i in 0..=t.len() {
                    if helper(&p[1..], &t[i..]) {
                        return true;
                    }
                }
                false
            }
            Some(c) => t.first() == Some(c) && helper(&p[1..], &t[1..]),
        }
    }
    helper(pattern.as_bytes(), text.as_bytes())
}
