//! # Glob Matching
//!
//! Byte-wise pattern matching for `SCAN ... MATCH`:
//! - `*` any run of bytes (including none)
//! - `?` exactly one byte
//! - `[abc]`, `[a-z]`, `[^a-z]` byte classes
//! - `\x` the literal byte `x`
//!
//! `*` is matched with single-point backtracking, so patterns with many stars
//! stay linear-ish instead of exponential.

/// Returns true when `text` matches `pattern` in full.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    // Position after the last `*` and the text index it is currently absorbing up to.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if let Some(next_p) = step(pattern, p, text[t]) {
            match next_p {
                Step::Star => {
                    while p < pattern.len() && pattern[p] == b'*' {
                        p += 1;
                    }
                    if p == pattern.len() {
                        return true;
                    }
                    backtrack = Some((p, t));
                    continue;
                }
                Step::Advance(next) => {
                    p = next;
                    t += 1;
                    continue;
                }
            }
        }

        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

enum Step {
    Star,
    Advance(usize),
}

/// Tries to consume `byte` with the pattern token at `p`.
fn step(pattern: &[u8], p: usize, byte: u8) -> Option<Step> {
    let token = *pattern.get(p)?;
    match token {
        b'*' => Some(Step::Star),
        b'?' => Some(Step::Advance(p + 1)),
        b'[' => {
            let (matched, next) = match_class(pattern, p, byte);
            matched.then_some(Step::Advance(next))
        }
        b'\\' if p + 1 < pattern.len() => {
            (pattern[p + 1] == byte).then_some(Step::Advance(p + 2))
        }
        literal => (literal == byte).then_some(Step::Advance(p + 1)),
    }
}

/// Matches one byte against the class starting at `pattern[start] == b'['`.
/// Returns whether it matched and the index just past the class.
fn match_class(pattern: &[u8], start: usize, byte: u8) -> (bool, usize) {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == byte;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= lo <= byte && byte <= hi;
            i += 3;
        } else {
            matched |= pattern[i] == byte;
            i += 1;
        }
    }
    // Unterminated classes run to the end of the pattern.
    if i < pattern.len() {
        i += 1;
    }
    (matched != negate, i)
}
