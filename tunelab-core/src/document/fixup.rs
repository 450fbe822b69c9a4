//! Pre-parse repair for the optimizer's non-standard JSON.
//!
//! The optimizer writes infinite limits as a bare `inf` token
//! (`"lower_bound_drawdown_worst": inf,`). Those tokens are quoted before
//! the text reaches `serde_json`. String literals are left alone.

/// Quote bare `inf` / `-inf` value tokens.
pub fn fix_json(content: &str) -> String {
    let bytes = content.as_bytes();
    let mut out = String::with_capacity(content.len() + 16);
    let mut i = 0;
    let mut in_string = false;
    let mut last = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 2,
                b'"' => {
                    in_string = false;
                    i += 1;
                }
                _ => i += 1,
            }
            continue;
        }
        if b == b'"' {
            in_string = true;
            i += 1;
            continue;
        }

        let negative = b == b'-' && bytes[i + 1..].starts_with(b"inf");
        let token_start = if negative { i + 1 } else { i };
        if bytes[token_start..].starts_with(b"inf")
            && is_boundary(bytes, i.checked_sub(1))
            && is_boundary(bytes, Some(token_start + 3))
        {
            let end = token_start + 3;
            out.push_str(&content[last..i]);
            out.push('"');
            out.push_str(&content[i..end]);
            out.push('"');
            last = end;
            i = end;
            continue;
        }
        i += 1;
    }
    out.push_str(&content[last..]);
    out
}

fn is_boundary(bytes: &[u8], idx: Option<usize>) -> bool {
    match idx.and_then(|i| bytes.get(i)) {
        None => true,
        Some(b) => !(b.is_ascii_alphanumeric() || *b == b'_' || *b == b'.'),
    }
}
