//! Set algebra over run-length masks. Every operation returns a canonical
//! mask and maps empty input to empty output.

use super::{RunLengthMask, Span};

/// Sort spans by `(row, col0)` and merge runs in the same row that overlap or
/// touch. Idempotent.
pub fn canonicalize(mask: &RunLengthMask) -> RunLengthMask {
    let mut spans = mask.spans().to_vec();
    spans.sort_unstable();
    RunLengthMask::from_canonical(merge_sorted(spans))
}

/// Merge touching runs of an already sorted span list in place.
fn merge_sorted(mut spans: Vec<Span>) -> Vec<Span> {
    if spans.len() < 2 {
        return spans;
    }
    let mut write = 0;
    for read in 1..spans.len() {
        let next = spans[read];
        let cur = &mut spans[write];
        if cur.touches(&next) {
            cur.col1 = cur.col1.max(next.col1);
        } else {
            write += 1;
            spans[write] = next;
        }
    }
    spans.truncate(write + 1);
    spans
}

pub fn union(a: &RunLengthMask, b: &RunLengthMask) -> RunLengthMask {
    let (sa, sb) = (a.spans(), b.spans());
    let mut merged = Vec::with_capacity(sa.len() + sb.len());
    merged.extend_from_slice(sa);
    merged.extend_from_slice(sb);
    merged.sort_unstable();
    RunLengthMask::from_canonical(merge_sorted(merged))
}

pub fn intersect(a: &RunLengthMask, b: &RunLengthMask) -> RunLengthMask {
    let sa = a.canonical_spans();
    let sb = b.canonical_spans();
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);

    while i < sa.len() && j < sb.len() {
        let (x, y) = (sa[i], sb[j]);
        if x.row < y.row {
            i += 1;
            continue;
        }
        if y.row < x.row {
            j += 1;
            continue;
        }
        let lo = x.col0.max(y.col0);
        let hi = x.col1.min(y.col1);
        if lo <= hi {
            out.push(Span::new(x.row, lo, hi));
        }
        if x.col1 < y.col1 {
            i += 1;
        } else {
            j += 1;
        }
    }

    RunLengthMask::from_canonical(out)
}

/// Pixels of `a` that are not in `b`.
pub fn subtract(a: &RunLengthMask, b: &RunLengthMask) -> RunLengthMask {
    let sa = a.canonical_spans();
    let sb = b.canonical_spans();
    let mut out = Vec::with_capacity(sa.len());
    let mut j = 0;

    for s in sa.iter() {
        while j < sb.len() && (sb[j].row < s.row || (sb[j].row == s.row && sb[j].col1 < s.col0))
        {
            j += 1;
        }
        let mut start = s.col0;
        let mut k = j;
        while k < sb.len() && sb[k].row == s.row && sb[k].col0 <= s.col1 {
            if sb[k].col0 > start {
                out.push(Span::new(s.row, start, sb[k].col0 - 1));
            }
            start = start.max(sb[k].col1 + 1);
            k += 1;
        }
        if start <= s.col1 {
            out.push(Span::new(s.row, start, s.col1));
        }
    }

    RunLengthMask::from_canonical(out)
}

/// Square dilation: every span grows by `n` columns on each side and is
/// copied into the `n` rows above and below.
pub fn dilate(mask: &RunLengthMask, n: u32) -> RunLengthMask {
    if n == 0 {
        return canonicalize(mask);
    }
    let n = n as i32;
    let mut grown = Vec::with_capacity(mask.spans().len() * (2 * n as usize + 1));
    for s in mask.spans() {
        for dr in -n..=n {
            grown.push(Span::new(s.row + dr, s.col0 - n, s.col1 + n));
        }
    }
    grown.sort_unstable();
    RunLengthMask::from_canonical(merge_sorted(grown))
}
