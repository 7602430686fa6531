use std::collections::BTreeSet;

/// Scan free text for group-identifier tokens and canonicalize them.
///
/// Three surface forms occur in the wild: hyphenated (`BIA-01`), concatenated
/// (`BIA01`) and space-separated (`BIA 1`), each with a 1-2 digit sequence
/// number. All canonicalize to `BI{A|B}-NN` with a zero-padded sequence.
pub fn extract_group_ids<I, S>(cells: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut groups = BTreeSet::new();
    for cell in cells {
        let upper = cell.as_ref().trim().to_uppercase();
        scan_cell(&upper, &mut groups);
    }
    groups
}

fn scan_cell(text: &str, out: &mut BTreeSet<String>) {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match try_match(&chars, i, out) {
            Some(end) => i = end,
            None => i += 1,
        }
    }
}

/// Try to match one token at `start`; on success push its canonical form and
/// return the index just past the digits.
fn try_match(chars: &[char], start: usize, out: &mut BTreeSet<String>) -> Option<usize> {
    let n = chars.len();
    if start + 3 > n {
        return None;
    }
    if chars[start] != 'B' || chars[start + 1] != 'I' {
        return None;
    }
    let division = chars[start + 2];
    if division != 'A' && division != 'B' {
        return None;
    }
    // Word boundary before the token.
    if start > 0 && chars[start - 1].is_alphanumeric() {
        return None;
    }

    let mut j = start + 3;
    // Optional hyphen, then optional spaces. Spaces before a hyphen are not a
    // recognized form ("BIA -01" stays unmatched).
    if j < n && chars[j] == '-' {
        j += 1;
    }
    while j < n && chars[j].is_whitespace() {
        j += 1;
    }

    let digits_start = j;
    while j < n && chars[j].is_ascii_digit() && j - digits_start < 2 {
        j += 1;
    }
    let digit_count = j - digits_start;
    if digit_count == 0 {
        return None;
    }
    // Word boundary after the digits (rejects three-digit sequences).
    if j < n && chars[j].is_alphanumeric() {
        return None;
    }

    let num: u32 = chars[digits_start..j]
        .iter()
        .collect::<String>()
        .parse()
        .ok()?;
    out.insert(format!("BI{}-{:02}", division, num));
    Some(j)
}
