//! Text normalization helpers shared by the filter, the index, and the search engine.

/// Replaces word separators with spaces and collapses runs of whitespace.
pub fn separators_to_spaces(value: &str) -> String {
    let mut normalized = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '_' | '-' | '.' | '+' | '(' | ')' | '[' | ']') {
            normalized.push(' ');
        } else {
            normalized.push(ch);
        }
    }
    collapse_whitespace(&normalized)
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn title_case_words(value: &str) -> String {
    let collapsed = collapse_whitespace(value);
    collapsed
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            let Some(first) = chars.next() else {
                return String::new();
            };
            let mut out = String::new();
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
            out
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Last path segment, any separator style, with query/fragment suffixes removed.
pub fn file_name_of(path: &str) -> &str {
    let without_query = path
        .split(['?', '#'])
        .next()
        .unwrap_or(path);
    without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query)
}

/// File name without its final extension.
pub fn file_stem_of(path: &str) -> &str {
    let file_name = file_name_of(path);
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(index) => &file_name[..index],
    }
}

/// Human-readable name derived from a path's file stem.
pub fn display_name_from_path(path: &str) -> String {
    let name = title_case_words(&separators_to_spaces(file_stem_of(path)));
    if name.is_empty() {
        "Unknown".to_string()
    } else {
        name
    }
}
