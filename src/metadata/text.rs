// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Elements that end the current line when flattened
const LINE_TAGS: &[&str] = &[
    "li", "ul", "ol", "div", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote",
];

/// Elements whose content is dropped entirely
const SKIPPED_TAGS: &[&str] = &["script", "style"];

/// Convert HTML shownotes to plain text
///
/// Tags are stripped, block elements become line breaks and entities are
/// decoded. Input without any markup keeps its own line structure.
pub fn html_to_text(html: &str) -> String {
    if !contains_markup(html) {
        return normalize_lines(&html_escape::decode_html_entities(html));
    }

    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    let mut skipping: Option<&str> = None;

    while let Some(start) = rest.find('<') {
        let (text, tail) = rest.split_at(start);
        if skipping.is_none() {
            push_text(&mut out, text);
        }

        let Some(tag) = parse_tag(tail) else {
            if skipping.is_none() {
                out.push('<');
            }
            rest = &tail[1..];
            continue;
        };
        rest = &tail[tag.len..];

        if let Some(skipped) = skipping {
            if tag.closing && tag.name.eq_ignore_ascii_case(skipped) {
                skipping = None;
            }
            continue;
        }

        if !tag.closing
            && let Some(skipped) = SKIPPED_TAGS
                .iter()
                .find(|name| tag.name.eq_ignore_ascii_case(name))
        {
            skipping = Some(*skipped);
            continue;
        }

        if tag.name.eq_ignore_ascii_case("br") {
            out.push('\n');
        } else if tag.name.eq_ignore_ascii_case("p") {
            break_paragraph(&mut out);
        } else if LINE_TAGS
            .iter()
            .any(|name| tag.name.eq_ignore_ascii_case(name))
        {
            break_line(&mut out);
        }
    }
    if skipping.is_none() {
        push_text(&mut out, rest);
    }

    normalize_lines(&html_escape::decode_html_entities(&out))
}

struct Tag<'a> {
    name: &'a str,
    closing: bool,
    /// Bytes consumed, including the angle brackets
    len: usize,
}

fn parse_tag(input: &str) -> Option<Tag<'_>> {
    let inner = input.strip_prefix('<')?;
    let (closing, body) = match inner.strip_prefix('/') {
        Some(body) => (true, body),
        None => (false, inner),
    };

    let first = body.chars().next()?;
    if !(first.is_ascii_alphabetic() || first == '!' || first == '?') {
        return None;
    }

    let end = input.find('>')?;
    let name_end = body
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(body.len());

    Some(Tag {
        name: &body[..name_end],
        closing,
        len: end + 1,
    })
}

fn contains_markup(text: &str) -> bool {
    text.match_indices('<')
        .any(|(i, _)| parse_tag(&text[i..]).is_some())
}

/// Append a text run, treating its whitespace the way a browser would
fn push_text(out: &mut String, text: &str) {
    for (i, word) in text.split_whitespace().enumerate() {
        let needs_space = i > 0 || text.starts_with(char::is_whitespace);
        if needs_space && !out.is_empty() && !out.ends_with(char::is_whitespace) {
            out.push(' ');
        }
        out.push_str(word);
    }
    if text.ends_with(char::is_whitespace)
        && !text.trim().is_empty()
        && !out.ends_with(char::is_whitespace)
    {
        out.push(' ');
    }
}

fn trim_trailing_spaces(out: &mut String) {
    while out.ends_with(' ') {
        out.pop();
    }
}

fn break_line(out: &mut String) {
    trim_trailing_spaces(out);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn break_paragraph(out: &mut String) {
    trim_trailing_spaces(out);
    if out.is_empty() || out.ends_with("\n\n") {
        return;
    }
    if out.ends_with('\n') {
        out.push('\n');
    } else {
        out.push_str("\n\n");
    }
}

/// Trim every line and keep at most one blank line between paragraphs
fn normalize_lines(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = false;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !lines.is_empty() {
                blank_run = true;
            }
            continue;
        }
        if blank_run {
            lines.push(String::new());
            blank_run = false;
        }
        lines.push(collapsed);
    }

    lines.join("\n")
}
