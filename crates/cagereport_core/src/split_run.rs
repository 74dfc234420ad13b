//! Placeholder resolution at text-node level.
//!
//! Editors fragment visible text into many `<w:r>` runs, so a token such as
//! `(1c588)` may be stored as `(1c` + `588` + `)`. The functions here join
//! every `<w:t>` node of a part into one logical buffer, find the token in
//! that buffer and splice the part's source text at the matching runs. Text
//! outside the touched runs is left byte-identical. Every result is
//! re-parsed, and a splice that would not parse is discarded.

use std::ops::Range;

use roxmltree::{Document, Node, NodeId};

use crate::drawing::NS_W;

/// Upper bound on repeated replacements of one token in one part.
pub const MAX_REPLACEMENTS_PER_TOKEN: usize = 64;

#[derive(Debug, Clone)]
struct TextSpan {
    element: Range<usize>,
    text: String,
    logical: Range<usize>,
    run: Option<Range<usize>>,
    run_parent: Option<NodeId>,
}

#[derive(Debug, Clone, Copy)]
struct Located {
    first: usize,
    last: usize,
    start: usize,
    end: usize,
}

/// Visible text of a part: every `<w:t>` in document order, concatenated.
pub fn visible_text(xml: &str) -> Option<String> {
    let document = Document::parse(xml).ok()?;
    Some(collect_spans(&document).into_iter().map(|span| span.text).collect())
}

/// Replace the first occurrence of `token` in the visible text with the
/// element `fragment`. The runs the token touches are removed; text before
/// and after the token inside those runs is kept in truncated copies.
/// Occurrences that cannot be spliced are skipped in favour of later ones.
/// Returns the new source and the number of replacements (0 or 1).
pub fn replace_token_with_element(xml: &str, token: &str, fragment: &str) -> (String, usize) {
    let Some(element) = standalone_element(fragment) else {
        return (xml.to_string(), 0);
    };
    let Ok(document) = Document::parse(xml) else {
        return (xml.to_string(), 0);
    };
    let spans = collect_spans(&document);
    locate_all(&spans, token)
        .into_iter()
        .find_map(|located| splice_element(xml, &spans, located, &element))
        .map_or_else(|| (xml.to_string(), 0), |out| (out, 1))
}

fn splice_element(xml: &str, spans: &[TextSpan], located: Located, element: &str) -> Option<String> {
    let runs = enclosing_runs(spans, located)?;
    let (first_run, last_run) = (runs.first()?, runs.last()?);

    let mut out = String::with_capacity(xml.len() + element.len());
    out.push_str(&xml[..first_run.start]);
    if let Some(prefix) = clip_run(xml, spans, first_run, 0..located.start) {
        out.push_str(&prefix);
    }
    out.push_str(element);
    if let Some(suffix) = clip_run(xml, spans, last_run, located.end..usize::MAX) {
        out.push_str(&suffix);
    }
    out.push_str(&xml[last_run.end..]);
    Document::parse(&out).is_ok().then_some(out)
}

/// Replace the first occurrence of `token` in the visible text with `value`,
/// keeping every run and its formatting: the value lands in the first text
/// node the token overlaps and the token's remaining characters are removed
/// from the following nodes.
pub fn replace_token_with_text(xml: &str, token: &str, value: &str) -> (String, usize) {
    let Ok(document) = Document::parse(xml) else {
        return (xml.to_string(), 0);
    };
    let spans = collect_spans(&document);
    locate_all(&spans, token)
        .into_iter()
        .find_map(|located| splice_text(xml, &spans, located, value))
        .map_or_else(|| (xml.to_string(), 0), |out| (out, 1))
}

fn splice_text(xml: &str, spans: &[TextSpan], located: Located, value: &str) -> Option<String> {
    enclosing_runs(spans, located)?;

    let mut edits = Vec::new();
    for index in located.first..=located.last {
        let span = &spans[index];
        let keep_before = clip_text(span, 0..located.start);
        let keep_after = clip_text(span, located.end..usize::MAX);
        let mut text = keep_before.to_string();
        if index == located.first {
            text.push_str(value);
        }
        text.push_str(keep_after);
        edits.push((span.element.clone(), text_element(xml, &span.element, &text)));
    }

    let mut out = xml.to_string();
    for (range, replacement) in edits.into_iter().rev() {
        out.replace_range(range, &replacement);
    }
    Document::parse(&out).is_ok().then_some(out)
}

/// Repeat `replace_token_with_text` until no occurrence is left.
pub fn replace_all_with_text(xml: &str, token: &str, value: &str) -> (String, usize) {
    if value.contains(token) {
        return replace_token_with_text(xml, token, value);
    }
    repeat_replacement(xml, |current| replace_token_with_text(current, token, value))
}

pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

fn repeat_replacement<F>(xml: &str, mut step: F) -> (String, usize)
where
    F: FnMut(&str) -> (String, usize),
{
    let mut current = xml.to_string();
    let mut total = 0usize;
    while total < MAX_REPLACEMENTS_PER_TOKEN {
        let (next, replaced) = step(&current);
        if replaced == 0 {
            break;
        }
        current = next;
        total += replaced;
    }
    (current, total)
}

fn collect_spans(document: &Document<'_>) -> Vec<TextSpan> {
    let mut spans = Vec::new();
    let mut offset = 0usize;
    for node in document
        .descendants()
        .filter(|node| node.has_tag_name((NS_W, "t")))
    {
        let text = node
            .children()
            .filter(|child| child.is_text())
            .filter_map(|child| child.text())
            .collect::<String>();
        let run = enclosing_run(node);
        let logical = offset..offset + text.len();
        offset = logical.end;
        spans.push(TextSpan {
            element: node.range(),
            text,
            logical,
            run: run.map(|run| run.range()),
            run_parent: run.and_then(|run| run.parent()).map(|parent| parent.id()),
        });
    }
    spans
}

fn enclosing_run<'a, 'input>(node: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    node.ancestors()
        .skip(1)
        .find(|ancestor| ancestor.has_tag_name((NS_W, "r")))
}

/// Every non-overlapping occurrence of `token` in the joined text, in order.
fn locate_all(spans: &[TextSpan], token: &str) -> Vec<Located> {
    if token.is_empty() {
        return Vec::new();
    }
    let buffer = spans.iter().map(|span| span.text.as_str()).collect::<String>();
    buffer
        .match_indices(token)
        .filter_map(|(start, _)| {
            let end = start + token.len();
            let first = spans
                .iter()
                .position(|span| span.logical.end > start && span.logical.start < end)?;
            let last = spans
                .iter()
                .rposition(|span| span.logical.start < end && span.logical.end > start)?;
            Some(Located {
                first,
                last,
                start,
                end,
            })
        })
        .collect()
}

/// Distinct runs holding the token's text nodes, in document order. All of
/// them must exist and share one parent, otherwise the match is not a
/// single visible token and is left alone.
fn enclosing_runs(spans: &[TextSpan], located: Located) -> Option<Vec<Range<usize>>> {
    let mut runs: Vec<Range<usize>> = Vec::new();
    let parent = spans[located.first].run_parent?;
    for span in &spans[located.first..=located.last] {
        let run = span.run.clone()?;
        if span.run_parent? != parent {
            return None;
        }
        if runs.last() != Some(&run) {
            runs.push(run);
        }
    }
    Some(runs)
}

/// Copy of a run with each of its text nodes reduced to the part that falls
/// inside `keep` (logical offsets). `None` when no text would remain.
fn clip_run(
    xml: &str,
    spans: &[TextSpan],
    run: &Range<usize>,
    keep: Range<usize>,
) -> Option<String> {
    let mut pieces = Vec::new();
    let mut kept_any = false;
    for span in spans.iter().filter(|span| span.run.as_ref() == Some(run)) {
        let kept = clip_text(span, keep.clone());
        kept_any |= !kept.is_empty();
        let replacement = if kept.is_empty() {
            String::new()
        } else {
            text_element(xml, &span.element, kept)
        };
        pieces.push((span.element.clone(), replacement));
    }
    if !kept_any {
        return None;
    }

    let mut out = String::new();
    let mut cursor = run.start;
    for (element, replacement) in pieces {
        out.push_str(&xml[cursor..element.start]);
        out.push_str(&replacement);
        cursor = element.end;
    }
    out.push_str(&xml[cursor..run.end]);
    Some(out)
}

fn clip_text(span: &TextSpan, keep: Range<usize>) -> &str {
    let start = keep.start.max(span.logical.start);
    let end = keep.end.min(span.logical.end);
    if start >= end {
        return "";
    }
    &span.text[start - span.logical.start..end - span.logical.start]
}

/// Rebuild a `<w:t>` element under the same qualified name the source uses.
fn text_element(xml: &str, element: &Range<usize>, text: &str) -> String {
    let qname = qualified_name(&xml[element.clone()]);
    if text.is_empty() {
        return format!("<{qname}/>");
    }
    format!(
        "<{qname} xml:space=\"preserve\">{}</{qname}>",
        escape_text(text)
    )
}

fn qualified_name(start_tag: &str) -> &str {
    let body = start_tag.strip_prefix('<').unwrap_or(start_tag);
    let end = body
        .find(|ch: char| ch.is_whitespace() || ch == '>' || ch == '/')
        .unwrap_or(body.len());
    &body[..end]
}

/// `fragment` as a single element. A fragment that is not one well-formed
/// root is wrapped in a throwaway container and its first element is used.
fn standalone_element(fragment: &str) -> Option<String> {
    let trimmed = fragment.trim();
    if Document::parse(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }
    let wrapped = format!("<fragment>{trimmed}</fragment>");
    let document = Document::parse(&wrapped).ok()?;
    let first = document
        .root_element()
        .children()
        .find(|node| node.is_element())?;
    Some(wrapped[first.range()].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    fn doc(body: &str) -> String {
        format!(r#"<?xml version="1.0" encoding="UTF-8"?><w:document {W}><w:body>{body}</w:body></w:document>"#)
    }

    fn drawing() -> String {
        format!(r#"<w:r {W}><w:drawing/></w:r>"#)
    }

    #[test]
    fn visible_text_joins_split_runs() {
        let xml = doc("<w:p><w:r><w:t>(1c</w:t></w:r><w:r><w:t>588)</w:t></w:r></w:p>");
        assert_eq!(visible_text(&xml).as_deref(), Some("(1c588)"));
    }

    #[test]
    fn split_token_is_replaced_by_one_element_without_leftover_runs() {
        let xml = doc(concat!(
            "<w:p>",
            "<w:r><w:rPr><w:b/></w:rPr><w:t>(pic_</w:t></w:r>",
            "<w:r><w:t>58</w:t></w:r>",
            "<w:r><w:t>8)</w:t></w:r>",
            "</w:p>"
        ));
        let (out, replaced) = replace_token_with_element(&xml, "(pic_588)", &drawing());
        assert_eq!(replaced, 1);
        assert!(!visible_text(&out).expect("parse").contains("pic_"));
        assert_eq!(out.matches("<w:drawing/>").count(), 1);
        assert_eq!(out.matches("<w:r").count(), 1);
        assert!(!out.contains("<w:t/>"));
    }

    #[test]
    fn surrounding_text_in_touched_runs_is_kept() {
        let xml = doc(concat!(
            "<w:p>",
            "<w:r><w:rPr><w:i/></w:rPr><w:t xml:space=\"preserve\">Photo: (pic</w:t></w:r>",
            "<w:r><w:t>_9) done</w:t></w:r>",
            "</w:p>"
        ));
        let (out, replaced) = replace_token_with_element(&xml, "(pic_9)", &drawing());
        assert_eq!(replaced, 1);
        let document = Document::parse(&out).expect("parse");
        let runs = document
            .descendants()
            .filter(|node| node.has_tag_name((NS_W, "r")))
            .collect::<Vec<_>>();
        assert_eq!(runs.len(), 3);
        assert!(runs[0].descendants().any(|node| node.has_tag_name((NS_W, "i"))));
        assert_eq!(visible_text(&out).as_deref(), Some("Photo:  done"));
        let drawing_position = out.find("<w:drawing/>").expect("drawing");
        assert!(out.find("Photo: ").expect("prefix") < drawing_position);
        assert!(out.find(" done").expect("suffix") > drawing_position);
    }

    #[test]
    fn single_run_token_is_replaced_at_run_level() {
        let xml = doc("<w:p><w:r><w:t>(shift_1_signin)</w:t></w:r></w:p>");
        let (out, replaced) = replace_token_with_element(&xml, "(shift_1_signin)", &drawing());
        assert_eq!(replaced, 1);
        assert!(!out.contains("<w:t><w:r"));
        assert!(out.contains("<w:p><w:r xmlns:w="));
    }

    #[test]
    fn text_replacement_keeps_run_formatting() {
        let xml = doc(concat!(
            "<w:p>",
            "<w:r><w:rPr><w:b/></w:rPr><w:t>Total (1c</w:t></w:r>",
            "<w:r><w:t>588</w:t></w:r>",
            "<w:r><w:t>) birds</w:t></w:r>",
            "</w:p>"
        ));
        let (out, replaced) = replace_token_with_text(&xml, "(1c588)", "5");
        assert_eq!(replaced, 1);
        assert_eq!(visible_text(&out).as_deref(), Some("Total 5 birds"));
        assert_eq!(out.matches("<w:r>").count(), 3);
        assert!(out.contains("<w:b/>"));
    }

    #[test]
    fn text_values_are_escaped() {
        let xml = doc("<w:p><w:r><w:t>(da</w:t></w:r><w:r><w:t>te)</w:t></w:r></w:p>");
        let (out, replaced) = replace_token_with_text(&xml, "(date)", "A & B");
        assert_eq!(replaced, 1);
        assert!(out.contains("A &amp; B"));
        assert_eq!(visible_text(&out).as_deref(), Some("A & B"));
    }

    #[test]
    fn every_occurrence_is_replaced() {
        let xml = doc(concat!(
            "<w:p><w:r><w:t>(da</w:t></w:r><w:r><w:t>te)</w:t></w:r></w:p>",
            "<w:p><w:r><w:t>(d</w:t></w:r><w:r><w:t>ate)</w:t></w:r></w:p>"
        ));
        let (out, replaced) = replace_all_with_text(&xml, "(date)", "2025-11-24");
        assert_eq!(replaced, 2);
        assert_eq!(visible_text(&out).as_deref(), Some("2025-11-242025-11-24"));
    }

    #[test]
    fn token_across_paragraphs_is_not_a_match() {
        let xml = doc("<w:p><w:r><w:t>(pic</w:t></w:r></w:p><w:p><w:r><w:t>_1)</w:t></w:r></w:p>");
        let (out, replaced) = replace_token_with_element(&xml, "(pic_1)", &drawing());
        assert_eq!(replaced, 0);
        assert_eq!(out, xml);
    }

    #[test]
    fn missing_token_and_bad_xml_are_silent_noops() {
        let xml = doc("<w:p><w:r><w:t>nothing here</w:t></w:r></w:p>");
        assert_eq!(replace_token_with_element(&xml, "(pic_1)", &drawing()).1, 0);
        assert_eq!(replace_token_with_element("<broken", "(pic_1)", &drawing()).1, 0);
        let no_text = doc("<w:p/>");
        assert_eq!(replace_token_with_text(&no_text, "(pic_1)", "x").1, 0);
    }

    #[test]
    fn unspliceable_occurrence_does_not_hide_later_ones() {
        let xml = doc(concat!(
            "<w:p><w:r><w:t>(pic_</w:t></w:r><w:hyperlink><w:r><w:t>588)</w:t></w:r></w:hyperlink></w:p>",
            "<w:p><w:r><w:t>(pic_588)</w:t></w:r></w:p>"
        ));
        let (out, replaced) = replace_token_with_element(&xml, "(pic_588)", &drawing());
        assert_eq!(replaced, 1);
        assert_eq!(out.matches("<w:drawing/>").count(), 1);
        assert_eq!(visible_text(&out).as_deref(), Some("(pic_588)"));
        assert!(out.contains("<w:hyperlink>"));
    }

    #[test]
    fn split_text_token_after_hyperlink_split_is_still_replaced() {
        let xml = doc(concat!(
            "<w:p><w:r><w:t>(da</w:t></w:r><w:hyperlink><w:r><w:t>te)</w:t></w:r></w:hyperlink></w:p>",
            "<w:p><w:r><w:t>(d</w:t></w:r><w:r><w:t>ate)</w:t></w:r></w:p>"
        ));
        let (out, replaced) = replace_all_with_text(&xml, "(date)", "2025-11-24");
        assert_eq!(replaced, 1);
        assert_eq!(visible_text(&out).as_deref(), Some("(date)2025-11-24"));
    }

    #[test]
    fn fragment_with_trailing_content_uses_first_element() {
        let xml = doc("<w:p><w:r><w:t>(pic_2)</w:t></w:r></w:p>");
        let fragment = format!("{} <w:r {W}/>", drawing());
        let (out, replaced) = replace_token_with_element(&xml, "(pic_2)", &fragment);
        assert_eq!(replaced, 1);
        assert_eq!(out.matches("<w:drawing/>").count(), 1);
        assert!(!out.contains("<w:r xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"/>"));
    }

    #[test]
    fn unparsable_fragment_is_a_noop() {
        let xml = doc("<w:p><w:r><w:t>(pic_2)</w:t></w:r></w:p>");
        assert_eq!(replace_token_with_element(&xml, "(pic_2)", "<w:r>").1, 0);
    }

    #[test]
    fn self_referencing_value_is_replaced_once() {
        let xml = doc("<w:p><w:r><w:t>(x)</w:t></w:r></w:p>");
        let (out, replaced) = replace_all_with_text(&xml, "(x)", "((x))");
        assert_eq!(replaced, 1);
        assert_eq!(visible_text(&out).as_deref(), Some("((x))"));
    }
}
