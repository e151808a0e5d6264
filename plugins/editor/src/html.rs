//! Markup scanning for rich-text content
//!
//! The editor works on serialized HTML strings. This module tokenizes that
//! markup just enough to find file references, rewrite their URLs, and
//! compare two documents while ignoring embedded URLs.

use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::sync::OnceLock;

/// Attribute naming the stable storage path of a file reference
pub const FILE_PATH_ATTRIBUTE: &str = "data-file-path";

/// Attribute carrying the direct (time-limited) URL of a file reference
pub const SOURCE_ATTRIBUTE: &str = "src";

pub const LINK_ELEMENT: &str = "a";

/// Attributes whose values are ignored by structural comparison
pub const URL_ATTRIBUTES: &[&str] = &[SOURCE_ATTRIBUTE];

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?s)<!--.*?-->|<(/?)([A-Za-z][A-Za-z0-9:-]*)((?:\s+[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'=<>`]+))?)*)\s*(/?)>"#,
        )
        .expect("tag pattern is valid")
    })
}

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
            .expect("attribute pattern is valid")
    })
}

/// A single attribute of a start tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Lowercased attribute name
    pub name: String,
    /// Entity-decoded value, `None` for bare attributes
    pub value: Option<String>,
    /// Byte range of the whole `name="value"` text in the source
    pub span: Range<usize>,
}

/// An opening (or self-closing) tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub self_closing: bool,
    /// Byte range of the tag from `<` to `>`
    pub span: Range<usize>,
    /// Offset right after the last attribute, where new attributes go
    insert_at: usize,
}

impl StartTag {
    /// First attribute with the given (lowercase) name
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    /// Value of the given attribute, if present with a value
    pub fn value(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(|attr| attr.value.as_deref())
    }

    /// The stable path of a file reference, if this tag is one
    pub fn file_path(&self) -> Option<&str> {
        self.value(FILE_PATH_ATTRIBUTE).filter(|path| !path.is_empty())
    }

    pub fn is_image(&self) -> bool {
        self.name == "img"
    }
}

/// A lexical token of an HTML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    Comment(&'a str),
    Start(StartTag),
    End { name: String, span: Range<usize> },
}

/// Split markup into text, comments and tags
///
/// Anything that does not look like a tag (a stray `<`, say) stays text.
pub fn tokenize(html: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;

    for captures in tag_pattern().captures_iter(html) {
        let Some(whole) = captures.get(0) else {
            continue;
        };

        if whole.start() > cursor {
            tokens.push(Token::Text(&html[cursor..whole.start()]));
        }
        cursor = whole.end();

        let Some(name) = captures.get(2) else {
            tokens.push(Token::Comment(whole.as_str()));
            continue;
        };
        let name = name.as_str().to_ascii_lowercase();

        if captures.get(1).is_some_and(|slash| !slash.as_str().is_empty()) {
            tokens.push(Token::End {
                name,
                span: whole.range(),
            });
            continue;
        }

        let (attributes, insert_at) = match captures.get(3) {
            Some(group) => (parse_attributes(group.as_str(), group.start()), group.end()),
            None => (Vec::new(), whole.start() + 1 + name.len()),
        };

        tokens.push(Token::Start(StartTag {
            name,
            attributes,
            self_closing: captures.get(4).is_some_and(|slash| !slash.as_str().is_empty()),
            span: whole.range(),
            insert_at,
        }));
    }

    if cursor < html.len() {
        tokens.push(Token::Text(&html[cursor..]));
    }

    tokens
}

fn parse_attributes(source: &str, offset: usize) -> Vec<Attribute> {
    attribute_pattern()
        .captures_iter(source)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let name = captures.get(1)?.as_str().to_ascii_lowercase();
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .or_else(|| captures.get(4))
                .map(|raw| decode(raw.as_str()).into_owned());

            Some(Attribute {
                name,
                value,
                span: (offset + whole.start())..(offset + whole.end()),
            })
        })
        .collect()
}

fn decode(raw: &str) -> Cow<'_, str> {
    html_escape::decode_html_entities(raw)
}

/// All start tags of a document, in source order
pub fn start_tags(html: &str) -> Vec<StartTag> {
    tokenize(html)
        .into_iter()
        .filter_map(|token| match token {
            Token::Start(tag) => Some(tag),
            _ => None,
        })
        .collect()
}

/// All `<img>` tags of a document, in source order
pub fn image_tags(html: &str) -> Vec<StartTag> {
    start_tags(html)
        .into_iter()
        .filter(StartTag::is_image)
        .collect()
}

/// Distinct file reference paths, in order of first appearance
pub fn file_paths(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    start_tags(html)
        .iter()
        .filter_map(StartTag::file_path)
        .filter(|path| seen.insert(path.to_string()))
        .map(str::to_string)
        .collect()
}

/// Check whether a byte offset falls strictly inside a tag or comment
pub fn is_inside_markup(html: &str, offset: usize) -> bool {
    tag_pattern()
        .find_iter(html)
        .any(|found| found.start() < offset && offset < found.end())
}

/// Whether any tag starts within `range`
pub fn contains_markup(html: &str, range: Range<usize>) -> bool {
    tag_pattern()
        .find_iter(html)
        .any(|found| range.contains(&found.start()))
}

/// Innermost `name` element whose content holds `offset`
///
/// Returns the start tag and the span of the matching end tag.
pub fn enclosing_element(html: &str, name: &str, offset: usize) -> Option<(StartTag, Range<usize>)> {
    let mut open = Vec::new();
    for token in tokenize(html) {
        match token {
            Token::Start(tag) if tag.name == name && !tag.self_closing => open.push(tag),
            Token::End { name: closing, span } if closing == name => match open.pop() {
                Some(tag) if tag.span.end <= offset && offset <= span.start => {
                    return Some((tag, span));
                }
                _ => {}
            },
            _ => {}
        }
    }
    None
}

/// Render a link around already serialized `content`
pub fn link_element(href: &str, content: &str) -> String {
    format!(
        "<{} href=\"{}\">{}</{}>",
        LINK_ELEMENT,
        html_escape::encode_double_quoted_attribute(href),
        content,
        LINK_ELEMENT
    )
}

/// Carry a caret offset from `from` over to `to`, keeping its position in
/// its text run
///
/// Returns `None` when the documents hold a different number of tags, the
/// offset sits inside a tag, or the run is too short in `to`.
pub fn map_offset(from: &str, to: &str, offset: usize) -> Option<usize> {
    let before: Vec<Range<usize>> = tag_pattern().find_iter(from).map(|m| m.range()).collect();
    let after: Vec<Range<usize>> = tag_pattern().find_iter(to).map(|m| m.range()).collect();
    if offset > from.len() || before.len() != after.len() {
        return None;
    }

    let preceding = before.iter().take_while(|tag| tag.end <= offset).count();
    if before.get(preceding).is_some_and(|tag| tag.start < offset) {
        return None;
    }

    let run_start =
        |tags: &[Range<usize>]| preceding.checked_sub(1).map_or(0, |last| tags[last].end);
    let mapped = run_start(&after[..]) + (offset - run_start(&before[..]));
    let run_end = after.get(preceding).map_or(to.len(), |tag| tag.start);

    (mapped <= run_end && to.is_char_boundary(mapped)).then_some(mapped)
}

/// Render the tag at `tag.span` with the given attributes set
///
/// Existing attributes are replaced where they stand; missing ones are
/// appended after the last attribute. Everything else in the tag is kept
/// byte for byte.
pub fn set_attributes(html: &str, tag: &StartTag, updates: &[(&str, &str)]) -> String {
    let mut edits: Vec<(Range<usize>, String)> = updates
        .iter()
        .map(|(name, value)| {
            let rendered = format!(
                "{}=\"{}\"",
                name,
                html_escape::encode_double_quoted_attribute(value)
            );
            match tag.attribute(name) {
                Some(existing) => (existing.span.clone(), rendered),
                None => (tag.insert_at..tag.insert_at, format!(" {}", rendered)),
            }
        })
        .collect();
    edits.sort_by_key(|(range, _)| range.start);

    let mut rendered = String::with_capacity(tag.span.len() + 64);
    let mut cursor = tag.span.start;
    for (range, replacement) in edits {
        rendered.push_str(&html[cursor..range.start]);
        rendered.push_str(&replacement);
        cursor = range.end;
    }
    rendered.push_str(&html[cursor..tag.span.end]);
    rendered
}

/// Replace one byte range of a document
pub fn splice(html: &str, range: Range<usize>, replacement: &str) -> String {
    let mut spliced = String::with_capacity(html.len() + replacement.len());
    spliced.push_str(&html[..range.start]);
    spliced.push_str(replacement);
    spliced.push_str(&html[range.end..]);
    spliced
}

/// Set `src` on every file reference whose path `lookup` knows
///
/// The URL attribute may come before or after the path attribute; both are
/// rewritten. References missing a `src` get one.
pub fn rewrite_file_sources<F>(html: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut rewritten = String::with_capacity(html.len());
    let mut cursor = 0;

    for tag in start_tags(html) {
        let Some(url) = tag.file_path().and_then(&lookup) else {
            continue;
        };
        if tag.value(SOURCE_ATTRIBUTE) == Some(url.as_str()) {
            continue;
        }
        rewritten.push_str(&html[cursor..tag.span.start]);
        rewritten.push_str(&set_attributes(html, &tag, &[(SOURCE_ATTRIBUTE, &url)]));
        cursor = tag.span.end;
    }

    rewritten.push_str(&html[cursor..]);
    rewritten
}

/// Build a file reference image element
pub fn image_element(src: &str, file_path: &str, style: Option<&str>) -> String {
    let mut element = format!(
        "<img src=\"{}\" {}=\"{}\"",
        html_escape::encode_double_quoted_attribute(src),
        FILE_PATH_ATTRIBUTE,
        html_escape::encode_double_quoted_attribute(file_path)
    );
    if let Some(style) = style {
        element.push_str(&format!(
            " style=\"{}\"",
            html_escape::encode_double_quoted_attribute(style)
        ));
    }
    element.push('>');
    element
}

/// One node of a document's structure, with URL values stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralNode {
    Text(String),
    Comment(String),
    Open {
        name: String,
        attributes: BTreeMap<String, Option<String>>,
    },
    Close(String),
}

/// Structure of a document, ignoring URL attributes
///
/// Attribute order, quoting, entity encoding, tag-name case and the
/// self-closing slash do not affect the fingerprint. URL attributes are
/// dropped entirely, so a reference that has not been resolved yet matches
/// the same reference with a URL.
pub fn structural_fingerprint(html: &str) -> Vec<StructuralNode> {
    tokenize(html)
        .into_iter()
        .filter_map(|token| match token {
            Token::Text(text) if text.is_empty() => None,
            Token::Text(text) => Some(StructuralNode::Text(decode(text).into_owned())),
            Token::Comment(comment) => Some(StructuralNode::Comment(comment.to_string())),
            Token::Start(tag) => Some(StructuralNode::Open {
                attributes: tag
                    .attributes
                    .into_iter()
                    .filter(|attr| !URL_ATTRIBUTES.contains(&attr.name.as_str()))
                    .map(|attr| (attr.name, attr.value))
                    .collect(),
                name: tag.name,
            }),
            Token::End { name, .. } => Some(StructuralNode::Close(name)),
        })
        .collect()
}

/// Whether two documents differ at most in their embedded URLs
pub fn structurally_equal(a: &str, b: &str) -> bool {
    a == b || structural_fingerprint(a) == structural_fingerprint(b)
}
