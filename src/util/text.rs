use std::borrow::Cow;

/// Converts an HTML fragment into plain text.
///
/// Feed descriptions routinely arrive as escaped HTML (`&lt;p&gt;...`),
/// raw HTML, or CDATA-wrapped markup. This strips tags and comments,
/// decodes common entities, and collapses runs of whitespace so the
/// result reads as a single plain-text paragraph.
///
/// Returns `Cow::Borrowed` when the input contains no markup, no
/// entities, and no whitespace runs (common case for plain-text feeds).
///
/// # Examples
///
/// ```
/// use newsdigest::util::strip_html;
///
/// assert_eq!(strip_html("plain text"), "plain text");
/// assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
/// assert_eq!(strip_html("a &amp; b"), "a & b");
/// ```
pub fn strip_html(s: &str) -> Cow<'_, str> {
    let trimmed = s.trim();
    let needs_work = trimmed.contains('<')
        || trimmed.contains('&')
        || trimmed.contains('\n')
        || trimmed.contains('\t')
        || trimmed.contains("  ");
    if !needs_work {
        return if trimmed.len() == s.len() {
            Cow::Borrowed(s)
        } else {
            Cow::Borrowed(trimmed)
        };
    }

    let without_tags = remove_markup(trimmed);
    let decoded = decode_entities(&without_tags);
    Cow::Owned(collapse_whitespace(&decoded))
}

/// Removes tags, comments, and CDATA wrappers, keeping text content.
///
/// The bodies of `<script>` and `<style>` elements are dropped entirely
/// since they are code, not prose.
fn remove_markup(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut i = 0;

    while i < s.len() {
        if s.as_bytes()[i] == b'<' {
            let rest = &s[i..];
            if let Some(stripped) = rest.strip_prefix("<![CDATA[") {
                match stripped.find("]]>") {
                    Some(end) => {
                        out.push_str(&stripped[..end]);
                        i += "<![CDATA[".len() + end + "]]>".len();
                    }
                    None => {
                        out.push_str(stripped);
                        break;
                    }
                }
                continue;
            }
            if rest.starts_with("<!--") {
                match rest.find("-->") {
                    Some(end) => {
                        out.push(' ');
                        i += end + 3;
                    }
                    None => break,
                }
                continue;
            }
            if let Some(skip) =
                skip_container(rest, "script").or_else(|| skip_container(rest, "style"))
            {
                i += skip;
                continue;
            }
            match rest.find('>') {
                Some(end) => {
                    // Tag boundaries become whitespace so adjacent
                    // paragraphs don't run together after stripping.
                    out.push(' ');
                    i += end + 1;
                }
                None => break, // unterminated tag at end of input
            }
        } else {
            let next = s[i..].find('<').map(|n| i + n).unwrap_or(s.len());
            out.push_str(&s[i..next]);
            i = next;
        }
    }

    out
}

/// If `rest` starts with `<name`, returns the byte length through the
/// matching `</name>` (or end of input), dropping the element body.
fn skip_container(rest: &str, name: &str) -> Option<usize> {
    let open = rest.get(..name.len() + 1)?;
    if !open.eq_ignore_ascii_case(&format!("<{}", name)) {
        return None;
    }
    // The tag name must end here; `<scripty>` is not `<script>`.
    match rest.as_bytes().get(name.len() + 1) {
        Some(b'>') | Some(b'/') => {}
        Some(b) if b.is_ascii_whitespace() => {}
        _ => return None,
    }
    let lower_rest = rest.to_ascii_lowercase();
    match lower_rest.find(&format!("</{}", name)) {
        Some(pos) => match rest[pos..].find('>') {
            Some(end) => Some(pos + end + 1),
            None => Some(rest.len()),
        },
        None => Some(rest.len()),
    }
}

/// Decodes the named and numeric character references that show up in
/// practice in feed text. Unknown references are kept verbatim rather
/// than rejected, since feeds embed arbitrary HTML entities that strict
/// XML decoding would refuse.
fn decode_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        let semi = match rest[..rest.len().min(32)].find(';') {
            Some(p) => p,
            None => {
                out.push('&');
                rest = &rest[1..];
                continue;
            }
        };
        let entity = &rest[1..semi];
        let replacement: Option<Cow<'_, str>> = match entity {
            "amp" => Some("&".into()),
            "lt" => Some("<".into()),
            "gt" => Some(">".into()),
            "quot" => Some("\"".into()),
            "apos" => Some("'".into()),
            "nbsp" => Some(" ".into()),
            "mdash" => Some("\u{2014}".into()),
            "ndash" => Some("\u{2013}".into()),
            "hellip" => Some("\u{2026}".into()),
            "rsquo" => Some("\u{2019}".into()),
            "lsquo" => Some("\u{2018}".into()),
            "rdquo" => Some("\u{201d}".into()),
            "ldquo" => Some("\u{201c}".into()),
            _ => decode_numeric(entity).map(|c| Cow::Owned(c.to_string())),
        };

        match replacement {
            Some(r) => {
                out.push_str(&r);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_numeric(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };
    char::from_u32(code)
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = true; // leading whitespace is dropped
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}
