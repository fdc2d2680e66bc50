use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::feed::{dates, Dialect, FeedItem, NO_TITLE};
use crate::util::strip_html;

/// Maximum allowed element nesting depth. Prevents stack exhaustion
/// from maliciously deep documents.
const MAX_XML_DEPTH: usize = 64;

/// Cap on raw date strings retained for diagnostics.
const MAX_DATE_SAMPLES: usize = 10;

/// Internal error for the strict parsing pass. Never escapes
/// [`parse_feed`]; a strict failure routes into the lenient pass and is
/// surfaced to callers as `ParseOutcome::failure` at worst.
#[derive(Debug, Error)]
enum ParseFailure {
    #[error("XML parse error: {0}")]
    Xml(String),
    #[error("XML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
    #[error("document has no root element")]
    NoRoot,
}

/// Result of parsing one feed document. Always produced, never an
/// error: a totally unparseable document yields zero items with the
/// cause recorded in `failure`.
#[derive(Debug)]
pub struct ParseOutcome {
    pub items: Vec<FeedItem>,
    pub dialect: Dialect,
    /// Name of the item-location strategy that produced the items, if
    /// any strategy matched.
    pub strategy: Option<&'static str>,
    /// Raw item nodes found before field-level discards.
    pub raw_item_count: usize,
    /// Feed-level title, when the document carried one.
    pub feed_title: Option<String>,
    /// Raw date strings as they appeared in the document (capped),
    /// kept for diagnostics to classify which formats a feed emits.
    pub date_samples: Vec<String>,
    /// Why parsing produced nothing, when it produced nothing.
    pub failure: Option<String>,
}

/// Parses feed bytes into items, strict pass first, lenient recovery
/// second.
///
/// The strict pass requires well-formed XML and knows the structural
/// variants real feeds use (namespaced or not, `channel`-nested or
/// flat). When the document is not well-formed at all, the lenient
/// pass rescans the token stream for `item`/`entry` subtrees without
/// enforcing well-formedness and re-runs the same field extraction.
///
/// `source_url` is used as the `source` fallback when the document has
/// no feed title, and for log context.
pub fn parse_feed(bytes: &[u8], source_url: &str) -> ParseOutcome {
    match parse_strict(bytes) {
        Ok(doc) => {
            let dialect = detect_dialect(&doc);
            let (nodes, strategy) = locate_items(&doc, dialect);
            let feed_title = feed_title(&doc, dialect);
            let source = feed_title.clone().unwrap_or_else(|| source_url.to_string());
            let raw_item_count = nodes.len();
            let date_samples: Vec<String> = nodes
                .iter()
                .filter_map(|node| extract_date_text(node))
                .take(MAX_DATE_SAMPLES)
                .collect();
            let items: Vec<FeedItem> = nodes
                .iter()
                .filter_map(|node| extract_item(node, &source))
                .collect();
            ParseOutcome {
                items,
                dialect,
                strategy: (raw_item_count > 0).then_some(strategy),
                raw_item_count,
                feed_title,
                date_samples,
                failure: None,
            }
        }
        Err(e) => {
            tracing::debug!(url = %source_url, error = %e, "Strict XML parse failed, trying lenient pass");
            let nodes = scan_lenient(bytes);
            let dialect = if nodes.iter().any(|n| n.local_name() == "entry") {
                Dialect::Atom
            } else if !nodes.is_empty() {
                Dialect::Rss
            } else {
                Dialect::Unknown
            };
            let raw_item_count = nodes.len();
            let date_samples: Vec<String> = nodes
                .iter()
                .filter_map(|node| extract_date_text(node))
                .take(MAX_DATE_SAMPLES)
                .collect();
            let items: Vec<FeedItem> = nodes
                .iter()
                .filter_map(|node| extract_item(node, source_url))
                .collect();
            let failure = items.is_empty().then(|| e.to_string());
            ParseOutcome {
                items,
                dialect,
                strategy: (raw_item_count > 0).then_some("lenient_scan"),
                raw_item_count,
                feed_title: None,
                date_samples,
                failure,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

/// A parsed XML element with qualified name, attributes, accumulated
/// text, and children. Small enough to build eagerly; feeds are capped
/// at the fetcher's body limit.
#[derive(Debug, Clone)]
struct Element {
    /// Qualified name as written, e.g. `item`, `atom:entry`, `dc:date`.
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn new(name: String) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// Name without any namespace prefix, lowercased.
    fn local_name(&self) -> String {
        self.name
            .rsplit(':')
            .next()
            .unwrap_or(&self.name)
            .to_ascii_lowercase()
    }

    fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(p, _)| p)
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    /// Direct children matching a predicate.
    fn children_where<'a>(
        &'a self,
        pred: impl Fn(&Element) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| pred(c))
    }

    /// First direct child whose local name matches.
    fn child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local)
    }

    /// Depth-first search over all descendants.
    fn descendants_where<'a>(
        &'a self,
        pred: &impl Fn(&Element) -> bool,
        out: &mut Vec<&'a Element>,
    ) {
        for child in &self.children {
            if pred(child) {
                out.push(child);
            }
            child.descendants_where(pred, out);
        }
    }

    fn find_descendants(&self, pred: impl Fn(&Element) -> bool) -> Vec<&Element> {
        let mut out = Vec::new();
        self.descendants_where(&pred, &mut out);
        out
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Element {
    let mut el = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        // Permissive attribute decoding: fall back to the raw bytes on
        // entity errors rather than dropping the attribute.
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        el.attributes.push((key, value));
    }
    el
}

/// Strict pass: builds the full element tree, rejecting malformed
/// documents so the lenient pass can take over.
fn parse_strict(bytes: &[u8]) -> Result<Element, ParseFailure> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref start)) => {
                if stack.len() >= MAX_XML_DEPTH {
                    return Err(ParseFailure::MaxDepthExceeded(MAX_XML_DEPTH));
                }
                stack.push(element_from_start(start));
            }
            Ok(Event::Empty(ref start)) => {
                let el = element_from_start(start);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None if root.is_none() => root = Some(el),
                    None => {}
                }
            }
            Ok(Event::End(_)) => {
                let el = match stack.pop() {
                    Some(el) => el,
                    None => return Err(ParseFailure::Xml("unmatched closing tag".into())),
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None if root.is_none() => root = Some(el),
                    None => {} // trailing sibling of the root; ignore
                }
            }
            Ok(Event::Text(ref t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref c)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(c.as_ref()));
                }
            }
            Ok(Event::Eof) => {
                if !stack.is_empty() {
                    return Err(ParseFailure::Xml("unexpected end of document".into()));
                }
                return root.ok_or(ParseFailure::NoRoot);
            }
            Ok(_) => {} // declarations, PIs, comments, DOCTYPE
            Err(e) => return Err(ParseFailure::Xml(e.to_string())),
        }
        buf.clear();
    }
}

// ---------------------------------------------------------------------------
// Dialect detection and item location
// ---------------------------------------------------------------------------

fn detect_dialect(root: &Element) -> Dialect {
    if root.local_name().ends_with("feed") {
        Dialect::Atom
    } else {
        Dialect::Rss
    }
}

/// Locates item/entry nodes, trying structural paths in order and
/// taking the first non-empty match. Ordering is significant: the
/// cheapest, most common layout comes first, and each later path exists
/// to recover a specific structural variant seen in the wild.
fn locate_items(root: &Element, dialect: Dialect) -> (Vec<&Element>, &'static str) {
    match dialect {
        Dialect::Atom => {
            // Unprefixed entries directly under the feed element
            let direct: Vec<&Element> = root.children_where(|c| c.name == "entry").collect();
            if !direct.is_empty() {
                return (direct, "atom_entry");
            }
            // Entries written with an explicit atom: prefix
            let prefixed = root.find_descendants(|c| {
                c.local_name() == "entry" && c.prefix() == Some("atom")
            });
            if !prefixed.is_empty() {
                return (prefixed, "atom_namespaced_entry");
            }
            // Deep search: entries nested under unexpected wrappers
            let deep = root.find_descendants(|c| c.local_name() == "entry");
            (deep, "atom_deep_entry")
        }
        Dialect::Rss | Dialect::Unknown => {
            // //item - any depth, unprefixed (the common RSS 2.0 layout)
            let deep: Vec<&Element> = root.find_descendants(|c| c.name == "item");
            if !deep.is_empty() {
                return (deep, "rss_deep_item");
            }
            // channel/item explicitly
            if let Some(channel) = root.child("channel") {
                let nested: Vec<&Element> =
                    channel.children_where(|c| c.local_name() == "item").collect();
                if !nested.is_empty() {
                    return (nested, "rss_channel_item");
                }
            }
            // Items directly under the root (RDF / RSS 1.0 flat layout)
            let direct: Vec<&Element> = root.children_where(|c| c.local_name() == "item").collect();
            if !direct.is_empty() {
                return (direct, "rss_direct_item");
            }
            // Prefixed items (rss:item and friends), anywhere
            let prefixed = root.find_descendants(|c| c.local_name() == "item");
            (prefixed, "rss_namespaced_item")
        }
    }
}

fn feed_title(root: &Element, dialect: Dialect) -> Option<String> {
    let holder = match dialect {
        Dialect::Atom => root,
        _ => root.child("channel").unwrap_or(root),
    };
    holder
        .children_where(|c| c.local_name() == "title")
        .map(Element::trimmed_text)
        .find(|t| !t.is_empty())
        .map(|t| strip_html(t).into_owned())
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// Builds a [`FeedItem`] from one item/entry node, tolerating absent
/// fields per the fallback chains. Returns `None` only when the node
/// has neither a title nor a link, which is too little signal to keep.
fn extract_item(node: &Element, source: &str) -> Option<FeedItem> {
    let title = node
        .children_where(|c| c.local_name() == "title")
        .map(Element::trimmed_text)
        .find(|t| !t.is_empty())
        .map(|t| strip_html(t).into_owned());

    let link = extract_link(node);

    if title.is_none() && link.is_empty() {
        return None;
    }

    let title = title.unwrap_or_else(|| NO_TITLE.to_string());
    let description = extract_description(node).unwrap_or_else(|| title.clone());
    let published_at = extract_date_text(node).and_then(|raw| dates::parse_date(&raw));

    Some(FeedItem {
        title,
        description,
        link,
        published_at,
        source: source.to_string(),
        summary: None,
    })
}

/// Link resolution: an `href` attribute (Atom style) beats element text
/// (RSS style) when both exist. Among Atom links, `rel="alternate"` or
/// rel-less links are the article URL; `rel="self"` and friends are
/// not.
fn extract_link(node: &Element) -> String {
    let links: Vec<&Element> = node.children_where(|c| c.local_name() == "link").collect();

    let href_of = |el: &Element| el.attr("href").map(|h| h.trim().to_string());

    if let Some(href) = links
        .iter()
        .filter(|l| matches!(l.attr("rel"), None | Some("alternate")))
        .find_map(|l| href_of(l))
    {
        if !href.is_empty() {
            return href;
        }
    }
    if let Some(href) = links.iter().find_map(|l| href_of(l)) {
        if !href.is_empty() {
            return href;
        }
    }
    links
        .iter()
        .map(|l| l.trimmed_text())
        .find(|t| !t.is_empty())
        .unwrap_or("")
        .to_string()
}

/// Description chain: `description` → `content:encoded` → `summary` →
/// `content` (Atom), first non-empty wins, HTML stripped.
fn extract_description(node: &Element) -> Option<String> {
    let candidates: [&dyn Fn(&Element) -> bool; 4] = [
        &|c: &Element| c.local_name() == "description",
        &|c: &Element| c.local_name() == "encoded" && c.prefix() == Some("content"),
        &|c: &Element| c.local_name() == "summary",
        &|c: &Element| c.name == "content",
    ];
    for pred in candidates {
        if let Some(text) = node
            .children_where(pred)
            .map(Element::trimmed_text)
            .find(|t| !t.is_empty())
        {
            let stripped = strip_html(text).into_owned();
            if !stripped.is_empty() {
                return Some(stripped);
            }
        }
    }
    None
}

/// Date chain: `pubDate` → `published` → `date` → `dc:date` →
/// `updated` → any child whose tag mentions "date" or "pub". Returns
/// the raw string; parsing happens in [`dates`].
fn extract_date_text(node: &Element) -> Option<String> {
    let candidates: [&dyn Fn(&Element) -> bool; 5] = [
        &|c: &Element| c.local_name() == "pubdate",
        &|c: &Element| c.local_name() == "published",
        &|c: &Element| c.name == "date",
        &|c: &Element| c.local_name() == "date" && c.prefix() == Some("dc"),
        &|c: &Element| c.local_name() == "updated",
    ];
    for pred in candidates {
        if let Some(text) = node
            .children_where(pred)
            .map(Element::trimmed_text)
            .find(|t| !t.is_empty())
        {
            return Some(text.to_string());
        }
    }
    // Last resort: anything date-shaped by tag name
    node.children
        .iter()
        .filter(|c| {
            let local = c.local_name();
            local.contains("date") || local.contains("pub")
        })
        .map(Element::trimmed_text)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Lenient pass
// ---------------------------------------------------------------------------

/// Recovery scan for documents that fail strict parsing: walks the
/// token stream without enforcing well-formedness and rebuilds
/// `item`/`entry` subtrees from whatever structure survives. Unclosed
/// tags inside an item collapse into their parent; an item left open at
/// EOF is flushed as-is.
fn scan_lenient(bytes: &[u8]) -> Vec<Element> {
    let mut reader = Reader::from_reader(bytes);
    let cfg = reader.config_mut();
    cfg.trim_text(true);
    cfg.check_end_names = false;
    cfg.allow_unmatched_ends = true;

    let mut buf = Vec::new();
    let mut items: Vec<Element> = Vec::new();
    // Stack of open elements inside the current item; index 0 is the
    // item node itself.
    let mut open: Vec<Element> = Vec::new();

    let is_item_tag = |name: &str| {
        let local = name.rsplit(':').next().unwrap_or(name).to_ascii_lowercase();
        local == "item" || local == "entry"
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref start)) => {
                let el = element_from_start(start);
                if open.is_empty() {
                    if is_item_tag(&el.name) {
                        open.push(el);
                    }
                } else if open.len() < MAX_XML_DEPTH {
                    open.push(el);
                }
            }
            Ok(Event::Empty(ref start)) => {
                if let Some(top) = open.last_mut() {
                    top.children.push(element_from_start(start));
                }
            }
            Ok(Event::End(ref end)) => {
                if open.is_empty() {
                    continue;
                }
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if is_item_tag(&name) {
                    // Collapse everything still open into the item and
                    // flush it, tolerating unclosed children.
                    if let Some(item) = collapse_open(std::mem::take(&mut open)) {
                        items.push(item);
                    }
                } else if open.len() > 1 && open.last().is_some_and(|e| e.name == name) {
                    if let Some(el) = open.pop() {
                        if let Some(parent) = open.last_mut() {
                            parent.children.push(el);
                        }
                    }
                }
                // Mismatched end tag inside an item: ignored, the open
                // element keeps accumulating.
            }
            Ok(Event::Text(ref t)) => {
                if let Some(top) = open.last_mut() {
                    let text = t
                        .unescape()
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(t.as_ref()).into_owned());
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref c)) => {
                if let Some(top) = open.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(c.as_ref()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            // The tokenizer itself gave up; keep whatever was recovered.
            Err(_) => break,
        }
        buf.clear();
    }

    // Item still open at EOF (document truncated mid-item)
    if let Some(item) = collapse_open(open) {
        items.push(item);
    }

    items
}

/// Folds a stack of open elements into its bottom element, nesting each
/// unclosed child into its parent. Returns the bottom (item) element.
fn collapse_open(mut open: Vec<Element>) -> Option<Element> {
    let mut current = open.pop()?;
    while let Some(mut parent) = open.pop() {
        parent.children.push(current);
        current = parent;
    }
    Some(current)
}
