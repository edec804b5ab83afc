//! Plain-text extraction from article HTML with `scraper`.

use ego_tree::NodeId;
use ego_tree::iter::Edge;
use herald_core::config::Selectors;
use herald_core::error::AppError;
use herald_core::traits::ContentParser;
use scraper::{ElementRef, Html, Node, Selector};

/// Subtrees that never contain article text.
pub(crate) const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "iframe", "svg",
];

/// Tried in order when no configured content selector matches.
pub(crate) const DEFAULT_CONTENT_SELECTORS: &[&str] = &["article", "main", "body"];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote",
    "pre", "tr", "br", "figcaption",
];

/// Compile CSS selectors, dropping (and logging) invalid ones.
pub(crate) fn compile_selectors<'s>(raw: impl IntoIterator<Item = &'s str>) -> Vec<Selector> {
    raw.into_iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                tracing::warn!(selector = s, error = %e, "Ignoring invalid CSS selector");
                None
            }
        })
        .collect()
}

/// Content selectors to try: configured ones first, then the defaults.
pub(crate) fn content_selectors(selectors: &Selectors) -> Vec<Selector> {
    compile_selectors(
        selectors
            .content
            .iter()
            .map(String::as_str)
            .chain(DEFAULT_CONTENT_SELECTORS.iter().copied()),
    )
}

/// Deepest element nesting below `root`, counted without recursion.
pub(crate) fn nesting_depth(root: ElementRef<'_>) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for edge in root.traverse() {
        match edge {
            Edge::Open(node) if node.value().is_element() => {
                depth += 1;
                max = max.max(depth);
            }
            Edge::Close(node) if node.value().is_element() => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

/// Parser producing paragraph-separated plain text.
///
/// Paragraphs are joined with a blank line and whitespace inside each one is
/// collapsed to single spaces.
#[derive(Debug, Clone, Default)]
pub struct ScraperParser;

impl ScraperParser {
    pub fn new() -> Self {
        Self
    }
}

impl ContentParser for ScraperParser {
    fn parse(&self, html: &str, selectors: &Selectors) -> Result<String, AppError> {
        let document = Html::parse_document(html);

        let remove = compile_selectors(selectors.remove.iter().map(String::as_str));
        let removed: Vec<ElementRef<'_>> = remove
            .iter()
            .flat_map(|sel| document.select(sel))
            .collect();

        for sel in content_selectors(selectors) {
            let Some(root) = document.select(&sel).next() else {
                continue;
            };
            if removed.contains(&root) {
                continue;
            }

            let mut collector = TextCollector::default();
            collector.collect(root, &removed);
            let text = collector.finish();
            if !text.is_empty() {
                return Ok(text);
            }
        }

        Err(AppError::ParseError(
            "no readable content found in document".to_string(),
        ))
    }
}

#[derive(Default)]
struct TextCollector {
    paragraphs: Vec<String>,
    current: String,
}

impl TextCollector {
    /// Iterative pre-order walk, so nesting depth is bounded by the heap only.
    fn collect(&mut self, root: ElementRef<'_>, removed: &[ElementRef<'_>]) {
        let mut skipping: Option<NodeId> = None;

        for edge in root.traverse() {
            match edge {
                Edge::Open(node) => {
                    if skipping.is_some() || node.id() == root.id() {
                        continue;
                    }
                    match node.value() {
                        Node::Text(text) => {
                            self.current.push(' ');
                            self.current.push_str(text);
                        }
                        Node::Element(el) => {
                            let name = el.name();
                            let dropped = SKIP_TAGS.contains(&name)
                                || ElementRef::wrap(node).is_some_and(|r| removed.contains(&r));
                            if dropped {
                                skipping = Some(node.id());
                            } else if BLOCK_TAGS.contains(&name) {
                                self.break_paragraph();
                            }
                        }
                        _ => {}
                    }
                }
                Edge::Close(node) => {
                    if skipping == Some(node.id()) {
                        skipping = None;
                        continue;
                    }
                    if skipping.is_some() || node.id() == root.id() {
                        continue;
                    }
                    if let Node::Element(el) = node.value()
                        && BLOCK_TAGS.contains(&el.name())
                    {
                        self.break_paragraph();
                    }
                }
            }
        }
    }

    fn break_paragraph(&mut self) {
        let collapsed = self.current.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            self.paragraphs.push(collapsed);
        }
        self.current.clear();
    }

    fn finish(mut self) -> String {
        self.break_paragraph();
        self.paragraphs.join("\n\n")
    }
}
