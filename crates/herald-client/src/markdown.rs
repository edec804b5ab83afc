use std::sync::Arc;

use herald_core::config::Selectors;
use herald_core::error::AppError;
use herald_core::traits::ContentParser;
use htmd::HtmlToMarkdown;
use scraper::Html;

use crate::parser::{SKIP_TAGS, compile_selectors, content_selectors, nesting_depth};

/// htmd converts recursively; deeper fragments are rejected up front.
const MAX_NESTING_DEPTH: usize = 256;

/// HTML-to-Markdown parser using htmd.
///
/// Keeps headings, lists and links from rendered pages, which the LLM cleaner
/// makes use of. The first matching content selector narrows the document
/// before conversion and `remove` selectors are cut out of that fragment.
pub struct MarkdownParser {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for MarkdownParser {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl MarkdownParser {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(SKIP_TAGS.to_vec())
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    fn narrow(html: &str, selectors: &Selectors) -> Result<String, AppError> {
        let document = Html::parse_document(html);

        let root = content_selectors(selectors)
            .iter()
            .find_map(|sel| document.select(sel).next())
            .unwrap_or_else(|| document.root_element());

        let depth = nesting_depth(root);
        if depth > MAX_NESTING_DEPTH {
            return Err(AppError::ParseError(format!(
                "element nesting depth {depth} exceeds {MAX_NESTING_DEPTH}"
            )));
        }

        Ok(compile_selectors(selectors.remove.iter().map(String::as_str))
            .iter()
            .flat_map(|sel| document.select(sel))
            .fold(root.html(), |acc, el| acc.replace(&el.html(), "")))
    }
}

impl Default for MarkdownParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentParser for MarkdownParser {
    fn parse(&self, html: &str, selectors: &Selectors) -> Result<String, AppError> {
        let fragment = Self::narrow(html, selectors)?;
        let markdown = self
            .converter
            .convert(&fragment)
            .map_err(|e| AppError::ParseError(e.to_string()))?;

        let markdown = markdown.trim();
        if markdown.is_empty() {
            return Err(AppError::ParseError(
                "document converted to empty markdown".to_string(),
            ));
        }
        Ok(markdown.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_html_to_markdown() {
        let parser = MarkdownParser::new();
        let md = parser
            .parse("<h1>Hello</h1><p>World</p>", &Selectors::default())
            .unwrap();
        assert!(md.contains("Hello"));
        assert!(md.contains("World"));
    }

    #[test]
    fn test_strips_script_tags() {
        let parser = MarkdownParser::new();
        let md = parser
            .parse(
                "<p>Content</p><script>alert('xss')</script>",
                &Selectors::default(),
            )
            .unwrap();
        assert!(md.contains("Content"));
        assert!(!md.contains("alert"));
    }

    #[test]
    fn test_narrows_to_content_and_removes() {
        let html = r#"<body><div>Sidebar</div><article><h2>Gold</h2><p>Gold rose.</p><p class="promo">Subscribe</p></article></body>"#;
        let selectors = Selectors {
            content: vec!["article".into()],
            remove: vec![".promo".into()],
        };
        let md = MarkdownParser::new().parse(html, &selectors).unwrap();
        assert!(md.contains("Gold rose."));
        assert!(!md.contains("Sidebar"));
        assert!(!md.contains("Subscribe"));
    }

    #[test]
    fn test_empty_result_is_parse_error() {
        let err = MarkdownParser::new()
            .parse("<nav>menu</nav>", &Selectors::default())
            .unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }

    #[test]
    fn test_deep_nesting_is_parse_error() {
        let html = format!(
            "<article>{}text{}</article>",
            "<div>".repeat(20_000),
            "</div>".repeat(20_000)
        );
        let err = MarkdownParser::new()
            .parse(&html, &Selectors::default())
            .unwrap_err();
        assert!(matches!(err, AppError::ParseError(ref m) if m.contains("nesting depth")));
        assert!(err.is_soft());
    }
}
