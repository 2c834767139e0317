//! Text rendering for insight content published to hosts.
//!
//! A small markdown subset: fenced code, headings, lists, block quotes, pipe
//! tables, display and inline math, inline code, bold, emphasis and links.
//! `render` never fails; any internal fault falls back to escaped text.

use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RenderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Render `$…$` / `$$…$$` as math spans
    #[serde(default = "default_true")]
    pub math: bool,
    /// Tag fenced code with a `language-*` class
    #[serde(default = "default_true")]
    pub highlight: bool,
    /// Render pipe tables
    #[serde(default = "default_true")]
    pub tables: bool,
    #[serde(default = "default_max_input")]
    pub max_input_bytes: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_input() -> usize {
    64 * 1024
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            math: true,
            highlight: true,
            tables: true,
            max_input_bytes: default_max_input(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendered {
    pub html: String,
    pub plain_text: String,
    pub has_math: bool,
    pub has_code: bool,
    pub has_tables: bool,
}

struct Patterns {
    markdown_hints: Vec<Regex>,
    math: Regex,
    inline_code: Regex,
    /// Code or inline math, both kept verbatim
    protected: Regex,
    bold: Regex,
    emphasis: Regex,
    link: Regex,
    table_sep: Regex,
    ordered_item: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, RenderError> {
        let markdown_hints = [
            r"(?m)^#{1,6}\s+\S",
            r"(?m)^\s*[-*+]\s+\S",
            r"(?m)^\s*\d+\.\s+\S",
            r"(?m)^>\s?\S",
            r"\*\*[^*\n]+\*\*",
            r"\[[^\]\n]+\]\([^)\s]+\)",
            r"`[^`\n]+`",
            r"```",
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            markdown_hints,
            math: Regex::new(r"(?s)\$\$.+?\$\$|\$[^$\n]+\$|\\\(.+?\\\)|\\\[.+?\\\]")?,
            inline_code: Regex::new(r"`([^`\n]+)`")?,
            protected: Regex::new(r"`([^`\n]+)`|\$([^$\n]+)\$")?,
            bold: Regex::new(r"\*\*([^*\n]+)\*\*")?,
            emphasis: Regex::new(r"\*([^*\n]+)\*")?,
            link: Regex::new(r#"\[([^\]\n]+)\]\(((?:[^()\s"]|\([^()\s"]*\))+)\)"#)?,
            table_sep: Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)*\|?\s*$")?,
            ordered_item: Regex::new(r"^\d+\.\s+(.*)$")?,
        })
    }
}

/// Markdown-to-HTML renderer. Construct one per owner; there is no global instance.
pub struct TextRenderer {
    config: RenderConfig,
    patterns: Patterns,
}

enum ListKind {
    Unordered,
    Ordered,
}

impl TextRenderer {
    pub fn new(config: RenderConfig) -> Result<Self, RenderError> {
        Ok(Self {
            config,
            patterns: Patterns::compile()?,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Heuristic: does this look like markdown rather than plain prose?
    pub fn is_markdown(&self, content: &str) -> bool {
        self.patterns.markdown_hints.iter().any(|p| p.is_match(content))
            || self.has_table(content)
    }

    /// Render content. Falls back to escaped plain text on any internal fault.
    pub fn render(&self, content: &str) -> Rendered {
        match self.try_render(content) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(error = %e, "rendering failed, falling back to escaped text");
                Rendered {
                    html: encode_text(content).into_owned(),
                    plain_text: content.to_string(),
                    has_math: false,
                    has_code: false,
                    has_tables: false,
                }
            }
        }
    }

    fn try_render(&self, content: &str) -> Result<Rendered, RenderError> {
        if content.len() > self.config.max_input_bytes {
            return Err(RenderError::TooLarge {
                size: content.len(),
                limit: self.config.max_input_bytes,
            });
        }

        let has_code = content.contains("```") || self.patterns.inline_code.is_match(content);
        let has_math = self.config.math && self.patterns.math.is_match(content);
        let has_tables = self.config.tables && self.has_table(content);

        if !self.is_markdown(content) && !has_math {
            return Ok(Rendered {
                html: encode_text(content).into_owned(),
                plain_text: content.to_string(),
                has_math: false,
                has_code: false,
                has_tables,
            });
        }

        let (html, plain_text) = self.render_blocks(content)?;
        Ok(Rendered {
            html,
            plain_text,
            has_math,
            has_code,
            has_tables,
        })
    }

    fn has_table(&self, content: &str) -> bool {
        let lines: Vec<&str> = content.lines().collect();
        lines
            .windows(2)
            .any(|w| w[0].contains('|') && self.is_table_sep(w[1]))
    }

    fn is_table_sep(&self, line: &str) -> bool {
        line.contains('|') && self.patterns.table_sep.is_match(line)
    }

    fn render_blocks(&self, content: &str) -> Result<(String, String), RenderError> {
        let lines: Vec<&str> = content.lines().collect();
        let mut html = String::new();
        let mut plain: Vec<String> = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let trimmed = lines[i].trim();

            if let Some(lang) = trimmed.strip_prefix("```") {
                self.flush_paragraph(&mut paragraph, &mut html, &mut plain);
                let opened = i + 1;
                let mut body = Vec::new();
                i += 1;
                loop {
                    let line = lines.get(i).ok_or(RenderError::UnterminatedFence(opened))?;
                    if line.trim_start().starts_with("```") {
                        break;
                    }
                    body.push(*line);
                    i += 1;
                }
                i += 1;

                let code = body.join("\n");
                let lang = lang.trim();
                if self.config.highlight && !lang.is_empty() {
                    html.push_str(&format!(
                        "<pre><code class=\"language-{}\">{}</code></pre>\n",
                        encode_double_quoted_attribute(lang),
                        encode_text(&code)
                    ));
                } else {
                    html.push_str(&format!("<pre><code>{}</code></pre>\n", encode_text(&code)));
                }
                plain.push(code);
                continue;
            }

            if self.config.math && trimmed == "$$" {
                if let Some(len) = lines[i + 1..].iter().position(|l| l.trim() == "$$") {
                    self.flush_paragraph(&mut paragraph, &mut html, &mut plain);
                    let body = lines[i + 1..i + 1 + len].join("\n");
                    html.push_str(&format!(
                        "<div class=\"math math-display\">{}</div>\n",
                        encode_text(&body)
                    ));
                    plain.push(body);
                    i += len + 2;
                    continue;
                }
            }

            if trimmed.is_empty() {
                self.flush_paragraph(&mut paragraph, &mut html, &mut plain);
                i += 1;
                continue;
            }

            if let Some((level, text)) = heading(trimmed) {
                self.flush_paragraph(&mut paragraph, &mut html, &mut plain);
                html.push_str(&format!("<h{0}>{1}</h{0}>\n", level, self.inline(text)));
                plain.push(self.strip_inline(text));
                i += 1;
                continue;
            }

            if self.config.tables
                && trimmed.contains('|')
                && lines.get(i + 1).is_some_and(|l| self.is_table_sep(l))
            {
                self.flush_paragraph(&mut paragraph, &mut html, &mut plain);
                let header = split_row(trimmed);
                i += 2;
                let mut rows = Vec::new();
                while let Some(line) = lines.get(i) {
                    if !line.contains('|') || line.trim().is_empty() {
                        break;
                    }
                    rows.push(split_row(line.trim()));
                    i += 1;
                }
                self.push_table(&header, &rows, &mut html, &mut plain);
                continue;
            }

            if let Some(kind) = self.list_kind(trimmed) {
                self.flush_paragraph(&mut paragraph, &mut html, &mut plain);
                let tag = match kind {
                    ListKind::Unordered => "ul",
                    ListKind::Ordered => "ol",
                };
                html.push_str(&format!("<{}>\n", tag));
                while let Some(item) = lines.get(i).and_then(|l| self.list_item(l.trim(), &kind)) {
                    html.push_str(&format!("<li>{}</li>\n", self.inline(item)));
                    plain.push(self.strip_inline(item));
                    i += 1;
                }
                html.push_str(&format!("</{}>\n", tag));
                continue;
            }

            if let Some(quoted) = trimmed.strip_prefix('>') {
                self.flush_paragraph(&mut paragraph, &mut html, &mut plain);
                let mut quote = vec![quoted.trim()];
                i += 1;
                while let Some(next) = lines.get(i).and_then(|l| l.trim().strip_prefix('>')) {
                    quote.push(next.trim());
                    i += 1;
                }
                let text = quote.join(" ");
                html.push_str(&format!("<blockquote>{}</blockquote>\n", self.inline(&text)));
                plain.push(self.strip_inline(&text));
                continue;
            }

            paragraph.push(trimmed);
            i += 1;
        }
        self.flush_paragraph(&mut paragraph, &mut html, &mut plain);

        Ok((html.trim_end().to_string(), plain.join("\n")))
    }

    fn flush_paragraph(&self, paragraph: &mut Vec<&str>, html: &mut String, plain: &mut Vec<String>) {
        if paragraph.is_empty() {
            return;
        }
        let text = paragraph.join(" ");
        html.push_str(&format!("<p>{}</p>\n", self.inline(&text)));
        plain.push(self.strip_inline(&text));
        paragraph.clear();
    }

    fn push_table(
        &self,
        header: &[String],
        rows: &[Vec<String>],
        html: &mut String,
        plain: &mut Vec<String>,
    ) {
        html.push_str("<table>\n<thead>\n<tr>");
        for cell in header {
            html.push_str(&format!("<th>{}</th>", self.inline(cell)));
        }
        html.push_str("</tr>\n</thead>\n<tbody>\n");
        plain.push(header.join("\t"));
        for row in rows {
            html.push_str("<tr>");
            for cell in row {
                html.push_str(&format!("<td>{}</td>", self.inline(cell)));
            }
            html.push_str("</tr>\n");
            plain.push(row.join("\t"));
        }
        html.push_str("</tbody>\n</table>\n");
    }

    fn list_kind(&self, line: &str) -> Option<ListKind> {
        if self.list_item(line, &ListKind::Unordered).is_some() {
            Some(ListKind::Unordered)
        } else if self.list_item(line, &ListKind::Ordered).is_some() {
            Some(ListKind::Ordered)
        } else {
            None
        }
    }

    fn list_item<'a>(&self, line: &'a str, kind: &ListKind) -> Option<&'a str> {
        match kind {
            ListKind::Unordered => ["- ", "* ", "+ "]
                .iter()
                .find_map(|marker| line.strip_prefix(marker))
                .map(str::trim),
            ListKind::Ordered => self
                .patterns
                .ordered_item
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim()),
        }
    }

    /// Inline markup on one block of text. Code and math spans are kept verbatim.
    fn inline(&self, text: &str) -> String {
        let protected = if self.config.math {
            &self.patterns.protected
        } else {
            &self.patterns.inline_code
        };
        let mut out = String::new();
        let mut last = 0;
        for caps in protected.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&self.spans(&text[last..whole.start()]));
            if let Some(code) = caps.get(1) {
                out.push_str(&format!("<code>{}</code>", encode_text(code.as_str())));
            } else if let Some(math) = caps.get(2) {
                out.push_str(&format!(
                    r#"<span class="math math-inline">{}</span>"#,
                    encode_text(math.as_str())
                ));
            }
            last = whole.end();
        }
        out.push_str(&self.spans(&text[last..]));
        out
    }

    /// Links, then bold and emphasis on the text around them
    fn spans(&self, text: &str) -> String {
        let mut out = String::new();
        let mut last = 0;
        for caps in self.patterns.link.captures_iter(text) {
            let (Some(whole), Some(label), Some(target)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            out.push_str(&self.styled(&text[last..whole.start()]));
            if is_allowed_link(target.as_str()) {
                out.push_str(&format!(
                    r#"<a href="{}">{}</a>"#,
                    encode_double_quoted_attribute(target.as_str()),
                    self.styled(label.as_str())
                ));
            } else {
                warn!(target = target.as_str(), "link scheme not allowed, rendering as text");
                out.push_str(&encode_text(whole.as_str()));
            }
            last = whole.end();
        }
        out.push_str(&self.styled(&text[last..]));
        out
    }

    fn styled(&self, text: &str) -> String {
        let escaped = encode_text(text);
        let out = self.patterns.bold.replace_all(&escaped, "<strong>$1</strong>");
        self.patterns
            .emphasis
            .replace_all(&out, "<em>$1</em>")
            .into_owned()
    }

    fn strip_inline(&self, text: &str) -> String {
        let out = self.patterns.inline_code.replace_all(text, "$1");
        let out = self.patterns.link.replace_all(&out, "$1");
        let out = self.patterns.bold.replace_all(&out, "$1");
        self.patterns.emphasis.replace_all(&out, "$1").into_owned()
    }
}

const LINK_SCHEMES: [&str; 3] = ["http://", "https://", "mailto:"];

fn is_allowed_link(target: &str) -> bool {
    let target = target.to_ascii_lowercase();
    LINK_SCHEMES.iter().any(|scheme| target.starts_with(scheme))
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    line[level..]
        .strip_prefix(' ')
        .map(|text| (level, text.trim()))
}

fn split_row(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> TextRenderer {
        TextRenderer::new(RenderConfig::default()).unwrap()
    }

    #[test]
    fn test_plain_text() {
        let r = renderer().render("plain text");
        assert_eq!(r.html, "plain text");
        assert_eq!(r.plain_text, "plain text");
        assert!(!r.has_math);
        assert!(!r.has_code);
        assert!(!r.has_tables);
    }

    #[test]
    fn test_plain_text_is_escaped() {
        let r = renderer().render("a < b & c");
        assert_eq!(r.html, "a &lt; b &amp; c");
        assert_eq!(r.plain_text, "a < b & c");
    }

    #[test]
    fn test_is_markdown() {
        let r = renderer();
        assert!(r.is_markdown("# Title"));
        assert!(r.is_markdown("- item one\n- item two"));
        assert!(r.is_markdown("some **bold** text"));
        assert!(r.is_markdown("see [docs](https://example.com)"));
        assert!(r.is_markdown("| a | b |\n|---|---|\n| 1 | 2 |"));
        assert!(!r.is_markdown("just a sentence."));
        assert!(!r.is_markdown("#hashtag without space"));
    }

    #[test]
    fn test_heading_and_paragraph() {
        let r = renderer().render("# Summary\n\nMemory is **high**.");
        assert_eq!(r.html, "<h1>Summary</h1>\n<p>Memory is <strong>high</strong>.</p>");
        assert_eq!(r.plain_text, "Summary\nMemory is high.");
    }

    #[test]
    fn test_fenced_code() {
        let r = renderer().render("```rust\nlet x = 1 < 2;\n```");
        assert!(r.has_code);
        assert_eq!(
            r.html,
            "<pre><code class=\"language-rust\">let x = 1 &lt; 2;</code></pre>"
        );
        assert_eq!(r.plain_text, "let x = 1 < 2;");
    }

    #[test]
    fn test_fenced_code_without_highlight() {
        let config = RenderConfig {
            highlight: false,
            ..Default::default()
        };
        let r = TextRenderer::new(config).unwrap().render("```rust\nfn main() {}\n```");
        assert_eq!(r.html, "<pre><code>fn main() {}</code></pre>");
    }

    #[test]
    fn test_inline_code_kept_verbatim() {
        let r = renderer().render("call `a **b**` now");
        assert!(r.has_code);
        assert_eq!(r.html, "<p>call <code>a **b**</code> now</p>");
    }

    #[test]
    fn test_table() {
        let r = renderer().render("| goal | tasks |\n|---|---|\n| ship | 3 |");
        assert!(r.has_tables);
        assert!(r.html.contains("<th>goal</th><th>tasks</th>"));
        assert!(r.html.contains("<td>ship</td><td>3</td>"));
        assert_eq!(r.plain_text, "goal\ttasks\nship\t3");
    }

    #[test]
    fn test_tables_disabled() {
        let config = RenderConfig {
            tables: false,
            ..Default::default()
        };
        let r = TextRenderer::new(config)
            .unwrap()
            .render("| a | b |\n|---|---|\n| 1 | 2 |");
        assert!(!r.has_tables);
        assert!(!r.html.contains("<table>"));
    }

    #[test]
    fn test_math() {
        let r = renderer().render("Energy is $E = mc^2$ here");
        assert!(r.has_math);
        assert_eq!(
            r.html,
            "<p>Energy is <span class=\"math math-inline\">E = mc^2</span> here</p>"
        );

        let r = renderer().render("$$\n\\sum_i x_i\n$$");
        assert!(r.has_math);
        assert_eq!(r.html, "<div class=\"math math-display\">\\sum_i x_i</div>");
    }

    #[test]
    fn test_math_disabled() {
        let config = RenderConfig {
            math: false,
            ..Default::default()
        };
        let r = TextRenderer::new(config).unwrap().render("cost $5 to $6");
        assert!(!r.has_math);
        assert_eq!(r.html, "cost $5 to $6");
    }

    #[test]
    fn test_lists_and_quote() {
        let r = renderer().render("- one\n- *two*\n\n1. first\n2. second\n\n> noted");
        assert_eq!(
            r.html,
            "<ul>\n<li>one</li>\n<li><em>two</em></li>\n</ul>\n<ol>\n<li>first</li>\n<li>second</li>\n</ol>\n<blockquote>noted</blockquote>"
        );
        assert_eq!(r.plain_text, "one\ntwo\nfirst\nsecond\nnoted");
    }

    #[test]
    fn test_link() {
        let r = renderer().render("see [docs](https://example.com/a?b=1&c=2)");
        assert_eq!(
            r.html,
            "<p>see <a href=\"https://example.com/a?b=1&amp;c=2\">docs</a></p>"
        );
    }

    #[test]
    fn test_link_with_parentheses() {
        let r = renderer().render("see [Rust](https://en.wikipedia.org/wiki/Rust_(language))");
        assert_eq!(
            r.html,
            "<p>see <a href=\"https://en.wikipedia.org/wiki/Rust_(language)\">Rust</a></p>"
        );
        assert_eq!(r.plain_text, "see Rust");
    }

    #[test]
    fn test_script_link_rendered_as_text() {
        let r = renderer().render("see [click](javascript:alert(document.cookie))");
        assert_eq!(r.html, "<p>see [click](javascript:alert(document.cookie))</p>");
        assert!(!r.html.contains("href"));

        let r = renderer().render("[x](JavaScript:void(0)) and [y](data:text/html,hi)");
        assert!(!r.html.contains("<a "));
    }

    #[test]
    fn test_mailto_link() {
        let r = renderer().render("mail [ops](mailto:ops@example.com)");
        assert_eq!(
            r.html,
            "<p>mail <a href=\"mailto:ops@example.com\">ops</a></p>"
        );
    }

    #[test]
    fn test_inline_math_kept_verbatim() {
        let r = renderer().render("price $a*b*c$ here");
        assert!(r.has_math);
        assert_eq!(
            r.html,
            "<p>price <span class=\"math math-inline\">a*b*c</span> here</p>"
        );
    }

    #[test]
    fn test_unterminated_fence_falls_back() {
        let content = "```rust\nfn broken() {";
        let r = renderer().render(content);
        assert_eq!(r.html, "```rust\nfn broken() {");
        assert_eq!(r.plain_text, content);
        assert!(!r.has_code);
    }

    #[test]
    fn test_oversized_input_falls_back() {
        let config = RenderConfig {
            max_input_bytes: 8,
            ..Default::default()
        };
        let content = "# <b>too long</b>";
        let r = TextRenderer::new(config).unwrap().render(content);
        assert_eq!(r.html, "# &lt;b&gt;too long&lt;/b&gt;");
        assert_eq!(r.plain_text, content);
    }

    #[test]
    fn test_raw_html_is_escaped() {
        let r = renderer().render("# <script>alert(1)</script>");
        assert_eq!(r.html, "<h1>&lt;script&gt;alert(1)&lt;/script&gt;</h1>");
    }
}
