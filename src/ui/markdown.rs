//! Markdown-to-ANSI rendering for pretty mode.
//!
//! Keeps to the subset that matters in chat replies: headings, emphasis,
//! inline code, fenced blocks, lists and links. Anything else falls through
//! as plain text.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

const BOLD: &str = "\x1b[1m";
const ITALIC: &str = "\x1b[3m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

fn heading_prefix(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "# ",
        HeadingLevel::H2 => "## ",
        HeadingLevel::H3 => "### ",
        HeadingLevel::H4 => "#### ",
        HeadingLevel::H5 => "##### ",
        HeadingLevel::H6 => "###### ",
    }
}

/// Render markdown to a string with ANSI styling, ending with a newline.
pub fn render_markdown(input: &str) -> String {
    let parser = Parser::new_ext(input, Options::ENABLE_STRIKETHROUGH);
    let mut out = String::new();
    let mut in_code_block = false;
    let mut list_depth: usize = 0;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                out.push_str(BOLD);
                out.push_str(heading_prefix(level));
            }
            Event::End(TagEnd::Heading(_)) => {
                out.push_str(RESET);
                out.push('\n');
            }
            Event::Start(Tag::Strong) => out.push_str(BOLD),
            Event::End(TagEnd::Strong) => out.push_str(RESET),
            Event::Start(Tag::Emphasis) => out.push_str(ITALIC),
            Event::End(TagEnd::Emphasis) => out.push_str(RESET),
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        out.push_str(DIM);
                        out.push_str(&lang);
                        out.push_str(RESET);
                        out.push('\n');
                    }
                }
                out.push_str(CYAN);
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                out.push_str(RESET);
                out.push('\n');
            }
            Event::Start(Tag::List(_)) => list_depth += 1,
            Event::End(TagEnd::List(_)) => {
                list_depth = list_depth.saturating_sub(1);
                if list_depth == 0 {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => {
                out.push_str(&"  ".repeat(list_depth.saturating_sub(1)));
                out.push_str("- ");
            }
            Event::End(TagEnd::Item) => out.push('\n'),
            Event::Start(Tag::Link { dest_url, .. }) => {
                out.push_str(ITALIC);
                let _ = dest_url;
            }
            Event::End(TagEnd::Link) => out.push_str(RESET),
            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                if list_depth == 0 {
                    out.push('\n');
                    out.push('\n');
                }
            }
            Event::Text(text) => out.push_str(&text),
            Event::Code(code) => {
                out.push_str(CYAN);
                out.push_str(&code);
                out.push_str(RESET);
            }
            Event::SoftBreak => out.push(if in_code_block { '\n' } else { ' ' }),
            Event::HardBreak => out.push('\n'),
            Event::Rule => out.push_str("--------\n"),
            _ => {}
        }
    }

    let trimmed = out.trim_end_matches('\n');
    format!("{}\n", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render_markdown("hello world"), "hello world\n");
    }

    #[test]
    fn headings_are_bold() {
        let out = render_markdown("# Title");
        assert!(out.contains(BOLD));
        assert!(out.contains("# Title"));
    }

    #[test]
    fn inline_code_is_styled() {
        let out = render_markdown("run `cargo test` now");
        assert!(out.contains(&format!("{}cargo test{}", CYAN, RESET)));
    }

    #[test]
    fn list_items_get_dashes() {
        let out = render_markdown("- one\n- two");
        assert!(out.contains("- one\n"));
        assert!(out.contains("- two\n"));
    }
}
