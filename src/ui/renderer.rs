//! Token-to-terminal rendering with per-token line accounting.
//!
//! Raw mode writes tokens verbatim. Pretty mode streams tokens live, keeps
//! count of the rows they occupied (token width modulo terminal width), and
//! on completion clears that region and re-renders the full message through
//! the markdown renderer.

use std::io::{self, Write};

use crossterm::{cursor, queue, terminal};
use unicode_width::UnicodeWidthChar;

use crate::core::call::Call;
use crate::ui::markdown::render_markdown;

const DEFAULT_WIDTH: usize = 80;
/// Most newlines of tool output shown to the user in pretty mode. The full
/// output still goes back to the model.
const TOOL_OUTPUT_PREVIEW_LINES: usize = 8;

pub struct Renderer {
    raw: bool,
    width: usize,
    col: usize,
    line_count: usize,
    writer: Box<dyn Write + Send>,
}

impl Renderer {
    pub fn new(raw: bool) -> Self {
        let width = terminal::size()
            .map(|(cols, _)| cols as usize)
            .unwrap_or(DEFAULT_WIDTH)
            .max(1);
        Self {
            raw,
            width,
            col: 0,
            line_count: 0,
            writer: Box::new(io::stdout()),
        }
    }

    /// Test constructor with a fixed width and a capturing writer.
    pub fn with_writer(raw: bool, width: usize, writer: Box<dyn Write + Send>) -> Self {
        Self {
            raw,
            width: width.max(1),
            col: 0,
            line_count: 0,
            writer,
        }
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn reset(&mut self) {
        self.col = 0;
        self.line_count = 0;
    }

    /// Write one streamed token and update the row accounting.
    pub fn push_token(&mut self, token: &str) -> io::Result<()> {
        self.writer.write_all(token.as_bytes())?;
        self.writer.flush()?;
        for ch in token.chars() {
            if ch == '\n' {
                self.line_count += 1;
                self.col = 0;
                continue;
            }
            self.col += UnicodeWidthChar::width(ch).unwrap_or(0);
            if self.col >= self.width {
                self.line_count += 1;
                self.col = 0;
            }
        }
        Ok(())
    }

    /// End a raw-mode stream with a newline.
    pub fn finish_raw(&mut self) -> io::Result<()> {
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    /// Clear the live-streamed region and re-render the message as markdown.
    pub fn redraw_pretty(&mut self, full_msg: &str) -> io::Result<()> {
        queue!(
            self.writer,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        for _ in 0..self.line_count {
            queue!(
                self.writer,
                cursor::MoveUp(1),
                terminal::Clear(terminal::ClearType::CurrentLine)
            )?;
        }
        self.writer.write_all(render_markdown(full_msg).as_bytes())?;
        self.writer.flush()?;
        self.reset();
        Ok(())
    }

    /// Finish the current turn: raw gets a newline, pretty gets a redraw.
    pub fn finish(&mut self, full_msg: &str) -> io::Result<()> {
        if self.raw {
            self.finish_raw()
        } else {
            self.redraw_pretty(full_msg)
        }
    }

    /// Announce a tool call in the transcript.
    pub fn announce_tool_call(&mut self, call: &Call) -> io::Result<()> {
        let announcement = call.render();
        if self.raw {
            writeln!(self.writer, "{}", announcement)?;
        } else {
            self.writer
                .write_all(render_markdown(&format!("*{}*", announcement)).as_bytes())?;
        }
        self.writer.flush()
    }

    /// Show tool output to the user. Raw mode prints everything; pretty
    /// mode bounds the number of lines shown.
    pub fn show_tool_output(&mut self, output: &str) -> io::Result<()> {
        if self.raw {
            writeln!(self.writer, "{}", output)?;
        } else {
            let lines: Vec<&str> = output.lines().collect();
            for line in lines.iter().take(TOOL_OUTPUT_PREVIEW_LINES) {
                writeln!(self.writer, "{}", line)?;
            }
            if lines.len() > TOOL_OUTPUT_PREVIEW_LINES {
                writeln!(
                    self.writer,
                    "… ({} more lines)",
                    lines.len() - TOOL_OUTPUT_PREVIEW_LINES
                )?;
            }
        }
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_renderer(raw: bool, width: usize) -> (Renderer, SharedBuf) {
        let buf = SharedBuf::default();
        let renderer = Renderer::with_writer(raw, width, Box::new(buf.clone()));
        (renderer, buf)
    }

    #[test]
    fn tokens_are_written_verbatim() {
        let (mut renderer, buf) = test_renderer(true, 80);
        renderer.push_token("he").unwrap();
        renderer.push_token("llo").unwrap();
        renderer.finish_raw().unwrap();
        assert_eq!(buf.contents(), "hello\n");
    }

    #[test]
    fn line_accounting_wraps_at_width() {
        let (mut renderer, _) = test_renderer(false, 4);
        renderer.push_token("abcdefgh").unwrap();
        assert_eq!(renderer.line_count(), 2);
        renderer.push_token("x\ny").unwrap();
        assert_eq!(renderer.line_count(), 3);
    }

    #[test]
    fn newlines_advance_line_count() {
        let (mut renderer, _) = test_renderer(false, 80);
        renderer.push_token("a\nb\nc").unwrap();
        assert_eq!(renderer.line_count(), 2);
    }

    #[test]
    fn pretty_tool_output_is_shortened() {
        let (mut renderer, buf) = test_renderer(false, 80);
        let output = (0..20).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        renderer.show_tool_output(&output).unwrap();
        let shown = buf.contents();
        assert!(shown.contains("line0"));
        assert!(!shown.contains("line19"));
        assert!(shown.contains("12 more lines"));
    }

    #[test]
    fn raw_tool_output_is_complete() {
        let (mut renderer, buf) = test_renderer(true, 80);
        let output = (0..20).map(|i| format!("line{}", i)).collect::<Vec<_>>().join("\n");
        renderer.show_tool_output(&output).unwrap();
        assert!(buf.contents().contains("line19"));
    }

    #[test]
    fn redraw_resets_accounting() {
        let (mut renderer, buf) = test_renderer(false, 10);
        renderer.push_token("a long streamed message").unwrap();
        renderer.redraw_pretty("**done**").unwrap();
        assert_eq!(renderer.line_count(), 0);
        assert!(buf.contents().contains("done"));
    }
}
