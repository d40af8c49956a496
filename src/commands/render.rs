//! Terminal painting for projected message views.

use std::io::{Write, stdout};

use gemchat::render::{MessageView, Span};

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";
const CLEAR_LINE: &str = "\r\x1b[2K";

/// Render spans as one ANSI-styled string.
pub fn spans_to_ansi(spans: &[Span]) -> String {
    let mut out = String::new();
    for span in spans {
        match span {
            Span::Text(text) => out.push_str(text),
            Span::Bold(text) => {
                out.push_str(BOLD);
                out.push_str(text);
                out.push_str(RESET);
            }
            Span::Code(text) => {
                out.push_str(CYAN);
                out.push_str(text);
                out.push_str(RESET);
            }
            Span::LineBreak => out.push('\n'),
        }
    }
    out
}

fn spans_plain(spans: &[Span]) -> String {
    let mut out = String::new();
    for span in spans {
        match span {
            Span::Text(text) | Span::Bold(text) | Span::Code(text) => out.push_str(text),
            Span::LineBreak => out.push('\n'),
        }
    }
    out
}

/// Print a finalized message block.
pub fn print_final(view: &MessageView) {
    let MessageView::Final {
        prompt,
        label,
        spans,
        error,
        ..
    } = view
    else {
        return;
    };

    if let Some(prompt) = prompt {
        println!("{DIM}> {prompt}{RESET}");
    }
    println!("{BOLD}{label}:{RESET} {}", spans_to_ansi(spans));

    // Failure views carry their message both as spans and as the error
    // field; only print a separate error line when it adds information.
    if let Some(error) = error
        && *error != spans_plain(spans)
    {
        println!("{RED}{error}{RESET}");
    }
    println!();
}

/// Incremental painter for one in-flight exchange.
///
/// Streams raw answer text as it grows; the busy indicator lives on a single
/// line that is cleared once real content arrives.
pub struct StreamPainter {
    printed: String,
    busy_shown: bool,
    header_shown: bool,
}

impl StreamPainter {
    pub fn new() -> Self {
        Self {
            printed: String::new(),
            busy_shown: false,
            header_shown: false,
        }
    }

    pub fn paint(&mut self, view: &MessageView) {
        let mut out = stdout();
        match view {
            MessageView::Busy { phrase } => {
                let _ = write!(out, "{CLEAR_LINE}{DIM}{phrase}...{RESET}");
                let _ = out.flush();
                self.busy_shown = true;
            }
            MessageView::Streaming { label, answer, .. } => {
                if self.busy_shown {
                    let _ = write!(out, "{CLEAR_LINE}");
                    self.busy_shown = false;
                }
                if !self.header_shown {
                    let _ = write!(out, "{BOLD}{label}:{RESET} ");
                    self.header_shown = true;
                }
                // The accumulated answer normally grows in place; if the
                // server revised what was already shown, repaint it whole.
                match answer.strip_prefix(self.printed.as_str()) {
                    Some(delta) => {
                        let _ = write!(out, "{delta}");
                    }
                    None => {
                        let _ = write!(out, "{CLEAR_LINE}{BOLD}{label}:{RESET} {answer}");
                    }
                }
                self.printed.clear();
                self.printed.push_str(answer);
                let _ = out.flush();
            }
            MessageView::Final { error, .. } => {
                if self.busy_shown {
                    let _ = write!(out, "{CLEAR_LINE}");
                    let _ = out.flush();
                    self.busy_shown = false;
                }
                if self.header_shown {
                    // Body already streamed; close the block.
                    println!();
                    if let Some(error) = error {
                        println!("{RED}{error}{RESET}");
                    }
                    println!();
                } else {
                    print_final(view);
                }
            }
            MessageView::None => {
                if self.busy_shown {
                    let _ = write!(out, "{CLEAR_LINE}");
                    let _ = out.flush();
                    self.busy_shown = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming(answer: &str) -> MessageView {
        MessageView::Streaming {
            label: "The Mapper".to_string(),
            system: false,
            answer: answer.to_string(),
            spans: Vec::new(),
        }
    }

    #[test]
    fn painter_tracks_a_growing_answer() {
        let mut painter = StreamPainter::new();
        painter.paint(&streaming("Hel"));
        painter.paint(&streaming("Hello, world"));
        assert_eq!(painter.printed, "Hello, world");
    }

    #[test]
    fn painter_survives_a_revised_accumulated_prefix() {
        let mut painter = StreamPainter::new();
        // The previously shown byte length falls inside a multibyte
        // character of the revised text; the painter must repaint
        // instead of slicing at that offset.
        painter.paint(&streaming("Hel"));
        painter.paint(&streaming("H🌍 hello"));
        assert_eq!(painter.printed, "H🌍 hello");

        painter.paint(&streaming("H🌍 hello!"));
        assert_eq!(painter.printed, "H🌍 hello!");
    }
}
