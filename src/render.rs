//! Pure projection from session snapshots to visual message descriptors.
//!
//! The projector owns no state: it is rebuilt from the latest snapshot on
//! every incremental update, and the caller decides how to paint the
//! resulting [`MessageView`]. Text is carried as typed spans; anything that
//! is not one of the two inline conventions stays literal text and is never
//! re-interpreted as markup.

use crate::session::{Outcome, Phase, Responder, SessionView};

/// Rotating status phrases for the busy indicator.
pub const BUSY_PHRASES: [&str; 4] = [
    "Processing",
    "Consulting the GEM",
    "Shaping the answer",
    "Almost there",
];

/// Pick the busy phrase for a given animation tick.
#[must_use]
pub fn busy_phrase(tick: u64) -> &'static str {
    BUSY_PHRASES[(tick as usize) % BUSY_PHRASES.len()]
}

/// Label shown for the responder of a message.
#[must_use]
pub fn responder_label(responder: &Responder) -> String {
    if responder.is_orchestrator {
        "System".to_string()
    } else {
        responder.name.clone().unwrap_or_else(|| "GEM".to_string())
    }
}

// ============================================================================
// Spans
// ============================================================================

/// One styled fragment of answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    /// Literal text, shown as-is.
    Text(String),
    /// A `**bold**` run.
    Bold(String),
    /// A `` `code` `` run, shown in monospace.
    Code(String),
    /// A preserved line break.
    LineBreak,
}

/// Split answer text into styled spans.
///
/// Line breaks become [`Span::LineBreak`]; the delimited-bold and
/// delimited-code conventions become their spans; everything else is
/// literal. An unclosed delimiter stays literal text.
#[must_use]
pub fn format_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            spans.push(Span::LineBreak);
        }
        format_line(line, &mut spans);
    }
    spans
}

fn format_line(line: &str, spans: &mut Vec<Span>) {
    let mut rest = line;
    while !rest.is_empty() {
        let bold = find_delimited(rest, "**");
        let code = find_delimited(rest, "`");

        // Earliest-opening delimiter with a closer wins.
        let next = match (bold, code) {
            (Some(b), Some(c)) => {
                if b.0 <= c.0 {
                    Some(("**", b))
                } else {
                    Some(("`", c))
                }
            }
            (Some(b), None) => Some(("**", b)),
            (None, Some(c)) => Some(("`", c)),
            (None, None) => None,
        };

        let Some((delim, (start, inner_end))) = next else {
            spans.push(Span::Text(rest.to_string()));
            break;
        };

        if start > 0 {
            spans.push(Span::Text(rest[..start].to_string()));
        }
        let inner = rest[start + delim.len()..inner_end].to_string();
        spans.push(match delim {
            "**" => Span::Bold(inner),
            _ => Span::Code(inner),
        });
        rest = &rest[inner_end + delim.len()..];
    }
}

/// Find the first `delim`-delimited run, returning the opening offset and
/// the offset where the inner text ends.
fn find_delimited(text: &str, delim: &str) -> Option<(usize, usize)> {
    let start = text.find(delim)?;
    let inner_start = start + delim.len();
    let close = text[inner_start..].find(delim)?;
    Some((start, inner_start + close))
}

// ============================================================================
// Projection
// ============================================================================

/// Visual representation of a session snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageView {
    /// Nothing to show: a cancelled session, or a settled silent command.
    None,
    /// Transient busy indicator while nothing has arrived yet.
    Busy { phrase: &'static str },
    /// A growing answer; the caller should render an open-ended
    /// continuation marker after the spans.
    Streaming {
        label: String,
        system: bool,
        /// Raw accumulated text, for incremental output paths.
        answer: String,
        spans: Vec<Span>,
    },
    /// The finalized message block.
    Final {
        prompt: Option<String>,
        label: String,
        system: bool,
        spans: Vec<Span>,
        /// Error text to surface beneath the answer, if any.
        error: Option<String>,
    },
}

/// Project a session snapshot into its visual descriptor.
///
/// Pure: same snapshot and tick, same view.
#[must_use]
pub fn project(view: &SessionView<'_>, tick: u64) -> MessageView {
    if view.cancelled {
        return MessageView::None;
    }

    if let Some(outcome) = view.outcome {
        // Silent commands settle without leaving a message block behind.
        if view.prompt.is_none() {
            return MessageView::None;
        }

        return match outcome {
            Outcome::Success {
                answer,
                responder,
                error,
            } => MessageView::Final {
                prompt: view.prompt.map(str::to_string),
                label: responder_label(responder),
                system: responder.is_orchestrator,
                spans: format_spans(answer),
                error: error.clone(),
            },
            Outcome::Failure { message, .. } => MessageView::Final {
                prompt: view.prompt.map(str::to_string),
                label: "System".to_string(),
                system: true,
                spans: format_spans(message),
                error: Some(message.clone()),
            },
        };
    }

    match view.phase {
        // Silent commands only ever show the transient indicator.
        Phase::Streaming if view.prompt.is_some() => MessageView::Streaming {
            label: responder_label(view.responder),
            system: view.responder.is_orchestrator,
            answer: view.accumulated.to_string(),
            spans: format_spans(view.accumulated),
        },
        _ => MessageView::Busy {
            phrase: busy_phrase(tick),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::session::StreamSession;

    #[test]
    fn busy_phrase_rotates() {
        assert_eq!(busy_phrase(0), BUSY_PHRASES[0]);
        assert_eq!(busy_phrase(1), BUSY_PHRASES[1]);
        assert_eq!(busy_phrase(BUSY_PHRASES.len() as u64), BUSY_PHRASES[0]);
    }

    #[test]
    fn spans_preserve_line_breaks() {
        assert_eq!(
            format_spans("a\nb"),
            vec![
                Span::Text("a".to_string()),
                Span::LineBreak,
                Span::Text("b".to_string()),
            ]
        );
    }

    #[test]
    fn spans_pick_up_bold_and_code() {
        assert_eq!(
            format_spans("use **bold** and `code` here"),
            vec![
                Span::Text("use ".to_string()),
                Span::Bold("bold".to_string()),
                Span::Text(" and ".to_string()),
                Span::Code("code".to_string()),
                Span::Text(" here".to_string()),
            ]
        );
    }

    #[test]
    fn unclosed_delimiter_stays_literal() {
        assert_eq!(
            format_spans("half **open"),
            vec![Span::Text("half **open".to_string())]
        );
    }

    #[test]
    fn waiting_session_projects_busy_indicator() {
        let session = StreamSession::new(Some("hi".to_string()));
        assert_eq!(
            project(&session.view(), 2),
            MessageView::Busy {
                phrase: BUSY_PHRASES[2]
            }
        );
    }

    #[test]
    fn streaming_session_projects_growing_answer() {
        let mut session = StreamSession::new(Some("hi".to_string()));
        session.apply(Frame::Chunk {
            accumulated: "partial".to_string(),
            gem_name: Some("Tutor".to_string()),
            is_orchestrator: false,
        });

        match project(&session.view(), 0) {
            MessageView::Streaming { label, answer, .. } => {
                assert_eq!(label, "Tutor");
                assert_eq!(answer, "partial");
            }
            other => panic!("unexpected view: {other:?}"),
        }
    }

    #[test]
    fn settled_session_projects_final_block() {
        let mut session = StreamSession::new(Some("hi".to_string()));
        session.apply(Frame::Done {
            answer: "done".to_string(),
            gem_name: None,
            is_orchestrator: true,
            error: None,
        });

        match project(&session.view(), 0) {
            MessageView::Final {
                prompt,
                label,
                system,
                error,
                ..
            } => {
                assert_eq!(prompt.as_deref(), Some("hi"));
                assert_eq!(label, "System");
                assert!(system);
                assert!(error.is_none());
            }
            other => panic!("unexpected view: {other:?}"),
        }
    }

    #[test]
    fn settled_silent_session_projects_nothing() {
        let mut session = StreamSession::new(None);
        session.apply(Frame::Done {
            answer: "quiet".to_string(),
            gem_name: None,
            is_orchestrator: true,
            error: None,
        });

        assert_eq!(project(&session.view(), 0), MessageView::None);
    }

    #[test]
    fn streaming_silent_session_shows_only_the_indicator() {
        let mut session = StreamSession::new(None);
        session.apply(Frame::Chunk {
            accumulated: "greeting so far".to_string(),
            gem_name: Some("Tutor".to_string()),
            is_orchestrator: false,
        });

        assert!(matches!(
            project(&session.view(), 0),
            MessageView::Busy { .. }
        ));
    }

    #[test]
    fn cancelled_session_projects_nothing() {
        let mut session = StreamSession::new(Some("hi".to_string()));
        session.apply(Frame::Chunk {
            accumulated: "x".to_string(),
            gem_name: None,
            is_orchestrator: false,
        });
        session.cancel();

        assert_eq!(project(&session.view(), 0), MessageView::None);
    }
}
