//! Worker outcome signal: a strict tokenizer and parser over raw worker output.
//!
//! A worker reports exactly one tagged block:
//!
//! ```text
//! <<COMPLETE>>{"filesModified": ["src/a.rs"], "summary": "..."}<</COMPLETE>>
//! <<BLOCKED>>{"reason": "..."}<</BLOCKED>>
//! ```
//!
//! Text outside the block is ignored. Nested blocks, stray or mismatched close
//! tokens, unterminated blocks, and more than one block are framing errors.
//! Nothing is ever inferred from exit status.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const TAIL_LINES: usize = 40;
const TAIL_BYTES: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalTag {
    Complete,
    Blocked,
}

impl SignalTag {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalTag::Complete => "COMPLETE",
            SignalTag::Blocked => "BLOCKED",
        }
    }

    pub fn open_token(self) -> &'static str {
        match self {
            SignalTag::Complete => "<<COMPLETE>>",
            SignalTag::Blocked => "<<BLOCKED>>",
        }
    }

    pub fn close_token(self) -> &'static str {
        match self {
            SignalTag::Complete => "<</COMPLETE>>",
            SignalTag::Blocked => "<</BLOCKED>>",
        }
    }
}

impl fmt::Display for SignalTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub files_modified: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Complete(CompletePayload),
    Blocked(BlockedPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("no COMPLETE or BLOCKED tag found in worker output")]
    NoSignal { tail: String },

    #[error("{tag} tag found, payload unparseable: {detail}")]
    Unparseable { tag: SignalTag, detail: String },

    #[error("malformed signal framing: {detail}")]
    Framing { detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Open(SignalTag, usize),
    Close(SignalTag, usize),
}

/// Scan for open/close tokens, recording the byte offset just past each token.
fn tokenize(output: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while let Some(found) = output[pos..].find("<<") {
        let start = pos + found;
        let rest = &output[start..];
        let matched = [SignalTag::Complete, SignalTag::Blocked]
            .into_iter()
            .find_map(|tag| {
                if rest.starts_with(tag.open_token()) {
                    Some((Token::Open(tag, start + tag.open_token().len()), tag.open_token()))
                } else if rest.starts_with(tag.close_token()) {
                    Some((Token::Close(tag, start), tag.close_token()))
                } else {
                    None
                }
            });
        match matched {
            Some((token, text)) => {
                tokens.push(token);
                pos = start + text.len();
            }
            None => pos = start + 1,
        }
    }
    tokens
}

/// Locate the single signal block and the byte range of its body.
fn frame(tokens: &[Token]) -> Result<Option<(SignalTag, Range<usize>)>, SignalError> {
    let mut open: Option<(SignalTag, usize)> = None;
    let mut block: Option<(SignalTag, Range<usize>)> = None;

    for token in tokens {
        match (*token, open) {
            (Token::Open(tag, _), Some((outer, _))) => {
                return Err(SignalError::Framing {
                    detail: format!("{tag} block opened inside {outer} block"),
                });
            }
            (Token::Open(tag, body_start), None) => {
                if let Some((first, _)) = &block {
                    return Err(SignalError::Framing {
                        detail: format!("more than one signal block ({first} then {tag})"),
                    });
                }
                open = Some((tag, body_start));
            }
            (Token::Close(tag, _), None) => {
                return Err(SignalError::Framing {
                    detail: format!("{} without matching open token", tag.close_token()),
                });
            }
            (Token::Close(tag, end), Some((outer, body_start))) => {
                if tag != outer {
                    return Err(SignalError::Framing {
                        detail: format!("{outer} block closed by {}", tag.close_token()),
                    });
                }
                block = Some((tag, body_start..end));
                open = None;
            }
        }
    }

    if let Some((tag, _)) = open {
        return Err(SignalError::Framing {
            detail: format!("{tag} block never closed"),
        });
    }
    Ok(block)
}

pub fn parse_signal(output: &str) -> Result<Signal, SignalError> {
    let tokens = tokenize(output);
    let Some((tag, body)) = frame(&tokens)? else {
        return Err(SignalError::NoSignal {
            tail: output_tail(output),
        });
    };
    let body = output[body].trim();
    let unparseable = |err: serde_json::Error| SignalError::Unparseable {
        tag,
        detail: err.to_string(),
    };
    match tag {
        SignalTag::Complete => serde_json::from_str::<CompletePayload>(body)
            .map(Signal::Complete)
            .map_err(unparseable),
        SignalTag::Blocked => serde_json::from_str::<BlockedPayload>(body)
            .map(Signal::Blocked)
            .map_err(unparseable),
    }
}

/// Last lines of output kept for diagnosis, bounded in both lines and bytes.
pub fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.len() <= TAIL_BYTES {
        return tail;
    }
    let mut cut = tail.len() - TAIL_BYTES;
    while !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail[cut..].to_string()
}
