/*

Common things
=============

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

use std::io;

use thiserror::Error;

/** Runtime failures of one test session.
 *
 * Everything here is caught at the per-test boundary: the driver counts it,
 * prints it, tears the subprocess down, and moves on to the next test.
*/
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("channel is closed")]
    ChannelClosed,
    #[error("cheap mode only supports line input")]
    CheapLineOnly,
    #[error("interpreter output ended before a complete update")]
    EndOfStream,
    #[error("could not launch interpreter: {0}")]
    Launch(#[source] io::Error),
    #[error("Multiple windows accepting {0} input")]
    MultipleInputRequests(&'static str),
    #[error("no game file specified")]
    NoGameFile,
    #[error("no interpreter specified")]
    NoInterpreter,
    #[error("No such window: {0}")]
    NoSuchWindow(u32),
    #[error("Game is not expecting {0}")]
    NotExpecting(&'static str),
    #[error("interpreter sent non-JSON output:\n{0}")]
    NotJson(String),
    #[error("content arrived for window {0} while it awaits line input")]
    PendingLineInput(u32),
    #[error("timed out awaiting an update from the interpreter")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/** Malformed test files (and malformed checks or commands within them) */
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: cannot interpret char \"{key}\"")]
    BadCharKey { line: usize, key: String },
    #[error("line {line}: bad check: {detail}")]
    BadCheck { line: usize, detail: String },
    #[error("line {line}: bad command: {detail}")]
    BadCommand { line: usize, detail: String },
    #[error("line {line}: bad regular expression: {source}")]
    BadRegExp { line: usize, source: regex::Error },
    #[error("line {line}: check before any test")]
    CheckOutsideTest { line: usize },
    #[error("line {line}: command before any test")]
    CommandOutsideTest { line: usize },
    #[error("line {line}: test name used twice: {name}")]
    DuplicateTest { line: usize, name: String },
    #[error("include loop detected at {name}")]
    IncludeCycle { name: String },
    #[error("included test does not exist: {name}")]
    UnknownInclude { name: String },
    #[error("line {line}: unknown command type: {kind}")]
    UnknownCommandType { line: usize, kind: String },
    #[error("line {line}: unknown test modifier: {modifier}")]
    UnknownModifier { line: usize, modifier: String },
    #[error("line {line}: unknown option: ** {key}")]
    UnknownOption { line: usize, key: String },
}
