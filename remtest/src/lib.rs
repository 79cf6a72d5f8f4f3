/*

RemTest: a regression-test harness for RemGlk interpreters
==========================================================

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

#![forbid(unsafe_code)]

pub mod harness;

use harness::common::HarnessResult;
use harness::testfile::Command;
use harness::windows::Projection;

/** The harness's view of one interpreter session.
 *
 * A session is a serial loop of (send, await, evaluate): every
 * `perform_input` must be followed by one `accept_output` before the next
 * input is sent. The driver owns that loop; implementations only need to
 * speak their transport.
*/
pub trait GameSession {
    /** Send whatever the interpreter needs before its first update */
    fn initialize(&mut self) -> HarnessResult<()>;
    /** Encode and send one user input */
    fn perform_input(&mut self, cmd: &Command) -> HarnessResult<()>;
    /** Block (with deadline) until one full update has been folded into the session state */
    fn accept_output(&mut self) -> HarnessResult<()>;
    /** The current display state, flattened for check consumption */
    fn projection(&self) -> Projection;
}
