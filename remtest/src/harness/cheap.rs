/*

Cheap mode
==========

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

use std::time::Duration;

use crate::GameSession;

use super::channel::InterpreterChannel;
use super::common::{HarnessError, HarnessResult};
use super::testfile::Command;
use super::windows::Projection;

/** A dumb-terminal session: no protocol, no windows. Output is read until
 * the interpreter's `>` prompt and split into story lines; the status and
 * graphics views stay empty, and only line input exists.
*/
pub struct CheapSession {
    channel: InterpreterChannel,
    story: Vec<String>,
}

impl CheapSession {
    pub fn launch(
        argv: &[String],
        env: &[(String, String)],
        timeout: Duration,
    ) -> HarnessResult<Self> {
        Ok(CheapSession {
            channel: InterpreterChannel::launch(argv, env, timeout)?,
            story: Vec::new(),
        })
    }
}

impl GameSession for CheapSession {
    fn initialize(&mut self) -> HarnessResult<()> {
        Ok(())
    }

    fn perform_input(&mut self, cmd: &Command) -> HarnessResult<()> {
        match cmd {
            Command::Line { text } => self.channel.send_line(text),
            _ => Err(HarnessError::CheapLineOnly),
        }
    }

    fn accept_output(&mut self) -> HarnessResult<()> {
        let bytes = self.channel.read_prompt()?;
        let text = String::from_utf8_lossy(&bytes);
        self.story = text.lines().map(str::to_string).collect();
        Ok(())
    }

    fn projection(&self) -> Projection {
        Projection {
            story: self.story.clone(),
            ..Default::default()
        }
    }
}
