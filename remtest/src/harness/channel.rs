/*

The interpreter channel
=======================

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command as Subprocess, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use tracing::debug;

use super::common::{HarnessError, HarnessResult};
use super::protocol::{Request, Update};

/** A running interpreter subprocess and its two pipes.
 *
 * Writes are newline-framed JSON; reads accumulate bytes and attempt a
 * parse at every `}`, since the interpreter only ever emits objects. A
 * reader thread owns the stdout pipe and feeds a channel, which supplies
 * the bounded wait: every read carries a deadline.
 *
 * Teardown (close stdin, kill, reap) is idempotent and also runs on drop,
 * so the subprocess is reaped on every exit path.
*/
pub struct InterpreterChannel {
    child: Child,
    stdin: Option<ChildStdin>,
    output: Receiver<Vec<u8>>,
    buf: Vec<u8>,
    timeout: Duration,
    closed: bool,
}

impl InterpreterChannel {
    /** Spawn an interpreter. The subprocess inherits the environment plus
     * the given overrides, and inherits stderr.
    */
    pub fn launch(
        argv: &[String],
        env: &[(String, String)],
        timeout: Duration,
    ) -> HarnessResult<Self> {
        let (path, args) = argv.split_first().ok_or_else(|| {
            HarnessError::Launch(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty command line",
            ))
        })?;
        debug!(target: "remtest::channel", "launching {argv:?}");
        let mut proc = Subprocess::new(path);
        proc.args(args).stdin(Stdio::piped()).stdout(Stdio::piped());
        for (key, val) in env {
            proc.env(key, val);
        }
        let mut child = proc.spawn().map_err(HarnessError::Launch)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            HarnessError::Launch(io::Error::other("no stdin pipe"))
        })?;
        let mut stdout = child.stdout.take().ok_or_else(|| {
            HarnessError::Launch(io::Error::other("no stdout pipe"))
        })?;
        let (tx, output) = unbounded();
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match stdout.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(count) => {
                        if tx.send(chunk[..count].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(InterpreterChannel {
            child,
            stdin: Some(stdin),
            output,
            buf: Vec::new(),
            timeout,
            closed: false,
        })
    }

    /** Send one protocol request, newline framed */
    pub fn send(&mut self, request: &Request) -> HarnessResult<()> {
        let mut msg = serde_json::to_vec(request)?;
        debug!(target: "remtest::channel", "send: {}", String::from_utf8_lossy(&msg));
        msg.push(b'\n');
        self.write_bytes(&msg)
    }

    /** Send one raw input line (cheap mode) */
    pub fn send_line(&mut self, line: &str) -> HarnessResult<()> {
        let mut msg = line.as_bytes().to_vec();
        msg.push(b'\n');
        self.write_bytes(&msg)
    }

    fn write_bytes(&mut self, msg: &[u8]) -> HarnessResult<()> {
        let stdin = self.stdin.as_mut().ok_or(HarnessError::ChannelClosed)?;
        stdin.write_all(msg)?;
        stdin.flush()?;
        Ok(())
    }

    /** Read one protocol update, with deadline */
    pub fn read_update(&mut self) -> HarnessResult<Update> {
        let payload = self.read_object()?;
        debug!(target: "remtest::channel", "recv: {}", String::from_utf8_lossy(&payload).trim());
        Ok(serde_json::from_slice(&payload)?)
    }

    /** Accumulate bytes until a complete JSON object parses. Each `}` seen
     * triggers an attempt; end of stream gets one final attempt. On the
     * deadline (or on end of stream), non-whitespace text before the first
     * `{` means the interpreter printed plaintext (a crash banner,
     * usually), which is reported in preference to the raw timeout.
    */
    fn read_object(&mut self) -> HarnessResult<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut scanned = 0;
        loop {
            while let Some(pos) = self.buf[scanned..].iter().position(|&byte| byte == b'}') {
                scanned += pos + 1;
                if complete_json(&self.buf[..scanned]) {
                    return Ok(self.buf.drain(..scanned).collect());
                }
            }
            scanned = self.buf.len();
            match self.output.recv_deadline(deadline) {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return Err(self.stream_error(true)),
                Err(RecvTimeoutError::Disconnected) => {
                    if !self.buf.is_empty() && complete_json(&self.buf) {
                        return Ok(std::mem::take(&mut self.buf));
                    }
                    return Err(self.stream_error(false));
                }
            }
        }
    }

    /** Read raw output until the interpreter's prompt (a `>` on a fresh
     * line) or end of stream (cheap mode).
    */
    pub fn read_prompt(&mut self) -> HarnessResult<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.buf.ends_with(b"\n>") {
                return Ok(std::mem::take(&mut self.buf));
            }
            match self.output.recv_deadline(deadline) {
                Ok(chunk) => self.buf.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return Err(HarnessError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Ok(std::mem::take(&mut self.buf)),
            }
        }
    }

    fn stream_error(&mut self, timed_out: bool) -> HarnessError {
        let text = String::from_utf8_lossy(&self.buf);
        let trimmed = text.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('{') {
            return HarnessError::NotJson(trimmed.to_string());
        }
        if timed_out {
            HarnessError::Timeout
        } else {
            HarnessError::EndOfStream
        }
    }

    /** Close stdin, kill, reap. Safe to call more than once. */
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stdin = None;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for InterpreterChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn complete_json(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde::de::IgnoredAny>(bytes).is_ok()
}
