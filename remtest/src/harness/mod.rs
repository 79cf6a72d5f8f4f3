/*

The session driver
==================

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

pub mod channel;
pub mod cheap;
pub mod checks;
pub mod common;
pub mod protocol;
pub mod testfile;
pub mod windows;

use std::time::Duration;

use tracing::debug;

use crate::GameSession;

use channel::InterpreterChannel;
use cheap::CheapSession;
use checks::Check;
use common::{HarnessError, HarnessResult, ParseError};
use protocol::{Metrics, Request, FILEREF_PROMPT};
use testfile::{Command, Interpreter, RegTest, TestCommand, TestFile};
use windows::{DisplayState, Projection};

/** How the harness talks to the interpreter */
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionFormat {
    /** Dumb-terminal line input and output */
    #[default]
    Cheap,
    /** The RemGlk JSON protocol, one subprocess per session */
    Rem,
    /** The RemGlk JSON protocol, one subprocess per turn */
    RemSingle,
}

/** Configuration threaded through a run. Test-level directives override
 * `gamefile` and `interpreter`; those in turn override the file-level
 * directives.
*/
#[derive(Debug)]
pub struct RunnerOptions {
    pub gamefile: Option<String>,
    pub interpreter: Option<Interpreter>,
    pub format: SessionFormat,
    /** Commands run before each test's own, checks and all */
    pub precommands: Vec<TestCommand>,
    /** Environment overrides for the subprocess */
    pub env: Vec<(String, String)>,
    /** Per-read deadline */
    pub timeout: Duration,
    /** 1: a failed check aborts its test; 2: it aborts the whole run */
    pub vital: u8,
    /** 1: echo transcripts; 2: protocol traces as well */
    pub verbose: u8,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            gamefile: None,
            interpreter: None,
            format: SessionFormat::default(),
            precommands: Vec::new(),
            env: Vec::new(),
            timeout: Duration::from_secs(1),
            vital: 0,
            verbose: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    Continue,
    /** Stop the whole run (double-vital) */
    Abort,
}

enum CheckFlow {
    Continue,
    AbortTest,
    AbortRun,
}

/** Runs tests one at a time, accumulating the error count */
pub struct Runner<'a> {
    file: &'a TestFile,
    options: RunnerOptions,
    errors: usize,
}

impl<'a> Runner<'a> {
    pub fn new(file: &'a TestFile, options: RunnerOptions) -> Self {
        Runner {
            file,
            options,
            errors: 0,
        }
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    /** Run one test: launch, drive, evaluate, tear down. Runtime failures
     * (timeouts, protocol violations, missing input focus) are counted and
     * printed here, and the run continues with the next test unless
     * double-vital is set.
    */
    pub fn run_test(&mut self, test: &RegTest) -> RunOutcome {
        println!("* {}", test.name);
        debug!(target: "remtest::driver", "running test {}", test.name);
        match self.run_session(test) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.errors += 1;
                println!("{}{err}", failure_prefix(self.options.verbose));
                if self.options.vital >= 2 {
                    RunOutcome::Abort
                } else {
                    RunOutcome::Continue
                }
            }
        }
    }

    fn run_session(&mut self, test: &RegTest) -> HarnessResult<RunOutcome> {
        let gamefile = test
            .gamefile
            .as_deref()
            .or(self.options.gamefile.as_deref())
            .or(self.file.gamefile.as_deref())
            .ok_or(HarnessError::NoGameFile)?;
        let interpreter = test
            .interpreter
            .as_ref()
            .or(self.options.interpreter.as_ref())
            .or(self.file.interpreter.as_ref())
            .ok_or(HarnessError::NoInterpreter)?;

        let mut argv = vec![interpreter.path.clone()];
        argv.extend(interpreter.args.iter().cloned());

        // The session is torn down by drop on every path out of drive_session
        match self.options.format {
            SessionFormat::Cheap => {
                argv.push(gamefile.to_string());
                let mut session =
                    CheapSession::launch(&argv, &self.options.env, self.options.timeout)?;
                drive_session(self.file, &self.options, &mut self.errors, test, &mut session)
            }
            SessionFormat::Rem => {
                argv.push(gamefile.to_string());
                let mut session =
                    RemGlkSession::launch(&argv, &self.options.env, self.options.timeout)?;
                drive_session(self.file, &self.options, &mut self.errors, test, &mut session)
            }
            SessionFormat::RemSingle => {
                let mut session = RemGlkSingleSession::new(
                    argv,
                    gamefile.to_string(),
                    self.options.env.clone(),
                    self.options.timeout,
                );
                drive_session(self.file, &self.options, &mut self.errors, test, &mut session)
            }
        }
    }
}

fn drive_session(
    file: &TestFile,
    options: &RunnerOptions,
    errors: &mut usize,
    test: &RegTest,
    session: &mut dyn GameSession,
) -> HarnessResult<RunOutcome> {
    session.initialize()?;
    session.accept_output()?;
    match apply_checks(options, errors, &test.pre_checks, &session.projection()) {
        CheckFlow::AbortRun => return Ok(RunOutcome::Abort),
        CheckFlow::AbortTest => return Ok(RunOutcome::Continue),
        CheckFlow::Continue => {}
    }

    let commands = expand_commands(file, &options.precommands, test)?;
    for entry in commands {
        if options.verbose >= 1 {
            println!("> *{}*", entry.cmd);
        }
        let story_before = session.projection().story.len();
        session.perform_input(&entry.cmd)?;
        session.accept_output()?;
        let projection = session.projection();
        if options.verbose >= 1 {
            // Echo what this turn added; a rebuilt or cleared story is
            // echoed whole
            let start = if story_before <= projection.story.len() {
                story_before
            } else {
                0
            };
            for line in &projection.story[start..] {
                println!("{line}");
            }
        }
        match apply_checks(options, errors, &entry.checks, &projection) {
            CheckFlow::AbortRun => return Ok(RunOutcome::Abort),
            CheckFlow::AbortTest => return Ok(RunOutcome::Continue),
            CheckFlow::Continue => {}
        }
    }
    Ok(RunOutcome::Continue)
}

fn apply_checks(
    options: &RunnerOptions,
    errors: &mut usize,
    checks: &[Check],
    projection: &Projection,
) -> CheckFlow {
    for check in checks {
        if let Some(failure) = check.eval(projection) {
            *errors += 1;
            println!("{}{check}: {failure}", failure_prefix(options.verbose));
            if options.vital >= 2 {
                return CheckFlow::AbortRun;
            }
            if check.vital || options.vital >= 1 {
                return CheckFlow::AbortTest;
            }
        }
    }
    CheckFlow::Continue
}

fn failure_prefix(verbose: u8) -> &'static str {
    if verbose >= 1 {
        "*** "
    } else {
        ""
    }
}

/** Flatten a test's command list, substituting each `{include}` with the
 * named test's commands. A name already on the ancestor stack is a cycle.
*/
pub fn expand_commands<'a>(
    file: &'a TestFile,
    precommands: &'a [TestCommand],
    test: &'a RegTest,
) -> Result<Vec<&'a TestCommand>, ParseError> {
    let mut out = Vec::new();
    let mut stack = vec![test.name.as_str()];
    expand_entries(file, precommands, &mut stack, &mut out)?;
    expand_entries(file, &test.cmds, &mut stack, &mut out)?;
    Ok(out)
}

fn expand_entries<'a>(
    file: &'a TestFile,
    entries: &'a [TestCommand],
    stack: &mut Vec<&'a str>,
    out: &mut Vec<&'a TestCommand>,
) -> Result<(), ParseError> {
    for entry in entries {
        if let Command::Include { name } = &entry.cmd {
            if stack.iter().any(|ancestor| ancestor == name) {
                return Err(ParseError::IncludeCycle { name: name.clone() });
            }
            let target = file
                .test(name)
                .ok_or_else(|| ParseError::UnknownInclude { name: name.clone() })?;
            stack.push(&target.name);
            expand_entries(file, &target.cmds, stack, out)?;
            stack.pop();
        } else {
            out.push(entry);
        }
    }
    Ok(())
}

/** Resolve a command against the current display state and encode it.
 * Commands that need an input focus the interpreter has not granted are
 * test failures.
*/
fn encode_command(
    state: &DisplayState,
    metrics: &mut Metrics,
    cmd: &Command,
) -> HarnessResult<Request> {
    let gen = state.generation;
    Ok(match cmd {
        Command::Line { text } => Request::Line {
            gen,
            window: state
                .line_input
                .ok_or(HarnessError::NotExpecting("line input"))?,
            value: text.clone(),
        },
        Command::Char { key } => Request::Char {
            gen,
            window: state
                .char_input
                .ok_or(HarnessError::NotExpecting("char input"))?,
            value: key.clone(),
        },
        Command::Hyperlink { value } => Request::Hyperlink {
            gen,
            window: state
                .hyperlink_input
                .ok_or(HarnessError::NotExpecting("hyperlink input"))?,
            value: *value,
        },
        Command::Mouse { x, y } => Request::Mouse {
            gen,
            window: state
                .mouse_input
                .ok_or(HarnessError::NotExpecting("mouse input"))?,
            x: *x,
            y: *y,
        },
        Command::Timer => Request::Timer { gen },
        Command::Arrange { width, height } => {
            metrics.width = *width;
            if let Some(height) = height {
                metrics.height = *height;
            }
            Request::Arrange {
                gen,
                metrics: metrics.clone(),
            }
        }
        Command::Refresh => Request::Refresh { gen: 0 },
        Command::FilerefPrompt { text } => {
            if state.specialinput.as_deref() != Some(FILEREF_PROMPT) {
                return Err(HarnessError::NotExpecting("a fileref_prompt"));
            }
            Request::SpecialResponse {
                gen,
                response: FILEREF_PROMPT.to_string(),
                value: text.clone(),
            }
        }
        Command::Debug { text } => Request::DebugInput {
            gen,
            value: text.clone(),
        },
        Command::Include { .. } => unreachable!("include commands are expanded before dispatch"),
    })
}

/** A persistent RemGlk session: one subprocess pumped for many turns */
pub struct RemGlkSession {
    channel: InterpreterChannel,
    state: DisplayState,
    metrics: Metrics,
}

impl RemGlkSession {
    pub fn launch(
        argv: &[String],
        env: &[(String, String)],
        timeout: Duration,
    ) -> HarnessResult<Self> {
        Ok(RemGlkSession {
            channel: InterpreterChannel::launch(argv, env, timeout)?,
            state: DisplayState::new(),
            metrics: Metrics::default(),
        })
    }
}

impl GameSession for RemGlkSession {
    fn initialize(&mut self) -> HarnessResult<()> {
        self.channel.send(&Request::init(self.metrics.clone()))
    }

    fn perform_input(&mut self, cmd: &Command) -> HarnessResult<()> {
        let request = encode_command(&self.state, &mut self.metrics, cmd)?;
        self.channel.send(&request)
    }

    fn accept_output(&mut self) -> HarnessResult<()> {
        let update = self.channel.read_update()?;
        self.state.accept(&update)
    }

    fn projection(&self) -> Projection {
        self.state.projection()
    }
}

/** Single-turn mode: a fresh subprocess per input. The interpreter's
 * autosave/autorestore machinery carries the game state between turns; the
 * display state carries over here, on our side.
*/
pub struct RemGlkSingleSession {
    argv: Vec<String>,
    gamefile: String,
    env: Vec<(String, String)>,
    timeout: Duration,
    state: DisplayState,
    metrics: Metrics,
    pending: Option<InterpreterChannel>,
    turns: u32,
}

impl RemGlkSingleSession {
    pub fn new(
        argv: Vec<String>,
        gamefile: String,
        env: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        RemGlkSingleSession {
            argv,
            gamefile,
            env,
            timeout,
            state: DisplayState::new(),
            metrics: Metrics::default(),
            pending: None,
            turns: 0,
        }
    }

    fn spawn_turn(&mut self) -> HarnessResult<InterpreterChannel> {
        let mut argv = self.argv.clone();
        argv.push("-singleturn".to_string());
        if self.turns == 0 {
            argv.push("--autosave".to_string());
        } else {
            argv.push("-autometrics".to_string());
            argv.push("--autosave".to_string());
            argv.push("--autorestore".to_string());
        }
        argv.push(self.gamefile.clone());
        self.turns += 1;
        InterpreterChannel::launch(&argv, &self.env, self.timeout)
    }
}

impl GameSession for RemGlkSingleSession {
    fn initialize(&mut self) -> HarnessResult<()> {
        let mut channel = self.spawn_turn()?;
        channel.send(&Request::init(self.metrics.clone()))?;
        self.pending = Some(channel);
        Ok(())
    }

    fn perform_input(&mut self, cmd: &Command) -> HarnessResult<()> {
        let request = encode_command(&self.state, &mut self.metrics, cmd)?;
        let mut channel = self.spawn_turn()?;
        channel.send(&request)?;
        self.pending = Some(channel);
        Ok(())
    }

    fn accept_output(&mut self) -> HarnessResult<()> {
        let mut channel = self.pending.take().ok_or(HarnessError::ChannelClosed)?;
        let result = channel.read_update();
        channel.close();
        self.state.accept(&result?)
    }

    fn projection(&self) -> Projection {
        self.state.projection()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::checks::CheckRegistry;
    use super::testfile::parse_str;
    use super::*;

    /** A canned session: projections are served in order, inputs recorded */
    struct ScriptSession {
        turns: Vec<Projection>,
        served: usize,
        inputs: Vec<Command>,
    }

    impl ScriptSession {
        fn new(turns: Vec<Projection>) -> Self {
            ScriptSession {
                turns,
                served: 0,
                inputs: Vec::new(),
            }
        }
    }

    impl GameSession for ScriptSession {
        fn initialize(&mut self) -> HarnessResult<()> {
            Ok(())
        }

        fn perform_input(&mut self, cmd: &Command) -> HarnessResult<()> {
            self.inputs.push(cmd.clone());
            Ok(())
        }

        fn accept_output(&mut self) -> HarnessResult<()> {
            if self.served < self.turns.len() {
                self.served += 1;
                Ok(())
            } else {
                Err(HarnessError::EndOfStream)
            }
        }

        fn projection(&self) -> Projection {
            self.turns[self.served - 1].clone()
        }
    }

    fn story(lines: &[&str]) -> Projection {
        Projection {
            story: lines.iter().map(|line| line.to_string()).collect(),
            ..Default::default()
        }
    }

    fn parse(src: &str) -> TestFile {
        parse_str(src, &CheckRegistry::default()).unwrap()
    }

    #[test]
    fn checks_run_per_turn_and_count_failures() {
        let file = parse(
            "* t\nWelcome\n>look\nMailbox\nmissing text\n>open mailbox\nleaflet\n",
        );
        let mut session = ScriptSession::new(vec![
            story(&["Welcome"]),
            story(&["Welcome", "Mailbox here"]),
            story(&["Welcome", "Mailbox here", "A leaflet falls out"]),
        ]);
        let options = RunnerOptions::default();
        let mut errors = 0;
        let outcome = drive_session(&file, &options, &mut errors, &file.tests[0], &mut session)
            .unwrap();
        assert_eq!(outcome, RunOutcome::Continue);
        assert_eq!(errors, 1);
        assert_eq!(session.inputs.len(), 2);
    }

    #[test]
    fn vital_check_aborts_the_test() {
        let file = parse("* t\n>look\n{vital} gone\n>never sent\n");
        let mut session = ScriptSession::new(vec![story(&[]), story(&["nothing"])]);
        let options = RunnerOptions::default();
        let mut errors = 0;
        let outcome = drive_session(&file, &options, &mut errors, &file.tests[0], &mut session)
            .unwrap();
        assert_eq!(outcome, RunOutcome::Continue);
        assert_eq!(errors, 1);
        // The second command was never sent
        assert_eq!(session.inputs.len(), 1);
    }

    #[test]
    fn double_vital_aborts_the_run() {
        let file = parse("* t\ngone from initial state\n");
        let mut session = ScriptSession::new(vec![story(&[])]);
        let options = RunnerOptions {
            vital: 2,
            ..Default::default()
        };
        let mut errors = 0;
        let outcome = drive_session(&file, &options, &mut errors, &file.tests[0], &mut session)
            .unwrap();
        assert_eq!(outcome, RunOutcome::Abort);
    }

    #[test]
    fn precommands_run_before_test_commands() {
        let file = parse("** pre: look\n* t\n>north\n");
        let mut session = ScriptSession::new(vec![story(&[]), story(&[]), story(&[])]);
        let mut errors = 0;
        let options = RunnerOptions::default();
        drive_session(&file, &options, &mut errors, &file.tests[0], &mut session).unwrap();
        assert_eq!(
            session.inputs,
            vec![
                Command::Line {
                    text: "look".to_string()
                },
                Command::Line {
                    text: "north".to_string()
                },
            ]
        );
    }

    #[test]
    fn includes_expand_in_place() {
        let file = parse(
            "* main\n>first\n>{include} extra\n>last\n* extra\n>middle one\n>middle two\n",
        );
        let expanded = expand_commands(&file, &[], file.test("main").unwrap()).unwrap();
        let texts: Vec<String> = expanded.iter().map(|entry| entry.cmd.to_string()).collect();
        assert_eq!(texts, vec!["first", "middle one", "middle two", "last"]);
    }

    #[test]
    fn include_cycles_are_parse_errors() {
        let file = parse("* a\n>{include} b\n* b\n>{include} a\n");
        let err = expand_commands(&file, &[], file.test("a").unwrap()).unwrap_err();
        assert!(matches!(err, ParseError::IncludeCycle { .. }));

        let file = parse("* s\n>{include} s\n");
        let err = expand_commands(&file, &[], file.test("s").unwrap()).unwrap_err();
        assert!(matches!(err, ParseError::IncludeCycle { .. }));
    }

    #[test]
    fn unknown_includes_are_parse_errors() {
        let file = parse("* a\n>{include} ghost\n");
        let err = expand_commands(&file, &[], file.test("a").unwrap()).unwrap_err();
        assert!(matches!(err, ParseError::UnknownInclude { .. }));
    }

    #[test]
    fn commands_need_their_input_focus() {
        let state = DisplayState::new();
        let mut metrics = Metrics::default();
        let err = encode_command(
            &state,
            &mut metrics,
            &Command::Line {
                text: "look".to_string(),
            },
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Game is not expecting line input");

        let err = encode_command(&state, &mut metrics, &Command::Char { key: "x".to_string() })
            .unwrap_err();
        assert_eq!(err.to_string(), "Game is not expecting char input");

        let err = encode_command(
            &state,
            &mut metrics,
            &Command::FilerefPrompt {
                text: "save1".to_string(),
            },
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Game is not expecting a fileref_prompt");
    }

    #[test]
    fn line_commands_carry_focus_window_and_generation() {
        let mut state = DisplayState::new();
        state
            .accept(
                &serde_json::from_value(json!({
                    "gen": 4,
                    "windows": [{"id": 7, "type": "buffer", "rock": 0,
                                 "left": 0, "top": 0, "width": 800, "height": 480}],
                    "input": [{"id": 7, "type": "line", "gen": 4}],
                }))
                .unwrap(),
            )
            .unwrap();
        let mut metrics = Metrics::default();
        let request = encode_command(
            &state,
            &mut metrics,
            &Command::Line {
                text: "examine mailbox".to_string(),
            },
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"type": "line", "gen": 4, "window": 7, "value": "examine mailbox"})
        );
    }

    #[test]
    fn arrange_rewrites_the_metrics() {
        let state = DisplayState::new();
        let mut metrics = Metrics::default();
        let request = encode_command(
            &state,
            &mut metrics,
            &Command::Arrange {
                width: 640.0,
                height: Some(400.0),
            },
        )
        .unwrap();
        assert_eq!(metrics.width, 640.0);
        assert_eq!(metrics.height, 400.0);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "arrange");
        assert_eq!(value["metrics"]["width"], 640.0);

        // Refresh always goes out at generation zero
        let request = encode_command(&state, &mut metrics, &Command::Refresh).unwrap();
        assert_eq!(serde_json::to_value(&request).unwrap()["gen"], 0);
    }

    #[test]
    fn session_errors_propagate_to_the_driver() {
        let file = parse("* t\n>look\n");
        // No turns scripted: the very first accept_output fails
        let mut session = ScriptSession::new(vec![]);
        let mut errors = 0;
        let options = RunnerOptions::default();
        let err = drive_session(&file, &options, &mut errors, &file.tests[0], &mut session)
            .unwrap_err();
        assert!(matches!(err, HarnessError::EndOfStream));
    }
}
