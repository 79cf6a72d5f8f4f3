/*

Test files
==========

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

use std::collections::HashSet;
use std::fmt;

use super::checks::{Check, CheckRegistry};
use super::common::ParseError;

/** Special key names accepted by `{char}` commands, as Glk spells them */
pub const GLK_KEY_NAMES: [&str; 24] = [
    "left", "right", "up", "down", "return", "delete", "escape", "tab", "pageup", "pagedown",
    "home", "end", "func1", "func2", "func3", "func4", "func5", "func6", "func7", "func8", "func9",
    "func10", "func11", "func12",
];

/** One input action of a test */
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /** Window resize; a missing height keeps the current one */
    Arrange { width: f64, height: Option<f64> },
    /** A single keypress: a literal character or a special key name,
     * already in the form the wire wants */
    Char { key: String },
    Debug { text: String },
    FilerefPrompt { text: String },
    Hyperlink { value: u32 },
    /** Textual inclusion of another test's commands */
    Include { name: String },
    Line { text: String },
    Mouse { x: u32, y: u32 },
    Refresh,
    Timer,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Arrange {
                width,
                height: Some(height),
            } => write!(f, "{{arrange}} {width} {height}"),
            Command::Arrange {
                width,
                height: None,
            } => write!(f, "{{arrange}} {width}"),
            Command::Char { key } => write!(f, "{{char}} {key}"),
            Command::Debug { text } => write!(f, "{{debug}} {text}"),
            Command::FilerefPrompt { text } => write!(f, "{{fileref_prompt}} {text}"),
            Command::Hyperlink { value } => write!(f, "{{hyperlink}} {value}"),
            Command::Include { name } => write!(f, "{{include}} {name}"),
            Command::Line { text } => write!(f, "{text}"),
            Command::Mouse { x, y } => write!(f, "{{mouse}} {x} {y}"),
            Command::Refresh => write!(f, "{{refresh}}"),
            Command::Timer => write!(f, "{{timer}}"),
        }
    }
}

/** A command plus the checks to run against the state it produces */
#[derive(Debug)]
pub struct TestCommand {
    pub cmd: Command,
    pub checks: Vec<Check>,
}

/** An interpreter invocation: path plus arguments */
#[derive(Clone, Debug, PartialEq)]
pub struct Interpreter {
    pub path: String,
    pub args: Vec<String>,
}

/** One test: a session of the game from the beginning */
#[derive(Debug)]
pub struct RegTest {
    pub name: String,
    /** Overrides the file-level (and command-line) game file */
    pub gamefile: Option<String>,
    /** Overrides the file-level (and command-line) interpreter */
    pub interpreter: Option<Interpreter>,
    /** Checks against the initial state, before any input */
    pub pre_checks: Vec<Check>,
    pub cmds: Vec<TestCommand>,
}

/** A parsed test file */
#[derive(Debug, Default)]
pub struct TestFile {
    pub gamefile: Option<String>,
    pub interpreter: Option<Interpreter>,
    pub remformat: bool,
    /** Extension check classes the file asks for */
    pub checkclasses: Vec<String>,
    /** Commands run before each test's own */
    pub precommands: Vec<TestCommand>,
    pub tests: Vec<RegTest>,
}

impl TestFile {
    pub fn test(&self, name: &str) -> Option<&RegTest> {
        self.tests.iter().find(|test| test.name == name)
    }
}

/** Parse a test file.
 *
 * Line oriented: `#` comments, `** key: value` options, `* name` test
 * headers, `> command` inputs; anything else is a check attached to the
 * most recent command (or to the test's initial state when no command has
 * been seen yet). The registry parses the checks, so registered extension
 * classes participate.
*/
pub fn parse_str(src: &str, registry: &CheckRegistry) -> Result<TestFile, ParseError> {
    let mut file = TestFile::default();
    let mut names: HashSet<String> = HashSet::new();
    let mut curtest: Option<usize> = None;

    for (ix, raw) in src.lines().enumerate() {
        let line_no = ix + 1;
        let ln = raw.trim();
        if ln.is_empty() || ln.starts_with('#') {
            continue;
        }

        if let Some(rest) = ln.strip_prefix("**") {
            let rest = rest.trim();
            // A ** line without a colon is ignored, as it always has been
            let Some(pos) = rest.find(':') else {
                continue;
            };
            let key = rest[..pos].trim();
            let val = rest[pos + 1..].trim();
            match curtest {
                None => match key {
                    "pre" | "precommand" => file.precommands.push(TestCommand {
                        cmd: parse_command(val, line_no)?,
                        checks: Vec::new(),
                    }),
                    "game" => file.gamefile = Some(val.to_string()),
                    "interpreter" => file.interpreter = Some(parse_interpreter(val, line_no)?),
                    "remformat" => file.remformat = parse_flag(val),
                    "checkclass" => file.checkclasses.push(val.to_string()),
                    _ => {
                        return Err(ParseError::UnknownOption {
                            line: line_no,
                            key: key.to_string(),
                        })
                    }
                },
                Some(tix) => match key {
                    "game" => file.tests[tix].gamefile = Some(val.to_string()),
                    "interpreter" => {
                        file.tests[tix].interpreter = Some(parse_interpreter(val, line_no)?)
                    }
                    _ => {
                        return Err(ParseError::UnknownOption {
                            line: line_no,
                            key: key.to_string(),
                        })
                    }
                },
            }
            continue;
        }

        if let Some(rest) = ln.strip_prefix('*') {
            let name = rest.trim().to_string();
            if !names.insert(name.clone()) {
                return Err(ParseError::DuplicateTest {
                    line: line_no,
                    name,
                });
            }
            file.tests.push(RegTest {
                name,
                gamefile: None,
                interpreter: None,
                pre_checks: Vec::new(),
                cmds: Vec::new(),
            });
            curtest = Some(file.tests.len() - 1);
            continue;
        }

        if let Some(rest) = ln.strip_prefix('>') {
            let Some(tix) = curtest else {
                return Err(ParseError::CommandOutsideTest { line: line_no });
            };
            file.tests[tix].cmds.push(TestCommand {
                cmd: parse_command(rest.trim(), line_no)?,
                checks: Vec::new(),
            });
            continue;
        }

        let check = registry.parse(ln, line_no)?;
        let Some(tix) = curtest else {
            return Err(ParseError::CheckOutsideTest { line: line_no });
        };
        let test = &mut file.tests[tix];
        match test.cmds.last_mut() {
            Some(cmd) => cmd.checks.push(check),
            None => test.pre_checks.push(check),
        }
    }

    Ok(file)
}

/** Parse one command, with its optional `{type}` prefix (default `line`) */
pub fn parse_command(text: &str, line_no: usize) -> Result<Command, ParseError> {
    let (kind, rest) = match text.strip_prefix('{') {
        Some(after) => match after.find('}') {
            Some(pos) => (&after[..pos], after[pos + 1..].trim_start()),
            None => {
                return Err(ParseError::BadCommand {
                    line: line_no,
                    detail: "unterminated command type".to_string(),
                })
            }
        },
        None => ("line", text),
    };
    match kind {
        "line" => Ok(Command::Line {
            text: rest.to_string(),
        }),
        "char" => Ok(Command::Char {
            key: parse_char_key(rest, line_no)?,
        }),
        "hyperlink" => {
            let value = rest.trim().parse().map_err(|_| ParseError::BadCommand {
                line: line_no,
                detail: format!("bad hyperlink value: {rest}"),
            })?;
            Ok(Command::Hyperlink { value })
        }
        "mouse" => {
            let mut parts = rest.split_whitespace();
            let coords = (
                parts.next().and_then(|part| part.parse().ok()),
                parts.next().and_then(|part| part.parse().ok()),
            );
            match coords {
                (Some(x), Some(y)) => Ok(Command::Mouse { x, y }),
                _ => Err(ParseError::BadCommand {
                    line: line_no,
                    detail: format!("mouse needs two coordinates: {rest}"),
                }),
            }
        }
        "arrange" => {
            let mut parts = rest.split_whitespace();
            let width = parts
                .next()
                .and_then(|part| part.parse().ok())
                .ok_or_else(|| ParseError::BadCommand {
                    line: line_no,
                    detail: format!("arrange needs a width: {rest}"),
                })?;
            let height = parts.next().and_then(|part| part.parse().ok());
            Ok(Command::Arrange { width, height })
        }
        "timer" => Ok(Command::Timer),
        "refresh" => Ok(Command::Refresh),
        "fileref_prompt" => Ok(Command::FilerefPrompt {
            text: rest.to_string(),
        }),
        "debug" => Ok(Command::Debug {
            text: rest.to_string(),
        }),
        "include" => Ok(Command::Include {
            name: rest.to_string(),
        }),
        _ => Err(ParseError::UnknownCommandType {
            line: line_no,
            kind: kind.to_string(),
        }),
    }
}

/** Interpret a `{char}` argument: empty means return; `space`, a literal
 * character, a `0x` hex scalar, a special key name, or a decimal scalar.
*/
fn parse_char_key(text: &str, line_no: usize) -> Result<String, ParseError> {
    let key = if text.is_empty() {
        Some('\n'.to_string())
    } else if text.chars().count() == 1 {
        Some(text.to_string())
    } else if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
    } else if text == "space" {
        Some(" ".to_string())
    } else if GLK_KEY_NAMES.contains(&text) {
        Some(text.to_string())
    } else {
        text.parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
    };
    match key {
        // The wire spells a newline keypress "return"
        Some(key) if key == "\n" => Ok("return".to_string()),
        Some(key) => Ok(key),
        None => Err(ParseError::BadCharKey {
            line: line_no,
            key: text.to_string(),
        }),
    }
}

fn parse_interpreter(val: &str, line_no: usize) -> Result<Interpreter, ParseError> {
    let mut parts = val.split_whitespace().map(str::to_string);
    let Some(path) = parts.next() else {
        return Err(ParseError::BadCommand {
            line: line_no,
            detail: "interpreter needs a path".to_string(),
        });
    };
    Ok(Interpreter {
        path,
        args: parts.collect(),
    })
}

fn parse_flag(val: &str) -> bool {
    matches!(
        val.to_ascii_lowercase().as_str(),
        "yes" | "true" | "on" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> TestFile {
        parse_str(src, &CheckRegistry::default()).unwrap()
    }

    const SAMPLE: &str = "\
# A comment
** game: glulxercise.ulx
** interpreter: glulxer --rngseed 1
** remformat: yes
** pre: look

* first
Welcome
>examine mailbox
Small mailbox.
! battered mailbox

* second
** game: advent.ulx
>{char} space
>{char} 0x41
>{timer}
>{mouse} 3 5
>{hyperlink} 12
>{include} first
";

    #[test]
    fn parses_options_tests_and_commands() {
        let file = parse(SAMPLE);
        assert_eq!(file.gamefile.as_deref(), Some("glulxercise.ulx"));
        assert_eq!(
            file.interpreter,
            Some(Interpreter {
                path: "glulxer".to_string(),
                args: vec!["--rngseed".to_string(), "1".to_string()],
            })
        );
        assert!(file.remformat);
        assert_eq!(file.precommands.len(), 1);
        assert_eq!(
            file.precommands[0].cmd,
            Command::Line {
                text: "look".to_string()
            }
        );

        assert_eq!(file.tests.len(), 2);
        let first = file.test("first").unwrap();
        assert_eq!(first.pre_checks.len(), 1);
        assert_eq!(first.cmds.len(), 1);
        assert_eq!(first.cmds[0].checks.len(), 2);
        assert!(first.cmds[0].checks[1].inverse);

        let second = file.test("second").unwrap();
        assert_eq!(second.gamefile.as_deref(), Some("advent.ulx"));
        let kinds: Vec<&Command> = second.cmds.iter().map(|cmd| &cmd.cmd).collect();
        assert_eq!(
            kinds,
            vec![
                &Command::Char {
                    key: " ".to_string()
                },
                &Command::Char {
                    key: "A".to_string()
                },
                &Command::Timer,
                &Command::Mouse { x: 3, y: 5 },
                &Command::Hyperlink { value: 12 },
                &Command::Include {
                    name: "first".to_string()
                },
            ]
        );
    }

    #[test]
    fn duplicate_test_names_are_rejected() {
        let err = parse_str("* one\n* one\n", &CheckRegistry::default()).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateTest { line: 2, .. }));
    }

    #[test]
    fn unknown_options_and_types_are_rejected() {
        let registry = CheckRegistry::default();
        assert!(matches!(
            parse_str("** bogus: 1\n", &registry).unwrap_err(),
            ParseError::UnknownOption { .. }
        ));
        assert!(matches!(
            parse_str("* t\n** pre: look\n", &registry).unwrap_err(),
            ParseError::UnknownOption { .. }
        ));
        assert!(matches!(
            parse_str("* t\n>{warp} home\n", &registry).unwrap_err(),
            ParseError::UnknownCommandType { .. }
        ));
        assert!(matches!(
            parse_str("orphan check\n", &registry).unwrap_err(),
            ParseError::CheckOutsideTest { line: 1 }
        ));
    }

    #[test]
    fn char_key_forms() {
        let key = |text: &str| parse_char_key(text, 1).unwrap();
        assert_eq!(key(""), "return");
        assert_eq!(key("x"), "x");
        assert_eq!(key("space"), " ");
        assert_eq!(key("left"), "left");
        assert_eq!(key("func12"), "func12");
        assert_eq!(key("0x41"), "A");
        assert_eq!(key("65"), "A");
        assert_eq!(key("10"), "return");
        assert!(parse_char_key("bogus", 1).is_err());
    }
}
