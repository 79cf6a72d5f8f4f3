/*

The check engine
================

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::common::ParseError;
use super::windows::Projection;

/** Which flattened window view a check runs against */
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CheckTarget {
    Graphics,
    Status,
    #[default]
    Story,
}

/** The slice of a projection a predicate sees: plain-text lines plus the
 * raw span objects behind them. The graphics view has no text form, so its
 * line list is always empty and its spans are the draw operations.
*/
pub struct TargetView<'a> {
    pub lines: &'a [String],
    pub spans: &'a [Value],
}

impl Projection {
    pub fn target(&self, target: CheckTarget) -> TargetView<'_> {
        match target {
            CheckTarget::Graphics => TargetView {
                lines: &[],
                spans: &self.graphics,
            },
            CheckTarget::Status => TargetView {
                lines: &self.status,
                spans: &self.status_spans,
            },
            CheckTarget::Story => TargetView {
                lines: &self.story,
                spans: &self.story_spans,
            },
        }
    }
}

/** A check predicate. `None` is success; a failure returns its message. */
pub trait Predicate {
    fn eval(&self, view: &TargetView) -> Option<String>;
}

/** A check builder. `build` returns `Ok(None)` when the line is not in
 * this class's format; the registry then offers the line to the next class.
*/
pub trait CheckClass {
    fn build(&self, text: &str, line_no: usize) -> Result<Option<Box<dyn Predicate>>, ParseError>;
}

/** One parsed check: a predicate plus its modifiers and source position */
pub struct Check {
    pub line_no: usize,
    pub source: String,
    pub inverse: bool,
    pub vital: bool,
    pub target: CheckTarget,
    predicate: Box<dyn Predicate>,
}

impl Check {
    /** Evaluate against a projection. An inverse check passes exactly when
     * the positive form fails.
    */
    pub fn eval(&self, projection: &Projection) -> Option<String> {
        let view = projection.target(self.target);
        let result = self.predicate.eval(&view);
        if self.inverse {
            match result {
                Some(_) => None,
                None => Some("inverse test should fail".to_string()),
            }
        } else {
            result
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}: {}", self.line_no, self.source)
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Check")
            .field("line_no", &self.line_no)
            .field("source", &self.source)
            .field("inverse", &self.inverse)
            .field("vital", &self.vital)
            .field("target", &self.target)
            .finish()
    }
}

/** The ordered list of check classes. Built-ins are tried in a fixed
 * order, with Literal as the catch-all; registered extension classes take
 * precedence over all of them.
*/
pub struct CheckRegistry {
    classes: Vec<Box<dyn CheckClass>>,
}

impl Default for CheckRegistry {
    fn default() -> Self {
        CheckRegistry {
            classes: vec![
                Box::new(RegExpClass),
                Box::new(LiteralCountClass),
                Box::new(HyperlinkSpanClass),
                Box::new(ImageSpanClass),
                Box::new(JsonSpanClass),
                Box::new(LiteralClass),
            ],
        }
    }
}

fn modifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Bareword modifiers only; the check classes own richer {...} prefixes
    RE.get_or_init(|| Regex::new(r"^\{[a-z]+\}").unwrap())
}

impl CheckRegistry {
    /** Prepend an extension class */
    pub fn register(&mut self, class: Box<dyn CheckClass>) {
        self.classes.insert(0, class);
    }

    /** Parse one check line: strip modifier prefixes, then offer the rest
     * to each class in order.
    */
    pub fn parse(&self, line: &str, line_no: usize) -> Result<Check, ParseError> {
        let source = line.trim().to_string();
        let mut rest = line.trim();
        let mut inverse = false;
        let mut vital = false;
        let mut target = CheckTarget::Story;
        loop {
            if let Some(stripped) = rest.strip_prefix('!') {
                inverse = true;
                rest = stripped.trim_start();
                continue;
            }
            let Some(found) = modifier_re().find(rest) else {
                break;
            };
            match found.as_str() {
                "{invert}" => inverse = true,
                "{status}" => target = CheckTarget::Status,
                "{graphic}" | "{graphics}" => target = CheckTarget::Graphics,
                "{vital}" => vital = true,
                modifier => {
                    return Err(ParseError::UnknownModifier {
                        line: line_no,
                        modifier: modifier.to_string(),
                    })
                }
            }
            rest = rest[found.end()..].trim_start();
        }
        for class in &self.classes {
            if let Some(predicate) = class.build(rest, line_no)? {
                return Ok(Check {
                    line_no,
                    source,
                    inverse,
                    vital,
                    target,
                    predicate,
                });
            }
        }
        // Literal never declines, so this only fires on an empty registry
        Err(ParseError::BadCheck {
            line: line_no,
            detail: "no check class matched".to_string(),
        })
    }
}

// Built-in check classes

struct LiteralClass;

impl CheckClass for LiteralClass {
    fn build(&self, text: &str, _line_no: usize) -> Result<Option<Box<dyn Predicate>>, ParseError> {
        Ok(Some(Box::new(LiteralCheck {
            needle: text.to_string(),
        })))
    }
}

struct LiteralCheck {
    needle: String,
}

impl Predicate for LiteralCheck {
    fn eval(&self, view: &TargetView) -> Option<String> {
        if view.lines.iter().any(|line| line.contains(&self.needle)) {
            None
        } else {
            Some("not found".to_string())
        }
    }
}

struct RegExpClass;

impl CheckClass for RegExpClass {
    fn build(&self, text: &str, line_no: usize) -> Result<Option<Box<dyn Predicate>>, ParseError> {
        let Some(pattern) = text.strip_prefix('/') else {
            return Ok(None);
        };
        let re = Regex::new(pattern.trim()).map_err(|source| ParseError::BadRegExp {
            line: line_no,
            source,
        })?;
        Ok(Some(Box::new(RegExpCheck { re })))
    }
}

struct RegExpCheck {
    re: Regex,
}

impl Predicate for RegExpCheck {
    fn eval(&self, view: &TargetView) -> Option<String> {
        if view.lines.iter().any(|line| self.re.is_match(line)) {
            None
        } else {
            Some("not found".to_string())
        }
    }
}

struct LiteralCountClass;

impl CheckClass for LiteralCountClass {
    fn build(&self, text: &str, line_no: usize) -> Result<Option<Box<dyn Predicate>>, ParseError> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^\{count=(\d+)\}\s*(.*)$").unwrap());
        let Some(caps) = re.captures(text) else {
            return Ok(None);
        };
        let wanted = caps[1].parse().map_err(|_| ParseError::BadCheck {
            line: line_no,
            detail: "bad count".to_string(),
        })?;
        let needle = caps[2].to_string();
        if needle.is_empty() {
            return Err(ParseError::BadCheck {
                line: line_no,
                detail: "count check requires text".to_string(),
            });
        }
        Ok(Some(Box::new(LiteralCountCheck { needle, wanted })))
    }
}

struct LiteralCountCheck {
    needle: String,
    wanted: usize,
}

impl Predicate for LiteralCountCheck {
    fn eval(&self, view: &TargetView) -> Option<String> {
        let mut found = 0;
        for line in view.lines {
            let mut start = 0;
            while let Some(pos) = line[start..].find(&self.needle) {
                found += 1;
                let hit = start + pos;
                // Advance one character, not the needle length: overlapping
                // occurrences count
                start = hit
                    + line[hit..]
                        .chars()
                        .next()
                        .map_or(1, char::len_utf8);
            }
        }
        if found >= self.wanted {
            None
        } else {
            Some(format!("only found {found} times"))
        }
    }
}

struct HyperlinkSpanClass;

impl CheckClass for HyperlinkSpanClass {
    fn build(&self, text: &str, line_no: usize) -> Result<Option<Box<dyn Predicate>>, ParseError> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^\{hyperlink=(\d+)\}\s*(.*)$").unwrap());
        let Some(caps) = re.captures(text) else {
            return Ok(None);
        };
        let link = caps[1].parse().map_err(|_| ParseError::BadCheck {
            line: line_no,
            detail: "bad hyperlink value".to_string(),
        })?;
        Ok(Some(Box::new(HyperlinkSpanCheck {
            link,
            needle: caps[2].to_string(),
        })))
    }
}

struct HyperlinkSpanCheck {
    link: u64,
    needle: String,
}

impl Predicate for HyperlinkSpanCheck {
    fn eval(&self, view: &TargetView) -> Option<String> {
        let found = view.spans.iter().any(|span| {
            span.get("hyperlink").and_then(Value::as_u64) == Some(self.link)
                && span
                    .get("text")
                    .and_then(Value::as_str)
                    .is_some_and(|text| text.contains(&self.needle))
        });
        if found {
            None
        } else {
            Some("not found".to_string())
        }
    }
}

struct ImageSpanClass;

impl CheckClass for ImageSpanClass {
    fn build(&self, text: &str, line_no: usize) -> Result<Option<Box<dyn Predicate>>, ParseError> {
        if !text.starts_with("{image=") {
            return Ok(None);
        }
        let Some(body) = text
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
        else {
            return Err(ParseError::BadCheck {
                line: line_no,
                detail: "unterminated image check".to_string(),
            });
        };
        let mut constraints = Vec::new();
        for pair in body.split_whitespace() {
            let Some((key, val)) = pair.split_once('=') else {
                return Err(ParseError::BadCheck {
                    line: line_no,
                    detail: format!("bad image constraint: {pair}"),
                });
            };
            let value = match key {
                "image" | "width" | "height" | "x" | "y" => {
                    Value::from(val.parse::<u64>().map_err(|_| ParseError::BadCheck {
                        line: line_no,
                        detail: format!("bad image constraint: {pair}"),
                    })?)
                }
                "alignment" => Value::from(val),
                _ => {
                    return Err(ParseError::BadCheck {
                        line: line_no,
                        detail: format!("unknown image constraint: {key}"),
                    })
                }
            };
            constraints.push((key.to_string(), value));
        }
        Ok(Some(Box::new(ImageSpanCheck { constraints })))
    }
}

/** Matches both buffer image specials and graphics-window image draw
 * operations: both carry `special:"image"`.
*/
struct ImageSpanCheck {
    constraints: Vec<(String, Value)>,
}

impl Predicate for ImageSpanCheck {
    fn eval(&self, view: &TargetView) -> Option<String> {
        let found = view.spans.iter().any(|span| {
            span.get("special").and_then(Value::as_str) == Some("image")
                && self
                    .constraints
                    .iter()
                    .all(|(key, value)| span.get(key) == Some(value))
        });
        if found {
            None
        } else {
            Some("not found".to_string())
        }
    }
}

struct JsonSpanClass;

impl CheckClass for JsonSpanClass {
    fn build(&self, text: &str, line_no: usize) -> Result<Option<Box<dyn Predicate>>, ParseError> {
        if !text.starts_with("{json ") {
            return Ok(None);
        }
        let Some(body) = text
            .strip_prefix("{json")
            .and_then(|rest| rest.strip_suffix('}'))
        else {
            return Err(ParseError::BadCheck {
                line: line_no,
                detail: "unterminated json check".to_string(),
            });
        };
        let pairs = parse_kv_pairs(body, line_no)?;
        Ok(Some(Box::new(JsonSpanCheck { pairs })))
    }
}

struct JsonSpanCheck {
    pairs: Vec<(String, Value)>,
}

impl Predicate for JsonSpanCheck {
    fn eval(&self, view: &TargetView) -> Option<String> {
        let found = view.spans.iter().any(|span| {
            self.pairs
                .iter()
                .all(|(key, value)| span.get(key) == Some(value))
        });
        if found {
            None
        } else {
            Some("not found".to_string())
        }
    }
}

/** Parse `key=value` pairs. Values may be single- or double-quoted strings
 * (with backslash escapes), numeric literals, `true`/`false`/`null`, or
 * barewords, which are taken as string values.
*/
fn parse_kv_pairs(body: &str, line_no: usize) -> Result<Vec<(String, Value)>, ParseError> {
    let bad = |detail: String| ParseError::BadCheck {
        line: line_no,
        detail,
    };
    let bytes = body.as_bytes();
    let mut pairs = Vec::new();
    let mut ix = 0;
    loop {
        while ix < bytes.len() && bytes[ix].is_ascii_whitespace() {
            ix += 1;
        }
        if ix >= bytes.len() {
            break;
        }
        let key_start = ix;
        while ix < bytes.len() && (bytes[ix].is_ascii_alphanumeric() || bytes[ix] == b'_') {
            ix += 1;
        }
        if ix == key_start {
            return Err(bad(format!("expected a key at \"{}\"", &body[ix..])));
        }
        let key = body[key_start..ix].to_string();
        if ix >= bytes.len() || bytes[ix] != b'=' {
            return Err(bad(format!("expected = after {key}")));
        }
        ix += 1;
        if ix >= bytes.len() {
            return Err(bad(format!("expected a value for {key}")));
        }
        let value = match bytes[ix] {
            quote @ (b'"' | b'\'') => {
                ix += 1;
                let mut text = String::new();
                loop {
                    if ix >= bytes.len() {
                        return Err(bad(format!("unterminated string for {key}")));
                    }
                    match bytes[ix] {
                        b'\\' if ix + 1 < bytes.len() => {
                            let ch = body[ix + 1..].chars().next().unwrap_or('\u{fffd}');
                            text.push(ch);
                            ix += 1 + ch.len_utf8();
                        }
                        b if b == quote => {
                            ix += 1;
                            break;
                        }
                        _ => {
                            // Track full characters, not bytes
                            let ch = body[ix..].chars().next().unwrap_or('\u{fffd}');
                            text.push(ch);
                            ix += ch.len_utf8();
                        }
                    }
                }
                Value::from(text)
            }
            _ => {
                let word_start = ix;
                while ix < bytes.len() && !bytes[ix].is_ascii_whitespace() {
                    ix += 1;
                }
                let word = &body[word_start..ix];
                match word {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => {
                        if let Ok(number) = word.parse::<i64>() {
                            Value::from(number)
                        } else if let Ok(number) = word.parse::<f64>() {
                            Value::from(number)
                        } else {
                            Value::from(word)
                        }
                    }
                }
            }
        };
        pairs.push((key, value));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn story(lines: &[&str]) -> Projection {
        Projection {
            story: lines.iter().map(|line| line.to_string()).collect(),
            ..Default::default()
        }
    }

    fn parse(line: &str) -> Check {
        CheckRegistry::default().parse(line, 1).unwrap()
    }

    #[test]
    fn literal_is_the_catch_all() {
        let check = parse("Welcome to Zork");
        assert_eq!(check.eval(&story(&["Welcome to Zork."])), None);
        assert_eq!(
            check.eval(&story(&["You are in a maze."])),
            Some("not found".to_string())
        );
    }

    #[test]
    fn modifiers_strip_in_any_order() {
        let check = parse("!{status} {vital} Score");
        assert!(check.inverse);
        assert!(check.vital);
        assert_eq!(check.target, CheckTarget::Status);

        let check = parse("{invert}West");
        assert!(check.inverse);
        assert_eq!(check.target, CheckTarget::Story);

        let check = parse("{graphic} {image=3}");
        assert_eq!(check.target, CheckTarget::Graphics);
    }

    #[test]
    fn unknown_modifier_is_an_error() {
        let err = CheckRegistry::default().parse("{bogus} text", 9).unwrap_err();
        assert!(matches!(err, ParseError::UnknownModifier { line: 9, .. }));
    }

    #[test]
    fn inverse_passes_exactly_when_positive_fails() {
        let projection = story(&["West of House", "Score: 0"]);
        for line in ["West of House", "East of House", "/Sc.re", "/missing", "{count=1} House"] {
            let positive = parse(line);
            let inverse = parse(&format!("!{line}"));
            assert_eq!(
                positive.eval(&projection).is_none(),
                inverse.eval(&projection).is_some(),
                "duality violated for {line}"
            );
        }
    }

    #[test]
    fn regexp_consumes_slash_lines() {
        let check = parse("/Sc+ore:\\s+\\d+");
        assert_eq!(check.eval(&story(&["Score: 10"])), None);
        // Unanchored: a mid-line match counts
        let check = parse("/foo");
        assert_eq!(check.eval(&story(&["xfooy"])), None);
    }

    #[test]
    fn count_is_overlapping() {
        let projection = story(&["aaa"]);
        assert_eq!(parse("{count=2} aa").eval(&projection), None);
        assert_eq!(
            parse("{count=3} aa").eval(&projection),
            Some("only found 2 times".to_string())
        );

        let projection = story(&["leaf leaf leaf"]);
        assert_eq!(parse("{count=3} leaf").eval(&projection), None);
        assert_eq!(
            parse("{count=4} leaf").eval(&projection),
            Some("only found 3 times".to_string())
        );
    }

    #[test]
    fn count_sums_across_lines() {
        let projection = story(&["leaf", "leaf pile"]);
        assert_eq!(parse("{count=2} leaf").eval(&projection), None);
    }

    #[test]
    fn hyperlink_span_matches_link_and_text() {
        let projection = Projection {
            story_spans: vec![
                json!({"style": "normal", "text": "plain"}),
                json!({"style": "normal", "text": "click me", "hyperlink": 5}),
            ],
            ..Default::default()
        };
        assert_eq!(parse("{hyperlink=5} click").eval(&projection), None);
        assert!(parse("{hyperlink=5} other").eval(&projection).is_some());
        assert!(parse("{hyperlink=6} click").eval(&projection).is_some());
    }

    #[test]
    fn image_span_matches_all_given_constraints() {
        let projection = Projection {
            story_spans: vec![json!({"special": "image", "image": 17, "width": 64, "height": 64})],
            ..Default::default()
        };
        assert_eq!(parse("{image=17 width=64}").eval(&projection), None);
        assert!(parse("{image=17 width=65}").eval(&projection).is_some());
        assert!(parse("{image=18}").eval(&projection).is_some());
    }

    #[test]
    fn image_span_sees_graphics_draws() {
        let projection = Projection {
            graphics: vec![json!({"special": "image", "image": 3, "x": 10, "y": 20,
                                  "width": 32, "height": 32})],
            ..Default::default()
        };
        let check = parse("{graphic} {image=3 x=10 y=20}");
        assert_eq!(check.eval(&projection), None);
    }

    #[test]
    fn text_checks_never_match_graphics() {
        let projection = Projection {
            graphics: vec![json!({"special": "image", "image": 3})],
            ..Default::default()
        };
        assert!(parse("{graphic} anything").eval(&projection).is_some());
        assert_eq!(parse("!{graphic} anything").eval(&projection), None);
    }

    #[test]
    fn json_span_value_grammar() {
        let projection = Projection {
            story_spans: vec![json!({"style": "header", "text": "A B", "hyperlink": 7})],
            ..Default::default()
        };
        assert_eq!(parse("{json style=\"header\" text='A B'}").eval(&projection), None);
        assert_eq!(parse("{json hyperlink=7}").eval(&projection), None);
        assert_eq!(parse("{json style=header}").eval(&projection), None);
        assert!(parse("{json style=footer}").eval(&projection).is_some());

        let projection = Projection {
            story_spans: vec![json!({"live": true, "tag": null})],
            ..Default::default()
        };
        assert_eq!(parse("{json live=true tag=null}").eval(&projection), None);
    }

    #[test]
    fn bad_pairs_are_parse_errors() {
        let registry = CheckRegistry::default();
        assert!(registry.parse("{json style=}", 1).is_err());
        assert!(registry.parse("{json style='unterminated}", 1).is_err());
        assert!(registry.parse("{image=17 bogus=1}", 1).is_err());
        assert!(registry.parse("{count=} leaf", 1).is_ok_and(|check| {
            // No digits: the count class declines and Literal takes it
            check.eval(&story(&["{count=} leaf"])).is_none()
        }));
    }

    struct EagerClass;
    struct EagerCheck;

    impl CheckClass for EagerClass {
        fn build(
            &self,
            _text: &str,
            _line_no: usize,
        ) -> Result<Option<Box<dyn Predicate>>, ParseError> {
            Ok(Some(Box::new(EagerCheck)))
        }
    }

    impl Predicate for EagerCheck {
        fn eval(&self, _view: &TargetView) -> Option<String> {
            None
        }
    }

    #[test]
    fn extensions_take_precedence_over_built_ins() {
        let mut registry = CheckRegistry::default();
        registry.register(Box::new(EagerClass));
        // The extension swallows even a line Literal would otherwise claim,
        // and passes against an empty projection where Literal would fail
        let check = registry.parse("no such text", 1).unwrap();
        assert_eq!(check.eval(&Projection::default()), None);
    }
}
