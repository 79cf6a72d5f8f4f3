/*

The GlkOte protocol, from the client side
=========================================

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

/** The protocol has two parts:
 * 1. The harness sends events (input, arrangement, timer ticks) to the interpreter
 * 2. The interpreter sends content updates back
 *
 * One JSON object per message in both directions, newline terminated.
*/

/** Capabilities announced at init */
pub const SUPPORT: [&str; 4] = ["timer", "hyperlinks", "graphics", "graphicswin"];

/** The special-input response type for file reference prompts */
pub const FILEREF_PROMPT: &str = "fileref_prompt";

/** Harness->interpreter events */
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    Arrange {
        gen: u32,
        metrics: Metrics,
    },
    Char {
        gen: u32,
        /** Window ID */
        window: u32,
        /** A literal character, or a special key name */
        value: String,
    },
    DebugInput {
        gen: u32,
        value: String,
    },
    Hyperlink {
        gen: u32,
        /** Window ID */
        window: u32,
        value: u32,
    },
    Init {
        gen: u32,
        metrics: Metrics,
        support: Vec<String>,
    },
    Line {
        gen: u32,
        /** Window ID */
        window: u32,
        value: String,
    },
    Mouse {
        gen: u32,
        /** Window ID */
        window: u32,
        x: u32,
        y: u32,
    },
    Refresh {
        gen: u32,
    },
    SpecialResponse {
        gen: u32,
        response: String,
        value: String,
    },
    Timer {
        gen: u32,
    },
}

impl Request {
    pub fn init(metrics: Metrics) -> Self {
        Request::Init {
            gen: 0,
            metrics,
            support: SUPPORT.iter().map(|cap| cap.to_string()).collect(),
        }
    }
}

/** Screen and font metrics sent at init and on rearrangement */
#[derive(Clone, Debug, Serialize)]
pub struct Metrics {
    pub width: f64,
    pub height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gridcharwidth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gridcharheight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffercharwidth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffercharheight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gridmargin: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffermargin: Option<f64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            width: 800.0,
            height: 480.0,
            gridcharwidth: Some(10.0),
            gridcharheight: Some(12.0),
            buffercharwidth: Some(10.0),
            buffercharheight: Some(12.0),
            gridmargin: None,
            buffermargin: None,
        }
    }
}

/** Interpreter->harness content updates.
 *
 * Every field is optional on the wire; fields this harness does not consume
 * (debug output, page margin colours, autorestore blobs) are ignored by the
 * deserializer rather than modelled.
*/
#[derive(Debug, Default, Deserialize)]
pub struct Update {
    /** Generation number */
    #[serde(default)]
    pub gen: u32,
    /** New windows, or changes to their arrangements */
    pub windows: Option<Vec<WindowUpdate>>,
    /** Per-window content deltas */
    pub content: Option<Vec<ContentUpdate>>,
    /** Windows with active input */
    pub input: Option<Vec<InputUpdate>>,
    /** Special input (a file reference prompt) */
    pub specialinput: Option<SpecialInput>,
    /** Timer request state; captured but not interpreted */
    pub timer: Option<Value>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Buffer,
    Graphics,
    Grid,
    #[default]
    #[serde(other)]
    Unknown,
}

/** One window descriptor in an update's window list */
#[derive(Debug, Deserialize)]
pub struct WindowUpdate {
    /** Window ID */
    pub id: u32,
    #[serde(rename = "type", default)]
    pub kind: WindowKind,
    /** Rock value */
    #[serde(default)]
    pub rock: u32,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    /** Grid width (chars) */
    pub gridwidth: Option<u32>,
    /** Grid height (chars) */
    pub gridheight: Option<u32>,
}

/** One content delta. The interpreter does not tag these by window kind;
 * the receiver dispatches on the kind of the window the id resolves to,
 * so all kind-specific fields are optional here.
*/
#[derive(Debug, Deserialize)]
pub struct ContentUpdate {
    /** Window ID */
    pub id: u32,
    /** Clear the window before applying text (buffer windows) */
    #[serde(default)]
    pub clear: bool,
    /** Paragraph data (buffer windows) */
    pub text: Option<Vec<ParagraphUpdate>>,
    /** Line data (grid windows) */
    pub lines: Option<Vec<GridLineUpdate>>,
    /** Draw operations (graphics windows), kept opaque */
    pub draw: Option<Vec<Value>>,
}

/** A buffer window paragraph */
#[derive(Debug, Deserialize)]
pub struct ParagraphUpdate {
    /** Extend the previous paragraph instead of starting a new one */
    #[serde(default)]
    pub append: bool,
    /** Paragraph break after floating images */
    #[serde(default)]
    pub flowbreak: bool,
    /** Span data: a heterogeneous array, decoded by cursor */
    pub content: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct GridLineUpdate {
    /** Line index within the grid */
    pub line: u32,
    /** Span data, same shape as paragraph content */
    pub content: Option<Value>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TextInputKind {
    Char,
    Line,
}

/** One window with active input */
#[derive(Debug, Deserialize)]
pub struct InputUpdate {
    /** Window ID */
    pub id: u32,
    /** Textual input type */
    #[serde(rename = "type")]
    pub kind: Option<TextInputKind>,
    /** Generation number when the input was first requested */
    pub gen: Option<u32>,
    /** Hyperlink input requested */
    #[serde(default)]
    pub hyperlink: bool,
    /** Mouse input requested */
    #[serde(default)]
    pub mouse: bool,
}

#[derive(Debug, Deserialize)]
pub struct SpecialInput {
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn init_request_announces_support() {
        let value = serde_json::to_value(Request::init(Metrics::default())).unwrap();
        assert_eq!(value["type"], "init");
        assert_eq!(value["gen"], 0);
        assert_eq!(value["metrics"]["width"], 800.0);
        assert_eq!(value["metrics"]["gridcharheight"], 12.0);
        assert!(value["metrics"].get("gridmargin").is_none());
        assert_eq!(
            value["support"],
            json!(["timer", "hyperlinks", "graphics", "graphicswin"])
        );
    }

    #[test]
    fn input_requests_serialize_flat() {
        let line = Request::Line {
            gen: 1,
            window: 1,
            value: "examine mailbox".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&line).unwrap(),
            json!({"type": "line", "gen": 1, "window": 1, "value": "examine mailbox"})
        );

        let mouse = Request::Mouse {
            gen: 4,
            window: 2,
            x: 10,
            y: 3,
        };
        assert_eq!(
            serde_json::to_value(&mouse).unwrap(),
            json!({"type": "mouse", "gen": 4, "window": 2, "x": 10, "y": 3})
        );

        let special = Request::SpecialResponse {
            gen: 2,
            response: FILEREF_PROMPT.to_string(),
            value: "save1".to_string(),
        };
        let value = serde_json::to_value(&special).unwrap();
        assert_eq!(value["type"], "specialresponse");
        assert_eq!(value["response"], "fileref_prompt");
    }

    #[test]
    fn updates_tolerate_missing_and_unknown_fields() {
        let update: Update = serde_json::from_value(json!({
            "type": "update",
            "gen": 7,
            "windows": [
                {"id": 1, "type": "buffer", "rock": 201, "left": 0, "top": 14,
                 "width": 800, "height": 466},
                {"id": 2, "type": "pair"},
            ],
            "input": [{"id": 1, "type": "line", "gen": 7}],
            "disable": false,
        }))
        .unwrap();
        assert_eq!(update.gen, 7);
        let windows = update.windows.unwrap();
        assert_eq!(windows[0].kind, WindowKind::Buffer);
        assert_eq!(windows[0].rock, 201);
        assert_eq!(windows[1].kind, WindowKind::Unknown);
        let inputs = update.input.unwrap();
        assert_eq!(inputs[0].kind, Some(TextInputKind::Line));
        assert!(!inputs[0].hyperlink);

        let bare: Update = serde_json::from_value(json!({})).unwrap();
        assert_eq!(bare.gen, 0);
        assert!(bare.windows.is_none());
    }
}
