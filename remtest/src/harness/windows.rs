/*

Display-state reconstruction
============================

Copyright (c) 2026 RemTest contributors
MIT licenced
https://github.com/remtest/remtest-rs

*/

use std::collections::{BTreeMap, HashMap};

use enum_dispatch::enum_dispatch;
use serde_json::{Map, Value};

use super::common::{HarnessError, HarnessResult};
use super::protocol::{ContentUpdate, InputUpdate, TextInputKind, Update, WindowKind, WindowUpdate};

/** The reconstructed display: every window the interpreter has open,
 * keyed by id, plus the session-wide input bookkeeping.
 *
 * The four `*_input` fields are a derived single-focus view over the
 * per-window input state. They are recomputed on every update and exist to
 * resolve commands to a window id, and to reject updates in which two
 * windows claim the same exclusive input.
*/
#[derive(Debug, Default)]
pub struct DisplayState {
    /** Generation number of the last update */
    pub generation: u32,
    pub windows: BTreeMap<u32, Window>,
    /** Type of a pending special input request, e.g. "fileref_prompt" */
    pub specialinput: Option<String>,
    pub line_input: Option<u32>,
    pub char_input: Option<u32>,
    pub hyperlink_input: Option<u32>,
    pub mouse_input: Option<u32>,
}

#[derive(Debug)]
pub struct Window {
    pub id: u32,
    pub kind: WindowKind,
    pub rock: u32,
    pub rect: WindowRect,
    pub data: WindowData,
    pub input: InputState,
    in_place: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WindowRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/** Pending input on one window */
#[derive(Clone, Debug, Default)]
pub struct InputState {
    pub text: Option<TextInputKind>,
    /** Generation when the textual input was requested */
    pub gen: u32,
    pub hyperlink: bool,
    pub mouse: bool,
}

#[enum_dispatch]
#[derive(Debug)]
pub enum WindowData {
    Buffer(BufferWindow),
    Graphics(GraphicsWindow),
    Grid(GridWindow),
    Unknown(UnknownWindow),
}

/** Per-kind application of a content delta. Each kind reads only its own
 * fields of the delta; the rest stay untouched.
*/
#[enum_dispatch(WindowData)]
pub trait WindowContent {
    fn apply(&mut self, content: &ContentUpdate) -> HarnessResult<()> {
        let _ = content;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct BufferWindow {
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Default)]
pub struct Paragraph {
    pub spans: Vec<Span>,
    pub flowbreak: bool,
}

impl WindowContent for BufferWindow {
    fn apply(&mut self, content: &ContentUpdate) -> HarnessResult<()> {
        if content.clear {
            self.paragraphs.clear();
        }
        if let Some(text) = &content.text {
            for para in text {
                let spans = decode_spans(para.content.as_ref())?;
                match self.paragraphs.last_mut() {
                    Some(last) if para.append && !spans.is_empty() => last.spans.extend(spans),
                    _ => self.paragraphs.push(Paragraph {
                        spans,
                        flowbreak: para.flowbreak,
                    }),
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct GridWindow {
    pub width: u32,
    pub height: u32,
    pub lines: Vec<Vec<Span>>,
}

impl GridWindow {
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        let height = height as usize;
        self.lines.truncate(height);
        while self.lines.len() < height {
            self.lines.push(Vec::new());
        }
    }
}

impl WindowContent for GridWindow {
    fn apply(&mut self, content: &ContentUpdate) -> HarnessResult<()> {
        if let Some(lines) = &content.lines {
            for line in lines {
                let index = line.line as usize;
                // Lines outside the current grid height are dropped
                if index >= self.lines.len() {
                    continue;
                }
                self.lines[index] = decode_spans(line.content.as_ref())?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct GraphicsWindow {
    /** Draw operations, accumulated verbatim */
    pub draws: Vec<Value>,
}

impl WindowContent for GraphicsWindow {
    fn apply(&mut self, content: &ContentUpdate) -> HarnessResult<()> {
        if let Some(draw) = &content.draw {
            self.draws.extend(draw.iter().cloned());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct UnknownWindow {}

impl WindowContent for UnknownWindow {}

impl Window {
    fn new(desc: &WindowUpdate) -> Self {
        let data = match desc.kind {
            WindowKind::Buffer => WindowData::Buffer(BufferWindow::default()),
            WindowKind::Graphics => WindowData::Graphics(GraphicsWindow::default()),
            WindowKind::Grid => WindowData::Grid(GridWindow::default()),
            WindowKind::Unknown => WindowData::Unknown(UnknownWindow::default()),
        };
        Window {
            id: desc.id,
            kind: desc.kind,
            rock: desc.rock,
            rect: WindowRect::default(),
            data,
            input: InputState::default(),
            in_place: true,
        }
    }
}

/** One styled or special segment of a line or paragraph */
#[derive(Clone, Debug, PartialEq)]
pub enum Span {
    Text(TextSpan),
    /** A special span (an image, usually), preserved as its raw object */
    Special(Map<String, Value>),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextSpan {
    pub style: String,
    pub text: String,
    pub hyperlink: Option<u32>,
}

impl Span {
    pub fn text(&self) -> &str {
        match self {
            Span::Text(span) => &span.text,
            Span::Special(_) => "",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Span::Text(span) => {
                let mut obj = Map::new();
                obj.insert("style".to_string(), Value::from(span.style.clone()));
                obj.insert("text".to_string(), Value::from(span.text.clone()));
                if let Some(link) = span.hyperlink {
                    obj.insert("hyperlink".to_string(), Value::from(link));
                }
                Value::Object(obj)
            }
            Span::Special(raw) => Value::Object(raw.clone()),
        }
    }
}

/** Decode a content array into spans.
 *
 * The array is heterogeneous: an element is either a dict with
 * `style`/`text`/`hyperlink`, a dict with `special`, or the legacy form of
 * two consecutive scalars [style, text]. The cursor consumes one element
 * for dicts and two for the legacy pairs.
*/
fn decode_spans(content: Option<&Value>) -> HarnessResult<Vec<Span>> {
    let items = match content {
        None | Some(Value::Null) => return Ok(Vec::new()),
        // A bare string is shorthand for a single unstyled run
        Some(Value::String(text)) => {
            return Ok(vec![Span::Text(TextSpan {
                style: "normal".to_string(),
                text: text.clone(),
                hyperlink: None,
            })])
        }
        Some(Value::Array(items)) => items.as_slice(),
        Some(other) => {
            return Err(HarnessError::Json(<serde_json::Error as serde::de::Error>::custom(
                format!("unexpected span content: {other}"),
            )))
        }
    };
    let mut spans = Vec::new();
    let mut ix = 0;
    while ix < items.len() {
        match &items[ix] {
            Value::Object(obj) => {
                if obj.contains_key("special") {
                    spans.push(Span::Special(obj.clone()));
                } else {
                    spans.push(Span::Text(TextSpan {
                        style: obj
                            .get("style")
                            .and_then(Value::as_str)
                            .unwrap_or("normal")
                            .to_string(),
                        text: obj
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        hyperlink: obj.get("hyperlink").and_then(Value::as_u64).map(|v| v as u32),
                    }));
                }
                ix += 1;
            }
            Value::String(style) => {
                let text = items.get(ix + 1).and_then(Value::as_str).unwrap_or_default();
                spans.push(Span::Text(TextSpan {
                    style: style.clone(),
                    text: text.to_string(),
                    hyperlink: None,
                }));
                ix += 2;
            }
            _ => {
                ix += 1;
            }
        }
    }
    Ok(spans)
}

impl DisplayState {
    pub fn new() -> Self {
        Default::default()
    }

    /** Fold one update into the display state.
     *
     * The steps happen in a fixed order: generation, input cancellation,
     * window set, content deltas, input set, special input. Content for an
     * unknown window, or for a window still awaiting line input, and any
     * update in which two windows claim the same exclusive text input, are
     * protocol violations.
    */
    pub fn accept(&mut self, update: &Update) -> HarnessResult<()> {
        self.generation = update.gen;

        // Cancel pending inputs the new update no longer requests, or
        // requests under a newer generation
        let incoming: HashMap<u32, &InputUpdate> = update
            .input
            .iter()
            .flatten()
            .map(|desc| (desc.id, desc))
            .collect();
        for win in self.windows.values_mut() {
            if win.input.text.is_some() {
                let keep = incoming
                    .get(&win.id)
                    .is_some_and(|desc| desc.gen.unwrap_or(0) <= win.input.gen);
                if !keep {
                    win.input = InputState::default();
                }
            }
        }

        if let Some(windows) = &update.windows {
            for win in self.windows.values_mut() {
                win.in_place = false;
            }
            for desc in windows {
                let win = self
                    .windows
                    .entry(desc.id)
                    .or_insert_with(|| Window::new(desc));
                win.in_place = true;
                win.rect = WindowRect {
                    left: desc.left,
                    top: desc.top,
                    width: desc.width,
                    height: desc.height,
                };
                if let WindowData::Grid(grid) = &mut win.data {
                    grid.resize(desc.gridwidth.unwrap_or(0), desc.gridheight.unwrap_or(0));
                }
            }
            // Windows absent from the list are gone
            self.windows.retain(|_, win| win.in_place);
        }

        if let Some(contents) = &update.content {
            for content in contents {
                let win = self
                    .windows
                    .get_mut(&content.id)
                    .ok_or(HarnessError::NoSuchWindow(content.id))?;
                if win.input.text == Some(TextInputKind::Line) {
                    return Err(HarnessError::PendingLineInput(content.id));
                }
                win.data.apply(content)?;
            }
        }

        if let Some(inputs) = &update.input {
            for desc in inputs {
                let win = self
                    .windows
                    .get_mut(&desc.id)
                    .ok_or(HarnessError::NoSuchWindow(desc.id))?;
                win.input = InputState {
                    text: desc.kind,
                    gen: desc.gen.unwrap_or(0),
                    hyperlink: desc.hyperlink,
                    mouse: desc.mouse,
                };
            }
        }

        if let Some(special) = &update.specialinput {
            self.specialinput = Some(special.kind.clone());
            for win in self.windows.values_mut() {
                win.input = InputState::default();
            }
        } else if update.input.is_some() {
            self.specialinput = None;
        }

        self.refresh_focus()
    }

    /** Recompute the legacy single-focus fields from per-window state */
    fn refresh_focus(&mut self) -> HarnessResult<()> {
        self.line_input = None;
        self.char_input = None;
        self.hyperlink_input = None;
        self.mouse_input = None;
        for win in self.windows.values() {
            match win.input.text {
                Some(TextInputKind::Line) => {
                    if self.line_input.is_some() {
                        return Err(HarnessError::MultipleInputRequests("line"));
                    }
                    self.line_input = Some(win.id);
                }
                Some(TextInputKind::Char) => {
                    if self.char_input.is_some() {
                        return Err(HarnessError::MultipleInputRequests("char"));
                    }
                    self.char_input = Some(win.id);
                }
                None => {}
            }
            if win.input.hyperlink && self.hyperlink_input.is_none() {
                self.hyperlink_input = Some(win.id);
            }
            if win.input.mouse && self.mouse_input.is_none() {
                self.mouse_input = Some(win.id);
            }
        }
        Ok(())
    }

    /** Flatten the display for check consumption: all grids (in id order)
     * into the status view, all buffers into the story view, all graphics
     * draws into the graphics view. Kept simultaneously as plain text and
     * as raw span objects.
    */
    pub fn projection(&self) -> Projection {
        let mut projection = Projection::default();
        for win in self.windows.values() {
            match &win.data {
                WindowData::Grid(grid) => {
                    projection.grid_offsets.push((win.id, projection.status.len()));
                    for line in &grid.lines {
                        projection.status.push(line.iter().map(Span::text).collect());
                        projection.status_spans.extend(line.iter().map(Span::to_value));
                    }
                }
                WindowData::Buffer(buffer) => {
                    for para in &buffer.paragraphs {
                        projection.story.push(para.spans.iter().map(Span::text).collect());
                        projection
                            .story_spans
                            .extend(para.spans.iter().map(Span::to_value));
                    }
                }
                WindowData::Graphics(graphics) => {
                    projection.graphics.extend(graphics.draws.iter().cloned());
                }
                WindowData::Unknown(_) => {}
            }
        }
        projection
    }
}

/** The flattened display state checks evaluate against */
#[derive(Clone, Debug, Default)]
pub struct Projection {
    /** All grid lines, grids in ascending id order */
    pub status: Vec<String>,
    pub status_spans: Vec<Value>,
    /** All buffer paragraphs as plain text */
    pub story: Vec<String>,
    pub story_spans: Vec<Value>,
    /** All graphics draw operations */
    pub graphics: Vec<Value>,
    /** Starting row of each grid within the status view */
    pub grid_offsets: Vec<(u32, usize)>,
}
