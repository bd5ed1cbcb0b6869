//! Streaming reader for USPTO assignment bulk XML.
//!
//! Each `<patent-assignment>` element is folded into a `serde_json::Value`
//! tree: text-only elements become strings, repeated tags become arrays,
//! attributes are stored under `@name` and mixed text under `#text`.
//! Only one assignment is held in memory at a time.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const RECORD_TAG: &[u8] = b"patent-assignment";
const READ_BUFFER: usize = 2 * 1024 * 1024;

/// Opens a bulk file, transparently decompressing `*.gz`.
pub fn open_xml(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    if is_gzip {
        Ok(Box::new(BufReader::with_capacity(
            READ_BUFFER,
            GzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER, file)))
    }
}

/// Text content of a leaf node, whether it was parsed as a plain string or
/// as an element carrying attributes.
pub fn text_of(node: &Value) -> Option<&str> {
    match node {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("#text").and_then(Value::as_str),
        _ => None,
    }
}

/// A node that may hold one child or a list of them, viewed as a list.
pub fn as_list(node: Option<&Value>) -> Vec<&Value> {
    match node {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

struct Frame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart) -> Result<Self> {
        let mut children = Map::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr.unescape_value()?.into_owned();
            children.insert(key, Value::String(value));
        }

        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            children,
            text: String::new(),
        })
    }

    fn insert(&mut self, name: String, value: Value) {
        match self.children.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.children.insert(name, value);
            }
        }
    }

    fn close(mut self) -> (String, Value) {
        let value = if self.children.is_empty() {
            if self.text.is_empty() {
                Value::Null
            } else {
                Value::String(self.text)
            }
        } else {
            if !self.text.is_empty() {
                self.children
                    .insert("#text".to_string(), Value::String(self.text));
            }
            Value::Object(self.children)
        };
        (self.name, value)
    }
}

pub struct AssignmentReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> AssignmentReader<R> {
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            buf: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_event(&mut self) -> Result<Event<'static>> {
        self.buf.clear();
        let position = self.reader.buffer_position();
        let event = self
            .reader
            .read_event_into(&mut self.buf)
            .with_context(|| format!("malformed XML near byte {}", position))?;
        Ok(event.into_owned())
    }

    /// Next `<patent-assignment>` tree, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<Value>> {
        loop {
            match self.next_event()? {
                Event::Start(start) if start.name().as_ref() == RECORD_TAG => {
                    return self.read_element(&start).map(Some);
                }
                Event::Empty(start) if start.name().as_ref() == RECORD_TAG => {
                    return Ok(Some(Frame::open(&start)?.close().1));
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    fn read_element(&mut self, start: &BytesStart) -> Result<Value> {
        let mut stack = vec![Frame::open(start)?];

        loop {
            match self.next_event()? {
                Event::Start(e) => stack.push(Frame::open(&e)?),
                Event::Empty(e) => {
                    let (name, value) = Frame::open(&e)?.close();
                    if let Some(parent) = stack.last_mut() {
                        parent.insert(name, value);
                    }
                }
                Event::Text(e) => {
                    let text = e.unescape()?;
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(&text);
                    }
                }
                Event::CData(e) => {
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::End(_) => {
                    let Some(frame) = stack.pop() else {
                        bail!("unbalanced closing tag");
                    };
                    let (name, value) = frame.close();
                    match stack.last_mut() {
                        Some(parent) => parent.insert(name, value),
                        None => return Ok(value),
                    }
                }
                Event::Eof => bail!(
                    "unexpected end of file inside <patent-assignment> near byte {}",
                    self.reader.buffer_position()
                ),
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for AssignmentReader<R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
