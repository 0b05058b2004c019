//! Server-sent events: framing for outgoing streams and an incremental decoder
//! for upstream ones.

use std::mem::take;

use anyhow::{Error, bail};
use hyper::body::Bytes;
use serde::Serialize;

/// Sentinel payload closing an OpenAI-style stream.
pub const DONE: &str = "[DONE]";

pub fn data_frame(data: &str) -> Bytes {
    let mut frame = String::with_capacity(data.len() + 8);
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    Bytes::from(frame)
}

pub fn json_frame<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, Error> {
    Ok(data_frame(&serde_json::to_string(value)?))
}

pub fn done_frame() -> Bytes {
    data_frame(DONE)
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Event {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
}

impl Event {
    fn apply_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => self.id = Some(value.to_string()),
            _ => (),
        }
    }
}

/// Turns arbitrarily split body chunks into complete events.
#[derive(Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    event: Event,
}

impl EventDecoder {
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Vec<Event>, Error> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
        {
            let end = start + offset;
            let next = match self.buffer[end] {
                b'\r' if end + 1 == self.buffer.len() => break,
                b'\r' if self.buffer[end + 1] == b'\n' => end + 2,
                _ => end + 1,
            };
            let Ok(line) = std::str::from_utf8(&self.buffer[start..end]) else {
                bail!("Event stream contains invalid UTF-8");
            };
            if line.is_empty() {
                if self.event != Event::default() {
                    events.push(take(&mut self.event));
                }
            } else {
                self.event.apply_line(line);
            }
            start = next;
        }
        self.buffer.drain(..start);
        Ok(events)
    }
}
