//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks; the decoder buffers partial lines and
//! yields a record for every blank-line-terminated block that carried data.
//! `id:` persists across records as the resume token, `retry:` updates the
//! reconnect hint, lines starting with `:` are comments (keep-alives).

use std::time::Duration;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseRecord {
    /// Last event id seen on the stream when this record was dispatched.
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    last_id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseRecord> {
        self.pending.extend_from_slice(chunk);
        let mut records = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(record) = self.process_line(&line) {
                records.push(record);
            }
        }
        records
    }

    /// The id of the last record seen, used as `Last-Event-ID` on reconnect.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// The most recent `retry:` hint.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    fn process_line(&mut self, line: &str) -> Option<SseRecord> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseRecord> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseRecord {
            id: self.last_id.clone(),
            event,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_split_across_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"id: 17\nda").is_empty());
        assert!(dec.push(b"ta: {\"str\":\"a\"}\r").is_empty());
        let out = dec.push(b"\n\n");
        assert_eq!(
            out,
            vec![SseRecord {
                id: Some("17".into()),
                event: None,
                data: "{\"str\":\"a\"}".into(),
            }]
        );
        assert_eq!(dec.last_event_id(), Some("17"));
    }

    #[test]
    fn comments_and_empty_blocks_yield_nothing() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b": keep-alive\n\n\n").is_empty());
    }

    #[test]
    fn multiline_data_and_retry() {
        let mut dec = SseDecoder::new();
        let out = dec.push(b"retry: 2500\nevent: happening\ndata: one\ndata:two\n\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, "one\ntwo");
        assert_eq!(out[0].event.as_deref(), Some("happening"));
        assert_eq!(out[0].id, None);
        assert_eq!(dec.retry(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn id_persists_until_replaced() {
        let mut dec = SseDecoder::new();
        let out = dec.push(b"id: 1\ndata: a\n\ndata: b\n\nid: 2\ndata: c\n\n");
        let ids: Vec<_> = out.iter().map(|r| r.id.as_deref()).collect();
        assert_eq!(ids, vec![Some("1"), Some("1"), Some("2")]);
    }

    #[test]
    fn bad_retry_is_ignored() {
        let mut dec = SseDecoder::new();
        dec.push(b"retry: soon\n\n");
        assert_eq!(dec.retry(), None);
    }
}
