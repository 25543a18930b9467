// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Server-Sent-Events line framing shared by every streaming reader.
//!
//! SSE events can be split across multiple TCP packets, and a packet can
//! carry several events.  [`SseLineBuffer`] keeps the trailing partial line
//! between chunks and only yields complete `data:` payloads.  Bytes are
//! buffered undecoded so a UTF-8 sequence split across chunks survives.

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::ProviderError;

/// Payload that marks the end of the transport.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and drain every complete line, returning the `data:`
    /// payloads in order.  Comments, `event:`/`id:` fields and blank lines
    /// are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(nl_pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=nl_pos).collect();
            let line = String::from_utf8_lossy(&line[..nl_pos]);
            if let Some(p) = data_payload(line.trim_end_matches('\r')) {
                payloads.push(p.to_string());
            }
        }
        payloads
    }

    /// Flush a final line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        let line = String::from_utf8_lossy(&rest);
        data_payload(line.trim_end_matches('\r')).map(str::to_string)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Extract the payload of a `data:` line (the space after the colon is optional).
pub fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    let payload = rest.strip_prefix(' ').unwrap_or(rest).trim();
    (!payload.is_empty()).then_some(payload)
}

/// Turn an HTTP response body into a stream of SSE `data:` payloads.
/// Transport errors are wrapped as [`ProviderError::Upstream`].
pub(crate) fn response_payloads(
    resp: reqwest::Response,
    provider: &str,
) -> BoxStream<'static, Result<String, ProviderError>> {
    let provider = provider.to_string();
    resp.bytes_stream()
        .scan(SseLineBuffer::new(), move |buf, chunk| {
            let items: Vec<Result<String, ProviderError>> = match chunk {
                Ok(b) => buf.push(&b).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(ProviderError::upstream(&provider, e))],
            };
            std::future::ready(Some(items))
        })
        .flat_map(futures::stream::iter)
        .boxed()
}
