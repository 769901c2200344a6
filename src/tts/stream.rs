//! Reply-to-wire conversion.
//!
//! Two pieces the response pipeline composes: [`SentenceChunker`] groups
//! streamed LLM tokens into speakable sentences while tracking byte offsets
//! into the full reply (the spoken-index bookkeeping barge-in depends on),
//! and [`PayloadFramer`] turns synthesized 24 kHz PCM into base64 μ-law
//! 20 ms wire payloads.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::audio::codec::pcm_to_mulaw;
use crate::audio::resample::downsample_24k_to_8k;
use crate::audio::WIRE_FRAME_SAMPLES;

const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', '\n'];

/// A sentence ready for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Trimmed text to hand to the synthesizer. May be empty when the
    /// chunk was punctuation or whitespace only.
    pub text: String,
    /// Byte offset one past this sentence's terminator in the concatenation
    /// of every token pushed so far.
    pub end: usize,
}

/// Incrementally groups streamed tokens into sentences.
#[derive(Default)]
pub struct SentenceChunker {
    pending: String,
    /// Byte offset of `pending`'s start within the full reply.
    base: usize,
}

impl SentenceChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one token; returns any sentences it completed, in order.
    pub fn push(&mut self, token: &str) -> Vec<Sentence> {
        self.pending.push_str(token);

        let mut out = Vec::new();
        while let Some(idx) = self.pending.find(&SENTENCE_TERMINATORS[..]) {
            let cut = idx + self.pending[idx..].chars().next().map_or(1, char::len_utf8);
            let raw: String = self.pending.drain(..cut).collect();
            self.base += raw.len();
            out.push(Sentence {
                text: raw.trim().to_string(),
                end: self.base,
            });
        }
        out
    }

    /// Hand back whatever is buffered when the token stream ends.
    pub fn flush(&mut self) -> Option<Sentence> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        self.base += raw.len();
        Some(Sentence {
            text: raw.trim().to_string(),
            end: self.base,
        })
    }
}

/// Converts synthesized PCM into 20 ms base64 μ-law payloads.
///
/// Chunk boundaries rarely align to frame boundaries, so a carry buffer
/// holds the remainder between pushes; `flush` zero-pads the final partial
/// frame at the end of a sentence.
#[derive(Default)]
pub struct PayloadFramer {
    carry: Vec<i16>,
}

impl PayloadFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one 24 kHz PCM chunk; returns the complete frames it yielded.
    pub fn push(&mut self, pcm_24k: &[i16]) -> Vec<String> {
        self.carry.extend(downsample_24k_to_8k(pcm_24k));

        let mut payloads = Vec::new();
        while self.carry.len() >= WIRE_FRAME_SAMPLES {
            let frame: Vec<i16> = self.carry.drain(..WIRE_FRAME_SAMPLES).collect();
            payloads.push(encode_frame(&frame));
        }
        payloads
    }

    /// Emit the trailing partial frame, zero-padded to 20 ms.
    pub fn flush(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let mut frame = std::mem::take(&mut self.carry);
        frame.resize(WIRE_FRAME_SAMPLES, 0);
        Some(encode_frame(&frame))
    }
}

fn encode_frame(frame_8k: &[i16]) -> String {
    BASE64.encode(pcm_to_mulaw(frame_8k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_splits_on_terminators() {
        let mut chunker = SentenceChunker::new();
        assert!(chunker.push("Hello the").is_empty());
        let sentences = chunker.push("re. How are");
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].text, "Hello there.");
        assert_eq!(sentences[0].end, "Hello there.".len());

        let sentences = chunker.push(" you?");
        assert_eq!(sentences[0].text, "How are you?");
        assert_eq!(sentences[0].end, "Hello there. How are you?".len());
    }

    #[test]
    fn chunker_handles_newline_and_multiple_terminators() {
        let mut chunker = SentenceChunker::new();
        let sentences = chunker.push("One.\nTwo! Three");
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0].text, "One.");
        assert_eq!(sentences[1].text, ""); // the bare newline chunk
        assert_eq!(sentences[2].text, "Two!");
        assert_eq!(chunker.flush().unwrap().text, "Three");
    }

    #[test]
    fn chunker_flush_reports_full_length() {
        let mut chunker = SentenceChunker::new();
        chunker.push("no terminator here");
        let tail = chunker.flush().unwrap();
        assert_eq!(tail.end, "no terminator here".len());
        assert!(chunker.flush().is_none());
    }

    #[test]
    fn framer_emits_216_byte_payloads() {
        let mut framer = PayloadFramer::new();
        // 480 samples at 24kHz -> 160 at 8kHz -> exactly one frame
        let payloads = framer.push(&vec![0i16; 480]);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].len(), 216);
        assert!(framer.flush().is_none());
    }

    #[test]
    fn framer_carries_remainder_across_pushes() {
        let mut framer = PayloadFramer::new();
        assert!(framer.push(&vec![0i16; 300]).is_empty()); // 100 samples at 8k
        let payloads = framer.push(&vec![0i16; 300]); // another 100 -> one frame + 40 carry
        assert_eq!(payloads.len(), 1);
        let tail = framer.flush().unwrap();
        assert_eq!(tail.len(), 216); // padded to a full frame
    }
}
