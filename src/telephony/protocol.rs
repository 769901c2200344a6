//! Media stream wire protocol.
//!
//! The provider speaks newline-free JSON text frames over a WebSocket, tagged
//! by an `event` field. Inbound and outbound media frames have the same
//! shape: 20 ms of mono 8 kHz μ-law, base64-encoded (160 bytes decoded).
//! Unknown fields are ignored; unknown events fail to parse and are logged
//! by the caller.

use serde::{Deserialize, Serialize};

/// Inbound frames from the provider.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMeta,
    },
    Media {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Dtmf {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        #[serde(default)]
        stop: StopMeta,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub call_sid: String,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded μ-law audio.
    pub payload: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMeta {
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub stream_sid: Option<String>,
}

/// Outbound frames to the provider.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Asks the provider to discard audio it has buffered but not yet
    /// played. Sent on barge-in.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundFrame {
    pub fn media(stream_sid: &str, payload: String) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_event() {
        let raw = r#"{"event":"start","sequenceNumber":"1","streamSid":"MZ123",
            "start":{"accountSid":"AC1","callSid":"CA456","streamSid":"MZ123",
            "tracks":["inbound"],
            "mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1}}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        match event {
            StreamEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA456");
                assert_eq!(start.media_format.unwrap().sample_rate, Some(8000));
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn parses_media_event() {
        let raw = r#"{"event":"media","streamSid":"MZ123","media":{"track":"inbound","chunk":"2","payload":"AAAA"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        match event {
            StreamEvent::Media { media, .. } => assert_eq!(media.payload, "AAAA"),
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn parses_stop_event() {
        let raw = r#"{"event":"stop","streamSid":"MZ123","stop":{"callSid":"CA456","streamSid":"MZ123"}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        match event {
            StreamEvent::Stop { stop, .. } => {
                assert_eq!(stop.call_sid.as_deref(), Some("CA456"));
            }
            other => panic!("expected stop, got {other:?}"),
        }
    }

    #[test]
    fn stop_without_metadata_still_parses() {
        let raw = r#"{"event":"stop","streamSid":"MZ123"}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, StreamEvent::Stop { .. }));
    }

    #[test]
    fn unknown_event_is_a_parse_error() {
        let raw = r#"{"event":"telemetry","data":{}}"#;
        assert!(serde_json::from_str::<StreamEvent>(raw).is_err());
    }

    #[test]
    fn serializes_clear_frame() {
        let json = serde_json::to_string(&OutboundFrame::clear("MZ123")).unwrap();
        assert_eq!(json, r#"{"event":"clear","streamSid":"MZ123"}"#);
    }

    #[test]
    fn serializes_media_frame() {
        let json = serde_json::to_string(&OutboundFrame::media("MZ1", "QUJD".into())).unwrap();
        assert_eq!(
            json,
            r#"{"event":"media","streamSid":"MZ1","media":{"payload":"QUJD"}}"#
        );
    }
}
