use crate::framing::{wire, S2sError};
use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};

/// Keys interpreted by the codec into typed [`Event`] attributes.
/// They never pass through `fields`, and the encoder refuses events that
/// try to smuggle one in.
pub(crate) const KEY_INDEX: &str = "_MetaData:Index";
pub(crate) const KEY_HOST: &str = "MetaData:Host";
pub(crate) const KEY_SOURCE: &str = "MetaData:Source";
pub(crate) const KEY_SOURCETYPE: &str = "MetaData:Sourcetype";
pub(crate) const KEY_TIME: &str = "_time";
pub(crate) const KEY_DONE: &str = "_done";
pub(crate) const KEY_RAW: &str = "_raw";

const RESERVED_KEYS: [&str; 7] = [
    KEY_INDEX,
    KEY_HOST,
    KEY_SOURCE,
    KEY_SOURCETYPE,
    KEY_TIME,
    KEY_DONE,
    KEY_RAW,
];

const HOST_PREFIX: &str = "host::";
const SOURCE_PREFIX: &str = "source::";
const SOURCETYPE_PREFIX: &str = "sourcetype::";

/// Field key carrying the sender's capability string on v3 connections.
pub const CAPABILITIES_KEY: &str = "__s2s_capabilities";
/// Field key carrying the receiver's capability response.
pub const CONTROL_MSG_KEY: &str = "__s2s_control_msg";

/// One S2S event record.
///
/// `host`, `source` and `sourcetype` are stored without their wire prefixes
/// (`host::` etc.); the codec adds them on encode and strips them on decode.
/// `time` is epoch seconds; `None` leaves timestamping to the receiver.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct Event {
    pub index: String,
    pub host: String,
    pub source: String,
    pub sourcetype: String,
    pub time: Option<i64>,
    pub raw: String,
    pub fields: HashMap<String, String>,
}

impl Event {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Default::default()
        }
    }

    /// The ordered key/value entries this event encodes to, metadata first,
    /// extension fields in map order, `_time`/`_done`/`_raw` last.
    fn wire_entries(&self) -> Result<Vec<(Cow<'_, str>, Cow<'_, str>)>, S2sError> {
        let mut entries: Vec<(Cow<'_, str>, Cow<'_, str>)> =
            Vec::with_capacity(self.fields.len() + 6);
        if !self.index.is_empty() {
            entries.push((Cow::Borrowed(KEY_INDEX), Cow::Borrowed(self.index.as_str())));
        }
        if !self.host.is_empty() {
            entries.push((
                Cow::Borrowed(KEY_HOST),
                Cow::Owned(format!("{HOST_PREFIX}{}", self.host)),
            ));
        }
        if !self.source.is_empty() {
            entries.push((
                Cow::Borrowed(KEY_SOURCE),
                Cow::Owned(format!("{SOURCE_PREFIX}{}", self.source)),
            ));
        }
        if !self.sourcetype.is_empty() {
            entries.push((
                Cow::Borrowed(KEY_SOURCETYPE),
                Cow::Owned(format!("{SOURCETYPE_PREFIX}{}", self.sourcetype)),
            ));
        }
        for (key, value) in &self.fields {
            if RESERVED_KEYS.contains(&key.as_str()) {
                return Err(S2sError::ReservedKey(key.clone()));
            }
            entries.push((Cow::Borrowed(key.as_str()), Cow::Borrowed(value.as_str())));
        }
        if let Some(time) = self.time {
            entries.push((Cow::Borrowed(KEY_TIME), Cow::Owned(time.to_string())));
        }
        entries.push((Cow::Borrowed(KEY_DONE), Cow::Borrowed(KEY_DONE)));
        entries.push((Cow::Borrowed(KEY_RAW), Cow::Borrowed(self.raw.as_str())));
        Ok(entries)
    }

    /// Encode one complete frame: total size, map count, key/value pairs,
    /// zero padding word, `"_raw"` trailer.
    pub fn encode(&self, w: &mut impl Write) -> Result<(), S2sError> {
        let entries = self.wire_entries()?;

        // total_size counts everything after itself: the map count word, the
        // pairs, the padding word and the trailer string.
        let mut size = 4 + 4 + wire::encoded_len(KEY_RAW);
        for (key, value) in &entries {
            size += wire::encoded_len(key) + wire::encoded_len(value);
        }

        w.write_u32::<BE>(size)?;
        w.write_u32::<BE>(entries.len() as u32)?;
        for (key, value) in &entries {
            wire::encode_key_value(w, key, value)?;
        }
        w.write_u32::<BE>(0)?;
        wire::encode_string(w, KEY_RAW)?;
        Ok(())
    }

    pub fn to_buf(&self) -> Result<Vec<u8>, S2sError> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode one frame from a reader.
    ///
    /// The declared total size is advisory; the frame is walked by map count
    /// plus the fixed padding-and-trailer tail. Reserved keys are routed to
    /// the typed attributes, everything else lands in `fields` with
    /// last-write-wins on duplicates.
    pub fn decode(r: &mut impl Read) -> Result<Self, S2sError> {
        let _total_size = r.read_u32::<BE>()?;
        let maps = r.read_u32::<BE>()?;

        let mut event = Event::default();
        for _ in 0..maps {
            let (key, value) = wire::decode_key_value(r)?;
            match key.as_str() {
                KEY_INDEX => event.index = value,
                KEY_HOST => event.host = strip_prefix(value, HOST_PREFIX),
                KEY_SOURCE => event.source = strip_prefix(value, SOURCE_PREFIX),
                KEY_SOURCETYPE => event.sourcetype = strip_prefix(value, SOURCETYPE_PREFIX),
                KEY_TIME => match value.parse::<i64>() {
                    Ok(seconds) => event.time = Some(seconds),
                    Err(_) => return Err(S2sError::BadTime(value)),
                },
                KEY_DONE => {} // constant _done=_done marker
                KEY_RAW => event.raw = value,
                _ => {
                    event.fields.insert(key, value);
                }
            }
        }

        let padding = r.read_u32::<BE>()?;
        if padding != 0 {
            return Err(S2sError::BadPadding(padding));
        }
        let trailer = wire::decode_string(r)?;
        if trailer != KEY_RAW {
            return Err(S2sError::BadTrailer(trailer));
        }
        Ok(event)
    }

    /// Decode a complete frame buffer, requiring the content to span it exactly.
    pub(crate) fn from_buf(buf: &[u8]) -> Result<Self, S2sError> {
        let mut reader = Cursor::new(buf);
        let event = Self::decode(&mut reader)?;
        let consumed = reader.position() as usize;
        if consumed != buf.len() {
            return Err(S2sError::BadSize(buf.len(), consumed));
        }
        Ok(event)
    }
}

fn strip_prefix(value: String, prefix: &str) -> String {
    match value.strip_prefix(prefix) {
        Some(stripped) => stripped.to_owned(),
        None => value,
    }
}

fn write_pair(
    f: &mut fmt::Formatter<'_>,
    first: &mut bool,
    key: &str,
    value: &str,
) -> fmt::Result {
    if !*first {
        f.write_str(" ")?;
    }
    *first = false;
    write!(f, "{key}={value}")
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if !self.index.is_empty() {
            write_pair(f, &mut first, "index", &self.index)?;
        }
        if !self.host.is_empty() {
            write_pair(f, &mut first, "host", &self.host)?;
        }
        if !self.source.is_empty() {
            write_pair(f, &mut first, "source", &self.source)?;
        }
        if !self.sourcetype.is_empty() {
            write_pair(f, &mut first, "sourcetype", &self.sourcetype)?;
        }
        for (key, value) in &self.fields {
            if !key.is_empty() {
                write_pair(f, &mut first, key, value)?;
            }
        }
        if let Some(time) = self.time {
            write_pair(f, &mut first, "_time", &time.to_string())?;
        }
        if !self.raw.is_empty() {
            write_pair(f, &mut first, "_raw", &self.raw)?;
        }
        Ok(())
    }
}

/// One decoded frame, split into the two cases the receiver must tell apart:
/// a v3 capability-negotiation control frame, or an ordinary data event.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum S2sFrame {
    /// Capability string from a `__s2s_capabilities` frame with empty raw.
    Control(String),
    Data(Event),
}

impl From<Event> for S2sFrame {
    fn from(event: Event) -> Self {
        if event.raw.is_empty() {
            if let Some(caps) = event.fields.get(CAPABILITIES_KEY) {
                return S2sFrame::Control(caps.clone());
            }
        }
        S2sFrame::Data(event)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(event: &Event) -> Event {
        let buf = event.to_buf().unwrap();
        Event::from_buf(&buf).unwrap()
    }

    #[test_log::test]
    fn minimal_roundtrip() {
        let event = Event {
            index: "main".into(),
            raw: "hello".into(),
            ..Default::default()
        };
        let decoded = roundtrip(&event);
        assert_eq!(decoded.index, "main");
        assert_eq!(decoded.raw, "hello");
        assert!(decoded.fields.is_empty());
        assert!(decoded.time.is_none());
        assert_eq!(decoded, event);
    }

    #[test_log::test]
    fn full_roundtrip() {
        let event = Event {
            index: "main".into(),
            host: "h1".into(),
            source: "/var/log/app.log".into(),
            sourcetype: "app".into(),
            time: Some(1_700_000_000),
            raw: "line".into(),
            fields: HashMap::from([("k".to_owned(), "v".to_owned())]),
        };
        assert_eq!(roundtrip(&event), event);
    }

    #[test_log::test]
    fn empty_event_roundtrip() {
        // even an all-empty event still carries _done and _raw
        let event = Event::default();
        let buf = event.to_buf().unwrap();
        let maps = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        assert_eq!(maps, 2);
        assert_eq!(roundtrip(&event), event);
    }

    #[test_log::test]
    fn unicode_roundtrip() {
        let event = Event {
            index: "main".into(),
            host: "世界".into(),
            raw: "🌍 test event".into(),
            fields: HashMap::from([("unicode_field".to_owned(), "测试".to_owned())]),
            ..Default::default()
        };
        assert_eq!(roundtrip(&event), event);
    }

    #[test_log::test]
    fn declared_size_matches_encoding() {
        let events = [
            Event::new("hello"),
            Event {
                index: "main".into(),
                host: "h1".into(),
                source: "src".into(),
                sourcetype: "st".into(),
                time: Some(123),
                raw: "payload".into(),
                fields: HashMap::from([
                    ("a".to_owned(), "1".to_owned()),
                    ("bb".to_owned(), "22".to_owned()),
                ]),
            },
        ];
        for event in events {
            let buf = event.to_buf().unwrap();
            let declared = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
            assert_eq!(declared, buf.len() - 4);
        }
    }

    #[test_log::test]
    fn metadata_values_carry_prefixes() {
        let event = Event {
            host: "h1".into(),
            source: "/var/log/app.log".into(),
            sourcetype: "app".into(),
            raw: "x".into(),
            ..Default::default()
        };
        let buf = event.to_buf().unwrap();
        let find = |needle: &[u8]| buf.windows(needle.len()).any(|w| w == needle);
        assert!(find(b"host::h1"));
        assert!(find(b"source::/var/log/app.log"));
        assert!(find(b"sourcetype::app"));
    }

    #[test_log::test]
    fn unprefixed_metadata_taken_verbatim() {
        // a peer may omit the host:: prefix; the value is then used as-is
        let mut buf = Vec::new();
        let mut body = Vec::new();
        wire::encode_key_value(&mut body, KEY_HOST, "bare-host").unwrap();
        wire::encode_key_value(&mut body, KEY_DONE, KEY_DONE).unwrap();
        wire::encode_key_value(&mut body, KEY_RAW, "x").unwrap();
        buf.extend_from_slice(&((body.len() + 4 + 4 + 9) as u32).to_be_bytes());
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&0u32.to_be_bytes());
        wire::encode_string(&mut buf, KEY_RAW).unwrap();

        let decoded = Event::from_buf(&buf).unwrap();
        assert_eq!(decoded.host, "bare-host");
    }

    #[test_log::test]
    fn reserved_key_in_fields_is_rejected() {
        for key in RESERVED_KEYS {
            let event = Event {
                raw: "x".into(),
                fields: HashMap::from([(key.to_owned(), "v".to_owned())]),
                ..Default::default()
            };
            let err = event.to_buf().unwrap_err();
            assert!(matches!(err, S2sError::ReservedKey(k) if k == key));
        }
    }

    #[test_log::test]
    fn non_zero_padding_is_rejected() {
        let event = Event::new("x");
        let mut buf = event.to_buf().unwrap();
        // padding word sits 9 bytes of trailer from the end
        let at = buf.len() - 9 - 4;
        buf[at] = 1;
        let err = Event::from_buf(&buf).unwrap_err();
        assert!(matches!(err, S2sError::BadPadding(_)), "{err}");
    }

    #[test_log::test]
    fn wrong_trailer_is_rejected() {
        let event = Event::new("x");
        let mut buf = event.to_buf().unwrap();
        let at = buf.len() - 5;
        let end = buf.len() - 1;
        buf[at..end].copy_from_slice(b"_rax");
        let err = Event::from_buf(&buf).unwrap_err();
        assert!(matches!(err, S2sError::BadTrailer(t) if t == "_rax"), "wrong error");
    }

    #[test_log::test]
    fn malformed_time_is_rejected() {
        let mut event = Event::new("x");
        event.time = Some(42);
        let mut buf = event.to_buf().unwrap();
        // "_time" value "42" -> "4x"
        let at = buf
            .windows(2)
            .rposition(|w| w == b"42")
            .expect("encoded time");
        buf[at + 1] = b'x';
        let err = Event::from_buf(&buf).unwrap_err();
        assert!(matches!(err, S2sError::BadTime(v) if v == "4x"), "wrong error");
    }

    #[test_log::test]
    fn trailing_garbage_is_rejected() {
        let mut buf = Event::new("x").to_buf().unwrap();
        buf.push(0);
        let err = Event::from_buf(&buf).unwrap_err();
        assert!(matches!(err, S2sError::BadSize(_, _)), "{err}");
    }

    #[test_log::test]
    fn capability_frame_classifies_as_control() {
        let mut event = Event::default();
        event
            .fields
            .insert(CAPABILITIES_KEY.to_owned(), "ack=0;compression=0".to_owned());
        match S2sFrame::from(event) {
            S2sFrame::Control(caps) => assert_eq!(caps, "ack=0;compression=0"),
            S2sFrame::Data(_) => panic!("expected control frame"),
        }
    }

    #[test_log::test]
    fn non_empty_raw_is_data_even_with_capability_key() {
        let mut event = Event::new("payload");
        event
            .fields
            .insert(CAPABILITIES_KEY.to_owned(), "ack=0".to_owned());
        assert!(matches!(S2sFrame::from(event), S2sFrame::Data(_)));
    }

    #[test_log::test]
    fn display_renders_in_field_order() {
        let event = Event {
            index: "main".into(),
            host: "h1".into(),
            time: Some(7),
            raw: "line one".into(),
            ..Default::default()
        };
        assert_eq!(event.to_string(), "index=main host=h1 _time=7 _raw=line one");
    }
}
