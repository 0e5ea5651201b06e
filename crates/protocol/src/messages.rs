use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::commands::Command;

/// One entry of a chunk map: a merged, inclusive byte range.
///
/// `index` is a derived ordinal assigned when ranges are merged; senders
/// write 0 and receivers renumber, so it carries no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub index: u32,
    pub range: [u64; 2],
}

/// Sender offers a file for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub taskid: String,
    pub filename: String,
    pub filesize: u64,
}

/// Receiver's reply to an offer.
///
/// `result` is 1 on acceptance. `chunk_map` reports bytes already durable
/// from a previous session so the sender can resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAck {
    pub taskid: String,
    pub result: u32,
    pub filesize: u64,
    pub suggest_chunk_size: u64,
    #[serde(default)]
    pub chunk_map: Vec<ChunkEntry>,
}

/// One chunk of file data.
///
/// `bytes` is base64-encoded in JSON. `chunk_size` declares how many of the
/// decoded bytes belong to `range`; a payload shorter than the declaration
/// is a protocol violation the receiver rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkData {
    pub taskid: String,
    pub chunk_size: u64,
    pub range: [u64; 2],
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

/// Receiver's acknowledgement of a chunk, carrying its updated chunk map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {
    pub taskid: String,
    pub result: u32,
    pub chunk_size: u64,
    pub range: [u64; 2],
    #[serde(default)]
    pub chunk_map: Vec<ChunkEntry>,
}

/// Payload shared by FinishNotify, Interrupt and PeerError.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub taskid: String,
    pub result: u32,
}

impl Signal {
    /// A finish confirmation (`result` 1).
    pub fn finish(taskid: impl Into<String>) -> Self {
        Self { taskid: taskid.into(), result: 1 }
    }

    /// An interrupt request.
    pub fn interrupt(taskid: impl Into<String>) -> Self {
        Self { taskid: taskid.into(), result: 0 }
    }

    /// A terminal-failure notification.
    pub fn peer_error(taskid: impl Into<String>) -> Self {
        Self { taskid: taskid.into(), result: 0 }
    }

    /// Encodes this signal under the given command code.
    pub fn encode(&self, command: Command) -> Result<Vec<u8>, ProtocolError> {
        encode_message(command, self)
    }
}

impl Offer {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_message(Command::Offer, self)
    }
}

impl OfferAck {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_message(Command::OfferAck, self)
    }
}

impl ChunkData {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_message(Command::ChunkData, self)
    }
}

impl ChunkAck {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_message(Command::ChunkAck, self)
    }
}

/// A decoded inbound message, typed by command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Offer(Offer),
    OfferAck(OfferAck),
    ChunkData(ChunkData),
    ChunkAck(ChunkAck),
    FinishNotify(Signal),
    Interrupt(Signal),
    PeerError(Signal),
}

impl Inbound {
    /// The task id this message is scoped to.
    pub fn taskid(&self) -> &str {
        match self {
            Inbound::Offer(m) => &m.taskid,
            Inbound::OfferAck(m) => &m.taskid,
            Inbound::ChunkData(m) => &m.taskid,
            Inbound::ChunkAck(m) => &m.taskid,
            Inbound::FinishNotify(s) | Inbound::Interrupt(s) | Inbound::PeerError(s) => &s.taskid,
        }
    }
}

/// Decodes and validates one wire message.
///
/// Malformed JSON, a missing or unknown command, ill-typed fields and
/// inverted ranges all fail here, so the state machines only ever see
/// well-formed payloads.
pub fn decode(bytes: &[u8]) -> Result<Inbound, ProtocolError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let code = value
        .get("command")
        .and_then(serde_json::Value::as_u64)
        .ok_or(ProtocolError::MissingCommand)?;
    let command = Command::from_code(code).ok_or(ProtocolError::UnknownCommand(code))?;

    let inbound = match command {
        Command::Offer => Inbound::Offer(serde_json::from_value(value)?),
        Command::OfferAck => {
            let ack: OfferAck = serde_json::from_value(value)?;
            if ack.result != 0 && ack.suggest_chunk_size == 0 {
                return Err(ProtocolError::ZeroChunkSize);
            }
            validate_chunk_map(&ack.chunk_map)?;
            Inbound::OfferAck(ack)
        }
        Command::ChunkData => {
            let data: ChunkData = serde_json::from_value(value)?;
            validate_range(data.range)?;
            if data.chunk_size == 0 {
                return Err(ProtocolError::ZeroChunkSize);
            }
            if (data.bytes.len() as u64) < data.chunk_size {
                return Err(ProtocolError::TruncatedPayload {
                    declared: data.chunk_size,
                    actual: data.bytes.len() as u64,
                });
            }
            Inbound::ChunkData(data)
        }
        Command::ChunkAck => {
            let ack: ChunkAck = serde_json::from_value(value)?;
            validate_range(ack.range)?;
            validate_chunk_map(&ack.chunk_map)?;
            Inbound::ChunkAck(ack)
        }
        Command::FinishNotify => Inbound::FinishNotify(serde_json::from_value(value)?),
        Command::Interrupt => Inbound::Interrupt(serde_json::from_value(value)?),
        Command::PeerError => Inbound::PeerError(serde_json::from_value(value)?),
    };
    Ok(inbound)
}

fn validate_range(range: [u64; 2]) -> Result<(), ProtocolError> {
    if range[0] > range[1] {
        return Err(ProtocolError::InvalidRange { left: range[0], right: range[1] });
    }
    Ok(())
}

fn validate_chunk_map(entries: &[ChunkEntry]) -> Result<(), ProtocolError> {
    for entry in entries {
        validate_range(entry.range)?;
    }
    Ok(())
}

fn encode_message<T: Serialize>(command: Command, payload: &T) -> Result<Vec<u8>, ProtocolError> {
    #[derive(Serialize)]
    struct Envelope<'a, T> {
        command: u32,
        #[serde(flatten)]
        payload: &'a T,
    }
    Ok(serde_json::to_vec(&Envelope { command: command.code(), payload })?)
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_roundtrip() {
        let offer = Offer {
            taskid: "t-1".into(),
            filename: "backup.tar".into(),
            filesize: 4096,
        };
        let bytes = offer.encode().unwrap();
        match decode(&bytes).unwrap() {
            Inbound::Offer(decoded) => assert_eq!(decoded, offer),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn offer_ack_roundtrip_with_chunk_map() {
        let ack = OfferAck {
            taskid: "t-1".into(),
            result: 1,
            filesize: 1000,
            suggest_chunk_size: 100,
            chunk_map: vec![
                ChunkEntry { index: 0, range: [0, 99] },
                ChunkEntry { index: 1, range: [200, 299] },
            ],
        };
        let bytes = ack.encode().unwrap();
        match decode(&bytes).unwrap() {
            Inbound::OfferAck(decoded) => assert_eq!(decoded, ack),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn chunk_data_bytes_are_base64_in_json() {
        let data = ChunkData {
            taskid: "t-1".into(),
            chunk_size: 3,
            range: [0, 2],
            bytes: vec![1, 2, 3],
        };
        let bytes = data.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["command"], 7001);
        assert!(value["bytes"].is_string());

        match decode(&bytes).unwrap() {
            Inbound::ChunkData(decoded) => assert_eq!(decoded.bytes, vec![1, 2, 3]),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn signal_constructors() {
        assert_eq!(Signal::finish("t").result, 1);
        assert_eq!(Signal::interrupt("t").result, 0);
        assert_eq!(Signal::peer_error("t").result, 0);
    }

    #[test]
    fn signal_command_distinguishes_kind() {
        let bytes = Signal::interrupt("t-9").encode(Command::Interrupt).unwrap();
        assert!(matches!(decode(&bytes).unwrap(), Inbound::Interrupt(_)));

        let bytes = Signal::finish("t-9").encode(Command::FinishNotify).unwrap();
        assert!(matches!(decode(&bytes).unwrap(), Inbound::FinishNotify(_)));
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(matches!(decode(b"not json"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn missing_command_rejected() {
        let bytes = br#"{"taskid":"t-1","result":1}"#;
        assert!(matches!(decode(bytes), Err(ProtocolError::MissingCommand)));
    }

    #[test]
    fn unknown_command_rejected() {
        let bytes = br#"{"command":4242,"taskid":"t-1"}"#;
        assert!(matches!(decode(bytes), Err(ProtocolError::UnknownCommand(4242))));
    }

    #[test]
    fn missing_field_rejected() {
        // Offer without filesize.
        let bytes = br#"{"command":7000,"taskid":"t-1","filename":"a.bin"}"#;
        assert!(matches!(decode(bytes), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn inverted_range_rejected() {
        let data = ChunkData {
            taskid: "t-1".into(),
            chunk_size: 1,
            range: [10, 5],
            bytes: vec![0],
        };
        let bytes = data.encode().unwrap();
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::InvalidRange { left: 10, right: 5 })
        ));
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let data = ChunkData {
            taskid: "t-1".into(),
            chunk_size: 0,
            range: [0, 0],
            bytes: vec![1],
        };
        let bytes = data.encode().unwrap();
        assert!(matches!(decode(&bytes), Err(ProtocolError::ZeroChunkSize)));
    }

    #[test]
    fn truncated_payload_rejected() {
        let data = ChunkData {
            taskid: "t-1".into(),
            chunk_size: 4,
            range: [0, 3],
            bytes: vec![1, 2],
        };
        let bytes = data.encode().unwrap();
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::TruncatedPayload { declared: 4, actual: 2 })
        ));
    }

    #[test]
    fn zero_suggested_chunk_size_rejected() {
        let ack = OfferAck {
            taskid: "t-1".into(),
            result: 1,
            filesize: 10,
            suggest_chunk_size: 0,
            chunk_map: Vec::new(),
        };
        let bytes = ack.encode().unwrap();
        assert!(matches!(decode(&bytes), Err(ProtocolError::ZeroChunkSize)));
    }

    #[test]
    fn rejecting_offer_ack_may_omit_chunk_size() {
        // A result-0 ack (open failure) does not need a usable chunk size.
        let ack = OfferAck {
            taskid: "t-1".into(),
            result: 0,
            filesize: 10,
            suggest_chunk_size: 0,
            chunk_map: Vec::new(),
        };
        let bytes = ack.encode().unwrap();
        assert!(matches!(decode(&bytes), Ok(Inbound::OfferAck(_))));
    }

    #[test]
    fn taskid_accessor_covers_all_variants() {
        let bytes = Signal::peer_error("abc").encode(Command::PeerError).unwrap();
        assert_eq!(decode(&bytes).unwrap().taskid(), "abc");
    }
}
