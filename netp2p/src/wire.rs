//! Wire framing: `u32_le length | varuint32 discriminant | body`.
//!
//! The discriminant numbering must match the reference implementation
//! exactly (`{handshake=0, chain_size=1, go_away=2, time=3, notice=4,
//! request=5, sync_request=6, signed_block=7, packed_transaction=8}`); the
//! body of each variant is this crate's own idiomatic shape, serialised with
//! `bincode` rather than hand-rolled field-by-field encoding, since nothing
//! outside this process needs to share the exact byte layout of a
//! `Handshake` the way the block log's on-disk format does.

use glint_core::{BlockId, BlockNum};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{NetError, Result};

/// A frame larger than this is a protocol violation, not a slow peer.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

pub type PublicKeyBytes = [u8; 32];
pub type SignatureBytes = [u8; 64];

/// `serde`'s built-in array impls only cover lengths up to 32, so
/// `SignatureBytes` ([u8; 64]) needs an explicit (de)serializer. This
/// encodes/decodes as a 64-element tuple, matching what a native array
/// impl would produce.
mod signature_bytes_serde {
    use serde::de::{Error as DeError, SeqAccess, Visitor};
    use serde::ser::SerializeTuple;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tup = serializer.serialize_tuple(64)?;
        for b in bytes {
            tup.serialize_element(b)?;
        }
        tup.end()
    }

    struct SignatureBytesVisitor;

    impl<'de> Visitor<'de> for SignatureBytesVisitor {
        type Value = [u8; 64];

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "an array of 64 bytes")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut out = [0u8; 64];
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| DeError::invalid_length(i, &self))?;
            }
            Ok(out)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 64], D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_tuple(64, SignatureBytesVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handshake {
    pub network_version: u16,
    pub chain_id: [u8; 32],
    pub node_id: [u8; 32],
    pub key: PublicKeyBytes,
    pub time_ns: i64,
    pub token: [u8; 32],
    #[serde(with = "signature_bytes_serde")]
    pub sig: SignatureBytes,
    pub p2p_address: String,
    pub last_irreversible: BlockNum,
    pub last_irreversible_id: BlockId,
    pub head: BlockNum,
    pub head_id: BlockId,
    pub os: String,
    pub agent: String,
    pub generation: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainSize {
    pub last_irreversible: BlockNum,
    pub last_irreversible_id: BlockId,
    pub head: BlockNum,
    pub head_id: BlockId,
}

/// The reasons a `go_away` message can carry, matching spec.md §7's
/// connection-fatal band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GoAwayReason {
    Self_,
    Duplicate,
    WrongChain,
    WrongVersion,
    Forked,
    Unlinkable,
    BadTransaction,
    Validation,
    BenignOther,
    FatalOther,
    Authentication,
    NoReason,
}

impl GoAwayReason {
    /// Whether a peer receiving this reason should attempt to reconnect,
    /// per spec.md §7's retry list.
    pub fn retryable(self) -> bool {
        matches!(self, GoAwayReason::BenignOther | GoAwayReason::WrongVersion | GoAwayReason::Duplicate | GoAwayReason::NoReason)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoAway {
    pub reason: GoAwayReason,
    pub node_id: [u8; 32],
}

/// Four nanosecond timestamps per spec.md §4.J: `org` (origination, set by
/// the sender), `rec`/`dst` (set by the receiver), `xmt` (transmission).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TimeMessage {
    pub org: i64,
    pub rec: i64,
    pub xmt: i64,
    pub dst: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Notice {
    CatchUp {
        head: BlockNum,
        head_id: BlockId,
    },
    LastIrrCatchUp {
        head: BlockNum,
        head_id: BlockId,
        /// SPEC_FULL §2: the sender's earliest retained block, so a pruned
        /// peer's catch-up target never asks for a block it cannot serve.
        earliest_available_block_num: BlockNum,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub block_num: BlockNum,
    pub block_id: BlockId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRequest {
    pub start_block: BlockNum,
    pub end_block: BlockNum,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedBlock {
    pub block_num: BlockNum,
    pub block_id: BlockId,
    pub previous: BlockId,
    pub timestamp_ns: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackedTransaction {
    pub id: [u8; 32],
    pub expires: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Message {
    Handshake(Handshake),
    ChainSize(ChainSize),
    GoAway(GoAway),
    Time(TimeMessage),
    Notice(Notice),
    Request(Request),
    SyncRequest(SyncRequest),
    SignedBlock(SignedBlock),
    PackedTransaction(PackedTransaction),
}

impl Message {
    pub fn discriminant(&self) -> u32 {
        match self {
            Message::Handshake(_) => 0,
            Message::ChainSize(_) => 1,
            Message::GoAway(_) => 2,
            Message::Time(_) => 3,
            Message::Notice(_) => 4,
            Message::Request(_) => 5,
            Message::SyncRequest(_) => 6,
            Message::SignedBlock(_) => 7,
            Message::PackedTransaction(_) => 8,
        }
    }

    /// Branch-optimised peek: the two hot-path message kinds (`signed_block`,
    /// `packed_transaction`) are recognisable from their discriminant alone,
    /// letting a receiver gate on dedup before paying for a full decode.
    pub fn peek_discriminant(frame: &[u8]) -> Result<u32> {
        let (d, _) = glint_core::decode_varuint32(frame).map_err(NetError::from)?;
        Ok(d)
    }

    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        glint_core::encode_varuint32(self.discriminant(), &mut buf);
        let body = match self {
            Message::Handshake(m) => bincode::serialize(m),
            Message::ChainSize(m) => bincode::serialize(m),
            Message::GoAway(m) => bincode::serialize(m),
            Message::Time(m) => bincode::serialize(m),
            Message::Notice(m) => bincode::serialize(m),
            Message::Request(m) => bincode::serialize(m),
            Message::SyncRequest(m) => bincode::serialize(m),
            Message::SignedBlock(m) => bincode::serialize(m),
            Message::PackedTransaction(m) => bincode::serialize(m),
        }
        .map_err(|e| NetError::MalformedMessage(e.to_string()))?;
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    pub fn decode_body(bytes: &[u8]) -> Result<Self> {
        let (discriminant, consumed) =
            glint_core::decode_varuint32(bytes).map_err(NetError::from)?;
        let rest = &bytes[consumed..];
        let msg = match discriminant {
            0 => Message::Handshake(decode(rest)?),
            1 => Message::ChainSize(decode(rest)?),
            2 => Message::GoAway(decode(rest)?),
            3 => Message::Time(decode(rest)?),
            4 => Message::Notice(decode(rest)?),
            5 => Message::Request(decode(rest)?),
            6 => Message::SyncRequest(decode(rest)?),
            7 => Message::SignedBlock(decode(rest)?),
            8 => Message::PackedTransaction(decode(rest)?),
            other => return Err(NetError::UnknownDiscriminant(other)),
        };
        Ok(msg)
    }
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| NetError::MalformedMessage(e.to_string()))
}

/// Writes `u32_le length | body` to `w`, where `length` covers the
/// discriminant-prefixed body produced by [`Message::encode_body`].
pub async fn write_frame<W: AsyncWriteExt + Unpin>(w: &mut W, msg: &Message) -> Result<()> {
    let body = msg.encode_body()?;
    let len: u32 = body
        .len()
        .try_into()
        .map_err(|_| NetError::OversizedFrame(u32::MAX))?;
    if len > MAX_FRAME_BYTES {
        return Err(NetError::OversizedFrame(len));
    }
    w.write_all(&len.to_le_bytes()).await?;
    w.write_all(&body).await?;
    Ok(())
}

/// Reads one length-prefixed frame and decodes it. Returns
/// `Err(NetError::ConnectionClosed)` on a clean EOF before any bytes of the
/// next frame arrive.
pub async fn read_frame<R: AsyncReadExt + Unpin>(r: &mut R) -> Result<Message> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(NetError::ConnectionClosed)
        }
        Err(e) => return Err(NetError::Io(e)),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(NetError::OversizedFrame(len));
    }
    let mut body = vec![0u8; len as usize];
    r.read_exact(&mut body).await?;
    Message::decode_body(&body)
}
