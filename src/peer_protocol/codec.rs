use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::{
    bytes::{Buf, BufMut, Bytes, BytesMut},
    codec::{Decoder, Encoder, Framed},
};

use super::PeerHandshake;
use crate::error::DownloadError;
use crate::peers::{BlockInfo, BlockOffset, PieceIndex};
use crate::torrent::Bitfield;

/// typed peer wire messages, one variant per message id.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(PieceIndex),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece {
        index: PieceIndex,
        begin: BlockOffset,
        block: Bytes,
    },
    Cancel(BlockInfo),
    Port(u16),
    /// ids from protocol extensions this client does not speak.
    Unknown { id: u8 },
}

impl PeerMessage {
    pub const CHOKE: u8 = 0;
    pub const UNCHOKE: u8 = 1;
    pub const INTERESTED: u8 = 2;
    pub const NOT_INTERESTED: u8 = 3;
    pub const HAVE: u8 = 4;
    pub const BITFIELD: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const PIECE: u8 = 7;
    pub const CANCEL: u8 = 8;
    pub const PORT: u8 = 9;

    /// the id byte on the wire, keep-alives have none.
    pub fn id(&self) -> Option<u8> {
        type PM = PeerMessage;
        Some(match self {
            PM::KeepAlive => return None,
            PM::Choke => Self::CHOKE,
            PM::Unchoke => Self::UNCHOKE,
            PM::Interested => Self::INTERESTED,
            PM::NotInterested => Self::NOT_INTERESTED,
            PM::Have(_) => Self::HAVE,
            PM::Bitfield(_) => Self::BITFIELD,
            PM::Request(_) => Self::REQUEST,
            PM::Piece { .. } => Self::PIECE,
            PM::Cancel(_) => Self::CANCEL,
            PM::Port(_) => Self::PORT,
            PM::Unknown { id } => *id,
        })
    }
}

/// a whole frame pulled off the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerFrame {
    Handshake(PeerHandshake),
    Message(PeerMessage),
}

/// reassembles peer wire frames from an arbitrarily fragmented byte stream.
///
/// the first frame of a connection is the handshake (`1 + pstrlen + 48` bytes), every frame
/// after it is length prefixed (`4 + len` bytes). a partial frame is left in the buffer until
/// the rest of it arrives.
#[derive(Debug)]
pub struct PeerMessageCodec {
    expecting_handshake: bool,
}

pub type PeerFrames<T> = Framed<T, PeerMessageCodec>;

impl Default for PeerMessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerMessageCodec {
    const LEN_HEADER_SIZE: usize = std::mem::size_of::<u32>();
    // largest accepted frame payload, leaves room for the bitfield of a torrent with millions of pieces.
    const MAX_SIZE: usize = 2 * (1 << 20);

    pub fn new() -> Self {
        Self {
            expecting_handshake: true,
        }
    }

    /// a codec for a stream whose handshake has already been consumed.
    pub fn after_handshake() -> Self {
        Self {
            expecting_handshake: false,
        }
    }

    pub fn is_expecting_handshake(&self) -> bool {
        self.expecting_handshake
    }

    fn ensure_payload_len(payload: &BytesMut, expected: usize, id: u8) -> Result<(), DownloadError> {
        if payload.len() != expected {
            return Err(DownloadError::protocol(format!(
                "payload of {} bytes for message id {}, expected {}",
                payload.len(),
                id,
                expected
            )));
        }
        Ok(())
    }

    // Request and Cancel share their payload shape.
    fn decode_block_info(payload: &mut BytesMut, id: u8) -> Result<BlockInfo, DownloadError> {
        Self::ensure_payload_len(payload, 3 * std::mem::size_of::<u32>(), id)?;
        Ok(BlockInfo {
            index: payload.get_u32(),
            begin: payload.get_u32(),
            length: payload.get_u32(),
        })
    }

    fn decode_handshake(&mut self, src: &mut BytesMut) -> Result<Option<PeerFrame>, DownloadError> {
        let Some(&pstrlen) = src.first() else {
            return Ok(None);
        };

        let frame_len = PeerHandshake::frame_len(pstrlen);
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let handshake = PeerHandshake::from_bytes(&frame)?;
        self.expecting_handshake = false;

        Ok(Some(PeerFrame::Handshake(handshake)))
    }

    fn decode_message(mut payload: BytesMut) -> Result<PeerMessage, DownloadError> {
        type PM = PeerMessage;

        if payload.is_empty() {
            return Ok(PM::KeepAlive);
        }

        let id = payload.get_u8();
        let msg = match id {
            PM::CHOKE | PM::UNCHOKE | PM::INTERESTED | PM::NOT_INTERESTED => {
                Self::ensure_payload_len(&payload, 0, id)?;
                match id {
                    PM::CHOKE => PM::Choke,
                    PM::UNCHOKE => PM::Unchoke,
                    PM::INTERESTED => PM::Interested,
                    _ => PM::NotInterested,
                }
            }
            PM::HAVE => {
                Self::ensure_payload_len(&payload, std::mem::size_of::<u32>(), id)?;
                PM::Have(payload.get_u32())
            }
            // any amount of bytes is a valid bitfield, the receiver checks it against the torrent.
            PM::BITFIELD => PM::Bitfield(Bitfield::from_vec(payload.to_vec())),
            PM::REQUEST => PM::Request(Self::decode_block_info(&mut payload, id)?),
            PM::PIECE => {
                let header = 2 * std::mem::size_of::<u32>();
                if payload.len() < header {
                    return Err(DownloadError::protocol(format!(
                        "piece message payload of {} bytes is shorter than its header",
                        payload.len()
                    )));
                }

                let index = payload.get_u32();
                let begin = payload.get_u32();
                PM::Piece {
                    index,
                    begin,
                    block: payload.freeze(),
                }
            }
            PM::CANCEL => PM::Cancel(Self::decode_block_info(&mut payload, id)?),
            PM::PORT => {
                Self::ensure_payload_len(&payload, std::mem::size_of::<u16>(), id)?;
                PM::Port(payload.get_u16())
            }
            id => PM::Unknown { id },
        };

        Ok(msg)
    }
}

impl Decoder for PeerMessageCodec {
    type Item = PeerFrame;
    type Error = DownloadError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.expecting_handshake {
            return self.decode_handshake(src);
        }

        if src.len() < Self::LEN_HEADER_SIZE {
            // more bytes need to be read before the length header can be decoded.
            return Ok(None);
        }

        let mut len_header = [0u8; Self::LEN_HEADER_SIZE];
        len_header.copy_from_slice(&src[..Self::LEN_HEADER_SIZE]);
        let len = u32::from_be_bytes(len_header) as usize;

        // prevent malicious peers (if they exist) from hogging us.
        if len > Self::MAX_SIZE {
            return Err(DownloadError::protocol(format!(
                "frames of size {} (>2 MiB) prevented from being decoded",
                len
            )));
        }

        let frame_len = Self::LEN_HEADER_SIZE + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(Self::LEN_HEADER_SIZE);
        let payload = src.split_to(len);
        Ok(Some(PeerFrame::Message(Self::decode_message(payload)?)))
    }
}

impl PeerMessageCodec {
    const U32_LEN: usize = std::mem::size_of::<u32>();

    // length prefix counts the id byte and the payload.
    fn put_header(dst: &mut BytesMut, id: u8, payload_len: usize) {
        dst.reserve(Self::LEN_HEADER_SIZE + 1 + payload_len);
        dst.put_u32((1 + payload_len) as u32);
        dst.put_u8(id);
    }

    fn put_block_info(dst: &mut BytesMut, id: u8, block: BlockInfo) {
        Self::put_header(dst, id, 3 * Self::U32_LEN);
        dst.put_u32(block.index);
        dst.put_u32(block.begin);
        dst.put_u32(block.length);
    }
}

impl Encoder<PeerMessage> for PeerMessageCodec {
    type Error = DownloadError;

    fn encode(&mut self, item: PeerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        type PM = PeerMessage;
        match item {
            PM::KeepAlive => dst.put_u32(0),
            PM::Choke => Self::put_header(dst, PM::CHOKE, 0),
            PM::Unchoke => Self::put_header(dst, PM::UNCHOKE, 0),
            PM::Interested => Self::put_header(dst, PM::INTERESTED, 0),
            PM::NotInterested => Self::put_header(dst, PM::NOT_INTERESTED, 0),
            PM::Unknown { id } => Self::put_header(dst, id, 0),
            PM::Have(index) => {
                Self::put_header(dst, PM::HAVE, Self::U32_LEN);
                dst.put_u32(index);
            }
            PM::Request(block) => Self::put_block_info(dst, PM::REQUEST, block),
            PM::Cancel(block) => Self::put_block_info(dst, PM::CANCEL, block),
            PM::Piece {
                index,
                begin,
                block,
            } => {
                Self::put_header(dst, PM::PIECE, 2 * Self::U32_LEN + block.len());
                dst.put_u32(index);
                dst.put_u32(begin);
                dst.put(block);
            }
            PM::Bitfield(bitfield) => {
                let bytes = bitfield.into_vec();
                Self::put_header(dst, PM::BITFIELD, bytes.len());
                dst.put(bytes.as_slice());
            }
            PM::Port(port) => {
                Self::put_header(dst, PM::PORT, std::mem::size_of::<u16>());
                dst.put_u16(port);
            }
        }
        Ok(())
    }
}

impl Encoder<PeerHandshake> for PeerMessageCodec {
    type Error = DownloadError;

    fn encode(&mut self, item: PeerHandshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(&item.to_bytes());
        Ok(())
    }
}

/// wraps a freshly connected stream, the first frame read from it is the peer's handshake.
pub fn upgrade_stream<T>(stream: T) -> PeerFrames<T>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(stream, PeerMessageCodec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::{InfoHash, PeerId};
    use rstest::{fixture, rstest};
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;

    #[fixture]
    fn handshake() -> PeerHandshake {
        PeerHandshake::new(InfoHash::new([3; 20]), PeerId::with_suffix(&[b'q'; 12]))
    }

    fn messages() -> Vec<PeerMessage> {
        vec![
            PeerMessage::Bitfield(Bitfield::from_slice(&[0b1000_0001, 0b0100_0000])),
            PeerMessage::KeepAlive,
            PeerMessage::Unchoke,
            PeerMessage::Have(7),
            PeerMessage::Request(BlockInfo {
                index: 1,
                begin: 16384,
                length: 16384,
            }),
            PeerMessage::Piece {
                index: 1,
                begin: 16384,
                block: Bytes::from((0..=255u8).cycle().take(3000).collect::<Vec<_>>()),
            },
            PeerMessage::Port(6881),
            PeerMessage::Choke,
        ]
    }

    fn encode_stream(handshake: &PeerHandshake, messages: &[PeerMessage]) -> BytesMut {
        let mut codec = PeerMessageCodec::new();
        let mut buffer = BytesMut::new();
        codec.encode(handshake.clone(), &mut buffer).unwrap();
        for msg in messages {
            codec.encode(msg.clone(), &mut buffer).unwrap();
        }
        buffer
    }

    fn decode_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<PeerFrame> {
        let mut codec = PeerMessageCodec::new();
        let mut buffer = BytesMut::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            buffer.extend_from_slice(chunk);
            while let Some(frame) = codec.decode(&mut buffer).unwrap() {
                frames.push(frame);
            }
        }
        assert!(buffer.is_empty(), "no bytes should be left over");
        frames
    }

    #[rstest]
    fn test_encode_wire_layout() {
        let mut codec = PeerMessageCodec::after_handshake();
        let mut buffer = BytesMut::new();

        codec.encode(PeerMessage::Interested, &mut buffer).unwrap();
        codec
            .encode(
                PeerMessage::Request(BlockInfo {
                    index: 1,
                    begin: 0x4000,
                    length: 0x4000,
                }),
                &mut buffer,
            )
            .unwrap();
        codec.encode(PeerMessage::KeepAlive, &mut buffer).unwrap();

        assert_eq!(
            &buffer[..],
            &[
                0, 0, 0, 1, 2, // interested
                0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0, // request
                0, 0, 0, 0, // keep-alive
            ]
        );
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(7)]
    #[case(68)]
    #[case(69)]
    #[case(1000)]
    #[case(usize::MAX)]
    fn test_reassembly_is_chunk_independent(handshake: PeerHandshake, #[case] chunk_size: usize) {
        let msgs = messages();
        let stream = encode_stream(&handshake, &msgs);

        let frames = decode_chunks(stream.chunks(chunk_size.min(stream.len())));

        let mut expected = vec![PeerFrame::Handshake(handshake)];
        expected.extend(msgs.into_iter().map(PeerFrame::Message));
        assert_eq!(frames, expected);
    }

    #[rstest]
    fn test_uneven_splits_match_single_chunk(handshake: PeerHandshake) {
        let stream = encode_stream(&handshake, &messages());
        let whole = decode_chunks([&stream[..]]);

        // split points that land inside the handshake, a length header and a block payload.
        let cuts = [0, 5, 67, 70, 71, 90, 120, 2000, stream.len()];
        let uneven = decode_chunks(cuts.windows(2).map(|w| &stream[w[0]..w[1]]));

        assert_eq!(whole, uneven);
        assert_eq!(whole.len(), 1 + messages().len());
    }

    #[rstest]
    fn test_partial_frame_stays_buffered(handshake: PeerHandshake) {
        let stream = encode_stream(&handshake, &[PeerMessage::Have(9), PeerMessage::Unchoke]);
        let mut codec = PeerMessageCodec::new();

        // handshake + have + 3 bytes of the unchoke frame.
        let mut buffer = BytesMut::from(&stream[..PeerHandshake::SIZE + 9 + 3]);
        assert!(matches!(
            codec.decode(&mut buffer).unwrap(),
            Some(PeerFrame::Handshake(_))
        ));
        assert!(!codec.is_expecting_handshake());
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(PeerFrame::Message(PeerMessage::Have(9)))
        );
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        assert_eq!(buffer.len(), 3);

        buffer.extend_from_slice(&stream[PeerHandshake::SIZE + 12..]);
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(PeerFrame::Message(PeerMessage::Unchoke))
        );
    }

    #[rstest]
    fn test_handshake_waits_for_whole_frame(handshake: PeerHandshake) {
        let bytes = handshake.to_bytes();
        let mut codec = PeerMessageCodec::new();

        let mut buffer = BytesMut::from(&bytes[..40]);
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
        assert!(codec.is_expecting_handshake());
        assert_eq!(buffer.len(), 40);
    }

    #[rstest]
    fn test_bad_protocol_string_is_violation(handshake: PeerHandshake) {
        let mut bytes = handshake.to_bytes();
        bytes[1] = b'b';
        let mut buffer = BytesMut::from(&bytes[..]);

        let err = PeerMessageCodec::new().decode(&mut buffer).unwrap_err();
        assert!(matches!(err, DownloadError::ProtocolViolation(_)));
    }

    #[rstest]
    #[case(&[0, 0, 0, 3, 4, 0, 0])] // have with a 2 byte index
    #[case(&[0, 0, 0, 5, 7, 0, 0, 0, 1])] // piece without begin
    #[case(&[0, 0, 0, 2, 1, 0])] // unchoke with payload
    #[case(&[0xff, 0, 0, 0])] // oversized frame
    fn test_malformed_frames(#[case] bytes: &[u8]) {
        let mut buffer = BytesMut::from(bytes);
        assert!(PeerMessageCodec::after_handshake()
            .decode(&mut buffer)
            .is_err());
    }

    #[rstest]
    #[case(PeerMessageCodec::MAX_SIZE, true)]
    #[case(PeerMessageCodec::MAX_SIZE + 1, false)]
    fn test_frame_size_limit(#[case] len: usize, #[case] accepted: bool) {
        // only the header has arrived, an accepted frame waits for its payload.
        let mut buffer = BytesMut::from(&(len as u32).to_be_bytes()[..]);
        let decoded = PeerMessageCodec::after_handshake().decode(&mut buffer);
        assert_eq!(decoded.is_ok(), accepted);
        if accepted {
            assert_eq!(decoded.unwrap(), None);
        }
    }

    #[rstest]
    fn test_unknown_id_is_skipped() {
        let mut buffer = BytesMut::from(&[0, 0, 0, 3, 20, 0, 1, 0, 0, 0, 1, 1][..]);
        let mut codec = PeerMessageCodec::after_handshake();
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(PeerFrame::Message(PeerMessage::Unknown { id: 20 }))
        );
        assert_eq!(
            codec.decode(&mut buffer).unwrap(),
            Some(PeerFrame::Message(PeerMessage::Unchoke))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_fragmented_socket_reads(handshake: PeerHandshake) {
        let stream = encode_stream(&handshake, &messages());
        let mut builder = tokio_test::io::Builder::new();
        for chunk in stream.chunks(11) {
            builder.read(chunk);
        }

        let mut frames = FramedRead::new(builder.build(), PeerMessageCodec::new());
        let mut count = 0;
        while let Some(frame) = frames.next().await {
            frame.unwrap();
            count += 1;
        }
        assert_eq!(count, 1 + messages().len());
    }
}
