//! Binary diff codec
//!
//! Wire layout (bit-exact, MSB first):
//!
//! ```text
//! header   : opcode=0 (3) | S width (5) | E width (5) | B width (5) | L width (5)
//!            | N width (5) | N (part count)                             | pad
//! full     : opcode=1 (3) | L | text                                       | pad
//! insert   : opcode=2 (3) | S | L | text                                   | pad
//! delete   : opcode=3 (3) | S | E                                          | pad
//! replace  : opcode=4 (3) | S | E | L | text                               | pad
//! cut      : opcode=5 (3) | S | E | B                                      | pad
//! paste    : opcode=6 (3) | S | B                                          | pad
//! ```
//!
//! Each width is the minimum number of bits holding the largest value the
//! field takes anywhere in the diff. Text is written as its encoded byte
//! length followed by the bytes. Every part is zero-padded to a byte
//! boundary. The header declares how many parts follow: a stream that ends
//! before the last of them is truncated, and bytes after it are rejected.
//! Operations are numbered from 1 in errors, the header being operation 0.
//!
//! The stored form prefixes one marker byte: `0x00` raw, `0x01` zlib. The
//! compressed form is only kept when it is strictly smaller.

pub mod bits;

use crate::constants::{MARKER_COMPRESSED, MARKER_UNCOMPRESSED, MAX_FIELD_WIDTH, OPCODE_BITS, WIDTH_FIELD_BITS};
use crate::core::config::{CodecConfig, TextCharset};
use crate::core::error::{DecodingError, EncodingError, Field};
use crate::delta::types::{CodecData, Diff, DiffPart, OpCode};
use crate::system::metrics::Metrics;
use bits::{BitReader, BitWriter};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tracing::trace;

/// Serializes diffs to and from their dense binary form
#[derive(Debug, Clone)]
pub struct DiffCodec {
    charset: TextCharset,
    compression: Option<Compression>,
}

impl DiffCodec {
    /// Create a codec from configuration
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            charset: config.charset,
            compression: config.compression.then(|| Compression::new(config.compression_level)),
        }
    }

    /// Configured charset
    pub fn charset(&self) -> TextCharset {
        self.charset
    }

    /// Encode a diff into its stored form (marker byte + payload)
    pub fn encode(&self, diff: &Diff) -> Result<Bytes, EncodingError> {
        let raw = self.encode_payload(diff)?;
        let metrics = Metrics::global();
        metrics.codec.diffs_encoded.inc();
        metrics.codec.raw_bytes.inc_by(raw.len() as u64);

        let stored = match self.compression {
            Some(level) => {
                let compressed = deflate(&raw, level)?;
                if compressed.len() < raw.len() {
                    with_marker(MARKER_COMPRESSED, &compressed)
                } else {
                    trace!(raw = raw.len(), compressed = compressed.len(), "compression did not help, storing raw");
                    metrics.codec.compression_fallbacks.inc();
                    with_marker(MARKER_UNCOMPRESSED, &raw)
                }
            }
            None => with_marker(MARKER_UNCOMPRESSED, &raw),
        };

        metrics.codec.stored_bytes.inc_by(stored.len() as u64);
        Ok(stored)
    }

    /// Encode a diff without attempting compression
    pub fn encode_uncompressed(&self, diff: &Diff) -> Result<Bytes, EncodingError> {
        Ok(with_marker(MARKER_UNCOMPRESSED, &self.encode_payload(diff)?))
    }

    /// Decode a stored diff, honouring its marker byte
    pub fn decode(&self, stored: &[u8]) -> Result<Diff, DecodingError> {
        let (&marker, payload) = stored.split_first().ok_or(DecodingError::MissingHeader)?;
        Metrics::global().codec.diffs_decoded.inc();
        match marker {
            MARKER_UNCOMPRESSED => self.decode_payload(payload),
            MARKER_COMPRESSED => {
                let mut raw = Vec::with_capacity(payload.len() * 2);
                ZlibDecoder::new(payload).read_to_end(&mut raw)?;
                self.decode_payload(&raw)
            }
            other => Err(DecodingError::UnknownMarker(other)),
        }
    }

    /// Decode a stored diff that was written without compression
    pub fn decode_uncompressed(&self, stored: &[u8]) -> Result<Diff, DecodingError> {
        match stored.split_first() {
            Some((&MARKER_UNCOMPRESSED, payload)) => self.decode_payload(payload),
            Some((&other, _)) => Err(DecodingError::UnknownMarker(other)),
            None => Err(DecodingError::MissingHeader),
        }
    }

    /// Encode the bit-packed payload without marker byte
    pub fn encode_payload(&self, diff: &Diff) -> Result<Vec<u8>, EncodingError> {
        let encoded_texts = diff
            .parts
            .iter()
            .enumerate()
            .map(|(index, part)| part.text().map(|t| self.encode_text(t, index + 1)).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let widths = CodecData::for_parts(&diff.parts, &encoded_texts)?;
        let count_width = width_for(Field::PartCount, diff.parts.len() as u64, 0)?;
        let mut writer = BitWriter::with_capacity(diff.byte_size_estimate());

        writer.write(OpCode::Header as u32, OPCODE_BITS);
        writer.write(widths.start_width, WIDTH_FIELD_BITS);
        writer.write(widths.length_width, WIDTH_FIELD_BITS);
        writer.write(widths.block_width, WIDTH_FIELD_BITS);
        writer.write(widths.text_width, WIDTH_FIELD_BITS);
        writer.write(count_width, WIDTH_FIELD_BITS);
        writer.write(diff.parts.len() as u32, count_width);
        writer.align();

        for (part, text) in diff.parts.iter().zip(&encoded_texts) {
            writer.write(part.opcode() as u32, OPCODE_BITS);
            match part {
                DiffPart::FullRevision { .. } => {}
                DiffPart::Insert { start, .. } => writer.write(*start as u32, widths.start_width),
                DiffPart::Delete { start, length } | DiffPart::Replace { start, length, .. } => {
                    writer.write(*start as u32, widths.start_width);
                    writer.write(*length as u32, widths.length_width);
                }
                DiffPart::Cut { start, length, block_id } => {
                    writer.write(*start as u32, widths.start_width);
                    writer.write(*length as u32, widths.length_width);
                    writer.write(*block_id, widths.block_width);
                }
                DiffPart::Paste { start, block_id } => {
                    writer.write(*start as u32, widths.start_width);
                    writer.write(*block_id, widths.block_width);
                }
            }
            if let Some(bytes) = text {
                writer.write(bytes.len() as u32, widths.text_width);
                for &byte in bytes {
                    writer.write_byte(byte);
                }
            }
            writer.align();
        }

        Ok(writer.finish())
    }

    /// Decode a bit-packed payload without marker byte
    pub fn decode_payload(&self, payload: &[u8]) -> Result<Diff, DecodingError> {
        let mut reader = BitReader::new(payload);
        if payload.is_empty() {
            return Err(DecodingError::MissingHeader);
        }

        let code = reader.read(OPCODE_BITS)? as u8;
        if code != OpCode::Header as u8 {
            return Err(DecodingError::MissingHeader);
        }
        let widths = CodecData {
            start_width: reader.read(WIDTH_FIELD_BITS)?,
            length_width: reader.read(WIDTH_FIELD_BITS)?,
            block_width: reader.read(WIDTH_FIELD_BITS)?,
            text_width: reader.read(WIDTH_FIELD_BITS)?,
        };
        let count_width = reader.read(WIDTH_FIELD_BITS)?;
        let count = reader.read(count_width)? as usize;
        reader.align()?;

        // Each part occupies at least one byte
        let mut parts = Vec::with_capacity(count.min(reader.remaining_bits() / 8));
        for operation in 1..=count {
            reader.set_operation(operation);

            let code = reader.read(OPCODE_BITS)? as u8;
            let part = match OpCode::from_code(code) {
                Some(OpCode::FullRevision) => DiffPart::FullRevision {
                    text: self.read_text(&mut reader, widths.text_width, operation)?,
                },
                Some(OpCode::Insert) => {
                    let start = reader.read(widths.start_width)? as usize;
                    let text = self.read_text(&mut reader, widths.text_width, operation)?;
                    DiffPart::Insert { start, text }
                }
                Some(OpCode::Delete) => DiffPart::Delete {
                    start: reader.read(widths.start_width)? as usize,
                    length: reader.read(widths.length_width)? as usize,
                },
                Some(OpCode::Replace) => {
                    let start = reader.read(widths.start_width)? as usize;
                    let length = reader.read(widths.length_width)? as usize;
                    let text = self.read_text(&mut reader, widths.text_width, operation)?;
                    DiffPart::Replace { start, length, text }
                }
                Some(OpCode::Cut) => DiffPart::Cut {
                    start: reader.read(widths.start_width)? as usize,
                    length: reader.read(widths.length_width)? as usize,
                    block_id: reader.read(widths.block_width)?,
                },
                Some(OpCode::Paste) => DiffPart::Paste {
                    start: reader.read(widths.start_width)? as usize,
                    block_id: reader.read(widths.block_width)?,
                },
                Some(OpCode::Header) | None => return Err(DecodingError::InvalidOpcode { code, operation }),
            };
            reader.align()?;
            parts.push(part);
        }

        if !reader.is_at_end() {
            return Err(DecodingError::TrailingBytes {
                operation: count,
                bytes: reader.remaining_bits() / 8,
            });
        }

        Ok(Diff {
            parts,
            codec: Some(widths),
        })
    }

    fn encode_text(&self, text: &str, operation: usize) -> Result<Vec<u8>, EncodingError> {
        match self.charset {
            TextCharset::Utf8 => Ok(text.as_bytes().to_vec()),
            TextCharset::Latin1 => text
                .chars()
                .map(|ch| {
                    u8::try_from(u32::from(ch)).map_err(|_| EncodingError::Unrepresentable {
                        ch,
                        charset: self.charset.name(),
                        operation,
                    })
                })
                .collect(),
        }
    }

    fn read_text(&self, reader: &mut BitReader<'_>, width: u32, operation: usize) -> Result<String, DecodingError> {
        let len = reader.read(width)? as usize;
        if reader.remaining_bits() < len * 8 {
            return Err(DecodingError::UnexpectedEnd { operation });
        }
        let mut bytes = Vec::with_capacity(len);
        for _ in 0..len {
            bytes.push(reader.read_byte()?);
        }
        match self.charset {
            TextCharset::Utf8 => String::from_utf8(bytes).map_err(|_| DecodingError::InvalidText {
                charset: self.charset.name(),
                operation,
            }),
            TextCharset::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }
}

impl CodecData {
    /// Compute the minimal widths for a diff under `charset`
    pub fn for_diff(diff: &Diff, charset: TextCharset) -> Result<Self, EncodingError> {
        let codec = DiffCodec {
            charset,
            compression: None,
        };
        let texts = diff
            .parts
            .iter()
            .enumerate()
            .map(|(index, part)| part.text().map(|t| codec.encode_text(t, index + 1)).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        Self::for_parts(&diff.parts, &texts)
    }

    fn for_parts(parts: &[DiffPart], texts: &[Option<Vec<u8>>]) -> Result<Self, EncodingError> {
        let mut widths = CodecData::default();
        for (index, (part, text)) in parts.iter().zip(texts).enumerate() {
            let operation = index + 1;
            if let Some(start) = part.start() {
                widths.start_width = widths.start_width.max(width_for(Field::Start, start as u64, operation)?);
            }
            if let Some(length) = part.length() {
                widths.length_width = widths.length_width.max(width_for(Field::Length, length as u64, operation)?);
            }
            if let Some(block_id) = part.block_id() {
                widths.block_width = widths.block_width.max(width_for(Field::BlockId, u64::from(block_id), operation)?);
            }
            if let Some(bytes) = text {
                widths.text_width = widths.text_width.max(width_for(Field::TextLength, bytes.len() as u64, operation)?);
            }
        }
        Ok(widths)
    }
}

/// Minimum number of bits representing `value`; 0 needs none.
fn width_for(field: Field, value: u64, operation: usize) -> Result<u32, EncodingError> {
    let width = u64::BITS - value.leading_zeros();
    if width > MAX_FIELD_WIDTH {
        return Err(EncodingError::FieldTooWide { field, value, operation });
    }
    Ok(width)
}

fn deflate(raw: &[u8], level: Compression) -> Result<Vec<u8>, EncodingError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), level);
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

fn with_marker(marker: u8, payload: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(marker);
    out.extend_from_slice(payload);
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codec(compression: bool, charset: TextCharset) -> DiffCodec {
        DiffCodec::new(&CodecConfig {
            compression,
            compression_level: 6,
            charset,
        })
    }

    fn sample_diff() -> Diff {
        Diff::from_parts(vec![
            DiffPart::Replace { start: 2, length: 3, text: "XYZ".into() },
            DiffPart::Cut { start: 10, length: 40, block_id: 3 },
            DiffPart::Insert { start: 6, text: "Q".into() },
            DiffPart::Paste { start: 1000, block_id: 3 },
            DiffPart::Delete { start: 0, length: 1 },
        ])
    }

    #[test]
    fn test_header_layout() {
        let diff = Diff::from_parts(vec![DiffPart::Delete { start: 5, length: 1 }]);
        let payload = codec(false, TextCharset::Utf8).encode_payload(&diff).unwrap();

        // header: 000 | 00011 | 00001 | 00000 | 00000 | 00001 | 1 | pad(3)
        assert_eq!(&payload[..4], &[0b0000_0011, 0b0000_1000, 0b0000_0000, 0b0001_1000]);
        // delete: 011 | 101 | 1 | pad(1)
        assert_eq!(&payload[4..], &[0b0111_0110]);
    }

    #[test]
    fn test_widths_are_minimal() {
        let data = CodecData::for_diff(&sample_diff(), TextCharset::Utf8).unwrap();
        assert_eq!(
            data,
            CodecData {
                start_width: 10,
                length_width: 6,
                block_width: 2,
                text_width: 2,
            }
        );
    }

    #[test]
    fn test_round_trip_both_paths() {
        let diff = sample_diff();
        for compression in [true, false] {
            let c = codec(compression, TextCharset::Utf8);
            let decoded = c.decode(&c.encode(&diff).unwrap()).unwrap();
            assert_eq!(decoded, diff);
            assert_eq!(decoded.codec.unwrap().start_width, 10);

            let raw = c.encode_uncompressed(&diff).unwrap();
            assert_eq!(c.decode(&raw).unwrap(), diff);
            assert_eq!(c.decode_uncompressed(&raw).unwrap(), diff);
        }
    }

    #[test]
    fn test_compression_kept_only_when_smaller() {
        let c = codec(true, TextCharset::Utf8);

        let tiny = Diff::from_parts(vec![DiffPart::Delete { start: 1, length: 1 }]);
        assert_eq!(c.encode(&tiny).unwrap()[0], MARKER_UNCOMPRESSED);

        let repetitive = Diff::full_revision("{{cite web}} ".repeat(200));
        let stored = c.encode(&repetitive).unwrap();
        assert_eq!(stored[0], MARKER_COMPRESSED);
        assert!(stored.len() < c.encode_uncompressed(&repetitive).unwrap().len());
        assert_eq!(c.decode(&stored).unwrap(), repetitive);
    }

    #[test]
    fn test_width_boundaries() {
        let c = codec(false, TextCharset::Utf8);
        for k in 0..=31u32 {
            let below = (1u64 << k) - 1;
            let diff = Diff::from_parts(vec![DiffPart::Delete { start: below as usize, length: 0 }]);
            let decoded = c.decode(&c.encode(&diff).unwrap()).unwrap();
            assert_eq!(decoded, diff);
            assert_eq!(decoded.codec.unwrap().start_width, k);

            let at = 1u64 << k;
            let diff = Diff::from_parts(vec![DiffPart::Delete { start: at as usize, length: 0 }]);
            if k < 31 {
                let decoded = c.decode(&c.encode(&diff).unwrap()).unwrap();
                assert_eq!(decoded, diff);
                assert_eq!(decoded.codec.unwrap().start_width, k + 1);
            } else {
                let err = c.encode(&diff).unwrap_err();
                assert!(matches!(err, EncodingError::FieldTooWide { field: Field::Start, .. }));
            }
        }
    }

    #[test]
    fn test_empty_and_full_revision() {
        let c = codec(false, TextCharset::Utf8);
        let empty = Diff::new();
        let stored = c.encode(&empty).unwrap();
        // marker + 28 header bits, zero parts need no count bits
        assert_eq!(stored.len(), 5);
        assert_eq!(c.decode(&stored).unwrap(), empty);

        let full = Diff::full_revision("Zürich – ünïcödé");
        assert_eq!(c.decode(&c.encode(&full).unwrap()).unwrap(), full);
    }

    #[test]
    fn test_latin1_charset() {
        let c = codec(false, TextCharset::Latin1);
        let diff = Diff::full_revision("café");
        let payload = c.encode_payload(&diff).unwrap();
        // header (4) + opcode/length byte + 4 text bytes, text length 4 needs 3 bits
        assert_eq!(payload.len(), 4 + 5);
        assert_eq!(c.decode_payload(&payload).unwrap(), diff);

        let err = c.encode(&Diff::full_revision("€")).unwrap_err();
        assert!(matches!(err, EncodingError::Unrepresentable { ch: '€', .. }));
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let c = codec(false, TextCharset::Utf8);
        let stored = c.encode(&sample_diff()).unwrap();
        assert_eq!(stored[0], MARKER_UNCOMPRESSED);

        // Every cut, including those landing between two parts
        for len in 2..stored.len() {
            let result = c.decode(&stored[..len]);
            assert!(
                matches!(result, Err(DecodingError::UnexpectedEnd { .. })),
                "prefix of {} bytes decoded as {:?}",
                len,
                result
            );
        }

        // Cut exactly after the fourth of five parts
        let payload = &stored[1..];
        let widths = CodecData::for_diff(&sample_diff(), TextCharset::Utf8).unwrap();
        // delete: opcode (3) + S + E, padded
        let end = payload.len() - (OPCODE_BITS + widths.start_width + widths.length_width).div_ceil(8) as usize;
        assert!(matches!(
            c.decode_payload(&payload[..end]),
            Err(DecodingError::UnexpectedEnd { operation: 5 })
        ));

        let mut padded = stored.to_vec();
        padded.push(0);
        assert!(matches!(
            c.decode(&padded),
            Err(DecodingError::TrailingBytes { operation: 5, bytes: 1 })
        ));

        assert!(matches!(c.decode(&[]), Err(DecodingError::MissingHeader)));
        assert!(matches!(c.decode(&[MARKER_UNCOMPRESSED]), Err(DecodingError::MissingHeader)));
        assert!(matches!(c.decode(&[0x07, 0x00]), Err(DecodingError::UnknownMarker(0x07))));
    }

    #[test]
    fn test_invalid_opcodes_rejected() {
        let c = codec(false, TextCharset::Utf8);
        // All widths zero: the single part is one opcode byte
        let mut payload = c.encode_payload(&Diff::from_parts(vec![DiffPart::Delete { start: 0, length: 0 }])).unwrap();

        // Opcode 7 after the header
        let last = payload.len() - 1;
        payload[last] = 0b1110_0000;
        assert!(matches!(
            c.decode_payload(&payload),
            Err(DecodingError::InvalidOpcode { code: 7, operation: 1 })
        ));

        // A second header
        payload[last] = 0;
        assert!(matches!(
            c.decode_payload(&payload),
            Err(DecodingError::InvalidOpcode { code: 0, operation: 1 })
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let c = codec(false, TextCharset::Utf8);
        // 16 bytes of text: opcode and length fill exactly one byte
        let mut payload = c.encode_payload(&Diff::full_revision("abcdefghijklmnop")).unwrap();
        let last = payload.len() - 1;
        payload[last] = 0xFF;
        assert!(matches!(c.decode_payload(&payload), Err(DecodingError::InvalidText { operation: 1, .. })));
    }

    fn part_strategy() -> impl Strategy<Value = DiffPart> {
        prop_oneof![
            ".{0,30}".prop_map(|text| DiffPart::FullRevision { text }),
            (0usize..100_000, ".{0,20}").prop_map(|(start, text)| DiffPart::Insert { start, text }),
            (0usize..100_000, 0usize..5_000).prop_map(|(start, length)| DiffPart::Delete { start, length }),
            (0usize..100_000, 0usize..5_000, ".{0,20}")
                .prop_map(|(start, length, text)| DiffPart::Replace { start, length, text }),
            (0usize..100_000, 0usize..5_000, 0u32..300)
                .prop_map(|(start, length, block_id)| DiffPart::Cut { start, length, block_id }),
            (0usize..100_000, 0u32..300).prop_map(|(start, block_id)| DiffPart::Paste { start, block_id }),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_encode_is_identity(parts in proptest::collection::vec(part_strategy(), 0..20)) {
            let diff = Diff::from_parts(parts);
            for compression in [true, false] {
                let c = codec(compression, TextCharset::Utf8);
                let decoded = c.decode(&c.encode(&diff).unwrap()).unwrap();
                prop_assert_eq!(&decoded, &diff);
                prop_assert_eq!(decoded.codec, Some(CodecData::for_diff(&diff, TextCharset::Utf8).unwrap()));
            }
        }
    }
}
