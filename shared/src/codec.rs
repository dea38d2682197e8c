//! Fixed-size binary encoding of a [`StateRecord`].
//!
//! Wire version 2, 19 bytes, every multi-byte field big-endian:
//!
//! | Offset | Size | Field                   |
//! |--------|------|-------------------------|
//! | 0      | 2    | id (u16)                |
//! | 2      | 4    | position.x (f32)        |
//! | 6      | 4    | position.y (f32)        |
//! | 10     | 4    | position.z (f32)        |
//! | 14     | 2    | orientation.y (i16)     |
//! | 16     | 2    | orientation.w (i16)     |
//! | 18     | 1    | animation state (u8)    |
//!
//! The 15-byte version 1 layout (no vertical position) is not accepted.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::state::{AnimationState, Orientation, Position, StateRecord};

pub const FRAME_LEN: usize = 19;
pub const WIRE_VERSION: u8 = 2;

/// Orientation components travel as `round(component * 32767)`.
pub const ORIENTATION_SCALE: f32 = 32767.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed state record: expected 19 bytes, got {len}")]
    MalformedRecord { len: usize },

    #[error("unknown animation state byte {value}")]
    UnknownAnimationState { value: u8 },
}

/// Encodes a record into a 19-byte frame.
pub fn encode_update(record: &StateRecord) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_LEN);
    buf.put_u16(record.id);
    buf.put_f32(record.position.x);
    buf.put_f32(record.position.y);
    buf.put_f32(record.position.z);
    buf.put_i16(quantize(record.orientation.y));
    buf.put_i16(quantize(record.orientation.w));
    buf.put_u8(record.state.as_byte());
    buf.freeze()
}

/// Decodes a 19-byte frame. Any other length is a malformed record.
pub fn decode_update(frame: &[u8]) -> Result<StateRecord, CodecError> {
    if frame.len() != FRAME_LEN {
        return Err(CodecError::MalformedRecord { len: frame.len() });
    }

    let mut buf = frame;
    let id = buf.get_u16();
    let position = Position::new(buf.get_f32(), buf.get_f32(), buf.get_f32());
    let orientation = Orientation::new(dequantize(buf.get_i16()), dequantize(buf.get_i16()));
    let state = AnimationState::try_from(buf.get_u8())?;

    Ok(StateRecord {
        id,
        position,
        orientation,
        state,
    })
}

// Clamped so drift past unit length saturates instead of wrapping; NaN becomes 0.
fn quantize(component: f32) -> i16 {
    (component.clamp(-1.0, 1.0) * ORIENTATION_SCALE).round() as i16
}

fn dequantize(value: i16) -> f32 {
    value as f32 / ORIENTATION_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;

    const TOLERANCE: f32 = 1.0 / ORIENTATION_SCALE;

    fn sample_record() -> StateRecord {
        StateRecord {
            id: 1,
            position: Position::new(1.0, 2.0, 3.0),
            orientation: Orientation::new(0.5, 0.8),
            state: AnimationState::Running,
        }
    }

    #[test]
    fn test_encoded_length() {
        assert_eq!(encode_update(&sample_record()).len(), FRAME_LEN);
    }

    #[test]
    fn test_byte_layout_is_big_endian() {
        let frame = encode_update(&sample_record());

        assert_eq!(&frame[0..2], &1u16.to_be_bytes());
        assert_eq!(&frame[2..6], &1.0f32.to_be_bytes());
        assert_eq!(&frame[6..10], &2.0f32.to_be_bytes());
        assert_eq!(&frame[10..14], &3.0f32.to_be_bytes());
        assert_eq!(&frame[14..16], &16384i16.to_be_bytes());
        assert_eq!(&frame[16..18], &26214i16.to_be_bytes());
        assert_eq!(frame[18], 2);
    }

    #[test]
    fn test_roundtrip_sample() {
        let record = sample_record();
        let decoded = decode_update(&encode_update(&record)).unwrap();

        assert_eq!(decoded.id, 1);
        assert_eq!(decoded.position, record.position);
        assert_approx_eq!(decoded.orientation.y, 0.5, TOLERANCE);
        assert_approx_eq!(decoded.orientation.w, 0.8, TOLERANCE);
        assert_eq!(decoded.state, AnimationState::Running);
    }

    #[test]
    fn test_roundtrip_random_records() {
        let mut rng = rand::thread_rng();

        for _ in 0..1000 {
            let record = StateRecord {
                id: rng.gen(),
                position: Position::new(
                    rng.gen_range(-1.0e6..1.0e6),
                    rng.gen_range(-1.0e6..1.0e6),
                    rng.gen_range(-1.0e6..1.0e6),
                ),
                orientation: Orientation::new(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0)),
                state: AnimationState::ALL[rng.gen_range(0..AnimationState::ALL.len())],
            };

            let decoded = decode_update(&encode_update(&record)).unwrap();

            assert_eq!(decoded.id, record.id);
            assert_eq!(decoded.position, record.position);
            assert_eq!(decoded.state, record.state);
            assert!((decoded.orientation.y - record.orientation.y).abs() <= TOLERANCE);
            assert!((decoded.orientation.w - record.orientation.w).abs() <= TOLERANCE);
        }
    }

    #[test]
    fn test_position_extremes_are_exact() {
        let record = StateRecord {
            position: Position::new(f32::MAX, f32::MIN_POSITIVE, -0.0),
            ..StateRecord::new(u16::MAX)
        };
        let decoded = decode_update(&encode_update(&record)).unwrap();

        assert_eq!(decoded.id, u16::MAX);
        assert_eq!(decoded.position.x, f32::MAX);
        assert_eq!(decoded.position.y, f32::MIN_POSITIVE);
        assert!(decoded.position.z == 0.0 && decoded.position.z.is_sign_negative());
    }

    #[test]
    fn test_orientation_out_of_range_is_clamped() {
        let record = StateRecord {
            orientation: Orientation::new(1.0001, -1.5),
            ..StateRecord::new(3)
        };
        let frame = encode_update(&record);

        assert_eq!(&frame[14..16], &32767i16.to_be_bytes());
        assert_eq!(&frame[16..18], &(-32767i16).to_be_bytes());

        let decoded = decode_update(&frame).unwrap();
        assert_eq!(decoded.orientation.y, 1.0);
        assert_eq!(decoded.orientation.w, -1.0);
    }

    #[test]
    fn test_nan_orientation_quantizes_to_zero() {
        let record = StateRecord {
            orientation: Orientation::new(f32::NAN, 0.25),
            ..StateRecord::new(3)
        };
        let decoded = decode_update(&encode_update(&record)).unwrap();

        assert_eq!(decoded.orientation.y, 0.0);
        assert_approx_eq!(decoded.orientation.w, 0.25, TOLERANCE);
    }

    #[test]
    fn test_unknown_animation_state_byte() {
        let mut frame = encode_update(&sample_record()).to_vec();

        for value in 6..=u8::MAX {
            frame[18] = value;
            assert_eq!(
                decode_update(&frame),
                Err(CodecError::UnknownAnimationState { value })
            );
        }
    }

    #[test]
    fn test_arbitrary_bytes_before_state_decode() {
        let mut rng = rand::thread_rng();

        for _ in 0..1000 {
            let mut frame = [0u8; FRAME_LEN];
            rng.fill(&mut frame[..FRAME_LEN - 1]);
            frame[FRAME_LEN - 1] = rng.gen_range(0..6);

            assert!(decode_update(&frame).is_ok());
        }
    }

    #[test]
    fn test_wrong_length_is_malformed() {
        let frame = encode_update(&sample_record());

        assert_eq!(
            decode_update(&frame[..15]),
            Err(CodecError::MalformedRecord { len: 15 })
        );
        assert_eq!(decode_update(&[]), Err(CodecError::MalformedRecord { len: 0 }));

        let mut long = frame.to_vec();
        long.push(0);
        assert_eq!(
            decode_update(&long),
            Err(CodecError::MalformedRecord { len: 20 })
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CodecError::MalformedRecord { len: 4 }.to_string(),
            "malformed state record: expected 19 bytes, got 4"
        );
        assert_eq!(
            CodecError::UnknownAnimationState { value: 9 }.to_string(),
            "unknown animation state byte 9"
        );
    }
}
