//! The six-opcode swarm message schema. Framing and byte-level decoding of
//! fields into `(peer_handle, opcode, fields)` tuples is the external
//! transport's job; this module only models the typed fields each opcode
//! carries and converts them to/from that abstraction.

use swarmfile_core::{PieceHash, TopHash};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Bitmap = 0,
    Interested = 1,
    Choke = 2,
    Have = 3,
    Request = 4,
    Cancel = 5,
    Piece = 6,
}

impl Opcode {
    pub const fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Opcode::Bitmap),
            1 => Some(Opcode::Interested),
            2 => Some(Opcode::Choke),
            3 => Some(Opcode::Have),
            4 => Some(Opcode::Request),
            5 => Some(Opcode::Cancel),
            6 => Some(Opcode::Piece),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FieldError {
    #[error("missing field {0}")]
    Missing(&'static str),
    #[error("wrong field type for {0}")]
    WrongType(&'static str),
    #[error(transparent)]
    Hash(#[from] swarmfile_core::Error),
}

/// One field of a decoded wire message, as handed over by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Bytes(Vec<u8>),
    Uint(u64),
}

impl Field {
    pub fn into_bytes(self) -> Result<Vec<u8>, FieldError> {
        match self {
            Field::Bytes(b) => Ok(b),
            Field::Uint(_) => Err(FieldError::WrongType("bytes")),
        }
    }

    pub fn into_uint(self) -> Result<u64, FieldError> {
        match self {
            Field::Uint(n) => Ok(n),
            Field::Bytes(_) => Err(FieldError::WrongType("uint")),
        }
    }
}

/// A named, ordered set of fields for one message, in table order.
pub type Fields = Vec<(&'static str, Field)>;

fn take(fields: &mut Fields, name: &'static str) -> Result<Field, FieldError> {
    let idx = fields
        .iter()
        .position(|(n, _)| *n == name)
        .ok_or(FieldError::Missing(name))?;
    Ok(fields.remove(idx).1)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Bitmap {
        tophash: TopHash,
        bitmap: Vec<u8>,
        is_reply: bool,
    },
    Interested {
        tophash: TopHash,
        interested: bool,
    },
    Choke {
        tophash: TopHash,
        choked: bool,
    },
    Have {
        tophash: TopHash,
        piece_no: u32,
    },
    Request {
        tophash: TopHash,
        piece_no: u32,
        offset: u32,
        length: u32,
    },
    Cancel {
        tophash: TopHash,
        piece_no: u32,
        offset: u32,
        length: u32,
    },
    Piece {
        piece_hash: PieceHash,
        offset: u32,
        data: Vec<u8>,
    },
}

impl Message {
    pub const fn opcode(&self) -> Opcode {
        match self {
            Message::Bitmap { .. } => Opcode::Bitmap,
            Message::Interested { .. } => Opcode::Interested,
            Message::Choke { .. } => Opcode::Choke,
            Message::Have { .. } => Opcode::Have,
            Message::Request { .. } => Opcode::Request,
            Message::Cancel { .. } => Opcode::Cancel,
            Message::Piece { .. } => Opcode::Piece,
        }
    }

    /// Tophash of the session this message concerns, where applicable.
    /// PIECE messages carry a piece hash instead (they are routed by
    /// `PendingPiece`, which may span several sessions).
    pub fn tophash(&self) -> Option<&TopHash> {
        match self {
            Message::Bitmap { tophash, .. }
            | Message::Interested { tophash, .. }
            | Message::Choke { tophash, .. }
            | Message::Have { tophash, .. }
            | Message::Request { tophash, .. }
            | Message::Cancel { tophash, .. } => Some(tophash),
            Message::Piece { .. } => None,
        }
    }

    pub fn into_fields(self) -> Fields {
        match self {
            Message::Bitmap {
                tophash,
                bitmap,
                is_reply,
            } => vec![
                ("tophash", Field::Bytes(tophash.to_bytes())),
                ("bitmap", Field::Bytes(bitmap)),
                ("is_reply", Field::Uint(is_reply as u64)),
            ],
            Message::Interested { tophash, interested } => vec![
                ("tophash", Field::Bytes(tophash.to_bytes())),
                ("interested", Field::Uint(interested as u64)),
            ],
            Message::Choke { tophash, choked } => vec![
                ("tophash", Field::Bytes(tophash.to_bytes())),
                ("choked", Field::Uint(choked as u64)),
            ],
            Message::Have { tophash, piece_no } => vec![
                ("tophash", Field::Bytes(tophash.to_bytes())),
                ("piece_no", Field::Uint(piece_no as u64)),
            ],
            Message::Request {
                tophash,
                piece_no,
                offset,
                length,
            } => vec![
                ("tophash", Field::Bytes(tophash.to_bytes())),
                ("piece_no", Field::Uint(piece_no as u64)),
                ("offset", Field::Uint(offset as u64)),
                ("length", Field::Uint(length as u64)),
            ],
            Message::Cancel {
                tophash,
                piece_no,
                offset,
                length,
            } => vec![
                ("tophash", Field::Bytes(tophash.to_bytes())),
                ("piece_no", Field::Uint(piece_no as u64)),
                ("offset", Field::Uint(offset as u64)),
                ("length", Field::Uint(length as u64)),
            ],
            Message::Piece {
                piece_hash,
                offset,
                data,
            } => vec![
                ("piecehash", Field::Bytes(piece_hash.to_bytes())),
                ("offset", Field::Uint(offset as u64)),
                ("data", Field::Bytes(data)),
            ],
        }
    }

    pub fn from_fields(opcode: Opcode, mut fields: Fields) -> Result<Self, FieldError> {
        Ok(match opcode {
            Opcode::Bitmap => Message::Bitmap {
                tophash: TopHash::from_bytes(&take(&mut fields, "tophash")?.into_bytes()?)?,
                bitmap: take(&mut fields, "bitmap")?.into_bytes()?,
                is_reply: take(&mut fields, "is_reply")?.into_uint()? != 0,
            },
            Opcode::Interested => Message::Interested {
                tophash: TopHash::from_bytes(&take(&mut fields, "tophash")?.into_bytes()?)?,
                interested: take(&mut fields, "interested")?.into_uint()? != 0,
            },
            Opcode::Choke => Message::Choke {
                tophash: TopHash::from_bytes(&take(&mut fields, "tophash")?.into_bytes()?)?,
                choked: take(&mut fields, "choked")?.into_uint()? != 0,
            },
            Opcode::Have => Message::Have {
                tophash: TopHash::from_bytes(&take(&mut fields, "tophash")?.into_bytes()?)?,
                piece_no: take(&mut fields, "piece_no")?.into_uint()? as u32,
            },
            Opcode::Request => Message::Request {
                tophash: TopHash::from_bytes(&take(&mut fields, "tophash")?.into_bytes()?)?,
                piece_no: take(&mut fields, "piece_no")?.into_uint()? as u32,
                offset: take(&mut fields, "offset")?.into_uint()? as u32,
                length: take(&mut fields, "length")?.into_uint()? as u32,
            },
            Opcode::Cancel => Message::Cancel {
                tophash: TopHash::from_bytes(&take(&mut fields, "tophash")?.into_bytes()?)?,
                piece_no: take(&mut fields, "piece_no")?.into_uint()? as u32,
                offset: take(&mut fields, "offset")?.into_uint()? as u32,
                length: take(&mut fields, "length")?.into_uint()? as u32,
            },
            Opcode::Piece => Message::Piece {
                piece_hash: PieceHash::from_bytes(&take(&mut fields, "piecehash")?.into_bytes()?)?,
                offset: take(&mut fields, "offset")?.into_uint()? as u32,
                data: take(&mut fields, "data")?.into_bytes()?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tophash() -> TopHash {
        TopHash::of(b"some metainfo bytes")
    }

    #[test]
    fn test_bitmap_field_roundtrip() {
        let msg = Message::Bitmap {
            tophash: tophash(),
            bitmap: vec![0x81, 0x80, 0x80],
            is_reply: true,
        };
        let fields = msg.clone().into_fields();
        let decoded = Message::from_fields(Opcode::Bitmap, fields).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_request_field_roundtrip() {
        let msg = Message::Request {
            tophash: tophash(),
            piece_no: 3,
            offset: 1024,
            length: 16384,
        };
        let fields = msg.clone().into_fields();
        let decoded = Message::from_fields(Opcode::Request, fields).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_piece_field_roundtrip_uses_piece_hash_not_tophash() {
        let msg = Message::Piece {
            piece_hash: PieceHash::of(b"piece bytes"),
            offset: 0,
            data: b"piece bytes".to_vec(),
        };
        assert!(msg.tophash().is_none());
        let fields = msg.clone().into_fields();
        let decoded = Message::from_fields(Opcode::Piece, fields).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_missing_field_is_error() {
        let fields: Fields = vec![("tophash", Field::Bytes(tophash().to_bytes()))];
        assert!(Message::from_fields(Opcode::Interested, fields).is_err());
    }

    #[test]
    fn test_opcode_values_match_table() {
        assert_eq!(Opcode::Bitmap as u8, 0);
        assert_eq!(Opcode::Interested as u8, 1);
        assert_eq!(Opcode::Choke as u8, 2);
        assert_eq!(Opcode::Have as u8, 3);
        assert_eq!(Opcode::Request as u8, 4);
        assert_eq!(Opcode::Cancel as u8, 5);
        assert_eq!(Opcode::Piece as u8, 6);
    }
}
