use std::str;

use crate::error::{Result, TftpError};
use crate::{DEF_BLOCK_SIZE, MAX_PACKET_SIZE};

pub const OP_RRQ: u16 = 1;
pub const OP_WRQ: u16 = 2;
pub const OP_DATA: u16 = 3;
pub const OP_ACK: u16 = 4;
pub const OP_ERROR: u16 = 5;

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    RRQ { filename: String, mode: String },
    WRQ { filename: String, mode: String },
    DATA { block: u16, data: Vec<u8> },
    ACK(u16),
    ERROR { code: u16, msg: String },
}

impl TftpPacket {
    pub fn opcode(&self) -> u16 {
        match self {
            TftpPacket::RRQ { .. } => OP_RRQ,
            TftpPacket::WRQ { .. } => OP_WRQ,
            TftpPacket::DATA { .. } => OP_DATA,
            TftpPacket::ACK(_) => OP_ACK,
            TftpPacket::ERROR { .. } => OP_ERROR,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TftpPacket::RRQ { .. } => "RRQ",
            TftpPacket::WRQ { .. } => "WRQ",
            TftpPacket::DATA { .. } => "DATA",
            TftpPacket::ACK(_) => "ACK",
            TftpPacket::ERROR { .. } => "ERROR",
        }
    }

    /// Encodes the packet into its wire form.
    ///
    /// Requests need non-empty, NUL-free filename and mode and must fit in
    /// one datagram; DATA payloads are capped at one block.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut bytes: Vec<u8> = Vec::with_capacity(4);
        bytes.extend_from_slice(&self.opcode().to_be_bytes());

        match self {
            TftpPacket::RRQ { filename, mode } | TftpPacket::WRQ { filename, mode } => {
                check_cstr("filename", filename)?;
                check_cstr("mode", mode)?;
                let len = 2 + filename.len() + 1 + mode.len() + 1;
                if len > MAX_PACKET_SIZE {
                    return Err(TftpError::Encoding(format!(
                        "request is {len} bytes, limit is {MAX_PACKET_SIZE}"
                    )));
                }
                bytes.extend_from_slice(filename.as_bytes());
                bytes.push(0);
                bytes.extend_from_slice(mode.as_bytes());
                bytes.push(0);
            }
            TftpPacket::DATA { block, data } => {
                if data.len() > usize::from(DEF_BLOCK_SIZE) {
                    return Err(TftpError::Encoding(format!(
                        "data block of {} bytes exceeds {DEF_BLOCK_SIZE}",
                        data.len()
                    )));
                }
                bytes.extend_from_slice(&block.to_be_bytes());
                bytes.extend_from_slice(data);
            }
            TftpPacket::ACK(block) => {
                bytes.extend_from_slice(&block.to_be_bytes());
            }
            TftpPacket::ERROR { code, msg } => {
                if msg.as_bytes().contains(&0) {
                    return Err(TftpError::Encoding("error message contains NUL".into()));
                }
                bytes.extend_from_slice(&code.to_be_bytes());
                // Keep the message inside one datagram
                let room = MAX_PACKET_SIZE - 5;
                let mut end = msg.len().min(room);
                while !msg.is_char_boundary(end) {
                    end -= 1;
                }
                bytes.extend_from_slice(&msg.as_bytes()[..end]);
                bytes.push(0);
            }
        }
        Ok(bytes)
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(TftpError::Malformed(format!(
                "packet length {} too short",
                buf.len()
            )));
        }

        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let pkt = match opcode {
            OP_RRQ | OP_WRQ => {
                let filename = read_cstr(&buf[2..])?;
                let mode = read_cstr(&buf[2 + filename.len() + 1..])?;
                if filename.is_empty() || mode.is_empty() {
                    return Err(TftpError::Malformed("empty request field".into()));
                }
                // Anything after the mode (RFC 2347 options) is ignored
                if opcode == OP_RRQ {
                    TftpPacket::RRQ { filename, mode }
                } else {
                    TftpPacket::WRQ { filename, mode }
                }
            }
            OP_DATA => {
                let block = u16::from_be_bytes([buf[2], buf[3]]);
                let data = &buf[4..];
                if data.len() > usize::from(DEF_BLOCK_SIZE) {
                    return Err(TftpError::Malformed(format!(
                        "data block of {} bytes exceeds {DEF_BLOCK_SIZE}",
                        data.len()
                    )));
                }
                TftpPacket::DATA {
                    block,
                    data: data.to_vec(),
                }
            }
            OP_ACK => TftpPacket::ACK(u16::from_be_bytes([buf[2], buf[3]])),
            OP_ERROR => {
                let code = u16::from_be_bytes([buf[2], buf[3]]);
                let raw = &buf[4..];
                let end = raw
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or_else(|| TftpError::Malformed("missing error message terminator".into()))?;
                let msg = String::from_utf8_lossy(&raw[..end]).into_owned();

                TftpPacket::ERROR { code, msg }
            }
            _ => {
                return Err(TftpError::Malformed(format!("invalid opcode: {opcode}")));
            }
        };

        Ok(pkt)
    }
}

fn check_cstr(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(TftpError::Encoding(format!("{field} is empty")));
    }
    if value.as_bytes().contains(&0) {
        return Err(TftpError::Encoding(format!("{field} contains NUL")));
    }
    Ok(())
}

// Reads a NUL-terminated string
fn read_cstr(buf: &[u8]) -> Result<String> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| TftpError::Malformed("missing cstr terminator".into()))?;
    let s = str::from_utf8(&buf[..pos])
        .map_err(|_| TftpError::Malformed("invalid cstr encoding".into()))?
        .to_string();
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rrq_wire_layout() {
        let pkt = TftpPacket::RRQ {
            filename: "f".into(),
            mode: "octet".into(),
        };
        assert_eq!(pkt.serialize().unwrap(), b"\x00\x01f\x00octet\x00");
    }

    #[test]
    fn data_and_ack_wire_layout() {
        let data = TftpPacket::DATA {
            block: 0x0102,
            data: vec![0xaa, 0xbb],
        };
        assert_eq!(data.serialize().unwrap(), [0u8, 3, 1, 2, 0xaa, 0xbb]);
        assert_eq!(TftpPacket::ACK(258).serialize().unwrap(), [0u8, 4, 1, 2]);
    }

    #[test]
    fn error_wire_layout() {
        let pkt = TftpPacket::ERROR {
            code: 1,
            msg: "File not found".into(),
        };
        let mut expected = vec![0, 5, 0, 1];
        expected.extend_from_slice(b"File not found\0");
        assert_eq!(pkt.serialize().unwrap(), expected);
    }

    #[test]
    fn empty_or_oversized_request_fails() {
        let empty = TftpPacket::WRQ {
            filename: String::new(),
            mode: "octet".into(),
        };
        assert!(matches!(empty.serialize(), Err(TftpError::Encoding(_))));

        let long = TftpPacket::RRQ {
            filename: "x".repeat(MAX_PACKET_SIZE),
            mode: "octet".into(),
        };
        assert!(matches!(long.serialize(), Err(TftpError::Encoding(_))));

        let nul = TftpPacket::RRQ {
            filename: "a\0b".into(),
            mode: "octet".into(),
        };
        assert!(matches!(nul.serialize(), Err(TftpError::Encoding(_))));
    }

    #[test]
    fn rejects_short_and_unknown() {
        for buf in [&b""[..], &[0, 4, 0][..], &[0, 3][..]] {
            assert!(matches!(
                TftpPacket::deserialize(buf),
                Err(TftpError::Malformed(_))
            ));
        }
        assert!(matches!(
            TftpPacket::deserialize(&[0, 9, 0, 0]),
            Err(TftpError::Malformed(_))
        ));
        // OACK is not part of this client's vocabulary
        assert!(TftpPacket::deserialize(b"\x00\x06blksize\x001024\x00").is_err());
    }

    #[test]
    fn rejects_unterminated_fields() {
        assert!(TftpPacket::deserialize(b"\x00\x01file\x00octet").is_err());
        assert!(TftpPacket::deserialize(b"\x00\x05\x00\x01oops").is_err());
    }

    #[test]
    fn rejects_oversized_data() {
        let mut buf = vec![0u8, 3, 0, 1];
        buf.extend(std::iter::repeat(7).take(usize::from(DEF_BLOCK_SIZE) + 1));
        assert!(matches!(
            TftpPacket::deserialize(&buf),
            Err(TftpError::Malformed(_))
        ));
    }

    #[test]
    fn empty_data_block_decodes() {
        assert_eq!(
            TftpPacket::deserialize(&[0, 3, 0, 7]).unwrap(),
            TftpPacket::DATA {
                block: 7,
                data: vec![]
            }
        );
    }

    #[test]
    fn request_options_are_ignored() {
        let pkt = TftpPacket::deserialize(b"\x00\x02a.bin\x00octet\x00tsize\x000\x00").unwrap();
        assert_eq!(
            pkt,
            TftpPacket::WRQ {
                filename: "a.bin".into(),
                mode: "octet".into()
            }
        );
    }

    fn cstr() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9._/-]{1,64}"
    }

    fn packet() -> impl Strategy<Value = TftpPacket> {
        prop_oneof![
            (cstr(), cstr()).prop_map(|(filename, mode)| TftpPacket::RRQ { filename, mode }),
            (cstr(), cstr()).prop_map(|(filename, mode)| TftpPacket::WRQ { filename, mode }),
            (any::<u16>(), prop::collection::vec(any::<u8>(), 0..=512))
                .prop_map(|(block, data)| TftpPacket::DATA { block, data }),
            any::<u16>().prop_map(TftpPacket::ACK),
            (any::<u16>(), "[ -~]{0,100}").prop_map(|(code, msg)| TftpPacket::ERROR { code, msg }),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(pkt in packet()) {
            let bytes = pkt.serialize().unwrap();
            prop_assert!(bytes.len() <= MAX_PACKET_SIZE);
            prop_assert_eq!(TftpPacket::deserialize(&bytes).unwrap(), pkt);
        }

        #[test]
        fn decode_never_panics(buf in prop::collection::vec(any::<u8>(), 0..600)) {
            let _ = TftpPacket::deserialize(&buf);
        }
    }
}
