pub mod pdu;

use crc::{Crc, CRC_16_MODBUS};
use pdu::{Request, Response};

/// MBAP header length: transaction id, protocol id, length, unit id.
pub const MBAP_HEADER_LEN: usize = 7;
/// Largest PDU the protocol allows.
pub const MAX_PDU_LEN: usize = 253;
/// Largest RTU ADU: address, PDU, CRC.
pub const MAX_RTU_FRAME_LEN: usize = 1 + MAX_PDU_LEN + 2;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS over `bytes`. Transmitted low byte first.
#[inline]
pub fn crc16(bytes: &[u8]) -> u16 {
    MODBUS_CRC.checksum(bytes)
}

/// Addressing part of an ADU.
///
/// `transaction_id` is only meaningful for MBAP framing and is zero on RTU links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub transaction_id: u16,
    pub unit_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAdu {
    pub header: Header,
    pub pdu: Request,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAdu {
    pub header: Header,
    pub pdu: Response,
}

/// A request as seen by a server.
///
/// Requests the server cannot parse still carry the function code so that an exception
/// response can be built for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub header: Header,
    pub function: u8,
    pub request: std::result::Result<Request, pdu::ExceptionCode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_reference_frame() {
        // 01 03 00 00 00 0A C5 CD
        let crc = crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(crc.to_le_bytes(), [0xC5, 0xCD]);
    }
}
