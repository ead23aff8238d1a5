use super::{
    error::{Error, Result},
    frame::{
        crc16,
        pdu::{ExceptionCode, Request, Response, EXCEPTION_FLAG},
        Header, IncomingRequest, RequestAdu, ResponseAdu, MAX_PDU_LEN, MAX_RTU_FRAME_LEN,
        MBAP_HEADER_LEN,
    },
};
use crate::types::Framing;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Request,
    Response,
}

/// Split one complete ADU off the front of `src`.
///
/// Returns `Ok(None)` while the frame is still incomplete. Consumed bytes are removed from
/// `src` only once a whole frame is available.
fn split_frame(
    framing: Framing,
    direction: Direction,
    src: &mut BytesMut,
) -> Result<Option<(Header, Bytes)>> {
    if framing.is_rtu() {
        split_rtu(direction, src)
    } else {
        split_mbap(src)
    }
}

fn split_mbap(src: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
    if src.len() < MBAP_HEADER_LEN {
        return Ok(None);
    }
    let transaction_id = u16::from_be_bytes([src[0], src[1]]);
    let protocol_id = u16::from_be_bytes([src[2], src[3]]);
    let length = u16::from_be_bytes([src[4], src[5]]) as usize;
    if protocol_id != 0 {
        return Err(Error::InvalidFrame {
            context: "non-zero MBAP protocol id",
        });
    }
    // length covers the unit id and the PDU
    if !(2..=MAX_PDU_LEN + 1).contains(&length) {
        return Err(Error::InvalidFrame {
            context: "MBAP length out of range",
        });
    }
    let total = 6 + length;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }
    let mut frame = src.split_to(total);
    let unit_id = frame[6];
    frame.advance(MBAP_HEADER_LEN);
    Ok(Some((
        Header {
            transaction_id,
            unit_id,
        },
        frame.freeze(),
    )))
}

/// Total RTU frame length derived from the function code, `None` until enough bytes arrived.
fn rtu_frame_len(direction: Direction, buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let fc = buf[1];
    let len = match direction {
        Direction::Response if fc & EXCEPTION_FLAG != 0 => 5,
        Direction::Response => match fc {
            0x03 | 0x04 => match buf.get(2) {
                Some(&byte_count) => 3 + byte_count as usize + 2,
                None => return Ok(None),
            },
            0x06 | 0x10 => 8,
            other => return Err(Error::UnsupportedFunction(other)),
        },
        Direction::Request => match fc {
            0x03 | 0x04 | 0x06 => 8,
            0x10 => match buf.get(6) {
                Some(&byte_count) => 7 + byte_count as usize + 2,
                None => return Ok(None),
            },
            other => return Err(Error::UnsupportedFunction(other)),
        },
    };
    if len > MAX_RTU_FRAME_LEN {
        return Err(Error::InvalidFrame {
            context: "RTU byte count exceeds frame limit",
        });
    }
    Ok(Some(len))
}

fn split_rtu(direction: Direction, src: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
    let Some(len) = rtu_frame_len(direction, src)? else {
        return Ok(None);
    };
    if src.len() < len {
        src.reserve(len - src.len());
        return Ok(None);
    }
    let mut frame = src.split_to(len);
    let received = u16::from_le_bytes([frame[len - 2], frame[len - 1]]);
    let computed = crc16(&frame[..len - 2]);
    if received != computed {
        return Err(Error::Crc { computed, received });
    }
    frame.truncate(len - 2);
    let unit_id = frame[0];
    frame.advance(1);
    Ok(Some((
        Header {
            transaction_id: 0,
            unit_id,
        },
        frame.freeze(),
    )))
}

fn write_frame(framing: Framing, header: Header, pdu: &[u8], dst: &mut BytesMut) {
    if framing.is_rtu() {
        let start = dst.len();
        dst.reserve(1 + pdu.len() + 2);
        dst.put_u8(header.unit_id);
        dst.put_slice(pdu);
        let crc = crc16(&dst[start..]);
        dst.put_u16_le(crc);
    } else {
        dst.reserve(MBAP_HEADER_LEN + pdu.len());
        dst.put_u16(header.transaction_id);
        dst.put_u16(0);
        dst.put_u16((pdu.len() + 1) as u16);
        dst.put_u8(header.unit_id);
        dst.put_slice(pdu);
    }
}

/// Master-side codec: encodes requests, decodes responses.
#[derive(Debug, Clone, Copy)]
pub struct ClientCodec {
    framing: Framing,
}

impl ClientCodec {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some((header, pdu)) = split_frame(self.framing, Direction::Response, src)? else {
            return Ok(None);
        };
        Ok(Some(ResponseAdu {
            header,
            pdu: Response::decode(&pdu)?,
        }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, item: RequestAdu, dst: &mut BytesMut) -> Result<()> {
        let mut pdu = BytesMut::with_capacity(MAX_PDU_LEN);
        item.pdu.encode(&mut pdu)?;
        write_frame(self.framing, item.header, &pdu, dst);
        Ok(())
    }
}

/// Slave-side codec: decodes requests, encodes responses.
///
/// Requests with a valid frame but unusable content are surfaced as
/// [`IncomingRequest`] carrying the exception code to answer with.
#[derive(Debug, Clone, Copy)]
pub struct ServerCodec {
    framing: Framing,
}

impl ServerCodec {
    pub fn new(framing: Framing) -> Self {
        Self { framing }
    }
}

impl Decoder for ServerCodec {
    type Item = IncomingRequest;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if self.framing.is_rtu() {
            // Unknown function on a serial line: the frame length is unknowable, so drop
            // whatever is buffered and answer IllegalFunction.
            if let Err(Error::UnsupportedFunction(function)) =
                rtu_frame_len(Direction::Request, src)
            {
                let unit_id = src[0];
                src.clear();
                return Ok(Some(IncomingRequest {
                    header: Header {
                        transaction_id: 0,
                        unit_id,
                    },
                    function,
                    request: Err(ExceptionCode::IllegalFunction),
                }));
            }
        }
        let Some((header, pdu)) = split_frame(self.framing, Direction::Request, src)? else {
            return Ok(None);
        };
        let function = pdu.first().copied().unwrap_or_default();
        let request = Request::decode(&pdu).map_err(|e| match e {
            Error::UnsupportedFunction(_) => ExceptionCode::IllegalFunction,
            _ => ExceptionCode::IllegalDataValue,
        });
        Ok(Some(IncomingRequest {
            header,
            function,
            request,
        }))
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, item: ResponseAdu, dst: &mut BytesMut) -> Result<()> {
        let mut pdu = BytesMut::with_capacity(MAX_PDU_LEN);
        item.pdu.encode(&mut pdu);
        write_frame(self.framing, item.header, &pdu, dst);
        Ok(())
    }
}
