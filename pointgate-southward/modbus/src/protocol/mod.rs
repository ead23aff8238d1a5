/// Modbus protocol stack root module.
///
/// Submodules under this namespace define PDU and ADU structures, the stream codecs for
/// MBAP and RTU framing, and the master session.
pub mod codec;
pub mod error;
pub mod frame;
pub mod session;
