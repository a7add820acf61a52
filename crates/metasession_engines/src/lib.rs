#![forbid(unsafe_code)]

pub mod payload_codec;
