//! ABI-style encoding of the payloads the protocol contracts exchange.
//!
//! Every value is a 32-byte big-endian word. Only values that fit in a `u64`
//! are accepted when decoding.

use crate::error::CommonError;
use crate::types::{RequestParams, ResponseBody};

const WORD: usize = 32;

pub struct ProphetCodec;

impl ProphetCodec {
    pub fn encode_response(body: &ResponseBody) -> Vec<u8> {
        encode_word(body.block).to_vec()
    }

    pub fn decode_response(data: &[u8]) -> Result<ResponseBody, CommonError> {
        let words = split_words(data, 1)?;
        Ok(ResponseBody {
            block: decode_word(words[0])?,
        })
    }

    pub fn encode_request_params(params: &RequestParams) -> Vec<u8> {
        let mut out = Vec::with_capacity(WORD * 3);
        out.extend_from_slice(&encode_word(params.response_deadline));
        out.extend_from_slice(&encode_word(params.dispute_window));
        out.extend_from_slice(&encode_word(params.bond_escalation_deadline));
        out
    }

    pub fn decode_request_params(data: &[u8]) -> Result<RequestParams, CommonError> {
        let words = split_words(data, 3)?;
        Ok(RequestParams {
            response_deadline: decode_word(words[0])?,
            dispute_window: decode_word(words[1])?,
            bond_escalation_deadline: decode_word(words[2])?,
        })
    }

    pub fn to_hex(data: &[u8]) -> String {
        format!("0x{}", hex::encode(data))
    }

    pub fn from_hex(data: &str) -> Result<Vec<u8>, CommonError> {
        let body = data.strip_prefix("0x").unwrap_or(data);
        hex::decode(body).map_err(|e| CommonError::Codec(format!("invalid hex payload: {e}")))
    }
}

fn encode_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

fn decode_word(word: &[u8]) -> Result<u64, CommonError> {
    let (high, low) = word.split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(CommonError::Codec("word overflows u64".to_string()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(low);
    Ok(u64::from_be_bytes(bytes))
}

fn split_words(data: &[u8], expected: usize) -> Result<Vec<&[u8]>, CommonError> {
    if data.len() != WORD * expected {
        return Err(CommonError::Codec(format!(
            "expected {expected} word(s) ({} bytes), got {} bytes",
            WORD * expected,
            data.len()
        )));
    }
    Ok(data.chunks(WORD).collect())
}
