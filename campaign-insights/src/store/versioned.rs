//! Version-prefixed values and the last-write-wins merge operator.
//!
//! Every value is `[8 bytes version BE][payload]`. Writes go through
//! `merge`, and the operator keeps whichever operand carries the highest
//! version. On a tie the later operand wins, which keeps the operator
//! associative so RocksDB may combine operands in any grouping.

use rocksdb::MergeOperands;

use crate::error::StoreError;

pub const MERGE_OPERATOR_NAME: &str = "last_write_wins";

const VERSION_LEN: usize = 8;

pub fn encode(version: u64, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(VERSION_LEN + payload.len());
    bytes.extend_from_slice(&version.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

pub fn decode(value: &[u8]) -> Result<(u64, &[u8]), StoreError> {
    let version = version_of(value).ok_or_else(|| {
        StoreError::CorruptValue(format!(
            "versioned value too short: {} bytes",
            value.len()
        ))
    })?;
    Ok((version, &value[VERSION_LEN..]))
}

fn version_of(value: &[u8]) -> Option<u64> {
    let prefix: [u8; VERSION_LEN] = value.get(..VERSION_LEN)?.try_into().ok()?;
    Some(u64::from_be_bytes(prefix))
}

pub fn last_write_wins(
    _key: &[u8],
    existing: Option<&[u8]>,
    operands: &MergeOperands,
) -> Option<Vec<u8>> {
    let mut winner: Option<(u64, &[u8])> =
        existing.and_then(|value| version_of(value).map(|version| (version, value)));

    // Malformed operands are skipped rather than failing the whole merge
    for operand in operands.iter() {
        let Some(version) = version_of(operand) else {
            continue;
        };
        match winner {
            Some((current, _)) if current > version => {}
            _ => winner = Some((version, operand)),
        }
    }

    winner.map(|(_, value)| value.to_vec())
}
