//! Parses on-disk `blk*.dat` block files for fast cold-start (§4.2/§6).
//!
//! Framing: `<4-byte magic><4-byte little-endian size><block bytes>` repeated,
//! terminated by the all-zero sentinel magic. The magic/size framing isn't
//! part of Bitcoin consensus encoding, so it's read manually; the block
//! payload itself is decoded with `bitcoin::consensus::Decodable`.

use std::io::Read;

use bitcoin::consensus::Decodable;
use bitcoin::Block;

pub const MAINNET_MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];
pub const TESTNET_MAGIC: [u8; 4] = [0x0b, 0x11, 0x09, 0x07];
pub const SENTINEL_MAGIC: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

#[derive(Debug, thiserror::Error)]
pub enum RawBlockFileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("consensus decode error: {0}")]
    Decode(#[from] bitcoin::consensus::encode::Error),
    #[error("coinbase input script is empty, cannot read block height")]
    EmptyCoinbaseScript,
}

/// A block read from a `blk*.dat` file, with its height recovered from the
/// coinbase input script (BIP-34: first byte is length `n`, next `n` bytes
/// are the little-endian height).
#[derive(Debug, Clone)]
pub struct RawBlockEntry {
    pub height: u32,
    pub block: Block,
}

/// Reads every framed block out of one `blk*.dat` file, stopping at the
/// sentinel magic or end of file.
pub fn parse_block_file<R: Read>(mut reader: R) -> Result<Vec<RawBlockEntry>, RawBlockFileError> {
    let mut entries = Vec::new();

    loop {
        let mut magic = [0u8; 4];
        match reader.read_exact(&mut magic) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        if magic == SENTINEL_MAGIC {
            break;
        }
        if magic != MAINNET_MAGIC && magic != TESTNET_MAGIC {
            // Unrecognized magic: stop rather than misinterpret the rest of
            // the file as block data.
            break;
        }

        let mut size_bytes = [0u8; 4];
        reader.read_exact(&mut size_bytes)?;
        let size = u32::from_le_bytes(size_bytes) as usize;

        let mut block_bytes = vec![0u8; size];
        reader.read_exact(&mut block_bytes)?;

        let block = Block::consensus_decode(&mut block_bytes.as_slice())?;
        let height = block_height_from_coinbase(&block)?;

        entries.push(RawBlockEntry { height, block });
    }

    Ok(entries)
}

/// Recovers the block height from the coinbase transaction's input script,
/// per BIP-34: first byte is the push length `n`, next `n` bytes are the
/// little-endian height.
fn block_height_from_coinbase(block: &Block) -> Result<u32, RawBlockFileError> {
    let coinbase = block
        .txdata
        .first()
        .ok_or(RawBlockFileError::EmptyCoinbaseScript)?;
    let script = &coinbase.input.first().ok_or(RawBlockFileError::EmptyCoinbaseScript)?.script_sig;
    let bytes = script.as_bytes();

    if bytes.is_empty() {
        return Err(RawBlockFileError::EmptyCoinbaseScript);
    }

    let push_len = bytes[0] as usize;
    if bytes.len() < 1 + push_len || push_len == 0 {
        return Err(RawBlockFileError::EmptyCoinbaseScript);
    }

    let mut height_bytes = [0u8; 4];
    let n = push_len.min(4);
    height_bytes[..n].copy_from_slice(&bytes[1..1 + n]);
    Ok(u32::from_le_bytes(height_bytes))
}
