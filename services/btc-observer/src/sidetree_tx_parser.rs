//! Classifies a confirmed Bitcoin transaction as a Sidetree transaction or
//! not, per §4.2: it must carry exactly one `OP_RETURN` output whose UTF-8
//! payload begins with the configured prefix.

use bitcoin::blockdata::opcodes::all::OP_RETURN;
use bitcoin::blockdata::script::Instruction;

use crate::bitcoin_client::{BitcoinInputModel, BitcoinOutputModel, BitcoinTransactionModel};
use crate::types::Writer;

/// A transaction, reduced to the parts the parser decided matter: its
/// anchor string and the writer address it resolved (if any). `None` means
/// the transaction isn't a Sidetree anchor at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSidetreeTransaction {
    pub anchor_string: String,
    pub writer: Writer,
}

/// Attempts to classify one confirmed transaction as a Sidetree anchor.
///
/// `resolve_input_address` is given the first input's previous outpoint and
/// should return the spending address of that output, if resolvable (the
/// parser itself has no chain-state access; the processor looks this up via
/// its own store of previously-seen outputs).
pub fn parse_sidetree_transaction<R>(
    tx: &BitcoinTransactionModel,
    prefix: &str,
    resolve_input_address: R,
) -> Option<ParsedSidetreeTransaction>
where
    R: FnOnce(&BitcoinInputModel) -> Option<String>,
{
    if tx.is_coinbase {
        return None;
    }

    let anchor_string = extract_anchor_string(&tx.outputs, prefix)?;

    let writer = tx
        .inputs
        .first()
        .and_then(resolve_input_address)
        .map(Writer::Known)
        .unwrap_or(Writer::Anonymous);

    Some(ParsedSidetreeTransaction { anchor_string, writer })
}

/// Returns the anchor string iff the transaction has *exactly one*
/// `OP_RETURN` output and its payload starts with `prefix`. A transaction
/// with two or more `OP_RETURN` outputs is never a Sidetree transaction,
/// even if one of them matches the prefix (§4.2 edge case), though it's
/// still counted toward the block's transaction/fee totals by the caller.
fn extract_anchor_string(outputs: &[BitcoinOutputModel], prefix: &str) -> Option<String> {
    let mut op_return_payloads: Vec<&[u8]> = Vec::new();

    for output in outputs {
        if let Some(payload) = op_return_payload(&output.script_pubkey) {
            op_return_payloads.push(payload);
        }
    }

    if op_return_payloads.len() != 1 {
        return None;
    }

    let payload = op_return_payloads[0];
    let text = std::str::from_utf8(payload).ok()?;
    text.strip_prefix(prefix).map(|s| s.to_string())
}

/// Returns the pushed data of a script of the form `OP_RETURN <push>`, or
/// `None` if the script isn't exactly that shape.
fn op_return_payload(script: &bitcoin::ScriptBuf) -> Option<&[u8]> {
    let mut instructions = script.instructions();

    match instructions.next() {
        Some(Ok(Instruction::Op(op))) if op == OP_RETURN => {}
        _ => return None,
    }

    let data = match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => bytes.as_bytes(),
        _ => return None,
    };

    if instructions.next().is_some() {
        return None;
    }

    Some(data)
}
