use escrow_lending_core::{Operation, WalletAddress};
use sha3::{Digest, Keccak256};

use crate::ChainError;

pub(crate) const DEPOSIT: &str = "deposit()";
pub(crate) const WITHDRAW: &str = "withdraw()";
pub(crate) const CHANGE_RATE: &str = "changeLendersInterestRate(uint256)";
pub(crate) const LENDER_CONTRACT: &str = "lenderContract()";
pub(crate) const LENDERS: &str = "lenders(address)";
pub(crate) const TOTAL_INTEREST_GAINED: &str = "totalInterestGained(address)";
pub(crate) const INTEREST_RATE: &str = "interestRate()";

const WORD_HEX_LEN: usize = 64;

pub(crate) fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

fn uint_word(value: u128) -> String {
    format!("{value:064x}")
}

fn address_word(address: &WalletAddress) -> String {
    format!("{:0>64}", address.hex_digits())
}

fn calldata(signature: &str, words: &[String]) -> String {
    let mut data = format!("0x{}", hex::encode(selector(signature)));
    for word in words {
        data.push_str(word);
    }
    data
}

pub(crate) fn call_without_args(signature: &str) -> String {
    calldata(signature, &[])
}

pub(crate) fn call_with_address(signature: &str, address: &WalletAddress) -> String {
    calldata(signature, &[address_word(address)])
}

pub(crate) fn operation_calldata(operation: &Operation) -> String {
    match operation {
        Operation::Deposit { .. } => calldata(DEPOSIT, &[]),
        Operation::Withdraw => calldata(WITHDRAW, &[]),
        Operation::ChangeRate { new_rate_bps } => {
            calldata(CHANGE_RATE, &[uint_word(u128::from(*new_rate_bps))])
        }
    }
}

pub(crate) fn hex_quantity(value: u128) -> String {
    format!("{value:#x}")
}

/// First 32-byte word of `eth_call` return data, as a `0x` quantity.
///
/// `lenders(address)` returns a struct whose first member is the amount, so
/// reading only the first word covers every accessor we use.
pub(crate) fn first_word(data: &str) -> Result<String, ChainError> {
    let digits = data
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::Malformed(format!("call data {data:?} lacks 0x prefix")))?;
    if !digits.is_ascii() {
        return Err(ChainError::Malformed(format!(
            "call data {data:?} is not hex"
        )));
    }
    if digits.len() < WORD_HEX_LEN {
        return Err(ChainError::Malformed(format!(
            "call returned {} hex digits, expected at least one 32-byte word",
            digits.len()
        )));
    }
    Ok(format!("0x{}", &digits[..WORD_HEX_LEN]))
}

pub(crate) fn address_from_word(data: &str) -> Result<WalletAddress, ChainError> {
    let word = first_word(data)?;
    // the address is right-aligned in its word
    format!("0x{}", &word[word.len() - 40..])
        .parse()
        .map_err(|e| ChainError::Malformed(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_selectors() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn non_ascii_call_data_is_malformed() {
        let data = format!("0x{}", "é".repeat(WORD_HEX_LEN));
        assert!(matches!(first_word(&data), Err(ChainError::Malformed(_))));
        assert!(matches!(
            address_from_word(&format!("0x{}ü", "0".repeat(WORD_HEX_LEN - 1))),
            Err(ChainError::Malformed(_))
        ));
    }

    #[test]
    fn encodes_rate_change() {
        let data = operation_calldata(&Operation::ChangeRate { new_rate_bps: 525 });
        assert_eq!(data.len(), 2 + 8 + 64);
        assert!(data.ends_with("020d"));
    }

    #[test]
    fn address_arguments_are_left_padded() {
        let lender: WalletAddress = "0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD".parse().unwrap();
        let data = call_with_address(LENDERS, &lender);
        assert_eq!(
            &data[10..],
            "000000000000000000000000abcdefabcdefabcdefabcdefabcdefabcdefabcd"
        );
    }

    #[test]
    fn decodes_first_word_and_addresses() {
        let amount = format!("0x{:064x}{:064x}", 1000, 7);
        assert_eq!(first_word(&amount).unwrap(), format!("0x{:064x}", 1000));
        assert!(first_word("0x1234").is_err());

        let word = format!("0x{:0>64}", "1111111111111111111111111111111111111111");
        let address = address_from_word(&word).unwrap();
        assert_eq!(
            address,
            "0x1111111111111111111111111111111111111111".parse().unwrap()
        );
    }
}
