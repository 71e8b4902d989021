//! GAS PASS on-chain layouts: instructions, account state, error codes.
//!
//! Shared by the client (to decode state) and by the simulated cluster (to execute).

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::Serialize;

use crate::wire::{AccountMeta, Address, Instruction};

/// Fee moved from the gas pass account to the executor per submitted transaction.
pub const SUBMIT_FEE: u64 = 50_000;

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum GasPassInstruction {
    /// `[gas_pass (w), authority (s), rent sysvar]`
    InitializeAccount { nonce: u8 },
    /// `[gas_pass (w), authority (s), payer (w)]`
    Topup { amount: u64 },
    /// `[gas_pass (w), executor (w)]`
    SubmitTransaction { transaction: Vec<u8> },
    /// `[gas_pass (w), authority (s)]`
    Withdraw { amount: u64 },
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GasPassInfo {
    pub is_initialized: bool,
    pub authority: Address,
    pub nonce: u8,
    /// Prepaid balance in lamports.
    pub balance: u64,
}

impl GasPassInfo {
    /// Serialized size: bool + address + u8 + u64.
    pub const LEN: usize = 1 + 32 + 1 + 8;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GasPassError {
    #[error("GAS PASS account already in use")]
    AccountAlreadyInUse = 0,
    #[error("Invalid instruction")]
    InvalidInstruction = 1,
    #[error("Not rent exempt")]
    NotRentExempt = 2,
    #[error("Expected amount mismatch")]
    ExpectedAmountMismatch = 3,
    #[error("Amount overflow")]
    AmountOverflow = 4,
    #[error("Account not initialized")]
    AccountNotInitialized = 5,
    #[error("Owner does not match")]
    OwnerMismatch = 6,
}

impl GasPassError {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => GasPassError::AccountAlreadyInUse,
            1 => GasPassError::InvalidInstruction,
            2 => GasPassError::NotRentExempt,
            3 => GasPassError::ExpectedAmountMismatch,
            4 => GasPassError::AmountOverflow,
            5 => GasPassError::AccountNotInitialized,
            6 => GasPassError::OwnerMismatch,
            _ => return None,
        })
    }
}

/// Decoded gas pass account as reported by `printState`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GasPassState {
    pub address: Address,
    pub lamports: u64,
    pub info: GasPassInfo,
}

impl fmt::Display for GasPassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "account {} initialized={} authority={} nonce={} balance={} lamports={}",
            self.address,
            self.info.is_initialized,
            self.info.authority,
            self.info.nonce,
            self.info.balance,
            self.lamports
        )
    }
}

/// System program instructions the client and simulator need, bincode-compatible layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SystemInstruction {
    CreateAccount {
        lamports: u64,
        space: u64,
        owner: Address,
    },
    Transfer {
        lamports: u64,
    },
}

impl SystemInstruction {
    const CREATE_ACCOUNT: u32 = 0;
    const TRANSFER: u32 = 2;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(52);
        match self {
            SystemInstruction::CreateAccount {
                lamports,
                space,
                owner,
            } => {
                out.extend_from_slice(&Self::CREATE_ACCOUNT.to_le_bytes());
                out.extend_from_slice(&lamports.to_le_bytes());
                out.extend_from_slice(&space.to_le_bytes());
                out.extend_from_slice(owner.as_bytes());
            }
            SystemInstruction::Transfer { lamports } => {
                out.extend_from_slice(&Self::TRANSFER.to_le_bytes());
                out.extend_from_slice(&lamports.to_le_bytes());
            }
        }
        out
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let tag = u32::from_le_bytes(data.get(..4)?.try_into().ok()?);
        let u64_at = |at: usize| -> Option<u64> {
            Some(u64::from_le_bytes(data.get(at..at + 8)?.try_into().ok()?))
        };
        match tag {
            Self::CREATE_ACCOUNT => {
                let owner: [u8; 32] = data.get(20..52)?.try_into().ok()?;
                Some(SystemInstruction::CreateAccount {
                    lamports: u64_at(4)?,
                    space: u64_at(12)?,
                    owner: Address::new(owner),
                })
            }
            Self::TRANSFER => Some(SystemInstruction::Transfer {
                lamports: u64_at(4)?,
            }),
            _ => None,
        }
    }
}

pub fn create_account(
    payer: &Address,
    new_account: &Address,
    lamports: u64,
    space: u64,
    owner: &Address,
) -> Instruction {
    Instruction {
        program_id: Address::system_program(),
        accounts: vec![
            AccountMeta::writable(*payer, true),
            AccountMeta::writable(*new_account, true),
        ],
        data: SystemInstruction::CreateAccount {
            lamports,
            space,
            owner: *owner,
        }
        .encode(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_layout_is_42_bytes() {
        let info = GasPassInfo {
            is_initialized: true,
            authority: Address::new([7; 32]),
            nonce: 3,
            balance: 1_000,
        };
        let bytes = borsh::to_vec(&info).unwrap();
        assert_eq!(bytes.len(), GasPassInfo::LEN);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[33], 3);
        assert_eq!(GasPassInfo::try_from_slice(&bytes).unwrap(), info);
        assert!(!GasPassInfo::try_from_slice(&[0u8; GasPassInfo::LEN])
            .unwrap()
            .is_initialized);
    }

    #[test]
    fn instruction_tags_follow_variant_order() {
        let topup = borsh::to_vec(&GasPassInstruction::Topup { amount: 9 }).unwrap();
        assert_eq!(topup, [1, 9, 0, 0, 0, 0, 0, 0, 0]);
        let submit = borsh::to_vec(&GasPassInstruction::SubmitTransaction {
            transaction: vec![0xaa],
        })
        .unwrap();
        assert_eq!(submit, [2, 1, 0, 0, 0, 0xaa]);
    }

    #[test]
    fn error_codes_are_stable() {
        for code in 0..7 {
            assert_eq!(GasPassError::from_code(code).map(GasPassError::code), Some(code));
        }
        assert_eq!(GasPassError::from_code(7), None);
        assert_eq!(GasPassError::AmountOverflow.code(), 4);
    }

    #[test]
    fn system_create_account_layout() {
        let owner = Address::new([4; 32]);
        let ix = SystemInstruction::CreateAccount {
            lamports: 10,
            space: 42,
            owner,
        };
        let bytes = ix.encode();
        assert_eq!(bytes.len(), 52);
        assert_eq!(&bytes[..4], &[0, 0, 0, 0]);
        assert_eq!(SystemInstruction::decode(&bytes), Some(ix));
        assert_eq!(SystemInstruction::decode(&[9, 0, 0, 0]), None);
    }
}
