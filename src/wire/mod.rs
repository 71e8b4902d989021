//! Addresses, instructions and the legacy transaction wire format.

use std::{fmt, str::FromStr};

use base64::{engine::general_purpose, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::authority::SigningCredential;

pub const ADDRESS_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
pub const RENT_SYSVAR_ID: &str = "SysvarRent111111111111111111111111111111111";

pub type Signature = [u8; SIGNATURE_LEN];
pub type Blockhash = [u8; 32];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")]
    Base58(String),
    #[error("expected {ADDRESS_LEN} bytes, got {0}")]
    Length(usize),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("message references {0} accounts, at most 256 fit a legacy message")]
    TooManyAccounts(usize),
    #[error("{what} length {len} exceeds the compact-u16 range")]
    TooLong { what: &'static str, len: usize },
    #[error("transaction requires a signature from {0}")]
    MissingSigner(Address),
}

/// 32-byte account or program address, base58 in text form.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub const fn system_program() -> Self {
        Self([0u8; ADDRESS_LEN])
    }

    pub fn rent_sysvar() -> Self {
        Self::from_str(RENT_SYSVAR_ID).expect("rent sysvar id is valid base58")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| AddressError::Base58(e.to_string()))?;
        let bytes: [u8; ADDRESS_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::Length(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = <String as Deserialize>::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

pub fn encode_signature(signature: &Signature) -> String {
    bs58::encode(signature).into_string()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountMeta {
    pub address: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

/// Legacy message: header, ordered account keys, blockhash, index-compiled instructions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Address>,
    pub recent_blockhash: Blockhash,
    pub instructions: Vec<CompiledInstruction>,
}

struct KeyFlags {
    address: Address,
    is_signer: bool,
    is_writable: bool,
}

impl KeyFlags {
    // writable signers, readonly signers, writable non-signers, readonly non-signers
    fn group(&self) -> u8 {
        match (self.is_signer, self.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    }
}

fn upsert_key(keys: &mut Vec<KeyFlags>, address: Address, is_signer: bool, is_writable: bool) {
    if let Some(existing) = keys.iter_mut().find(|k| k.address == address) {
        existing.is_signer |= is_signer;
        existing.is_writable |= is_writable;
    } else {
        keys.push(KeyFlags {
            address,
            is_signer,
            is_writable,
        });
    }
}

impl Message {
    pub fn compile(
        payer: &Address,
        instructions: &[Instruction],
        recent_blockhash: Blockhash,
    ) -> Result<Self, WireError> {
        let mut keys = vec![KeyFlags {
            address: *payer,
            is_signer: true,
            is_writable: true,
        }];
        for ix in instructions {
            for meta in &ix.accounts {
                upsert_key(&mut keys, meta.address, meta.is_signer, meta.is_writable);
            }
            upsert_key(&mut keys, ix.program_id, false, false);
        }
        if keys.len() > 256 {
            return Err(WireError::TooManyAccounts(keys.len()));
        }
        // stable: the payer stays first among writable signers
        keys.sort_by_key(KeyFlags::group);

        let too_many = || WireError::TooManyAccounts(keys.len());
        let count = |group: u8| {
            u8::try_from(keys.iter().filter(|k| k.group() == group).count()).map_err(|_| too_many())
        };
        let num_readonly_signed = count(1)?;
        let header = MessageHeader {
            num_required_signatures: count(0)?
                .checked_add(num_readonly_signed)
                .ok_or_else(too_many)?,
            num_readonly_signed,
            num_readonly_unsigned: count(3)?,
        };
        let account_keys: Vec<Address> = keys.iter().map(|k| k.address).collect();
        let index_of = |address: &Address| -> u8 {
            // every key was inserted above and there are at most 256 of them
            account_keys.iter().position(|k| k == address).unwrap_or_default() as u8
        };
        let compiled = instructions
            .iter()
            .map(|ix| CompiledInstruction {
                program_id_index: index_of(&ix.program_id),
                accounts: ix.accounts.iter().map(|m| index_of(&m.address)).collect(),
                data: ix.data.clone(),
            })
            .collect();

        Ok(Self {
            header,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    pub fn signer_keys(&self) -> &[Address] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.header.num_required_signatures as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let signed = self.header.num_required_signatures as usize;
        if index < signed {
            index < signed - self.header.num_readonly_signed as usize
        } else {
            index < self.account_keys.len() - self.header.num_readonly_unsigned as usize
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(3 + 33 * self.account_keys.len() + 32 + 64);
        out.push(self.header.num_required_signatures);
        out.push(self.header.num_readonly_signed);
        out.push(self.header.num_readonly_unsigned);
        push_len(&mut out, "account keys", self.account_keys.len())?;
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(&self.recent_blockhash);
        push_len(&mut out, "instructions", self.instructions.len())?;
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            push_len(&mut out, "instruction accounts", ix.accounts.len())?;
            out.extend_from_slice(&ix.accounts);
            push_len(&mut out, "instruction data", ix.data.len())?;
            out.extend_from_slice(&ix.data);
        }
        Ok(out)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    /// Signs `message` with one credential per required signer key, in key order.
    pub fn sign(message: Message, signers: &[&dyn SigningCredential]) -> Result<Self, WireError> {
        let bytes = message.serialize()?;
        let signatures = message
            .signer_keys()
            .iter()
            .map(|key| {
                signers
                    .iter()
                    .find(|s| s.address() == *key)
                    .map(|s| s.sign(&bytes))
                    .ok_or(WireError::MissingSigner(*key))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            signatures,
            message,
        })
    }

    /// The first signature identifies the transaction.
    pub fn id(&self) -> Option<String> {
        self.signatures.first().map(encode_signature)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, WireError> {
        let message = self.message.serialize()?;
        let mut out = Vec::with_capacity(1 + SIGNATURE_LEN * self.signatures.len() + message.len());
        push_len(&mut out, "signatures", self.signatures.len())?;
        for sig in &self.signatures {
            out.extend_from_slice(sig);
        }
        out.extend_from_slice(&message);
        Ok(out)
    }

    pub fn to_base64(&self) -> Result<String, WireError> {
        Ok(general_purpose::STANDARD.encode(self.serialize()?))
    }
}

fn push_len(out: &mut Vec<u8>, what: &'static str, len: usize) -> Result<(), WireError> {
    let value = u16::try_from(len).map_err(|_| WireError::TooLong { what, len })?;
    encode_compact_u16(value, out);
    Ok(())
}

/// Little-endian base-128 varint, at most three bytes.
pub fn encode_compact_u16(mut value: u16, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Keypair;

    #[test]
    fn well_known_ids_decode() {
        assert!(Address::from_str(SYSTEM_PROGRAM_ID).unwrap().is_zero());
        assert_eq!(Address::system_program().to_string(), SYSTEM_PROGRAM_ID);
        assert_eq!(Address::rent_sysvar().to_string(), RENT_SYSVAR_ID);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(matches!(
            Address::from_str("your_program_id_here"),
            Err(AddressError::Base58(_))
        ));
        let short = bs58::encode([1u8, 2, 3, 4]).into_string();
        assert_eq!(Address::from_str(&short), Err(AddressError::Length(4)));
    }

    #[test]
    fn compact_u16_boundaries() {
        let cases: [(u16, &[u8]); 5] = [
            (0, &[0x00]),
            (0x7f, &[0x7f]),
            (0x80, &[0x80, 0x01]),
            (0x3fff, &[0xff, 0x7f]),
            (0xffff, &[0xff, 0xff, 0x03]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            encode_compact_u16(value, &mut out);
            assert_eq!(out, expected, "value {value:#x}");
        }
    }

    #[test]
    fn compile_orders_keys_and_merges_flags() {
        let payer = Address::new([9; 32]);
        let program = Address::new([1; 32]);
        let state = Address::new([2; 32]);
        let cosigner = Address::new([3; 32]);
        let ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::readonly(Address::rent_sysvar(), false),
                AccountMeta::writable(state, false),
                AccountMeta::readonly(cosigner, true),
                AccountMeta::readonly(payer, true),
            ],
            data: vec![7],
        };
        let message = Message::compile(&payer, &[ix], [0; 32]).unwrap();
        assert_eq!(
            message.account_keys,
            vec![payer, cosigner, state, Address::rent_sysvar(), program]
        );
        assert_eq!(
            message.header,
            MessageHeader {
                num_required_signatures: 2,
                num_readonly_signed: 1,
                num_readonly_unsigned: 2,
            }
        );
        assert!(message.is_writable(0));
        assert!(!message.is_writable(1));
        assert!(message.is_writable(2));
        assert!(!message.is_writable(4));
        assert_eq!(message.instructions[0].program_id_index, 4);
        assert_eq!(message.instructions[0].accounts, vec![3, 2, 1, 0]);
    }

    #[test]
    fn header_counts_must_fit_a_byte() {
        let signers: Vec<Address> = (0..=254u8)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[0] = i;
                bytes[1] = 1;
                Address::new(bytes)
            })
            .collect();
        let ix = Instruction {
            program_id: signers[0],
            accounts: signers.iter().map(|a| AccountMeta::writable(*a, true)).collect(),
            data: vec![],
        };
        // 256 keys fit the index space but not the signer count
        let err = Message::compile(&Address::new([9; 32]), &[ix], [0; 32]).unwrap_err();
        assert_eq!(err, WireError::TooManyAccounts(256));
    }

    #[test]
    fn signing_requires_every_signer() {
        let payer = Keypair::generate();
        let other = Keypair::generate();
        let ix = Instruction {
            program_id: Address::new([1; 32]),
            accounts: vec![AccountMeta::writable(other.address(), true)],
            data: vec![],
        };
        let message = Message::compile(&payer.address(), &[ix], [5; 32]).unwrap();

        let only_payer: [&dyn SigningCredential; 1] = [&payer];
        let err = Transaction::sign(message.clone(), &only_payer).unwrap_err();
        assert_eq!(err, WireError::MissingSigner(other.address()));

        let both: [&dyn SigningCredential; 2] = [&other, &payer];
        let tx = Transaction::sign(message, &both).unwrap();
        assert_eq!(tx.signatures.len(), 2);
        let bytes = tx.serialize().unwrap();
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..65], &tx.signatures[0]);
    }
}
