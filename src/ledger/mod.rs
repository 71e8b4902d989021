//! In-memory cluster that executes the GAS PASS program.
//!
//! Backs `--cluster simulated` and every session test. It keeps the parts of a real
//! cluster the client can observe: fee payer debits, a recent-blockhash window,
//! signature checks, replay rejection, and all-or-nothing transaction execution.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use borsh::BorshDeserialize;
use ed25519_dalek::{Signature as DalekSignature, VerifyingKey};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::connection::{AccountSnapshot, Transport};
use crate::error::TransportError;
use crate::program::{GasPassError, GasPassInfo, GasPassInstruction, SystemInstruction, SUBMIT_FEE};
use crate::wire::{encode_signature, Address, Blockhash, Message, Signature, Transaction};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

/// Blockhashes older than this many slots are rejected.
const BLOCKHASH_WINDOW: usize = 150;
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;
const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
const EXEMPTION_YEARS: u64 = 2;
/// Largest account a single `CreateAccount` may allocate.
pub const MAX_ACCOUNT_DATA_LEN: u64 = 10 * 1024 * 1024;

pub fn rent_exempt_minimum(space: usize) -> u64 {
    (ACCOUNT_STORAGE_OVERHEAD + space as u64) * LAMPORTS_PER_BYTE_YEAR * EXEMPTION_YEARS
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerAccount {
    pub lamports: u64,
    pub owner: Address,
    pub data: Vec<u8>,
    pub executable: bool,
}

impl LedgerAccount {
    fn is_empty(&self) -> bool {
        self.lamports == 0 && self.data.is_empty() && !self.executable
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InstructionError {
    #[error("missing required signature")]
    MissingRequiredSignature,
    #[error("incorrect program id for account")]
    IncorrectProgramId,
    #[error("not enough account keys")]
    NotEnoughAccountKeys,
    #[error("invalid instruction data")]
    InvalidInstructionData,
    #[error("invalid account data")]
    InvalidAccountData,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("account already in use")]
    AccountAlreadyInUse,
    #[error("read-only account lamports changed")]
    ReadonlyLamportChange,
    #[error("read-only account data modified")]
    ReadonlyDataModified,
    #[error("sum of account balances changed")]
    UnbalancedInstruction,
    #[error("unsupported program id")]
    UnsupportedProgramId,
    #[error("custom program error {0}")]
    Custom(u32),
}

impl From<GasPassError> for InstructionError {
    fn from(err: GasPassError) -> Self {
        InstructionError::Custom(err.code())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("malformed transaction: {0}")]
    Malformed(String),
    #[error("expected {expected} signatures, found {found}")]
    SignatureCount { expected: usize, found: usize },
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("blockhash not found")]
    BlockhashNotFound,
    #[error("transaction already processed")]
    AlreadyProcessed,
    #[error("fee payer account not found")]
    AccountNotFound,
    #[error("insufficient funds for fee")]
    InsufficientFundsForFee,
    #[error("instruction {index}: {error}")]
    Instruction { index: u8, error: InstructionError },
}

impl From<LedgerError> for TransportError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Instruction {
                index,
                error: InstructionError::Custom(code),
            } => TransportError::Program {
                instruction: index,
                code,
                message: GasPassError::from_code(code)
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown program error".into()),
            },
            LedgerError::InsufficientFundsForFee
            | LedgerError::Instruction {
                error: InstructionError::InsufficientFunds,
                ..
            } => TransportError::InsufficientFunds(err.to_string()),
            other => TransportError::Rejected(other.to_string()),
        }
    }
}

/// Accounts visible to one instruction, keyed by address so duplicates share state.
struct InvokeContext<'a> {
    program_id: Address,
    metas: Vec<(Address, bool, bool)>,
    accounts: BTreeMap<Address, LedgerAccount>,
    data: &'a [u8],
}

impl InvokeContext<'_> {
    fn key(&self, pos: usize) -> Result<Address, InstructionError> {
        self.metas
            .get(pos)
            .map(|(address, _, _)| *address)
            .ok_or(InstructionError::NotEnoughAccountKeys)
    }

    fn is_signer(&self, pos: usize) -> Result<bool, InstructionError> {
        self.metas
            .get(pos)
            .map(|(_, signer, _)| *signer)
            .ok_or(InstructionError::NotEnoughAccountKeys)
    }

    fn account(&self, pos: usize) -> Result<&LedgerAccount, InstructionError> {
        let key = self.key(pos)?;
        self.accounts
            .get(&key)
            .ok_or(InstructionError::NotEnoughAccountKeys)
    }

    fn account_mut(&mut self, pos: usize) -> Result<&mut LedgerAccount, InstructionError> {
        let key = self.key(pos)?;
        self.accounts
            .get_mut(&key)
            .ok_or(InstructionError::NotEnoughAccountKeys)
    }

    fn require_signer(&self, pos: usize) -> Result<(), InstructionError> {
        if self.is_signer(pos)? {
            Ok(())
        } else {
            Err(InstructionError::MissingRequiredSignature)
        }
    }

    fn credit(&mut self, pos: usize, lamports: u64) -> Result<(), InstructionError> {
        let account = self.account_mut(pos)?;
        account.lamports = account
            .lamports
            .checked_add(lamports)
            .ok_or(GasPassError::AmountOverflow)?;
        Ok(())
    }

    fn debit(&mut self, pos: usize, lamports: u64) -> Result<(), InstructionError> {
        let account = self.account_mut(pos)?;
        account.lamports = account
            .lamports
            .checked_sub(lamports)
            .ok_or(InstructionError::InsufficientFunds)?;
        Ok(())
    }
}

pub struct LedgerState {
    accounts: BTreeMap<Address, LedgerAccount>,
    slot: u64,
    recent_blockhashes: VecDeque<Blockhash>,
    processed: BTreeMap<Signature, u64>,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerState {
    pub fn new() -> Self {
        let genesis: Blockhash = Sha256::digest(b"gaspass-sim-genesis").into();
        Self {
            accounts: BTreeMap::new(),
            slot: 0,
            recent_blockhashes: VecDeque::from([genesis]),
            processed: BTreeMap::new(),
        }
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }

    pub fn latest_blockhash(&self) -> Blockhash {
        self.recent_blockhashes
            .back()
            .copied()
            .unwrap_or_default()
    }

    pub fn account(&self, address: &Address) -> Option<&LedgerAccount> {
        self.accounts.get(address)
    }

    pub fn credit(&mut self, address: &Address, lamports: u64) {
        let account = self.accounts.entry(*address).or_default();
        account.lamports = account.lamports.saturating_add(lamports);
        self.advance();
    }

    pub fn deploy_program(&mut self, program_id: &Address) {
        let account = self.accounts.entry(*program_id).or_default();
        account.executable = true;
        account.lamports = account.lamports.max(1);
        self.advance();
    }

    /// Each slot hashes the previous blockhash with the slot number.
    fn advance(&mut self) {
        self.slot += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.latest_blockhash());
        hasher.update(self.slot.to_le_bytes());
        self.recent_blockhashes.push_back(hasher.finalize().into());
        while self.recent_blockhashes.len() > BLOCKHASH_WINDOW {
            self.recent_blockhashes.pop_front();
        }
    }

    /// Verifies, charges the fee and runs every instruction. Nothing is committed
    /// unless all instructions succeed.
    pub fn process_transaction(&mut self, tx: &Transaction) -> Result<String, LedgerError> {
        let message = &tx.message;
        let bytes = message
            .serialize()
            .map_err(|e| LedgerError::Malformed(e.to_string()))?;
        let signers = message.signer_keys();
        if signers.is_empty() || signers.len() != tx.signatures.len() {
            return Err(LedgerError::SignatureCount {
                expected: signers.len(),
                found: tx.signatures.len(),
            });
        }
        for (key, signature) in signers.iter().zip(&tx.signatures) {
            let verifying_key =
                VerifyingKey::from_bytes(key.as_bytes()).map_err(|_| LedgerError::InvalidSignature)?;
            verifying_key
                .verify_strict(&bytes, &DalekSignature::from_bytes(signature))
                .map_err(|_| LedgerError::InvalidSignature)?;
        }
        if !self.recent_blockhashes.contains(&message.recent_blockhash) {
            return Err(LedgerError::BlockhashNotFound);
        }
        let id = tx.signatures[0];
        if self.processed.contains_key(&id) {
            return Err(LedgerError::AlreadyProcessed);
        }

        let mut working = self.accounts.clone();
        let fee = LAMPORTS_PER_SIGNATURE * tx.signatures.len() as u64;
        let payer = working
            .get_mut(&signers[0])
            .ok_or(LedgerError::AccountNotFound)?;
        payer.lamports = payer
            .lamports
            .checked_sub(fee)
            .ok_or(LedgerError::InsufficientFundsForFee)?;

        for (index, ix) in message.instructions.iter().enumerate() {
            let index = u8::try_from(index).map_err(|_| {
                LedgerError::Malformed(format!(
                    "{} instructions, at most 256 are addressable",
                    message.instructions.len()
                ))
            })?;
            execute(&mut working, message, ix.program_id_index, &ix.accounts, &ix.data)
                .map_err(|error| LedgerError::Instruction { index, error })?;
        }

        working.retain(|_, account| !account.is_empty());
        self.accounts = working;
        self.processed.insert(id, self.slot);
        self.advance();
        let signature = encode_signature(&id);
        debug!(%signature, slot = self.slot, fee, "transaction processed");
        Ok(signature)
    }
}

fn execute(
    accounts: &mut BTreeMap<Address, LedgerAccount>,
    message: &Message,
    program_index: u8,
    account_indices: &[u8],
    data: &[u8],
) -> Result<(), InstructionError> {
    let key_at = |i: u8| {
        message
            .account_keys
            .get(i as usize)
            .copied()
            .ok_or(InstructionError::NotEnoughAccountKeys)
    };
    let program_id = key_at(program_index)?;
    let mut metas = Vec::with_capacity(account_indices.len());
    for &i in account_indices {
        let address = key_at(i)?;
        metas.push((address, message.is_signer(i as usize), message.is_writable(i as usize)));
    }
    let mut ctx = InvokeContext {
        program_id,
        accounts: metas
            .iter()
            .map(|(address, _, _)| (*address, accounts.get(address).cloned().unwrap_or_default()))
            .collect(),
        metas,
        data,
    };
    let before = ctx.accounts.clone();

    if program_id == Address::system_program() {
        process_system(&mut ctx)?;
    } else if accounts.get(&program_id).is_some_and(|a| a.executable) {
        process_gas_pass(&mut ctx)?;
    } else {
        return Err(InstructionError::UnsupportedProgramId);
    }

    let total = |map: &BTreeMap<Address, LedgerAccount>| -> u128 {
        map.values().map(|a| u128::from(a.lamports)).sum()
    };
    if total(&before) != total(&ctx.accounts) {
        return Err(InstructionError::UnbalancedInstruction);
    }
    for (address, _, writable) in &ctx.metas {
        if *writable {
            continue;
        }
        let (old, new) = (&before[address], &ctx.accounts[address]);
        if old.lamports != new.lamports {
            return Err(InstructionError::ReadonlyLamportChange);
        }
        if old.data != new.data || old.owner != new.owner {
            return Err(InstructionError::ReadonlyDataModified);
        }
    }
    accounts.extend(ctx.accounts);
    Ok(())
}

fn process_system(ctx: &mut InvokeContext<'_>) -> Result<(), InstructionError> {
    let instruction =
        SystemInstruction::decode(ctx.data).ok_or(InstructionError::InvalidInstructionData)?;
    match instruction {
        SystemInstruction::CreateAccount {
            lamports,
            space,
            owner,
        } => {
            ctx.require_signer(0)?;
            ctx.require_signer(1)?;
            if !ctx.account(1)?.is_empty() {
                return Err(InstructionError::AccountAlreadyInUse);
            }
            let space = usize::try_from(space)
                .ok()
                .filter(|_| space <= MAX_ACCOUNT_DATA_LEN)
                .ok_or(InstructionError::InvalidArgument)?;
            ctx.debit(0, lamports)?;
            let created = ctx.account_mut(1)?;
            created.lamports = lamports;
            created.data = vec![0; space];
            created.owner = owner;
            Ok(())
        }
        SystemInstruction::Transfer { lamports } => {
            ctx.require_signer(0)?;
            ctx.debit(0, lamports)?;
            ctx.credit(1, lamports)
        }
    }
}

const GAS_PASS: usize = 0;

fn load_info(ctx: &InvokeContext<'_>) -> Result<GasPassInfo, InstructionError> {
    let account = ctx.account(GAS_PASS)?;
    if account.owner != ctx.program_id {
        return Err(InstructionError::IncorrectProgramId);
    }
    GasPassInfo::try_from_slice(&account.data).map_err(|_| InstructionError::InvalidAccountData)
}

fn load_initialized(ctx: &InvokeContext<'_>) -> Result<GasPassInfo, InstructionError> {
    let info = load_info(ctx)?;
    if !info.is_initialized {
        return Err(GasPassError::AccountNotInitialized.into());
    }
    Ok(info)
}

fn store_info(ctx: &mut InvokeContext<'_>, info: &GasPassInfo) -> Result<(), InstructionError> {
    let bytes = borsh::to_vec(info).map_err(|_| InstructionError::InvalidAccountData)?;
    ctx.account_mut(GAS_PASS)?.data = bytes;
    Ok(())
}

fn process_gas_pass(ctx: &mut InvokeContext<'_>) -> Result<(), InstructionError> {
    let instruction = GasPassInstruction::try_from_slice(ctx.data)
        .map_err(|_| InstructionError::InvalidInstructionData)?;
    debug!(?instruction, "gas pass instruction");

    match instruction {
        GasPassInstruction::InitializeAccount { nonce } => {
            ctx.require_signer(1)?;
            if ctx.key(2)? != Address::rent_sysvar() {
                return Err(InstructionError::InvalidArgument);
            }
            let current = load_info(ctx)?;
            if ctx.account(GAS_PASS)?.lamports < rent_exempt_minimum(GasPassInfo::LEN) {
                return Err(GasPassError::NotRentExempt.into());
            }
            if current.is_initialized {
                return Err(GasPassError::AccountAlreadyInUse.into());
            }
            let info = GasPassInfo {
                is_initialized: true,
                authority: ctx.key(1)?,
                nonce,
                balance: 0,
            };
            store_info(ctx, &info)
        }
        GasPassInstruction::Topup { amount } => {
            ctx.require_signer(1)?;
            let mut info = load_initialized(ctx)?;
            if info.authority != ctx.key(1)? {
                return Err(GasPassError::OwnerMismatch.into());
            }
            // the payer is debited as is, with no ownership check
            ctx.credit(GAS_PASS, amount)?;
            ctx.debit(2, amount)?;
            info.balance = info
                .balance
                .checked_add(amount)
                .ok_or(GasPassError::AmountOverflow)?;
            store_info(ctx, &info)
        }
        GasPassInstruction::SubmitTransaction { .. } => {
            let mut info = load_initialized(ctx)?;
            if info.balance < SUBMIT_FEE {
                return Err(GasPassError::AmountOverflow.into());
            }
            info.balance -= SUBMIT_FEE;
            store_info(ctx, &info)?;
            ctx.debit(GAS_PASS, SUBMIT_FEE)?;
            ctx.credit(1, SUBMIT_FEE)
        }
        GasPassInstruction::Withdraw { amount } => {
            ctx.require_signer(1)?;
            let mut info = load_initialized(ctx)?;
            if info.authority != ctx.key(1)? {
                return Err(GasPassError::OwnerMismatch.into());
            }
            if info.balance < amount {
                return Err(GasPassError::AmountOverflow.into());
            }
            ctx.debit(GAS_PASS, amount)?;
            ctx.credit(1, amount)?;
            info.balance -= amount;
            store_info(ctx, &info)
        }
    }
}

/// [`Transport`] over a [`LedgerState`]. Transactions confirm immediately.
pub struct SimulatedCluster {
    state: Mutex<LedgerState>,
    offline: AtomicBool,
}

impl Default for SimulatedCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every call fails as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn deploy_program(&self, program_id: &Address) {
        self.state.lock().await.deploy_program(program_id);
    }

    pub async fn airdrop(&self, to: &Address, lamports: u64) {
        self.state.lock().await.credit(to, lamports);
        debug!(%to, lamports, "airdrop");
    }

    pub async fn lamports(&self, address: &Address) -> u64 {
        self.state
            .lock()
            .await
            .account(address)
            .map_or(0, |account| account.lamports)
    }

    pub async fn ledger_account(&self, address: &Address) -> Option<LedgerAccount> {
        self.state.lock().await.account(address).cloned()
    }

    pub async fn slot(&self) -> u64 {
        self.state.lock().await.slot()
    }

    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(TransportError::Unreachable("simulated cluster is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for SimulatedCluster {
    async fn version(&self) -> Result<String, TransportError> {
        self.ensure_online()?;
        Ok(format!("gaspass-sim/{}", env!("CARGO_PKG_VERSION")))
    }

    async fn latest_blockhash(&self) -> Result<Blockhash, TransportError> {
        self.ensure_online()?;
        Ok(self.state.lock().await.latest_blockhash())
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        space: usize,
    ) -> Result<u64, TransportError> {
        self.ensure_online()?;
        Ok(rent_exempt_minimum(space))
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<String, TransportError> {
        self.ensure_online()?;
        let result = self.state.lock().await.process_transaction(tx);
        result.map_err(|err| {
            debug!(%err, "simulated transaction failed");
            TransportError::from(err)
        })
    }

    async fn account(&self, address: &Address) -> Result<Option<AccountSnapshot>, TransportError> {
        self.ensure_online()?;
        Ok(self
            .state
            .lock()
            .await
            .account(address)
            .map(|account| AccountSnapshot {
                lamports: account.lamports,
                owner: account.owner,
                data: account.data.clone(),
                executable: account.executable,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{Keypair, SigningCredential};
    use crate::program::create_account;
    use crate::wire::{AccountMeta, Instruction};

    const GAS_PASS_RENT: u64 = 1_183_200;

    struct Fixture {
        cluster: SimulatedCluster,
        program: Address,
        authority: Keypair,
        gas_pass: Keypair,
    }

    impl Fixture {
        async fn new() -> Self {
            let cluster = SimulatedCluster::new();
            let program = Address::new([42; 32]);
            let authority = Keypair::generate();
            cluster.deploy_program(&program).await;
            cluster.airdrop(&authority.address(), 10 * LAMPORTS_PER_SOL).await;
            Self {
                cluster,
                program,
                authority,
                gas_pass: Keypair::generate(),
            }
        }

        async fn send(
            &self,
            instructions: &[Instruction],
            extra: &[&dyn SigningCredential],
        ) -> Result<String, TransportError> {
            let blockhash = self.cluster.latest_blockhash().await?;
            let message =
                Message::compile(&self.authority.address(), instructions, blockhash).unwrap();
            let mut signers: Vec<&dyn SigningCredential> = vec![&self.authority as &dyn SigningCredential];
            signers.extend_from_slice(extra);
            let tx = Transaction::sign(message, &signers).unwrap();
            self.cluster.send_transaction(&tx).await
        }

        fn gas_pass_ix(&self, instruction: GasPassInstruction, accounts: Vec<AccountMeta>) -> Instruction {
            Instruction {
                program_id: self.program,
                accounts,
                data: borsh::to_vec(&instruction).unwrap(),
            }
        }

        fn create_and_initialize(&self, nonce: u8) -> Vec<Instruction> {
            vec![
                create_account(
                    &self.authority.address(),
                    &self.gas_pass.address(),
                    GAS_PASS_RENT,
                    GasPassInfo::LEN as u64,
                    &self.program,
                ),
                self.initialize(nonce),
            ]
        }

        fn initialize(&self, nonce: u8) -> Instruction {
            self.gas_pass_ix(
                GasPassInstruction::InitializeAccount { nonce },
                vec![
                    AccountMeta::writable(self.gas_pass.address(), false),
                    AccountMeta::readonly(self.authority.address(), true),
                    AccountMeta::readonly(Address::rent_sysvar(), false),
                ],
            )
        }

        fn topup(&self, amount: u64) -> Instruction {
            self.gas_pass_ix(
                GasPassInstruction::Topup { amount },
                vec![
                    AccountMeta::writable(self.gas_pass.address(), false),
                    AccountMeta::readonly(self.authority.address(), true),
                    AccountMeta::writable(self.authority.address(), false),
                ],
            )
        }

        async fn info(&self) -> GasPassInfo {
            let account = self
                .cluster
                .ledger_account(&self.gas_pass.address())
                .await
                .unwrap();
            GasPassInfo::try_from_slice(&account.data).unwrap()
        }
    }

    #[test]
    fn rent_minimum_for_gas_pass_state() {
        assert_eq!(rent_exempt_minimum(GasPassInfo::LEN), GAS_PASS_RENT);
    }

    #[tokio::test]
    async fn gas_pass_lifecycle_moves_lamports() {
        let fx = Fixture::new().await;
        let executor = Address::new([9; 32]);

        fx.send(&fx.create_and_initialize(7), &[&fx.gas_pass as &dyn SigningCredential])
            .await
            .unwrap();
        fx.send(&[fx.topup(100_000)], &[]).await.unwrap();
        fx.send(
            &[fx.gas_pass_ix(
                GasPassInstruction::SubmitTransaction {
                    transaction: b"payload".to_vec(),
                },
                vec![
                    AccountMeta::writable(fx.gas_pass.address(), false),
                    AccountMeta::writable(executor, false),
                ],
            )],
            &[],
        )
        .await
        .unwrap();
        fx.send(
            &[fx.gas_pass_ix(
                GasPassInstruction::Withdraw { amount: 20_000 },
                vec![
                    AccountMeta::writable(fx.gas_pass.address(), false),
                    AccountMeta::writable(fx.authority.address(), true),
                ],
            )],
            &[],
        )
        .await
        .unwrap();

        let info = fx.info().await;
        assert!(info.is_initialized);
        assert_eq!(info.authority, fx.authority.address());
        assert_eq!(info.nonce, 7);
        assert_eq!(info.balance, 30_000);
        assert_eq!(fx.cluster.lamports(&executor).await, SUBMIT_FEE);
        assert_eq!(
            fx.cluster.lamports(&fx.gas_pass.address()).await,
            GAS_PASS_RENT + 30_000
        );
        let fees = 2 * LAMPORTS_PER_SIGNATURE + 3 * LAMPORTS_PER_SIGNATURE;
        assert_eq!(
            fx.cluster.lamports(&fx.authority.address()).await,
            10 * LAMPORTS_PER_SOL - fees - GAS_PASS_RENT - 100_000 + 20_000
        );
    }

    #[tokio::test]
    async fn second_initialize_reports_account_in_use() {
        let fx = Fixture::new().await;
        fx.send(&fx.create_and_initialize(0), &[&fx.gas_pass as &dyn SigningCredential])
            .await
            .unwrap();
        let err = fx.send(&[fx.initialize(1)], &[]).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Program {
                instruction: 0,
                code: 0,
                ..
            }
        ));
        assert_eq!(fx.info().await.nonce, 0);
    }

    #[tokio::test]
    async fn failed_transaction_commits_nothing() {
        let fx = Fixture::new().await;
        fx.send(&fx.create_and_initialize(0), &[&fx.gas_pass as &dyn SigningCredential])
            .await
            .unwrap();
        let before = fx.cluster.lamports(&fx.authority.address()).await;

        let err = fx
            .send(&[fx.topup(100 * LAMPORTS_PER_SOL)], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InsufficientFunds(_)));
        assert_eq!(fx.cluster.lamports(&fx.authority.address()).await, before);
        assert_eq!(fx.info().await.balance, 0);
    }

    #[tokio::test]
    async fn uninitialized_account_cannot_be_topped_up() {
        let fx = Fixture::new().await;
        let create = create_account(
            &fx.authority.address(),
            &fx.gas_pass.address(),
            GAS_PASS_RENT,
            GasPassInfo::LEN as u64,
            &fx.program,
        );
        fx.send(&[create], &[&fx.gas_pass as &dyn SigningCredential]).await.unwrap();
        let err = fx.send(&[fx.topup(1_000)], &[]).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Program { code: 5, .. }
        ));
    }

    #[tokio::test]
    async fn replayed_and_stale_transactions_are_rejected() {
        let fx = Fixture::new().await;
        let transfer = Instruction {
            program_id: Address::system_program(),
            accounts: vec![
                AccountMeta::writable(fx.authority.address(), true),
                AccountMeta::writable(Address::new([3; 32]), false),
            ],
            data: SystemInstruction::Transfer { lamports: 10 }.encode(),
        };
        let blockhash = fx.cluster.latest_blockhash().await.unwrap();
        let message =
            Message::compile(&fx.authority.address(), &[transfer.clone()], blockhash).unwrap();
        let tx = Transaction::sign(message, &[&fx.authority as &dyn SigningCredential]).unwrap();
        fx.cluster.send_transaction(&tx).await.unwrap();
        assert!(matches!(
            fx.cluster.send_transaction(&tx).await,
            Err(TransportError::Rejected(_))
        ));

        let stale = Message::compile(&fx.authority.address(), &[transfer], [1; 32]).unwrap();
        let stale = Transaction::sign(stale, &[&fx.authority as &dyn SigningCredential]).unwrap();
        let err = fx.cluster.send_transaction(&stale).await.unwrap_err();
        assert!(err.to_string().contains("blockhash not found"));
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let fx = Fixture::new().await;
        let blockhash = fx.cluster.latest_blockhash().await.unwrap();
        let message = Message::compile(&fx.authority.address(), &[], blockhash).unwrap();
        let mut tx =
            Transaction::sign(message, &[&fx.authority as &dyn SigningCredential]).unwrap();
        tx.signatures[0][0] ^= 1;
        let err = fx.cluster.send_transaction(&tx).await.unwrap_err();
        assert!(err.to_string().contains("signature verification failed"));
    }

    #[tokio::test]
    async fn readonly_accounts_cannot_receive_lamports() {
        let fx = Fixture::new().await;
        let transfer = Instruction {
            program_id: Address::system_program(),
            accounts: vec![
                AccountMeta::writable(fx.authority.address(), true),
                AccountMeta::readonly(Address::new([3; 32]), false),
            ],
            data: SystemInstruction::Transfer { lamports: 10 }.encode(),
        };
        let err = fx.send(&[transfer], &[]).await.unwrap_err();
        assert!(err.to_string().contains("read-only account lamports changed"));
    }

    #[tokio::test]
    async fn oversized_account_allocation_is_refused() {
        let fx = Fixture::new().await;
        let create = create_account(
            &fx.authority.address(),
            &fx.gas_pass.address(),
            GAS_PASS_RENT,
            MAX_ACCOUNT_DATA_LEN + 1,
            &fx.program,
        );
        let err = fx
            .send(&[create], &[&fx.gas_pass as &dyn SigningCredential])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid argument"));
        assert!(fx.cluster.ledger_account(&fx.gas_pass.address()).await.is_none());
    }

    #[tokio::test]
    async fn instruction_index_must_fit_a_byte() {
        let fx = Fixture::new().await;
        let transfer = Instruction {
            program_id: Address::system_program(),
            accounts: vec![
                AccountMeta::writable(fx.authority.address(), true),
                AccountMeta::writable(Address::new([3; 32]), false),
            ],
            data: SystemInstruction::Transfer { lamports: 1 }.encode(),
        };
        let err = fx.send(&vec![transfer; 257], &[]).await.unwrap_err();
        assert!(err.to_string().contains("257 instructions"));
        assert_eq!(fx.cluster.lamports(&Address::new([3; 32])).await, 0);
    }

    #[tokio::test]
    async fn offline_cluster_is_unreachable() {
        let cluster = SimulatedCluster::new();
        cluster.set_offline(true);
        assert!(matches!(
            cluster.version().await,
            Err(TransportError::Unreachable(_))
        ));
        cluster.set_offline(false);
        assert!(cluster.version().await.unwrap().starts_with("gaspass-sim/"));
    }
}
