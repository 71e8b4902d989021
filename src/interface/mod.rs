//! Typed proxy over the GAS PASS program.
//!
//! A [`ProgramInterface`] is built from a validated [`InterfaceDescription`], the program
//! id and a bound [`AuthorityHandle`]. Instruction data is encoded from the description;
//! account roles resolve to the session's addresses.

mod idl;

use std::{fmt, sync::Arc};

use borsh::BorshDeserialize;
use tracing::{debug, info};

use crate::authority::{AuthorityHandle, Keypair, SigningCredential, SubmitError};
use crate::connection::ConnectionHandle;
use crate::error::{InterfaceLoadError, ProgramCallError, TransportError};
use crate::program::{create_account, GasPassError, GasPassInfo, GasPassState};
use crate::wire::{AccountMeta, Address, Instruction};

pub use idl::{
    ArgValue, EncodeError, FieldType, IdlAccountItem, IdlAccountType, IdlField, IdlInstruction,
    IdlMetadata, InterfaceDescription, BUNDLED, INITIALIZE, SUBMIT_TX, SUPPORTED_VERSION, TOPUP,
    WITHDRAW,
};

const PRINT_STATE: &str = "printState";

/// The account the session operates on. Holding the keypair lets `initialize` create it.
#[derive(Clone, Debug)]
pub enum GasPassAccount {
    Keypair(Arc<Keypair>),
    Address(Address),
}

impl GasPassAccount {
    pub fn address(&self) -> Address {
        match self {
            GasPassAccount::Keypair(keypair) => keypair.address(),
            GasPassAccount::Address(address) => *address,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionAccounts {
    pub gas_pass: GasPassAccount,
    /// Receives the submission fee; defaults to the authority.
    pub executor: Option<Address>,
}

pub struct ProgramInterface<'a> {
    description: InterfaceDescription,
    program_id: Address,
    authority: &'a AuthorityHandle<'a>,
    accounts: SessionAccounts,
}

impl<'a> ProgramInterface<'a> {
    pub fn load(
        description: InterfaceDescription,
        program_id: Address,
        authority: &'a AuthorityHandle<'a>,
        accounts: SessionAccounts,
    ) -> Result<Self, InterfaceLoadError> {
        description.validate(&program_id)?;
        info!(
            program = %program_id,
            interface = %description.name,
            fingerprint = %description.fingerprint(),
            gas_pass = %accounts.gas_pass.address(),
            "program interface loaded"
        );
        Ok(Self {
            description,
            program_id,
            authority,
            accounts,
        })
    }

    pub fn program_id(&self) -> Address {
        self.program_id
    }

    pub fn gas_pass_address(&self) -> Address {
        self.accounts.gas_pass.address()
    }

    pub fn description(&self) -> &InterfaceDescription {
        &self.description
    }

    fn connection(&self) -> &ConnectionHandle {
        self.authority.connection()
    }

    fn executor(&self) -> Address {
        self.accounts
            .executor
            .unwrap_or_else(|| self.authority.address())
    }

    fn resolve_role(&self, operation: &'static str, role: &str) -> Result<Address, ProgramCallError> {
        Ok(match role {
            idl::ROLE_GAS_PASS => self.gas_pass_address(),
            idl::ROLE_AUTHORITY | idl::ROLE_PAYER => self.authority.address(),
            idl::ROLE_EXECUTOR => self.executor(),
            idl::ROLE_RENT => Address::rent_sysvar(),
            other => {
                return Err(ProgramCallError::RemoteExecution {
                    operation,
                    reason: format!("unknown account role `{other}`"),
                })
            }
        })
    }

    fn instruction(
        &self,
        operation: &'static str,
        args: &[ArgValue],
    ) -> Result<Instruction, ProgramCallError> {
        let ix = self
            .description
            .instruction(operation)
            .ok_or_else(|| ProgramCallError::RemoteExecution {
                operation,
                reason: "instruction missing from interface description".into(),
            })?;
        let data = ix.encode(args).map_err(remote(operation))?;
        let accounts = ix
            .accounts
            .iter()
            .map(|item| {
                let address = self.resolve_role(operation, &item.name)?;
                Ok(if item.is_mut {
                    AccountMeta::writable(address, item.is_signer)
                } else {
                    AccountMeta::readonly(address, item.is_signer)
                })
            })
            .collect::<Result<Vec<_>, ProgramCallError>>()?;
        Ok(Instruction {
            program_id: self.program_id,
            accounts,
            data,
        })
    }

    async fn send(&self, operation: &'static str, instructions: &[Instruction]) -> Result<String, SubmitError> {
        let co_signers: Vec<&dyn SigningCredential> = match &self.accounts.gas_pass {
            GasPassAccount::Keypair(keypair) => vec![keypair.as_ref() as &dyn SigningCredential],
            GasPassAccount::Address(_) => Vec::new(),
        };
        let signature = self
            .authority
            .send_instructions(instructions, &co_signers)
            .await?;
        info!(operation, %signature, "confirmed");
        Ok(signature)
    }

    /// Initializes the gas pass account, creating it first when it does not exist and
    /// the session holds its keypair. A second call fails with `AlreadyInitialized`.
    pub async fn initialize(&self, nonce: u8) -> Result<String, ProgramCallError> {
        let gas_pass = self.gas_pass_address();
        let existing = self
            .connection()
            .account(&gas_pass)
            .await
            .map_err(remote(INITIALIZE))?;

        let mut instructions = Vec::with_capacity(2);
        if existing.is_none() {
            if !matches!(self.accounts.gas_pass, GasPassAccount::Keypair(_)) {
                return Err(ProgramCallError::RemoteExecution {
                    operation: INITIALIZE,
                    reason: format!("account {gas_pass} does not exist and its keypair is not available"),
                });
            }
            let space = GasPassInfo::LEN;
            let lamports = self
                .connection()
                .minimum_balance_for_rent_exemption(space)
                .await
                .map_err(remote(INITIALIZE))?;
            debug!(%gas_pass, lamports, "creating gas pass account");
            instructions.push(create_account(
                &self.authority.address(),
                &gas_pass,
                lamports,
                space as u64,
                &self.program_id,
            ));
        }
        instructions.push(self.instruction(INITIALIZE, &[ArgValue::U8(nonce)])?);
        let initialize_index = instructions.len() - 1;

        self.send(INITIALIZE, &instructions)
            .await
            .map_err(|err| match err {
                SubmitError::Transport(TransportError::Program {
                    instruction, code, ..
                }) if usize::from(instruction) == initialize_index
                    && GasPassError::from_code(code) == Some(GasPassError::AccountAlreadyInUse) =>
                {
                    ProgramCallError::AlreadyInitialized(gas_pass)
                }
                other => remote(INITIALIZE)(other),
            })
    }

    /// Moves `amount` lamports from the authority into the gas pass balance.
    pub async fn topup(&self, amount: u64) -> Result<String, ProgramCallError> {
        let ix = self.instruction(TOPUP, &[ArgValue::U64(amount)])?;
        self.send(TOPUP, &[ix]).await.map_err(|err| match err {
            SubmitError::Transport(TransportError::InsufficientFunds(reason)) => {
                ProgramCallError::InsufficientFunds(reason)
            }
            other => remote(TOPUP)(other),
        })
    }

    /// Submits `payload` for execution; the program charges its fixed fee to the balance.
    pub async fn submit_tx(&self, payload: &[u8]) -> Result<String, ProgramCallError> {
        let ix = self.instruction(SUBMIT_TX, &[ArgValue::Bytes(payload.to_vec())])?;
        self.send(SUBMIT_TX, &[ix]).await.map_err(remote(SUBMIT_TX))
    }

    pub async fn withdraw(&self, amount: u64) -> Result<String, ProgramCallError> {
        let ix = self.instruction(WITHDRAW, &[ArgValue::U64(amount)])?;
        self.send(WITHDRAW, &[ix]).await.map_err(remote(WITHDRAW))
    }

    /// Fetches and decodes the gas pass account. Read-only.
    pub async fn print_state(&self) -> Result<GasPassState, ProgramCallError> {
        let address = self.gas_pass_address();
        let fail = |reason: String| ProgramCallError::RemoteExecution {
            operation: PRINT_STATE,
            reason,
        };
        let account = self
            .connection()
            .account(&address)
            .await
            .map_err(remote(PRINT_STATE))?
            .ok_or_else(|| fail(format!("account {address} not found")))?;
        if account.owner != self.program_id {
            return Err(fail(format!(
                "account {address} is owned by {}, not the program",
                account.owner
            )));
        }
        let info = GasPassInfo::try_from_slice(&account.data)
            .map_err(|e| fail(format!("cannot decode account data: {e}")))?;
        let state = GasPassState {
            address,
            lamports: account.lamports,
            info,
        };
        info!(%state, "gas pass state");
        Ok(state)
    }
}

/// Wraps any failure as a remote execution error, naming program errors by code.
fn remote<E: Describe>(operation: &'static str) -> impl Fn(E) -> ProgramCallError {
    move |err| ProgramCallError::RemoteExecution {
        operation,
        reason: err.describe(),
    }
}

trait Describe {
    fn describe(&self) -> String;
}

impl Describe for TransportError {
    fn describe(&self) -> String {
        match self {
            TransportError::Program { code, .. } => match GasPassError::from_code(*code) {
                Some(known) => format!("{known} (custom program error {code})"),
                None => self.to_string(),
            },
            other => other.to_string(),
        }
    }
}

impl Describe for SubmitError {
    fn describe(&self) -> String {
        match self {
            SubmitError::Transport(err) => err.describe(),
            SubmitError::Wire(err) => err.to_string(),
        }
    }
}

impl Describe for EncodeError {
    fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Debug for ProgramInterface<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramInterface")
            .field("program_id", &self.program_id)
            .field("gas_pass", &self.gas_pass_address())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Cluster, EndpointConfig};
    use crate::connection::Transport;
    use crate::ledger::{SimulatedCluster, LAMPORTS_PER_SOL};
    use crate::program::SUBMIT_FEE;

    async fn setup(airdrop: u64) -> (Arc<SimulatedCluster>, ConnectionHandle, Arc<Keypair>) {
        let endpoint = EndpointConfig::new(Cluster::Simulated, &Address::new([5; 32]).to_string())
            .unwrap();
        let cluster = Arc::new(SimulatedCluster::new());
        cluster.deploy_program(&endpoint.program_id()).await;
        let authority = Arc::new(Keypair::generate());
        cluster.airdrop(&authority.address(), airdrop).await;
        let transport: Arc<dyn Transport> = cluster.clone();
        let connection = ConnectionHandle::connect(endpoint, transport, None)
            .await
            .unwrap();
        (cluster, connection, authority)
    }

    fn fresh_accounts() -> SessionAccounts {
        SessionAccounts {
            gas_pass: GasPassAccount::Keypair(Arc::new(Keypair::generate())),
            executor: Some(Address::new([9; 32])),
        }
    }

    #[tokio::test]
    async fn operations_drive_the_program() {
        let (cluster, connection, keypair) = setup(LAMPORTS_PER_SOL).await;
        let authority = AuthorityHandle::bind(&connection, Some(keypair.clone())).unwrap();
        let program = ProgramInterface::load(
            InterfaceDescription::bundled().unwrap(),
            connection.endpoint().program_id(),
            &authority,
            fresh_accounts(),
        )
        .unwrap();

        program.initialize(3).await.unwrap();
        program.topup(200_000).await.unwrap();
        program.submit_tx(b"gaspass").await.unwrap();
        program.withdraw(50_000).await.unwrap();

        let state = program.print_state().await.unwrap();
        assert!(state.info.is_initialized);
        assert_eq!(state.info.authority, keypair.address());
        assert_eq!(state.info.nonce, 3);
        assert_eq!(state.info.balance, 200_000 - SUBMIT_FEE - 50_000);
        assert_eq!(cluster.lamports(&Address::new([9; 32])).await, SUBMIT_FEE);
    }

    #[tokio::test]
    async fn initialize_is_not_idempotent() {
        let (_cluster, connection, keypair) = setup(LAMPORTS_PER_SOL).await;
        let authority = AuthorityHandle::bind(&connection, Some(keypair)).unwrap();
        let accounts = fresh_accounts();
        let gas_pass = accounts.gas_pass.address();
        let program = ProgramInterface::load(
            InterfaceDescription::bundled().unwrap(),
            connection.endpoint().program_id(),
            &authority,
            accounts,
        )
        .unwrap();

        program.initialize(0).await.unwrap();
        match program.initialize(0).await {
            Err(ProgramCallError::AlreadyInitialized(address)) => assert_eq!(address, gas_pass),
            other => panic!("expected AlreadyInitialized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn topup_beyond_balance_is_insufficient_funds() {
        let (_cluster, connection, keypair) = setup(2_000_000).await;
        let authority = AuthorityHandle::bind(&connection, Some(keypair)).unwrap();
        let program = ProgramInterface::load(
            InterfaceDescription::bundled().unwrap(),
            connection.endpoint().program_id(),
            &authority,
            fresh_accounts(),
        )
        .unwrap();

        program.initialize(0).await.unwrap();
        assert!(matches!(
            program.topup(5_000_000).await,
            Err(ProgramCallError::InsufficientFunds(_))
        ));
    }

    #[tokio::test]
    async fn submit_without_balance_names_the_program_error() {
        let (_cluster, connection, keypair) = setup(LAMPORTS_PER_SOL).await;
        let authority = AuthorityHandle::bind(&connection, Some(keypair)).unwrap();
        let program = ProgramInterface::load(
            InterfaceDescription::bundled().unwrap(),
            connection.endpoint().program_id(),
            &authority,
            fresh_accounts(),
        )
        .unwrap();

        program.initialize(0).await.unwrap();
        let err = program.submit_tx(b"payload").await.unwrap_err();
        assert!(matches!(
            err,
            ProgramCallError::RemoteExecution {
                operation: SUBMIT_TX,
                ..
            }
        ));
        assert!(err.to_string().contains("Amount overflow"));
    }

    #[tokio::test]
    async fn state_of_unknown_account_is_a_remote_failure() {
        let (_cluster, connection, keypair) = setup(LAMPORTS_PER_SOL).await;
        let authority = AuthorityHandle::bind(&connection, Some(keypair)).unwrap();
        let program = ProgramInterface::load(
            InterfaceDescription::bundled().unwrap(),
            connection.endpoint().program_id(),
            &authority,
            SessionAccounts {
                gas_pass: GasPassAccount::Address(Address::new([4; 32])),
                executor: None,
            },
        )
        .unwrap();

        let err = program.print_state().await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(matches!(
            program.initialize(0).await,
            Err(ProgramCallError::RemoteExecution { .. })
        ));
    }

    #[tokio::test]
    async fn load_rejects_incompatible_description() {
        let (_cluster, connection, keypair) = setup(LAMPORTS_PER_SOL).await;
        let authority = AuthorityHandle::bind(&connection, Some(keypair)).unwrap();
        let mut description = InterfaceDescription::bundled().unwrap();
        description.version = "2.0.0".into();
        assert!(matches!(
            ProgramInterface::load(
                description,
                connection.endpoint().program_id(),
                &authority,
                fresh_accounts(),
            ),
            Err(InterfaceLoadError::VersionMismatch { .. })
        ));
    }
}
