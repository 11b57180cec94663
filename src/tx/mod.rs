//! Transaction model, construction and signing

pub mod builder;
pub mod ledger;
pub mod signer;
pub mod types;

pub use builder::{AddressedUtxo, SendPlan, TransactionBuilder, TxRequest};
pub use ledger::{
    HardwareSigner, HwDeviceInfo, HwFeatures, LedgerSignRequest, LedgerSignResponse, LedgerWitness, Transport,
};
pub use signer::{sign_tx, verify_witnesses};
pub use types::{
    AuxiliaryData, Balance, Certificate, SendToken, SignedTx, TokenAmount, TxInput, TxOutput, UnsignedTx,
    Withdrawal, PRIMARY_TOKEN_ID,
};
