//! Unsigned transaction construction
//!
//! Selection walks token-carrying UTXOs first (only when tokens are
//! requested), then the rest largest-first, stopping as soon as the outputs,
//! deposits and fee are covered and the change is either empty or large
//! enough to stand on its own.

use std::collections::{BTreeMap, BTreeSet};

use super::types::{
    Addressing, AuxiliaryData, Certificate, SendToken, TokenAmount, TxBody, TxInput, TxOutput,
    UnsignedTx, Withdrawal, PRIMARY_TOKEN_ID,
};
use crate::config::{NetworkId, ProtocolParams};
use crate::crypto::address::{decode_address, validate_address};
use crate::error::{Result, WalletError};
use crate::utxo::Utxo;

const BODY_OVERHEAD: u64 = 8;
const INPUT_SIZE: u64 = 43;
const ASSET_SIZE: u64 = 44;
const WITNESS_SIZE: u64 = 112;
const DEFAULT_ADDRESS_SIZE: u64 = 57;
const MIN_UTXO_OVERHEAD: u64 = 160;
const MAX_FEE_ITERATIONS: usize = 8;

/// A wallet UTXO together with the key path that can spend it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressedUtxo {
    pub utxo: Utxo,
    pub addressing: Addressing,
}

#[derive(Clone, Debug)]
pub struct TxRequest {
    pub utxos: Vec<AddressedUtxo>,
    pub outputs: Vec<TxOutput>,
    pub change_address: String,
    pub change_addressing: Addressing,
    pub ttl: u64,
    pub certificates: Vec<Certificate>,
    pub withdrawals: Vec<Withdrawal>,
    pub deposit: u64,
    pub refund: u64,
    pub auxiliary_data: Option<AuxiliaryData>,
}

/// Outcome of interpreting a send request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendPlan {
    Outputs(Vec<TxOutput>),
    /// Everything the wallet holds goes to one receiver
    All { receiver: String },
}

struct Plan {
    fee: u64,
    change: Option<TxOutput>,
}

/// CBOR unsigned-integer width
fn uint_size(value: u64) -> u64 {
    match value {
        0..=23 => 1,
        24..=0xff => 2,
        0x100..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

fn output_size(output: &TxOutput) -> u64 {
    let address = decode_address(&output.address)
        .map(|b| b.len() as u64)
        .unwrap_or(DEFAULT_ADDRESS_SIZE);
    let assets = if output.assets.is_empty() {
        0
    } else {
        4 + ASSET_SIZE * output.assets.len() as u64
    };
    2 + address + uint_size(output.amount) + assets
}

fn sum_tokens<'a>(assets: impl Iterator<Item = &'a TokenAmount>) -> BTreeMap<String, u64> {
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for asset in assets {
        let total = totals.entry(asset.token_id.clone()).or_default();
        *total = total.saturating_add(asset.quantity);
    }
    totals
}

/// Sum that fails instead of wrapping
fn checked_total(values: impl IntoIterator<Item = u64>) -> Option<u64> {
    values.into_iter().try_fold(0u64, u64::checked_add)
}

fn saturating_total(values: impl IntoIterator<Item = u64>) -> u64 {
    values.into_iter().fold(0u64, u64::saturating_add)
}

fn to_token_list(totals: BTreeMap<String, u64>) -> Vec<TokenAmount> {
    totals
        .into_iter()
        .filter(|(_, quantity)| *quantity > 0)
        .map(|(token_id, quantity)| TokenAmount { token_id, quantity })
        .collect()
}

pub struct TransactionBuilder {
    params: ProtocolParams,
    network: NetworkId,
}

impl TransactionBuilder {
    pub fn new(params: ProtocolParams, network: NetworkId) -> Self {
        Self { params, network }
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn min_ada_required(&self, output: &TxOutput) -> u64 {
        (MIN_UTXO_OVERHEAD + output_size(output)) * self.params.coins_per_utxo_byte
    }

    pub fn fee_for_size(&self, size: u64) -> u64 {
        self.params.linear_fee_constant + self.params.linear_fee_coefficient * size
    }

    fn estimate_size(
        &self,
        inputs: usize,
        witnesses: usize,
        outputs: &[&TxOutput],
        request: &TxRequest,
        fee: u64,
    ) -> u64 {
        let certificates: u64 = request
            .certificates
            .iter()
            .map(|c| match c {
                Certificate::StakeDelegation { .. } => 70,
                _ => 40,
            })
            .sum();
        let withdrawals = 40 * request.withdrawals.len() as u64;
        let auxiliary = request
            .auxiliary_data
            .as_ref()
            .and_then(|a| serde_json::to_vec(a).ok())
            .map(|bytes| bytes.len() as u64 + 34)
            .unwrap_or(0);

        BODY_OVERHEAD
            + uint_size(fee)
            + uint_size(request.ttl)
            + INPUT_SIZE * inputs as u64
            + outputs.iter().map(|o| output_size(o)).sum::<u64>()
            + certificates
            + withdrawals
            + auxiliary
            + WITNESS_SIZE * witnesses as u64
    }

    fn witness_count(&self, selected: &[&AddressedUtxo], request: &TxRequest) -> usize {
        let keys: BTreeSet<(u32, u32)> = selected
            .iter()
            .map(|u| (u.addressing.role, u.addressing.index))
            .collect();
        let staking = !request.certificates.is_empty() || !request.withdrawals.is_empty();
        keys.len() + usize::from(staking)
    }

    /// Turn what the user asked for into outputs. Token-only sends carry the
    /// minimum ADA; a pure-ADA amount below the minimum is rejected.
    pub fn plan_send(&self, receiver: &str, tokens: &[SendToken], utxos: &[Utxo]) -> Result<SendPlan> {
        if tokens.is_empty() {
            return Err(WalletError::NoOutputs);
        }
        validate_address(receiver, self.network)?;

        if tokens
            .iter()
            .any(|t| matches!(t, SendToken::All { token_id } if token_id == PRIMARY_TOKEN_ID))
        {
            return Ok(SendPlan::All {
                receiver: receiver.to_string(),
            });
        }

        let mut ada = 0u64;
        let mut assets: BTreeMap<String, u64> = BTreeMap::new();
        for token in tokens {
            match token {
                SendToken::Amount { token_id, quantity } if token_id == PRIMARY_TOKEN_ID => {
                    ada = ada.checked_add(*quantity).ok_or_else(|| WalletError::NotEnoughMoney {
                        available: saturating_total(utxos.iter().map(|u| u.amount)),
                        required: u64::MAX,
                    })?;
                }
                SendToken::Amount { token_id, quantity } => {
                    if *quantity == 0 {
                        return Err(WalletError::InvalidInput(format!(
                            "Zero quantity for token {}",
                            token_id
                        )));
                    }
                    let total = assets.entry(token_id.clone()).or_default();
                    *total = total.checked_add(*quantity).ok_or_else(|| WalletError::NotEnoughMoney {
                        available: saturating_total(utxos.iter().map(|u| u.quantity_of(token_id))),
                        required: u64::MAX,
                    })?;
                }
                SendToken::All { token_id } => {
                    let held = saturating_total(utxos.iter().map(|u| u.quantity_of(token_id)));
                    if held == 0 {
                        return Err(WalletError::NotEnoughMoney {
                            available: 0,
                            required: 1,
                        });
                    }
                    let total = assets.entry(token_id.clone()).or_default();
                    *total = total.saturating_add(held);
                }
            }
        }

        let mut output = TxOutput {
            address: receiver.to_string(),
            amount: ada,
            assets: to_token_list(assets),
        };
        let min_ada = self.min_ada_required(&output);
        if output.amount < min_ada {
            if output.assets.is_empty() {
                return Err(WalletError::InvalidInput(format!(
                    "Amount {} is below the minimum of {} lovelace",
                    output.amount, min_ada
                )));
            }
            output.amount = min_ada;
            output.amount = self.min_ada_required(&output);
        }
        Ok(SendPlan::Outputs(vec![output]))
    }

    fn order_candidates<'a>(&self, request: &'a TxRequest, required: &BTreeMap<String, u64>) -> Vec<&'a AddressedUtxo> {
        let has_required = |u: &AddressedUtxo| {
            u.utxo
                .assets
                .iter()
                .any(|a| required.contains_key(&a.token_id))
        };
        let by_amount = |a: &&AddressedUtxo, b: &&AddressedUtxo| {
            b.utxo
                .amount
                .cmp(&a.utxo.amount)
                .then_with(|| a.utxo.key().cmp(&b.utxo.key()))
        };

        let mut with_tokens: Vec<&AddressedUtxo> = request.utxos.iter().filter(|u| has_required(u)).collect();
        let mut rest: Vec<&AddressedUtxo> = request.utxos.iter().filter(|u| !has_required(u)).collect();
        with_tokens.sort_by(by_amount);
        rest.sort_by(by_amount);
        with_tokens.extend(rest);
        with_tokens
    }

    fn plan(&self, selected: &[&AddressedUtxo], request: &TxRequest) -> Option<Plan> {
        let extra = checked_total(request.withdrawals.iter().map(|w| w.amount).chain([request.refund]))?;
        let input_ada = checked_total(selected.iter().map(|u| u.utxo.amount).chain([extra]))?;
        let required_ada = checked_total(request.outputs.iter().map(|o| o.amount).chain([request.deposit]))?;

        let required_tokens = sum_tokens(request.outputs.iter().flat_map(|o| o.assets.iter()));
        let mut change_tokens = sum_tokens(selected.iter().flat_map(|u| u.utxo.assets.iter()));
        for (token_id, quantity) in &required_tokens {
            let held = change_tokens.entry(token_id.clone()).or_default();
            *held = held.checked_sub(*quantity)?;
        }
        let change_assets = to_token_list(change_tokens);

        let witnesses = self.witness_count(selected, request);
        let size_with = |change: Option<&TxOutput>, fee: u64| {
            let outputs: Vec<&TxOutput> = request.outputs.iter().chain(change).collect();
            self.estimate_size(selected.len(), witnesses, &outputs, request, fee)
        };

        let mut change = TxOutput {
            address: request.change_address.clone(),
            amount: input_ada,
            assets: change_assets,
        };
        let mut fee = self.fee_for_size(size_with(Some(&change), 0));
        for _ in 0..MAX_FEE_ITERATIONS {
            change.amount = input_ada.checked_sub(required_ada.checked_add(fee)?)?;
            let next = self.fee_for_size(size_with(Some(&change), fee));
            if next <= fee {
                break;
            }
            fee = next;
        }
        change.amount = input_ada.checked_sub(required_ada.checked_add(fee)?)?;

        if change.amount >= self.min_ada_required(&change) {
            return Some(Plan {
                fee,
                change: Some(change),
            });
        }
        if !change.assets.is_empty() {
            return None;
        }

        // Dust change goes to the fee
        let fee_without_change = self.fee_for_size(size_with(None, fee));
        if input_ada >= required_ada.checked_add(fee_without_change)? {
            Some(Plan {
                fee: input_ada - required_ada,
                change: None,
            })
        } else {
            None
        }
    }

    pub fn build(&self, request: TxRequest) -> Result<UnsignedTx> {
        if request.outputs.is_empty() && request.certificates.is_empty() && request.withdrawals.is_empty() {
            return Err(WalletError::NoOutputs);
        }
        for output in &request.outputs {
            let min_ada = self.min_ada_required(output);
            if output.amount < min_ada {
                return Err(WalletError::InvalidInput(format!(
                    "Output to {} carries {} lovelace, minimum is {}",
                    output.address, output.amount, min_ada
                )));
            }
        }

        let required_tokens = sum_tokens(request.outputs.iter().flat_map(|o| o.assets.iter()));
        let candidates = self.order_candidates(&request, &required_tokens);

        let mut selected: Vec<&AddressedUtxo> = Vec::new();
        for candidate in candidates.iter().copied() {
            selected.push(candidate);
            if let Some(plan) = self.plan(&selected, &request) {
                log::debug!(
                    "Selected {} of {} utxos, fee {}",
                    selected.len(),
                    candidates.len(),
                    plan.fee
                );
                let selected: Vec<AddressedUtxo> = selected.into_iter().cloned().collect();
                return self.assemble(&request, selected, plan);
            }
        }

        let extra = saturating_total(request.withdrawals.iter().map(|w| w.amount).chain([request.refund]));
        let available = saturating_total(request.utxos.iter().map(|u| u.utxo.amount).chain([extra]));
        let outputs: Vec<&TxOutput> = request.outputs.iter().collect();
        let fee = self.fee_for_size(self.estimate_size(
            candidates.len().max(1),
            self.witness_count(&candidates, &request).max(1),
            &outputs,
            &request,
            0,
        ));
        let required = saturating_total(request.outputs.iter().map(|o| o.amount).chain([request.deposit, fee]));
        Err(WalletError::NotEnoughMoney {
            available,
            required,
        })
    }

    /// One output to `receiver` holding every token and all ADA minus the fee
    pub fn build_send_all(
        &self,
        utxos: Vec<AddressedUtxo>,
        receiver: &str,
        ttl: u64,
        auxiliary_data: Option<AuxiliaryData>,
    ) -> Result<UnsignedTx> {
        let available = saturating_total(utxos.iter().map(|u| u.utxo.amount));
        let request = TxRequest {
            utxos,
            outputs: Vec::new(),
            change_address: receiver.to_string(),
            change_addressing: Addressing { role: 0, index: 0 },
            ttl,
            certificates: Vec::new(),
            withdrawals: Vec::new(),
            deposit: 0,
            refund: 0,
            auxiliary_data,
        };
        if request.utxos.is_empty() {
            return Err(WalletError::NotEnoughMoney {
                available: 0,
                required: self.params.linear_fee_constant,
            });
        }

        let selected: Vec<&AddressedUtxo> = request.utxos.iter().collect();
        let mut output = TxOutput {
            address: receiver.to_string(),
            amount: available,
            assets: to_token_list(sum_tokens(selected.iter().flat_map(|u| u.utxo.assets.iter()))),
        };
        let witnesses = self.witness_count(&selected, &request);
        let mut fee = 0;
        for _ in 0..MAX_FEE_ITERATIONS {
            let next = self.fee_for_size(self.estimate_size(selected.len(), witnesses, &[&output], &request, fee));
            if next <= fee {
                break;
            }
            fee = next;
            output.amount = available.saturating_sub(fee);
        }

        let required = fee + self.min_ada_required(&output);
        if available < required {
            return Err(WalletError::NotEnoughMoney { available, required });
        }

        let plan = Plan {
            fee,
            change: None,
        };
        let mut request = request;
        request.outputs = vec![output];
        let utxos = std::mem::take(&mut request.utxos);
        self.assemble(&request, utxos, plan)
    }

    fn assemble(&self, request: &TxRequest, selected: Vec<AddressedUtxo>, plan: Plan) -> Result<UnsignedTx> {
        let mut outputs = request.outputs.clone();
        let mut change = Vec::new();
        let mut change_addressing = Vec::new();
        if let Some(output) = plan.change {
            change.push(output.clone());
            change_addressing.push(request.change_addressing);
            outputs.push(output);
        }
        if outputs.is_empty() {
            return Err(WalletError::NoOutputs);
        }

        let auxiliary_data_hash = match &request.auxiliary_data {
            Some(aux) => Some(aux.hash()?),
            None => None,
        };

        let input_addressing = selected.iter().map(|u| u.addressing).collect();
        let inputs = selected
            .into_iter()
            .map(|u| TxInput {
                tx_hash: u.utxo.tx_hash,
                index: u.utxo.tx_index,
                address: u.utxo.receiver,
                amount: u.utxo.amount,
                assets: u.utxo.assets,
            })
            .collect();

        Ok(UnsignedTx {
            body: TxBody {
                inputs,
                outputs,
                fee: plan.fee,
                ttl: request.ttl,
                certificates: request.certificates.clone(),
                withdrawals: request.withdrawals.clone(),
                auxiliary_data_hash,
            },
            change,
            input_addressing,
            change_addressing,
            auxiliary_data: request.auxiliary_data.clone(),
            deposit: request.deposit,
            refund: request.refund,
        })
    }
}
