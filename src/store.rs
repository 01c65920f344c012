/*!
Append-only persistence of sampled chains.

The driver talks to a [`ChainStore`] in a fixed order: one
[`ChainStore::add_proposal_record`] and one [`ChainStore::start_new_chain`] at
the start of every `sample` call, then one [`ChainStore::add_chain_record`]
per recorded step. Each chain record points at the proposal record that was
active when it was written, so any record can be turned back into a
`(ModelState, ProposalState)` pair to resume from.

[`MemoryStore`] keeps everything in memory; [`JsonStore`](crate::io::json::JsonStore)
keeps it on disk.
*/

use serde::{Deserialize, Serialize};

use crate::error::{McmcError, Result};
use crate::model::ModelState;
use crate::proposal::ProposalState;

/// One recorded step. Never mutated after being written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    /// 1-based step label within the `sample` call that produced it.
    pub step: usize,
    pub accepted: bool,
    /// Index of the proposal record active at this step.
    pub proposal: usize,
    pub state: ModelState,
}

pub trait ChainStore {
    /// Appends a proposal snapshot and returns its index. Subsequent chain
    /// records refer to it.
    fn add_proposal_record(&mut self, state: &ProposalState) -> Result<usize>;

    /// Opens a new chain and returns its index.
    fn start_new_chain(&mut self) -> Result<usize>;

    /// Appends a record to the most recently started chain.
    fn add_chain_record(&mut self, step: usize, accepted: bool, state: &ModelState)
        -> Result<()>;

    /// Model and proposal state of the `index`-th record of `chain`.
    fn get_state(&self, chain: usize, index: usize) -> Result<(ModelState, ProposalState)>;

    fn num_chains(&self) -> usize;

    /// Number of records in `chain`.
    fn chain_len(&self, chain: usize) -> Result<usize>;

    /// State of the last record of `chain`.
    fn latest_state(&self, chain: usize) -> Result<(ModelState, ProposalState)> {
        let len = self.chain_len(chain)?;
        if len == 0 {
            return Err(McmcError::Persistence(format!("chain {chain} is empty")));
        }
        self.get_state(chain, len - 1)
    }
}

/// In-memory [`ChainStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    proposals: Vec<ProposalState>,
    chains: Vec<Vec<ChainRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proposals(&self) -> &[ProposalState] {
        &self.proposals
    }

    pub fn chain(&self, chain: usize) -> Option<&[ChainRecord]> {
        self.chains.get(chain).map(Vec::as_slice)
    }
}

impl ChainStore for MemoryStore {
    fn add_proposal_record(&mut self, state: &ProposalState) -> Result<usize> {
        self.proposals.push(state.clone());
        Ok(self.proposals.len() - 1)
    }

    fn start_new_chain(&mut self) -> Result<usize> {
        self.chains.push(Vec::new());
        Ok(self.chains.len() - 1)
    }

    fn add_chain_record(
        &mut self,
        step: usize,
        accepted: bool,
        state: &ModelState,
    ) -> Result<()> {
        let proposal = current_proposal(self.proposals.len())?;
        let chain = self
            .chains
            .last_mut()
            .ok_or_else(|| McmcError::Persistence("no chain has been started".into()))?;
        chain.push(ChainRecord {
            step,
            accepted,
            proposal,
            state: state.clone(),
        });
        Ok(())
    }

    fn get_state(&self, chain: usize, index: usize) -> Result<(ModelState, ProposalState)> {
        let record = self
            .chain(chain)
            .ok_or_else(|| no_such_chain(chain, self.chains.len()))?
            .get(index)
            .ok_or_else(|| no_such_record(chain, index))?;
        let proposal = self
            .proposals
            .get(record.proposal)
            .ok_or_else(|| dangling_proposal(record.proposal))?;
        Ok((record.state.clone(), proposal.clone()))
    }

    fn num_chains(&self) -> usize {
        self.chains.len()
    }

    fn chain_len(&self, chain: usize) -> Result<usize> {
        self.chain(chain)
            .map(<[ChainRecord]>::len)
            .ok_or_else(|| no_such_chain(chain, self.chains.len()))
    }
}

pub(crate) fn current_proposal(num_proposals: usize) -> Result<usize> {
    num_proposals
        .checked_sub(1)
        .ok_or_else(|| McmcError::Persistence("no proposal record has been added".into()))
}

pub(crate) fn no_such_chain(chain: usize, num_chains: usize) -> McmcError {
    McmcError::Persistence(format!(
        "chain {chain} does not exist ({num_chains} chains stored)"
    ))
}

pub(crate) fn no_such_record(chain: usize, index: usize) -> McmcError {
    McmcError::Persistence(format!("chain {chain} has no record {index}"))
}

pub(crate) fn dangling_proposal(proposal: usize) -> McmcError {
    McmcError::Persistence(format!("proposal record {proposal} does not exist"))
}
