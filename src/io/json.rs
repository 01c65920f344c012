/*!
# Directory-backed chain store

[`JsonStore`] keeps one directory per sampling run:

```text
<root>/proposals.jsonl        one ProposalState per line
<root>/chain_00000.jsonl      one ChainRecord per line
<root>/chain_00001.jsonl
...
```

Every record is flushed as soon as it is written, so a run that dies halfway
leaves a readable prefix behind. Reopening an existing directory picks up the
stored proposals and chains and appends to them.

# Examples

```rust
use tunable_mcmc::io::json::JsonStore;
use tunable_mcmc::store::ChainStore;

let dir = tempfile::tempdir().unwrap();
let store = JsonStore::open(dir.path()).unwrap();
assert_eq!(store.num_chains(), 0);
```
*/

use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{McmcError, Result};
use crate::model::ModelState;
use crate::proposal::ProposalState;
use crate::store::{
    current_proposal, dangling_proposal, no_such_chain, no_such_record, ChainRecord, ChainStore,
};

const PROPOSALS_FILE: &str = "proposals.jsonl";

#[derive(Debug)]
pub struct JsonStore {
    root: PathBuf,
    proposals: Vec<ProposalState>,
    chain_lens: Vec<usize>,
    writer: Option<(usize, BufWriter<File>)>,
}

impl JsonStore {
    /// Opens `root`, creating it if needed and loading whatever it already holds.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let proposals = match File::open(root.join(PROPOSALS_FILE)) {
            Ok(file) => read_lines(file)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut chain_lens = Vec::new();
        loop {
            let path = chain_path(&root, chain_lens.len());
            if !path.exists() {
                break;
            }
            let lines = BufReader::new(File::open(path)?).lines();
            let mut len = 0;
            for line in lines {
                if !line?.trim().is_empty() {
                    len += 1;
                }
            }
            chain_lens.push(len);
        }

        debug!(
            "opened chain store {} ({} proposals, {} chains)",
            root.display(),
            proposals.len(),
            chain_lens.len()
        );
        Ok(Self {
            root,
            proposals,
            chain_lens,
            writer: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All records of `chain`, in write order.
    pub fn read_chain(&self, chain: usize) -> Result<Vec<ChainRecord>> {
        if chain >= self.chain_lens.len() {
            return Err(no_such_chain(chain, self.chain_lens.len()));
        }
        read_lines(File::open(chain_path(&self.root, chain))?)
    }

    fn append_to_current(&mut self, line: &str) -> Result<()> {
        let chain = self
            .chain_lens
            .len()
            .checked_sub(1)
            .ok_or_else(|| McmcError::Persistence("no chain has been started".into()))?;
        if !matches!(&self.writer, Some((open, _)) if *open == chain) {
            let file = OpenOptions::new()
                .append(true)
                .open(chain_path(&self.root, chain))?;
            self.writer = Some((chain, BufWriter::new(file)));
        }
        if let Some((_, wtr)) = self.writer.as_mut() {
            writeln!(wtr, "{line}")?;
            wtr.flush()?;
        }
        self.chain_lens[chain] += 1;
        Ok(())
    }
}

fn chain_path(root: &Path, chain: usize) -> PathBuf {
    root.join(format!("chain_{chain:05}.jsonl"))
}

fn read_lines<T: serde::de::DeserializeOwned>(file: File) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line)?);
    }
    Ok(out)
}

impl ChainStore for JsonStore {
    fn add_proposal_record(&mut self, state: &ProposalState) -> Result<usize> {
        let line = serde_json::to_string(state)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(PROPOSALS_FILE))?;
        writeln!(file, "{line}")?;
        file.flush()?;
        self.proposals.push(state.clone());
        Ok(self.proposals.len() - 1)
    }

    fn start_new_chain(&mut self) -> Result<usize> {
        let chain = self.chain_lens.len();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(chain_path(&self.root, chain))?;
        self.writer = Some((chain, BufWriter::new(file)));
        self.chain_lens.push(0);
        Ok(chain)
    }

    fn add_chain_record(
        &mut self,
        step: usize,
        accepted: bool,
        state: &ModelState,
    ) -> Result<()> {
        let record = ChainRecord {
            step,
            accepted,
            proposal: current_proposal(self.proposals.len())?,
            state: state.clone(),
        };
        let line = serde_json::to_string(&record)?;
        self.append_to_current(&line)
    }

    fn get_state(&self, chain: usize, index: usize) -> Result<(ModelState, ProposalState)> {
        if chain >= self.chain_lens.len() {
            return Err(no_such_chain(chain, self.chain_lens.len()));
        }
        let line = BufReader::new(File::open(chain_path(&self.root, chain))?)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .nth(index)
            .ok_or_else(|| no_such_record(chain, index))??;
        let record: ChainRecord = serde_json::from_str(&line)?;
        let proposal = self
            .proposals
            .get(record.proposal)
            .ok_or_else(|| dangling_proposal(record.proposal))?;
        Ok((record.state, proposal.clone()))
    }

    fn num_chains(&self) -> usize {
        self.chain_lens.len()
    }

    fn chain_len(&self, chain: usize) -> Result<usize> {
        self.chain_lens
            .get(chain)
            .copied()
            .ok_or_else(|| no_such_chain(chain, self.chain_lens.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::KernelState;
    use ndarray::arr2;
    use tempfile::tempdir;

    fn proposal() -> ProposalState {
        ProposalState {
            name: "Random Walk".into(),
            kernel: KernelState::RandomWalk {
                scale: 0.4,
                cov: Some(arr2(&[[1.0, 0.1], [0.1, 2.0]])),
            },
            tuner: None,
        }
    }

    fn state(x: f64) -> ModelState {
        ModelState {
            params: vec![x, 2.0 * x],
            log_likelihood: -x,
            log_prior: -1.0,
            grad_log_likelihood: Some(vec![1.0, 2.0]),
            grad_log_prior: Some(vec![0.0, 0.0]),
        }
    }

    #[test]
    fn records_survive_reopening() {
        let dir = tempdir().unwrap();
        {
            let mut store = JsonStore::open(dir.path()).unwrap();
            store.add_proposal_record(&proposal()).unwrap();
            store.start_new_chain().unwrap();
            store.add_chain_record(1, true, &state(0.1)).unwrap();
            store.add_chain_record(2, false, &state(0.2)).unwrap();
        }
        assert!(dir.path().join("chain_00000.jsonl").exists());

        let mut store = JsonStore::open(dir.path()).unwrap();
        assert_eq!(store.num_chains(), 1);
        assert_eq!(store.chain_len(0).unwrap(), 2);
        assert_eq!(store.get_state(0, 1).unwrap(), (state(0.2), proposal()));

        // Appending after a reopen continues the last chain.
        store.add_chain_record(3, true, &state(0.3)).unwrap();
        assert_eq!(store.latest_state(0).unwrap().0, state(0.3));
        let steps: Vec<usize> = store.read_chain(0).unwrap().iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[test]
    fn second_chain_gets_its_own_file() {
        let dir = tempdir().unwrap();
        let mut store = JsonStore::open(dir.path()).unwrap();
        store.add_proposal_record(&proposal()).unwrap();
        assert_eq!(store.start_new_chain().unwrap(), 0);
        store.add_chain_record(1, true, &state(1.0)).unwrap();
        assert_eq!(store.start_new_chain().unwrap(), 1);
        store.add_chain_record(1, true, &state(2.0)).unwrap();

        assert_eq!(store.chain_len(0).unwrap(), 1);
        assert_eq!(store.read_chain(1).unwrap()[0].state, state(2.0));
    }

    #[test]
    fn missing_chain_or_record_is_a_persistence_error() {
        let dir = tempdir().unwrap();
        let mut store = JsonStore::open(dir.path()).unwrap();
        store.add_proposal_record(&proposal()).unwrap();
        assert!(store.add_chain_record(1, true, &state(0.0)).unwrap_err().is_persistence());
        store.start_new_chain().unwrap();
        assert!(store.get_state(0, 0).unwrap_err().is_persistence());
        assert!(store.get_state(5, 0).unwrap_err().is_persistence());
    }
}
