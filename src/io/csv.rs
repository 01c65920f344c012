/*!
# CSV export of a stored chain

Enable via the `csv` feature.
*/

use csv::Writer;
use std::fs::File;
use std::path::Path;

use crate::error::{McmcError, Result};
use crate::store::ChainRecord;

/**
Saves one chain as a CSV file.

The resulting CSV file will have:
- A header row `step,accepted,proposal,log_likelihood,log_prior` followed by one
  column per parameter, named after `param_names`.
- One row per record, in the order given.

# Examples

```rust
use tunable_mcmc::io::csv::save_chain_csv;
use tunable_mcmc::model::ModelState;
use tunable_mcmc::store::ChainRecord;

let record = ChainRecord {
    step: 1,
    accepted: true,
    proposal: 0,
    state: ModelState {
        params: vec![0.5],
        log_likelihood: -0.125,
        log_prior: 0.0,
        grad_log_likelihood: None,
        grad_log_prior: None,
    },
};
let file = tempfile::NamedTempFile::new().unwrap();
save_chain_csv(&[record], &["mu".to_string()], file.path()).unwrap();
```
*/
pub fn save_chain_csv(
    records: &[ChainRecord],
    param_names: &[String],
    filename: impl AsRef<Path>,
) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(filename)?);

    let mut header: Vec<String> = ["step", "accepted", "proposal", "log_likelihood", "log_prior"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(param_names.iter().cloned());
    wtr.write_record(&header).map_err(csv_error)?;

    for record in records {
        if record.state.params.len() != param_names.len() {
            return Err(McmcError::Persistence(format!(
                "record at step {} has {} parameters, header has {}",
                record.step,
                record.state.params.len(),
                param_names.len()
            )));
        }
        let mut row = vec![
            record.step.to_string(),
            record.accepted.to_string(),
            record.proposal.to_string(),
            record.state.log_likelihood.to_string(),
            record.state.log_prior.to_string(),
        ];
        row.extend(record.state.params.iter().map(|v| v.to_string()));
        wtr.write_record(&row).map_err(csv_error)?;
    }

    wtr.flush()?;
    Ok(())
}

fn csv_error(e: csv::Error) -> McmcError {
    McmcError::Persistence(format!("csv: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelState;
    use std::fs;
    use tempfile::NamedTempFile;

    fn record(step: usize, params: Vec<f64>) -> ChainRecord {
        ChainRecord {
            step,
            accepted: step % 2 == 0,
            proposal: 0,
            state: ModelState {
                params,
                log_likelihood: -1.5,
                log_prior: 0.0,
                grad_log_likelihood: None,
                grad_log_prior: None,
            },
        }
    }

    #[test]
    fn test_save_chain_csv_empty() {
        let file = NamedTempFile::new().expect("Could not create temp file");
        save_chain_csv(&[], &["x".into()], file.path()).unwrap();
        let contents = fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            contents.trim(),
            "step,accepted,proposal,log_likelihood,log_prior,x"
        );
    }

    #[test]
    fn test_save_chain_csv_rows() {
        let file = NamedTempFile::new().expect("Could not create temp file");
        let records = [record(1, vec![1.0, 2.0]), record(2, vec![3.0, 4.0])];
        save_chain_csv(&records, &["x".into(), "y".into()], file.path()).unwrap();
        let contents = fs::read_to_string(file.path()).unwrap();
        let expected = "\
step,accepted,proposal,log_likelihood,log_prior,x,y
1,false,0,-1.5,0,1,2
2,true,0,-1.5,0,3,4";
        assert_eq!(contents.trim(), expected);
    }

    #[test]
    fn test_save_chain_csv_rejects_ragged_records() {
        let file = NamedTempFile::new().expect("Could not create temp file");
        let err = save_chain_csv(&[record(1, vec![1.0])], &["x".into(), "y".into()], file.path())
            .unwrap_err();
        assert!(err.is_persistence());
    }
}
