use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use apedrop_leaf::EligibilityRecord;
use tracing::{debug, info};

/// Read an eligibility list, one `address,amount` pair per line.
pub fn read_records(path: &Path) -> Result<Vec<EligibilityRecord>> {
    info!(path = %path.display(), "reading eligibility list");
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let records = parse_records(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))?;
    info!(records = records.len(), "eligibility list loaded");
    Ok(records)
}

/// Blank lines and `#` comments are skipped. An `address,amount` header is
/// allowed before the first record.
pub fn parse_records<R: BufRead>(reader: R) -> Result<Vec<EligibilityRecord>> {
    let mut records = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let lineno = n + 1;
        let line = line.with_context(|| format!("failed to read line {lineno}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut cols = trimmed.split(',').map(|c| c.trim().trim_matches('"'));
        let (Some(address), Some(amount), None) = (cols.next(), cols.next(), cols.next()) else {
            bail!("line {lineno}: expected `address,amount`");
        };
        if records.is_empty() && address.eq_ignore_ascii_case("address") {
            debug!(lineno, "skipping header");
            continue;
        }
        let record = EligibilityRecord::parse(address, amount).with_context(|| format!("line {lineno}"))?;
        records.push(record);
    }
    Ok(records)
}
