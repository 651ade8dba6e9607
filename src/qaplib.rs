//! QAPLIB importer.
//!
//! A QAPLIB file holds the size N followed by the flow and distance
//! matrices, N rows of N integers each. Published files wrap long rows over
//! several physical lines and separate blocks by blank lines, so rows are
//! rebuilt token-wise before parsing.

use crate::error::{QapError, Result};
use crate::instance::QapInstance;
use std::fs;
use std::path::Path;

/// Regroup the tokens after the size header into rows of exactly `n`.
///
/// Blank lines are skipped. A physical line that would push a row past `n`
/// tokens, or tokens left over at the end, make the file malformed.
pub fn normalize_rows(text: &str) -> Result<(usize, Vec<Vec<String>>)> {
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
    let header = lines
        .next()
        .ok_or_else(|| QapError::MalformedQaplibFile("empty file".to_string()))?;
    let mut header_tokens = header.split_whitespace();
    let n: usize = header_tokens
        .next()
        .and_then(|t| t.parse().ok())
        .filter(|&n| n > 0)
        .ok_or_else(|| QapError::MalformedQaplibFile(format!("invalid size header `{}`", header)))?;

    let mut rows = Vec::with_capacity(2 * n);
    let mut current: Vec<String> = header_tokens.map(str::to_string).collect();
    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if current.len() + tokens.len() > n {
            return Err(QapError::MalformedQaplibFile(format!(
                "row {} overflows: {} tokens where {} were expected",
                rows.len() + 1,
                current.len() + tokens.len(),
                n
            )));
        }
        current.extend(tokens.into_iter().map(str::to_string));
        if current.len() == n {
            rows.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        return Err(QapError::MalformedQaplibFile(format!(
            "{} leftover tokens after row {}",
            current.len(),
            rows.len()
        )));
    }
    Ok((n, rows))
}

/// Parse QAPLIB text into an instance with facilities `f1..fN` and
/// locations `1..N`.
pub fn parse_qaplib(name: &str, text: &str) -> Result<QapInstance> {
    let (n, rows) = normalize_rows(text)?;
    if rows.len() != 2 * n {
        return Err(QapError::MalformedQaplibFile(format!(
            "expected {} matrix rows, found {}",
            2 * n,
            rows.len()
        )));
    }

    let parse_row = |row: &[String]| -> Result<Vec<i64>> {
        row.iter()
            .map(|t| {
                t.parse::<i64>()
                    .map_err(|_| QapError::MalformedQaplibFile(format!("`{}` is not an integer", t)))
            })
            .collect()
    };
    let flow = rows[..n].iter().map(|r| parse_row(r.as_slice())).collect::<Result<Vec<_>>>()?;
    let distance = rows[n..]
        .iter()
        .map(|r| parse_row(r.as_slice()).map(|v| v.into_iter().map(|d| d as f64).collect()))
        .collect::<Result<Vec<Vec<f64>>>>()?;

    QapInstance::new(
        name,
        (1..=n).map(|i| format!("f{}", i)).collect(),
        (1..=n).map(|i| i.to_string()).collect(),
        flow,
        distance,
    )
}

/// Load a QAPLIB `.dat` file; the instance is named after the file stem.
pub fn load_qaplib<P: AsRef<Path>>(path: P) -> Result<QapInstance> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(QapError::InstanceNotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "qaplib".to_string());
    let instance = parse_qaplib(&name, &text)?;
    log::info!("Imported QAPLIB {} (n = {})", name, instance.num_facilities());
    Ok(instance)
}
