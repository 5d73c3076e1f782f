//! Readers for the binlog coordinates each backup format carries.
//!
//! | Method      | Artifact                    | Markers                                   |
//! |-------------|-----------------------------|-------------------------------------------|
//! | mysqldump   | the dump itself             | `GTID_PURGED`, `CHANGE MASTER TO`         |
//! | mydumper    | `metadata`                  | `SHOW MASTER STATUS:` block or `[source]` |
//! | xtrabackup  | `xtrabackup_binlog_info`    | `file<TAB>pos[<TAB>gtid]`                 |
//! | LVM         | `binlog_info.json`          | `{"LogFile", "LogPos", "GtidExecuted"}`   |
//!
//! The parsers take text (or a reader, for dumps too large to load) and
//! return a plain reason on failure; the `read_*` wrappers attach the path.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use seed_agent_core::BackupMetadata;

use crate::database::normalize_gtid;
use crate::error::{MethodError, Result};

/// Sidecar written next to an LVM snapshot.
pub const LVM_SIDECAR: &str = "binlog_info.json";

/// File mydumper writes its coordinates to.
pub const MYDUMPER_METADATA: &str = "metadata";

/// File xtrabackup writes its coordinates to.
pub const XTRABACKUP_BINLOG_INFO: &str = "xtrabackup_binlog_info";

type Parsed = std::result::Result<BackupMetadata, String>;

// ============================================================================
// mysqldump
// ============================================================================

/// Read the coordinates from a mysqldump file header.
///
/// # Errors
///
/// `MissingArtifact` if the file does not exist, `MalformedMetadata` if the
/// header carries no usable `CHANGE MASTER TO` line.
pub async fn read_mysqldump(path: &Path) -> Result<BackupMetadata> {
    let owned = path.to_path_buf();
    let parsed = tokio::task::spawn_blocking(move || -> Result<Parsed> {
        let file = std::fs::File::open(&owned).map_err(|e| MethodError::io(&owned, e))?;
        Ok(parse_mysqldump(std::io::BufReader::new(file)))
    })
    .await
    .map_err(|e| MethodError::io(path, std::io::Error::other(e)))??;

    attach_path(path, parsed)
}

/// Parse a mysqldump header.
///
/// Scanning stops at the coordinates line or at the first database section.
///
/// # Errors
///
/// Returns the reason the header could not be used.
pub fn parse_mysqldump(reader: impl BufRead) -> Parsed {
    let mut meta = BackupMetadata::default();
    let mut gtid: Option<String> = None;
    let mut gtid_open = false;

    for line in reader.lines() {
        let line = line.map_err(|e| e.to_string())?;

        if gtid_open {
            let buf = gtid.get_or_insert_with(String::new);
            buf.push_str(&line);
            gtid_open = !line.contains(';');
            continue;
        }
        if let Some(idx) = line.find("GTID_PURGED") {
            let rest = line[idx..].split_once('=').map_or("", |(_, v)| v);
            gtid = Some(rest.to_string());
            gtid_open = !rest.contains(';');
            continue;
        }
        if line.contains("CHANGE MASTER TO") || line.contains("CHANGE REPLICATION SOURCE TO") {
            let (file, pos) = change_master_coordinates(&line)?;
            meta.log_file = file;
            meta.log_pos = pos;
            break;
        }
        if line.starts_with("-- Current Database:") {
            break;
        }
    }

    if meta.is_empty() {
        return Err("no CHANGE MASTER TO line in dump header".into());
    }
    if let Some(raw) = gtid {
        meta.gtid_executed = quoted_gtid_set(&raw);
    }
    Ok(meta)
}

fn change_master_coordinates(line: &str) -> std::result::Result<(String, i64), String> {
    let file = line
        .find("LOG_FILE='")
        .map(|idx| &line[idx + "LOG_FILE='".len()..])
        .and_then(|rest| rest.split_once('\''))
        .map(|(file, _)| file.to_string())
        .ok_or_else(|| format!("no log file in `{}`", line.trim()))?;

    let pos = line
        .find("LOG_POS=")
        .map(|idx| &line[idx + "LOG_POS=".len()..])
        .map(|rest| {
            rest.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
        })
        .ok_or_else(|| format!("no log position in `{}`", line.trim()))?;

    let pos = pos
        .parse::<i64>()
        .map_err(|e| format!("bad log position in `{}`: {e}", line.trim()))?;
    Ok((file, pos))
}

/// `/*!80000 '+'*/ 'uuid:1-5,\nuuid:1';` -> `uuid:1-5,uuid:1`
fn quoted_gtid_set(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("/*") {
        text.push_str(&rest[..start]);
        rest = rest[start..].find("*/").map_or("", |end| &rest[start + end + 2..]);
    }
    text.push_str(rest);

    let inner = match (text.find('\''), text.rfind('\'')) {
        (Some(first), Some(last)) if last > first => &text[first + 1..last],
        _ => text.trim_end_matches(';'),
    };
    normalize_gtid(inner)
}

// ============================================================================
// mydumper
// ============================================================================

/// Read mydumper's `metadata` file from `dir`.
///
/// # Errors
///
/// `MissingArtifact` or `MalformedMetadata`.
pub async fn read_mydumper(dir: &Path) -> Result<BackupMetadata> {
    let path = dir.join(MYDUMPER_METADATA);
    let text = read_text(&path).await?;
    attach_path(&path, parse_mydumper(&text))
}

/// Parse mydumper's `metadata` file.
///
/// Both the classic `SHOW MASTER STATUS:` block and the newer INI style
/// `[source]` / `[master]` section are understood.
///
/// # Errors
///
/// Returns the reason the file could not be used.
pub fn parse_mydumper(text: &str) -> Parsed {
    let mut meta = BackupMetadata::default();
    let mut in_block = false;
    let mut gtid_open = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if gtid_open {
            meta.gtid_executed.push_str(trimmed);
            gtid_open = trimmed.ends_with(',');
            continue;
        }
        if trimmed.starts_with("SHOW MASTER STATUS")
            || trimmed.starts_with("SHOW BINARY LOG STATUS")
            || trimmed == "[source]"
            || trimmed == "[master]"
        {
            in_block = true;
            continue;
        }
        if !in_block {
            continue;
        }
        if trimmed.starts_with("SHOW SLAVE STATUS")
            || trimmed.starts_with("SHOW REPLICA STATUS")
            || trimmed.starts_with("Finished dump")
            || (trimmed.starts_with('[') && trimmed.ends_with(']'))
        {
            break;
        }

        let Some((key, value)) = trimmed
            .split_once(':')
            .filter(|(key, _)| !key.contains('='))
            .or_else(|| trimmed.split_once('='))
        else {
            continue;
        };
        let value = value.trim().trim_matches('\'');
        match key.trim() {
            "Log" | "File" => meta.log_file = value.to_string(),
            "Pos" | "Position" => {
                meta.log_pos = value
                    .parse()
                    .map_err(|e| format!("bad position `{value}`: {e}"))?;
            }
            "GTID" | "Executed_Gtid_Set" => {
                meta.gtid_executed = value.to_string();
                gtid_open = value.ends_with(',');
            }
            _ => {}
        }
    }

    if meta.is_empty() {
        return Err("no binlog coordinates in metadata file".into());
    }
    meta.gtid_executed = normalize_gtid(&meta.gtid_executed);
    Ok(meta)
}

// ============================================================================
// xtrabackup
// ============================================================================

/// Read `xtrabackup_binlog_info` from `dir`.
///
/// # Errors
///
/// `MissingArtifact` or `MalformedMetadata`.
pub async fn read_xtrabackup(dir: &Path) -> Result<BackupMetadata> {
    let path = dir.join(XTRABACKUP_BINLOG_INFO);
    let text = read_text(&path).await?;
    attach_path(&path, parse_xtrabackup(&text))
}

/// Parse `xtrabackup_binlog_info`.
///
/// # Errors
///
/// Returns the reason the file could not be used.
pub fn parse_xtrabackup(text: &str) -> Parsed {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or_default();
    let mut fields = first.split('\t');

    let log_file = fields.next().unwrap_or_default().trim();
    if log_file.is_empty() {
        return Err("empty binlog info".into());
    }
    let pos = fields
        .next()
        .map(str::trim)
        .ok_or_else(|| "missing binlog position".to_string())?;
    let log_pos = pos
        .parse::<i64>()
        .map_err(|e| format!("bad position `{pos}`: {e}"))?;

    let mut gtid: String = fields.collect::<Vec<_>>().join("");
    for line in lines {
        gtid.push_str(line);
    }
    Ok(BackupMetadata::positional(log_file, log_pos).with_gtid(normalize_gtid(&gtid)))
}

// ============================================================================
// LVM sidecar
// ============================================================================

/// Read the LVM sidecar from `dir`.
///
/// # Errors
///
/// `MissingArtifact` or `MalformedMetadata`.
pub async fn read_sidecar(dir: &Path) -> Result<BackupMetadata> {
    let path = dir.join(LVM_SIDECAR);
    let text = read_text(&path).await?;
    let meta: BackupMetadata =
        serde_json::from_str(&text).map_err(|e| MethodError::MalformedMetadata {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    attach_path(
        &path,
        if meta.is_empty() {
            Err("sidecar has no log file".into())
        } else {
            Ok(meta)
        },
    )
}

/// Write the LVM sidecar into `dir`.
///
/// # Errors
///
/// Returns `Io` if the file cannot be written.
pub async fn write_sidecar(dir: &Path, meta: &BackupMetadata) -> Result<PathBuf> {
    let path = dir.join(LVM_SIDECAR);
    let json = serde_json::to_vec(meta).map_err(|e| MethodError::MalformedMetadata {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| MethodError::Io {
            path: path.clone(),
            source: e,
        })?;
    Ok(path)
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| MethodError::io(path, e))
}

fn attach_path(path: &Path, parsed: Parsed) -> Result<BackupMetadata> {
    parsed.map_err(|reason| MethodError::MalformedMetadata {
        path: path.to_path_buf(),
        reason,
    })
}
