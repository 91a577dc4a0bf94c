use std::path::{Component, Path, PathBuf};

use anyhow::Context as _;
use timelapse_bus::SnapshotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Commit,
    Author,
    Date,
}

/// Parses a commit list made of `Commit:`/`Author:`/`Date:` blocks, newest first,
/// and returns the accepted snapshots oldest first with their source-order ids.
pub fn parse_commit_log(text: &str, authors: &[String]) -> anyhow::Result<Vec<SnapshotId>> {
    let mut expect = Expect::Commit;
    let mut hash = "";
    let mut newest_first = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let (property, value) = if let Some(v) = line.strip_prefix("Commit: ") {
            (Expect::Commit, v.trim())
        } else if let Some(v) = line.strip_prefix("Author: ") {
            (Expect::Author, v.trim())
        } else if let Some(v) = line.strip_prefix("Date: ") {
            (Expect::Date, v.trim())
        } else {
            // the content is not echoed, errors travel back to remote observers
            anyhow::bail!("line {}: unrecognised commit log line", line_no);
        };

        if property != expect {
            log::debug!("line {}: expected {:?} property, skipping", line_no, expect);
            continue;
        }

        match property {
            Expect::Commit => {
                hash = value;
                expect = Expect::Author;
            }
            Expect::Author if !authors.iter().any(|a| a == value) => {
                log::debug!("line {}: ignoring commit by {}", line_no, value);
                expect = Expect::Commit;
            }
            Expect::Author => expect = Expect::Date,
            Expect::Date => {
                match value.parse::<i64>() {
                    Ok(date) => newest_first.push((hash.to_string(), date)),
                    Err(_) => log::warn!("line {}: bad date {:?}, skipping {}", line_no, value, hash),
                }
                expect = Expect::Commit;
            }
        }
    }

    let snapshots = newest_first
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, (hash, date))| SnapshotId::new(i as u32, hash, date))
        .collect();
    Ok(snapshots)
}

/// Joins an observer-supplied file name onto `dir`. Absolute paths and
/// anything that climbs out of `dir` are rejected.
pub fn resolve_commit_list(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let relative = Path::new(name);
    if name.is_empty() {
        anyhow::bail!("commit list name is empty");
    }
    let confined = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !confined {
        anyhow::bail!("commit list {:?} is outside the commit list directory", name);
    }
    Ok(dir.join(relative))
}

pub async fn load_commit_log(
    path: impl AsRef<Path>,
    authors: &[String],
) -> anyhow::Result<Vec<SnapshotId>> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading commit list {}", path.display()))?;
    let snapshots = parse_commit_log(&text, authors)
        .with_context(|| format!("parsing commit list {}", path.display()))?;
    if snapshots.is_empty() {
        anyhow::bail!("no usable commits in {}", path.display());
    }
    Ok(snapshots)
}
