use crate::types::Incident;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOp {
    Create,
    Update,
}

/// One line of the store journal: the full document after the write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts: DateTime<Utc>,
    pub op: JournalOp,
    pub incident: Incident,
}

/// Append-only NDJSON log of store writes.
pub struct Journal {
    writer: Option<BufWriter<File>>,
}

impl Journal {
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        repair_tail(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn append(&mut self, op: JournalOp, incident: &Incident) -> anyhow::Result<()> {
        if let Some(writer) = &mut self.writer {
            let entry = JournalEntry {
                ts: Utc::now(),
                op,
                incident: incident.clone(),
            };
            let json = serde_json::to_string(&entry)?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Rebuild the latest version of every document. A missing file is an
    /// empty store; a torn last line (crash mid-write) is skipped.
    pub fn replay(path: &Path) -> anyhow::Result<Vec<Incident>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut docs: HashMap<String, Incident> = HashMap::new();
        let mut lines = reader.lines().peekable();
        let mut line_no = 0usize;

        while let Some(line) = lines.next() {
            let line = line?;
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => {
                    docs.insert(entry.incident.id.clone(), entry.incident);
                }
                Err(e) if lines.peek().is_none() => {
                    warn!("Ignoring torn journal tail at line {}: {}", line_no, e);
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "Corrupt journal {} at line {}: {}",
                        path.display(),
                        line_no,
                        e
                    ));
                }
            }
        }

        Ok(docs.into_values().collect())
    }

    pub fn close(&mut self) -> anyhow::Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        self.writer = None;
        Ok(())
    }
}

/// Make sure the next append starts on a fresh line. A complete entry that
/// only lacks its newline is kept; a torn one is cut off, matching what
/// `replay` skipped.
fn repair_tail(path: &Path) -> anyhow::Result<()> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }

    let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    let tail = &bytes[keep..];
    if serde_json::from_slice::<JournalEntry>(tail).is_ok() {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(b"\n")?;
    } else {
        warn!(
            "Truncating torn journal tail of {} bytes in {}",
            tail.len(),
            path.display()
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(keep as u64)?;
    }
    Ok(())
}

impl Drop for Journal {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Authorship, IncidentStatus};

    fn incident(id: &str, status: IncidentStatus) -> Incident {
        let now = Utc::now();
        Incident {
            id: id.to_string(),
            incident_type: "accident".to_string(),
            subtype: None,
            title: "Collision".to_string(),
            description: None,
            location: "Kaloum".to_string(),
            coordinates: None,
            image_ref: None,
            status,
            authorship: Authorship::Anonymous { name: None, email: None },
            created_at: now,
            updated_at: now,
            approved_at: None,
            rejected_at: None,
        }
    }

    #[test]
    fn test_replay_keeps_latest_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("journal.ndjson");

        let mut journal = Journal::open(path.clone()).unwrap();
        journal.append(JournalOp::Create, &incident("a", IncidentStatus::Pending)).unwrap();
        journal.append(JournalOp::Create, &incident("b", IncidentStatus::Pending)).unwrap();
        journal.append(JournalOp::Update, &incident("a", IncidentStatus::Approved)).unwrap();
        journal.close().unwrap();

        let mut docs = Journal::replay(&path).unwrap();
        docs.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].status, IncidentStatus::Approved);
        assert_eq!(docs[1].status, IncidentStatus::Pending);
    }

    #[test]
    fn test_replay_tolerates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.ndjson");
        {
            let mut journal = Journal::open(path.clone()).unwrap();
            journal.append(JournalOp::Create, &incident("a", IncidentStatus::Pending)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"ts\":\"2024-").unwrap();

        let docs = Journal::replay(&path).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_reopen_after_torn_tail_keeps_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.ndjson");
        {
            let mut journal = Journal::open(path.clone()).unwrap();
            journal.append(JournalOp::Create, &incident("a", IncidentStatus::Pending)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"ts\":\"2024-").unwrap();
        drop(file);
        assert_eq!(Journal::replay(&path).unwrap().len(), 1);

        {
            let mut journal = Journal::open(path.clone()).unwrap();
            journal.append(JournalOp::Create, &incident("b", IncidentStatus::Pending)).unwrap();
            journal.append(JournalOp::Create, &incident("c", IncidentStatus::Pending)).unwrap();
        }

        let mut ids: Vec<String> = Journal::replay(&path).unwrap().into_iter().map(|d| d.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reopen_keeps_complete_unterminated_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.ndjson");
        let entry = JournalEntry {
            ts: Utc::now(),
            op: JournalOp::Create,
            incident: incident("a", IncidentStatus::Pending),
        };
        std::fs::write(&path, serde_json::to_string(&entry).unwrap()).unwrap();

        {
            let mut journal = Journal::open(path.clone()).unwrap();
            journal.append(JournalOp::Update, &incident("a", IncidentStatus::Approved)).unwrap();
        }

        let docs = Journal::replay(&path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, IncidentStatus::Approved);
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Journal::replay(&dir.path().join("none.ndjson")).unwrap().is_empty());
    }
}
