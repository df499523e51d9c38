use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const RECORD_SCHEMA: &str = "fieldmark.audit_record.v1";

const DIGEST_HEX_LEN: usize = 64;

/// One signing event: which source became which output, when, and with how many fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub original_digest: String,
    pub output_digest: String,
    /// RFC 3339 timestamp supplied by the caller.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,
    pub field_count: usize,
}

impl AuditRecord {
    pub fn new(
        original_digest: impl Into<String>,
        output_digest: impl Into<String>,
        timestamp: impl Into<String>,
        source_filename: Option<String>,
        field_count: usize,
    ) -> Self {
        Self {
            original_digest: normalize_digest(&original_digest.into()),
            output_digest: normalize_digest(&output_digest.into()),
            timestamp: timestamp.into(),
            source_filename,
            field_count,
        }
    }

    pub fn validate(&self) -> Result<(), AuditError> {
        for (name, digest) in [
            ("originalDigest", &self.original_digest),
            ("outputDigest", &self.output_digest),
        ] {
            if !is_hex_digest(digest) {
                return Err(AuditError::InvalidRecord(format!(
                    "{name} must be {DIGEST_HEX_LEN} lowercase hex characters"
                )));
            }
        }
        if self.timestamp.trim().is_empty() {
            return Err(AuditError::InvalidRecord("timestamp is empty".to_string()));
        }
        Ok(())
    }

    pub fn matches_digest(&self, digest: &str) -> bool {
        let digest = normalize_digest(digest);
        self.original_digest == digest || self.output_digest == digest
    }

    /// SHA-256 over the schema id and the record's canonical JSON (sorted keys, no whitespace).
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_value(self)
            .map(|value| value.to_string())
            .unwrap_or_default();
        let mut payload = Vec::with_capacity(RECORD_SCHEMA.len() + 1 + canonical.len());
        payload.extend_from_slice(RECORD_SCHEMA.as_bytes());
        payload.push(b'\n');
        payload.extend_from_slice(canonical.as_bytes());
        hex_sha256(&payload)
    }
}

#[derive(Debug)]
pub enum AuditError {
    InvalidRecord(String),
    Malformed { line: usize, message: String },
    Poisoned,
    Io(io::Error),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditError::InvalidRecord(message) => write!(f, "invalid audit record: {}", message),
            AuditError::Malformed { line, message } => {
                write!(f, "malformed audit log line {}: {}", line, message)
            }
            AuditError::Poisoned => write!(f, "audit log lock poisoned"),
            AuditError::Io(err) => write!(f, "audit log io error: {}", err),
        }
    }
}

impl std::error::Error for AuditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuditError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for AuditError {
    fn from(value: io::Error) -> Self {
        AuditError::Io(value)
    }
}

/// Append-only store of signing events.
///
/// `lookup` accepts either the original or the output digest and returns the earliest
/// record naming it.
pub trait AuditLog: Send + Sync {
    fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
    fn lookup(&self, digest: &str) -> Result<Option<AuditRecord>, AuditError>;
}

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        record.validate()?;
        let mut records = self.records.lock().map_err(|_| AuditError::Poisoned)?;
        records.push(record);
        Ok(())
    }

    fn lookup(&self, digest: &str) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.records.lock().map_err(|_| AuditError::Poisoned)?;
        Ok(records.iter().find(|r| r.matches_digest(digest)).cloned())
    }
}

/// Audit log kept as one JSON object per line in a file that is only ever appended to.
#[derive(Debug)]
pub struct JsonLinesAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Result<Vec<AuditRecord>, AuditError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut out = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord =
                serde_json::from_str(&line).map_err(|err| AuditError::Malformed {
                    line: idx + 1,
                    message: err.to_string(),
                })?;
            out.push(record);
        }
        Ok(out)
    }
}

impl AuditLog for JsonLinesAuditLog {
    fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        record.validate()?;
        let line = serde_json::to_string(&record).map_err(|err| {
            AuditError::InvalidRecord(format!("record is not serializable: {err}"))
        })?;
        let _guard = self.write_lock.lock().map_err(|_| AuditError::Poisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    fn lookup(&self, digest: &str) -> Result<Option<AuditRecord>, AuditError> {
        Ok(self
            .records()?
            .into_iter()
            .find(|r| r.matches_digest(digest)))
    }
}

fn normalize_digest(digest: &str) -> String {
    digest.trim().to_ascii_lowercase()
}

fn is_hex_digest(digest: &str) -> bool {
    digest.len() == DIGEST_HEX_LEN
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Lowercase hex SHA-256, the digest form used by every audit record.
pub fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const OUTPUT: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn record() -> AuditRecord {
        AuditRecord::new(
            ORIGINAL,
            OUTPUT,
            "2025-01-31T12:00:00+00:00",
            Some("lease.pdf".to_string()),
            3,
        )
    }

    fn temp_log_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "fieldmark_audit_{}_{}_{}.jsonl",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    #[test]
    fn hex_sha256_known_vectors() {
        assert_eq!(hex_sha256(b""), ORIGINAL);
        assert_eq!(hex_sha256(b"abc"), OUTPUT);
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let json = serde_json::to_value(record()).expect("json");
        assert_eq!(json["originalDigest"], ORIGINAL);
        assert_eq!(json["outputDigest"], OUTPUT);
        assert_eq!(json["sourceFilename"], "lease.pdf");
        assert_eq!(json["fieldCount"], 3);

        let anonymous = AuditRecord::new(ORIGINAL, OUTPUT, "t", None, 0);
        let json = serde_json::to_value(anonymous).expect("json");
        assert!(json.get("sourceFilename").is_none());
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = record().fingerprint();
        assert_eq!(a, record().fingerprint());
        assert_eq!(a.len(), 64);
        let mut other = record();
        other.field_count = 4;
        assert_ne!(a, other.fingerprint());
    }

    #[test]
    fn digests_are_normalized_and_validated() {
        let upper = AuditRecord::new(ORIGINAL.to_uppercase(), OUTPUT, "t", None, 1);
        assert_eq!(upper.original_digest, ORIGINAL);
        upper.validate().expect("valid");
        let short = AuditRecord::new("abc", OUTPUT, "t", None, 1);
        assert!(matches!(short.validate(), Err(AuditError::InvalidRecord(_))));
        let no_time = AuditRecord::new(ORIGINAL, OUTPUT, " ", None, 1);
        assert!(no_time.validate().is_err());
    }

    #[test]
    fn memory_log_looks_up_by_either_digest() {
        let log = MemoryAuditLog::new();
        assert!(log.is_empty());
        log.append(record()).expect("append");
        assert_eq!(log.len(), 1);
        assert_eq!(log.lookup(ORIGINAL).expect("lookup"), Some(record()));
        assert_eq!(
            log.lookup(&OUTPUT.to_uppercase()).expect("lookup"),
            Some(record())
        );
        assert_eq!(log.lookup(&"0".repeat(64)).expect("lookup"), None);
    }

    #[test]
    fn memory_log_rejects_invalid_records() {
        let log = MemoryAuditLog::new();
        let err = log
            .append(AuditRecord::new("nope", OUTPUT, "t", None, 0))
            .expect_err("invalid");
        assert!(err.to_string().contains("originalDigest"));
        assert!(log.is_empty());
    }

    #[test]
    fn json_lines_log_appends_and_reopens() {
        let path = temp_log_path("reopen");
        {
            let log = JsonLinesAuditLog::open(&path).expect("open");
            log.append(record()).expect("append");
            let mut second = record();
            second.original_digest = OUTPUT.to_string();
            second.output_digest = "f".repeat(64);
            log.append(second).expect("append");
        }
        let log = JsonLinesAuditLog::open(&path).expect("reopen");
        assert_eq!(log.records().expect("records").len(), 2);
        // OUTPUT appears in both records; the earliest wins.
        assert_eq!(log.lookup(OUTPUT).expect("lookup"), Some(record()));
        let text = std::fs::read_to_string(log.path()).expect("read");
        assert_eq!(text.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn json_lines_log_reports_malformed_line() {
        let path = temp_log_path("malformed");
        std::fs::write(&path, "{\"originalDigest\":1}\n").expect("write");
        let log = JsonLinesAuditLog::open(&path).expect("open");
        match log.lookup(ORIGINAL) {
            Err(AuditError::Malformed { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected malformed error, got {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }
}
