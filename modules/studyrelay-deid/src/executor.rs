//! The de-identification executor.
//!
//! Two write paths, selected by input size. The standard path decodes the
//! whole file twice (working copy + verification snapshot), applies the
//! script, verifies, and only then writes. The streaming path never lets
//! pixel data touch the heap: it rewrites the header and tail-copies the
//! rest of the file in 64 MiB windows.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use studyrelay_dicom::codec::{self, FileMeta};
use studyrelay_dicom::syntax;

use crate::error::{DeidError, Result};
use crate::script::{self, AnonymizationScript, HashedUid, UidHasher};
use crate::verify::{self, VerificationReport, VerifyOptions};

/// Inputs at or above this size take the streaming path.
pub const STREAMING_THRESHOLD: u64 = 2 * 1024 * 1024 * 1024;

/// Window size for the pixel-data tail copy.
const COPY_WINDOW: usize = 64 * 1024 * 1024;

/// Method string stamped into DeidentificationMethod.
const METHOD_LABEL: &str = "studyrelay-script";

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub verify: VerifyOptions,
    /// Overridable so the streaming writer is testable on small inputs.
    pub streaming_threshold: u64,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            verify: VerifyOptions::default(),
            streaming_threshold: STREAMING_THRESHOLD,
        }
    }
}

/// What one anonymization produced.
#[derive(Debug, Clone)]
pub struct DeidOutcome {
    pub sop_uid: String,
    pub streamed: bool,
    pub report: VerificationReport,
    /// UID rewrites to record in the crosswalk.
    pub hashed_uids: Vec<HashedUid>,
    pub output_bytes: u64,
}

/// Stateless per call; holds only the parse cache keyed by script content
/// hash.
#[derive(Default)]
pub struct Executor {
    cache: Mutex<HashMap<String, Arc<AnonymizationScript>>>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a script, reusing a previous parse of identical content.
    pub fn parse_cached(&self, content: &str) -> Result<Arc<AnonymizationScript>> {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let key = hex::encode(hasher.finalize());

        if let Some(script) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(script);
        }
        let script = Arc::new(AnonymizationScript::parse(content)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, script.clone());
        }
        Ok(script)
    }

    /// Anonymize one file. The output is written atomically and only after
    /// verification has passed; on any failure no byte reaches `output`.
    pub fn anonymize_file(
        &self,
        input: &Path,
        output: &Path,
        script: &AnonymizationScript,
        hasher: &dyn UidHasher,
        opts: &ExecutorOptions,
    ) -> Result<DeidOutcome> {
        let input_len = std::fs::metadata(input)?.len();
        if input_len >= opts.streaming_threshold {
            self.anonymize_streaming(input, output, script, hasher, opts, input_len)
        } else {
            self.anonymize_standard(input, output, script, hasher, opts)
        }
    }

    fn anonymize_standard(
        &self,
        input: &Path,
        output: &Path,
        script: &AnonymizationScript,
        hasher: &dyn UidHasher,
        opts: &ExecutorOptions,
    ) -> Result<DeidOutcome> {
        let working = codec::read_file(input)?;
        // Independent re-read: the verification snapshot never shares
        // state with the set the script mutates.
        let snapshot = codec::read_file(input)?.dataset;

        let outcome = script::apply(script, working.dataset, hasher)?;
        let mut dataset = outcome.dataset;
        script::stamp_markers(&mut dataset, METHOD_LABEL);

        let report = verify::verify(&snapshot, &dataset, script, &opts.verify);
        if !report.passed() {
            return Err(DeidError::Verification {
                report: Box::new(report),
            });
        }

        let meta = FileMeta::for_dataset(&dataset, &working.meta.transfer_syntax_uid);
        let tmp = tmp_path(output);
        codec::write_file(&tmp, &meta, &dataset)?;
        std::fs::rename(&tmp, output)?;
        let output_bytes = std::fs::metadata(output)?.len();

        Ok(DeidOutcome {
            sop_uid: report.sop_uid.clone(),
            streamed: false,
            report,
            hashed_uids: outcome.hashed_uids,
            output_bytes,
        })
    }

    fn anonymize_streaming(
        &self,
        input: &Path,
        output: &Path,
        script: &AnonymizationScript,
        hasher: &dyn UidHasher,
        opts: &ExecutorOptions,
        input_len: u64,
    ) -> Result<DeidOutcome> {
        let readout = codec::read_header(input)?;
        let snapshot = readout.header.clone();

        let outcome = script::apply(script, readout.header, hasher)?;
        let mut dataset = outcome.dataset;
        script::stamp_markers(&mut dataset, METHOD_LABEL);

        // Header-scope verification only; pixel data is untouched by
        // construction.
        let report = verify::verify(&snapshot, &dataset, script, &opts.verify);
        if !report.passed() {
            return Err(DeidError::Verification {
                report: Box::new(report),
            });
        }

        let meta = FileMeta::for_dataset(&dataset, &readout.meta.transfer_syntax_uid);
        let implicit = syntax::is_implicit_vr(&readout.meta.transfer_syntax_uid);

        let tmp = tmp_path(output);
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            let mut w = BufWriter::new(file);
            w.write_all(&[0u8; codec::PREAMBLE_LEN])?;
            w.write_all(b"DICM")?;
            w.write_all(&codec::encode_file_meta(&meta))?;
            w.write_all(&codec::encode_dataset(&dataset, implicit)?)?;
            w.flush()?;

            let mut out_file = w
                .into_inner()
                .map_err(|e| DeidError::Io(e.into_error()))?;
            if let Some(offset) = readout.pixel_data_offset {
                copy_tail(input, &mut out_file, offset)?;
            }
            out_file.sync_all()?;
        }
        std::fs::rename(&tmp, output)?;

        let output_bytes = std::fs::metadata(output)?.len();
        let drift = (output_bytes as i64 - input_len as i64).unsigned_abs();
        if drift * 10 > input_len {
            warn!(
                input = %input.display(),
                input_bytes = input_len,
                output_bytes,
                "Streaming de-id output size drifted more than 10% from input"
            );
        }
        debug!(
            input = %input.display(),
            output_bytes,
            "Streamed de-identification complete"
        );

        Ok(DeidOutcome {
            sop_uid: report.sop_uid.clone(),
            streamed: true,
            report,
            hashed_uids: outcome.hashed_uids,
            output_bytes,
        })
    }
}

/// Copy `input[offset..]` into `out` in bounded windows. On Linux
/// `io::copy` between files lowers to zero-copy transfers; the window cap
/// bounds the fallback buffer.
fn copy_tail(input: &Path, out: &mut File, offset: u64) -> Result<()> {
    let mut src = File::open(input)?;
    src.seek(SeekFrom::Start(offset))?;
    loop {
        let mut window = (&mut src).take(COPY_WINDOW as u64);
        let copied = std::io::copy(&mut window, out)?;
        if copied == 0 {
            return Ok(());
        }
    }
}

fn tmp_path(output: &Path) -> std::path::PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out.dcm".to_string());
    output.with_file_name(format!(".{name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::SaltedUidHasher;
    use studyrelay_dicom::dictionary::tags;
    use studyrelay_dicom::{Attribute, AttributeSet, AttributeValue, Vr};
    use tempfile::TempDir;

    fn write_instance(dir: &Path, name: &str, pixel_bytes: usize) -> std::path::PathBuf {
        let mut ds = AttributeSet::new();
        ds.put_string(tags::SOP_CLASS_UID, Vr::Ui, "1.2.840.10008.5.1.4.1.1.2");
        ds.put_string(tags::SOP_INSTANCE_UID, Vr::Ui, "1.2.3.4");
        ds.put_string(tags::STUDY_INSTANCE_UID, Vr::Ui, "1.2.3");
        ds.put_string(tags::SERIES_INSTANCE_UID, Vr::Ui, "1.2.3.1");
        ds.put_string(tags::PATIENT_NAME, Vr::Pn, "DOE^JANE");
        ds.put_string(tags::PATIENT_ID, Vr::Lo, "P123");
        ds.put_string(tags::STUDY_DATE, Vr::Da, "20240115");
        if pixel_bytes > 0 {
            ds.insert(Attribute {
                tag: tags::PIXEL_DATA,
                vr: Vr::Ow,
                value: AttributeValue::Bytes((0..pixel_bytes).map(|i| i as u8).collect()),
            });
        }
        let meta = FileMeta::for_dataset(&ds, syntax::EXPLICIT_VR_LE);
        let path = dir.join(name);
        codec::write_file(&path, &meta, &ds).unwrap();
        path
    }

    fn full_script() -> AnonymizationScript {
        AnonymizationScript::parse(
            r#"
            (0010,0010) := "ANONYMOUS"
            (0010,0020) := "SUBJ_001"
            (0020,000d) := hashUID[(0020,000d)]
            (0020,000e) := hashUID[(0020,000e)]
            (0008,0018) := hashUID[(0008,0018)]
            (0008,0020) := shiftDateTimeByIncrement[(0008,0020), "7", "days"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn standard_path_anonymizes_and_writes() {
        let dir = TempDir::new().unwrap();
        let input = write_instance(dir.path(), "in.dcm", 256);
        let output = dir.path().join("out.dcm");

        let exec = Executor::new();
        let outcome = exec
            .anonymize_file(
                &input,
                &output,
                &full_script(),
                &SaltedUidHasher::new("s"),
                &ExecutorOptions::default(),
            )
            .unwrap();

        assert!(!outcome.streamed);
        assert_eq!(outcome.hashed_uids.len(), 3);
        let written = codec::read_file(&output).unwrap();
        assert_eq!(written.dataset.patient_name(), Some("ANONYMOUS"));
        assert_eq!(written.dataset.string(tags::STUDY_DATE), Some("20240122"));
        assert_ne!(written.dataset.study_uid(), Some("1.2.3"));
        assert_eq!(
            written.dataset.string(tags::PATIENT_IDENTITY_REMOVED),
            Some("YES")
        );
        // Pixel data passes through untouched.
        assert_eq!(
            written.dataset.get(tags::PIXEL_DATA).unwrap().value,
            AttributeValue::Bytes((0..256).map(|i| i as u8).collect())
        );
    }

    #[test]
    fn verification_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = write_instance(dir.path(), "in.dcm", 64);
        let output = dir.path().join("out.dcm");

        // A script that claims to anonymize but is a no-op.
        let noop = AnonymizationScript::parse("(0010,0040) keep").unwrap();
        let exec = Executor::new();
        let err = exec
            .anonymize_file(
                &input,
                &output,
                &noop,
                &SaltedUidHasher::new("s"),
                &ExecutorOptions::default(),
            )
            .unwrap_err();

        assert!(matches!(err, DeidError::Verification { .. }));
        assert!(err.to_string().contains("Verification failed"));
        assert!(!output.exists());
        assert!(!tmp_path(&output).exists() || std::fs::metadata(tmp_path(&output)).is_err());
    }

    #[test]
    fn streaming_path_preserves_tail_bytes() {
        let dir = TempDir::new().unwrap();
        let input = write_instance(dir.path(), "big.dcm", 4096);
        let output = dir.path().join("out.dcm");

        let exec = Executor::new();
        let opts = ExecutorOptions {
            streaming_threshold: 1, // force the streaming path
            ..Default::default()
        };
        let outcome = exec
            .anonymize_file(
                &input,
                &output,
                &full_script(),
                &SaltedUidHasher::new("s"),
                &opts,
            )
            .unwrap();
        assert!(outcome.streamed);

        // Tail equality: the output ends with the input's bytes from the
        // recorded pixel-data offset.
        let original_readout = codec::read_header(&input).unwrap();
        let offset = original_readout.pixel_data_offset.unwrap() as usize;
        let input_bytes = std::fs::read(&input).unwrap();
        let output_bytes = std::fs::read(&output).unwrap();
        assert!(output_bytes.ends_with(&input_bytes[offset..]));

        // Header was rewritten.
        let written = codec::read_header(&output).unwrap();
        assert_eq!(written.header.patient_id(), Some("SUBJ_001"));
        assert_ne!(written.header.study_uid(), Some("1.2.3"));
        assert_eq!(
            written.meta.media_storage_sop_instance_uid,
            written.header.sop_uid().unwrap()
        );
    }

    #[test]
    fn streaming_verification_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = write_instance(dir.path(), "big.dcm", 2048);
        let output = dir.path().join("out.dcm");
        let noop = AnonymizationScript::parse("(0010,0040) keep").unwrap();

        let exec = Executor::new();
        let opts = ExecutorOptions {
            streaming_threshold: 1,
            ..Default::default()
        };
        let err = exec
            .anonymize_file(&input, &output, &noop, &SaltedUidHasher::new("s"), &opts)
            .unwrap_err();
        assert!(matches!(err, DeidError::Verification { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn parse_cache_returns_same_instance() {
        let exec = Executor::new();
        let a = exec.parse_cached("(0010,0040) keep").unwrap();
        let b = exec.parse_cached("(0010,0040) keep").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(exec.parse_cached("(0010,0010) := nonsense").is_err());
    }

    #[test]
    fn instance_without_pixel_data_streams_cleanly() {
        let dir = TempDir::new().unwrap();
        let input = write_instance(dir.path(), "nopix.dcm", 0);
        let output = dir.path().join("out.dcm");
        let exec = Executor::new();
        let opts = ExecutorOptions {
            streaming_threshold: 1,
            ..Default::default()
        };
        let outcome = exec
            .anonymize_file(
                &input,
                &output,
                &full_script(),
                &SaltedUidHasher::new("s"),
                &opts,
            )
            .unwrap();
        assert!(outcome.streamed);
        let written = codec::read_file(&output).unwrap();
        assert_eq!(written.dataset.patient_name(), Some("ANONYMOUS"));
    }
}
