//! Streaming batch annotation of zip archives.
//!
//! [`BatchProcessor`] reads an input archive one entry at a time and writes
//! one export CSV per image into an output archive:
//!
//! ```text
//! reader thread ──jobs──▶ worker pool ──results──▶ writer (calling thread)
//! ```
//!
//! - The reader owns the input [`ZipArchive`] and decompresses one image
//!   entry at a time into a bounded channel.
//! - Each worker decodes, infers, filters and rescales one image to its
//!   native resolution, then serializes the export CSV.
//! - The writer owns the output [`ZipWriter`], buffers results that arrive
//!   out of order and appends them in input order.
//!
//! At most a few images are held in memory at once, whatever the archive
//! size. A failed image, including one whose decoder or backend panicked,
//! becomes an [`EntryOutcome::Failed`] marker in the [`BatchReport`] and no
//! entry is written for it; the batch moves on unless
//! [`BatchOptions::fail_fast`] is set.

pub mod report;

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::DetbatchError;
use crate::filter::FilterOptions;
use crate::infer::{ImageDecoder, Inference};
use crate::ir::io_export_csv::to_export_csv_bytes;
use crate::pipeline::Pipeline;

pub use report::{BatchReport, EntryOutcome, FailureKind, Progress, StopReason};

/// Suffix appended to an image's stem to name its export entry.
pub const DEFAULT_RESULT_SUFFIX: &str = "_result";
/// Extension of export entries.
pub const DEFAULT_EXPORT_EXTENSION: &str = "csv";
/// Image extensions picked up from the input archive.
pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Options for [`BatchProcessor`].
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOptions {
    pub filter: FilterOptions,
    pub result_suffix: String,
    pub export_extension: String,
    /// Matched case-insensitively, without the leading dot.
    pub image_extensions: Vec<String>,
    /// Worker threads; 0 is treated as 1.
    pub workers: usize,
    /// Stop feeding new entries after the first failure.
    pub fail_fast: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            filter: FilterOptions::default(),
            result_suffix: DEFAULT_RESULT_SUFFIX.to_string(),
            export_extension: DEFAULT_EXPORT_EXTENSION.to_string(),
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            workers: 1,
            fail_fast: false,
        }
    }
}

/// Cooperative cancellation flag, checked once per entry.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type ProgressFn<'a> = Box<dyn Fn(&Progress<'_>) + 'a>;

/// Streams a zip archive of images through the detection pipeline.
pub struct BatchProcessor<'a> {
    inference: &'a dyn Inference,
    decoder: &'a dyn ImageDecoder,
    options: BatchOptions,
    cancel: CancelToken,
    progress: Option<ProgressFn<'a>>,
}

struct Job {
    seq: usize,
    entry: String,
    bytes: Vec<u8>,
}

enum JobResult {
    Exported {
        entry: String,
        output: String,
        detections: usize,
        csv: Vec<u8>,
    },
    Failed {
        entry: String,
        kind: FailureKind,
        message: String,
    },
}

impl JobResult {
    fn failed(entry: String, kind: FailureKind, err: impl ToString) -> Self {
        JobResult::Failed {
            entry,
            kind,
            message: err.to_string(),
        }
    }

    fn entry(&self) -> &str {
        match self {
            JobResult::Exported { entry, .. } | JobResult::Failed { entry, .. } => entry,
        }
    }
}

impl<'a> BatchProcessor<'a> {
    pub fn new(
        inference: &'a dyn Inference,
        decoder: &'a dyn ImageDecoder,
        options: BatchOptions,
    ) -> Self {
        Self {
            inference,
            decoder,
            options,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Called on the calling thread after every entry is written or failed.
    pub fn on_progress(mut self, progress: impl Fn(&Progress<'_>) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Processes an in-memory archive and returns the output archive bytes.
    pub fn process_archive_bytes(
        &self,
        input: &[u8],
    ) -> Result<(Vec<u8>, BatchReport), DetbatchError> {
        let source = Path::new("<memory>");
        let archive = open_archive(Cursor::new(input), source)?;
        let (out, report) = self.process(archive, Cursor::new(Vec::new()), source)?;
        Ok((out.into_inner(), report))
    }

    /// Processes the archive at `input` into a new archive at `output`.
    ///
    /// `output` is only created once `input` has been read as a zip archive,
    /// and is removed again if the batch fails to write it.
    pub fn process_archive_file(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<BatchReport, DetbatchError> {
        let reader = File::open(input).map_err(DetbatchError::Io)?;
        let archive = open_archive(BufReader::new(reader), input)?;

        let writer = File::create(output).map_err(DetbatchError::Io)?;
        let result = self
            .process(archive, BufWriter::new(writer), input)
            .and_then(|(mut writer, report)| {
                writer.flush().map_err(DetbatchError::Io)?;
                Ok(report)
            });
        if result.is_err() {
            if let Err(err) = fs::remove_file(output) {
                warn!(
                    output = %output.display(),
                    "could not remove unfinished archive: {err}"
                );
            }
        }
        result
    }

    /// Processes any seekable zip source into any seekable sink.
    ///
    /// Returns the finished sink together with the report. Per-entry failures
    /// are only recorded in the report; an `Err` means the archive itself
    /// could not be read or written.
    pub fn process_archive<R, W>(
        &self,
        input: R,
        output: W,
    ) -> Result<(W, BatchReport), DetbatchError>
    where
        R: Read + Seek + Send,
        W: Write + Seek,
    {
        let source = Path::new("<archive>");
        let archive = open_archive(input, source)?;
        self.process(archive, output, source)
    }

    fn process<R, W>(
        &self,
        mut archive: ZipArchive<R>,
        output: W,
        source: &Path,
    ) -> Result<(W, BatchReport), DetbatchError>
    where
        R: Read + Seek + Send,
        W: Write + Seek,
    {
        let (plan, skipped) = plan_entries(&mut archive, &self.options.image_extensions)
            .map_err(|err| archive_read_error(source, err))?;

        let mut report = BatchReport::new(plan.len());
        report.skipped = skipped;
        info!(
            source = %source.display(),
            images = plan.len(),
            skipped = report.skipped.len(),
            workers = self.options.workers.max(1),
            "starting batch"
        );

        let mut zip = ZipWriter::new(output);
        let file_options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let workers = self.options.workers.max(1);
        let stop = AtomicBool::new(false);
        let inference = self.inference;
        let decoder = self.decoder;
        let options = &self.options;
        let cancel = &self.cancel;

        let write_result = thread::scope(|s| {
            let (job_tx, job_rx) = sync_channel::<Job>(workers);
            let (result_tx, result_rx) = sync_channel::<(usize, JobResult)>(workers * 2);
            let job_rx = Arc::new(Mutex::new(job_rx));
            let stop = &stop;

            let reader_results = result_tx.clone();
            s.spawn(move || {
                for (seq, (index, entry)) in plan.into_iter().enumerate() {
                    if cancel.is_cancelled() || stop.load(Ordering::SeqCst) {
                        break;
                    }
                    match read_entry(&mut archive, index) {
                        Ok(bytes) => {
                            if job_tx.send(Job { seq, entry, bytes }).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            let failed = JobResult::failed(entry, FailureKind::Read, err);
                            if reader_results.send((seq, failed)).is_err() {
                                break;
                            }
                        }
                    }
                }
            });

            for _ in 0..workers {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                s.spawn(move || loop {
                    let job = match job_rx.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => break,
                    };
                    let Ok(job) = job else { break };
                    let seq = job.seq;
                    let entry = job.entry.clone();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        process_entry(job, inference, decoder, options)
                    }))
                    .unwrap_or_else(|payload| JobResult::Failed {
                        message: format!("worker panicked: {}", panic_message(&*payload)),
                        entry,
                        kind: FailureKind::Inference,
                    });
                    if result_tx.send((seq, result)).is_err() {
                        break;
                    }
                });
            }
            // Only workers hold the job receiver, so the reader stops once
            // they are all gone.
            drop(job_rx);
            drop(result_tx);

            let mut pending = BTreeMap::new();
            let mut next = 0usize;
            let mut written = HashSet::new();
            let mut write_error = None;

            for (seq, result) in result_rx {
                if write_error.is_some() {
                    // Keep draining so the reader and workers can finish.
                    continue;
                }
                if options.fail_fast && matches!(result, JobResult::Failed { .. }) {
                    if report.stop_reason.is_none() {
                        report.stop_reason = Some(StopReason::FailFast {
                            entry: result.entry().to_string(),
                        });
                    }
                    stop.store(true, Ordering::SeqCst);
                }
                pending.insert(seq, result);

                while let Some(result) = pending.remove(&next) {
                    next += 1;
                    let outcome =
                        match append_result(&mut zip, file_options, &mut written, result) {
                            Ok(outcome) => outcome,
                            Err(err) => {
                                write_error = Some(err);
                                stop.store(true, Ordering::SeqCst);
                                break;
                            }
                        };
                    if let Some(progress) = &self.progress {
                        progress(&Progress {
                            completed: next,
                            total: report.total,
                            entry: outcome.entry(),
                        });
                    }
                    report.push(outcome);
                }
            }

            match write_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        });
        write_result?;

        if report.stop_reason.is_none()
            && report.not_processed() > 0
            && self.cancel.is_cancelled()
        {
            report.stop_reason = Some(StopReason::Cancelled);
        }

        let output = zip.finish().map_err(|source| DetbatchError::ArchiveWrite {
            entry: "<central directory>".to_string(),
            source,
        })?;

        info!(
            exported = report.exported_count(),
            failed = report.failed_count(),
            not_processed = report.not_processed(),
            "batch finished"
        );
        Ok((output, report))
    }
}

fn open_archive<R: Read + Seek>(
    input: R,
    source: &Path,
) -> Result<ZipArchive<R>, DetbatchError> {
    ZipArchive::new(input).map_err(|err| archive_read_error(source, err))
}

fn archive_read_error(source: &Path, err: ZipError) -> DetbatchError {
    DetbatchError::ArchiveRead {
        path: PathBuf::from(source),
        source: err,
    }
}

/// Picks the image entries to process, in archive order.
fn plan_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    extensions: &[String],
) -> Result<(Vec<(usize, String)>, Vec<String>), ZipError> {
    let mut plan = Vec::new();
    let mut skipped = Vec::new();

    for index in 0..archive.len() {
        let file = archive.by_index_raw(index)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        if has_image_extension(&name, extensions) {
            plan.push((index, name));
        } else {
            debug!(entry = %name, "skipping non-image entry");
            skipped.push(name);
        }
    }

    Ok((plan, skipped))
}

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_ENTRY_PREALLOC: u64 = 64 << 20;

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
) -> Result<Vec<u8>, ZipError> {
    let mut file = archive.by_index(index)?;
    let mut bytes = Vec::with_capacity(prealloc_len(file.size()));
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Buffer to reserve for an entry whose header declares `declared` bytes.
/// The header is untrusted, so `read_to_end` grows the buffer past the cap.
fn prealloc_len(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_ENTRY_PREALLOC)).unwrap_or(0)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn process_entry(
    job: Job,
    inference: &dyn Inference,
    decoder: &dyn ImageDecoder,
    options: &BatchOptions,
) -> JobResult {
    let Job { entry, bytes, .. } = job;
    debug!(entry = %entry, bytes = bytes.len(), "processing entry");

    let image = match decoder.decode(&entry, &bytes) {
        Ok(image) => image,
        Err(err) => return JobResult::failed(entry, FailureKind::Decode, err),
    };
    drop(bytes);

    let detections = match Pipeline::new(inference, options.filter).detect_native(&image) {
        Ok(detections) => detections,
        Err(err) => {
            let kind = match err {
                DetbatchError::InvalidBox { .. } => FailureKind::InvalidBox,
                _ => FailureKind::Inference,
            };
            return JobResult::failed(entry, kind, err);
        }
    };

    match to_export_csv_bytes(&detections.items) {
        Ok(csv) => JobResult::Exported {
            output: output_name_for(&entry, &options.result_suffix, &options.export_extension),
            detections: detections.len(),
            entry,
            csv,
        },
        Err(err) => JobResult::failed(entry, FailureKind::Export, err),
    }
}

fn append_result<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    file_options: SimpleFileOptions,
    written: &mut HashSet<String>,
    result: JobResult,
) -> Result<EntryOutcome, DetbatchError> {
    let outcome = match result {
        JobResult::Failed {
            entry,
            kind,
            message,
        } => EntryOutcome::Failed {
            entry,
            kind,
            message,
        },
        JobResult::Exported {
            entry,
            output,
            ..
        } if written.contains(&output) => EntryOutcome::Failed {
            message: format!("output entry '{output}' was already written"),
            entry,
            kind: FailureKind::DuplicateOutput,
        },
        JobResult::Exported {
            entry,
            output,
            detections,
            csv,
        } => {
            let write_err = |source: ZipError| DetbatchError::ArchiveWrite {
                entry: output.clone(),
                source,
            };
            zip.start_file(output.as_str(), file_options).map_err(write_err)?;
            zip.write_all(&csv).map_err(|e| write_err(ZipError::Io(e)))?;
            written.insert(output.clone());
            debug!(entry = %entry, output = %output, detections, "wrote export entry");
            EntryOutcome::Exported {
                entry,
                output,
                detections,
            }
        }
    };

    if let EntryOutcome::Failed {
        entry,
        kind,
        message,
    } = &outcome
    {
        warn!(entry = %entry, kind = %kind, "{message}");
    }
    Ok(outcome)
}

/// Name of the export entry for the image entry `entry`.
///
/// The directory part is kept and the extension replaced:
/// `photos/cat.JPG` becomes `photos/cat_result.csv`.
pub fn output_name_for(entry: &str, suffix: &str, extension: &str) -> String {
    let (dir, file) = match entry.rfind('/') {
        Some(pos) => entry.split_at(pos + 1),
        None => ("", entry),
    };
    let stem = match file.rfind('.') {
        Some(pos) if pos > 0 => &file[..pos],
        _ => file,
    };
    format!("{dir}{stem}{suffix}.{}", extension.trim_start_matches('.'))
}

/// True if `name` ends in one of `extensions`, ignoring ASCII case.
pub fn has_image_extension(name: &str, extensions: &[String]) -> bool {
    let Some(ext) = Path::new(name).extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    extensions
        .iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed.trim_start_matches('.')))
}
