use log::{debug, info, trace, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::IngestConfig;
use crate::error::{IngestError, ReferenceError};
use crate::model::{ReferencePriceTable, TradeRecord};
use crate::parser::TradeLineParser;

const HEADER_MARKER: &str = "Nome_Item";
const BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub lines_read: usize,
    pub records_kept: usize,
}

impl IngestSummary {
    pub fn dropped(&self) -> usize {
        self.lines_read.saturating_sub(self.records_kept)
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size: usize,
    /// Date stamped on lines that carry none. Today when unset.
    pub fallback_date: Option<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        IngestOptions {
            chunk_size: config.chunk_size.max(1),
            fallback_date: None,
        }
    }
}

impl IngestOptions {
    fn parser(&self) -> TradeLineParser {
        match &self.fallback_date {
            Some(date) => TradeLineParser::with_fallback_date(date.clone()),
            None => TradeLineParser::new(),
        }
    }
}

pub fn parse_lines<I, S>(lines: I, parser: &TradeLineParser) -> (Vec<TradeRecord>, IngestSummary)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut records = Vec::new();
    let mut summary = IngestSummary::default();

    for (index, line) in lines.into_iter().enumerate() {
        summary.lines_read += 1;
        match parser.parse(line.as_ref(), index) {
            Some(record) => records.push(record),
            None => trace!("Dropped line {}", index + 1),
        }
    }

    summary.records_kept = records.len();
    (records, summary)
}

/// Whole-document entry point. A document that is a JSON array is read
/// element by element; anything else is one record per line.
pub fn parse_str(content: &str, parser: &TradeLineParser) -> (Vec<TradeRecord>, IngestSummary) {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    if sniff_layout(content.as_bytes()) == Some(Layout::JsonArray) {
        if let Ok(items) = serde_json::from_str::<Vec<Value>>(content) {
            let lines_read = items.len();
            let records: Vec<TradeRecord> = items
                .into_iter()
                .enumerate()
                .filter_map(|(index, value)| parser.parse_value(value, index))
                .collect();
            let summary = IngestSummary {
                lines_read,
                records_kept: records.len(),
            };
            return (records, summary);
        }
        debug!("Content looks like a JSON array but does not parse as one, reading lines");
    }

    parse_lines(content.lines(), parser)
}

/// Emits a percentage only when it is even and differs from the last one.
#[derive(Debug)]
pub struct ProgressTracker {
    total_bytes: u64,
    last_emitted: Option<u8>,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        ProgressTracker {
            total_bytes,
            last_emitted: None,
        }
    }

    pub fn update(&mut self, bytes_read: u64) -> Option<u8> {
        if self.total_bytes == 0 {
            return None;
        }
        let percent = (bytes_read.saturating_mul(100) / self.total_bytes).min(100) as u8;
        if percent % 2 != 0 || self.last_emitted == Some(percent) {
            return None;
        }
        self.last_emitted = Some(percent);
        Some(percent)
    }

    /// The closing 100, unless it was already sent.
    pub fn finish(&mut self) -> Option<u8> {
        if self.last_emitted == Some(100) {
            return None;
        }
        self.last_emitted = Some(100);
        Some(100)
    }
}

// Splits a byte stream on '\n', holding the tail until the next chunk.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
    next_line: usize,
}

impl LineSplitter {
    fn feed(&mut self, chunk: &[u8], mut on_line: impl FnMut(&str, usize)) -> Result<(), IngestError> {
        self.pending.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = decode(&self.pending[start..end], self.next_line)?;
            on_line(line, self.next_line);
            self.next_line += 1;
            start = end + 1;
        }
        self.pending.drain(..start);
        Ok(())
    }

    fn finish(&mut self, mut on_line: impl FnMut(&str, usize)) -> Result<(), IngestError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let line = decode(&self.pending, self.next_line)?;
        on_line(line, self.next_line);
        self.next_line += 1;
        self.pending.clear();
        Ok(())
    }
}

fn decode(bytes: &[u8], index: usize) -> Result<&str, IngestError> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|_| IngestError::Decode { line: index + 1 })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Lines,
    JsonArray,
}

// `[` followed by `{` or `]` is a JSON array; a leading `[12:00]` timestamp is not.
// None while the prefix is still too short to tell.
fn sniff_layout(head: &[u8]) -> Option<Layout> {
    if head.len() < BOM.len() && BOM.starts_with(head) {
        return None;
    }
    let head = head.strip_prefix(BOM).unwrap_or(head);
    let mut significant = head.iter().copied().filter(|b| !b.is_ascii_whitespace());
    match significant.next()? {
        b'[' => match significant.next()? {
            b'{' | b']' => Some(Layout::JsonArray),
            _ => Some(Layout::Lines),
        },
        _ => Some(Layout::Lines),
    }
}

/// Streams `reader` in `chunk_size` pieces, parsing each complete line as it
/// arrives. `keep_going` is polled between chunks; returning false abandons
/// the run with `Ok(None)`. `on_bytes` receives the running byte count.
pub fn parse_reader<R: Read>(
    mut reader: R,
    options: &IngestOptions,
    mut on_bytes: impl FnMut(u64),
    keep_going: impl Fn() -> bool,
) -> Result<Option<(Vec<TradeRecord>, IngestSummary)>, IngestError> {
    let parser = options.parser();
    let mut buffer = vec![0u8; options.chunk_size.max(1)];
    let mut splitter = LineSplitter::default();
    let mut records = Vec::new();
    let mut on_line = |line: &str, index: usize| match parser.parse(line, index) {
        Some(record) => records.push(record),
        None => trace!("Dropped line {}", index + 1),
    };

    let mut bytes_read: u64 = 0;
    let mut layout = None;
    // Bytes held back until the layout is known, then the whole JSON document.
    let mut held = Vec::new();

    loop {
        if !keep_going() {
            return Ok(None);
        }

        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let chunk = &buffer[..n];
        bytes_read += n as u64;

        match layout {
            Some(Layout::Lines) => splitter.feed(chunk, &mut on_line)?,
            Some(Layout::JsonArray) => held.extend_from_slice(chunk),
            None => {
                held.extend_from_slice(chunk);
                layout = sniff_layout(&held);
                if layout == Some(Layout::Lines) {
                    splitter.feed(&held, &mut on_line)?;
                    held.clear();
                }
            }
        }
        on_bytes(bytes_read);
    }

    if layout == Some(Layout::JsonArray) {
        let text = std::str::from_utf8(&held).map_err(|e| IngestError::Decode {
            line: held[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count() + 1,
        })?;
        return Ok(Some(parse_str(text, &parser)));
    }

    // Input too short to sniff is read as lines.
    splitter.feed(&held, &mut on_line)?;
    splitter.finish(&mut on_line)?;

    let lines_read = splitter.next_line;
    let records_kept = records.len();
    Ok(Some((
        records,
        IngestSummary {
            lines_read,
            records_kept,
        },
    )))
}

/// Synchronous file load on the calling thread.
pub fn load_file(path: &Path, options: &IngestOptions) -> Result<(Vec<TradeRecord>, IngestSummary), IngestError> {
    let file = File::open(path)?;
    let loaded = parse_reader(file, options, |_| {}, || true)?;
    let (records, summary) = loaded.unwrap_or_default();
    log_summary(path, &summary);
    Ok((records, summary))
}

fn log_summary(path: &Path, summary: &IngestSummary) {
    info!(
        "Loaded {} records from {} ({} lines, {} dropped)",
        summary.records_kept,
        path.display(),
        summary.lines_read,
        summary.dropped()
    );
}

#[derive(Debug)]
pub enum IngestEvent {
    Progress(u8),
    Finished(Vec<TradeRecord>, IngestSummary),
    Failed(IngestError),
}

/// A file ingestion running on its own thread. Events arrive over a channel:
/// progress at even percentages, a final `Progress(100)`, then exactly one
/// of `Finished` or `Failed`. A cancelled job sends neither.
pub struct IngestJob {
    events: Receiver<IngestEvent>,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IngestJob {
    pub fn spawn(path: impl Into<PathBuf>, options: IngestOptions) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let handle = thread::spawn(move || run_job(&path, &options, &tx, &flag));

        IngestJob {
            events: rx,
            cancelled,
            handle: Some(handle),
        }
    }

    /// For callers polling with `try_recv` from their own loop.
    pub fn events(&self) -> &Receiver<IngestEvent> {
        &self.events
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks until the job ends. `Ok(None)` means it was cancelled; nothing
    /// from a cancelled run is ever returned.
    pub fn wait(
        mut self,
        mut on_progress: impl FnMut(u8),
    ) -> Result<Option<(Vec<TradeRecord>, IngestSummary)>, IngestError> {
        let outcome = loop {
            match self.events.recv() {
                Ok(IngestEvent::Progress(p)) => on_progress(p),
                Ok(IngestEvent::Finished(records, summary)) => break Ok(Some((records, summary))),
                Ok(IngestEvent::Failed(e)) => break Err(e),
                Err(_) if self.is_cancelled() => break Ok(None),
                Err(_) => break Err(IngestError::WorkerLost),
            }
        };

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(IngestError::WorkerLost);
            }
        }

        if self.is_cancelled() {
            return Ok(None);
        }
        outcome
    }
}

impl Drop for IngestJob {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_job(path: &Path, options: &IngestOptions, tx: &Sender<IngestEvent>, cancelled: &AtomicBool) {
    let result = File::open(path).map_err(IngestError::from).and_then(|file| {
        let total = file.metadata().map(|m| m.len()).unwrap_or(0);
        let mut progress = ProgressTracker::new(total);
        let outcome = parse_reader(
            file,
            options,
            |bytes| {
                if let Some(p) = progress.update(bytes) {
                    let _ = tx.send(IngestEvent::Progress(p));
                }
            },
            || !cancelled.load(Ordering::SeqCst),
        );
        if let Ok(Some(_)) = outcome {
            if let Some(p) = progress.finish() {
                let _ = tx.send(IngestEvent::Progress(p));
            }
        }
        outcome
    });

    // A receiver that hung up just means nobody is listening any more.
    match result {
        Ok(Some((records, summary))) => {
            if cancelled.load(Ordering::SeqCst) {
                debug!("Ingest of {} cancelled after parsing", path.display());
                return;
            }
            log_summary(path, &summary);
            let _ = tx.send(IngestEvent::Finished(records, summary));
        }
        Ok(None) => debug!("Ingest of {} cancelled", path.display()),
        Err(e) => {
            warn!("Ingest of {} failed: {}", path.display(), e);
            let _ = tx.send(IngestEvent::Failed(e));
        }
    }
}

/// Reads `name;quantity;total_price` rows, one per line. Quotes are plain
/// characters and get stripped; header rows and rows that do not decode or
/// whose quantity or price do not parse are skipped.
pub fn reference_table_from_reader<R: Read>(reader: R) -> Result<ReferencePriceTable, ReferenceError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut table = ReferencePriceTable::new();
    let mut skipped = 0usize;

    for row in csv_reader.byte_records() {
        let row = row?;
        let field = |i: usize| row.get(i).and_then(|bytes| std::str::from_utf8(bytes).ok());
        let (Some(name), Some(qty), Some(total)) = (field(0), field(1), field(2)) else {
            skipped += 1;
            continue;
        };
        if name.contains(HEADER_MARKER) {
            continue;
        }
        match unit_price(qty, total) {
            Some(price) => table.insert_normalized(name.replace('"', "").trim(), price),
            None => skipped += 1,
        }
    }

    debug!("Reference table: {} entries, {} rows skipped", table.len(), skipped);
    Ok(table)
}

fn unit_price(qty: &str, total: &str) -> Option<f64> {
    let qty: f64 = qty.replace('"', "").trim().parse().ok()?;
    let total: f64 = total.replace('"', "").trim().parse().ok()?;
    if qty.is_nan() || qty <= 0.0 || !total.is_finite() {
        return None;
    }
    Some(total / qty)
}

pub fn load_reference_csv(path: &Path) -> Result<ReferencePriceTable, ReferenceError> {
    let file = File::open(path)?;
    let table = reference_table_from_reader(file)?;
    info!("Loaded {} reference prices from {}", table.len(), path.display());
    Ok(table)
}

/// A `{ "name": price }` object, the shape reference editors hand back.
pub fn reference_table_from_json(content: &str) -> Result<ReferencePriceTable, ReferenceError> {
    let map: HashMap<String, f64> = serde_json::from_str(content)?;
    Ok(ReferencePriceTable::from_map(map))
}
