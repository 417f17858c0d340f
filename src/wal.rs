use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Entries larger than this are treated as corruption on replay.
const MAX_ENTRY_BYTES: usize = 1 << 20;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one `[len][payload][crc]` entry. `Ok(None)` at a clean or torn end.
fn read_entry(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
        match reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }

    let mut len_buf = [0u8; 4];
    if !fill(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Decode the valid prefix of the log: its events and its length in bytes.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;
    while let Some(payload) = read_entry(&mut reader)? {
        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
        valid_len += (payload.len() + 8) as u64;
    }
    Ok((events, valid_len))
}

/// Append-only reservation log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) is discarded via length-prefix + CRC check.
///
/// Appends are staged in memory and written as one batch by `flush_sync`.
/// A batch that fails to write or sync is cut off the file again, so the log
/// only ever holds whole batches that were reported durable.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Encoded entries of the batch being built.
    pending: Vec<u8>,
    pending_entries: u64,
    /// File length after the last durable batch.
    committed_len: u64,
    /// A failed rollback left bytes past `committed_len`.
    needs_truncate: bool,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`, dropping any torn tail so new
    /// entries land right after the last valid one.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, valid_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            tracing::warn!("truncating torn wal tail at {valid_len} bytes");
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_entries: 0,
            committed_len: valid_len,
            needs_truncate: false,
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. The engine goes through
    /// `append_buffered` + `flush_sync` for group commit instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Stage an event in the current batch. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.pending, event)?;
        self.pending_entries += 1;
        Ok(())
    }

    /// Drop the staged batch without touching the file.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_entries = 0;
    }

    /// Write and fsync the staged batch. On error the file is cut back to its
    /// length before the batch.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.commit(|file, bytes| file.write_all(bytes))
    }

    fn commit(&mut self, write: impl FnOnce(&mut File, &[u8]) -> io::Result<()>) -> io::Result<()> {
        if self.needs_truncate {
            self.truncate_to_committed()?;
        }
        let bytes = std::mem::take(&mut self.pending);
        let entries = std::mem::take(&mut self.pending_entries);
        match write(&mut self.file, &bytes).and_then(|()| self.file.sync_all()) {
            Ok(()) => {
                self.committed_len += bytes.len() as u64;
                self.appends_since_compact += entries;
                Ok(())
            }
            Err(e) => {
                if let Err(te) = self.truncate_to_committed() {
                    tracing::error!(
                        "wal rollback to {} bytes failed: {te}",
                        self.committed_len
                    );
                }
                Err(e)
            }
        }
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        self.needs_truncate = true;
        self.file.set_len(self.committed_len)?;
        self.file.sync_all()?;
        self.needs_truncate = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file next to the WAL and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.file = file;
        self.needs_truncate = false;
        self.discard_pending();
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid events.
    /// Replay stops at the first torn or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Place, Span, Studio};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("studiobook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn place_created() -> Event {
        Event::PlaceCreated {
            place: Place {
                id: Ulid::new(),
                name: "Warehouse".into(),
                city: "Nantes".into(),
                address: Some("1 quai".into()),
            },
        }
    }

    fn studio_created(place_id: Ulid) -> Event {
        Event::StudioCreated {
            studio: Studio {
                id: Ulid::new(),
                place_id,
                name: "Live room".into(),
                description: None,
                hourly_price: 3000,
                has_options: true,
                authorize_premium: false,
            },
        }
    }

    fn admitted(studio_id: Ulid) -> Event {
        Event::ReservationAdmitted {
            id: Ulid::new(),
            user_id: Ulid::new(),
            studio_id,
            option_id: None,
            coupon_id: None,
            span: Span::new(1000, 2000),
            created_at: 500,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![place_created(), studio_created(Ulid::new()), admitted(Ulid::new())];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = place_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let good = place_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&admitted(Ulid::new())).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_rejects_absurd_length() {
        let path = tmp_path("absurd_len.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let studio_id = Ulid::new();
        let churn: Vec<Event> = (0..20).map(|_| admitted(studio_id)).collect();
        let compacted = vec![place_created()];
        let after = admitted(studio_id);
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &churn {
                wal.append(e).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);
            wal.append(&after).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![compacted[0].clone(), after]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn appends_count_once_durable() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|_| place_created()).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 0);
            wal.flush_sync().unwrap();
            assert_eq!(wal.appends_since_compact(), 5);
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn failed_batch_leaves_no_bytes_behind() {
        let path = tmp_path("failed_batch.wal");
        let kept = place_created();
        let lost = vec![admitted(Ulid::new()), admitted(Ulid::new())];
        let later = admitted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            let len_before = fs::metadata(&path).unwrap().len();

            for e in &lost {
                wal.append_buffered(e).unwrap();
            }
            // The disk fills up partway through the second entry.
            let result = wal.commit(|file, bytes| {
                file.write_all(&bytes[..bytes.len() - 5])?;
                Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"))
            });
            assert!(result.is_err());
            assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
            assert_eq!(wal.appends_since_compact(), 1);

            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn discarded_batch_is_never_written() {
        let path = tmp_path("discarded.wal");
        let later = place_created();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append_buffered(&admitted(Ulid::new())).unwrap();
            wal.discard_pending();
            wal.append(&later).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reopen_cuts_torn_tail_before_appending() {
        let path = tmp_path("reopen_torn.wal");
        let first = place_created();
        let second = admitted(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }
}
