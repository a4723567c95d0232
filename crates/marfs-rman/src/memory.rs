//! In-memory collaborators.
//!
//! These back the engine with plain maps so that reclamation can be exercised
//! (or previewed) without a metadata file system or object store. Faults can be
//! injected to simulate crashes part-way through a reclamation.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use marfs_hash::{RealNode, Ring, RingMode};

use crate::backend::{
    Backends, DeleteOutcome, DirEntry, Location, MetadataStore, ObjectStore, ObjectTarget,
    OpenMode, Protection, RefHandle, RefScanner, RefStat, StreamCodec, FTAG_XATTR,
};
use crate::error::{RmanError, RmanResult};
use crate::ftag::{DataState, Ftag};

/// Virtual nodes per reference directory in rings built by [`reftable`].
const REFTABLE_TARGET: u64 = 256;

/// Builds an equally weighted reference-directory ring.
pub fn reftable(dirs: &[&str]) -> RmanResult<Ring> {
    let nodes = dirs.iter().map(|d| RealNode::new(*d, 1)).collect();
    Ok(Ring::build_with_target(
        nodes,
        RingMode::Placement,
        REFTABLE_TARGET * dirs.len().max(1) as u64,
    )?)
}

#[derive(Debug, Clone)]
struct RefFile {
    stat: RefStat,
    xattrs: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct MetaState {
    refs: BTreeMap<String, RefFile>,
    dirs: BTreeSet<String>,
    data_usage: Option<u64>,
    inode_usage: Option<u64>,
    unlinked: Vec<String>,
    unlink_budget: Option<usize>,
    failing: HashSet<String>,
}

impl MetaState {
    fn check(&self, path: &str) -> RmanResult<()> {
        if self.failing.contains(path) {
            return Err(RmanError::metadata(path, "injected failure"));
        }
        Ok(())
    }
}

/// Reference files, directories, and usage counters held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadata {
    state: Arc<Mutex<MetaState>>,
}

impl MemoryMetadata {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reference directory.
    pub fn add_dir(&self, dir: &str) {
        self.state.lock().dirs.insert(dir.to_string());
    }

    /// Creates or replaces a reference file; its directory is created too.
    pub fn put_ref(&self, path: &str, stat: RefStat, ftag: Option<Vec<u8>>) {
        let mut state = self.state.lock();
        if let Some((dir, _)) = path.rsplit_once('/') {
            state.dirs.insert(dir.to_string());
        }
        let mut xattrs = HashMap::new();
        if let Some(raw) = ftag {
            xattrs.insert(FTAG_XATTR.to_string(), raw);
        }
        state.refs.insert(path.to_string(), RefFile { stat, xattrs });
    }

    /// True if the reference file exists.
    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().refs.contains_key(path)
    }

    /// Current value of an attribute.
    pub fn xattr(&self, path: &str, name: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .refs
            .get(path)
            .and_then(|f| f.xattrs.get(name).cloned())
    }

    /// Overwrites an attribute directly, bypassing handles.
    pub fn set_xattr(&self, path: &str, name: &str, value: &[u8]) {
        if let Some(file) = self.state.lock().refs.get_mut(path) {
            file.xattrs.insert(name.to_string(), value.to_vec());
        }
    }

    /// Changes a reference file's link count.
    pub fn set_link_count(&self, path: &str, link_count: u64) {
        if let Some(file) = self.state.lock().refs.get_mut(path) {
            file.stat.link_count = link_count;
        }
    }

    /// Paths unlinked so far, in order.
    pub fn unlinked(&self) -> Vec<String> {
        self.state.lock().unlinked.clone()
    }

    /// Number of reference files present.
    pub fn ref_count(&self) -> usize {
        self.state.lock().refs.len()
    }

    /// Last recorded `(data, inode)` usage.
    pub fn usage(&self) -> (Option<u64>, Option<u64>) {
        let state = self.state.lock();
        (state.data_usage, state.inode_usage)
    }

    /// Lets `n` more unlinks succeed, then fails every later one.
    pub fn fail_unlinks_after(&self, n: usize) {
        self.state.lock().unlink_budget = Some(n);
    }

    /// Clears all injected faults.
    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.unlink_budget = None;
        state.failing.clear();
    }

    /// Fails every operation on a path or directory.
    pub fn fail_path(&self, path: &str) {
        self.state.lock().failing.insert(path.to_string());
    }
}

struct MemoryRefHandle {
    path: String,
    mode: OpenMode,
    state: Arc<Mutex<MetaState>>,
}

impl RefHandle for MemoryRefHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn get_xattr(&self, name: &str) -> RmanResult<Option<Vec<u8>>> {
        if self.mode == OpenMode::WriteOnly {
            return Err(RmanError::metadata(&self.path, "handle not readable"));
        }
        let state = self.state.lock();
        state.check(&self.path)?;
        let file = state
            .refs
            .get(&self.path)
            .ok_or_else(|| RmanError::metadata(&self.path, "no such reference"))?;
        Ok(file.xattrs.get(name).cloned())
    }

    fn set_xattr(&mut self, name: &str, value: &[u8]) -> RmanResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(RmanError::metadata(&self.path, "handle not writable"));
        }
        let mut state = self.state.lock();
        state.check(&self.path)?;
        let file = state
            .refs
            .get_mut(&self.path)
            .ok_or_else(|| RmanError::metadata(&self.path, "no such reference"))?;
        file.xattrs.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn close(self: Box<Self>) -> RmanResult<()> {
        Ok(())
    }
}

impl MetadataStore for MemoryMetadata {
    fn stat_ref(&self, path: &str) -> RmanResult<RefStat> {
        let state = self.state.lock();
        state.check(path)?;
        if let Some(file) = state.refs.get(path) {
            return Ok(file.stat);
        }
        if state.dirs.contains(path) {
            return Ok(RefStat {
                link_count: 2,
                ctime: 0,
                size: 0,
            });
        }
        Err(RmanError::metadata(path, "no such file or directory"))
    }

    fn open_ref(&self, path: &str, mode: OpenMode) -> RmanResult<Box<dyn RefHandle>> {
        let state = self.state.lock();
        state.check(path)?;
        if !state.refs.contains_key(path) {
            return Err(RmanError::metadata(path, "no such reference"));
        }
        Ok(Box::new(MemoryRefHandle {
            path: path.to_string(),
            mode,
            state: Arc::clone(&self.state),
        }))
    }

    fn unlink_ref(&self, path: &str) -> RmanResult<DeleteOutcome> {
        let mut state = self.state.lock();
        state.check(path)?;
        if let Some(budget) = state.unlink_budget.as_mut() {
            if *budget == 0 {
                return Err(RmanError::metadata(path, "injected unlink failure"));
            }
            *budget -= 1;
        }
        match state.refs.remove(path) {
            Some(_) => {
                state.unlinked.push(path.to_string());
                Ok(DeleteOutcome::Removed)
            }
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }

    fn open_scanner(&self, dir: &str) -> RmanResult<RefScanner> {
        let state = self.state.lock();
        state.check(dir)?;
        if !state.dirs.contains(dir) {
            return Err(RmanError::metadata(dir, "no such directory"));
        }
        let entries: Vec<RmanResult<DirEntry>> = state
            .refs
            .keys()
            .filter_map(|path| path.rsplit_once('/'))
            .filter(|(parent, _)| *parent == dir)
            .map(|(_, name)| {
                Ok(DirEntry {
                    name: name.to_string(),
                })
            })
            .collect();
        Ok(Box::new(entries.into_iter()))
    }

    fn set_data_usage(&self, bytes: u64) -> RmanResult<()> {
        self.state.lock().data_usage = Some(bytes);
        Ok(())
    }

    fn set_inode_usage(&self, count: u64) -> RmanResult<()> {
        self.state.lock().inode_usage = Some(count);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ObjectState {
    objects: BTreeSet<String>,
    deleted: Vec<String>,
    failing: HashSet<String>,
}

/// A set of object names.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<ObjectState>>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object.
    pub fn insert(&self, name: &str) {
        self.state.lock().objects.insert(name.to_string());
    }

    /// True if the object exists.
    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().objects.contains(name)
    }

    /// Number of objects present.
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// True if no objects are present.
    pub fn is_empty(&self) -> bool {
        self.state.lock().objects.is_empty()
    }

    /// Objects deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Fails every deletion of the named object.
    pub fn fail_object(&self, name: &str) {
        self.state.lock().failing.insert(name.to_string());
    }
}

impl ObjectStore for MemoryObjectStore {
    fn delete_object(&self, target: &ObjectTarget) -> RmanResult<DeleteOutcome> {
        let mut state = self.state.lock();
        if state.failing.contains(&target.name) {
            return Err(RmanError::ObjectStore {
                object: target.name.clone(),
                reason: "injected failure".to_string(),
            });
        }
        if state.objects.remove(&target.name) {
            state.deleted.push(target.name.clone());
            Ok(DeleteOutcome::Removed)
        } else {
            Ok(DeleteOutcome::AlreadyAbsent)
        }
    }
}

/// FTAGs stored as JSON, with reference files placed by a directory ring.
///
/// A reference for file `n` of stream `s` is named `s.n` and lives in the
/// directory the ring assigns to that name. Object `k` of stream `s` is `s/k`.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    reftable: Arc<Ring>,
    header_len: u64,
}

impl JsonCodec {
    /// Creates a codec that places references with `reftable`.
    pub fn new(reftable: Arc<Ring>) -> Self {
        Self {
            reftable,
            header_len: 0,
        }
    }

    /// Sets the recovery header length reported for every stream.
    pub fn with_header_len(mut self, header_len: u64) -> Self {
        self.header_len = header_len;
        self
    }

    /// The directory ring.
    pub fn reftable(&self) -> &Arc<Ring> {
        &self.reftable
    }

    /// Encodes an FTAG attribute value.
    pub fn encode_ftag(&self, ftag: &Ftag) -> RmanResult<Vec<u8>> {
        serde_json::to_vec(ftag).map_err(|e| RmanError::corrupt(ref_name(ftag), e))
    }

    /// Name of the object holding `objno` of a stream.
    pub fn object_name(stream_id: &str, objno: u64) -> String {
        format!("{}/{}", stream_id, objno)
    }
}

fn ref_name(ftag: &Ftag) -> String {
    format!("{}.{}", ftag.stream_id, ftag.fileno)
}

impl StreamCodec for JsonCodec {
    fn decode_ftag(&self, raw: &[u8]) -> RmanResult<Ftag> {
        serde_json::from_slice(raw)
            .map_err(|e| RmanError::corrupt("<ftag>", format!("undecodable FTAG: {}", e)))
    }

    fn reference_path(&self, ftag: &Ftag) -> RmanResult<String> {
        let name = ref_name(ftag);
        let dir = &self.reftable.lookup(&name).node.name;
        Ok(format!("{}/{}", dir, name))
    }

    fn object_target(&self, ftag: &Ftag) -> RmanResult<ObjectTarget> {
        Ok(ObjectTarget {
            name: Self::object_name(&ftag.stream_id, ftag.objno),
            protection: Protection::default(),
            location: Location::default(),
        })
    }

    fn entry_fileno(&self, name: &str) -> Option<u64> {
        name.rsplit_once('.')?.1.parse().ok()
    }

    fn recovery_header_len(&self, _ftag: &Ftag) -> u64 {
        self.header_len
    }
}

/// One file laid down by [`StreamBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpec {
    /// Data length.
    pub bytes: u64,
    /// Whether the user-visible name still exists.
    pub live: bool,
    /// Change time of the reference file.
    pub ctime: i64,
    /// Data progress.
    pub state: DataState,
}

/// Lays out one stream's reference files and objects in memory stores.
///
/// Files are packed back to back; by default each file fills exactly one
/// object, so file `n` lives in object `n`.
#[derive(Debug, Clone)]
pub struct StreamBuilder {
    stream_id: String,
    objsize: u64,
    recovery_bytes: u64,
    files: Vec<FileSpec>,
    end_of_stream: bool,
}

impl StreamBuilder {
    /// Starts an empty stream with 1 KiB objects and 24 recovery bytes.
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            objsize: 1024,
            recovery_bytes: 24,
            files: Vec::new(),
            end_of_stream: true,
        }
    }

    /// Data bytes that fit in one object when the codec writes no recovery
    /// header; the size of a file appended by [`StreamBuilder::file`].
    pub fn data_per_object(&self) -> u64 {
        self.objsize - self.recovery_bytes
    }

    /// Appends a finalized file filling one object.
    pub fn file(mut self, live: bool) -> Self {
        let bytes = self.data_per_object();
        self.files.push(FileSpec {
            bytes,
            live,
            ctime: 0,
            state: DataState::Finalized,
        });
        self
    }

    /// Appends `n` files with the same liveness.
    pub fn files(mut self, n: usize, live: bool) -> Self {
        for _ in 0..n {
            self = self.file(live);
        }
        self
    }

    /// Appends a file with explicit attributes.
    pub fn file_with(mut self, spec: FileSpec) -> Self {
        self.files.push(spec);
        self
    }

    /// Whether the final file carries the end-of-stream flag. Defaults to true.
    pub fn end_of_stream(mut self, eos: bool) -> Self {
        self.end_of_stream = eos;
        self
    }

    /// Writes the stream and returns its reference paths in file order.
    pub fn build(
        &self,
        meta: &MemoryMetadata,
        objects: &MemoryObjectStore,
        codec: &JsonCodec,
    ) -> RmanResult<Vec<String>> {
        let header_len = codec.header_len;
        let data_per_obj = self
            .data_per_object()
            .checked_sub(header_len)
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                RmanError::Config(format!(
                    "recovery header of {} bytes leaves no room in {} byte objects",
                    header_len, self.objsize
                ))
            })?;
        let mut objno = 0u64;
        let mut offset = header_len;
        let mut paths = Vec::with_capacity(self.files.len());

        for (fileno, spec) in self.files.iter().enumerate() {
            let ftag = Ftag {
                stream_id: self.stream_id.clone(),
                ctag: "memory".to_string(),
                fileno: fileno as u64,
                objno,
                offset,
                state: spec.state,
                end_of_stream: self.end_of_stream && fileno + 1 == self.files.len(),
                objsize: self.objsize,
                recovery_bytes: self.recovery_bytes,
                bytes: spec.bytes,
            };
            let last = ftag.end_object(header_len)?;
            for obj in objno..=last {
                objects.insert(&JsonCodec::object_name(&self.stream_id, obj));
            }

            let path = codec.reference_path(&ftag)?;
            let stat = RefStat {
                link_count: if spec.live { 2 } else { 1 },
                ctime: spec.ctime,
                size: spec.bytes,
            };
            meta.put_ref(&path, stat, Some(codec.encode_ftag(&ftag)?));
            paths.push(path);

            // Offsets count the header; each object holds `data_per_obj` after it.
            let used = offset - header_len + spec.bytes;
            objno += used / data_per_obj;
            offset = header_len + used % data_per_obj;
        }
        Ok(paths)
    }
}

/// Memory-backed collaborators and handles to inspect them.
pub type MemoryBackends = (Backends, MemoryMetadata, MemoryObjectStore, Arc<JsonCodec>);

/// Builds memory-backed [`Backends`] for a set of reference directories.
pub fn memory_backends(dirs: &[&str]) -> RmanResult<MemoryBackends> {
    memory_backends_with_header(dirs, 0)
}

/// Like [`memory_backends`], with objects that open with a recovery header of
/// `header_len` bytes.
pub fn memory_backends_with_header(dirs: &[&str], header_len: u64) -> RmanResult<MemoryBackends> {
    let meta = MemoryMetadata::new();
    for dir in dirs {
        meta.add_dir(dir);
    }
    let objects = MemoryObjectStore::new();
    let codec = Arc::new(JsonCodec::new(Arc::new(reftable(dirs)?)).with_header_len(header_len));
    let backends = Backends::new(
        Arc::new(meta.clone()),
        Arc::new(objects.clone()),
        codec.clone(),
    );
    Ok((backends, meta, objects, codec))
}
