//! Shared fixtures for resource-manager integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use marfs_rman::memory::{
    memory_backends, memory_backends_with_header, JsonCodec, MemoryMetadata, MemoryObjectStore,
    StreamBuilder,
};
use marfs_rman::{
    Backends, GcExecutor, Namespace, QuotaTotals, RmanResult, SkipMarker, StreamHead,
    StreamWalker, SKIP_XATTR,
};

/// Far enough from the fixtures' ctime of 0 that nothing is too recent.
pub const NOW: i64 = 1_700_000_000;

/// Routes engine logs through the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One stream laid out in memory stores.
pub struct StreamFixture {
    pub backends: Backends,
    pub meta: MemoryMetadata,
    pub objects: MemoryObjectStore,
    pub codec: Arc<JsonCodec>,
    pub paths: Vec<String>,
}

impl StreamFixture {
    /// A stream whose file `i` is live when `live[i]` is true.
    pub fn new(live: &[bool]) -> Self {
        let mut builder = StreamBuilder::new("stream");
        for l in live {
            builder = builder.file(*l);
        }
        Self::from_builder(builder, 0)
    }

    /// A stream laid out by `builder` (whose id must be `"stream"`) behind
    /// objects that open with a `header_len` byte recovery header.
    pub fn from_builder(builder: StreamBuilder, header_len: u64) -> Self {
        let (backends, meta, objects, codec) =
            memory_backends_with_header(&["ref0", "ref1", "ref2"], header_len).expect("backends");
        let paths = builder.build(&meta, &objects, &codec).expect("stream");
        Self {
            backends,
            meta,
            objects,
            codec,
            paths,
        }
    }

    pub fn head(&self) -> StreamHead {
        let (dir, entry) = self.paths[0].rsplit_once('/').expect("ref path");
        StreamHead {
            dir: dir.to_string(),
            entry: entry.to_string(),
        }
    }

    /// Walks the stream with a real executor.
    pub fn walk(&self, dry_run: bool) -> RmanResult<QuotaTotals> {
        let executor = GcExecutor::new(self.backends.clone(), dry_run);
        StreamWalker::new(&self.backends, &executor, NOW, 0).walk(&self.head())
    }

    pub fn marker(&self, fileno: usize) -> SkipMarker {
        self.meta
            .xattr(&self.paths[fileno], SKIP_XATTR)
            .map(|raw| SkipMarker::parse(&raw).expect("marker"))
            .unwrap_or(SkipMarker::Absent)
    }

    pub fn ref_exists(&self, fileno: usize) -> bool {
        self.meta.exists(&self.paths[fileno])
    }

    pub fn object_exists(&self, objno: usize) -> bool {
        self.objects.contains(&JsonCodec::object_name("stream", objno as u64))
    }

    pub fn kill(&self, fileno: usize) {
        self.meta.set_link_count(&self.paths[fileno], 1);
    }
}

/// A namespace over its own memory stores.
pub struct NamespaceFixture {
    pub ns: Namespace,
    pub meta: MemoryMetadata,
    pub objects: MemoryObjectStore,
    /// Reference paths of each stream, in file order.
    pub streams: Vec<Vec<String>>,
}

/// A namespace holding `streams` streams, each laid out from `live`.
pub fn namespace(name: &str, streams: usize, live: &[bool]) -> NamespaceFixture {
    let dirs = ["refA", "refB"];
    let (backends, meta, objects, codec) = memory_backends(&dirs).expect("backends");
    let mut paths = Vec::new();
    for s in 0..streams {
        let mut builder = StreamBuilder::new(format!("{}-s{}", name, s));
        for l in live {
            builder = builder.file(*l);
        }
        paths.push(builder.build(&meta, &objects, &codec).expect("stream"));
    }
    NamespaceFixture {
        ns: Namespace::new(name, Arc::clone(codec.reftable()), backends),
        meta,
        objects,
        streams: paths,
    }
}
