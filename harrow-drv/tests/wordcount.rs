//  WORDCOUNT.rs
//    by Lut99
//
//  Created:
//    26 Jun 2023, 09:48:33
//  Last edited:
//    28 Jun 2023, 15:27:10
//  Auto updated?
//    Yes
//
//  Description:
//!   End-to-end tests: a real master and real slaves on localhost, a
//!   real user program driving the job surface, buckets crossing real
//!   HTTP.
//

use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use harrow_cfg::node::TimingConfig;
use harrow_drv::driver::{self, MasterOptions};
use harrow_job::spec::WorkerOptions;
use harrow_job::worker;
use specifications::data::SubmitOpts;
use specifications::driving::JobScope;
use specifications::functions::{Emit, FunctionRegistry, Mapper, Reducer, TaskContext, UserProgram};


/***** HELPERS *****/
/// Splits every value on whitespace and emits `(word, "1")`.
struct WcMap;
impl Mapper for WcMap {
    fn map(&self, _ctx: &TaskContext, _key: &[u8], value: &[u8], emit: &mut dyn Emit) {
        for word in value.split(|byte| byte.is_ascii_whitespace()) {
            if word.is_empty() { continue; }
            emit.emit(word.to_vec(), b"1".to_vec());
        }
    }
}

/// Sums the (integer) values of one key.
struct WcReduce;
impl Reducer for WcReduce {
    fn reduce(&self, _ctx: &TaskContext, key: &[u8], values: &[Vec<u8>], emit: &mut dyn Emit) {
        let total: u64 = values.iter().map(|value| String::from_utf8_lossy(value).parse::<u64>().unwrap_or(0)).sum();
        emit.emit(key.to_vec(), total.to_string().into_bytes());
    }
}

/// Prefixes every key with `#` (to observe a post-reduce map step).
struct TagMap;
impl Mapper for TagMap {
    fn map(&self, _ctx: &TaskContext, key: &[u8], value: &[u8], emit: &mut dyn Emit) {
        let mut tagged: Vec<u8> = b"#".to_vec();
        tagged.extend_from_slice(key);
        emit.emit(tagged, value.to_vec());
    }
}

/// The wordcount user program, parameterized over the DAG shape under test.
struct WordCount {
    registry      : FunctionRegistry,
    input         : PathBuf,
    reduce_splits : u32,
    /// `true` runs the fused reduce-map; `false` the separate reduce-then-map chain.
    fused         : Option<bool>,
    results       : Mutex<Option<Vec<(Vec<u8>, Vec<u8>)>>>,
}

impl WordCount {
    fn new(input: PathBuf, reduce_splits: u32, fused: Option<bool>) -> Arc<Self> {
        let mut registry: FunctionRegistry = FunctionRegistry::new();
        registry.register_mapper("wc_map", WcMap);
        registry.register_mapper("tag_map", TagMap);
        registry.register_reducer("wc_reduce", WcReduce);
        Arc::new(Self {
            registry,
            input,
            reduce_splits,
            fused,
            results : Mutex::new(None),
        })
    }

    fn results(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.results.lock().unwrap().clone().expect("run-method never stored results")
    }
}

#[async_trait]
impl UserProgram for WordCount {
    fn registry(&self) -> &FunctionRegistry { &self.registry }

    async fn run(&self, job: &dyn JobScope) -> Result<(), Box<dyn Error + Send + Sync>> {
        let files = job.file_data(vec![ self.input.to_str().unwrap().into() ], SubmitOpts::default()).await?;
        let map = job.map_data(files, "wc_map", SubmitOpts::splits(1)).await?;

        let terminal = match self.fused {
            // The fused form: one round of tasks for reduce + map
            Some(true) => job.reducemap_data(map, "wc_reduce", "tag_map", SubmitOpts::splits(self.reduce_splits)).await?,
            // The separate form of the same DAG
            Some(false) => {
                let reduce = job.reduce_data(map, "wc_reduce", SubmitOpts::splits(self.reduce_splits)).await?;
                job.map_data(reduce, "tag_map", SubmitOpts::splits(1)).await?
            },
            // Plain wordcount, no post-map
            None => job.reduce_data(map, "wc_reduce", SubmitOpts::splits(self.reduce_splits)).await?,
        };

        let records = job.fetchall(terminal).await?;
        *self.results.lock().unwrap() = Some(records);

        // Iterative-style cleanup: close everything we made
        job.close(files).await?;
        job.close(map).await?;
        job.close(terminal).await?;
        Ok(())
    }
}



/// A wordcount over in-memory pairs that closes its datasets mid-job and then checks that the
/// master's local partitions are gone before the run-method even returns.
struct LocalWordCount {
    registry        : FunctionRegistry,
    /// The master's scratch root, probed for leftover partitions.
    master_scratch  : PathBuf,
    results         : Mutex<Option<Vec<(Vec<u8>, Vec<u8>)>>>,
    scratch_cleared : Mutex<Option<bool>>,
}

impl LocalWordCount {
    fn new(master_scratch: PathBuf) -> Arc<Self> {
        let mut registry: FunctionRegistry = FunctionRegistry::new();
        registry.register_reducer("wc_reduce", WcReduce);
        Arc::new(Self {
            registry,
            master_scratch,
            results         : Mutex::new(None),
            scratch_cleared : Mutex::new(None),
        })
    }

    fn results(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.results.lock().unwrap().clone().expect("run-method never stored results")
    }

    fn scratch_cleared(&self) -> Option<bool> {
        *self.scratch_cleared.lock().unwrap()
    }
}

#[async_trait]
impl UserProgram for LocalWordCount {
    fn registry(&self) -> &FunctionRegistry { &self.registry }

    async fn run(&self, job: &dyn JobScope) -> Result<(), Box<dyn Error + Send + Sync>> {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"1".to_vec()),
            (b"a".to_vec(), b"1".to_vec()),
        ];
        let local = job.local_data(pairs, SubmitOpts::splits(2)).await?;
        assert!(count_buckets(&self.master_scratch) > 0, "local partitions never reached the master's scratch");

        let reduce = job.reduce_data(local, "wc_reduce", SubmitOpts::splits(2)).await?;
        let records = job.fetchall(reduce).await?;
        *self.results.lock().unwrap() = Some(records);

        // Closing both ends makes the local partitions collectable; the drops are RPCs, so poll
        job.close(local).await?;
        job.close(reduce).await?;
        let mut cleared: bool = false;
        for _ in 0..100 {
            if count_buckets(&self.master_scratch) == 0 { cleared = true; break; }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        *self.scratch_cleared.lock().unwrap() = Some(cleared);
        Ok(())
    }
}



/// Grabs a port the OS considers free right now.
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

/// Runs one job end to end: a master plus `slaves`-many slaves, all in-process.
async fn run_job(program: Arc<dyn UserProgram>, slaves: u32, master_tmp: &std::path::Path) -> Vec<tempfile::TempDir> {
    let port: u16 = free_port();
    let timing: TimingConfig = TimingConfig{ heartbeat_interval: 1, heartbeat_misses: 3, retry_bound: 3 };

    let master = tokio::spawn(driver::run_master(program.clone(), MasterOptions {
        host          : "127.0.0.1".into(),
        port,
        tmpdir        : master_tmp.into(),
        timing,
        timing_slaves : slaves,
    }));

    let mut slave_tmps: Vec<tempfile::TempDir> = vec![];
    let mut slave_handles = vec![];
    for _ in 0..slaves {
        let tmp = tempfile::tempdir().unwrap();
        slave_handles.push(tokio::spawn(worker::run(program.clone(), WorkerOptions {
            master    : format!("127.0.0.1:{}", port),
            host      : "127.0.0.1".into(),
            port      : 0,
            tmpdir    : tmp.path().into(),
            capacity  : 2,
            heartbeat : Duration::from_secs(1),
        })));
        slave_tmps.push(tmp);
    }

    let result = tokio::time::timeout(Duration::from_secs(60), master).await
        .expect("job timed out")
        .expect("master task panicked");
    result.expect("master run failed");

    // The shutdown quits the slaves; give them a moment, then make sure they are gone
    for handle in slave_handles {
        match tokio::time::timeout(Duration::from_secs(10), handle).await {
            Ok(_)  => {},
            Err(_) => panic!("slave did not quit after master shutdown"),
        }
    }

    slave_tmps
}

/// Counts the bucket files anywhere under the given directory.
fn count_buckets(dir: &std::path::Path) -> usize {
    let mut count: usize = 0;
    let mut stack: Vec<PathBuf> = vec![dir.into()];
    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(_)      => { continue; },
        };
        for entry in entries {
            let path: PathBuf = match entry {
                Ok(entry) => entry.path(),
                Err(_)    => { continue; },
            };
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().map(|ext| ext == "bucket").unwrap_or(false) {
                count += 1;
            }
        }
    }
    count
}

/// Asserts that no bucket files linger anywhere under the given directory.
fn assert_no_buckets(dir: &std::path::Path) {
    assert_eq!(count_buckets(dir), 0, "residual bucket files under {}", dir.display());
}


/***** TESTS *****/
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wordcount_single_slave() {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut input, b"a a b").unwrap();

    let master_tmp = tempfile::tempdir().unwrap();
    let program: Arc<WordCount> = WordCount::new(input.path().into(), 1, None);
    let slave_tmps = run_job(program.clone(), 1, master_tmp.path()).await;

    // The reducer sees each key once; the terminal multiset is exact
    assert_eq!(program.results(), vec![
        (b"a".to_vec(), b"2".to_vec()),
        (b"b".to_vec(), b"1".to_vec()),
    ]);

    // Everything was closed, so nothing survives job end
    assert_no_buckets(master_tmp.path());
    for tmp in &slave_tmps { assert_no_buckets(tmp.path()); }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wordcount_two_slaves_two_reduce_splits() {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut input, b"a b a").unwrap();

    let master_tmp = tempfile::tempdir().unwrap();
    let program: Arc<WordCount> = WordCount::new(input.path().into(), 2, None);
    let _slave_tmps = run_job(program.clone(), 2, master_tmp.path()).await;

    // The stable hash sends "a" to split 0 and "b" to split 1; fetchall concatenates in split
    // order, so exactly one reduce task saw "a" (with both its values) and the order is fixed
    assert_eq!(program.results(), vec![
        (b"a".to_vec(), b"2".to_vec()),
        (b"b".to_vec(), b"1".to_vec()),
    ]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reducemap_matches_separate_reduce_and_map() {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut input, b"a a b c c c").unwrap();

    let fused_tmp = tempfile::tempdir().unwrap();
    let fused: Arc<WordCount> = WordCount::new(input.path().into(), 2, Some(true));
    run_job(fused.clone(), 1, fused_tmp.path()).await;

    let separate_tmp = tempfile::tempdir().unwrap();
    let separate: Arc<WordCount> = WordCount::new(input.path().into(), 2, Some(false));
    run_job(separate.clone(), 1, separate_tmp.path()).await;

    let mut fused_records = fused.results();
    let mut separate_records = separate.results();
    fused_records.sort();
    separate_records.sort();
    assert_eq!(fused_records, separate_records);
    assert_eq!(fused_records, vec![
        (b"#a".to_vec(), b"2".to_vec()),
        (b"#b".to_vec(), b"1".to_vec()),
        (b"#c".to_vec(), b"3".to_vec()),
    ]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn closing_local_data_frees_master_scratch_mid_job() {
    let master_tmp = tempfile::tempdir().unwrap();
    let program: Arc<LocalWordCount> = LocalWordCount::new(master_tmp.path().into());
    let _slave_tmps = run_job(program.clone(), 1, master_tmp.path()).await;

    assert_eq!(program.results(), vec![
        (b"a".to_vec(), b"2".to_vec()),
        (b"b".to_vec(), b"1".to_vec()),
    ]);
    // The run-method probed the master's scratch after closing; the partitions must have been
    // dropped before job end, not merely wiped by the final cleanup
    assert_eq!(program.scratch_cleared(), Some(true), "master-held local partitions survived their dataset's closure");
}
