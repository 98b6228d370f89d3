//! Parallel processing utilities for density and isosurface extraction
//!
//! This module provides configurable thread pool management, the slab
//! partitioning used by parallel Marching Cubes, and a fork/join helper that
//! isolates failing workers.
//!
//! ```rust
//! use neurodensity_reconstruction::parallel::{init_thread_pool, ThreadPoolConfig};
//!
//! // Configure the pool before the first extraction
//! let config = ThreadPoolConfig::default()
//!     .with_threads(4)
//!     .with_stack_size(16 * 1024 * 1024);
//!
//! init_thread_pool(config).expect("Failed to initialize thread pool");
//! ```

use log::{debug, warn};
use neurodensity_core::{Error, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};

/// Global thread pool shared by all extraction runs
static GLOBAL_THREAD_POOL: OnceLock<Option<Arc<ThreadPool>>> = OnceLock::new();
static THREAD_POOL_CONFIG: Mutex<ThreadPoolConfig> = Mutex::new(ThreadPoolConfig::new());

const DEFAULT_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Thread pool configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of threads to use (None = automatic)
    pub num_threads: Option<usize>,
    /// Thread stack size in bytes
    pub stack_size: Option<usize>,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Enable parallel processing (can be disabled for debugging)
    pub enabled: bool,
    /// Inputs shorter than this are mapped sequentially
    pub min_chunk_size: usize,
}

impl ThreadPoolConfig {
    const fn new() -> Self {
        Self {
            num_threads: None,
            stack_size: None,
            thread_name_prefix: String::new(),
            enabled: true,
            min_chunk_size: 256,
        }
    }

    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Enable or disable parallel processing
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_min_chunk_size(mut self, min_chunk_size: usize) -> Self {
        self.min_chunk_size = min_chunk_size;
        self
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            stack_size: Some(DEFAULT_STACK_SIZE),
            thread_name_prefix: "neurodensity".to_string(),
            ..Self::new()
        }
    }
}

fn build_pool(config: &ThreadPoolConfig) -> Result<ThreadPool> {
    let mut builder = ThreadPoolBuilder::new()
        .num_threads(config.num_threads.unwrap_or_else(default_parallelism));

    if let Some(stack_size) = config.stack_size {
        builder = builder.stack_size(stack_size);
    }

    if !config.thread_name_prefix.is_empty() {
        let prefix = config.thread_name_prefix.clone();
        builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
    }

    builder
        .build()
        .map_err(|e| Error::Algorithm(format!("Failed to create thread pool: {}", e)))
}

/// Initialize the global thread pool with custom configuration.
///
/// Has no effect once the pool exists.
pub fn init_thread_pool(config: ThreadPoolConfig) -> Result<()> {
    if GLOBAL_THREAD_POOL.get().is_some() {
        return Ok(());
    }

    let pool = build_pool(&config)?;

    if let Ok(mut global_config) = THREAD_POOL_CONFIG.lock() {
        *global_config = config;
    }

    GLOBAL_THREAD_POOL
        .set(Some(Arc::new(pool)))
        .map_err(|_| Error::Algorithm("Thread pool already initialized".to_string()))
}

/// Get the global thread pool, initializing with defaults if needed.
///
/// Returns `None` when the default pool could not be created; callers then
/// run on rayon's global pool.
pub fn get_thread_pool() -> Option<Arc<ThreadPool>> {
    GLOBAL_THREAD_POOL
        .get_or_init(|| match build_pool(&ThreadPoolConfig::default()) {
            Ok(pool) => Some(Arc::new(pool)),
            Err(e) => {
                warn!("{}, falling back to the global rayon pool", e);
                None
            }
        })
        .clone()
}

/// Get current thread pool configuration
pub fn get_config() -> ThreadPoolConfig {
    THREAD_POOL_CONFIG
        .lock()
        .map(|config| config.clone())
        .unwrap_or_else(|_| ThreadPoolConfig::default())
}

/// Check if parallel processing is enabled
pub fn is_parallel_enabled() -> bool {
    get_config().enabled
}

/// Number of logical CPUs
pub fn default_parallelism() -> usize {
    num_cpus::get().max(1)
}

/// Execute a parallel operation with the global thread pool
pub fn execute_parallel<F, R>(op: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match get_thread_pool() {
        Some(pool) if is_parallel_enabled() => pool.install(op),
        _ => op(),
    }
}

/// Parallel map over a slice, sequential for short inputs
pub fn parallel_map<T, U, F>(data: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    if !is_parallel_enabled() || data.len() < get_config().min_chunk_size {
        return data.iter().map(f).collect();
    }

    execute_parallel(|| data.par_iter().map(f).collect())
}

/// Parallel map with index
pub fn parallel_map_indexed<T, U, F>(data: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(usize, &T) -> U + Sync + Send,
{
    if !is_parallel_enabled() || data.len() < get_config().min_chunk_size {
        return data.iter().enumerate().map(|(i, x)| f(i, x)).collect();
    }

    execute_parallel(|| data.par_iter().enumerate().map(|(i, x)| f(i, x)).collect())
}

/// A contiguous run of grid slices handled by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Position of the segment in slice order
    pub index: usize,
    /// First slice
    pub start: usize,
    /// Slices owned by this segment
    pub len: usize,
    /// Slices read by this segment; one more than `len` except for the last
    /// segment, so that cubes straddling the boundary are covered
    pub padded_len: usize,
}

impl Segment {
    /// Number of cube layers this segment polygonises
    pub fn cube_layers(&self) -> usize {
        self.padded_len.saturating_sub(1)
    }
}

/// Split `slices` grid slices into at most `parts` contiguous segments.
///
/// Sizes differ by at most one; the first `slices % parts` segments take the
/// extra slice. Every segment except the last reads one slice past its end.
pub fn partition_slices(slices: usize, parts: usize) -> Vec<Segment> {
    if slices == 0 {
        return Vec::new();
    }
    let parts = parts.clamp(1, slices);
    let base = slices / parts;
    let remainder = slices % parts;

    let mut segments = Vec::with_capacity(parts);
    let mut start = 0;
    for index in 0..parts {
        let len = base + usize::from(index < remainder);
        let padded_len = if index + 1 < parts { len + 1 } else { len };
        segments.push(Segment {
            index,
            start,
            len,
            padded_len,
        });
        start += len;
    }
    segments
}

/// Message carried by a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Run `work` once per segment and return the outcomes in segment order.
///
/// A panicking worker yields `Err` with its panic message; the remaining
/// workers are unaffected.
pub fn fork_join<T, F>(segments: &[Segment], work: F) -> Vec<std::result::Result<T, String>>
where
    T: Send,
    F: Fn(&Segment) -> T + Sync + Send,
{
    let run = |segment: &Segment| {
        panic::catch_unwind(AssertUnwindSafe(|| work(segment))).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            warn!("Worker for segment {} failed: {}", segment.index, message);
            message
        })
    };

    debug!("Forking {} segment workers", segments.len());
    if !is_parallel_enabled() || segments.len() < 2 {
        return segments.iter().map(run).collect();
    }

    execute_parallel(|| segments.par_iter().map(run).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_pool_config() {
        let config = ThreadPoolConfig::default()
            .with_threads(4)
            .with_stack_size(16 * 1024 * 1024)
            .with_enabled(true);

        assert_eq!(config.num_threads, Some(4));
        assert_eq!(config.stack_size, Some(16 * 1024 * 1024));
        assert_eq!(config.thread_name_prefix, "neurodensity");
        assert!(config.enabled);
    }

    #[test]
    fn test_parallel_map() {
        let data = vec![1, 2, 3, 4, 5];
        let result = parallel_map(&data, |x| x * 2);
        assert_eq!(result, vec![2, 4, 6, 8, 10]);

        let large: Vec<usize> = (0..10_000).collect();
        let indexed = parallel_map_indexed(&large, |i, x| i + x);
        assert_eq!(indexed[9_999], 19_998);
    }

    #[test]
    fn test_partition_remainder_goes_first() {
        let segments = partition_slices(10, 3);
        let lens: Vec<usize> = segments.iter().map(|s| s.len).collect();
        let starts: Vec<usize> = segments.iter().map(|s| s.start).collect();
        let padded: Vec<usize> = segments.iter().map(|s| s.padded_len).collect();

        assert_eq!(lens, vec![4, 3, 3]);
        assert_eq!(starts, vec![0, 4, 7]);
        assert_eq!(padded, vec![5, 4, 3]);
    }

    #[test]
    fn test_partition_covers_every_cube_layer_once() {
        for slices in 1..20 {
            for parts in 1..8 {
                let segments = partition_slices(slices, parts);
                assert_eq!(segments.iter().map(|s| s.len).sum::<usize>(), slices);

                let layers: Vec<usize> = segments
                    .iter()
                    .flat_map(|s| s.start..s.start + s.cube_layers())
                    .collect();
                let expected: Vec<usize> = (0..slices - 1).collect();
                assert_eq!(layers, expected, "slices={} parts={}", slices, parts);
            }
        }
    }

    #[test]
    fn test_partition_clamps_parts() {
        assert!(partition_slices(0, 4).is_empty());
        let segments = partition_slices(2, 16);
        assert_eq!(segments.len(), 2);
        assert_eq!(partition_slices(5, 0).len(), 1);
    }

    #[test]
    fn test_fork_join_isolates_panics() {
        let segments = partition_slices(12, 4);
        let results = fork_join(&segments, |segment| {
            if segment.index == 2 {
                panic!("boom");
            }
            segment.start
        });

        assert_eq!(results.len(), 4);
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Ok(3));
        assert_eq!(results[2], Err("boom".to_string()));
        assert_eq!(results[3], Ok(9));
    }
}
