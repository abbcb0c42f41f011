//! Chunked parallel loops on top of the worker pool.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{merge_parallel_results, split_for_parallel, split_range, WorkItem, WorkerPool};
use crate::error::{Error, Result};

/// Splits work into chunks, runs one work item per chunk and waits for all of them.
#[derive(Debug, Clone)]
pub struct MultiThreader {
    pool: Arc<WorkerPool>,
    chunk_count: usize,
}

impl MultiThreader {
    /// Creates a multi-threader that splits work into `chunk_count` pieces.
    pub fn new(pool: Arc<WorkerPool>, chunk_count: usize) -> Self {
        Self {
            pool,
            chunk_count: chunk_count.max(1),
        }
    }

    /// Number of chunks work is split into.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Runs `f` once per sub-range of `range`.
    ///
    /// Returns the number of chunks run. Every chunk finishes before this
    /// returns, even when one of them fails.
    pub fn parallel_for<F>(&self, range: Range<usize>, f: F) -> Result<usize>
    where
        F: Fn(Range<usize>) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let chunks = split_range(range, self.chunk_count);
        let mut handles = Vec::with_capacity(chunks.len());
        let mut submit_error = None;

        for chunk in chunks {
            let f = Arc::clone(&f);
            match self
                .pool
                .submit(WorkItem::with_argument(chunk, move |r: &Range<usize>| f(r.clone())))
            {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    submit_error = Some(e);
                    break;
                }
            }
        }

        let waited = self.pool.wait_for_all(&handles);
        if let Some(e) = submit_error {
            return Err(e);
        }
        waited?;
        Ok(handles.len())
    }

    /// Applies `f` to chunks of `data` in parallel and concatenates the results
    /// in chunk order.
    pub fn map_bytes<F>(&self, data: &[u8], f: F) -> Result<Vec<u8>>
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        let chunks: Arc<Vec<Vec<u8>>> = Arc::new(split_for_parallel(data, self.chunk_count));
        let results: Arc<Mutex<Vec<Option<Vec<u8>>>>> =
            Arc::new(Mutex::new(vec![None; chunks.len()]));

        let input = Arc::clone(&chunks);
        let output = Arc::clone(&results);
        self.parallel_for(0..chunks.len(), move |indices| {
            for i in indices {
                let mapped = f(&input[i]);
                output.lock()[i] = Some(mapped);
            }
        })?;

        let results = std::mem::take(&mut *results.lock());
        let parts = results
            .into_iter()
            .map(|part| part.ok_or_else(|| Error::Internal("Chunk result missing".into())))
            .collect::<Result<Vec<_>>>()?;
        Ok(merge_parallel_results(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ParallelConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn threader(chunks: usize) -> MultiThreader {
        let pool = Arc::new(WorkerPool::new(ParallelConfig::default()).unwrap());
        MultiThreader::new(pool, chunks)
    }

    #[test]
    fn test_parallel_for_visits_every_index_once() {
        let threader = threader(4);
        let visits: Arc<Vec<AtomicUsize>> = Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect());
        let seen = Arc::clone(&visits);

        let chunks = threader
            .parallel_for(0..100, move |range| {
                for i in range {
                    seen[i].fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        assert_eq!(chunks, 4);
        assert!(visits.iter().all(|v| v.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_map_bytes_preserves_order() {
        let threader = threader(3);
        let data: Vec<u8> = (0..50).collect();
        let mapped = threader
            .map_bytes(&data, |chunk| chunk.iter().map(|b| b.wrapping_mul(2)).collect())
            .unwrap();
        let expected: Vec<u8> = data.iter().map(|b| b.wrapping_mul(2)).collect();
        assert_eq!(mapped, expected);
    }

    #[test]
    fn test_parallel_for_reports_panics() {
        let threader = threader(2);
        let result = threader.parallel_for(0..10, |range| {
            if range.start == 0 {
                panic!("bad chunk");
            }
        });
        assert!(matches!(result, Err(Error::JobPanicked { .. })));
    }

    #[test]
    fn test_empty_range() {
        let threader = threader(2);
        assert_eq!(threader.parallel_for(0..0, |_| {}).unwrap(), 0);
        assert!(threader.map_bytes(&[], |c| c.to_vec()).unwrap().is_empty());
    }
}
