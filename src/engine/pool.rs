//! Bounded worker pool.
use anyhow::{Context as _, Result};
use rayon::prelude::*;

/// Run `work` over every item with at most `parallelism` concurrent workers.
///
/// Results come back in input order. A `parallelism` of `0` or `1` (or a
/// single item) runs sequentially on the calling thread.
///
/// # Errors
///
/// Returns an error if the thread pool cannot be created.
pub fn run_bounded<T, R, F>(items: &[T], parallelism: usize, work: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if parallelism <= 1 || items.len() <= 1 {
        return Ok(items.iter().map(work).collect());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism.min(items.len()))
        .thread_name(|i| format!("converge-worker-{i}"))
        .build()
        .context("creating worker pool")?;
    Ok(pool.install(|| items.par_iter().map(&work).collect()))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn sequential_preserves_order() {
        let out = run_bounded(&[1, 2, 3], 0, |n| n * 10).unwrap();
        assert_eq!(out, [10, 20, 30]);
    }

    #[test]
    fn parallel_preserves_order() {
        let items: Vec<u64> = (0..32).collect();
        let out = run_bounded(&items, 4, |n| {
            std::thread::sleep(Duration::from_millis(32 - n));
            *n
        })
        .unwrap();
        assert_eq!(out, items);
    }

    #[test]
    fn concurrency_never_exceeds_bound() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<usize> = (0..24).collect();
        run_bounded(&items, 3, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {peak}");
    }
}
