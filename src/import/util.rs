/// Return a thread count suitable for CPU-bound rayon pools.
///
/// Reserves 2 cores for the rest of the machine, but never returns less than 1.
pub fn capped_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2).max(1))
        .unwrap_or(1)
}

/// Build a rayon pool with `num_threads` threads, falling back to a single
/// thread if the requested pool cannot be created.
pub fn build_pool(num_threads: usize, name: &'static str) -> rayon::ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.max(1))
        .thread_name(move |i| format!("{}-{}", name, i))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("cannot build {} pool of {}: {}", name, num_threads, e);
            rayon::ThreadPoolBuilder::new()
                .num_threads(1)
                .build()
                .expect("single-thread rayon pool")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_num_threads_is_at_least_one() {
        assert!(capped_num_threads() >= 1);
    }

    #[test]
    fn test_build_pool_thread_count() {
        assert_eq!(build_pool(3, "test").current_num_threads(), 3);
        assert_eq!(build_pool(0, "test").current_num_threads(), 1);
    }
}
