// src/utils/mod.rs
pub mod config;
pub mod db_connect;
pub mod deadline;
pub mod env;
pub mod progress_config;

/// Used system memory in MB.
pub fn get_memory_usage() -> u64 {
    use sysinfo::System;
    let mut sys = System::new_all();
    sys.refresh_memory();
    sys.used_memory() / (1024 * 1024) // Convert to MB
}

/// Sizes rayon's global pool once per process. Later calls are ignored.
pub fn init_worker_pool(worker_threads: usize) {
    let threads = if worker_threads == 0 {
        num_cpus::get()
    } else {
        worker_threads
    };
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        Ok(()) => log::info!("Worker pool initialized with {} threads", threads),
        Err(e) => log::debug!("Worker pool already initialized: {}", e),
    }
}
