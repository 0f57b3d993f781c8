use std::path::PathBuf;

/// Configuration for the native spill runtime.
#[derive(Debug, Clone)]
pub struct NativeSpillConfig {
    /// Directories spill data may be written under. Streams are assigned
    /// round robin across roots.
    pub root_dirs: Vec<PathBuf>,
    /// IO threads servicing each root.
    pub io_threads_per_root: usize,
    /// Buffer size in bytes for reading spill files back.
    pub read_buffer_size: usize,
}

impl Default for NativeSpillConfig {
    fn default() -> Self {
        NativeSpillConfig {
            root_dirs: vec![std::env::temp_dir().join("silt_spill")],
            io_threads_per_root: num_cpus::get().clamp(1, 4),
            read_buffer_size: 64 * 1024,
        }
    }
}
