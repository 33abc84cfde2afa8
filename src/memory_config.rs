use sysinfo::System;
use tracing::info;

/// Sizing for the streaming parquet reader and writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Rows decoded per record batch when scanning inputs
    pub read_batch_size: usize,
    /// Rows buffered by the writer before a row group is flushed
    pub max_row_group_size: usize,
}

const MIN_BATCH_ROWS: usize = 8_192;
const MAX_BATCH_ROWS: usize = 262_144;
const MIN_ROW_GROUP_ROWS: usize = 65_536;
const MAX_ROW_GROUP_ROWS: usize = 1_048_576;

impl MemoryConfig {
    /// Size buffers against 25% of system RAM.
    ///
    /// Memory budget breakdown:
    /// - Reader: one decoded batch (`read_batch_size` rows)
    /// - Writer: one open row group plus its compressed pages
    /// - Samples rows are roughly 64 bytes decoded (date, two short strings, tag, f64)
    pub fn calculate() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self::for_total_memory(sys.total_memory() as usize)
    }

    pub fn for_total_memory(total_memory: usize) -> Self {
        let target_memory = total_memory / 4;
        let bytes_per_row = 64;

        // Writer gets 80%: pages are kept uncompressed until the row group closes
        let writer_memory = (target_memory * 80) / 100;
        let reader_memory = target_memory - writer_memory;

        let read_batch_size = (reader_memory / bytes_per_row).clamp(MIN_BATCH_ROWS, MAX_BATCH_ROWS);
        let max_row_group_size = (writer_memory / bytes_per_row).clamp(MIN_ROW_GROUP_ROWS, MAX_ROW_GROUP_ROWS);

        let config = Self {
            read_batch_size,
            max_row_group_size,
        };

        info!(
            total_mb = total_memory / 1_048_576,
            target_mb = target_memory / 1_048_576,
            read_batch_size = config.read_batch_size,
            max_row_group_size = config.max_row_group_size,
            "memory configuration"
        );

        config
    }

    /// Get default configuration for testing or when system info unavailable
    pub fn default_config() -> Self {
        Self {
            read_batch_size: MIN_BATCH_ROWS,
            max_row_group_size: MIN_ROW_GROUP_ROWS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_from_host() {
        let config = MemoryConfig::calculate();

        assert!(config.read_batch_size >= MIN_BATCH_ROWS);
        assert!(config.read_batch_size <= MAX_BATCH_ROWS);
        assert!(config.max_row_group_size >= MIN_ROW_GROUP_ROWS);
        assert!(config.max_row_group_size <= MAX_ROW_GROUP_ROWS);
    }

    #[test]
    fn test_small_host_is_clamped_to_minimums() {
        let config = MemoryConfig::for_total_memory(4 * 1_048_576);
        assert_eq!(config, MemoryConfig::default_config());
    }

    #[test]
    fn test_large_host_is_clamped_to_maximums() {
        let config = MemoryConfig::for_total_memory(512 * 1_073_741_824);
        assert_eq!(config.read_batch_size, MAX_BATCH_ROWS);
        assert_eq!(config.max_row_group_size, MAX_ROW_GROUP_ROWS);
    }

    #[test]
    fn test_scaling_with_memory() {
        let small = MemoryConfig::for_total_memory(4 * 1_073_741_824);
        let big = MemoryConfig::for_total_memory(64 * 1_073_741_824);
        assert!(big.read_batch_size >= small.read_batch_size);
        assert!(big.max_row_group_size >= small.max_row_group_size);
    }
}
