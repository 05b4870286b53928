use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Icon size categories, as raw 32-bit RGBA bitmaps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IconSize {
    /// 16x16
    Small,
    /// 32x32
    Medium,
    /// 48x48
    Large,
    /// 256x256
    Jumbo,
}

impl IconSize {
    pub fn all() -> &'static [IconSize] {
        &[
            IconSize::Small,
            IconSize::Medium,
            IconSize::Large,
            IconSize::Jumbo,
        ]
    }

    pub fn pixels(&self) -> usize {
        match self {
            IconSize::Small => 16,
            IconSize::Medium => 32,
            IconSize::Large => 48,
            IconSize::Jumbo => 256,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.pixels() * self.pixels() * 4
    }

    pub fn name(&self) -> &'static str {
        match self {
            IconSize::Small => "16px",
            IconSize::Medium => "32px",
            IconSize::Large => "48px",
            IconSize::Jumbo => "256px",
        }
    }
}

/// Configuration for data generation
#[derive(Debug, Clone)]
pub struct DataGenConfig {
    /// Default number of icons per size category
    pub entries_per_size: usize,
    /// Override entries for specific sizes (e.g., fewer jumbo icons)
    pub entries_override: std::collections::HashMap<IconSize, usize>,
    /// Fraction of icons (0.0 - 1.0) that repeat an earlier icon of the same size
    pub duplicate_ratio: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl DataGenConfig {
    /// Get the number of entries for a specific size
    pub fn entries_for_size(&self, size: IconSize) -> usize {
        self.entries_override
            .get(&size)
            .copied()
            .unwrap_or(self.entries_per_size)
    }
}

impl Default for DataGenConfig {
    fn default() -> Self {
        let mut entries_override = std::collections::HashMap::new();
        entries_override.insert(IconSize::Jumbo, 50);

        Self {
            entries_per_size: 500,
            entries_override,
            duplicate_ratio: 0.25,
            seed: 42,
        }
    }
}

/// A generated icon
#[derive(Debug, Clone)]
pub struct Entry {
    pub content: Vec<u8>,
    pub size_category: IconSize,
    /// Index of the earlier entry (within the same size) this one repeats
    pub duplicate_of: Option<usize>,
}

/// Deterministic generator of icon-like blobs
pub struct DataGenerator {
    config: DataGenConfig,
}

impl DataGenerator {
    pub fn new(config: DataGenConfig) -> Self {
        Self { config }
    }

    fn size_seed(seed: u64, size: IconSize) -> u64 {
        seed.wrapping_add((size.pixels() as u64) << 32)
    }

    /// Pick which index an entry's pixels come from (itself, or an earlier one).
    fn source_index(seed: u64, size: IconSize, index: usize, duplicate_ratio: f64) -> usize {
        if index == 0 {
            return 0;
        }
        let mut rng = StdRng::seed_from_u64(Self::size_seed(seed, size) ^ index as u64);
        if rng.gen_bool(duplicate_ratio.clamp(0.0, 1.0)) {
            rng.gen_range(0..index)
        } else {
            index
        }
    }

    /// Fill a bitmap for `source` (deterministic based on seed + index).
    fn generate_pixels(seed: u64, size: IconSize, source: usize) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(
            Self::size_seed(seed, size)
                .wrapping_add(source as u64)
                .wrapping_add(0x1234567890abcdef),
        );
        let mut data = vec![0u8; size.byte_size()];
        rng.fill(&mut data[..]);
        data
    }

    /// Generate a single entry (can be called in parallel)
    fn generate_entry(seed: u64, size: IconSize, index: usize, duplicate_ratio: f64) -> Entry {
        let mut source = index;
        // Follow the chain back so a duplicate always names an original.
        loop {
            let next = Self::source_index(seed, size, source, duplicate_ratio);
            if next == source {
                break;
            }
            source = next;
        }

        Entry {
            content: Self::generate_pixels(seed, size, source),
            size_category: size,
            duplicate_of: (source != index).then_some(source),
        }
    }

    /// Generate all entries (parallel)
    pub fn generate_all(&self) -> Vec<Entry> {
        IconSize::all()
            .iter()
            .flat_map(|&size| self.generate_for_size(size))
            .collect()
    }

    /// Generate all entries with console progress logging (parallel)
    pub fn generate_all_with_logging(&self) -> Vec<Entry> {
        let total_entries: usize = IconSize::all()
            .iter()
            .map(|&s| self.config.entries_for_size(s))
            .sum();
        let total_bytes = estimate_total_size(&self.config);

        println!(
            "Generating {} icons across {} size categories (parallel)...",
            total_entries,
            IconSize::all().len()
        );
        println!(
            "Estimated total size: {:.2} MB ({:.0}% repeats)",
            total_bytes as f64 / 1_048_576.0,
            self.config.duplicate_ratio * 100.0
        );
        println!();

        let mut all_entries = Vec::with_capacity(total_entries);

        for &size in IconSize::all() {
            let count = self.config.entries_for_size(size);
            let seed = self.config.seed;
            let ratio = self.config.duplicate_ratio;

            print!("  Generating {} icons ({} each)... ", size.name(), count);
            let _ = io::stdout().flush();

            let progress_counter = AtomicUsize::new(0);

            let entries: Vec<Entry> = (0..count)
                .into_par_iter()
                .map(|i| {
                    let entry = Self::generate_entry(seed, size, i, ratio);

                    let done = progress_counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if count >= 100 && done % (count / 10) == 0 {
                        eprint!("{}%.. ", (done * 100) / count);
                    }

                    entry
                })
                .collect();

            let repeats = entries.iter().filter(|e| e.duplicate_of.is_some()).count();
            println!(
                "done ({:.2} MB, {} repeats)",
                (count * size.byte_size()) as f64 / 1_048_576.0,
                repeats
            );

            all_entries.extend(entries);
        }

        println!();
        all_entries
    }

    /// Generate entries for a specific size category (parallel)
    pub fn generate_for_size(&self, size: IconSize) -> Vec<Entry> {
        let count = self.config.entries_for_size(size);
        let seed = self.config.seed;
        let ratio = self.config.duplicate_ratio;

        (0..count)
            .into_par_iter()
            .map(|i| Self::generate_entry(seed, size, i, ratio))
            .collect()
    }
}

/// Estimate total data size in bytes, repeats included
pub fn estimate_total_size(config: &DataGenConfig) -> usize {
    IconSize::all()
        .iter()
        .map(|&s| s.byte_size() * config.entries_for_size(s))
        .sum()
}
