//! Test data generation.
//!
//! Workout tests want many files with distinct contents and names, and
//! they want the same files on every run.  Payloads come from a seeded
//! Xoshiro generator; names are drawn from small word lists as
//! `adjective.noun` pairs, deduplicated.

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub struct GeneratedData {
    pub data: Vec<u8>,
}

pub struct DataBuilder {
    /// Number of payload bytes to produce.
    size: usize,
    /// Seed for the PRNG.
    seed: u64,
}

impl Default for DataBuilder {
    fn default() -> Self {
        DataBuilder { size: 1000, seed: 1 }
    }
}

impl DataBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn build(&self) -> GeneratedData {
        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let mut data = vec![0u8; self.size];
        rng.fill_bytes(&mut data);
        GeneratedData { data }
    }
}

static ADJECTIVES: [&str; 20] = [
    "nice", "cool", "clever", "funny", "bad", "fast", "slow", "neat", "bold", "beatup",
    "lost", "found", "final", "first", "shiny", "lazy", "tired", "soft", "hard", "flaming",
];

static NOUNS: [&str; 20] = [
    "cabbage", "cucumber", "car", "burger", "house", "sandwich", "sand", "phone", "computer",
    "grass", "wheel", "street", "bottle", "device", "table", "chair", "screen", "trouser",
    "steak", "coffee",
];

/// Generates unique `adjective.noun` file names.  The 400 combinations
/// comfortably cover the file populations the tests use.
pub struct NameGen {
    rng: Xoshiro256Plus,
    used: Vec<String>,
}

impl NameGen {
    pub fn new(seed: u64) -> NameGen {
        NameGen {
            rng: Xoshiro256Plus::seed_from_u64(seed),
            used: Vec::new(),
        }
    }

    pub fn next_name(&mut self) -> String {
        loop {
            let adjective = ADJECTIVES[self.rng.gen_range(0..ADJECTIVES.len())];
            let noun = NOUNS[self.rng.gen_range(0..NOUNS.len())];
            let name = format!("{}.{}", adjective, noun);
            if !self.used.contains(&name) {
                self.used.push(name.clone());
                return name;
            }
        }
    }
}
