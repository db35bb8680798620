// Copyright (c) The testfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use rand::{SeedableRng, rngs::StdRng, rngs::ThreadRng, seq::index};

/// Uniform random sampling without replacement, preserving the original order of the sample.
///
/// With a seed, sampling is reproducible across runs.
#[derive(Debug)]
pub struct Sampler {
    rng: SamplerRng,
}

#[derive(Debug)]
enum SamplerRng {
    Seeded(StdRng),
    Thread(ThreadRng),
}

impl Sampler {
    /// Creates a new sampler, seeded if `seed` is specified.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SamplerRng::Seeded(StdRng::seed_from_u64(seed)),
            None => SamplerRng::Thread(rand::rng()),
        };
        Self { rng }
    }

    /// Keeps at most `max` of `items`, chosen uniformly at random.
    ///
    /// The kept items stay in their original relative order. If there are `max` items or fewer,
    /// they are all returned.
    pub fn sample<T>(&mut self, items: Vec<T>, max: usize) -> Vec<T> {
        let len = items.len();
        if len <= max {
            return items;
        }
        let indexes = match &mut self.rng {
            SamplerRng::Seeded(rng) => index::sample(rng, len, max),
            SamplerRng::Thread(rng) => index::sample(rng, len, max),
        };

        let mut keep = vec![false; len];
        for index in indexes.iter() {
            keep[index] = true;
        }
        items
            .into_iter()
            .zip(keep)
            .filter_map(|(item, keep)| keep.then_some(item))
            .collect()
    }
}
