use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use statrs::statistics::Statistics;

/// a macro to declare simple Vec<String>
#[macro_export]
macro_rules! string_vec {
    ($($x:expr),*) => {
        vec![$($x.into()),*]
    };
}

/// a function used essentially in CV that split randomly a Vec<T> into p Vec<T> of approximatively the same size
pub fn split_into_balanced_random_chunks<T: std::clone::Clone>(vec: Vec<T>, p: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<T>> {
    // Step 1: Shuffle the original vector
    let mut shuffled = vec;
    shuffled.shuffle(rng);

    // Step 2: Determine sizes for balanced chunks
    let n = shuffled.len();
    let base_size = n / p; // Minimum size for each chunk
    let extra_elements = n % p; // Remaining elements to distribute

    // Step 3: Create chunks with balanced sizes
    let mut chunks = Vec::new();
    let mut start = 0;

    for i in 0..p {
        let chunk_size = base_size + if i < extra_elements { 1 } else { 0 }; // Add one extra element to the first `extra_elements` chunks
        let end = start + chunk_size;
        chunks.push(shuffled[start..end].to_vec());
        start = end;
    }

    chunks
}

/// Deal each group (e.g. the indices of one class), shuffled, into p chunks.
///
/// Groups are laid end to end and dealt round-robin, so every chunk receives
/// its share of each group and chunk sizes differ by at most one overall.
pub fn split_into_stratified_random_chunks<T: std::clone::Clone>(groups: Vec<Vec<T>>, p: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<T>> {
    let mut chunks: Vec<Vec<T>> = vec![Vec::new(); p];
    let mut position = 0;

    for mut group in groups {
        group.shuffle(rng);
        for item in group {
            chunks[position % p].push(item);
            position += 1;
        }
    }

    chunks
}

/// Fractional ranks (1-based) of `values`: tied values share the mean of the
/// ranks they span.
pub fn fractional_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let start = i;
        while i + 1 < order.len() && values[order[i]] == values[order[i + 1]] {
            i += 1;
        }
        let rank = (start + i + 2) as f64 / 2.0;
        for k in start..=i {
            ranks[order[k]] = rank;
        }
        i += 1;
    }

    ranks
}

/// Mean and sample standard deviation (0 for fewer than two values)
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.mean();
    let std = if values.len() > 1 { values.std_dev() } else { 0.0 };
    (mean, std)
}

/// Derive an independent, reproducible seed for one task of a run (splitmix64 finaliser)
pub fn derive_seed(seed: u64, keys: &[u64]) -> u64 {
    let mut z = seed;
    for key in keys {
        z = z.wrapping_add(0x9E37_79B9_7F4A_7C15).wrapping_add(*key);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
    }
    z
}
