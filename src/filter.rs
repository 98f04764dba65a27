use bit_vec::BitVec;
use seahash::hash;

/// Bloom filter over live record ids.
///
/// Answers "definitely absent" without touching the table; a positive answer
/// still has to be confirmed against the primary map.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    bits: BitVec,
    num_hashes: u32,
}

impl KeyFilter {
    /// expected_items: how many ids the filter is sized for.
    /// false_positive_rate: acceptable error rate (e.g. 0.01 for 1%).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);

        // m = -(n * ln(p)) / (ln(2)^2)
        let ln2 = 2.0f64.ln();
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(8.0);

        // k = (m / n) * ln(2)
        let k = ((m / n) * ln2).ceil().max(1.0);

        Self {
            bits: BitVec::from_elem(m as usize, false),
            num_hashes: k as u32,
        }
    }

    pub fn insert(&mut self, key: &str) {
        let m = self.bits.len() as u64;
        for idx in probe_positions(key.as_bytes(), self.num_hashes, m) {
            self.bits.set(idx, true);
        }
    }

    /// FALSE means definitely not present; TRUE means it might be.
    pub fn might_contain(&self, key: &str) -> bool {
        let m = self.bits.len() as u64;
        probe_positions(key.as_bytes(), self.num_hashes, m)
            .all(|idx| self.bits.get(idx).unwrap_or(false))
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }
}

/// Double hashing: g_i(x) = h1(x) + i * h2(x) mod m.
fn probe_positions(key: &[u8], num_hashes: u32, m: u64) -> impl Iterator<Item = usize> {
    let h1 = hash(key);
    // Golden ratio offset gives a second hash without rehashing the key
    let h2 = h1.wrapping_add(0x9E3779B97F4A7C15) | 1;
    (0..num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
}
