//! Payload mutation: obfuscated variants of a probe, plus the alternate
//! encodings retried when a filter appears to block it.

use ahash::AHashSet;
use base64::Engine;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Characters occasionally useful to sneak past unsanitised concatenation.
pub const SPECIAL_CHARS: [char; 5] = ['"', '\'', ';', '|', '&'];

/// Source of randomized variants. Production code uses an entropy-seeded
/// generator; tests may pin a seed through `with_seed`.
pub struct Mutator {
    rng: Mutex<StdRng>,
}

impl Mutator {
    pub fn new() -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()) }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    /// The probe itself, three randomized transforms and every alternate
    /// encoding. Duplicates collapse.
    pub fn variants(&self, probe: &str) -> AHashSet<String> {
        let mut out = AHashSet::new();
        out.insert(probe.to_string());
        out.insert(self.random_case(probe));
        out.insert(self.percent_encode_random(probe));
        out.insert(self.insert_special(probe));
        out.extend(alternate_encodings(probe));
        out
    }

    pub fn random_case(&self, text: &str) -> String {
        let mut rng = self.rng.lock();
        text.chars()
            .map(|c| {
                if rng.gen_bool(0.5) {
                    c.to_uppercase().collect::<String>()
                } else {
                    c.to_lowercase().collect::<String>()
                }
            })
            .collect()
    }

    /// Alphanumerics are kept; every other character is independently kept
    /// or replaced by the `%xx` escapes of its UTF-8 bytes.
    pub fn percent_encode_random(&self, text: &str) -> String {
        let mut rng = self.rng.lock();
        let mut out = String::with_capacity(text.len() * 2);
        for c in text.chars() {
            if c.is_alphanumeric() || rng.gen_bool(0.5) {
                out.push(c);
            } else {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{:02x}", b));
                }
            }
        }
        out
    }

    pub fn insert_special(&self, text: &str) -> String {
        let mut rng = self.rng.lock();
        let special = *SPECIAL_CHARS.choose(&mut *rng).unwrap_or(&'\'');
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let pos = boundaries[rng.gen_range(0..boundaries.len())];

        let mut out = String::with_capacity(text.len() + 1);
        out.push_str(&text[..pos]);
        out.push(special);
        out.push_str(&text[pos..]);
        out
    }
}

impl Default for Mutator {
    fn default() -> Self {
        Self::new()
    }
}

/// Single URL encoding, double URL encoding and base64, in that order.
pub fn alternate_encodings(probe: &str) -> Vec<String> {
    let quoted = urlencoding::encode(probe).into_owned();
    let double_quoted = urlencoding::encode(&quoted).into_owned();
    let b64 = base64::engine::general_purpose::STANDARD.encode(probe.as_bytes());
    vec![quoted, double_quoted, b64]
}
