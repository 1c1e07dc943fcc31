use rand::seq::SliceRandom;
use rand::Rng;

const VOWELS: &[u8] = b"aeiou";
const CONSONANTS: &[u8] = b"bcdfghjklmnpqrstvwxyz";

/// Length of a generated container hostname.
pub const HOSTNAME_LEN: usize = 8;

/// Generate a pronounceable hostname: consonants and vowels alternating,
/// starting with a consonant.
pub fn generate(len: usize) -> String {
    with_rng(&mut rand::thread_rng(), len)
}

/// Same as [`generate`] but with a caller-supplied RNG, so tests can pin a seed.
pub fn with_rng<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    let mut word = String::with_capacity(len);
    for i in 0..len {
        let pool = if i % 2 == 0 { CONSONANTS } else { VOWELS };
        word.push(*pool.choose(rng).unwrap() as char);
    }
    word
}
