//! Device code generation

use rand_core::RngCore;

use crate::config::IdentityConfig;
use crate::types::DeviceCode;

/// Generate a fresh code from the configured prefix, length and alphabet
///
/// Characters are drawn uniformly; raw samples that would bias the modulo are
/// rejected and redrawn.
pub fn generate_code<R: RngCore + ?Sized>(config: &IdentityConfig, rng: &mut R) -> DeviceCode {
    let alphabet: Vec<char> = config.alphabet.chars().collect();
    let mut code = String::with_capacity(config.prefix.len() + config.length);
    code.push_str(&config.prefix);

    if alphabet.is_empty() {
        return DeviceCode::new_unchecked(code);
    }

    let n = alphabet.len() as u32;
    let zone = u32::MAX - (u32::MAX % n);
    let mut drawn = 0;
    while drawn < config.length {
        let sample = rng.next_u32();
        if sample < zone {
            code.push(alphabet[(sample % n) as usize]);
            drawn += 1;
        }
    }

    DeviceCode::new_unchecked(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    /// Deterministic counter RNG for reproducible output
    struct CountingRng(u32);

    impl RngCore for CountingRng {
        fn next_u32(&mut self) -> u32 {
            self.0 = self.0.wrapping_add(1);
            self.0
        }

        fn next_u64(&mut self) -> u64 {
            self.next_u32() as u64
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for byte in dest {
                *byte = self.next_u32() as u8;
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    #[test]
    fn test_generated_code_parses_back() {
        let config = IdentityConfig::default();
        for _ in 0..100 {
            let code = generate_code(&config, &mut OsRng);
            assert_eq!(code.as_str().len(), 9);
            assert_eq!(DeviceCode::parse(code.as_str(), &config).unwrap(), code);
        }
    }

    #[test]
    fn test_generation_is_pure_over_rng() {
        let config = IdentityConfig::default();
        let a = generate_code(&config, &mut CountingRng(0));
        let b = generate_code(&config, &mut CountingRng(0));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GT-BCDEFG");
    }

    #[test]
    fn test_custom_prefix_and_length() {
        let config = IdentityConfig {
            prefix: "X".into(),
            length: 3,
            alphabet: "AB".into(),
        };
        let code = generate_code(&config, &mut OsRng);
        assert!(code.as_str().starts_with('X'));
        assert_eq!(code.as_str().len(), 4);
        assert!(code.as_str()[1..].chars().all(|c| c == 'A' || c == 'B'));
    }
}
