use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::grid::SourceImage;

/// Perturb every channel with zero-mean Gaussian noise of standard deviation
/// `sigma`, rounding and clamping to `0..=255`.
///
/// Returns `None` for a non-positive (or non-finite) sigma: no noisy source.
pub fn add_gaussian_noise(src: &SourceImage, sigma: f64, seed: u64) -> Option<SourceImage> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return None;
    }
    let normal = Normal::new(0.0, sigma).ok()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = src.clone();
    for y in 0..src.height() {
        for x in 0..src.width() {
            let px = src.get(x, y);
            let mut noisy = [0u8; 3];
            for (c, v) in noisy.iter_mut().enumerate() {
                let sample = px[c] as f64 + normal.sample(&mut rng);
                *v = sample.round().clamp(0.0, 255.0) as u8;
            }
            out.set(x, y, noisy);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sigma_produces_nothing() {
        let src = SourceImage::filled(4, 4, [10, 20, 30]);
        assert!(add_gaussian_noise(&src, 0.0, 1).is_none());
        assert!(add_gaussian_noise(&src, -3.0, 1).is_none());
    }

    #[test]
    fn noise_is_seeded() {
        let src = SourceImage::filled(16, 16, [128, 128, 128]);
        let a = add_gaussian_noise(&src, 20.0, 7).unwrap();
        let b = add_gaussian_noise(&src, 20.0, 7).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, src);
    }
}
