//! Image blob helpers: stride padding, photometric augmentation, and the
//! normalized CHW tensor conversion.

use crate::registry::PIXEL_MEANS_BGR;
use image::{GrayImage, RgbImage};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Zero-pad an image on the right/bottom so both dimensions are a multiple
/// of `stride`.
pub fn pad_to_stride(img: &RgbImage, stride: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let (pw, ph) = (w.div_ceil(stride) * stride, h.div_ceil(stride) * stride);
    if (pw, ph) == (w, h) {
        return img.clone();
    }
    let mut canvas = RgbImage::new(pw, ph);
    image::imageops::replace(&mut canvas, img, 0, 0);
    canvas
}

pub fn pad_label_to_stride(img: &GrayImage, stride: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let (pw, ph) = (w.div_ceil(stride) * stride, h.div_ceil(stride) * stride);
    if (pw, ph) == (w, h) {
        return img.clone();
    }
    let mut canvas = GrayImage::new(pw, ph);
    image::imageops::replace(&mut canvas, img, 0, 0);
    canvas
}

/// Chromatic jitter: random hue/lightness/saturation shifts, applied with
/// probability `prob` (training only at the call sites).
pub fn maybe_chromatic(img: &mut RgbImage, prob: f32, rng: &mut StdRng) {
    if prob <= 0.0 || rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let d_h = (rng.random_range(0.0..1.0f32) - 0.5) * 0.1 * 360.0;
    let d_l = (rng.random_range(0.0..1.0f32) - 0.5) * 0.2;
    let d_s = (rng.random_range(0.0..1.0f32) - 0.5) * 0.2;
    for pixel in img.pixels_mut() {
        let (h, l, s) = rgb_to_hls(pixel.0);
        let h = (h + d_h).rem_euclid(360.0);
        let l = (l + d_l).clamp(0.0, 1.0);
        let s = (s + d_s).clamp(0.0, 1.0);
        pixel.0 = hls_to_rgb(h, l, s);
    }
}

/// Noise injection: Gaussian pixel noise most of the time, salt-and-pepper
/// otherwise, applied with probability `prob`.
pub fn maybe_noise(img: &mut RgbImage, prob: f32, rng: &mut StdRng) {
    if prob <= 0.0 || rng.random_range(0.0..1.0) >= prob {
        return;
    }
    if rng.random_range(0.0..1.0) < 0.9 {
        let sigma = rng.random_range(0.0..0.3f32).sqrt() * 255.0 * 0.1;
        let Ok(normal) = Normal::new(0.0f32, sigma.max(1e-3)) else {
            return;
        };
        for pixel in img.pixels_mut() {
            let noise = normal.sample(rng);
            for c in 0..3 {
                pixel[c] = (pixel[c] as f32 + noise).clamp(0.0, 255.0) as u8;
            }
        }
    } else {
        let amount = 0.05f32;
        for pixel in img.pixels_mut() {
            let r = rng.random_range(0.0..1.0f32);
            if r < amount / 2.0 {
                pixel.0 = [0, 0, 0];
            } else if r < amount {
                pixel.0 = [255, 255, 255];
            }
        }
    }
}

/// Convert to the trainer tensor layout: CHW, BGR channel order, per-channel
/// pixel mean subtracted (`255 * (v/255 - mean/255)`).
pub fn image_tensor_chw(img: &RgbImage) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut out = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * w + x) as usize;
        // BGR order: channel 0 is blue.
        out[base] = pixel[2] as f32 - PIXEL_MEANS_BGR[0];
        out[plane + base] = pixel[1] as f32 - PIXEL_MEANS_BGR[1];
        out[2 * plane + base] = pixel[0] as f32 - PIXEL_MEANS_BGR[2];
    }
    out
}

fn rgb_to_hls(rgb: [u8; 3]) -> (f32, f32, f32) {
    let r = rgb[0] as f32 / 255.0;
    let g = rgb[1] as f32 / 255.0;
    let b = rgb[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    if (max - min).abs() < f32::EPSILON {
        return (0.0, l, 0.0);
    }
    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let h = if max == r {
        60.0 * (((g - b) / d).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / d + 2.0)
    } else {
        60.0 * ((r - g) / d + 4.0)
    };
    (h, l, s)
}

fn hls_to_rgb(h: f32, l: f32, s: f32) -> [u8; 3] {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp.rem_euclid(2.0) - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    [
        ((r1 + m).clamp(0.0, 1.0) * 255.0).round() as u8,
        ((g1 + m).clamp(0.0, 1.0) * 255.0).round() as u8,
        ((b1 + m).clamp(0.0, 1.0) * 255.0).round() as u8,
    ]
}
