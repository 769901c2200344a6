//! G.711 μ-law codec
//!
//! The telephony provider carries 8-bit μ-law audio; the models want signed
//! 16-bit PCM. Decoding goes through a 256-entry lookup table, encoding uses
//! the standard segmented companding with 0x84 bias and 32635 clip.

use once_cell::sync::Lazy;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// μ-law byte → i16 PCM lookup table, built once at first use.
static DECODE_TABLE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (byte, slot) in table.iter_mut().enumerate() {
        *slot = decode_byte(byte as u8);
    }
    table
});

/// Decode one μ-law byte per ITU-T G.711.
fn decode_byte(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = u & 0x0F;

    let mut sample = ((i32::from(mantissa) << 3) + BIAS) << exponent;
    sample -= BIAS;

    if sign != 0 {
        sample = -sample;
    }
    sample as i16
}

/// Encode one i16 PCM sample to a μ-law byte.
fn encode_sample(sample: i16) -> u8 {
    let mut value = i32::from(sample);
    let sign = if value < 0 {
        value = -value;
        0x80u8
    } else {
        0
    };
    if value > CLIP {
        value = CLIP;
    }
    value += BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((value >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode μ-law bytes to 16-bit PCM samples.
pub fn mulaw_to_pcm(mulaw: &[u8]) -> Vec<i16> {
    mulaw.iter().map(|&b| DECODE_TABLE[b as usize]).collect()
}

/// Encode 16-bit PCM samples to μ-law bytes.
pub fn pcm_to_mulaw(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().map(|&s| encode_sample(s)).collect()
}

/// Convert i16 PCM samples to f32 normalized [-1.0, 1.0].
pub fn pcm_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Convert f32 normalized samples to i16 PCM.
pub fn f32_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
        .collect()
}
