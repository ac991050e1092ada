//! Compression transformation plugins.
//!
//! Implements `kernel_common::traits::Transformation` for LZ4 and Zstd, with
//! entropy-aware skipping: data whose sample entropy is already ≥7.5
//! bits/byte is passed through untouched rather than spending CPU on a
//! compression attempt that would not shrink it. `spec.md` §4.6 selects
//! among registered `"Compression"` plugins by quality level; `fast()`,
//! `optimal()`, and `high()` below are the three tiers `StorageIntent`'s
//! `Compression` enum resolves to.

mod error;

use std::borrow::Cow;
use std::io::Write;

use futures::future::BoxFuture;
use kernel_common::error::{KernelError, Result};
use kernel_common::traits::{Transformation, TransformContext};
use kernel_common::PluginCategory;
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};

pub use error::CompressionError;

fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

/// Selects the backend codec. `None` is handled one level up by omitting
/// this plugin from the resolved pipeline entirely (`spec.md` §4.6: "If
/// intent.Compression == None, omit").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Lz4,
    Zstd,
}

impl Algorithm {
    fn tag(self) -> u8 {
        match self {
            Algorithm::Lz4 => 1,
            Algorithm::Zstd => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Algorithm::Lz4),
            2 => Some(Algorithm::Zstd),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Algorithm::Lz4 => "lz4",
            Algorithm::Zstd => "zstd",
        }
    }
}

/// Why a compression attempt left data untouched.
#[derive(Debug, Clone)]
pub enum CompressionSkipReason {
    Entropy { entropy: f32 },
    Ineffective { ratio: f32 },
}

impl std::fmt::Display for CompressionSkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionSkipReason::Entropy { entropy } => {
                write!(f, "entropy {:.2} bits/byte", entropy)
            }
            CompressionSkipReason::Ineffective { ratio } => {
                write!(f, "ineffective ratio {:.2}", ratio)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub original_size: usize,
    pub compressed_size: usize,
    pub compressed: bool,
    pub reused_original: bool,
    pub algorithm: &'static str,
    pub reason: Option<CompressionSkipReason>,
}

impl CompressionResult {
    pub fn ratio(&self) -> f32 {
        if self.compressed_size == 0 {
            return 1.0;
        }
        self.original_size as f32 / self.compressed_size as f32
    }
}

/// Shannon entropy of a byte sample, in bits per byte (0.0 = constant, 8.0 =
/// uniformly random).
fn estimate_entropy(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let total = data.len() as f32;
    let mut entropy = 0.0;

    for &count in freq.iter() {
        if count > 0 {
            let p = count as f32 / total;
            entropy -= p * p.log2();
        }
    }

    entropy
}

fn entropy_skip_reason(data: &[u8]) -> Option<CompressionSkipReason> {
    if data.len() < 1024 {
        return None;
    }

    let sample_size = data.len().min(1024);
    let entropy = estimate_entropy(&data[..sample_size]);

    if entropy >= 7.5 {
        Some(CompressionSkipReason::Entropy { entropy })
    } else {
        None
    }
}

#[instrument(skip(data), fields(algorithm = "lz4", level, input_len = data.len()))]
fn compress_lz4(data: &[u8], level: i32) -> std::result::Result<Vec<u8>, CompressionError> {
    let mut encoder = lz4::EncoderBuilder::new()
        .level(level as u32)
        .build(Vec::new())
        .map_err(|err| CompressionError::codec("lz4", err.to_string()))?;

    encoder
        .write_all(data)
        .map_err(|err| CompressionError::io("lz4", err))?;
    let (compressed, result) = encoder.finish();
    result.map_err(|err| CompressionError::codec("lz4", err.to_string()))?;

    debug!(compressed_len = compressed.len(), "lz4 compression complete");
    Ok(compressed)
}

#[instrument(skip(data), fields(algorithm = "lz4", input_len = data.len()))]
fn decompress_lz4(data: &[u8]) -> std::result::Result<Vec<u8>, CompressionError> {
    let mut decoder =
        lz4::Decoder::new(data).map_err(|err| CompressionError::codec("lz4", err.to_string()))?;
    let mut decompressed = Vec::new();
    std::io::copy(&mut decoder, &mut decompressed).map_err(|err| CompressionError::io("lz4", err))?;
    Ok(decompressed)
}

#[instrument(skip(data), fields(algorithm = "zstd", level, input_len = data.len()))]
fn compress_zstd(data: &[u8], level: i32) -> std::result::Result<Vec<u8>, CompressionError> {
    zstd::encode_all(data, level).map_err(|err| CompressionError::codec("zstd", err.to_string()))
}

#[instrument(skip(data), fields(algorithm = "zstd", input_len = data.len()))]
fn decompress_zstd(data: &[u8]) -> std::result::Result<Vec<u8>, CompressionError> {
    zstd::decode_all(data).map_err(|err| CompressionError::codec("zstd", err.to_string()))
}

fn adjusted_level(level: i32, algorithm: Algorithm) -> i32 {
    let clamped = match algorithm {
        Algorithm::Lz4 => level.clamp(1, 16),
        Algorithm::Zstd => level.clamp(-5, 22),
    };
    if clamped != level {
        warn!(
            original_level = level,
            clamped_level = clamped,
            algorithm = algorithm.name(),
            "compression level clamped to supported range"
        );
    }
    clamped
}

fn compress_with(
    algorithm: Algorithm,
    level: i32,
    data: &[u8],
) -> std::result::Result<Vec<u8>, CompressionError> {
    match algorithm {
        Algorithm::Lz4 => compress_lz4(data, level),
        Algorithm::Zstd => compress_zstd(data, level),
    }
}

fn decompress_with(
    algorithm: Algorithm,
    data: &[u8],
) -> std::result::Result<Vec<u8>, CompressionError> {
    match algorithm {
        Algorithm::Lz4 => decompress_lz4(data),
        Algorithm::Zstd => decompress_zstd(data),
    }
}

fn verify_integrity(
    algorithm: Algorithm,
    compressed: &[u8],
    original: &[u8],
) -> std::result::Result<(), CompressionError> {
    let decompressed = decompress_with(algorithm, compressed)?;
    if !constant_time_equal(&decompressed, original) {
        return Err(CompressionError::integrity(algorithm.name()));
    }
    Ok(())
}

/// Entropy-aware compress: skips the attempt entirely for high-entropy
/// input, and falls back to the original bytes if compression did not
/// actually shrink the data. The returned bytes always carry a one-byte
/// algorithm tag (`0` = stored uncompressed, `1` = lz4, `2` = zstd) so
/// `decompress` can dispatch without external metadata.
#[instrument(skip(data), fields(input_len = data.len()))]
pub fn adaptive_compress(
    algorithm: Algorithm,
    level: i32,
    data: &[u8],
) -> std::result::Result<(Vec<u8>, CompressionResult), CompressionError> {
    if let Some(reason) = entropy_skip_reason(data) {
        info!(?reason, "skipping compression due to high entropy");
        return Ok((stored_uncompressed(data), CompressionResult {
            original_size: data.len(),
            compressed_size: data.len(),
            compressed: false,
            reused_original: true,
            algorithm: "identity",
            reason: Some(reason),
        }));
    }

    let level = adjusted_level(level, algorithm);
    let compressed = compress_with(algorithm, level, data)?;

    if compressed.len() >= data.len() {
        let ratio = compressed.len() as f32 / data.len() as f32;
        info!(
            original_len = data.len(),
            compressed_len = compressed.len(),
            ratio,
            "compression ineffective, storing original"
        );
        return Ok((stored_uncompressed(data), CompressionResult {
            original_size: data.len(),
            compressed_size: data.len(),
            compressed: false,
            reused_original: true,
            algorithm: "identity",
            reason: Some(CompressionSkipReason::Ineffective { ratio }),
        }));
    }

    verify_integrity(algorithm, &compressed, data)?;

    let mut tagged = Vec::with_capacity(compressed.len() + 1);
    tagged.push(algorithm.tag());
    tagged.extend_from_slice(&compressed);

    Ok((tagged, CompressionResult {
        original_size: data.len(),
        compressed_size: compressed.len(),
        compressed: true,
        reused_original: false,
        algorithm: algorithm.name(),
        reason: None,
    }))
}

fn stored_uncompressed(data: &[u8]) -> Vec<u8> {
    let mut tagged = Vec::with_capacity(data.len() + 1);
    tagged.push(0u8);
    tagged.extend_from_slice(data);
    tagged
}

/// Reverses [`adaptive_compress`] by reading the leading algorithm tag.
pub fn decompress_tagged(data: &[u8]) -> std::result::Result<Cow<'_, [u8]>, CompressionError> {
    let (tag, body) = data
        .split_first()
        .ok_or_else(|| CompressionError::invalid_policy("empty compressed payload"))?;
    match tag {
        0 => Ok(Cow::Borrowed(body)),
        other => {
            let algorithm = Algorithm::from_tag(*other)
                .ok_or_else(|| CompressionError::invalid_policy(format!("unknown tag {other}")))?;
            Ok(Cow::Owned(decompress_with(algorithm, body)?))
        }
    }
}

/// One compression plugin registered under `PluginCategory::Compression`.
/// `quality_level` feeds `PolicyEnforcer`'s selection in `spec.md` §4.6
/// ("ordered by ... descending quality level").
pub struct CompressionTransform {
    plugin_id: String,
    algorithm: Algorithm,
    level: i32,
    quality_level: u32,
}

impl CompressionTransform {
    pub fn new(plugin_id: impl Into<String>, algorithm: Algorithm, level: i32, quality_level: u32) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            algorithm,
            level,
            quality_level,
        }
    }

    /// `StorageIntent::Compression::Fast` — LZ4 at a low level, cheap CPU.
    pub fn fast() -> Self {
        Self::new("compression.lz4.fast", Algorithm::Lz4, 1, 10)
    }

    /// `StorageIntent::Compression::Optimal` — Zstd at a balanced level.
    pub fn optimal() -> Self {
        Self::new("compression.zstd.optimal", Algorithm::Zstd, 6, 50)
    }

    /// `StorageIntent::Compression::High` — Zstd at max ratio.
    pub fn high() -> Self {
        Self::new("compression.zstd.high", Algorithm::Zstd, 19, 90)
    }
}

impl Transformation for CompressionTransform {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Transformation
    }

    fn step_name(&self) -> &str {
        "Compression"
    }

    fn quality_level(&self) -> u32 {
        self.quality_level
    }

    fn on_write<'a>(
        &'a self,
        input: Vec<u8>,
        _ctx: &'a TransformContext,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let (tagged, _result) = adaptive_compress(self.algorithm, self.level, &input)
                .map_err(|e| KernelError::internal(e.to_string()))?;
            Ok(tagged)
        })
    }

    fn on_read<'a>(
        &'a self,
        input: Vec<u8>,
        _ctx: &'a TransformContext,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            decompress_tagged(&input)
                .map(|cow| cow.into_owned())
                .map_err(|e| KernelError::internal(e.to_string()))
        })
    }
}
