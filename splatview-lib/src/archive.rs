//! zstd archives of `.splat` files.
//!
//! Packing is an explicit step for storing or shipping scenes. Nothing on the
//! decode or load path looks inside an archive; unpack first, then decode.

use crate::common::{is_zstd_frame, ZSTD_MAX_COMPRESSION_LVL};
use crate::error::SplatError;
use crate::structures::SPLAT_RECORD_SIZE;
use std::io::{Cursor, Write};
use tracing::{debug, warn};
use zstd::stream::{decode_all, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    /// Capped at the zstd maximum.
    pub level: u32,
    pub workers: u32,
}

impl Default for PackOptions {
    fn default() -> Self {
        PackOptions {
            level: 3,
            workers: 3,
        }
    }
}

impl PackOptions {
    #[inline]
    fn capped_level(&self) -> i32 {
        self.level.min(ZSTD_MAX_COMPRESSION_LVL) as i32
    }
}

/// Whole records only; a dangling partial record is not archived.
fn archivable(raw_data: &[u8]) -> &[u8] {
    let whole = raw_data.len() / SPLAT_RECORD_SIZE * SPLAT_RECORD_SIZE;
    if whole != raw_data.len() {
        warn!(
            dropped = raw_data.len() - whole,
            "Partial record left out of the archive"
        );
    }
    &raw_data[..whole]
}

fn check_frame(packed: &[u8]) -> Result<(), SplatError> {
    if is_zstd_frame(packed) {
        Ok(())
    } else {
        Err(SplatError::Format(
            "input is not a zstd archive (bad magic number)".to_string(),
        ))
    }
}

fn check_records(raw: Vec<u8>) -> Result<Vec<u8>, SplatError> {
    if raw.len() % SPLAT_RECORD_SIZE != 0 {
        return Err(SplatError::Format(format!(
            "archive holds {} bytes, not a whole number of {}-byte records",
            raw.len(),
            SPLAT_RECORD_SIZE
        )));
    }
    debug!(splats = raw.len() / SPLAT_RECORD_SIZE, "Archive unpacked");
    Ok(raw)
}

/// Packs the records of an uncompressed `.splat` buffer into one zstd frame.
pub fn pack(raw_data: &[u8], options: PackOptions) -> Result<Vec<u8>, SplatError> {
    let records = archivable(raw_data);
    let mut encoder = Encoder::new(Vec::new(), options.capped_level())?;
    encoder.multithread(options.workers)?;
    encoder.write_all(records)?;
    Ok(encoder.finish()?)
}

/// Reverses [`pack`]. The result is plain record data ready for `decode`.
pub fn unpack(packed: &[u8]) -> Result<Vec<u8>, SplatError> {
    check_frame(packed)?;
    let raw = decode_all(Cursor::new(packed))
        .map_err(|e| SplatError::Format(format!("zstd decompression failed: {}", e)))?;
    check_records(raw)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use async_compression::tokio::bufread::ZstdDecoder;
    use async_compression::tokio::write::ZstdEncoder;
    use async_compression::zstd::CParameter;
    use async_compression::Level;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

    pub async fn pack_async(raw_data: &[u8], options: PackOptions) -> Result<Vec<u8>, SplatError> {
        let records = archivable(raw_data);
        let mut packed = Vec::new();
        let mut encoder = ZstdEncoder::with_quality_and_params(
            &mut packed,
            Level::Precise(options.capped_level()),
            &[CParameter::nb_workers(options.workers)],
        );
        encoder.write_all(records).await?;
        encoder.shutdown().await?;
        drop(encoder);
        Ok(packed)
    }

    pub async fn unpack_async(packed: &[u8]) -> Result<Vec<u8>, SplatError> {
        check_frame(packed)?;
        let mut decoder = ZstdDecoder::new(BufReader::new(packed));
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .await
            .map_err(|e| SplatError::Format(format!("zstd decompression failed: {}", e)))?;
        check_records(raw)
    }
}
}
