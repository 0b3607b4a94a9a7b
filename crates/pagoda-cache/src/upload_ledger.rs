//! Bitmap ledger of acknowledged upload chunks.
//!
//! Bit *i* of `upload:<userId>:<fileMd5>` is 1 iff chunk *i* has been
//! acknowledged. Redis bitmaps are MSB-first within each byte; the scan in
//! [`bits_set`] mirrors that. `list_uploaded` fetches the raw bitmap in one
//! round-trip regardless of the chunk count.

use redis::AsyncCommands;

use crate::Cache;
use pagoda_core::{Error, Result};

/// Bitmap-backed chunk acknowledgement ledger.
#[derive(Clone)]
pub struct UploadLedger {
    cache: Cache,
}

fn bitmap_key(user_id: &str, file_md5: &str) -> String {
    format!("upload:{user_id}:{file_md5}")
}

/// Indices of set bits in `bitmap`, scanning bits `0..total`.
///
/// MSB-first within each byte, matching Redis `SETBIT` addressing.
pub fn bits_set(bitmap: &[u8], total: usize) -> Vec<u32> {
    let mut indices = Vec::new();
    for i in 0..total {
        let byte = i / 8;
        if byte >= bitmap.len() {
            break;
        }
        let bit = 7 - (i % 8);
        if bitmap[byte] & (1 << bit) != 0 {
            indices.push(i as u32);
        }
    }
    indices
}

fn check_index(chunk_index: i32) -> Result<u32> {
    if chunk_index < 0 {
        return Err(Error::InvalidInput(
            "chunkIndex must be non-negative".to_string(),
        ));
    }
    Ok(chunk_index as u32)
}

impl UploadLedger {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Set bit `chunk_index` for `(user_id, file_md5)`.
    pub async fn mark_uploaded(
        &self,
        user_id: &str,
        file_md5: &str,
        chunk_index: i32,
    ) -> Result<()> {
        let index = check_index(chunk_index)?;
        let mut conn = self.cache.conn.clone();
        let _: () = conn
            .setbit(bitmap_key(user_id, file_md5), index as usize, true)
            .await?;
        Ok(())
    }

    /// Read bit `chunk_index`.
    pub async fn is_uploaded(
        &self,
        user_id: &str,
        file_md5: &str,
        chunk_index: i32,
    ) -> Result<bool> {
        let index = check_index(chunk_index)?;
        let mut conn = self.cache.conn.clone();
        let set: bool = conn
            .getbit(bitmap_key(user_id, file_md5), index as usize)
            .await?;
        Ok(set)
    }

    /// Ordered indices of acknowledged chunks in `[0, total_chunks)`.
    ///
    /// One `GET` of the raw bitmap; the scan happens locally.
    pub async fn list_uploaded(
        &self,
        user_id: &str,
        file_md5: &str,
        total_chunks: usize,
    ) -> Result<Vec<u32>> {
        if total_chunks == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.cache.conn.clone();
        let bitmap: Option<Vec<u8>> = conn.get(bitmap_key(user_id, file_md5)).await?;
        Ok(bitmap
            .map(|b| bits_set(&b, total_chunks))
            .unwrap_or_default())
    }

    /// Clear the bitmap after merge completion or cancellation.
    pub async fn delete(&self, user_id: &str, file_md5: &str) -> Result<()> {
        let mut conn = self.cache.conn.clone();
        let _: () = conn.del(bitmap_key(user_id, file_md5)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_key_format() {
        assert_eq!(
            bitmap_key("42", "d41d8cd98f00b204e9800998ecf8427e"),
            "upload:42:d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn bits_set_scans_msb_first() {
        // 0b1010_0000: bits 0 and 2 set.
        assert_eq!(bits_set(&[0b1010_0000], 8), vec![0, 2]);
    }

    #[test]
    fn bits_set_spans_bytes() {
        // Bits 0 and 9 set across two bytes.
        let bitmap = [0b1000_0000, 0b0100_0000];
        assert_eq!(bits_set(&bitmap, 16), vec![0, 9]);
    }

    #[test]
    fn bits_set_respects_total_bound() {
        // Bit 5 is set but total=3 bounds the scan to indices 0..3.
        let bitmap = [0b1000_0100];
        assert_eq!(bits_set(&bitmap, 3), vec![0]);
    }

    #[test]
    fn bits_set_handles_short_bitmap() {
        // Asking for 24 bits against a 1-byte bitmap must not panic.
        assert_eq!(bits_set(&[0b0000_0001], 24), vec![7]);
    }

    #[test]
    fn bits_set_empty_bitmap() {
        assert!(bits_set(&[], 8).is_empty());
    }

    #[test]
    fn partial_upload_reports_acknowledged_indices() {
        // Chunks 0 and 2 of 3 acknowledged -> [0, 2].
        let mut bitmap = [0u8];
        bitmap[0] |= 1 << 7; // bit 0
        bitmap[0] |= 1 << 5; // bit 2
        assert_eq!(bits_set(&bitmap, 3), vec![0, 2]);
    }

    #[test]
    fn negative_index_is_invalid() {
        assert!(matches!(check_index(-1), Err(Error::InvalidInput(_))));
        assert_eq!(check_index(0).unwrap(), 0);
    }
}
