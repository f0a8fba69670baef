use crate::{Result, StorageError};

pub fn checked_range(offset: u64, len: u64, capacity: u64) -> Result<()> {
    let end = offset
        .checked_add(len)
        .ok_or(StorageError::OffsetOverflow)?;
    if end > capacity {
        return Err(StorageError::OutOfBounds {
            offset,
            len,
            capacity,
        });
    }
    Ok(())
}

/// Sector sizes the FAT layer can work with: a power of two, at least 512 bytes.
pub fn is_supported_sector_size(sector_size: u32) -> bool {
    sector_size >= 512 && sector_size.is_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_range_accepts_exact_fit() {
        checked_range(512, 512, 1024).unwrap();
        checked_range(0, 0, 0).unwrap();
    }

    #[test]
    fn checked_range_reports_out_of_bounds_and_overflow() {
        assert!(matches!(
            checked_range(1024, 1, 1024).unwrap_err(),
            StorageError::OutOfBounds { .. }
        ));
        assert!(matches!(
            checked_range(u64::MAX, 2, u64::MAX).unwrap_err(),
            StorageError::OffsetOverflow
        ));
    }

    #[test]
    fn sector_size_must_be_power_of_two_and_at_least_512() {
        assert!(is_supported_sector_size(512));
        assert!(is_supported_sector_size(4096));
        assert!(!is_supported_sector_size(256));
        assert!(!is_supported_sector_size(520));
        assert!(!is_supported_sector_size(0));
    }
}
