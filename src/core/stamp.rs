use crate::core::address::Address;
use crate::core::image::RomImage;
use crate::error::{RomError, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Absolute address of the metadata stamp
pub const STAMP_ADDRESS: Address = Address(0x083F_FFE0);

/// Encoded stamp size
pub const STAMP_SIZE: usize = 0x20;

pub const SIGNATURE_LEN: usize = 8;

/// Signature written by this crate
pub const DEFAULT_SIGNATURE: [u8; SIGNATURE_LEN] = *b"ROMCART ";

/// Version metadata stamped into the image on save
///
/// # Layout
///
/// ```text
/// 0x00  signature  8 bytes ASCII
/// 0x08  major      u16 LE
/// 0x0A  minor      u16 LE
/// 0x0C  patch      u16 LE
/// 0x0E  reserved   18 bytes, zero
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataStamp {
    pub signature: [u8; SIGNATURE_LEN],
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl MetadataStamp {
    pub fn new(signature: [u8; SIGNATURE_LEN], version: &Version) -> Result<Self> {
        let component = |v: u64| {
            u16::try_from(v).map_err(|_| {
                RomError::InvalidStamp(format!("version component {} exceeds 16 bits", v))
            })
        };
        let stamp = MetadataStamp {
            signature,
            major: component(version.major)?,
            minor: component(version.minor)?,
            patch: component(version.patch)?,
        };
        stamp.validate()?;
        Ok(stamp)
    }

    pub fn version(&self) -> Version {
        Version::new(self.major as u64, self.minor as u64, self.patch as u64)
    }

    /// Signature must be printable ASCII
    pub fn validate(&self) -> Result<()> {
        if !self.signature.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(RomError::InvalidStamp(format!(
                "signature {:02X?} is not printable ASCII",
                self.signature
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; STAMP_SIZE] {
        let mut bytes = [0u8; STAMP_SIZE];
        bytes[0..8].copy_from_slice(&self.signature);
        bytes[8..10].copy_from_slice(&self.major.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.minor.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.patch.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STAMP_SIZE {
            return Err(RomError::InvalidStamp(format!(
                "need {} bytes, got {}",
                STAMP_SIZE,
                bytes.len()
            )));
        }

        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[0..8]);

        let stamp = MetadataStamp {
            signature,
            major: u16::from_le_bytes([bytes[8], bytes[9]]),
            minor: u16::from_le_bytes([bytes[10], bytes[11]]),
            patch: u16::from_le_bytes([bytes[12], bytes[13]]),
        };
        stamp.validate()?;
        Ok(stamp)
    }

    /// Read the stamp carrying `signature`, if the image has one
    pub fn read(image: &RomImage, signature: &[u8; SIGNATURE_LEN]) -> Result<Option<Self>> {
        let bytes = image.read(STAMP_ADDRESS, STAMP_SIZE)?;
        if &bytes[0..SIGNATURE_LEN] != signature {
            return Ok(None);
        }
        MetadataStamp::from_bytes(bytes).map(Some)
    }

    pub fn write(&self, image: &mut RomImage) -> Result<()> {
        image.write(STAMP_ADDRESS, &self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::MIN_IMAGE_SIZE;

    fn blank_image() -> RomImage {
        RomImage::from_bytes("mem.gba", vec![0xFF; MIN_IMAGE_SIZE as usize]).unwrap()
    }

    #[test]
    fn test_layout() {
        let stamp = MetadataStamp::new(DEFAULT_SIGNATURE, &Version::new(1, 2, 3)).unwrap();
        let bytes = stamp.to_bytes();

        assert_eq!(&bytes[0..8], b"ROMCART ");
        assert_eq!(&bytes[8..14], &[1, 0, 2, 0, 3, 0]);
        assert!(bytes[14..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_stamp_sits_at_end_of_minimum_image() {
        let mut image = blank_image();
        let stamp = MetadataStamp::new(DEFAULT_SIGNATURE, &Version::new(0, 3, 0)).unwrap();

        stamp.write(&mut image).unwrap();

        let offset = STAMP_ADDRESS.to_offset().unwrap();
        assert_eq!(offset + STAMP_SIZE, MIN_IMAGE_SIZE as usize);
        let read = MetadataStamp::read(&image, &DEFAULT_SIGNATURE).unwrap().unwrap();
        assert_eq!(read.version(), Version::new(0, 3, 0));
    }

    #[test]
    fn test_unstamped_image_reads_none() {
        let image = blank_image();
        assert!(MetadataStamp::read(&image, &DEFAULT_SIGNATURE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rejects_wide_version_component() {
        let result = MetadataStamp::new(DEFAULT_SIGNATURE, &Version::new(70_000, 0, 0));
        assert!(matches!(result, Err(RomError::InvalidStamp(_))));
    }

    #[test]
    fn test_rejects_binary_signature() {
        let mut bytes = [0u8; STAMP_SIZE];
        bytes[0] = 0x01;
        assert!(matches!(
            MetadataStamp::from_bytes(&bytes),
            Err(RomError::InvalidStamp(_))
        ));
    }
}
