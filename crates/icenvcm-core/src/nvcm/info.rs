//! Device identification and configuration registers

use core::fmt;

/// Name of an iCE40 part from its signature device id
pub fn device_name(id: u8) -> Option<&'static str> {
    let name = match id {
        0x06 => "ICE40LP8K / ICE40HX8K",
        0x07 => "ICE40LP4K / ICE40HX4K",
        0x08 => "ICE40LP1K / ICE40HX1K",
        0x09 => "ICE40LP384",
        0x0E => "ICE40LP1K_SWG16",
        0x0F => "ICE40LP640_SWG16",
        0x10 => "ICE5LP1K",
        0x11 => "ICE5LP2K",
        0x12 => "ICE5LP4K",
        0x14 => "ICE40UL1K",
        0x15 => "ICE40UL640",
        0x20 => "ICE40UP5K",
        0x21 => "ICE40UP3K",
        _ => return None,
    };
    Some(name)
}

/// Signature, RF trim and trim row contents of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvcmInfo {
    /// Silicon signature words
    pub signature: [u64; 2],
    /// RF trim register
    pub rf_trim: u64,
    /// Trim rows 0x20, 0x60, 0xA0 and 0xE0
    pub trim: [u64; 4],
}

impl NvcmInfo {
    /// Device id from the first signature word
    pub fn device_id(&self) -> u8 {
        (self.signature[0] >> 56) as u8
    }

    /// Part name, if the id is known
    pub fn device_name(&self) -> Option<&'static str> {
        device_name(self.device_id())
    }

    /// Security bits from the RF trim register (0 = not secured)
    pub fn secure_bits(&self) -> u8 {
        secure_bits(self.rf_trim)
    }
}

/// Security bits of an RF trim value
pub fn secure_bits(rf_trim: u64) -> u8 {
    ((rf_trim >> 60) & 0x3) as u8
}

impl fmt::Display for NvcmInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Device: {} ({:02x}) secure={}",
            self.device_name().unwrap_or("Unknown"),
            self.device_id(),
            self.secure_bits()
        )?;
        for (i, sig) in self.signature.iter().enumerate() {
            writeln!(f, "Sig  {}: {:016x}", i, sig)?;
        }
        writeln!(f, "TrimRF: {:016x}", self.rf_trim)?;
        for (i, trim) in self.trim.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "Trim {}: {:016x}", i, trim)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_device_id() {
        let info = NvcmInfo {
            signature: [0x2000_0000_0000_0000, 0],
            rf_trim: 0x1000_0000_0000_0000,
            trim: [0; 4],
        };
        assert_eq!(info.device_id(), 0x20);
        assert_eq!(info.device_name(), Some("ICE40UP5K"));
        assert_eq!(info.secure_bits(), 1);
        assert_eq!(device_name(0x13), None);
    }

    #[test]
    fn test_display() {
        let info = NvcmInfo {
            signature: [0x0800_0000_0000_0001, 2],
            rf_trim: 0,
            trim: [0x0015_F2F1_C400_0000, 0, 0, 0],
        };
        let text = format!("{}", info);
        assert!(text.starts_with("Device: ICE40LP1K / ICE40HX1K (08) secure=0\n"));
        assert!(text.contains("Sig  1: 0000000000000002"));
        assert!(text.contains("Trim 0: 0015f2f1c4000000"));
        assert!(text.ends_with("Trim 3: 0000000000000000"));
    }
}
